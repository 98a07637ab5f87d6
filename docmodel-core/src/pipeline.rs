//! Ordered conversion steps and the engine that runs them.
//!
//! A field converts a value by running it through its built-in steps and then through the
//! caller-supplied custom steps. Each [`Step`] is explicitly tagged: a [`Step::Constructor`]
//! only sees the value, a [`Step::Contextual`] also sees the owning [`Field`] so it can read
//! configuration such as a timezone or a format.
//!
//! # Example
//!
//! ```ignore
//! use docmodel::{field::Field, pipeline::Step, value::Value};
//!
//! let positive = Step::constructor(|value| match value {
//!     Value::Int(n) if n < 0 => Err("must be positive".into()),
//!     other => Ok(other),
//! });
//!
//! let count = Field::integer().to_wire_step(positive).build()?;
//! ```

use std::{fmt, sync::Arc};

use crate::{
    error::{StepError, StepResult, ValidationError, ValidationResult},
    field::Field,
    value::Value,
};

type ConstructorFn = dyn Fn(Value) -> StepResult<Value> + Send + Sync;
type ContextualFn = dyn Fn(Value, &Field) -> StepResult<Value> + Send + Sync;

/// One conversion or validation step.
#[derive(Clone)]
pub enum Step {
    /// Pure one-argument transform.
    Constructor(Arc<ConstructorFn>),
    /// Transform that can read the owning field's configuration.
    Contextual(Arc<ContextualFn>),
}

impl Step {
    pub fn constructor<F>(f: F) -> Self
    where
        F: Fn(Value) -> StepResult<Value> + Send + Sync + 'static,
    {
        Step::Constructor(Arc::new(f))
    }

    pub fn contextual<F>(f: F) -> Self
    where
        F: Fn(Value, &Field) -> StepResult<Value> + Send + Sync + 'static,
    {
        Step::Contextual(Arc::new(f))
    }

    pub fn apply(&self, value: Value, field: &Field) -> StepResult<Value> {
        match self {
            Step::Constructor(f) => f(value),
            Step::Contextual(f) => f(value, field),
        }
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::Constructor(_) => f.write_str("Step::Constructor"),
            Step::Contextual(_) => f.write_str("Step::Contextual"),
        }
    }
}

/// Whether caller-supplied steps take part in a conversion.
///
/// Operator values (an `$inc` delta, a `$min` bound, a filter operand) are converted with
/// `Suppress`: custom validators are written for whole values and may reject a valid delta.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CustomSteps {
    #[default]
    Apply,
    Suppress,
}

/// Runs `value` through `steps` in order on behalf of `field`.
///
/// Stops at the first failure. A step yielding `Null` ends the run with `Null`.
pub(crate) fn run<'a, I>(field: &Field, mut value: Value, steps: I) -> ValidationResult<Value>
where
    I: IntoIterator<Item = &'a Step>,
{
    for step in steps {
        if value.is_null() {
            break;
        }
        value = step
            .apply(value, field)
            .map_err(|err| scope(err, field))?;
    }

    Ok(value)
}

/// Turns a step failure into the uniform field-scoped error.
pub(crate) fn scope(err: StepError, field: &Field) -> ValidationError {
    match err {
        StepError::Validation(err) => err,
        StepError::Invalid(message) => ValidationError::new(field.label(), field.kind().type_name(), message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ValidationError;

    fn double() -> Step {
        Step::constructor(|value| match value {
            Value::Int(n) => Ok(Value::Int(n * 2)),
            other => Err(format!("cannot double {}", other.type_name()).into()),
        })
    }

    #[test]
    fn test_steps_run_in_order() {
        let field = Field::integer().build().unwrap();
        let add_one = Step::constructor(|value| match value {
            Value::Int(n) => Ok(Value::Int(n + 1)),
            other => Ok(other),
        });

        let steps = vec![double(), add_one];
        assert_eq!(run(&field, Value::Int(3), &steps), Ok(Value::Int(7)));

        let steps: Vec<Step> = steps.into_iter().rev().collect();
        assert_eq!(run(&field, Value::Int(3), &steps), Ok(Value::Int(8)));
    }

    #[test]
    fn test_first_failure_is_scoped_to_field() {
        let field = Field::integer().build().unwrap();
        let never = Step::constructor(|_| panic!("must not run after a failure"));

        let steps = vec![double(), never];
        let err = run(&field, Value::from("x"), &steps).unwrap_err();
        assert_eq!(err.kind, "IntegerField");
        assert_eq!(err.message, "cannot double text");
    }

    #[test]
    fn test_validation_error_is_preserved() {
        let field = Field::integer().build().unwrap();
        let strict = Step::constructor(|_| {
            Err(ValidationError::new("elsewhere", "CustomField", "original message").into())
        });

        let err = run(&field, Value::Int(1), &[strict]).unwrap_err();
        assert_eq!(err, ValidationError::new("elsewhere", "CustomField", "original message"));
    }

    #[test]
    fn test_contextual_step_reads_field() {
        let field = Field::text().required(false).build().unwrap();
        let describe = Step::contextual(|_, field| Ok(Value::Bool(field.is_required())));

        assert_eq!(run(&field, Value::from("x"), &[describe]), Ok(Value::Bool(false)));
    }

    #[test]
    fn test_null_ends_the_run() {
        let field = Field::integer().build().unwrap();
        let to_null = Step::constructor(|_| Ok(Value::Null));
        let never = Step::constructor(|_| panic!("must not run on null"));

        assert_eq!(run(&field, Value::Int(1), &[to_null, never]), Ok(Value::Null));
    }
}
