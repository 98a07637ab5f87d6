//! Query construction and compilation against a schema.
//!
//! Filters are written with logical values and field paths. Before reaching a store they are
//! compiled by [`FilterCompiler`], which resolves every path in the model's schema and
//! converts every operand through the targeted field, so a filter on a date/time field
//! compares against the same wire form the field writes.
//!
//! # Query Building
//!
//! ```ignore
//! use docmodel::query::{Filter, Query, SortDirection};
//!
//! let query = Query::builder()
//!     .filter(Filter::eq("status", "active").and(Filter::gte("age", 18)))
//!     .sort("created", SortDirection::Desc)
//!     .limit(10)
//!     .project(["name", "age"])
//!     .build();
//! ```
//!
//! # Filter Expression API
//!
//! - Comparison: `eq`, `ne`, `gt`, `gte`, `lt`, `lte`
//! - String: `starts_with`, `ends_with`, `contains`, `not_contains`
//! - Existence: `exists`, `not_exists`
//! - Membership: `any_of`, `none_of`
//! - Logical: `and`, `or`, and [`Expr::not`]

use std::collections::BTreeSet;

use bson::{Bson, Document, doc};

use crate::{
    error::{DocumentStoreError, FieldError, ValidationError},
    field::Field,
    schema::Schema,
    value::Value,
};

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    /// Ascending order (A to Z, 0 to 9, earliest to latest).
    Asc,
    /// Descending order (Z to A, 9 to 0, latest to earliest).
    Desc,
}

impl SortDirection {
    fn as_i32(self) -> i32 {
        match self {
            SortDirection::Asc => 1,
            SortDirection::Desc => -1,
        }
    }
}

/// One sort key.
#[derive(Debug, Clone, PartialEq)]
pub struct Sort {
    /// Field path to sort by.
    pub field: String,
    /// The sort direction.
    pub direction: SortDirection,
}

/// Field comparison operators for filter expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldOp {
    /// Equal to; on a list field, any element equal to.
    Eq,
    /// Not equal to.
    Ne,
    /// Greater than.
    Gt,
    /// Greater than or equal to.
    Gte,
    /// Less than.
    Lt,
    /// Less than or equal to.
    Lte,
    /// Substring of a text field, or all of the given elements for a list field.
    Contains,
    /// Neither a substring of a text field nor an element of a list field.
    NotContains,
    /// Case-insensitive prefix of a text field.
    StartsWith,
    /// Case-insensitive suffix of a text field.
    EndsWith,
    /// Value is one of the given values.
    AnyOf,
    /// Value is none of the given values.
    NoneOf,
}

/// A filter expression over logical values.
///
/// Operands are logical values; they are converted by the targeted field when the
/// expression is compiled, so `Filter::gte("age", "18")` compares against an integer.
///
/// # Example
///
/// ```ignore
/// use docmodel::query::Filter;
///
/// let adults = Filter::gte("age", 18).and(Filter::exists("email"));
/// let outsiders = Filter::any_of("address.city", ["Lisbon", "Porto"]).not();
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Logical AND of multiple expressions (all must match).
    And(Vec<Expr>),
    /// Logical OR of multiple expressions (any must match).
    Or(Vec<Expr>),
    /// Logical NOT of an expression (inverts the result).
    Not(Box<Expr>),
    /// Field path present (`true`) or absent (`false`).
    Exists(String, bool),
    /// Field comparison expression.
    Field {
        /// Field name or dotted path.
        field: String,
        /// The comparison operator.
        op: FieldOp,
        /// Logical value to compare against.
        value: Value,
    },
}

impl Expr {
    /// Creates a field comparison expression.
    pub fn field(field: String, op: FieldOp, value: Value) -> Self {
        Expr::Field { field, op, value }
    }

    /// Combines with `other` under AND, flattening an existing AND.
    pub fn and(self, other: Expr) -> Self {
        match self {
            Expr::And(mut list) => {
                list.push(other);
                Expr::And(list)
            }
            _ => Expr::And(vec![self, other]),
        }
    }

    /// Combines with `other` under OR, flattening an existing OR.
    pub fn or(self, other: Expr) -> Self {
        match self {
            Expr::Or(mut list) => {
                list.push(other);
                Expr::Or(list)
            }
            _ => Expr::Or(vec![self, other]),
        }
    }

    pub fn not(self) -> Self {
        Expr::Not(Box::new(self))
    }
}

/// Filter, paging, ordering and projection of a read.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Query {
    pub filter: Option<Expr>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
    /// Sort keys, most significant first.
    pub sort: Vec<Sort>,
    /// Field names to load; `None` loads every field.
    pub projection: Option<BTreeSet<String>>,
}

impl Query {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn builder() -> QueryBuilder {
        QueryBuilder::new()
    }

    /// Query matching documents by `filter` only.
    pub fn filtered(filter: Expr) -> Self {
        Self {
            filter: Some(filter),
            ..Self::default()
        }
    }
}

/// Static constructors for filter expressions.
///
/// ```ignore
/// let expr = Filter::eq("name", "Alice").and(Filter::gt("age", 18));
/// ```
pub struct Filter;

impl Filter {
    /// Field equals `value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Eq, value.into())
    }

    /// Field does not equal `value`.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Ne, value.into())
    }

    /// Field is greater than `value`.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Gt, value.into())
    }

    /// Field is greater than or equal to `value`.
    pub fn gte(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Gte, value.into())
    }

    /// Field is less than `value`.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Lt, value.into())
    }

    /// Field is less than or equal to `value`.
    pub fn lte(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Lte, value.into())
    }

    /// Case-insensitive prefix match on a text field.
    pub fn starts_with(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::StartsWith, value.into())
    }

    /// Case-insensitive suffix match on a text field.
    pub fn ends_with(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::EndsWith, value.into())
    }

    /// Case-insensitive substring of a text field, or every given element of a list field.
    pub fn contains(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::Contains, value.into())
    }

    /// Negation of [`Filter::contains`].
    pub fn not_contains(field: impl Into<String>, value: impl Into<Value>) -> Expr {
        Expr::field(field.into(), FieldOp::NotContains, value.into())
    }

    /// Field is present in the stored document.
    pub fn exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), true)
    }

    /// Field is absent from the stored document.
    pub fn not_exists(field: impl Into<String>) -> Expr {
        Expr::Exists(field.into(), false)
    }

    /// All expressions must match.
    pub fn and(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::And(exprs.into_iter().collect())
    }

    /// At least one expression must match.
    pub fn or(exprs: impl IntoIterator<Item = Expr>) -> Expr {
        Expr::Or(exprs.into_iter().collect())
    }

    /// Field equals one of `values`.
    pub fn any_of<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Expr {
        Expr::field(field.into(), FieldOp::AnyOf, Value::list(values))
    }

    /// Field equals none of `values`.
    pub fn none_of<V: Into<Value>>(field: impl Into<String>, values: impl IntoIterator<Item = V>) -> Expr {
        Expr::field(field.into(), FieldOp::NoneOf, Value::list(values))
    }
}

#[derive(Debug, Clone, Default)]
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the filter expression.
    pub fn filter(mut self, filter: Expr) -> Self {
        self.query.filter = Some(filter);
        self
    }

    /// Sets the maximum number of documents to return.
    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    /// Sets the number of documents to skip.
    pub fn offset(mut self, offset: usize) -> Self {
        self.query.offset = Some(offset);
        self
    }

    /// Appends a sort key; earlier keys take precedence.
    ///
    /// # Arguments
    ///
    /// * `field` - Field path to sort by
    /// * `direction` - Ascending or descending
    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query.sort.push(Sort {
            field: field.into(),
            direction,
        });
        self
    }

    /// Restricts loaded fields to `fields`.
    pub fn project<S: Into<String>>(mut self, fields: impl IntoIterator<Item = S>) -> Self {
        self.query.projection = Some(fields.into_iter().map(Into::into).collect());
        self
    }

    pub fn build(self) -> Query {
        self.query
    }
}

/// Walks a filter expression tree.
pub trait QueryVisitor {
    type Output;
    type Error: Into<DocumentStoreError>;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error>;
    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error>;
    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error>;
    fn visit_field(&mut self, field: &str, op: FieldOp, value: &Value) -> Result<Self::Output, Self::Error>;

    fn visit_expr(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        match expr {
            Expr::And(exprs) => self.visit_and(exprs),
            Expr::Or(exprs) => self.visit_or(exprs),
            Expr::Not(expr) => self.visit_not(expr),
            Expr::Exists(field, should_exist) => self.visit_exists(field, *should_exist),
            Expr::Field { field, op, value } => self.visit_field(field, *op, value),
        }
    }
}

/// Compiles filter expressions into store-native filter documents for one schema.
///
/// Comparison operands are converted with the targeted field's wire conversion (custom
/// steps suppressed). Paths into list fields compare element-wise.
#[derive(Debug, Clone, Copy)]
pub struct FilterCompiler<'a> {
    schema: &'a Schema,
}

impl<'a> FilterCompiler<'a> {
    pub fn new(schema: &'a Schema) -> Self {
        Self { schema }
    }

    /// Compiles an optional filter; `None` matches every document.
    pub fn compile(&mut self, filter: Option<&Expr>) -> Result<Document, DocumentStoreError> {
        match filter {
            Some(expr) => self.visit_expr(expr),
            None => Ok(Document::new()),
        }
    }

    /// Validates sort paths and produces the store sort document.
    pub fn compile_sort(&self, sort: &[Sort]) -> Result<Option<Document>, FieldError> {
        if sort.is_empty() {
            return Ok(None);
        }

        let mut doc = Document::new();
        for key in sort {
            self.schema.resolve_path(&key.field)?;
            doc.insert(key.field.clone(), key.direction.as_i32());
        }
        Ok(Some(doc))
    }

    /// Validates projected names and produces the store projection document.
    pub fn compile_projection(&self, projection: Option<&BTreeSet<String>>) -> Result<Option<Document>, FieldError> {
        let Some(names) = projection else {
            return Ok(None);
        };

        let mut doc = Document::new();
        for name in names {
            self.schema.require(name)?;
            doc.insert(name.clone(), 1);
        }
        Ok(Some(doc))
    }

    /// Field used to convert operands: the element field for list paths.
    fn operand_field<'f>(target: &'f Field, value: &Value) -> &'f Field {
        match (target.kind().element(), value) {
            (Some(_), Value::List(_) | Value::Set(_)) => target,
            (Some(element), _) => element,
            (None, _) => target,
        }
    }

    fn operand(target: &Field, value: &Value) -> Result<Bson, ValidationError> {
        Self::operand_field(target, value).to_wire_operand(value.clone())
    }

    fn operands(target: &Field, value: &Value) -> Result<Vec<Bson>, DocumentStoreError> {
        let converter = target.kind().element().unwrap_or(target);
        match value {
            Value::List(items) | Value::Set(items) => Ok(items
                .iter()
                .map(|item| converter.to_wire_operand(item.clone()))
                .collect::<Result<Vec<_>, _>>()?),
            other => Err(DocumentStoreError::InvalidDocument(format!(
                "expected a list of values, got {}",
                other.type_name()
            ))),
        }
    }

    fn pattern(target: &Field, value: &Value, op: FieldOp) -> Result<String, DocumentStoreError> {
        match Self::operand(target, value)? {
            Bson::String(text) => {
                let escaped = regex::escape(&text);
                Ok(match op {
                    FieldOp::StartsWith => format!("^{}", escaped),
                    FieldOp::EndsWith => format!("{}$", escaped),
                    _ => escaped,
                })
            }
            other => Err(DocumentStoreError::InvalidDocument(format!(
                "string operators require text, got {}",
                other
            ))),
        }
    }
}

impl QueryVisitor for FilterCompiler<'_> {
    type Output = Document;
    type Error = DocumentStoreError;

    fn visit_and(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$and": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_or(&mut self, exprs: &[Expr]) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$or": exprs
                .iter()
                .map(|expr| self.visit_expr(expr))
                .collect::<Result<Vec<_>, _>>()?,
        })
    }

    fn visit_not(&mut self, expr: &Expr) -> Result<Self::Output, Self::Error> {
        Ok(doc! {
            "$nor": [self.visit_expr(expr)?],
        })
    }

    fn visit_exists(&mut self, field: &str, should_exist: bool) -> Result<Self::Output, Self::Error> {
        self.schema.resolve_path(field)?;
        Ok(doc! {
            field: { "$exists": should_exist },
        })
    }

    fn visit_field(&mut self, field: &str, op: FieldOp, value: &Value) -> Result<Self::Output, Self::Error> {
        let target = self.schema.resolve_path(field)?;

        let condition = match op {
            FieldOp::Eq => doc! { "$eq": Self::operand(target, value)? },
            FieldOp::Ne => doc! { "$ne": Self::operand(target, value)? },
            FieldOp::Gt => doc! { "$gt": Self::operand(target, value)? },
            FieldOp::Gte => doc! { "$gte": Self::operand(target, value)? },
            FieldOp::Lt => doc! { "$lt": Self::operand(target, value)? },
            FieldOp::Lte => doc! { "$lte": Self::operand(target, value)? },
            FieldOp::AnyOf => doc! { "$in": Self::operands(target, value)? },
            FieldOp::NoneOf => doc! { "$nin": Self::operands(target, value)? },
            FieldOp::Contains | FieldOp::NotContains if target.kind().element().is_some() => {
                let elements = match value {
                    Value::List(_) | Value::Set(_) => Self::operands(target, value)?,
                    _ => vec![Self::operand(target, value)?],
                };
                match op {
                    FieldOp::Contains => doc! { "$all": elements },
                    _ => doc! { "$nin": elements },
                }
            }
            FieldOp::Contains => doc! { "$regex": Self::pattern(target, value, op)?, "$options": "i" },
            FieldOp::NotContains => {
                doc! { "$not": { "$regex": Self::pattern(target, value, op)?, "$options": "i" } }
            }
            FieldOp::StartsWith | FieldOp::EndsWith => {
                doc! { "$regex": Self::pattern(target, value, op)?, "$options": "i" }
            }
        };

        Ok(doc! { field: condition })
    }
}
