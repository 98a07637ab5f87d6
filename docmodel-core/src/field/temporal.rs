//! Date/time, date and epoch timestamp fields.
//!
//! Text input is parsed leniently: RFC 3339, ISO-8601 with or without offset, `T` or space
//! separators, US `MM/DD/YYYY` dates and plain dates (taken as midnight). Naive and aware
//! values are kept apart until a field's timezone decides what to do with them.

use std::{fmt, str::FromStr};

use chrono::{
    DateTime, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, SecondsFormat, TimeZone, Utc,
};

use super::{Field, FieldKind};
use crate::{
    error::{ConfigurationError, StepResult},
    pipeline::Step,
    value::{Value, iso_naive_datetime},
};

const AWARE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f%z",
    "%Y-%m-%d %H:%M:%S%.f%z",
    "%Y-%m-%dT%H:%M:%S%.f%:z",
    "%Y-%m-%d %H:%M:%S%.f%:z",
];

const NAIVE_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%m/%d/%Y", "%Y%m%d"];

/// Numeric representation of a timestamp field on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampFormat {
    /// Whole seconds since the epoch.
    #[default]
    Int,
    /// Seconds since the epoch with a fractional part.
    Float,
}

impl FromStr for TimestampFormat {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "int" => Ok(TimestampFormat::Int),
            "float" => Ok(TimestampFormat::Float),
            other => Err(ConfigurationError::InvalidTimestampFormat(other.to_string())),
        }
    }
}

impl fmt::Display for TimestampFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimestampFormat::Int => f.write_str("int"),
            TimestampFormat::Float => f.write_str("float"),
        }
    }
}

pub(super) fn datetime_wire_steps() -> Vec<Step> {
    vec![
        Step::constructor(load_datetime),
        Step::contextual(require_timezone),
        Step::contextual(convert_timezone),
        Step::constructor(isoformat),
    ]
}

pub(super) fn datetime_logical_steps() -> Vec<Step> {
    vec![Step::constructor(load_datetime), Step::contextual(attach_timezone)]
}

pub(super) fn date_wire_steps() -> Vec<Step> {
    vec![
        Step::constructor(load_date),
        Step::constructor(|value| match value {
            Value::Date(date) => Ok(Value::Text(date.format("%Y-%m-%d").to_string())),
            other => Ok(other),
        }),
    ]
}

pub(super) fn date_logical_steps() -> Vec<Step> {
    vec![Step::constructor(load_date)]
}

pub(super) fn timestamp_wire_steps() -> Vec<Step> {
    vec![Step::constructor(to_epoch), Step::contextual(apply_format)]
}

pub(super) fn timestamp_logical_steps() -> Vec<Step> {
    vec![Step::constructor(to_epoch), Step::constructor(from_epoch)]
}

/// Parses date/time text into an aware or naive value.
pub(crate) fn parse_datetime(text: &str) -> Option<Value> {
    let text = text.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(text) {
        return Some(Value::DateTime(dt));
    }
    if let Some(dt) = AWARE_FORMATS
        .iter()
        .find_map(|fmt| DateTime::parse_from_str(text, fmt).ok())
    {
        return Some(Value::DateTime(dt));
    }
    if let Some(dt) = NAIVE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
    {
        return Some(Value::NaiveDateTime(dt));
    }

    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(text, fmt).ok())
        .map(|date| Value::NaiveDateTime(date.and_time(NaiveTime::MIN)))
}

fn load_datetime(value: Value) -> StepResult<Value> {
    match value {
        Value::DateTime(_) | Value::NaiveDateTime(_) => Ok(value),
        Value::Date(date) => Ok(Value::NaiveDateTime(date.and_time(NaiveTime::MIN))),
        Value::Text(text) => {
            parse_datetime(&text).ok_or_else(|| format!("'{}' is not a valid date/time", text).into())
        }
        other => Err(format!("expected a date/time, got {}", other.type_name()).into()),
    }
}

fn require_timezone(value: Value, field: &Field) -> StepResult<Value> {
    match (&value, field.kind()) {
        (Value::NaiveDateTime(dt), FieldKind::DateTime { timezone: Some(tz) }) => Err(format!(
            "{} has no timezone while the field expects {}",
            iso_naive_datetime(dt),
            tz
        )
        .into()),
        _ => Ok(value),
    }
}

fn convert_timezone(value: Value, field: &Field) -> StepResult<Value> {
    match (value, field.kind()) {
        (Value::DateTime(dt), FieldKind::DateTime { timezone: Some(tz) }) => {
            Ok(Value::DateTime(dt.with_timezone(tz).fixed_offset()))
        }
        (value, _) => Ok(value),
    }
}

/// Stored naive values are read as local time of the field's zone, aware ones converted into it.
fn attach_timezone(value: Value, field: &Field) -> StepResult<Value> {
    let FieldKind::DateTime { timezone: Some(tz) } = field.kind() else {
        return Ok(value);
    };

    match value {
        Value::DateTime(dt) => Ok(Value::DateTime(dt.with_timezone(tz).fixed_offset())),
        Value::NaiveDateTime(dt) => tz
            .from_local_datetime(&dt)
            .earliest()
            .map(|dt| Value::DateTime(dt.fixed_offset()))
            .ok_or_else(|| format!("{} does not exist in {}", iso_naive_datetime(&dt), tz).into()),
        other => Ok(other),
    }
}

fn isoformat(value: Value) -> StepResult<Value> {
    match value {
        Value::DateTime(dt) => Ok(Value::Text(dt.to_rfc3339_opts(SecondsFormat::AutoSi, false))),
        Value::NaiveDateTime(dt) => Ok(Value::Text(iso_naive_datetime(&dt))),
        other => Ok(other),
    }
}

fn load_date(value: Value) -> StepResult<Value> {
    match value {
        Value::Date(_) => Ok(value),
        Value::DateTime(dt) => Ok(Value::Date(dt.date_naive())),
        Value::NaiveDateTime(dt) => Ok(Value::Date(dt.date())),
        Value::Text(text) => match parse_datetime(&text) {
            Some(Value::DateTime(dt)) => Ok(Value::Date(dt.date_naive())),
            Some(Value::NaiveDateTime(dt)) => Ok(Value::Date(dt.date())),
            _ => Err(format!("'{}' is not a valid date", text).into()),
        },
        other => Err(format!("expected a date, got {}", other.type_name()).into()),
    }
}

/// Normalizes any accepted input to seconds since the epoch (naive values are UTC).
fn to_epoch(value: Value) -> StepResult<Value> {
    let aware = |dt: DateTime<FixedOffset>| {
        let secs = dt.timestamp();
        match dt.timestamp_subsec_nanos() {
            0 => Value::Int(secs),
            nanos => Value::Float(secs as f64 + nanos as f64 / 1e9),
        }
    };

    match value {
        Value::Int(_) => Ok(value),
        Value::Float(secs) => epoch_seconds(secs),
        Value::DateTime(dt) => Ok(aware(dt)),
        Value::NaiveDateTime(dt) => Ok(aware(dt.and_utc().fixed_offset())),
        Value::Date(date) => Ok(Value::Int(date.and_time(NaiveTime::MIN).and_utc().timestamp())),
        Value::Text(text) => {
            let trimmed = text.trim();
            if let Ok(secs) = trimmed.parse::<i64>() {
                return Ok(Value::Int(secs));
            }
            if let Ok(secs) = trimmed.parse::<f64>() {
                return epoch_seconds(secs);
            }
            match parse_datetime(trimmed) {
                Some(Value::DateTime(dt)) => Ok(aware(dt)),
                Some(Value::NaiveDateTime(dt)) => Ok(aware(dt.and_utc().fixed_offset())),
                _ => Err(format!("'{}' is not a valid timestamp", text).into()),
            }
        }
        other => Err(format!("expected a timestamp, got {}", other.type_name()).into()),
    }
}

/// Fractional seconds must be finite and fit the integer wire format.
fn epoch_seconds(secs: f64) -> StepResult<Value> {
    if secs.is_finite() && secs >= i64::MIN as f64 && secs < i64::MAX as f64 {
        Ok(Value::Float(secs))
    } else {
        Err(format!("{} is out of timestamp range", secs).into())
    }
}

fn apply_format(value: Value, field: &Field) -> StepResult<Value> {
    let format = match field.kind() {
        FieldKind::Timestamp { format } => *format,
        _ => TimestampFormat::Int,
    };

    match (format, value) {
        (TimestampFormat::Int, Value::Float(secs)) => Ok(Value::Int(secs.trunc() as i64)),
        (TimestampFormat::Float, Value::Int(secs)) => Ok(Value::Float(secs as f64)),
        (_, value) => Ok(value),
    }
}

fn from_epoch(value: Value) -> StepResult<Value> {
    let dt = match value {
        Value::Int(secs) => DateTime::<Utc>::from_timestamp(secs, 0),
        Value::Float(secs) if secs.is_finite() => {
            let whole = secs.floor();
            let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
            DateTime::<Utc>::from_timestamp(whole as i64, nanos)
        }
        other => return Ok(other),
    };

    dt.map(|dt| Value::DateTime(dt.fixed_offset()))
        .ok_or_else(|| "timestamp out of range".into())
}

#[cfg(test)]
mod tests {
    use bson::Bson;

    use super::*;

    fn naive(y: i32, m: u32, d: u32, h: u32, min: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .and_then(|date| date.and_hms_opt(h, min, s))
            .unwrap()
    }

    #[test]
    fn test_parse_variants() {
        assert_eq!(
            parse_datetime("2011-07-07 12:30"),
            Some(Value::NaiveDateTime(naive(2011, 7, 7, 12, 30, 0)))
        );
        assert_eq!(
            parse_datetime("07/07/2011"),
            Some(Value::NaiveDateTime(naive(2011, 7, 7, 0, 0, 0)))
        );
        assert!(matches!(parse_datetime("2011-07-07T12:30:00+02:00"), Some(Value::DateTime(_))));
        assert_eq!(parse_datetime("yesterday"), None);
    }

    #[test]
    fn test_naive_datetime_without_timezone() {
        let field = Field::datetime().build().unwrap();
        assert_eq!(
            field.to_wire(naive(2011, 7, 7, 0, 0, 0)),
            Ok(Bson::String("2011-07-07T00:00:00".into()))
        );
        assert_eq!(
            field.to_logical(Bson::String("2011-07-07T00:00:00".into())),
            Ok(Value::NaiveDateTime(naive(2011, 7, 7, 0, 0, 0)))
        );
    }

    #[test]
    fn test_timezone_rejects_naive_and_converts_aware() {
        let field = Field::datetime().timezone("Europe/Madrid").build().unwrap();

        let err = field.to_wire(naive(2011, 7, 7, 0, 0, 0)).unwrap_err();
        assert_eq!(err.kind, "DateTimeField");

        let utc = naive(2011, 7, 7, 10, 0, 0).and_utc();
        assert_eq!(
            field.to_wire(utc),
            Ok(Bson::String("2011-07-07T12:00:00+02:00".into()))
        );
    }

    #[test]
    fn test_timezone_attached_on_read() {
        let field = Field::datetime().timezone("Europe/Madrid").build().unwrap();
        let read = field
            .to_logical(Bson::String("2011-07-07T12:00:00".into()))
            .unwrap();

        let Value::DateTime(dt) = read else {
            panic!("expected an aware value, got {:?}", read);
        };
        assert_eq!(dt.offset().local_minus_utc(), 2 * 3600);
    }

    #[test]
    fn test_date_field() {
        let field = Field::date().build().unwrap();
        assert_eq!(field.to_wire("2011-07-07 15:00"), Ok(Bson::String("2011-07-07".into())));
        assert_eq!(
            field.to_logical(Bson::String("2011-07-07".into())),
            Ok(Value::Date(NaiveDate::from_ymd_opt(2011, 7, 7).unwrap()))
        );
    }

    #[test]
    fn test_timestamp_formats() {
        let moment = naive(2011, 7, 7, 0, 0, 0);

        let int = Field::timestamp().build().unwrap();
        assert_eq!(int.to_wire(moment), Ok(Bson::Int64(1309996800)));

        let float = Field::timestamp().format("float").build().unwrap();
        assert_eq!(float.to_wire(moment), Ok(Bson::Double(1309996800.0)));

        assert_eq!(
            int.to_logical(Bson::Int64(1309996800)),
            Ok(Value::DateTime(moment.and_utc().fixed_offset()))
        );
    }

    #[test]
    fn test_timestamp_rejects_non_finite_and_huge_seconds() {
        let field = Field::timestamp().build().unwrap();

        for input in [Value::Float(f64::NAN), Value::Float(f64::INFINITY), Value::Float(1e300)] {
            let err = field.to_wire(input).unwrap_err();
            assert_eq!(err.kind, "TimestampField");
            assert!(err.message.contains("out of timestamp range"), "{}", err.message);
        }
        for text in ["inf", "NaN", "-1e300"] {
            assert!(field.to_wire(text).is_err(), "{} was accepted", text);
        }

        assert_eq!(field.to_wire(1309996800.75), Ok(Bson::Int64(1309996800)));
    }

    #[test]
    fn test_date_round_trip() {
        let field = Field::date().build().unwrap();
        let value = Value::Date(NaiveDate::from_ymd_opt(2024, 2, 29).unwrap());

        let wire = field.to_wire(value.clone()).unwrap();
        assert_eq!(wire, Bson::String("2024-02-29".into()));
        assert_eq!(field.to_logical(wire), Ok(value));
    }
}
