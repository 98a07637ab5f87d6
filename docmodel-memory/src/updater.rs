//! Application of store-native update documents to in-memory documents.
//!
//! Supports the update operators the translator produces. Dotted paths create missing
//! intermediate documents for writing operators; numeric segments address array elements and
//! `$[]` addresses all of them. The positional `$` and filtered `$[ident]` markers need the
//! matching query's array state and are rejected.

use bson::{Bson, Document, Timestamp};

use docmodel_core::error::{DocumentStoreError, DocumentStoreResult};

use crate::evaluator::{Comparable, element_matches, sort_cmp};

/// Applies `update` to `doc`.
///
/// `inserting` is set when the document is being created by an upsert, which enables
/// `$setOnInsert`.
///
/// # Errors
///
/// Returns [`DocumentStoreError::UnknownOperator`] for operators the store does not know and
/// [`DocumentStoreError::InvalidDocument`] for operands that do not fit the stored values.
pub(crate) fn apply_update(doc: &mut Document, update: &Document, inserting: bool) -> DocumentStoreResult<()> {
    for (op, fields) in update {
        let Bson::Document(fields) = fields else {
            return Err(invalid(format!("{} expects a document of fields", op)));
        };

        for (path, arg) in fields {
            if path == "_id" && op != "$setOnInsert" {
                return Err(invalid("_id is immutable"));
            }
            apply_operator(doc, op, path, arg, inserting)?;
        }
    }

    Ok(())
}

fn apply_operator(doc: &mut Document, op: &str, path: &str, arg: &Bson, inserting: bool) -> DocumentStoreResult<()> {
    match op {
        "$set" => modify(doc, path, true, &mut |_| Ok(Change::Set(arg.clone()))),
        "$setOnInsert" if inserting => modify(doc, path, true, &mut |_| Ok(Change::Set(arg.clone()))),
        "$setOnInsert" => Ok(()),
        "$unset" => modify(doc, path, false, &mut |current| {
            Ok(if current.is_some() { Change::Remove } else { Change::Keep })
        }),
        "$inc" => modify(doc, path, true, &mut |current| {
            arithmetic(current.unwrap_or(&Bson::Int32(0)), arg, |a, b| a.checked_add(b), |a, b| a + b).map(Change::Set)
        }),
        "$mul" => modify(doc, path, true, &mut |current| {
            arithmetic(current.unwrap_or(&Bson::Int32(0)), arg, |a, b| a.checked_mul(b), |a, b| a * b).map(Change::Set)
        }),
        "$min" => modify(doc, path, true, &mut |current| {
            Ok(match current {
                Some(value) if sort_cmp(Some(value), Some(arg)).is_le() => Change::Keep,
                _ => Change::Set(arg.clone()),
            })
        }),
        "$max" => modify(doc, path, true, &mut |current| {
            Ok(match current {
                Some(value) if sort_cmp(Some(value), Some(arg)).is_ge() => Change::Keep,
                _ => Change::Set(arg.clone()),
            })
        }),
        "$bit" => modify(doc, path, true, &mut |current| bitwise(current, arg).map(Change::Set)),
        "$currentDate" => modify(doc, path, true, &mut |_| current_date(arg).map(Change::Set)),
        "$push" => modify(doc, path, true, &mut |current| push(current, arg).map(Change::Set)),
        "$addToSet" => modify(doc, path, true, &mut |current| add_to_set(current, arg).map(Change::Set)),
        "$pop" => modify(doc, path, false, &mut |current| pop(current, arg)),
        "$pull" => modify(doc, path, false, &mut |current| {
            retain(current, |item| element_matches(item, arg).map(|matched| !matched))
        }),
        "$pullAll" => {
            let Bson::Array(values) = arg else {
                return Err(invalid("$pullAll expects an array"));
            };
            modify(doc, path, false, &mut |current| {
                retain(current, |item| {
                    Ok(!values
                        .iter()
                        .any(|value| Comparable::from(item) == Comparable::from(value)))
                })
            })
        }
        other => Err(DocumentStoreError::UnknownOperator(other.to_string())),
    }
}

fn invalid(message: impl Into<String>) -> DocumentStoreError {
    DocumentStoreError::InvalidDocument(message.into())
}

/// What to do with the value at a path.
enum Change {
    Keep,
    Set(Bson),
    Remove,
}

type Modifier<'f> = dyn FnMut(Option<&Bson>) -> DocumentStoreResult<Change> + 'f;

/// Runs `f` on every value addressed by `path` and applies the change it returns.
///
/// With `create`, missing intermediate documents are created.
fn modify(doc: &mut Document, path: &str, create: bool, f: &mut Modifier<'_>) -> DocumentStoreResult<()> {
    let segments: Vec<&str> = path.split('.').collect();
    modify_in_document(doc, &segments, create, f)
}

fn modify_in_document(doc: &mut Document, segments: &[&str], create: bool, f: &mut Modifier<'_>) -> DocumentStoreResult<()> {
    let Some((head, rest)) = segments.split_first() else {
        return Err(invalid("empty update path"));
    };
    if head.starts_with('$') {
        return Err(invalid(format!("'{}' can only address array elements", head)));
    }

    if rest.is_empty() {
        match f(doc.get(*head))? {
            Change::Keep => {}
            Change::Set(value) => {
                doc.insert(*head, value);
            }
            Change::Remove => {
                doc.remove(*head);
            }
        }
        return Ok(());
    }

    match doc.get_mut(*head) {
        Some(child) => modify_in_value(child, rest, create, f),
        None if create => {
            let mut child = Document::new();
            modify_in_document(&mut child, rest, create, f)?;
            if !child.is_empty() {
                doc.insert(*head, child);
            }
            Ok(())
        }
        None => Ok(()),
    }
}

fn modify_in_value(value: &mut Bson, segments: &[&str], create: bool, f: &mut Modifier<'_>) -> DocumentStoreResult<()> {
    match value {
        Bson::Document(doc) => modify_in_document(doc, segments, create, f),
        Bson::Array(items) => modify_in_array(items, segments, create, f),
        _ if create => Err(invalid(format!(
            "cannot create field '{}' in a non-document value",
            segments.first().copied().unwrap_or_default()
        ))),
        _ => Ok(()),
    }
}

fn modify_in_array(items: &mut Vec<Bson>, segments: &[&str], create: bool, f: &mut Modifier<'_>) -> DocumentStoreResult<()> {
    let Some((head, rest)) = segments.split_first() else {
        return Err(invalid("empty update path"));
    };

    let indexes: Vec<usize> = match *head {
        "$[]" => (0..items.len()).collect(),
        "$" => {
            return Err(DocumentStoreError::Backend(
                "the positional $ operator is not supported by the in-memory store".to_string(),
            ));
        }
        marker if marker.starts_with("$[") => {
            return Err(DocumentStoreError::Backend(
                "filtered positional operators are not supported by the in-memory store".to_string(),
            ));
        }
        segment => match segment.parse::<usize>() {
            Ok(idx) => vec![idx],
            Err(_) => return Err(invalid(format!("cannot use the part '{}' to traverse an array", segment))),
        },
    };

    for idx in indexes {
        if idx >= items.len() && !create {
            continue;
        }

        if rest.is_empty() {
            match f(items.get(idx))? {
                Change::Keep => {}
                Change::Set(value) => {
                    if idx >= items.len() {
                        items.resize(idx, Bson::Null);
                        items.push(value);
                    } else {
                        items[idx] = value;
                    }
                }
                // Unsetting an element leaves a null in its place.
                Change::Remove => {
                    if let Some(item) = items.get_mut(idx) {
                        *item = Bson::Null;
                    }
                }
            }
            continue;
        }

        if idx >= items.len() {
            items.resize(idx, Bson::Null);
            items.push(Bson::Document(Document::new()));
        }
        if let Some(item) = items.get_mut(idx) {
            modify_in_value(item, rest, create, f)?;
        }
    }

    Ok(())
}

fn arithmetic(
    current: &Bson,
    arg: &Bson,
    int_op: impl Fn(i64, i64) -> Option<i64>,
    float_op: impl Fn(f64, f64) -> f64,
) -> DocumentStoreResult<Bson> {
    match (current, arg) {
        (Bson::Int32(a), Bson::Int32(b)) => Ok(match int_op(*a as i64, *b as i64) {
            Some(result) => i32::try_from(result).map(Bson::Int32).unwrap_or(Bson::Int64(result)),
            None => return Err(invalid("integer overflow")),
        }),
        (Bson::Int32(_) | Bson::Int64(_), Bson::Int32(_) | Bson::Int64(_)) => int_op(as_i64(current), as_i64(arg))
            .map(Bson::Int64)
            .ok_or_else(|| invalid("integer overflow")),
        (
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_),
            Bson::Int32(_) | Bson::Int64(_) | Bson::Double(_),
        ) => Ok(Bson::Double(float_op(as_f64(current), as_f64(arg)))),
        _ => Err(invalid(format!("cannot apply arithmetic to {} and {}", current, arg))),
    }
}

fn as_i64(value: &Bson) -> i64 {
    match value {
        Bson::Int32(n) => *n as i64,
        Bson::Int64(n) => *n,
        Bson::Double(n) => *n as i64,
        _ => 0,
    }
}

fn as_f64(value: &Bson) -> f64 {
    match value {
        Bson::Int32(n) => *n as f64,
        Bson::Int64(n) => *n as f64,
        Bson::Double(n) => *n,
        _ => 0.0,
    }
}

fn bitwise(current: Option<&Bson>, arg: &Bson) -> DocumentStoreResult<Bson> {
    let Bson::Document(ops) = arg else {
        return Err(invalid("$bit expects a document of and/or/xor"));
    };

    let current = current.unwrap_or(&Bson::Int32(0));
    if !matches!(current, Bson::Int32(_) | Bson::Int64(_)) {
        return Err(invalid(format!("$bit requires an integer, found {}", current)));
    }

    let mut result = as_i64(current);
    for (op, operand) in ops {
        if !matches!(operand, Bson::Int32(_) | Bson::Int64(_)) {
            return Err(invalid("$bit operands must be integers"));
        }
        let operand = as_i64(operand);
        result = match op.as_str() {
            "and" => result & operand,
            "or" => result | operand,
            "xor" => result ^ operand,
            other => return Err(invalid(format!("'{}' is not a bitwise operation", other))),
        };
    }

    Ok(match current {
        Bson::Int32(_) => i32::try_from(result).map(Bson::Int32).unwrap_or(Bson::Int64(result)),
        _ => Bson::Int64(result),
    })
}

fn current_date(arg: &Bson) -> DocumentStoreResult<Bson> {
    let now = bson::DateTime::now();
    match arg {
        Bson::Boolean(true) => Ok(Bson::DateTime(now)),
        Bson::Document(spec) => match spec.get_str("$type") {
            Ok("date") => Ok(Bson::DateTime(now)),
            Ok("timestamp") => Ok(Bson::Timestamp(Timestamp {
                time: u32::try_from(now.timestamp_millis() / 1000).unwrap_or(u32::MAX),
                increment: 1,
            })),
            _ => Err(invalid("$currentDate $type must be 'date' or 'timestamp'")),
        },
        _ => Err(invalid("$currentDate expects true or a $type document")),
    }
}

fn array_of(current: Option<&Bson>, op: &str) -> DocumentStoreResult<Vec<Bson>> {
    match current {
        None | Some(Bson::Null) => Ok(Vec::new()),
        Some(Bson::Array(items)) => Ok(items.clone()),
        Some(other) => Err(invalid(format!("{} requires an array, found {}", op, other))),
    }
}

fn is_modifier_document(arg: &Bson) -> bool {
    matches!(arg, Bson::Document(doc) if doc.contains_key("$each"))
}

fn push(current: Option<&Bson>, arg: &Bson) -> DocumentStoreResult<Bson> {
    let mut items = array_of(current, "$push")?;

    let Bson::Document(modifiers) = arg else {
        items.push(arg.clone());
        return Ok(Bson::Array(items));
    };
    if !is_modifier_document(arg) {
        items.push(arg.clone());
        return Ok(Bson::Array(items));
    }

    let each = match modifiers.get("$each") {
        Some(Bson::Array(each)) => each.clone(),
        _ => return Err(invalid("$each expects an array")),
    };

    match modifiers.get("$position") {
        Some(position) => {
            let len = items.len() as i64;
            let position = as_i64(position);
            let at = if position < 0 { (len + position).max(0) } else { position.min(len) };
            let at = usize::try_from(at).unwrap_or_default();
            items.splice(at..at, each);
        }
        None => items.extend(each),
    }

    if let Some(sort) = modifiers.get("$sort") {
        sort_items(&mut items, sort)?;
    }

    if let Some(slice) = modifiers.get("$slice") {
        let slice = as_i64(slice);
        let len = items.len();
        let keep = usize::try_from(slice.unsigned_abs()).unwrap_or(usize::MAX).min(len);
        if slice >= 0 {
            items.truncate(keep);
        } else {
            items.drain(..len - keep);
        }
    }

    Ok(Bson::Array(items))
}

fn sort_items(items: &mut [Bson], sort: &Bson) -> DocumentStoreResult<()> {
    match sort {
        Bson::Int32(_) | Bson::Int64(_) => {
            let descending = as_i64(sort) < 0;
            items.sort_by(|a, b| {
                let ordering = sort_cmp(Some(a), Some(b));
                if descending { ordering.reverse() } else { ordering }
            });
            Ok(())
        }
        Bson::Document(keys) => {
            let keys: Vec<(&str, bool)> = keys.iter().map(|(key, dir)| (key.as_str(), as_i64(dir) < 0)).collect();
            items.sort_by(|a, b| {
                for (key, descending) in &keys {
                    let left = a.as_document().and_then(|doc| doc.get(*key));
                    let right = b.as_document().and_then(|doc| doc.get(*key));
                    let ordering = sort_cmp(left, right);
                    let ordering = if *descending { ordering.reverse() } else { ordering };
                    if ordering.is_ne() {
                        return ordering;
                    }
                }
                std::cmp::Ordering::Equal
            });
            Ok(())
        }
        _ => Err(invalid("$sort expects 1, -1 or a document of directions")),
    }
}

fn add_to_set(current: Option<&Bson>, arg: &Bson) -> DocumentStoreResult<Bson> {
    let mut items = array_of(current, "$addToSet")?;

    let candidates = match arg {
        Bson::Document(modifiers) if is_modifier_document(arg) => match modifiers.get("$each") {
            Some(Bson::Array(each)) => each.clone(),
            _ => return Err(invalid("$each expects an array")),
        },
        other => vec![other.clone()],
    };

    for candidate in candidates {
        let present = items
            .iter()
            .any(|item| Comparable::from(item) == Comparable::from(&candidate));
        if !present {
            items.push(candidate);
        }
    }

    Ok(Bson::Array(items))
}

fn pop(current: Option<&Bson>, arg: &Bson) -> DocumentStoreResult<Change> {
    let Some(current) = current else {
        return Ok(Change::Keep);
    };
    let mut items = array_of(Some(current), "$pop")?;

    match as_i64(arg) {
        1 => {
            items.pop();
        }
        -1 => {
            if !items.is_empty() {
                items.remove(0);
            }
        }
        _ => return Err(invalid("$pop expects 1 or -1")),
    }

    Ok(Change::Set(Bson::Array(items)))
}

fn retain(
    current: Option<&Bson>,
    mut keep: impl FnMut(&Bson) -> DocumentStoreResult<bool>,
) -> DocumentStoreResult<Change> {
    let Some(current) = current else {
        return Ok(Change::Keep);
    };

    let mut kept = Vec::new();
    for item in array_of(Some(current), "$pull")? {
        if keep(&item)? {
            kept.push(item);
        }
    }

    Ok(Change::Set(Bson::Array(kept)))
}
