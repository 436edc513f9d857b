//! Decision branch conditions.
//!
//! A small closed grammar over a snapshot of the decision context:
//!
//! ```text
//! condition := "true" | "false" | operand op operand
//! operand   := placeholder | number | 'string'
//! placeholder := #readCount | #writeCount | #recordCount | #field(name)
//! op        := == | != | >= | <= | > | <
//! ```
//!
//! Conditions are pure functions of the [`DecisionSnapshot`] taken when
//! the decision step runs; nothing here can observe later state.

use serde_json::Value;
use weft_workflow::Record;

use crate::error::{EngineError, EngineResult};

/// Immutable view of the context a decision evaluates against.
#[derive(Debug, Clone, Default)]
pub struct DecisionSnapshot {
    /// Records read by the decision step.
    pub read_count: i64,
    /// Records written so far by the execution.
    pub write_count: i64,
    /// Records currently flowing through the decision.
    pub record_count: i64,
    /// First record at the decision point, for `#field(...)` lookups.
    pub first_record: Option<Record>,
}

/// One resolved operand.
#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Number(f64),
    Text(String),
    Bool(bool),
    Missing,
}

/// Evaluate a condition string against a snapshot.
pub fn evaluate(expr: &str, snapshot: &DecisionSnapshot) -> EngineResult<bool> {
    let expr = expr.trim();
    if expr.is_empty() {
        return Err(EngineError::InvalidArgument(
            "empty decision condition".to_string(),
        ));
    }
    if expr.eq_ignore_ascii_case("true") {
        return Ok(true);
    }
    if expr.eq_ignore_ascii_case("false") {
        return Ok(false);
    }

    let (lhs, op, rhs) = split_comparison(expr)?;
    let lhs = resolve_operand(lhs, snapshot)?;
    let rhs = resolve_operand(rhs, snapshot)?;
    compare(&lhs, op, &rhs)
}

/// Split `lhs op rhs`, longest operators first so `>=` wins over `>`.
fn split_comparison(expr: &str) -> EngineResult<(&str, &'static str, &str)> {
    for op in ["==", "!=", ">=", "<=", ">", "<"] {
        if let Some(idx) = expr.find(op) {
            let (lhs, rest) = expr.split_at(idx);
            return Ok((lhs.trim(), op, rest[op.len()..].trim()));
        }
    }
    Err(EngineError::InvalidArgument(format!(
        "decision condition has no comparison operator: {expr}"
    )))
}

fn resolve_operand(token: &str, snapshot: &DecisionSnapshot) -> EngineResult<Operand> {
    if let Some(placeholder) = token.strip_prefix('#') {
        return resolve_placeholder(placeholder, snapshot);
    }
    if token.len() >= 2 && token.starts_with('\'') && token.ends_with('\'') {
        return Ok(Operand::Text(token[1..token.len() - 1].to_string()));
    }
    if token.eq_ignore_ascii_case("true") {
        return Ok(Operand::Bool(true));
    }
    if token.eq_ignore_ascii_case("false") {
        return Ok(Operand::Bool(false));
    }
    token
        .parse::<f64>()
        .map(Operand::Number)
        .map_err(|_| EngineError::InvalidArgument(format!("unrecognized operand: {token}")))
}

fn resolve_placeholder(name: &str, snapshot: &DecisionSnapshot) -> EngineResult<Operand> {
    match name {
        "readCount" => Ok(Operand::Number(snapshot.read_count as f64)),
        "writeCount" => Ok(Operand::Number(snapshot.write_count as f64)),
        "recordCount" => Ok(Operand::Number(snapshot.record_count as f64)),
        _ => {
            let field = name
                .strip_prefix("field(")
                .and_then(|rest| rest.strip_suffix(')'))
                .ok_or_else(|| {
                    EngineError::InvalidArgument(format!("unknown placeholder: #{name}"))
                })?;
            let value = snapshot
                .first_record
                .as_ref()
                .and_then(|r| r.get(field).cloned());
            Ok(match value {
                Some(Value::Number(n)) => {
                    Operand::Number(n.as_f64().unwrap_or(0.0))
                }
                Some(Value::String(s)) => Operand::Text(s),
                Some(Value::Bool(b)) => Operand::Bool(b),
                _ => Operand::Missing,
            })
        }
    }
}

fn compare(lhs: &Operand, op: &str, rhs: &Operand) -> EngineResult<bool> {
    use Operand::*;
    match (lhs, rhs) {
        (Number(a), Number(b)) => Ok(match op {
            "==" => a == b,
            "!=" => a != b,
            ">=" => a >= b,
            "<=" => a <= b,
            ">" => a > b,
            "<" => a < b,
            _ => unreachable!(),
        }),
        (Text(a), Text(b)) => match op {
            "==" => Ok(a == b),
            "!=" => Ok(a != b),
            _ => Err(EngineError::InvalidArgument(format!(
                "operator {op} is not defined for strings"
            ))),
        },
        (Bool(a), Bool(b)) => match op {
            "==" => Ok(a == b),
            "!=" => Ok(a != b),
            _ => Err(EngineError::InvalidArgument(format!(
                "operator {op} is not defined for booleans"
            ))),
        },
        // A missing field compares unequal to everything.
        (Missing, _) | (_, Missing) => Ok(op == "!="),
        _ => Err(EngineError::InvalidArgument(
            "mismatched operand types in decision condition".to_string(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn snapshot(read: i64) -> DecisionSnapshot {
        DecisionSnapshot {
            read_count: read,
            write_count: 0,
            record_count: read,
            first_record: Some(Record::from_value(
                json!({"status": "open", "score": 7, "flagged": true}),
            )),
        }
    }

    #[test]
    fn literals() {
        assert!(evaluate("true", &snapshot(0)).unwrap());
        assert!(!evaluate("false", &snapshot(0)).unwrap());
    }

    #[test]
    fn counter_comparisons() {
        assert!(evaluate("#readCount >= 10", &snapshot(10)).unwrap());
        assert!(!evaluate("#readCount >= 10", &snapshot(9)).unwrap());
        assert!(evaluate("#recordCount == 3", &snapshot(3)).unwrap());
        assert!(evaluate("#writeCount < 1", &snapshot(5)).unwrap());
    }

    #[test]
    fn field_lookups() {
        assert!(evaluate("#field(status) == 'open'", &snapshot(1)).unwrap());
        assert!(evaluate("#field(score) > 5", &snapshot(1)).unwrap());
        assert!(evaluate("#field(flagged) == true", &snapshot(1)).unwrap());
        // Missing field is unequal to everything.
        assert!(evaluate("#field(nope) != 'x'", &snapshot(1)).unwrap());
        assert!(!evaluate("#field(nope) == 'x'", &snapshot(1)).unwrap());
    }

    #[test]
    fn bad_conditions_error() {
        assert!(evaluate("", &snapshot(0)).is_err());
        assert!(evaluate("#bogus > 1", &snapshot(0)).is_err());
        assert!(evaluate("no operator here", &snapshot(0)).is_err());
        assert!(evaluate("'a' > 'b'", &snapshot(0)).is_err());
    }

    #[test]
    fn longest_operator_wins() {
        assert!(evaluate("#readCount >= 0", &snapshot(0)).unwrap());
        assert!(!evaluate("#readCount > 0", &snapshot(0)).unwrap());
    }
}
