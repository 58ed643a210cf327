//! AST-walking evaluator over `serde_json::Value`.

use super::ExprError;
use super::parser::{BinOp, Expr};
use serde_json::Value;

/// JSON truthiness: `null`, `false`, `0`, and `""` are falsy; everything
/// else (including empty arrays and objects) is truthy.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Evaluate a parsed expression with `value` bound.
pub fn evaluate_expr(expr: &Expr, value: &Value) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(v) => Ok(v.clone()),
        Expr::Var => Ok(value.clone()),
        Expr::Member(base, key) => {
            let base = evaluate_expr(base, value)?;
            // Missing members and non-objects evaluate to null so
            // conditions over heterogeneous items stay total.
            Ok(base.get(key).cloned().unwrap_or(Value::Null))
        }
        Expr::Index(base, idx) => {
            let base = evaluate_expr(base, value)?;
            Ok(base.get(*idx).cloned().unwrap_or(Value::Null))
        }
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&evaluate_expr(inner, value)?))),
        Expr::Neg(inner) => {
            let inner = evaluate_expr(inner, value)?;
            match inner.as_f64() {
                Some(f) => Ok(number(-f)),
                None => Err(ExprError::TypeMismatch {
                    op: "-",
                    detail: format!("cannot negate {inner}"),
                }),
            }
        }
        Expr::Binary(op, left, right) => match op {
            BinOp::And => {
                if !truthy(&evaluate_expr(left, value)?) {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(truthy(&evaluate_expr(right, value)?)))
            }
            BinOp::Or => {
                if truthy(&evaluate_expr(left, value)?) {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(truthy(&evaluate_expr(right, value)?)))
            }
            BinOp::Eq => Ok(Value::Bool(loose_eq(
                &evaluate_expr(left, value)?,
                &evaluate_expr(right, value)?,
            ))),
            BinOp::Ne => Ok(Value::Bool(!loose_eq(
                &evaluate_expr(left, value)?,
                &evaluate_expr(right, value)?,
            ))),
            BinOp::Lt | BinOp::Le | BinOp::Gt | BinOp::Ge => {
                let l = evaluate_expr(left, value)?;
                let r = evaluate_expr(right, value)?;
                let ordering = compare(op.symbol(), &l, &r)?;
                Ok(Value::Bool(match op {
                    BinOp::Lt => ordering.is_lt(),
                    BinOp::Le => ordering.is_le(),
                    BinOp::Gt => ordering.is_gt(),
                    BinOp::Ge => ordering.is_ge(),
                    _ => unreachable!(),
                }))
            }
        },
    }
}

/// Equality with numeric normalization: `2` and `2.0` compare equal, and
/// arrays/objects compare structurally.
pub fn loose_eq(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => match (a.as_f64(), b.as_f64()) {
            (Some(fa), Some(fb)) => fa == fb,
            _ => a == b,
        },
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| loose_eq(x, y))
        }
        (Value::Object(a), Value::Object(b)) => {
            a.len() == b.len()
                && a.iter()
                    .all(|(k, v)| b.get(k).is_some_and(|other| loose_eq(v, other)))
        }
        _ => left == right,
    }
}

fn compare(op: &'static str, left: &Value, right: &Value) -> Result<std::cmp::Ordering, ExprError> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => {
            let (fa, fb) = (a.as_f64().unwrap_or(f64::NAN), b.as_f64().unwrap_or(f64::NAN));
            fa.partial_cmp(&fb).ok_or(ExprError::TypeMismatch {
                op,
                detail: "numbers are not comparable".to_string(),
            })
        }
        (Value::String(a), Value::String(b)) => Ok(a.cmp(b)),
        _ => Err(ExprError::TypeMismatch {
            op,
            detail: format!("cannot order {left} against {right}"),
        }),
    }
}

fn number(f: f64) -> Value {
    if f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Value::from(f as i64)
    } else {
        serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn truthiness_table() {
        assert!(!truthy(&Value::Null));
        assert!(!truthy(&json!(false)));
        assert!(!truthy(&json!(0)));
        assert!(!truthy(&json!("")));
        assert!(truthy(&json!(1)));
        assert!(truthy(&json!("x")));
        assert!(truthy(&json!([])));
        assert!(truthy(&json!({})));
    }

    #[test]
    fn loose_equality_normalizes_numbers() {
        assert!(loose_eq(&json!(2), &json!(2.0)));
        assert!(loose_eq(&json!([1, 2.0]), &json!([1.0, 2])));
        assert!(!loose_eq(&json!({"a": 1}), &json!({"a": 2})));
    }
}
