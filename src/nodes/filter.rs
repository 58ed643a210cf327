//! Filter node: keep the subset of a collection matching a predicate.
//!
//! The predicate is either a free-form condition expression (with the
//! current item bound as `value`) or a list of structured conditions
//! combined by `and`/`or`. Inputs are coerced to arrays first so scalar
//! and collection inputs behave uniformly.

use super::coerce_array;
use crate::ast::AstNode;
use crate::errors::FlowError;
use crate::expr::{evaluate_predicate, loose_eq, truthy};
use crate::registry::{HandlerContext, NodeHandler};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

const VALUE: &str = "value";
const EXPRESSION: &str = "expression";
const CONDITIONS: &str = "conditions";
const LOGIC: &str = "logic";
const MATCHED: &str = "matched";
const COUNT: &str = "count";

/// Comparison operator of a structured filter condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    Gt,
    Gte,
    Lt,
    Lte,
    IsEmpty,
    IsNotEmpty,
    Regex,
    /// Free-form sub-expression evaluated with the item bound as `value`.
    Expression,
}

/// One structured condition: a field path, an operator, and (for most
/// operators) a comparison value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FilterCondition {
    #[serde(default)]
    pub field: String,
    pub operator: FilterOperator,
    #[serde(default)]
    pub value: Value,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Logic {
    #[default]
    And,
    Or,
}

pub struct FilterHandler;

#[async_trait]
impl NodeHandler for FilterHandler {
    async fn run(&self, node: &mut AstNode, ctx: &HandlerContext) -> Result<(), FlowError> {
        let items = coerce_array(node.input(VALUE));

        let matched: Vec<Value> = if let Some(expr) = node.input(EXPRESSION).and_then(Value::as_str)
        {
            let expr = expr.to_string();
            let mut kept = Vec::new();
            for item in items {
                if evaluate_predicate(&expr, &item).map_err(expression_error)? {
                    kept.push(item);
                }
            }
            kept
        } else {
            let conditions: Vec<FilterCondition> = match node.input(CONDITIONS) {
                None => Vec::new(),
                Some(raw) => serde_json::from_value(raw.clone()).map_err(|err| {
                    FlowError::named("FilterError", format!("invalid conditions: {err}"))
                })?,
            };
            let logic: Logic = match node.input(LOGIC) {
                None => Logic::default(),
                Some(raw) => serde_json::from_value(raw.clone()).map_err(|_| {
                    FlowError::named("FilterError", format!("unknown logic combinator {raw}"))
                })?,
            };
            let mut kept = Vec::new();
            for item in items {
                if matches_conditions(&item, &conditions, logic)? {
                    kept.push(item);
                }
            }
            kept
        };

        let count = matched.len();
        ctx.emit(node, MATCHED, Value::Array(matched))
            .and_then(|()| ctx.emit(node, COUNT, Value::from(count)))
            .map_err(|err| FlowError::named("StreamError", err.to_string()))?;
        Ok(())
    }
}

fn expression_error(err: crate::expr::ExprError) -> FlowError {
    FlowError::named("ExpressionError", "filter expression failed")
        .with_cause(FlowError::named("ExprError", err.to_string()))
}

fn matches_conditions(
    item: &Value,
    conditions: &[FilterCondition],
    logic: Logic,
) -> Result<bool, FlowError> {
    if conditions.is_empty() {
        return Ok(true);
    }
    match logic {
        Logic::And => {
            for condition in conditions {
                if !matches_condition(item, condition)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Logic::Or => {
            for condition in conditions {
                if matches_condition(item, condition)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
    }
}

/// Resolve a dot-separated field path against an item. An empty path is
/// the item itself; missing segments resolve to null.
fn field_value<'a>(item: &'a Value, path: &str) -> &'a Value {
    if path.is_empty() {
        return item;
    }
    let mut current = item;
    for segment in path.split('.') {
        match current.get(segment) {
            Some(next) => current = next,
            None => return &Value::Null,
        }
    }
    current
}

fn as_comparable_number(value: &Value) -> Option<f64> {
    value.as_f64()
}

fn matches_condition(item: &Value, condition: &FilterCondition) -> Result<bool, FlowError> {
    let field = field_value(item, &condition.field);
    let expected = &condition.value;

    let result = match condition.operator {
        FilterOperator::Equals => loose_eq(field, expected),
        FilterOperator::NotEquals => !loose_eq(field, expected),
        FilterOperator::Contains => contains(field, expected),
        FilterOperator::NotContains => !contains(field, expected),
        FilterOperator::StartsWith => match (field.as_str(), expected.as_str()) {
            (Some(haystack), Some(prefix)) => haystack.starts_with(prefix),
            _ => false,
        },
        FilterOperator::EndsWith => match (field.as_str(), expected.as_str()) {
            (Some(haystack), Some(suffix)) => haystack.ends_with(suffix),
            _ => false,
        },
        FilterOperator::Gt | FilterOperator::Gte | FilterOperator::Lt | FilterOperator::Lte => {
            match (as_comparable_number(field), as_comparable_number(expected)) {
                (Some(a), Some(b)) => match condition.operator {
                    FilterOperator::Gt => a > b,
                    FilterOperator::Gte => a >= b,
                    FilterOperator::Lt => a < b,
                    FilterOperator::Lte => a <= b,
                    _ => unreachable!(),
                },
                _ => false,
            }
        }
        FilterOperator::IsEmpty => is_empty(field),
        FilterOperator::IsNotEmpty => !is_empty(field),
        FilterOperator::Regex => {
            let pattern = expected.as_str().ok_or_else(|| {
                FlowError::named("FilterError", "regex operator requires a string pattern")
            })?;
            let regex = regex::Regex::new(pattern).map_err(|err| {
                FlowError::named("FilterError", format!("invalid regex pattern: {err}"))
            })?;
            match field.as_str() {
                Some(text) => regex.is_match(text),
                None => false,
            }
        }
        FilterOperator::Expression => {
            let expr = expected.as_str().ok_or_else(|| {
                FlowError::named("FilterError", "expression operator requires a string")
            })?;
            truthy(&crate::expr::evaluate(expr, item).map_err(expression_error)?)
        }
    };
    Ok(result)
}

fn contains(field: &Value, expected: &Value) -> bool {
    match field {
        Value::String(haystack) => expected
            .as_str()
            .is_some_and(|needle| haystack.contains(needle)),
        Value::Array(items) => items.iter().any(|item| loose_eq(item, expected)),
        _ => false,
    }
}

fn is_empty(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(map) => map.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cond(field: &str, operator: FilterOperator, value: Value) -> FilterCondition {
        FilterCondition {
            field: field.to_string(),
            operator,
            value,
        }
    }

    #[test]
    fn gte_condition_on_object_field() {
        let c = cond("age", FilterOperator::Gte, json!(18));
        assert!(!matches_condition(&json!({"age": 17}), &c).unwrap());
        assert!(matches_condition(&json!({"age": 20}), &c).unwrap());
    }

    #[test]
    fn nested_field_paths() {
        let c = cond("user.name", FilterOperator::StartsWith, json!("al"));
        assert!(matches_condition(&json!({"user": {"name": "alice"}}), &c).unwrap());
        assert!(!matches_condition(&json!({"user": {}}), &c).unwrap());
    }

    #[test]
    fn contains_works_for_strings_and_arrays() {
        let string_cond = cond("tags", FilterOperator::Contains, json!("ur"));
        assert!(matches_condition(&json!({"tags": "urgent"}), &string_cond).unwrap());

        let array_cond = cond("tags", FilterOperator::Contains, json!("a"));
        assert!(matches_condition(&json!({"tags": ["a", "b"]}), &array_cond).unwrap());
        assert!(!matches_condition(&json!({"tags": ["b"]}), &array_cond).unwrap());
    }

    #[test]
    fn empty_checks() {
        let c = cond("items", FilterOperator::IsEmpty, Value::Null);
        assert!(matches_condition(&json!({"items": []}), &c).unwrap());
        assert!(matches_condition(&json!({}), &c).unwrap());
        assert!(!matches_condition(&json!({"items": [1]}), &c).unwrap());
    }

    #[test]
    fn regex_operator_and_invalid_pattern() {
        let good = cond("url", FilterOperator::Regex, json!("^https://"));
        assert!(matches_condition(&json!({"url": "https://x"}), &good).unwrap());

        let bad = cond("url", FilterOperator::Regex, json!("["));
        assert!(matches_condition(&json!({"url": "x"}), &bad).is_err());
    }

    #[test]
    fn expression_operator_binds_the_item() {
        let c = cond(
            "",
            FilterOperator::Expression,
            json!("value.age >= 18 && value.active"),
        );
        assert!(matches_condition(&json!({"age": 20, "active": true}), &c).unwrap());
        assert!(!matches_condition(&json!({"age": 20, "active": false}), &c).unwrap());
    }

    #[test]
    fn or_logic_short_circuits() {
        let conditions = vec![
            cond("a", FilterOperator::Equals, json!(1)),
            cond("b", FilterOperator::Equals, json!(2)),
        ];
        assert!(matches_conditions(&json!({"b": 2}), &conditions, Logic::Or).unwrap());
        assert!(!matches_conditions(&json!({"b": 3}), &conditions, Logic::And).unwrap());
    }
}
