//! Built-in routing nodes.
//!
//! These cover the generic data-flow vocabulary of a workflow: branch
//! (If/Switch), join (Merge), subset (Filter), and the data-carried loop
//! accumulator. They contain no application logic; leaf behavior lives in
//! application handlers registered alongside them.

mod cond;
mod filter;
mod loop_acc;
mod merge;
mod switch;

pub use cond::IfHandler;
pub use filter::{FilterCondition, FilterHandler, FilterOperator};
pub use loop_acc::LoopAccumulatorHandler;
pub use merge::{MergeHandler, MergeMode};
pub use switch::SwitchHandler;

use crate::ast::is_skip;
use crate::errors::FlowError;
use serde_json::Value;

/// Coerce any input to an array so scalar and collection inputs behave
/// uniformly. `null`, route-skip, and missing values coerce to empty.
pub(crate) fn coerce_array(value: Option<&Value>) -> Vec<Value> {
    match value {
        None | Some(Value::Null) => Vec::new(),
        Some(v) if is_skip(v) => Vec::new(),
        Some(Value::Array(items)) => items.clone(),
        Some(other) => vec![other.clone()],
    }
}

pub(crate) fn missing_input(property: &str) -> FlowError {
    FlowError::named(
        "MissingInputError",
        format!("missing expected input '{property}'"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::skip_value;
    use serde_json::json;

    #[test]
    fn coercion_covers_scalars_collections_and_inactive_values() {
        assert_eq!(coerce_array(Some(&json!([1, 2]))), vec![json!(1), json!(2)]);
        assert_eq!(coerce_array(Some(&json!(5))), vec![json!(5)]);
        assert!(coerce_array(Some(&Value::Null)).is_empty());
        assert!(coerce_array(Some(&skip_value())).is_empty());
        assert!(coerce_array(None).is_empty());
    }
}
