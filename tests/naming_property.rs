#[macro_use]
extern crate proptest;

use flowloom::queue::naming::{dlq_name, normalize_queue_name, DLQ_SUFFIX};
use proptest::prelude::{prop, Strategy};

/// Generate raw logical queue names with realistic noise: mixed casing,
/// surrounding and internal whitespace, punctuation.
fn raw_name_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex(r"[ \t]*[A-Za-z0-9._\-/!@# ]{1,32}[ \t]*").unwrap()
}

proptest! {
    #[test]
    fn prop_normalization_is_idempotent(raw in raw_name_strategy()) {
        if let Ok(once) = normalize_queue_name(&raw) {
            let twice = normalize_queue_name(&once).unwrap();
            prop_assert_eq!(once, twice);
        }
    }

    #[test]
    fn prop_normalized_names_use_only_wire_safe_characters(raw in raw_name_strategy()) {
        if let Ok(name) = normalize_queue_name(&raw) {
            prop_assert!(!name.is_empty());
            prop_assert!(name
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '.' | '_' | '-')));
            prop_assert!(!name.contains(char::is_whitespace));
        }
    }

    #[test]
    fn prop_case_and_padding_do_not_change_identity(raw in prop::string::string_regex("[a-z][a-z0-9-]{0,16}").unwrap()) {
        let padded = format!("  {}  ", raw.to_uppercase());
        prop_assert_eq!(
            normalize_queue_name(&raw).unwrap(),
            normalize_queue_name(&padded).unwrap()
        );
    }

    #[test]
    fn prop_dlq_names_always_carry_the_suffix(raw in raw_name_strategy()) {
        if let Ok(name) = normalize_queue_name(&raw) {
            prop_assert!(dlq_name(&name).ends_with(DLQ_SUFFIX));
        }
    }
}
