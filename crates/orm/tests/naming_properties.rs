//! Property tests for canonical names

use proptest::prelude::*;
use relgraph_orm::naming::{junction_column_name, junction_table_name, qualified_junction_table_name, to_snake_case};

fn identifier() -> impl Strategy<Value = String> {
    "[A-Za-z_][A-Za-z0-9_]{0,24}"
}

proptest! {
    #[test]
    fn snake_case_is_idempotent(name in identifier()) {
        let once = to_snake_case(&name);
        prop_assert_eq!(to_snake_case(&once), once);
    }

    #[test]
    fn snake_case_is_lowercase(name in identifier()) {
        let snake = to_snake_case(&name);
        prop_assert!(!snake.chars().any(|c| c.is_ascii_uppercase()));
    }

    #[test]
    fn junction_name_is_symmetric(a in identifier(), b in identifier()) {
        prop_assert_eq!(junction_table_name(&a, &b), junction_table_name(&b, &a));
    }

    #[test]
    fn qualified_junction_name_is_symmetric(
        a in identifier(),
        field_a in identifier(),
        b in identifier(),
        field_b in identifier(),
    ) {
        prop_assert_eq!(
            qualified_junction_table_name((&a, &field_a), (&b, &field_b)),
            qualified_junction_table_name((&b, &field_b), (&a, &field_a))
        );
    }

    #[test]
    fn junction_column_ends_with_key(table in "[A-Z][a-z]{1,10}", pk in "[a-z]{1,6}") {
        let column = junction_column_name(&table, &pk);
        let suffix = format!("_{}", pk);
        prop_assert!(column.ends_with(&suffix));
        prop_assert!(column.starts_with(&to_snake_case(&table)));
    }
}
