//! Canonical table, column and junction names
//!
//! Snake-cased words are joined with a single `_`, so a double underscore
//! never appears inside a canonical name. Junction names use `__` to
//! separate their parts and can never collide with a table name.

use heck::ToSnakeCase;

/// Convert an identifier (PascalCase, camelCase, already snake) to lower_snake_case.
///
/// Idempotent: `to_snake_case(&to_snake_case(s)) == to_snake_case(s)`.
pub fn to_snake_case(identifier: &str) -> String {
    identifier.to_snake_case()
}

/// Name of the junction table joining two models in a many-to-many relation.
///
/// Symmetric in its arguments.
pub fn junction_table_name(model_a: &str, model_b: &str) -> String {
    let a = to_snake_case(model_a);
    let b = to_snake_case(model_b);
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{}__{}", first, second)
}

/// Junction name that also carries the relation fields on both sides.
///
/// Used when one pair of models is joined by more than one many-to-many
/// relation. Symmetric in its two `(table, field)` arguments.
pub fn qualified_junction_table_name(side_a: (&str, &str), side_b: (&str, &str)) -> String {
    let a = (to_snake_case(side_a.0), to_snake_case(side_a.1));
    let b = (to_snake_case(side_b.0), to_snake_case(side_b.1));
    let (first, second) = if a <= b { (a, b) } else { (b, a) };
    format!("{}__{}__{}__{}", first.0, first.1, second.0, second.1)
}

/// Column in a junction table holding one side's primary key.
pub fn junction_column_name(table: &str, pk: &str) -> String {
    format!("{}_{}", to_snake_case(table), to_snake_case(pk))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_case_conversions() {
        assert_eq!(to_snake_case("One"), "one");
        assert_eq!(to_snake_case("BlogPost"), "blog_post");
        assert_eq!(to_snake_case("blogPost"), "blog_post");
        assert_eq!(to_snake_case("HTTPServer"), "http_server");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
        assert_eq!(to_snake_case("Version2Model"), "version2_model");
    }

    #[test]
    fn test_snake_case_is_idempotent_on_samples() {
        for name in ["UserProfile", "XMLHttpRequest", "a_b_c", "ID", "Many2Many", "__weird__Name"] {
            let once = to_snake_case(name);
            assert_eq!(to_snake_case(&once), once, "not idempotent for {}", name);
        }
    }

    #[test]
    fn test_junction_name_is_symmetric() {
        assert_eq!(junction_table_name("Post", "Tag"), "post__tag");
        assert_eq!(junction_table_name("Tag", "Post"), "post__tag");
        assert_eq!(junction_table_name("Student", "Student"), "student__student");
    }

    #[test]
    fn test_qualified_junction_name_is_symmetric() {
        let forward = qualified_junction_table_name(("one", "links_a"), ("many", "owners_a"));
        let backward = qualified_junction_table_name(("many", "owners_a"), ("one", "links_a"));
        assert_eq!(forward, backward);
        assert_eq!(forward, "many__owners_a__one__links_a");
    }

    #[test]
    fn test_junction_name_does_not_collide_with_word_boundaries() {
        assert_ne!(junction_table_name("AB", "C"), junction_table_name("A", "BC"));
    }

    #[test]
    fn test_junction_column_name() {
        assert_eq!(junction_column_name("BlogPost", "id"), "blog_post_id");
    }
}
