pub const ANONYMOUS_AUTHOR_NAME: &str = "anonymous";
pub const MAX_AUTHOR_NAME_CHARS: usize = 64;

/// Restricts a forum username to the identifier charset accepted in chat
/// message `name` fields. Never returns an empty string.
pub fn sanitize_author_name(raw: &str) -> String {
    let sanitized = raw
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-'))
        .take(MAX_AUTHOR_NAME_CHARS)
        .collect::<String>();
    if sanitized.is_empty() {
        ANONYMOUS_AUTHOR_NAME.to_string()
    } else {
        sanitized
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::{sanitize_author_name, ANONYMOUS_AUTHOR_NAME, MAX_AUTHOR_NAME_CHARS};

    #[test]
    fn unit_sanitize_author_name_strips_disallowed_characters() {
        assert_eq!(sanitize_author_name("jane.doe (mod)"), "janedoemod");
        assert_eq!(sanitize_author_name("bot_01-x"), "bot_01-x");
    }

    #[test]
    fn regression_empty_result_falls_back_to_placeholder() {
        assert_eq!(sanitize_author_name("ÄÖÜ ☃"), ANONYMOUS_AUTHOR_NAME);
        assert_eq!(sanitize_author_name(""), ANONYMOUS_AUTHOR_NAME);
    }

    proptest! {
        #[test]
        fn property_sanitized_names_are_bounded_and_in_charset(raw in any::<String>()) {
            let name = sanitize_author_name(&raw);
            prop_assert!(!name.is_empty());
            prop_assert!(name.chars().count() <= MAX_AUTHOR_NAME_CHARS);
            prop_assert!(name.chars().all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-'));
        }
    }
}
