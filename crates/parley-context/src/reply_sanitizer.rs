use std::sync::LazyLock;

use regex::Regex;

pub const ZERO_WIDTH_SPACE: char = '\u{200B}';

static MENTION_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"@[A-Za-z0-9_][A-Za-z0-9_.\-]*").expect("mention pattern is a valid regex")
});

/// Breaks `@name` mentions in generated text so posting the reply does not
/// notify anyone. Addresses such as `a@b.example` are left alone.
pub fn sanitize_reply(text: &str) -> String {
    let mut sanitized = String::with_capacity(text.len());
    let mut copied_to = 0_usize;
    for found in MENTION_PATTERN.find_iter(text) {
        let preceded_by_word = text[..found.start()]
            .chars()
            .next_back()
            .is_some_and(is_word_char);
        if preceded_by_word {
            continue;
        }
        let after_marker = found.start() + 1;
        sanitized.push_str(&text[copied_to..after_marker]);
        sanitized.push(ZERO_WIDTH_SPACE);
        copied_to = after_marker;
    }
    sanitized.push_str(&text[copied_to..]);
    sanitized
}

fn is_word_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_'
}
