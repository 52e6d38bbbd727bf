//! Console report formatting shared by the utilities.
//!
//! Operators grep these lines, so the `✓`/`✗` markers and `=` banners stay stable.

pub const OK: &str = "✓";
pub const FAIL: &str = "✗";
pub const WIDE: usize = 80;
pub const NARROW: usize = 70;

pub fn rule(width: usize) -> String {
    "=".repeat(width)
}

/// Prints a title between two `=` rules.
pub fn banner(title: &str, width: usize) {
    println!("{}", rule(width));
    println!("{title}");
    println!("{}", rule(width));
}

/// Prints a closing rule preceded by a blank line.
pub fn footer(width: usize) {
    println!("\n{}", rule(width));
}

/// Truncates `text` to at most `max_chars` characters, appending `...` when cut.
pub fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule() {
        assert_eq!(80, rule(WIDE).len());
        assert!(rule(NARROW).chars().all(|c| c == '='));
    }

    #[test]
    fn test_truncate_counts_chars() {
        assert_eq!("abc", truncate("abc", 3));
        assert_eq!("ab...", truncate("abc", 2));
        assert_eq!("직원...", truncate("직원 데이터", 2));
    }
}
