/// Splits text into lowercase alphanumeric tokens. Used for the position-aware
/// `message` field index so phrase queries (`"exact phrase"`) can be satisfied
/// by a contiguous-subsequence check.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|s| !s.is_empty())
        .map(|s| s.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_punctuation_and_lowercases() {
        assert_eq!(
            tokenize("Hello, World! error_code=42"),
            vec!["hello", "world", "error_code", "42"]
        );
    }

    #[test]
    fn empty_input_yields_no_tokens() {
        assert!(tokenize("   ").is_empty());
    }
}
