//! Token estimation utilities.
//!
//! Uses a character-based heuristic: ~4 characters per token. Close enough
//! for BPE tokenizers on English text and only used for logging and
//! metadata, never for budget enforcement (the budget is in characters).

use ragloom_core::message::Message;

/// Estimate the token count for a string.
///
/// Heuristic: 1 token ≈ 4 characters. Rounds up.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    text.chars().count().div_ceil(4)
}

/// Estimate tokens for a prompt, including ~4 tokens of per-message overhead
/// for role names and delimiters.
pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(|m| 4 + estimate_tokens(&m.content)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_string_is_zero() {
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn four_chars_is_one_token() {
        assert_eq!(estimate_tokens("test"), 1);
    }

    #[test]
    fn five_chars_rounds_up() {
        assert_eq!(estimate_tokens("hello"), 2);
    }

    #[test]
    fn counts_chars_not_bytes() {
        assert_eq!(estimate_tokens("héllo wörld"), 3);
    }

    #[test]
    fn messages_include_overhead() {
        let msgs = vec![Message::system("hello"), Message::user("world")];
        assert_eq!(estimate_messages_tokens(&msgs), 12);
    }
}
