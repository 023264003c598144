//! Wire framing for batched envelopes.
//!
//! One transport frame carries one or more JSON envelopes joined by a
//! single `|` delimiter. Before an envelope enters a batch, every
//! backslash and delimiter byte in its serialized form is escaped
//! (`\` becomes `\\`, `|` becomes `\|`), so splitting a batch on
//! unescaped delimiters recovers the original envelopes exactly.
//! The transform is total: `unescape(escape(x)) == x` for every `x`.

use crate::error::{Result, ZephyrLinkError};

/// Batch delimiter separating envelopes within one transport frame.
pub const DELIMITER: char = '|';

const DELIMITER_STR: &str = "|";
const ESCAPE: char = '\\';

/// Escape a serialized envelope for inclusion in a batch.
pub fn escape(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            ESCAPE => out.push_str("\\\\"),
            DELIMITER => out.push_str("\\|"),
            _ => out.push(ch),
        }
    }
    out
}

/// Reverse [`escape`]. Fails on a dangling or unknown escape sequence.
pub fn unescape(input: &str) -> Result<String> {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars();
    while let Some(ch) = chars.next() {
        if ch == ESCAPE {
            match chars.next() {
                Some(c @ (ESCAPE | DELIMITER)) => out.push(c),
                Some(other) => {
                    return Err(ZephyrLinkError::DecodeError(format!(
                        "invalid escape sequence `\\{other}` in envelope"
                    )))
                }
                None => {
                    return Err(ZephyrLinkError::DecodeError(
                        "dangling escape at end of envelope".to_string(),
                    ))
                }
            }
        } else {
            out.push(ch);
        }
    }
    Ok(out)
}

/// Whether an unescaped delimiter survives in an escaped envelope.
///
/// Dispatch fails closed on this rather than sending a batch the
/// receiver would split in the wrong place.
pub fn contains_unescaped_delimiter(input: &str) -> bool {
    let mut escaped = false;
    for ch in input.chars() {
        if escaped {
            escaped = false;
        } else if ch == ESCAPE {
            escaped = true;
        } else if ch == DELIMITER {
            return true;
        }
    }
    false
}

/// Join escaped envelopes into one batch frame.
pub fn join_batch(envelopes: &[String]) -> String {
    envelopes.join(DELIMITER_STR)
}

/// Split a batch frame on unescaped delimiters.
pub fn split_batch(batch: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut start = 0usize;
    let mut escaped = false;
    for (i, ch) in batch.char_indices() {
        if escaped {
            escaped = false;
        } else if ch == ESCAPE {
            escaped = true;
        } else if ch == DELIMITER {
            parts.push(&batch[start..i]);
            start = i + 1;
        }
    }
    parts.push(&batch[start..]);
    parts
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_round_trip_plain() {
        let input = r#"{"c":"create","id":1,"a":{"x":1}}"#;
        assert_eq!(unescape(&escape(input)).unwrap(), input);
    }

    #[test]
    fn test_round_trip_with_delimiter_and_backslash() {
        for input in [
            "a|b",
            "a\\b",
            "a\\|b",
            "||",
            "\\\\",
            r#"{"msg":"pipe | in \\ payload"}"#,
            "",
        ] {
            let escaped = escape(input);
            assert!(!contains_unescaped_delimiter(&escaped), "input {input:?}");
            assert_eq!(unescape(&escaped).unwrap(), input, "input {input:?}");
        }
    }

    #[test]
    fn test_unescape_rejects_dangling_escape() {
        assert!(unescape("abc\\").is_err());
    }

    #[test]
    fn test_unescape_rejects_unknown_sequence() {
        assert!(unescape("a\\nb").is_err());
    }

    #[test]
    fn test_split_respects_escapes() {
        let batch = "a\\|b|c|d\\\\|e";
        assert_eq!(split_batch(batch), vec!["a\\|b", "c", "d\\\\", "e"]);
    }

    #[test]
    fn test_split_join_round_trip() {
        let envelopes = vec![
            escape(r#"{"id":1,"s":true,"r":"a|b"}"#),
            escape(r#"{"id":2,"s":false,"r":"\\"}"#),
            escape(r#"{"id":3,"s":true,"r":null}"#),
        ];
        let batch = join_batch(&envelopes);
        let parts = split_batch(&batch);
        assert_eq!(parts.len(), 3);
        for (part, original) in parts.iter().zip(&envelopes) {
            assert_eq!(part, original);
        }
    }

    #[test]
    fn test_empty_batch_is_one_empty_part() {
        assert_eq!(split_batch(""), vec![""]);
    }
}
