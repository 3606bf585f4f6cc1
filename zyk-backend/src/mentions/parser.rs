//! `@name` mention extraction.
//!
//! A mention is `@` followed by a maximal run of CJK ideographs, ASCII
//! letters, ASCII digits or underscores. There is no escaping; an `@` not
//! followed by such a character is plain text.

use once_cell::sync::Lazy;
use regex::Regex;

/// Compiled mention grammar, capture 1 is the token without the `@`
pub(crate) static MENTION_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@([\x{4e00}-\x{9fff}A-Za-z0-9_]+)").unwrap());

static WHITESPACE_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// A raw mention occurrence, discarded once resolution is done
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MentionToken {
    /// Token text without the leading `@`
    pub raw_text: String,
    /// Byte offset of the `@` in the source message
    pub position: usize,
}

/// Extract mention tokens in order of appearance. Duplicates are kept.
pub fn parse_mentions(text: &str) -> Vec<MentionToken> {
    MENTION_PATTERN
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let token = caps.get(1)?;
            Some(MentionToken {
                raw_text: token.as_str().to_string(),
                position: whole.start(),
            })
        })
        .collect()
}

/// Remove every mention span, collapse whitespace runs and trim.
pub fn strip_mentions(text: &str) -> String {
    collapse_whitespace(&MENTION_PATTERN.replace_all(text, ""))
}

pub fn collapse_whitespace(text: &str) -> String {
    WHITESPACE_RUN.replace_all(text, " ").trim().to_string()
}
