//! Sentence splitting.
//!
//! A boundary is a single whitespace character directly after `.` or `?`,
//! unless the preceding characters look like an inline abbreviation ("e.g.")
//! or a title ("Mr."). Offsets are in characters, not bytes.

use comex_common::Comment;

use crate::model::{Split, SplitComment};

pub const DEFAULT_MIN_LENGTH: usize = 10;

/// Split a comment into ordered sentence spans, dropping spans shorter than `min_len`.
pub fn split_comment(comment: &Comment, min_len: usize) -> SplitComment {
    SplitComment {
        id: comment.id,
        grp_id: None,
        splits: split_text(&comment.text, min_len),
    }
}

pub fn split_text(text: &str, min_len: usize) -> Vec<Split> {
    let chars: Vec<char> = text.chars().collect();
    let mut splits = Vec::new();
    let mut start = 0;

    for (i, c) in chars.iter().enumerate() {
        if c.is_whitespace() && is_boundary(&chars, i) {
            push_span(&mut splits, start, i, min_len);
            start = i + 1;
        }
    }
    push_span(&mut splits, start, chars.len(), min_len);
    splits
}

fn push_span(splits: &mut Vec<Split>, s: usize, e: usize, min_len: usize) {
    if e - s >= min_len {
        splits.push(Split::new(s, e));
    }
}

fn is_boundary(chars: &[char], i: usize) -> bool {
    if i == 0 || !matches!(chars[i - 1], '.' | '?') {
        return false;
    }
    // "e.g. ", "i.e. "
    if i >= 4 && is_word(chars[i - 4]) && chars[i - 3] == '.' && is_word(chars[i - 2]) {
        return false;
    }
    // "Mr. ", "Dr. "
    if i >= 3
        && chars[i - 3].is_ascii_uppercase()
        && chars[i - 2].is_ascii_lowercase()
        && chars[i - 1] == '.'
    {
        return false;
    }
    true
}

fn is_word(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}
