//! Sentence segmentation for spoken replies
//!
//! A reply is spoken one sentence at a time so that synthesis of the first
//! sentence can start before the rest of the reply has been fetched.

/// One speakable chunk of reply text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    pub index: usize,
    pub text: String,
}

/// Characters that end a segment
const fn is_delimiter(c: char) -> bool {
    matches!(c, '.' | '!' | '?' | '\n')
}

/// Split `text` into ordered, trimmed, non-empty segments
///
/// Each segment ends with its run of delimiters (`.`, `!`, `?`, newline).
/// Text without any delimiter becomes a single segment. Only whitespace is
/// ever dropped.
#[must_use]
pub fn segment(text: &str) -> Vec<Segment> {
    let mut pieces = Vec::new();
    let mut start = 0;
    let mut in_delimiters = false;

    for (offset, c) in text.char_indices() {
        if is_delimiter(c) {
            in_delimiters = true;
        } else if in_delimiters {
            pieces.push(&text[start..offset]);
            start = offset;
            in_delimiters = false;
        }
    }
    pieces.push(&text[start..]);

    pieces
        .into_iter()
        .map(str::trim)
        .filter(|piece| !piece.is_empty())
        .enumerate()
        .map(|(index, piece)| Segment {
            index,
            text: piece.to_string(),
        })
        .collect()
}
