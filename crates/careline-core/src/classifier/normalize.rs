//! Text normalization shared by every detection strategy.

/// A message reduced to lowercase words separated by single spaces.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedMessage {
    text: String,
    /// Byte offset and length of each word within `text`.
    words: Vec<(usize, usize)>,
}

impl NormalizedMessage {
    /// Normalizes raw user input.
    pub fn new(raw: &str) -> Self {
        let text = normalize(raw);
        let mut words = Vec::new();
        let mut offset = 0;
        for word in text.split(' ').filter(|w| !w.is_empty()) {
            words.push((offset, word.len()));
            offset += word.len() + 1;
        }
        Self { text, words }
    }

    /// The normalized text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Returns true if nothing survived normalization.
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Number of words.
    pub fn word_count(&self) -> usize {
        self.words.len()
    }

    /// Returns the span of `len` words starting at word index `start`, as a
    /// byte range of the normalized text.
    pub fn word_window(&self, start: usize, len: usize) -> Option<(usize, usize)> {
        if len == 0 || start + len > self.words.len() {
            return None;
        }
        let (first, _) = self.words[start];
        let (last, last_len) = self.words[start + len - 1];
        Some((first, last + last_len))
    }

    /// Finds the first occurrence of `phrase` in the normalized text.
    /// Returns the byte range.
    pub fn find_phrase(&self, phrase: &str) -> Option<(usize, usize)> {
        if phrase.is_empty() {
            return None;
        }
        self.text
            .find(phrase)
            .map(|start| (start, start + phrase.len()))
    }
}

/// Lowercases, drops apostrophes, turns other non-word characters into
/// spaces, trims and collapses whitespace.
///
/// `"Can't BREATHE!!"` becomes `"cant breathe"`.
pub fn normalize(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let mut cleaned = String::with_capacity(lowered.len());
    for ch in lowered.chars() {
        match ch {
            '\'' | '\u{2019}' | '`' => {}
            c if c.is_alphanumeric() || c == '_' => cleaned.push(c),
            _ => cleaned.push(' '),
        }
    }
    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Counts non-overlapping, word-aligned occurrences of `phrase` in `text`.
pub(crate) fn count_on_word_boundaries(text: &str, phrase: &str) -> usize {
    if phrase.is_empty() {
        return 0;
    }
    let bytes = text.as_bytes();
    text.match_indices(phrase)
        .filter(|(start, hit)| {
            let end = start + hit.len();
            let left_ok = *start == 0 || bytes[start - 1] == b' ';
            let right_ok = end == text.len() || bytes[end] == b' ';
            left_ok && right_ok
        })
        .count()
}
