//! Text canonicalization and tokenization for embedding input.
//!
//! The output is deterministic: the same visual input always produces the
//! same canonical string and the same token sequence, so feed-time and
//! query-time lexical weights line up on the same vocabulary entries.

use unicode_normalization::UnicodeNormalization;

/// Canonicalize text for embedding: NFC normalization, then collapse every
/// whitespace run to a single space and trim the ends.
pub fn canonicalize_for_embedding(text: &str) -> String {
    let nfc: String = text.nfc().collect();
    let mut out = String::with_capacity(nfc.len());
    for word in nfc.split_whitespace() {
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(word);
    }
    out
}

/// Split canonical text into lowercase word tokens.
///
/// A token is a maximal run of alphanumeric characters; everything else is a
/// separator. Works for any script with Unicode alphanumerics.
pub fn tokenize(text: &str) -> Vec<String> {
    canonicalize_for_embedding(text)
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}
