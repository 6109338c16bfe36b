//! Token vocabulary: lexical token -> sparse matrix column.
//!
//! Columns are assigned in first-seen order by [`VocabularyBuilder::intern`]
//! at save time. Persist and query both read that one assignment, so row
//! order and column order can never drift apart.

use std::collections::HashMap;

/// Append-only token interner used while building an index.
#[derive(Debug, Clone, Default)]
pub struct VocabularyBuilder {
    tokens: HashMap<String, u32>,
}

impl VocabularyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Column index for `token`, assigning the next free one on first sight.
    pub fn intern(&mut self, token: &str) -> u32 {
        if let Some(&idx) = self.tokens.get(token) {
            return idx;
        }
        let idx = self.tokens.len() as u32;
        self.tokens.insert(token.to_string(), idx);
        idx
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, token: &str) -> Option<u32> {
        self.tokens.get(token).copied()
    }

    /// Token map as written to the side file.
    pub fn as_map(&self) -> &HashMap<String, u32> {
        &self.tokens
    }
}

/// Frozen vocabulary of a loaded index.
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    tokens: HashMap<String, u32>,
}

impl Vocabulary {
    pub fn from_map(tokens: HashMap<String, u32>) -> Self {
        Self { tokens }
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn get(&self, token: &str) -> Option<u32> {
        self.tokens.get(token).copied()
    }

    /// Largest column index in use, if any.
    pub fn max_index(&self) -> Option<u32> {
        self.tokens.values().copied().max()
    }

    /// Scatter query weights into a dense vector of vocabulary width.
    ///
    /// Tokens missing from the vocabulary cannot match anything indexed and
    /// are dropped; the second value counts them.
    pub fn query_weights(&self, lexical: &[(String, f32)]) -> (Vec<f32>, usize) {
        let width = self.max_index().map_or(0, |m| m as usize + 1);
        let mut weights = vec![0.0f32; width];
        let mut dropped = 0;
        for (token, w) in lexical {
            match self.get(token) {
                Some(col) => weights[col as usize] += *w,
                None => dropped += 1,
            }
        }
        (weights, dropped)
    }
}

impl From<VocabularyBuilder> for Vocabulary {
    fn from(builder: VocabularyBuilder) -> Self {
        Self {
            tokens: builder.tokens,
        }
    }
}
