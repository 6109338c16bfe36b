use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A chunk of a larger document, as produced by an upstream extractor.
///
/// Passages are immutable once fed. Re-feeding the same `id` inside one build
/// session replaces the earlier version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Passage {
    /// Unique passage identifier. Also the tensor key of its multi-vector.
    pub id: String,
    /// Logical document this chunk belongs to.
    pub content_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Passage {
    pub fn new(
        id: impl Into<String>,
        content_id: impl Into<String>,
        text: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            content_id: content_id.into(),
            text: text.into(),
            language: None,
            last_updated: None,
        }
    }

    pub fn with_language(mut self, language: impl Into<String>) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn with_last_updated(mut self, at: DateTime<Utc>) -> Self {
        self.last_updated = Some(at);
        self
    }
}
