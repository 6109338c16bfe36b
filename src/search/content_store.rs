//! Raw passage text, kept beside the vector index for result hydration.
//!
//! Backed by an append-only JSON Lines file. Each line is one
//! [`ContentRecord`]; when an id appears more than once the later line wins
//! but the id keeps the position of its first appearance.
//! Malformed lines are skipped with a warning rather than failing the open,
//! so a torn final line from an interrupted append does not lose the store.

use std::collections::HashMap;
use std::fs::{self, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::fusion::HybridScore;
use crate::model::types::Passage;

/// File name used inside an index directory.
pub const CONTENT_FILE_NAME: &str = "passages.jsonl";

/// One line of the content file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentRecord {
    pub id: String,
    pub content_id: String,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Free-form lifecycle marker carried through from the producer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

impl From<&Passage> for ContentRecord {
    fn from(p: &Passage) -> Self {
        Self {
            id: p.id.clone(),
            content_id: p.content_id.clone(),
            text: p.text.clone(),
            last_updated: p.last_updated,
            language: p.language.clone(),
            status: None,
        }
    }
}

/// In-memory view of a content file plus an append handle.
#[derive(Debug)]
pub struct ContentStore {
    path: PathBuf,
    records: HashMap<String, ContentRecord>,
    /// Ids in first-seen order.
    order: Vec<String>,
}

impl ContentStore {
    /// Open the store at `path`. A missing file is an empty store; it is
    /// created on the first append.
    pub fn open(path: &Path) -> Result<Self> {
        let mut store = Self {
            path: path.to_path_buf(),
            records: HashMap::new(),
            order: Vec::new(),
        };
        if path.exists() {
            let file = fs::File::open(path)
                .with_context(|| format!("open content file {}", path.display()))?;
            let mut skipped = 0usize;
            for (lineno, line) in BufReader::new(file).lines().enumerate() {
                let line = line
                    .with_context(|| format!("read {}:{}", path.display(), lineno + 1))?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<ContentRecord>(&line) {
                    Ok(record) => store.insert(record),
                    Err(err) => {
                        skipped += 1;
                        debug!(line = lineno + 1, error = %err, "unparseable content record");
                    }
                }
            }
            if skipped > 0 {
                warn!(
                    path = %path.display(),
                    skipped,
                    "skipped malformed content records"
                );
            }
        }
        Ok(store)
    }

    fn insert(&mut self, record: ContentRecord) {
        if let Some(slot) = self.records.get_mut(&record.id) {
            *slot = record;
        } else {
            self.order.push(record.id.clone());
            self.records.insert(record.id.clone(), record);
        }
    }

    /// Open `passages.jsonl` inside an index directory.
    pub fn open_in(dir: &Path) -> Result<Self> {
        Self::open(&dir.join(CONTENT_FILE_NAME))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&ContentRecord> {
        self.records.get(id)
    }

    /// Ids in the order they were first stored.
    pub fn ids(&self) -> &[String] {
        &self.order
    }

    /// Current records in first-seen id order.
    pub fn iter(&self) -> impl Iterator<Item = &ContentRecord> {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    /// Append records and make them visible to [`get`](Self::get).
    pub fn append<I>(&mut self, records: I) -> Result<usize>
    where
        I: IntoIterator<Item = ContentRecord>,
    {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)
                .with_context(|| format!("create content dir {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open content file {} for append", self.path.display()))?;
        let mut writer = BufWriter::new(file);

        let mut written = 0;
        for record in records {
            serde_json::to_writer(&mut writer, &record)
                .with_context(|| format!("serialize content record {:?}", record.id))?;
            writer.write_all(b"\n")?;
            self.insert(record);
            written += 1;
        }
        writer
            .flush()
            .with_context(|| format!("flush content file {}", self.path.display()))?;
        Ok(written)
    }

    /// Fill `text` and `content_id` on each result whose id is known.
    /// Returns how many results were hydrated.
    pub fn load_text(&self, results: &mut [HybridScore]) -> usize {
        let mut hydrated = 0;
        for hit in results.iter_mut() {
            if let Some(record) = self.records.get(&hit.id) {
                hit.text = Some(record.text.clone());
                hit.content_id = Some(record.content_id.clone());
                hydrated += 1;
            }
        }
        if hydrated < results.len() {
            debug!(
                missing = results.len() - hydrated,
                "results without stored content"
            );
        }
        hydrated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::fusion::FusionWeights;

    fn record(id: &str, text: &str) -> ContentRecord {
        ContentRecord::from(&Passage::new(id, format!("doc-{id}"), text))
    }

    #[test]
    fn test_missing_file_is_empty_store() {
        let tmp = tempfile::tempdir().unwrap();
        let store = ContentStore::open_in(tmp.path()).unwrap();
        assert!(store.is_empty());
        assert!(!store.path().exists());
    }

    #[test]
    fn test_append_then_reopen_later_record_wins() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = ContentStore::open_in(tmp.path()).unwrap();
        store
            .append(vec![record("a", "first"), record("b", "bee")])
            .unwrap();
        store.append(vec![record("a", "second")]).unwrap();
        assert_eq!(store.get("a").unwrap().text, "second");

        let reopened = ContentStore::open_in(tmp.path()).unwrap();
        assert_eq!(reopened.len(), 2);
        assert_eq!(reopened.get("a").unwrap().text, "second");
        assert_eq!(reopened.get("b").unwrap().content_id, "doc-b");
    }

    #[test]
    fn test_ids_keep_first_seen_order_across_rewrites() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = ContentStore::open_in(tmp.path()).unwrap();
        store
            .append(vec![record("z", "one"), record("a", "two"), record("m", "three")])
            .unwrap();
        store.append(vec![record("a", "two again"), record("b", "four")]).unwrap();
        assert_eq!(store.ids(), ["z", "a", "m", "b"]);

        let reopened = ContentStore::open_in(tmp.path()).unwrap();
        assert_eq!(reopened.ids(), store.ids());
        let texts: Vec<&str> = reopened.iter().map(|r| r.text.as_str()).collect();
        assert_eq!(texts, ["one", "two again", "three", "four"]);
    }

    #[test]
    fn test_malformed_lines_are_skipped() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join(CONTENT_FILE_NAME);
        std::fs::write(
            &path,
            "{\"id\":\"a\",\"content_id\":\"c\",\"text\":\"ok\"}\n\nnot json\n{\"id\":\"b\"",
        )
        .unwrap();
        let store = ContentStore::open(&path).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("a").unwrap().text, "ok");
    }

    #[test]
    fn test_optional_fields_roundtrip() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = ContentStore::open_in(tmp.path()).unwrap();
        let mut rec = record("x", "text");
        rec.language = Some("en".into());
        rec.status = Some("published".into());
        store.append(vec![rec.clone()]).unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert!(!raw.contains("last_updated"));
        let reopened = ContentStore::open(store.path()).unwrap();
        assert_eq!(reopened.get("x"), Some(&rec));
    }

    #[test]
    fn test_load_text_hydrates_known_ids() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = ContentStore::open_in(tmp.path()).unwrap();
        store.append(vec![record("p1", "the cat sat")]).unwrap();

        let w = FusionWeights::default();
        let mut hits = vec![
            HybridScore::new("p1", 0.5, 0.1, 0.9, &w),
            HybridScore::new("ghost", 0.4, 0.0, 0.2, &w),
        ];
        assert_eq!(store.load_text(&mut hits), 1);
        assert_eq!(hits[0].text.as_deref(), Some("the cat sat"));
        assert_eq!(hits[0].content_id.as_deref(), Some("doc-p1"));
        assert!(hits[1].text.is_none());
    }
}
