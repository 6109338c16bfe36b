use passage_search::Passage;
use passage_search::search::embedder::{Embedder, EmbedderResult, EncodedBatch, PassageEmbedding};
use passage_search::search::vector_index::{IndexBuilder, VectorIndex};
use std::collections::HashMap;
use std::path::PathBuf;
use tempfile::TempDir;

/// Captures tracing output for tests.
#[allow(dead_code)]
pub struct TestTracing {
    buffer: std::sync::Arc<std::sync::Mutex<Vec<u8>>>,
}

#[allow(dead_code)]
impl TestTracing {
    pub fn new() -> Self {
        Self {
            buffer: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.buffer.clone();
        let make_writer = move || TestWriter(writer.clone());
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .without_time()
            .with_max_level(tracing::Level::DEBUG)
            .with_writer(make_writer)
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn output(&self) -> String {
        let buf = self.buffer.lock().unwrap();
        String::from_utf8_lossy(&buf).to_string()
    }

    /// Assert that the captured log output contains the provided substring.
    pub fn assert_contains(&self, needle: &str) {
        let out = self.output();
        assert!(
            out.contains(needle),
            "expected logs to contain `{needle}`, got:\n{out}"
        );
    }
}

#[allow(dead_code)]
pub struct EnvGuard {
    key: String,
    prev: Option<String>,
}

#[allow(dead_code)]
impl EnvGuard {
    pub fn set(key: &str, val: impl AsRef<str>) -> Self {
        let prev = std::env::var(key).ok();
        unsafe { std::env::set_var(key, val.as_ref()) };
        Self {
            key: key.to_string(),
            prev,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        match &self.prev {
            Some(v) => unsafe { std::env::set_var(&self.key, v) },
            None => unsafe { std::env::remove_var(&self.key) },
        }
    }
}

struct TestWriter(std::sync::Arc<std::sync::Mutex<Vec<u8>>>);

impl std::io::Write for TestWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut guard = self.0.lock().unwrap();
        guard.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

#[allow(dead_code)]
pub struct TempFixtureDir {
    pub dir: TempDir,
}

#[allow(dead_code)]
impl TempFixtureDir {
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("tempdir"),
        }
    }

    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }
}

/// The three-passage corpus used across scenario tests.
#[allow(dead_code)]
pub fn cat_dog_corpus() -> Vec<Passage> {
    vec![
        Passage::new("p1", "doc-1", "the cat sat"),
        Passage::new("p2", "doc-2", "a dog ran"),
        Passage::new("p3", "doc-3", "the cat ran"),
    ]
}

/// Embedder that returns whatever embedding was registered for a text.
///
/// Lets tests pin exact dense, lexical and multi-vector values so expected
/// scores can be computed by hand.
#[allow(dead_code)]
pub struct ScriptedEmbedder {
    dim: usize,
    table: HashMap<String, PassageEmbedding>,
}

#[allow(dead_code)]
impl ScriptedEmbedder {
    pub fn new(dim: usize) -> Self {
        Self {
            dim,
            table: HashMap::new(),
        }
    }

    pub fn with(mut self, text: &str, embedding: PassageEmbedding) -> Self {
        self.table.insert(text.to_string(), embedding);
        self
    }
}

impl Embedder for ScriptedEmbedder {
    fn encode(&self, texts: &[&str]) -> EmbedderResult<EncodedBatch> {
        Ok(texts
            .iter()
            .map(|t| {
                self.table.get(*t).cloned().unwrap_or_else(|| PassageEmbedding {
                    dense: vec![0.0; self.dim],
                    ..Default::default()
                })
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    fn id(&self) -> &str {
        "scripted"
    }

    fn is_semantic(&self) -> bool {
        false
    }
}

/// Unit vector along `axis`.
#[allow(dead_code)]
pub fn one_hot(dim: usize, axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; dim];
    v[axis % dim] = 1.0;
    v
}

/// Deterministic pseudo-random unit vectors (splitmix64), so fixtures do not
/// depend on a rand crate.
#[allow(dead_code)]
pub fn seeded_unit_vector(dim: usize, seed: u64) -> Vec<f32> {
    let mut state = seed.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut v: Vec<f32> = (0..dim)
        .map(|_| {
            state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
            let mut z = state;
            z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
            z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
            z ^= z >> 31;
            (z as f64 / u64::MAX as f64 * 2.0 - 1.0) as f32
        })
        .collect();
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter_mut().for_each(|x| *x /= norm);
    }
    v
}

/// Synthetic passage embedding: dense from `seed`, a few seeded token rows,
/// and lexical weights over a small shared vocabulary.
#[allow(dead_code)]
pub fn seeded_embedding(dim: usize, seed: u64, tokens: usize) -> PassageEmbedding {
    let multivector = (0..tokens.max(1))
        .map(|t| seeded_unit_vector(dim, seed * 31 + t as u64))
        .collect();
    let lexical = (0..tokens)
        .map(|t| {
            let term = (seed as usize * 7 + t * 3) % 50;
            (format!("term{term}"), 1.0 + t as f32 * 0.25)
        })
        .collect();
    PassageEmbedding {
        dense: seeded_unit_vector(dim, seed),
        lexical,
        multivector,
    }
}

/// Build, persist and reload an index of `n` seeded passages named `s{i}`.
#[allow(dead_code)]
pub fn seeded_index(dir: &std::path::Path, dim: usize, n: usize) -> VectorIndex {
    let mut builder = IndexBuilder::new(dim);
    let ids: Vec<String> = (0..n).map(|i| format!("s{i}")).collect();
    let batch: EncodedBatch = (0..n)
        .map(|i| seeded_embedding(dim, i as u64, 3 + i % 4))
        .collect();
    builder.save(ids.as_slice(), batch).expect("save seeded corpus");
    builder.persist(dir).expect("persist seeded corpus");
    VectorIndex::load(dir, 64).expect("load seeded corpus")
}
