//! Fuzz target for loading a persisted index.
//!
//! Writes arbitrary bytes as the side file and tensor blob, then loads.
//! Loading must fail with an `IndexError` on garbage, never panic.

#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use std::fs;
use tempfile::TempDir;

use passage_search::search::embedder::PassageEmbedding;
use passage_search::search::vector_index::{
    RetrieveParams, VectorIndex, side_file_path, tensor_blob_path,
};

#[derive(Arbitrary, Debug)]
struct IndexInput {
    /// Raw side file content
    side_file: String,
    /// Raw tensor blob bytes
    blob: Vec<u8>,
    /// Query dense vector; only used if the load succeeds
    query: Vec<f32>,
    /// Query lexical tokens
    tokens: Vec<(String, f32)>,
}

fuzz_target!(|input: IndexInput| {
    let temp_dir = match TempDir::new() {
        Ok(dir) => dir,
        Err(_) => return,
    };
    if fs::write(side_file_path(temp_dir.path()), &input.side_file).is_err()
        || fs::write(tensor_blob_path(temp_dir.path()), &input.blob).is_err()
    {
        return;
    }

    let Ok(index) = VectorIndex::load(temp_dir.path(), 4) else {
        return;
    };

    // A loaded index must answer any well-formed or malformed query without panicking.
    let query = PassageEmbedding {
        multivector: vec![input.query.clone()],
        dense: input.query,
        lexical: input.tokens,
    };
    let _ = index.retrieve(&query, &RetrieveParams::default());
});
