//! On-disk format tests: round-trips, rebuilds, and damaged index files.

use half::f16;
use passage_search::search::embedder::EncodedBatch;
use passage_search::search::multivector::MultiVector;
use passage_search::search::tensor_blob::TensorBlob;
use passage_search::search::vector_index::{
    FORMAT_VERSION, IndexBuilder, IndexError, SIDE_FILE_NAME, TENSOR_FILE_NAME, VectorIndex,
    index_exists, side_file_path, tensor_blob_path,
};

mod util;

const DIM: usize = 32;

fn seeded_builder(n: usize) -> IndexBuilder {
    let mut builder = IndexBuilder::new(DIM);
    let ids: Vec<String> = (0..n).map(|i| format!("s{i}")).collect();
    let batch: EncodedBatch = (0..n)
        .map(|i| util::seeded_embedding(DIM, i as u64, 2 + i % 3))
        .collect();
    builder.save(ids.as_slice(), batch).unwrap();
    builder
}

#[test]
fn roundtrip_preserves_dense_exactly_and_multivectors_at_half_precision() {
    let fixture = util::TempFixtureDir::new();
    let builder = seeded_builder(25);
    builder.persist(&fixture.path()).unwrap();
    let index = VectorIndex::load(&fixture.path(), 4).unwrap();

    assert_eq!(index.ids(), builder.ids());
    for (i, id) in builder.ids().iter().enumerate() {
        let original = util::seeded_embedding(DIM, i as u64, 2 + i % 3);
        assert_eq!(index.dense_row(id).unwrap(), original.dense.as_slice());

        let loaded = index.multivector(id).unwrap();
        let quantized = MultiVector::from_rows(&original.multivector, DIM).unwrap();
        assert_eq!(loaded.as_f16(), quantized.as_f16());
        assert_eq!(loaded.len(), original.multivector.len());
    }
}

#[test]
fn blob_metadata_and_tensor_names() {
    let fixture = util::TempFixtureDir::new();
    seeded_builder(4).persist(&fixture.path()).unwrap();

    let blob = TensorBlob::open(&tensor_blob_path(&fixture.path())).unwrap();
    assert_eq!(blob.metadata().get("format_version").map(String::as_str), Some(FORMAT_VERSION));
    assert_eq!(blob.metadata().get("dimension").map(String::as_str), Some("32"));
    assert_eq!(blob.metadata().get("passages").map(String::as_str), Some("4"));
    // dense + bm25_index + bm25_value + one tensor per passage.
    assert_eq!(blob.len(), 3 + 4);
    for name in ["dense", "bm25_index", "bm25_value", "s0", "s3"] {
        assert!(blob.contains(name), "missing tensor {name}");
    }

    let (shape, _) = blob.read_f16("s2").unwrap();
    assert_eq!(shape, vec![2 + 2 % 3, DIM]);
    let (shape, _) = blob.read_i64("bm25_index").unwrap();
    assert_eq!(shape[0], 2);
}

#[test]
fn repersist_replaces_files_and_leaves_no_temporaries() {
    let fixture = util::TempFixtureDir::new();
    let mut builder = seeded_builder(5);
    builder.persist(&fixture.path()).unwrap();
    builder
        .save(&["late"], [util::seeded_embedding(DIM, 999, 2)].into_iter().collect())
        .unwrap();
    let stats = builder.persist(&fixture.path()).unwrap();
    assert_eq!(stats.passages, 6);

    let index = VectorIndex::load(&fixture.path(), 4).unwrap();
    assert_eq!(index.len(), 6);
    assert_eq!(index.ids().last().map(String::as_str), Some("late"));

    let mut names: Vec<String> = std::fs::read_dir(fixture.path())
        .unwrap()
        .filter_map(Result::ok)
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, [SIDE_FILE_NAME, TENSOR_FILE_NAME], "unexpected files left");
}

#[test]
fn missing_blob_is_io_error() {
    let fixture = util::TempFixtureDir::new();
    seeded_builder(3).persist(&fixture.path()).unwrap();
    std::fs::remove_file(tensor_blob_path(&fixture.path())).unwrap();
    assert!(!index_exists(&fixture.path()));
    assert!(matches!(
        VectorIndex::load(&fixture.path(), 4),
        Err(IndexError::Io(_))
    ));
}

#[test]
fn corrupt_side_file_is_json_error() {
    let fixture = util::TempFixtureDir::new();
    seeded_builder(3).persist(&fixture.path()).unwrap();
    std::fs::write(side_file_path(&fixture.path()), b"{\"ids\": [\"s0\"").unwrap();
    assert!(matches!(
        VectorIndex::load(&fixture.path(), 4),
        Err(IndexError::Json(_))
    ));
}

#[test]
fn truncated_blob_is_rejected() {
    let fixture = util::TempFixtureDir::new();
    seeded_builder(8).persist(&fixture.path()).unwrap();
    let path = tensor_blob_path(&fixture.path());
    let bytes = std::fs::read(&path).unwrap();
    std::fs::write(&path, &bytes[..bytes.len() / 2]).unwrap();

    let err = VectorIndex::load(&fixture.path(), 4).unwrap_err();
    assert!(
        matches!(err, IndexError::SafeTensors(_) | IndexError::Inconsistent(_)),
        "got {err:?}"
    );
}

#[test]
fn side_file_listing_fewer_ids_is_inconsistent() {
    let fixture = util::TempFixtureDir::new();
    seeded_builder(4).persist(&fixture.path()).unwrap();
    let side = side_file_path(&fixture.path());
    let mut json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&side).unwrap()).unwrap();
    json["ids"].as_array_mut().unwrap().pop();
    std::fs::write(&side, serde_json::to_vec(&json).unwrap()).unwrap();

    assert!(matches!(
        VectorIndex::load(&fixture.path(), 4),
        Err(IndexError::Inconsistent(_))
    ));
}

#[test]
fn lexical_columns_beyond_vocabulary_are_inconsistent() {
    let fixture = util::TempFixtureDir::new();
    seeded_builder(4).persist(&fixture.path()).unwrap();
    let side = side_file_path(&fixture.path());
    let mut json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&side).unwrap()).unwrap();
    json["tokens"] = serde_json::json!({});
    std::fs::write(&side, serde_json::to_vec(&json).unwrap()).unwrap();

    let err = VectorIndex::load(&fixture.path(), 4).unwrap_err();
    assert!(matches!(err, IndexError::Inconsistent(_)), "got {err:?}");
}

#[test]
fn id_without_multivector_tensor_is_reported() {
    let fixture = util::TempFixtureDir::new();
    seeded_builder(2).persist(&fixture.path()).unwrap();
    let side = side_file_path(&fixture.path());
    let mut json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&side).unwrap()).unwrap();
    json["ids"][1] = serde_json::json!("renamed");
    std::fs::write(&side, serde_json::to_vec(&json).unwrap()).unwrap();

    match VectorIndex::load(&fixture.path(), 4) {
        Err(IndexError::MissingTensor(name)) => assert_eq!(name, "renamed"),
        other => panic!("expected MissingTensor, got {other:?}"),
    }
}

#[test]
fn f16_storage_halves_multivector_bytes() {
    let fixture = util::TempFixtureDir::new();
    seeded_builder(3).persist(&fixture.path()).unwrap();
    let blob = TensorBlob::open(&tensor_blob_path(&fixture.path())).unwrap();
    let slot = blob.slot("s0").unwrap();
    assert_eq!(slot.byte_len(), 2 * DIM * std::mem::size_of::<f16>());
}

#[test]
fn header_metadata_key_is_not_a_passage_id() {
    let fixture = util::TempFixtureDir::new();
    let mut builder = IndexBuilder::new(DIM);
    let err = builder
        .save(
            &["__metadata__", "ok"],
            (0..2).map(|i| util::seeded_embedding(DIM, i, 2)).collect(),
        )
        .unwrap_err();
    assert!(matches!(err, IndexError::ReservedId(ref id) if id == "__metadata__"));
    assert!(builder.is_empty());

    // A side file edited to carry the key is refused on load.
    seeded_builder(2).persist(&fixture.path()).unwrap();
    let side = side_file_path(&fixture.path());
    let mut json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&side).unwrap()).unwrap();
    json["ids"][0] = serde_json::json!("__metadata__");
    std::fs::write(&side, serde_json::to_vec(&json).unwrap()).unwrap();
    assert!(matches!(
        VectorIndex::load(&fixture.path(), 4),
        Err(IndexError::ReservedId(_))
    ));
}
