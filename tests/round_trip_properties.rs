//! Universal properties 8 and 9: `BufferBuilder` append/save/load round
//! trips to an equal sequence, and `BidirectionalIndex` key -> id -> key
//! round trips with a configured error id for absent keys.

use corpus_substrate::index::{BidirectionalIndex, BufferBuilder};

#[test]
fn buffer_builder_save_load_round_trip() {
    let mut builder: BufferBuilder<u64> = BufferBuilder::new();
    for i in 0..10_000u64 {
        builder.append(i * i);
    }
    let values = builder.finalize();

    let dir = std::env::temp_dir()
        .join(format!("corpus-substrate-buffer-rt-{}-{:?}", std::process::id(), std::thread::current().id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("buf.bin");

    let mut rebuilt: BufferBuilder<u64> = BufferBuilder::new();
    for &v in &values {
        rebuilt.append(v);
    }
    rebuilt.save(&path).unwrap();

    let loaded: BufferBuilder<u64> = BufferBuilder::load(&path).unwrap();
    assert_eq!(loaded.as_slice(), values.as_slice());
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn bidirectional_index_round_trips_and_reports_error_id_for_absent_keys() {
    let mut index: BidirectionalIndex<String, u32> = BidirectionalIndex::new().with_error_id(u32::MAX);
    let words = ["alpha", "beta", "gamma", "delta", "alpha", "epsilon"];
    let ids: Vec<u32> = words.iter().map(|w| index.add_key(w.to_string())).collect();

    for (word, id) in words.iter().zip(ids.iter()) {
        assert_eq!(index.get_key(*id), Some(&word.to_string()));
    }
    assert_eq!(ids[0], ids[4], "repeated key must return the same id");
    assert_eq!(index.get_index("missing-entirely"), u32::MAX);
}
