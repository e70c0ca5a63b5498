use cltrace::{BinaryDataLoader, BinaryDataStore, BinaryStoreOptions, Compression};

fn payloads() -> Vec<Vec<u8>> {
    vec![
        vec![0xAA; 100],
        (0..=255).cycle().take(3000).collect(),
        b"kernel void k(global int *p) { p[0] = 1; }".to_vec(),
        vec![0; 4000],
        vec![3; 2500],
        vec![7; 1],
    ]
}

fn round_trip(compression: Compression) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("trace.bin");
    let opts = BinaryStoreOptions {
        compression,
        block_size: 1 << 12,
        // Two resident blocks force early flushes.
        resident_size: 1 << 13,
    };

    let mut store = BinaryDataStore::create(&path, opts).unwrap();
    let offsets: Vec<u64> = payloads().iter().map(|p| store.append(p).unwrap()).collect();
    assert!(offsets.iter().all(|o| o % 16 == 0));
    let info = store.close().unwrap();
    assert!(info.block_count >= 3);

    let mut loader = BinaryDataLoader::open(&path, &info, compression).unwrap();
    assert_eq!(loader.block_count() as u64, info.block_count);
    for (offset, payload) in offsets.iter().zip(payloads()) {
        assert_eq!(loader.get(*offset, payload.len()).unwrap(), &payload[..]);
    }
    // Reading backwards goes through evicted blocks.
    for (offset, payload) in offsets.iter().zip(payloads()).rev() {
        assert_eq!(loader.get(*offset, payload.len()).unwrap(), &payload[..]);
    }
    assert!(loader.get(loader.data_size() + 64, 1).is_err());
}

#[test]
fn lz4_store_reads_back() {
    round_trip(Compression::Lz4);
}

#[test]
fn uncompressed_store_reads_back() {
    round_trip(Compression::None);
}

#[test]
fn payload_larger_than_a_block_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let opts = BinaryStoreOptions {
        compression: Compression::Lz4,
        block_size: 1 << 12,
        resident_size: 1 << 13,
    };
    let mut store = BinaryDataStore::create(dir.path().join("big.bin"), opts).unwrap();
    assert!(matches!(
        store.append(&vec![1; (1 << 12) + 1]),
        Err(cltrace::CaptureError::PayloadExceedsBlock { .. })
    ));
}
