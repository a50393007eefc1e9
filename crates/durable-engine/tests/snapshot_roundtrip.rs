//! Snapshot stream tests over whole coroutines

mod common;

use common::*;
use durable_engine::config::RuntimeOptions;
use durable_engine::vm::snapshot::{SnapshotReader, SnapshotWriter, SNAPSHOT_MAGIC, SNAPSHOT_VERSION};
use durable_engine::vm::StructValue;
use durable_engine::{Coroutine, CoroutineState, Heap, SnapshotError, Value, VmError};

fn suspended_counter() -> (std::sync::Arc<durable_engine::TypeRegistry>, Coroutine) {
    let registry = registry(&counter());
    let mut co = Coroutine::start(registry.clone(), "main.counter", vec![Value::Int(5)]).unwrap();
    assert!(co.next().unwrap());
    assert!(co.next().unwrap());
    (registry, co)
}

#[test]
fn test_stream_starts_with_header() {
    let (_, co) = suspended_counter();
    let bytes = co.marshal().unwrap();
    assert_eq!(&bytes[0..4], &SNAPSHOT_MAGIC.to_le_bytes());
    assert_eq!(&bytes[4..8], &SNAPSHOT_VERSION.to_le_bytes());
}

#[test]
fn test_marshal_is_deterministic() {
    let (registry, co) = suspended_counter();
    let first = co.marshal().unwrap();
    assert_eq!(first, co.marshal().unwrap());

    // Re-marshaling a restored coroutine gives back the same stream.
    let restored = Coroutine::unmarshal(registry, &first).unwrap();
    assert_eq!(restored.marshal().unwrap(), first);
}

#[test]
fn test_restored_heap_is_equivalent() {
    let (registry, co) = suspended_counter();
    let restored = Coroutine::unmarshal(registry, &co.marshal().unwrap()).unwrap();

    let before: Vec<&Value> = co.stack().frames().iter().flat_map(|f| f.locals().values()).collect();
    let after: Vec<&Value> = restored
        .stack()
        .frames()
        .iter()
        .flat_map(|f| f.locals().values())
        .collect();
    assert!(co.heap().equivalent_all(before, restored.heap(), after));
    assert_eq!(restored.state(), CoroutineState::Suspended);
    assert_eq!(restored.recv(), Some(&Value::Int(2)));
}

#[test]
fn test_cyclic_value_roundtrip() {
    let registry = registry(&squares());
    let mut heap = Heap::new();
    let node = heap.alloc(Value::Nil);
    let shared = heap.alloc(Value::str("shared"));
    heap.set(
        node,
        Value::Struct(StructValue {
            name: "main.Node".to_string(),
            fields: vec![
                ("next".to_string(), Value::Ref(node)),
                ("a".to_string(), Value::Ref(shared)),
                ("b".to_string(), Value::Ref(shared)),
            ],
        }),
    );
    let root = Value::List(vec![Value::Ref(node), Value::Ref(shared)]);

    let bytes = SnapshotWriter::new(&registry).write_value(&root, &heap).unwrap();
    let (decoded, decoded_heap) = SnapshotReader::new(&registry).read_value(&bytes).unwrap();
    assert!(heap.equivalent(&root, &decoded_heap, &decoded));
    assert_eq!(decoded_heap.len(), 2);
}

#[test]
fn test_version_is_checked_before_checksum() {
    let (registry, co) = suspended_counter();
    let mut bytes = co.marshal().unwrap();
    bytes[4..8].copy_from_slice(&99u32.to_le_bytes());
    match Coroutine::unmarshal(registry, &bytes) {
        Err(VmError::Snapshot(SnapshotError::VersionMismatch { expected, found })) => {
            assert_eq!(expected, SNAPSHOT_VERSION);
            assert_eq!(found, 99);
        }
        other => panic!("expected a version mismatch, got {:?}", other.map(|c| c.state())),
    }
}

#[test]
fn test_flipped_body_byte_fails_checksum() {
    let (registry, co) = suspended_counter();
    let mut bytes = co.marshal().unwrap();
    let mid = 16 + (bytes.len() - 16 - 32) / 2;
    bytes[mid] ^= 0x01;
    assert!(matches!(
        Coroutine::unmarshal(registry, &bytes),
        Err(VmError::Snapshot(SnapshotError::ChecksumMismatch { .. }))
    ));
}

#[test]
fn test_flipped_trailer_passes_without_verification() {
    let (registry, co) = suspended_counter();
    let mut bytes = co.marshal().unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;

    assert!(Coroutine::unmarshal(registry.clone(), &bytes).is_err());

    let options = RuntimeOptions {
        verify_checksum: false,
        ..RuntimeOptions::default()
    };
    let mut co = Coroutine::unmarshal_with_options(registry, &bytes, options).unwrap();
    let (rest, result) = run_plain(&mut co);
    assert_eq!(rest, ints(&[3, 4, 5]));
    assert_eq!(result, Some(Value::Int(5)));
}

#[test]
fn test_truncated_stream_is_rejected() {
    let (registry, co) = suspended_counter();
    let bytes = co.marshal().unwrap();
    for len in [0, 10, 16, bytes.len() - 1] {
        assert!(
            Coroutine::unmarshal(registry.clone(), &bytes[..len]).is_err(),
            "prefix of {len} bytes decoded"
        );
    }
}

#[test]
fn test_value_stream_is_not_a_coroutine() {
    let registry = registry(&squares());
    let bytes = SnapshotWriter::new(&registry)
        .write_value(&Value::Int(1), &Heap::new())
        .unwrap();
    assert!(matches!(
        Coroutine::unmarshal(registry, &bytes),
        Err(VmError::Snapshot(SnapshotError::Corrupted { .. }))
    ));
}
