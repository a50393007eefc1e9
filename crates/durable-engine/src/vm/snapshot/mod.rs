//! Portable encoding of values and suspended coroutines
//!
//! A stream is self-contained apart from the registry: function values and
//! frames carry registry keys, dynamic values carry registered type ids, and the
//! reader resolves both against its own registry. Aliasing and cycles survive
//! the round trip through the object table.

pub mod format;
mod reader;
mod task;
mod writer;

pub use format::{
    SnapshotChecksum, SnapshotError, SnapshotHeader, DEFAULT_MAX_DEPTH, SNAPSHOT_MAGIC, SNAPSHOT_VERSION,
};
pub use reader::SnapshotReader;
pub use task::CoroutineImage;
pub use writer::SnapshotWriter;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::compiler::ir::{FunctionKind, IrFunction};
    use crate::vm::coroutine::CoroutineState;
    use crate::vm::heap::Heap;
    use crate::vm::stack::Frame;
    use crate::vm::types::{
        CaptureDescriptor, DynTypeInfo, FunctionDescriptor, FunctionKey, TypeRegistry,
        TypeRegistryBuilder,
    };
    use crate::vm::value::{DynValue, FuncValue, StructValue, Value};

    fn registry() -> Arc<TypeRegistry> {
        let mut builder = TypeRegistryBuilder::empty();
        builder
            .register_function(FunctionDescriptor::new(
                IrFunction::new(FunctionKey::new("main.counter.func1"), FunctionKind::Plain, 0, 1),
                vec![CaptureDescriptor {
                    name: "n".into(),
                    boxed: true,
                }],
            ))
            .unwrap();
        builder
            .register_function(FunctionDescriptor::new(
                IrFunction::new(FunctionKey::new("main.gen"), FunctionKind::Durable, 0, 0),
                Vec::new(),
            ))
            .unwrap();
        builder
            .register_dyn_type(DynTypeInfo {
                type_id: "main.Celsius".into(),
                underlying: "float".into(),
            })
            .unwrap();
        builder.build()
    }

    fn roundtrip(registry: &TypeRegistry, value: &Value, heap: &Heap) -> (Value, Heap) {
        let bytes = SnapshotWriter::new(registry).write_value(value, heap).unwrap();
        SnapshotReader::new(registry).read_value(&bytes).unwrap()
    }

    #[test]
    fn test_scalar_and_composite_roundtrip() {
        let registry = registry();
        let value = Value::List(vec![
            Value::Nil,
            Value::Bool(true),
            Value::Int(-42),
            Value::Float(2.5),
            Value::str("héllo"),
            Value::Map(vec![(Value::str("k"), Value::Int(1))]),
            Value::Struct(StructValue {
                name: "main.Point".into(),
                fields: vec![("x".into(), Value::Int(1)), ("y".into(), Value::Int(2))],
            }),
            Value::Dyn(DynValue {
                type_id: "main.Celsius".into(),
                payload: Box::new(Value::Float(21.5)),
            }),
        ]);
        let (decoded, heap) = roundtrip(&registry, &value, &Heap::new());
        assert_eq!(decoded, value);
        assert!(heap.is_empty());
    }

    #[test]
    fn test_shared_references_stay_shared() {
        let registry = registry();
        let mut heap = Heap::new();
        let shared = heap.alloc(Value::Int(5));
        let value = Value::List(vec![Value::Ref(shared), Value::Ref(shared)]);

        let (decoded, decoded_heap) = roundtrip(&registry, &value, &heap);
        assert_eq!(decoded_heap.len(), 1);
        assert!(heap.equivalent(&value, &decoded_heap, &decoded));
    }

    #[test]
    fn test_self_reference_decodes() {
        let registry = registry();
        let mut heap = Heap::new();
        let node = heap.alloc(Value::Nil);
        heap.set(node, Value::List(vec![Value::str("head"), Value::Ref(node)]));

        let (decoded, decoded_heap) = roundtrip(&registry, &Value::Ref(node), &heap);
        assert!(heap.equivalent(&Value::Ref(node), &decoded_heap, &decoded));
    }

    #[test]
    fn test_unreachable_objects_are_dropped() {
        let registry = registry();
        let mut heap = Heap::new();
        heap.alloc(Value::str("garbage"));
        let live = heap.alloc(Value::Int(1));

        let (decoded, decoded_heap) = roundtrip(&registry, &Value::Ref(live), &heap);
        assert_eq!(decoded_heap.len(), 1);
        assert_eq!(decoded_heap.get(decoded.as_ref_id().unwrap()), Some(&Value::Int(1)));
    }

    #[test]
    fn test_closure_with_boxed_capture() {
        let registry = registry();
        let mut heap = Heap::new();
        let cell = heap.alloc(Value::Int(3));
        let closure = Value::Func(FuncValue {
            key: FunctionKey::new("main.counter.func1"),
            captures: vec![Value::Ref(cell)],
        });
        let (decoded, decoded_heap) = roundtrip(&registry, &closure, &heap);
        assert!(heap.equivalent(&closure, &decoded_heap, &decoded));
    }

    #[test]
    fn test_unregistered_function_fails_to_decode() {
        let registry = registry();
        let value = Value::Func(FuncValue::plain(FunctionKey::new("main.gen")));
        let bytes = SnapshotWriter::new(&registry).write_value(&value, &Heap::new()).unwrap();

        let other = TypeRegistryBuilder::empty().build();
        let err = SnapshotReader::new(&other).read_value(&bytes).unwrap_err();
        assert!(matches!(
            err,
            SnapshotError::UnregisteredIdentifier { ref key, .. } if key == "main.gen"
        ));
    }

    #[test]
    fn test_unregistered_function_fails_to_encode() {
        let registry = registry();
        let value = Value::Func(FuncValue::plain(FunctionKey::new("main.missing")));
        assert!(matches!(
            SnapshotWriter::new(&registry).write_value(&value, &Heap::new()),
            Err(SnapshotError::UnregisteredIdentifier { .. })
        ));
    }

    #[test]
    fn test_unknown_dynamic_type() {
        let registry = registry();
        let value = Value::Dyn(DynValue {
            type_id: "main.Celsius".into(),
            payload: Box::new(Value::Float(1.0)),
        });
        let bytes = SnapshotWriter::new(&registry).write_value(&value, &Heap::new()).unwrap();

        let other = TypeRegistryBuilder::empty().build();
        assert!(matches!(
            SnapshotReader::new(&other).read_value(&bytes),
            Err(SnapshotError::UnknownDynamicType { ref type_id, .. }) if type_id == "main.Celsius"
        ));
    }

    #[test]
    fn test_version_mismatch_fails_fast() {
        let registry = registry();
        let mut bytes = SnapshotWriter::new(&registry)
            .write_value(&Value::Int(1), &Heap::new())
            .unwrap();
        bytes[4..8].copy_from_slice(&(SNAPSHOT_VERSION + 1).to_le_bytes());
        // Truncating the body must not matter: the header is checked first.
        bytes.truncate(20);
        assert_eq!(
            SnapshotReader::new(&registry).read_value(&bytes),
            Err(SnapshotError::VersionMismatch {
                expected: SNAPSHOT_VERSION,
                found: SNAPSHOT_VERSION + 1
            })
        );
    }

    #[test]
    fn test_checksum_detects_corruption() {
        let registry = registry();
        let mut bytes = SnapshotWriter::new(&registry)
            .write_value(&Value::str("payload"), &Heap::new())
            .unwrap();
        let mid = bytes.len() - 40;
        bytes[mid] ^= 0xff;
        assert!(matches!(
            SnapshotReader::new(&registry).read_value(&bytes),
            Err(SnapshotError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_truncated_stream() {
        let registry = registry();
        assert!(matches!(
            SnapshotReader::new(&registry).read_value(b"DCO"),
            Err(SnapshotError::UnexpectedEof { offset: 0 })
        ));
    }

    #[test]
    fn test_coroutine_image_roundtrip() {
        let registry = registry();
        let mut heap = Heap::new();
        let cell = heap.alloc(Value::Int(9));
        let mut frame = Frame::entry(FunctionKey::new("main.gen"), std::iter::empty());
        frame.set_local(0, Value::Ref(cell));
        let image = CoroutineImage {
            entry: FunctionKey::new("main.gen"),
            state: CoroutineState::Suspended,
            frames: vec![frame],
            yielded: Some(Value::Ref(cell)),
            pending: None,
        };

        let bytes = SnapshotWriter::new(&registry).write_coroutine(&image, &heap).unwrap();
        let (decoded, decoded_heap) = SnapshotReader::new(&registry).read_coroutine(&bytes).unwrap();
        assert_eq!(decoded.entry, image.entry);
        assert_eq!(decoded.state, CoroutineState::Suspended);
        assert_eq!(decoded_heap.len(), 1);
        // Both the frame local and the yielded value point at the same object.
        assert_eq!(
            decoded.frames[0].local(0),
            decoded.yielded.as_ref()
        );

        assert!(matches!(
            SnapshotReader::new(&registry).read_value(&bytes),
            Err(SnapshotError::Corrupted { .. })
        ));
    }

    #[test]
    fn test_frame_with_unknown_resume_point_is_rejected() {
        let registry = registry();
        let mut frame = Frame::entry(FunctionKey::new("main.gen"), std::iter::empty());
        frame.set_resume_point(7);
        let image = CoroutineImage {
            entry: FunctionKey::new("main.gen"),
            state: CoroutineState::Suspended,
            frames: vec![frame],
            yielded: None,
            pending: None,
        };
        let bytes = SnapshotWriter::new(&registry)
            .write_coroutine(&image, &Heap::new())
            .unwrap();
        assert!(matches!(
            SnapshotReader::new(&registry).read_coroutine(&bytes),
            Err(SnapshotError::Corrupted { .. })
        ));
    }

    fn nested_list(depth: usize) -> Value {
        let mut value = Value::Int(0);
        for _ in 0..depth {
            value = Value::List(vec![value]);
        }
        value
    }

    #[test]
    fn test_deeply_nested_stream_is_rejected() {
        let registry = registry();

        // A value body holding 50 000 single-element lists around a nil.
        let mut payload = vec![format::BodyKind::Value as u8, 0, 0, 0, 0];
        for _ in 0..50_000 {
            payload.push(format::ValueTag::List as u8);
            payload.extend_from_slice(&1u32.to_le_bytes());
        }
        payload.push(format::ValueTag::Nil as u8);

        let mut bytes = Vec::new();
        SnapshotHeader::new().encode(&mut bytes);
        bytes.extend_from_slice(&payload);
        bytes.extend_from_slice(SnapshotChecksum::compute(&payload).as_bytes());

        match SnapshotReader::new(&registry).read_value(&bytes) {
            Err(SnapshotError::Corrupted { offset, reason }) => {
                assert_eq!(offset, format::HEADER_SIZE + 5 + (DEFAULT_MAX_DEPTH + 1) * 5);
                assert!(reason.contains("nested"), "{reason}");
            }
            other => panic!("expected a nesting error, got {:?}", other.map(|(v, _)| v)),
        }
    }

    #[test]
    fn test_nesting_limit_applies_to_encoding() {
        let registry = registry();
        let deep = nested_list(DEFAULT_MAX_DEPTH + 1);
        assert!(matches!(
            SnapshotWriter::new(&registry).write_value(&deep, &Heap::new()),
            Err(SnapshotError::Unencodable(_))
        ));

        let bytes = SnapshotWriter::new(&registry)
            .max_depth(DEFAULT_MAX_DEPTH + 1)
            .write_value(&deep, &Heap::new())
            .unwrap();
        assert!(matches!(
            SnapshotReader::new(&registry).read_value(&bytes),
            Err(SnapshotError::Corrupted { .. })
        ));
        let (decoded, _) = SnapshotReader::new(&registry)
            .max_depth(DEFAULT_MAX_DEPTH + 1)
            .read_value(&bytes)
            .unwrap();
        assert_eq!(decoded, deep);
    }

    #[test]
    fn test_references_restart_the_depth_count() {
        let registry = registry();
        let mut heap = Heap::new();
        let inner = heap.alloc(nested_list(2));
        let value = Value::List(vec![Value::List(vec![Value::Ref(inner)])]);

        let bytes = SnapshotWriter::new(&registry)
            .max_depth(2)
            .write_value(&value, &heap)
            .unwrap();
        let (decoded, decoded_heap) = SnapshotReader::new(&registry)
            .max_depth(2)
            .read_value(&bytes)
            .unwrap();
        assert!(heap.equivalent(&value, &decoded_heap, &decoded));

        let flat = Value::List(vec![Value::List(vec![nested_list(1)])]);
        assert!(SnapshotWriter::new(&registry).max_depth(2).write_value(&flat, &heap).is_err());
    }
}
