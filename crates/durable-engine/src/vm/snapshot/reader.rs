//! Snapshot reader
//!
//! Validates the header, verifies the checksum, then decodes the object table
//! into a fresh heap before decoding the body. Every object slot exists before
//! any object is decoded, so a `Ref` is just an index check and cycles need no
//! special handling.

use std::collections::BTreeMap;

use crate::vm::coroutine::CoroutineState;
use crate::vm::heap::{Heap, ObjectId};
use crate::vm::snapshot::format::{
    BodyKind, ByteReader, SnapshotChecksum, SnapshotError, SnapshotHeader, ValueTag, CHECKSUM_SIZE,
    DEFAULT_MAX_DEPTH, HEADER_SIZE,
};
use crate::vm::snapshot::task::CoroutineImage;
use crate::vm::stack::Frame;
use crate::vm::types::{FunctionKey, TypeRegistry};
use crate::vm::value::{DynValue, FuncValue, StructValue, Value};

/// Decodes streams produced by [`SnapshotWriter`](super::SnapshotWriter)
pub struct SnapshotReader<'r> {
    registry: &'r TypeRegistry,
    verify_checksum: bool,
    max_depth: usize,
}

impl<'r> SnapshotReader<'r> {
    pub fn new(registry: &'r TypeRegistry) -> Self {
        Self {
            registry,
            verify_checksum: true,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Enable or disable checksum verification
    pub fn verify_checksum(mut self, verify: bool) -> Self {
        self.verify_checksum = verify;
        self
    }

    /// Reject values nested deeper than `depth`
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Decode a value stream into the value and a heap holding its objects
    pub fn read_value(&self, bytes: &[u8]) -> Result<(Value, Heap), SnapshotError> {
        let (mut reader, heap) = self.open(bytes, BodyKind::Value)?;
        let value = self.decoder(heap.len()).decode_value(&mut reader, 0)?;
        expect_end(&reader)?;
        Ok((value, heap))
    }

    /// Decode a coroutine stream
    pub fn read_coroutine(&self, bytes: &[u8]) -> Result<(CoroutineImage, Heap), SnapshotError> {
        let (mut reader, heap) = self.open(bytes, BodyKind::Coroutine)?;
        let decoder = self.decoder(heap.len());

        let state_offset = reader.offset();
        let state = CoroutineState::from_u8(reader.read_u8()?).ok_or(SnapshotError::Corrupted {
            offset: state_offset,
            reason: "unknown coroutine state".into(),
        })?;
        let entry = decoder.decode_key(&mut reader)?;
        let yielded = decoder.decode_optional(&mut reader)?;
        let pending = decoder.decode_optional(&mut reader)?;

        let frame_count = reader.read_len(9)?;
        let mut frames = Vec::with_capacity(frame_count);
        for _ in 0..frame_count {
            frames.push(decoder.decode_frame(&mut reader)?);
        }
        expect_end(&reader)?;

        tracing::trace!(entry = %entry, frames = frames.len(), "decoded coroutine");
        Ok((
            CoroutineImage {
                entry,
                state,
                frames,
                yielded,
                pending,
            },
            heap,
        ))
    }

    fn decoder(&self, object_count: usize) -> Decoder<'r> {
        Decoder {
            registry: self.registry,
            object_count,
            max_depth: self.max_depth,
        }
    }

    /// Check header and checksum, decode the object table
    fn open<'b>(&self, bytes: &'b [u8], expected: BodyKind) -> Result<(ByteReader<'b>, Heap), SnapshotError> {
        let header = SnapshotHeader::decode(&mut ByteReader::new(bytes))?;
        header.validate()?;

        if bytes.len() < HEADER_SIZE + CHECKSUM_SIZE {
            return Err(SnapshotError::UnexpectedEof {
                offset: bytes.len(),
            });
        }
        let checksum_start = bytes.len() - CHECKSUM_SIZE;
        if self.verify_checksum {
            let payload = &bytes[HEADER_SIZE..checksum_start];
            let stored = SnapshotChecksum::from_bytes(&bytes[checksum_start..]).ok_or(
                SnapshotError::UnexpectedEof {
                    offset: checksum_start,
                },
            )?;
            if !stored.verify(payload) {
                return Err(SnapshotError::ChecksumMismatch {
                    expected: stored.to_hex(),
                    computed: SnapshotChecksum::compute(payload).to_hex(),
                });
            }
        }

        let mut reader = ByteReader::at(&bytes[..checksum_start], HEADER_SIZE);
        let kind_offset = reader.offset();
        let kind = reader.read_u8()?;
        if BodyKind::from_u8(kind) != Some(expected) {
            return Err(SnapshotError::Corrupted {
                offset: kind_offset,
                reason: format!("expected {:?} body, found kind {}", expected, kind),
            });
        }

        let count = reader.read_len(1)?;
        let mut heap = Heap::with_slots(count);
        let decoder = self.decoder(count);
        for index in 0..count {
            let value = decoder.decode_value(&mut reader, 0)?;
            heap.set(ObjectId::new(index as u32), value);
        }
        Ok((reader, heap))
    }
}

fn expect_end(reader: &ByteReader<'_>) -> Result<(), SnapshotError> {
    if reader.is_at_end() {
        Ok(())
    } else {
        Err(SnapshotError::Corrupted {
            offset: reader.offset(),
            reason: "trailing bytes after body".into(),
        })
    }
}

struct Decoder<'a> {
    registry: &'a TypeRegistry,
    object_count: usize,
    max_depth: usize,
}

impl<'a> Decoder<'a> {
    /// Read a function key and resolve it
    fn decode_key(&self, reader: &mut ByteReader<'_>) -> Result<FunctionKey, SnapshotError> {
        let offset = reader.offset();
        let key = FunctionKey::new(reader.read_str()?);
        if !self.registry.contains(&key) {
            return Err(SnapshotError::UnregisteredIdentifier {
                key: key.to_string(),
                offset,
            });
        }
        Ok(key)
    }

    fn decode_optional(&self, reader: &mut ByteReader<'_>) -> Result<Option<Value>, SnapshotError> {
        let offset = reader.offset();
        match reader.read_u8()? {
            0 => Ok(None),
            1 => Ok(Some(self.decode_value(reader, 0)?)),
            other => Err(SnapshotError::Corrupted {
                offset,
                reason: format!("invalid option marker {}", other),
            }),
        }
    }

    fn decode_frame(&self, reader: &mut ByteReader<'_>) -> Result<Frame, SnapshotError> {
        let key_offset = reader.offset();
        let function = self.decode_key(reader)?;
        let resume_point = reader.read_u32()?;

        let known = resume_point == 0
            || self
                .registry
                .get(&function)
                .is_some_and(|d| d.function.suspension_point(resume_point).is_some());
        if !known {
            return Err(SnapshotError::Corrupted {
                offset: key_offset,
                reason: format!("{} has no resume point {}", function, resume_point),
            });
        }

        let count = reader.read_len(5)?;
        let mut locals = BTreeMap::new();
        for _ in 0..count {
            let slot = reader.read_u32()?;
            let value = self.decode_value(reader, 0)?;
            locals.insert(slot, value);
        }
        Ok(Frame::from_parts(function, resume_point, locals))
    }

    /// `depth` counts the containers enclosing this value. A `Ref` resets it,
    /// since objects are decoded from the table one at a time.
    fn decode_value(&self, reader: &mut ByteReader<'_>, depth: usize) -> Result<Value, SnapshotError> {
        let offset = reader.offset();
        if depth > self.max_depth {
            return Err(SnapshotError::Corrupted {
                offset,
                reason: format!("values nested deeper than {}", self.max_depth),
            });
        }
        let tag = ValueTag::from_u8(reader.read_u8()?).ok_or(SnapshotError::Corrupted {
            offset,
            reason: "unknown value tag".into(),
        })?;

        Ok(match tag {
            ValueTag::Nil => Value::Nil,
            ValueTag::False => Value::Bool(false),
            ValueTag::True => Value::Bool(true),
            ValueTag::Int => Value::Int(reader.read_u64()? as i64),
            ValueTag::Float => Value::Float(f64::from_bits(reader.read_u64()?)),
            ValueTag::Str => Value::Str(reader.read_str()?),
            ValueTag::List => {
                let len = reader.read_len(1)?;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(self.decode_value(reader, depth + 1)?);
                }
                Value::List(items)
            }
            ValueTag::Map => {
                let len = reader.read_len(2)?;
                let mut entries = Vec::with_capacity(len);
                for _ in 0..len {
                    let k = self.decode_value(reader, depth + 1)?;
                    let v = self.decode_value(reader, depth + 1)?;
                    entries.push((k, v));
                }
                Value::Map(entries)
            }
            ValueTag::Struct => {
                let name = reader.read_str()?;
                let len = reader.read_len(5)?;
                let mut fields = Vec::with_capacity(len);
                for _ in 0..len {
                    let field = reader.read_str()?;
                    fields.push((field, self.decode_value(reader, depth + 1)?));
                }
                Value::Struct(StructValue { name, fields })
            }
            ValueTag::Ref => {
                let index = reader.read_u32()?;
                if index as usize >= self.object_count {
                    return Err(SnapshotError::Corrupted {
                        offset,
                        reason: format!(
                            "reference to object {} of {}",
                            index, self.object_count
                        ),
                    });
                }
                Value::Ref(ObjectId::new(index))
            }
            ValueTag::Func => {
                let key_offset = reader.offset();
                let key = FunctionKey::new(reader.read_str()?);
                let descriptor =
                    self.registry
                        .get(&key)
                        .ok_or_else(|| SnapshotError::UnregisteredIdentifier {
                            key: key.to_string(),
                            offset: key_offset,
                        })?;
                let count = reader.read_len(1)?;
                if count != descriptor.captures.len() {
                    return Err(SnapshotError::Corrupted {
                        offset: key_offset,
                        reason: format!(
                            "{} has {} captures, stream carries {}",
                            key,
                            descriptor.captures.len(),
                            count
                        ),
                    });
                }
                let mut captures = Vec::with_capacity(count);
                for _ in 0..count {
                    captures.push(self.decode_value(reader, depth + 1)?);
                }
                Value::Func(FuncValue { key, captures })
            }
            ValueTag::Dyn => {
                let type_offset = reader.offset();
                let type_id = reader.read_str()?;
                if self.registry.resolve_dyn_type(&type_id).is_none() {
                    return Err(SnapshotError::UnknownDynamicType {
                        type_id,
                        offset: type_offset,
                    });
                }
                let payload = self.decode_value(reader, depth + 1)?;
                Value::Dyn(DynValue {
                    type_id,
                    payload: Box::new(payload),
                })
            }
        })
    }
}
