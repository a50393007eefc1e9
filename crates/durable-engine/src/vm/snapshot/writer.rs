//! Snapshot writer
//!
//! Encodes a value or a coroutine together with every heap object it reaches.
//! Objects are numbered in the order the encoder first meets them and a `Ref`
//! is written as that number, so shared objects are written once and cycles
//! terminate.

use rustc_hash::FxHashMap;

use crate::vm::heap::{Heap, ObjectId};
use crate::vm::snapshot::format::{
    BodyKind, ByteWriter, SnapshotChecksum, SnapshotError, SnapshotHeader, ValueTag, DEFAULT_MAX_DEPTH,
};
use crate::vm::snapshot::task::CoroutineImage;
use crate::vm::types::{FunctionKey, TypeRegistry};
use crate::vm::value::Value;

/// Encodes values and coroutines against a registry
pub struct SnapshotWriter<'r> {
    registry: &'r TypeRegistry,
    max_depth: usize,
}

impl<'r> SnapshotWriter<'r> {
    pub fn new(registry: &'r TypeRegistry) -> Self {
        Self {
            registry,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Refuse to encode values nested deeper than `depth`
    pub fn max_depth(mut self, depth: usize) -> Self {
        self.max_depth = depth;
        self
    }

    /// Encode a single value and the heap objects it reaches
    pub fn write_value(&self, value: &Value, heap: &Heap) -> Result<Vec<u8>, SnapshotError> {
        let mut encoder = Encoder::new(self.registry, heap, self.max_depth);
        let mut body = Vec::new();
        encoder.encode_value(value, 0, &mut body)?;
        encoder.finish(BodyKind::Value, body)
    }

    /// Encode a coroutine image and the heap objects its frames reach
    pub fn write_coroutine(&self, image: &CoroutineImage, heap: &Heap) -> Result<Vec<u8>, SnapshotError> {
        let mut encoder = Encoder::new(self.registry, heap, self.max_depth);
        let mut body = Vec::new();

        body.put_u8(image.state.to_u8());
        encoder.encode_key(&image.entry, &body)?;
        body.put_str(image.entry.as_str());
        encoder.encode_optional(image.yielded.as_ref(), &mut body)?;
        encoder.encode_optional(image.pending.as_ref(), &mut body)?;

        body.put_u32(image.frames.len() as u32);
        for frame in &image.frames {
            encoder.encode_key(frame.function(), &body)?;
            body.put_str(frame.function().as_str());
            body.put_u32(frame.resume_point());
            body.put_u32(frame.locals().len() as u32);
            for (slot, value) in frame.locals() {
                body.put_u32(*slot);
                encoder.encode_value(value, 0, &mut body)?;
            }
        }

        tracing::trace!(
            entry = %image.entry,
            frames = image.frames.len(),
            "encoding coroutine"
        );
        encoder.finish(BodyKind::Coroutine, body)
    }
}

struct Encoder<'a> {
    registry: &'a TypeRegistry,
    heap: &'a Heap,
    /// Object id -> table index
    table: FxHashMap<ObjectId, u32>,
    /// Table order
    order: Vec<ObjectId>,
    max_depth: usize,
}

impl<'a> Encoder<'a> {
    fn new(registry: &'a TypeRegistry, heap: &'a Heap, max_depth: usize) -> Self {
        Self {
            registry,
            heap,
            table: FxHashMap::default(),
            order: Vec::new(),
            max_depth,
        }
    }

    /// Check that a function key resolves before writing it
    fn encode_key(&self, key: &FunctionKey, out: &[u8]) -> Result<(), SnapshotError> {
        if self.registry.contains(key) {
            Ok(())
        } else {
            Err(SnapshotError::UnregisteredIdentifier {
                key: key.to_string(),
                offset: out.len(),
            })
        }
    }

    fn encode_optional(&mut self, value: Option<&Value>, out: &mut Vec<u8>) -> Result<(), SnapshotError> {
        match value {
            Some(value) => {
                out.put_u8(1);
                self.encode_value(value, 0, out)
            }
            None => {
                out.put_u8(0);
                Ok(())
            }
        }
    }

    fn object_index(&mut self, id: ObjectId) -> Result<u32, SnapshotError> {
        if let Some(index) = self.table.get(&id) {
            return Ok(*index);
        }
        if self.heap.get(id).is_none() {
            return Err(SnapshotError::Unencodable(format!("dangling reference {}", id)));
        }
        let index = self.order.len() as u32;
        self.table.insert(id, index);
        self.order.push(id);
        Ok(index)
    }

    fn encode_value(&mut self, value: &Value, depth: usize, out: &mut Vec<u8>) -> Result<(), SnapshotError> {
        if depth > self.max_depth {
            return Err(SnapshotError::Unencodable(format!(
                "values nested deeper than {}",
                self.max_depth
            )));
        }
        match value {
            Value::Nil => out.put_u8(ValueTag::Nil as u8),
            Value::Bool(false) => out.put_u8(ValueTag::False as u8),
            Value::Bool(true) => out.put_u8(ValueTag::True as u8),
            Value::Int(i) => {
                out.put_u8(ValueTag::Int as u8);
                out.put_u64(*i as u64);
            }
            Value::Float(f) => {
                out.put_u8(ValueTag::Float as u8);
                out.put_u64(f.to_bits());
            }
            Value::Str(s) => {
                out.put_u8(ValueTag::Str as u8);
                out.put_str(s);
            }
            Value::List(items) => {
                out.put_u8(ValueTag::List as u8);
                out.put_u32(items.len() as u32);
                for item in items {
                    self.encode_value(item, depth + 1, out)?;
                }
            }
            Value::Map(entries) => {
                out.put_u8(ValueTag::Map as u8);
                out.put_u32(entries.len() as u32);
                for (k, v) in entries {
                    self.encode_value(k, depth + 1, out)?;
                    self.encode_value(v, depth + 1, out)?;
                }
            }
            Value::Struct(s) => {
                out.put_u8(ValueTag::Struct as u8);
                out.put_str(&s.name);
                out.put_u32(s.fields.len() as u32);
                for (name, v) in &s.fields {
                    out.put_str(name);
                    self.encode_value(v, depth + 1, out)?;
                }
            }
            Value::Ref(id) => {
                let index = self.object_index(*id)?;
                out.put_u8(ValueTag::Ref as u8);
                out.put_u32(index);
            }
            Value::Func(func) => {
                let descriptor = self.registry.get(&func.key).ok_or_else(|| {
                    SnapshotError::UnregisteredIdentifier {
                        key: func.key.to_string(),
                        offset: out.len(),
                    }
                })?;
                if descriptor.captures.len() != func.captures.len() {
                    return Err(SnapshotError::Unencodable(format!(
                        "{} carries {} captures, registry declares {}",
                        func.key,
                        func.captures.len(),
                        descriptor.captures.len()
                    )));
                }
                out.put_u8(ValueTag::Func as u8);
                out.put_str(func.key.as_str());
                out.put_u32(func.captures.len() as u32);
                for capture in &func.captures {
                    self.encode_value(capture, depth + 1, out)?;
                }
            }
            Value::Dyn(d) => {
                if self.registry.resolve_dyn_type(&d.type_id).is_none() {
                    return Err(SnapshotError::UnknownDynamicType {
                        type_id: d.type_id.clone(),
                        offset: out.len(),
                    });
                }
                out.put_u8(ValueTag::Dyn as u8);
                out.put_str(&d.type_id);
                self.encode_value(&d.payload, depth + 1, out)?;
            }
        }
        Ok(())
    }

    /// Encode the object table and assemble the stream
    fn finish(mut self, kind: BodyKind, body: Vec<u8>) -> Result<Vec<u8>, SnapshotError> {
        let heap = self.heap;
        let mut objects = Vec::new();
        let mut next = 0;
        // Encoding an object may discover more objects; the table grows as we go.
        while next < self.order.len() {
            let id = self.order[next];
            let value = heap
                .get(id)
                .ok_or_else(|| SnapshotError::Unencodable(format!("dangling reference {}", id)))?;
            self.encode_value(value, 0, &mut objects)?;
            next += 1;
        }

        let mut payload = Vec::with_capacity(5 + objects.len() + body.len());
        payload.put_u8(kind as u8);
        payload.put_u32(self.order.len() as u32);
        payload.extend_from_slice(&objects);
        payload.extend_from_slice(&body);

        let checksum = SnapshotChecksum::compute(&payload);
        let mut out = Vec::with_capacity(16 + payload.len() + 32);
        SnapshotHeader::new().encode(&mut out);
        out.extend_from_slice(&payload);
        out.extend_from_slice(checksum.as_bytes());
        Ok(out)
    }
}
