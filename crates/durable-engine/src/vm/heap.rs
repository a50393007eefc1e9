//! Coroutine heap
//!
//! An arena of shared, mutable objects addressed by [`ObjectId`]. Each coroutine
//! owns its heap outright; references never cross coroutines, so no locking is
//! needed. Unreachable objects are reclaimed by [`Heap::collect`], a mark and
//! sweep pass from the roots the caller supplies. Freed slots are reused, so
//! the ids of live objects never change.

use std::fmt;

use rustc_hash::FxHashMap;

use crate::vm::value::Value;

/// Live object count below which [`Heap::should_collect`] never fires
pub const MIN_COLLECT_THRESHOLD: usize = 256;

/// Index of an object in a [`Heap`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId(u32);

impl ObjectId {
    pub const fn new(index: u32) -> Self {
        Self(index)
    }

    pub const fn index(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "obj{}", self.0)
    }
}

/// Arena of heap objects
#[derive(Debug, Clone, PartialEq)]
pub struct Heap {
    /// `None` marks a freed slot
    objects: Vec<Option<Value>>,
    /// Freed slots, reused by `alloc`
    free: Vec<u32>,
    /// Live count that triggers the next collection
    threshold: usize,
}

impl Default for Heap {
    fn default() -> Self {
        Self {
            objects: Vec::new(),
            free: Vec::new(),
            threshold: MIN_COLLECT_THRESHOLD,
        }
    }
}

impl Heap {
    /// Create an empty heap
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a heap of `len` objects, all `Nil`
    ///
    /// Used by the snapshot reader, which fills slots after allocating the
    /// whole object table so that forward references resolve.
    pub fn with_slots(len: usize) -> Self {
        Self {
            objects: vec![Some(Value::Nil); len],
            free: Vec::new(),
            threshold: (len * 2).max(MIN_COLLECT_THRESHOLD),
        }
    }

    /// Allocate a new object and return its id
    pub fn alloc(&mut self, value: Value) -> ObjectId {
        if let Some(index) = self.free.pop() {
            self.objects[index as usize] = Some(value);
            return ObjectId(index);
        }
        let id = ObjectId(self.objects.len() as u32);
        self.objects.push(Some(value));
        id
    }

    /// Read an object
    pub fn get(&self, id: ObjectId) -> Option<&Value> {
        self.objects.get(id.0 as usize).and_then(Option::as_ref)
    }

    /// Mutable access to an object
    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut Value> {
        self.objects.get_mut(id.0 as usize).and_then(Option::as_mut)
    }

    /// Overwrite an object; returns false if `id` is dangling
    pub fn set(&mut self, id: ObjectId, value: Value) -> bool {
        match self.get_mut(id) {
            Some(slot) => {
                *slot = value;
                true
            }
            None => false,
        }
    }

    /// Number of live objects
    pub fn len(&self) -> usize {
        self.objects.len() - self.free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterate over live `(id, object)` pairs
    pub fn iter(&self) -> impl Iterator<Item = (ObjectId, &Value)> {
        self.objects
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.as_ref().map(|v| (ObjectId(i as u32), v)))
    }

    /// Whether enough objects have accumulated since the last collection
    pub fn should_collect(&self) -> bool {
        self.len() > self.threshold
    }

    /// Free every object not reachable from `roots`; returns the number freed
    ///
    /// The next threshold is twice the surviving count.
    pub fn collect<'a>(&mut self, roots: impl IntoIterator<Item = &'a Value>) -> usize {
        let marked = self.mark(roots);

        let mut freed = 0;
        for (index, slot) in self.objects.iter_mut().enumerate() {
            if slot.is_some() && !marked[index] {
                *slot = None;
                self.free.push(index as u32);
                freed += 1;
            }
        }
        self.threshold = (self.len() * 2).max(MIN_COLLECT_THRESHOLD);
        tracing::trace!(freed, live = self.len(), "heap collected");
        freed
    }

    fn mark<'a>(&self, roots: impl IntoIterator<Item = &'a Value>) -> Vec<bool> {
        let mut marked = vec![false; self.objects.len()];
        let mut work: Vec<&Value> = Vec::new();
        for root in roots {
            work.push(root);
        }
        while let Some(value) = work.pop() {
            match value {
                Value::Ref(id) => {
                    let index = id.0 as usize;
                    if let Some(Some(object)) = self.objects.get(index) {
                        if !marked[index] {
                            marked[index] = true;
                            work.push(object);
                        }
                    }
                }
                Value::List(items) => work.extend(items),
                Value::Map(entries) => {
                    for (k, v) in entries {
                        work.push(k);
                        work.push(v);
                    }
                }
                Value::Struct(s) => work.extend(s.fields.iter().map(|(_, v)| v)),
                Value::Func(func) => work.extend(&func.captures),
                Value::Dyn(d) => work.push(&d.payload),
                Value::Nil | Value::Bool(_) | Value::Int(_) | Value::Float(_) | Value::Str(_) => {}
            }
        }
        marked
    }

    /// Structural equality of `a` (in `self`) and `b` (in `other`)
    ///
    /// Object ids are matched through a bijection built while walking: two refs
    /// are equal only if they map to each other consistently, so shared
    /// references must stay shared and cycles compare in finite time.
    pub fn equivalent(&self, a: &Value, other: &Heap, b: &Value) -> bool {
        let mut matcher = GraphMatcher {
            left: self,
            right: other,
            forward: FxHashMap::default(),
            backward: FxHashMap::default(),
            pending: Vec::new(),
        };
        matcher.run(a, b)
    }

    /// [`Heap::equivalent`] over two sequences of values sharing one bijection
    pub fn equivalent_all<'a>(
        &self,
        left: impl IntoIterator<Item = &'a Value>,
        other: &Heap,
        right: impl IntoIterator<Item = &'a Value>,
    ) -> bool {
        let left: Vec<&Value> = left.into_iter().collect();
        let right: Vec<&Value> = right.into_iter().collect();
        if left.len() != right.len() {
            return false;
        }
        let mut matcher = GraphMatcher {
            left: self,
            right: other,
            forward: FxHashMap::default(),
            backward: FxHashMap::default(),
            pending: Vec::new(),
        };
        left.iter()
            .zip(right.iter())
            .all(|(a, b)| matcher.compare(a, b))
            && matcher.drain()
    }
}

struct GraphMatcher<'h> {
    left: &'h Heap,
    right: &'h Heap,
    forward: FxHashMap<ObjectId, ObjectId>,
    backward: FxHashMap<ObjectId, ObjectId>,
    pending: Vec<(ObjectId, ObjectId)>,
}

impl GraphMatcher<'_> {
    fn run(&mut self, a: &Value, b: &Value) -> bool {
        self.compare(a, b) && self.drain()
    }

    /// Compare the objects behind every newly paired reference
    fn drain(&mut self) -> bool {
        while let Some((l, r)) = self.pending.pop() {
            let (Some(lv), Some(rv)) = (self.left.get(l), self.right.get(r)) else {
                return false;
            };
            if !self.compare(lv, rv) {
                return false;
            }
        }
        true
    }

    fn compare(&mut self, a: &Value, b: &Value) -> bool {
        match (a, b) {
            (Value::Ref(l), Value::Ref(r)) => self.pair(*l, *r),
            (Value::List(xs), Value::List(ys)) => {
                xs.len() == ys.len() && xs.iter().zip(ys).all(|(x, y)| self.compare(x, y))
            }
            (Value::Map(xs), Value::Map(ys)) => {
                xs.len() == ys.len()
                    && xs
                        .iter()
                        .zip(ys)
                        .all(|((kx, vx), (ky, vy))| self.compare(kx, ky) && self.compare(vx, vy))
            }
            (Value::Struct(x), Value::Struct(y)) => {
                x.name == y.name
                    && x.fields.len() == y.fields.len()
                    && x
                        .fields
                        .iter()
                        .zip(&y.fields)
                        .all(|((nx, vx), (ny, vy))| nx == ny && self.compare(vx, vy))
            }
            (Value::Func(x), Value::Func(y)) => {
                x.key == y.key
                    && x.captures.len() == y.captures.len()
                    && x
                        .captures
                        .iter()
                        .zip(&y.captures)
                        .all(|(cx, cy)| self.compare(cx, cy))
            }
            (Value::Dyn(x), Value::Dyn(y)) => {
                x.type_id == y.type_id && self.compare(&x.payload, &y.payload)
            }
            (Value::Float(x), Value::Float(y)) => x.to_bits() == y.to_bits() || x == y,
            _ => a == b,
        }
    }

    fn pair(&mut self, l: ObjectId, r: ObjectId) -> bool {
        match (self.forward.get(&l), self.backward.get(&r)) {
            (Some(&mapped), _) => mapped == r,
            (None, Some(_)) => false,
            (None, None) => {
                self.forward.insert(l, r);
                self.backward.insert(r, l);
                self.pending.push((l, r));
                true
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_get_set() {
        let mut heap = Heap::new();
        let a = heap.alloc(Value::Int(1));
        let b = heap.alloc(Value::str("x"));
        assert_eq!(a.index(), 0);
        assert_eq!(b.index(), 1);
        assert_eq!(heap.get(a), Some(&Value::Int(1)));
        assert!(heap.set(a, Value::Int(2)));
        assert_eq!(heap.get(a), Some(&Value::Int(2)));
        assert!(!heap.set(ObjectId::new(9), Value::Nil));
        assert_eq!(heap.len(), 2);
    }

    #[test]
    fn test_collect_frees_unreachable_and_keeps_ids() {
        let mut heap = Heap::new();
        let garbage = heap.alloc(Value::Int(0));
        let leaf = heap.alloc(Value::str("leaf"));
        let cycle = heap.alloc(Value::Nil);
        heap.set(cycle, Value::List(vec![Value::Ref(cycle), Value::Ref(leaf)]));

        let root = Value::Ref(cycle);
        assert_eq!(heap.collect([&root]), 1);
        assert_eq!(heap.len(), 2);
        assert_eq!(heap.get(garbage), None);
        assert_eq!(heap.get(leaf), Some(&Value::str("leaf")));

        // The freed slot is reused.
        assert_eq!(heap.alloc(Value::Int(5)), garbage);
        assert_eq!(heap.len(), 3);
    }

    #[test]
    fn test_collect_threshold_tracks_survivors() {
        let mut heap = Heap::new();
        let keep: Vec<Value> = (0..MIN_COLLECT_THRESHOLD)
            .map(|i| Value::Ref(heap.alloc(Value::Int(i as i64))))
            .collect();
        assert!(!heap.should_collect());
        heap.alloc(Value::Nil);
        assert!(heap.should_collect());

        heap.collect(&keep);
        assert_eq!(heap.len(), MIN_COLLECT_THRESHOLD);
        assert!(!heap.should_collect());
    }

    #[test]
    fn test_equivalent_ignores_ids() {
        let mut left = Heap::new();
        left.alloc(Value::Nil); // shift ids
        let l = left.alloc(Value::Int(7));

        let mut right = Heap::new();
        let r = right.alloc(Value::Int(7));

        assert!(left.equivalent(&Value::Ref(l), &right, &Value::Ref(r)));
    }

    #[test]
    fn test_equivalent_detects_lost_sharing() {
        let mut left = Heap::new();
        let shared = left.alloc(Value::Int(1));
        let a = Value::List(vec![Value::Ref(shared), Value::Ref(shared)]);

        let mut right = Heap::new();
        let r1 = right.alloc(Value::Int(1));
        let r2 = right.alloc(Value::Int(1));
        let b = Value::List(vec![Value::Ref(r1), Value::Ref(r2)]);

        assert!(!left.equivalent(&a, &right, &b));
        assert!(left.equivalent(&a, &left, &a));
    }

    #[test]
    fn test_equivalent_cycles_terminate() {
        let mut left = Heap::new();
        let node = left.alloc(Value::Nil);
        left.set(node, Value::List(vec![Value::Int(1), Value::Ref(node)]));

        let mut right = Heap::new();
        let other = right.alloc(Value::Nil);
        right.set(other, Value::List(vec![Value::Int(1), Value::Ref(other)]));

        assert!(left.equivalent(&Value::Ref(node), &right, &Value::Ref(other)));

        right.set(other, Value::List(vec![Value::Int(2), Value::Ref(other)]));
        assert!(!left.equivalent(&Value::Ref(node), &right, &Value::Ref(other)));
    }
}
