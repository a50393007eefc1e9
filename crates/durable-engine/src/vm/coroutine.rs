//! Coroutine lifecycle
//!
//! A [`Coroutine`] owns a frame stack and a heap and shares the registry its
//! functions came from. It is driven from outside: `next` runs until the next
//! yield, `send` queues the value that yield evaluates to, and `marshal`
//! captures a suspended coroutine as bytes that `unmarshal` turns back into an
//! equivalent coroutine, in this process or another one with the same registry.
//!
//! ```text
//! Created ──start/next──→ Running ──yield──→ Suspended ──next──→ Running
//!                            │                                     │
//!                            ├──return──→ Done ←──cancel───────────┤
//!                            └──error───→ Failed
//! ```

use std::sync::Arc;

use crate::config::RuntimeOptions;
use crate::vm::heap::Heap;
use crate::vm::interpreter::{Interpreter, RunOutcome};
use crate::vm::snapshot::{CoroutineImage, SnapshotReader, SnapshotWriter};
use crate::vm::stack::{Frame, Stack};
use crate::vm::types::{FunctionKey, TypeRegistry};
use crate::vm::value::Value;
use crate::vm::{VmError, VmResult};

/// Coroutine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CoroutineState {
    /// Entry frame pushed, nothing executed
    Created,
    /// Started and not currently stopped at a yield
    Running,
    /// Stopped at a yield; the only state that can be marshaled
    Suspended,
    /// Entry function returned, or cancelled
    Done,
    /// A runtime error escaped; the coroutine cannot continue
    Failed,
}

/// A durable coroutine
#[derive(Debug)]
pub struct Coroutine {
    registry: Arc<TypeRegistry>,
    options: RuntimeOptions,
    entry: FunctionKey,
    state: CoroutineState,
    stack: Stack,
    heap: Heap,
    /// Value of the most recent yield
    yielded: Option<Value>,
    /// Value queued by `send` for the next resume
    pending: Option<Value>,
    /// Return value of the entry function
    result: Option<Value>,
}

impl Coroutine {
    /// Create a coroutine for `entry` without running it
    pub fn new(registry: Arc<TypeRegistry>, entry: impl Into<FunctionKey>, args: Vec<Value>) -> VmResult<Self> {
        Self::with_options(registry, entry, args, RuntimeOptions::default())
    }

    pub fn with_options(
        registry: Arc<TypeRegistry>,
        entry: impl Into<FunctionKey>,
        args: Vec<Value>,
        options: RuntimeOptions,
    ) -> VmResult<Self> {
        let entry = entry.into();
        let descriptor = registry.resolve(&entry)?;
        if entry.is_closure() || !descriptor.captures.is_empty() {
            return Err(VmError::InvalidState(format!(
                "{} is a closure body and cannot be an entry point",
                entry
            )));
        }
        let expected = descriptor.param_count() as usize;
        if args.len() != expected {
            return Err(VmError::ArityMismatch {
                function: entry.to_string(),
                expected,
                found: args.len(),
            });
        }

        let mut stack = Stack::new(options.max_frames);
        stack.push(Frame::entry(entry.clone(), args))?;
        tracing::debug!(entry = %entry, durable = descriptor.is_durable(), "coroutine created");

        Ok(Self {
            registry,
            options,
            entry,
            state: CoroutineState::Created,
            stack,
            heap: Heap::new(),
            yielded: None,
            pending: None,
            result: None,
        })
    }

    /// Create a coroutine and mark it running; it executes on the first `next`
    pub fn start(registry: Arc<TypeRegistry>, entry: impl Into<FunctionKey>, args: Vec<Value>) -> VmResult<Self> {
        let mut coroutine = Self::new(registry, entry, args)?;
        coroutine.state = CoroutineState::Running;
        Ok(coroutine)
    }

    /// Replace the heap of a coroutine that has not run yet
    ///
    /// Lets arguments carry references into a heap prepared by the caller.
    pub fn with_heap(mut self, heap: Heap) -> VmResult<Self> {
        if self.state != CoroutineState::Created {
            return Err(VmError::InvalidState(format!(
                "with_heap on a {:?} coroutine",
                self.state
            )));
        }
        self.heap = heap;
        Ok(self)
    }

    /// Run until the next yield or the end
    ///
    /// Returns `true` when a value was yielded (see [`Coroutine::recv`]) and
    /// `false` once the coroutine is done.
    pub fn next(&mut self) -> VmResult<bool> {
        match self.state {
            CoroutineState::Done => return Ok(false),
            CoroutineState::Failed => {
                return Err(VmError::InvalidState("coroutine has failed".into()));
            }
            CoroutineState::Created | CoroutineState::Running | CoroutineState::Suspended => {}
        }

        let resume = self.pending.take().unwrap_or_default();
        self.state = CoroutineState::Running;
        let outcome = Interpreter::new(&self.registry, &mut self.heap, &self.options).run(&mut self.stack, resume);

        match outcome {
            Ok(RunOutcome::Yielded(value)) => {
                tracing::trace!(entry = %self.entry, depth = self.stack.depth(), "coroutine suspended");
                self.yielded = Some(value);
                self.state = CoroutineState::Suspended;
                if self.heap.should_collect() {
                    self.collect_garbage();
                }
                Ok(true)
            }
            Ok(RunOutcome::Returned(value)) => {
                tracing::trace!(entry = %self.entry, "coroutine finished");
                self.yielded = None;
                self.result = Some(value);
                self.state = CoroutineState::Done;
                self.collect_garbage();
                Ok(false)
            }
            Err(err) => {
                tracing::debug!(entry = %self.entry, error = %err, "coroutine failed");
                self.yielded = None;
                self.stack.clear();
                self.state = CoroutineState::Failed;
                Err(err)
            }
        }
    }

    /// The most recently yielded value
    pub fn recv(&self) -> Option<&Value> {
        self.yielded.as_ref()
    }

    /// Queue the value the pending yield evaluates to
    pub fn send(&mut self, value: Value) {
        self.pending = Some(value);
    }

    /// `send` followed by `next`
    pub fn resume(&mut self, value: Value) -> VmResult<bool> {
        self.send(value);
        self.next()
    }

    /// Return value of the entry function, once done
    pub fn result(&self) -> Option<&Value> {
        self.result.as_ref()
    }

    /// Encode the suspended coroutine
    pub fn marshal(&self) -> VmResult<Vec<u8>> {
        if self.state != CoroutineState::Suspended {
            return Err(VmError::InvalidState(format!(
                "only a suspended coroutine can be marshaled, this one is {:?}",
                self.state
            )));
        }
        let image = CoroutineImage {
            entry: self.entry.clone(),
            state: self.state,
            frames: self.stack.snapshot(),
            yielded: self.yielded.clone(),
            pending: self.pending.clone(),
        };
        let bytes = SnapshotWriter::new(&self.registry)
            .max_depth(self.options.max_value_depth)
            .write_coroutine(&image, &self.heap)?;
        tracing::trace!(entry = %self.entry, frames = image.frames.len(), bytes = bytes.len(), "coroutine marshaled");
        Ok(bytes)
    }

    /// Rebuild a suspended coroutine from `marshal` output
    pub fn unmarshal(registry: Arc<TypeRegistry>, bytes: &[u8]) -> VmResult<Self> {
        Self::unmarshal_with_options(registry, bytes, RuntimeOptions::default())
    }

    pub fn unmarshal_with_options(
        registry: Arc<TypeRegistry>,
        bytes: &[u8],
        options: RuntimeOptions,
    ) -> VmResult<Self> {
        let (image, stack, heap) = decode(&registry, bytes, &options)?;
        Ok(Self {
            registry,
            options,
            entry: image.entry,
            state: image.state,
            stack,
            heap,
            yielded: image.yielded,
            pending: image.pending,
            result: None,
        })
    }

    /// Replace this coroutine's state with a marshaled one
    ///
    /// The stream is decoded completely first; on error nothing changes.
    pub fn restore(&mut self, bytes: &[u8]) -> VmResult<()> {
        let (image, stack, heap) = match decode(&self.registry, bytes, &self.options) {
            Ok(parts) => parts,
            Err(err) => {
                tracing::warn!(entry = %self.entry, error = %err, "rejected coroutine restore");
                return Err(err);
            }
        };
        self.entry = image.entry;
        self.state = image.state;
        self.stack = stack;
        self.heap = heap;
        self.yielded = image.yielded;
        self.pending = image.pending;
        self.result = None;
        Ok(())
    }

    /// Abandon the coroutine; its frames are released
    pub fn cancel(&mut self) {
        if matches!(self.state, CoroutineState::Done | CoroutineState::Failed) {
            return;
        }
        tracing::debug!(entry = %self.entry, depth = self.stack.depth(), "coroutine cancelled");
        self.stack.clear();
        self.heap = Heap::new();
        self.yielded = None;
        self.pending = None;
        self.state = CoroutineState::Done;
    }

    /// Answer every yield with `reply(yielded)` until the coroutine finishes
    pub fn drive(&mut self, mut reply: impl FnMut(&Value) -> Value) -> VmResult<Option<Value>> {
        while self.next()? {
            let yielded = self.yielded.clone().unwrap_or_default();
            let answer = reply(&yielded);
            self.send(answer);
        }
        Ok(self.result.clone())
    }

    pub fn state(&self) -> CoroutineState {
        self.state
    }

    pub fn entry(&self) -> &FunctionKey {
        &self.entry
    }

    pub fn registry(&self) -> &Arc<TypeRegistry> {
        &self.registry
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    /// Mutable heap access for the host
    ///
    /// Objects that nothing in the coroutine references may be reclaimed at the
    /// next suspension.
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    /// Reclaim heap objects unreachable from the frames and held values
    fn collect_garbage(&mut self) {
        let roots = self
            .stack
            .frames()
            .iter()
            .flat_map(|frame| frame.locals().values())
            .chain(self.yielded.iter())
            .chain(self.pending.iter())
            .chain(self.result.iter());
        self.heap.collect(roots);
    }
}

/// Decode a stream into the parts of a suspended coroutine
fn decode(registry: &TypeRegistry, bytes: &[u8], options: &RuntimeOptions) -> VmResult<(CoroutineImage, Stack, Heap)> {
    let (mut image, heap) = SnapshotReader::new(registry)
        .verify_checksum(options.verify_checksum)
        .max_depth(options.max_value_depth)
        .read_coroutine(bytes)?;
    if image.state != CoroutineState::Suspended {
        return Err(VmError::InvalidState(format!(
            "stream holds a {:?} coroutine, expected Suspended",
            image.state
        )));
    }
    if image.frames.is_empty() {
        return Err(VmError::InvalidState("stream holds no frames".into()));
    }
    let mut stack = Stack::new(options.max_frames);
    stack.restore(std::mem::take(&mut image.frames))?;
    Ok((image, stack, heap))
}
