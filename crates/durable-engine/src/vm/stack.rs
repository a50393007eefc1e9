//! Frame stack
//!
//! A suspended coroutine is nothing but this stack plus its heap. Each frame
//! records which function it belongs to, where it will continue, and the locals
//! that are live at that point. Registers that are dead at a suspension point are
//! never stored, so a frame is exactly as large as the state it needs.

use std::collections::BTreeMap;

use crate::vm::types::FunctionKey;
use crate::vm::value::Value;
use crate::vm::{VmError, VmResult};

/// One suspended (or about to start) activation
#[derive(Debug, Clone, PartialEq)]
pub struct Frame {
    function: FunctionKey,
    resume_point: u32,
    locals: BTreeMap<u32, Value>,
}

impl Frame {
    /// A fresh activation: resume point 0, entry values in slots `0..n`
    ///
    /// Entry values are the arguments followed by the captures.
    pub fn entry(function: FunctionKey, values: impl IntoIterator<Item = Value>) -> Self {
        Self {
            function,
            resume_point: 0,
            locals: values
                .into_iter()
                .enumerate()
                .map(|(slot, value)| (slot as u32, value))
                .collect(),
        }
    }

    /// Rebuild a frame from decoded parts
    pub fn from_parts(function: FunctionKey, resume_point: u32, locals: BTreeMap<u32, Value>) -> Self {
        Self {
            function,
            resume_point,
            locals,
        }
    }

    pub fn function(&self) -> &FunctionKey {
        &self.function
    }

    /// 0 means the activation has not started yet
    pub fn resume_point(&self) -> u32 {
        self.resume_point
    }

    pub fn locals(&self) -> &BTreeMap<u32, Value> {
        &self.locals
    }

    pub fn local(&self, slot: u32) -> Option<&Value> {
        self.locals.get(&slot)
    }

    pub fn set_local(&mut self, slot: u32, value: Value) {
        self.locals.insert(slot, value);
    }

    /// Move to a new resume point, dropping every previously saved local
    pub fn set_resume_point(&mut self, point: u32) {
        self.resume_point = point;
        self.locals.clear();
    }
}

/// The coroutine's frame stack, outermost first
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Stack {
    frames: Vec<Frame>,
    max_frames: usize,
}

impl Stack {
    /// Create an empty stack with a frame limit
    pub fn new(max_frames: usize) -> Self {
        Self {
            frames: Vec::new(),
            max_frames,
        }
    }

    /// Push a fresh activation of `function`
    pub fn push_frame(&mut self, function: FunctionKey) -> VmResult<&mut Frame> {
        self.push(Frame::entry(function, std::iter::empty()))
    }

    /// Push a prepared frame
    pub fn push(&mut self, frame: Frame) -> VmResult<&mut Frame> {
        if self.frames.len() >= self.max_frames {
            return Err(VmError::StackOverflow {
                limit: self.max_frames,
            });
        }
        self.frames.push(frame);
        let index = self.frames.len() - 1;
        Ok(&mut self.frames[index])
    }

    pub fn pop_frame(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    /// Set a local on the innermost frame
    pub fn set_local(&mut self, slot: u32, value: Value) -> VmResult<()> {
        match self.frames.last_mut() {
            Some(frame) => {
                frame.set_local(slot, value);
                Ok(())
            }
            None => Err(VmError::InvalidState("set_local on an empty stack".into())),
        }
    }

    pub fn top(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn top_mut(&mut self) -> Option<&mut Frame> {
        self.frames.last_mut()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames, outermost first
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Copy of every frame, outermost first
    pub fn snapshot(&self) -> Vec<Frame> {
        self.frames.clone()
    }

    /// Replace the contents with a previously taken snapshot
    pub fn restore(&mut self, frames: Vec<Frame>) -> VmResult<()> {
        if frames.len() > self.max_frames {
            return Err(VmError::StackOverflow {
                limit: self.max_frames,
            });
        }
        self.frames = frames;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop() {
        let mut stack = Stack::new(4);
        stack.push_frame("main.a".into()).unwrap();
        stack.push_frame("main.b".into()).unwrap();
        assert_eq!(stack.depth(), 2);
        assert_eq!(stack.top().unwrap().function().as_str(), "main.b");
        assert_eq!(stack.pop_frame().unwrap().function().as_str(), "main.b");
        assert_eq!(stack.depth(), 1);
    }

    #[test]
    fn test_frame_limit() {
        let mut stack = Stack::new(1);
        stack.push_frame("main.a".into()).unwrap();
        assert!(matches!(
            stack.push_frame("main.b".into()),
            Err(VmError::StackOverflow { limit: 1 })
        ));
    }

    #[test]
    fn test_resume_point_clears_locals() {
        let mut frame = Frame::entry("main.f".into(), vec![Value::Int(1), Value::Int(2)]);
        assert_eq!(frame.local(1), Some(&Value::Int(2)));
        frame.set_resume_point(3);
        assert!(frame.locals().is_empty());
        frame.set_local(7, Value::Bool(true));
        assert_eq!(frame.resume_point(), 3);
        assert_eq!(frame.local(7), Some(&Value::Bool(true)));
    }

    #[test]
    fn test_snapshot_restore() {
        let mut stack = Stack::new(8);
        stack.push_frame("main.outer".into()).unwrap();
        stack.set_local(0, Value::Int(10)).unwrap();
        stack.push_frame("main.inner".into()).unwrap();
        stack.top_mut().unwrap().set_resume_point(2);
        stack.set_local(4, Value::str("x")).unwrap();

        let snapshot = stack.snapshot();
        let mut restored = Stack::new(8);
        restored.restore(snapshot).unwrap();
        assert_eq!(restored, stack);
    }

    #[test]
    fn test_set_local_on_empty_stack() {
        let mut stack = Stack::new(1);
        assert!(matches!(
            stack.set_local(0, Value::Nil),
            Err(VmError::InvalidState(_))
        ));
    }
}
