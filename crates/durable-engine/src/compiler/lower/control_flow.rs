//! Loop bookkeeping for `break` and `continue`

use crate::compiler::ir::BasicBlockId;

/// Targets of one enclosing loop
#[derive(Debug, Clone)]
pub struct LoopContext {
    /// Block to jump to for 'break'
    pub break_block: BasicBlockId,
    /// Block to jump to for 'continue'
    pub continue_block: BasicBlockId,
    pub label: Option<String>,
}

impl LoopContext {
    pub fn new(
        break_block: BasicBlockId,
        continue_block: BasicBlockId,
        label: Option<String>,
    ) -> Self {
        Self {
            break_block,
            continue_block,
            label,
        }
    }
}

/// Why a `break` or `continue` has no target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoopTargetError {
    NotInLoop,
    UnknownLabel,
}

/// Stack of active loop contexts for nested loops
#[derive(Debug, Default)]
pub struct LoopStack {
    stack: Vec<LoopContext>,
}

impl LoopStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, ctx: LoopContext) {
        self.stack.push(ctx);
    }

    pub fn pop(&mut self) -> Option<LoopContext> {
        self.stack.pop()
    }

    fn find(&self, label: Option<&str>) -> Result<&LoopContext, LoopTargetError> {
        match label {
            Some(label) => self
                .stack
                .iter()
                .rev()
                .find(|ctx| ctx.label.as_deref() == Some(label))
                .ok_or(LoopTargetError::UnknownLabel),
            None => self.stack.last().ok_or(LoopTargetError::NotInLoop),
        }
    }

    pub fn break_target(&self, label: Option<&str>) -> Result<BasicBlockId, LoopTargetError> {
        self.find(label).map(|ctx| ctx.break_block)
    }

    pub fn continue_target(&self, label: Option<&str>) -> Result<BasicBlockId, LoopTargetError> {
        self.find(label).map(|ctx| ctx.continue_block)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_loop_stack() {
        let mut stack = LoopStack::new();
        assert_eq!(stack.break_target(None), Err(LoopTargetError::NotInLoop));

        stack.push(LoopContext::new(BasicBlockId(1), BasicBlockId(2), Some("outer".into())));
        stack.push(LoopContext::new(BasicBlockId(3), BasicBlockId(4), None));
        assert_eq!(stack.break_target(None), Ok(BasicBlockId(3)));
        assert_eq!(stack.continue_target(Some("outer")), Ok(BasicBlockId(2)));
        assert_eq!(
            stack.break_target(Some("inner")),
            Err(LoopTargetError::UnknownLabel)
        );

        stack.pop();
        stack.pop();
        assert!(stack.pop().is_none());
    }
}
