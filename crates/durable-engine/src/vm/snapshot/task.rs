//! Serialized coroutine record

use crate::vm::coroutine::CoroutineState;
use crate::vm::stack::Frame;
use crate::vm::types::FunctionKey;
use crate::vm::value::Value;

/// Everything about a coroutine except its heap
///
/// The heap travels next to the image in the same stream, as the object table.
#[derive(Debug, Clone, PartialEq)]
pub struct CoroutineImage {
    pub entry: FunctionKey,
    pub state: CoroutineState,
    /// Frames, outermost first
    pub frames: Vec<Frame>,
    /// Last value handed out by a yield
    pub yielded: Option<Value>,
    /// Value queued by `send` but not consumed yet
    pub pending: Option<Value>,
}

impl CoroutineState {
    pub(crate) fn to_u8(self) -> u8 {
        match self {
            CoroutineState::Created => 0,
            CoroutineState::Running => 1,
            CoroutineState::Suspended => 2,
            CoroutineState::Done => 3,
            CoroutineState::Failed => 4,
        }
    }

    pub(crate) fn from_u8(byte: u8) -> Option<Self> {
        Some(match byte {
            0 => CoroutineState::Created,
            1 => CoroutineState::Running,
            2 => CoroutineState::Suspended,
            3 => CoroutineState::Done,
            4 => CoroutineState::Failed,
            _ => return None,
        })
    }
}
