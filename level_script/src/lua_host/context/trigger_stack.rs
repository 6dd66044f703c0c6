use log::warn;

use crate::handle::EntityHandle;

/// The implicit self/activator pair a script-side primitive forwards to
/// native use callbacks. Either entity may be freed while the frame is
/// live, so both are kept as handles and resolved at each use.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerFrame {
    pub self_entity: EntityHandle,
    pub activator: Option<EntityHandle>,
}

#[derive(Debug, Default, Clone)]
pub struct TriggerStack {
    frames: Vec<TriggerFrame>,
}

impl TriggerStack {
    /// Pushes a frame and returns its index for the matching `pop`.
    pub fn push(&mut self, frame: TriggerFrame) -> usize {
        self.frames.push(frame);
        self.frames.len() - 1
    }

    /// Drops the frame at `index` together with anything left above it.
    pub fn pop(&mut self, index: usize) {
        if index + 1 != self.frames.len() {
            warn!(
                "trigger frame {index} popped at depth {}; unwinding",
                self.frames.len()
            );
        }
        self.frames.truncate(index);
    }

    pub fn current(&self) -> Option<TriggerFrame> {
        self.frames.last().copied()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }
}
