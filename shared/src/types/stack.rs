//! Captured stack samples

use serde::{Deserialize, Serialize};

/// One captured sample: the interrupted instruction pointer plus the raw
/// stack addresses the sampler copied out of the guest.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stack {
    /// CPU the sample was taken on
    pub cpu: u32,

    /// Guest instruction pointer at the time of the sample
    pub rip: u64,

    /// Stack addresses, innermost first
    pub frames: Vec<u64>,
}

impl Stack {
    /// Create a stack with no frames yet
    pub fn new(cpu: u32, rip: u64) -> Self {
        Self {
            cpu,
            rip,
            frames: Vec::new(),
        }
    }

    /// Whether the sampler captured at least one frame
    pub fn has_frames(&self) -> bool {
        !self.frames.is_empty()
    }

    /// Frames from outermost to innermost, the order flame graphs expect
    pub fn frames_outermost_first(&self) -> impl Iterator<Item = u64> + '_ {
        self.frames.iter().rev().copied()
    }
}
