use std::rc::Rc;

use crate::value::Closure;

/// Frame produced by a tail call; it replaced its caller, so tracebacks
/// mark the elision.
pub const FRAME_TAIL: u8 = 1 << 0;
/// Frame pushed by a re-entrant `execute` (metamethod, protected call,
/// hook); an error unwinds only to this boundary.
pub const FRAME_REENTRY: u8 = 1 << 1;

/// One activation of a bytecode closure. Host calls never push frames;
/// they run to completion inside the dispatch loop.
pub struct Frame {
    pub closure: Rc<Closure>,
    /// First register of this frame in the shared stack.
    pub base: usize,
    /// Stack slot of the callee value; results are copied here on return.
    pub ret_base: usize,
    pub pc: usize,
    /// Result count the caller asked for; -1 keeps them all.
    pub want: i32,
    pub vararg_start: usize,
    pub vararg_count: usize,
    pub flags: u8,
}

impl Frame {
    /// Registers past this slot belong to temporaries of open calls.
    #[inline]
    pub fn frame_top(&self) -> usize {
        self.base + self.closure.chunk.max_stack as usize
    }
}
