//! The activation-record stack.
//!
//! One contiguous buffer of value slots owns all frame-local storage; each
//! frame is a typed header view over a base/size window of that buffer.
//! `dynamic_link` chains the call stack, `static_link` chains lexical
//! enclosure for non-local access. Frame numbers increase monotonically so a
//! fat pointer into a popped frame is detectable as stale.

use crate::tree::NodeId;

use super::value::Value;

/// A typed view over one activation record.
#[derive(Debug, Clone)]
pub struct FrameHeader {
    pub static_link: Option<u32>,
    pub dynamic_link: Option<u32>,
    /// Youngest scope this frame may hand out.
    pub dynamic_scope: u32,
    pub parameters_link: Option<u32>,
    /// The range node that opened this frame.
    pub node: NodeId,
    /// Monotonic identity for stale-reference detection.
    pub frame_number: u32,
    /// Lexical level of the range.
    pub frame_level: u32,
    pub parameter_level: u32,
    pub proc_frame: bool,
    /// Arm of a parallel clause this frame runs for, if any.
    pub thread_id: Option<u32>,
    /// First slot in the shared buffer.
    pub base: u32,
    /// Slots currently owned (grows for anonymous LOC generators).
    pub size: u32,
}

/// The contiguous frame stack.
#[derive(Debug)]
pub struct FrameStack {
    slots: Vec<Value>,
    headers: Vec<FrameHeader>,
    next_frame_number: u32,
    /// Slot capacity; exceeding it is a fatal stack overflow.
    max_slots: usize,
    /// Frame depth cap.
    max_depth: usize,
}

/// Why a frame cannot be opened or a slot reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    /// Frame or operand storage exhausted ("program too complex").
    Overflow,
    /// A reference into a popped frame.
    Stale,
    /// No frame of the requested lexical level is reachable.
    NoSuchLevel,
}

impl FrameStack {
    pub fn new(max_slots: usize, max_depth: usize) -> Self {
        Self {
            slots: Vec::new(),
            headers: Vec::new(),
            next_frame_number: 1,
            max_slots,
            max_depth,
        }
    }

    pub fn depth(&self) -> usize {
        self.headers.len()
    }

    pub fn slots(&self) -> &[Value] {
        &self.slots
    }

    /// Index of the current frame.
    pub fn frame_pointer(&self) -> Option<u32> {
        (!self.headers.is_empty()).then(|| self.headers.len() as u32 - 1)
    }

    pub fn header(&self, index: u32) -> Option<&FrameHeader> {
        self.headers.get(index as usize)
    }

    pub fn current(&self) -> Option<&FrameHeader> {
        self.headers.last()
    }

    // ========================================================================
    // OPEN / CLOSE
    // ========================================================================

    /// Open a static frame: the static link walks the current chain back to
    /// the frame one level older than `level`.
    pub fn open_static(
        &mut self,
        node: NodeId,
        level: u32,
        size: u32,
    ) -> Result<u32, FrameError> {
        let static_link = match self.frame_pointer() {
            None => None,
            Some(top) => Some(self.ancestor_at_level(top, level.saturating_sub(1))?),
        };
        self.open(node, level, size, static_link, false)
    }

    /// Open a procedure frame: the static link is the callee's captured
    /// environ rather than the caller.
    pub fn open_proc(
        &mut self,
        node: NodeId,
        level: u32,
        size: u32,
        environ: Option<u32>,
    ) -> Result<u32, FrameError> {
        self.open(node, level, size, environ, true)
    }

    fn open(
        &mut self,
        node: NodeId,
        level: u32,
        size: u32,
        static_link: Option<u32>,
        proc_frame: bool,
    ) -> Result<u32, FrameError> {
        if self.headers.len() >= self.max_depth
            || self.slots.len() + size as usize > self.max_slots
        {
            return Err(FrameError::Overflow);
        }
        let base = self.slots.len() as u32;
        self.slots
            .extend(std::iter::repeat_with(|| Value::Uninit).take(size as usize));
        let dynamic_link = self.frame_pointer();
        let frame_number = self.next_frame_number;
        self.next_frame_number += 1;
        let parameter_level = if proc_frame {
            level
        } else {
            self.current().map(|h| h.parameter_level).unwrap_or(level)
        };
        self.headers.push(FrameHeader {
            static_link,
            dynamic_link,
            dynamic_scope: level,
            parameters_link: static_link,
            node,
            frame_number,
            frame_level: level,
            parameter_level,
            proc_frame,
            thread_id: None,
            base,
            size,
        });
        Ok(self.headers.len() as u32 - 1)
    }

    /// Close the current frame, restoring the previous frame pointer.
    pub fn close(&mut self) {
        if let Some(header) = self.headers.pop() {
            self.slots.truncate(header.base as usize);
        }
    }

    /// Pop frames until `depth` frames remain (non-local jump unwinding).
    pub fn unwind_to_depth(&mut self, depth: usize) {
        while self.headers.len() > depth {
            self.close();
        }
    }

    // ========================================================================
    // ACCESS
    // ========================================================================

    /// Walk static links from `from` until a frame of `level` is found.
    pub fn ancestor_at_level(&self, from: u32, level: u32) -> Result<u32, FrameError> {
        let mut cursor = from;
        loop {
            let header = self.headers.get(cursor as usize).ok_or(FrameError::Stale)?;
            if header.frame_level == level {
                return Ok(cursor);
            }
            cursor = header.static_link.ok_or(FrameError::NoSuchLevel)?;
        }
    }

    /// Locate the frame for a non-local access at `level` from the top.
    pub fn frame_at_level(&self, level: u32) -> Result<u32, FrameError> {
        let top = self.frame_pointer().ok_or(FrameError::NoSuchLevel)?;
        self.ancestor_at_level(top, level)
    }

    fn slot_index(&self, index: u32, number: u32, offset: u32) -> Result<usize, FrameError> {
        let header = self.headers.get(index as usize).ok_or(FrameError::Stale)?;
        if header.frame_number != number {
            return Err(FrameError::Stale);
        }
        if offset >= header.size {
            return Err(FrameError::Overflow);
        }
        Ok((header.base + offset) as usize)
    }

    pub fn read(&self, index: u32, number: u32, offset: u32) -> Result<&Value, FrameError> {
        let slot = self.slot_index(index, number, offset)?;
        Ok(&self.slots[slot])
    }

    pub fn write(
        &mut self,
        index: u32,
        number: u32,
        offset: u32,
        value: Value,
    ) -> Result<(), FrameError> {
        let slot = self.slot_index(index, number, offset)?;
        self.slots[slot] = value;
        Ok(())
    }

    /// Resolve a fat-pointer frame address to a raw buffer slot.
    pub fn locate(&self, index: u32, number: u32, offset: u32) -> Result<usize, FrameError> {
        self.slot_index(index, number, offset)
    }

    pub fn slot_mut(&mut self, raw: usize) -> &mut Value {
        &mut self.slots[raw]
    }

    /// Extend the top frame with one anonymous LOC slot.
    pub fn loc_alloc(&mut self, value: Value) -> Result<(u32, u32, u32), FrameError> {
        if self.slots.len() >= self.max_slots {
            return Err(FrameError::Overflow);
        }
        let index = self.frame_pointer().ok_or(FrameError::NoSuchLevel)?;
        let header = &mut self.headers[index as usize];
        let offset = header.size;
        header.size += 1;
        let number = header.frame_number;
        self.slots.push(value);
        Ok((index, number, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tree::{Attribute, Tree};
    use crate::base::Span;

    fn node() -> NodeId {
        let mut tree = Tree::new();
        tree.alloc(Attribute::CLOSED_CLAUSE, Span::default())
    }

    #[test]
    fn static_links_reach_lexical_ancestors() {
        let mut frames = FrameStack::new(1 << 12, 64);
        let n = node();
        frames.open_static(n, 1, 2).unwrap();
        frames.open_static(n, 2, 1).unwrap();
        frames.open_static(n, 3, 0).unwrap();
        let at_level_1 = frames.frame_at_level(1).unwrap();
        assert_eq!(frames.header(at_level_1).unwrap().frame_level, 1);
    }

    #[test]
    fn proc_frames_link_to_their_environ() {
        let mut frames = FrameStack::new(1 << 12, 64);
        let n = node();
        let environ = frames.open_static(n, 1, 0).unwrap();
        frames.open_static(n, 2, 0).unwrap();
        // The callee's environ skips the caller's frame.
        let callee = frames.open_proc(n, 2, 1, Some(environ)).unwrap();
        assert_eq!(frames.header(callee).unwrap().static_link, Some(environ));
        assert!(frames.header(callee).unwrap().proc_frame);
        assert_eq!(frames.frame_at_level(1).unwrap(), environ);
    }

    #[test]
    fn closed_frames_release_their_slots() {
        let mut frames = FrameStack::new(1 << 12, 64);
        let n = node();
        frames.open_static(n, 1, 3).unwrap();
        assert_eq!(frames.slots().len(), 3);
        frames.close();
        assert!(frames.slots().is_empty());
    }

    #[test]
    fn stale_references_are_detected() {
        let mut frames = FrameStack::new(1 << 12, 64);
        let n = node();
        let index = frames.open_static(n, 1, 1).unwrap();
        let number = frames.header(index).unwrap().frame_number;
        frames.write(index, number, 0, Value::Int(7)).unwrap();
        frames.close();
        frames.open_static(n, 1, 1).unwrap();
        assert_eq!(frames.read(index, number, 0), Err(FrameError::Stale));
    }

    #[test]
    fn depth_limit_is_a_hard_overflow() {
        let mut frames = FrameStack::new(1 << 12, 2);
        let n = node();
        frames.open_static(n, 1, 0).unwrap();
        frames.open_static(n, 2, 0).unwrap();
        assert_eq!(frames.open_static(n, 3, 0), Err(FrameError::Overflow));
    }

    #[test]
    fn loc_alloc_extends_the_top_frame() {
        let mut frames = FrameStack::new(1 << 12, 8);
        let n = node();
        let index = frames.open_static(n, 1, 1).unwrap();
        let (frame, number, offset) = frames.loc_alloc(Value::Int(2)).unwrap();
        assert_eq!(frame, index);
        assert_eq!(offset, 1);
        assert_eq!(frames.read(frame, number, offset), Ok(&Value::Int(2)));
    }
}
