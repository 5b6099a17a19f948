//! The garbage-collected heap.
//!
//! Every heap object is reached through a handle; frames and payloads hold
//! handle references, never direct storage, so the collector can reclaim
//! freely. Handles are linked through `busy` and `free` lists. Collection is
//! classic mark-sweep: mark walks ownership edges from the frame and operand
//! stacks, sweep unlinks every unmarked, unpinned handle.
//!
//! A scoped guard counter inhibits collection while a descriptor is built
//! piecewise; allocation sites sample occupancy and schedule a collection
//! for the next frame open once a threshold trips.

use bitflags::bitflags;
use tracing::debug;

use crate::mode::ModeId;

use super::stack::FrameStack;
use super::value::Value;

/// Index of a handle in the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandleId(u32);

impl HandleId {
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }
}

bitflags! {
    /// Handle status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct HandleStatus: u8 {
        /// Marked reachable this collection; survives the sweep.
        const NO_SWEEP = 1 << 0;
        /// Pinned by an external holder; never swept.
        const NO_SWEEP_MASK = 1 << 1;
    }
}

/// One bound/stride/shift triple of a row dimension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tuple {
    pub lwb: i64,
    pub upb: i64,
    /// Slots between consecutive elements of this dimension.
    pub span: i64,
    /// `lwb * span`, subtracted during indexing.
    pub shift: i64,
}

impl Tuple {
    pub fn count(&self) -> i64 {
        (self.upb - self.lwb + 1).max(0)
    }
}

/// The heap-resident description of a row value.
#[derive(Debug, Clone, PartialEq)]
pub struct RowDescriptor {
    pub elem_mode: ModeId,
    pub tuples: Vec<Tuple>,
    /// Handle of the element array.
    pub payload: HandleId,
    /// First slot of this row inside the payload (non-zero for slices).
    pub offset: u32,
}

impl RowDescriptor {
    pub fn element_count(&self) -> i64 {
        self.tuples.iter().map(Tuple::count).product()
    }
}

/// What a handle owns.
#[derive(Debug, Clone, PartialEq)]
pub enum HeapObject {
    /// A run of value slots (element arrays, generator cells, counters).
    Plain { payload: Vec<Value>, mode: ModeId },
    Descriptor(RowDescriptor),
}

#[derive(Debug)]
struct Handle {
    object: Option<HeapObject>,
    size: u32,
    status: HandleStatus,
    next: Option<HandleId>,
    prev: Option<HandleId>,
}

/// Collection counters, surfaced for tests and logging.
#[derive(Debug, Default, Clone, Copy)]
pub struct GcStats {
    pub collections: u64,
    pub swept: u64,
    pub retained: u64,
}

/// The heap: a handle arena with busy/free lists and a mark-sweep collector.
#[derive(Debug)]
pub struct Heap {
    handles: Vec<Handle>,
    free: Vec<HandleId>,
    busy_head: Option<HandleId>,
    /// Occupied payload slots.
    allocated: usize,
    /// Soft capacity; crossing 80% schedules a collection.
    capacity: usize,
    /// Non-zero while a sensitive interval is open.
    block_compacter: u32,
    collection_due: bool,
    pub stats: GcStats,
}

const OCCUPANCY_TRIGGER_PERCENT: usize = 80;
const FREE_HANDLE_TRIGGER_PERCENT: usize = 20;

impl Heap {
    pub fn new(capacity: usize) -> Self {
        Self {
            handles: Vec::new(),
            free: Vec::new(),
            busy_head: None,
            allocated: 0,
            capacity: capacity.max(1),
            block_compacter: 0,
            collection_due: false,
            stats: GcStats::default(),
        }
    }

    pub fn allocated_slots(&self) -> usize {
        self.allocated
    }

    pub fn busy_handles(&self) -> usize {
        let mut n = 0;
        let mut cursor = self.busy_head;
        while let Some(handle) = cursor {
            n += 1;
            cursor = self.handles[handle.index()].next;
        }
        n
    }

    // ========================================================================
    // ALLOCATION
    // ========================================================================

    pub fn alloc_plain(&mut self, payload: Vec<Value>, mode: ModeId) -> HandleId {
        let size = payload.len() as u32;
        self.alloc(HeapObject::Plain { payload, mode }, size)
    }

    pub fn alloc_descriptor(&mut self, descriptor: RowDescriptor) -> HandleId {
        let size = descriptor.tuples.len() as u32 + 2;
        self.alloc(HeapObject::Descriptor(descriptor), size)
    }

    fn alloc(&mut self, object: HeapObject, size: u32) -> HandleId {
        self.allocated += size as usize;
        if self.occupancy_high() {
            self.collection_due = true;
        }
        let id = match self.free.pop() {
            Some(id) => {
                let handle = &mut self.handles[id.index()];
                handle.object = Some(object);
                handle.size = size;
                handle.status = HandleStatus::default();
                id
            }
            None => {
                let id = HandleId(self.handles.len() as u32);
                self.handles.push(Handle {
                    object: Some(object),
                    size,
                    status: HandleStatus::default(),
                    next: None,
                    prev: None,
                });
                id
            }
        };
        self.link_busy(id);
        id
    }

    fn occupancy_high(&self) -> bool {
        if self.allocated * 100 > self.capacity * OCCUPANCY_TRIGGER_PERCENT {
            return true;
        }
        let total = self.handles.len();
        total > 16 && self.free.len() * 100 < total * FREE_HANDLE_TRIGGER_PERCENT
    }

    fn link_busy(&mut self, id: HandleId) {
        self.handles[id.index()].prev = None;
        self.handles[id.index()].next = self.busy_head;
        if let Some(head) = self.busy_head {
            self.handles[head.index()].prev = Some(id);
        }
        self.busy_head = Some(id);
    }

    fn unlink_busy(&mut self, id: HandleId) {
        let (prev, next) = {
            let handle = &self.handles[id.index()];
            (handle.prev, handle.next)
        };
        match prev {
            Some(prev) => self.handles[prev.index()].next = next,
            None => self.busy_head = next,
        }
        if let Some(next) = next {
            self.handles[next.index()].prev = prev;
        }
        self.handles[id.index()].prev = None;
        self.handles[id.index()].next = None;
    }

    // ========================================================================
    // ACCESS
    // ========================================================================

    pub fn object(&self, id: HandleId) -> Option<&HeapObject> {
        self.handles.get(id.index()).and_then(|h| h.object.as_ref())
    }

    pub fn object_mut(&mut self, id: HandleId) -> Option<&mut HeapObject> {
        self.handles
            .get_mut(id.index())
            .and_then(|h| h.object.as_mut())
    }

    pub fn descriptor(&self, id: HandleId) -> Option<&RowDescriptor> {
        match self.object(id)? {
            HeapObject::Descriptor(descriptor) => Some(descriptor),
            _ => None,
        }
    }

    pub fn payload(&self, id: HandleId) -> Option<&[Value]> {
        match self.object(id)? {
            HeapObject::Plain { payload, .. } => Some(payload),
            _ => None,
        }
    }

    pub fn payload_mut(&mut self, id: HandleId) -> Option<&mut Vec<Value>> {
        match self.object_mut(id)? {
            HeapObject::Plain { payload, .. } => Some(payload),
            _ => None,
        }
    }

    /// Pin a handle against sweeping (the external NO_SWEEP mask).
    pub fn pin(&mut self, id: HandleId) {
        self.handles[id.index()].status |= HandleStatus::NO_SWEEP_MASK;
    }

    /// Release an external pin.
    pub fn unpin(&mut self, id: HandleId) {
        self.handles[id.index()].status -= HandleStatus::NO_SWEEP_MASK;
    }

    // ========================================================================
    // COLLECTION
    // ========================================================================

    /// Run `f` with the compacter blocked; entry and exit always balance.
    pub fn blocked<R>(&mut self, f: impl FnOnce(&mut Heap) -> R) -> R {
        self.block_compacter += 1;
        let result = f(self);
        self.block_compacter -= 1;
        result
    }

    pub fn is_blocked(&self) -> bool {
        self.block_compacter > 0
    }

    /// Collect now if a trigger fired and no sensitive interval is open.
    /// Called at frame open, the only suspension point allocation crosses.
    pub fn maybe_collect(&mut self, frames: &FrameStack, operands: &[Value]) {
        if self.collection_due && self.block_compacter == 0 {
            self.collect(frames, operands);
        }
    }

    /// Mark from every frame slot and operand, then sweep the busy list.
    pub fn collect(&mut self, frames: &FrameStack, operands: &[Value]) {
        self.collection_due = false;
        self.stats.collections += 1;

        // Mark.
        let mut pending: Vec<HandleId> = Vec::new();
        for value in frames.slots().iter().chain(operands) {
            value.trace(&mut |handle| pending.push(handle));
        }
        while let Some(handle) = pending.pop() {
            let entry = &mut self.handles[handle.index()];
            if entry.status.contains(HandleStatus::NO_SWEEP) {
                continue;
            }
            entry.status |= HandleStatus::NO_SWEEP;
            match &entry.object {
                Some(HeapObject::Plain { payload, .. }) => {
                    // Stowed values: walk element by element into any
                    // structured element modes.
                    for value in payload {
                        value.trace(&mut |h| pending.push(h));
                    }
                }
                Some(HeapObject::Descriptor(descriptor)) => {
                    pending.push(descriptor.payload);
                }
                None => {}
            }
        }

        // Sweep.
        let mut swept = 0u64;
        let mut retained = 0u64;
        let mut cursor = self.busy_head;
        while let Some(handle) = cursor {
            cursor = self.handles[handle.index()].next;
            let status = self.handles[handle.index()].status;
            if status.intersects(HandleStatus::NO_SWEEP | HandleStatus::NO_SWEEP_MASK) {
                self.handles[handle.index()].status -= HandleStatus::NO_SWEEP;
                retained += 1;
                continue;
            }
            self.unlink_busy(handle);
            let entry = &mut self.handles[handle.index()];
            entry.object = None;
            self.allocated -= entry.size as usize;
            entry.size = 0;
            self.free.push(handle);
            swept += 1;
        }
        self.stats.swept += swept;
        self.stats.retained += retained;
        debug!(swept, retained, allocated = self.allocated, "heap collected");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::genie::value::{Address, RefValue};
    use crate::mode::ModeTable;

    fn heap() -> (Heap, ModeTable) {
        (Heap::new(1 << 16), ModeTable::new())
    }

    #[test]
    fn unreachable_objects_are_swept() {
        let (mut heap, modes) = heap();
        let frames = FrameStack::new(1 << 12, 64);
        let reachable = heap.alloc_plain(vec![Value::Int(1)], modes.int_mode);
        let _garbage = heap.alloc_plain(vec![Value::Int(2)], modes.int_mode);
        let root = vec![Value::Ref(RefValue {
            address: Address::Heap {
                handle: reachable,
                offset: 0,
            },
            path: Vec::new(),
            scope: 0,
        })];
        heap.collect(&frames, &root);
        assert_eq!(heap.busy_handles(), 1);
        assert!(heap.object(reachable).is_some());
        assert_eq!(heap.stats.swept, 1);
    }

    #[test]
    fn row_descriptors_keep_their_payload_alive() {
        let (mut heap, modes) = heap();
        let frames = FrameStack::new(1 << 12, 64);
        let payload = heap.alloc_plain(vec![Value::Int(0); 3], modes.int_mode);
        let descriptor = heap.alloc_descriptor(RowDescriptor {
            elem_mode: modes.int_mode,
            tuples: vec![Tuple {
                lwb: 1,
                upb: 3,
                span: 1,
                shift: 1,
            }],
            payload,
            offset: 0,
        });
        let root = vec![Value::Row(descriptor)];
        heap.collect(&frames, &root);
        assert_eq!(heap.busy_handles(), 2);
        assert!(heap.payload(payload).is_some());
    }

    #[test]
    fn pinned_handles_survive_without_roots() {
        let (mut heap, modes) = heap();
        let frames = FrameStack::new(1 << 12, 64);
        let pinned = heap.alloc_plain(vec![Value::Int(9)], modes.int_mode);
        heap.pin(pinned);
        heap.collect(&frames, &[]);
        assert!(heap.object(pinned).is_some());
        heap.unpin(pinned);
        heap.collect(&frames, &[]);
        assert!(heap.object(pinned).is_none());
    }

    #[test]
    fn freed_handles_are_reused() {
        let (mut heap, modes) = heap();
        let frames = FrameStack::new(1 << 12, 64);
        let dead = heap.alloc_plain(vec![Value::Int(1)], modes.int_mode);
        heap.collect(&frames, &[]);
        let fresh = heap.alloc_plain(vec![Value::Int(2)], modes.int_mode);
        assert_eq!(dead, fresh);
    }

    #[test]
    fn blocked_intervals_balance() {
        let (mut heap, _) = heap();
        assert!(!heap.is_blocked());
        let nested = heap.blocked(|heap| {
            assert!(heap.is_blocked());
            heap.blocked(|heap| heap.is_blocked())
        });
        assert!(nested);
        assert!(!heap.is_blocked());
    }

    #[test]
    fn stowed_values_are_traced_element_by_element() {
        let (mut heap, modes) = heap();
        let frames = FrameStack::new(1 << 12, 64);
        let inner = heap.alloc_plain(vec![Value::Int(5)], modes.int_mode);
        let outer = heap.alloc_plain(
            vec![Value::Struct(Box::new([Value::Ref(RefValue {
                address: Address::Heap {
                    handle: inner,
                    offset: 0,
                },
                path: Vec::new(),
                scope: 0,
            })]))],
            modes.int_mode,
        );
        let root = vec![Value::Ref(RefValue {
            address: Address::Heap {
                handle: outer,
                offset: 0,
            },
            path: Vec::new(),
            scope: 0,
        })];
        heap.collect(&frames, &root);
        assert!(heap.object(inner).is_some());
    }
}
