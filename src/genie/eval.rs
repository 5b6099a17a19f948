//! The evaluator.
//!
//! Every unit's elaboration pushes exactly one value on the operand stack;
//! composites keep their intermediates on that stack, so the collector's
//! root set stays complete across the suspension points (frame open, routine
//! call, loop boundary). Dispatch is one `match` on the propagator the
//! analyser cached per node.

use tracing::trace;

use crate::base::Diagnostic;
use crate::mode::{ModeId, ModeTable};
use crate::prelude::transput;
use crate::semantic::{SymbolTables, TagId};
use crate::tree::{Attribute, NodeId, Tree};
use crate::Options;

use super::heap::{GcStats, HandleId, Heap, RowDescriptor, Tuple};
use super::specialise::Folded;
use super::stack::{FrameError, FrameStack};
use super::value::{Address, ProcBody, ProcValue, RefValue, Value};
use super::{Eval, Interrupt, Propagator};

/// A standard-prelude operation: reads its arguments from and writes its
/// result to the operand stack.
pub type IntrinsicFn = fn(&mut Genie<'_>) -> Eval<()>;

/// Result of one program run.
#[derive(Debug)]
pub struct GenieOutcome {
    /// Captured standard output.
    pub output: String,
    /// The runtime error that aborted evaluation, if one did.
    pub error: Option<Diagnostic>,
    pub gc: GcStats,
}

/// The runtime: all mutable evaluator state in one place.
pub struct Genie<'a> {
    pub tree: &'a Tree,
    pub modes: &'a ModeTable,
    pub tabs: &'a SymbolTables,
    pub options: &'a Options,
    pub frames: FrameStack,
    pub operands: Vec<Value>,
    pub heap: Heap,
    pub registry: &'a [IntrinsicFn],
    pub folded: &'a Folded,
    pub out: String,
}

impl<'a> Genie<'a> {
    pub fn new(
        tree: &'a Tree,
        modes: &'a ModeTable,
        tabs: &'a SymbolTables,
        options: &'a Options,
        registry: &'a [IntrinsicFn],
        folded: &'a Folded,
    ) -> Self {
        Self {
            tree,
            modes,
            tabs,
            options,
            frames: FrameStack::new(options.frame_stack_slots, options.frame_stack_depth),
            operands: Vec::new(),
            heap: Heap::new(options.heap_slots),
            registry,
            folded,
            out: String::new(),
        }
    }

    /// Elaborate the particular program.
    pub fn run(mut self) -> GenieOutcome {
        let result = self.run_inner();
        let error = match result {
            Ok(()) => None,
            Err(Interrupt::Error(diagnostic)) => Some(diagnostic),
            Err(Interrupt::Jump { .. }) => Some(Diagnostic::runtime_error(
                Default::default(),
                "jump out of the particular program",
            )),
            Err(Interrupt::Stop { .. }) => None,
        };
        GenieOutcome {
            output: self.out,
            error,
            gc: self.heap.stats,
        }
    }

    fn run_inner(&mut self) -> Eval<()> {
        let Some(root) = self.tree.root() else {
            return Ok(());
        };
        let Some(serial) = self.tree.child(root, 0) else {
            return Ok(());
        };
        self.in_frame(root, |genie| {
            genie.eval(serial)?;
            genie.pop();
            Ok(())
        })
    }

    // ========================================================================
    // PLUMBING
    // ========================================================================

    fn pop(&mut self) -> Value {
        self.operands.pop().expect("operand stack discipline")
    }

    /// Push a result (the intrinsic interface).
    pub fn push(&mut self, value: Value) {
        self.operands.push(value);
    }

    /// Pop an argument (the intrinsic interface).
    pub fn pop_operand(&mut self) -> Value {
        self.pop()
    }

    /// A runtime error raised from inside an intrinsic.
    pub fn raise(&self, message: impl Into<String>) -> Interrupt {
        Interrupt::Error(Diagnostic::runtime_error(Default::default(), message.into()))
    }

    /// The elements of a row value, in index order.
    pub fn elements_of(&self, handle: HandleId) -> Vec<Value> {
        match self.heap.descriptor(handle) {
            Some(descriptor) => {
                let descriptor = descriptor.clone();
                self.row_elements(&descriptor)
            }
            None => Vec::new(),
        }
    }

    /// The initialised content of a name (the fat-pointer dereference
    /// operator of the intrinsic interface).
    pub fn read_name(&self, reference: &RefValue) -> Option<Value> {
        self.peek_ref(reference).filter(Value::is_initialised)
    }

    /// Store through a name from an intrinsic.
    pub fn write_name(&mut self, reference: &RefValue, value: Value) -> Eval<()> {
        write_through(
            &mut self.frames,
            &mut self.heap,
            reference,
            value,
            Default::default(),
        )
    }

    fn error<T>(&self, node: NodeId, message: impl Into<String>) -> Eval<T> {
        Err(Interrupt::Error(Diagnostic::runtime_error(
            self.tree.node(node).span,
            message.into(),
        )))
    }

    fn frame_failure<T>(&self, node: NodeId, error: FrameError) -> Eval<T> {
        match error {
            FrameError::Overflow => self.error(node, "program too complex: stack overflow"),
            FrameError::Stale => self.error(node, "reference outlived its scope"),
            FrameError::NoSuchLevel => self.error(node, "no frame at the required level"),
        }
    }

    /// Open the frame of a range, run `f`, and close it again, also when
    /// `f` unwinds. Frame open is a suspension point: the collector may run.
    fn in_frame<T>(
        &mut self,
        range: NodeId,
        f: impl FnOnce(&mut Self) -> Eval<T>,
    ) -> Eval<T> {
        let scope = self.tree.node(range).table.expect("stamped range");
        let table = self.tabs.table(scope);
        let (level, size) = (table.level, table.ap_increment);
        self.heap.maybe_collect(&self.frames, &self.operands);
        if let Err(e) = self.frames.open_static(range, level, size) {
            return self.frame_failure(range, e);
        }
        let depth = self.frames.depth();
        let result = f(self);
        self.frames.unwind_to_depth(depth - 1);
        result
    }

    fn read_ref(&self, node: NodeId, reference: &RefValue) -> Eval<Value> {
        let base = match &reference.address {
            Address::Nil => return self.error(node, "NIL cannot be dereferenced"),
            Address::Frame {
                index,
                number,
                offset,
            } => match self.frames.read(*index, *number, *offset) {
                Ok(value) => value.clone(),
                Err(e) => return self.frame_failure(node, e),
            },
            Address::Heap { handle, offset } => match self
                .heap
                .payload(*handle)
                .and_then(|payload| payload.get(*offset as usize))
            {
                Some(value) => value.clone(),
                None => return self.error(node, "reference outlived its scope"),
            },
        };
        let mut value = base;
        for &field in &reference.path {
            value = match value {
                Value::Struct(fields) => fields
                    .get(field as usize)
                    .cloned()
                    .unwrap_or(Value::Uninit),
                _ => return self.error(node, "access into a value that is not structured"),
            };
        }
        if !value.is_initialised() {
            return self.error(node, "attempt to use an uninitialised value");
        }
        Ok(value)
    }

    fn write_ref(&mut self, node: NodeId, reference: &RefValue, value: Value) -> Eval<()> {
        let span = self.tree.node(node).span;
        write_through(
            &mut self.frames,
            &mut self.heap,
            reference,
            value,
            span,
        )
    }

    /// Youngest scope any name or routine inside a value carries.
    fn value_scope(&self, value: &Value) -> u32 {
        match value {
            Value::Ref(reference) => reference.scope,
            Value::Proc(routine) => routine.scope,
            Value::United { value, .. } => self.value_scope(value),
            Value::Struct(fields) => fields.iter().map(|f| self.value_scope(f)).max().unwrap_or(0),
            Value::Row(handle) => {
                let Some(descriptor) = self.heap.descriptor(*handle) else {
                    return 0;
                };
                match self.heap.payload(descriptor.payload) {
                    Some(payload) => payload.iter().map(|v| self.value_scope(v)).max().unwrap_or(0),
                    None => 0,
                }
            }
            _ => 0,
        }
    }

    /// Deep-copy a row value so assignment has copy semantics.
    fn copy_value(&mut self, value: Value) -> Value {
        match value {
            Value::Row(handle) => {
                let Some(descriptor) = self.heap.descriptor(handle).cloned() else {
                    return Value::Row(handle);
                };
                let elements = self.row_elements(&descriptor);
                let copied: Vec<Value> = elements
                    .into_iter()
                    .map(|element| self.copy_value(element))
                    .collect();
                let count = copied.len();
                let payload = self
                    .heap
                    .alloc_plain(copied, descriptor.elem_mode);
                let tuples = dense_tuples(&descriptor.tuples);
                debug_assert_eq!(
                    count as i64,
                    tuples.iter().map(Tuple::count).product::<i64>()
                );
                let fresh = self.heap.alloc_descriptor(RowDescriptor {
                    elem_mode: descriptor.elem_mode,
                    tuples,
                    payload,
                    offset: 0,
                });
                Value::Row(fresh)
            }
            Value::Struct(fields) => {
                let copied: Vec<Value> = fields
                    .into_vec()
                    .into_iter()
                    .map(|field| self.copy_value(field))
                    .collect();
                Value::Struct(copied.into_boxed_slice())
            }
            Value::United { tag, value } => Value::United {
                tag,
                value: Box::new(self.copy_value(*value)),
            },
            other => other,
        }
    }

    /// The elements of a row in index order.
    fn row_elements(&self, descriptor: &RowDescriptor) -> Vec<Value> {
        let Some(payload) = self.heap.payload(descriptor.payload) else {
            return Vec::new();
        };
        let mut out = Vec::new();
        let mut indices: Vec<i64> = descriptor.tuples.iter().map(|t| t.lwb).collect();
        let total = descriptor.element_count();
        for _ in 0..total {
            let mut position = descriptor.offset as i64;
            for (i, tuple) in descriptor.tuples.iter().enumerate() {
                position += indices[i] * tuple.span - tuple.shift;
            }
            out.push(
                payload
                    .get(position as usize)
                    .cloned()
                    .unwrap_or(Value::Uninit),
            );
            // Advance the rightmost dimension first.
            for d in (0..indices.len()).rev() {
                indices[d] += 1;
                if indices[d] <= descriptor.tuples[d].upb {
                    break;
                }
                indices[d] = descriptor.tuples[d].lwb;
            }
        }
        out
    }

    /// Allocate a fresh one-dimensional row from evaluated elements.
    pub fn alloc_row(&mut self, elements: Vec<Value>, elem_mode: ModeId) -> HandleId {
        let upb = elements.len() as i64;
        let payload = self.heap.alloc_plain(elements, elem_mode);
        self.heap.alloc_descriptor(RowDescriptor {
            elem_mode,
            tuples: vec![Tuple {
                lwb: 1,
                upb,
                span: 1,
                shift: 1,
            }],
            payload,
            offset: 0,
        })
    }

    /// An unassigned object of the given mode, with actual bounds taken
    /// from `declarer` where the mode has rows.
    fn default_value(&mut self, declarer: Option<NodeId>, mode: ModeId) -> Eval<Value> {
        use crate::mode::ModeShape;
        let mode = self.modes.chase(mode);
        match self.modes.shape(mode).clone() {
            ModeShape::Row { dims, elem } => {
                let (tuples, elem_declarer) = match declarer {
                    Some(d) => self.eval_bounds(d, dims)?,
                    None => (
                        vec![
                            Tuple {
                                lwb: 1,
                                upb: 0,
                                span: 1,
                                shift: 1,
                            };
                            dims as usize
                        ],
                        None,
                    ),
                };
                let count: i64 = tuples.iter().map(Tuple::count).product();
                // Build elements through the operand stack: constructing a
                // nested element may evaluate bounds, which can open frames
                // and wake the collector.
                for _ in 0..count {
                    let element = self.default_value(elem_declarer, elem)?;
                    self.operands.push(element);
                }
                let mut elements = Vec::with_capacity(count.max(0) as usize);
                for _ in 0..count {
                    elements.push(self.pop());
                }
                elements.reverse();
                let payload = self.heap.alloc_plain(elements, elem);
                let tuples = dense_tuples(&tuples);
                let descriptor = self.heap.alloc_descriptor(RowDescriptor {
                    elem_mode: elem,
                    tuples,
                    payload,
                    offset: 0,
                });
                Ok(Value::Row(descriptor))
            }
            ModeShape::Flex(row) => self.default_value(declarer, row),
            ModeShape::Struct { fields } => {
                for (i, field) in fields.iter().enumerate() {
                    let field_declarer = declarer.and_then(|d| self.field_declarer(d, i));
                    let value = self.default_value(field_declarer, field.mode)?;
                    self.operands.push(value);
                }
                let mut out = Vec::with_capacity(fields.len());
                for _ in 0..fields.len() {
                    out.push(self.pop());
                }
                out.reverse();
                Ok(Value::Struct(out.into_boxed_slice()))
            }
            _ => Ok(Value::Uninit),
        }
    }

    /// Evaluate the bound pairs of a row declarer into raw tuples.
    fn eval_bounds(
        &mut self,
        declarer: NodeId,
        dims: u32,
    ) -> Eval<(Vec<Tuple>, Option<NodeId>)> {
        let declarer = self.skip_to_row_declarer(declarer);
        let Some(declarer) = declarer else {
            return Ok((
                vec![
                    Tuple {
                        lwb: 1,
                        upb: 0,
                        span: 1,
                        shift: 1,
                    };
                    dims as usize
                ],
                None,
            ));
        };
        let bounds = self.tree.child(declarer, 0).expect("bounds");
        let elem_declarer = self.tree.child(declarer, 1);
        let pairs = self.tree.child_vec(bounds);
        let mut tuples = Vec::with_capacity(dims as usize);
        for pair in pairs {
            let children = self.tree.child_vec(pair);
            let (lwb, upb) = match children.as_slice() {
                [] => (1, 0),
                [upper] => {
                    self.eval(*upper)?;
                    (1, self.pop_int(*upper)? as i64)
                }
                [lower, upper] => {
                    self.eval(*lower)?;
                    let lwb = self.pop_int(*lower)? as i64;
                    self.eval(*upper)?;
                    let upb = self.pop_int(*upper)? as i64;
                    (lwb, upb)
                }
                _ => (1, 0),
            };
            tuples.push(Tuple {
                lwb,
                upb,
                span: 1,
                shift: lwb,
            });
        }
        while tuples.len() < dims as usize {
            tuples.push(Tuple {
                lwb: 1,
                upb: 0,
                span: 1,
                shift: 1,
            });
        }
        Ok((tuples, elem_declarer))
    }

    fn skip_to_row_declarer(&self, declarer: NodeId) -> Option<NodeId> {
        match self.tree.node(declarer).attr {
            Attribute::ROW_DECLARER => Some(declarer),
            Attribute::FLEX_DECLARER => self
                .tree
                .child(declarer, 0)
                .and_then(|inner| self.skip_to_row_declarer(inner)),
            // An indicant whose declaration carries actual bounds.
            Attribute::DECLARER_INDICANT => {
                let tag = self.tree.node(declarer).tag?;
                let defining = self.tabs.tag(tag).node?;
                let inner = self.tree.child(defining, 0)?;
                self.skip_to_row_declarer(inner)
            }
            _ => None,
        }
    }

    fn field_declarer(&self, declarer: NodeId, index: usize) -> Option<NodeId> {
        if self.tree.node(declarer).attr != Attribute::STRUCT_DECLARER {
            return None;
        }
        let field = self.tree.child(declarer, index)?;
        self.tree.child(field, 0)
    }

    fn pop_int(&mut self, node: NodeId) -> Eval<i32> {
        match self.pop() {
            Value::Int(i) => Ok(i),
            Value::Uninit => self.error(node, "attempt to use an uninitialised value"),
            other => self.error(node, format!("an integral value was needed, not {other:?}")),
        }
    }

    fn pop_bool(&mut self, node: NodeId) -> Eval<bool> {
        match self.pop() {
            Value::Bool(b) => Ok(b),
            Value::Uninit => self.error(node, "attempt to use an uninitialised value"),
            _ => self.error(node, "a boolean value was needed"),
        }
    }

    fn pop_ref(&mut self, node: NodeId) -> Eval<RefValue> {
        match self.pop() {
            Value::Ref(reference) => Ok(reference),
            Value::Uninit => self.error(node, "attempt to use an uninitialised value"),
            _ => self.error(node, "a name was needed"),
        }
    }

    // ========================================================================
    // DISPATCH
    // ========================================================================

    /// Elaborate one unit; exactly one value is pushed.
    pub fn eval(&mut self, node: NodeId) -> Eval<()> {
        let propagator = self
            .tree
            .node(node)
            .propagator
            .unwrap_or(Propagator::Skip);
        trace!(node = node.index(), ?propagator, "eval");
        match propagator {
            Propagator::Constant => {
                let value = self.folded.get(&node).cloned().unwrap_or(Value::Uninit);
                self.operands.push(value);
                Ok(())
            }
            Propagator::Denotation => self.eval_denotation(node),
            Propagator::QuickIdentifier => self.eval_identifier(node),
            Propagator::Dereference => {
                let child = self.tree.child(node, 0).expect("coercend");
                self.eval(child)?;
                let reference = self.pop_ref(node)?;
                let value = self.read_ref(node, &reference)?;
                self.operands.push(value);
                Ok(())
            }
            Propagator::Deprocedure => {
                let child = self.tree.child(node, 0).expect("coercend");
                self.eval(child)?;
                let routine = match self.pop() {
                    Value::Proc(routine) => routine,
                    Value::Uninit => {
                        return self.error(node, "attempt to use an uninitialised value");
                    }
                    _ => return self.error(node, "a routine was needed"),
                };
                self.call(node, routine, 0)
            }
            Propagator::Widen => self.eval_widening(node),
            Propagator::RowUp => self.eval_rowing(node),
            Propagator::Unite => {
                let child = self.tree.child(node, 0).expect("coercend");
                let tag = self
                    .tree
                    .node(child)
                    .mode
                    .map(|m| self.modes.chase(m))
                    .expect("united coercend mode");
                self.eval(child)?;
                let value = self.pop();
                self.operands.push(Value::United {
                    tag,
                    value: Box::new(value),
                });
                Ok(())
            }
            Propagator::Void => {
                let child = self.tree.child(node, 0).expect("coercend");
                self.eval(child)?;
                self.pop();
                self.operands.push(Value::Empty);
                Ok(())
            }
            Propagator::Formula => self.eval_formula(node),
            Propagator::MonadicFormula => self.eval_monadic(node),
            Propagator::Call => self.eval_call(node),
            Propagator::Slice => self.eval_slice(node),
            Propagator::Selection => self.eval_selection(node),
            Propagator::Assignation => self.eval_assignation(node),
            Propagator::IdentityRelation => self.eval_identity_relation(node),
            Propagator::Cast => {
                let enclosed = self.tree.child(node, 1).expect("cast enclosed");
                self.eval(enclosed)
            }
            Propagator::RoutineText => {
                let environ = self
                    .frames
                    .frame_pointer()
                    .map(|index| (index, self.frames.header(index).unwrap().frame_number));
                self.operands.push(Value::Proc(ProcValue {
                    body: ProcBody::Node(node),
                    environ,
                    scope: self.tree.node(node).info.max(0) as u32,
                }));
                Ok(())
            }
            Propagator::Generator => {
                let declarer = self.tree.child(node, 0).expect("generator declarer");
                let mode = self.tree.node(declarer).mode.expect("declarer mode");
                let qualifier = self.tree.node(node).info;
                let reference = self.generate(node, Some(declarer), mode, qualifier)?;
                self.operands.push(Value::Ref(reference));
                Ok(())
            }
            Propagator::Jump => {
                let tag = self.tree.node(node).tag.expect("bound label");
                let level = self.tabs.table(self.tabs.tag(tag).table).level;
                Err(Interrupt::Jump { label: tag, level })
            }
            Propagator::Skip => {
                self.operands.push(Value::Uninit);
                Ok(())
            }
            Propagator::Nil => {
                self.operands.push(Value::Ref(RefValue::nil()));
                Ok(())
            }
            Propagator::SerialClause => self.eval_serial(node),
            Propagator::ClosedClause => {
                let serial = self.tree.child(node, 0).expect("closed serial");
                self.in_frame(node, |genie| genie.eval(serial))
            }
            Propagator::ConditionalClause => self.eval_conditional(node),
            Propagator::CaseClause => self.eval_case(node),
            Propagator::ConformityClause => self.eval_conformity(node),
            Propagator::LoopClause => self.eval_loop(node),
            Propagator::Collateral => self.eval_collateral(node),
            Propagator::Parallel => {
                // Arms run collaterally; a jump out of one arm abandons the
                // siblings as the interrupt unwinds.
                for arm in self.tree.children(node) {
                    self.eval(arm)?;
                    self.pop();
                }
                self.operands.push(Value::Empty);
                Ok(())
            }
            Propagator::Completer => {
                let unit = self.tree.child(node, 0).expect("completer unit");
                self.eval(unit)
            }
        }
    }

    fn eval_denotation(&mut self, node: NodeId) -> Eval<()> {
        let attr = self.tree.node(node).attr;
        let text = self
            .tree
            .node(node)
            .symbol
            .clone()
            .expect("denotation text");
        if attr == Attribute::STRING_DENOTATION {
            let elements: Vec<Value> = text.chars().map(Value::Char).collect();
            let row = self.alloc_row(elements, self.modes.char_mode);
            self.operands.push(Value::Row(row));
            return Ok(());
        }
        let mode = self.tree.node(node).mode.expect("denotation mode");
        match transput::string_to_value(self.modes, mode, &text) {
            Some(value) => {
                self.operands.push(value);
                Ok(())
            }
            None => self.error(node, format!("denotation {text} cannot be represented")),
        }
    }

    fn eval_identifier(&mut self, node: NodeId) -> Eval<()> {
        let tag_id = self.tree.node(node).tag.expect("bound identifier");
        let tag = self.tabs.tag(tag_id);
        if tag.in_prelude {
            if let Some(intrinsic) = tag.intrinsic {
                if self.modes.is_proc(tag.mode.expect("prelude mode")) {
                    self.operands.push(Value::Proc(ProcValue {
                        body: ProcBody::Intrinsic(intrinsic),
                        environ: None,
                        scope: 0,
                    }));
                    return Ok(());
                }
                // Environment enquiries push their value directly.
                let implementation = self.registry[intrinsic.0 as usize];
                return implementation(self);
            }
        }
        let level = self.tabs.table(tag.table).level;
        let offset = tag.offset;
        let frame = match self.frames.frame_at_level(level) {
            Ok(frame) => frame,
            Err(e) => return self.frame_failure(node, e),
        };
        let number = self.frames.header(frame).unwrap().frame_number;
        let value = match self.frames.read(frame, number, offset) {
            Ok(value) => value.clone(),
            Err(e) => return self.frame_failure(node, e),
        };
        if !value.is_initialised() {
            return self.error(node, "attempt to use an uninitialised value");
        }
        self.operands.push(value);
        Ok(())
    }

    fn eval_widening(&mut self, node: NodeId) -> Eval<()> {
        let child = self.tree.child(node, 0).expect("coercend");
        let target = self.tree.node(node).mode.expect("widened mode");
        self.eval(child)?;
        let value = self.pop();
        let widened = match value {
            Value::Int(i) => {
                if self.modes.is_complex(target).is_some() {
                    Value::Struct(Box::new([Value::Real(i as f64), Value::Real(0.0)]))
                } else if self
                    .modes
                    .is_standard(target, crate::mode::Primitive::Int)
                {
                    Value::LongInt(i as i64)
                } else {
                    Value::Real(i as f64)
                }
            }
            Value::LongInt(i) => Value::Real(i as f64),
            Value::Real(r) => {
                if self.modes.is_complex(target).is_some() {
                    Value::Struct(Box::new([Value::Real(r), Value::Real(0.0)]))
                } else {
                    Value::Real(r)
                }
            }
            Value::Bits(b) => {
                if self.modes.is_standard(target, crate::mode::Primitive::Bits) {
                    Value::LongBits(b as u64)
                } else {
                    let bools: Vec<Value> = (0..32)
                        .rev()
                        .map(|i| Value::Bool(b >> i & 1 == 1))
                        .collect();
                    let row = self.alloc_row(bools, self.modes.bool_mode);
                    Value::Row(row)
                }
            }
            Value::LongBits(b) => {
                let bools: Vec<Value> = (0..64)
                    .rev()
                    .map(|i| Value::Bool(b >> i & 1 == 1))
                    .collect();
                let row = self.alloc_row(bools, self.modes.bool_mode);
                Value::Row(row)
            }
            Value::Bytes(text) => {
                let chars: Vec<Value> = text.chars().map(Value::Char).collect();
                let row = self.alloc_row(chars, self.modes.char_mode);
                Value::Row(row)
            }
            Value::Struct(fields) => Value::Struct(fields),
            Value::Uninit => {
                return self.error(node, "attempt to use an uninitialised value");
            }
            other => other,
        };
        self.operands.push(widened);
        Ok(())
    }

    fn eval_rowing(&mut self, node: NodeId) -> Eval<()> {
        let child = self.tree.child(node, 0).expect("coercend");
        let target = self.tree.node(node).mode.expect("rowed mode");
        self.eval(child)?;
        let value = self.pop();
        // REF T rows to REF [] T: the fresh row cell holds a copy.
        if self.modes.is_ref(target) {
            let reference = match value {
                Value::Ref(reference) => reference,
                _ => return self.error(node, "a name was needed for reference rowing"),
            };
            let scope = reference.scope;
            let element = self.read_ref(node, &reference)?;
            let elem_mode = self
                .modes
                .ref_target(target)
                .and_then(|row| self.modes.row_of(row))
                .map(|(_, elem)| elem)
                .unwrap_or(self.modes.hip_mode);
            let row = self.alloc_row(vec![element], elem_mode);
            let cell = self.heap.alloc_plain(vec![Value::Row(row)], target);
            self.operands.push(Value::Ref(RefValue {
                address: Address::Heap {
                    handle: cell,
                    offset: 0,
                },
                path: Vec::new(),
                scope,
            }));
            return Ok(());
        }
        let rowed = match value {
            Value::Row(handle) => {
                // One dimension more; the new leading index is always 1.
                let descriptor = self
                    .heap
                    .descriptor(handle)
                    .cloned()
                    .ok_or_else(|| {
                        Interrupt::Error(Diagnostic::runtime_error(
                            self.tree.node(node).span,
                            "row descriptor vanished",
                        ))
                    })?;
                let mut tuples = vec![Tuple {
                    lwb: 1,
                    upb: 1,
                    span: descriptor.element_count().max(1),
                    shift: descriptor.element_count().max(1),
                }];
                tuples.extend(descriptor.tuples.iter().copied());
                let fresh = self.heap.alloc_descriptor(RowDescriptor {
                    elem_mode: descriptor.elem_mode,
                    tuples,
                    payload: descriptor.payload,
                    offset: descriptor.offset,
                });
                Value::Row(fresh)
            }
            element => {
                let elem_mode = self
                    .modes
                    .row_of(target)
                    .map(|(_, elem)| elem)
                    .unwrap_or(self.modes.hip_mode);
                Value::Row(self.alloc_row(vec![element], elem_mode))
            }
        };
        self.operands.push(rowed);
        Ok(())
    }

    // ------------------------------------------------------------------------
    // formulas and calls
    // ------------------------------------------------------------------------

    fn eval_formula(&mut self, node: NodeId) -> Eval<()> {
        let children = self.tree.child_vec(node);
        let [lhs, operator, rhs] = children.as_slice() else {
            return self.error(node, "malformed formula");
        };
        self.eval(*lhs)?;
        self.eval(*rhs)?;
        self.apply_operator(node, *operator, 2)
    }

    fn eval_monadic(&mut self, node: NodeId) -> Eval<()> {
        let children = self.tree.child_vec(node);
        let [operator, operand] = children.as_slice() else {
            return self.error(node, "malformed formula");
        };
        self.eval(*operand)?;
        self.apply_operator(node, *operator, 1)
    }

    fn apply_operator(&mut self, node: NodeId, operator: NodeId, argc: usize) -> Eval<()> {
        let tag_id = self.tree.node(operator).tag.expect("bound operator");
        let tag = self.tabs.tag(tag_id);
        if let Some(intrinsic) = tag.intrinsic {
            let implementation = self.registry[intrinsic.0 as usize];
            return implementation(self);
        }
        let Some(body) = tag.body else {
            return self.error(node, "operator has no routine");
        };
        let level = self.tabs.table(tag.table).level;
        let environ = match self.frames.frame_at_level(level) {
            Ok(frame) => Some((frame, self.frames.header(frame).unwrap().frame_number)),
            Err(_) => None,
        };
        let routine = ProcValue {
            body: ProcBody::Node(body),
            environ,
            scope: level,
        };
        self.call(node, routine, argc)
    }

    fn eval_call(&mut self, node: NodeId) -> Eval<()> {
        let children = self.tree.child_vec(node);
        let primary = children[0];
        let arguments = &children[1..];
        self.eval(primary)?;
        let routine = match self.pop() {
            Value::Proc(routine) => routine,
            Value::Uninit => return self.error(node, "attempt to use an uninitialised value"),
            _ => return self.error(node, "a routine was needed"),
        };
        for &argument in arguments {
            self.eval(argument)?;
        }
        let mut argc = arguments.len();
        if self.tree.node(node).info == 1 {
            // Extra arguments pack into one row parameter.
            let elem_mode = self
                .tree
                .node(arguments[0])
                .mode
                .unwrap_or(self.modes.hip_mode);
            let mut elements = Vec::with_capacity(argc);
            for _ in 0..argc {
                elements.push(self.pop());
            }
            elements.reverse();
            let row = self.alloc_row(elements, elem_mode);
            self.operands.push(Value::Row(row));
            argc = 1;
        }
        self.call(node, routine, argc)
    }

    /// Apply a routine to `argc` evaluated arguments on the operand stack.
    fn call(&mut self, node: NodeId, routine: ProcValue, argc: usize) -> Eval<()> {
        match routine.body {
            ProcBody::Intrinsic(intrinsic) => {
                let implementation = self.registry[intrinsic.0 as usize];
                implementation(self)
            }
            ProcBody::Node(body) => {
                let scope = self.tree.node(body).table.expect("routine table");
                let table = self.tabs.table(scope);
                let (level, size) = (table.level, table.ap_increment);
                let environ = match routine.environ {
                    Some((index, number)) => {
                        match self.frames.header(index) {
                            Some(header) if header.frame_number == number => Some(index),
                            _ => {
                                return self.error(node, "routine outlived its environ");
                            }
                        }
                    }
                    None => None,
                };
                self.heap.maybe_collect(&self.frames, &self.operands);
                if let Err(e) = self.frames.open_proc(body, level, size, environ) {
                    return self.frame_failure(node, e);
                }
                let depth = self.frames.depth();
                let frame = self.frames.frame_pointer().unwrap();
                let number = self.frames.header(frame).unwrap().frame_number;
                for offset in (0..argc).rev() {
                    let value = self.pop();
                    if let Err(e) = self.frames.write(frame, number, offset as u32, value) {
                        self.frames.unwind_to_depth(depth - 1);
                        return self.frame_failure(node, e);
                    }
                }
                let body_unit = self.tree.children(body).last().expect("routine body");
                let result = self.eval(body_unit);
                self.frames.unwind_to_depth(depth - 1);
                result
            }
        }
    }

    // ------------------------------------------------------------------------
    // slices and selections
    // ------------------------------------------------------------------------

    fn eval_slice(&mut self, node: NodeId) -> Eval<()> {
        let children = self.tree.child_vec(node);
        let primary = children[0];
        let scripts = &children[1..];
        self.eval(primary)?;
        let sliced = self.pop();
        let (descriptor_handle, name) = match sliced {
            Value::Row(handle) => (handle, None),
            Value::Ref(reference) => {
                let value = self.read_ref(node, &reference)?;
                match value {
                    Value::Row(handle) => (handle, Some(reference)),
                    _ => return self.error(node, "a row was needed"),
                }
            }
            Value::Uninit => return self.error(node, "attempt to use an uninitialised value"),
            _ => return self.error(node, "a row was needed"),
        };
        // Keep the row rooted while the scripts run; a subscript may open
        // frames and wake the collector.
        self.operands.push(Value::Row(descriptor_handle));
        let descriptor = self
            .heap
            .descriptor(descriptor_handle)
            .cloned()
            .expect("descriptor");

        // Evaluate subscripts and trimmer bounds left to right.
        enum Script {
            Index(i64),
            Trim(Option<i64>, Option<i64>),
        }
        let mut evaluated: Vec<Script> = Vec::with_capacity(scripts.len());
        for &script in scripts {
            match self.tree.node(script).attr {
                Attribute::SUBSCRIPT => {
                    let unit = self.tree.child(script, 0).expect("subscript");
                    self.eval(unit)?;
                    evaluated.push(Script::Index(self.pop_int(script)? as i64));
                }
                _ => {
                    let info = self.tree.node(script).info;
                    let bounds = self.tree.child_vec(script);
                    let mut lower = None;
                    let mut upper = None;
                    let mut cursor = bounds.into_iter();
                    if info & crate::parser::TRIMMER_HAS_LWB != 0 {
                        let unit = cursor.next().expect("trimmer lower bound");
                        self.eval(unit)?;
                        lower = Some(self.pop_int(script)? as i64);
                    }
                    if info & crate::parser::TRIMMER_HAS_UPB != 0 {
                        let unit = cursor.next().expect("trimmer upper bound");
                        self.eval(unit)?;
                        upper = Some(self.pop_int(script)? as i64);
                    }
                    evaluated.push(Script::Trim(lower, upper));
                }
            }
        }
        // Scripts are evaluated; the row root can come off the stack.
        self.pop();
        if evaluated.len() != descriptor.tuples.len() {
            return self.error(node, "subscript count does not match the row");
        }

        let mut offset = descriptor.offset as i64;
        let mut trimmed: Vec<Tuple> = Vec::new();
        for (script, tuple) in evaluated.iter().zip(&descriptor.tuples) {
            match script {
                Script::Index(i) => {
                    if self.options.bounds_checks && (*i < tuple.lwb || *i > tuple.upb) {
                        return self.error(
                            node,
                            format!(
                                "index {i} is outside the bounds [{}:{}]",
                                tuple.lwb, tuple.upb
                            ),
                        );
                    }
                    offset += i * tuple.span - tuple.shift;
                }
                Script::Trim(lower, upper) => {
                    let lwb = lower.unwrap_or(tuple.lwb);
                    let upb = upper.unwrap_or(tuple.upb);
                    if self.options.bounds_checks
                        && (lwb < tuple.lwb || upb > tuple.upb)
                    {
                        return self.error(
                            node,
                            format!(
                                "trimmer [{lwb}:{upb}] is outside the bounds [{}:{}]",
                                tuple.lwb, tuple.upb
                            ),
                        );
                    }
                    trimmed.push(Tuple {
                        lwb,
                        upb,
                        span: tuple.span,
                        shift: tuple.shift,
                    });
                }
            }
        }

        if trimmed.is_empty() {
            // Pure subscripting reaches one element.
            match name {
                Some(reference) => {
                    self.operands.push(Value::Ref(RefValue {
                        address: Address::Heap {
                            handle: descriptor.payload,
                            offset: offset as u32,
                        },
                        path: Vec::new(),
                        scope: reference.scope,
                    }));
                }
                None => {
                    let value = self
                        .heap
                        .payload(descriptor.payload)
                        .and_then(|payload| payload.get(offset as usize))
                        .cloned()
                        .unwrap_or(Value::Uninit);
                    if !value.is_initialised() {
                        return self.error(node, "attempt to use an uninitialised value");
                    }
                    self.operands.push(value);
                }
            }
            return Ok(());
        }

        // A trim produces a fresh descriptor over the same payload.
        let fresh = self.heap.alloc_descriptor(RowDescriptor {
            elem_mode: descriptor.elem_mode,
            tuples: trimmed,
            payload: descriptor.payload,
            offset: offset as u32,
        });
        match name {
            Some(reference) => {
                let target = self.tree.node(node).mode.expect("slice mode");
                let cell = self.heap.alloc_plain(vec![Value::Row(fresh)], target);
                self.operands.push(Value::Ref(RefValue {
                    address: Address::Heap {
                        handle: cell,
                        offset: 0,
                    },
                    path: Vec::new(),
                    scope: reference.scope,
                }));
            }
            None => self.operands.push(Value::Row(fresh)),
        }
        Ok(())
    }

    fn eval_selection(&mut self, node: NodeId) -> Eval<()> {
        let secondary = self.tree.child(node, 0).expect("selected secondary");
        let name = self.tree.node(node).symbol.clone().expect("selector");
        self.eval(secondary)?;
        let value = self.pop();
        let secondary_mode = self
            .tree
            .node(secondary)
            .mode
            .expect("checked secondary mode");
        match value {
            Value::Ref(reference) => {
                let target = self
                    .modes
                    .ref_target(secondary_mode)
                    .expect("name selection");
                if let Some((index, _)) = self.modes.field_mode(target, &name) {
                    self.operands.push(Value::Ref(reference.field(index as u32)));
                    return Ok(());
                }
                // A name of a multiple: copy the field rows out.
                let (_, elem) = self.modes.row_of(target).expect("multiple selection");
                let (index, field_mode) =
                    self.modes.field_mode(elem, &name).expect("checked field");
                let row = self.read_ref(node, &reference)?;
                let handle = match row {
                    Value::Row(handle) => handle,
                    _ => return self.error(node, "a row was needed"),
                };
                let field_row = self.select_from_row(handle, index, field_mode)?;
                let mode = self.tree.node(node).mode.expect("selection mode");
                let scope = reference.scope;
                let cell = self.heap.alloc_plain(vec![field_row], mode);
                self.operands.push(Value::Ref(RefValue {
                    address: Address::Heap {
                        handle: cell,
                        offset: 0,
                    },
                    path: Vec::new(),
                    scope,
                }));
                Ok(())
            }
            Value::Struct(fields) => {
                let (index, _) = self
                    .modes
                    .field_mode(secondary_mode, &name)
                    .expect("checked field");
                let value = fields
                    .get(index)
                    .cloned()
                    .unwrap_or(Value::Uninit);
                if !value.is_initialised() {
                    return self.error(node, "attempt to use an uninitialised value");
                }
                self.operands.push(value);
                Ok(())
            }
            Value::Row(handle) => {
                let (_, elem) = self
                    .modes
                    .row_of(secondary_mode)
                    .expect("multiple selection");
                let (index, field_mode) =
                    self.modes.field_mode(elem, &name).expect("checked field");
                let field_row = self.select_from_row(handle, index, field_mode)?;
                self.operands.push(field_row);
                Ok(())
            }
            Value::Uninit => self.error(node, "attempt to use an uninitialised value"),
            _ => self.error(node, "a structure was needed"),
        }
    }

    /// Build the row of one field selected from every element.
    fn select_from_row(
        &mut self,
        handle: HandleId,
        field: usize,
        field_mode: ModeId,
    ) -> Eval<Value> {
        let descriptor = self.heap.descriptor(handle).cloned().expect("descriptor");
        let elements = self.row_elements(&descriptor);
        let selected: Vec<Value> = elements
            .into_iter()
            .map(|element| match element {
                Value::Struct(fields) => {
                    fields.get(field).cloned().unwrap_or(Value::Uninit)
                }
                _ => Value::Uninit,
            })
            .collect();
        let count = selected.len() as i64;
        let payload = self.heap.alloc_plain(selected, field_mode);
        let tuples = vec![Tuple {
            lwb: descriptor.tuples.first().map(|t| t.lwb).unwrap_or(1),
            upb: descriptor.tuples.first().map(|t| t.lwb).unwrap_or(1) + count - 1,
            span: 1,
            shift: descriptor.tuples.first().map(|t| t.lwb).unwrap_or(1),
        }];
        let fresh = self.heap.alloc_descriptor(RowDescriptor {
            elem_mode: field_mode,
            tuples,
            payload,
            offset: 0,
        });
        Ok(Value::Row(fresh))
    }

    // ------------------------------------------------------------------------
    // assignation and identity
    // ------------------------------------------------------------------------

    fn eval_assignation(&mut self, node: NodeId) -> Eval<()> {
        let children = self.tree.child_vec(node);
        let [destination, source] = children.as_slice() else {
            return self.error(node, "malformed assignation");
        };
        self.eval(*destination)?;
        self.eval(*source)?;
        let value = self.pop();
        let reference = self.pop_ref(node)?;
        self.assign(node, &reference, value, *destination)?;
        self.operands.push(Value::Ref(reference));
        Ok(())
    }

    /// Store a value through a name, enforcing runtime scope and row-bound
    /// rules.
    fn assign(
        &mut self,
        node: NodeId,
        reference: &RefValue,
        value: Value,
        destination: NodeId,
    ) -> Eval<()> {
        if reference.is_nil() {
            return self.error(node, "NIL cannot be assigned to");
        }
        // A value whose names are younger than the destination would dangle.
        let value_scope = self.value_scope(&value);
        if value_scope > reference.scope {
            return self.error(node, "assigned value would outlive its scope");
        }
        // Heap escape: the destination held something older than the new
        // value; storing the younger name would let it leak upward.
        let old = self.peek_ref(reference);
        if let Some(Value::Ref(old_ref)) = &old {
            if old_ref.scope < value_scope {
                return self.error(node, "scope violation: a frame name escapes to the heap");
            }
        }
        // Row into row: bounds must match unless the destination is
        // flexible.
        if let (Some(Value::Row(old_row)), Value::Row(new_row)) = (&old, &value) {
            let flexible = self
                .tree
                .node(destination)
                .mode
                .and_then(|m| self.modes.ref_target(m))
                .map(|object| self.modes.is_flex(object))
                .unwrap_or(false);
            if !flexible {
                let old_bounds: Vec<(i64, i64)> = self
                    .heap
                    .descriptor(*old_row)
                    .map(|d| d.tuples.iter().map(|t| (t.lwb, t.upb)).collect())
                    .unwrap_or_default();
                let new_bounds: Vec<(i64, i64)> = self
                    .heap
                    .descriptor(*new_row)
                    .map(|d| d.tuples.iter().map(|t| (t.lwb, t.upb)).collect())
                    .unwrap_or_default();
                if old_bounds != new_bounds {
                    return self.error(node, "row bounds of source and destination differ");
                }
            }
        }
        let value = self.copy_value(value);
        self.write_ref(node, reference, value)
    }

    /// The current content of a name, if it is readable; no init checks.
    fn peek_ref(&self, reference: &RefValue) -> Option<Value> {
        let base = match &reference.address {
            Address::Nil => return None,
            Address::Frame {
                index,
                number,
                offset,
            } => self.frames.read(*index, *number, *offset).ok()?.clone(),
            Address::Heap { handle, offset } => self
                .heap
                .payload(*handle)?
                .get(*offset as usize)?
                .clone(),
        };
        let mut value = base;
        for &field in &reference.path {
            value = match value {
                Value::Struct(fields) => fields.get(field as usize)?.clone(),
                _ => return None,
            };
        }
        Some(value)
    }

    fn eval_identity_relation(&mut self, node: NodeId) -> Eval<()> {
        let children = self.tree.child_vec(node);
        let [lhs, rhs] = children.as_slice() else {
            return self.error(node, "malformed identity relation");
        };
        self.eval(*lhs)?;
        self.eval(*rhs)?;
        let right = self.pop();
        let left = self.pop();
        let same = match (left, right) {
            (Value::Ref(l), Value::Ref(r)) => l.address == r.address && l.path == r.path,
            _ => false,
        };
        let result = if self.tree.node(node).info == crate::parser::RELATION_ISNT {
            !same
        } else {
            same
        };
        self.operands.push(Value::Bool(result));
        Ok(())
    }

    /// LOC extends the current frame; HEAP allocates a pinned-by-reach
    /// object. The delivered name records the matching scope.
    fn generate(
        &mut self,
        node: NodeId,
        declarer: Option<NodeId>,
        mode: ModeId,
        qualifier: i64,
    ) -> Eval<RefValue> {
        let value = self.default_value(declarer, mode)?;
        if qualifier == crate::parser::QUALIFIER_HEAP {
            let handle = self.heap.alloc_plain(vec![value], mode);
            Ok(RefValue {
                address: Address::Heap { handle, offset: 0 },
                path: Vec::new(),
                scope: 0,
            })
        } else {
            let level = self
                .frames
                .current()
                .map(|h| h.frame_level)
                .unwrap_or(0);
            match self.frames.loc_alloc(value) {
                Ok((index, number, offset)) => Ok(RefValue {
                    address: Address::Frame {
                        index,
                        number,
                        offset,
                    },
                    path: Vec::new(),
                    scope: level,
                }),
                Err(e) => self.frame_failure(node, e),
            }
        }
    }

    // ------------------------------------------------------------------------
    // clauses
    // ------------------------------------------------------------------------

    fn eval_serial(&mut self, node: NodeId) -> Eval<()> {
        let items = self.tree.child_vec(node);
        let my_table = self.tree.node(node).table;
        let base = self.operands.len();
        let last_unit = items
            .iter()
            .rev()
            .find(|&&item| !is_declaration_or_label(self.tree.node(item).attr))
            .copied();

        let mut index = 0;
        while index < items.len() {
            let item = items[index];
            let attr = self.tree.node(item).attr;
            let result = match attr {
                Attribute::LABEL => {
                    index += 1;
                    continue;
                }
                Attribute::MODE_DECLARATION | Attribute::PRIORITY_DECLARATION => {
                    index += 1;
                    continue;
                }
                Attribute::IDENTITY_DECLARATION => self.elaborate_identity(item),
                Attribute::VARIABLE_DECLARATION => self.elaborate_variable(item),
                Attribute::OPERATOR_DECLARATION => {
                    index += 1;
                    continue;
                }
                Attribute::COMPLETER => {
                    // EXIT: the unit's value completes the clause.
                    self.eval(item)?;
                    let value = self.pop();
                    self.operands.truncate(base);
                    self.operands.push(value);
                    return Ok(());
                }
                _ => self.eval(item).map(|()| {
                    if Some(item) != last_unit {
                        self.pop();
                    }
                }),
            };
            match result {
                Ok(()) => index += 1,
                Err(Interrupt::Jump { label, level: _ })
                    if my_table == Some(self.tabs.tag(label).table) =>
                {
                    self.operands.truncate(base);
                    let target = items.iter().position(|&item| {
                        self.tree.node(item).attr == Attribute::LABEL
                            && self.tree.node(item).tag == Some(label)
                    });
                    match target {
                        Some(position) => index = position + 1,
                        None => {
                            return self.error(node, "label vanished from its range");
                        }
                    }
                }
                Err(other) => {
                    self.operands.truncate(base);
                    return Err(other);
                }
            }
        }
        if self.operands.len() == base {
            self.operands.push(Value::Empty);
        }
        Ok(())
    }

    fn elaborate_identity(&mut self, node: NodeId) -> Eval<()> {
        for child in self.tree.child_vec(node) {
            if self.tree.node(child).attr != Attribute::DEFINING_IDENTIFIER {
                continue;
            }
            let tag_id = self.tree.node(child).tag.expect("collected tag");
            let source = self.tree.child(child, 0).expect("identity source");
            self.eval(source)?;
            let value = self.pop();
            self.store_in_tag(node, tag_id, value)?;
        }
        Ok(())
    }

    fn elaborate_variable(&mut self, node: NodeId) -> Eval<()> {
        let children = self.tree.child_vec(node);
        let declarer = children[0];
        let object_mode = self.tree.node(declarer).mode.expect("declarer mode");
        for &child in &children[1..] {
            if self.tree.node(child).attr != Attribute::DEFINING_IDENTIFIER {
                continue;
            }
            let tag_id = self.tree.node(child).tag.expect("collected tag");
            let qualifier = self.tabs.tag(tag_id).qualifier;
            let reference = self.generate(node, Some(declarer), object_mode, qualifier)?;
            self.store_in_tag(node, tag_id, Value::Ref(reference.clone()))?;
            if let Some(initial) = self.tree.child(child, 0) {
                self.eval(initial)?;
                let value = self.pop();
                self.assign(node, &reference, value, child)?;
            }
        }
        Ok(())
    }

    fn store_in_tag(&mut self, node: NodeId, tag_id: TagId, value: Value) -> Eval<()> {
        let tag = self.tabs.tag(tag_id);
        let level = self.tabs.table(tag.table).level;
        let offset = tag.offset;
        let frame = match self.frames.frame_at_level(level) {
            Ok(frame) => frame,
            Err(e) => return self.frame_failure(node, e),
        };
        let number = self.frames.header(frame).unwrap().frame_number;
        match self.frames.write(frame, number, offset, value) {
            Ok(()) => Ok(()),
            Err(e) => self.frame_failure(node, e),
        }
    }

    fn eval_conditional(&mut self, node: NodeId) -> Eval<()> {
        let children = self.tree.child_vec(node);
        let enquiry = children[0];
        self.in_frame(enquiry, |genie| {
            let serial = genie.tree.child(enquiry, 0).expect("enquiry serial");
            genie.eval(serial)?;
            let condition = genie.pop_bool(enquiry)?;
            let chosen = if condition {
                children
                    .iter()
                    .find(|&&c| genie.tree.node(c).attr == Attribute::THEN_PART)
                    .copied()
            } else {
                // ELSE part, or the (possibly coerced) ELIF chain.
                children
                    .iter()
                    .find(|&&c| {
                        !matches!(
                            genie.tree.node(c).attr,
                            Attribute::ENQUIRY_CLAUSE | Attribute::THEN_PART
                        )
                    })
                    .copied()
            };
            match chosen {
                Some(part)
                    if matches!(
                        genie.tree.node(part).attr,
                        Attribute::THEN_PART | Attribute::ELSE_PART
                    ) =>
                {
                    genie.in_frame(part, |genie| {
                        let serial = genie.tree.child(part, 0).expect("arm serial");
                        genie.eval(serial)
                    })
                }
                Some(nested) => genie.eval(nested),
                None => {
                    genie.operands.push(skip_value(genie.modes, genie.tree, node));
                    Ok(())
                }
            }
        })
    }

    fn eval_case(&mut self, node: NodeId) -> Eval<()> {
        let children = self.tree.child_vec(node);
        let enquiry = children[0];
        self.in_frame(enquiry, |genie| {
            let serial = genie.tree.child(enquiry, 0).expect("enquiry serial");
            genie.eval(serial)?;
            let chosen = genie.pop_int(enquiry)?;
            let arms: Vec<NodeId> = children
                .iter()
                .filter(|&&c| genie.tree.node(c).attr == Attribute::CASE_PART)
                .copied()
                .collect();
            if chosen >= 1 && (chosen as usize) <= arms.len() {
                let arm = arms[chosen as usize - 1];
                return genie.in_frame(arm, |genie| {
                    let unit = genie.tree.child(arm, 0).expect("case arm unit");
                    genie.eval(unit)
                });
            }
            // Out of range: OUT part, nested OUSE, or an undefined yield.
            for &child in &children {
                match genie.tree.node(child).attr {
                    Attribute::OUT_PART => {
                        return genie.in_frame(child, |genie| {
                            let serial =
                                genie.tree.child(child, 0).expect("out serial");
                            genie.eval(serial)
                        });
                    }
                    // The nested OUSE chain, possibly behind a coercion.
                    Attribute::ENQUIRY_CLAUSE | Attribute::CASE_PART => {}
                    _ => return genie.eval(child),
                }
            }
            genie.operands.push(skip_value(genie.modes, genie.tree, node));
            Ok(())
        })
    }

    fn eval_conformity(&mut self, node: NodeId) -> Eval<()> {
        let children = self.tree.child_vec(node);
        let enquiry = children[0];
        self.in_frame(enquiry, |genie| {
            let serial = genie.tree.child(enquiry, 0).expect("enquiry serial");
            genie.eval(serial)?;
            let (tag, value) = match genie.pop() {
                Value::United { tag, value } => (tag, *value),
                Value::Uninit => {
                    return genie.error(node, "attempt to use an uninitialised value");
                }
                _ => return genie.error(node, "a united value was needed"),
            };
            for &child in &children {
                match genie.tree.node(child).attr {
                    Attribute::SPECIFIED_UNIT => {
                        let declarer =
                            genie.tree.child(child, 0).expect("specifier declarer");
                        let specified =
                            genie.tree.node(declarer).mode.expect("specifier mode");
                        if !conforms(genie.modes, tag, specified) {
                            continue;
                        }
                        return genie.in_frame(child, |genie| {
                            if genie.tree.node(child).symbol.is_some() {
                                let tag_id =
                                    genie.tree.node(child).tag.expect("specifier tag");
                                let stored = if genie.modes.is_union(
                                    genie.modes.chase(specified),
                                ) {
                                    Value::United {
                                        tag,
                                        value: Box::new(value.clone()),
                                    }
                                } else {
                                    value.clone()
                                };
                                genie.store_in_tag(child, tag_id, stored)?;
                            }
                            let unit = genie
                                .tree
                                .children(child)
                                .last()
                                .expect("specified unit");
                            genie.eval(unit)
                        });
                    }
                    Attribute::OUT_PART => {
                        return genie.in_frame(child, |genie| {
                            let serial =
                                genie.tree.child(child, 0).expect("out serial");
                            genie.eval(serial)
                        });
                    }
                    Attribute::ENQUIRY_CLAUSE => {}
                    // The nested OUSE chain re-evaluates its own enquiry;
                    // it may sit behind a coercion wrapper.
                    _ => return genie.eval(child),
                }
            }
            genie.operands.push(skip_value(genie.modes, genie.tree, node));
            Ok(())
        })
    }

    fn eval_loop(&mut self, node: NodeId) -> Eval<()> {
        let children = self.tree.child_vec(node);
        let part = |attr: Attribute| {
            children
                .iter()
                .find(|&&c| self.tree.node(c).attr == attr)
                .copied()
        };
        let for_part = part(Attribute::FOR_PART);
        let from_part = part(Attribute::FROM_PART);
        let by_part = part(Attribute::BY_PART);
        let to_part = part(Attribute::TO_PART);
        let while_part = part(Attribute::WHILE_PART);
        let do_part = part(Attribute::DO_PART).expect("loop DO part");
        let until_part = part(Attribute::UNTIL_PART);

        let mut counter = match from_part {
            Some(part) => {
                let unit = self.tree.child(part, 0).expect("FROM unit");
                self.eval(unit)?;
                self.pop_int(part)?
            }
            None => 1,
        };
        let by = match by_part {
            Some(part) => {
                let unit = self.tree.child(part, 0).expect("BY unit");
                self.eval(unit)?;
                self.pop_int(part)?
            }
            None => 1,
        };
        let to = match to_part {
            Some(part) => {
                let unit = self.tree.child(part, 0).expect("TO unit");
                self.eval(unit)?;
                Some(self.pop_int(part)?)
            }
            None => None,
        };

        self.in_frame(node, |genie| {
            let for_tag = for_part.map(|part| genie.tree.node(part).tag.expect("FOR tag"));
            loop {
                // Loop boundary: a safe point to collect.
                genie.heap.maybe_collect(&genie.frames, &genie.operands);
                if let Some(to) = to {
                    if (by >= 0 && counter > to) || (by < 0 && counter < to) {
                        break;
                    }
                }
                if let Some(tag) = for_tag {
                    genie.store_in_tag(node, tag, Value::Int(counter))?;
                }
                let proceed = genie.iterate(while_part, do_part, until_part)?;
                if !proceed {
                    break;
                }
                counter = match counter.checked_add(by) {
                    Some(next) => next,
                    None => return genie.error(node, "loop counter overflow"),
                };
            }
            genie.operands.push(Value::Empty);
            Ok(())
        })
    }

    /// One loop iteration; false stops the loop (WHILE or UNTIL said so).
    fn iterate(
        &mut self,
        while_part: Option<NodeId>,
        do_part: NodeId,
        until_part: Option<NodeId>,
    ) -> Eval<bool> {
        match while_part {
            Some(while_part) => self.in_frame(while_part, |genie| {
                let serial = genie.tree.child(while_part, 0).expect("WHILE serial");
                genie.eval(serial)?;
                if !genie.pop_bool(while_part)? {
                    return Ok(false);
                }
                genie.run_do_part(do_part, until_part)
            }),
            None => self.run_do_part(do_part, until_part),
        }
    }

    fn run_do_part(&mut self, do_part: NodeId, until_part: Option<NodeId>) -> Eval<bool> {
        self.in_frame(do_part, |genie| {
            let serial = genie.tree.child(do_part, 0).expect("DO serial");
            genie.eval(serial)?;
            genie.pop();
            match until_part {
                Some(until_part) => genie.in_frame(until_part, |genie| {
                    let serial = genie.tree.child(until_part, 0).expect("UNTIL serial");
                    genie.eval(serial)?;
                    Ok(!genie.pop_bool(until_part)?)
                }),
                None => Ok(true),
            }
        })
    }

    fn eval_collateral(&mut self, node: NodeId) -> Eval<()> {
        let units = self.tree.child_vec(node);
        let mode = self
            .tree
            .node(node)
            .mode
            .map(|m| self.modes.chase(m))
            .unwrap_or(self.modes.void_mode);
        if self.modes.is_struct(mode) {
            for &unit in &units {
                self.eval(unit)?;
            }
            let mut fields = Vec::with_capacity(units.len());
            for _ in 0..units.len() {
                fields.push(self.pop());
            }
            fields.reverse();
            self.operands.push(Value::Struct(fields.into_boxed_slice()));
            return Ok(());
        }
        if let Some((dims, elem)) = self.modes.row_of(mode) {
            for &unit in &units {
                self.eval(unit)?;
            }
            let mut elements = Vec::with_capacity(units.len());
            for _ in 0..units.len() {
                elements.push(self.pop());
            }
            elements.reverse();
            if dims <= 1 {
                let row = self.alloc_row(elements, elem);
                self.operands.push(Value::Row(row));
                return Ok(());
            }
            return self.merge_row_display(node, elements, dims, elem);
        }
        // Void collateral.
        for &unit in &units {
            self.eval(unit)?;
            self.pop();
        }
        self.operands.push(Value::Empty);
        Ok(())
    }

    /// Flatten sub-rows of a multi-dimensional display into one payload.
    fn merge_row_display(
        &mut self,
        node: NodeId,
        elements: Vec<Value>,
        dims: u32,
        elem: ModeId,
    ) -> Eval<()> {
        let mut inner_tuples: Option<Vec<Tuple>> = None;
        let mut flat: Vec<Value> = Vec::new();
        for element in &elements {
            let handle = match element {
                Value::Row(handle) => *handle,
                _ => return self.error(node, "a row display element was needed"),
            };
            let descriptor = self.heap.descriptor(handle).cloned().expect("descriptor");
            let bounds: Vec<Tuple> = dense_tuples(&descriptor.tuples);
            match &inner_tuples {
                None => inner_tuples = Some(bounds),
                Some(existing) => {
                    let same = existing.len() == bounds.len()
                        && existing
                            .iter()
                            .zip(&bounds)
                            .all(|(a, b)| a.lwb == b.lwb && a.upb == b.upb);
                    if !same {
                        return self.error(node, "row display rows have differing bounds");
                    }
                }
            }
            flat.extend(self.row_elements(&descriptor));
        }
        let inner = inner_tuples.unwrap_or_default();
        let outer_count = elements.len() as i64;
        let inner_count: i64 = inner.iter().map(Tuple::count).product();
        let payload = self.heap.alloc_plain(flat, elem);
        let mut tuples = vec![Tuple {
            lwb: 1,
            upb: outer_count,
            span: inner_count.max(1),
            shift: inner_count.max(1),
        }];
        tuples.extend(dense_tuples(&inner));
        debug_assert_eq!(tuples.len() as u32, dims);
        let descriptor = self.heap.alloc_descriptor(RowDescriptor {
            elem_mode: elem,
            tuples,
            payload,
            offset: 0,
        });
        self.operands.push(Value::Row(descriptor));
        Ok(())
    }
}

/// Store `value` through a fat pointer, walking the access path into
/// structured slots.
fn write_through(
    frames: &mut FrameStack,
    heap: &mut Heap,
    reference: &RefValue,
    value: Value,
    span: crate::base::Span,
) -> Eval<()> {
    let fail = |message: &str| {
        Err(Interrupt::Error(Diagnostic::runtime_error(
            span,
            message.to_string(),
        )))
    };
    let slot: &mut Value = match &reference.address {
        Address::Nil => return fail("NIL cannot be assigned to"),
        Address::Frame {
            index,
            number,
            offset,
        } => {
            let raw = match frames.locate(*index, *number, *offset) {
                Ok(raw) => raw,
                Err(_) => return fail("reference outlived its scope"),
            };
            frames.slot_mut(raw)
        }
        Address::Heap { handle, offset } => {
            let offset = *offset as usize;
            let in_range = heap
                .payload(*handle)
                .is_some_and(|payload| offset < payload.len());
            if !in_range {
                return fail("reference outlived its scope");
            }
            &mut heap.payload_mut(*handle).expect("payload checked")[offset]
        }
    };
    let mut target = slot;
    for &field in &reference.path {
        let fields = match target {
            Value::Struct(fields) => fields,
            _ => return fail("access into a value that is not structured"),
        };
        target = match fields.get_mut(field as usize) {
            Some(inner) => inner,
            None => return fail("access into a missing field"),
        };
    }
    *target = value;
    Ok(())
}

/// Does a runtime united tag conform to a specifier mode?
fn conforms(modes: &ModeTable, tag: ModeId, specified: ModeId) -> bool {
    if modes.modes_equivalent(tag, specified) {
        return true;
    }
    match modes.members_of(modes.chase(specified)) {
        Some(members) => members.iter().any(|&m| modes.modes_equivalent(m, tag)),
        None => false,
    }
}

/// The undefined yield of a clause whose chosen branch is missing.
fn skip_value(modes: &ModeTable, tree: &Tree, node: NodeId) -> Value {
    match tree.node(node).mode {
        Some(mode) if modes.is_void(mode) => Value::Empty,
        _ => Value::Uninit,
    }
}

fn is_declaration_or_label(attr: Attribute) -> bool {
    matches!(
        attr,
        Attribute::LABEL
            | Attribute::MODE_DECLARATION
            | Attribute::PRIORITY_DECLARATION
            | Attribute::IDENTITY_DECLARATION
            | Attribute::VARIABLE_DECLARATION
            | Attribute::OPERATOR_DECLARATION
    )
}

/// Recompute row-major spans and shifts for freshly owned payloads.
fn dense_tuples(tuples: &[Tuple]) -> Vec<Tuple> {
    let mut out: Vec<Tuple> = tuples.to_vec();
    let mut span = 1i64;
    for tuple in out.iter_mut().rev() {
        tuple.span = span;
        tuple.shift = tuple.lwb * span;
        span *= tuple.count().max(0);
    }
    out
}
