//! The mode checker.
//!
//! A recursive descent on units. Each unit's deduced mode lands in its
//! node's mode slot; the coercion a context demands is recorded as a
//! requirement `(sort, target mode)` against the node, for the inserter to
//! wrap in a second pass. Multi-branch clauses deduce their branches free of
//! context, balance, and then require each branch to deliver the balanced
//! mode; the clause itself then behaves like any other unit.

use rustc_hash::FxHashMap;
use tracing::trace;

use crate::base::{Diagnostic, Diagnostics};
use crate::mode::{DeflexRegime, ModeId, ModeShape, ModeTable, Sort};
use crate::tree::{Attribute, NodeId, NodeStatus, Tree};

use super::declarations::routine_mode;
use super::symbol_table::SymbolTables;

/// The semantic id of a checked unit: the context's sort, the deduced mode,
/// and the attribute it sprang from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Soid {
    pub sort: Sort,
    pub mode: ModeId,
    pub attribute: Attribute,
}

/// Coercions demanded by context, keyed by the node to wrap.
pub type Requirements = FxHashMap<NodeId, (Sort, ModeId)>;

pub struct Checker<'a> {
    pub tree: &'a mut Tree,
    pub modes: &'a mut ModeTable,
    pub tabs: &'a mut SymbolTables,
    pub diagnostics: &'a mut Diagnostics,
    /// Treat `longsqrt` as `sqrt` when no exact tag matches.
    pub lengthety_mapping: bool,
    requirements: Requirements,
}

impl<'a> Checker<'a> {
    pub fn new(
        tree: &'a mut Tree,
        modes: &'a mut ModeTable,
        tabs: &'a mut SymbolTables,
        diagnostics: &'a mut Diagnostics,
        lengthety_mapping: bool,
    ) -> Self {
        Self {
            tree,
            modes,
            tabs,
            diagnostics,
            lengthety_mapping,
            requirements: Requirements::default(),
        }
    }

    /// Check the particular program; it yields VOID.
    pub fn check_program(mut self) -> Requirements {
        if let Some(root) = self.tree.root() {
            let void = self.modes.void_mode;
            if let Some(serial) = self.tree.child(root, 0) {
                self.check_unit(serial, Sort::Strong, Some(void));
            }
            self.tree.node_mut(root).mode = Some(void);
        }
        self.requirements
    }

    // ========================================================================
    // THE CONTRACT
    // ========================================================================

    /// Deduce the unit's mode, then record what the context demands.
    /// Returns the mode the unit delivers to its context.
    pub fn check_unit(&mut self, node: NodeId, sort: Sort, required: Option<ModeId>) -> ModeId {
        let deduced = self.deduce(node, sort, required);
        self.tree.node_mut(node).mode = Some(deduced);
        match required {
            Some(target) => {
                self.require(node, sort, target);
                target
            }
            None => deduced,
        }
    }

    /// The unit's soid, as consumed by enclosing constructs.
    pub fn soid_of(&self, node: NodeId, sort: Sort) -> Option<Soid> {
        Some(Soid {
            sort,
            mode: self.tree.node(node).mode?,
            attribute: self.tree.node(node).attr,
        })
    }

    fn require(&mut self, node: NodeId, sort: Sort, target: ModeId) {
        let current = self
            .tree
            .node(node)
            .mode
            .expect("deduced before requiring");
        let chain = self
            .modes
            .coercion_chain(current, target, sort, DeflexRegime::Safe);
        if chain.is_none() {
            self.diagnostics.push(Diagnostic::error(
                self.tree.node(node).span,
                format!(
                    "cannot coerce {} to {} in a {} context",
                    self.modes.describe(current),
                    self.modes.describe(target),
                    sort_name(sort),
                ),
            ));
            return;
        }
        trace!(node = node.index(), "requirement recorded");
        self.requirements.insert(node, (sort, target));
    }

    // ========================================================================
    // DEDUCTION
    // ========================================================================

    fn deduce(&mut self, node: NodeId, sort: Sort, required: Option<ModeId>) -> ModeId {
        match self.tree.node(node).attr {
            Attribute::INT_DENOTATION => {
                let sizety = self.tree.node(node).info as i8;
                self.modes.standard(crate::mode::Primitive::Int, sizety)
            }
            Attribute::REAL_DENOTATION => {
                let sizety = self.tree.node(node).info as i8;
                self.modes.standard(crate::mode::Primitive::Real, sizety)
            }
            Attribute::BITS_DENOTATION => {
                let sizety = self.tree.node(node).info as i8;
                self.modes.standard(crate::mode::Primitive::Bits, sizety)
            }
            Attribute::BOOL_DENOTATION => self.modes.bool_mode,
            Attribute::CHAR_DENOTATION => self.modes.char_mode,
            Attribute::STRING_DENOTATION => self.modes.row_of_char_mode,
            Attribute::SKIP | Attribute::NIHIL => self.modes.hip_mode,
            Attribute::IDENTIFIER => self.deduce_identifier(node),
            Attribute::JUMP => self.deduce_jump(node),
            Attribute::FORMULA => self.deduce_formula(node),
            Attribute::MONADIC_FORMULA => self.deduce_monadic(node),
            Attribute::CALL => self.deduce_call(node),
            Attribute::SLICE => self.deduce_slice(node),
            Attribute::SELECTION => self.deduce_selection(node),
            Attribute::ASSIGNATION => self.deduce_assignation(node),
            Attribute::IDENTITY_RELATION => self.deduce_identity_relation(node),
            Attribute::CAST => self.deduce_cast(node),
            Attribute::ROUTINE_TEXT => self.deduce_routine_text(node),
            Attribute::GENERATOR => self.deduce_generator(node),
            Attribute::SERIAL_CLAUSE => self.deduce_serial(node, sort),
            Attribute::CLOSED_CLAUSE => {
                let serial = self.tree.child(node, 0).expect("closed serial");
                self.check_unit(serial, sort, None)
            }
            Attribute::CONDITIONAL_CLAUSE => self.deduce_conditional(node, sort),
            Attribute::CASE_CLAUSE => self.deduce_case(node, sort),
            Attribute::CONFORMITY_CLAUSE => self.deduce_conformity(node, sort),
            Attribute::LOOP_CLAUSE => self.deduce_loop(node),
            Attribute::COLLATERAL_CLAUSE => self.deduce_collateral(node, required),
            Attribute::PARALLEL_CLAUSE => {
                let void = self.modes.void_mode;
                for arm in self.tree.child_vec(node) {
                    self.check_unit(arm, Sort::Strong, Some(void));
                }
                void
            }
            Attribute::COMPLETER => {
                let unit = self.tree.child(node, 0).expect("completer unit");
                self.check_unit(unit, sort, required)
            }
            Attribute::ERROR => self.modes.hip_mode,
            other => {
                trace!(?other, "unit attribute with no deduction rule");
                self.modes.hip_mode
            }
        }
    }

    fn deduce_identifier(&mut self, node: NodeId) -> ModeId {
        let scope = self.tree.node(node).table.expect("stamped identifier");
        let name = self.tree.node(node).symbol.clone().expect("identifier");
        let mut tag = self.tabs.lookup_identifier(scope, &name);
        if tag.is_none() && self.lengthety_mapping {
            // short sqrt / long sqrt map onto the bare mathematical name.
            let mut bare = name.as_str();
            loop {
                if let Some(rest) = bare.strip_prefix("long") {
                    bare = rest;
                } else if let Some(rest) = bare.strip_prefix("short") {
                    bare = rest;
                } else {
                    break;
                }
            }
            if bare != name.as_str() {
                tag = self.tabs.lookup_identifier(scope, bare);
            }
        }
        match tag {
            Some(tag) => {
                self.tabs.tag_mut(tag).used = true;
                self.tree.node_mut(node).tag = Some(tag);
                self.tabs.tag(tag).mode.unwrap_or(self.modes.hip_mode)
            }
            None => {
                self.diagnostics.push(Diagnostic::error(
                    self.tree.node(node).span,
                    format!("{name} has not been declared"),
                ));
                let anon = self.tabs.anonymous(name, scope);
                self.tree.node_mut(node).tag = Some(anon);
                self.modes.hip_mode
            }
        }
    }

    fn deduce_jump(&mut self, node: NodeId) -> ModeId {
        let scope = self.tree.node(node).table.expect("stamped jump");
        let name = self.tree.node(node).symbol.clone().expect("jump label");
        match self.tabs.lookup_label(scope, &name) {
            Some(tag) => {
                self.tabs.tag_mut(tag).used = true;
                self.tree.node_mut(node).tag = Some(tag);
            }
            None => self.diagnostics.push(Diagnostic::error(
                self.tree.node(node).span,
                format!("label {name} has not been declared"),
            )),
        }
        self.modes.hip_mode
    }

    // ------------------------------------------------------------------------
    // formulas
    // ------------------------------------------------------------------------

    fn deduce_formula(&mut self, node: NodeId) -> ModeId {
        let children = self.tree.child_vec(node);
        let [lhs, operator, rhs] = children.as_slice() else {
            return self.modes.hip_mode;
        };
        let (lhs, operator, rhs) = (*lhs, *operator, *rhs);
        let lm = self.check_unit(lhs, Sort::Firm, None);
        let rm = self.check_unit(rhs, Sort::Firm, None);
        self.resolve_operator(node, operator, &[(lhs, lm), (rhs, rm)])
    }

    fn deduce_monadic(&mut self, node: NodeId) -> ModeId {
        let children = self.tree.child_vec(node);
        let [operator, operand] = children.as_slice() else {
            return self.modes.hip_mode;
        };
        let (operator, operand) = (*operator, *operand);
        let m = self.check_unit(operand, Sort::Firm, None);
        self.resolve_operator(node, operator, &[(operand, m)])
    }

    /// Operator identification: innermost range outward under the firm
    /// context; the standard environ is retried strongly so widening can
    /// reach the vector overloads.
    fn resolve_operator(
        &mut self,
        formula: NodeId,
        operator: NodeId,
        operands: &[(NodeId, ModeId)],
    ) -> ModeId {
        let scope = self.tree.node(formula).table.expect("stamped formula");
        let name = self.tree.node(operator).symbol.clone().expect("operator");
        let candidates = self.tabs.operator_candidates(scope, &name);
        for sort in [Sort::Firm, Sort::Strong] {
            for &tag in &candidates {
                let Some(mode) = self.tabs.tag(tag).mode else {
                    continue;
                };
                let (params, result) = match self.modes.shape(mode).clone() {
                    ModeShape::Proc { params, result } => (params, result),
                    _ => continue,
                };
                if params.len() != operands.len() {
                    continue;
                }
                let fits = operands.iter().zip(&params).all(|(&(_, m), &p)| {
                    self.modes.coercible(m, p, sort, DeflexRegime::Safe)
                });
                if !fits {
                    continue;
                }
                for (&(operand, _), &param) in operands.iter().zip(&params) {
                    self.require(operand, sort, param);
                }
                self.tabs.tag_mut(tag).used = true;
                self.tree.node_mut(operator).tag = Some(tag);
                return self.modes.chase(result);
            }
        }
        let shown: Vec<String> = operands
            .iter()
            .map(|&(_, m)| self.modes.describe(m))
            .collect();
        self.diagnostics.push(Diagnostic::error(
            self.tree.node(operator).span,
            format!("no operator {} matches ({})", name, shown.join(", ")),
        ));
        self.modes.hip_mode
    }

    // ------------------------------------------------------------------------
    // calls, slices, selections
    // ------------------------------------------------------------------------

    /// The meek dereference/deprocedure spine of a mode, itself first.
    fn meek_spine(&self, from: ModeId) -> Vec<ModeId> {
        let mut spine = vec![self.modes.chase(from)];
        let mut current = self.modes.chase(from);
        loop {
            if let Some(target) = self.modes.ref_target(current) {
                current = target;
            } else if let Some(result) = self.modes.proc_result(current) {
                current = result;
            } else {
                break;
            }
            spine.push(current);
        }
        spine
    }

    fn deduce_call(&mut self, node: NodeId) -> ModeId {
        let children = self.tree.child_vec(node);
        let primary = children[0];
        let arguments = &children[1..];
        let pm = self.check_unit(primary, Sort::Meek, None);

        let target = self.meek_spine(pm).into_iter().find_map(|m| {
            match self.modes.shape(m).clone() {
                ModeShape::Proc { params, result } if !params.is_empty() => {
                    Some((m, params, result))
                }
                _ => None,
            }
        });
        let Some((proc_mode, params, result)) = target else {
            self.diagnostics.push(Diagnostic::error(
                self.tree.node(node).span,
                format!("cannot call a value of mode {}", self.modes.describe(pm)),
            ));
            return self.modes.hip_mode;
        };
        self.require(primary, Sort::Meek, proc_mode);

        if params.len() == arguments.len() {
            for (&argument, &param) in arguments.iter().zip(&params) {
                self.check_unit(argument, Sort::Strong, Some(param));
            }
        } else if params.len() == 1 && self.modes.is_row(params[0]) {
            // A single row parameter packs extra arguments as a display;
            // this is how the transput routines take their lists.
            let (dims, elem) = self.modes.row_of(params[0]).expect("row parameter");
            let target = if dims > 1 {
                self.modes.row(dims - 1, elem)
            } else {
                elem
            };
            for &argument in arguments {
                self.check_unit(argument, Sort::Strong, Some(target));
            }
            self.tree.node_mut(node).info = 1;
        } else {
            self.diagnostics.push(Diagnostic::error(
                self.tree.node(node).span,
                format!(
                    "{} arguments offered where {} parameters are declared",
                    arguments.len(),
                    params.len()
                ),
            ));
        }
        self.modes.chase(result)
    }

    fn deduce_slice(&mut self, node: NodeId) -> ModeId {
        let children = self.tree.child_vec(node);
        let primary = children[0];
        let scripts = &children[1..];
        let pm = self.check_unit(primary, Sort::Weak, None);

        // Weakly reach either a name of a row or a row value.
        let mut target = None;
        let mut current = self.modes.chase(pm);
        loop {
            if let Some(t) = self.modes.ref_target(current) {
                if self.modes.is_row(t) {
                    target = Some((current, t, true));
                    break;
                }
                current = t;
            } else if self.modes.is_row(current) {
                target = Some((current, current, false));
                break;
            } else if let Some(result) = self.modes.proc_result(current) {
                current = result;
            } else {
                break;
            }
        }
        let Some((target_mode, row_mode, is_name)) = target else {
            self.diagnostics.push(Diagnostic::error(
                self.tree.node(node).span,
                format!("cannot slice a value of mode {}", self.modes.describe(pm)),
            ));
            return self.modes.hip_mode;
        };
        self.require(primary, Sort::Weak, target_mode);

        let (dims, elem) = self.modes.row_of(row_mode).expect("row mode");
        let mut subscripts = 0u32;
        let mut trimmers = 0u32;
        let int = self.modes.int_mode;
        for &script in scripts {
            match self.tree.node(script).attr {
                Attribute::SUBSCRIPT => {
                    subscripts += 1;
                    let unit = self.tree.child(script, 0).expect("subscript unit");
                    self.check_unit(unit, Sort::Meek, Some(int));
                }
                Attribute::TRIMMER => {
                    trimmers += 1;
                    for bound in self.tree.child_vec(script) {
                        self.check_unit(bound, Sort::Meek, Some(int));
                    }
                }
                _ => {}
            }
        }
        if subscripts + trimmers != dims {
            self.diagnostics.push(Diagnostic::error(
                self.tree.node(node).span,
                format!(
                    "{} subscripts offered where the row has {} dimensions",
                    subscripts + trimmers,
                    dims
                ),
            ));
        }
        let base = if trimmers == 0 {
            elem
        } else {
            self.modes.row(trimmers, elem)
        };
        if is_name {
            if trimmers > 0 {
                self.tree.node_mut(node).status |= NodeStatus::TRANSIENT;
            }
            self.modes.reference_to(base)
        } else {
            base
        }
    }

    fn deduce_selection(&mut self, node: NodeId) -> ModeId {
        let secondary = self.tree.child(node, 0).expect("selected secondary");
        let name = self.tree.node(node).symbol.clone().expect("selector");
        let sm = self.check_unit(secondary, Sort::Weak, None);

        let mut current = self.modes.chase(sm);
        loop {
            // A name of a structure selects a name of the field.
            if let Some(t) = self.modes.ref_target(current) {
                if self.modes.is_struct(t) {
                    return match self.modes.field_mode(t, &name) {
                        Some((_, field)) => {
                            self.require(secondary, Sort::Weak, current);
                            self.modes.reference_to(field)
                        }
                        None => self.unknown_field(node, &name, t),
                    };
                }
                if self.modes.row_of(t).is_some() {
                    // A name of a multiple selects a name of the field rows.
                    let (dims, elem) = self.modes.row_of(t).expect("row");
                    if self.modes.is_struct(elem) {
                        return match self.modes.field_mode(elem, &name) {
                            Some((_, field)) => {
                                self.require(secondary, Sort::Weak, current);
                                let rows = self.modes.row(dims, field);
                                self.modes.reference_to(rows)
                            }
                            None => self.unknown_field(node, &name, elem),
                        };
                    }
                }
                current = t;
                continue;
            }
            if self.modes.is_struct(current) {
                return match self.modes.field_mode(current, &name) {
                    Some((_, field)) => {
                        self.require(secondary, Sort::Weak, current);
                        field
                    }
                    None => self.unknown_field(node, &name, current),
                };
            }
            if let Some((dims, elem)) = self.modes.row_of(current) {
                if self.modes.is_struct(elem) {
                    return match self.modes.field_mode(elem, &name) {
                        Some((_, field)) => {
                            self.require(secondary, Sort::Weak, current);
                            self.modes.row(dims, field)
                        }
                        None => self.unknown_field(node, &name, elem),
                    };
                }
            }
            if let Some(result) = self.modes.proc_result(current) {
                current = result;
                continue;
            }
            break;
        }
        self.diagnostics.push(Diagnostic::error(
            self.tree.node(node).span,
            format!(
                "cannot select {} from a value of mode {}",
                name,
                self.modes.describe(sm)
            ),
        ));
        self.modes.hip_mode
    }

    fn unknown_field(&mut self, node: NodeId, name: &str, structure: ModeId) -> ModeId {
        self.diagnostics.push(Diagnostic::error(
            self.tree.node(node).span,
            format!(
                "mode {} has no field {}",
                self.modes.describe(structure),
                name
            ),
        ));
        self.modes.hip_mode
    }

    // ------------------------------------------------------------------------
    // assignation, identity, casts, routines, generators
    // ------------------------------------------------------------------------

    fn deduce_assignation(&mut self, node: NodeId) -> ModeId {
        let children = self.tree.child_vec(node);
        let [destination, source] = children.as_slice() else {
            return self.modes.hip_mode;
        };
        let (destination, source) = (*destination, *source);
        let dm = self.check_unit(destination, Sort::Soft, None);

        // Soft context: only deproceduring reaches the name.
        let name_mode = {
            let mut current = self.modes.chase(dm);
            loop {
                if self.modes.is_ref(current) {
                    break Some(current);
                }
                match self.modes.proc_result(current) {
                    Some(result) => current = result,
                    None => break None,
                }
            }
        };
        let Some(name_mode) = name_mode else {
            self.diagnostics.push(Diagnostic::error(
                self.tree.node(node).span,
                format!(
                    "cannot assign to a value of mode {}",
                    self.modes.describe(dm)
                ),
            ));
            return self.modes.hip_mode;
        };
        self.require(destination, Sort::Soft, name_mode);
        let object = self.modes.ref_target(name_mode).expect("a name refers");
        self.check_unit(source, Sort::Strong, Some(object));
        name_mode
    }

    fn deduce_identity_relation(&mut self, node: NodeId) -> ModeId {
        let children = self.tree.child_vec(node);
        let [lhs, rhs] = children.as_slice() else {
            return self.modes.hip_mode;
        };
        let (lhs, rhs) = (*lhs, *rhs);
        let lm = self.check_unit(lhs, Sort::Soft, None);
        let rm = self.check_unit(rhs, Sort::Soft, None);
        let bool_mode = self.modes.bool_mode;

        let left_name = self.soft_name(lm);
        let right_name = self.soft_name(rm);
        match (left_name, right_name) {
            (Some(l), Some(r)) => {
                if self.modes.modes_equivalent(l, r) {
                    self.require(lhs, Sort::Soft, l);
                    self.require(rhs, Sort::Soft, r);
                } else if self.modes.coercible(lm, r, Sort::Strong, DeflexRegime::Safe) {
                    // One side names a name: it dereferences to meet the
                    // softer side's mode.
                    self.require(lhs, Sort::Strong, r);
                    self.require(rhs, Sort::Soft, r);
                } else if self.modes.coercible(rm, l, Sort::Strong, DeflexRegime::Safe) {
                    self.require(lhs, Sort::Soft, l);
                    self.require(rhs, Sort::Strong, l);
                } else {
                    self.diagnostics.push(Diagnostic::error(
                        self.tree.node(node).span,
                        format!(
                            "identity relation between unrelated names {} and {}",
                            self.modes.describe(l),
                            self.modes.describe(r)
                        ),
                    ));
                }
            }
            (Some(l), None) => {
                self.require(lhs, Sort::Soft, l);
                self.require(rhs, Sort::Strong, l);
            }
            (None, Some(r)) => {
                self.require(lhs, Sort::Strong, r);
                self.require(rhs, Sort::Soft, r);
            }
            (None, None) => {
                self.diagnostics.push(Diagnostic::error(
                    self.tree.node(node).span,
                    "an identity relation compares names",
                ));
            }
        }
        bool_mode
    }

    /// The name reached softly, when there is one. HIP (NIL) gives none.
    fn soft_name(&self, m: ModeId) -> Option<ModeId> {
        let mut current = self.modes.chase(m);
        loop {
            if self.modes.is_ref(current) {
                return Some(current);
            }
            current = self.modes.proc_result(current)?;
        }
    }

    fn deduce_cast(&mut self, node: NodeId) -> ModeId {
        let declarer = self.tree.child(node, 0).expect("cast declarer");
        let enclosed = self.tree.child(node, 1).expect("cast enclosed clause");
        let target = self
            .tree
            .node(declarer)
            .mode
            .expect("declarer mode from collection");
        self.check_bounds(declarer);
        self.check_unit(enclosed, Sort::Strong, Some(target));
        target
    }

    fn deduce_routine_text(&mut self, node: NodeId) -> ModeId {
        let mode = match self.tree.node(node).mode {
            Some(mode) => mode,
            None => routine_mode(self.tree, self.modes, self.tabs, self.diagnostics, node),
        };
        let result = match self.modes.shape(mode) {
            ModeShape::Proc { result, .. } => self.modes.chase(*result),
            _ => self.modes.hip_mode,
        };
        for child in self.tree.child_vec(node) {
            if self.tree.node(child).attr == Attribute::PARAMETER {
                self.check_bounds(child);
            }
        }
        let body = self
            .tree
            .children(node)
            .last()
            .expect("routine body");
        self.check_unit(body, Sort::Strong, Some(result));
        mode
    }

    fn deduce_generator(&mut self, node: NodeId) -> ModeId {
        let declarer = self.tree.child(node, 0).expect("generator declarer");
        let object = self
            .tree
            .node(declarer)
            .mode
            .expect("declarer mode from collection");
        self.check_bounds(declarer);
        self.modes.reference_to(object)
    }

    /// Bound units inside an actual declarer are meek integers.
    pub fn check_bounds(&mut self, declarer: NodeId) {
        let int = self.modes.int_mode;
        for node in self.tree.descendants(declarer) {
            if self.tree.node(node).attr == Attribute::BOUND_PAIR {
                for bound in self.tree.child_vec(node) {
                    self.check_unit(bound, Sort::Meek, Some(int));
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // clauses
    // ------------------------------------------------------------------------

    /// Serial clause: declarations and voided units, then the yield.
    /// Completers yield alongside the final unit and balance with it.
    fn deduce_serial(&mut self, node: NodeId, sort: Sort) -> ModeId {
        let void = self.modes.void_mode;
        let items: Vec<NodeId> = self
            .tree
            .child_vec(node)
            .into_iter()
            .filter(|&c| {
                !matches!(
                    self.tree.node(c).attr,
                    Attribute::LABEL
                        | Attribute::MODE_DECLARATION
                        | Attribute::PRIORITY_DECLARATION
                        | Attribute::IDENTITY_DECLARATION
                        | Attribute::VARIABLE_DECLARATION
                        | Attribute::OPERATOR_DECLARATION
                )
            })
            .collect();
        for child in self.tree.child_vec(node) {
            match self.tree.node(child).attr {
                Attribute::MODE_DECLARATION
                | Attribute::PRIORITY_DECLARATION
                | Attribute::IDENTITY_DECLARATION
                | Attribute::VARIABLE_DECLARATION
                | Attribute::OPERATOR_DECLARATION => self.check_declaration(child),
                _ => {}
            }
        }

        let mut yields: Vec<(NodeId, ModeId)> = Vec::new();
        let last = items.last().copied();
        for &item in &items {
            let is_last = Some(item) == last;
            let is_completer = self.tree.node(item).attr == Attribute::COMPLETER;
            if is_last || is_completer {
                let unit = if is_completer {
                    self.tree.child(item, 0).expect("completer unit")
                } else {
                    item
                };
                let m = self.check_unit(unit, sort, None);
                yields.push((unit, m));
            } else {
                self.check_unit(item, Sort::Strong, Some(void));
            }
        }
        // A trailing declaration leaves the clause void.
        let last_is_declaration = self
            .tree
            .children(node)
            .last()
            .map(|c| {
                matches!(
                    self.tree.node(c).attr,
                    Attribute::MODE_DECLARATION
                        | Attribute::PRIORITY_DECLARATION
                        | Attribute::IDENTITY_DECLARATION
                        | Attribute::VARIABLE_DECLARATION
                        | Attribute::OPERATOR_DECLARATION
                )
            })
            .unwrap_or(true);
        if last_is_declaration || yields.is_empty() {
            for &(unit, _) in &yields {
                self.require(unit, Sort::Strong, void);
            }
            return void;
        }
        self.balance_yields(node, sort, &yields)
    }

    /// Balance several yields and require each to deliver the result.
    fn balance_yields(
        &mut self,
        clause: NodeId,
        sort: Sort,
        yields: &[(NodeId, ModeId)],
    ) -> ModeId {
        if let [(_, only)] = yields {
            return *only;
        }
        let branch_modes: Vec<ModeId> = yields.iter().map(|&(_, m)| m).collect();
        match self.modes.balance(&branch_modes, DeflexRegime::Safe) {
            Some(balanced) => {
                for &(unit, _) in yields {
                    self.require(unit, sort, balanced);
                }
                balanced
            }
            None => {
                let shown: Vec<String> = branch_modes
                    .iter()
                    .map(|&m| self.modes.describe(m))
                    .collect();
                self.diagnostics.push(Diagnostic::error(
                    self.tree.node(clause).span,
                    format!("cannot balance the yields {}", shown.join(", ")),
                ));
                self.modes.hip_mode
            }
        }
    }

    fn check_enquiry(&mut self, enquiry: NodeId, target: ModeId) {
        let serial = self.tree.child(enquiry, 0).expect("enquiry serial");
        self.check_unit(serial, Sort::Meek, Some(target));
        self.tree.node_mut(enquiry).mode = Some(target);
    }

    fn deduce_conditional(&mut self, node: NodeId, sort: Sort) -> ModeId {
        let bool_mode = self.modes.bool_mode;
        let mut yields: Vec<(NodeId, ModeId)> = Vec::new();
        for child in self.tree.child_vec(node) {
            match self.tree.node(child).attr {
                Attribute::ENQUIRY_CLAUSE => self.check_enquiry(child, bool_mode),
                Attribute::THEN_PART | Attribute::ELSE_PART => {
                    let serial = self.tree.child(child, 0).expect("arm serial");
                    let m = self.check_unit(serial, sort, None);
                    self.tree.node_mut(child).mode = Some(m);
                    yields.push((serial, m));
                }
                // ELIF chain: the nested conditional is itself a branch.
                Attribute::CONDITIONAL_CLAUSE => {
                    let m = self.check_unit(child, sort, None);
                    yields.push((child, m));
                }
                _ => {}
            }
        }
        // A missing ELSE stands for SKIP, which balances with anything.
        self.balance_yields(node, sort, &yields)
    }

    fn deduce_case(&mut self, node: NodeId, sort: Sort) -> ModeId {
        let int = self.modes.int_mode;
        let mut yields: Vec<(NodeId, ModeId)> = Vec::new();
        for child in self.tree.child_vec(node) {
            match self.tree.node(child).attr {
                Attribute::ENQUIRY_CLAUSE => self.check_enquiry(child, int),
                Attribute::CASE_PART => {
                    let unit = self.tree.child(child, 0).expect("case arm unit");
                    let m = self.check_unit(unit, sort, None);
                    self.tree.node_mut(child).mode = Some(m);
                    yields.push((unit, m));
                }
                Attribute::OUT_PART => {
                    let serial = self.tree.child(child, 0).expect("out serial");
                    let m = self.check_unit(serial, sort, None);
                    self.tree.node_mut(child).mode = Some(m);
                    yields.push((serial, m));
                }
                Attribute::CASE_CLAUSE => {
                    let m = self.check_unit(child, sort, None);
                    yields.push((child, m));
                }
                _ => {}
            }
        }
        self.balance_yields(node, sort, &yields)
    }

    fn deduce_conformity(&mut self, node: NodeId, sort: Sort) -> ModeId {
        // The enquiry must deliver a united value, meekly.
        let enquiry = self.tree.child(node, 0).expect("conformity enquiry");
        let serial = self.tree.child(enquiry, 0).expect("enquiry serial");
        let em = self.check_unit(serial, Sort::Meek, None);
        let union = self
            .meek_spine(em)
            .into_iter()
            .find(|&m| self.modes.is_union(m));
        let union = match union {
            Some(union) => {
                self.require(serial, Sort::Meek, union);
                self.tree.node_mut(enquiry).mode = Some(union);
                union
            }
            None => {
                self.diagnostics.push(Diagnostic::error(
                    self.tree.node(enquiry).span,
                    format!(
                        "a conformity clause needs a united value, not {}",
                        self.modes.describe(em)
                    ),
                ));
                self.modes.hip_mode
            }
        };

        let mut yields: Vec<(NodeId, ModeId)> = Vec::new();
        for child in self.tree.child_vec(node) {
            match self.tree.node(child).attr {
                Attribute::SPECIFIED_UNIT => {
                    let declarer = self.tree.child(child, 0).expect("specifier declarer");
                    let specified = self
                        .tree
                        .node(declarer)
                        .mode
                        .expect("specifier mode from collection");
                    if self.modes.is_union(union)
                        && !self.modes.unitable(specified, union, DeflexRegime::Safe)
                        && !self
                            .modes
                            .members_of(union)
                            .is_some_and(|members| {
                                members
                                    .iter()
                                    .any(|&m| self.modes.modes_equivalent(m, specified))
                            })
                    {
                        self.diagnostics.push(Diagnostic::warning(
                            self.tree.node(child).span,
                            format!(
                                "specifier {} can never conform to {}",
                                self.modes.describe(specified),
                                self.modes.describe(union)
                            ),
                        ));
                    }
                    let unit = self.tree.children(child).last().expect("specified unit");
                    let m = self.check_unit(unit, sort, None);
                    yields.push((unit, m));
                }
                Attribute::OUT_PART => {
                    let serial = self.tree.child(child, 0).expect("out serial");
                    let m = self.check_unit(serial, sort, None);
                    yields.push((serial, m));
                }
                Attribute::CONFORMITY_CLAUSE => {
                    let m = self.check_unit(child, sort, None);
                    yields.push((child, m));
                }
                _ => {}
            }
        }
        self.balance_yields(node, sort, &yields)
    }

    fn deduce_loop(&mut self, node: NodeId) -> ModeId {
        let int = self.modes.int_mode;
        let bool_mode = self.modes.bool_mode;
        let void = self.modes.void_mode;
        for child in self.tree.child_vec(node) {
            match self.tree.node(child).attr {
                Attribute::FROM_PART | Attribute::BY_PART | Attribute::TO_PART => {
                    let unit = self.tree.child(child, 0).expect("loop bound unit");
                    self.check_unit(unit, Sort::Meek, Some(int));
                }
                Attribute::WHILE_PART | Attribute::UNTIL_PART => {
                    let serial = self.tree.child(child, 0).expect("loop condition");
                    self.check_unit(serial, Sort::Meek, Some(bool_mode));
                }
                Attribute::DO_PART => {
                    let serial = self.tree.child(child, 0).expect("loop body");
                    self.check_unit(serial, Sort::Strong, Some(void));
                }
                Attribute::FOR_PART => {}
                _ => {}
            }
        }
        void
    }

    /// A display takes its shape from the context: a structure display fills
    /// fields, a row display fills elements, and without a required mode the
    /// collateral units are voided.
    fn deduce_collateral(&mut self, node: NodeId, required: Option<ModeId>) -> ModeId {
        let void = self.modes.void_mode;
        let units = self.tree.child_vec(node);
        let Some(required) = required else {
            for &unit in &units {
                self.check_unit(unit, Sort::Strong, Some(void));
            }
            return void;
        };
        let required = self.modes.chase(required);
        if let Some(fields) = self.modes.fields_of(required).map(|f| f.to_vec()) {
            if fields.len() != units.len() {
                self.diagnostics.push(Diagnostic::error(
                    self.tree.node(node).span,
                    format!(
                        "a display of {} units cannot fill {} fields",
                        units.len(),
                        fields.len()
                    ),
                ));
                return required;
            }
            for (&unit, field) in units.iter().zip(&fields) {
                self.check_unit(unit, Sort::Strong, Some(field.mode));
            }
            return required;
        }
        if let Some((dims, elem)) = self.modes.row_of(required) {
            let target = if dims > 1 {
                self.modes.row(dims - 1, elem)
            } else {
                elem
            };
            for &unit in &units {
                self.check_unit(unit, Sort::Strong, Some(target));
            }
            return required;
        }
        if self.modes.is_void(required) {
            for &unit in &units {
                self.check_unit(unit, Sort::Strong, Some(void));
            }
            return void;
        }
        self.diagnostics.push(Diagnostic::error(
            self.tree.node(node).span,
            format!(
                "a display cannot deliver mode {}",
                self.modes.describe(required)
            ),
        ));
        required
    }

    // ------------------------------------------------------------------------
    // declarations
    // ------------------------------------------------------------------------

    fn check_declaration(&mut self, node: NodeId) {
        match self.tree.node(node).attr {
            Attribute::IDENTITY_DECLARATION => {
                for child in self.tree.child_vec(node) {
                    match self.tree.node(child).attr {
                        Attribute::DEFINING_IDENTIFIER => {
                            let declared = self
                                .tree
                                .node(child)
                                .mode
                                .expect("mode from collection");
                            let source = self.tree.child(child, 0).expect("identity source");
                            self.check_unit(source, Sort::Strong, Some(declared));
                        }
                        _ => self.check_bounds(child),
                    }
                }
            }
            Attribute::VARIABLE_DECLARATION => {
                let children = self.tree.child_vec(node);
                let declarer = children[0];
                self.check_bounds(declarer);
                let object = self
                    .tree
                    .node(declarer)
                    .mode
                    .expect("mode from collection");
                for &child in &children[1..] {
                    if self.tree.node(child).attr != Attribute::DEFINING_IDENTIFIER {
                        continue;
                    }
                    if let Some(initial) = self.tree.child(child, 0) {
                        self.check_unit(initial, Sort::Strong, Some(object));
                    }
                }
            }
            Attribute::OPERATOR_DECLARATION => {
                for child in self.tree.child_vec(node) {
                    if let Some(routine) = self.tree.child(child, 0) {
                        let declared = self
                            .tree
                            .node(routine)
                            .mode
                            .expect("routine mode from collection");
                        self.check_unit(routine, Sort::Strong, Some(declared));
                    }
                }
            }
            Attribute::MODE_DECLARATION => {
                for child in self.tree.child_vec(node) {
                    if let Some(declarer) = self.tree.child(child, 0) {
                        self.check_bounds(declarer);
                    }
                }
            }
            _ => {}
        }
    }
}

fn sort_name(sort: Sort) -> &'static str {
    match sort {
        Sort::Soft => "soft",
        Sort::Weak => "weak",
        Sort::Meek => "meek",
        Sort::Firm => "firm",
        Sort::Strong => "strong",
        Sort::NoSort => "sortless",
    }
}
