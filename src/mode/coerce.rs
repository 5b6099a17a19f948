//! Context-sensitive coercibility.
//!
//! The five one-directional contexts, weakest first:
//! - soft: identity, or a deproceduring chain
//! - weak: a dereference/deprocedure chain that never strips a REF whose
//!   target is a row or a structure (so rows can be aliased without rowing)
//! - meek: a dereference/deprocedure chain, terminating freely
//! - firm: meek, plus uniting (modulo deflexing)
//! - strong: firm, plus widening, rowing and voiding
//!
//! [`ModeTable::coercion_chain`] produces the exact chain the inserter wraps
//! around a node, inner coercion first.

use super::{ModeId, ModeShape, ModeTable, Primitive};

/// The coercion context demanded by an enclosing construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Sort {
    Soft,
    Weak,
    Meek,
    Firm,
    Strong,
    NoSort,
}

/// Whether FLEX and non-FLEX rows may stand in for each other.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeflexRegime {
    /// Deflexing that cannot introduce aliasing of a flexible name.
    #[default]
    Safe,
    /// Deflex unconditionally (value contexts).
    Force,
    /// Deflexing across a REF, aliasing the underlying row.
    Alias,
    /// No deflexing at all.
    No,
}

impl DeflexRegime {
    fn allows_interchange(self) -> bool {
        !matches!(self, DeflexRegime::No)
    }
}

/// One step of an inserted coercion chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoercionKind {
    Deproceduring,
    Dereferencing,
    Uniting,
    Widening,
    Rowing,
    Voiding,
}

/// A coercion step and the mode it produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Coercion {
    pub kind: CoercionKind,
    pub target: ModeId,
}

impl Coercion {
    fn new(kind: CoercionKind, target: ModeId) -> Self {
        Self { kind, target }
    }
}

impl ModeTable {
    // ========================================================================
    // ACCEPTANCE
    // ========================================================================

    /// Equivalence, or row interchange permitted by the deflexing regime.
    pub fn accepts(&self, required: ModeId, offered: ModeId, regime: DeflexRegime) -> bool {
        if self.modes_equivalent(required, offered) {
            return true;
        }
        // The prelude's ROWS wildcard accepts any row.
        if self.is_standard(required, Primitive::Rows) && self.is_row(offered) {
            return true;
        }
        if !regime.allows_interchange() {
            return false;
        }
        match (self.row_of(required), self.row_of(offered)) {
            (Some((dims, elem)), Some((dims2, elem2))) => {
                (self.is_flex(required) != self.is_flex(offered))
                    && dims == dims2
                    && self.modes_equivalent(elem, elem2)
            }
            _ => false,
        }
    }

    /// Whether `from` can be united into the united mode `union`.
    pub fn unitable(&mut self, from: ModeId, union: ModeId, regime: DeflexRegime) -> bool {
        let members = match self.members_of(union) {
            Some(members) => members.to_vec(),
            None => return false,
        };
        // A union is unitable into a wider union.
        if let Some(from_members) = self.members_of(from).map(|m| m.to_vec()) {
            return from_members.iter().all(|&fm| {
                members.iter().any(|&m| self.accepts(m, fm, regime))
            });
        }
        let deflexed = self.make_deflexed(from);
        members
            .iter()
            .any(|&m| self.accepts(m, from, regime) || self.accepts(m, deflexed, regime))
    }

    /// Two modes are firmly related when one firmly coerces to the other;
    /// such pairs may not overload one operator symbol or share a union.
    pub fn firmly_related(&mut self, a: ModeId, b: ModeId) -> bool {
        if self.modes_equivalent(a, b) {
            return true;
        }
        self.coercible(a, b, Sort::Firm, DeflexRegime::Safe)
            || self.coercible(b, a, Sort::Firm, DeflexRegime::Safe)
    }

    // ========================================================================
    // CHAIN GENERATION
    // ========================================================================

    pub fn coercible(&mut self, from: ModeId, to: ModeId, sort: Sort, regime: DeflexRegime) -> bool {
        self.coercion_chain(from, to, sort, regime).is_some()
    }

    /// The coercion chain from `from` to `to` in the given context, listed
    /// innermost first; `Some(vec![])` is the identity chain.
    pub fn coercion_chain(
        &mut self,
        from: ModeId,
        to: ModeId,
        sort: Sort,
        regime: DeflexRegime,
    ) -> Option<Vec<Coercion>> {
        let from = self.chase(from);
        let to = self.chase(to);
        // SKIP, NIL and jumps adapt to any required mode.
        if self.is_hip(from) {
            return Some(Vec::new());
        }
        if self.accepts(to, from, regime) {
            return Some(Vec::new());
        }
        match sort {
            Sort::NoSort => None,
            Sort::Soft => self.soft_chain(from, to),
            Sort::Weak => self.weak_chain(from, to, regime),
            Sort::Meek => self.meek_chain(from, to, regime),
            Sort::Firm => self.firm_chain(from, to, regime),
            Sort::Strong => self.strong_chain(from, to, regime),
        }
    }

    fn soft_chain(&mut self, from: ModeId, to: ModeId) -> Option<Vec<Coercion>> {
        let mut chain = Vec::new();
        let mut current = from;
        while let Some(result) = self.proc_result(current) {
            chain.push(Coercion::new(CoercionKind::Deproceduring, result));
            current = result;
            if self.modes_equivalent(current, to) {
                return Some(chain);
            }
        }
        None
    }

    /// The deref/deprocedure steps reachable in a weak context: a REF whose
    /// target is a row or structure is never stripped.
    fn weak_steps(&self, from: ModeId) -> Vec<Coercion> {
        let mut steps = Vec::new();
        let mut current = from;
        loop {
            if let Some(result) = self.proc_result(current) {
                steps.push(Coercion::new(CoercionKind::Deproceduring, result));
                current = result;
            } else if let Some(target) = self.ref_target(current) {
                if self.is_row(target) || self.is_struct(target) {
                    break;
                }
                steps.push(Coercion::new(CoercionKind::Dereferencing, target));
                current = target;
            } else {
                break;
            }
        }
        steps
    }

    /// The full deref/deprocedure chain of a meek context.
    fn meek_steps(&self, from: ModeId) -> Vec<Coercion> {
        let mut steps = Vec::new();
        let mut current = from;
        loop {
            if let Some(result) = self.proc_result(current) {
                steps.push(Coercion::new(CoercionKind::Deproceduring, result));
                current = result;
            } else if let Some(target) = self.ref_target(current) {
                steps.push(Coercion::new(CoercionKind::Dereferencing, target));
                current = target;
            } else {
                break;
            }
        }
        steps
    }

    fn chain_to(
        &self,
        steps: &[Coercion],
        from: ModeId,
        to: ModeId,
        regime: DeflexRegime,
    ) -> Option<Vec<Coercion>> {
        if self.accepts(to, from, regime) {
            return Some(Vec::new());
        }
        for (i, step) in steps.iter().enumerate() {
            if self.accepts(to, step.target, regime) {
                return Some(steps[..=i].to_vec());
            }
        }
        None
    }

    fn weak_chain(
        &mut self,
        from: ModeId,
        to: ModeId,
        regime: DeflexRegime,
    ) -> Option<Vec<Coercion>> {
        let steps = self.weak_steps(from);
        self.chain_to(&steps, from, to, regime)
    }

    fn meek_chain(
        &mut self,
        from: ModeId,
        to: ModeId,
        regime: DeflexRegime,
    ) -> Option<Vec<Coercion>> {
        let steps = self.meek_steps(from);
        self.chain_to(&steps, from, to, regime)
    }

    fn firm_chain(
        &mut self,
        from: ModeId,
        to: ModeId,
        regime: DeflexRegime,
    ) -> Option<Vec<Coercion>> {
        if let Some(chain) = self.meek_chain(from, to, regime) {
            return Some(chain);
        }
        if !self.is_union(to) {
            return None;
        }
        // Unite the least-coerced form that fits.
        let mut prefix: Vec<Coercion> = Vec::new();
        let mut current = from;
        loop {
            if self.unitable(current, to, regime) {
                prefix.push(Coercion::new(CoercionKind::Uniting, to));
                return Some(prefix);
            }
            match self.meek_steps(current).first() {
                Some(&step) => {
                    prefix.push(step);
                    current = step.target;
                }
                None => return None,
            }
        }
    }

    fn strong_chain(
        &mut self,
        from: ModeId,
        to: ModeId,
        regime: DeflexRegime,
    ) -> Option<Vec<Coercion>> {
        if let Some(chain) = self.firm_chain(from, to, regime) {
            return Some(chain);
        }
        // Voiding: anything goes to VOID, after deproceduring a
        // parameterless routine so its body still runs.
        if self.is_void(to) {
            let mut chain = Vec::new();
            if let Some(result) = self.proc_result(from) {
                chain.push(Coercion::new(CoercionKind::Deproceduring, result));
            }
            chain.push(Coercion::new(CoercionKind::Voiding, to));
            return Some(chain);
        }
        // Widening from any point of the meek chain.
        let steps = self.meek_steps(from);
        let mut prefix: Vec<Coercion> = Vec::new();
        let mut current = from;
        for i in 0..=steps.len() {
            if let Some(widened) = self.widen_steps(current, to, regime) {
                prefix.extend(widened);
                return Some(prefix);
            }
            if i < steps.len() {
                prefix.push(steps[i]);
                current = steps[i].target;
            }
        }
        // Ref-rowing: REF T goes to REF [] T.
        if let (Some(to_target), Some(from_target)) = (self.ref_target(to), self.ref_target(from)) {
            if let Some((dims, elem)) = self.row_of(to_target) {
                let wanted = if dims > 1 {
                    self.row(dims - 1, elem)
                } else {
                    elem
                };
                if self.accepts(wanted, from_target, regime) {
                    return Some(vec![Coercion::new(CoercionKind::Rowing, to)]);
                }
            }
        }
        // Rowing: build a one-element row of a strongly coerced element.
        if let Some((dims, elem)) = self.row_of(to) {
            let wanted = if dims > 1 { self.row(dims - 1, elem) } else { elem };
            if let Some(mut chain) = self.strong_chain_no_row(from, wanted, regime) {
                chain.push(Coercion::new(CoercionKind::Rowing, to));
                return Some(chain);
            }
        }
        None
    }

    /// Strong chain without the rowing rule, so rowing applies at most once
    /// per dimension and the search terminates.
    fn strong_chain_no_row(
        &mut self,
        from: ModeId,
        to: ModeId,
        regime: DeflexRegime,
    ) -> Option<Vec<Coercion>> {
        let from = self.chase(from);
        let to = self.chase(to);
        if self.is_hip(from) {
            return Some(Vec::new());
        }
        if self.accepts(to, from, regime) {
            return Some(Vec::new());
        }
        if let Some(chain) = self.firm_chain(from, to, regime) {
            return Some(chain);
        }
        let steps = self.meek_steps(from);
        let mut prefix: Vec<Coercion> = Vec::new();
        let mut current = from;
        for i in 0..=steps.len() {
            if let Some(widened) = self.widen_steps(current, to, regime) {
                prefix.extend(widened);
                return Some(prefix);
            }
            if i < steps.len() {
                prefix.push(steps[i]);
                current = steps[i].target;
            }
        }
        None
    }

    // ========================================================================
    // WIDENING
    // ========================================================================

    /// The widening edges out of one mode.
    fn widen_edges(&mut self, from: ModeId) -> Vec<ModeId> {
        let from = self.chase(from);
        if let Some(sizety) = self.is_complex(from) {
            if sizety < 2 {
                return vec![self.complex_of(sizety + 1)];
            }
            return Vec::new();
        }
        match *self.shape(from) {
            ModeShape::Standard {
                prim: Primitive::Int,
                sizety,
            } => {
                let mut out = vec![self.standard(Primitive::Real, sizety)];
                if sizety < 2 {
                    out.push(self.standard(Primitive::Int, sizety + 1));
                }
                out
            }
            ModeShape::Standard {
                prim: Primitive::Real,
                sizety,
            } => {
                let mut out = vec![self.complex_of(sizety)];
                if sizety < 2 {
                    out.push(self.standard(Primitive::Real, sizety + 1));
                }
                out
            }
            ModeShape::Standard {
                prim: Primitive::Bits,
                sizety,
            } => {
                let mut out = vec![self.row_of_bool_mode];
                if sizety < 2 {
                    out.push(self.standard(Primitive::Bits, sizety + 1));
                }
                out
            }
            ModeShape::Standard {
                prim: Primitive::Bytes,
                ..
            } => vec![self.row_of_char_mode],
            _ => Vec::new(),
        }
    }

    fn complex_of(&mut self, sizety: i8) -> ModeId {
        if sizety == 0 {
            self.complex_mode
        } else if sizety == 1 {
            self.long_complex_mode
        } else {
            let re = self.standard(Primitive::Real, sizety);
            self.structure(vec![
                super::Field {
                    name: "re".into(),
                    mode: re,
                },
                super::Field {
                    name: "im".into(),
                    mode: re,
                },
            ])
        }
    }

    /// The widening path from `from` to `to`; chained widenings produce one
    /// step per intermediate mode.
    fn widen_steps(
        &mut self,
        from: ModeId,
        to: ModeId,
        regime: DeflexRegime,
    ) -> Option<Vec<Coercion>> {
        // Depth-first over the widening lattice; it is small and acyclic.
        let mut best: Option<Vec<Coercion>> = None;
        let mut stack: Vec<(ModeId, Vec<Coercion>)> = vec![(self.chase(from), Vec::new())];
        while let Some((current, path)) = stack.pop() {
            for target in self.widen_edges(current) {
                let mut next = path.clone();
                next.push(Coercion::new(CoercionKind::Widening, target));
                if self.accepts(to, target, regime) {
                    match &best {
                        Some(found) if found.len() <= next.len() => {}
                        _ => best = Some(next.clone()),
                    }
                } else if next.len() < 4 {
                    stack.push((target, next));
                }
            }
        }
        // Identity is not a widening.
        if best.as_ref().is_some_and(|b| b.is_empty()) {
            return None;
        }
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn table() -> ModeTable {
        ModeTable::new()
    }

    #[rstest]
    #[case(Sort::Soft)]
    #[case(Sort::Weak)]
    #[case(Sort::Meek)]
    #[case(Sort::Firm)]
    #[case(Sort::Strong)]
    fn identity_chain_in_every_sort(#[case] sort: Sort) {
        let mut t = table();
        let chain = t
            .coercion_chain(t.int_mode, t.int_mode, sort, DeflexRegime::Safe)
            .unwrap();
        assert!(chain.is_empty());
    }

    #[test]
    fn strong_int_to_real_is_one_widening() {
        let mut t = table();
        let chain = t
            .coercion_chain(t.int_mode, t.real_mode, Sort::Strong, DeflexRegime::Safe)
            .unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].kind, CoercionKind::Widening);
        assert_eq!(chain[0].target, t.real_mode);
    }

    #[test]
    fn chained_widening_int_to_long_real() {
        let mut t = table();
        let chain = t
            .coercion_chain(
                t.int_mode,
                t.long_real_mode,
                Sort::Strong,
                DeflexRegime::Safe,
            )
            .unwrap();
        assert_eq!(chain.len(), 2);
        assert!(chain.iter().all(|c| c.kind == CoercionKind::Widening));
        assert_eq!(chain.last().unwrap().target, t.long_real_mode);
    }

    #[test]
    fn widening_is_not_available_in_firm_context() {
        let mut t = table();
        assert!(!t.coercible(t.int_mode, t.real_mode, Sort::Firm, DeflexRegime::Safe));
    }

    #[test]
    fn strong_to_void_always_succeeds() {
        let mut t = table();
        let ref_row = {
            let row = t.row(1, t.real_mode);
            t.reference_to(row)
        };
        for m in [t.int_mode, t.string_mode, ref_row] {
            let chain = t
                .coercion_chain(m, t.void_mode, Sort::Strong, DeflexRegime::Safe)
                .unwrap();
            assert_eq!(chain.last().unwrap().kind, CoercionKind::Voiding);
        }
    }

    #[test]
    fn soft_from_void_fails_unless_void() {
        let mut t = table();
        assert!(!t.coercible(t.void_mode, t.int_mode, Sort::Soft, DeflexRegime::Safe));
        assert!(t.coercible(t.void_mode, t.void_mode, Sort::Soft, DeflexRegime::Safe));
    }

    #[test]
    fn soft_deprocedures_a_chain() {
        let mut t = table();
        let proc_int = t.procedure(vec![], t.int_mode);
        let proc_proc_int = t.procedure(vec![], proc_int);
        let chain = t
            .coercion_chain(proc_proc_int, t.int_mode, Sort::Soft, DeflexRegime::Safe)
            .unwrap();
        assert_eq!(chain.len(), 2);
        assert!(chain.iter().all(|c| c.kind == CoercionKind::Deproceduring));
    }

    #[test]
    fn firm_uniting_is_one_step() {
        let mut t = table();
        let union = t.union_of(vec![t.int_mode, t.real_mode]);
        let chain = t
            .coercion_chain(t.int_mode, union, Sort::Firm, DeflexRegime::Safe)
            .unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].kind, CoercionKind::Uniting);
    }

    #[test]
    fn uniting_dereferences_first_when_needed() {
        let mut t = table();
        let union = t.union_of(vec![t.int_mode, t.real_mode]);
        let ref_int = t.reference_to(t.int_mode);
        let chain = t
            .coercion_chain(ref_int, union, Sort::Firm, DeflexRegime::Safe)
            .unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].kind, CoercionKind::Dereferencing);
        assert_eq!(chain[1].kind, CoercionKind::Uniting);
    }

    #[test]
    fn weak_keeps_the_last_ref_over_a_row() {
        let mut t = table();
        let row = t.row(1, t.int_mode);
        let ref_row = t.reference_to(row);
        let ref_ref_row = t.reference_to(ref_row);
        // REF REF [] INT weakly reaches REF [] INT but never [] INT.
        assert!(t.coercible(ref_ref_row, ref_row, Sort::Weak, DeflexRegime::Safe));
        assert!(!t.coercible(ref_ref_row, row, Sort::Weak, DeflexRegime::Safe));
        // Meekly the row itself is reachable.
        assert!(t.coercible(ref_ref_row, row, Sort::Meek, DeflexRegime::Safe));
    }

    #[test]
    fn strong_rowing_builds_a_row_of_one() {
        let mut t = table();
        let row = t.row(1, t.real_mode);
        let chain = t
            .coercion_chain(t.int_mode, row, Sort::Strong, DeflexRegime::Safe)
            .unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].kind, CoercionKind::Widening);
        assert_eq!(chain[1].kind, CoercionKind::Rowing);
    }

    #[test]
    fn ref_rowing_lifts_a_name() {
        let mut t = table();
        let row = t.row(1, t.int_mode);
        let ref_int = t.reference_to(t.int_mode);
        let ref_row = t.reference_to(row);
        let chain = t
            .coercion_chain(ref_int, ref_row, Sort::Strong, DeflexRegime::Safe)
            .unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].kind, CoercionKind::Rowing);
    }

    #[test]
    fn bits_widen_to_row_of_bool() {
        let mut t = table();
        let chain = t
            .coercion_chain(
                t.bits_mode,
                t.row_of_bool_mode,
                Sort::Strong,
                DeflexRegime::Safe,
            )
            .unwrap();
        assert_eq!(chain.len(), 1);
        assert_eq!(chain[0].kind, CoercionKind::Widening);
    }

    #[test]
    fn flex_and_fixed_rows_interchange_unless_forbidden() {
        let mut t = table();
        let row_char = t.row_of_char_mode;
        assert!(t.coercible(t.string_mode, row_char, Sort::Strong, DeflexRegime::Safe));
        assert!(!t.coercible(t.string_mode, row_char, Sort::Strong, DeflexRegime::No));
    }

    #[test]
    fn firmly_related_detects_deref_overlap() {
        let mut t = table();
        let ref_int = t.reference_to(t.int_mode);
        assert!(t.firmly_related(ref_int, t.int_mode));
        assert!(!t.firmly_related(t.int_mode, t.real_mode));
    }
}
