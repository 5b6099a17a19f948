//! Derived forms and structural predicates.
//!
//! Deflexing strips FLEX from the value layout of a mode; the result is
//! cached in the `deflexed` slot. The containment predicates (`has_ref`,
//! `has_flex`, `has_rows`) walk the possibly cyclic mode graph with a
//! visited set and are cached after the closure so the collector can read
//! them without mutation.

use rustc_hash::{FxHashMap, FxHashSet};

use super::{Field, ModeId, ModeShape, ModeTable};

#[derive(Clone, Copy, PartialEq, Eq)]
enum Containment {
    Ref,
    Flex,
    Rows,
}

impl ModeTable {
    // ========================================================================
    // CONTAINMENT
    // ========================================================================

    pub fn contains_ref(&self, m: ModeId) -> bool {
        self.contains(m, Containment::Ref, &mut FxHashSet::default())
    }

    pub fn contains_flex(&self, m: ModeId) -> bool {
        self.contains(m, Containment::Flex, &mut FxHashSet::default())
    }

    pub fn contains_rows(&self, m: ModeId) -> bool {
        self.contains(m, Containment::Rows, &mut FxHashSet::default())
    }

    fn contains(&self, m: ModeId, what: Containment, visited: &mut FxHashSet<ModeId>) -> bool {
        let m = self.chase(m);
        if !visited.insert(m) {
            return false;
        }
        match &self.get(m).shape {
            ModeShape::Standard { .. } | ModeShape::Indicant { .. } => false,
            ModeShape::Ref(inner) => {
                what == Containment::Ref || self.contains(*inner, what, visited)
            }
            ModeShape::Flex(row) => {
                matches!(what, Containment::Flex | Containment::Rows)
                    || self.contains(*row, what, visited)
            }
            ModeShape::Row { elem, .. } => {
                what == Containment::Rows || self.contains(*elem, what, visited)
            }
            // A routine value stores no component values; its parameter and
            // result modes do not take part in the value layout.
            ModeShape::Proc { .. } => false,
            ModeShape::Struct { fields } => fields
                .iter()
                .any(|f| self.contains(f.mode, what, visited)),
            ModeShape::Union { members } | ModeShape::Series { members } => members
                .iter()
                .any(|&member| self.contains(member, what, visited)),
        }
    }

    /// Fill the containment caches for every canonical mode; run once after
    /// the closure so the collector reads them immutably.
    pub fn compute_caches(&mut self) {
        for id in self.ids().collect::<Vec<_>>() {
            let has_ref = self.contains_ref(id);
            let has_flex = self.contains_flex(id);
            let has_rows = self.contains_rows(id);
            let mode = self.get_mut(id);
            mode.has_ref = Some(has_ref);
            mode.has_flex = Some(has_flex);
            mode.has_rows = Some(has_rows);
        }
    }

    /// Whether a frame slot of this mode can hold heap references the
    /// collector must trace. Conservative when the cache is unfilled.
    pub fn needs_trace(&self, m: ModeId) -> bool {
        let mode = self.get(self.chase(m));
        match (mode.has_ref, mode.has_rows) {
            (Some(has_ref), Some(has_rows)) => has_ref || has_rows,
            _ => true,
        }
    }

    // ========================================================================
    // DEREFERENCE / DEROW
    // ========================================================================

    /// Strip every REF and parameterless-PROC layer.
    pub fn depref_completely(&self, m: ModeId) -> ModeId {
        let mut current = self.chase(m);
        loop {
            if let Some(target) = self.ref_target(current) {
                current = target;
            } else if let Some(result) = self.proc_result(current) {
                current = result;
            } else {
                return current;
            }
        }
    }

    /// The element mode of a row, or `m` itself when it is not a row.
    pub fn derow(&self, m: ModeId) -> ModeId {
        match self.row_of(m) {
            Some((_, elem)) => elem,
            None => self.chase(m),
        }
    }

    /// The mode of one slicing step: one dimension fewer, or the element.
    pub fn slice_mode(&mut self, m: ModeId) -> Option<ModeId> {
        let m = self.chase(m);
        if let Some(slice) = self.get(m).derived.slice {
            return Some(slice);
        }
        let (dims, elem) = self.row_of(m)?;
        let slice = if dims > 1 {
            self.row(dims - 1, elem)
        } else {
            elem
        };
        self.get_mut(m).derived.slice = Some(slice);
        Some(slice)
    }

    /// The rowed companion `T -> [] T` (one more dimension for rows).
    pub fn rowed_mode(&mut self, m: ModeId) -> ModeId {
        let m = self.chase(m);
        if let Some(rowed) = self.get(m).derived.rowed {
            return rowed;
        }
        let rowed = match self.row_of(m) {
            Some((dims, elem)) => self.row(dims + 1, elem),
            None => self.row(1, m),
        };
        self.get_mut(m).derived.rowed = Some(rowed);
        rowed
    }

    // ========================================================================
    // DEFLEXING
    // ========================================================================

    /// The companion of `m` with all FLEX stripped from its value layout.
    pub fn make_deflexed(&mut self, m: ModeId) -> ModeId {
        let mut in_progress = FxHashMap::default();
        self.deflex_inner(m, &mut in_progress)
    }

    fn deflex_inner(&mut self, m: ModeId, in_progress: &mut FxHashMap<ModeId, ModeId>) -> ModeId {
        let m = self.chase(m);
        if !self.contains_flex(m) {
            return m;
        }
        if let Some(deflexed) = self.get(m).derived.deflexed {
            return deflexed;
        }
        if let Some(&pending) = in_progress.get(&m) {
            return pending;
        }
        let deflexed = match self.get(m).shape.clone() {
            ModeShape::Flex(row) => self.deflex_inner(row, in_progress),
            ModeShape::Row { dims, elem } => {
                let placeholder = self.alloc(ModeShape::Row { dims, elem });
                in_progress.insert(m, placeholder);
                let elem = self.deflex_inner(elem, in_progress);
                self.get_mut(placeholder).shape = ModeShape::Row { dims, elem };
                placeholder
            }
            ModeShape::Ref(inner) => {
                let placeholder = self.alloc(ModeShape::Ref(inner));
                in_progress.insert(m, placeholder);
                let inner = self.deflex_inner(inner, in_progress);
                self.get_mut(placeholder).shape = ModeShape::Ref(inner);
                placeholder
            }
            ModeShape::Struct { fields } => {
                let placeholder = self.alloc(ModeShape::Struct {
                    fields: fields.clone(),
                });
                in_progress.insert(m, placeholder);
                let fields = fields
                    .into_iter()
                    .map(|f| Field {
                        name: f.name,
                        mode: self.deflex_inner(f.mode, in_progress),
                    })
                    .collect();
                self.get_mut(placeholder).shape = ModeShape::Struct { fields };
                placeholder
            }
            ModeShape::Union { members } => {
                let placeholder = self.alloc(ModeShape::Union {
                    members: members.clone(),
                });
                in_progress.insert(m, placeholder);
                let members = members
                    .into_iter()
                    .map(|member| self.deflex_inner(member, in_progress))
                    .collect();
                self.get_mut(placeholder).shape = ModeShape::Union { members };
                placeholder
            }
            _ => m,
        };
        self.get_mut(m).derived.deflexed = Some(deflexed);
        deflexed
    }

    // ========================================================================
    // WELL-FORMEDNESS
    // ========================================================================

    /// The yin-yang rule: on every cycle through the type graph at least one
    /// REF (yang) and at least one non-REF, non-PROC layer (yin) must appear.
    pub fn check_well_formed(&mut self, m: ModeId) -> bool {
        let ok = self.wf(self.chase(m), false, false, &mut Vec::new());
        if !ok {
            self.get_mut(self.chase(m)).well_formed = false;
        }
        ok
    }

    fn wf(&self, m: ModeId, yin: bool, yang: bool, path: &mut Vec<ModeId>) -> bool {
        let m = self.chase(m);
        if path.contains(&m) {
            // Closed a cycle: both flavours must have appeared along it.
            return yin && yang;
        }
        path.push(m);
        let ok = match &self.get(m).shape {
            ModeShape::Standard { .. } | ModeShape::Indicant { .. } | ModeShape::Series { .. } => {
                true
            }
            ModeShape::Ref(inner) => self.wf(*inner, yin, true, path),
            ModeShape::Flex(row) => self.wf(*row, true, yang, path),
            ModeShape::Row { elem, .. } => self.wf(*elem, true, yang, path),
            // PROC contributes neither flavour.
            ModeShape::Proc { params, result } => {
                params.iter().all(|&p| self.wf(p, yin, yang, path))
                    && self.wf(*result, yin, yang, path)
            }
            ModeShape::Struct { fields } => {
                fields.iter().all(|f| self.wf(f.mode, true, yang, path))
            }
            ModeShape::Union { members } => {
                members.iter().all(|&member| self.wf(member, true, yang, path))
            }
        };
        path.pop();
        ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depref_strips_ref_and_proc_layers() {
        let mut table = ModeTable::new();
        let ref_int = table.reference_to(table.int_mode);
        let proc_ref_int = table.procedure(vec![], ref_int);
        let ref_proc = table.reference_to(proc_ref_int);
        assert_eq!(table.depref_completely(ref_proc), table.int_mode);
        assert_eq!(table.depref_completely(table.int_mode), table.int_mode);
    }

    #[test]
    fn derow_unwraps_one_row() {
        let mut table = ModeTable::new();
        let row = table.row(1, table.real_mode);
        assert_eq!(table.derow(row), table.real_mode);
        assert_eq!(table.derow(table.string_mode), table.char_mode);
        assert_eq!(table.derow(table.bool_mode), table.bool_mode);
    }

    #[test]
    fn deflexed_mode_contains_no_flex() {
        let mut table = ModeTable::new();
        let flexible = table.string_mode;
        let structure = table.structure(vec![Field {
            name: "text".into(),
            mode: flexible,
        }]);
        let deflexed = table.make_deflexed(structure);
        assert!(!table.contains_flex(deflexed));
        let (_, field) = table.field_mode(deflexed, "text").unwrap();
        assert_eq!(table.row_of(field), Some((1, table.char_mode)));
        assert!(!table.is_flex(field));
    }

    #[test]
    fn deflex_terminates_on_recursive_modes() {
        let mut table = ModeTable::new();
        // MODE A = STRUCT (STRING s, REF A rest)
        let a = table.indicant("A".into());
        let ref_a = table.reference_to(a);
        let s = table.structure(vec![
            Field {
                name: "s".into(),
                mode: table.string_mode,
            },
            Field {
                name: "rest".into(),
                mode: ref_a,
            },
        ]);
        table.bind_indicant(a, s);
        let deflexed = table.make_deflexed(s);
        assert!(!table.contains_flex(deflexed));
    }

    #[test]
    fn has_rows_sees_through_refs_and_structs() {
        let mut table = ModeTable::new();
        let row = table.row(1, table.int_mode);
        let ref_row = table.reference_to(row);
        let s = table.structure(vec![Field {
            name: "xs".into(),
            mode: ref_row,
        }]);
        assert!(table.contains_rows(s));
        assert!(table.contains_ref(s));
        assert!(!table.contains_rows(table.int_mode));
    }

    #[test]
    fn ref_cycle_through_struct_is_well_formed() {
        let mut table = ModeTable::new();
        let a = table.indicant("A".into());
        let ref_a = table.reference_to(a);
        let s = table.structure(vec![
            Field {
                name: "n".into(),
                mode: table.int_mode,
            },
            Field {
                name: "rest".into(),
                mode: ref_a,
            },
        ]);
        table.bind_indicant(a, s);
        assert!(table.check_well_formed(s));
    }

    #[test]
    fn bare_ref_cycle_is_ill_formed() {
        let mut table = ModeTable::new();
        // MODE A = REF A
        let a = table.indicant("A".into());
        let ref_a = table.reference_to(a);
        table.bind_indicant(a, ref_a);
        assert!(!table.check_well_formed(ref_a));
        assert!(!table.get(table.chase(ref_a)).well_formed);
    }

    #[test]
    fn proc_cycle_without_ref_is_ill_formed() {
        let mut table = ModeTable::new();
        // MODE A = PROC (A) A
        let a = table.indicant("A".into());
        let proc_a = table.procedure(vec![a], a);
        table.bind_indicant(a, proc_a);
        assert!(!table.check_well_formed(proc_a));
    }
}
