//! Mode equivalence under postulation, and the table-wide closure.
//!
//! Two modes are structurally equivalent iff after chasing `equivalent`
//! pointers they are identical, or they have the same shape and their
//! components are recursively equivalent under the postulate that the two
//! modes are equivalent. The postulate is what lets recursive declarations
//! such as `MODE A = STRUCT (INT n, REF A rest)` compare in finite time.
//!
//! The closure loop runs over the whole table until a full pass makes no
//! modification: nested unions are absorbed, duplicate union members
//! contracted, derived companions generated, and equivalent pairs collapsed
//! onto their elder representative.

use tracing::{debug, warn};

use super::{Field, ModeId, ModeShape, ModeTable, flatten_union};

/// Cap on closure passes; reaching it means the derivation rules keep
/// producing fresh modes, which indicates a table bug.
const CLOSURE_PASS_LIMIT: usize = 64;

impl ModeTable {
    // ========================================================================
    // EQUIVALENCE
    // ========================================================================

    /// Structural equivalence of two modes.
    pub fn modes_equivalent(&self, a: ModeId, b: ModeId) -> bool {
        let mut postulates = Vec::new();
        self.equivalent_under(a, b, &mut postulates)
    }

    fn equivalent_under(
        &self,
        a: ModeId,
        b: ModeId,
        postulates: &mut Vec<(ModeId, ModeId)>,
    ) -> bool {
        let a = self.chase(a);
        let b = self.chase(b);
        if a == b {
            return true;
        }
        if postulates
            .iter()
            .any(|&(x, y)| (x == a && y == b) || (x == b && y == a))
        {
            return true;
        }
        match (&self.get(a).shape, &self.get(b).shape) {
            (
                ModeShape::Standard { prim, sizety },
                ModeShape::Standard {
                    prim: prim2,
                    sizety: sizety2,
                },
            ) => prim == prim2 && sizety == sizety2,
            (ModeShape::Ref(x), ModeShape::Ref(y)) => {
                postulates.push((a, b));
                self.equivalent_under(*x, *y, postulates)
            }
            (ModeShape::Flex(x), ModeShape::Flex(y)) => {
                postulates.push((a, b));
                self.equivalent_under(*x, *y, postulates)
            }
            (
                ModeShape::Row { dims, elem },
                ModeShape::Row {
                    dims: dims2,
                    elem: elem2,
                },
            ) => {
                if dims != dims2 {
                    return false;
                }
                postulates.push((a, b));
                self.equivalent_under(*elem, *elem2, postulates)
            }
            (
                ModeShape::Proc { params, result },
                ModeShape::Proc {
                    params: params2,
                    result: result2,
                },
            ) => {
                if params.len() != params2.len() {
                    return false;
                }
                postulates.push((a, b));
                params
                    .iter()
                    .zip(params2)
                    .all(|(p, q)| self.equivalent_under(*p, *q, postulates))
                    && self.equivalent_under(*result, *result2, postulates)
            }
            (ModeShape::Struct { fields }, ModeShape::Struct { fields: fields2 }) => {
                if fields.len() != fields2.len() {
                    return false;
                }
                postulates.push((a, b));
                fields.iter().zip(fields2).all(|(f, g)| {
                    f.name == g.name && self.equivalent_under(f.mode, g.mode, postulates)
                })
            }
            (ModeShape::Union { members }, ModeShape::Union { members: members2 }) => {
                postulates.push((a, b));
                self.unions_equivalent(members, members2, postulates)
            }
            _ => false,
        }
    }

    /// Union members match as a multiset; member order is insignificant.
    fn unions_equivalent(
        &self,
        members: &[ModeId],
        members2: &[ModeId],
        postulates: &mut Vec<(ModeId, ModeId)>,
    ) -> bool {
        if members.len() != members2.len() {
            return false;
        }
        let mut claimed = vec![false; members2.len()];
        'outer: for &m in members {
            for (slot, &n) in members2.iter().enumerate() {
                if claimed[slot] {
                    continue;
                }
                let mark = postulates.len();
                if self.equivalent_under(m, n, postulates) {
                    claimed[slot] = true;
                    continue 'outer;
                }
                // A failed pairing must not leave its postulates behind.
                postulates.truncate(mark);
            }
            return false;
        }
        true
    }

    // ========================================================================
    // CLOSURE
    // ========================================================================

    /// Run the equivalence closure to a fixed point.
    ///
    /// Returns the number of passes taken.
    pub fn close(&mut self) -> usize {
        let mut passes = 0;
        loop {
            passes += 1;
            let mut modified = false;
            modified |= self.contract_unions();
            modified |= self.generate_derived();
            modified |= self.collapse_equivalents();
            if !modified {
                break;
            }
            if passes >= CLOSURE_PASS_LIMIT {
                warn!(passes, "mode closure hit its pass limit without settling");
                break;
            }
        }
        debug!(passes, modes = self.len(), "mode table closed");
        passes
    }

    /// Absorb nested unions and contract duplicate members.
    fn contract_unions(&mut self) -> bool {
        let mut modified = false;
        for id in self.ids().collect::<Vec<_>>() {
            if self.get(id).equivalent.is_some() {
                continue;
            }
            let members = match &self.get(id).shape {
                ModeShape::Union { members } => members.clone(),
                _ => continue,
            };
            let mut flattened = flatten_union(self, &members);
            // Contract members that are structurally equivalent without
            // being the same arena entry yet.
            let mut kept: Vec<ModeId> = Vec::with_capacity(flattened.len());
            for m in flattened.drain(..) {
                if !kept.iter().any(|&k| self.modes_equivalent(k, m)) {
                    kept.push(m);
                }
            }
            let changed = kept.len() != members.len()
                || kept
                    .iter()
                    .zip(&members)
                    .any(|(a, b)| *a != self.chase(*b));
            if changed {
                self.get_mut(id).shape = ModeShape::Union { members: kept };
                modified = true;
            }
        }
        modified
    }

    /// Generate the derived companions the analyser consults:
    /// name packs of REF-to-STRUCT, multiples of ROW-of-STRUCT and
    /// FLEX-ROW-of-STRUCT, deflexed forms, and row slices.
    fn generate_derived(&mut self) -> bool {
        let mut modified = false;
        for id in self.ids().collect::<Vec<_>>() {
            if self.get(id).equivalent.is_some() {
                continue;
            }
            match self.get(id).shape.clone() {
                ModeShape::Ref(inner) => {
                    if self.get(id).derived.name.is_none() && self.is_struct(inner) {
                        let pack = self.name_pack(inner);
                        self.get_mut(id).derived.name = Some(pack);
                        modified = true;
                    }
                }
                ModeShape::Row { dims, elem } => {
                    if self.get(id).derived.multiple.is_none() && self.is_struct(elem) {
                        let pack = self.multiple_pack(dims, elem, false);
                        self.get_mut(id).derived.multiple = Some(pack);
                        modified = true;
                    }
                    if self.get(id).derived.slice.is_none() {
                        let slice = if dims > 1 {
                            self.row(dims - 1, elem)
                        } else {
                            self.chase(elem)
                        };
                        self.get_mut(id).derived.slice = Some(slice);
                        self.get_mut(id).derived.trim = Some(id);
                        modified = true;
                    }
                }
                ModeShape::Flex(row) => {
                    if let ModeShape::Row { dims, elem } = self.get(self.chase(row)).shape.clone() {
                        if self.get(id).derived.multiple.is_none() && self.is_struct(elem) {
                            let pack = self.multiple_pack(dims, elem, true);
                            self.get_mut(id).derived.multiple = Some(pack);
                            modified = true;
                        }
                        if self.get(id).derived.slice.is_none() {
                            let slice = if dims > 1 {
                                self.row(dims - 1, elem)
                            } else {
                                self.chase(elem)
                            };
                            self.get_mut(id).derived.slice = Some(slice);
                            self.get_mut(id).derived.trim = Some(self.chase(row));
                            modified = true;
                        }
                    }
                }
                _ => {}
            }
            if self.get(id).derived.deflexed.is_none() && self.contains_flex(id) {
                let deflexed = self.make_deflexed(id);
                self.get_mut(id).derived.deflexed = Some(deflexed);
                modified = true;
            }
        }
        modified
    }

    /// Pack of REF-to-field modes: selecting from a name yields a name.
    fn name_pack(&mut self, structure: ModeId) -> ModeId {
        let fields = self
            .fields_of(structure)
            .expect("name pack of a non-structure")
            .to_vec();
        let fields = fields
            .into_iter()
            .map(|f| {
                let mode = self.reference_to(f.mode);
                Field { name: f.name, mode }
            })
            .collect();
        self.structure(fields)
    }

    /// STRUCT-of-ROW companion: selecting from a multiple yields a multiple.
    fn multiple_pack(&mut self, dims: u32, structure: ModeId, flexible: bool) -> ModeId {
        let fields = self
            .fields_of(structure)
            .expect("multiple pack of a non-structure")
            .to_vec();
        let fields = fields
            .into_iter()
            .map(|f| {
                let row = self.row(dims, f.mode);
                let mode = if flexible { self.flex(row) } else { row };
                Field { name: f.name, mode }
            })
            .collect();
        self.structure(fields)
    }

    /// Pairwise scan setting `equivalent` links, younger onto elder.
    fn collapse_equivalents(&mut self) -> bool {
        let mut modified = false;
        let n = self.len();
        for i in 0..n {
            let a = ModeId(i as u32);
            if self.get(a).equivalent.is_some() || !self.comparable(a) {
                continue;
            }
            for j in (i + 1)..n {
                let b = ModeId(j as u32);
                if self.get(b).equivalent.is_some() || !self.comparable(b) {
                    continue;
                }
                if self.modes_equivalent(a, b) {
                    let (elder, younger) = self.elder_of(a, b);
                    self.get_mut(younger).equivalent = Some(elder);
                    self.merge_derived(elder, younger);
                    modified = true;
                    if self.get(a).equivalent.is_some() {
                        break;
                    }
                }
            }
        }
        modified
    }

    /// Indicants become transparent through their binding, and series modes
    /// are checking-time scaffolding; neither takes part in the pairwise scan.
    fn comparable(&self, id: ModeId) -> bool {
        !matches!(
            self.get(id).shape,
            ModeShape::Indicant { .. } | ModeShape::Series { .. }
        )
    }

    /// Prefer the standard-environ resident, then the older arena entry.
    fn elder_of(&self, a: ModeId, b: ModeId) -> (ModeId, ModeId) {
        let a_std = self.get(a).in_standard;
        let b_std = self.get(b).in_standard;
        if b_std && !a_std { (b, a) } else { (a, b) }
    }

    /// Keep whichever derived slots the younger already computed.
    fn merge_derived(&mut self, elder: ModeId, younger: ModeId) {
        let younger_derived = self.get(younger).derived;
        let derived = &mut self.get_mut(elder).derived;
        derived.slice = derived.slice.or(younger_derived.slice);
        derived.deflexed = derived.deflexed.or(younger_derived.deflexed);
        derived.name = derived.name.or(younger_derived.name);
        derived.multiple = derived.multiple.or(younger_derived.multiple);
        derived.trim = derived.trim.or(younger_derived.trim);
        derived.rowed = derived.rowed.or(younger_derived.rowed);
    }

    /// Bind an applied indicant to its declared mode.
    pub fn bind_indicant(&mut self, indicant: ModeId, actual: ModeId) {
        debug_assert!(matches!(
            self.get(indicant).shape,
            ModeShape::Indicant { .. }
        ));
        let actual = self.chase(actual);
        if actual != indicant {
            self.get_mut(indicant).equivalent = Some(actual);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::Primitive;

    /// `MODE A = STRUCT (INT n, REF A rest)` built twice compares equal.
    #[test]
    fn recursive_structs_are_equivalent_under_postulation() {
        let mut table = ModeTable::new();

        let a = table.indicant("A".into());
        let ref_a = table.reference_to(a);
        let struct_a = table.structure(vec![
            Field {
                name: "n".into(),
                mode: table.int_mode,
            },
            Field {
                name: "rest".into(),
                mode: ref_a,
            },
        ]);
        table.bind_indicant(a, struct_a);

        let b = table.indicant("B".into());
        let ref_b = table.reference_to(b);
        let struct_b = table.structure(vec![
            Field {
                name: "n".into(),
                mode: table.int_mode,
            },
            Field {
                name: "rest".into(),
                mode: ref_b,
            },
        ]);
        table.bind_indicant(b, struct_b);

        assert!(table.modes_equivalent(struct_a, struct_b));
        assert!(table.modes_equivalent(a, b));
    }

    #[test]
    fn different_field_names_are_not_equivalent() {
        let mut table = ModeTable::new();
        let s1 = table.structure(vec![Field {
            name: "x".into(),
            mode: table.int_mode,
        }]);
        let s2 = table.structure(vec![Field {
            name: "y".into(),
            mode: table.int_mode,
        }]);
        assert!(!table.modes_equivalent(s1, s2));
    }

    #[test]
    fn union_member_order_is_insignificant() {
        let mut table = ModeTable::new();
        let u1 = table.union_of(vec![table.int_mode, table.real_mode]);
        let u2 = table.union_of(vec![table.real_mode, table.int_mode]);
        assert!(table.modes_equivalent(u1, u2));
    }

    #[test]
    fn closure_absorbs_and_contracts_unions() {
        let mut table = ModeTable::new();
        let inner = table.union_of(vec![table.bool_mode, table.char_mode]);
        let outer = table.union_of(vec![table.int_mode, inner, table.int_mode]);
        table.close();
        let members = table.members_of(outer).unwrap().to_vec();
        assert_eq!(
            members,
            vec![table.int_mode, table.bool_mode, table.char_mode]
        );
    }

    #[test]
    fn closure_collapses_equal_unions() {
        let mut table = ModeTable::new();
        let u1 = table.union_of(vec![table.int_mode, table.real_mode]);
        let u2 = table.union_of(vec![table.real_mode, table.int_mode]);
        table.close();
        assert_eq!(table.chase(u1), table.chase(u2));
    }

    #[test]
    fn equivalent_chains_terminate_at_canonical_mode() {
        let mut table = ModeTable::new();
        let u1 = table.union_of(vec![table.int_mode, table.real_mode]);
        let u2 = table.union_of(vec![table.real_mode, table.int_mode]);
        let u3 = table.union_of(vec![table.int_mode, table.real_mode]);
        table.close();
        for id in [u1, u2, u3] {
            let canonical = table.chase(id);
            assert!(table.get(canonical).equivalent.is_none());
        }
    }

    #[test]
    fn name_pack_of_ref_struct_is_generated() {
        let mut table = ModeTable::new();
        let s = table.structure(vec![Field {
            name: "n".into(),
            mode: table.int_mode,
        }]);
        let ref_s = table.reference_to(s);
        table.close();
        let pack = table.get(table.chase(ref_s)).derived.name.unwrap();
        let (_, mode) = table.field_mode(pack, "n").unwrap();
        assert_eq!(
            table.ref_target(mode),
            Some(table.int_mode),
            "selecting from a name must yield REF INT"
        );
    }

    #[test]
    fn multiple_pack_of_row_struct_is_generated() {
        let mut table = ModeTable::new();
        let s = table.structure(vec![Field {
            name: "x".into(),
            mode: table.real_mode,
        }]);
        let row_s = table.row(1, s);
        table.close();
        let pack = table.get(table.chase(row_s)).derived.multiple.unwrap();
        let (_, mode) = table.field_mode(pack, "x").unwrap();
        assert_eq!(table.row_of(mode), Some((1, table.real_mode)));
    }

    #[test]
    fn standard_resident_is_preferred_as_elder() {
        let mut table = ModeTable::new();
        // [] CHAR is a standard resident; an equal row built later collapses
        // onto it.
        let std_mode = table.standard(Primitive::Char, 0);
        let row = table.row(1, std_mode);
        table.close();
        assert_eq!(table.chase(row), table.row_of_char_mode);
    }
}
