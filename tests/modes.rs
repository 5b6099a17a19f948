//! Mode-table laws: equivalence closure invariants, derived-form round
//! trips, and the coercibility axioms.

use once_cell::sync::Lazy;

use a68::mode::{Coercion, CoercionKind, DeflexRegime, Field, ModeTable, Sort};

static STANDARDS: Lazy<ModeTable> = Lazy::new(ModeTable::new);

fn table() -> ModeTable {
    STANDARDS.clone()
}

// ---------------------------------------------------------------------------
// closure invariants
// ---------------------------------------------------------------------------

#[test]
fn equivalent_chains_terminate_at_a_canonical_mode() {
    let mut t = table();
    for _ in 0..3 {
        let row = t.row(1, t.int_mode);
        let _ = t.reference_to(row);
        let _ = t.union_of(vec![t.int_mode, t.char_mode]);
    }
    t.close();
    for id in t.ids().collect::<Vec<_>>() {
        let canonical = t.chase(id);
        assert!(t.get(canonical).equivalent.is_none());
    }
}

#[test]
fn no_union_keeps_two_equivalent_members() {
    let mut t = table();
    let row_a = t.row(1, t.real_mode);
    let row_b = t.row(1, t.real_mode);
    let union = t.union_of(vec![t.int_mode, row_a, row_b]);
    t.close();
    let members = t.members_of(t.chase(union)).unwrap().to_vec();
    for i in 0..members.len() {
        for j in (i + 1)..members.len() {
            assert!(!t.modes_equivalent(members[i], members[j]));
        }
    }
}

#[test]
fn has_rows_tracks_row_content_transitively() {
    let mut t = table();
    let row = t.row(1, t.int_mode);
    let ref_row = t.reference_to(row);
    let nested = t.structure(vec![Field {
        name: "xs".into(),
        mode: ref_row,
    }]);
    t.close();
    t.compute_caches();
    assert_eq!(t.get(t.chase(nested)).has_rows, Some(true));
    assert_eq!(t.get(t.chase(t.int_mode)).has_rows, Some(false));
    assert_eq!(t.get(t.chase(t.string_mode)).has_flex, Some(true));
}

// ---------------------------------------------------------------------------
// derived-form laws
// ---------------------------------------------------------------------------

#[test]
fn depref_of_ref_to_is_the_identity() {
    let mut t = table();
    for mode in [t.int_mode, t.string_mode, t.complex_mode] {
        let reference = t.reference_to(mode);
        assert_eq!(t.depref_completely(reference), t.chase(mode));
    }
}

#[test]
fn derow_of_row_of_is_the_identity_for_non_rows() {
    let mut t = table();
    for mode in [t.bool_mode, t.char_mode, t.complex_mode] {
        let row = t.row(1, mode);
        assert_eq!(t.derow(row), t.chase(mode));
    }
}

#[test]
fn deflexed_modes_contain_no_flex() {
    let mut t = table();
    let inner = t.structure(vec![Field {
        name: "text".into(),
        mode: t.string_mode,
    }]);
    let row = t.row(1, inner);
    let flexible = t.flex(row);
    for mode in [t.string_mode, inner, flexible] {
        let deflexed = t.make_deflexed(mode);
        assert!(!t.contains_flex(deflexed), "{}", t.describe(deflexed));
    }
}

// ---------------------------------------------------------------------------
// coercibility axioms
// ---------------------------------------------------------------------------

#[test]
fn coercion_to_self_is_the_identity_chain_in_every_sort() {
    let mut t = table();
    for sort in [Sort::Soft, Sort::Weak, Sort::Meek, Sort::Firm, Sort::Strong] {
        let chain = t
            .coercion_chain(t.real_mode, t.real_mode, sort, DeflexRegime::Safe)
            .unwrap();
        assert!(chain.is_empty());
    }
}

#[test]
fn strong_to_void_always_succeeds() {
    let mut t = table();
    let proc_int = t.procedure(vec![], t.int_mode);
    for mode in [t.int_mode, t.string_mode, proc_int] {
        assert!(t.coercible(mode, t.void_mode, Sort::Strong, DeflexRegime::Safe));
    }
}

#[test]
fn soft_from_void_fails_unless_void() {
    let mut t = table();
    assert!(!t.coercible(t.void_mode, t.int_mode, Sort::Soft, DeflexRegime::Safe));
    assert!(t.coercible(t.void_mode, t.void_mode, Sort::Soft, DeflexRegime::Safe));
}

#[test]
fn strong_int_to_real_is_a_single_widening() {
    let mut t = table();
    let chain = t
        .coercion_chain(t.int_mode, t.real_mode, Sort::Strong, DeflexRegime::Safe)
        .unwrap();
    assert_eq!(
        chain,
        vec![Coercion {
            kind: CoercionKind::Widening,
            target: t.real_mode
        }]
    );
}

#[test]
fn firm_into_a_union_is_a_single_uniting() {
    let mut t = table();
    let union = t.union_of(vec![t.int_mode, t.char_mode]);
    let chain = t
        .coercion_chain(t.int_mode, union, Sort::Firm, DeflexRegime::Safe)
        .unwrap();
    assert_eq!(chain.len(), 1);
    assert_eq!(chain[0].kind, CoercionKind::Uniting);
}

#[test]
fn balancing_prefers_the_least_coerced_candidate() {
    let mut t = table();
    let ref_int = t.reference_to(t.int_mode);
    assert_eq!(
        t.balance(&[ref_int, ref_int], DeflexRegime::Safe),
        Some(ref_int)
    );
    assert_eq!(
        t.balance(&[ref_int, t.int_mode], DeflexRegime::Safe),
        Some(t.int_mode)
    );
    assert_eq!(
        t.balance(&[t.int_mode, t.long_real_mode], DeflexRegime::Safe),
        Some(t.long_real_mode)
    );
}
