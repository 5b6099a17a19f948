//! Coercion insertion.
//!
//! Consumes the requirements the checker recorded and rewrites the tree:
//! each demanded coercion chain wraps its node in new parent nodes, one per
//! step, tagged with the coercion kind and typed with the intermediate mode.
//! The evaluator then sees coercions as ordinary unary nodes.

use tracing::debug;

use crate::mode::{CoercionKind, DeflexRegime, ModeTable};
use crate::tree::{Attribute, NodeStatus, Tree};

use super::checker::Requirements;

/// Wrap every required coercion chain into the tree.
pub fn insert_coercions(tree: &mut Tree, modes: &mut ModeTable, requirements: &Requirements) {
    let mut inserted = 0usize;
    for (&node, &(sort, target)) in requirements {
        let Some(current) = tree.node(node).mode else {
            continue;
        };
        let Some(chain) = modes.coercion_chain(current, target, sort, DeflexRegime::Safe) else {
            // The checker already reported the failure.
            continue;
        };
        let mut wrapped = node;
        for coercion in chain {
            let attr = match coercion.kind {
                CoercionKind::Deproceduring => Attribute::DEPROCEDURING,
                CoercionKind::Dereferencing => Attribute::DEREFERENCING,
                CoercionKind::Uniting => Attribute::UNITING,
                CoercionKind::Widening => Attribute::WIDENING,
                CoercionKind::Rowing => Attribute::ROWING,
                CoercionKind::Voiding => Attribute::VOIDING,
            };
            wrapped = tree.wrap(wrapped, attr);
            tree.node_mut(wrapped).mode = Some(coercion.target);
            if coercion.kind == CoercionKind::Rowing {
                // A rowed value is a transient row.
                tree.node_mut(wrapped).status |= NodeStatus::TRANSIENT;
            }
            inserted += 1;
        }
    }
    debug!(inserted, "coercions inserted");
}

#[cfg(test)]
mod tests {
    use crate::base::Diagnostics;
    use crate::mode::ModeTable;
    use crate::parser::parse_program;
    use crate::semantic::{
        Checker, build_tables, collect_declarations, insert_coercions, SymbolTables,
    };
    use crate::tree::{Attribute, Tree};

    fn analysed(source: &str) -> (Tree, ModeTable, Diagnostics) {
        let parse = parse_program(source);
        assert!(parse.ok(), "syntax: {:?}", parse.diagnostics.sorted());
        let mut tree = parse.tree;
        let mut modes = ModeTable::new();
        let mut tabs = SymbolTables::new();
        let mut diagnostics = Diagnostics::new();
        crate::prelude::populate_standard_environ(&mut modes, &mut tabs);
        build_tables(&mut tree, &mut tabs);
        collect_declarations(&mut tree, &mut modes, &mut tabs, &mut diagnostics);
        modes.close();
        let checker = Checker::new(&mut tree, &mut modes, &mut tabs, &mut diagnostics, true);
        let requirements = checker.check_program();
        insert_coercions(&mut tree, &mut modes, &requirements);
        (tree, modes, diagnostics)
    }

    fn count(tree: &Tree, attr: Attribute) -> usize {
        let root = tree.root().unwrap();
        tree.descendants(root)
            .into_iter()
            .filter(|&n| tree.node(n).attr == attr)
            .count()
    }

    #[test]
    fn widening_wraps_an_int_source() {
        let (tree, _, diagnostics) = analysed("REAL x := 1");
        assert!(!diagnostics.has_errors(), "{:?}", diagnostics.sorted());
        assert_eq!(count(&tree, Attribute::WIDENING), 1);
    }

    #[test]
    fn dereferencing_wraps_a_name_operand() {
        let (tree, _, diagnostics) = analysed("INT i := 1; INT j = i + 1");
        assert!(!diagnostics.has_errors(), "{:?}", diagnostics.sorted());
        // i is REF INT; the formula needs INT firmly.
        assert!(count(&tree, Attribute::DEREFERENCING) >= 1);
    }

    #[test]
    fn voiding_wraps_discarded_values() {
        let (tree, _, diagnostics) = analysed("INT i := 1; i := 2; SKIP");
        assert!(!diagnostics.has_errors(), "{:?}", diagnostics.sorted());
        // The assignation's name result is discarded.
        assert!(count(&tree, Attribute::VOIDING) >= 1);
    }

    #[test]
    fn uniting_then_rowing_feeds_print() {
        let (tree, _, diagnostics) = analysed("print (1 + 2)");
        assert!(!diagnostics.has_errors(), "{:?}", diagnostics.sorted());
        assert!(count(&tree, Attribute::UNITING) >= 1);
        assert!(count(&tree, Attribute::ROWING) >= 1);
    }

    #[test]
    fn cannot_coerce_is_reported() {
        let (_, _, diagnostics) = analysed("INT i := TRUE");
        assert!(diagnostics.has_errors());
    }
}
