//! Static scope analysis.
//!
//! For every value-producing unit the checker computes the youngest lexical
//! level its value might reach, and whether the value is a transient row.
//! An assignation whose source may be younger than its destination is a
//! potential dangling reference: it gets a warning and a SCOPE_ERROR mark so
//! the evaluator re-checks it with the actual runtime scopes. Assigning a
//! transient row is rejected outright.
//!
//! Routine texts get their youngest environ assigned here: the maximum
//! declaration level among the non-local tags their bodies apply.

use tracing::debug;

use crate::base::{Diagnostic, Diagnostics};
use crate::mode::ModeTable;
use crate::parser::QUALIFIER_HEAP;
use crate::tree::{Attribute, NodeId, NodeStatus, Tree};

use super::symbol_table::{SymbolTables, TagKind};

/// The primal scope: the standard environ and the heap.
pub const PRIMAL_SCOPE: u32 = 0;

/// A computed static scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StaticScope {
    /// Youngest lexical level the value might reach.
    pub level: u32,
    /// The value is a transient row and must not be assigned.
    pub transient: bool,
}

impl StaticScope {
    fn primal() -> Self {
        Self {
            level: PRIMAL_SCOPE,
            transient: false,
        }
    }

    fn at(level: u32) -> Self {
        Self {
            level,
            transient: false,
        }
    }
}

/// Run the scope analysis over the whole tree.
pub fn check_scopes(
    tree: &mut Tree,
    modes: &ModeTable,
    tabs: &mut SymbolTables,
    diagnostics: &mut Diagnostics,
) {
    let Some(root) = tree.root() else {
        return;
    };

    // Youngest environ of every routine text, innermost first so nested
    // routines contribute their own environs outward.
    let mut routines: Vec<NodeId> = tree
        .descendants(root)
        .into_iter()
        .filter(|&n| tree.node(n).attr == Attribute::ROUTINE_TEXT)
        .collect();
    routines.sort_by_key(|&n| std::cmp::Reverse(tree.node(n).level));
    for routine in routines {
        let environ = youngest_environ(tree, tabs, routine);
        if let Some(tag) = tree
            .node(routine)
            .parent()
            .and_then(|parent| tree.node(parent).tag)
        {
            let t = tabs.tag_mut(tag);
            t.scope = Some(environ);
            t.scope_assigned = true;
        }
        // Stash the environ on the node for anonymous routines too.
        tree.node_mut(routine).info = environ as i64;
    }

    let mut flagged = 0usize;
    for node in tree.descendants(root) {
        if tree.node(node).attr != Attribute::ASSIGNATION {
            continue;
        }
        let children = tree.child_vec(node);
        let [destination, source] = children.as_slice() else {
            continue;
        };
        let destination_scope = scope_of(tree, modes, tabs, *destination);
        let source_scope = scope_of(tree, modes, tabs, *source);
        if source_scope.transient {
            diagnostics.push(Diagnostic::error(
                tree.node(node).span,
                "a transient row cannot be assigned",
            ));
            continue;
        }
        // Only a source that itself carries scope (a name, routine or
        // stowed value with references) can dangle.
        let source_carries_scope = tree
            .node(*source)
            .mode
            .is_some_and(|m| modes.needs_trace(m) || modes.is_proc(m));
        if source_carries_scope && source_scope.level > destination_scope.level {
            diagnostics.push(Diagnostic::warning(
                tree.node(node).span,
                "the assigned value may not survive its scope",
            ));
            tree.node_mut(node).status |= NodeStatus::SCOPE_ERROR;
            flagged += 1;
        }
    }
    debug!(flagged, "scope analysis complete");
}

/// The youngest environ a routine captures: the highest declaration level
/// among tags applied inside the body but declared outside it.
fn youngest_environ(tree: &Tree, tabs: &SymbolTables, routine: NodeId) -> u32 {
    let routine_level = tabs
        .table(tree.node(routine).table.expect("stamped routine"))
        .level;
    let mut environ = PRIMAL_SCOPE;
    for node in tree.descendants(routine) {
        let applied = matches!(
            tree.node(node).attr,
            Attribute::IDENTIFIER | Attribute::OPERATOR | Attribute::JUMP
        );
        if !applied {
            continue;
        }
        let Some(tag) = tree.node(node).tag else {
            continue;
        };
        let tag = tabs.tag(tag);
        if tag.in_prelude || tag.kind == TagKind::Anonymous {
            continue;
        }
        let declared_level = tabs.table(tag.table).level;
        if declared_level < routine_level && declared_level > environ {
            environ = declared_level;
        }
    }
    environ
}

/// Static scope of the value a unit produces.
fn scope_of(tree: &Tree, modes: &ModeTable, tabs: &SymbolTables, node: NodeId) -> StaticScope {
    let transient = tree.node(node).status.contains(NodeStatus::TRANSIENT);
    let mut scope = match tree.node(node).attr {
        Attribute::IDENTIFIER => match tree.node(node).tag {
            Some(tag) => {
                let tag = tabs.tag(tag);
                if tag.qualifier == QUALIFIER_HEAP {
                    StaticScope::primal()
                } else if tag.in_prelude {
                    StaticScope::primal()
                } else {
                    StaticScope::at(tabs.table(tag.table).level)
                }
            }
            None => StaticScope::primal(),
        },
        Attribute::GENERATOR => {
            if tree.node(node).info == QUALIFIER_HEAP {
                StaticScope::primal()
            } else {
                StaticScope::at(tree.node(node).level)
            }
        }
        Attribute::ROUTINE_TEXT => StaticScope::at(tree.node(node).info.max(0) as u32),
        Attribute::NIHIL | Attribute::SKIP | Attribute::JUMP => StaticScope::primal(),
        Attribute::INT_DENOTATION
        | Attribute::REAL_DENOTATION
        | Attribute::BOOL_DENOTATION
        | Attribute::CHAR_DENOTATION
        | Attribute::STRING_DENOTATION
        | Attribute::BITS_DENOTATION => StaticScope::primal(),
        Attribute::CALL => {
            // The result of an applied routine lives at its environ level.
            match tree.child(node, 0).map(|p| scope_of(tree, modes, tabs, p)) {
                Some(primary) => StaticScope::at(primary.level),
                None => StaticScope::primal(),
            }
        }
        Attribute::ASSIGNATION => match tree.child(node, 0) {
            Some(destination) => scope_of(tree, modes, tabs, destination),
            None => StaticScope::primal(),
        },
        // Coercions and selections carry the scope of what they work on.
        Attribute::DEREFERENCING
        | Attribute::DEPROCEDURING
        | Attribute::WIDENING
        | Attribute::UNITING
        | Attribute::VOIDING
        | Attribute::ROWING
        | Attribute::SELECTION
        | Attribute::SLICE
        | Attribute::CAST => match tree.child(node, if tree.node(node).attr == Attribute::CAST { 1 } else { 0 }) {
            Some(child) => scope_of(tree, modes, tabs, child),
            None => StaticScope::primal(),
        },
        // Clauses propagate the youngest branch through balancing.
        Attribute::CLOSED_CLAUSE
        | Attribute::SERIAL_CLAUSE
        | Attribute::CONDITIONAL_CLAUSE
        | Attribute::CASE_CLAUSE
        | Attribute::CONFORMITY_CLAUSE
        | Attribute::THEN_PART
        | Attribute::ELSE_PART
        | Attribute::CASE_PART
        | Attribute::OUT_PART
        | Attribute::COMPLETER
        | Attribute::COLLATERAL_CLAUSE
        | Attribute::IDENTITY_RELATION
        | Attribute::FORMULA
        | Attribute::MONADIC_FORMULA => {
            let mut level = PRIMAL_SCOPE;
            let mut transient = false;
            for child in tree.children(node) {
                let child_scope = scope_of(tree, modes, tabs, child);
                level = level.max(child_scope.level);
                transient |= child_scope.transient;
            }
            StaticScope { level, transient }
        }
        _ => StaticScope::primal(),
    };
    scope.transient |= transient;
    scope
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mode::ModeTable;
    use crate::parser::parse_program;
    use crate::semantic::{Checker, SymbolTables, build_tables, collect_declarations};

    fn analysed(source: &str) -> (Tree, Diagnostics) {
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
        crate::semantic::insert_coercions(&mut tree, &mut modes, &requirements);
        check_scopes(&mut tree, &modes, &mut tabs, &mut diagnostics);
        (tree, diagnostics)
    }

    #[test]
    fn escaping_local_name_is_flagged() {
        let (tree, diagnostics) = analysed(
            "REF INT r := LOC INT; BEGIN INT i; r := i END",
        );
        assert!(
            diagnostics
                .iter()
                .any(|d| d.message.contains("survive its scope")),
            "{:?}",
            diagnostics.sorted()
        );
        let root = tree.root().unwrap();
        let flagged = tree
            .descendants(root)
            .into_iter()
            .any(|n| tree.node(n).status.contains(NodeStatus::SCOPE_ERROR));
        assert!(flagged);
    }

    #[test]
    fn same_level_assignment_is_clean() {
        let (_, diagnostics) = analysed("INT i := 1; INT j := 2; i := j");
        assert!(
            !diagnostics
                .iter()
                .any(|d| d.message.contains("survive its scope")),
            "{:?}",
            diagnostics.sorted()
        );
    }

    #[test]
    fn heap_generator_has_primal_scope() {
        let (_, diagnostics) = analysed("REF INT r := LOC INT; r := HEAP INT");
        assert!(
            !diagnostics
                .iter()
                .any(|d| d.message.contains("survive its scope")),
            "{:?}",
            diagnostics.sorted()
        );
    }
}
