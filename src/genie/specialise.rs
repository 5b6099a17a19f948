//! Propagator assignment and constant folding.
//!
//! After coercion insertion every node receives its specialised evaluator
//! action, so evaluation is one `match` with no per-visit dispatch logic.
//! Denotations fold to constants here; a denotation the arithmetic cannot
//! represent reports a math diagnostic and stays unfolded, to fail only if
//! it is actually elaborated.

use rustc_hash::FxHashMap;

use crate::base::{Diagnostic, Diagnostics};
use crate::mode::ModeTable;
use crate::prelude::transput;
use crate::tree::{Attribute, NodeId, NodeStatus, Tree};

use super::{Propagator, value::Value};

/// Constant values folded during analysis, keyed by node.
pub type Folded = FxHashMap<NodeId, Value>;

/// Assign a propagator to every node and fold denotations.
pub fn specialise(tree: &mut Tree, modes: &ModeTable, diagnostics: &mut Diagnostics) -> Folded {
    let mut folded = Folded::default();
    let Some(root) = tree.root() else {
        return folded;
    };
    for node in tree.descendants(root) {
        let attr = tree.node(node).attr;
        let propagator = match attr {
            Attribute::INT_DENOTATION
            | Attribute::REAL_DENOTATION
            | Attribute::BOOL_DENOTATION
            | Attribute::CHAR_DENOTATION
            | Attribute::BITS_DENOTATION => {
                match fold_denotation(tree, modes, node) {
                    Some(value) => {
                        folded.insert(node, value);
                        tree.node_mut(node).status |= NodeStatus::OPTIMAL;
                        Propagator::Constant
                    }
                    None => {
                        diagnostics.push(Diagnostic::math_error(
                            tree.node(node).span,
                            format!(
                                "denotation {} cannot be represented",
                                tree.node(node).symbol.as_deref().unwrap_or("?")
                            ),
                        ));
                        Propagator::Denotation
                    }
                }
            }
            Attribute::STRING_DENOTATION => Propagator::Denotation,
            Attribute::IDENTIFIER => Propagator::QuickIdentifier,
            Attribute::DEREFERENCING => Propagator::Dereference,
            Attribute::DEPROCEDURING => Propagator::Deprocedure,
            Attribute::WIDENING => Propagator::Widen,
            Attribute::ROWING => Propagator::RowUp,
            Attribute::UNITING => Propagator::Unite,
            Attribute::VOIDING => Propagator::Void,
            Attribute::FORMULA => Propagator::Formula,
            Attribute::MONADIC_FORMULA => Propagator::MonadicFormula,
            Attribute::CALL => Propagator::Call,
            Attribute::SLICE => Propagator::Slice,
            Attribute::SELECTION => Propagator::Selection,
            Attribute::ASSIGNATION => Propagator::Assignation,
            Attribute::IDENTITY_RELATION => Propagator::IdentityRelation,
            Attribute::CAST => Propagator::Cast,
            Attribute::ROUTINE_TEXT => Propagator::RoutineText,
            Attribute::GENERATOR => Propagator::Generator,
            Attribute::JUMP => Propagator::Jump,
            Attribute::SKIP => Propagator::Skip,
            Attribute::NIHIL => Propagator::Nil,
            Attribute::SERIAL_CLAUSE => Propagator::SerialClause,
            Attribute::CLOSED_CLAUSE => Propagator::ClosedClause,
            Attribute::CONDITIONAL_CLAUSE => Propagator::ConditionalClause,
            Attribute::CASE_CLAUSE => Propagator::CaseClause,
            Attribute::CONFORMITY_CLAUSE => Propagator::ConformityClause,
            Attribute::LOOP_CLAUSE => Propagator::LoopClause,
            Attribute::COLLATERAL_CLAUSE => Propagator::Collateral,
            Attribute::PARALLEL_CLAUSE => Propagator::Parallel,
            Attribute::COMPLETER => Propagator::Completer,
            _ => continue,
        };
        tree.node_mut(node).propagator = Some(propagator);
    }
    folded
}

fn fold_denotation(tree: &Tree, modes: &ModeTable, node: NodeId) -> Option<Value> {
    let mode = tree.node(node).mode?;
    let text = tree.node(node).symbol.as_deref()?;
    transput::string_to_value(modes, mode, text)
}
