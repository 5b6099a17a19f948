//! Declaration collection.
//!
//! Two sweeps over the tree. The first enters an indicant tag with a
//! placeholder mode for every `MODE` definition, so declarers may refer to
//! indicants declared later or mutually. The second constructs a mode for
//! every declarer and routine text, binds the placeholders, and enters
//! identifier, operator, priority and label tags with their frame offsets.
//!
//! Well-formedness (the yin-yang rule) is checked once every indicant is
//! bound. Relation checks that need coercibility (union members, operator
//! overloads) run after the equivalence closure, from
//! [`check_mode_relations`].

use tracing::debug;

use crate::base::{Diagnostic, Diagnostics};
use crate::mode::{Field, ModeId, ModeShape, ModeTable, Primitive};
use crate::tree::{Attribute, NodeId, Tree};

use super::symbol_table::{ScopeId, SymbolTables, TagId, TagKind};

/// Enter all tags and construct all declared modes.
pub fn collect_declarations(
    tree: &mut Tree,
    modes: &mut ModeTable,
    tabs: &mut SymbolTables,
    diagnostics: &mut Diagnostics,
) {
    let Some(root) = tree.root() else {
        return;
    };
    let nodes = tree.descendants(root);

    // Sweep 1: indicant tags with placeholder modes.
    for &node in &nodes {
        if tree.node(node).attr != Attribute::DEFINING_INDICANT {
            continue;
        }
        let scope = tree.node(node).table.expect("stamped node");
        let name = tree.node(node).symbol.clone().expect("indicant symbol");
        match tabs.insert(scope, TagKind::Indicant, name.clone()) {
            Ok(tag) => {
                let placeholder = modes.indicant(name);
                tabs.tag_mut(tag).mode = Some(placeholder);
                tabs.tag_mut(tag).node = Some(node);
                tree.node_mut(node).tag = Some(tag);
                if tabs.shadows_prelude(tree.node(node).symbol.as_ref().unwrap()) {
                    diagnostics.push(Diagnostic::warning(
                        tree.node(node).span,
                        format!("{} hides a standard prelude tag", tree.node(node).symbol.as_ref().unwrap()),
                    ));
                }
            }
            Err(_) => diagnostics.push(Diagnostic::error(
                tree.node(node).span,
                format!("{name} is declared more than once in this range"),
            )),
        }
    }

    // Sweep 2: modes and the remaining tag families.
    for &node in &nodes {
        let attr = tree.node(node).attr;
        let scope = match tree.node(node).table {
            Some(scope) => scope,
            None => continue,
        };
        match attr {
            Attribute::MODE_DECLARATION => {
                for defining in tree.child_vec(node) {
                    let Some(tag) = tree.node(defining).tag else {
                        continue;
                    };
                    let declarer = tree.child(defining, 0).expect("mode declarer");
                    let actual = declarer_mode(tree, modes, tabs, diagnostics, declarer, scope);
                    let placeholder = tabs.tag(tag).mode.expect("placeholder mode");
                    if modes.chase(actual) == modes.chase(placeholder) {
                        diagnostics.push(Diagnostic::error(
                            tree.node(defining).span,
                            format!(
                                "mode {} is not well formed",
                                tree.node(defining).symbol.as_deref().unwrap_or("?")
                            ),
                        ));
                    } else {
                        modes.bind_indicant(placeholder, actual);
                    }
                }
            }
            Attribute::IDENTITY_DECLARATION => {
                let children = tree.child_vec(node);
                let declared = children
                    .first()
                    .filter(|&&c| tree.node(c).attr != Attribute::DEFINING_IDENTIFIER)
                    .map(|&declarer| {
                        declarer_mode(tree, modes, tabs, diagnostics, declarer, scope)
                    });
                for &defining in &children {
                    if tree.node(defining).attr != Attribute::DEFINING_IDENTIFIER {
                        continue;
                    }
                    let mode = declared.unwrap_or_else(|| {
                        // PROC f = routine text: the mode is the routine's.
                        match tree.child(defining, 0) {
                            Some(source)
                                if tree.node(source).attr == Attribute::ROUTINE_TEXT =>
                            {
                                routine_mode(tree, modes, tabs, diagnostics, source)
                            }
                            _ => modes.hip_mode,
                        }
                    });
                    enter_identifier(tree, tabs, diagnostics, defining, scope, mode, node);
                }
            }
            Attribute::VARIABLE_DECLARATION => {
                let children = tree.child_vec(node);
                let declarer = children[0];
                // The generator binds a name mode that belongs to the
                // enclosing level, not to the child range.
                let mode_home = tabs.table(scope).previous.unwrap_or(scope);
                let object = declarer_mode(tree, modes, tabs, diagnostics, declarer, mode_home);
                let name_mode = modes.reference_to(object);
                tabs.table_mut(mode_home).local_modes.push(name_mode);
                for &defining in &children[1..] {
                    if tree.node(defining).attr != Attribute::DEFINING_IDENTIFIER {
                        continue;
                    }
                    if let Some(tag) =
                        enter_identifier(tree, tabs, diagnostics, defining, scope, name_mode, node)
                    {
                        tabs.tag_mut(tag).qualifier = tree.node(node).info;
                        tabs.tag_mut(tag).body = Some(declarer);
                    }
                }
            }
            Attribute::OPERATOR_DECLARATION => {
                for defining in tree.child_vec(node) {
                    let name = tree.node(defining).symbol.clone().expect("operator symbol");
                    let routine = tree.child(defining, 0).expect("operator routine");
                    let mode = routine_mode(tree, modes, tabs, diagnostics, routine);
                    let tag = tabs
                        .insert(scope, TagKind::Operator, name)
                        .expect("operators always insert");
                    tabs.tag_mut(tag).mode = Some(mode);
                    tabs.tag_mut(tag).node = Some(defining);
                    tabs.tag_mut(tag).body = Some(routine);
                    tree.node_mut(defining).tag = Some(tag);
                }
            }
            Attribute::PRIORITY_DECLARATION => {
                for defining in tree.child_vec(node) {
                    let name = tree.node(defining).symbol.clone().expect("operator symbol");
                    match tabs.insert(scope, TagKind::Priority, name.clone()) {
                        Ok(tag) => {
                            tabs.tag_mut(tag).priority =
                                Some(tree.node(defining).info.clamp(1, 9) as u8);
                            tabs.tag_mut(tag).node = Some(defining);
                            tree.node_mut(defining).tag = Some(tag);
                        }
                        Err(_) => diagnostics.push(Diagnostic::error(
                            tree.node(defining).span,
                            format!("priority of {name} is declared more than once"),
                        )),
                    }
                }
            }
            Attribute::ROUTINE_TEXT => {
                for parameter in tree.child_vec(node) {
                    if tree.node(parameter).attr != Attribute::PARAMETER {
                        continue;
                    }
                    let declarer = tree.child(parameter, 0).expect("parameter declarer");
                    let mode = declarer_mode(tree, modes, tabs, diagnostics, declarer, scope);
                    enter_identifier(tree, tabs, diagnostics, parameter, scope, mode, node);
                }
            }
            Attribute::FOR_PART => {
                let mode = modes.int_mode;
                enter_identifier(tree, tabs, diagnostics, node, scope, mode, node);
            }
            Attribute::SPECIFIED_UNIT => {
                let declarer = tree.child(node, 0).expect("specifier declarer");
                let mode = declarer_mode(tree, modes, tabs, diagnostics, declarer, scope);
                if tree.node(node).symbol.is_some() {
                    enter_identifier(tree, tabs, diagnostics, node, scope, mode, node);
                }
            }
            Attribute::LABEL => {
                let name = tree.node(node).symbol.clone().expect("label symbol");
                match tabs.insert(scope, TagKind::Label, name.clone()) {
                    Ok(tag) => {
                        tabs.tag_mut(tag).node = Some(node);
                        tree.node_mut(node).tag = Some(tag);
                    }
                    Err(_) => diagnostics.push(Diagnostic::error(
                        tree.node(node).span,
                        format!("label {name} is declared more than once in this range"),
                    )),
                }
            }
            Attribute::CAST | Attribute::GENERATOR => {
                let declarer = tree.child(node, 0).expect("declarer");
                declarer_mode(tree, modes, tabs, diagnostics, declarer, scope);
            }
            _ => {}
        }
    }

    // Every indicant is bound; enforce the yin-yang rule.
    for tag in tabs.tag_ids().collect::<Vec<_>>() {
        if tabs.tag(tag).kind != TagKind::Indicant {
            continue;
        }
        let Some(mode) = tabs.tag(tag).mode else {
            continue;
        };
        if !modes.check_well_formed(mode) {
            let span = tabs
                .tag(tag)
                .node
                .map(|n| tree.node(n).span)
                .unwrap_or_default();
            diagnostics.push(Diagnostic::error(
                span,
                format!("mode {} is not well formed", tabs.tag(tag).name),
            ));
        }
    }
    debug!(tags = tabs.tag_count(), modes = modes.len(), "declarations collected");
}

fn enter_identifier(
    tree: &mut Tree,
    tabs: &mut SymbolTables,
    diagnostics: &mut Diagnostics,
    defining: NodeId,
    scope: ScopeId,
    mode: ModeId,
    declaration: NodeId,
) -> Option<TagId> {
    let name = tree.node(defining).symbol.clone().expect("identifier symbol");
    match tabs.insert(scope, TagKind::Identifier, name.clone()) {
        Ok(tag) => {
            tabs.tag_mut(tag).mode = Some(mode);
            tabs.tag_mut(tag).node = Some(declaration);
            tree.node_mut(defining).tag = Some(tag);
            tree.node_mut(defining).mode = Some(mode);
            if tabs.shadows_prelude(&name) {
                diagnostics.push(Diagnostic::warning(
                    tree.node(defining).span,
                    format!("{name} hides a standard prelude tag"),
                ));
            }
            Some(tag)
        }
        Err(_) => {
            diagnostics.push(Diagnostic::error(
                tree.node(defining).span,
                format!("{name} is declared more than once in this range"),
            ));
            None
        }
    }
}

// ============================================================================
// DECLARER MODES
// ============================================================================

/// Construct the mode a declarer denotes, recording it in `into`'s mode
/// list. Bound units inside row declarers are checked later with the units.
pub fn declarer_mode(
    tree: &mut Tree,
    modes: &mut ModeTable,
    tabs: &mut SymbolTables,
    diagnostics: &mut Diagnostics,
    node: NodeId,
    into: ScopeId,
) -> ModeId {
    if let Some(mode) = tree.node(node).mode {
        return mode;
    }
    let mode = build_declarer_mode(tree, modes, tabs, diagnostics, node, into);
    tree.node_mut(node).mode = Some(mode);
    tabs.table_mut(into).local_modes.push(mode);
    mode
}

fn build_declarer_mode(
    tree: &mut Tree,
    modes: &mut ModeTable,
    tabs: &mut SymbolTables,
    diagnostics: &mut Diagnostics,
    node: NodeId,
    into: ScopeId,
) -> ModeId {
    let span = tree.node(node).span;
    match tree.node(node).attr {
        Attribute::DECLARER_INDICANT => {
            let name = tree.node(node).symbol.clone().expect("indicant symbol");
            let sizety = tree.node(node).info as i8;
            match name.as_str() {
                "INT" => modes.standard(Primitive::Int, sizety),
                "REAL" => modes.standard(Primitive::Real, sizety),
                "BOOL" => modes.standard(Primitive::Bool, sizety),
                "CHAR" => modes.standard(Primitive::Char, sizety),
                "BITS" => modes.standard(Primitive::Bits, sizety),
                "BYTES" => modes.standard(Primitive::Bytes, sizety),
                "SEMA" => modes.sema_mode,
                "VOID" => modes.void_mode,
                "STRING" => modes.string_mode,
                "COMPL" => {
                    if sizety >= 1 {
                        modes.long_complex_mode
                    } else {
                        modes.complex_mode
                    }
                }
                _ => {
                    let scope = tree.node(node).table.expect("stamped declarer");
                    match tabs.lookup_indicant(scope, &name) {
                        Some(tag) => {
                            tabs.tag_mut(tag).used = true;
                            tree.node_mut(node).tag = Some(tag);
                            tabs.tag(tag).mode.unwrap_or(modes.hip_mode)
                        }
                        None => {
                            diagnostics.push(Diagnostic::error(
                                span,
                                format!("mode {name} has not been declared"),
                            ));
                            modes.hip_mode
                        }
                    }
                }
            }
        }
        Attribute::REF_DECLARER => {
            let inner = tree.child(node, 0).expect("REF target");
            let inner = declarer_mode(tree, modes, tabs, diagnostics, inner, into);
            modes.reference_to(inner)
        }
        Attribute::FLEX_DECLARER => {
            let inner = tree.child(node, 0).expect("FLEX row");
            let inner = declarer_mode(tree, modes, tabs, diagnostics, inner, into);
            if modes.row_of(inner).is_none() {
                diagnostics.push(Diagnostic::error(span, "FLEX needs a row declarer"));
                return inner;
            }
            modes.flex(inner)
        }
        Attribute::ROW_DECLARER => {
            let dims = tree.node(node).info.max(1) as u32;
            let elem = tree.child(node, 1).expect("row element declarer");
            let elem = declarer_mode(tree, modes, tabs, diagnostics, elem, into);
            modes.row(dims, elem)
        }
        Attribute::PROC_DECLARER => {
            let children = tree.child_vec(node);
            let (params, result) = children.split_at(children.len() - 1);
            let params = params
                .iter()
                .map(|&p| declarer_mode(tree, modes, tabs, diagnostics, p, into))
                .collect();
            let result = declarer_mode(tree, modes, tabs, diagnostics, result[0], into);
            modes.procedure(params, result)
        }
        Attribute::STRUCT_DECLARER => {
            let mut fields: Vec<Field> = Vec::new();
            for field in tree.child_vec(node) {
                let name = tree.node(field).symbol.clone().expect("field selector");
                let declarer = tree.child(field, 0).expect("field declarer");
                let mode = declarer_mode(tree, modes, tabs, diagnostics, declarer, into);
                if fields.iter().any(|f| f.name == name) {
                    diagnostics.push(Diagnostic::error(
                        tree.node(field).span,
                        format!("field {name} occurs more than once"),
                    ));
                    continue;
                }
                fields.push(Field { name, mode });
            }
            modes.structure(fields)
        }
        Attribute::UNION_DECLARER => {
            let members = tree
                .child_vec(node)
                .into_iter()
                .map(|m| declarer_mode(tree, modes, tabs, diagnostics, m, into))
                .collect();
            modes.union_of(members)
        }
        _ => {
            diagnostics.push(Diagnostic::error(span, "expected a declarer"));
            modes.hip_mode
        }
    }
}

/// `PROC (params) result` mode of a routine text.
pub fn routine_mode(
    tree: &mut Tree,
    modes: &mut ModeTable,
    tabs: &mut SymbolTables,
    diagnostics: &mut Diagnostics,
    routine: NodeId,
) -> ModeId {
    if let Some(mode) = tree.node(routine).mode {
        return mode;
    }
    let scope = tree.node(routine).table.expect("stamped routine");
    let children = tree.child_vec(routine);
    let mut params = Vec::new();
    let mut result = modes.void_mode;
    for child in children {
        match tree.node(child).attr {
            Attribute::PARAMETER => {
                let declarer = tree.child(child, 0).expect("parameter declarer");
                params.push(declarer_mode(tree, modes, tabs, diagnostics, declarer, scope));
            }
            Attribute::REF_DECLARER
            | Attribute::FLEX_DECLARER
            | Attribute::ROW_DECLARER
            | Attribute::PROC_DECLARER
            | Attribute::STRUCT_DECLARER
            | Attribute::UNION_DECLARER
            | Attribute::DECLARER_INDICANT => {
                result = declarer_mode(tree, modes, tabs, diagnostics, child, scope);
            }
            _ => {}
        }
    }
    let mode = modes.procedure(params, result);
    tree.node_mut(routine).mode = Some(mode);
    mode
}

// ============================================================================
// RELATION CHECKS (after the closure)
// ============================================================================

/// Union members may not be firmly related; operator overloads in one range
/// may not have firmly related operand packs. Both are diagnostics.
pub fn check_mode_relations(
    tree: &Tree,
    modes: &mut ModeTable,
    tabs: &SymbolTables,
    diagnostics: &mut Diagnostics,
) {
    let Some(root) = tree.root() else {
        return;
    };
    for node in tree.descendants(root) {
        if tree.node(node).attr != Attribute::UNION_DECLARER {
            continue;
        }
        let Some(union) = tree.node(node).mode else {
            continue;
        };
        let members = match modes.members_of(union) {
            Some(members) => members.to_vec(),
            None => continue,
        };
        for i in 0..members.len() {
            for j in (i + 1)..members.len() {
                if modes.firmly_related(members[i], members[j]) {
                    diagnostics.push(Diagnostic::error(
                        tree.node(node).span,
                        format!(
                            "united modes {} and {} are firmly related",
                            modes.describe(members[i]),
                            modes.describe(members[j])
                        ),
                    ));
                }
            }
        }
    }

    let mut clashes: Vec<(NodeId, String)> = Vec::new();
    for scope in tabs.scope_ids() {
        for tags in tabs.table(scope).operators.values() {
            for i in 0..tags.len() {
                for j in (i + 1)..tags.len() {
                    let a = tabs.tag(tags[i]).mode;
                    let b = tabs.tag(tags[j]).mode;
                    let (Some(a), Some(b)) = (a, b) else { continue };
                    if operands_related(modes, a, b) {
                        if let Some(node) = tabs.tag(tags[j]).node {
                            clashes.push((
                                node,
                                format!(
                                    "operator {} has firmly related operand modes in this range",
                                    tabs.tag(tags[j]).name
                                ),
                            ));
                        }
                    }
                }
            }
        }
    }
    for (node, message) in clashes {
        diagnostics.push(Diagnostic::error(tree.node(node).span, message));
    }
}

fn operands_related(modes: &mut ModeTable, a: ModeId, b: ModeId) -> bool {
    let (pa, pb) = match (modes.shape(a).clone(), modes.shape(b).clone()) {
        (ModeShape::Proc { params: pa, .. }, ModeShape::Proc { params: pb, .. }) => (pa, pb),
        _ => return false,
    };
    pa.len() == pb.len()
        && !pa.is_empty()
        && pa
            .iter()
            .zip(&pb)
            .all(|(&x, &y)| modes.firmly_related(x, y))
}

