//! Symbol-table tree construction.
//!
//! Every range-introducing node gets a fresh table whose parent is the
//! enclosing range's table, and every node is stamped with its table and
//! lexical level. The wrinkles are positional: the enquiry range of a
//! conditional or case clause encloses the arms, the loop range (holding the
//! FOR identifier) encloses the WHILE and DO parts but not the FROM/BY/TO
//! units, and a routine text opens a procedure frame.

use crate::tree::{Attribute, NodeId, Tree};

use super::symbol_table::{ScopeId, SymbolTables};

/// Build the table tree and stamp nodes; returns the program's own range.
pub fn build_tables(tree: &mut Tree, tabs: &mut SymbolTables) -> Option<ScopeId> {
    let root = tree.root()?;
    build(tree, tabs, root, tabs.standard());
    tree.node(root).table
}

fn build(tree: &mut Tree, tabs: &mut SymbolTables, node: NodeId, inherited: ScopeId) {
    let attr = tree.node(node).attr;
    let scope = if attr.introduces_range() {
        let scope = tabs.new_table(inherited);
        tabs.table_mut(scope).node = Some(node);
        if attr == Attribute::ROUTINE_TEXT {
            tabs.table_mut(scope).proc_frame = true;
        }
        scope
    } else {
        inherited
    };
    {
        let n = tree.node_mut(node);
        n.table = Some(scope);
        n.level = tabs.table(scope).level;
    }

    match attr {
        // The enquiry range encloses the arms, so declarations in the
        // enquiry are visible in every part.
        Attribute::CONDITIONAL_CLAUSE | Attribute::CASE_CLAUSE | Attribute::CONFORMITY_CLAUSE => {
            let children = tree.child_vec(node);
            let mut arm_scope = scope;
            for (i, child) in children.into_iter().enumerate() {
                build(tree, tabs, child, arm_scope);
                if i == 0 {
                    // The first child is the enquiry clause; its fresh
                    // table hosts the arms.
                    arm_scope = tree.node(child).table.unwrap_or(scope);
                }
            }
        }
        // FROM/BY/TO units belong to the range outside the loop; the FOR
        // identifier lives in the loop range enclosing WHILE and DO.
        Attribute::LOOP_CLAUSE => {
            let mut part_scope = scope;
            for child in tree.child_vec(node) {
                match tree.node(child).attr {
                    Attribute::FROM_PART | Attribute::BY_PART | Attribute::TO_PART => {
                        build(tree, tabs, child, inherited);
                    }
                    Attribute::DO_PART | Attribute::UNTIL_PART => {
                        build(tree, tabs, child, part_scope);
                        part_scope = tree.node(child).table.unwrap_or(part_scope);
                    }
                    Attribute::WHILE_PART => {
                        build(tree, tabs, child, scope);
                        part_scope = tree.node(child).table.unwrap_or(scope);
                    }
                    _ => build(tree, tabs, child, scope),
                }
            }
        }
        _ => {
            for child in tree.child_vec(node) {
                build(tree, tabs, child, scope);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_program;

    fn analysed(source: &str) -> (Tree, SymbolTables) {
        let parse = parse_program(source);
        assert!(parse.ok());
        let mut tree = parse.tree;
        let mut tabs = SymbolTables::new();
        build_tables(&mut tree, &mut tabs);
        (tree, tabs)
    }

    fn find(tree: &Tree, attr: Attribute) -> NodeId {
        let root = tree.root().unwrap();
        tree.descendants(root)
            .into_iter()
            .find(|&n| tree.node(n).attr == attr)
            .expect("node with attribute")
    }

    #[test]
    fn program_range_sits_above_nested_ranges() {
        let (tree, tabs) = analysed("BEGIN INT x = 1; print (x) END");
        let program = find(&tree, Attribute::PARTICULAR_PROGRAM);
        let closed = find(&tree, Attribute::CLOSED_CLAUSE);
        let program_scope = tree.node(program).table.unwrap();
        let closed_scope = tree.node(closed).table.unwrap();
        assert_ne!(program_scope, closed_scope);
        assert_eq!(tabs.table(closed_scope).previous, Some(program_scope));
        assert_eq!(tabs.table(closed_scope).level, 2);
    }

    #[test]
    fn conditional_arms_hang_off_the_enquiry_range() {
        let (tree, tabs) = analysed("IF TRUE THEN 1 ELSE 2 FI");
        let enquiry = find(&tree, Attribute::ENQUIRY_CLAUSE);
        let then_part = find(&tree, Attribute::THEN_PART);
        let else_part = find(&tree, Attribute::ELSE_PART);
        let enquiry_scope = tree.node(enquiry).table.unwrap();
        assert_eq!(
            tabs.table(tree.node(then_part).table.unwrap()).previous,
            Some(enquiry_scope)
        );
        assert_eq!(
            tabs.table(tree.node(else_part).table.unwrap()).previous,
            Some(enquiry_scope)
        );
    }

    #[test]
    fn loop_parts_split_between_outer_and_loop_ranges() {
        let (tree, _tabs) = analysed("FOR i FROM 1 TO 10 DO SKIP OD");
        let loop_clause = find(&tree, Attribute::LOOP_CLAUSE);
        let from_part = find(&tree, Attribute::FROM_PART);
        let do_part = find(&tree, Attribute::DO_PART);
        let loop_scope = tree.node(loop_clause).table.unwrap();
        // FROM is evaluated outside the loop range.
        assert_ne!(tree.node(from_part).table.unwrap(), loop_scope);
        // DO opens its own range beneath the loop range.
        assert!(tree.node(do_part).level > tree.node(loop_clause).level);
    }

    #[test]
    fn routine_text_opens_a_procedure_frame() {
        let (tree, tabs) = analysed("PROC f = (INT n) INT: n");
        let routine = find(&tree, Attribute::ROUTINE_TEXT);
        let scope = tree.node(routine).table.unwrap();
        assert!(tabs.table(scope).proc_frame);
        assert!(tabs.table(scope).outer.is_some());
    }
}
