//! The shared parse-tree arena.
//!
//! Every syntactic construct is a [`Node`] in one arena, linked through
//! parent/first-child/next-sibling indices. The parser produces the bare
//! tree; the analyser fills the annotation slots (mode, bound tag, enclosing
//! table, propagator) and rewrites subtrees to wrap coercions.

mod attribute;

pub use attribute::Attribute;

use bitflags::bitflags;

use crate::base::{Name, Span};
use crate::genie::Propagator;
use crate::mode::ModeId;
use crate::semantic::{ScopeId, TagId};

/// Index of a node in the tree arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

bitflags! {
    /// Per-node status bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct NodeStatus: u16 {
        /// Annotation slots are filled in.
        const INITIALISED = 1 << 0;
        /// Monitor breakpoint set on this node.
        const BREAKPOINT = 1 << 1;
        /// The scope checker flagged this unit; re-check at runtime.
        const SCOPE_ERROR = 1 << 2;
        /// Evaluation may be suspended at this node.
        const INTERRUPTIBLE = 1 << 3;
        /// Constant-folded during analysis.
        const OPTIMAL = 1 << 4;
        /// Yields a transient row that must not be assigned.
        const TRANSIENT = 1 << 5;
    }
}

/// One node of the parse tree.
///
/// `symbol` is the interned source text for leaves (identifiers, operators,
/// denotations, field selectors). `info` carries the small integer some
/// attributes need: sizety for denotations and indicant declarers, dimension
/// count for row declarers, priority for priority declarations, the LOC/HEAP
/// qualifier for generators, IS/ISNT polarity for identity relations.
#[derive(Debug, Clone)]
pub struct Node {
    pub attr: Attribute,
    pub symbol: Option<Name>,
    pub span: Span,
    pub info: i64,
    pub status: NodeStatus,
    /// Lexical level of the enclosing range.
    pub level: u32,
    parent: Option<NodeId>,
    first_child: Option<NodeId>,
    next_sibling: Option<NodeId>,
    /// Resolved mode, filled by the mode checker.
    pub mode: Option<ModeId>,
    /// Bound declaration, filled by the tag binder.
    pub tag: Option<TagId>,
    /// Enclosing symbol table, filled during table construction.
    pub table: Option<ScopeId>,
    /// Specialised evaluator action, filled after coercion insertion.
    pub propagator: Option<Propagator>,
}

impl Node {
    fn new(attr: Attribute, span: Span) -> Self {
        Self {
            attr,
            symbol: None,
            span,
            info: 0,
            status: NodeStatus::empty(),
            level: 0,
            parent: None,
            first_child: None,
            next_sibling: None,
            mode: None,
            tag: None,
            table: None,
            propagator: None,
        }
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn first_child(&self) -> Option<NodeId> {
        self.first_child
    }

    pub fn next_sibling(&self) -> Option<NodeId> {
        self.next_sibling
    }
}

/// Arena of tree nodes.
#[derive(Debug, Default)]
pub struct Tree {
    nodes: Vec<Node>,
    root: Option<NodeId>,
}

impl Tree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn alloc(&mut self, attr: Attribute, span: Span) -> NodeId {
        let id = NodeId(self.nodes.len() as u32);
        self.nodes.push(Node::new(attr, span));
        id
    }

    pub fn alloc_symbol(&mut self, attr: Attribute, span: Span, symbol: Name) -> NodeId {
        let id = self.alloc(attr, span);
        self.nodes[id.index()].symbol = Some(symbol);
        id
    }

    pub fn set_root(&mut self, root: NodeId) {
        self.root = Some(root);
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut Node {
        &mut self.nodes[id.index()]
    }

    /// Append `child` at the end of `parent`'s child list.
    pub fn attach(&mut self, parent: NodeId, child: NodeId) {
        debug_assert!(self.nodes[child.index()].parent.is_none());
        self.nodes[child.index()].parent = Some(parent);
        match self.nodes[parent.index()].first_child {
            None => self.nodes[parent.index()].first_child = Some(child),
            Some(first) => {
                let mut cursor = first;
                while let Some(next) = self.nodes[cursor.index()].next_sibling {
                    cursor = next;
                }
                self.nodes[cursor.index()].next_sibling = Some(child);
            }
        }
    }

    /// Remove `child` from its parent's child list; the subtree survives.
    pub fn detach(&mut self, child: NodeId) {
        let Some(parent) = self.nodes[child.index()].parent else {
            return;
        };
        let following = self.nodes[child.index()].next_sibling;
        if self.nodes[parent.index()].first_child == Some(child) {
            self.nodes[parent.index()].first_child = following;
        } else {
            let mut cursor = self.nodes[parent.index()].first_child;
            while let Some(c) = cursor {
                if self.nodes[c.index()].next_sibling == Some(child) {
                    self.nodes[c.index()].next_sibling = following;
                    break;
                }
                cursor = self.nodes[c.index()].next_sibling;
            }
        }
        self.nodes[child.index()].parent = None;
        self.nodes[child.index()].next_sibling = None;
    }

    /// Children of `id`, in order.
    pub fn children(&self, id: NodeId) -> Children<'_> {
        Children {
            tree: self,
            cursor: self.nodes[id.index()].first_child,
        }
    }

    /// The n-th child, if present.
    pub fn child(&self, id: NodeId, n: usize) -> Option<NodeId> {
        self.children(id).nth(n)
    }

    pub fn child_count(&self, id: NodeId) -> usize {
        self.children(id).count()
    }

    /// Children collected into a vector, for passes that mutate while walking.
    pub fn child_vec(&self, id: NodeId) -> Vec<NodeId> {
        self.children(id).collect()
    }

    /// Find the first child with the given attribute.
    pub fn child_with(&self, id: NodeId, attr: Attribute) -> Option<NodeId> {
        self.children(id).find(|&c| self.node(c).attr == attr)
    }

    /// Insert a new node of attribute `attr` between `target` and its parent.
    ///
    /// Used by the coercion inserter: `target` becomes the only child of the
    /// new node, which takes `target`'s place in its parent's child list.
    pub fn wrap(&mut self, target: NodeId, attr: Attribute) -> NodeId {
        let span = self.nodes[target.index()].span;
        let wrapper = self.alloc(attr, span);
        let parent = self.nodes[target.index()].parent;
        let following = self.nodes[target.index()].next_sibling;

        if let Some(parent) = parent {
            if self.nodes[parent.index()].first_child == Some(target) {
                self.nodes[parent.index()].first_child = Some(wrapper);
            } else {
                let mut cursor = self.nodes[parent.index()].first_child;
                while let Some(c) = cursor {
                    if self.nodes[c.index()].next_sibling == Some(target) {
                        self.nodes[c.index()].next_sibling = Some(wrapper);
                        break;
                    }
                    cursor = self.nodes[c.index()].next_sibling;
                }
            }
        } else if self.root == Some(target) {
            self.root = Some(wrapper);
        }

        {
            let w = &mut self.nodes[wrapper.index()];
            w.parent = parent;
            w.next_sibling = following;
            w.first_child = Some(target);
        }
        {
            let t = &mut self.nodes[target.index()];
            t.parent = Some(wrapper);
            t.next_sibling = None;
        }
        let (level, table) = {
            let t = &self.nodes[target.index()];
            (t.level, t.table)
        };
        let w = &mut self.nodes[wrapper.index()];
        w.level = level;
        w.table = table;
        wrapper
    }

    /// Deep-copy the subtree rooted at `id`; the copy has no parent.
    pub fn clone_subtree(&mut self, id: NodeId) -> NodeId {
        let copy = {
            let source = &self.nodes[id.index()];
            let mut node = Node::new(source.attr, source.span);
            node.symbol = source.symbol.clone();
            node.info = source.info;
            let id = NodeId(self.nodes.len() as u32);
            self.nodes.push(node);
            id
        };
        for child in self.child_vec(id) {
            let child_copy = self.clone_subtree(child);
            self.attach(copy, child_copy);
        }
        copy
    }

    /// Pre-order traversal of the subtree rooted at `id`.
    pub fn descendants(&self, id: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            out.push(current);
            let mut children = self.child_vec(current);
            children.reverse();
            stack.extend(children);
        }
        out
    }
}

/// Iterator over a node's children.
pub struct Children<'a> {
    tree: &'a Tree,
    cursor: Option<NodeId>,
}

impl Iterator for Children<'_> {
    type Item = NodeId;

    fn next(&mut self) -> Option<NodeId> {
        let current = self.cursor?;
        self.cursor = self.tree.node(current).next_sibling;
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(tree: &mut Tree, attr: Attribute) -> NodeId {
        tree.alloc(attr, Span::default())
    }

    #[test]
    fn attach_preserves_order() {
        let mut tree = Tree::new();
        let parent = leaf(&mut tree, Attribute::FORMULA);
        let a = leaf(&mut tree, Attribute::INT_DENOTATION);
        let b = leaf(&mut tree, Attribute::OPERATOR);
        let c = leaf(&mut tree, Attribute::INT_DENOTATION);
        tree.attach(parent, a);
        tree.attach(parent, b);
        tree.attach(parent, c);
        assert_eq!(tree.child_vec(parent), vec![a, b, c]);
        assert_eq!(tree.node(b).parent(), Some(parent));
    }

    #[test]
    fn wrap_splices_into_child_list() {
        let mut tree = Tree::new();
        let parent = leaf(&mut tree, Attribute::ASSIGNATION);
        let lhs = leaf(&mut tree, Attribute::IDENTIFIER);
        let rhs = leaf(&mut tree, Attribute::INT_DENOTATION);
        tree.attach(parent, lhs);
        tree.attach(parent, rhs);

        let widened = tree.wrap(rhs, Attribute::WIDENING);
        assert_eq!(tree.child_vec(parent), vec![lhs, widened]);
        assert_eq!(tree.child_vec(widened), vec![rhs]);
        assert_eq!(tree.node(rhs).parent(), Some(widened));
        assert_eq!(tree.node(rhs).next_sibling(), None);
    }

    #[test]
    fn wrap_first_child() {
        let mut tree = Tree::new();
        let parent = leaf(&mut tree, Attribute::ASSIGNATION);
        let lhs = leaf(&mut tree, Attribute::IDENTIFIER);
        let rhs = leaf(&mut tree, Attribute::INT_DENOTATION);
        tree.attach(parent, lhs);
        tree.attach(parent, rhs);

        let wrapped = tree.wrap(lhs, Attribute::DEREFERENCING);
        assert_eq!(tree.child_vec(parent), vec![wrapped, rhs]);
        assert_eq!(tree.node(wrapped).next_sibling(), Some(rhs));
    }

    #[test]
    fn clone_subtree_is_deep() {
        let mut tree = Tree::new();
        let declarer = leaf(&mut tree, Attribute::REF_DECLARER);
        let inner = leaf(&mut tree, Attribute::DECLARER_INDICANT);
        tree.node_mut(inner).symbol = Some("INT".into());
        tree.attach(declarer, inner);

        let copy = tree.clone_subtree(declarer);
        assert_ne!(copy, declarer);
        let copy_inner = tree.child(copy, 0).unwrap();
        assert_eq!(tree.node(copy_inner).symbol.as_deref(), Some("INT"));
        assert!(tree.node(copy).parent().is_none());
    }
}
