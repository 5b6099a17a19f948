//! Nested symbol tables and tags.
//!
//! One arena holds every table, a second every tag. A table owns five
//! separate families - identifiers, indicants, labels, operators, priority
//! declarations - so one symbol may name an identifier and an operator at
//! once without clashing. Operators keep a list per symbol because
//! overloading on operand modes is the norm.

use indexmap::IndexMap;

use crate::base::Name;
use crate::genie::IntrinsicId;
use crate::mode::ModeId;
use crate::tree::NodeId;

/// Index of a symbol table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ScopeId(u32);

impl ScopeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Index of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TagId(u32);

impl TagId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// The family a tag belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TagKind {
    Identifier,
    Indicant,
    Label,
    Operator,
    Priority,
    /// Synthetic tag for error recovery.
    Anonymous,
}

/// A declaration record.
#[derive(Debug, Clone)]
pub struct Tag {
    pub kind: TagKind,
    pub name: Name,
    pub table: ScopeId,
    pub mode: Option<ModeId>,
    /// Defining occurrence.
    pub node: Option<NodeId>,
    /// Routine text, generator declarer, or initialiser body.
    pub body: Option<NodeId>,
    /// Frame slot of an identifier.
    pub offset: u32,
    /// Slots occupied.
    pub size: u32,
    /// LOC/HEAP qualifier of a variable declaration.
    pub qualifier: i64,
    pub priority: Option<u8>,
    /// Computed lexical scope (youngest environ for routines).
    pub scope: Option<u32>,
    pub scope_assigned: bool,
    pub used: bool,
    pub portable: bool,
    pub in_prelude: bool,
    /// Standard-prelude implementation, when the body is intrinsic.
    pub intrinsic: Option<IntrinsicId>,
}

impl Tag {
    fn new(kind: TagKind, name: Name, table: ScopeId) -> Self {
        Self {
            kind,
            name,
            table,
            mode: None,
            node: None,
            body: None,
            offset: 0,
            size: 1,
            qualifier: 0,
            priority: None,
            scope: None,
            scope_assigned: false,
            used: false,
            portable: true,
            in_prelude: false,
            intrinsic: None,
        }
    }
}

/// One lexical range.
#[derive(Debug)]
pub struct TableData {
    /// Lexical parent.
    pub previous: Option<ScopeId>,
    /// Environ link, distinct from `previous` for routine bodies.
    pub outer: Option<ScopeId>,
    pub level: u32,
    /// The range-introducing node.
    pub node: Option<NodeId>,
    pub identifiers: IndexMap<Name, TagId>,
    pub indicants: IndexMap<Name, TagId>,
    pub labels: IndexMap<Name, TagId>,
    pub operators: IndexMap<Name, Vec<TagId>>,
    pub priorities: IndexMap<Name, TagId>,
    /// Modes declared in this range.
    pub local_modes: Vec<ModeId>,
    /// Frame slots needed for identifiers declared here.
    pub ap_increment: u32,
    /// A routine-text range opens a procedure frame.
    pub proc_frame: bool,
}

impl TableData {
    fn new(previous: Option<ScopeId>, level: u32) -> Self {
        Self {
            previous,
            outer: previous,
            level,
            node: None,
            identifiers: IndexMap::new(),
            indicants: IndexMap::new(),
            labels: IndexMap::new(),
            operators: IndexMap::new(),
            priorities: IndexMap::new(),
            local_modes: Vec::new(),
            ap_increment: 0,
            proc_frame: false,
        }
    }
}

/// The arena of tables and tags; table 0 is the standard environ.
#[derive(Debug)]
pub struct SymbolTables {
    tables: Vec<TableData>,
    tags: Vec<Tag>,
}

impl SymbolTables {
    pub fn new() -> Self {
        Self {
            tables: vec![TableData::new(None, 0)],
            tags: Vec::new(),
        }
    }

    /// The standard environ.
    pub fn standard(&self) -> ScopeId {
        ScopeId(0)
    }

    pub fn new_table(&mut self, previous: ScopeId) -> ScopeId {
        let level = self.tables[previous.index()].level + 1;
        let id = ScopeId(self.tables.len() as u32);
        self.tables.push(TableData::new(Some(previous), level));
        id
    }

    pub fn table(&self, id: ScopeId) -> &TableData {
        &self.tables[id.index()]
    }

    pub fn table_mut(&mut self, id: ScopeId) -> &mut TableData {
        &mut self.tables[id.index()]
    }

    pub fn tag(&self, id: TagId) -> &Tag {
        &self.tags[id.index()]
    }

    pub fn tag_mut(&mut self, id: TagId) -> &mut Tag {
        &mut self.tags[id.index()]
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }

    pub fn tag_ids(&self) -> impl Iterator<Item = TagId> + use<> {
        (0..self.tags.len() as u32).map(TagId)
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    pub fn scope_ids(&self) -> impl Iterator<Item = ScopeId> + use<> {
        (0..self.tables.len() as u32).map(ScopeId)
    }

    fn alloc_tag(&mut self, kind: TagKind, name: Name, table: ScopeId) -> TagId {
        let id = TagId(self.tags.len() as u32);
        self.tags.push(Tag::new(kind, name, table));
        id
    }

    /// A synthetic tag standing in for an unresolved symbol.
    pub fn anonymous(&mut self, name: Name, table: ScopeId) -> TagId {
        self.alloc_tag(TagKind::Anonymous, name, table)
    }

    // ========================================================================
    // INSERTION
    // ========================================================================

    /// Insert a tag; `Err` carries the earlier tag of the same family.
    pub fn insert(
        &mut self,
        table: ScopeId,
        kind: TagKind,
        name: Name,
    ) -> Result<TagId, TagId> {
        let existing = match kind {
            TagKind::Identifier => self.tables[table.index()].identifiers.get(&name),
            TagKind::Indicant => self.tables[table.index()].indicants.get(&name),
            TagKind::Label => self.tables[table.index()].labels.get(&name),
            TagKind::Priority => self.tables[table.index()].priorities.get(&name),
            TagKind::Operator | TagKind::Anonymous => None,
        };
        if let Some(&existing) = existing {
            return Err(existing);
        }
        let id = self.alloc_tag(kind, name.clone(), table);
        let data = &mut self.tables[table.index()];
        match kind {
            TagKind::Identifier => {
                self.tags[id.index()].offset = data.ap_increment;
                data.ap_increment += 1;
                data.identifiers.insert(name, id);
            }
            TagKind::Indicant => {
                data.indicants.insert(name, id);
            }
            TagKind::Label => {
                data.labels.insert(name, id);
            }
            TagKind::Operator => {
                data.operators.entry(name).or_default().push(id);
            }
            TagKind::Priority => {
                data.priorities.insert(name, id);
            }
            TagKind::Anonymous => {}
        }
        Ok(id)
    }

    // ========================================================================
    // LOOKUP
    // ========================================================================

    /// Walk `previous` links towards the standard environ.
    pub fn chain(&self, from: ScopeId) -> Chain<'_> {
        Chain {
            tables: self,
            cursor: Some(from),
        }
    }

    pub fn lookup_identifier(&self, from: ScopeId, name: &str) -> Option<TagId> {
        self.chain(from)
            .find_map(|scope| self.table(scope).identifiers.get(name).copied())
    }

    pub fn lookup_indicant(&self, from: ScopeId, name: &str) -> Option<TagId> {
        self.chain(from)
            .find_map(|scope| self.table(scope).indicants.get(name).copied())
    }

    pub fn lookup_label(&self, from: ScopeId, name: &str) -> Option<TagId> {
        self.chain(from)
            .find_map(|scope| self.table(scope).labels.get(name).copied())
    }

    pub fn lookup_priority(&self, from: ScopeId, name: &str) -> Option<u8> {
        self.chain(from)
            .find_map(|scope| self.table(scope).priorities.get(name).copied())
            .and_then(|tag| self.tag(tag).priority)
    }

    /// Operator candidates from the innermost range outward; the standard
    /// environ comes last.
    pub fn operator_candidates(&self, from: ScopeId, name: &str) -> Vec<TagId> {
        let mut out = Vec::new();
        for scope in self.chain(from) {
            if let Some(tags) = self.table(scope).operators.get(name) {
                out.extend(tags.iter().copied());
            }
        }
        out
    }

    /// Does the standard environ know this symbol in any family?
    pub fn shadows_prelude(&self, name: &str) -> bool {
        let standard = self.table(self.standard());
        standard.identifiers.contains_key(name)
            || standard.indicants.contains_key(name)
            || standard.operators.contains_key(name)
    }
}

impl Default for SymbolTables {
    fn default() -> Self {
        Self::new()
    }
}

/// Iterator over a scope chain.
pub struct Chain<'a> {
    tables: &'a SymbolTables,
    cursor: Option<ScopeId>,
}

impl Iterator for Chain<'_> {
    type Item = ScopeId;

    fn next(&mut self) -> Option<ScopeId> {
        let current = self.cursor?;
        self.cursor = self.tables.table(current).previous;
        Some(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_lookup_through_chain() {
        let mut tabs = SymbolTables::new();
        let outer = tabs.new_table(tabs.standard());
        let inner = tabs.new_table(outer);
        let tag = tabs
            .insert(outer, TagKind::Identifier, "x".into())
            .unwrap();
        assert_eq!(tabs.lookup_identifier(inner, "x"), Some(tag));
        assert_eq!(tabs.lookup_identifier(outer, "x"), Some(tag));
        assert!(tabs.lookup_identifier(tabs.standard(), "x").is_none());
    }

    #[test]
    fn duplicate_in_same_family_is_rejected() {
        let mut tabs = SymbolTables::new();
        let scope = tabs.new_table(tabs.standard());
        let first = tabs
            .insert(scope, TagKind::Identifier, "x".into())
            .unwrap();
        let err = tabs
            .insert(scope, TagKind::Identifier, "x".into())
            .unwrap_err();
        assert_eq!(err, first);
    }

    #[test]
    fn families_do_not_clash() {
        let mut tabs = SymbolTables::new();
        let scope = tabs.new_table(tabs.standard());
        tabs.insert(scope, TagKind::Identifier, "x".into()).unwrap();
        assert!(tabs.insert(scope, TagKind::Label, "x".into()).is_ok());
    }

    #[test]
    fn operators_accumulate_overloads() {
        let mut tabs = SymbolTables::new();
        let scope = tabs.new_table(tabs.standard());
        tabs.insert(tabs.standard(), TagKind::Operator, "+".into())
            .unwrap();
        tabs.insert(scope, TagKind::Operator, "+".into()).unwrap();
        let candidates = tabs.operator_candidates(scope, "+");
        assert_eq!(candidates.len(), 2);
        // Innermost first; the standard environ is consulted last.
        assert_eq!(tabs.tag(candidates[0]).table, scope);
    }

    #[test]
    fn identifier_offsets_count_frame_slots() {
        let mut tabs = SymbolTables::new();
        let scope = tabs.new_table(tabs.standard());
        let a = tabs.insert(scope, TagKind::Identifier, "a".into()).unwrap();
        let b = tabs.insert(scope, TagKind::Identifier, "b".into()).unwrap();
        assert_eq!(tabs.tag(a).offset, 0);
        assert_eq!(tabs.tag(b).offset, 1);
        assert_eq!(tabs.table(scope).ap_increment, 2);
    }

    #[test]
    fn lexical_levels_increase_per_range() {
        let mut tabs = SymbolTables::new();
        let a = tabs.new_table(tabs.standard());
        let b = tabs.new_table(a);
        assert_eq!(tabs.table(tabs.standard()).level, 0);
        assert_eq!(tabs.table(a).level, 1);
        assert_eq!(tabs.table(b).level, 2);
    }
}
