//! Semantic analysis.
//!
//! The passes run leaves-first over the shared tree:
//! 1. [`tables`] builds the nested symbol-table tree and stamps every node
//!    with its range and lexical level.
//! 2. [`declarations`] collects tags for all five families, constructs modes
//!    from declarers, binds indicants, and checks well-formedness.
//! 3. [`checker`] deduces a mode for every unit (soids), resolves applied
//!    identifiers and operators, and records the coercion each context
//!    demands.
//! 4. [`coercer`] rewrites the tree, wrapping each unit in its recorded
//!    coercion chain.
//! 5. [`scope_check`] computes static scopes and flags dangling references.

mod checker;
mod coercer;
mod declarations;
mod scope_check;
mod symbol_table;
mod tables;

pub use checker::{Checker, Soid};
pub use coercer::insert_coercions;
pub use declarations::{check_mode_relations, collect_declarations, declarer_mode, routine_mode};
pub use scope_check::check_scopes;
pub use symbol_table::{ScopeId, SymbolTables, Tag, TagId, TagKind};
pub use tables::build_tables;
