//! # a68-core
//!
//! Core library for Algol 68 interpretation: the mode (type) system, the
//! semantic analyser, and the tree-walking evaluator.
//!
//! ## Module Structure (dependency order)
//!
//! ```text
//! genie     → evaluator: frames, heap, propagators
//!   ↓
//! prelude   → standard environ, intrinsics, transput subset
//!   ↓
//! semantic  → symbol tables, tag binding, mode checking, coercion,
//!             scope analysis
//!   ↓
//! mode      → mode arena, equivalence, derivation, coercibility
//!   ↓
//! tree      → shared parse-tree arena with annotation slots
//!   ↓
//! parser    → logos lexer, recursive-descent parser
//!   ↓
//! base      → primitives (interning, positions, diagnostics)
//! ```

// ============================================================================
// MODULES (dependency order: base → parser → tree → mode → semantic → genie)
// ============================================================================

/// Foundation types: interning, source positions, diagnostics
pub mod base;

/// Front end: logos lexer and recursive-descent parser
pub mod parser;

/// The shared tree: node arena, attributes, annotation slots
pub mod tree;

/// The mode system: arena, equivalence, derivation, coercibility
pub mod mode;

/// Semantic analysis: tables, tags, checking, coercion, scopes
pub mod semantic;

/// The evaluator: values, frames, heap, propagators
pub mod genie;

/// The standard prelude: environ population, intrinsics, transput
pub mod prelude;

// Re-export foundation types
pub use base::{Diagnostic, Diagnostics, Severity, Span};
pub use genie::GenieOutcome;
pub use mode::{ModeId, ModeTable, Sort};
pub use tree::{Attribute, NodeId, Tree};

use thiserror::Error;

use genie::{Folded, Genie, IntrinsicFn};
use mode::DeflexRegime;
use semantic::{Checker, SymbolTables};

/// Knobs of one interpreter instance.
#[derive(Debug, Clone)]
pub struct Options {
    /// Check row bounds and initialisation at runtime.
    pub bounds_checks: bool,
    /// Map `longsqrt` onto `sqrt` when no exact tag matches.
    pub lengthety_mapping: bool,
    /// How freely FLEX and non-FLEX rows interchange.
    pub deflex_regime: DeflexRegime,
    /// Operand+frame storage limit, in value slots.
    pub frame_stack_slots: usize,
    /// Frame depth limit ("program too complex" beyond it).
    pub frame_stack_depth: usize,
    /// Heap capacity the collection trigger samples occupancy against.
    pub heap_slots: usize,
    /// Report warnings alongside errors.
    pub warnings: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            bounds_checks: true,
            lengthety_mapping: true,
            deflex_regime: DeflexRegime::Safe,
            frame_stack_slots: 1 << 20,
            frame_stack_depth: 1 << 13,
            heap_slots: 1 << 22,
            warnings: true,
        }
    }
}

/// Why a program could not be taken to completion.
#[derive(Debug, Error)]
pub enum A68Error {
    /// The front end rejected the source text.
    #[error("{0} syntax error(s) in the source")]
    Syntax(usize),
    /// The analyser accumulated errors; evaluation never started.
    #[error("{0} error(s) reported during analysis")]
    Analysis(usize),
    /// Evaluation aborted with a runtime error.
    #[error("runtime error: {0}")]
    Runtime(String),
}

/// The interpreter driver: owns the tree, the mode table, the symbol
/// tables and the diagnostics, and runs the pipeline over them.
pub struct Interpreter {
    options: Options,
    tree: Tree,
    modes: ModeTable,
    tabs: SymbolTables,
    registry: Vec<IntrinsicFn>,
    folded: Folded,
    diagnostics: Diagnostics,
    analysed: bool,
}

impl Interpreter {
    pub fn new(source: &str) -> Self {
        Self::with_options(source, Options::default())
    }

    pub fn with_options(source: &str, options: Options) -> Self {
        let parse = parser::parse_program(source);
        Self {
            options,
            tree: parse.tree,
            modes: ModeTable::new(),
            tabs: SymbolTables::new(),
            registry: Vec::new(),
            folded: Folded::default(),
            diagnostics: parse.diagnostics,
            analysed: false,
        }
    }

    /// Everything reported so far, syntax through runtime.
    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    pub fn tree(&self) -> &Tree {
        &self.tree
    }

    pub fn modes(&self) -> &ModeTable {
        &self.modes
    }

    /// Run the analysis pipeline: populate the standard environ, build the
    /// table tree, collect declarations, close the mode table, check modes,
    /// insert coercions, check scopes, and specialise propagators.
    ///
    /// Semantic errors accumulate; a non-zero error count aborts here and
    /// evaluation never starts.
    pub fn analyse(&mut self) -> Result<(), A68Error> {
        if self.analysed {
            return self.analysis_verdict();
        }
        self.analysed = true;
        if self.diagnostics.has_errors() {
            return Err(A68Error::Syntax(self.diagnostics.error_count()));
        }

        self.registry = prelude::populate_standard_environ(&mut self.modes, &mut self.tabs);
        semantic::build_tables(&mut self.tree, &mut self.tabs);
        semantic::collect_declarations(
            &mut self.tree,
            &mut self.modes,
            &mut self.tabs,
            &mut self.diagnostics,
        );
        self.modes.close();
        semantic::check_mode_relations(
            &self.tree,
            &mut self.modes,
            &self.tabs,
            &mut self.diagnostics,
        );
        self.modes.compute_caches();

        let checker = Checker::new(
            &mut self.tree,
            &mut self.modes,
            &mut self.tabs,
            &mut self.diagnostics,
            self.options.lengthety_mapping,
        );
        let requirements = checker.check_program();
        semantic::insert_coercions(&mut self.tree, &mut self.modes, &requirements);
        semantic::check_scopes(
            &mut self.tree,
            &self.modes,
            &mut self.tabs,
            &mut self.diagnostics,
        );
        self.folded = genie::specialise(&mut self.tree, &self.modes, &mut self.diagnostics);
        if self.options.warnings {
            self.warn_unused_tags();
        }
        self.analysis_verdict()
    }

    fn warn_unused_tags(&mut self) {
        for tag_id in self.tabs.tag_ids().collect::<Vec<_>>() {
            let tag = self.tabs.tag(tag_id);
            if tag.in_prelude || tag.used || tag.kind != semantic::TagKind::Identifier {
                continue;
            }
            let Some(node) = tag.node else { continue };
            self.diagnostics.push(Diagnostic::warning(
                self.tree.node(node).span,
                format!("{} is never used", tag.name),
            ));
        }
    }

    fn analysis_verdict(&self) -> Result<(), A68Error> {
        if self.diagnostics.has_errors() {
            Err(A68Error::Analysis(self.diagnostics.error_count()))
        } else {
            Ok(())
        }
    }

    /// Analyse if needed, then evaluate; returns the captured standard
    /// output. A runtime error lands both here and in the diagnostics.
    pub fn run(&mut self) -> Result<String, A68Error> {
        self.analyse()?;
        let genie = Genie::new(
            &self.tree,
            &self.modes,
            &self.tabs,
            &self.options,
            &self.registry,
            &self.folded,
        );
        let outcome = genie.run();
        match outcome.error {
            Some(diagnostic) => {
                let message = diagnostic.to_string();
                self.diagnostics.push(diagnostic);
                Err(A68Error::Runtime(message))
            }
            None => Ok(outcome.output),
        }
    }
}

/// Parse, analyse and run one program, returning its output.
pub fn run_program(source: &str) -> Result<String, A68Error> {
    Interpreter::new(source).run()
}
