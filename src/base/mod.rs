//! Foundation types for the a68 core.
//!
//! This module provides fundamental types used throughout the interpreter:
//! - [`Name`], [`Interner`] - String interning
//! - [`Position`], [`Span`] - Line/column positions for tree nodes
//! - [`Diagnostic`], [`Diagnostics`] - Accumulated analysis and runtime reports
//!
//! This module has NO dependencies on other a68 modules.

mod diagnostic;
mod intern;
mod position;

pub use diagnostic::{Diagnostic, Diagnostics, Severity};
pub use intern::{Interner, Name};
pub use position::{Position, Span};
