//! The standard prelude.
//!
//! - [`stand_env`] - populates the standard environ with modes, operators
//!   and identifiers, and builds the intrinsic registry the evaluator
//!   dispatches into
//! - [`transput`] - the unformatted transput subset: value/string
//!   conversions and the default print formats
//! - [`mp`] - the multi-precision interface, satisfied by fixed-width
//!   stand-ins

pub mod mp;
pub mod stand_env;
pub mod transput;

pub use stand_env::populate_standard_environ;
