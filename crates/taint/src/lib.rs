//! Taint data model: flag set, shape-preserving lattice, method-parameter
//! links, cause trails and per-function contracts.
//!
//! This crate is pure algebra with no I/O and no host types. The engine
//! crate drives it from the AST; everything here is independently testable.

pub mod contract;
pub mod flags;
pub mod links;
pub mod taintedness;
pub mod trail;

pub use contract::{FunctionCausedByLines, FunctionTaintedness, PreservedTaintedness};
pub use flags::{TaintFlags, CATEGORY_NAMES};
pub use links::{FuncId, LinksSet, MethodLinks, SingleMethodLinks};
pub use taintedness::{OffsetKey, Taintedness, MAX_SHAPE_DEPTH};
pub use trail::{CausedByLine, CausedByLines, MAX_TRAIL_LINES};
