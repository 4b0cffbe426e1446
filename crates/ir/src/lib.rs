//! Intermediate representation shared by the parser and the engine.
//!
//! The parser lowers tree-sitter's concrete syntax into the closed
//! [`NodeKind`] enumeration; the propagation visitor dispatches on it with a
//! single match. Location data travels in [`Meta`] alongside every node.

pub mod ast;

pub use ast::{
    Arg, ArrayEntry, BinOp, Callee, CastKind, CatchClause, ClassDef, FileAst, FunctionDef,
    MatchArm, Node, NodeKind, Param, PropDef, SwitchCase, UnaryOp, ValueHint,
};

use serde::{Deserialize, Serialize};

/// Source location of a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Meta {
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl Meta {
    pub fn new(file: impl Into<String>, line: usize, column: usize) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }
}
