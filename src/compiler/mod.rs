//! Bytecode compiler
//!
//! Turns a resolved AST into a flat `Program`. Emission is driven by
//! dispatch tables keyed by AST node tag; the driver installs an emitter
//! object per tag at startup, which keeps the grammar decoupled from the
//! bytecode.

pub mod disasm;
pub mod emitter;
pub mod program;

pub use emitter::{emit_program, EmitCtx, EmitExpr, EmitStmt, EmitterTables};
pub use program::{ConstPool, FunctionProto, Program, UpvalSrc};

use crate::parser::parser::Diagnostics;
use thiserror::Error;

/// Anything that can go wrong between source text and a `Program`.
#[derive(Debug, Error)]
pub enum CompileError {
    /// Lex/parse diagnostics; the unit produced no AST.
    #[error("{0}")]
    Parse(Diagnostics),
    /// Name resolution or scoping diagnostics.
    #[error("{0}")]
    Semantic(Diagnostics),
    /// Internal invariant violated during emission.
    #[error("codegen error: {0}")]
    Codegen(String),
}
