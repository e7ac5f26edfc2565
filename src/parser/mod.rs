//! Front end: lexer, parser, semantic pass
//!
//! Source text flows through a table-driven lexer into a Pratt parser,
//! then through the resolver, which pins every name to a storage class.
//! The result is an AST ready for the bytecode emitter.

pub mod ast;
pub mod lexer;
#[allow(clippy::module_inception)]
pub mod parser;
pub mod resolver;

pub use lexer::{default_lexicals, LexTable, Lexer, Token, TokenTag};
pub use parser::{Diagnostic, Diagnostics, Parser};
pub use resolver::{ResolveOutput, Resolver};
