//! Paradox-style script parsing: lexer, recursive-descent parser, and the
//! typed AST with its JSON wire form.

pub mod ast;
pub mod lexer;
pub mod parser;

pub use ast::{AstNode, Operator, ValueType};
pub use parser::{Diagnostic, ParseOutcome, parse_file, parse_source};
