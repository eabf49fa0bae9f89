//! # Sable Syntax
//!
//! Lexer, AST and recursive-descent parser for the Sable language. The
//! parser produces an owned [`ast::Program`] with source positions on every
//! node; name resolution and code generation live in `sable-compiler`.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod token;

pub use ast::{BinOp, Block, Expr, ExprKind, FuncDef, Program, Span, Stat, StatKind, TableItem, UnOp};
pub use lexer::tokenize;
pub use parser::parse;
pub use token::{Token, TokenKind};
