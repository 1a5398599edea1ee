//! Trigger DSL: frontend (lexer, parser, validator, compiler) and evaluator.
//!
//! A trigger is one `fn main(events)` program. Compilation resolves every
//! event reference against the project's contract schema and yields a
//! deterministic rule tree bound to exactly one event name; evaluation
//! applies that tree to a decoded event through the document store.

pub mod ast;
pub mod compile;
pub mod eval;
pub mod lexer;
pub mod parser;
pub mod validate;

pub use ast::{CmpOp, CompiledTrigger, Cond, Expr, IdExpr, RuleNode};
pub use compile::compile;
pub use eval::{execute, EventData};
pub use lexer::strip_comments;
