//
// parser/mod.rs
//
// BSL lexer and parser
//

pub mod grammar;
pub mod lexer;
pub mod tree;

pub use grammar::parse_module;
pub use tree::{Node, NodeKind, ParseTree, SubDeclaration};
