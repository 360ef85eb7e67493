//! Sieve (RFC 5228) lexing, parsing, the command tree, and serialization.

pub mod ast;
pub mod lexer;
pub mod parser;
pub mod registry;
pub mod serializer;
pub mod token;

pub use ast::{Command, Script, Value};
pub use parser::{parse, parse_with_registry};
pub use registry::{ArgKind, ArgSpec, Category, CommandDef, Positional, Registry, TagGroup, TagLiteral};
