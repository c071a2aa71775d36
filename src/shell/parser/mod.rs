pub mod ast;
pub mod builder;
pub mod lexer;

pub use builder::{Build, BuildError, PipelineBuilder};
pub use lexer::{Lexer, Vocabulary};
