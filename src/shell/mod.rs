mod diagnostics;
mod executor;
mod parser;
mod shell;

pub use diagnostics::Diagnostics;
pub use parser::Vocabulary;
pub use shell::{Shell, ShellError};
