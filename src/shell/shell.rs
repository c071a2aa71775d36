use log::debug;
use thiserror::Error;

use crate::shell::diagnostics::Diagnostics;
use crate::shell::executor::{ExecError, Executor};
use crate::shell::parser::{Build, BuildError, Lexer, PipelineBuilder, Vocabulary};

#[derive(Debug, Error)]
pub enum ShellError {
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Exec(#[from] ExecError),
}

/// Interprets single command lines against a fixed vocabulary.
pub struct Shell {
    vocabulary: Vocabulary,
    diagnostics: Diagnostics,
}

impl Shell {
    pub fn new(vocabulary: Vocabulary, diagnostics: Diagnostics) -> Self {
        Self {
            vocabulary,
            diagnostics,
        }
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Lexes, builds and runs `line`, returning its exit status.
    pub fn run(&self, line: &str) -> Result<i32, ShellError> {
        debug!("解释命令行: {:?}", line);
        let tokens = Lexer::new(line, &self.vocabulary).tokenize();

        let pipeline = match PipelineBuilder::new(tokens, &self.diagnostics).build()? {
            Build::Pipeline(pipeline) => pipeline,
            Build::EarlyExit => return Ok(0),
        };

        let status = Executor::new(&self.vocabulary, &self.diagnostics).execute(pipeline)?;
        Ok(status)
    }
}
