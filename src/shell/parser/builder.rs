use std::io;
use std::iter::Peekable;
use std::os::fd::OwnedFd;
use std::vec;

use log::{debug, warn};
use nix::errno::Errno;
use thiserror::Error;

use super::ast::{Binding, ChainOp, Command, OpenFiles, Pipeline};
use super::lexer::{Operator, Token};
use crate::shell::diagnostics::Diagnostics;

/// Word that, in command position after a pipe, ends the run with status 0.
#[cfg(feature = "exit-sentinel")]
pub const EXIT_SENTINEL: &str = "1984";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("pipe must be followed by a command")]
    MissingCommandAfterPipe,
    #[error("redirection must be followed by a file")]
    MissingFileAfterRedirect,
    #[error("redirection must be followed by a command")]
    MissingCommandAfterRedirect,
    #[error("syntax error near unexpected token `{0}'")]
    UnexpectedOperator(Operator),
    #[error("could not create pipe: {0}")]
    Pipe(#[source] Errno),
    #[error("cannot open {path}: {source}")]
    OpenOutput {
        path: String,
        #[source]
        source: io::Error,
    },
}

#[derive(Debug)]
pub enum Build {
    Pipeline(Pipeline),
    /// The exit sentinel was found; nothing is to be run.
    EarlyExit,
}

/// Turns the token stream into the ordered list of stages, opening the
/// pipes and redirection targets they are bound to.
pub struct PipelineBuilder<'a> {
    tokens: Peekable<vec::IntoIter<Token>>,
    diagnostics: &'a Diagnostics,
    commands: Vec<Command>,
    files: OpenFiles,
}

impl<'a> PipelineBuilder<'a> {
    pub fn new(tokens: Vec<Token>, diagnostics: &'a Diagnostics) -> Self {
        Self {
            tokens: tokens.into_iter().peekable(),
            diagnostics,
            commands: Vec::new(),
            files: OpenFiles::new(),
        }
    }

    pub fn build(mut self) -> Result<Build, BuildError> {
        while let Some(token) = self.tokens.next() {
            match token {
                Token::Operator(Operator::Pipe) => {
                    if let Some(exit) = self.pipe()? {
                        return Ok(exit);
                    }
                }
                Token::Operator(Operator::OutRedirect) => self.redirect_output()?,
                Token::Operator(Operator::InRedirect) => self.redirect_input()?,
                Token::Operator(Operator::And) => self.chain(ChainOp::And)?,
                Token::Operator(Operator::Or) => self.chain(ChainOp::Or)?,
                word => {
                    let command = self.read_command(word);
                    self.commands.push(command);
                }
            }
        }

        debug!("构建的命令序列: {:?}", self.commands);
        Ok(Build::Pipeline(Pipeline {
            commands: self.commands,
            files: self.files,
        }))
    }

    /// The last stage, unless a chain operator already closed it.
    fn current_command(&mut self) -> Option<&mut Command> {
        self.commands
            .last_mut()
            .filter(|command| command.chain.is_none())
    }

    /// Builds a stage from `first` and the run of words following it.
    fn read_command(&mut self, first: Token) -> Command {
        let mut command = Command::new(first.into_word().unwrap_or_default());

        while let Some(token) = self.tokens.next_if(Token::is_word) {
            if let Some(word) = token.into_word() {
                command.arguments.push(word);
            }
        }

        command
    }

    fn next_command(&mut self) -> Option<Command> {
        let first = self.tokens.next_if(Token::is_word)?;
        Some(self.read_command(first))
    }

    fn pipe(&mut self) -> Result<Option<Build>, BuildError> {
        let name = match self.tokens.next() {
            Some(Token::CommandName(name)) => name,
            #[cfg(feature = "exit-sentinel")]
            Some(Token::Argument(word)) if word == EXIT_SENTINEL => {
                debug!("管道后遇到退出标记，停止执行");
                return Ok(Some(Build::EarlyExit));
            }
            _ => return Err(BuildError::MissingCommandAfterPipe),
        };

        let (reader, writer) = open_pipe().map_err(BuildError::Pipe)?;
        match self.current_command() {
            Some(producer) if producer.output.is_inherited() => {
                producer.output = Binding::Pipe(writer);
            }
            // 没有命令写入该管道，读端直接读到文件结束
            _ => drop(writer),
        }

        let mut consumer = self.read_command(Token::CommandName(name));
        consumer.input = Binding::Pipe(reader);
        self.commands.push(consumer);
        Ok(None)
    }

    fn redirect_target(&mut self) -> Result<String, BuildError> {
        match self.tokens.next() {
            Some(Token::FilePath(path)) => Ok(path),
            _ => Err(BuildError::MissingFileAfterRedirect),
        }
    }

    /// The stage a redirection applies to: the current one, or else the one
    /// starting right after the file name.
    fn redirected_command(&mut self) -> Result<&mut Command, BuildError> {
        if self.current_command().is_none() {
            let command = self
                .next_command()
                .ok_or(BuildError::MissingCommandAfterRedirect)?;
            self.commands.push(command);
        }
        self.commands
            .last_mut()
            .ok_or(BuildError::MissingCommandAfterRedirect)
    }

    fn redirect_output(&mut self) -> Result<(), BuildError> {
        let path = self.redirect_target()?;
        self.files
            .open_writer(&path)
            .map_err(|source| BuildError::OpenOutput {
                path: path.clone(),
                source,
            })?;

        self.redirected_command()?.output = Binding::File(path);
        Ok(())
    }

    fn redirect_input(&mut self) -> Result<(), BuildError> {
        let path = self.redirect_target()?;
        match self.files.open_reader(&path) {
            Ok(()) => {
                self.redirected_command()?.input = Binding::File(path);
            }
            Err(err) => {
                warn!("无法打开输入文件 {}: {}", path, err);
                match err.raw_os_error() {
                    Some(code) if err.kind() != io::ErrorKind::NotFound => {
                        self.diagnostics.report(&path, Errno::from_raw(code).desc())
                    }
                    _ => self.diagnostics.no_such_file(&path),
                }
                self.skip_stage();
            }
        }
        Ok(())
    }

    /// Marks the stage whose input could not be opened as not runnable,
    /// adding a placeholder when there is no such stage.
    fn skip_stage(&mut self) {
        if let Some(command) = self.current_command() {
            command.runnable = false;
            return;
        }
        let mut command = self.next_command().unwrap_or_else(Command::placeholder);
        command.runnable = false;
        self.commands.push(command);
    }

    fn chain(&mut self, operator: ChainOp) -> Result<(), BuildError> {
        match self.current_command() {
            Some(command) => {
                command.chain = Some(operator);
                Ok(())
            }
            None => Err(BuildError::UnexpectedOperator(match operator {
                ChainOp::And => Operator::And,
                ChainOp::Or => Operator::Or,
            })),
        }
    }
}

/// Creates a pipe whose ends are closed on exec, so a child keeps only the
/// ends it rebinds onto its standard streams.
fn open_pipe() -> nix::Result<(OwnedFd, OwnedFd)> {
    #[cfg(any(target_os = "linux", target_os = "android", target_os = "freebsd"))]
    {
        nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
    }
    #[cfg(not(any(target_os = "linux", target_os = "android", target_os = "freebsd")))]
    {
        use nix::fcntl::{fcntl, FcntlArg, FdFlag};
        use std::os::fd::AsRawFd;

        let (reader, writer) = nix::unistd::pipe()?;
        for fd in [&reader, &writer] {
            fcntl(fd.as_raw_fd(), FcntlArg::F_SETFD(FdFlag::FD_CLOEXEC))?;
        }
        Ok((reader, writer))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shell::parser::lexer::{Lexer, Vocabulary};
    use assert_matches::assert_matches;

    fn vocabulary() -> Vocabulary {
        Vocabulary::with_suffix(["echo", "wc", "cat"], ".txt")
    }

    fn build(input: &str) -> Result<Build, BuildError> {
        let vocabulary = vocabulary();
        let tokens = Lexer::new(input, &vocabulary).tokenize();
        PipelineBuilder::new(tokens, &Diagnostics::new("lavash")).build()
    }

    #[allow(clippy::unwrap_used)]
    fn pipeline(input: &str) -> Pipeline {
        match build(input).unwrap() {
            Build::Pipeline(pipeline) => pipeline,
            Build::EarlyExit => panic!("Expected a pipeline"),
        }
    }

    #[test]
    fn test_simple_command() {
        let pipeline = pipeline("echo hello world.txt true echo");
        assert_eq!(pipeline.commands.len(), 1);
        let command = &pipeline.commands[0];
        assert_eq!(command.program, "echo");
        assert_eq!(
            command.arguments,
            vec!["echo", "hello", "world.txt", "true", "echo"]
        );
        assert!(command.input.is_inherited());
        assert!(command.output.is_inherited());
        assert_eq!(command.chain, None);
        assert!(command.runnable);
    }

    #[test]
    fn test_argument_count_is_unbounded() {
        let line = format!("echo {}", vec!["x"; 64].join(" "));
        let pipeline = pipeline(&line);
        assert_eq!(pipeline.commands[0].arguments.len(), 65);
    }

    #[test]
    fn test_pipeline() {
        let pipeline = pipeline("echo hi | wc -c | cat");
        let commands = &pipeline.commands;
        assert_eq!(commands.len(), 3);
        assert_matches!(commands[0].input, Binding::Inherited);
        assert_matches!(commands[0].output, Binding::Pipe(_));
        assert_matches!(commands[1].input, Binding::Pipe(_));
        assert_matches!(commands[1].output, Binding::Pipe(_));
        assert_matches!(commands[2].input, Binding::Pipe(_));
        assert_matches!(commands[2].output, Binding::Inherited);
        assert_eq!(commands[1].arguments, vec!["wc", "-c"]);
    }

    #[test]
    fn test_pipe_must_be_followed_by_command() {
        assert_matches!(build("echo hi | ls"), Err(BuildError::MissingCommandAfterPipe));
        assert_matches!(build("echo hi |"), Err(BuildError::MissingCommandAfterPipe));
        assert_matches!(build("echo hi | | wc"), Err(BuildError::MissingCommandAfterPipe));
    }

    #[cfg(feature = "exit-sentinel")]
    #[test]
    fn test_exit_sentinel() {
        assert_matches!(build("echo hi | 1984"), Ok(Build::EarlyExit));
        assert_matches!(build("1984"), Ok(Build::Pipeline(_)));
    }

    #[cfg(not(feature = "exit-sentinel"))]
    #[test]
    fn test_exit_sentinel_disabled() {
        assert_matches!(build("echo hi | 1984"), Err(BuildError::MissingCommandAfterPipe));
    }

    #[test]
    fn test_leading_pipe_reads_closed_upstream() {
        let pipeline = pipeline("| wc");
        assert_eq!(pipeline.commands.len(), 1);
        assert_matches!(pipeline.commands[0].input, Binding::Pipe(_));
    }

    #[test]
    fn test_pipe_after_chain_does_not_connect() {
        let pipeline = pipeline("echo a && | wc");
        assert_matches!(pipeline.commands[0].output, Binding::Inherited);
        assert_matches!(pipeline.commands[1].input, Binding::Pipe(_));
    }

    #[test]
    fn test_chain_operators() {
        let pipeline = pipeline("true && echo a || echo b");
        let chains: Vec<_> = pipeline.commands.iter().map(|c| c.chain).collect();
        assert_eq!(chains, vec![Some(ChainOp::And), Some(ChainOp::Or), None]);
        assert_eq!(pipeline.commands[0].program, "true");
    }

    #[test]
    fn test_chain_without_command() {
        assert_matches!(
            build("&& echo a"),
            Err(BuildError::UnexpectedOperator(Operator::And))
        );
        assert_matches!(
            build("echo a || || echo b"),
            Err(BuildError::UnexpectedOperator(Operator::Or))
        );
    }

    #[test]
    fn test_bare_word_synthesizes_command() {
        let pipeline = pipeline("ls -la && false");
        assert_eq!(pipeline.commands.len(), 2);
        assert_eq!(pipeline.commands[0].program, "ls");
        assert_eq!(pipeline.commands[0].arguments, vec!["ls", "-la"]);
        assert_eq!(pipeline.commands[1].program, "false");
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_output_redirection() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let path = path.to_str().unwrap();

        let pipeline = pipeline(&format!("echo hello > {}", path));
        assert_eq!(pipeline.commands.len(), 1);
        assert_eq!(pipeline.commands[0].arguments, vec!["echo", "hello"]);
        assert_matches!(&pipeline.commands[0].output, Binding::File(p) if p == path);
        assert!(pipeline.files.writer(path).is_some());
        assert!(std::path::Path::new(path).exists());
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_redirection_before_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let path = path.to_str().unwrap();

        let pipeline = pipeline(&format!("> {} echo hi", path));
        assert_eq!(pipeline.commands.len(), 1);
        assert_eq!(pipeline.commands[0].arguments, vec!["echo", "hi"]);
        assert_matches!(pipeline.commands[0].output, Binding::File(_));
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_same_file_is_opened_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.txt");
        let path = path.to_str().unwrap();

        let pipeline = pipeline(&format!("echo a > {0} && cat < {0} > {0}", path));
        assert_eq!(pipeline.files.len(), 1);
        assert_matches!(pipeline.commands[1].input, Binding::File(_));
        assert_matches!(pipeline.commands[1].output, Binding::File(_));
    }

    #[test]
    fn test_redirect_needs_file() {
        assert_matches!(build("echo a >"), Err(BuildError::MissingFileAfterRedirect));
        assert_matches!(build("echo a > out"), Err(BuildError::MissingFileAfterRedirect));
        assert_matches!(build("cat < wc"), Err(BuildError::MissingFileAfterRedirect));
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_redirect_needs_command() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        let line = format!("> {}", path.to_str().unwrap());
        assert_matches!(build(&line), Err(BuildError::MissingCommandAfterRedirect));
    }

    #[test]
    fn test_output_open_failure_is_fatal() {
        assert_matches!(
            build("echo a > /nonexistent/lavash/out.txt"),
            Err(BuildError::OpenOutput { .. })
        );
    }

    #[test]
    fn test_missing_input_marks_stage() {
        let pipeline = pipeline("cat < /nonexistent/lavash/missing.txt && echo ok");
        assert_eq!(pipeline.commands.len(), 2);
        assert!(!pipeline.commands[0].runnable);
        assert_eq!(pipeline.commands[0].chain, Some(ChainOp::And));
        assert!(pipeline.commands[1].runnable);
        assert!(pipeline.files.is_empty());
    }

    #[test]
    fn test_missing_input_before_command() {
        let pipeline = pipeline("< /nonexistent/lavash/missing.txt cat -n");
        assert_eq!(pipeline.commands.len(), 1);
        assert_eq!(pipeline.commands[0].arguments, vec!["cat", "-n"]);
        assert!(!pipeline.commands[0].runnable);
    }

    #[test]
    fn test_missing_input_placeholder() {
        let pipeline = pipeline("< /nonexistent/lavash/missing.txt");
        assert_eq!(pipeline.commands.len(), 1);
        assert!(pipeline.commands[0].program.is_empty());
        assert!(!pipeline.commands[0].runnable);
    }

    #[test]
    fn test_empty_input() {
        let pipeline = pipeline("");
        assert!(pipeline.commands.is_empty());
        assert!(pipeline.files.is_empty());
    }
}
