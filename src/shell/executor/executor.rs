use std::fs::File;
use std::io::{self, ErrorKind};
use std::mem;
use std::process::{Child, Stdio};

use log::{debug, info, warn};
use thiserror::Error;

use super::process::{self, Spawn};
use crate::shell::diagnostics::Diagnostics;
use crate::shell::parser::ast::{Binding, ChainOp, Command, OpenFiles, Pipeline};
use crate::shell::parser::lexer::Vocabulary;

pub const EXIT_SUCCESS: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_NOT_FOUND: i32 = 127;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("cannot start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },
    #[error("wait failed: {0}")]
    Wait(#[source] io::Error),
    #[error("redirection target {0} is not open")]
    UnboundFile(String),
}

/// How a stage left the launch phase.
#[derive(Debug)]
enum Launch {
    /// Decided without spawning anything.
    Finished(i32),
    Spawned(Child),
}

pub struct Executor<'a> {
    vocabulary: &'a Vocabulary,
    diagnostics: &'a Diagnostics,
}

impl<'a> Executor<'a> {
    pub fn new(vocabulary: &'a Vocabulary, diagnostics: &'a Diagnostics) -> Self {
        Self {
            vocabulary,
            diagnostics,
        }
    }

    /// Runs the stages in order, honouring `&&` and `||`, and returns the
    /// status of the last stage evaluated. Stages joined by pipes run as one
    /// group. The open file table is closed when this returns.
    pub fn execute(&self, pipeline: Pipeline) -> Result<i32, ExecError> {
        let Pipeline {
            mut commands,
            files,
        } = pipeline;

        let mut status = EXIT_SUCCESS;
        let mut index = 0;

        while index < commands.len() {
            let end = group_end(&commands, index);
            status = self.run_group(&mut commands[index..=end], &files)?;
            let chain = commands[end].chain;
            index = end + 1;

            match chain {
                Some(ChainOp::Or) if status == EXIT_SUCCESS => {
                    debug!("`||` 前的命令成功，跳过剩余命令");
                    break;
                }
                Some(ChainOp::And) if status != EXIT_SUCCESS => {
                    // 跳过整段 `&&`，遇到的第一个 `||` 命令也一并跳过
                    while index < commands.len() && commands[index].chain != Some(ChainOp::Or) {
                        index += 1;
                    }
                    index += 1;
                    debug!("`&&` 前的命令失败，从第 {} 个命令继续", index);
                }
                _ => {}
            }
        }

        info!("命令行执行完毕，状态 {}", status);
        if !files.is_empty() {
            debug!("关闭 {} 个重定向文件", files.len());
        }
        Ok(status)
    }

    /// Launches every stage of a pipe group before waiting for any of them,
    /// so that no producer blocks on a full pipe whose reader never started.
    fn run_group(&self, stages: &mut [Command], files: &OpenFiles) -> Result<i32, ExecError> {
        let mut launched = Vec::with_capacity(stages.len());

        for position in 0..stages.len() {
            let launch = self.launch(&mut stages[position], files);
            // 子进程已持有自己的副本
            stages[position].release();
            match launch {
                Ok(launch) => launched.push(launch),
                Err(err) => {
                    stages.iter_mut().for_each(Command::release);
                    for launch in &mut launched {
                        if let Launch::Spawned(child) = launch {
                            let _ = process::wait(child);
                        }
                    }
                    return Err(err);
                }
            }
        }

        let mut status = EXIT_SUCCESS;
        for launch in &mut launched {
            status = match launch {
                Launch::Finished(status) => *status,
                Launch::Spawned(child) => process::wait(child)?,
            };
        }
        Ok(status)
    }

    fn launch(&self, stage: &mut Command, files: &OpenFiles) -> Result<Launch, ExecError> {
        if !stage.runnable {
            warn!("跳过 {:?}：输入不可用", stage.program);
            return Ok(Launch::Finished(EXIT_FAILURE));
        }

        match stage.program.as_str() {
            "true" => return Ok(Launch::Finished(EXIT_SUCCESS)),
            "false" => return Ok(Launch::Finished(EXIT_FAILURE)),
            _ => {}
        }

        if !self.vocabulary.is_command(&stage.program) {
            warn!("{:?} 不在白名单中", stage.program);
            self.diagnostics.command_not_found(&stage.program);
            return Ok(Launch::Finished(EXIT_NOT_FOUND));
        }

        let stdin = match mem::take(&mut stage.input) {
            Binding::File(path) => Some(duplicate(files.reader(&path), path, &stage.program)?),
            binding => pipe_end(binding),
        };
        let stdout = match mem::take(&mut stage.output) {
            Binding::File(path) => Some(duplicate(files.writer(&path), path, &stage.program)?),
            binding => pipe_end(binding),
        };

        let spawn = Spawn {
            program: &stage.program,
            arguments: &stage.arguments,
            stdin,
            stdout,
        };
        info!("执行 {:?}", stage.arguments);
        match spawn.run() {
            Ok(child) => Ok(Launch::Spawned(child)),
            Err(err) if matches!(err.kind(), ErrorKind::NotFound | ErrorKind::PermissionDenied) => {
                warn!("无法执行 {}：{}", stage.program, err);
                self.diagnostics.report(&stage.program, os_reason(&err));
                Ok(Launch::Finished(EXIT_NOT_FOUND))
            }
            Err(source) => Err(ExecError::Spawn {
                program: stage.program.clone(),
                source,
            }),
        }
    }
}

/// Index of the last stage in the pipe group starting at `start`.
fn group_end(commands: &[Command], start: usize) -> usize {
    let mut end = start;
    while end + 1 < commands.len() && commands[end].pipes_to_next() {
        end += 1;
    }
    end
}

fn pipe_end(binding: Binding) -> Option<Stdio> {
    match binding {
        Binding::Pipe(fd) => Some(Stdio::from(fd)),
        _ => None,
    }
}

/// The table keeps its descriptor; the child gets a duplicate.
fn duplicate(file: Option<&File>, path: String, program: &str) -> Result<Stdio, ExecError> {
    let file = file.ok_or(ExecError::UnboundFile(path))?;
    file.try_clone()
        .map(Stdio::from)
        .map_err(|source| ExecError::Spawn {
            program: program.to_owned(),
            source,
        })
}

/// `io::Error` without the `(os error N)` suffix.
fn os_reason(err: &io::Error) -> String {
    match err.raw_os_error() {
        Some(code) => nix::errno::Errno::from_raw(code).desc().to_owned(),
        None => err.to_string(),
    }
}
