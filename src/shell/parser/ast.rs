use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io;
use std::os::fd::OwnedFd;
use std::os::unix::fs::OpenOptionsExt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChainOp {
    And,
    Or,
}

/// Where a stage reads from or writes to.
#[derive(Debug, Default)]
pub enum Binding {
    /// The interpreter's own stdin/stdout.
    #[default]
    Inherited,
    /// A redirection target; the descriptor lives in [`OpenFiles`].
    File(String),
    /// One end of a pipe, owned by the stage until it is launched.
    Pipe(OwnedFd),
}

impl Binding {
    pub fn is_inherited(&self) -> bool {
        matches!(self, Binding::Inherited)
    }
}

/// One stage of the pipeline.
#[derive(Debug)]
pub struct Command {
    pub program: String,
    /// Full argument vector, `arguments[0]` being the program name.
    pub arguments: Vec<String>,
    pub input: Binding,
    pub output: Binding,
    pub chain: Option<ChainOp>,
    /// `false` when an input redirection could not be opened.
    pub runnable: bool,
}

impl Command {
    pub fn new(program: String) -> Self {
        Self {
            arguments: vec![program.clone()],
            program,
            input: Binding::Inherited,
            output: Binding::Inherited,
            chain: None,
            runnable: true,
        }
    }

    /// 输入文件缺失且没有命令时的占位命令，`arguments[0]` 为空程序名
    pub fn placeholder() -> Self {
        let mut command = Self::new(String::new());
        command.runnable = false;
        command
    }

    pub fn pipes_to_next(&self) -> bool {
        matches!(self.output, Binding::Pipe(_))
    }

    /// Closes the pipe ends this stage still holds.
    pub fn release(&mut self) {
        for binding in [&mut self.input, &mut self.output] {
            if matches!(binding, Binding::Pipe(_)) {
                *binding = Binding::Inherited;
            }
        }
    }
}

#[derive(Debug, Default)]
struct OpenFile {
    reader: Option<File>,
    writer: Option<File>,
}

/// Redirection targets opened while building a pipeline, one entry per path.
/// Everything here is closed together when the table is dropped.
#[derive(Debug, Default)]
pub struct OpenFiles {
    files: HashMap<String, OpenFile>,
}

impl OpenFiles {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_reader(&mut self, path: &str) -> io::Result<()> {
        if self.reader(path).is_some() {
            return Ok(());
        }
        let file = File::open(path)?;
        self.files.entry(path.to_owned()).or_default().reader = Some(file);
        Ok(())
    }

    pub fn open_writer(&mut self, path: &str) -> io::Result<()> {
        if self.writer(path).is_some() {
            return Ok(());
        }
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .mode(0o666)
            .open(path)?;
        self.files.entry(path.to_owned()).or_default().writer = Some(file);
        Ok(())
    }

    pub fn reader(&self, path: &str) -> Option<&File> {
        self.files.get(path).and_then(|entry| entry.reader.as_ref())
    }

    pub fn writer(&self, path: &str) -> Option<&File> {
        self.files.get(path).and_then(|entry| entry.writer.as_ref())
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// The output of a successful build, consumed by the executor.
#[derive(Debug, Default)]
pub struct Pipeline {
    pub commands: Vec<Command>,
    pub files: OpenFiles,
}
