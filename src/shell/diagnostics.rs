use std::fmt::Display;

/// User-facing error messages, written to stderr in the form
/// `<prog>: line 1: <subject>: <reason>`.
#[derive(Debug, Clone)]
pub struct Diagnostics {
    program: String,
}

impl Diagnostics {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn line(&self, subject: &str, reason: impl Display) -> String {
        format!("{}: line 1: {}: {}", self.program, subject, reason)
    }

    pub fn report(&self, subject: &str, reason: impl Display) {
        eprintln!("{}", self.line(subject, reason));
    }

    pub fn command_not_found(&self, name: &str) {
        self.report(name, "command not found");
    }

    pub fn no_such_file(&self, path: &str) {
        self.report(path, "No such file or directory");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_line_format() {
        let diagnostics = Diagnostics::new("./lavash");
        assert_eq!(
            diagnostics.line("ls", "command not found"),
            "./lavash: line 1: ls: command not found"
        );
    }
}
