use std::io;
use std::os::unix::process::ExitStatusExt;
use std::process::{Child, Command, Stdio};

use log::debug;

use super::ExecError;

/// 信号终止的子进程状态为 128 + 信号编号
const SIGNAL_BASE: i32 = 128;

/// 启动一个外部程序所需的全部信息
pub struct Spawn<'a> {
    pub program: &'a str,
    /// `arguments[0]` 为程序名，不会传给 `Command::args`
    pub arguments: &'a [String],
    pub stdin: Option<Stdio>,
    pub stdout: Option<Stdio>,
}

impl Spawn<'_> {
    /// 启动子进程。名字中带 `/` 的程序按路径执行，否则在 `PATH` 中查找。
    pub fn run(self) -> io::Result<Child> {
        let mut command = Command::new(self.program);
        command.args(self.arguments.iter().skip(1));

        if let Some(stdin) = self.stdin {
            command.stdin(stdin);
        }
        if let Some(stdout) = self.stdout {
            command.stdout(stdout);
        }

        let child = command.spawn()?;
        debug!("启动 {}，pid {}", self.program, child.id());
        Ok(child)
    }
}

/// 等待子进程结束，返回它的退出状态
pub fn wait(child: &mut Child) -> Result<i32, ExecError> {
    let pid = child.id();
    let status = child.wait().map_err(ExecError::Wait)?;

    match (status.code(), status.signal()) {
        (Some(code), _) => {
            debug!("pid {} 退出，状态 {}", pid, code);
            Ok(code)
        }
        (None, Some(signal)) => {
            debug!("pid {} 被信号 {} 终止", pid, signal);
            Ok(SIGNAL_BASE + signal)
        }
        (None, None) => Ok(SIGNAL_BASE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spawn(program: &str, arguments: &[&str]) -> io::Result<Child> {
        let arguments: Vec<String> = arguments.iter().map(|a| a.to_string()).collect();
        Spawn {
            program,
            arguments: &arguments,
            stdin: None,
            stdout: Some(Stdio::null()),
        }
        .run()
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_wait_exit_code() {
        let mut child = spawn("sh", &["sh", "-c", "exit 3"]).unwrap();
        assert_eq!(wait(&mut child).unwrap(), 3);
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_wait_killed_by_signal() {
        let mut child = spawn("sh", &["sh", "-c", "kill -9 $$"]).unwrap();
        assert_eq!(wait(&mut child).unwrap(), 128 + 9);
    }

    #[allow(clippy::unwrap_used)]
    #[test]
    fn test_absolute_path_is_not_searched() {
        let mut child = spawn("/bin/sh", &["/bin/sh", "-c", "exit 0"]).unwrap();
        assert_eq!(wait(&mut child).unwrap(), 0);

        let err = spawn("/nonexistent/lavash/sh", &["sh"]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
