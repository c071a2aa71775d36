use std::env;
use std::process::ExitCode;

use log::{debug, error};
use shell::{Diagnostics, Shell, ShellError};

use crate::utils::config::Config;
use crate::utils::log::init_logger;

mod shell;
mod utils;

/// Status for an invocation that does not follow `<prog> -c <command line>`,
/// and for command lines that fail to build.
const EXIT_USAGE: u8 = 2;

fn main() -> ExitCode {
    let config = Config::new();
    init_logger(&config);

    let args: Vec<String> = env::args().collect();
    let program = args.first().cloned().unwrap_or_else(|| config.name.clone());
    debug!("启动参数: {:?}", args);

    // args[1] 只是占位，通常为 `-c`
    let line = match args.len() {
        0..=2 => return ExitCode::SUCCESS,
        3 => &args[2],
        count => {
            error!("需要 2 个参数，实际为 {}", count - 1);
            eprintln!("{}: usage: {} -c <command line>", program, program);
            return ExitCode::from(EXIT_USAGE);
        }
    };

    let shell = Shell::new(config.vocabulary(), Diagnostics::new(program));
    match shell.run(line) {
        Ok(status) => ExitCode::from(u8::try_from(status).unwrap_or(u8::MAX)),
        Err(err) => {
            error!("{}", err);
            eprintln!("{}: {}", shell.diagnostics().program(), err);
            match err {
                ShellError::Build(_) => ExitCode::from(EXIT_USAGE),
                ShellError::Exec(_) => ExitCode::FAILURE,
            }
        }
    }
}
