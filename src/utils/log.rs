use crate::utils::config::Config;
use chrono::Local;
use env_logger::{Builder, Target};
use log::LevelFilter;
use std::fs::{self, File};
use std::io::{self, Write};
use std::path::Path;
use std::process;

pub fn init_logger(config: &Config) {
    let level = parse_level(&config.logger_level);

    let target = match &config.logger_dir {
        Some(dir) if level != LevelFilter::Off => match open_log_file(dir) {
            Ok(file) => Target::Pipe(Box::new(file)),
            Err(err) => {
                eprintln!("{}: cannot open log file in {}: {}", config.name, dir.display(), err);
                Target::Stderr
            }
        },
        _ => Target::Stderr,
    };

    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "[PID:{}][{}] {} - {}",
                process::id(),
                record.level(),
                Local::now().format("%Y-%m-%d %H:%M:%S"),
                record.args()
            )
        })
        .target(target)
        .filter(Some(&config.name), level)
        .filter(None, LevelFilter::Warn.min(level))
        .init();

    log::debug!("日志级别设置为: {}", level);
}

fn parse_level(level: &str) -> LevelFilter {
    match level {
        level if level.eq_ignore_ascii_case("error") => LevelFilter::Error,
        level if level.eq_ignore_ascii_case("warn") => LevelFilter::Warn,
        level if level.eq_ignore_ascii_case("info") => LevelFilter::Info,
        level if level.eq_ignore_ascii_case("debug") => LevelFilter::Debug,
        level if level.eq_ignore_ascii_case("trace") => LevelFilter::Trace,
        _ => LevelFilter::Off,
    }
}

fn open_log_file(dir: &Path) -> io::Result<File> {
    fs::create_dir_all(dir)?;
    let date = Local::now().format("%Y-%m-%d");
    File::options()
        .create(true)
        .append(true)
        .open(dir.join(format!("lavash_{}.log", date)))
}
