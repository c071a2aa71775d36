use dotenv::dotenv;
use std::env;
use std::path::PathBuf;

use crate::shell::Vocabulary;

const DEFAULT_COMMANDS: [&str; 4] = ["echo", "wc", "cat", "./tools/print_args"];
const DEFAULT_FILE_SUFFIX: &str = ".txt";

pub struct Config {
    pub name: String,
    pub commands: Vec<String>,
    pub file_suffix: String,
    pub logger_level: String,
    pub logger_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            name: String::from(env!("CARGO_CRATE_NAME")),
            commands: DEFAULT_COMMANDS.iter().map(|c| c.to_string()).collect(),
            file_suffix: String::from(DEFAULT_FILE_SUFFIX),
            logger_level: String::from("off"),
            logger_dir: None,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        // 已存在的环境变量优先于文件中的值
        if cfg!(debug_assertions) {
            dotenv::from_filename(".env.development").ok();
        } else {
            dotenv().ok();
        }

        let mut config = Config::default();

        if let Ok(commands) = env::var("LAVASH_COMMANDS") {
            config.commands = parse_list(&commands);
        }

        if let Ok(suffix) = env::var("LAVASH_FILE_SUFFIX") {
            config.file_suffix = suffix;
        }

        if let Ok(level) = env::var("LAVASH_LOG") {
            config.logger_level = level;
        }

        if let Ok(dir) = env::var("LAVASH_LOG_DIR") {
            config.logger_dir = Some(PathBuf::from(dir));
        }

        config
    }

    pub fn vocabulary(&self) -> Vocabulary {
        Vocabulary::with_suffix(self.commands.iter().cloned(), &self.file_suffix)
    }
}

fn parse_list(list: &str) -> Vec<String> {
    list.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_list() {
        assert_eq!(parse_list("echo, wc,,cat "), vec!["echo", "wc", "cat"]);
        assert!(parse_list("").is_empty());
    }

    #[test]
    fn test_default_vocabulary() {
        let vocabulary = Config::default().vocabulary();
        assert!(vocabulary.is_command("echo"));
        assert!(vocabulary.is_command("./tools/print_args"));
        assert!(!vocabulary.is_command("ls"));
        assert!(vocabulary.is_file("out.txt"));
        assert!(!vocabulary.is_file(".txt"));
    }
}
