use std::collections::HashSet;
use std::fmt;
use std::iter::Peekable;
use std::str::Chars;

use log::debug;

#[derive(Debug, PartialEq, Clone)]
pub enum Token {
    CommandName(String),
    Operator(Operator),
    FilePath(String),
    BoolLiteral(bool),
    Argument(String),
}

#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum Operator {
    And,         // &&
    Or,          // ||
    InRedirect,  // <
    OutRedirect, // >
    Pipe,        // |
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Operator::And => "&&",
            Operator::Or => "||",
            Operator::InRedirect => "<",
            Operator::OutRedirect => ">",
            Operator::Pipe => "|",
        };
        f.write_str(symbol)
    }
}

impl Token {
    /// Text of a word token as it would appear in an argument vector.
    /// Operators have no word form.
    pub fn into_word(self) -> Option<String> {
        match self {
            Token::CommandName(word) | Token::FilePath(word) | Token::Argument(word) => Some(word),
            Token::BoolLiteral(value) => Some(value.to_string()),
            Token::Operator(_) => None,
        }
    }

    pub fn is_word(&self) -> bool {
        !matches!(self, Token::Operator(_))
    }
}

/// The words the lexer gives meaning to: the whitelisted program names and
/// the rule deciding which words name redirectable files.
pub struct Vocabulary {
    commands: HashSet<String>,
    file_pattern: Box<dyn Fn(&str) -> bool>,
}

impl Vocabulary {
    pub fn new<I, S, F>(commands: I, file_pattern: F) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
        F: Fn(&str) -> bool + 'static,
    {
        Self {
            commands: commands.into_iter().map(Into::into).collect(),
            file_pattern: Box::new(file_pattern),
        }
    }

    /// Files are words strictly longer than `suffix` that end with it.
    pub fn with_suffix<I, S>(commands: I, suffix: &str) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let suffix = suffix.to_owned();
        Self::new(commands, move |word: &str| {
            word.len() > suffix.len() && word.ends_with(&suffix)
        })
    }

    pub fn is_command(&self, name: &str) -> bool {
        self.commands.contains(name)
    }

    pub fn is_file(&self, word: &str) -> bool {
        (self.file_pattern)(word)
    }

    fn classify(&self, word: String) -> Token {
        if self.is_command(&word) {
            Token::CommandName(word)
        } else if self.is_file(&word) {
            Token::FilePath(word)
        } else if word == "true" {
            Token::BoolLiteral(true)
        } else if word == "false" {
            Token::BoolLiteral(false)
        } else {
            Token::Argument(word)
        }
    }
}

impl fmt::Debug for Vocabulary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Vocabulary")
            .field("commands", &self.commands)
            .finish_non_exhaustive()
    }
}

/// Splits a command line into tokens. Never fails: malformed quoting yields
/// a best-effort token instead of an error.
pub struct Lexer<'a> {
    input: Peekable<Chars<'a>>,
    vocabulary: &'a Vocabulary,
}

impl<'a> Lexer<'a> {
    pub fn new(input: &'a str, vocabulary: &'a Vocabulary) -> Self {
        Self {
            input: input.chars().peekable(),
            vocabulary,
        }
    }

    pub fn tokenize(self) -> Vec<Token> {
        let tokens: Vec<Token> = self.collect();
        debug!("词法分析结果: {:?}", tokens);
        tokens
    }

    fn read_char(&mut self) -> Option<char> {
        self.input.next()
    }

    fn peek_char(&mut self) -> Option<char> {
        self.input.peek().copied()
    }

    fn peek_second(&self) -> Option<char> {
        let mut ahead = self.input.clone();
        ahead.next();
        ahead.next()
    }

    fn skip_whitespace(&mut self) {
        while let Some(c) = self.peek_char() {
            if !c.is_whitespace() {
                break;
            }
            self.read_char();
        }
    }

    /// True when the next character begins an operator.
    fn at_operator(&mut self) -> bool {
        match self.peek_char() {
            Some('<' | '>' | '|') => true,
            Some('&') => self.peek_second() == Some('&'),
            _ => false,
        }
    }

    fn read_operator(&mut self) -> Option<Operator> {
        if !self.at_operator() {
            return None;
        }
        let operator = match self.read_char()? {
            '<' => Operator::InRedirect,
            '>' => Operator::OutRedirect,
            '|' if self.peek_char() == Some('|') => {
                self.read_char();
                Operator::Or
            }
            '|' => Operator::Pipe,
            _ => {
                // 第二个 '&'
                self.read_char();
                Operator::And
            }
        };
        Some(operator)
    }

    fn read_word(&mut self) -> String {
        let mut word = String::new();

        while let Some(c) = self.peek_char() {
            if c.is_whitespace() || self.at_operator() {
                break;
            }
            self.read_char();
            if c == '\\' {
                if let Some(escaped) = self.read_char() {
                    word.push(escaped);
                }
            } else {
                word.push(c);
            }
        }

        word
    }

    /// Reads the body of a quoted literal; the opening quote is already
    /// consumed. An unterminated literal keeps its opening quote.
    fn read_quoted_string(&mut self) -> String {
        let mut string = String::new();
        let mut escaped = false;

        while let Some(c) = self.read_char() {
            match (escaped, c) {
                (true, _) => {
                    string.push(c);
                    escaped = false;
                }
                (false, '\\') => escaped = true,
                (false, '"') => return string,
                (false, c) => string.push(c),
            }
        }

        format!("\"{}", string)
    }
}

impl Iterator for Lexer<'_> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        loop {
            self.skip_whitespace();
            let c = self.peek_char()?;

            if let Some(operator) = self.read_operator() {
                return Some(Token::Operator(operator));
            }

            if c == '"' {
                self.read_char();
                let literal = self.read_quoted_string();
                return Some(self.vocabulary.classify(literal));
            }

            let word = self.read_word();
            if !word.is_empty() {
                return Some(self.vocabulary.classify(word));
            }
        }
    }
}
