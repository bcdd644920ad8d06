//! Text format for Polish programs
//!
//! Syntax:
//! ```text
//! # f(a, b) = a * (b + 3)
//! push 3 add
//! mul
//! ```
//!
//! Words are separated by whitespace; `#` starts a comment that runs to the
//! end of the line. Recognized words:
//!
//! - `add` / `+`, `sub` / `-`, `mul` / `*`
//! - `push N` (N fits in 32 bits), `dup N`, `trace N`
//! - `pop`, `swap`
//!
//! Trace callbacks cannot be written in text, so `trace` parses into an
//! [`Instruction::Trace`] and the caller decides what to attach to it when
//! lowering with [`lower`].

use polish_core::{BinaryOpKind, Operation};
use std::fmt;

/// A word with its position (0-indexed).
#[derive(Debug, Clone)]
struct Token {
    text: String,
    line: usize,
    column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Instruction {
    Binary(BinaryOpKind),
    Dup(usize),
    Push(u32),
    Pop,
    Swap,
    Trace(usize),
}

/// An instruction and where it was written (0-indexed line and column).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Statement {
    pub instruction: Instruction,
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseError {
    pub message: String,
    /// 0-indexed
    pub line: usize,
    /// 0-indexed
    pub column: usize,
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} at line {}, column {}",
            self.message,
            self.line + 1,
            self.column + 1
        )
    }
}

impl std::error::Error for ParseError {}

/// Parse program text into statements.
pub fn parse(source: &str) -> Result<Vec<Statement>, ParseError> {
    Parser::new(source).parse()
}

/// Turn statements into operations. `trace(position, index)` builds the
/// operation for each `trace` statement.
pub fn lower(
    statements: &[Statement],
    mut trace: impl FnMut(usize, usize) -> Operation,
) -> Vec<Operation> {
    statements
        .iter()
        .enumerate()
        .map(|(position, statement)| match statement.instruction {
            Instruction::Binary(kind) => Operation::BinaryOp(kind),
            Instruction::Dup(from) => Operation::Duplicate { from },
            Instruction::Push(value) => Operation::Push { value },
            Instruction::Pop => Operation::Pop,
            Instruction::Swap => Operation::Swap,
            Instruction::Trace(index) => trace(position, index),
        })
        .collect()
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn new(source: &str) -> Self {
        Parser {
            tokens: tokenize(source),
            pos: 0,
        }
    }

    fn parse(&mut self) -> Result<Vec<Statement>, ParseError> {
        let mut statements = Vec::new();
        while let Some(token) = self.advance() {
            let instruction = match token.text.as_str() {
                "add" | "+" => Instruction::Binary(BinaryOpKind::Add),
                "sub" | "-" => Instruction::Binary(BinaryOpKind::Sub),
                "mul" | "*" => Instruction::Binary(BinaryOpKind::Mult),
                "pop" => Instruction::Pop,
                "swap" => Instruction::Swap,
                "push" => Instruction::Push(self.operand(&token)?),
                "dup" => Instruction::Dup(self.operand(&token)?),
                "trace" => Instruction::Trace(self.operand(&token)?),
                other => {
                    return Err(ParseError {
                        message: format!("Unknown word '{}'", other),
                        line: token.line,
                        column: token.column,
                    });
                }
            };
            statements.push(Statement {
                instruction,
                line: token.line,
                column: token.column,
            });
        }
        Ok(statements)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    /// Parse the numeric operand following `word`.
    fn operand<T: std::str::FromStr>(&mut self, word: &Token) -> Result<T, ParseError> {
        let Some(token) = self.advance() else {
            return Err(ParseError {
                message: format!("'{}' expects a number", word.text),
                line: word.line,
                column: word.column,
            });
        };
        parse_number(&token.text).ok_or_else(|| ParseError {
            message: format!("Invalid operand '{}' for '{}'", token.text, word.text),
            line: token.line,
            column: token.column,
        })
    }
}

/// Decimal, or hexadecimal with a `0x` prefix; `_` separators allowed.
fn parse_number<T: std::str::FromStr>(text: &str) -> Option<T> {
    let cleaned: String = text.chars().filter(|&c| c != '_').collect();
    match cleaned
        .strip_prefix("0x")
        .or_else(|| cleaned.strip_prefix("0X"))
    {
        Some(hex) => u64::from_str_radix(hex, 16)
            .ok()
            .and_then(|v| v.to_string().parse().ok()),
        None => cleaned.parse().ok(),
    }
}

fn tokenize(source: &str) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut current_start_col = 0;

    for (line, text) in source.lines().enumerate() {
        // Everything after '#' is a comment
        let code = match text.find('#') {
            Some(at) => &text[..at],
            None => text,
        };

        for (col, ch) in code.chars().enumerate() {
            if ch.is_whitespace() {
                if !current.is_empty() {
                    tokens.push(Token {
                        text: std::mem::take(&mut current),
                        line,
                        column: current_start_col,
                    });
                }
            } else {
                if current.is_empty() {
                    current_start_col = col;
                }
                current.push(ch);
            }
        }
        if !current.is_empty() {
            tokens.push(Token {
                text: std::mem::take(&mut current),
                line,
                column: current_start_col,
            });
        }
    }

    tokens
}
