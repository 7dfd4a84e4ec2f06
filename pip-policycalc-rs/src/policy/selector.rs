// SPDX-License-Identifier: Apache-2.0
// Copyright 2024-2026 CAB Ingénierie / Christophe ABOULICAM
//! Label selector parser and evaluator
//!
//! Implements the Calico selector expression language:
//!
//! ```text
//! all()                      has(k)              !has(k)
//! k == 'v'                   k != 'v'
//! k in {'a', 'b'}            k not in {'a', 'b'}
//! k starts with 'p'          k ends with 's'     k contains 's'
//! !expr    expr && expr    expr || expr    (expr)
//! ```
//!
//! Strings may use single or double quotes. An empty selector is `all()`.

use std::collections::BTreeMap;
use std::fmt;

use thiserror::Error;

/// Errors produced while parsing a selector.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SelectorError {
    #[error("Parse error at position {position}: {message}")]
    ParseError { position: usize, message: String },

    #[error("Unexpected token at position {position}: expected {expected}, found '{found}'")]
    UnexpectedToken {
        position: usize,
        expected: String,
        found: String,
    },

    #[error("Unexpected end of selector: expected {0}")]
    UnexpectedEof(String),

    #[error("Selector nesting exceeds {max} levels at position {position}")]
    TooDeep { position: usize, max: usize },
}

/// Maximum nesting of `!` and parentheses in one selector.
pub const MAX_NESTING_DEPTH: usize = 128;

// =============================================================================
// Lexer
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
enum TokenKind {
    Identifier,
    StringLiteral,
    Eq,
    Ne,
    Not,
    And,
    Or,
    OpenParen,
    CloseParen,
    OpenBrace,
    CloseBrace,
    Comma,
    Eof,
}

impl fmt::Display for TokenKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identifier => write!(f, "label key"),
            Self::StringLiteral => write!(f, "string literal"),
            Self::Eq => write!(f, "=="),
            Self::Ne => write!(f, "!="),
            Self::Not => write!(f, "!"),
            Self::And => write!(f, "&&"),
            Self::Or => write!(f, "||"),
            Self::OpenParen => write!(f, "("),
            Self::CloseParen => write!(f, ")"),
            Self::OpenBrace => write!(f, "{{"),
            Self::CloseBrace => write!(f, "}}"),
            Self::Comma => write!(f, ","),
            Self::Eof => write!(f, "end of selector"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Token {
    kind: TokenKind,
    text: String,
    position: usize,
}

fn is_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '/' | '-')
}

fn tokenize(input: &str) -> Result<Vec<Token>, SelectorError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        if c.is_whitespace() {
            pos += 1;
            continue;
        }

        let start = pos;
        let two = |a: char, b: char| c == a && chars.get(pos + 1) == Some(&b);
        let (kind, len) = if two('=', '=') {
            (TokenKind::Eq, 2)
        } else if two('!', '=') {
            (TokenKind::Ne, 2)
        } else if two('&', '&') {
            (TokenKind::And, 2)
        } else if two('|', '|') {
            (TokenKind::Or, 2)
        } else {
            match c {
                '!' => (TokenKind::Not, 1),
                '(' => (TokenKind::OpenParen, 1),
                ')' => (TokenKind::CloseParen, 1),
                '{' => (TokenKind::OpenBrace, 1),
                '}' => (TokenKind::CloseBrace, 1),
                ',' => (TokenKind::Comma, 1),
                '\'' | '"' => {
                    let quote = c;
                    let mut end = pos + 1;
                    while end < chars.len() && chars[end] != quote {
                        end += 1;
                    }
                    if end >= chars.len() {
                        return Err(SelectorError::ParseError {
                            position: start,
                            message: "unterminated string".to_string(),
                        });
                    }
                    let text: String = chars[pos + 1..end].iter().collect();
                    tokens.push(Token {
                        kind: TokenKind::StringLiteral,
                        text,
                        position: start,
                    });
                    pos = end + 1;
                    continue;
                }
                c if is_key_char(c) => {
                    let mut end = pos;
                    while end < chars.len() && is_key_char(chars[end]) {
                        end += 1;
                    }
                    (TokenKind::Identifier, end - pos)
                }
                other => {
                    return Err(SelectorError::ParseError {
                        position: start,
                        message: format!("unexpected character '{other}'"),
                    })
                }
            }
        };

        tokens.push(Token {
            kind,
            text: chars[pos..pos + len].iter().collect(),
            position: start,
        });
        pos += len;
    }

    tokens.push(Token {
        kind: TokenKind::Eof,
        text: String::new(),
        position: chars.len(),
    });
    Ok(tokens)
}

// =============================================================================
// Expression
// =============================================================================

/// Parsed selector expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expr {
    All,
    Has(String),
    Equal(String, String),
    NotEqual(String, String),
    In(String, Vec<String>),
    NotIn(String, Vec<String>),
    StartsWith(String, String),
    EndsWith(String, String),
    Contains(String, String),
    Not(Box<Expr>),
    And(Vec<Expr>),
    Or(Vec<Expr>),
}

impl Expr {
    /// Evaluate against a label set. A missing label never satisfies a
    /// positive comparison and always satisfies a negative one.
    pub fn evaluate(&self, labels: &BTreeMap<String, String>) -> bool {
        match self {
            Expr::All => true,
            Expr::Has(k) => labels.contains_key(k),
            Expr::Equal(k, v) => labels.get(k) == Some(v),
            Expr::NotEqual(k, v) => labels.get(k) != Some(v),
            Expr::In(k, set) => labels.get(k).is_some_and(|v| set.contains(v)),
            Expr::NotIn(k, set) => !labels.get(k).is_some_and(|v| set.contains(v)),
            Expr::StartsWith(k, p) => labels.get(k).is_some_and(|v| v.starts_with(p.as_str())),
            Expr::EndsWith(k, s) => labels.get(k).is_some_and(|v| v.ends_with(s.as_str())),
            Expr::Contains(k, s) => labels.get(k).is_some_and(|v| v.contains(s.as_str())),
            Expr::Not(e) => !e.evaluate(labels),
            Expr::And(terms) => terms.iter().all(|e| e.evaluate(labels)),
            Expr::Or(terms) => terms.iter().any(|e| e.evaluate(labels)),
        }
    }
}

// =============================================================================
// Parser
// =============================================================================

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn new(tokens: Vec<Token>) -> Self {
        Self {
            tokens,
            pos: 0,
            depth: 0,
        }
    }

    fn descend(&mut self) -> Result<(), SelectorError> {
        self.depth += 1;
        if self.depth > MAX_NESTING_DEPTH {
            return Err(SelectorError::TooDeep {
                position: self.peek().position,
                max: MAX_NESTING_DEPTH,
            });
        }
        Ok(())
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_at(&self, offset: usize) -> &Token {
        &self.tokens[(self.pos + offset).min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.peek().kind == kind
    }

    fn check_word(&self, word: &str) -> bool {
        self.check(TokenKind::Identifier) && self.peek().text == word
    }

    fn unexpected(&self, expected: &str) -> SelectorError {
        let token = self.peek();
        if token.kind == TokenKind::Eof {
            SelectorError::UnexpectedEof(expected.to_string())
        } else {
            SelectorError::UnexpectedToken {
                position: token.position,
                expected: expected.to_string(),
                found: token.text.clone(),
            }
        }
    }

    fn expect(&mut self, kind: TokenKind) -> Result<Token, SelectorError> {
        if self.check(kind.clone()) {
            Ok(self.advance())
        } else {
            Err(self.unexpected(&kind.to_string()))
        }
    }

    fn expect_word(&mut self, word: &str) -> Result<(), SelectorError> {
        if self.check_word(word) {
            self.advance();
            Ok(())
        } else {
            Err(self.unexpected(&format!("'{word}'")))
        }
    }

    // Chains of the same operator are flattened so that only `!` and
    // parentheses add to the tree depth.
    fn parse_or(&mut self) -> Result<Expr, SelectorError> {
        let mut terms = vec![self.parse_and()?];
        while self.check(TokenKind::Or) {
            self.advance();
            terms.push(self.parse_and()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::Or(terms)
        })
    }

    fn parse_and(&mut self) -> Result<Expr, SelectorError> {
        let mut terms = vec![self.parse_unary()?];
        while self.check(TokenKind::And) {
            self.advance();
            terms.push(self.parse_unary()?);
        }
        Ok(if terms.len() == 1 {
            terms.remove(0)
        } else {
            Expr::And(terms)
        })
    }

    fn parse_unary(&mut self) -> Result<Expr, SelectorError> {
        if self.check(TokenKind::Not) {
            self.descend()?;
            self.advance();
            let inner = self.parse_unary()?;
            self.depth -= 1;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> Result<Expr, SelectorError> {
        if self.check(TokenKind::OpenParen) {
            self.descend()?;
            self.advance();
            let expr = self.parse_or()?;
            self.expect(TokenKind::CloseParen)?;
            self.depth -= 1;
            return Ok(expr);
        }

        let next_is_paren = self.peek_at(1).kind == TokenKind::OpenParen;
        if self.check_word("all") && next_is_paren {
            self.advance();
            self.advance();
            self.expect(TokenKind::CloseParen)?;
            return Ok(Expr::All);
        }
        if self.check_word("has") && next_is_paren {
            self.advance();
            self.advance();
            let key = self.expect(TokenKind::Identifier)?.text;
            self.expect(TokenKind::CloseParen)?;
            return Ok(Expr::Has(key));
        }

        if !self.check(TokenKind::Identifier) {
            return Err(self.unexpected("selector expression"));
        }
        let key = self.advance().text;
        self.parse_comparison(key)
    }

    fn parse_comparison(&mut self, key: String) -> Result<Expr, SelectorError> {
        match self.peek().kind {
            TokenKind::Eq => {
                self.advance();
                Ok(Expr::Equal(key, self.parse_string()?))
            }
            TokenKind::Ne => {
                self.advance();
                Ok(Expr::NotEqual(key, self.parse_string()?))
            }
            TokenKind::Identifier => {
                let word = self.advance().text;
                match word.as_str() {
                    "in" => Ok(Expr::In(key, self.parse_set()?)),
                    "not" => {
                        self.expect_word("in")?;
                        Ok(Expr::NotIn(key, self.parse_set()?))
                    }
                    "starts" => {
                        self.expect_word("with")?;
                        Ok(Expr::StartsWith(key, self.parse_string()?))
                    }
                    "ends" => {
                        self.expect_word("with")?;
                        Ok(Expr::EndsWith(key, self.parse_string()?))
                    }
                    "contains" => Ok(Expr::Contains(key, self.parse_string()?)),
                    _ => {
                        self.pos -= 1;
                        Err(self.unexpected("comparison operator"))
                    }
                }
            }
            _ => Err(self.unexpected("comparison operator")),
        }
    }

    fn parse_string(&mut self) -> Result<String, SelectorError> {
        Ok(self.expect(TokenKind::StringLiteral)?.text)
    }

    fn parse_set(&mut self) -> Result<Vec<String>, SelectorError> {
        self.expect(TokenKind::OpenBrace)?;
        let mut values = Vec::new();
        if self.check(TokenKind::CloseBrace) {
            self.advance();
            return Ok(values);
        }
        loop {
            values.push(self.parse_string()?);
            if self.check(TokenKind::Comma) {
                self.advance();
                continue;
            }
            self.expect(TokenKind::CloseBrace)?;
            return Ok(values);
        }
    }
}

// =============================================================================
// Selector
// =============================================================================

/// A parsed label selector.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    expr: Expr,
}

impl Selector {
    /// Parse a selector expression. An empty (or blank) string is `all()`.
    pub fn parse(input: &str) -> Result<Self, SelectorError> {
        let source = input.trim().to_string();
        if source.is_empty() {
            return Ok(Self {
                source,
                expr: Expr::All,
            });
        }

        let tokens = tokenize(&source)?;
        let mut parser = Parser::new(tokens);
        let expr = parser.parse_or()?;
        if !parser.check(TokenKind::Eof) {
            return Err(parser.unexpected("end of selector"));
        }
        Ok(Self { source, expr })
    }

    /// Whether the selector matches every label set.
    pub fn is_all(&self) -> bool {
        self.expr == Expr::All
    }

    pub fn expr(&self) -> &Expr {
        &self.expr
    }

    pub fn evaluate(&self, labels: &BTreeMap<String, String>) -> bool {
        self.expr.evaluate(labels)
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source.is_empty() {
            f.write_str("all()")
        } else {
            f.write_str(&self.source)
        }
    }
}
