//! Predicate lexer
//!
//! Converts predicate text into tokens. Keywords are case-insensitive.
//! Offsets are byte positions into the source, used for error reporting.

use crate::error::QueryError;

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Ident(String),
    Str(String),
    Integer(i64),
    Float(f64),
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    In,
    Contains,
    BeginsWith,
    EndsWith,
    True,
    False,
    Nil,
    TruePredicate,
    FalsePredicate,
    LeftParen,
    RightParen,
    LeftBrace,
    RightBrace,
    Comma,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

pub struct Lexer<'a> {
    src: &'a [u8],
    text: &'a str,
    pos: usize,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Self {
            src: source.as_bytes(),
            text: source,
            pos: 0,
        }
    }

    /// Tokenize the entire input. The last token is always `Eof`.
    pub fn tokenize(source: &str) -> Result<Vec<Token>, QueryError> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        loop {
            let token = lexer.next_token()?;
            let is_eof = token.kind == TokenKind::Eof;
            tokens.push(token);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    pub fn next_token(&mut self) -> Result<Token, QueryError> {
        while self.peek().is_some_and(|c| c.is_ascii_whitespace()) {
            self.pos += 1;
        }

        let start = self.pos;
        let Some(ch) = self.peek() else {
            return Ok(Token {
                kind: TokenKind::Eof,
                offset: start,
            });
        };

        let kind = match ch {
            b'\'' | b'"' => self.lex_string(ch)?,
            b'0'..=b'9' => self.lex_number()?,
            b'-' if self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) => self.lex_number()?,
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => self.lex_word(),
            b'(' => self.single(TokenKind::LeftParen),
            b')' => self.single(TokenKind::RightParen),
            b'{' => self.single(TokenKind::LeftBrace),
            b'}' => self.single(TokenKind::RightBrace),
            b',' => self.single(TokenKind::Comma),
            b'=' => {
                self.pos += 1;
                self.eat(b'=');
                TokenKind::Eq
            }
            b'!' => {
                self.pos += 1;
                if self.eat(b'=') {
                    TokenKind::Ne
                } else {
                    TokenKind::Not
                }
            }
            b'<' => {
                self.pos += 1;
                if self.eat(b'=') {
                    TokenKind::Le
                } else if self.eat(b'>') {
                    TokenKind::Ne
                } else {
                    TokenKind::Lt
                }
            }
            b'>' => {
                self.pos += 1;
                if self.eat(b'=') {
                    TokenKind::Ge
                } else {
                    TokenKind::Gt
                }
            }
            b'&' if self.peek_at(1) == Some(b'&') => {
                self.pos += 2;
                TokenKind::And
            }
            b'|' if self.peek_at(1) == Some(b'|') => {
                self.pos += 2;
                TokenKind::Or
            }
            _ => {
                let found = self.text[start..].chars().next().unwrap_or('?');
                return Err(syntax(start, format!("unexpected character {:?}", found)));
            }
        };

        Ok(Token {
            kind,
            offset: start,
        })
    }

    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn eat(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn single(&mut self, kind: TokenKind) -> TokenKind {
        self.pos += 1;
        kind
    }

    /// Quoted string; backslash escapes the next character.
    fn lex_string(&mut self, quote: u8) -> Result<TokenKind, QueryError> {
        let start = self.pos;
        self.pos += 1;
        let mut value = Vec::new();
        loop {
            match self.peek() {
                None => return Err(syntax(start, "unterminated string literal")),
                Some(c) if c == quote => {
                    self.pos += 1;
                    break;
                }
                Some(b'\\') => {
                    let Some(escaped) = self.peek_at(1) else {
                        return Err(syntax(start, "unterminated string literal"));
                    };
                    value.push(escaped);
                    self.pos += 2;
                }
                Some(c) => {
                    value.push(c);
                    self.pos += 1;
                }
            }
        }
        String::from_utf8(value)
            .map(TokenKind::Str)
            .map_err(|_| syntax(start, "string literal is not valid UTF-8"))
    }

    fn lex_number(&mut self) -> Result<TokenKind, QueryError> {
        let start = self.pos;
        if self.peek() == Some(b'-') {
            self.pos += 1;
        }
        while self.peek().is_some_and(|c| c.is_ascii_digit()) {
            self.pos += 1;
        }
        let mut is_float = false;
        if self.peek() == Some(b'.') && self.peek_at(1).is_some_and(|c| c.is_ascii_digit()) {
            is_float = true;
            self.pos += 1;
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek(), Some(b'e' | b'E')) {
            is_float = true;
            self.pos += 1;
            if matches!(self.peek(), Some(b'+' | b'-')) {
                self.pos += 1;
            }
            if !self.peek().is_some_and(|c| c.is_ascii_digit()) {
                return Err(syntax(start, "malformed exponent"));
            }
            while self.peek().is_some_and(|c| c.is_ascii_digit()) {
                self.pos += 1;
            }
        }

        let literal = &self.text[start..self.pos];
        if is_float {
            literal
                .parse::<f64>()
                .map(TokenKind::Float)
                .map_err(|_| syntax(start, format!("malformed number {}", literal)))
        } else {
            literal
                .parse::<i64>()
                .map(TokenKind::Integer)
                .map_err(|_| syntax(start, format!("integer literal out of range: {}", literal)))
        }
    }

    fn lex_word(&mut self) -> TokenKind {
        let start = self.pos;
        while self
            .peek()
            .is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_')
        {
            self.pos += 1;
        }
        let word = &self.text[start..self.pos];
        match word.to_ascii_uppercase().as_str() {
            "AND" => TokenKind::And,
            "OR" => TokenKind::Or,
            "NOT" => TokenKind::Not,
            "IN" => TokenKind::In,
            "CONTAINS" => TokenKind::Contains,
            "BEGINSWITH" => TokenKind::BeginsWith,
            "ENDSWITH" => TokenKind::EndsWith,
            "TRUE" => TokenKind::True,
            "FALSE" => TokenKind::False,
            "NIL" | "NULL" => TokenKind::Nil,
            "TRUEPREDICATE" => TokenKind::TruePredicate,
            "FALSEPREDICATE" => TokenKind::FalsePredicate,
            _ => TokenKind::Ident(word.to_string()),
        }
    }
}

fn syntax(position: usize, message: impl Into<String>) -> QueryError {
    QueryError::Syntax {
        position,
        message: message.into(),
    }
}
