//! Tokenizer for the build-script language.
//!
//! Produces an indentation-aware token stream: `Indent`/`Dedent` tokens
//! bracket blocks, and newlines inside brackets or after a backslash are
//! joined away.

use std::rc::Rc;

use super::error::SyntaxError;

#[derive(Debug, Clone, PartialEq)]
pub enum Tok {
    Name(Rc<str>),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    Op(&'static str),
    Newline,
    Indent,
    Dedent,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub tok: Tok,
    pub line: usize,
}

const OPERATORS: &[&str] = &[
    "**=", "//=", ">>=", "<<=", "**", "//", "==", "!=", "<=", ">=", "<>", "<<", ">>", "+=", "-=",
    "*=", "/=", "%=", "|=", "&=", "^=", "->", "+", "-", "*", "/", "%", "|", "&", "^", "~", "<",
    ">", "(", ")", "[", "]", "{", "}", ",", ":", ".", ";", "=", "@",
];

struct Lexer<'a> {
    src: &'a [u8],
    text: &'a str,
    pos: usize,
    line: usize,
    depth: usize,
    indents: Vec<usize>,
    tokens: Vec<Token>,
    at_line_start: bool,
}

/// Tokenize a whole script.
pub fn tokenize(text: &str) -> Result<Vec<Token>, SyntaxError> {
    let mut lexer = Lexer {
        src: text.as_bytes(),
        text,
        pos: 0,
        line: 1,
        depth: 0,
        indents: vec![0],
        tokens: Vec::new(),
        at_line_start: true,
    };
    lexer.run()?;
    Ok(lexer.tokens)
}

impl<'a> Lexer<'a> {
    fn peek(&self) -> Option<u8> {
        self.src.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<u8> {
        self.src.get(self.pos + offset).copied()
    }

    fn push(&mut self, tok: Tok) {
        self.tokens.push(Token {
            tok,
            line: self.line,
        });
    }

    fn error(&self, message: impl Into<String>) -> SyntaxError {
        SyntaxError::new(self.line, message)
    }

    fn run(&mut self) -> Result<(), SyntaxError> {
        while self.pos < self.src.len() {
            if self.at_line_start && self.depth == 0 {
                self.handle_indentation()?;
                if self.pos >= self.src.len() {
                    break;
                }
            }
            let c = self.src[self.pos];
            match c {
                b'\n' => {
                    self.pos += 1;
                    if self.depth == 0 {
                        self.push(Tok::Newline);
                        self.at_line_start = true;
                    }
                    self.line += 1;
                }
                b' ' | b'\t' | b'\r' | b'\x0c' => self.pos += 1,
                b'#' => self.skip_comment(),
                b'\\' if self.peek_at(1) == Some(b'\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                b'\\' if self.peek_at(1) == Some(b'\r') && self.peek_at(2) == Some(b'\n') => {
                    self.pos += 3;
                    self.line += 1;
                }
                b'0'..=b'9' => self.number()?,
                b'.' if self.peek_at(1).is_some_and(|d| d.is_ascii_digit()) => self.number()?,
                b'"' | b'\'' => self.string(false)?,
                c if c == b'_' || c.is_ascii_alphabetic() || c >= 0x80 => self.name_or_string()?,
                _ => self.operator()?,
            }
        }

        if !matches!(
            self.tokens.last().map(|t| &t.tok),
            None | Some(Tok::Newline)
        ) {
            self.push(Tok::Newline);
        }
        while self.indents.len() > 1 {
            self.indents.pop();
            self.push(Tok::Dedent);
        }
        self.push(Tok::Eof);
        Ok(())
    }

    fn skip_comment(&mut self) {
        while let Some(c) = self.peek() {
            if c == b'\n' {
                break;
            }
            self.pos += 1;
        }
    }

    /// Measure the indentation of a logical line and emit block tokens.
    /// Blank and comment-only lines do not affect indentation.
    fn handle_indentation(&mut self) -> Result<(), SyntaxError> {
        loop {
            let mut width = 0usize;
            while let Some(c) = self.peek() {
                match c {
                    b' ' => width += 1,
                    b'\t' => width = (width / 8 + 1) * 8,
                    b'\x0c' | b'\r' => {}
                    _ => break,
                }
                self.pos += 1;
            }
            match self.peek() {
                None => return Ok(()),
                Some(b'\n') => {
                    self.pos += 1;
                    self.line += 1;
                    continue;
                }
                Some(b'#') => {
                    self.skip_comment();
                    continue;
                }
                _ => {}
            }

            self.at_line_start = false;
            let current = *self.indents.last().unwrap_or(&0);
            if width > current {
                self.indents.push(width);
                self.push(Tok::Indent);
            } else {
                while width < *self.indents.last().unwrap_or(&0) {
                    self.indents.pop();
                    self.push(Tok::Dedent);
                }
                if width != *self.indents.last().unwrap_or(&0) {
                    return Err(self.error("unindent does not match any outer indentation level"));
                }
            }
            return Ok(());
        }
    }

    fn number(&mut self) -> Result<(), SyntaxError> {
        let start = self.pos;
        if self.peek() == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X' | b'o' | b'O' | b'b' | b'B')) {
            let radix = match self.src[self.pos + 1] {
                b'x' | b'X' => 16,
                b'o' | b'O' => 8,
                _ => 2,
            };
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek().is_some_and(|c| c.is_ascii_alphanumeric() || c == b'_') {
                self.pos += 1;
            }
            let digits = self.text[digits_start..self.pos].replace('_', "");
            let value = i64::from_str_radix(&digits, radix)
                .map_err(|_| self.error(format!("invalid number literal: {}", &self.text[start..self.pos])))?;
            self.push(Tok::Int(value));
            return Ok(());
        }

        let mut is_float = false;
        while let Some(c) = self.peek() {
            match c {
                b'0'..=b'9' | b'_' => self.pos += 1,
                b'.' if !is_float => {
                    is_float = true;
                    self.pos += 1;
                }
                b'e' | b'E' => {
                    is_float = true;
                    self.pos += 1;
                    if matches!(self.peek(), Some(b'+' | b'-')) {
                        self.pos += 1;
                    }
                }
                _ => break,
            }
        }
        // Legacy long-integer suffix
        if matches!(self.peek(), Some(b'l' | b'L')) {
            self.pos += 1;
        }
        let literal = self.text[start..self.pos]
            .trim_end_matches(['l', 'L'])
            .replace('_', "");
        if is_float {
            let value: f64 = literal
                .parse()
                .map_err(|_| self.error(format!("invalid float literal: {}", literal)))?;
            self.push(Tok::Float(value));
        } else {
            let value: i64 = literal
                .parse()
                .map_err(|_| self.error(format!("invalid integer literal: {}", literal)))?;
            self.push(Tok::Int(value));
        }
        Ok(())
    }

    fn name_or_string(&mut self) -> Result<(), SyntaxError> {
        // String prefixes: r, u, b, and their combinations
        let mut prefix_len = 0;
        let mut raw = false;
        while prefix_len < 2 {
            match self.peek_at(prefix_len) {
                Some(b'r' | b'R') => {
                    raw = true;
                    prefix_len += 1;
                }
                Some(b'u' | b'U' | b'b' | b'B') => prefix_len += 1,
                Some(b'f' | b'F') => {
                    if matches!(self.peek_at(prefix_len + 1), Some(b'"' | b'\'')) {
                        return Err(self.error("formatted string literals are not supported"));
                    }
                    break;
                }
                _ => break,
            }
        }
        if prefix_len > 0 && matches!(self.peek_at(prefix_len), Some(b'"' | b'\'')) {
            self.pos += prefix_len;
            return self.string(raw);
        }

        let start = self.pos;
        while let Some(c) = self.peek() {
            if c == b'_' || c.is_ascii_alphanumeric() || c >= 0x80 {
                self.pos += 1;
            } else {
                break;
            }
        }
        let name: Rc<str> = Rc::from(&self.text[start..self.pos]);
        self.push(Tok::Name(name));
        Ok(())
    }

    fn string(&mut self, raw: bool) -> Result<(), SyntaxError> {
        let quote = self.src[self.pos];
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        let start_line = self.line;
        self.pos += if triple { 3 } else { 1 };

        let mut out = String::new();
        loop {
            let Some(c) = self.peek() else {
                return Err(SyntaxError::new(start_line, "unterminated string literal"));
            };
            if c == quote {
                if !triple {
                    self.pos += 1;
                    break;
                }
                if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                    self.pos += 3;
                    break;
                }
            }
            if c == b'\n' {
                if !triple {
                    return Err(SyntaxError::new(start_line, "unterminated string literal"));
                }
                self.line += 1;
            }
            if c == b'\\' {
                let next = self.peek_at(1);
                if raw {
                    // Raw strings keep the backslash but still escape the quote
                    out.push('\\');
                    self.pos += 1;
                    if let Some(n) = next {
                        if n == quote || n == b'\\' {
                            out.push(n as char);
                            self.pos += 1;
                        }
                    }
                    continue;
                }
                self.pos += 2;
                match next {
                    Some(b'n') => out.push('\n'),
                    Some(b't') => out.push('\t'),
                    Some(b'r') => out.push('\r'),
                    Some(b'0') => out.push('\0'),
                    Some(b'\\') => out.push('\\'),
                    Some(b'\'') => out.push('\''),
                    Some(b'"') => out.push('"'),
                    Some(b'\n') => self.line += 1,
                    Some(b'x') => {
                        let hex = self.text.get(self.pos..self.pos + 2).unwrap_or("");
                        let code = u32::from_str_radix(hex, 16)
                            .map_err(|_| self.error("invalid \\x escape"))?;
                        out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                        self.pos += 2;
                    }
                    Some(b'u') => {
                        let hex = self.text.get(self.pos..self.pos + 4).unwrap_or("");
                        let code = u32::from_str_radix(hex, 16)
                            .map_err(|_| self.error("invalid \\u escape"))?;
                        out.push(char::from_u32(code).unwrap_or('\u{fffd}'));
                        self.pos += 4;
                    }
                    Some(_) => {
                        // Unknown escapes keep their backslash
                        out.push('\\');
                        self.pos -= 1;
                    }
                    None => return Err(SyntaxError::new(start_line, "unterminated string literal")),
                }
                continue;
            }
            // Copy one UTF-8 character
            let ch_len = utf8_len(c);
            out.push_str(&self.text[self.pos..self.pos + ch_len]);
            self.pos += ch_len;
        }

        // Adjacent literals concatenate
        if let Some(Token {
            tok: Tok::Str(prev),
            ..
        }) = self.tokens.last()
        {
            let joined: Rc<str> = Rc::from(format!("{}{}", prev, out));
            if let Some(last) = self.tokens.last_mut() {
                last.tok = Tok::Str(joined);
            }
            return Ok(());
        }
        self.tokens.push(Token {
            tok: Tok::Str(Rc::from(out)),
            line: start_line,
        });
        Ok(())
    }

    fn operator(&mut self) -> Result<(), SyntaxError> {
        let rest = &self.text[self.pos..];
        for op in OPERATORS {
            if rest.starts_with(op) {
                match *op {
                    "(" | "[" | "{" => self.depth += 1,
                    ")" | "]" | "}" => self.depth = self.depth.saturating_sub(1),
                    _ => {}
                }
                self.pos += op.len();
                let op = if *op == "<>" { "!=" } else { op };
                self.push(Tok::Op(op));
                return Ok(());
            }
        }
        let ch = rest.chars().next().unwrap_or('?');
        Err(self.error(format!("unexpected character {:?}", ch)))
    }
}

fn utf8_len(first: u8) -> usize {
    match first {
        0x00..=0x7f => 1,
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        _ => 4,
    }
}
