//! PDF Lexer
//!
//! Tokenizes PDF syntax according to ISO 32000-1 Section 7.2. Positions are
//! absolute byte offsets into the underlying source.

use super::{ParseError, ParseResult};
use std::io::{BufReader, Read};

/// PDF Token types
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Boolean(bool),
    Integer(i64),
    Real(f64),
    /// Literal string `( ... )`
    String(Vec<u8>),
    /// Hexadecimal string `< ... >`
    HexString(Vec<u8>),
    Name(String),
    ArrayStart,
    ArrayEnd,
    DictStart,
    DictEnd,
    Stream,
    EndStream,
    Obj,
    EndObj,
    XRef,
    Trailer,
    StartXRef,
    /// The `R` of an indirect reference
    R,
    Null,
    /// Any other bare word, such as the `n`/`f` markers of xref tables
    Keyword(String),
    Comment(String),
    Eof,
}

/// PDF whitespace characters (Table 1).
pub fn is_whitespace(ch: u8) -> bool {
    matches!(ch, b'\0' | b'\t' | b'\n' | b'\x0C' | b'\r' | b' ')
}

/// PDF delimiter characters (Table 2).
pub fn is_delimiter(ch: u8) -> bool {
    matches!(
        ch,
        b'(' | b')' | b'<' | b'>' | b'[' | b']' | b'{' | b'}' | b'/' | b'%'
    )
}

/// PDF Lexer for tokenizing PDF content
pub struct Lexer<R> {
    reader: BufReader<R>,
    position: u64,
    peek_buffer: Option<u8>,
    token_buffer: Vec<Token>,
}

impl<R: Read> Lexer<R> {
    /// Create a new lexer from a reader positioned at offset 0
    pub fn new(reader: R) -> Self {
        Self::new_at(reader, 0)
    }

    /// Create a lexer whose reader is already positioned at `position`
    pub fn new_at(reader: R, position: u64) -> Self {
        Self {
            reader: BufReader::new(reader),
            position,
            peek_buffer: None,
            token_buffer: Vec::new(),
        }
    }

    /// Get the next token
    pub fn next_token(&mut self) -> ParseResult<Token> {
        if let Some(token) = self.token_buffer.pop() {
            return Ok(token);
        }

        self.skip_whitespace()?;

        let ch = match self.peek_char()? {
            Some(ch) => ch,
            None => return Ok(Token::Eof),
        };

        match ch {
            b'%' => self.read_comment(),
            b'/' => self.read_name(),
            b'(' => self.read_literal_string(),
            b'<' => self.read_angle_bracket(),
            b'>' => {
                self.consume_char()?;
                if self.peek_char()? == Some(b'>') {
                    self.consume_char()?;
                    Ok(Token::DictEnd)
                } else {
                    Err(self.syntax_error("Expected '>' after '>'"))
                }
            }
            b'[' => {
                self.consume_char()?;
                Ok(Token::ArrayStart)
            }
            b']' => {
                self.consume_char()?;
                Ok(Token::ArrayEnd)
            }
            b'+' | b'-' | b'0'..=b'9' | b'.' => self.read_number(),
            _ if !is_delimiter(ch) => {
                let word = self.read_word()?;
                Ok(keyword(word))
            }
            _ => {
                self.consume_char()?;
                Err(self.syntax_error(&format!("Unexpected character: {}", ch as char)))
            }
        }
    }

    /// Peek at the next character without consuming it
    fn peek_char(&mut self) -> ParseResult<Option<u8>> {
        if let Some(ch) = self.peek_buffer {
            return Ok(Some(ch));
        }

        let mut buf = [0u8; 1];
        match self.reader.read_exact(&mut buf) {
            Ok(()) => {
                self.peek_buffer = Some(buf[0]);
                Ok(Some(buf[0]))
            }
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Consume the next character
    fn consume_char(&mut self) -> ParseResult<Option<u8>> {
        let ch = self.peek_char()?;
        if ch.is_some() {
            self.peek_buffer = None;
            self.position += 1;
        }
        Ok(ch)
    }

    fn syntax_error(&self, message: &str) -> ParseError {
        ParseError::SyntaxError {
            position: self.position,
            message: message.to_string(),
        }
    }

    /// Skip whitespace and return the number of bytes skipped
    pub fn skip_whitespace(&mut self) -> ParseResult<usize> {
        let mut count = 0;
        while let Some(ch) = self.peek_char()? {
            if !is_whitespace(ch) {
                break;
            }
            self.consume_char()?;
            count += 1;
        }
        Ok(count)
    }

    /// Read a comment (from % to end of line)
    fn read_comment(&mut self) -> ParseResult<Token> {
        self.consume_char()?;
        let mut comment = String::new();

        while let Some(ch) = self.peek_char()? {
            if ch == b'\n' || ch == b'\r' {
                break;
            }
            self.consume_char()?;
            comment.push(ch as char);
        }

        Ok(Token::Comment(comment))
    }

    /// Read a name object; `#xx` escapes are decoded
    fn read_name(&mut self) -> ParseResult<Token> {
        self.consume_char()?;
        let mut name = String::new();

        while let Some(ch) = self.peek_char()? {
            if is_whitespace(ch) || is_delimiter(ch) {
                break;
            }
            self.consume_char()?;

            if ch == b'#' {
                let high = self.consume_char()?.and_then(hex_value);
                let low = self.consume_char()?.and_then(hex_value);
                match (high, low) {
                    (Some(high), Some(low)) => name.push((high << 4 | low) as char),
                    _ => return Err(self.syntax_error("Invalid hex code in name")),
                }
            } else {
                name.push(ch as char);
            }
        }

        Ok(Token::Name(name))
    }

    /// Read a literal string (parentheses)
    fn read_literal_string(&mut self) -> ParseResult<Token> {
        self.consume_char()?;
        let mut string = Vec::new();
        let mut depth = 1;

        loop {
            let ch = self
                .consume_char()?
                .ok_or_else(|| self.syntax_error("Unterminated string"))?;

            match ch {
                b'\\' => {
                    let escaped = self
                        .consume_char()?
                        .ok_or_else(|| self.syntax_error("Unterminated string"))?;
                    match escaped {
                        b'n' => string.push(b'\n'),
                        b'r' => string.push(b'\r'),
                        b't' => string.push(b'\t'),
                        b'b' => string.push(b'\x08'),
                        b'f' => string.push(b'\x0C'),
                        b'0'..=b'7' => {
                            let mut value = (escaped - b'0') as u32;
                            for _ in 0..2 {
                                match self.peek_char()? {
                                    Some(next @ b'0'..=b'7') => {
                                        self.consume_char()?;
                                        value = value * 8 + (next - b'0') as u32;
                                    }
                                    _ => break,
                                }
                            }
                            string.push(value as u8);
                        }
                        // Line continuation
                        b'\r' => {
                            if self.peek_char()? == Some(b'\n') {
                                self.consume_char()?;
                            }
                        }
                        b'\n' => {}
                        other => string.push(other),
                    }
                }
                b'(' => {
                    depth += 1;
                    string.push(ch);
                }
                b')' => {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                    string.push(ch);
                }
                _ => string.push(ch),
            }
        }

        Ok(Token::String(string))
    }

    /// Read angle bracket tokens (hex strings or dict markers)
    fn read_angle_bracket(&mut self) -> ParseResult<Token> {
        self.consume_char()?;

        if self.peek_char()? == Some(b'<') {
            self.consume_char()?;
            return Ok(Token::DictStart);
        }

        let mut bytes = Vec::new();
        let mut pending: Option<u8> = None;
        loop {
            let ch = self
                .consume_char()?
                .ok_or_else(|| self.syntax_error("Unterminated hex string"))?;
            if ch == b'>' {
                break;
            }
            if is_whitespace(ch) {
                continue;
            }
            let nibble =
                hex_value(ch).ok_or_else(|| self.syntax_error("Invalid character in hex string"))?;
            match pending.take() {
                Some(high) => bytes.push(high << 4 | nibble),
                None => pending = Some(nibble),
            }
        }
        // An odd final digit is followed by an implicit 0
        if let Some(high) = pending {
            bytes.push(high << 4);
        }

        Ok(Token::HexString(bytes))
    }

    /// Read a number (integer or real)
    fn read_number(&mut self) -> ParseResult<Token> {
        let mut number = String::new();
        let mut has_dot = false;

        if let Some(sign @ (b'+' | b'-')) = self.peek_char()? {
            self.consume_char()?;
            number.push(sign as char);
        }

        while let Some(ch) = self.peek_char()? {
            match ch {
                b'0'..=b'9' => number.push(ch as char),
                b'.' if !has_dot => {
                    has_dot = true;
                    number.push('.');
                }
                _ => break,
            }
            self.consume_char()?;
        }

        let digits = number.trim_start_matches(['+', '-']);
        if digits.is_empty() || digits == "." {
            return Err(self.syntax_error(&format!("Invalid number: '{number}'")));
        }

        if has_dot {
            let value = number
                .parse::<f64>()
                .map_err(|_| self.syntax_error(&format!("Invalid real number: '{number}'")))?;
            Ok(Token::Real(value))
        } else {
            let value = number
                .parse::<i64>()
                .map_err(|_| self.syntax_error(&format!("Invalid integer: '{number}'")))?;
            Ok(Token::Integer(value))
        }
    }

    /// Read a word (sequence of regular characters)
    fn read_word(&mut self) -> ParseResult<String> {
        let mut word = String::new();

        while let Some(ch) = self.peek_char()? {
            if is_whitespace(ch) || is_delimiter(ch) {
                break;
            }
            self.consume_char()?;
            word.push(ch as char);
        }

        Ok(word)
    }

    /// Consume the end-of-line marker that follows the `stream` keyword.
    ///
    /// Accepts CRLF, LF or a lone CR. With `strict` set, a missing marker is an error.
    pub fn read_stream_eol(&mut self, strict: bool) -> ParseResult<()> {
        // Some producers put spaces between `stream` and the newline
        while !strict && self.peek_char()? == Some(b' ') {
            self.consume_char()?;
        }
        match self.peek_char()? {
            Some(b'\r') => {
                self.consume_char()?;
                if self.peek_char()? == Some(b'\n') {
                    self.consume_char()?;
                }
                Ok(())
            }
            Some(b'\n') => {
                self.consume_char()?;
                Ok(())
            }
            _ if strict => Err(self.syntax_error("Expected newline after 'stream'")),
            _ => Ok(()),
        }
    }

    /// Read exactly n bytes
    pub fn read_bytes(&mut self, n: usize) -> ParseResult<Vec<u8>> {
        let mut bytes = Vec::new();
        if n == 0 {
            return Ok(bytes);
        }
        if let Some(ch) = self.peek_buffer.take() {
            bytes.push(ch);
        }
        let remaining = (n - bytes.len()) as u64;
        (&mut self.reader).take(remaining).read_to_end(&mut bytes)?;
        self.position += bytes.len() as u64;
        if bytes.len() < n {
            return Err(self.syntax_error(&format!(
                "Unexpected end of data: wanted {n} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    /// Read until `sequence` is found; the sequence itself is consumed but not returned
    pub fn read_until_sequence(&mut self, sequence: &[u8]) -> ParseResult<Vec<u8>> {
        let mut result = Vec::new();

        while let Some(ch) = self.consume_char()? {
            result.push(ch);
            if result.ends_with(sequence) {
                result.truncate(result.len() - sequence.len());
                return Ok(result);
            }
        }

        Err(self.syntax_error(&format!(
            "Sequence '{}' not found",
            String::from_utf8_lossy(sequence)
        )))
    }

    /// Absolute offset of the next unread byte
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Push back a token to be returned by the next call to next_token
    pub fn push_token(&mut self, token: Token) {
        self.token_buffer.push(token);
    }

    /// Next token that is not a comment
    pub fn next_significant_token(&mut self) -> ParseResult<Token> {
        loop {
            match self.next_token()? {
                Token::Comment(_) => continue,
                token => return Ok(token),
            }
        }
    }

    /// Expect a specific token
    pub fn expect(&mut self, expected: Token) -> ParseResult<()> {
        let token = self.next_significant_token()?;
        if token == expected {
            Ok(())
        } else {
            Err(ParseError::UnexpectedToken {
                expected: format!("{expected:?}"),
                found: format!("{token:?}"),
            })
        }
    }
}

fn keyword(word: String) -> Token {
    match word.as_str() {
        "true" => Token::Boolean(true),
        "false" => Token::Boolean(false),
        "null" => Token::Null,
        "obj" => Token::Obj,
        "endobj" => Token::EndObj,
        "stream" => Token::Stream,
        "endstream" => Token::EndStream,
        "xref" => Token::XRef,
        "trailer" => Token::Trailer,
        "startxref" => Token::StartXRef,
        "R" => Token::R,
        _ => Token::Keyword(word),
    }
}

fn hex_value(ch: u8) -> Option<u8> {
    match ch {
        b'0'..=b'9' => Some(ch - b'0'),
        b'a'..=b'f' => Some(ch - b'a' + 10),
        b'A'..=b'F' => Some(ch - b'A' + 10),
        _ => None,
    }
}
