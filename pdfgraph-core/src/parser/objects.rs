//! PDF object parser
//!
//! Builds direct objects from lexer tokens (ISO 32000-1 Section 7.3).

use super::lexer::{Lexer, Token};
use super::{ParseError, ParseOptions, ParseResult};
use crate::objects::{Array, Dictionary, Object, ObjectId, PdfString, Stream};
use std::io::Read;

/// Parse one direct object.
pub fn parse_object<R: Read>(lexer: &mut Lexer<R>, options: &ParseOptions) -> ParseResult<Object> {
    let token = lexer.next_token()?;
    parse_from_token(lexer, token, options, 0)
}

/// Parse `n g obj <value> endobj`.
pub fn parse_indirect_object<R: Read>(
    lexer: &mut Lexer<R>,
    options: &ParseOptions,
) -> ParseResult<(ObjectId, Object)> {
    let number = match lexer.next_significant_token()? {
        Token::Integer(n) if (0..=u32::MAX as i64).contains(&n) => n as u32,
        other => return Err(unexpected("object number", &other)),
    };
    let generation = match lexer.next_token()? {
        Token::Integer(g) if (0..=u16::MAX as i64).contains(&g) => g as u16,
        other => return Err(unexpected("generation number", &other)),
    };
    lexer.expect(Token::Obj)?;

    let object = parse_object(lexer, options)?;

    match lexer.next_significant_token()? {
        Token::EndObj => {}
        other if options.lenient_syntax => {
            tracing::debug!(
                object = number,
                found = ?other,
                "indirect object not terminated by endobj"
            );
        }
        other => return Err(unexpected("endobj", &other)),
    }

    Ok((ObjectId::new(number, generation), object))
}

fn parse_from_token<R: Read>(
    lexer: &mut Lexer<R>,
    token: Token,
    options: &ParseOptions,
    depth: usize,
) -> ParseResult<Object> {
    if depth > options.max_recursion_depth {
        return Err(ParseError::RecursionLimit(options.max_recursion_depth));
    }

    match token {
        Token::Null => Ok(Object::Null),
        Token::Boolean(b) => Ok(Object::Boolean(b)),
        Token::Integer(i) => parse_integer_or_reference(lexer, i),
        Token::Real(r) => Ok(Object::Real(r)),
        Token::String(bytes) => Ok(Object::String(PdfString::new(bytes))),
        Token::HexString(bytes) => Ok(Object::String(PdfString::hex(bytes))),
        Token::Name(name) => Ok(Object::Name(name)),
        Token::ArrayStart => parse_array(lexer, options, depth),
        Token::DictStart => parse_dictionary_or_stream(lexer, options, depth),
        Token::Comment(_) => {
            let next = lexer.next_token()?;
            parse_from_token(lexer, next, options, depth)
        }
        Token::Eof => Err(ParseError::SyntaxError {
            position: lexer.position(),
            message: "Unexpected end of file".to_string(),
        }),
        other => Err(unexpected("PDF object", &other)),
    }
}

/// An integer may open an `n g R` reference; two tokens of lookahead decide.
fn parse_integer_or_reference<R: Read>(lexer: &mut Lexer<R>, number: i64) -> ParseResult<Object> {
    if !(0..=u32::MAX as i64).contains(&number) {
        return Ok(Object::Integer(number));
    }

    let second = lexer.next_token()?;
    let generation = match second {
        Token::Integer(g) if (0..=u16::MAX as i64).contains(&g) => g,
        _ => {
            lexer.push_token(second);
            return Ok(Object::Integer(number));
        }
    };

    let third = lexer.next_token()?;
    if third == Token::R {
        return Ok(Object::Reference(ObjectId::new(
            number as u32,
            generation as u16,
        )));
    }

    // Restore in reverse order so the generation comes out first
    lexer.push_token(third);
    lexer.push_token(Token::Integer(generation));
    Ok(Object::Integer(number))
}

fn parse_array<R: Read>(
    lexer: &mut Lexer<R>,
    options: &ParseOptions,
    depth: usize,
) -> ParseResult<Object> {
    let mut elements = Vec::new();

    loop {
        match lexer.next_token()? {
            Token::ArrayEnd => break,
            Token::Comment(_) => continue,
            token => elements.push(parse_from_token(lexer, token, options, depth + 1)?),
        }
    }

    Ok(Object::Array(Array::from(elements)))
}

fn parse_dictionary_or_stream<R: Read>(
    lexer: &mut Lexer<R>,
    options: &ParseOptions,
    depth: usize,
) -> ParseResult<Object> {
    let dict = parse_dictionary(lexer, options, depth)?;

    loop {
        match lexer.next_token()? {
            Token::Stream => {
                let data = parse_stream_data(lexer, &dict, options)?;
                return Ok(Object::Stream(Stream::from_parts(dict, data)));
            }
            Token::Comment(_) => continue,
            token => {
                lexer.push_token(token);
                return Ok(Object::Dictionary(dict));
            }
        }
    }
}

fn parse_dictionary<R: Read>(
    lexer: &mut Lexer<R>,
    options: &ParseOptions,
    depth: usize,
) -> ParseResult<Dictionary> {
    let mut dict = Dictionary::new();

    loop {
        match lexer.next_token()? {
            Token::DictEnd => break,
            Token::Comment(_) => continue,
            Token::Name(key) => {
                let token = lexer.next_token()?;
                if token == Token::DictEnd && options.lenient_syntax {
                    tracing::debug!(key = %key, "dictionary key without value");
                    break;
                }
                let value = parse_from_token(lexer, token, options, depth + 1)?;
                // A null value is equivalent to an absent entry
                if !value.is_null() {
                    dict.insert_quiet(key, value);
                }
            }
            Token::Eof => {
                return Err(ParseError::SyntaxError {
                    position: lexer.position(),
                    message: "Unterminated dictionary".to_string(),
                })
            }
            other if options.lenient_syntax => {
                tracing::debug!(found = ?other, "skipping malformed dictionary key");
            }
            other => return Err(unexpected("dictionary key (name) or >>", &other)),
        }
    }

    Ok(dict)
}

/// Reads a stream body. A direct `/Length` is trusted; otherwise the body
/// runs up to the `endstream` keyword.
fn parse_stream_data<R: Read>(
    lexer: &mut Lexer<R>,
    dict: &Dictionary,
    options: &ParseOptions,
) -> ParseResult<Vec<u8>> {
    lexer.read_stream_eol(!options.lenient_syntax)?;

    match dict.get_integer("Length").filter(|len| *len >= 0) {
        Some(length) => {
            let data = lexer.read_bytes(length as usize)?;
            lexer.expect(Token::EndStream)?;
            Ok(data)
        }
        None => {
            tracing::debug!(
                position = lexer.position(),
                "stream length is not a direct integer, scanning for endstream"
            );
            let mut data = lexer.read_until_sequence(b"endstream")?;
            if data.ends_with(b"\r\n") {
                data.truncate(data.len() - 2);
            } else if data.ends_with(b"\n") || data.ends_with(b"\r") {
                data.truncate(data.len() - 1);
            }
            Ok(data)
        }
    }
}

fn unexpected(expected: &str, found: &Token) -> ParseError {
    ParseError::UnexpectedToken {
        expected: expected.to_string(),
        found: format!("{found:?}"),
    }
}
