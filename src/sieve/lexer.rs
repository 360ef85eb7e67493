//! Lexer over Sieve source text.
//!
//! Produces tokens eagerly but models the stream as an iterator so callers
//! (the parser) pull one token at a time, same as a lazy sequence would.
//! Punctuation, tags, numbers and identifiers are scanned char-by-char;
//! quoted-string bodies are unescaped with `nom` combinators, the same way
//! as the rest of this crate's wire/text grammars.

use std::str::Chars;

use nom::branch::alt;
use nom::bytes::complete::is_not;
use nom::character::complete::{char, satisfy};
use nom::combinator::{map, recognize, verify};
use nom::multi::many0;
use nom::sequence::preceded;
use nom::IResult;

use crate::error::LexError;

use super::token::{Token, TokenKind};

pub struct Lexer<'a> {
    chars: Chars<'a>,
    line: u32,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str) -> Self {
        Lexer {
            chars: source.chars(),
            line: 1,
        }
    }

    /// Lex the entire input into a token vector, always terminated by
    /// `TokenKind::Eof`.
    pub fn tokenize(source: &'a str) -> Result<Vec<Token>, LexError> {
        let mut lexer = Lexer::new(source);
        let mut tokens = Vec::new();
        loop {
            let tok = lexer.next_token()?;
            let is_eof = tok.kind == TokenKind::Eof;
            tokens.push(tok);
            if is_eof {
                break;
            }
        }
        Ok(tokens)
    }

    fn peek(&mut self) -> Option<char> {
        self.chars.clone().next()
    }

    fn peek2(&mut self) -> Option<char> {
        let mut clone = self.chars.clone();
        clone.next();
        clone.next()
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.chars.next();
        if c == Some('\n') {
            self.line += 1;
        }
        c
    }

    /// The remainder of the source from the current position, as a slice —
    /// handed to the `nom` parsers below for quoted-string unescaping.
    fn rest(&self) -> &'a str {
        self.chars.as_str()
    }

    fn set_rest(&mut self, remaining: &'a str) {
        self.chars = remaining.chars();
    }

    fn err<T>(&self, reason: impl Into<String>) -> Result<T, LexError> {
        Err(LexError {
            line: self.line,
            reason: reason.into(),
        })
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<(), LexError> {
        loop {
            match self.peek() {
                Some(c) if c.is_whitespace() => {
                    self.bump();
                }
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('/') if self.peek2() == Some('*') => {
                    self.bump();
                    self.bump();
                    let start_line = self.line;
                    loop {
                        match self.peek() {
                            None => {
                                return Err(LexError {
                                    line: start_line,
                                    reason: "unterminated bracket comment".to_string(),
                                });
                            }
                            Some('*') if self.peek2() == Some('/') => {
                                self.bump();
                                self.bump();
                                break;
                            }
                            _ => {
                                self.bump();
                            }
                        }
                    }
                }
                _ => return Ok(()),
            }
        }
    }

    pub fn next_token(&mut self) -> Result<Token, LexError> {
        self.skip_whitespace_and_comments()?;
        let line = self.line;

        let c = match self.peek() {
            None => return Ok(Token::new(TokenKind::Eof, line)),
            Some(c) => c,
        };

        let kind = match c {
            '(' => {
                self.bump();
                TokenKind::LeftParen
            }
            ')' => {
                self.bump();
                TokenKind::RightParen
            }
            '{' => {
                self.bump();
                TokenKind::LeftBrace
            }
            '}' => {
                self.bump();
                TokenKind::RightBrace
            }
            '[' => {
                self.bump();
                TokenKind::LeftBracket
            }
            ']' => {
                self.bump();
                TokenKind::RightBracket
            }
            ',' => {
                self.bump();
                TokenKind::Comma
            }
            ';' => {
                self.bump();
                TokenKind::Semicolon
            }
            ':' => {
                self.bump();
                self.lex_tag(line)?
            }
            '"' => self.lex_quoted_string(line)?,
            c if c.is_ascii_digit() => self.lex_number(line)?,
            c if c.is_ascii_alphabetic() || c == '_' => self.lex_identifier_or_multiline(line)?,
            other => return self.err(format!("unexpected character {other:?}")),
        };

        Ok(Token::new(kind, line))
    }

    fn lex_tag(&mut self, line: u32) -> Result<TokenKind, LexError> {
        let mut body = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                body.push(c);
                self.bump();
            } else {
                break;
            }
        }
        if body.is_empty() {
            return Err(LexError {
                line,
                reason: "expected identifier after `:`".to_string(),
            });
        }
        Ok(TokenKind::Tag(body))
    }

    fn lex_number(&mut self, line: u32) -> Result<TokenKind, LexError> {
        let mut digits = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_digit() {
                digits.push(c);
                self.bump();
            } else {
                break;
            }
        }
        let base: u64 = digits
            .parse()
            .map_err(|_| LexError {
                line,
                reason: format!("invalid number literal `{digits}`"),
            })?;

        let multiplier = match self.peek() {
            Some(c) if c.eq_ignore_ascii_case(&'k') => Some(1024u64),
            Some(c) if c.eq_ignore_ascii_case(&'m') => Some(1024u64 * 1024),
            Some(c) if c.eq_ignore_ascii_case(&'g') => Some(1024u64 * 1024 * 1024),
            Some(c) if c.is_ascii_alphabetic() => {
                return Err(LexError {
                    line,
                    reason: format!("invalid number quantifier suffix `{c}`"),
                });
            }
            _ => None,
        };

        let value = if let Some(mult) = multiplier {
            self.bump();
            base.checked_mul(mult).ok_or_else(|| LexError {
                line,
                reason: "number literal overflows after quantifier".to_string(),
            })?
        } else {
            base
        };

        Ok(TokenKind::Number(value))
    }

    /// Quoted-string bodies are unescaped with `nom` combinators, not a
    /// hand-rolled scan — see `parse_string_part` below.
    fn lex_quoted_string(&mut self, line: u32) -> Result<TokenKind, LexError> {
        self.bump(); // opening quote
        let input = self.rest();
        let (remaining, parts) = many0(parse_string_part)(input).map_err(|_| LexError {
            line,
            reason: "unterminated quoted string".to_string(),
        })?;

        let mut out = String::new();
        for part in parts {
            match part {
                StringPart::Literal(s) => out.push_str(s),
                StringPart::Escaped(c) => out.push(c),
            }
        }

        match remaining.chars().next() {
            Some('"') => {
                self.set_rest(&remaining[1..]);
                Ok(TokenKind::QuotedString(out))
            }
            Some('\r') | Some('\n') => Err(LexError {
                line,
                reason: "bare CR/LF not allowed inside a quoted string".to_string(),
            }),
            _ => Err(LexError {
                line,
                reason: "unterminated quoted string".to_string(),
            }),
        }
    }

    /// `identifier` vs. the `text:` multiline-string introducer share a
    /// prefix, so they're disambiguated after reading the bare word.
    fn lex_identifier_or_multiline(&mut self, line: u32) -> Result<TokenKind, LexError> {
        let mut word = String::new();
        while let Some(c) = self.peek() {
            if c.is_ascii_alphanumeric() || c == '_' {
                word.push(c);
                self.bump();
            } else {
                break;
            }
        }

        if word == "text" && self.peek() == Some(':') {
            self.bump();
            return self.lex_multiline_string(line);
        }

        Ok(TokenKind::Identifier(word))
    }

    fn lex_multiline_string(&mut self, line: u32) -> Result<TokenKind, LexError> {
        // Optional whitespace/comment up to the newline that starts the body.
        loop {
            match self.peek() {
                Some(c) if c == ' ' || c == '\t' || c == '\r' => {
                    self.bump();
                }
                Some('#') => {
                    while let Some(c) = self.peek() {
                        if c == '\n' {
                            break;
                        }
                        self.bump();
                    }
                }
                Some('\n') => {
                    self.bump();
                    break;
                }
                None => {
                    return Err(LexError {
                        line,
                        reason: "unterminated multiline string".to_string(),
                    });
                }
                Some(other) => {
                    return Err(LexError {
                        line,
                        reason: format!(
                            "unexpected character {other:?} after `text:`, expected newline"
                        ),
                    });
                }
            }
        }

        let mut out = String::new();
        loop {
            let mut raw_line = String::new();
            loop {
                match self.bump() {
                    None => {
                        return Err(LexError {
                            line,
                            reason: "unterminated multiline string".to_string(),
                        });
                    }
                    Some('\n') => break,
                    Some('\r') => continue,
                    Some(c) => raw_line.push(c),
                }
            }

            if raw_line == "." {
                break;
            }

            let unstuffed = if let Some(rest) = raw_line.strip_prefix('.') {
                rest
            } else {
                raw_line.as_str()
            };
            out.push_str(unstuffed);
            out.push('\n');
        }

        Ok(TokenKind::MultilineString(out))
    }
}

/// One fragment of a quoted-string body: a run of literal text, or a single
/// escaped character.
enum StringPart<'a> {
    Literal(&'a str),
    Escaped(char),
}

fn parse_unescaped_sequence(input: &str) -> IResult<&str, &str> {
    verify(is_not("\\\"\r\n"), |s: &str| !s.is_empty())(input)
}

/// `\"` and `\\` unescape to the bare character; any other `\x` is kept as
/// the two literal characters (RFC 5228's `quoted-other`). A backslash
/// immediately before a raw CR/LF is rejected so the caller reports it the
/// same way as an unescaped one.
fn parse_escaped_char(input: &str) -> IResult<&str, StringPart> {
    alt((
        map(preceded(char('\\'), char('"')), |_| StringPart::Escaped('"')),
        map(preceded(char('\\'), char('\\')), |_| {
            StringPart::Escaped('\\')
        }),
        map(
            recognize(preceded(char('\\'), satisfy(|c| c != '\r' && c != '\n'))),
            StringPart::Literal,
        ),
    ))(input)
}

fn parse_string_part(input: &str) -> IResult<&str, StringPart> {
    alt((map(parse_unescaped_sequence, StringPart::Literal), parse_escaped_char))(input)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(src: &str) -> Vec<TokenKind> {
        Lexer::tokenize(src)
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn lexes_punctuation() {
        assert_eq!(
            kinds("(){}[],;"),
            vec![
                TokenKind::LeftParen,
                TokenKind::RightParen,
                TokenKind::LeftBrace,
                TokenKind::RightBrace,
                TokenKind::LeftBracket,
                TokenKind::RightBracket,
                TokenKind::Comma,
                TokenKind::Semicolon,
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_identifier_and_tag() {
        assert_eq!(
            kinds("header :contains"),
            vec![
                TokenKind::Identifier("header".into()),
                TokenKind::Tag("contains".into()),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn lexes_number_with_quantifier() {
        assert_eq!(
            kinds("10k 2M 1G 7"),
            vec![
                TokenKind::Number(10 * 1024),
                TokenKind::Number(2 * 1024 * 1024),
                TokenKind::Number(1024 * 1024 * 1024),
                TokenKind::Number(7),
                TokenKind::Eof,
            ]
        );
    }

    #[test]
    fn rejects_bad_quantifier() {
        assert!(Lexer::tokenize("10x").is_err());
    }

    #[test]
    fn lexes_quoted_string_with_escapes() {
        assert_eq!(
            kinds(r#""a\"b\\c""#),
            vec![TokenKind::QuotedString("a\"b\\c".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(Lexer::tokenize("\"abc").is_err());
    }

    #[test]
    fn quoted_other_escape_keeps_both_characters() {
        // `\n` inside a quoted string isn't `\"` or `\\`, so both the
        // backslash and the letter are kept literally (RFC 5228 quoted-other).
        assert_eq!(
            kinds(r#""a\nb""#),
            vec![TokenKind::QuotedString("a\\nb".into()), TokenKind::Eof]
        );
    }

    #[test]
    fn rejects_bare_crlf_in_quoted_string() {
        assert!(Lexer::tokenize("\"a\nb\"").is_err());
    }

    #[test]
    fn drops_hash_and_bracket_comments_but_counts_lines() {
        let toks = Lexer::tokenize("# comment\nkeep; /* block\ncomment */ stop;").unwrap();
        let lines: Vec<u32> = toks.iter().map(|t| t.line).collect();
        // `keep` is on line 2; `stop` is on line 3 (after the two-line
        // bracket comment).
        assert_eq!(lines[0], 2);
        let stop_idx = toks
            .iter()
            .position(|t| t.kind == TokenKind::Identifier("stop".into()))
            .unwrap();
        assert_eq!(toks[stop_idx].line, 3);
    }

    #[test]
    fn lexes_multiline_string_with_dot_unstuffing() {
        let src = "text:\nhello\n..world\n.\n";
        let toks = Lexer::tokenize(src).unwrap();
        assert_eq!(
            toks[0].kind,
            TokenKind::MultilineString("hello\n.world\n".into())
        );
    }

    #[test]
    fn unterminated_bracket_comment_errors() {
        assert!(Lexer::tokenize("/* never closes").is_err());
    }

    #[test]
    fn line_numbers_monotonic_across_multiline_string() {
        let src = "text:\nline1\nline2\n.\nstop;";
        let toks = Lexer::tokenize(src).unwrap();
        // The multiline string token itself is reported at its start line.
        assert_eq!(toks[0].line, 1);
        let stop = toks
            .iter()
            .find(|t| t.kind == TokenKind::Identifier("stop".into()))
            .unwrap();
        assert_eq!(stop.line, 5);
    }
}
