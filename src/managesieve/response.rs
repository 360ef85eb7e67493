//! nom parsers over ManageSieve response lines: capability pairs, the
//! tagged completion line, script-listing lines, and the literal-length
//! header. Line framing and literal-body reads live in
//! [`super::transport`]; this module only understands text once a line has
//! been read.

use nom::IResult;
use nom::branch::alt;
use nom::bytes::complete::{tag_no_case, take_until};
use nom::character::complete::{char, digit1, space0, space1};
use nom::combinator::{map, map_res, opt, recognize, value};
use nom::sequence::{delimited, tuple};

/// The kind of a tagged completion line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Ok,
    No,
    Bye,
}

/// A parsed completion line: its verdict, an optional `(CODE ...)`
/// response code, and an optional trailing human-readable string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionLine {
    pub verdict: Completion,
    pub code: Option<String>,
    pub human: Option<String>,
}

/// A line that is either a literal-length header (`{n}` / `{n+}`), a
/// capability pair, or a tagged completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseLine {
    Completion(CompletionLine),
    /// A quoted capability name, optionally followed by a quoted value
    /// (e.g. `"SASL" "PLAIN LOGIN"`, or bare `"STARTTLS"`).
    Capability { name: String, value: Option<String> },
    /// Trailing `{n}` or `{n+}`, signalling a following literal body of
    /// exactly `n` octets plus CRLF.
    LiteralHeader { length: usize, synchronizing: bool },
}

pub(super) fn quoted_string(input: &str) -> IResult<&str, String> {
    delimited(
        char('"'),
        map(
            nom::multi::many0(alt((
                value('"', nom::bytes::complete::tag("\\\"")),
                value('\\', nom::bytes::complete::tag("\\\\")),
                nom::character::complete::none_of("\"\\"),
            ))),
            |chars: Vec<char>| chars.into_iter().collect(),
        ),
        char('"'),
    )(input)
}

fn literal_header(input: &str) -> IResult<&str, (usize, bool)> {
    delimited(
        char('{'),
        tuple((
            map_res(digit1, |s: &str| s.parse::<usize>()),
            map(opt(char('+')), |o| o.is_some()),
        )),
        char('}'),
    )(input)
}

fn capability_pair(input: &str) -> IResult<&str, (String, Option<String>)> {
    let (input, name) = quoted_string(input)?;
    let (input, _) = space0(input)?;
    let (input, value) = opt(quoted_string)(input)?;
    Ok((input, (name, value)))
}

fn completion_verdict(input: &str) -> IResult<&str, Completion> {
    alt((
        value(Completion::Ok, tag_no_case("OK")),
        value(Completion::No, tag_no_case("NO")),
        value(Completion::Bye, tag_no_case("BYE")),
    ))(input)
}

fn response_code(input: &str) -> IResult<&str, String> {
    delimited(
        char('('),
        map(recognize(take_until(")")), |s: &str| s.to_string()),
        char(')'),
    )(input)
}

fn completion_line(input: &str) -> IResult<&str, CompletionLine> {
    let (input, verdict) = completion_verdict(input)?;
    let (input, _) = space0(input)?;
    let (input, code) = opt(response_code)(input)?;
    let (input, _) = space0(input)?;
    let (input, human) = opt(alt((
        quoted_string,
        map(recognize(nom::combinator::rest), |s: &str| s.to_string()),
    )))(input)?;
    let human = human.filter(|s| !s.is_empty());
    Ok((
        input,
        CompletionLine {
            verdict,
            code,
            human,
        },
    ))
}

/// Parses one already-CRLF-stripped response line arriving outside of a
/// `LISTSCRIPTS` response (greeting/capability lines, tagged completions,
/// literal-length headers).
pub fn parse_response_line(input: &str) -> Result<ResponseLine, String> {
    let input = input.trim_end();

    if let Ok((rest, (length, synchronizing))) = literal_header(input) {
        if rest.trim().is_empty() {
            return Ok(ResponseLine::LiteralHeader {
                length,
                synchronizing,
            });
        }
    }

    if let Ok((rest, completion)) = completion_line(input) {
        if rest.trim().is_empty() {
            return Ok(ResponseLine::Completion(completion));
        }
    }

    if let Ok((rest, (name, value))) = capability_pair(input) {
        if rest.trim().is_empty() {
            return Ok(ResponseLine::Capability { name, value });
        }
    }

    Err(format!("unrecognized response line: {input:?}"))
}

/// Parses one `LISTSCRIPTS` result line: a quoted script name, optionally
/// followed by the unquoted `ACTIVE` marker.
pub fn parse_script_list_line(input: &str) -> Result<(String, bool), String> {
    let input = input.trim_end();
    let (rest, name) = quoted_string(input).map_err(|e| e.to_string())?;
    let rest = rest.trim_start();
    if rest.is_empty() {
        return Ok((name, false));
    }
    let (rest, _) = space1::<_, nom::error::Error<&str>>(rest).unwrap_or((rest, ""));
    if rest.eq_ignore_ascii_case("active") {
        Ok((name, true))
    } else {
        Err(format!("unexpected trailing content in script list line: {rest:?}"))
    }
}

/// Splits a space-delimited capability value (`"PLAIN LOGIN DIGEST-MD5"`)
/// into individual tokens.
pub fn split_mechanisms(value: &str) -> Vec<String> {
    value.split_whitespace().map(|s| s.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_capability_with_value() {
        let line = parse_response_line(r#""IMPLEMENTATION" "Example1 ManageSieved v001""#).unwrap();
        match line {
            ResponseLine::Capability { name, value } => {
                assert_eq!(name, "IMPLEMENTATION");
                assert_eq!(value.as_deref(), Some("Example1 ManageSieved v001"));
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn parses_capability_without_value() {
        let line = parse_response_line(r#""STARTTLS""#).unwrap();
        match line {
            ResponseLine::Capability { name, value } => {
                assert_eq!(name, "STARTTLS");
                assert_eq!(value, None);
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn parses_ok_completion_with_code_and_text() {
        let line = parse_response_line(r#"OK (SASL "dGVzdA==") "Authenticated""#).unwrap();
        match line {
            ResponseLine::Completion(c) => {
                assert_eq!(c.verdict, Completion::Ok);
                assert_eq!(c.code.as_deref(), Some("SASL \"dGVzdA==\""));
                assert_eq!(c.human.as_deref(), Some("Authenticated"));
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn parses_bare_no_completion() {
        let line = parse_response_line("NO").unwrap();
        match line {
            ResponseLine::Completion(c) => {
                assert_eq!(c.verdict, Completion::No);
                assert_eq!(c.code, None);
                assert_eq!(c.human, None);
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn parses_literal_header() {
        let line = parse_response_line("{42+}").unwrap();
        assert_eq!(
            line,
            ResponseLine::LiteralHeader {
                length: 42,
                synchronizing: true
            }
        );
    }

    #[test]
    fn parses_non_synchronizing_literal_header() {
        let line = parse_response_line("{128}").unwrap();
        assert_eq!(
            line,
            ResponseLine::LiteralHeader {
                length: 128,
                synchronizing: false
            }
        );
    }

    #[test]
    fn parses_inactive_script_list_line() {
        assert_eq!(
            parse_script_list_line(r#""myscript""#).unwrap(),
            ("myscript".to_string(), false)
        );
    }

    #[test]
    fn parses_active_script_list_line() {
        assert_eq!(
            parse_script_list_line(r#""myscript" ACTIVE"#).unwrap(),
            ("myscript".to_string(), true)
        );
    }

    #[test]
    fn splits_mechanism_list() {
        assert_eq!(
            split_mechanisms("PLAIN LOGIN DIGEST-MD5"),
            vec!["PLAIN", "LOGIN", "DIGEST-MD5"]
        );
    }

    #[test]
    fn handles_escaped_quotes_inside_quoted_string() {
        let (rest, s) = quoted_string(r#""a\"b""#).unwrap();
        assert_eq!(s, "a\"b");
        assert!(rest.is_empty());
    }
}
