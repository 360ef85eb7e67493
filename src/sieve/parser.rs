//! Recursive-descent parser producing a validated [`Script`].
//!
//! Argument binding is generic: for every command the parser consults its
//! [`CommandDef`] from the [`Registry`] and walks the declared tag groups
//! then positional slots, rather than hand-writing a parse routine per
//! command. `anyof`/`allof` are the one documented exception, using a
//! parenthesized comma-separated test list instead.

use std::collections::BTreeSet;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::ParseError;

use super::ast::{Command, Script, Value};
use super::lexer::Lexer;
use super::registry::{ArgKind, ArgSyntax, Category, CommandDef, Registry};
use super::token::{Token, TokenKind};

/// Parses `source` against the built-in registry.
pub fn parse(source: &str) -> Result<Script, ParseError> {
    let registry = Registry::with_builtins();
    parse_with_registry(source, &registry)
}

/// Parses `source` against a caller-supplied registry, e.g. one extended
/// via [`Registry::register`].
pub fn parse_with_registry(source: &str, registry: &Registry) -> Result<Script, ParseError> {
    let tokens = Lexer::tokenize(source)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        registry,
        required_capabilities: BTreeSet::new(),
    };
    let script = parser.parse_script()?;
    validate_capabilities(&script)?;
    Ok(script)
}

struct Parser<'r> {
    tokens: Vec<Token>,
    pos: usize,
    registry: &'r Registry,
    required_capabilities: BTreeSet<String>,
}

impl<'r> Parser<'r> {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos]
    }

    fn current_line(&self) -> u32 {
        self.peek().line
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.tokens[self.pos].clone();
        if self.pos + 1 < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn check_kind(&self, want: &TokenKind) -> bool {
        std::mem::discriminant(&self.peek().kind) == std::mem::discriminant(want)
    }

    fn expect_kind(&mut self, want: TokenKind, what: &str) -> Result<Token, ParseError> {
        if self.check_kind(&want) {
            Ok(self.advance())
        } else {
            Err(self.err(format!(
                "expected {what}, found {}",
                self.peek().kind.describe()
            )))
        }
    }

    fn expect_semicolon(&mut self) -> Result<(), ParseError> {
        self.expect_kind(TokenKind::Semicolon, "`;`")?;
        Ok(())
    }

    fn expect_identifier_token(&mut self) -> Result<(String, u32), ParseError> {
        let line = self.current_line();
        match self.peek().kind.clone() {
            TokenKind::Identifier(s) => {
                self.advance();
                Ok((s, line))
            }
            other => Err(self.err(format!("expected a command name, found {}", other.describe()))),
        }
    }

    fn peek_tag(&self) -> Option<String> {
        match &self.peek().kind {
            TokenKind::Tag(s) => Some(s.clone()),
            _ => None,
        }
    }

    fn err(&self, message: impl Into<String>) -> ParseError {
        ParseError {
            line: self.current_line(),
            message: message.into(),
        }
    }

    fn err_at(&self, line: u32, message: impl Into<String>) -> ParseError {
        ParseError {
            line,
            message: message.into(),
        }
    }

    /// Statements that cannot begin an argument value — legal wherever an
    /// argument list may end.
    fn at_argument_boundary(&self) -> bool {
        matches!(
            self.peek().kind,
            TokenKind::Semicolon
                | TokenKind::LeftBrace
                | TokenKind::RightParen
                | TokenKind::Comma
                | TokenKind::Eof
        )
    }

    fn parse_script(&mut self) -> Result<Script, ParseError> {
        let mut script = Script::new();
        let body = self.parse_statement_list(true)?;
        script.body = body;
        script.required_capabilities = std::mem::take(&mut self.required_capabilities);
        Ok(script)
    }

    /// Parses a run of statements, either the script's top level (when
    /// `top_level` is true, terminated by EOF) or a `{ … }` block body
    /// (terminated by a `}` the caller consumes).
    fn parse_statement_list(&mut self, top_level: bool) -> Result<Vec<Command>, ParseError> {
        let mut body = Vec::new();
        let mut last_control_sibling: Option<&'static str> = None;

        loop {
            if top_level {
                if self.at_eof() {
                    break;
                }
            } else if self.check_kind(&TokenKind::RightBrace) || self.at_eof() {
                break;
            }

            let (name, line) = self.expect_identifier_token()?;
            let lname = name.to_ascii_lowercase();
            let def = self
                .registry
                .get(&name)
                .ok_or_else(|| self.err_at(line, format!("unknown command `{name}`")))?;

            if def.category == Category::Test {
                return Err(self.err_at(
                    line,
                    format!("`{name}` is a test and cannot be used as a statement"),
                ));
            }

            if lname == "require" {
                let cmd = self.parse_statement_command(def, line)?;
                if let Some(Value::StringList(caps)) = cmd.argument("capabilities") {
                    self.required_capabilities.extend(caps.iter().cloned());
                }
                continue;
            }

            if (lname == "elsif" || lname == "else")
                && !matches!(last_control_sibling, Some("if") | Some("elsif"))
            {
                return Err(self.err_at(
                    line,
                    format!("`{name}` must immediately follow an `if` or `elsif` block"),
                ));
            }

            let def_name = def.name;
            let cmd = self.parse_statement_command(def, line)?;
            last_control_sibling = Some(def_name);
            body.push(cmd);
        }

        Ok(body)
    }

    fn parse_statement_command(
        &mut self,
        def: Arc<CommandDef>,
        line: u32,
    ) -> Result<Command, ParseError> {
        let takes_block = def.takes_block;
        let mut cmd = self.parse_invocation(def, line)?;
        if takes_block {
            self.expect_kind(TokenKind::LeftBrace, "`{`")?;
            cmd.children = self.parse_statement_list(false)?;
            self.expect_kind(TokenKind::RightBrace, "`}`")?;
        } else {
            self.expect_semicolon()?;
        }
        Ok(cmd)
    }

    /// Parses one command's argument list (tags then positionals, or the
    /// parenthesized test list), without consuming a trailing `;`/`{` —
    /// shared between statement and test position.
    fn parse_invocation(&mut self, def: Arc<CommandDef>, line: u32) -> Result<Command, ParseError> {
        let mut cmd = Command::new(def.clone(), line);
        match def.arg_syntax {
            ArgSyntax::Standard => self.bind_standard_args(&mut cmd, &def)?,
            ArgSyntax::ParenTestList => self.bind_paren_test_list(&mut cmd, &def)?,
        }
        Ok(cmd)
    }

    fn bind_standard_args(&mut self, cmd: &mut Command, def: &CommandDef) -> Result<(), ParseError> {
        let mut satisfied_groups: HashSet<&'static str> = HashSet::new();

        loop {
            let Some(tag_text) = self.peek_tag() else {
                break;
            };
            let line = self.current_line();

            let found = def.tag_groups().find_map(|group| {
                group
                    .literals
                    .iter()
                    .find(|lit| lit.literal == tag_text)
                    .map(|lit| (group, lit))
            });

            let (group, lit) = found.ok_or_else(|| {
                self.err_at(line, format!("`:{tag_text}` is not a valid tag for `{}`", def.name))
            })?;

            if !satisfied_groups.insert(group.name) {
                return Err(self.err_at(
                    line,
                    format!("duplicate `{}` argument to `{}`", group.name, def.name),
                ));
            }

            self.advance();

            if let Some(companion_kind) = lit.companion {
                let companion = self.parse_value_of_kind(companion_kind)?;
                cmd.set_companion(group.name, companion);
            }

            cmd.set_argument(group.name, Value::Tag(lit.literal.to_string()));
        }

        for required in def.tag_groups().filter(|g| g.required) {
            if !satisfied_groups.contains(required.name) {
                return Err(self.err(format!(
                    "`{}` requires a `{}` argument",
                    def.name, required.name
                )));
            }
        }

        for pos in def.positionals() {
            if self.at_argument_boundary() {
                if pos.required {
                    return Err(self.err(format!(
                        "`{}` is missing required argument `{}`",
                        def.name, pos.name
                    )));
                }
                continue;
            }
            let value = self.parse_value_of_kind(pos.kind)?;
            cmd.set_argument(pos.name, value);
        }

        if !self.at_argument_boundary() {
            return Err(self.err(format!(
                "unexpected {} after arguments to `{}`",
                self.peek().kind.describe(),
                def.name
            )));
        }

        Ok(())
    }

    fn bind_paren_test_list(&mut self, cmd: &mut Command, def: &CommandDef) -> Result<(), ParseError> {
        self.expect_kind(TokenKind::LeftParen, "`(`")?;
        let mut tests = Vec::new();
        if !self.check_kind(&TokenKind::RightParen) {
            loop {
                tests.push(self.parse_test()?);
                if self.check_kind(&TokenKind::Comma) {
                    self.advance();
                    continue;
                }
                break;
            }
        }
        self.expect_kind(TokenKind::RightParen, "`)`")?;
        if tests.is_empty() {
            return Err(self.err(format!("`{}` requires at least one test", def.name)));
        }
        cmd.set_argument("tests", Value::TestList(tests));
        Ok(())
    }

    fn parse_test(&mut self) -> Result<Command, ParseError> {
        let (name, line) = self.expect_identifier_token()?;
        let def = self
            .registry
            .get(&name)
            .ok_or_else(|| self.err_at(line, format!("unknown test `{name}`")))?;
        if def.category != Category::Test {
            return Err(self.err_at(line, format!("`{name}` is not a test")));
        }
        self.parse_invocation(def, line)
    }

    fn parse_value_of_kind(&mut self, kind: ArgKind) -> Result<Value, ParseError> {
        match kind {
            ArgKind::Number => {
                let line = self.current_line();
                match self.advance().kind {
                    TokenKind::Number(n) => Ok(Value::Number(n)),
                    other => Err(self.err_at(line, format!("expected a number, found {}", other.describe()))),
                }
            }
            ArgKind::String => self.parse_single_string().map(Value::String),
            ArgKind::StringList => self.parse_string_list_value(),
            ArgKind::Test => self.parse_test().map(|c| Value::Test(Box::new(c))),
            ArgKind::TestList => Err(self.err("internal error: bare test-list argument")),
        }
    }

    fn parse_single_string(&mut self) -> Result<String, ParseError> {
        let line = self.current_line();
        match self.advance().kind {
            TokenKind::QuotedString(s) | TokenKind::MultilineString(s) => Ok(s),
            other => Err(self.err_at(line, format!("expected a string, found {}", other.describe()))),
        }
    }

    fn parse_string_list_value(&mut self) -> Result<Value, ParseError> {
        if self.check_kind(&TokenKind::LeftBracket) {
            self.advance();
            let mut items = Vec::new();
            if !self.check_kind(&TokenKind::RightBracket) {
                loop {
                    items.push(self.parse_single_string()?);
                    if self.check_kind(&TokenKind::Comma) {
                        self.advance();
                        continue;
                    }
                    break;
                }
            }
            self.expect_kind(TokenKind::RightBracket, "`]`")?;
            Ok(Value::StringList(items))
        } else {
            Ok(Value::StringList(vec![self.parse_single_string()?]))
        }
    }
}

fn validate_capabilities(script: &Script) -> Result<(), ParseError> {
    let mut offense: Option<ParseError> = None;
    script.walk(|cmd, _depth| {
        if offense.is_some() {
            return;
        }
        if cmd.definition.is_extension {
            if let Some(ext) = cmd.definition.extension_name {
                if !script.required_capabilities.contains(ext) {
                    offense = Some(ParseError {
                        line: cmd.line,
                        message: format!(
                            "`{}` requires capability `{ext}`, which was not declared via `require`",
                            cmd.name()
                        ),
                    });
                }
            }
        }
    });
    match offense {
        Some(e) => Err(e),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn require_only_produces_empty_body() {
        let script = parse(r#"require ["fileinto"];"#).unwrap();
        assert!(script.body.is_empty());
        assert_eq!(
            script.required_capabilities,
            BTreeSet::from(["fileinto".to_string()])
        );
    }

    #[test]
    fn require_without_semicolon_errors_with_line_one() {
        let err = parse(r#"require ["fileinto"]"#).unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains(";") || err.message.contains("`;`"));
    }

    #[test]
    fn if_with_fileinto_requires_capability() {
        let script = parse(
            r#"require ["fileinto"];
            if header :is "Sender" "a@b" { fileinto "X"; }"#,
        )
        .unwrap();
        assert_eq!(script.body.len(), 1);
        let if_cmd = &script.body[0];
        assert_eq!(if_cmd.name(), "if");
        match if_cmd.argument("test").unwrap() {
            Value::Test(t) => {
                assert_eq!(t.name(), "header");
                assert_eq!(
                    t.argument("match-type"),
                    Some(&Value::Tag("is".to_string()))
                );
                assert_eq!(
                    t.argument("header-names"),
                    Some(&Value::StringList(vec!["Sender".to_string()]))
                );
                assert_eq!(
                    t.argument("key-list"),
                    Some(&Value::StringList(vec!["a@b".to_string()]))
                );
            }
            other => panic!("expected test, got {other:?}"),
        }
        assert_eq!(if_cmd.children.len(), 1);
        assert_eq!(if_cmd.children[0].name(), "fileinto");
    }

    #[test]
    fn fileinto_without_require_is_rejected() {
        let err = parse(r#"fileinto "Spam";"#).unwrap_err();
        assert!(err.message.contains("fileinto"));
        assert!(err.message.contains("capability"));
    }

    #[test]
    fn elsif_without_preceding_if_is_rejected() {
        let err = parse(r#"elsif true { stop; }"#).unwrap_err();
        assert!(err.message.contains("must immediately follow"));
    }

    #[test]
    fn full_if_elsif_else_chain() {
        let script = parse(
            r#"require ["fileinto"];
            if header :contains "Subject" "urgent" {
                fileinto "Urgent";
            } elsif header :contains "Subject" "bulk" {
                discard;
            } else {
                keep;
            }"#,
        )
        .unwrap();
        assert_eq!(script.body.len(), 3);
        assert_eq!(script.body[0].name(), "if");
        assert_eq!(script.body[1].name(), "elsif");
        assert_eq!(script.body[2].name(), "else");
    }

    #[test]
    fn anyof_allof_paren_list() {
        let script = parse(
            r#"require ["fileinto"];
            if anyof (header :contains "subject" "a", header :contains "subject" "b") {
                fileinto "X";
            }"#,
        )
        .unwrap();
        let if_cmd = &script.body[0];
        match if_cmd.argument("test").unwrap() {
            Value::Test(t) => {
                assert_eq!(t.name(), "anyof");
                match t.argument("tests").unwrap() {
                    Value::TestList(list) => assert_eq!(list.len(), 2),
                    other => panic!("expected test list, got {other:?}"),
                }
            }
            other => panic!("expected test, got {other:?}"),
        }
    }

    #[test]
    fn not_wraps_single_test() {
        let script = parse(r#"if not true { stop; }"#).unwrap();
        match script.body[0].argument("test").unwrap() {
            Value::Test(t) => assert_eq!(t.name(), "not"),
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        let err = parse(r#"if header :bogus "Subject" "x" { stop; }"#).unwrap_err();
        assert!(err.message.contains("bogus"));
    }

    #[test]
    fn duplicate_match_type_tag_is_rejected() {
        let err = parse(r#"if header :is :contains "Subject" "x" { stop; }"#).unwrap_err();
        assert!(err.message.contains("duplicate"));
    }

    #[test]
    fn extra_positional_argument_is_rejected() {
        let err = parse(r#"keep "oops";"#).unwrap_err();
        assert!(err.message.contains("unexpected"));
    }

    #[test]
    fn comparator_tag_with_companion() {
        let script = parse(
            r#"if header :contains :comparator "i;ascii-casemap" "Subject" "x" { stop; }"#,
        )
        .unwrap();
        match script.body[0].argument("test").unwrap() {
            Value::Test(t) => {
                assert_eq!(
                    t.argument("comparator"),
                    Some(&Value::Tag("comparator".to_string()))
                );
                assert_eq!(
                    t.companion("comparator"),
                    Some(&Value::String("i;ascii-casemap".to_string()))
                );
            }
            other => panic!("{other:?}"),
        }
    }

    #[test]
    fn multiple_require_statements_accumulate() {
        let script = parse(
            r#"require ["fileinto"];
            require ["imap4flags"];
            if true { fileinto "X"; addflag "\\Seen"; }"#,
        )
        .unwrap();
        assert_eq!(
            script.required_capabilities,
            BTreeSet::from(["fileinto".to_string(), "imap4flags".to_string()])
        );
    }

    #[test]
    fn require_after_non_require_command_is_accepted() {
        // Capability declarations are scoped to the whole script, not
        // sequentially, so a later `require` still covers earlier uses.
        let script = parse(
            r#"stop;
            require ["fileinto"];
            fileinto "X";"#,
        )
        .unwrap();
        assert_eq!(script.body.len(), 2);
        assert!(script.required_capabilities.contains("fileinto"));
    }

    #[test]
    fn stringlist_accepts_bare_single_string() {
        let script = parse(r#"require ["fileinto"]; if header :is "a" "b" { fileinto "x"; }"#).unwrap();
        let test = match script.body[0].argument("test").unwrap() {
            Value::Test(t) => t,
            _ => unreachable!(),
        };
        assert_eq!(
            test.argument("header-names"),
            Some(&Value::StringList(vec!["a".to_string()]))
        );
    }
}
