//! Canonical pretty-printer for a parsed [`Script`].
//!
//! Output is deterministic: a single leading `require` line listing every
//! declared capability in sorted order, then the body with 4-space
//! indentation per nesting level. Re-lexing and re-parsing the output
//! always yields a structurally equal tree (line numbers move, nothing
//! else does).

use std::collections::BTreeSet;
use std::fmt::Write as _;

use super::ast::{Command, Script, Value};
use super::registry::ArgSyntax;

const INDENT: &str = "    ";

impl Script {
    pub fn to_sieve(&self) -> String {
        let mut out = String::new();
        let required = self.effective_required_capabilities();
        if !required.is_empty() {
            out.push_str("require [");
            for (i, cap) in required.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                write!(out, "{}", quote(cap)).unwrap();
            }
            out.push_str("];\n");
        }
        for cmd in &self.body {
            write_statement(&mut out, cmd, 0);
        }
        out
    }

    /// `required_capabilities` as stored, unioned with every extension
    /// command's `extension_name` actually present in the tree (including
    /// nested inside `if`/test trees). A tree built directly through the
    /// [`Command`] builder API rather than the parser never populates
    /// `required_capabilities` itself, so the `require` line has to be
    /// derived here to keep `parse(to_sieve(a)) == a` holding.
    fn effective_required_capabilities(&self) -> BTreeSet<String> {
        let mut required = self.required_capabilities.clone();
        self.walk(|cmd, _depth| {
            if cmd.definition.is_extension {
                if let Some(name) = cmd.definition.extension_name {
                    required.insert(name.to_string());
                }
            }
        });
        required
    }
}

fn write_statement(out: &mut String, cmd: &Command, depth: usize) {
    out.push_str(&INDENT.repeat(depth));
    write_invocation(out, cmd);
    if cmd.definition.takes_block {
        out.push_str(" {\n");
        for child in &cmd.children {
            write_statement(out, child, depth + 1);
        }
        out.push_str(&INDENT.repeat(depth));
        out.push_str("}\n");
    } else {
        out.push_str(";\n");
    }
}

fn write_invocation(out: &mut String, cmd: &Command) {
    out.push_str(cmd.name());
    match cmd.definition.arg_syntax {
        ArgSyntax::Standard => write_standard_args(out, cmd),
        ArgSyntax::ParenTestList => write_paren_test_list(out, cmd),
    }
}

fn write_standard_args(out: &mut String, cmd: &Command) {
    for group in cmd.definition.tag_groups() {
        let Some(Value::Tag(lit)) = cmd.argument(group.name) else {
            continue;
        };
        out.push_str(" :");
        out.push_str(lit);
        let Some(literal) = group.literals.iter().find(|l| l.literal == lit) else {
            continue;
        };
        if literal.companion.is_some() {
            if let Some(companion) = cmd.companion(group.name) {
                out.push(' ');
                write_value(out, companion);
            }
        }
    }
    for pos in cmd.definition.positionals() {
        let Some(value) = cmd.argument(pos.name) else {
            continue;
        };
        out.push(' ');
        write_value(out, value);
    }
}

fn write_paren_test_list(out: &mut String, cmd: &Command) {
    out.push_str(" (");
    if let Some(Value::TestList(tests)) = cmd.argument("tests") {
        for (i, test) in tests.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            write_invocation(out, test);
        }
    }
    out.push(')');
}

fn write_value(out: &mut String, value: &Value) {
    match value {
        Value::Number(n) => write!(out, "{n}").unwrap(),
        Value::String(s) => out.push_str(&quote(s)),
        Value::StringList(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push_str(", ");
                }
                out.push_str(&quote(item));
            }
            out.push(']');
        }
        Value::Test(test) => write_invocation(out, test),
        Value::TestList(_) | Value::Tag(_) => {
            // Bound only through their dedicated slots above.
        }
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::super::ast::{Command, Value};
    use super::super::parser::parse;
    use super::super::registry::Registry;

    #[test]
    fn round_trip_preserves_structure() {
        let source = r#"require ["fileinto", "imap4flags"];
if header :contains "Subject" "urgent" {
    fileinto :copy "Urgent";
    addflag "\\Flagged";
} elsif not header :is "Subject" "spam" {
    keep;
} else {
    discard;
}"#;
        let script = parse(source).unwrap();
        let rendered = script.to_sieve();
        let reparsed = parse(&rendered).unwrap();
        assert_eq!(script, reparsed);
    }

    #[test]
    fn round_trip_through_two_generations_is_stable() {
        let source = r#"require ["fileinto"];
if anyof (header :contains "subject" "a", header :contains "subject" "b") {
    fileinto "X";
}"#;
        let script = parse(source).unwrap();
        let once = script.to_sieve();
        let twice = parse(&once).unwrap().to_sieve();
        assert_eq!(once, twice);
    }

    #[test]
    fn require_list_is_sorted_and_bracketed() {
        let script = parse(r#"require ["imap4flags", "fileinto"]; if true { stop; }"#).unwrap();
        let rendered = script.to_sieve();
        assert!(rendered.starts_with(r#"require ["fileinto", "imap4flags"];"#));
    }

    #[test]
    fn empty_script_serializes_to_empty_string() {
        let script = parse("").unwrap();
        assert_eq!(script.to_sieve(), "");
    }

    #[test]
    fn quotes_and_backslashes_are_escaped_on_output() {
        let script = parse(r#"require ["fileinto"]; if header :is "S" "a\"b\\c" { fileinto "X"; }"#).unwrap();
        let rendered = script.to_sieve();
        assert!(rendered.contains(r#"a\"b\\c"#));
    }

    #[test]
    fn companion_value_survives_serialization() {
        let source = r#"require ["fileinto"];
if header :contains :comparator "i;ascii-casemap" "Subject" "x" {
    fileinto :flags ["\\Seen"] "X";
}"#;
        let script = parse(source).unwrap();
        let rendered = script.to_sieve();
        assert!(rendered.contains(r#":comparator "i;ascii-casemap""#));
        assert!(rendered.contains(r#":flags ["\\Seen"]"#));
        let reparsed = parse(&rendered).unwrap();
        assert_eq!(script, reparsed);
    }

    #[test]
    fn builder_tree_gets_auto_require_on_serialize() {
        let registry = Registry::with_builtins();
        let fileinto_def = registry.get("fileinto").unwrap();
        let mut fileinto = Command::new(fileinto_def, 0);
        fileinto.set_argument("mailbox", Value::String("Archive".to_string()));

        let mut script = super::super::ast::Script::new();
        script.add_child(fileinto);

        let rendered = script.to_sieve();
        assert!(rendered.starts_with(r#"require ["fileinto"];"#));

        let reparsed = parse(&rendered).unwrap();
        assert_eq!(reparsed.body.len(), 1);
        assert_eq!(reparsed.body[0].name(), "fileinto");
    }
}
