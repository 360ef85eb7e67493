//! The command registry: a declarative argument grammar per command,
//! consulted by the parser instead of bespoke per-command parsing routines.
//! Argument schema lives here as data, not as scattered parsing code.

use std::collections::HashMap;
use std::sync::Arc;

/// What kind of statement a command may appear as.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Control,
    Action,
    Test,
}

/// The type of value an argument slot accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    Number,
    String,
    StringList,
    Test,
    TestList,
}

/// One recognized tag literal within a [`TagGroup`] (e.g. `:is` inside the
/// match-type group).
#[derive(Debug, Clone)]
pub struct TagLiteral {
    /// Without the leading colon, e.g. `"is"`.
    pub literal: &'static str,
    /// `:comparator` and the relational match types (`:count`, `:value`)
    /// consume an extra companion argument of this kind.
    pub companion: Option<ArgKind>,
}

impl TagLiteral {
    pub const fn plain(literal: &'static str) -> Self {
        TagLiteral {
            literal,
            companion: None,
        }
    }

    pub const fn with_companion(literal: &'static str, companion: ArgKind) -> Self {
        TagLiteral {
            literal,
            companion: Some(companion),
        }
    }
}

/// A group of mutually exclusive tag literals, e.g. the match-type group
/// (`:is` / `:contains` / `:matches` / `:regex` / `:count` / `:value`).
#[derive(Debug, Clone)]
pub struct TagGroup {
    /// Semantic name used as the key in the command node's argument map.
    pub name: &'static str,
    pub literals: &'static [TagLiteral],
    pub required: bool,
}

/// A positional (non-tag) argument slot.
#[derive(Debug, Clone)]
pub struct Positional {
    pub name: &'static str,
    pub kind: ArgKind,
    pub required: bool,
}

#[derive(Debug, Clone)]
pub enum ArgSpec {
    Tag(TagGroup),
    Positional(Positional),
}

/// Grammar shape for a command's arguments. Every command uses the
/// standard tag-then-positional binding except `anyof`/`allof`, which take
/// a parenthesized comma-separated test list instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgSyntax {
    Standard,
    ParenTestList,
}

#[derive(Debug, Clone)]
pub struct CommandDef {
    pub name: &'static str,
    pub category: Category,
    pub is_extension: bool,
    pub extension_name: Option<&'static str>,
    pub args: Vec<ArgSpec>,
    pub takes_block: bool,
    pub arg_syntax: ArgSyntax,
}

impl CommandDef {
    pub fn tag_groups(&self) -> impl Iterator<Item = &TagGroup> {
        self.args.iter().filter_map(|a| match a {
            ArgSpec::Tag(g) => Some(g),
            ArgSpec::Positional(_) => None,
        })
    }

    pub fn positionals(&self) -> impl Iterator<Item = &Positional> {
        self.args.iter().filter_map(|a| match a {
            ArgSpec::Positional(p) => Some(p),
            ArgSpec::Tag(_) => None,
        })
    }
}

/// Process-wide (or explicitly threaded) mapping from lower-cased command
/// name to its definition.
#[derive(Debug, Clone)]
pub struct Registry {
    defs: HashMap<String, Arc<CommandDef>>,
}

impl Registry {
    pub fn new() -> Self {
        Registry {
            defs: HashMap::new(),
        }
    }

    /// Adds a new definition; a duplicate name replaces the prior entry.
    pub fn register(&mut self, def: CommandDef) {
        self.defs.insert(def.name.to_ascii_lowercase(), Arc::new(def));
    }

    pub fn get(&self, name: &str) -> Option<Arc<CommandDef>> {
        self.defs.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn with_builtins() -> Self {
        let mut reg = Registry::new();
        for def in builtin_defs() {
            reg.register(def);
        }
        reg
    }
}

impl Default for Registry {
    fn default() -> Self {
        Registry::with_builtins()
    }
}

const MATCH_TYPE_LITERALS: &[TagLiteral] = &[
    TagLiteral::plain("is"),
    TagLiteral::plain("contains"),
    TagLiteral::plain("matches"),
    TagLiteral::plain("regex"),
    TagLiteral::with_companion("count", ArgKind::String),
    TagLiteral::with_companion("value", ArgKind::String),
];

const ADDRESS_PART_LITERALS: &[TagLiteral] = &[
    TagLiteral::plain("localpart"),
    TagLiteral::plain("domain"),
    TagLiteral::plain("all"),
    TagLiteral::plain("user"),
    TagLiteral::plain("detail"),
];

const COMPARATOR_LITERALS: &[TagLiteral] =
    &[TagLiteral::with_companion("comparator", ArgKind::String)];

fn match_type_group() -> ArgSpec {
    ArgSpec::Tag(TagGroup {
        name: "match-type",
        literals: MATCH_TYPE_LITERALS,
        required: false,
    })
}

fn address_part_group() -> ArgSpec {
    ArgSpec::Tag(TagGroup {
        name: "address-part",
        literals: ADDRESS_PART_LITERALS,
        required: false,
    })
}

fn comparator_group() -> ArgSpec {
    ArgSpec::Tag(TagGroup {
        name: "comparator",
        literals: COMPARATOR_LITERALS,
        required: false,
    })
}

fn string_pos(name: &'static str, required: bool) -> ArgSpec {
    ArgSpec::Positional(Positional {
        name,
        kind: ArgKind::String,
        required,
    })
}

fn stringlist_pos(name: &'static str, required: bool) -> ArgSpec {
    ArgSpec::Positional(Positional {
        name,
        kind: ArgKind::StringList,
        required,
    })
}

fn test_pos(name: &'static str, required: bool) -> ArgSpec {
    ArgSpec::Positional(Positional {
        name,
        kind: ArgKind::Test,
        required,
    })
}

fn testlist_pos(name: &'static str, required: bool) -> ArgSpec {
    ArgSpec::Positional(Positional {
        name,
        kind: ArgKind::TestList,
        required,
    })
}

fn control(name: &'static str, args: Vec<ArgSpec>, takes_block: bool) -> CommandDef {
    CommandDef {
        name,
        category: Category::Control,
        is_extension: false,
        extension_name: None,
        args,
        takes_block,
        arg_syntax: ArgSyntax::Standard,
    }
}

fn action(
    name: &'static str,
    args: Vec<ArgSpec>,
    is_extension: bool,
    extension_name: Option<&'static str>,
) -> CommandDef {
    CommandDef {
        name,
        category: Category::Action,
        is_extension,
        extension_name,
        args,
        takes_block: false,
        arg_syntax: ArgSyntax::Standard,
    }
}

fn test(
    name: &'static str,
    args: Vec<ArgSpec>,
    is_extension: bool,
    extension_name: Option<&'static str>,
) -> CommandDef {
    CommandDef {
        name,
        category: Category::Test,
        is_extension,
        extension_name,
        args,
        takes_block: false,
        arg_syntax: ArgSyntax::Standard,
    }
}

fn builtin_defs() -> Vec<CommandDef> {
    vec![
        // --- Controls -------------------------------------------------
        control("require", vec![stringlist_pos("capabilities", true)], false),
        control("if", vec![test_pos("test", true)], true),
        control("elsif", vec![test_pos("test", true)], true),
        control("else", vec![], true),
        control("stop", vec![], false),
        // --- Actions ----------------------------------------------------
        action("keep", vec![], false, None),
        action("discard", vec![], false, None),
        action(
            "redirect",
            vec![
                ArgSpec::Tag(TagGroup {
                    name: "copy",
                    literals: &[TagLiteral::plain("copy")],
                    required: false,
                }),
                string_pos("address", true),
            ],
            false,
            None,
        ),
        action(
            "fileinto",
            vec![
                ArgSpec::Tag(TagGroup {
                    name: "copy",
                    literals: &[TagLiteral::plain("copy")],
                    required: false,
                }),
                ArgSpec::Tag(TagGroup {
                    name: "flags",
                    literals: &[TagLiteral::with_companion("flags", ArgKind::StringList)],
                    required: false,
                }),
                string_pos("mailbox", true),
            ],
            true,
            Some("fileinto"),
        ),
        action("reject", vec![string_pos("message", true)], true, Some("reject")),
        action(
            "ereject",
            vec![string_pos("message", true)],
            true,
            Some("reject"),
        ),
        action(
            "vacation",
            vec![
                ArgSpec::Tag(TagGroup {
                    name: "days",
                    literals: &[TagLiteral::with_companion("days", ArgKind::Number)],
                    required: false,
                }),
                ArgSpec::Tag(TagGroup {
                    name: "seconds",
                    literals: &[TagLiteral::with_companion("seconds", ArgKind::Number)],
                    required: false,
                }),
                ArgSpec::Tag(TagGroup {
                    name: "subject",
                    literals: &[TagLiteral::with_companion("subject", ArgKind::String)],
                    required: false,
                }),
                ArgSpec::Tag(TagGroup {
                    name: "from",
                    literals: &[TagLiteral::with_companion("from", ArgKind::String)],
                    required: false,
                }),
                ArgSpec::Tag(TagGroup {
                    name: "addresses",
                    literals: &[TagLiteral::with_companion("addresses", ArgKind::StringList)],
                    required: false,
                }),
                ArgSpec::Tag(TagGroup {
                    name: "mime",
                    literals: &[TagLiteral::plain("mime")],
                    required: false,
                }),
                ArgSpec::Tag(TagGroup {
                    name: "handle",
                    literals: &[TagLiteral::with_companion("handle", ArgKind::String)],
                    required: false,
                }),
                string_pos("reason", true),
            ],
            true,
            Some("vacation"),
        ),
        action(
            "setflag",
            vec![stringlist_pos("flags", true)],
            true,
            Some("imap4flags"),
        ),
        action(
            "addflag",
            vec![stringlist_pos("flags", true)],
            true,
            Some("imap4flags"),
        ),
        action(
            "removeflag",
            vec![stringlist_pos("flags", true)],
            true,
            Some("imap4flags"),
        ),
        // --- Tests ------------------------------------------------------
        test(
            "address",
            vec![
                address_part_group(),
                match_type_group(),
                comparator_group(),
                stringlist_pos("header-list", true),
                stringlist_pos("key-list", true),
            ],
            false,
            None,
        ),
        test(
            "envelope",
            vec![
                address_part_group(),
                match_type_group(),
                comparator_group(),
                stringlist_pos("envelope-part", true),
                stringlist_pos("key-list", true),
            ],
            true,
            Some("envelope"),
        ),
        test(
            "header",
            vec![
                match_type_group(),
                comparator_group(),
                stringlist_pos("header-names", true),
                stringlist_pos("key-list", true),
            ],
            false,
            None,
        ),
        test("exists", vec![stringlist_pos("header-names", true)], false, None),
        test(
            "size",
            vec![
                ArgSpec::Tag(TagGroup {
                    name: "size-comparator",
                    literals: &[
                        TagLiteral::with_companion("over", ArgKind::Number),
                        TagLiteral::with_companion("under", ArgKind::Number),
                    ],
                    required: true,
                }),
            ],
            false,
            None,
        ),
        test(
            "body",
            vec![
                ArgSpec::Tag(TagGroup {
                    name: "body-transform",
                    literals: &[
                        TagLiteral::plain("raw"),
                        TagLiteral::with_companion("content", ArgKind::StringList),
                        TagLiteral::plain("text"),
                    ],
                    required: false,
                }),
                match_type_group(),
                comparator_group(),
                stringlist_pos("key-list", true),
            ],
            true,
            Some("body"),
        ),
        test("true", vec![], false, None),
        test("false", vec![], false, None),
        test("not", vec![test_pos("test", true)], false, None),
        CommandDef {
            name: "anyof",
            category: Category::Test,
            is_extension: false,
            extension_name: None,
            args: vec![testlist_pos("tests", true)],
            takes_block: false,
            arg_syntax: ArgSyntax::ParenTestList,
        },
        CommandDef {
            name: "allof",
            category: Category::Test,
            is_extension: false,
            extension_name: None,
            args: vec![testlist_pos("tests", true)],
            takes_block: false,
            arg_syntax: ArgSyntax::ParenTestList,
        },
        test(
            "date",
            vec![
                ArgSpec::Tag(TagGroup {
                    name: "zone",
                    literals: &[TagLiteral::with_companion("zone", ArgKind::String)],
                    required: false,
                }),
                match_type_group(),
                comparator_group(),
                string_pos("header-name", true),
                string_pos("date-part", true),
                stringlist_pos("key-list", true),
            ],
            true,
            Some("date"),
        ),
        test(
            "currentdate",
            vec![
                ArgSpec::Tag(TagGroup {
                    name: "zone",
                    literals: &[TagLiteral::with_companion("zone", ArgKind::String)],
                    required: false,
                }),
                match_type_group(),
                comparator_group(),
                string_pos("date-part", true),
                stringlist_pos("key-list", true),
            ],
            true,
            Some("date"),
        ),
        test(
            "mailboxexists",
            vec![stringlist_pos("mailbox-names", true)],
            true,
            Some("mailbox"),
        ),
        test(
            "metadata",
            vec![
                match_type_group(),
                comparator_group(),
                string_pos("mailbox", true),
                string_pos("annotation", true),
                stringlist_pos("key-list", true),
            ],
            true,
            Some("mboxmetadata"),
        ),
        test(
            "metadataexists",
            vec![string_pos("mailbox", true), stringlist_pos("annotation-names", true)],
            true,
            Some("mboxmetadata"),
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_cover_every_core_command() {
        let reg = Registry::with_builtins();
        for name in [
            "require", "if", "elsif", "else", "stop", "keep", "discard", "redirect", "fileinto",
            "reject", "ereject", "vacation", "setflag", "addflag", "removeflag", "address",
            "envelope", "header", "exists", "size", "body", "true", "false", "not", "anyof",
            "allof", "date", "currentdate", "mailboxexists", "metadata", "metadataexists",
        ] {
            assert!(reg.get(name).is_some(), "missing builtin: {name}");
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let reg = Registry::with_builtins();
        assert!(reg.get("Fileinto").is_some());
        assert!(reg.get("FILEINTO").is_some());
    }

    #[test]
    fn register_overrides_existing_definition() {
        let mut reg = Registry::with_builtins();
        reg.register(control("stop", vec![string_pos("note", false)], false));
        let def = reg.get("stop").unwrap();
        assert_eq!(def.positionals().count(), 1);
    }
}
