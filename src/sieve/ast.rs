//! The typed command tree produced by the parser.
//!
//! Parent references are back-edges, not ownership: rather than threading
//! `Weak` pointers through every node, the tree is plain owned
//! `Vec<Command>` and traversal tracks ancestry explicitly as it walks —
//! see [`Command::walk`].

use std::collections::BTreeSet;

use indexmap::IndexMap;

use super::registry::CommandDef;
use std::sync::Arc;

/// A bound argument value, typed per its lexical origin.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Tag(String),
    Number(u64),
    String(String),
    StringList(Vec<String>),
    Test(Box<Command>),
    TestList(Vec<Command>),
}

/// One node of the command tree.
#[derive(Debug, Clone)]
pub struct Command {
    pub definition: Arc<CommandDef>,
    pub arguments: IndexMap<&'static str, Value>,
    /// Companion values for tag groups whose single literal shares the
    /// group's name (`:comparator`, fileinto's `:flags`, vacation's
    /// `:days`/`:subject`/etc, `:zone`). Kept in a map of its own, keyed by
    /// the group name, so a literal named the same as its group never
    /// clobbers the group's own `Value::Tag` marker in `arguments`.
    pub companions: IndexMap<&'static str, Value>,
    pub children: Vec<Command>,
    /// Source line of the command's leading identifier, for diagnostics.
    /// Deliberately excluded from `PartialEq` below: comparing a tree
    /// against a reparse of its own canonical serialization relocates
    /// every line, and that comparison should still hold structurally.
    pub line: u32,
}

impl PartialEq for Command {
    fn eq(&self, other: &Self) -> bool {
        self.definition.name == other.definition.name
            && self.arguments == other.arguments
            && self.companions == other.companions
            && self.children == other.children
    }
}

impl Command {
    pub fn new(definition: Arc<CommandDef>, line: u32) -> Self {
        Command {
            definition,
            arguments: IndexMap::new(),
            companions: IndexMap::new(),
            children: Vec::new(),
            line,
        }
    }

    pub fn name(&self) -> &str {
        self.definition.name
    }

    pub fn add_child(&mut self, child: Command) {
        self.children.push(child);
    }

    pub fn remove_child(&mut self, index: usize) -> Option<Command> {
        if index < self.children.len() {
            Some(self.children.remove(index))
        } else {
            None
        }
    }

    pub fn set_argument(&mut self, name: &'static str, value: Value) {
        self.arguments.insert(name, value);
    }

    pub fn argument(&self, name: &str) -> Option<&Value> {
        self.arguments.get(name)
    }

    pub fn set_companion(&mut self, group_name: &'static str, value: Value) {
        self.companions.insert(group_name, value);
    }

    pub fn companion(&self, group_name: &str) -> Option<&Value> {
        self.companions.get(group_name)
    }

    /// Depth-first pre-order walk. `visitor` receives each node and its
    /// nesting depth (the script body starts at depth 0).
    pub fn walk<F: FnMut(&Command, usize)>(&self, visitor: &mut F) {
        self.walk_at(0, visitor);
    }

    fn walk_at<F: FnMut(&Command, usize)>(&self, depth: usize, visitor: &mut F) {
        visitor(self, depth);
        for child in &self.children {
            child.walk_at(depth + 1, visitor);
        }
        for arg in self.arguments.values() {
            match arg {
                Value::Test(t) => t.walk_at(depth + 1, visitor),
                Value::TestList(list) => {
                    for t in list {
                        t.walk_at(depth + 1, visitor)
                    }
                }
                _ => {}
            }
        }
    }
}

/// A parsed (and validated) Sieve script: required capabilities plus the
/// top-level command sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Script {
    pub required_capabilities: BTreeSet<String>,
    pub body: Vec<Command>,
}

impl Script {
    pub fn new() -> Self {
        Script {
            required_capabilities: BTreeSet::new(),
            body: Vec::new(),
        }
    }

    pub fn add_child(&mut self, command: Command) {
        self.body.push(command);
    }

    pub fn walk<F: FnMut(&Command, usize)>(&self, mut visitor: F) {
        for command in &self.body {
            command.walk_at(0, &mut visitor);
        }
    }

    /// A flattened textual dump, one line per node, indented by nesting
    /// depth — useful for debugging/inspection.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        self.walk(|cmd, depth| {
            out.push_str(&"  ".repeat(depth));
            out.push_str(cmd.name());
            for (name, value) in &cmd.arguments {
                if matches!(value, Value::Test(_) | Value::TestList(_)) {
                    continue;
                }
                out.push_str(&format!(" {name}={value:?}"));
            }
            for (name, value) in &cmd.companions {
                out.push_str(&format!(" {name}.companion={value:?}"));
            }
            out.push('\n');
        });
        out
    }
}

impl Default for Script {
    fn default() -> Self {
        Script::new()
    }
}
