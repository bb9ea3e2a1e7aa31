//! Typed AST for Paradox-style script.
//!
//! The closed node set: Root, Block, Assignment, Value, List. The
//! serialized form is JSON with a `_type` discriminator on every node,
//! keyed in the artifact cache by (content hash, parser version).

use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Comparison / assignment operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "=")]
    Assign,
    #[serde(rename = "==")]
    Equals,
    #[serde(rename = "!=")]
    NotEquals,
    #[serde(rename = "<")]
    Less,
    #[serde(rename = "<=")]
    LessEq,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = ">=")]
    GreaterEq,
    #[serde(rename = "?=")]
    MaybeAssign,
}

impl Operator {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Assign => "=",
            Self::Equals => "==",
            Self::NotEquals => "!=",
            Self::Less => "<",
            Self::LessEq => "<=",
            Self::Greater => ">",
            Self::GreaterEq => ">=",
            Self::MaybeAssign => "?=",
        }
    }
}

/// Lexical class of a bare value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    String,
    Number,
    Bool,
    Ident,
    ScriptedValue,
}

/// One AST node. Node identity is stable by (line, column) position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "_type", rename_all = "lowercase")]
pub enum AstNode {
    Root {
        filename: String,
        children: Vec<AstNode>,
    },
    Block {
        name: String,
        operator: Operator,
        line: u32,
        column: u32,
        children: Vec<AstNode>,
    },
    Assignment {
        key: String,
        operator: Operator,
        line: u32,
        column: u32,
        value: Box<AstNode>,
    },
    Value {
        value: String,
        value_type: ValueType,
        line: u32,
        column: u32,
    },
    List {
        line: u32,
        column: u32,
        items: Vec<AstNode>,
    },
}

impl AstNode {
    /// Total node count, the node itself included.
    pub fn node_count(&self) -> u64 {
        match self {
            Self::Root { children, .. } => 1 + children.iter().map(Self::node_count).sum::<u64>(),
            Self::Block { children, .. } => 1 + children.iter().map(Self::node_count).sum::<u64>(),
            Self::Assignment { value, .. } => 1 + value.node_count(),
            Self::Value { .. } => 1,
            Self::List { items, .. } => 1 + items.iter().map(Self::node_count).sum::<u64>(),
        }
    }

    pub fn line(&self) -> u32 {
        match self {
            Self::Root { .. } => 1,
            Self::Block { line, .. }
            | Self::Assignment { line, .. }
            | Self::Value { line, .. }
            | Self::List { line, .. } => *line,
        }
    }

    /// Children of Root/Block nodes; empty for the rest.
    pub fn children(&self) -> &[AstNode] {
        match self {
            Self::Root { children, .. } | Self::Block { children, .. } => children,
            _ => &[],
        }
    }

    /// Top-level blocks whose name starts with `prefix`.
    pub fn blocks_with_prefix<'a>(&'a self, prefix: &'a str) -> impl Iterator<Item = &'a AstNode> {
        self.children().iter().filter(move |node| {
            matches!(node, Self::Block { name, .. } if name.starts_with(prefix))
        })
    }

    /// Find a direct child statement (block or assignment) by key.
    pub fn child_named(&self, key: &str) -> Option<&AstNode> {
        self.children().iter().find(|node| match node {
            Self::Block { name, .. } => name == key,
            Self::Assignment { key: k, .. } => k == key,
            _ => false,
        })
    }

    /// Render back to script text. Round-trips well-formed input up to
    /// insignificant whitespace.
    pub fn to_script(&self) -> String {
        let mut out = String::new();
        self.write_script(&mut out, 0);
        out
    }

    fn write_script(&self, out: &mut String, depth: usize) {
        let indent = "\t".repeat(depth);
        match self {
            Self::Root { children, .. } => {
                for child in children {
                    child.write_script(out, depth);
                    out.push('\n');
                }
            }
            Self::Block {
                name,
                operator,
                children,
                ..
            } => {
                let _ = write!(out, "{indent}{name} {} {{\n", operator.as_str());
                for child in children {
                    child.write_script(out, depth + 1);
                    out.push('\n');
                }
                let _ = write!(out, "{indent}}}");
            }
            Self::Assignment {
                key,
                operator,
                value,
                ..
            } => {
                let _ = write!(out, "{indent}{key} {} ", operator.as_str());
                value.write_script(out, depth);
            }
            Self::Value {
                value, value_type, ..
            } => {
                if *value_type == ValueType::String {
                    let escaped = value.replace('\\', "\\\\").replace('"', "\\\"");
                    let _ = write!(out, "\"{escaped}\"");
                } else {
                    out.push_str(value);
                }
            }
            Self::List { items, .. } => {
                out.push_str("{ ");
                for item in items {
                    item.write_script(out, 0);
                    out.push(' ');
                }
                out.push('}');
            }
        }
    }
}
