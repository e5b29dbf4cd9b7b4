//! Command dispatch engine: a static tree whose internal nodes are named
//! subcommands and whose leaves are operation ids. Resolution is a pure
//! recursive walk with exact token equality, no backtracking and no fuzzy
//! matching.

use std::collections::BTreeMap;

use fleet_common::{FleetError, Result};

/// Identifier of one bound operation; the façade maps these to handlers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    New,
    Select,
    SetImage,
    SetApt,
    SetBasedir,
    SetDeploy,
    SetUndeploy,
    SetEntry,
    SetPort,
    ListImage,
    ListApt,
    ListDeploy,
    ListSelect,
    ListStatus,
    Build,
    Run,
    RmImage,
    RmContainer,
    StopContainer,
}

#[derive(Debug)]
pub enum CommandNode {
    Leaf(Op),
    Branch(BTreeMap<&'static str, CommandNode>),
}

impl CommandNode {
    fn branch<const N: usize>(entries: [(&'static str, CommandNode); N]) -> Self {
        CommandNode::Branch(entries.into_iter().collect())
    }
}

#[derive(Debug)]
pub struct CommandTree {
    root: CommandNode,
}

impl Default for CommandTree {
    fn default() -> Self {
        Self::standard()
    }
}

impl CommandTree {
    /// The full CLI surface.
    pub fn standard() -> Self {
        use CommandNode::Leaf;
        let root = CommandNode::branch([
            ("new", Leaf(Op::New)),
            ("select", Leaf(Op::Select)),
            (
                "set",
                CommandNode::branch([
                    ("image", Leaf(Op::SetImage)),
                    ("apt", Leaf(Op::SetApt)),
                    ("basedir", Leaf(Op::SetBasedir)),
                    ("deploy", Leaf(Op::SetDeploy)),
                    ("undeploy", Leaf(Op::SetUndeploy)),
                    ("entry", Leaf(Op::SetEntry)),
                    ("port", Leaf(Op::SetPort)),
                ]),
            ),
            (
                "list",
                CommandNode::branch([
                    ("image", Leaf(Op::ListImage)),
                    ("apt", Leaf(Op::ListApt)),
                    ("deploy", Leaf(Op::ListDeploy)),
                    ("select", Leaf(Op::ListSelect)),
                    ("status", Leaf(Op::ListStatus)),
                ]),
            ),
            ("build", Leaf(Op::Build)),
            ("run", Leaf(Op::Run)),
            (
                "rm",
                CommandNode::branch([
                    ("image", Leaf(Op::RmImage)),
                    ("container", Leaf(Op::RmContainer)),
                ]),
            ),
            (
                "stop",
                CommandNode::branch([("container", Leaf(Op::StopContainer))]),
            ),
        ]);
        Self { root }
    }

    /// Resolve a token sequence to an operation and the index where its
    /// arguments start. Empty input is a no-op (`Ok(None)`); running out of
    /// tokens below the root is `IncompleteCommand`; a token that matches
    /// no child is `UnknownCommand`.
    pub fn resolve(&self, tokens: &[&str]) -> Result<Option<(Op, usize)>> {
        Self::walk(&self.root, tokens, 0)
    }

    fn walk(node: &CommandNode, tokens: &[&str], depth: usize) -> Result<Option<(Op, usize)>> {
        match node {
            CommandNode::Leaf(op) => Ok(Some((*op, depth))),
            CommandNode::Branch(children) => {
                let Some(token) = tokens.get(depth) else {
                    if depth == 0 {
                        return Ok(None);
                    }
                    return Err(FleetError::IncompleteCommand(tokens[depth - 1].to_string()));
                };
                match children.get(*token) {
                    Some(child) => Self::walk(child, tokens, depth + 1),
                    None => Err(FleetError::UnknownCommand(token.to_string())),
                }
            }
        }
    }
}
