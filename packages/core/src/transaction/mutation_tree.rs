//! Mutation Tree
//!
//! In-memory mirror of the node hierarchy holding the point-writes a
//! transaction has staged. Interior nodes are [`ObjectNode`]s; every leaf is a
//! terminal write, either a primitive value ([`ValueNode`]) or a blob
//! ([`FileNode`]). A `None` payload on a terminal stages a delete.
//!
//! # Structural rules
//!
//! - a path holds at most one terminal write
//! - no terminal may be staged at or below another terminal's path, nor at a
//!   path that already has staged descendants
//! - re-staging a path with the same kind replaces the earlier write; changing
//!   the kind is not allowed
//!
//! Breaking any of these is a bug in the calling code and panics.

use crate::models::Node;
use serde_json::{Map, Value};
use std::fmt;

/// Blob metadata, both staged and returned by uploads
pub type Metadata = Map<String, Value>;

/// Picks the surviving write when two merged trees both touch a path
pub type ConflictResolver = Box<dyn FnMut(UpdateNode, UpdateNode) -> UpdateNode + Send>;

#[derive(Debug, Clone, PartialEq)]
pub struct ValueNode {
    pub location: Node,
    pub value: Option<Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FileNode {
    pub location: Node,
    pub data: Option<Vec<u8>>,
    pub metadata: Metadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ObjectNode {
    pub location: Node,
    pub children: Vec<UpdateNode>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UpdateNode {
    Value(ValueNode),
    File(FileNode),
    Object(ObjectNode),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteKind {
    Value,
    File,
    Object,
}

impl UpdateNode {
    pub fn value(location: Node, value: Option<Value>) -> Self {
        Self::Value(ValueNode { location, value })
    }

    pub fn file(location: Node, data: Option<Vec<u8>>, metadata: Metadata) -> Self {
        Self::File(FileNode {
            location,
            data,
            metadata,
        })
    }

    pub fn location(&self) -> &Node {
        match self {
            Self::Value(node) => &node.location,
            Self::File(node) => &node.location,
            Self::Object(node) => &node.location,
        }
    }

    pub fn kind(&self) -> WriteKind {
        match self {
            Self::Value(_) => WriteKind::Value,
            Self::File(_) => WriteKind::File,
            Self::Object(_) => WriteKind::Object,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Object(_))
    }

    fn key(&self) -> &str {
        self.location().key()
    }

    fn collect_terminals<'a>(&'a self, into: &mut Vec<&'a UpdateNode>) {
        match self {
            Self::Object(object) => object
                .children
                .iter()
                .for_each(|child| child.collect_terminals(into)),
            terminal => into.push(terminal),
        }
    }
}

/// How [`MutationTree::merge`] settles conflicting writes without a custom resolver
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeStrategy {
    /// The receiving tree keeps its write
    #[default]
    KeepCurrent,
    /// The merged-in tree's write wins
    TakeIncoming,
}

impl MergeStrategy {
    pub fn resolve(self, current: UpdateNode, incoming: UpdateNode) -> UpdateNode {
        match self {
            Self::KeepCurrent => current,
            Self::TakeIncoming => incoming,
        }
    }

    pub fn into_resolver(self) -> ConflictResolver {
        Box::new(move |current, incoming| self.resolve(current, incoming))
    }
}

impl ObjectNode {
    pub fn new(location: Node) -> Self {
        Self {
            location,
            children: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.children.iter().position(|child| child.key() == key)
    }

    /// Stage a terminal write somewhere below this node
    ///
    /// # Panics
    ///
    /// Panics on any violation of the structural rules in the module docs.
    pub fn stage(&mut self, terminal: UpdateNode) {
        assert!(
            terminal.is_terminal(),
            "Only value or file writes can be staged, got an object at {}",
            terminal.location()
        );
        assert!(
            terminal.location().is_rooted(),
            "Cannot stage a write at detached node {}",
            terminal.location()
        );
        let path = match terminal.location().relative_to(&self.location) {
            Some(path) if !path.is_empty() => path.to_vec(),
            _ => panic!(
                "Cannot stage a write at {} inside the tree rooted at {}",
                terminal.location(),
                self.location
            ),
        };
        self.stage_at(&path, terminal);
    }

    fn stage_at(&mut self, path: &[String], terminal: UpdateNode) {
        let key = &path[0];
        let existing = self.position(key);

        if path.len() == 1 {
            match existing {
                None => self.children.push(terminal),
                Some(index) => {
                    let current = &self.children[index];
                    if let UpdateNode::Object(_) = current {
                        panic!(
                            "Cannot write at {}: it lies above earlier written values",
                            terminal.location()
                        );
                    }
                    if current.kind() != terminal.kind() {
                        panic!(
                            "Cannot replace a {:?} write with a {:?} write at {}",
                            current.kind(),
                            terminal.kind(),
                            terminal.location()
                        );
                    }
                    self.children[index] = terminal;
                }
            }
            return;
        }

        let index = match existing {
            Some(index) => index,
            None => {
                let location = self.location.child(key);
                self.children
                    .push(UpdateNode::Object(ObjectNode::new(location)));
                self.children.len() - 1
            }
        };
        match &mut self.children[index] {
            UpdateNode::Object(object) => object.stage_at(&path[1..], terminal),
            current => panic!(
                "Cannot write at {}: it lies below the single value written at {}",
                terminal.location(),
                current.location()
            ),
        }
    }

    /// Deep-merge `other` into this node, resolving conflicting writes with `resolver`
    ///
    /// New children are appended; existing children keep their position.
    pub fn merge(
        &mut self,
        other: ObjectNode,
        resolver: &mut dyn FnMut(UpdateNode, UpdateNode) -> UpdateNode,
    ) {
        assert!(
            self.location == other.location,
            "Cannot merge the tree at {} into the tree at {}",
            other.location,
            self.location
        );

        for incoming in other.children {
            let Some(index) = self.position(incoming.key()) else {
                self.children.push(incoming);
                continue;
            };

            match incoming {
                UpdateNode::Object(incoming)
                    if matches!(self.children[index], UpdateNode::Object(_)) =>
                {
                    if let UpdateNode::Object(current) = &mut self.children[index] {
                        current.merge(incoming, resolver);
                    }
                }
                incoming => {
                    let current = self.children.remove(index);
                    let location = current.location().clone();
                    let resolved = resolver(current, incoming);
                    assert!(
                        resolved.location() == &location,
                        "Conflict resolver moved the write at {} to {}",
                        location,
                        resolved.location()
                    );
                    if !matches!(&resolved, UpdateNode::Object(object) if object.is_empty()) {
                        self.children.insert(index, resolved);
                    }
                }
            }
        }
    }

    /// Find the staged node at `location`
    pub fn get(&self, location: &Node) -> Option<&UpdateNode> {
        let path = location.relative_to(&self.location)?;
        let (first, rest) = path.split_first()?;
        let mut current = &self.children[self.position(first)?];
        for key in rest {
            match current {
                UpdateNode::Object(object) => current = &object.children[object.position(key)?],
                _ => return None,
            }
        }
        Some(current)
    }

    /// All terminal writes, depth-first in staging order
    pub fn terminals(&self) -> Vec<&UpdateNode> {
        let mut terminals = Vec::new();
        self.children
            .iter()
            .for_each(|child| child.collect_terminals(&mut terminals));
        terminals
    }
}

/// The full set of writes staged by one transaction, rooted at the database root
#[derive(Debug, Clone, PartialEq)]
pub struct MutationTree {
    root: ObjectNode,
}

impl Default for MutationTree {
    fn default() -> Self {
        Self::new()
    }
}

impl MutationTree {
    pub fn new() -> Self {
        Self {
            root: ObjectNode::new(Node::root()),
        }
    }

    pub fn root(&self) -> &ObjectNode {
        &self.root
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_empty()
    }

    /// Number of terminal writes
    pub fn len(&self) -> usize {
        self.root.terminals().len()
    }

    pub fn stage(&mut self, terminal: UpdateNode) {
        self.root.stage(terminal);
    }

    pub fn stage_value(&mut self, location: Node, value: Option<Value>) {
        self.stage(UpdateNode::value(location, value));
    }

    pub fn stage_file(&mut self, location: Node, data: Option<Vec<u8>>, metadata: Metadata) {
        self.stage(UpdateNode::file(location, data, metadata));
    }

    pub fn merge(
        &mut self,
        other: MutationTree,
        resolver: &mut dyn FnMut(UpdateNode, UpdateNode) -> UpdateNode,
    ) {
        self.root.merge(other.root, resolver);
    }

    pub fn get(&self, location: &Node) -> Option<&UpdateNode> {
        self.root.get(location)
    }

    /// Staged value writes (blobs excluded)
    pub fn values(&self) -> Vec<&ValueNode> {
        self.root
            .terminals()
            .into_iter()
            .filter_map(|terminal| match terminal {
                UpdateNode::Value(value) => Some(value),
                _ => None,
            })
            .collect()
    }

    /// Staged blob writes
    pub fn files(&self) -> Vec<&FileNode> {
        self.root
            .terminals()
            .into_iter()
            .filter_map(|terminal| match terminal {
                UpdateNode::File(file) => Some(file),
                _ => None,
            })
            .collect()
    }
}

impl fmt::Display for MutationTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for terminal in self.root.terminals() {
            match terminal {
                UpdateNode::Value(node) => match &node.value {
                    Some(value) => writeln!(f, "{} = {}", node.location, value)?,
                    None => writeln!(f, "{} = <delete>", node.location)?,
                },
                UpdateNode::File(node) => match &node.data {
                    Some(data) => writeln!(f, "{} = <{} bytes>", node.location, data.len())?,
                    None => writeln!(f, "{} = <delete file>", node.location)?,
                },
                UpdateNode::Object(_) => {}
            }
        }
        Ok(())
    }
}
