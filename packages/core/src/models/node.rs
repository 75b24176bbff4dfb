//! Hierarchical path addressing
//!
//! A [`Node`] is a path of keys. A node is *rooted* when it is anchored under
//! the database root; detached nodes (for example the location of an element
//! that has not been added anywhere yet) still have a key but no absolute
//! position. Equality and hashing use the full path plus the rooted flag.

use crate::config::RealtimeConfig;
use crate::models::SourceLink;
use std::fmt;

#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Node {
    rooted: bool,
    segments: Vec<String>,
}

impl Node {
    /// The database root
    pub fn root() -> Self {
        Self {
            rooted: true,
            segments: Vec::new(),
        }
    }

    /// A node with a key but no position in the database
    pub fn detached(key: impl Into<String>) -> Self {
        let key = key.into();
        assert!(
            !key.is_empty() && !key.contains('/'),
            "Detached node key must be a single non-empty segment, got {:?}",
            key
        );
        Self {
            rooted: false,
            segments: vec![key],
        }
    }

    /// Parse an absolute path such as `/users/u1`
    pub fn from_path(path: &str) -> Self {
        Self::root().child(path)
    }

    /// Descend by a key or a `/`-separated relative path
    pub fn child(&self, path: &str) -> Self {
        let mut child = self.clone();
        child.segments.extend(
            path.split('/')
                .filter(|segment| !segment.is_empty())
                .map(str::to_string),
        );
        child
    }

    pub fn key(&self) -> &str {
        self.segments.last().map(String::as_str).unwrap_or("")
    }

    pub fn parent(&self) -> Option<Self> {
        if self.segments.is_empty() || (!self.rooted && self.segments.len() == 1) {
            return None;
        }
        let mut parent = self.clone();
        parent.segments.pop();
        Some(parent)
    }

    pub fn is_rooted(&self) -> bool {
        self.rooted
    }

    pub fn is_root(&self) -> bool {
        self.rooted && self.segments.is_empty()
    }

    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// True when `self` lies strictly above `other`
    pub fn is_ancestor_of(&self, other: &Node) -> bool {
        self.rooted == other.rooted
            && self.segments.len() < other.segments.len()
            && other.segments.starts_with(&self.segments)
    }

    /// Keys leading from `ancestor` down to `self`, if `ancestor` contains it
    pub fn relative_to(&self, ancestor: &Node) -> Option<&[String]> {
        if ancestor == self {
            return Some(&self.segments[self.segments.len()..]);
        }
        ancestor
            .is_ancestor_of(self)
            .then(|| &self.segments[ancestor.segments.len()..])
    }

    /// The same key re-homed under `parent`
    pub fn moved_to(&self, parent: &Node) -> Self {
        parent.child(self.key())
    }

    /// Mirror of this node under the link tree root
    ///
    /// # Panics
    ///
    /// Panics if the node is not rooted.
    pub fn links_node(&self, config: &RealtimeConfig) -> Self {
        assert!(
            self.rooted,
            "Cannot build links node for detached node {}",
            self
        );
        let mut mirrored = config.links_root();
        mirrored.segments.extend(self.segments.iter().cloned());
        mirrored
    }

    /// Location of link records pointing at this node
    pub fn link_items_node(&self, config: &RealtimeConfig) -> Self {
        self.child(&config.link_items_key).links_node(config)
    }

    /// Build a link record stored under this node's link items, keyed by `id`
    pub fn generate_link(
        &self,
        id: impl Into<String>,
        targets: &[Node],
        config: &RealtimeConfig,
    ) -> (Self, SourceLink) {
        let link = SourceLink::new(id, targets.iter().map(Node::to_string).collect());
        (self.link_items_node(config).child(&link.id), link)
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.rooted {
            write!(f, "/{}", self.segments.join("/"))
        } else {
            write!(f, "{}", self.segments.join("/"))
        }
    }
}

impl fmt::Debug for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Node({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_and_rooting() {
        let node = Node::from_path("/users/u1/posts");
        assert!(node.is_rooted());
        assert_eq!(node.key(), "posts");
        assert_eq!(node.to_string(), "/users/u1/posts");
        assert_eq!(node.parent(), Some(Node::from_path("users/u1")));
        assert_eq!(Node::root().to_string(), "/");
        assert!(Node::root().parent().is_none());

        let detached = Node::detached("e1");
        assert!(!detached.is_rooted());
        assert!(detached.parent().is_none());
        assert_ne!(detached, Node::root().child("e1"));
        assert_eq!(detached.moved_to(&node), node.child("e1"));
    }

    #[test]
    fn test_ancestry() {
        let parent = Node::from_path("/a/b");
        let child = parent.child("c/d");
        assert!(parent.is_ancestor_of(&child));
        assert!(!child.is_ancestor_of(&parent));
        assert!(!parent.is_ancestor_of(&parent));
        assert_eq!(
            child.relative_to(&parent),
            Some(&["c".to_string(), "d".to_string()][..])
        );
        assert_eq!(parent.relative_to(&child), None);
    }

    #[test]
    fn test_link_nodes_mirror_path() {
        let config = RealtimeConfig::default();
        let node = Node::from_path("/users/u1");
        assert_eq!(node.links_node(&config).to_string(), "/__lnks/users/u1");
        assert_eq!(
            node.link_items_node(&config).to_string(),
            "/__lnks/users/u1/__l_itms"
        );

        let (location, link) = node.generate_link("l1", &[Node::from_path("/x/y")], &config);
        assert_eq!(location.to_string(), "/__lnks/users/u1/__l_itms/l1");
        assert_eq!(link.targets, vec!["/x/y".to_string()]);
    }

    #[test]
    #[should_panic(expected = "detached node")]
    fn test_links_node_requires_rooted() {
        Node::detached("e1").links_node(&RealtimeConfig::default());
    }
}
