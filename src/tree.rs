//! Project tree: a forest of project identifiers.
//!
//! Nodes are addressed by path, the ordered sequence of project ids from a
//! root down to the node. Each project id appears at most once across the
//! whole forest. The tree stores structure only; project entities live in
//! the project store.

use crate::error::{Error, Result};
use crate::ids::ProjectId;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Node {
    id: ProjectId,
    children: Vec<Node>,
}

impl Node {
    const fn leaf(id: ProjectId) -> Self {
        Self { id, children: Vec::new() }
    }

    fn collect_ids(&self, out: &mut Vec<ProjectId>) {
        out.push(self.id);
        for child in &self.children {
            child.collect_ids(out);
        }
    }
}

/// A forest of project identifiers with path addressing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectTree {
    roots: Vec<Node>,
}

impl ProjectTree {
    /// Create an empty forest.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the id is attached anywhere in the forest.
    #[must_use]
    pub fn contains(&self, id: ProjectId) -> bool {
        self.all_ids().contains(&id)
    }

    /// Every attached id, in depth-first order.
    #[must_use]
    pub fn all_ids(&self) -> Vec<ProjectId> {
        let mut out = Vec::new();
        for root in &self.roots {
            root.collect_ids(&mut out);
        }
        out
    }

    /// The ids of the subtree rooted at `id` (depth-first, `id` first), or
    /// `None` when the id is not attached.
    #[must_use]
    pub fn subtree_ids(&self, id: ProjectId) -> Option<Vec<ProjectId>> {
        fn search(nodes: &[Node], id: ProjectId) -> Option<&Node> {
            for node in nodes {
                if node.id == id {
                    return Some(node);
                }
                if let Some(found) = search(&node.children, id) {
                    return Some(found);
                }
            }
            None
        }

        let node = search(&self.roots, id)?;
        let mut ids = Vec::new();
        node.collect_ids(&mut ids);
        Some(ids)
    }

    /// Attach `id` as the last child of the node at `path`. An empty path
    /// attaches a new root.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DuplicateNode`] if `id` is already attached anywhere,
    /// or [`Error::InvalidPath`] if the path does not resolve.
    pub fn attach(&mut self, id: ProjectId, path: &[ProjectId]) -> Result<()> {
        if self.contains(id) {
            return Err(Error::DuplicateNode(id));
        }
        if path.is_empty() {
            self.roots.push(Node::leaf(id));
            return Ok(());
        }
        let parent = self.node_mut(path).ok_or(Error::InvalidPath)?;
        parent.children.push(Node::leaf(id));
        Ok(())
    }

    /// Detach the node at `path` together with its entire subtree.
    ///
    /// Returns the detached identifiers in depth-first order; the project
    /// entities themselves are untouched.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if the path does not resolve.
    pub fn detach(&mut self, path: &[ProjectId]) -> Result<Vec<ProjectId>> {
        let node = self.remove_node(path)?;
        let mut ids = Vec::new();
        node.collect_ids(&mut ids);
        Ok(ids)
    }

    /// Move the subtree at `path` so it becomes the last child of the node
    /// at `target_path`. On failure the tree is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if either path does not resolve, or
    /// [`Error::CyclicMove`] if `target_path` lies inside the moved subtree.
    pub fn move_subtree(&mut self, path: &[ProjectId], target_path: &[ProjectId]) -> Result<()> {
        if path.is_empty() || self.node(path).is_none() {
            return Err(Error::InvalidPath);
        }
        if target_path.len() >= path.len() && target_path[..path.len()] == *path {
            return Err(Error::CyclicMove);
        }
        if !target_path.is_empty() && self.node(target_path).is_none() {
            return Err(Error::InvalidPath);
        }

        // All checks passed; the detach/attach pair below cannot fail.
        let node = self.remove_node(path)?;
        if target_path.is_empty() {
            self.roots.push(node);
        } else if let Some(target) = self.node_mut(target_path) {
            target.children.push(node);
        }
        Ok(())
    }

    /// Render the subtree at `path` as an indented listing. An empty path
    /// renders the whole forest. Read-only.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPath`] if the path does not resolve.
    pub fn render(
        &self,
        path: &[ProjectId],
        show_ids: bool,
        name_of: &dyn Fn(ProjectId) -> String,
    ) -> Result<String> {
        let mut out = String::new();
        if path.is_empty() {
            for root in &self.roots {
                Self::render_node(root, 0, show_ids, name_of, &mut out);
            }
        } else {
            let node = self.node(path).ok_or(Error::InvalidPath)?;
            Self::render_node(node, 0, show_ids, name_of, &mut out);
        }
        Ok(out)
    }

    fn render_node(
        node: &Node,
        depth: usize,
        show_ids: bool,
        name_of: &dyn Fn(ProjectId) -> String,
        out: &mut String,
    ) {
        for _ in 0..depth {
            out.push_str("  ");
        }
        out.push_str(&name_of(node.id));
        if show_ids {
            let _ = write!(out, " #{}", node.id);
        }
        out.push('\n');
        for child in &node.children {
            Self::render_node(child, depth + 1, show_ids, name_of, out);
        }
    }

    fn node(&self, path: &[ProjectId]) -> Option<&Node> {
        let mut list = &self.roots;
        let mut found = None;
        for id in path {
            let node = list.iter().find(|n| n.id == *id)?;
            list = &node.children;
            found = Some(node);
        }
        found
    }

    fn node_mut(&mut self, path: &[ProjectId]) -> Option<&mut Node> {
        let (first, rest) = path.split_first()?;
        let mut node = self.roots.iter_mut().find(|n| n.id == *first)?;
        for id in rest {
            node = node.children.iter_mut().find(|n| n.id == *id)?;
        }
        Some(node)
    }

    fn remove_node(&mut self, path: &[ProjectId]) -> Result<Node> {
        let (last, parent_path) = path.split_last().ok_or(Error::InvalidPath)?;
        let siblings = if parent_path.is_empty() {
            &mut self.roots
        } else {
            &mut self.node_mut(parent_path).ok_or(Error::InvalidPath)?.children
        };
        let index = siblings.iter().position(|n| n.id == *last).ok_or(Error::InvalidPath)?;
        Ok(siblings.remove(index))
    }
}
