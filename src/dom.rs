//! In-memory model of the host document.
//!
//! The core never owns the page; it holds `NodeId`s into this arena and has to
//! tolerate any of them becoming detached. The model carries exactly the host
//! surface the core consumes:
//!
//! - an element tree with attributes and text,
//! - selector queries (`matches`, `closest`, `query_selector_all`),
//! - a childList mutation journal drained in batches with [`Document::take_records`],
//! - a vertical viewport with `scroll_into_view` / `scroll_by`.
//!
//! Invariants:
//! - A node has at most one parent; appending an attached node moves it.
//! - Only insertions and removals under a connected parent are journaled.
//! - Text nodes never have children.

use std::collections::HashMap;

use crate::selector::Selector;

/// Vertical space every element occupies in the simplified layout.
pub const ROW_HEIGHT: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    pub fn index(self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone)]
enum NodeData {
    Element {
        tag: String,
        attributes: Vec<(String, String)>,
    },
    Text(String),
}

#[derive(Debug, Clone)]
struct Node {
    data: NodeData,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
}

/// One childList mutation, as delivered to observers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutationRecord {
    pub target: NodeId,
    pub added: Vec<NodeId>,
    pub removed: Vec<NodeId>,
}

#[derive(Debug, Clone)]
pub struct Document {
    nodes: Vec<Node>,
    root: NodeId,
    body: NodeId,
    records: Vec<MutationRecord>,
    scroll_y: i64,
    location: String,
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

impl Document {
    pub fn new() -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            root: NodeId(0),
            body: NodeId(0),
            records: Vec::new(),
            scroll_y: 0,
            location: "/".to_string(),
        };
        let root = doc.create_element("html");
        let body = doc.create_element("body");
        doc.root = root;
        doc.body = body;
        doc.nodes[body.0].parent = Some(root);
        doc.nodes[root.0].children.push(body);
        doc
    }

    pub fn with_location(location: impl Into<String>) -> Self {
        let mut doc = Self::new();
        doc.location = location.into();
        doc
    }

    /// Path plus query string of the page, e.g. `/search?q=rust&f=live`.
    pub fn location(&self) -> &str {
        &self.location
    }

    pub fn set_location(&mut self, location: impl Into<String>) {
        self.location = location.into();
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn body(&self) -> NodeId {
        self.body
    }

    pub fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(NodeData::Element {
            tag: tag.to_ascii_lowercase(),
            attributes: Vec::new(),
        })
    }

    /// Detached element with the given attributes.
    pub fn element(&mut self, tag: &str, attributes: &[(&str, &str)]) -> NodeId {
        let node = self.create_element(tag);
        for (name, value) in attributes {
            self.set_attribute(node, name, value);
        }
        node
    }

    pub fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeData::Text(text.to_string()))
    }

    /// Appends a text node to `parent` and returns it.
    pub fn append_text(&mut self, parent: NodeId, text: &str) -> NodeId {
        let node = self.create_text(text);
        self.append_child(parent, node);
        node
    }

    fn push(&mut self, data: NodeData) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            data,
            parent: None,
            children: Vec::new(),
        });
        id
    }

    pub fn append_child(&mut self, parent: NodeId, child: NodeId) {
        self.insert_before(parent, child, None);
    }

    /// Inserts `child` before `reference`, or appends when `reference` is
    /// `None` or not a child of `parent`.
    pub fn insert_before(&mut self, parent: NodeId, child: NodeId, reference: Option<NodeId>) {
        if !self.is_element(parent) || self.contains(child, parent) {
            return;
        }
        self.detach(child);
        let siblings = &mut self.nodes[parent.0].children;
        let position = reference
            .and_then(|reference| siblings.iter().position(|&c| c == reference))
            .unwrap_or(siblings.len());
        siblings.insert(position, child);
        self.nodes[child.0].parent = Some(parent);
        if self.is_connected(parent) {
            self.records.push(MutationRecord {
                target: parent,
                added: vec![child],
                removed: Vec::new(),
            });
        }
    }

    /// Detaches `node` (and its subtree) from its parent.
    pub fn remove(&mut self, node: NodeId) {
        self.detach(node);
    }

    fn detach(&mut self, node: NodeId) {
        let Some(parent) = self.nodes[node.0].parent else {
            return;
        };
        let connected = self.is_connected(parent);
        self.nodes[parent.0].children.retain(|&c| c != node);
        self.nodes[node.0].parent = None;
        if connected {
            self.records.push(MutationRecord {
                target: parent,
                added: Vec::new(),
                removed: vec![node],
            });
        }
    }

    /// Drains the mutation journal.
    pub fn take_records(&mut self) -> Vec<MutationRecord> {
        std::mem::take(&mut self.records)
    }

    pub fn exists(&self, node: NodeId) -> bool {
        node.0 < self.nodes.len()
    }

    pub fn is_connected(&self, node: NodeId) -> bool {
        if !self.exists(node) {
            return false;
        }
        self.ancestors_inclusive(node).last() == Some(self.root)
    }

    /// Inclusive: a node contains itself.
    pub fn contains(&self, ancestor: NodeId, node: NodeId) -> bool {
        self.exists(node) && self.ancestors_inclusive(node).any(|n| n == ancestor)
    }

    pub fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0).and_then(|n| n.parent)
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node.0)
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// `node`, its parent, its grandparent, up to the topmost ancestor.
    pub fn ancestors_inclusive(&self, node: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(node), move |&n| self.parent(n))
    }

    pub fn is_element(&self, node: NodeId) -> bool {
        matches!(
            self.nodes.get(node.0).map(|n| &n.data),
            Some(NodeData::Element { .. })
        )
    }

    pub fn tag(&self, node: NodeId) -> Option<&str> {
        match self.nodes.get(node.0).map(|n| &n.data) {
            Some(NodeData::Element { tag, .. }) => Some(tag.as_str()),
            _ => None,
        }
    }

    pub fn attribute(&self, node: NodeId, name: &str) -> Option<&str> {
        match self.nodes.get(node.0).map(|n| &n.data) {
            Some(NodeData::Element { attributes, .. }) => attributes
                .iter()
                .find(|(key, _)| key.eq_ignore_ascii_case(name))
                .map(|(_, value)| value.as_str()),
            _ => None,
        }
    }

    pub fn has_attribute(&self, node: NodeId, name: &str) -> bool {
        self.attribute(node, name).is_some()
    }

    pub fn set_attribute(&mut self, node: NodeId, name: &str, value: &str) {
        let Some(NodeData::Element { attributes, .. }) =
            self.nodes.get_mut(node.0).map(|n| &mut n.data)
        else {
            return;
        };
        let name = name.to_ascii_lowercase();
        match attributes.iter_mut().find(|(key, _)| *key == name) {
            Some(entry) => entry.1 = value.to_string(),
            None => attributes.push((name, value.to_string())),
        }
    }

    pub fn remove_attribute(&mut self, node: NodeId, name: &str) {
        if let Some(NodeData::Element { attributes, .. }) =
            self.nodes.get_mut(node.0).map(|n| &mut n.data)
        {
            attributes.retain(|(key, _)| !key.eq_ignore_ascii_case(name));
        }
    }

    /// Sets the attribute to an empty value when `on`, removes it otherwise.
    pub fn toggle_attribute(&mut self, node: NodeId, name: &str, on: bool) {
        if on {
            self.set_attribute(node, name, "");
        } else {
            self.remove_attribute(node, name);
        }
    }

    pub fn text_content(&self, node: NodeId) -> String {
        let mut out = String::new();
        self.collect_text(node, &mut out);
        out
    }

    fn collect_text(&self, node: NodeId, out: &mut String) {
        let Some(n) = self.nodes.get(node.0) else {
            return;
        };
        match &n.data {
            NodeData::Text(text) => out.push_str(text),
            NodeData::Element { .. } => {
                for &child in &n.children {
                    self.collect_text(child, out);
                }
            }
        }
    }

    /// Descendants of `node` in document order, excluding `node`.
    pub fn descendants(&self, node: NodeId) -> Vec<NodeId> {
        let mut out = Vec::new();
        let mut stack: Vec<NodeId> = self.children(node).iter().rev().copied().collect();
        while let Some(current) = stack.pop() {
            out.push(current);
            stack.extend(self.children(current).iter().rev().copied());
        }
        out
    }

    pub fn matches(&self, node: NodeId, selector: &Selector) -> bool {
        selector.matches(self, node)
    }

    /// Nearest inclusive ancestor matching `selector`.
    pub fn closest(&self, node: NodeId, selector: &Selector) -> Option<NodeId> {
        self.ancestors_inclusive(node)
            .find(|&n| selector.matches(self, n))
    }

    pub fn query_selector(&self, scope: NodeId, selector: &Selector) -> Option<NodeId> {
        self.descendants(scope)
            .into_iter()
            .find(|&n| selector.matches(self, n))
    }

    pub fn query_selector_all(&self, scope: NodeId, selector: &Selector) -> Vec<NodeId> {
        self.descendants(scope)
            .into_iter()
            .filter(|&n| selector.matches(self, n))
            .collect()
    }

    /// Position of every connected node in document order.
    pub fn document_order(&self) -> HashMap<NodeId, usize> {
        std::iter::once(self.root)
            .chain(self.descendants(self.root))
            .enumerate()
            .map(|(index, node)| (node, index))
            .collect()
    }

    /// Top edge of a connected element in the simplified layout: every
    /// element before it in document order takes one row.
    pub fn offset_top(&self, node: NodeId) -> Option<i64> {
        if !self.is_connected(node) || !self.is_element(node) {
            return None;
        }
        let rows = self
            .descendants(self.root)
            .into_iter()
            .take_while(|&n| n != node)
            .filter(|&n| self.is_element(n))
            .count();
        Some(rows as i64 * ROW_HEIGHT)
    }

    pub fn scroll_y(&self) -> i64 {
        self.scroll_y
    }

    /// Aligns the top of the viewport with `node`. Detached nodes are ignored.
    pub fn scroll_into_view(&mut self, node: NodeId) {
        if let Some(top) = self.offset_top(node) {
            self.scroll_y = top;
        }
    }

    pub fn scroll_by(&mut self, delta: i64) {
        self.scroll_y = (self.scroll_y + delta).max(0);
    }
}
