//! Turns raw childList batches into the nodes the pipeline cares about.

use std::collections::HashSet;

use crate::dom::{Document, MutationRecord, NodeId};
use crate::selector::Selector;

/// Reports every node attached under `root`, including each descendant of an
/// inserted subtree.
#[derive(Debug, Clone)]
pub struct InsertionWatcher {
    root: NodeId,
    observing: bool,
}

impl InsertionWatcher {
    pub fn new(root: NodeId) -> Self {
        Self {
            root,
            observing: false,
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn observe(&mut self) {
        self.observing = true;
    }

    /// One-shot stop. Callers check [`is_observing`](Self::is_observing)
    /// before handling each node, so a stop inside a batch silences the rest.
    pub fn disconnect(&mut self) {
        self.observing = false;
    }

    pub fn is_observing(&self) -> bool {
        self.observing
    }

    /// Added nodes and their descendants in preorder, limited to nodes still
    /// attached under the root. A node is reported once per batch.
    pub fn inserted(&self, doc: &Document, records: &[MutationRecord]) -> Vec<NodeId> {
        if !self.observing {
            return Vec::new();
        }
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for record in records {
            for &added in &record.added {
                for node in std::iter::once(added).chain(doc.descendants(added)) {
                    if doc.is_connected(node) && doc.contains(self.root, node) && seen.insert(node) {
                        out.push(node);
                    }
                }
            }
        }
        out
    }

    /// Subtrees detached in this batch.
    pub fn removed(&self, records: &[MutationRecord]) -> Vec<NodeId> {
        if !self.observing {
            return Vec::new();
        }
        records
            .iter()
            .flat_map(|record| record.removed.iter().copied())
            .collect()
    }
}

/// Fires for elements matching a selector: the ones present at construction,
/// then per batch whatever an insertion brings into play.
#[derive(Debug, Clone)]
pub struct SelectorMatchWaiter {
    selector: Selector,
    watcher: InsertionWatcher,
}

impl SelectorMatchWaiter {
    pub fn new(selector: Selector, root: NodeId) -> Self {
        let mut watcher = InsertionWatcher::new(root);
        watcher.observe();
        Self { selector, watcher }
    }

    pub fn selector(&self) -> &Selector {
        &self.selector
    }

    pub fn is_connected(&self) -> bool {
        self.watcher.is_observing()
    }

    pub fn disconnect(&mut self) {
        self.watcher.disconnect();
    }

    pub fn initial_matches(&self, doc: &Document) -> Vec<NodeId> {
        if !self.is_connected() {
            return Vec::new();
        }
        let root = self.watcher.root();
        let mut matches = Vec::new();
        if doc.matches(root, &self.selector) {
            matches.push(root);
        }
        matches.extend(doc.query_selector_all(root, &self.selector));
        matches
    }

    /// For each top-level inserted node: the node itself, else its closest
    /// matching ancestor, else its matching descendants. Each element appears
    /// at most once per batch.
    pub fn matches_for(&self, doc: &Document, records: &[MutationRecord]) -> Vec<NodeId> {
        if !self.is_connected() {
            return Vec::new();
        }
        let root = self.watcher.root();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let added = records.iter().flat_map(|record| record.added.iter().copied());
        for node in added {
            if !doc.is_connected(node) || !doc.contains(root, node) {
                continue;
            }
            let found = match doc.closest(node, &self.selector) {
                Some(hit) => vec![hit],
                None => doc.query_selector_all(node, &self.selector),
            };
            for hit in found {
                if seen.insert(hit) {
                    out.push(hit);
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sel(raw: &str) -> Selector {
        Selector::parse(raw).unwrap()
    }

    #[test]
    fn reports_whole_inserted_subtree() {
        let mut doc = Document::new();
        let root = doc.element("main", &[]);
        doc.append_child(doc.body(), root);
        doc.take_records();

        let mut watcher = InsertionWatcher::new(root);
        watcher.observe();

        let article = doc.element("article", &[]);
        let time = doc.element("time", &[]);
        doc.append_child(article, time);
        doc.append_child(root, article);
        let outside = doc.element("aside", &[]);
        doc.append_child(doc.body(), outside);

        let records = doc.take_records();
        assert_eq!(watcher.inserted(&doc, &records), vec![article, time]);
    }

    #[test]
    fn disconnect_is_idempotent_and_silences() {
        let mut doc = Document::new();
        let mut watcher = InsertionWatcher::new(doc.body());
        watcher.observe();
        watcher.disconnect();
        watcher.disconnect();
        let node = doc.element("div", &[]);
        doc.append_child(doc.body(), node);
        let records = doc.take_records();
        assert!(watcher.inserted(&doc, &records).is_empty());
    }

    #[test]
    fn removed_lists_detached_subtrees() {
        let mut doc = Document::new();
        let node = doc.element("article", &[]);
        doc.append_child(doc.body(), node);
        doc.take_records();
        let mut watcher = InsertionWatcher::new(doc.body());
        watcher.observe();
        doc.remove(node);
        assert_eq!(watcher.removed(&doc.take_records()), vec![node]);
    }

    #[test]
    fn waiter_reports_existing_matches() {
        let mut doc = Document::new();
        let menu = doc.element("div", &[("role", "menu")]);
        doc.append_child(doc.body(), menu);
        let waiter = SelectorMatchWaiter::new(sel(r#"[role="menu"]"#), doc.root());
        assert_eq!(waiter.initial_matches(&doc), vec![menu]);
    }

    #[test]
    fn waiter_matches_self_ancestor_and_descendants() {
        let mut doc = Document::new();
        let menu = doc.element("div", &[("role", "menu")]);
        doc.append_child(doc.body(), menu);
        doc.take_records();
        let waiter = SelectorMatchWaiter::new(sel(r#"[role="menu"]"#), doc.root());

        // Inside an existing match: reported via the ancestor, once per batch.
        let first = doc.element("div", &[]);
        let second = doc.element("div", &[]);
        doc.append_child(menu, first);
        doc.append_child(menu, second);
        let records = doc.take_records();
        assert_eq!(waiter.matches_for(&doc, &records), vec![menu]);

        // Wrapper with two matches below it.
        let wrapper = doc.element("section", &[]);
        let a = doc.element("div", &[("role", "menu")]);
        let b = doc.element("div", &[("role", "menu")]);
        doc.append_child(wrapper, a);
        doc.append_child(wrapper, b);
        doc.append_child(doc.body(), wrapper);
        let records = doc.take_records();
        assert_eq!(waiter.matches_for(&doc, &records), vec![a, b]);

        // A later batch may report the same element again.
        let third = doc.element("div", &[]);
        doc.append_child(menu, third);
        let records = doc.take_records();
        assert_eq!(waiter.matches_for(&doc, &records), vec![menu]);
    }

    #[test]
    fn disconnected_waiter_stays_silent() {
        let mut doc = Document::new();
        let mut waiter = SelectorMatchWaiter::new(sel("article"), doc.root());
        waiter.disconnect();
        let node = doc.element("article", &[]);
        doc.append_child(doc.body(), node);
        assert!(waiter.initial_matches(&doc).is_empty());
        let records = doc.take_records();
        assert!(waiter.matches_for(&doc, &records).is_empty());
    }
}
