use std::collections::{HashMap, HashSet};

use crate::dom::{Document, NodeId};
use crate::identifier::OrderedIdentifier;
use crate::item::ItemRecord;

/// Transient index of the items currently rendered on the page.
#[derive(Debug, Default)]
pub struct Registry {
    records: HashMap<OrderedIdentifier, ItemRecord>,
    /// Identifiers in the order they were first assigned.
    order: Vec<OrderedIdentifier>,
    handled: HashSet<NodeId>,
    affordances: HashMap<NodeId, OrderedIdentifier>,
    popup_active: Option<OrderedIdentifier>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the per-element guard. Returns false when it was already set.
    pub fn mark_handled(&mut self, element: NodeId) -> bool {
        self.handled.insert(element)
    }

    pub fn is_handled(&self, element: NodeId) -> bool {
        self.handled.contains(&element)
    }

    /// Drops the guard of every element no longer on the page, so a
    /// re-attached element is processed again.
    pub fn prune_handled(&mut self, doc: &Document) {
        self.handled.retain(|&element| doc.is_connected(element));
    }

    /// Stores a record. A re-rendered item (same identifier, new element)
    /// replaces the old record but keeps its place in the order.
    pub fn insert(&mut self, record: ItemRecord) {
        let id = record.identifier.clone();
        let element = record.element;
        match self.records.insert(id.clone(), record) {
            Some(previous) if previous.element != element => {
                // Hooks of the old element are gone with it; the caller
                // registers the new element's hook after inserting.
                self.affordances.retain(|_, owner| owner != &id);
            }
            Some(_) => {}
            None => self.order.push(id),
        }
    }

    pub fn remove(&mut self, id: &OrderedIdentifier) -> Option<ItemRecord> {
        let record = self.records.remove(id)?;
        self.order.retain(|other| other != id);
        self.handled.remove(&record.element);
        self.affordances.retain(|_, owner| owner != id);
        if self.popup_active.as_ref() == Some(id) {
            self.popup_active = None;
        }
        Some(record)
    }

    pub fn get(&self, id: &OrderedIdentifier) -> Option<&ItemRecord> {
        self.records.get(id)
    }

    pub fn get_mut(&mut self, id: &OrderedIdentifier) -> Option<&mut ItemRecord> {
        self.records.get_mut(id)
    }

    pub fn position(&self, id: &OrderedIdentifier) -> Option<usize> {
        self.order.iter().position(|other| other == id)
    }

    pub fn order(&self) -> &[OrderedIdentifier] {
        &self.order
    }

    /// Owned copy of the order, safe to iterate while mutating the index.
    pub fn snapshot(&self) -> Vec<OrderedIdentifier> {
        self.order.clone()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ItemRecord> + '_ {
        self.order.iter().filter_map(|id| self.records.get(id))
    }

    /// Connected records sorted by their element's position in the page.
    pub fn rendered(&self, doc: &Document) -> Vec<&ItemRecord> {
        let positions = doc.document_order();
        let mut rendered: Vec<(usize, &ItemRecord)> = self
            .iter()
            .filter_map(|record| positions.get(&record.element).map(|&pos| (pos, record)))
            .collect();
        rendered.sort_by_key(|(pos, _)| *pos);
        rendered.into_iter().map(|(_, record)| record).collect()
    }

    pub fn register_affordance(&mut self, hook: NodeId, id: OrderedIdentifier) {
        self.affordances.insert(hook, id);
    }

    pub fn affordance_owner(&self, hook: NodeId) -> Option<&OrderedIdentifier> {
        self.affordances.get(&hook)
    }

    pub fn popup_active(&self) -> Option<&OrderedIdentifier> {
        self.popup_active.as_ref()
    }

    pub fn set_popup_active(&mut self, id: Option<OrderedIdentifier>) {
        self.popup_active = id;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::ItemKind;

    fn record(doc: &mut Document, id: u64) -> ItemRecord {
        let element = doc.create_element("article");
        doc.append_child(doc.body(), element);
        ItemRecord::new(element, OrderedIdentifier::from(id), ItemKind::Normal)
    }

    #[test]
    fn keeps_assignment_order() {
        let mut doc = Document::new();
        let mut registry = Registry::new();
        for id in [12, 10, 11] {
            let rec = record(&mut doc, id);
            registry.insert(rec);
        }
        let order: Vec<&str> = registry.order().iter().map(|id| id.numeral()).collect();
        assert_eq!(order, vec!["12", "10", "11"]);
        assert_eq!(registry.position(&OrderedIdentifier::from(11)), Some(2));
    }

    #[test]
    fn rerendered_item_replaces_record() {
        let mut doc = Document::new();
        let mut registry = Registry::new();
        let first = record(&mut doc, 7);
        let old_element = first.element;
        registry.insert(first);
        registry.register_affordance(old_element, OrderedIdentifier::from(7));
        let second = record(&mut doc, 7);
        let new_element = second.element;
        registry.insert(second);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.order().len(), 1);
        assert_eq!(registry.get(&OrderedIdentifier::from(7)).unwrap().element, new_element);
        assert_eq!(registry.affordance_owner(old_element), None);
    }

    #[test]
    fn remove_clears_related_state() {
        let mut doc = Document::new();
        let mut registry = Registry::new();
        let rec = record(&mut doc, 3);
        let element = rec.element;
        registry.mark_handled(element);
        registry.insert(rec);
        let id = OrderedIdentifier::from(3);
        registry.register_affordance(element, id.clone());
        registry.set_popup_active(Some(id.clone()));

        assert!(registry.remove(&id).is_some());
        assert!(registry.is_empty());
        assert_eq!(registry.affordance_owner(element), None);
        assert_eq!(registry.popup_active(), None);
        assert!(!registry.is_handled(element));
        assert!(registry.remove(&id).is_none());
    }

    #[test]
    fn rendered_follows_document_order() {
        let mut doc = Document::new();
        let mut registry = Registry::new();
        let late = record(&mut doc, 20);
        let early = doc.create_element("article");
        doc.insert_before(doc.body(), early, Some(late.element));
        registry.insert(late);
        registry.insert(ItemRecord::new(early, OrderedIdentifier::from(5), ItemKind::Normal));
        let detached = doc.create_element("article");
        registry.insert(ItemRecord::new(detached, OrderedIdentifier::from(1), ItemKind::Normal));

        let ids: Vec<&str> = registry
            .rendered(&doc)
            .iter()
            .map(|rec| rec.identifier.numeral())
            .collect();
        assert_eq!(ids, vec!["5", "20"]);
    }

    #[test]
    fn handled_guard_is_per_element() {
        let mut doc = Document::new();
        let mut registry = Registry::new();
        let element = doc.create_element("article");
        assert!(registry.mark_handled(element));
        assert!(!registry.mark_handled(element));
        assert!(registry.is_handled(element));
    }

    #[test]
    fn prune_forgets_detached_elements() {
        let mut doc = Document::new();
        let mut registry = Registry::new();
        let kept = doc.create_element("article");
        doc.append_child(doc.body(), kept);
        let gone = doc.create_element("article");
        doc.append_child(doc.body(), gone);
        registry.mark_handled(kept);
        registry.mark_handled(gone);

        doc.remove(gone);
        registry.prune_handled(&doc);
        assert!(registry.is_handled(kept));
        assert!(!registry.is_handled(gone));
    }
}
