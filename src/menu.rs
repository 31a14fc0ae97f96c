use std::collections::{HashMap, HashSet};
use std::time::Duration;

use crate::bridge::SelectorMatchWaiter;
use crate::controller::Task;
use crate::dom::{Document, MutationRecord, NodeId};
use crate::identifier::OrderedIdentifier;
use crate::item::ItemRecord;
use crate::markup::Markup;
use crate::scheduler::{Scheduler, TimerId};
use crate::selector::Selector;

pub const ATTR_MENU_HANDLED: &str = "data-tmlr-handled";
pub const ATTR_MENU_ITEM: &str = "data-tmlr-menuitem";
pub const MARK_AS_READ: &str = "Mark as Read";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuAction {
    MarkAsRead(OrderedIdentifier),
}

/// Watches for the item context menu and adds "Mark as Read" to it.
///
/// The host renders the menu in two quick passes, so every sighting is
/// handled only after a short settle delay.
#[derive(Debug)]
pub struct MenuHook {
    waiter: SelectorMatchWaiter,
    menu_item: Selector,
    settle_delay: Duration,
    handled: HashSet<NodeId>,
    injected: HashMap<NodeId, MenuAction>,
    timers: Vec<TimerId>,
}

impl MenuHook {
    pub fn new(markup: &Markup, root: NodeId, settle_delay: Duration) -> Self {
        Self {
            waiter: SelectorMatchWaiter::new(markup.menu.clone(), root),
            menu_item: markup.menu_item.clone(),
            settle_delay,
            handled: HashSet::new(),
            injected: HashMap::new(),
            timers: Vec::new(),
        }
    }

    /// Queues menus that were already open when the hook was installed.
    pub fn start(&mut self, doc: &Document, scheduler: &mut Scheduler<Task>) {
        for menu in self.waiter.initial_matches(doc) {
            self.schedule(menu, scheduler);
        }
    }

    pub fn on_mutations(
        &mut self,
        doc: &Document,
        records: &[MutationRecord],
        scheduler: &mut Scheduler<Task>,
    ) {
        for menu in self.waiter.matches_for(doc, records) {
            if !self.handled.contains(&menu) {
                self.schedule(menu, scheduler);
            }
        }
    }

    fn schedule(&mut self, menu: NodeId, scheduler: &mut Scheduler<Task>) {
        self.timers.retain(|&id| scheduler.is_pending(id));
        let id = scheduler.schedule(self.settle_delay, Task::MenuSettled(menu));
        self.timers.push(id);
    }

    /// Forgets menus and injected entries that left the page.
    pub fn prune(&mut self, doc: &Document) {
        self.handled.retain(|&menu| doc.is_connected(menu));
        self.injected.retain(|&entry, _| doc.is_connected(entry));
    }

    /// Injects the action into a settled menu. `active` is the item the menu
    /// was opened for. Returns the injected menu item, if any.
    pub fn on_settled(
        &mut self,
        doc: &mut Document,
        menu: NodeId,
        active: Option<&ItemRecord>,
    ) -> Option<NodeId> {
        if self.handled.contains(&menu) || !doc.is_connected(menu) {
            return None;
        }
        let items = doc.query_selector_all(menu, &self.menu_item);
        if items.len() < 2 {
            log::debug!("menu: {:?} not ready ({} item(s))", menu, items.len());
            return None;
        }
        self.handled.insert(menu);
        doc.set_attribute(menu, ATTR_MENU_HANDLED, "");

        let container = doc.parent(items[0])?;
        let Some(active) = active else {
            log::error!("menu: no active item to mark as read");
            return None;
        };
        if !active.kind.is_normal() {
            return None;
        }
        self.add_item(
            doc,
            container,
            MARK_AS_READ,
            MenuAction::MarkAsRead(active.identifier.clone()),
        )
    }

    fn add_item(
        &mut self,
        doc: &mut Document,
        container: NodeId,
        label: &str,
        action: MenuAction,
    ) -> Option<NodeId> {
        let exists = doc.children(container).iter().any(|&child| {
            doc.attribute(child, "role") == Some("menuitem")
                && doc.attribute(child, ATTR_MENU_ITEM) == Some(label)
        });
        if exists {
            return None;
        }
        let wrapper = doc.element("div", &[("role", "menuitem"), (ATTR_MENU_ITEM, label)]);
        let span = doc.create_element("span");
        doc.append_text(span, label);
        doc.append_child(wrapper, span);
        doc.append_child(container, wrapper);
        log::debug!("menu: added {:?} to {:?}", label, container);
        self.injected.insert(wrapper, action);
        Some(wrapper)
    }

    /// The action behind a click on `target`, if it landed on an injected item.
    pub fn action_for(&self, doc: &Document, target: NodeId) -> Option<&MenuAction> {
        doc.ancestors_inclusive(target)
            .find_map(|node| self.injected.get(&node))
            .filter(|_| doc.is_connected(target))
    }

    /// Stops watching and cancels every pending settle.
    pub fn disconnect(&mut self, scheduler: &mut Scheduler<Task>) {
        self.waiter.disconnect();
        for id in self.timers.drain(..) {
            scheduler.cancel(id);
        }
    }
}
