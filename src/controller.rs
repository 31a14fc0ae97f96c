//! The controller owns everything the augmentation layer knows about one
//! page: the item index, the watermark, the scroller, the injected controls
//! and the timers driving them. The host feeds it mutation batches, clicks and
//! elapsed time; nothing in here is global.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};

use crate::bridge::InsertionWatcher;
use crate::config::Config;
use crate::dom::{Document, MutationRecord, NodeId};
use crate::events::{Event, EventBus, Subscription};
use crate::identifier::OrderedIdentifier;
use crate::inject::ScrollButton;
use crate::item::{ItemError, ItemRecord, ATTR_DEBUG};
use crate::markup::Markup;
use crate::menu::{MenuAction, MenuHook};
use crate::registry::Registry;
use crate::scheduler::Scheduler;
use crate::scroll::{AutoScroller, ScrollCtx, ScrollState, StartOutcome, StopReason};
use crate::settings::Settings;
use crate::storage::KeyValueStore;
use crate::watermark::{self, Reevaluation, WatermarkStore};

/// Deferred work on the controller's clock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Task {
    FuseExpired,
    ItemSettled { run: u64, id: OrderedIdentifier },
    MenuSettled(NodeId),
}

/// Reasons the controller refuses to start. They reach the caller wrapped in
/// `anyhow::Error` and can be recovered with `downcast_ref`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum InitError {
    #[error("{location} is not a chronological timeline")]
    NotChronological { location: String },
    #[error("settings storage unavailable")]
    StorageUnavailable,
    #[error("invalid markup selector")]
    InvalidSelector,
}

/// What a click turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClickOutcome {
    MarkedRead(OrderedIdentifier),
    Scroll(StartOutcome),
    /// The more-options hook of an item was clicked.
    PopupActive(Option<OrderedIdentifier>),
    /// A click elsewhere inside an item cleared the popup-active item.
    PopupCleared,
    Ignored,
}

pub struct Controller {
    markup: Markup,
    registry: Registry,
    watermark: WatermarkStore,
    scroller: AutoScroller,
    scheduler: Scheduler<Task>,
    bus: EventBus,
    watcher: InsertionWatcher,
    menu: MenuHook,
    button: ScrollButton,
    debug: bool,
}

impl Controller {
    pub fn new(doc: &mut Document, cfg: &Config, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let markup = Markup::from_config(&cfg.markup).context(InitError::InvalidSelector)?;
        if !markup.is_chronological(doc) {
            bail!(InitError::NotChronological {
                location: doc.location().to_string(),
            });
        }

        let settings = Settings::open(store, cfg.storage.settings_key.clone())
            .context(InitError::StorageUnavailable)?;
        let watermark = WatermarkStore::load(settings).context(InitError::StorageUnavailable)?;

        let root = match doc.query_selector(doc.root(), &markup.observe_root) {
            Some(root) => root,
            None => {
                log::warn!(
                    "controller: {} not found, observing the whole body",
                    markup.observe_root
                );
                doc.body()
            }
        };
        let mut watcher = InsertionWatcher::new(root);
        watcher.observe();

        let menu = MenuHook::new(&markup, doc.root(), cfg.scroll.menu_settle_delay);
        let mut controller = Self {
            scroller: AutoScroller::new(&cfg.scroll),
            registry: Registry::new(),
            scheduler: Scheduler::new(),
            bus: EventBus::new(),
            button: ScrollButton::new(),
            debug: cfg.debug.enabled,
            markup,
            watermark,
            watcher,
            menu,
        };

        controller.menu.start(doc, &mut controller.scheduler);
        controller.button.ensure(doc, &controller.markup);
        for item in doc.query_selector_all(root, &controller.markup.item_root) {
            controller.handle_item(doc, item);
        }
        log::debug!(
            "controller: started with {} existing item(s)",
            controller.registry.len()
        );
        Ok(controller)
    }

    /// Handles one mutation batch. Removed items leave the index right away;
    /// inserted nodes are resolved to item roots and processed in order.
    pub fn on_mutations(&mut self, doc: &mut Document, records: &[MutationRecord]) {
        if !self.watcher.is_observing() || records.is_empty() {
            return;
        }

        if !self.watcher.removed(records).is_empty() {
            self.drop_detached(doc);
        }

        let inserted = self.watcher.inserted(doc, records);
        if !inserted.is_empty() {
            self.button.ensure(doc, &self.markup);
        }
        for node in inserted {
            if !self.watcher.is_observing() {
                break;
            }
            for item in self.markup.find_item_roots(doc, node) {
                self.handle_item(doc, item);
            }
        }

        self.menu.on_mutations(doc, records, &mut self.scheduler);
        self.scroller.pump(&mut self.scheduler);
    }

    fn handle_item(&mut self, doc: &mut Document, element: NodeId) {
        if !self.registry.mark_handled(element) {
            return;
        }
        if self.debug {
            doc.set_attribute(element, ATTR_DEBUG, "");
        }
        let id = match self.markup.extract_identifier(doc, element) {
            Ok(id) => id,
            Err(err) => {
                log::error!("{err}");
                return;
            }
        };
        let kind = self.markup.classify(doc, element);
        let record = ItemRecord::new(element, id.clone(), kind);
        record.project(doc);
        self.registry.insert(record);
        log::debug!("item {}: {}", id.numeral(), kind);

        watermark::evaluate(
            &mut self.registry,
            doc,
            &id,
            self.watermark.get(),
            false,
        );

        self.bus.publish(Event::NewItem {
            id: id.clone(),
            element,
            kind,
        });

        match self.markup.more_options(doc, element) {
            Some(hook) => self.registry.register_affordance(hook, id),
            None => log::error!("{}", ItemError::AffordanceNotFound { id }),
        }
    }

    fn drop_detached(&mut self, doc: &Document) {
        let gone: Vec<OrderedIdentifier> = self
            .registry
            .iter()
            .filter(|record| !record.has_element(doc))
            .map(|record| record.identifier.clone())
            .collect();
        for id in gone {
            log::debug!("item {}: element removed", id.numeral());
            self.registry.remove(&id);
        }
        self.registry.prune_handled(doc);
        self.menu.prune(doc);
    }

    /// Runs every task due within `elapsed`, feeding the mutations each task
    /// causes back through [`on_mutations`](Self::on_mutations).
    pub fn advance(&mut self, doc: &mut Document, elapsed: Duration) {
        let until = self.scheduler.now() + elapsed;
        loop {
            self.scroller.pump(&mut self.scheduler);
            let Some((_, task)) = self.scheduler.pop_due(until) else {
                break;
            };
            self.run_task(doc, task);
            let records = doc.take_records();
            self.on_mutations(doc, &records);
        }
        self.scheduler.settle(until);
    }

    fn run_task(&mut self, doc: &mut Document, task: Task) {
        if let Task::MenuSettled(menu) = task {
            let active = self
                .registry
                .popup_active()
                .and_then(|id| self.registry.get(id));
            self.menu.on_settled(doc, menu, active);
            return;
        }
        let ctx = ScrollCtx {
            doc,
            registry: &self.registry,
            scheduler: &mut self.scheduler,
            bus: &mut self.bus,
        };
        match task {
            Task::FuseExpired => self.scroller.on_fuse(ctx),
            Task::ItemSettled { run, id } => self.scroller.on_settled(ctx, run, &id),
            Task::MenuSettled(_) => {}
        }
    }

    /// Routes a click on `target`: injected menu entry, scroll button, an
    /// item's more-options hook, or anywhere else inside an item.
    pub fn click(&mut self, doc: &mut Document, target: NodeId) -> Result<ClickOutcome> {
        if let Some(MenuAction::MarkAsRead(id)) = self.menu.action_for(doc, target).cloned() {
            self.set_last_read_id(doc, id.clone())?;
            return Ok(ClickOutcome::MarkedRead(id));
        }

        if self.button.is_hit(doc, target) {
            return Ok(ClickOutcome::Scroll(self.start_scroll(doc)));
        }

        let owner = doc
            .ancestors_inclusive(target)
            .find_map(|node| self.registry.affordance_owner(node))
            .cloned();
        if let Some(id) = owner {
            let active = self
                .registry
                .get(&id)
                .filter(|record| record.kind.is_normal())
                .map(|record| record.identifier.clone());
            log::debug!("controller: popup opened for {}", id.numeral());
            self.registry.set_popup_active(active.clone());
            return Ok(ClickOutcome::PopupActive(active));
        }

        let in_item = doc
            .closest(target, &self.markup.item_root)
            .is_some_and(|item| self.registry.is_handled(item));
        if in_item {
            self.registry.set_popup_active(None);
            return Ok(ClickOutcome::PopupCleared);
        }
        Ok(ClickOutcome::Ignored)
    }

    /// Moves the watermark and re-checks every tracked item against it.
    pub fn set_last_read_id(
        &mut self,
        doc: &mut Document,
        id: OrderedIdentifier,
    ) -> Result<Reevaluation> {
        self.watermark.set(id.clone())?;
        let outcome = watermark::reevaluate(&mut self.registry, doc, &id);
        log::debug!(
            "controller: last read {} ({} checked, {} dropped)",
            id.numeral(),
            outcome.checked,
            outcome.removed.len()
        );
        Ok(outcome)
    }

    pub fn last_read_id(&self) -> Option<&OrderedIdentifier> {
        self.watermark.get()
    }

    pub fn popup_active_item(&self) -> Option<&ItemRecord> {
        self.registry
            .popup_active()
            .and_then(|id| self.registry.get(id))
    }

    pub fn item(&self, id: &OrderedIdentifier) -> Option<&ItemRecord> {
        self.registry.get(id)
    }

    pub fn items(&self) -> impl Iterator<Item = &ItemRecord> + '_ {
        self.registry.iter()
    }

    pub fn scroll_button(&self) -> Option<NodeId> {
        self.button.element()
    }

    pub fn start_scroll(&mut self, doc: &mut Document) -> StartOutcome {
        let ctx = ScrollCtx {
            doc,
            registry: &self.registry,
            scheduler: &mut self.scheduler,
            bus: &mut self.bus,
        };
        self.scroller.start(ctx)
    }

    pub fn stop_scroll(&mut self, doc: &mut Document) {
        let ctx = ScrollCtx {
            doc,
            registry: &self.registry,
            scheduler: &mut self.scheduler,
            bus: &mut self.bus,
        };
        self.scroller.stop(ctx, StopReason::Cancelled);
    }

    pub fn scroll_state(&self) -> &ScrollState {
        self.scroller.state()
    }

    pub fn subscribe(&mut self) -> Subscription {
        self.bus.subscribe()
    }

    pub fn now(&self) -> Duration {
        self.scheduler.now()
    }

    /// Stops the scroller and all observation. Nothing fires afterwards.
    pub fn shutdown(&mut self, doc: &mut Document) {
        self.stop_scroll(doc);
        self.watcher.disconnect();
        self.menu.disconnect(&mut self.scheduler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::item::{ItemKind, ATTR_HANDLED, ATTR_READ};
    use crate::storage::MemoryStore;

    fn page() -> (Document, NodeId) {
        let mut doc = Document::with_location("/home");
        let root = doc.element("div", &[("id", "react-root")]);
        let header = doc.element("div", &[]);
        let heading = doc.element("h2", &[("role", "heading")]);
        doc.append_text(heading, "Following");
        let tools = doc.element("div", &[]);
        let sparkle = doc.element("div", &[("role", "button")]);
        doc.append_child(tools, sparkle);
        doc.append_child(header, heading);
        doc.append_child(header, tools);
        doc.append_child(root, header);
        let timeline = doc.element("section", &[]);
        doc.append_child(root, timeline);
        doc.append_child(doc.body(), root);
        doc.take_records();
        (doc, timeline)
    }

    fn article(doc: &mut Document, parent: NodeId, id: u64, marker: Option<&str>) -> NodeId {
        let item = doc.element("article", &[]);
        if let Some(text) = marker {
            let link = doc.element("a", &[("href", "/someone")]);
            let span = doc.element("span", &[]);
            doc.append_text(span, text);
            doc.append_child(link, span);
            doc.append_child(item, link);
        }
        let link = doc.element("a", &[("href", &format!("/ada/status/{id}"))]);
        let time = doc.element("time", &[]);
        doc.append_child(link, time);
        doc.append_child(item, link);
        let more = doc.element(
            "div",
            &[("role", "button"), ("aria-haspopup", "true"), ("aria-label", "More")],
        );
        doc.append_child(item, more);
        doc.append_child(parent, item);
        item
    }

    fn controller(doc: &mut Document) -> Controller {
        Controller::new(doc, &Config::default(), Arc::new(MemoryStore::new())).unwrap()
    }

    fn feed(controller: &mut Controller, doc: &mut Document) {
        let records = doc.take_records();
        controller.on_mutations(doc, &records);
    }

    #[test]
    fn refuses_non_chronological_views() {
        let mut doc = Document::with_location("/notifications");
        let err = Controller::new(&mut doc, &Config::default(), Arc::new(MemoryStore::new()))
            .err()
            .unwrap();
        assert!(matches!(
            err.downcast_ref::<InitError>(),
            Some(InitError::NotChronological { .. })
        ));
    }

    #[test]
    fn processes_existing_and_inserted_items() {
        let (mut doc, timeline) = page();
        article(&mut doc, timeline, 10, None);
        doc.take_records();
        let mut ctl = controller(&mut doc);
        let events = ctl.subscribe();
        assert_eq!(ctl.items().count(), 1);
        assert!(ctl.scroll_button().is_some());

        let element = article(&mut doc, timeline, 11, None);
        feed(&mut ctl, &mut doc);
        assert_eq!(ctl.items().count(), 2);
        assert!(doc.has_attribute(element, ATTR_HANDLED));
        assert_eq!(
            events.drain(),
            vec![Event::NewItem {
                id: OrderedIdentifier::from(11),
                element,
                kind: ItemKind::Normal,
            }]
        );
    }

    #[test]
    fn debug_mode_tags_handled_items() {
        let (mut doc, timeline) = page();
        let plain = article(&mut doc, timeline, 1, None);
        doc.take_records();
        let _quiet = controller(&mut doc);
        assert!(!doc.has_attribute(plain, ATTR_DEBUG));

        let (mut doc, timeline) = page();
        let mut cfg = Config::default();
        cfg.debug.enabled = true;
        let mut ctl = Controller::new(&mut doc, &cfg, Arc::new(MemoryStore::new())).unwrap();
        let broken = doc.element("article", &[]);
        doc.append_child(timeline, broken);
        let tagged = article(&mut doc, timeline, 2, None);
        feed(&mut ctl, &mut doc);
        assert!(doc.has_attribute(tagged, ATTR_DEBUG));
        assert!(doc.has_attribute(broken, ATTR_DEBUG));
    }

    #[test]
    fn bad_item_does_not_stop_the_batch() {
        let (mut doc, timeline) = page();
        let mut ctl = controller(&mut doc);
        let broken = doc.element("article", &[]);
        doc.append_child(timeline, broken);
        article(&mut doc, timeline, 5, None);
        feed(&mut ctl, &mut doc);
        assert_eq!(ctl.items().count(), 1);
    }

    #[test]
    fn marking_read_reevaluates_everything() {
        let (mut doc, timeline) = page();
        let mut ctl = controller(&mut doc);
        let elements: Vec<NodeId> = [10, 11, 12]
            .iter()
            .map(|&id| article(&mut doc, timeline, id, None))
            .collect();
        feed(&mut ctl, &mut doc);
        assert!(elements.iter().all(|&e| !doc.has_attribute(e, ATTR_READ)));

        ctl.set_last_read_id(&mut doc, OrderedIdentifier::from(11)).unwrap();
        assert_eq!(ctl.last_read_id().unwrap().as_str(), "000000000000000000000011");
        assert!(doc.has_attribute(elements[0], ATTR_READ));
        assert!(doc.has_attribute(elements[1], ATTR_READ));
        assert!(!doc.has_attribute(elements[2], ATTR_READ));
    }

    #[test]
    fn popup_tracking_follows_clicks() {
        let (mut doc, timeline) = page();
        let mut ctl = controller(&mut doc);
        let normal = article(&mut doc, timeline, 20, None);
        let promoted = article(&mut doc, timeline, 21, Some("Promoted"));
        feed(&mut ctl, &mut doc);

        let more = doc.children(normal)[1];
        assert_eq!(
            ctl.click(&mut doc, more).unwrap(),
            ClickOutcome::PopupActive(Some(OrderedIdentifier::from(20)))
        );
        assert_eq!(
            ctl.popup_active_item().map(|r| r.identifier.numeral()),
            Some("20")
        );

        let time = doc.children(normal)[0];
        assert_eq!(ctl.click(&mut doc, time).unwrap(), ClickOutcome::PopupCleared);
        assert!(ctl.popup_active_item().is_none());

        ctl.click(&mut doc, more).unwrap();
        let promoted_more = doc.children(promoted)[2];
        assert_eq!(
            ctl.click(&mut doc, promoted_more).unwrap(),
            ClickOutcome::PopupActive(None)
        );
        assert!(ctl.popup_active_item().is_none());
    }

    #[test]
    fn removed_items_leave_the_index() {
        let (mut doc, timeline) = page();
        let mut ctl = controller(&mut doc);
        let element = article(&mut doc, timeline, 30, None);
        feed(&mut ctl, &mut doc);
        doc.remove(element);
        feed(&mut ctl, &mut doc);
        assert!(ctl.item(&OrderedIdentifier::from(30)).is_none());
    }

    #[test]
    fn reattached_item_is_tracked_again() {
        let (mut doc, timeline) = page();
        let mut ctl = controller(&mut doc);
        let element = article(&mut doc, timeline, 10, None);
        feed(&mut ctl, &mut doc);
        doc.remove(element);
        feed(&mut ctl, &mut doc);
        assert!(ctl.item(&OrderedIdentifier::from(10)).is_none());

        doc.append_child(timeline, element);
        feed(&mut ctl, &mut doc);
        ctl.set_last_read_id(&mut doc, OrderedIdentifier::from(50)).unwrap();
        assert!(ctl.item(&OrderedIdentifier::from(10)).is_some_and(|r| r.is_read));
        assert!(doc.has_attribute(element, ATTR_READ));
    }

    fn open_menu(doc: &mut Document) -> NodeId {
        let menu = doc.element("div", &[("role", "menu")]);
        for label in ["Follow", "Mute"] {
            let entry = doc.element("div", &[("role", "menuitem")]);
            doc.append_text(entry, label);
            doc.append_child(menu, entry);
        }
        doc.append_child(doc.body(), menu);
        menu
    }

    #[test]
    fn shutdown_silences_everything() {
        let (mut doc, timeline) = page();
        let mut ctl = controller(&mut doc);
        let item = article(&mut doc, timeline, 39, None);
        feed(&mut ctl, &mut doc);
        let more = doc.children(item)[1];
        ctl.click(&mut doc, more).unwrap();
        let menu = open_menu(&mut doc);
        feed(&mut ctl, &mut doc);

        ctl.shutdown(&mut doc);
        article(&mut doc, timeline, 40, None);
        feed(&mut ctl, &mut doc);
        ctl.advance(&mut doc, Duration::from_secs(5));
        assert_eq!(ctl.items().count(), 1);
        assert!(doc
            .descendants(menu)
            .iter()
            .all(|&node| !doc.has_attribute(node, crate::menu::ATTR_MENU_ITEM)));
    }

    #[test]
    fn menu_entry_injected_while_running() {
        let (mut doc, timeline) = page();
        let mut ctl = controller(&mut doc);
        let item = article(&mut doc, timeline, 39, None);
        feed(&mut ctl, &mut doc);
        let more = doc.children(item)[1];
        ctl.click(&mut doc, more).unwrap();
        let menu = open_menu(&mut doc);
        feed(&mut ctl, &mut doc);
        ctl.advance(&mut doc, Duration::from_millis(100));
        assert!(doc
            .descendants(menu)
            .iter()
            .any(|&node| doc.has_attribute(node, crate::menu::ATTR_MENU_ITEM)));
    }
}
