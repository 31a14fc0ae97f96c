//! Scripted timelines.
//!
//! [`PageBuilder`] renders a page shaped like the real timeline (header with
//! the view heading, a timeline section, item markup, the context menu).
//! [`Scenario`] replays a YAML script against a [`Runtime`] hosting that page
//! and acts as the host: it renders the next page of the feed whenever the
//! viewport gets close to the last rendered item.
//!
//! ```yaml
//! location: /home
//! last_read: 11
//! page_size: 3
//! feed:
//!   - id: 12
//!   - id: 11
//!   - { id: 10, kind: promoted }
//! steps:
//!   - do: open_menu
//!     id: 12
//!   - do: mark_read
//!   - do: scroll
//!   - do: advance
//!     by: 3s
//! ```

use std::collections::{HashMap, VecDeque};
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::app::Runtime;
use crate::config::Config;
use crate::controller::ClickOutcome;
use crate::dom::{Document, NodeId};
use crate::events::{Event, Subscription};
use crate::identifier::OrderedIdentifier;
use crate::menu::ATTR_MENU_ITEM;
use crate::scroll::{ScrollState, StopReason};
use crate::settings::Settings;
use crate::storage::KeyValueStore;

/// Rows the simulated viewport shows below its top edge.
const VIEWPORT: i64 = 600;
const TICK: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedKind {
    #[default]
    Normal,
    Reshare,
    Promoted,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedItem {
    pub id: u64,
    #[serde(default)]
    pub kind: FeedKind,
    #[serde(default = "default_author")]
    pub author: String,
}

fn default_author() -> String {
    "ada".into()
}

/// Renders host-shaped markup. Build the document once, then keep using the
/// builder's `render_*` helpers against the live document.
#[derive(Debug)]
pub struct PageBuilder {
    doc: Document,
    root: NodeId,
    header: NodeId,
    heading: NodeId,
    timeline: NodeId,
    layers: NodeId,
}

impl PageBuilder {
    pub fn new(location: &str) -> Self {
        let mut doc = Document::with_location(location);
        let root = doc.element("div", &[("id", "react-root")]);
        let main = doc.element("main", &[("role", "main")]);
        let header = doc.element("div", &[]);
        let heading = doc.element("h2", &[("role", "heading")]);
        doc.append_text(heading, "Following");
        let tools = doc.element("div", &[]);
        let settings = doc.element(
            "div",
            &[("role", "button"), ("aria-label", "Timeline settings")],
        );
        doc.append_child(tools, settings);
        doc.append_child(header, heading);
        doc.append_child(header, tools);
        let timeline = doc.element("section", &[("aria-label", "Timeline: Following")]);
        doc.append_child(main, header);
        doc.append_child(main, timeline);
        let layers = doc.element("div", &[("id", "layers")]);
        doc.append_child(root, main);
        doc.append_child(root, layers);
        doc.append_child(doc.body(), root);
        doc.take_records();
        Self {
            doc,
            root,
            header,
            heading,
            timeline,
            layers,
        }
    }

    /// Leaves the heading out; see [`render_heading`](Self::render_heading).
    pub fn without_heading(mut self) -> Self {
        self.doc.remove(self.heading);
        self.doc.take_records();
        self
    }

    /// Renders an item into the page under construction.
    pub fn push_item(&mut self, id: u64, kind: FeedKind) -> NodeId {
        let item = FeedItem {
            id,
            kind,
            author: default_author(),
        };
        let timeline = self.timeline;
        let element = render_article(&mut self.doc, &item);
        self.doc.append_child(timeline, element);
        self.doc.take_records();
        element
    }

    /// Hands out the page. The builder keeps the node handles.
    pub fn build(&mut self) -> Document {
        std::mem::take(&mut self.doc)
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn timeline(&self) -> NodeId {
        self.timeline
    }

    pub fn render_heading(&self, doc: &mut Document) {
        let reference = doc.children(self.header).first().copied();
        doc.insert_before(self.header, self.heading, reference);
    }

    pub fn render_item(&self, doc: &mut Document, item: &FeedItem) -> NodeId {
        let element = render_article(doc, item);
        doc.append_child(self.timeline, element);
        element
    }

    /// Opens the context menu the way the host does: an empty shell first,
    /// the entries a moment later in a second pass.
    pub fn open_menu(&self, doc: &mut Document) -> NodeId {
        let menu = doc.element("div", &[("role", "menu")]);
        doc.append_child(self.layers, menu);
        let list = doc.element("div", &[]);
        for label in ["Not interested in this post", "Follow", "Mute", "Block"] {
            let entry = doc.element("div", &[("role", "menuitem")]);
            let span = doc.element("span", &[]);
            doc.append_text(span, label);
            doc.append_child(entry, span);
            doc.append_child(list, entry);
        }
        doc.append_child(menu, list);
        menu
    }

    pub fn more_button(doc: &Document, item: NodeId) -> Option<NodeId> {
        doc.descendants(item)
            .into_iter()
            .find(|&node| doc.attribute(node, "aria-label") == Some("More"))
    }
}

fn render_article(doc: &mut Document, item: &FeedItem) -> NodeId {
    let article = doc.element("article", &[("role", "article")]);
    match item.kind {
        FeedKind::Normal => {}
        FeedKind::Reshare => {
            let context = doc.element("a", &[("href", "/grace")]);
            let span = doc.element("span", &[]);
            doc.append_text(span, "Grace Retweeted");
            doc.append_child(context, span);
            doc.append_child(article, context);
        }
        FeedKind::Promoted => {
            let context = doc.element("div", &[]);
            let span = doc.element("span", &[]);
            doc.append_text(span, "Promoted");
            doc.append_child(context, span);
            doc.append_child(article, context);
        }
    }
    let byline = doc.element("div", &[]);
    let href = format!("/{}/status/{}", item.author, item.id);
    let link = doc.element("a", &[("href", href.as_str())]);
    let time = doc.element("time", &[("datetime", "2024-01-01T00:00:00.000Z")]);
    doc.append_child(link, time);
    doc.append_child(byline, link);
    doc.append_child(article, byline);
    let text = doc.element("div", &[("lang", "en")]);
    doc.append_text(text, &format!("post {}", item.id));
    doc.append_child(article, text);
    let more = doc.element(
        "div",
        &[
            ("role", "button"),
            ("aria-haspopup", "true"),
            ("aria-label", "More"),
        ],
    );
    doc.append_child(article, more);
    article
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "do", rename_all = "snake_case")]
pub enum Step {
    /// Renders the next `count` feed items.
    Render { count: usize },
    Advance {
        #[serde(with = "humantime_serde")]
        by: Duration,
    },
    /// Clicks the item's more-options hook and opens the menu.
    OpenMenu { id: u64 },
    /// Clicks "Mark as Read" in the open menu.
    MarkRead,
    CloseMenu,
    SetLastRead { id: u64 },
    /// Clicks the scroll button.
    Scroll,
    Remove { id: u64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default = "default_location")]
    pub location: String,
    #[serde(default)]
    pub last_read: Option<u64>,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    #[serde(default)]
    pub feed: Vec<FeedItem>,
    #[serde(default)]
    pub steps: Vec<Step>,
}

fn default_location() -> String {
    "/home".into()
}

fn default_page_size() -> usize {
    5
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemReport {
    pub id: String,
    pub kind: String,
    pub read: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub thread_head: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Report {
    pub status: String,
    pub last_read: Option<String>,
    pub scroll: String,
    pub scroll_y: i64,
    pub elapsed_ms: u64,
    pub rendered: usize,
    pub items: Vec<ItemReport>,
    pub events: Vec<String>,
}

impl Scenario {
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario at {}", path.display()))?;
        Self::from_yaml(&data)
            .with_context(|| format!("Failed to parse scenario at {}", path.display()))
    }

    pub fn from_yaml(data: &str) -> Result<Self> {
        let scenario: Scenario = serde_yaml::from_str(data)?;
        if scenario.page_size == 0 {
            bail!("page_size must be at least 1");
        }
        Ok(scenario)
    }

    pub fn run(&self, cfg: &Config, store: Arc<dyn KeyValueStore>) -> Result<Report> {
        if let Some(id) = self.last_read {
            Settings::open(store.clone(), cfg.storage.settings_key.clone())?
                .update(|s| s.lastread = Some(OrderedIdentifier::from(id)))?;
        }
        let mut sim = Simulation::new(self, cfg, store);
        sim.load_next_page();
        for (index, step) in self.steps.iter().enumerate() {
            sim.apply(step)
                .with_context(|| format!("step {} ({:?})", index + 1, step))?;
        }
        Ok(sim.report())
    }
}

struct Simulation {
    page: PageBuilder,
    runtime: Runtime,
    backlog: VecDeque<FeedItem>,
    rendered: HashMap<u64, NodeId>,
    page_size: usize,
    menu_settle: Duration,
    menu: Option<NodeId>,
    subscription: Option<Subscription>,
    events: Vec<String>,
    elapsed: Duration,
}

impl Simulation {
    fn new(scenario: &Scenario, cfg: &Config, store: Arc<dyn KeyValueStore>) -> Self {
        let mut page = PageBuilder::new(&scenario.location);
        let runtime = Runtime::new(page.build(), cfg.clone(), store);
        Self {
            page,
            runtime,
            backlog: scenario.feed.iter().cloned().collect(),
            rendered: HashMap::new(),
            page_size: scenario.page_size,
            menu_settle: cfg.scroll.menu_settle_delay,
            menu: None,
            subscription: None,
            events: Vec::new(),
            elapsed: Duration::ZERO,
        }
    }

    fn apply(&mut self, step: &Step) -> Result<()> {
        match step {
            Step::Render { count } => self.render(*count),
            Step::Advance { by } => self.advance(*by),
            Step::OpenMenu { id } => {
                let element = self.element(*id)?;
                let more = PageBuilder::more_button(self.runtime.document(), element)
                    .ok_or_else(|| anyhow!("item {id} has no more-options button"))?;
                self.click(more)?;
                let menu = self.page.open_menu(self.runtime.document_mut());
                self.menu = Some(menu);
                self.runtime.pump();
                self.advance(self.menu_settle);
            }
            Step::MarkRead => {
                let menu = self.menu.ok_or_else(|| anyhow!("no menu is open"))?;
                let doc = self.runtime.document();
                let entry = doc
                    .descendants(menu)
                    .into_iter()
                    .find(|&node| doc.has_attribute(node, ATTR_MENU_ITEM))
                    .ok_or_else(|| anyhow!("the open menu has no Mark as Read entry"))?;
                let label = doc.children(entry).first().copied().unwrap_or(entry);
                match self.click(label)? {
                    ClickOutcome::MarkedRead(_) => self.close_menu(),
                    other => bail!("mark as read click ended as {other:?}"),
                }
            }
            Step::CloseMenu => self.close_menu(),
            Step::SetLastRead { id } => {
                if !self.runtime.set_last_read_id(OrderedIdentifier::from(*id))? {
                    bail!("runtime is {}", self.runtime.status());
                }
            }
            Step::Scroll => {
                let button = self
                    .runtime
                    .controller()
                    .and_then(|controller| controller.scroll_button())
                    .ok_or_else(|| anyhow!("scroll button not injected"))?;
                self.click(button)?;
            }
            Step::Remove { id } => {
                let element = self.element(*id)?;
                self.runtime.document_mut().remove(element);
                self.rendered.remove(id);
                self.runtime.pump();
            }
        }
        self.collect_events();
        Ok(())
    }

    fn element(&self, id: u64) -> Result<NodeId> {
        self.rendered
            .get(&id)
            .copied()
            .ok_or_else(|| anyhow!("item {id} is not rendered"))
    }

    fn click(&mut self, target: NodeId) -> Result<ClickOutcome> {
        let outcome = self.runtime.click(target)?;
        self.collect_events();
        Ok(outcome)
    }

    fn close_menu(&mut self) {
        if let Some(menu) = self.menu.take() {
            self.runtime.document_mut().remove(menu);
            self.runtime.pump();
        }
    }

    fn render(&mut self, count: usize) {
        for _ in 0..count {
            let Some(item) = self.backlog.pop_front() else {
                break;
            };
            let element = self.page.render_item(self.runtime.document_mut(), &item);
            self.rendered.insert(item.id, element);
        }
        self.runtime.pump();
        self.collect_events();
    }

    fn load_next_page(&mut self) {
        if !self.backlog.is_empty() {
            self.render(self.page_size);
        }
    }

    /// Steps the clock and plays the host: new pages load once the viewport
    /// reaches the last rendered item.
    fn advance(&mut self, by: Duration) {
        let until = self.elapsed + by;
        while self.elapsed < until {
            let tick = TICK.min(until - self.elapsed);
            self.runtime.advance(tick);
            self.elapsed += tick;
            if self.near_bottom() {
                self.load_next_page();
            }
            self.collect_events();
        }
    }

    fn near_bottom(&self) -> bool {
        let doc = self.runtime.document();
        let last = doc
            .children(self.page.timeline())
            .iter()
            .rev()
            .find_map(|&node| doc.offset_top(node));
        match last {
            Some(top) => doc.scroll_y() + VIEWPORT >= top,
            None => true,
        }
    }

    fn collect_events(&mut self) {
        if self.subscription.is_none() {
            self.subscription = self
                .runtime
                .controller_mut()
                .map(|controller| controller.subscribe());
        }
        if let Some(subscription) = &self.subscription {
            self.events
                .extend(subscription.drain().iter().map(describe_event));
        }
    }

    fn report(mut self) -> Report {
        self.collect_events();
        let controller = self.runtime.controller();
        let items = controller
            .map(|controller| {
                controller
                    .items()
                    .map(|record| ItemReport {
                        id: record.identifier.numeral().to_string(),
                        kind: record.kind.to_string(),
                        read: record.is_read,
                        thread_head: record
                            .thread_head
                            .as_ref()
                            .map(|head| head.numeral().to_string()),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Report {
            status: self.runtime.status().to_string(),
            last_read: controller
                .and_then(|controller| controller.last_read_id())
                .map(|id| id.numeral().to_string()),
            scroll: controller
                .map(|controller| describe_state(controller.scroll_state()))
                .unwrap_or_else(|| "idle".into()),
            scroll_y: self.runtime.document().scroll_y(),
            elapsed_ms: self.elapsed.as_millis() as u64,
            rendered: self.rendered.len(),
            items,
            events: self.events,
        }
    }
}

fn describe_stop(reason: &StopReason) -> String {
    match reason {
        StopReason::Found(id) => format!("found {}", id.numeral()),
        StopReason::Exhausted => "exhausted".into(),
        StopReason::Cancelled => "cancelled".into(),
    }
}

fn describe_state(state: &ScrollState) -> String {
    match state {
        ScrollState::Idle => "idle".into(),
        ScrollState::Scrolling => "scrolling".into(),
        ScrollState::Stopped(reason) => format!("stopped ({})", describe_stop(reason)),
    }
}

fn describe_event(event: &Event) -> String {
    match event {
        Event::NewItem { id, kind, .. } => format!("new {} item {}", kind, id.numeral()),
        Event::ScrollStarted => "scroll started".into(),
        Event::ScrollStopped { reason } => format!("scroll stopped: {}", describe_stop(reason)),
    }
}
