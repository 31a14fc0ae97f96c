//! "Scroll to last read": keeps the page paging down until the watermark item
//! shows up or the feed stops growing.

use std::time::Duration;

use crate::config::ScrollConfig;
use crate::controller::Task;
use crate::dom::{Document, NodeId};
use crate::events::{Event, EventBus, Subscription};
use crate::identifier::OrderedIdentifier;
use crate::registry::Registry;
use crate::scheduler::{Fuse, Scheduler};

pub const ATTR_RUNNING: &str = "data-scrolltolastread-running";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// The read boundary item was rendered and scrolled to.
    Found(OrderedIdentifier),
    /// The offset stopped changing for too many fuse expiries.
    Exhausted,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrollState {
    Idle,
    Scrolling,
    Stopped(StopReason),
}

/// What `start` ended up doing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    AlreadyRunning,
    /// A read boundary was already rendered; jumped straight to it.
    Jumped(OrderedIdentifier),
    Started,
}

/// Everything a scroll step touches, borrowed from the controller.
pub struct ScrollCtx<'a> {
    pub doc: &'a mut Document,
    pub registry: &'a Registry,
    pub scheduler: &'a mut Scheduler<Task>,
    pub bus: &'a mut EventBus,
}

#[derive(Debug)]
pub struct AutoScroller {
    state: ScrollState,
    fuse: Fuse<Task>,
    subscription: Option<Subscription>,
    settle_delay: Duration,
    padding: i64,
    stall_limit: u32,
    stalls: u32,
    last_offset: i64,
    run: u64,
}

impl AutoScroller {
    pub fn new(cfg: &ScrollConfig) -> Self {
        Self {
            state: ScrollState::Idle,
            fuse: Fuse::new(cfg.fuse_delay, true, Task::FuseExpired),
            subscription: None,
            settle_delay: cfg.settle_delay,
            padding: cfg.padding,
            stall_limit: cfg.stall_limit.max(1),
            stalls: 0,
            last_offset: 0,
            run: 0,
        }
    }

    pub fn state(&self) -> &ScrollState {
        &self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == ScrollState::Scrolling
    }

    pub fn stalls(&self) -> u32 {
        self.stalls
    }

    pub fn start(&mut self, ctx: ScrollCtx<'_>) -> StartOutcome {
        if self.is_running() {
            log::debug!("scroll: already running");
            return StartOutcome::AlreadyRunning;
        }

        let boundary = ctx
            .registry
            .rendered(ctx.doc)
            .into_iter()
            .find(|record| record.is_read_boundary())
            .map(|record| (record.identifier.clone(), record.element));
        if let Some((id, element)) = boundary {
            log::debug!("scroll: {} already rendered, jumping", id.numeral());
            self.jump(ctx.doc, element);
            self.state = ScrollState::Idle;
            return StartOutcome::Jumped(id);
        }

        self.run += 1;
        self.state = ScrollState::Scrolling;
        self.stalls = 0;
        self.last_offset = ctx.doc.scroll_y();
        let body = ctx.doc.body();
        ctx.doc.set_attribute(body, ATTR_RUNNING, "");
        ctx.bus.publish(Event::ScrollStarted);
        self.subscription = Some(ctx.bus.subscribe());
        self.fuse.relight(ctx.scheduler);
        log::debug!("scroll: run {} started", self.run);
        StartOutcome::Started
    }

    /// Turns queued item events into settle tasks for the current run.
    pub fn pump(&mut self, scheduler: &mut Scheduler<Task>) {
        let Some(subscription) = &self.subscription else {
            return;
        };
        for event in subscription.drain() {
            if let Event::NewItem { id, .. } = event {
                scheduler.schedule(
                    self.settle_delay,
                    Task::ItemSettled { run: self.run, id },
                );
            }
        }
    }

    /// Fuse expiry: page down to the last rendered item and watch for stalls.
    pub fn on_fuse(&mut self, ctx: ScrollCtx<'_>) {
        if !self.is_running() {
            return;
        }
        if let Some(last) = ctx.registry.rendered(ctx.doc).last() {
            ctx.doc.scroll_into_view(last.element);
        }
        let offset = ctx.doc.scroll_y();
        if offset == self.last_offset {
            self.stalls += 1;
            log::debug!("scroll: stalled at {} ({}/{})", offset, self.stalls, self.stall_limit);
            if self.stalls >= self.stall_limit {
                self.stop(ctx, StopReason::Exhausted);
            }
        } else {
            self.last_offset = offset;
            self.stalls = 0;
        }
    }

    /// An item event from `run` has settled; the items after it had their
    /// chance to link threads by now.
    pub fn on_settled(&mut self, ctx: ScrollCtx<'_>, run: u64, id: &OrderedIdentifier) {
        if !self.is_running() || run != self.run {
            log::debug!("scroll: ignoring settle from run {}", run);
            return;
        }
        self.fuse.relight(ctx.scheduler);

        let found = ctx
            .registry
            .get(id)
            .filter(|record| record.is_read_boundary() && record.has_element(ctx.doc))
            .map(|record| record.element);
        if let Some(element) = found {
            log::debug!("scroll: found read item {}", id.numeral());
            self.stop_inner(ctx.doc, ctx.scheduler, ctx.bus, StopReason::Found(id.clone()));
            self.jump(ctx.doc, element);
        }
    }

    /// Safe to call at any time; only an active run emits `ScrollStopped`.
    pub fn stop(&mut self, ctx: ScrollCtx<'_>, reason: StopReason) {
        self.stop_inner(ctx.doc, ctx.scheduler, ctx.bus, reason);
    }

    fn stop_inner(
        &mut self,
        doc: &mut Document,
        scheduler: &mut Scheduler<Task>,
        bus: &mut EventBus,
        reason: StopReason,
    ) {
        self.fuse.stop(scheduler);
        self.subscription = None;
        if !self.is_running() {
            return;
        }
        let body = doc.body();
        doc.remove_attribute(body, ATTR_RUNNING);
        log::debug!("scroll: run {} stopped ({:?})", self.run, reason);
        self.state = ScrollState::Stopped(reason.clone());
        bus.publish(Event::ScrollStopped { reason });
    }

    fn jump(&self, doc: &mut Document, element: NodeId) {
        doc.scroll_into_view(element);
        doc.scroll_by(self.padding);
    }
}
