use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::bridge::SelectorMatchWaiter;
use crate::config::{self, Config};
use crate::controller::{ClickOutcome, Controller, InitError};
use crate::dom::{Document, NodeId};
use crate::identifier::OrderedIdentifier;
use crate::logging;
use crate::scenario::Scenario;
use crate::scroll::StartOutcome;
use crate::selector::Selector;
use crate::settings::Settings;
use crate::storage::{self, KeyValueStore, MemoryStore};
use crate::watermark::WatermarkStore;

enum Phase {
    /// Waiting for the view heading to render.
    Waiting(SelectorMatchWaiter),
    Active(Box<Controller>),
    /// Startup failed; the page is left alone.
    Inactive,
}

/// Hosts one page: owns the document and brings the controller up once the
/// timeline heading appears. Startup failures leave the page untouched.
pub struct Runtime {
    doc: Document,
    config: Config,
    store: Arc<dyn KeyValueStore>,
    phase: Phase,
}

impl Runtime {
    pub fn new(doc: Document, config: Config, store: Arc<dyn KeyValueStore>) -> Self {
        let phase = match Selector::parse(&config.markup.heading_watch) {
            Ok(selector) => Phase::Waiting(SelectorMatchWaiter::new(selector, doc.root())),
            Err(err) => {
                log::warn!("marklastread: not loading: heading selector: {err}");
                Phase::Inactive
            }
        };
        let mut runtime = Self {
            doc,
            config,
            store,
            phase,
        };
        let ready = match &runtime.phase {
            Phase::Waiting(waiter) => !waiter.initial_matches(&runtime.doc).is_empty(),
            _ => false,
        };
        if ready {
            runtime.try_activate();
        }
        runtime
    }

    fn try_activate(&mut self) {
        let Phase::Waiting(waiter) = &mut self.phase else {
            return;
        };
        match Controller::new(&mut self.doc, &self.config, self.store.clone()) {
            Ok(controller) => {
                waiter.disconnect();
                log::debug!("runtime: controller active on {}", self.doc.location());
                self.phase = Phase::Active(Box::new(controller));
            }
            Err(err)
                if matches!(
                    err.downcast_ref::<InitError>(),
                    Some(InitError::NotChronological { .. })
                ) =>
            {
                log::debug!("runtime: {err:#}; still waiting");
            }
            Err(err) => {
                waiter.disconnect();
                log::warn!("marklastread: not loading: {err:#}");
                self.phase = Phase::Inactive;
            }
        }
    }

    pub fn document(&self) -> &Document {
        &self.doc
    }

    /// Mutate the page through this, then [`pump`](Self::pump) to deliver
    /// the resulting batch.
    pub fn document_mut(&mut self) -> &mut Document {
        &mut self.doc
    }

    /// Delivers pending mutations as one batch.
    pub fn pump(&mut self) {
        let records = self.doc.take_records();
        if records.is_empty() {
            return;
        }
        let heading_seen = match &mut self.phase {
            Phase::Waiting(waiter) => !waiter.matches_for(&self.doc, &records).is_empty(),
            Phase::Active(controller) => {
                controller.on_mutations(&mut self.doc, &records);
                false
            }
            Phase::Inactive => false,
        };
        if heading_seen {
            self.try_activate();
        }
    }

    pub fn advance(&mut self, elapsed: Duration) {
        self.pump();
        if let Phase::Active(controller) = &mut self.phase {
            controller.advance(&mut self.doc, elapsed);
        }
    }

    pub fn click(&mut self, target: NodeId) -> Result<ClickOutcome> {
        self.pump();
        match &mut self.phase {
            Phase::Active(controller) => controller.click(&mut self.doc, target),
            _ => Ok(ClickOutcome::Ignored),
        }
    }

    pub fn controller(&self) -> Option<&Controller> {
        match &self.phase {
            Phase::Active(controller) => Some(&**controller),
            _ => None,
        }
    }

    pub fn controller_mut(&mut self) -> Option<&mut Controller> {
        match &mut self.phase {
            Phase::Active(controller) => Some(&mut **controller),
            _ => None,
        }
    }

    /// Moves the watermark directly. Returns false while no controller runs.
    pub fn set_last_read_id(&mut self, id: OrderedIdentifier) -> Result<bool> {
        self.pump();
        match &mut self.phase {
            Phase::Active(controller) => {
                controller.set_last_read_id(&mut self.doc, id)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    pub fn start_scroll(&mut self) -> Option<StartOutcome> {
        self.pump();
        match &mut self.phase {
            Phase::Active(controller) => Some(controller.start_scroll(&mut self.doc)),
            _ => None,
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self.phase, Phase::Active(_))
    }

    pub fn status(&self) -> &'static str {
        match self.phase {
            Phase::Waiting(_) => "waiting",
            Phase::Active(_) => "active",
            Phase::Inactive => "inactive",
        }
    }

    pub fn shutdown(&mut self) {
        match &mut self.phase {
            Phase::Active(controller) => controller.shutdown(&mut self.doc),
            Phase::Waiting(waiter) => waiter.disconnect(),
            Phase::Inactive => {}
        }
        self.phase = Phase::Inactive;
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Simulate(PathBuf),
    ShowLastRead,
    ResetLastRead,
}

pub fn run(command: Command) -> Result<()> {
    let cfg = config::load(config::LoadOptions::default()).context("load config")?;
    logging::init(&cfg.debug)?;

    match command {
        Command::Simulate(path) => {
            let scenario = Scenario::load(&path)?;
            // Simulations never touch the persisted watermark.
            let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
            let report = scenario.run(&cfg, store)?;
            let rendered = serde_yaml::to_string(&report).context("render report")?;
            print!("{rendered}");
        }
        Command::ShowLastRead => {
            let watermark = open_watermark(&cfg, open_store(&cfg)?)?;
            match watermark.get() {
                Some(id) => println!("{}", id.numeral()),
                None => println!("unset"),
            }
        }
        Command::ResetLastRead => {
            let mut watermark = open_watermark(&cfg, open_store(&cfg)?)?;
            watermark.clear()?;
            println!("last read id cleared");
        }
    }
    Ok(())
}

fn open_store(cfg: &Config) -> Result<Arc<dyn KeyValueStore>> {
    let store = storage::Store::open(storage::Options {
        path: cfg.storage.path.clone(),
    })
    .context("open storage")?;
    Ok(Arc::new(store))
}

fn open_watermark(cfg: &Config, store: Arc<dyn KeyValueStore>) -> Result<WatermarkStore> {
    let settings = Settings::open(store, cfg.storage.settings_key.clone())?;
    WatermarkStore::load(settings)
}
