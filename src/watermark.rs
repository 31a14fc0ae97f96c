use anyhow::{Context, Result};

use crate::dom::Document;
use crate::identifier::OrderedIdentifier;
use crate::registry::Registry;
use crate::settings::Settings;
use crate::thread;

/// The persisted last-read identifier.
#[derive(Clone)]
pub struct WatermarkStore {
    settings: Settings,
    current: Option<OrderedIdentifier>,
}

impl WatermarkStore {
    pub fn load(settings: Settings) -> Result<Self> {
        let current = settings
            .load()
            .context("watermark: load stored settings")?
            .lastread;
        log::debug!(
            "watermark: loaded {}",
            current.as_ref().map(|id| id.numeral()).unwrap_or("unset")
        );
        Ok(Self { settings, current })
    }

    pub fn get(&self) -> Option<&OrderedIdentifier> {
        self.current.as_ref()
    }

    /// Persists first; the in-memory value only moves once storage accepted it.
    pub fn set(&mut self, id: OrderedIdentifier) -> Result<()> {
        let stored = id.clone();
        self.settings
            .update(move |s| s.lastread = Some(stored))
            .context("watermark: persist last read id")?;
        log::debug!("watermark: set to {}", id.numeral());
        self.current = Some(id);
        Ok(())
    }

    pub fn clear(&mut self) -> Result<()> {
        self.settings
            .update(|s| s.lastread = None)
            .context("watermark: clear last read id")?;
        self.current = None;
        Ok(())
    }
}

/// Read-state check for one item. Non-normal items and an unset watermark
/// leave the record alone; an already checked item is skipped unless forced.
/// Returns whether the record was evaluated.
pub fn evaluate(
    registry: &mut Registry,
    doc: &mut Document,
    id: &OrderedIdentifier,
    watermark: Option<&OrderedIdentifier>,
    force: bool,
) -> bool {
    let Some(watermark) = watermark else {
        return false;
    };
    match registry.get(id) {
        Some(record) if record.kind.is_normal() && (force || !record.checked) => {}
        _ => return false,
    }

    thread::link(registry, id, doc);

    let Some(record) = registry.get_mut(id) else {
        return false;
    };
    record.apply_watermark(watermark);
    record.project(doc);
    log::debug!(
        "item {}: {}",
        id.numeral(),
        if record.is_read { "read" } else { "unread" }
    );
    true
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Reevaluation {
    pub checked: usize,
    pub removed: Vec<OrderedIdentifier>,
}

/// Forces a re-check of every tracked item against `watermark`, dropping
/// records whose element left the page. Works on a snapshot of the order so
/// removals don't disturb the walk.
pub fn reevaluate(
    registry: &mut Registry,
    doc: &mut Document,
    watermark: &OrderedIdentifier,
) -> Reevaluation {
    let mut outcome = Reevaluation::default();
    for id in registry.snapshot() {
        let attached = match registry.get(&id) {
            Some(record) => record.has_element(doc),
            None => {
                log::error!("item {}: vanished during re-evaluation", id.numeral());
                continue;
            }
        };
        if !attached {
            registry.remove(&id);
            outcome.removed.push(id);
            continue;
        }
        if evaluate(registry, doc, &id, Some(watermark), true) {
            outcome.checked += 1;
        }
    }
    if !outcome.removed.is_empty() {
        log::debug!("watermark: dropped {} detached item(s)", outcome.removed.len());
    }
    outcome
}
