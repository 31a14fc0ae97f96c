//! Groups consecutive posts into threads.
//!
//! Only the newest item of a run carries the authoritative read boundary, so
//! every earlier item of the run points at it through `thread_head`.

use crate::dom::Document;
use crate::identifier::OrderedIdentifier;
use crate::item::ItemKind;
use crate::registry::Registry;

/// Walks backward from `current` through the assignment order and raises the
/// thread head of every contiguous older item. Returns how many records
/// changed.
pub fn link(registry: &mut Registry, current: &OrderedIdentifier, doc: &mut Document) -> usize {
    let Some(position) = registry.position(current) else {
        return 0;
    };
    let prior: Vec<OrderedIdentifier> = registry.order()[..position].to_vec();

    let mut changed = 0;
    for id in prior.iter().rev() {
        let Some(record) = registry.get_mut(id) else {
            break;
        };
        if record.identifier >= *current {
            break;
        }
        // Reshares end the run; promoted entries are not part of anyone's thread either.
        if record.kind != ItemKind::Normal {
            break;
        }
        if record.raise_thread_head(current) {
            record.project(doc);
            changed += 1;
        }
    }
    if changed > 0 {
        log::debug!("thread: {} item(s) now point at {}", changed, current.numeral());
    }
    changed
}
