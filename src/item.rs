use std::fmt;

use crate::dom::{Document, NodeId};
use crate::identifier::{IdentifierError, OrderedIdentifier};

pub const ATTR_HANDLED: &str = "data-tmlr-handled";
pub const ATTR_ID: &str = "data-tmlr-tweet-id";
pub const ATTR_CHECKED: &str = "data-tmlr-checked";
pub const ATTR_READ: &str = "data-tmlr-read";
pub const ATTR_RESHARE: &str = "data-tmlr-retweet";
pub const ATTR_PROMOTED: &str = "data-tmlr-promoted";
pub const ATTR_THREAD: &str = "data-tmlr-thread-id";
/// Set on every handled item while debugging is on.
pub const ATTR_DEBUG: &str = "data-tmlr-debug";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemKind {
    Normal,
    Reshare,
    Promoted,
}

impl ItemKind {
    pub fn is_normal(self) -> bool {
        self == ItemKind::Normal
    }
}

impl fmt::Display for ItemKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ItemKind::Normal => "normal",
            ItemKind::Reshare => "reshare",
            ItemKind::Promoted => "promoted",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MissingPart {
    Timestamp,
    Permalink,
    TrailingNumeral,
}

impl fmt::Display for MissingPart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MissingPart::Timestamp => "timestamp element not found",
            MissingPart::Permalink => "permalink around timestamp not found",
            MissingPart::TrailingNumeral => "permalink has no trailing numeral",
        })
    }
}

/// Failures scoped to a single item. The pipeline logs them and moves on.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ItemError {
    #[error("item {element:?}: identifier not found ({missing})")]
    IdentifierNotFound { element: NodeId, missing: MissingPart },
    #[error("item {element:?}: invalid identifier: {source}")]
    InvalidIdentifier {
        element: NodeId,
        #[source]
        source: IdentifierError,
    },
    #[error("item {}: more-options affordance not found", .id.numeral())]
    AffordanceNotFound { id: OrderedIdentifier },
}

/// One timeline entry. The struct is the source of truth; the element's
/// `data-tmlr-*` attributes are only a projection of it (see [`ItemRecord::project`]).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemRecord {
    pub element: NodeId,
    pub identifier: OrderedIdentifier,
    pub kind: ItemKind,
    pub is_read: bool,
    /// Newest item of the thread this item belongs to, if any.
    pub thread_head: Option<OrderedIdentifier>,
    pub checked: bool,
}

impl ItemRecord {
    pub fn new(element: NodeId, identifier: OrderedIdentifier, kind: ItemKind) -> Self {
        Self {
            element,
            identifier,
            kind,
            is_read: false,
            thread_head: None,
            checked: false,
        }
    }

    pub fn has_element(&self, doc: &Document) -> bool {
        doc.is_connected(self.element)
    }

    /// Read, and the authoritative end of its thread (or not in a thread).
    pub fn is_read_boundary(&self) -> bool {
        self.is_read && self.thread_head.is_none()
    }

    /// Compares against the watermark. Only meaningful for normal items;
    /// the caller decides whether a re-check is due.
    pub fn apply_watermark(&mut self, watermark: &OrderedIdentifier) {
        self.is_read = self.identifier <= *watermark;
        self.checked = true;
    }

    /// Raises the thread head, never lowers it. Returns whether it changed.
    pub fn raise_thread_head(&mut self, head: &OrderedIdentifier) -> bool {
        match &self.thread_head {
            Some(current) if current >= head => false,
            _ => {
                self.thread_head = Some(head.clone());
                true
            }
        }
    }

    /// Mirrors the record onto its element as styling hooks. Never read back.
    pub fn project(&self, doc: &mut Document) {
        let element = self.element;
        if !doc.exists(element) {
            return;
        }
        doc.set_attribute(element, ATTR_HANDLED, "true");
        doc.set_attribute(element, ATTR_ID, self.identifier.numeral());
        doc.toggle_attribute(element, ATTR_RESHARE, self.kind == ItemKind::Reshare);
        doc.toggle_attribute(element, ATTR_PROMOTED, self.kind == ItemKind::Promoted);
        if self.checked {
            doc.set_attribute(element, ATTR_CHECKED, "true");
        } else {
            doc.remove_attribute(element, ATTR_CHECKED);
        }
        doc.toggle_attribute(element, ATTR_READ, self.is_read);
        match &self.thread_head {
            Some(head) => doc.set_attribute(element, ATTR_THREAD, head.numeral()),
            None => doc.remove_attribute(element, ATTR_THREAD),
        }
    }
}
