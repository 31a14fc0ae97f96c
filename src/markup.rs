//! Host DOM queries: everything that knows what the timeline markup looks like.

use anyhow::{Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::config::MarkupConfig;
use crate::dom::{Document, NodeId};
use crate::identifier::OrderedIdentifier;
use crate::item::{ItemError, ItemKind, MissingPart};
use crate::selector::Selector;

static TRAILING_NUMERAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[0-9]+$").expect("valid trailing numeral regex"));

/// A selector plus the text its match must contain.
#[derive(Debug, Clone)]
pub struct TextMarker {
    pub selector: Selector,
    pub text: String,
}

impl TextMarker {
    fn present(&self, doc: &Document, root: NodeId) -> bool {
        !self.text.is_empty()
            && doc
                .query_selector_all(root, &self.selector)
                .into_iter()
                .any(|node| doc.text_content(node).contains(&self.text))
    }
}

#[derive(Debug, Clone)]
pub struct Markup {
    pub observe_root: Selector,
    pub item_root: Selector,
    pub timestamp: Selector,
    pub permalink: Selector,
    pub permalink_attribute: String,
    pub reshare: TextMarker,
    pub promoted: TextMarker,
    pub more_options: Selector,
    pub menu: Selector,
    pub menu_item: Selector,
    pub heading_watch: Selector,
    pub heading: Selector,
    pub heading_text: String,
    pub button: Selector,
}

fn compile(field: &str, raw: &str) -> Result<Selector> {
    Selector::parse(raw).with_context(|| format!("markup: invalid selector for {field}"))
}

impl Markup {
    pub fn from_config(cfg: &MarkupConfig) -> Result<Self> {
        Ok(Self {
            observe_root: compile("observe_root", &cfg.observe_root)?,
            item_root: compile("item_root", &cfg.item_root)?,
            timestamp: compile("timestamp", &cfg.timestamp)?,
            permalink: compile("permalink", &cfg.permalink)?,
            permalink_attribute: cfg.permalink_attribute.clone(),
            reshare: TextMarker {
                selector: compile("reshare_marker", &cfg.reshare_marker)?,
                text: cfg.reshare_text.clone(),
            },
            promoted: TextMarker {
                selector: compile("promoted_marker", &cfg.promoted_marker)?,
                text: cfg.promoted_text.clone(),
            },
            more_options: compile("more_options", &cfg.more_options)?,
            menu: compile("menu", &cfg.menu)?,
            menu_item: compile("menu_item", &cfg.menu_item)?,
            heading_watch: compile("heading_watch", &cfg.heading_watch)?,
            heading: compile("heading", &cfg.heading)?,
            heading_text: cfg.heading_text.clone(),
            button: compile("button", &cfg.button)?,
        })
    }

    /// Item roots related to an inserted node: the node itself, else its
    /// closest item ancestor, else every item below it.
    pub fn find_item_roots(&self, doc: &Document, node: NodeId) -> Vec<NodeId> {
        if let Some(item) = doc.closest(node, &self.item_root) {
            return vec![item];
        }
        doc.query_selector_all(node, &self.item_root)
    }

    /// Timestamp, then its enclosing permalink, then the link's trailing numeral.
    pub fn extract_identifier(
        &self,
        doc: &Document,
        item: NodeId,
    ) -> Result<OrderedIdentifier, ItemError> {
        let missing = |missing| ItemError::IdentifierNotFound {
            element: item,
            missing,
        };
        let time = doc
            .query_selector(item, &self.timestamp)
            .ok_or_else(|| missing(MissingPart::Timestamp))?;
        let link = doc
            .closest(time, &self.permalink)
            .ok_or_else(|| missing(MissingPart::Permalink))?;
        let href = doc
            .attribute(link, &self.permalink_attribute)
            .ok_or_else(|| missing(MissingPart::TrailingNumeral))?;
        let numeral = TRAILING_NUMERAL
            .find(href)
            .ok_or_else(|| missing(MissingPart::TrailingNumeral))?;
        OrderedIdentifier::parse(numeral.as_str()).map_err(|source| {
            ItemError::InvalidIdentifier {
                element: item,
                source,
            }
        })
    }

    /// Promoted wins over reshare, which wins over normal.
    pub fn classify(&self, doc: &Document, item: NodeId) -> ItemKind {
        if self.promoted.present(doc, item) {
            ItemKind::Promoted
        } else if self.reshare.present(doc, item) {
            ItemKind::Reshare
        } else {
            ItemKind::Normal
        }
    }

    pub fn more_options(&self, doc: &Document, item: NodeId) -> Option<NodeId> {
        doc.query_selector(item, &self.more_options)
    }

    /// The heading announcing the chronological view, if rendered.
    pub fn view_heading(&self, doc: &Document) -> Option<NodeId> {
        doc.query_selector_all(doc.root(), &self.heading)
            .into_iter()
            .find(|&node| doc.text_content(node).contains(&self.heading_text))
    }

    /// Home needs the "following" heading; search needs the live filter.
    pub fn is_chronological(&self, doc: &Document) -> bool {
        let location = doc.location();
        let (path, query) = location.split_once('?').unwrap_or((location, ""));
        if path == "/home" {
            return self.view_heading(doc).is_some();
        }
        if path.starts_with("/search") {
            return query.split('&').any(|pair| pair == "f=live");
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markup() -> Markup {
        Markup::from_config(&MarkupConfig::default()).unwrap()
    }

    fn article(doc: &mut Document, href: Option<&str>, marker: Option<(&str, &str)>) -> NodeId {
        let item = doc.element("article", &[]);
        if let Some((tag, text)) = marker {
            let link = doc.element("a", &[("href", "/someone")]);
            let span = doc.element(tag, &[]);
            doc.append_text(span, text);
            doc.append_child(link, span);
            doc.append_child(item, link);
        }
        if let Some(href) = href {
            let link = doc.element("a", &[("href", href)]);
            let time = doc.element("time", &[]);
            doc.append_child(link, time);
            doc.append_child(item, link);
        }
        doc.append_child(doc.body(), item);
        item
    }

    #[test]
    fn extracts_trailing_numeral() {
        let mut doc = Document::new();
        let item = article(&mut doc, Some("/ada/status/1754321098765432109"), None);
        let id = markup().extract_identifier(&doc, item).unwrap();
        assert_eq!(id.numeral(), "1754321098765432109");
    }

    #[test]
    fn reports_missing_parts() {
        let m = markup();
        let mut doc = Document::new();

        let bare = article(&mut doc, None, None);
        assert_eq!(
            m.extract_identifier(&doc, bare),
            Err(ItemError::IdentifierNotFound {
                element: bare,
                missing: MissingPart::Timestamp,
            })
        );

        let no_link = doc.element("article", &[]);
        let time = doc.element("time", &[]);
        doc.append_child(no_link, time);
        assert!(matches!(
            m.extract_identifier(&doc, no_link),
            Err(ItemError::IdentifierNotFound {
                missing: MissingPart::Permalink,
                ..
            })
        ));

        let no_digits = article(&mut doc, Some("/ada/status/"), None);
        assert!(matches!(
            m.extract_identifier(&doc, no_digits),
            Err(ItemError::IdentifierNotFound {
                missing: MissingPart::TrailingNumeral,
                ..
            })
        ));

        let arabic_digits = article(&mut doc, Some("/ada/status/١٢٣"), None);
        assert!(matches!(
            m.extract_identifier(&doc, arabic_digits),
            Err(ItemError::IdentifierNotFound {
                missing: MissingPart::TrailingNumeral,
                ..
            })
        ));

        let mixed = article(&mut doc, Some("/ada/status/١٢4"), None);
        assert_eq!(m.extract_identifier(&doc, mixed).unwrap().numeral(), "4");

        let too_wide = article(&mut doc, Some(&format!("/x/{}", "9".repeat(30))), None);
        assert!(matches!(
            m.extract_identifier(&doc, too_wide),
            Err(ItemError::InvalidIdentifier { .. })
        ));
    }

    #[test]
    fn classification_precedence() {
        let m = markup();
        let mut doc = Document::new();
        let normal = article(&mut doc, Some("/a/status/1"), None);
        let reshare = article(&mut doc, Some("/a/status/2"), Some(("span", "Ada Retweeted")));
        let promoted = article(&mut doc, Some("/a/status/3"), Some(("span", "Promoted")));
        assert_eq!(m.classify(&doc, normal), ItemKind::Normal);
        assert_eq!(m.classify(&doc, reshare), ItemKind::Reshare);
        assert_eq!(m.classify(&doc, promoted), ItemKind::Promoted);

        let both = article(&mut doc, Some("/a/status/4"), Some(("span", "Ada Retweeted")));
        let tag = doc.element("span", &[]);
        doc.append_text(tag, "Promoted");
        doc.append_child(both, tag);
        assert_eq!(m.classify(&doc, both), ItemKind::Promoted);
    }

    #[test]
    fn finds_item_roots_three_ways() {
        let m = markup();
        let mut doc = Document::new();
        let item = article(&mut doc, Some("/a/status/1"), None);
        let time = doc.query_selector(item, &m.timestamp).unwrap();
        assert_eq!(m.find_item_roots(&doc, item), vec![item]);
        assert_eq!(m.find_item_roots(&doc, time), vec![item]);

        let wrapper = doc.element("section", &[]);
        let first = article(&mut doc, Some("/a/status/2"), None);
        let second = article(&mut doc, Some("/a/status/3"), None);
        doc.append_child(wrapper, first);
        doc.append_child(wrapper, second);
        assert_eq!(m.find_item_roots(&doc, wrapper), vec![first, second]);
    }

    #[test]
    fn chronological_views() {
        let m = markup();
        let mut doc = Document::with_location("/home");
        assert!(!m.is_chronological(&doc));
        let heading = doc.element("h2", &[("role", "heading")]);
        doc.append_text(heading, "Following");
        doc.append_child(doc.body(), heading);
        assert!(m.is_chronological(&doc));

        doc.set_location("/search?q=rust&f=live");
        assert!(m.is_chronological(&doc));
        doc.set_location("/search?q=rust");
        assert!(!m.is_chronological(&doc));
        doc.set_location("/notifications");
        assert!(!m.is_chronological(&doc));
    }

    #[test]
    fn bad_selector_is_reported() {
        let cfg = MarkupConfig {
            item_root: "article >".into(),
            ..MarkupConfig::default()
        };
        let err = Markup::from_config(&cfg).unwrap_err();
        assert!(err.to_string().contains("item_root"));
    }
}
