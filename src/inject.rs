use crate::dom::{Document, NodeId};
use crate::markup::Markup;

pub const ATTR_SCROLL_BUTTON: &str = "data-tmlr-scrolldown-button";
pub const ATTR_INNER: &str = "data-tmlr-inner";
pub const BUTTON_TITLE: &str = "Mark Last Read: Scroll to last read";

/// The "scroll to last read" button placed in the view header.
#[derive(Debug, Default)]
pub struct ScrollButton {
    element: Option<NodeId>,
}

impl ScrollButton {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn element(&self) -> Option<NodeId> {
        self.element
    }

    /// Puts the button next to the first header button above the view
    /// heading. Does nothing while a button is still on the page or while
    /// the header hasn't rendered.
    pub fn ensure(&mut self, doc: &mut Document, markup: &Markup) -> Option<NodeId> {
        if let Some(existing) = self.element.filter(|&node| doc.is_connected(node)) {
            return Some(existing);
        }
        let heading = markup.view_heading(doc)?;
        let body = doc.body();
        let (anchor, target) = doc
            .ancestors_inclusive(heading)
            .skip(1)
            .take_while(|&node| node != body)
            .find_map(|node| {
                let anchor = doc.query_selector(node, &markup.button)?;
                Some((anchor, doc.parent(anchor)?))
            })
            .or_else(|| {
                log::debug!("inject: no header button near the view heading");
                None
            })?;

        let wrapper = doc.element(
            "div",
            &[
                ("role", "button"),
                (ATTR_SCROLL_BUTTON, ""),
                ("title", BUTTON_TITLE),
            ],
        );
        let inner = doc.element("div", &[(ATTR_INNER, "")]);
        doc.append_child(wrapper, inner);
        doc.insert_before(target, wrapper, Some(anchor));
        log::debug!("inject: scroll button {:?} placed in {:?}", wrapper, target);
        self.element = Some(wrapper);
        Some(wrapper)
    }

    pub fn is_hit(&self, doc: &Document, target: NodeId) -> bool {
        self.element
            .is_some_and(|button| doc.is_connected(button) && doc.contains(button, target))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MarkupConfig;

    fn header(doc: &mut Document) -> (NodeId, NodeId) {
        let header = doc.element("div", &[]);
        let heading = doc.element("h2", &[("role", "heading")]);
        doc.append_text(heading, "Following");
        let tools = doc.element("div", &[]);
        let settings = doc.element("div", &[("role", "button")]);
        doc.append_child(tools, settings);
        doc.append_child(header, heading);
        doc.append_child(header, tools);
        doc.append_child(doc.body(), header);
        (tools, settings)
    }

    #[test]
    fn inserts_before_header_button_once() {
        let markup = Markup::from_config(&MarkupConfig::default()).unwrap();
        let mut doc = Document::with_location("/home");
        let (tools, settings) = header(&mut doc);
        let mut button = ScrollButton::new();

        let placed = button.ensure(&mut doc, &markup).unwrap();
        assert_eq!(doc.children(tools), &[placed, settings]);
        assert!(doc.has_attribute(placed, ATTR_SCROLL_BUTTON));

        assert_eq!(button.ensure(&mut doc, &markup), Some(placed));
        assert_eq!(doc.children(tools).len(), 2);

        let inner = doc.children(placed)[0];
        assert!(button.is_hit(&doc, inner));
        assert!(!button.is_hit(&doc, settings));
    }

    #[test]
    fn waits_for_heading_and_reinserts_after_rerender() {
        let markup = Markup::from_config(&MarkupConfig::default()).unwrap();
        let mut doc = Document::with_location("/home");
        let mut button = ScrollButton::new();
        assert_eq!(button.ensure(&mut doc, &markup), None);

        let (tools, _) = header(&mut doc);
        let first = button.ensure(&mut doc, &markup).unwrap();
        doc.remove(first);
        let second = button.ensure(&mut doc, &markup).unwrap();
        assert_ne!(first, second);
        assert_eq!(doc.children(tools)[0], second);
    }
}
