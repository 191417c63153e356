use std::collections::BTreeSet;

use ego_tree::NodeId;
use pagespace_core::{anchor_to_relative, is_local, to_relative};
use pagespace_logging::{ps_debug, ps_trace};
use scraper::node::{Element, Node};
use scraper::Html;

use crate::css::rewrite_css_urls;
use crate::decode::decode_html;
use crate::{FetchedPage, TransformResult};

/// Value of the `<meta name="generator">` stamped into every exported page.
pub const GENERATOR: &str = "Pagespace";

const GENERATOR_SNIPPET: &str = "\n<meta name=\"generator\" content=\"Pagespace\">";

/// Tags whose URL-bearing attribute gets rewritten.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocatableTag {
    Anchor,
    Link,
    Audio,
    Video,
    Img,
    Script,
}

const LOCATABLE_TAGS: [(&str, LocatableTag); 6] = [
    ("a", LocatableTag::Anchor),
    ("link", LocatableTag::Link),
    ("audio", LocatableTag::Audio),
    ("video", LocatableTag::Video),
    ("img", LocatableTag::Img),
    ("script", LocatableTag::Script),
];

impl LocatableTag {
    pub fn from_name(name: &str) -> Option<Self> {
        LOCATABLE_TAGS
            .iter()
            .find(|(tag, _)| tag.eq_ignore_ascii_case(name))
            .map(|(_, kind)| *kind)
    }

    pub fn attribute(self) -> &'static str {
        match self {
            LocatableTag::Anchor | LocatableTag::Link => "href",
            LocatableTag::Audio | LocatableTag::Video | LocatableTag::Img | LocatableTag::Script => {
                "src"
            }
        }
    }

    /// Anchors point at other pages, which the page list already covers.
    pub fn is_resource(self) -> bool {
        self != LocatableTag::Anchor
    }
}

/// Rewrites one page's DOM for the static tree and collects the resources it
/// references.
#[derive(Debug, Default, Clone, Copy)]
pub struct PageTransformer;

impl PageTransformer {
    pub fn transform_page(&self, page: &FetchedPage) -> TransformResult {
        let decoded = decode_html(&page.html, page.content_type.as_deref());
        self.transform(&page.url, &decoded.html)
    }

    pub fn transform(&self, page_url: &str, html: &str) -> TransformResult {
        let mut document = Html::parse_document(html);
        let mut resources = BTreeSet::new();

        let (elements, style_texts) = locate_nodes(&document);

        for id in elements {
            if let Some(mut node) = document.tree.get_mut(id) {
                if let Node::Element(element) = node.value() {
                    ps_trace!("Found element <{}>", element.name());
                    rewrite_element(element, page_url, &mut resources);
                }
            }
        }

        for id in style_texts {
            if let Some(mut node) = document.tree.get_mut(id) {
                if let Node::Text(text) = node.value() {
                    let rewritten = rewrite_css_urls(&text.text, page_url, &mut resources);
                    text.text = rewritten.into();
                }
            }
        }

        if !inject_generator(&mut document) {
            ps_debug!("Page {} has no <head>; generator tag skipped", page_url);
        }

        TransformResult {
            html: document.html(),
            resources,
        }
    }
}

/// Element nodes, and text nodes inside `<style>`, in document order.
fn locate_nodes(document: &Html) -> (Vec<NodeId>, Vec<NodeId>) {
    let mut elements = Vec::new();
    let mut style_texts = Vec::new();
    for node in document.tree.root().descendants() {
        match node.value() {
            Node::Element(_) => elements.push(node.id()),
            Node::Text(_) => {
                let in_style = node
                    .parent()
                    .and_then(|parent| parent.value().as_element())
                    .is_some_and(|parent| parent.name().eq_ignore_ascii_case("style"));
                if in_style {
                    style_texts.push(node.id());
                }
            }
            _ => {}
        }
    }
    (elements, style_texts)
}

fn rewrite_element(element: &mut Element, page_url: &str, resources: &mut BTreeSet<String>) {
    let tag_name = element.name().to_ascii_lowercase();
    let tag = LocatableTag::from_name(&tag_name);

    for (name, value) in element.attrs.iter_mut() {
        let attr_name: &str = &name.local;

        if attr_name == "style" {
            let rewritten = rewrite_css_urls(value, page_url, resources);
            *value = rewritten.into();
            continue;
        }

        let Some(tag) = tag.filter(|tag| tag.attribute() == attr_name) else {
            continue;
        };

        let original = value.to_string();
        if !is_local(&original) {
            ps_debug!("Ignoring {}[{}={}]", tag_name, attr_name, original);
            continue;
        }

        let rewritten = if tag.is_resource() {
            resources.insert(original.trim().to_string());
            to_relative(page_url, &original)
        } else {
            anchor_to_relative(page_url, &original)
        };
        ps_debug!(
            "Converting {}[{}] from {} to {}",
            tag_name,
            attr_name,
            original,
            rewritten
        );
        *value = rewritten.into();
    }
}

/// Prepend the generator snippet (whitespace, then the meta element) to
/// `<head>`. Returns `false` when the document has no head.
fn inject_generator(document: &mut Html) -> bool {
    let head = document
        .tree
        .root()
        .descendants()
        .find(|node| {
            node.value()
                .as_element()
                .is_some_and(|element| element.name().eq_ignore_ascii_case("head"))
        })
        .map(|node| node.id());
    let Some(head) = head else {
        return false;
    };

    let snippet = generator_nodes();
    let Some(mut head) = document.tree.get_mut(head) else {
        return false;
    };
    for node in snippet.into_iter().rev() {
        head.prepend(node);
    }
    true
}

fn generator_nodes() -> Vec<Node> {
    let fragment = Html::parse_fragment(GENERATOR_SNIPPET);
    let container = fragment.tree.root().children().find(|node| {
        node.value()
            .as_element()
            .is_some_and(|element| element.name() == "html")
    });
    container
        .map(|html| html.children().map(|node| node.value().clone()).collect())
        .unwrap_or_default()
}
