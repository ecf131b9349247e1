//! Markup to arena conversion.

use super::{ContentDocument, DocumentToken, Element, NodeData, NodeId, parse_inline_style};
use crate::error::Result;
use roxmltree::{Document, ParsingOptions};

/// Parse chapter markup. Fragments are wrapped in a `body` first.
pub(super) fn parse_markup(markup: &str, page: u32) -> Result<ContentDocument> {
    let trimmed = markup.trim_start();
    let is_document = trimmed.starts_with("<?xml")
        || trimmed.starts_with("<!DOCTYPE")
        || trimmed.starts_with("<!doctype")
        || trimmed.starts_with("<html")
        || trimmed.starts_with("<body");

    let wrapped;
    let source = if is_document {
        markup
    } else {
        wrapped = format!("<body>{}</body>", markup);
        wrapped.as_str()
    };

    let mut options = ParsingOptions::default();
    options.allow_dtd = true;
    let xml = Document::parse_with_options(source, options)?;

    let mut doc = ContentDocument {
        nodes: Vec::new(),
        root: NodeId(0),
        page,
        token: DocumentToken::next(),
    };

    let body = xml
        .descendants()
        .find(|n| n.is_element() && n.tag_name().name().eq_ignore_ascii_case("body"));

    match body {
        Some(body) => {
            let root = doc.alloc(NodeData::Element(convert_element(body)), None);
            doc.root = root;
            for child in body.children() {
                copy_node(&mut doc, child, root);
            }
        }
        None => {
            // No body at all: keep the whole tree under a synthetic one.
            let root = doc.alloc(NodeData::Element(Element::new("body")), None);
            doc.root = root;
            copy_node(&mut doc, xml.root_element(), root);
        }
    }

    tracing::debug!(
        page = page,
        nodes = doc.nodes.len(),
        "Parsed page markup"
    );

    Ok(doc)
}

fn convert_element(node: roxmltree::Node<'_, '_>) -> Element {
    let mut element = Element::new(node.tag_name().name());
    element.attrs = node
        .attributes()
        .map(|a| (a.name().to_string(), a.value().to_string()))
        .collect();
    element.style = parse_inline_style(element.attr("style").unwrap_or_default());
    element
}

fn copy_node(doc: &mut ContentDocument, node: roxmltree::Node<'_, '_>, parent: NodeId) {
    if node.is_element() {
        let id = doc.alloc(NodeData::Element(convert_element(node)), Some(parent));
        for child in node.children() {
            copy_node(doc, child, id);
        }
    } else if node.is_text()
        && let Some(text) = node.text()
        && !text.trim().is_empty()
    {
        doc.alloc(NodeData::Text(text.to_string()), Some(parent));
    }
}
