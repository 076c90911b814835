//! HTML ingestion and serialization.
//!
//! Parsing is delegated to html5ever; the resulting rcdom tree is folded
//! into the element-only [`crate::dom`] representation, merging character
//! data into `text`/`tail` runs. Serialization is a straightforward walk
//! that writes HTML5 with the standard escaping rules.

use std::io::{self, Read, Write};

use html5ever::tendril::TendrilSink;
use html5ever::{ParseOpts, parse_document};
use markup5ever_rcdom::{Handle, NodeData, RcDom};

use crate::dom::{ElementData, Node, NodeExt};

/// A parsed document: the root element plus whether the source carried a
/// doctype.
#[derive(Debug)]
pub struct Document {
    pub root: Node,
    pub has_doctype: bool,
}

/// Parses an HTML document from a byte stream.
pub fn parse(reader: &mut impl Read) -> io::Result<Document> {
    let dom: RcDom = parse_document(RcDom::default(), ParseOpts::default())
        .from_utf8()
        .read_from(reader)?;
    Ok(from_rcdom(&dom))
}

/// Parses an HTML document from a string. Used heavily by tests.
pub fn parse_str(html: &str) -> Document {
    let mut bytes = html.as_bytes();
    parse(&mut bytes).expect("reading from a byte slice cannot fail")
}

fn from_rcdom(dom: &RcDom) -> Document {
    let mut has_doctype = false;
    let mut root = None;
    for child in dom.document.children.borrow().iter() {
        match child.data {
            NodeData::Doctype { .. } => has_doctype = true,
            NodeData::Element { .. } => {
                if root.is_none() {
                    root = Some(convert_element(child));
                }
            }
            _ => {}
        }
    }
    Document {
        // parse_document always produces an html element, but stay total
        root: root.unwrap_or_else(|| crate::dom::new_element("html")),
        has_doctype,
    }
}

fn convert_element(handle: &Handle) -> Node {
    let NodeData::Element { name, attrs, .. } = &handle.data else {
        unreachable!("convert_element is only called on element nodes");
    };
    let mut data = ElementData::new(name.clone());
    for attr in attrs.borrow().iter() {
        data.attrs.insert(attr.name.clone(), attr.value.to_string());
    }
    let mut node = Node::new(data);

    for child in handle.children.borrow().iter() {
        match &child.data {
            NodeData::Text { contents } => {
                let text = contents.borrow().to_string();
                node.append_text_content(&text);
            }
            NodeData::Element { .. } => {
                node.append(convert_element(child));
            }
            // comments, processing instructions and nested doctypes carry
            // nothing the oven operates on
            _ => {}
        }
    }
    node
}

/// Serializes a document, doctype first when the source had one.
pub fn serialize(doc: &Document, out: &mut impl Write) -> io::Result<()> {
    if doc.has_doctype {
        out.write_all(b"<!DOCTYPE html>\n")?;
    }
    write_element(&doc.root, out)?;
    out.write_all(b"\n")
}

/// Serializes a subtree to a string, tail excluded. Used by tests.
pub fn serialize_to_string(node: &Node) -> String {
    let mut out = Vec::new();
    write_element(node, &mut out).expect("writing to a Vec cannot fail");
    String::from_utf8(out).expect("serializer emits UTF-8")
}

fn write_element(node: &Node, out: &mut impl Write) -> io::Result<()> {
    let name = qualified_name(node);
    write!(out, "<{name}")?;
    {
        let data = node.borrow();
        for (attr_name, value) in &data.attrs {
            let attr = match &attr_name.prefix {
                Some(prefix) => format!("{}:{}", prefix, attr_name.local),
                None => attr_name.local.to_string(),
            };
            write!(out, " {}=\"{}\"", attr, escape_attr(value))?;
        }
    }
    if node.is_void() && !node.has_children() && node.text().is_none() {
        return write!(out, ">");
    }
    write!(out, ">")?;

    let raw_text = matches!(name.as_str(), "script" | "style");
    if let Some(text) = node.text() {
        if raw_text {
            write!(out, "{text}")?;
        } else {
            write!(out, "{}", escape_text(&text))?;
        }
    }
    for child in node.children() {
        write_element(&child, out)?;
        if let Some(tail) = child.tail() {
            write!(out, "{}", escape_text(&tail))?;
        }
    }
    write!(out, "</{name}>")
}

fn qualified_name(node: &Node) -> String {
    let data = node.borrow();
    match &data.name.prefix {
        Some(prefix) => format!("{}:{}", prefix, data.name.local),
        None => data.name.local.to_string(),
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

fn escape_attr(value: &str) -> String {
    value.replace('&', "&amp;").replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_runs_are_merged_into_text_and_tail() {
        let doc = parse_str("<div id=\"d\">head<span>in</span>tail</div>");
        let div = crate::dom::find_by_id(&doc.root, "d").unwrap();
        assert_eq!(div.text(), Some("head".to_owned()));
        let span = div.first_child().unwrap();
        assert_eq!(span.text(), Some("in".to_owned()));
        assert_eq!(span.tail(), Some("tail".to_owned()));
    }

    #[test]
    fn round_trip_keeps_structure() {
        let doc = parse_str("<p class=\"x\">a<br>b</p>");
        let html = serialize_to_string(&doc.root);
        assert!(html.contains("<p class=\"x\">a<br>b</p>"), "got: {html}");
    }

    #[test]
    fn text_is_escaped_but_attrs_keep_angle_brackets() {
        let doc = parse_str("<p title=\"a&quot;b\">1 &lt; 2</p>");
        let html = serialize_to_string(&doc.root);
        assert!(html.contains("1 &lt; 2"), "got: {html}");
        assert!(html.contains("title=\"a&quot;b\""), "got: {html}");
    }
}
