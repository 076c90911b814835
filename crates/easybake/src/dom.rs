//! The document tree the oven mutates.
//!
//! Only elements are tree nodes. Character data is kept lxml-style on the
//! element itself: `text` is the run of text before the first child element,
//! `tail` is the run of text between this element's end tag and the next
//! sibling. This makes the splice rules for moving nodes around (inheriting
//! head text, re-attaching tails) direct field shuffles instead of sibling
//! bookkeeping over dedicated text nodes.

use indexmap::IndexMap;
use markup5ever::{LocalName, QualName, namespace_url, ns};

/// A node in the baked document. Cloning is cheap and yields another handle
/// to the same underlying element.
pub type Node = rctree::Node<ElementData>;

/// Element names and ids that are significant to the engine.
pub const CLASS_GROUP_BY: &str = "group-by";
pub const CLASS_GROUP_LABEL: &str = "group-label";

/// Elements that serialize without a closing tag and may not have content.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta",
    "source", "track", "wbr",
];

/// Payload of a tree node: a qualified name, ordered attributes, and the two
/// adjacent text runs.
#[derive(Debug, Clone)]
pub struct ElementData {
    pub name: QualName,
    pub attrs: IndexMap<QualName, String>,
    pub text: Option<String>,
    pub tail: Option<String>,
}

impl ElementData {
    pub fn new(name: QualName) -> Self {
        Self {
            name,
            attrs: IndexMap::new(),
            text: None,
            tail: None,
        }
    }
}

/// Builds a [`QualName`] in the null namespace.
pub fn local_qname(name: &str) -> QualName {
    QualName::new(None, ns!(), LocalName::from(name))
}

/// Creates a detached element in the null namespace.
pub fn new_element(name: &str) -> Node {
    Node::new(ElementData::new(local_qname(name)))
}

/// Creates a detached element with a single attribute preset.
pub fn new_element_with_attr(name: &str, attr: &str, value: &str) -> Node {
    let node = new_element(name);
    node.borrow_mut()
        .attrs
        .insert(local_qname(attr), value.to_owned());
    node
}

/// Convenience accessors over [`Node`]. All of them copy data out so no
/// borrow is held across tree surgery.
pub trait NodeExt {
    fn element_name(&self) -> QualName;
    fn set_element_name(&self, name: QualName);
    fn attr(&self, name: &QualName) -> Option<String>;
    fn attr_local(&self, name: &str) -> Option<String>;
    fn set_attr(&self, name: QualName, value: String);
    fn id(&self) -> Option<String>;
    fn text(&self) -> Option<String>;
    fn set_text(&self, text: Option<String>);
    fn tail(&self) -> Option<String>;
    fn set_tail(&self, tail: Option<String>);
    fn append_text_content(&self, text: &str);
    fn prepend_text_content(&self, text: &str);
    fn text_content(&self) -> String;
    fn has_children(&self) -> bool;
    fn is_void(&self) -> bool;
    fn inherited_lang(&self) -> Option<String>;
    fn deep_copy_with_id_suffix(&self, suffix: &str) -> Node;
}

impl NodeExt for Node {
    fn element_name(&self) -> QualName {
        self.borrow().name.clone()
    }

    fn set_element_name(&self, name: QualName) {
        self.borrow_mut().name = name;
    }

    fn attr(&self, name: &QualName) -> Option<String> {
        self.borrow().attrs.get(name).cloned()
    }

    fn attr_local(&self, name: &str) -> Option<String> {
        self.attr(&local_qname(name))
    }

    fn set_attr(&self, name: QualName, value: String) {
        self.borrow_mut().attrs.insert(name, value);
    }

    fn id(&self) -> Option<String> {
        self.attr_local("id")
    }

    fn text(&self) -> Option<String> {
        self.borrow().text.clone()
    }

    fn set_text(&self, text: Option<String>) {
        self.borrow_mut().text = text;
    }

    fn tail(&self) -> Option<String> {
        self.borrow().tail.clone()
    }

    fn set_tail(&self, tail: Option<String>) {
        self.borrow_mut().tail = tail;
    }

    /// Appends a string to this element's character data: onto `text` when
    /// the element has no children, otherwise onto the last child's `tail`.
    fn append_text_content(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        match self.last_child() {
            Some(last) => {
                let mut data = last.borrow_mut();
                match data.tail.as_mut() {
                    Some(tail) => tail.push_str(text),
                    None => data.tail = Some(text.to_owned()),
                }
            }
            None => {
                let mut data = self.borrow_mut();
                match data.text.as_mut() {
                    Some(t) => t.push_str(text),
                    None => data.text = Some(text.to_owned()),
                }
            }
        }
    }

    /// Appends a string to this element's leading `text` run.
    fn prepend_text_content(&self, text: &str) {
        if text.is_empty() {
            return;
        }
        let mut data = self.borrow_mut();
        match data.text.as_mut() {
            Some(t) => t.push_str(text),
            None => data.text = Some(text.to_owned()),
        }
    }

    /// The concatenated character data of the whole subtree, in document
    /// order.
    fn text_content(&self) -> String {
        let mut out = String::new();
        if let Some(text) = self.text() {
            out.push_str(&text);
        }
        for child in self.children() {
            out.push_str(&child.text_content());
            if let Some(tail) = child.tail() {
                out.push_str(&tail);
            }
        }
        out
    }

    fn has_children(&self) -> bool {
        self.first_child().is_some()
    }

    fn is_void(&self) -> bool {
        let data = self.borrow();
        data.name.ns == ns!() && VOID_ELEMENTS.contains(&data.name.local.as_ref())
    }

    /// The nearest `lang` (or `xml:lang`) attribute on this element or an
    /// ancestor.
    fn inherited_lang(&self) -> Option<String> {
        let lang = local_qname("lang");
        let xml_lang = QualName::new(None, ns!(xml), LocalName::from("lang"));
        let mut cursor = Some(self.clone());
        while let Some(node) = cursor {
            if let Some(value) = node.attr(&lang).or_else(|| node.attr(&xml_lang)) {
                return Some(value);
            }
            cursor = node.parent();
        }
        None
    }

    /// Deep-copies the subtree, rewriting every `id` attribute by appending
    /// `suffix` so the copy never duplicates identifiers from the source.
    fn deep_copy_with_id_suffix(&self, suffix: &str) -> Node {
        let copy = deep_copy(self);
        let id_name = local_qname("id");
        for node in copy.descendants() {
            let mut data = node.borrow_mut();
            if let Some(id) = data.attrs.get_mut(&id_name) {
                id.push_str(suffix);
            }
        }
        copy
    }
}

/// Structural clone of a subtree; the copy is detached.
fn deep_copy(node: &Node) -> Node {
    let mut copy = Node::new(node.borrow().clone());
    for child in node.children() {
        copy.append(deep_copy(&child));
    }
    copy
}

/// Finds the element with the given id within `root`'s subtree.
pub fn find_by_id(root: &Node, id: &str) -> Option<Node> {
    root.descendants().find(|node| node.id().as_deref() == Some(id))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_text_goes_to_tail_of_last_child() {
        let parent = new_element("div");
        parent.append_text_content("head");
        assert_eq!(parent.text(), Some("head".to_owned()));

        let mut parent_handle = parent.clone();
        parent_handle.append(new_element("span"));
        parent.append_text_content(" tail");
        assert_eq!(parent.text(), Some("head".to_owned()));
        assert_eq!(
            parent.first_child().unwrap().tail(),
            Some(" tail".to_owned())
        );
    }

    #[test]
    fn deep_copy_rewrites_every_id() {
        let root = new_element_with_attr("div", "id", "a");
        let mut root_handle = root.clone();
        let child = new_element_with_attr("p", "id", "b");
        root_handle.append(child);

        let copy = root.deep_copy_with_id_suffix("_copy");
        assert_eq!(copy.id(), Some("a_copy".to_owned()));
        assert_eq!(copy.first_child().unwrap().id(), Some("b_copy".to_owned()));
        // the source is untouched
        assert_eq!(root.id(), Some("a".to_owned()));
    }

    #[test]
    fn lang_is_inherited_from_ancestors() {
        let root = new_element_with_attr("html", "lang", "de");
        let mut root_handle = root.clone();
        let child = new_element("p");
        root_handle.append(child.clone());
        assert_eq!(child.inherited_lang(), Some("de".to_owned()));
    }

    #[test]
    fn text_content_walks_subtree_in_order() {
        let root = new_element("div");
        root.set_text(Some("a".to_owned()));
        let span = new_element("span");
        span.set_text(Some("b".to_owned()));
        span.set_tail(Some("c".to_owned()));
        let mut root_handle = root.clone();
        root_handle.append(span);
        assert_eq!(root.text_content(), "abc");
    }
}
