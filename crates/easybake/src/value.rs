//! Typed values flowing between declarations, the action log and the
//! executor.
//!
//! Two value types are visible to declarations: strings and document
//! fragments. Strings may embed [`Delayed`] parts whose resolution needs
//! snapshots that only exist once the referenced element has been walked;
//! fragments are lists of ops that the executor replays against the tree.

use markup5ever::QualName;

use crate::collate::KeyExtractor;
use crate::counters::CounterStyle;
use crate::dom::{Node, NodeExt};

/// Where a target writes relative to its tree node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Location {
    #[default]
    None,
    Before,
    After,
    Inside,
    Outside,
}

/// Destination descriptor for append/move ops: the node written into, the
/// write position, and the sorting/grouping configuration picked up from
/// `sort-by`/`group-by` declarations.
#[derive(Debug, Clone)]
pub struct Target {
    pub tree: Node,
    pub location: Location,
    /// The element a wrapper target hangs off; the element itself otherwise.
    pub parent: Option<Node>,
    /// Key extractor ordering children under this target.
    pub sort: Option<KeyExtractor>,
    pub isgroup: bool,
    /// Key extractor producing group labels (and keying group wrappers).
    pub groupby: Option<KeyExtractor>,
    /// Language driving locale-aware comparison of keys.
    pub lang: Option<String>,
}

impl Target {
    pub fn element(tree: Node, lang: Option<String>) -> Self {
        Self {
            tree,
            location: Location::None,
            parent: None,
            sort: None,
            isgroup: false,
            groupby: None,
            lang,
        }
    }
}

/// A value whose resolution is deferred until the executor runs, when the
/// per-id snapshots referenced by `target-*` functions are available.
#[derive(Debug, Clone)]
pub enum Delayed {
    /// Snapshot of a counter taken when the element with `id` was walked.
    TargetCounter {
        id: String,
        name: String,
        style: CounterStyle,
    },
    /// Snapshot of a named string from the element with `id`.
    TargetText { id: String, name: String },
    /// A function mapped over another delayed value; the base resolves
    /// first, then the map is applied to the native result.
    Chain { base: Box<Delayed>, map: MapFn },
}

/// Named mappings usable inside [`Delayed::Chain`]. Kept as data so the
/// executor can resolve chains without captured closures.
#[derive(Debug, Clone, Copy)]
pub enum MapFn {
    FirstLetter,
}

impl MapFn {
    pub fn apply(self, text: &str) -> String {
        match self {
            Self::FirstLetter => text.chars().next().map(String::from).unwrap_or_default(),
        }
    }
}

/// A string value: immediate text, a delayed part, or a concatenation.
#[derive(Debug, Clone)]
pub enum StringValue {
    Text(String),
    Delayed(Delayed),
    List(Vec<StringValue>),
}

impl StringValue {
    pub fn empty() -> Self {
        Self::Text(String::new())
    }

    /// An immediate value can be resolved without the oven and always
    /// resolves to the same text.
    pub fn is_immediate(&self) -> bool {
        match self {
            Self::Text(_) => true,
            Self::Delayed(_) => false,
            Self::List(parts) => parts.iter().all(Self::is_immediate),
        }
    }

    /// Resolves without oven context; `None` if any part is delayed.
    pub fn immediate_text(&self) -> Option<String> {
        match self {
            Self::Text(text) => Some(text.clone()),
            Self::Delayed(_) => None,
            Self::List(parts) => {
                let mut out = String::new();
                for part in parts {
                    out.push_str(&part.immediate_text()?);
                }
                Some(out)
            }
        }
    }
}

/// Lifts an element into a string value: its whole text content.
pub fn string_from_node(node: &Node) -> StringValue {
    StringValue::Text(node.text_content())
}

/// What a fragment op does with the node it carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FragmentAction {
    Move,
    Content,
    NodeSet,
}

/// Construction flags for a document-fragment value, chosen by the
/// `content` handler from the pseudo-label it runs under.
#[derive(Debug, Clone, Copy)]
pub struct FragmentFlags {
    /// Copy the element before emitting.
    pub needs_copy: bool,
    pub action: FragmentAction,
    /// Whether nodes are carried in the emitted op or left out.
    pub include_nodes: bool,
}

/// The destination type an expression evaluates into.
#[derive(Debug, Clone, Copy)]
pub enum Dest {
    String,
    Fragment(FragmentFlags),
}

/// An evaluated expression.
#[derive(Debug, Clone)]
pub enum Value {
    String(StringValue),
    Fragment(Vec<Action>),
}

impl Value {
    pub fn default_for(dest: Dest) -> Self {
        match dest {
            Dest::String => Self::String(StringValue::empty()),
            Dest::Fragment(_) => Self::Fragment(Vec::new()),
        }
    }
}

/// Lifts an element into fragment ops according to the fragment flags.
pub fn lift_node(node: &Node, flags: FragmentFlags) -> Vec<Action> {
    if !flags.include_nodes {
        return vec![Action::Content(None)];
    }
    if flags.needs_copy {
        return vec![Action::Content(Some(node.deep_copy_with_id_suffix("_copy")))];
    }
    match flags.action {
        FragmentAction::Move => vec![Action::Move(node.clone())],
        FragmentAction::Content => vec![Action::Content(Some(node.clone()))],
        FragmentAction::NodeSet => vec![Action::NodeSet(node.clone())],
    }
}

/// One record of the action log: produced by the recipe builder, consumed
/// by the executor. Pending buckets hold the node-carrying subset.
#[derive(Debug, Clone)]
pub enum Action {
    /// Switch the current target.
    Target(Target),
    /// Rename the current target's root.
    Tag(QualName),
    /// Save and clear the current target's text and children.
    Clear(Node),
    /// Append an element's text and children onto the target, or restore
    /// the content saved by the last `Clear` when `None`.
    Content(Option<Node>),
    /// Resolve and set an attribute on the target.
    Attrib { name: QualName, value: StringValue },
    /// Resolve and append (or prepend, for `before` targets) text.
    String(StringValue),
    /// Insert the node into the target.
    Move(Node),
    /// Insert a deep copy (ids suffixed `_copy`).
    Copy(Node),
    /// Insert a numbered deep copy (ids suffixed `_copy_N`).
    NodeSet(Node),
    /// Remove the node from its parent.
    Drop(Node),
    /// Resolve into further ops and process them in place.
    Delayed(Delayed),
}

impl Action {
    /// The node an op carries, for ops that do.
    pub fn node(&self) -> Option<&Node> {
        match self {
            Self::Move(node) | Self::Copy(node) | Self::NodeSet(node) | Self::Drop(node) => {
                Some(node)
            }
            Self::Content(node) => node.as_ref(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::new_element_with_attr;

    #[test]
    fn immediate_detection() {
        let delayed = StringValue::Delayed(Delayed::TargetText {
            id: "x".into(),
            name: "title".into(),
        });
        assert!(!delayed.is_immediate());
        let list = StringValue::List(vec![StringValue::Text("a".into()), delayed]);
        assert!(!list.is_immediate());
        assert_eq!(list.immediate_text(), None);

        let flat = StringValue::List(vec![
            StringValue::Text("a".into()),
            StringValue::Text("b".into()),
        ]);
        assert_eq!(flat.immediate_text(), Some("ab".into()));
    }

    #[test]
    fn lifting_respects_flags() {
        let node = new_element_with_attr("div", "id", "n");
        let dropped = lift_node(
            &node,
            FragmentFlags {
                needs_copy: false,
                action: FragmentAction::Content,
                include_nodes: false,
            },
        );
        assert!(matches!(dropped.as_slice(), [Action::Content(None)]));

        let copied = lift_node(
            &node,
            FragmentFlags {
                needs_copy: true,
                action: FragmentAction::Content,
                include_nodes: true,
            },
        );
        let [Action::Content(Some(copy))] = copied.as_slice() else {
            panic!("expected a content op");
        };
        assert_eq!(copy.id().as_deref(), Some("n_copy"));

        let moved = lift_node(
            &node,
            FragmentFlags {
                needs_copy: false,
                action: FragmentAction::Move,
                include_nodes: true,
            },
        );
        let [Action::Move(same)] = moved.as_slice() else {
            panic!("expected a move op");
        };
        assert!(*same == node);
    }
}
