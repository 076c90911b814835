//! The action executor: replays a pass's recipe against the tree.
//!
//! All tree surgery happens here. Delayed values resolve on emit, against
//! the snapshots the builder recorded, so `target-*` references observe
//! the values in force when their element was walked.

use tracing::warn;

use crate::collate::LocaleCollation;
use crate::dom::{
    CLASS_GROUP_BY, CLASS_GROUP_LABEL, Node, NodeExt, new_element_with_attr,
};
use crate::state::BakingState;
use crate::value::{Action, Delayed, Location, StringValue, Target};

/// Content saved by a `clear` op, restorable by `content()` with no
/// argument.
struct SavedContent {
    text: Option<String>,
    children: Vec<Node>,
}

/// Executes one pass's action log.
pub fn execute(state: &BakingState, actions: &[Action]) {
    let mut executor = Executor {
        state,
        target: None,
        old_content: None,
        nodeset_counts: Vec::new(),
    };
    executor.run(actions);
}

struct Executor<'a> {
    state: &'a BakingState,
    target: Option<Target>,
    old_content: Option<SavedContent>,
    /// Per-source running count for `nodeset` copies.
    nodeset_counts: Vec<(Node, u32)>,
}

impl Executor<'_> {
    fn run(&mut self, actions: &[Action]) {
        for action in actions {
            self.step(action);
        }
    }

    fn target(&self) -> Option<&Target> {
        if self.target.is_none() {
            warn!("op before any target, skipping");
        }
        self.target.as_ref()
    }

    fn step(&mut self, action: &Action) {
        match action {
            Action::Target(target) => {
                self.target = Some(target.clone());
                self.old_content = None;
            }
            Action::Tag(name) => {
                if let Some(target) = self.target() {
                    target.tree.set_element_name(name.clone());
                }
            }
            Action::Clear(_) => {
                let Some(target) = self.target() else { return };
                let tree = target.tree.clone();
                let children: Vec<Node> = tree.children().collect();
                for child in &children {
                    child.clone().detach();
                }
                self.old_content = Some(SavedContent {
                    text: tree.text(),
                    children,
                });
                tree.set_text(None);
            }
            Action::Content(Some(node)) => {
                let Some(target) = self.target() else { return };
                if *node == target.tree {
                    return;
                }
                let tree = target.tree.clone();
                if let Some(text) = node.text() {
                    tree.append_text_content(&text);
                }
                let mut tree = tree;
                for child in node.children().collect::<Vec<_>>() {
                    if child == tree {
                        continue;
                    }
                    tree.append(child);
                }
            }
            Action::Content(None) => {
                let Some(target) = self.target() else { return };
                let Some(saved) = &self.old_content else {
                    return;
                };
                let mut tree = target.tree.clone();
                if let Some(text) = &saved.text {
                    tree.append_text_content(text);
                }
                for child in saved.children.clone() {
                    tree.append(child);
                }
            }
            Action::Attrib { name, value } => {
                let text = self.resolve_string(value);
                if let Some(target) = self.target() {
                    target.tree.set_attr(name.clone(), text);
                }
            }
            Action::String(value) => {
                let text = self.resolve_string(value);
                self.write_string(&text);
            }
            Action::Delayed(delayed) => {
                let text = self.resolve_delayed(delayed);
                self.write_string(&text);
            }
            Action::Move(node) => self.insert(node.clone()),
            Action::Copy(node) => {
                let copy = node.deep_copy_with_id_suffix("_copy");
                copy.set_tail(None);
                self.insert(copy);
            }
            Action::NodeSet(node) => {
                let count = self.bump_nodeset_count(node);
                let copy = node.deep_copy_with_id_suffix(&format!("_copy_{count}"));
                copy.set_tail(None);
                self.insert(copy);
            }
            Action::Drop(node) => {
                node.clone().detach();
            }
        }
    }

    fn bump_nodeset_count(&mut self, source: &Node) -> u32 {
        for (node, count) in &mut self.nodeset_counts {
            if node == source {
                *count += 1;
                return *count;
            }
        }
        self.nodeset_counts.push((source.clone(), 1));
        1
    }

    /// Appends resolved text onto the target, or prepends for `before`
    /// targets.
    fn write_string(&mut self, text: &str) {
        let Some(target) = self.target() else { return };
        if target.location == Location::Before {
            target.tree.prepend_text_content(text);
        } else {
            target.tree.append_text_content(text);
        }
    }

    fn resolve_string(&self, value: &StringValue) -> String {
        match value {
            StringValue::Text(text) => text.clone(),
            StringValue::Delayed(delayed) => self.resolve_delayed(delayed),
            StringValue::List(parts) => {
                parts.iter().map(|part| self.resolve_string(part)).collect()
            }
        }
    }

    fn resolve_delayed(&self, delayed: &Delayed) -> String {
        match delayed {
            Delayed::TargetCounter { id, name, style } => {
                style.format(self.state.lookup_counter(name, Some(id)))
            }
            Delayed::TargetText { id, name } => self.state.lookup_string(name, Some(id)),
            Delayed::Chain { base, map } => map.apply(&self.resolve_delayed(base)),
        }
    }

    /// Inserts `node` into the current target per its sort/group settings
    /// and location.
    fn insert(&mut self, node: Node) {
        let Some(target) = self.target().cloned() else {
            return;
        };
        detach_tail(&node);

        let lang = target.lang.as_deref();
        if target.isgroup
            && target
                .sort
                .as_ref()
                .is_some_and(|sort| sort.extract(&node, lang).is_some())
        {
            let sort = target.sort.as_ref().expect("checked above");
            if let Some(groupby) = &target.groupby {
                insert_labelled_group(&target.tree, node, sort, groupby, lang);
            } else {
                insert_grouped(&target.tree, node, sort, lang);
            }
            return;
        }
        if let Some(sort) = &target.sort {
            if sort.extract(&node, lang).is_some() {
                insert_sorted(&target.tree, node, sort, lang);
                return;
            }
        }

        let mut tree = target.tree.clone();
        match target.location {
            Location::Inside => {
                // the wrapper adopts the current children, then becomes the
                // sole child
                let mut node = node;
                for child in tree.children().collect::<Vec<_>>() {
                    node.append(child);
                }
                tree.append(node);
            }
            Location::Outside => {
                if tree.parent().is_some() {
                    node.set_tail(tree.tail());
                    tree.set_tail(None);
                    let mut node = node;
                    tree.insert_before(node.clone());
                    tree.detach();
                    node.append(tree);
                } else {
                    let mut node = node;
                    node.append(tree);
                }
            }
            Location::Before => {
                node.set_tail(tree.text());
                tree.set_text(None);
                tree.prepend(node);
            }
            Location::None | Location::After => tree.append(node),
        }
    }
}

/// Re-attaches `node`'s trailing text to whatever precedes it before the
/// node is moved away.
fn detach_tail(node: &Node) {
    let Some(tail) = node.tail() else { return };
    if node.parent().is_some() {
        match node.previous_sibling() {
            Some(prev) => {
                let mut data = prev.borrow_mut();
                match data.tail.as_mut() {
                    Some(existing) => existing.push_str(&tail),
                    None => data.tail = Some(tail),
                }
            }
            None => {
                if let Some(parent) = node.parent() {
                    parent.prepend_text_content(&tail);
                }
            }
        }
    }
    node.set_tail(None);
}

fn has_class(node: &Node, class: &str) -> bool {
    node.attr_local("class")
        .is_some_and(|classes| classes.split_whitespace().any(|c| c == class))
}

/// The key a group wrapper carries: the text of its label span.
fn group_label_text(group: &Node) -> Option<String> {
    group
        .children()
        .find(|child| has_class(child, CLASS_GROUP_LABEL))
        .and_then(|label| label.text())
}

fn create_group(label: Option<&str>) -> Node {
    let group = new_element_with_attr("div", "class", CLASS_GROUP_BY);
    let span = new_element_with_attr("span", "class", CLASS_GROUP_LABEL);
    span.set_text(label.map(ToOwned::to_owned));
    let mut group_handle = group.clone();
    group_handle.append(span);
    group
}

/// Inserts into labelled `div.group-by` wrappers: an equal label key
/// descends into that group, a greater one opens a new group before it,
/// otherwise a new group goes at the end.
fn insert_labelled_group(
    tree: &Node,
    node: Node,
    sort: &crate::collate::KeyExtractor,
    groupby: &crate::collate::KeyExtractor,
    lang: Option<&str>,
) {
    let node_key = groupby.extract(&node, lang);
    let collation = LocaleCollation::new(lang);
    for child in tree.children().collect::<Vec<_>>() {
        if !has_class(&child, CLASS_GROUP_BY) {
            continue;
        }
        let child_key = group_label_text(&child);
        match collation.compare(child_key.as_deref(), node_key.as_deref()) {
            std::cmp::Ordering::Equal => {
                insert_grouped(&child, node, sort, lang);
                return;
            }
            std::cmp::Ordering::Greater => {
                let mut group = create_group(node_key.as_deref());
                group.append(node);
                let mut child = child;
                child.insert_before(group);
                return;
            }
            std::cmp::Ordering::Less => {}
        }
    }
    let mut group = create_group(node_key.as_deref());
    group.append(node);
    let mut tree = tree.clone();
    tree.append(group);
}

/// Sorted insert that accumulates on equal keys: the incoming node's
/// children after the first merge into the existing entry.
fn insert_grouped(
    container: &Node,
    node: Node,
    sort: &crate::collate::KeyExtractor,
    lang: Option<&str>,
) {
    let node_key = sort.extract(&node, lang);
    let collation = LocaleCollation::new(lang);
    for child in container.children().collect::<Vec<_>>() {
        let child_key = sort.extract(&child, lang);
        match collation.compare(child_key.as_deref(), node_key.as_deref()) {
            std::cmp::Ordering::Equal => {
                let mut child = child;
                for extra in node.children().collect::<Vec<_>>().into_iter().skip(1) {
                    child.append(extra);
                }
                return;
            }
            std::cmp::Ordering::Greater => {
                let mut child = child;
                child.insert_before(node);
                return;
            }
            std::cmp::Ordering::Less => {}
        }
    }
    let mut container = container.clone();
    container.append(node);
}

/// Plain sorted insert under the target's collator.
fn insert_sorted(
    container: &Node,
    node: Node,
    sort: &crate::collate::KeyExtractor,
    lang: Option<&str>,
) {
    let node_key = sort.extract(&node, lang);
    let collation = LocaleCollation::new(lang);
    for child in container.children().collect::<Vec<_>>() {
        let child_key = sort.extract(&child, lang);
        if collation.compare(child_key.as_deref(), node_key.as_deref())
            == std::cmp::Ordering::Greater
        {
            let mut child = child;
            child.insert_before(node);
            return;
        }
    }
    let mut container = container.clone();
    container.append(node);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collate::KeyExtractor;
    use crate::dom::{find_by_id, new_element};
    use crate::html::{parse_str, serialize_to_string};
    use std::collections::HashMap;

    fn exec(state: &BakingState, actions: Vec<Action>) {
        execute(state, &actions);
    }

    fn target_for(node: &Node) -> Target {
        Target::element(node.clone(), None)
    }

    #[test]
    fn move_before_inherits_head_text() {
        let state = BakingState::new(&["default".to_owned()]);
        let doc = parse_str("<div id=\"d\">head<span id=\"s\">x</span></div>");
        let d = find_by_id(&doc.root, "d").unwrap();
        let moved = new_element("p");

        let mut target = target_for(&d);
        target.location = Location::Before;
        exec(&state, vec![Action::Target(target), Action::Move(moved)]);

        // the head text becomes the spliced node's tail
        assert_eq!(
            serialize_to_string(&d),
            "<div id=\"d\"><p></p>head<span id=\"s\">x</span></div>"
        );
    }

    #[test]
    fn copy_suffixes_ids_and_clears_tail() {
        let state = BakingState::new(&["default".to_owned()]);
        let doc = parse_str("<div id=\"src\">x</div><div id=\"dst\"></div>");
        let src = find_by_id(&doc.root, "src").unwrap();
        let dst = find_by_id(&doc.root, "dst").unwrap();

        exec(
            &state,
            vec![Action::Target(target_for(&dst)), Action::Copy(src.clone())],
        );
        assert_eq!(
            serialize_to_string(&dst),
            "<div id=\"dst\"><div id=\"src_copy\">x</div></div>"
        );
        // the original stays in place
        assert!(src.parent().is_some());
    }

    #[test]
    fn nodeset_counts_per_source() {
        let state = BakingState::new(&["default".to_owned()]);
        let doc = parse_str("<div id=\"src\"></div><div id=\"dst\"></div>");
        let src = find_by_id(&doc.root, "src").unwrap();
        let dst = find_by_id(&doc.root, "dst").unwrap();

        exec(
            &state,
            vec![
                Action::Target(target_for(&dst)),
                Action::NodeSet(src.clone()),
                Action::NodeSet(src.clone()),
            ],
        );
        let html = serialize_to_string(&dst);
        assert!(html.contains("id=\"src_copy_1\""), "got {html}");
        assert!(html.contains("id=\"src_copy_2\""), "got {html}");
    }

    #[test]
    fn clear_then_content_restores() {
        let state = BakingState::new(&["default".to_owned()]);
        let doc = parse_str("<div id=\"d\">text<span>kid</span></div>");
        let d = find_by_id(&doc.root, "d").unwrap();

        exec(
            &state,
            vec![
                Action::Target(target_for(&d)),
                Action::Clear(d.clone()),
                Action::String(StringValue::Text("new ".to_owned())),
                Action::Content(None),
            ],
        );
        assert_eq!(
            serialize_to_string(&d),
            "<div id=\"d\">new text<span>kid</span></div>"
        );
    }

    #[test]
    fn sorted_insert_is_non_decreasing() {
        let state = BakingState::new(&["default".to_owned()]);
        let doc = parse_str("<ul id=\"u\"></ul>");
        let u = find_by_id(&doc.root, "u").unwrap();
        let sort = KeyExtractor::compile("li", false, &HashMap::new()).unwrap();

        let mut target = target_for(&u);
        target.sort = Some(sort);
        let mk = |text: &str| {
            let li = new_element("li");
            li.set_text(Some(text.to_owned()));
            li
        };
        exec(
            &state,
            vec![
                Action::Target(target),
                Action::Move(mk("pear")),
                Action::Move(mk("apple")),
                Action::Move(mk("Banana")),
            ],
        );
        assert_eq!(
            serialize_to_string(&u),
            "<ul id=\"u\"><li>apple</li><li>Banana</li><li>pear</li></ul>"
        );
    }

    #[test]
    fn outside_wraps_in_place() {
        let state = BakingState::new(&["default".to_owned()]);
        let doc = parse_str("<div id=\"p\"><section id=\"s\">x</section>tail</div>");
        let s = find_by_id(&doc.root, "s").unwrap();
        let p = find_by_id(&doc.root, "p").unwrap();

        let wrapper = new_element("aside");
        let mut target = target_for(&s);
        target.location = Location::Outside;
        exec(&state, vec![Action::Target(target), Action::Move(wrapper)]);

        assert_eq!(
            serialize_to_string(&p),
            "<div id=\"p\"><aside><section id=\"s\">x</section></aside>tail</div>"
        );
    }

    #[test]
    fn inside_wraps_children() {
        let state = BakingState::new(&["default".to_owned()]);
        let doc = parse_str("<div id=\"d\"><em>a</em><em>b</em></div>");
        let d = find_by_id(&doc.root, "d").unwrap();

        let wrapper = new_element("span");
        let mut target = target_for(&d);
        target.location = Location::Inside;
        exec(&state, vec![Action::Target(target), Action::Move(wrapper)]);

        assert_eq!(
            serialize_to_string(&d),
            "<div id=\"d\"><span><em>a</em><em>b</em></span></div>"
        );
    }

    #[test]
    fn labelled_groups_in_order() {
        let state = BakingState::new(&["default".to_owned()]);
        let doc = parse_str("<div id=\"idx\"></div>");
        let idx = find_by_id(&doc.root, "idx").unwrap();
        let namespaces = HashMap::new();
        let sort = KeyExtractor::compile(".term", false, &namespaces).unwrap();
        let groupby = KeyExtractor::compile(".term::first-letter", true, &namespaces).unwrap();

        let mut target = target_for(&idx);
        target.sort = Some(sort);
        target.isgroup = true;
        target.groupby = Some(groupby);
        target.lang = Some("en".to_owned());

        let mk = |term: &str| {
            let item = parse_str(&format!(
                "<div class=\"item\"><span class=\"term\">{term}</span></div>"
            ));
            let item = item
                .root
                .descendants()
                .find(|n| has_class(n, "item"))
                .unwrap();
            item.clone().detach();
            item
        };
        exec(
            &state,
            vec![
                Action::Target(target),
                Action::Move(mk("apple")),
                Action::Move(mk("Banana")),
                Action::Move(mk("almond")),
            ],
        );

        let html = serialize_to_string(&idx);
        let a = html.find("group-label\">A<").expect("group A exists");
        let b = html.find("group-label\">B<").expect("group B exists");
        assert!(a < b, "A group precedes B: {html}");
        let almond = html.find("almond").unwrap();
        let apple = html.find("apple").unwrap();
        assert!(almond < apple, "collation puts almond first: {html}");
    }
}
