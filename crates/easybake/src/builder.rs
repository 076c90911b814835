//! The recipe builder: a depth-first walk matching rules against each
//! element and dispatching declarations, emitting the pass's action log.
//!
//! Building never mutates the document tree. Wrapper targets (for the
//! `::before`/`::after`/`::inside`/`::outside` labels) are created as
//! detached elements; their `target / move / target` prologue is only
//! emitted once a declaration actually produces an op, so an idle wrapper
//! leaves no trace in the log.

use std::collections::HashMap;

use markup5ever::Namespace;

use crate::collate::KeyExtractor;
use crate::css::{Label, RuleMatch, RuleSet};
use crate::decl;
use crate::dom::{Node, NodeExt, new_element};
use crate::oven::{Coverage, IdGenerator};
use crate::state::BakingState;
use crate::value::{Action, Location, Target};

/// The stack entry for the target declarations currently write into.
struct PendingTarget {
    target: Target,
    /// For wrappers: the element the wrapper hangs off and the position it
    /// will take there.
    origin: Option<(Node, Location)>,
    emitted: bool,
}

/// Shared mutable context of one pass's build.
pub struct BuildCtx<'a> {
    pub state: &'a mut BakingState,
    pub namespaces: &'a HashMap<String, Namespace>,
    pub ids: &'a mut IdGenerator,
    pub coverage: &'a mut Coverage,
    targets: Vec<PendingTarget>,
}

impl<'a> BuildCtx<'a> {
    pub fn new(
        state: &'a mut BakingState,
        namespaces: &'a HashMap<String, Namespace>,
        ids: &'a mut IdGenerator,
        coverage: &'a mut Coverage,
    ) -> Self {
        Self {
            state,
            namespaces,
            ids,
            coverage,
            targets: Vec::new(),
        }
    }

    fn target_lang(&self, element: &Node) -> Option<String> {
        element.inherited_lang().or_else(|| self.state.lang.clone())
    }

    fn push_element_target(&mut self, element: &Node) {
        let lang = self.target_lang(element);
        self.targets.push(PendingTarget {
            target: Target::element(element.clone(), lang),
            origin: None,
            emitted: false,
        });
    }

    fn push_wrapper_target(&mut self, element: &Node, location: Location) {
        let wrapper = new_element("div");
        let lang = self.target_lang(element);
        self.targets.push(PendingTarget {
            target: Target {
                tree: wrapper,
                location: Location::None,
                parent: Some(element.clone()),
                sort: None,
                isgroup: false,
                groupby: None,
                lang,
            },
            origin: Some((element.clone(), location)),
            emitted: false,
        });
    }

    fn pop_target(&mut self) {
        self.targets.pop();
    }

    /// The node ops currently write into (wrapper or the element itself).
    pub fn target_tree(&self) -> Node {
        self.targets
            .last()
            .expect("a target is pushed while declarations run")
            .target
            .tree
            .clone()
    }

    /// Emits the target prologue if this target has not produced ops yet:
    /// for wrappers the `target(origin) / move(wrapper) / target(wrapper)`
    /// triple, for plain elements a single `target`.
    fn ensure_emitted(&mut self) {
        let Some(top) = self.targets.last_mut() else {
            return;
        };
        if top.emitted {
            return;
        }
        top.emitted = true;
        let mut prologue = Vec::new();
        match &top.origin {
            Some((origin, location)) => {
                let lang = top.target.lang.clone();
                prologue.push(Action::Target(Target {
                    tree: origin.clone(),
                    location: *location,
                    parent: None,
                    sort: None,
                    isgroup: false,
                    groupby: None,
                    lang,
                }));
                prologue.push(Action::Move(top.target.tree.clone()));
                prologue.push(Action::Target(top.target.clone()));
            }
            None => prologue.push(Action::Target(top.target.clone())),
        }
        self.state.current_mut().actions.extend(prologue);
    }

    /// Emits an op under the current target.
    pub fn emit(&mut self, action: Action) {
        self.ensure_emitted();
        self.state.current_mut().actions.push(action);
    }

    /// Installs sort/group settings on the current target, rewriting the
    /// already-emitted `target` action for it if there is one.
    pub fn set_sort_group(
        &mut self,
        sort: Option<KeyExtractor>,
        isgroup: bool,
        groupby: Option<KeyExtractor>,
    ) {
        let Some(top) = self.targets.last_mut() else {
            return;
        };
        top.target.sort = sort;
        top.target.isgroup = isgroup;
        top.target.groupby = groupby;

        if top.emitted {
            let tree = top.target.tree.clone();
            let updated = top.target.clone();
            let actions = &mut self.state.current_mut().actions;
            if let Some(pos) = actions
                .iter()
                .rposition(|a| matches!(a, Action::Target(t) if t.tree == tree))
            {
                actions[pos] = Action::Target(updated);
            }
        }
    }
}

fn wrapper_location(label: Label) -> Location {
    match label {
        Label::None => Location::None,
        Label::Before => Location::Before,
        Label::After => Location::After,
        Label::Outside => Location::Outside,
        Label::Inside => Location::Inside,
    }
}

/// The fixed order labels are processed in, for both the main and the
/// deferred block.
const LABEL_ORDER: [Label; 5] = [
    Label::None,
    Label::Before,
    Label::After,
    Label::Outside,
    Label::Inside,
];

/// Builds the recipe for the current pass over `element`'s subtree.
pub fn build_recipe(ctx: &mut BuildCtx<'_>, rules: &RuleSet, element: &Node) {
    let matches = rules.matches_for(&ctx.state.current_step, element);

    let mut buckets: HashMap<(Label, bool), Vec<RuleMatch>> = HashMap::new();
    for matched in matches {
        buckets
            .entry((matched.label, matched.deferred))
            .or_default()
            .push(matched);
    }

    let id = element.id();
    let previous_id = ctx.state.current_element_id.take();
    ctx.state.current_element_id = id.clone();

    run_label(ctx, element, &buckets, Label::None, false);

    // snapshot before descending, so target-* references observe the
    // values in force when this element was entered
    if let Some(id) = &id {
        ctx.state.snapshot_element(id);
    }

    run_label(ctx, element, &buckets, Label::Before, false);

    ctx.state.current_element_id = None;
    for child in element.children() {
        build_recipe(ctx, rules, &child);
    }
    ctx.state.current_element_id = id.clone();

    run_label(ctx, element, &buckets, Label::After, false);
    run_label(ctx, element, &buckets, Label::Outside, false);
    run_label(ctx, element, &buckets, Label::Inside, false);

    let has_deferred = LABEL_ORDER
        .iter()
        .any(|label| buckets.contains_key(&(*label, true)));
    if has_deferred {
        let before_deferred = ctx.state.capture_scope();
        for label in LABEL_ORDER {
            run_label(ctx, element, &buckets, label, true);
        }
        if let Some(id) = &id {
            ctx.state.merge_deferred_deltas(id, &before_deferred);
        }
    }

    ctx.state.current_element_id = previous_id;
}

fn run_label(
    ctx: &mut BuildCtx<'_>,
    element: &Node,
    buckets: &HashMap<(Label, bool), Vec<RuleMatch>>,
    label: Label,
    deferred: bool,
) {
    let Some(rules) = buckets.get(&(label, deferred)) else {
        return;
    };
    for rule in rules {
        ctx.coverage.hit(rule.line);
        if label == Label::None {
            ctx.push_element_target(element);
        } else {
            ctx.push_wrapper_target(element, wrapper_location(label));
        }
        for declaration in rule.declarations.iter() {
            decl::apply(ctx, element, declaration, label);
        }
        ctx.pop_target();
    }
}
