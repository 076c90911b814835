//! Baking state: per-pass variables, the action log, and per-element
//! snapshots.
//!
//! Passes form a scope stack, innermost (current) first. Variable reads
//! walk the scope outward until the name is found, so a later pass sees
//! everything earlier passes set; writes always land in the current pass.

use ahash::AHashMap;
use indexmap::IndexMap;

use crate::dom::Node;
use crate::value::Action;

/// State of one processing pass.
#[derive(Debug, Default)]
pub struct PassState {
    /// Named buckets of ops awaiting placement by `pending()` / `nodes()` /
    /// `clear()`.
    pub pending: IndexMap<String, Vec<Action>>,
    /// The recipe: the linear action log for this pass.
    pub actions: Vec<Action>,
    pub counters: AHashMap<String, i64>,
    pub strings: AHashMap<String, String>,
    /// Whether the recipe has been built (it is built once, then cached).
    pub recipe: bool,
}

/// Copies of the counter and string maps of every pass in scope, keyed by
/// pass name. Used for per-id snapshots and deferred-delta detection.
#[derive(Debug, Clone, Default)]
pub struct ScopeCapture {
    pub counters: AHashMap<String, AHashMap<String, i64>>,
    pub strings: AHashMap<String, AHashMap<String, String>>,
}

/// All mutable state of a bake.
#[derive(Debug, Default)]
pub struct BakingState {
    passes: AHashMap<String, PassState>,
    /// Ordered pass names.
    pub steps: Vec<String>,
    pub current_step: String,
    /// Pass names from innermost (current) outward.
    pub scope: Vec<String>,
    /// id -> pass -> name -> value, captured when the builder entered the
    /// element carrying the id.
    counter_snapshots: AHashMap<String, AHashMap<String, AHashMap<String, i64>>>,
    string_snapshots: AHashMap<String, AHashMap<String, AHashMap<String, String>>>,
    /// The id of the element the builder is currently processing, if any.
    pub current_element_id: Option<String>,
    /// Document default language.
    pub lang: Option<String>,
}

impl BakingState {
    pub fn new(steps: &[String]) -> Self {
        let mut state = Self::default();
        state.reset(steps);
        state
    }

    /// Clears everything and re-creates one empty state per pass.
    pub fn reset(&mut self, steps: &[String]) {
        self.passes = steps
            .iter()
            .map(|step| (step.clone(), PassState::default()))
            .collect();
        self.steps = steps.to_vec();
        self.counter_snapshots.clear();
        self.string_snapshots.clear();
        self.current_element_id = None;
        if let Some(first) = steps.first() {
            self.current_step.clone_from(first);
            self.scope = vec![first.clone()];
        } else {
            self.current_step.clear();
            self.scope.clear();
        }
    }

    /// Makes `steps[index]` the current pass; the scope becomes that pass
    /// plus every earlier one, innermost first.
    pub fn enter_pass(&mut self, index: usize) {
        self.current_step.clone_from(&self.steps[index]);
        self.scope = self.steps[..=index].iter().rev().cloned().collect();
    }

    pub fn pass(&self, step: &str) -> &PassState {
        &self.passes[step]
    }

    pub fn pass_mut(&mut self, step: &str) -> &mut PassState {
        self.passes.get_mut(step).expect("pass state exists")
    }

    pub fn current(&self) -> &PassState {
        &self.passes[&self.current_step]
    }

    pub fn current_mut(&mut self) -> &mut PassState {
        let step = self.current_step.clone();
        self.pass_mut(&step)
    }

    /// Reads a counter. With an id that is not the element currently being
    /// walked, the read goes to that element's snapshot; absent values are 0.
    pub fn lookup_counter(&self, name: &str, id: Option<&str>) -> i64 {
        if let Some(id) = id {
            if self.current_element_id.as_deref() != Some(id) {
                let Some(snapshot) = self.counter_snapshots.get(id) else {
                    return 0;
                };
                for step in &self.scope {
                    if let Some(value) = snapshot.get(step).and_then(|m| m.get(name)) {
                        return *value;
                    }
                }
                return 0;
            }
        }
        for step in &self.scope {
            if let Some(value) = self.passes[step].counters.get(name) {
                return *value;
            }
        }
        0
    }

    /// Reads a named string; same snapshot rules as counters, absent is "".
    pub fn lookup_string(&self, name: &str, id: Option<&str>) -> String {
        if let Some(id) = id {
            if self.current_element_id.as_deref() != Some(id) {
                let Some(snapshot) = self.string_snapshots.get(id) else {
                    return String::new();
                };
                for step in &self.scope {
                    if let Some(value) = snapshot.get(step).and_then(|m| m.get(name)) {
                        return value.clone();
                    }
                }
                return String::new();
            }
        }
        for step in &self.scope {
            if let Some(value) = self.passes[step].strings.get(name) {
                return value.clone();
            }
        }
        String::new()
    }

    pub fn set_string(&mut self, name: &str, value: String) {
        self.current_mut().strings.insert(name.to_owned(), value);
    }

    pub fn reset_counter(&mut self, name: &str, value: i64) {
        self.current_mut().counters.insert(name.to_owned(), value);
    }

    /// Initializes a missing counter, then adds.
    pub fn increment_counter(&mut self, name: &str, by: i64) {
        let value = self.lookup_counter(name, None) + by;
        self.current_mut().counters.insert(name.to_owned(), value);
    }

    /// The pass whose pending store holds `name`, walking the scope
    /// outward.
    pub fn pending_bucket_pass(&self, name: &str) -> Option<String> {
        self.scope
            .iter()
            .find(|step| self.passes[*step].pending.contains_key(name))
            .cloned()
    }

    /// Reads a bucket without draining it.
    pub fn peek_pending(&self, name: &str) -> Option<Vec<Action>> {
        let step = self.pending_bucket_pass(name)?;
        self.passes[&step].pending.get(name).cloned()
    }

    /// Drains a bucket from the exact pass it lives in.
    pub fn take_pending(&mut self, name: &str) -> Option<Vec<Action>> {
        let step = self.pending_bucket_pass(name)?;
        self.pass_mut(&step).pending.shift_remove(name)
    }

    /// Appends an op to a bucket, in the pass where the bucket already
    /// lives, or the current pass for a fresh bucket.
    pub fn append_pending(&mut self, name: &str, op: Action) {
        let step = self
            .pending_bucket_pass(name)
            .unwrap_or_else(|| self.current_step.clone());
        self.pass_mut(&step)
            .pending
            .entry(name.to_owned())
            .or_default()
            .push(op);
    }

    /// Replaces a bucket's contents outright (`node-set`).
    pub fn set_pending(&mut self, name: &str, ops: Vec<Action>) {
        let step = self
            .pending_bucket_pass(name)
            .unwrap_or_else(|| self.current_step.clone());
        self.pass_mut(&step).pending.insert(name.to_owned(), ops);
    }

    /// Removes an earlier queued move of `node`, wherever it sits: a later
    /// `move-to` supersedes it, so the node ends up in exactly one
    /// destination per pass.
    pub fn remove_queued_move(&mut self, node: &Node) {
        let step = self.current_step.clone();
        let actions = &mut self.pass_mut(&step).actions;
        if let Some(pos) = actions
            .iter()
            .rposition(|a| matches!(a, Action::Move(n) if n == node))
        {
            actions.remove(pos);
            return;
        }
        for step in self.scope.clone() {
            let pending = &mut self.pass_mut(&step).pending;
            for bucket in pending.values_mut() {
                if let Some(pos) = bucket
                    .iter()
                    .rposition(|a| matches!(a, Action::Move(n) if n == node))
                {
                    bucket.remove(pos);
                    return;
                }
            }
        }
    }

    /// Copies the live counter and string maps of every pass in scope.
    pub fn capture_scope(&self) -> ScopeCapture {
        let mut capture = ScopeCapture::default();
        for step in &self.scope {
            let pass = &self.passes[step];
            capture.counters.insert(step.clone(), pass.counters.clone());
            capture.strings.insert(step.clone(), pass.strings.clone());
        }
        capture
    }

    /// Stores the scope capture as the snapshot for `id`.
    pub fn snapshot_element(&mut self, id: &str) {
        let capture = self.capture_scope();
        self.counter_snapshots.insert(id.to_owned(), capture.counters);
        self.string_snapshots.insert(id.to_owned(), capture.strings);
    }

    /// Overwrites snapshot entries for `id` with every counter/string that
    /// changed since `before` (taken just ahead of the deferred rules).
    pub fn merge_deferred_deltas(&mut self, id: &str, before: &ScopeCapture) {
        for step in self.scope.clone() {
            let pass = &self.passes[&step];
            let changed_counters: Vec<(String, i64)> = pass
                .counters
                .iter()
                .filter(|(name, value)| {
                    before
                        .counters
                        .get(&step)
                        .and_then(|m| m.get(*name))
                        != Some(*value)
                })
                .map(|(name, value)| (name.clone(), *value))
                .collect();
            let changed_strings: Vec<(String, String)> = pass
                .strings
                .iter()
                .filter(|(name, value)| {
                    before.strings.get(&step).and_then(|m| m.get(*name)) != Some(*value)
                })
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect();

            let counter_snapshot = self
                .counter_snapshots
                .entry(id.to_owned())
                .or_default()
                .entry(step.clone())
                .or_default();
            for (name, value) in changed_counters {
                counter_snapshot.insert(name, value);
            }
            let string_snapshot = self
                .string_snapshots
                .entry(id.to_owned())
                .or_default()
                .entry(step)
                .or_default();
            for (name, value) in changed_strings {
                string_snapshot.insert(name, value);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps() -> Vec<String> {
        vec!["0".to_owned(), "5".to_owned()]
    }

    #[test]
    fn scope_lookup_walks_outward() {
        let mut state = BakingState::new(&steps());
        state.enter_pass(0);
        state.reset_counter("chap", 3);
        state.set_string("title", "Intro".to_owned());

        state.enter_pass(1);
        assert_eq!(state.lookup_counter("chap", None), 3);
        assert_eq!(state.lookup_string("title", None), "Intro");
        // writes land in the current pass and shadow the outer one
        state.reset_counter("chap", 9);
        assert_eq!(state.lookup_counter("chap", None), 9);
        assert_eq!(state.pass("0").counters["chap"], 3);
    }

    #[test]
    fn snapshots_freeze_values_per_id() {
        let mut state = BakingState::new(&steps());
        state.enter_pass(0);
        state.increment_counter("chap", 1);
        state.current_element_id = Some("c1".to_owned());
        state.snapshot_element("c1");
        state.current_element_id = None;
        state.increment_counter("chap", 1);

        assert_eq!(state.lookup_counter("chap", Some("c1")), 1);
        assert_eq!(state.lookup_counter("chap", None), 2);
        // an id without a snapshot reads as nil
        assert_eq!(state.lookup_counter("chap", Some("nope")), 0);
    }

    #[test]
    fn deferred_deltas_overwrite_snapshots() {
        let mut state = BakingState::new(&steps());
        state.enter_pass(0);
        state.increment_counter("c", 1);
        state.snapshot_element("x");

        let before = state.capture_scope();
        state.increment_counter("c", 1);
        state.set_string("s", "late".to_owned());
        state.merge_deferred_deltas("x", &before);

        assert_eq!(state.lookup_counter("c", Some("x")), 2);
        assert_eq!(state.lookup_string("s", Some("x")), "late");
    }

    #[test]
    fn pending_buckets_live_in_their_pass() {
        let mut state = BakingState::new(&steps());
        state.enter_pass(0);
        state.append_pending("bucket", Action::Clear(crate::dom::new_element("div")));
        state.enter_pass(1);
        // the bucket is found through the scope and drained where it lives
        assert_eq!(state.pending_bucket_pass("bucket").as_deref(), Some("0"));
        assert!(state.take_pending("bucket").is_some());
        assert!(state.take_pending("bucket").is_none());
    }
}
