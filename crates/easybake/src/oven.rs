//! The oven: compiled rules, baking state, and the pass loop.

use std::collections::BTreeMap;

use tracing::debug;
use uuid::Uuid;

use crate::builder::{self, BuildCtx};
use crate::css::RuleSet;
use crate::dom::{Node, NodeExt};
use crate::error::BakeResult;
use crate::exec;
use crate::state::BakingState;

/// Generates ids for `uuid()` and generated wrappers. Repeatable ids make
/// a bake deterministic across runs.
#[derive(Debug)]
pub struct IdGenerator {
    repeatable: bool,
    next: u64,
}

impl IdGenerator {
    pub fn new(repeatable: bool) -> Self {
        Self {
            repeatable,
            next: 0,
        }
    }

    pub fn generate(&mut self) -> String {
        if self.repeatable {
            self.next += 1;
            format!("autobaked-{}", self.next)
        } else {
            format!("autobaked-{}", Uuid::new_v4())
        }
    }
}

/// Per-selector coverage: source line weight 0 at load, 1 once the
/// selector matched or one of its declarations ran.
#[derive(Debug, Default)]
pub struct Coverage {
    lines: BTreeMap<u32, u32>,
}

impl Coverage {
    pub fn add_line(&mut self, line: u32) {
        self.lines.entry(line).or_insert(0);
    }

    pub fn hit(&mut self, line: u32) {
        self.lines.insert(line, 1);
    }

    /// An LCOV fragment of `DA:<line>,<hit>` entries, ascending by line.
    pub fn report(&self) -> String {
        let mut out = String::new();
        for (line, hit) in &self.lines {
            out.push_str(&format!("DA:{line},{hit}\n"));
        }
        out
    }
}

/// Bakes HTML documents according to a recipe stylesheet.
///
/// ```
/// use easybake::{Oven, html};
///
/// let css = r#"div[data-type="note"] { copy-to: notes }
///              div[data-type="chapter"]::after { content: pending(notes) }"#;
/// let mut oven = Oven::new(css, true).unwrap();
/// let doc = html::parse_str(
///     "<div data-type=\"chapter\"><div data-type=\"note\">N</div></div>",
/// );
/// oven.bake(&doc.root, None);
/// ```
pub struct Oven {
    rules: RuleSet,
    state: BakingState,
    coverage: Coverage,
    ids: IdGenerator,
}

impl Oven {
    /// Compiles the stylesheet. A stylesheet parse error is the only fatal
    /// failure.
    pub fn new(css: &str, repeatable_ids: bool) -> BakeResult<Self> {
        let mut oven = Self {
            rules: RuleSet::default(),
            state: BakingState::default(),
            coverage: Coverage::default(),
            ids: IdGenerator::new(repeatable_ids),
        };
        oven.update_css(css, true)?;
        Ok(oven)
    }

    /// Adds more rules, or replaces them all. Baking state always resets,
    /// since the rules changed.
    pub fn update_css(&mut self, css: &str, clear: bool) -> BakeResult<()> {
        if clear {
            self.rules = RuleSet::default();
            self.coverage = Coverage::default();
        }
        self.rules.add_stylesheet(css)?;
        for line in self.rules.lines().collect::<Vec<_>>() {
            self.coverage.add_line(line);
        }
        self.state.reset(self.rules.passes());
        Ok(())
    }

    /// The ordered pass names the stylesheet declared.
    pub fn passes(&self) -> &[String] {
        self.rules.passes()
    }

    /// Applies the recipes to the tree in place. Passes run in order; with
    /// `last_pass_exclusive` only passes strictly before it run (numeric
    /// comparison when everything involved is numeric).
    pub fn bake(&mut self, root: &Node, last_pass_exclusive: Option<&str>) {
        self.state.lang = root.inherited_lang();
        let steps = self.rules.passes().to_vec();
        let numeric = self.rules.passes_all_numeric()
            && last_pass_exclusive.is_none_or(|stop| stop.parse::<i64>().is_ok());

        for (index, step) in steps.iter().enumerate() {
            if let Some(stop) = last_pass_exclusive {
                let reached = if numeric {
                    step.parse::<i64>().unwrap_or(i64::MAX)
                        >= stop.parse::<i64>().unwrap_or(i64::MAX)
                } else {
                    step.as_str() >= stop
                };
                if reached {
                    break;
                }
            }
            debug!("pass {step}");
            self.state.enter_pass(index);

            if !self.state.pass(step).recipe {
                let mut ctx = BuildCtx::new(
                    &mut self.state,
                    &self.rules.namespaces,
                    &mut self.ids,
                    &mut self.coverage,
                );
                builder::build_recipe(&mut ctx, &self.rules, root);
                self.state.pass_mut(step).recipe = true;
            }

            // execution resolves delayed values against snapshots only
            self.state.current_element_id = None;
            let actions = self.state.pass(step).actions.clone();
            exec::execute(&self.state, &actions);
        }

        close_empty_elements(root);
    }

    /// An LCOV fragment with one `DA:` entry per selector.
    pub fn coverage_report(&self) -> String {
        self.coverage.report()
    }

    pub fn generate_id(&mut self) -> String {
        self.ids.generate()
    }
}

/// Gives every childless, textless non-void element an empty text run so
/// it serializes with an explicit closing tag.
fn close_empty_elements(root: &Node) {
    for node in root.descendants() {
        if !node.is_void() && !node.has_children() && node.text().is_none() {
            node.set_text(Some(String::new()));
        }
    }
}
