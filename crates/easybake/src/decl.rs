//! Declaration handlers.
//!
//! Each recognized declaration name maps to one handler; `data-*` and
//! `attr-*` prefixes go to the two generic attribute handlers. Unknown
//! names warn and are no-ops, so a recipe written for a newer oven still
//! bakes.

use tracing::{debug, warn};

use crate::builder::BuildCtx;
use crate::collate::KeyExtractor;
use crate::css::{Declaration, Label};
use crate::dom::{Node, local_qname};
use crate::expr::{EvalCtx, TokenParser, evaluate};
use crate::tokens::serialize;
use crate::value::{Action, Dest, FragmentAction, FragmentFlags, Value};

/// Dispatches one declaration to its handler.
pub fn apply(ctx: &mut BuildCtx<'_>, element: &Node, decl: &Declaration, label: Label) {
    debug!(
        "{} {{ {}: {} }}",
        element.borrow().name.local,
        decl.name,
        serialize(&decl.value)
    );
    match decl.name.as_str() {
        "string-set" => string_set(ctx, element, decl),
        "counter-reset" => counter_reset(ctx, decl),
        "counter-increment" => counter_increment(ctx, decl),
        "node-set" => node_set(ctx, decl),
        "copy-to" => copy_to(ctx, decl),
        "move-to" => move_to(ctx, decl),
        "container" => container(ctx, decl),
        "class" => set_attribute(ctx, element, decl, "class"),
        "content" => content(ctx, element, decl, label),
        "group-by" => group_by(ctx, decl),
        "sort-by" => sort_by(ctx, decl),
        // the pass is consumed by selector parsing; the declaration form
        // is informational only
        "pass" => {}
        name if name.starts_with("data-") => set_attribute(ctx, element, decl, name),
        name if name.starts_with("attr-") => {
            let attr = decl.name["attr-".len()..].to_owned();
            set_attribute(ctx, element, decl, &attr);
        }
        name => warn!("unknown declaration {name}, ignoring"),
    }
}

fn eval_value(ctx: &mut BuildCtx<'_>, element: &Node, decl: &Declaration, dest: Dest) -> Value {
    let mut eval = EvalCtx {
        state: &mut *ctx.state,
        namespaces: ctx.namespaces,
        ids: &mut *ctx.ids,
    };
    evaluate(&mut eval, element, &decl.value, dest)
}

/// `string-set: name <expr> [, name <expr>]*`
fn string_set(ctx: &mut BuildCtx<'_>, element: &Node, decl: &Declaration) {
    let mut parser = TokenParser::new(&decl.value);
    for mut clause in parser.separated(',') {
        let Ok(name) = clause.ident() else {
            warn!("bad string-set clause: {}", serialize(&decl.value));
            continue;
        };
        let tokens = clause.remaining();
        let mut eval = EvalCtx {
            state: &mut *ctx.state,
            namespaces: ctx.namespaces,
            ids: &mut *ctx.ids,
        };
        let Value::String(value) = evaluate(&mut eval, element, tokens, Dest::String) else {
            unreachable!("string destination yields a string value");
        };
        match value.immediate_text() {
            Some(text) => ctx.state.set_string(&name, text),
            None => warn!("string-set {name} needs an immediate value, ignoring"),
        }
    }
}

/// `counter-reset: none | (name [value]?)+`
fn counter_reset(ctx: &mut BuildCtx<'_>, decl: &Declaration) {
    for (name, value) in counter_terms(decl, 0) {
        ctx.state.reset_counter(&name, value);
    }
}

/// `counter-increment: none | (name [delta]?)+`
fn counter_increment(ctx: &mut BuildCtx<'_>, decl: &Declaration) {
    for (name, delta) in counter_terms(decl, 1) {
        ctx.state.increment_counter(&name, delta);
    }
}

/// Parses the shared `name [number]?` repetition; `none` yields nothing.
fn counter_terms(decl: &Declaration, default: i64) -> Vec<(String, i64)> {
    let mut parser = TokenParser::new(&decl.value);
    let mut terms = Vec::new();
    parser.skip_space();
    loop {
        parser.skip_space();
        if parser.is_done() {
            break;
        }
        match parser.ident() {
            Ok(name) if name == "none" && terms.is_empty() => return Vec::new(),
            Ok(name) => {
                let value = parser.try_parse(TokenParser::number).unwrap_or(default);
                terms.push((name, value));
            }
            Err(_) => {
                warn!(
                    "unrecognized {} term in `{}`",
                    decl.name,
                    serialize(&decl.value)
                );
                let _ = parser.next();
            }
        }
    }
    terms
}

fn bucket_ident(decl: &Declaration) -> Option<String> {
    let mut parser = TokenParser::new(&decl.value);
    match parser.ident() {
        Ok(name) => Some(name),
        Err(_) => {
            warn!("{} needs a bucket name: {}", decl.name, serialize(&decl.value));
            None
        }
    }
}

/// `node-set: X` — overwrites the bucket with a nodeset op for the target.
fn node_set(ctx: &mut BuildCtx<'_>, decl: &Declaration) {
    let Some(name) = bucket_ident(decl) else { return };
    let node = ctx.target_tree();
    ctx.state.set_pending(&name, vec![Action::NodeSet(node)]);
}

/// `copy-to: X` — queues a copy of the target into the bucket.
fn copy_to(ctx: &mut BuildCtx<'_>, decl: &Declaration) {
    let Some(name) = bucket_ident(decl) else { return };
    let node = ctx.target_tree();
    ctx.state.append_pending(&name, Action::Copy(node));
}

/// `move-to: X` — a later move supersedes any queued move of this node.
fn move_to(ctx: &mut BuildCtx<'_>, decl: &Declaration) {
    let Some(name) = bucket_ident(decl) else { return };
    let node = ctx.target_tree();
    ctx.state.remove_queued_move(&node);
    ctx.state.append_pending(&name, Action::Move(node));
}

/// `container: qname` — renames the target's root.
fn container(ctx: &mut BuildCtx<'_>, decl: &Declaration) {
    let mut parser = TokenParser::new(&decl.value);
    match parser.qname(ctx.namespaces) {
        Ok(name) => ctx.emit(Action::Tag(name)),
        Err(e) => warn!("bad container name: {e}"),
    }
}

/// `class`, `attr-*` and `data-*`: evaluate as a string, set at execution.
fn set_attribute(ctx: &mut BuildCtx<'_>, element: &Node, decl: &Declaration, attr: &str) {
    let Value::String(value) = eval_value(ctx, element, decl, Dest::String) else {
        unreachable!("string destination yields a string value");
    };
    ctx.emit(Action::Attrib {
        name: local_qname(attr),
        value,
    });
}

/// `content: <expr>` — the central declaration; fragment flags depend on
/// the pseudo-label the rule runs under.
fn content(ctx: &mut BuildCtx<'_>, element: &Node, decl: &Declaration, label: Label) {
    let flags = FragmentFlags {
        needs_copy: matches!(label, Label::Before | Label::After),
        action: if label == Label::Outside {
            FragmentAction::Move
        } else {
            FragmentAction::Content
        },
        include_nodes: label != Label::None,
    };

    let target_tree = ctx.target_tree();
    if label == Label::None || label == Label::Inside {
        ctx.emit(Action::Clear(target_tree.clone()));
    }

    let Value::Fragment(ops) = eval_value(ctx, element, decl, Dest::Fragment(flags)) else {
        unreachable!("fragment destination yields fragment ops");
    };

    let all_drops = !ops.is_empty() && ops.iter().all(|op| matches!(op, Action::Drop(_)));
    for op in ops {
        ctx.emit(op);
    }
    if label != Label::None && all_drops {
        // nothing will ever land in the wrapper; remove it again
        ctx.emit(Action::Drop(target_tree));
    }
}

/// Parses the optional trailing flags of `sort-by`/`group-by`; only
/// `nocase` is understood.
fn parse_flags(part: Option<&mut TokenParser<'_>>) -> bool {
    let Some(parser) = part else { return false };
    let mut nocase = false;
    loop {
        parser.skip_space();
        if parser.is_done() {
            break;
        }
        match parser.ident() {
            Ok(flag) if flag == "nocase" => nocase = true,
            Ok(flag) => warn!("unknown sort flag {flag}, ignoring"),
            Err(_) => {
                warn!("unrecognized sort flag token");
                let _ = parser.next();
            }
        }
    }
    nocase
}

/// `group-by: group-key-selector, label-selector [, flags]`
fn group_by(ctx: &mut BuildCtx<'_>, decl: &Declaration) {
    let mut parser = TokenParser::new(&decl.value);
    let mut parts = parser.separated(',');
    if parts.is_empty() {
        warn!("group-by needs a key selector");
        return;
    }
    let nocase = parse_flags(parts.get_mut(2));
    let sort_css = serialize(parts[0].remaining());
    let sort = KeyExtractor::compile(&sort_css, nocase, ctx.namespaces);
    let groupby = parts.get_mut(1).and_then(|part| {
        let css = serialize(part.remaining());
        KeyExtractor::compile(&css, nocase, ctx.namespaces)
    });
    ctx.set_sort_group(sort, true, groupby);
}

/// `sort-by: key-selector [, flags]`
fn sort_by(ctx: &mut BuildCtx<'_>, decl: &Declaration) {
    let mut parser = TokenParser::new(&decl.value);
    let mut parts = parser.separated(',');
    if parts.is_empty() {
        warn!("sort-by needs a key selector");
        return;
    }
    let nocase = parse_flags(parts.get_mut(1));
    let css = serialize(parts[0].remaining());
    let sort = KeyExtractor::compile(&css, nocase, ctx.namespaces);
    ctx.set_sort_group(sort, false, None);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decl(name: &str, css: &str) -> Declaration {
        let mut input = cssparser::ParserInput::new(css);
        let mut parser = cssparser::Parser::new(&mut input);
        Declaration {
            name: name.to_owned(),
            value: crate::tokens::collect(&mut parser),
            line: 1,
            column: 1,
        }
    }

    #[test]
    fn counter_terms_parse_names_and_values() {
        assert_eq!(
            counter_terms(&decl("counter-reset", "chap 4 sec"), 0),
            vec![("chap".to_owned(), 4), ("sec".to_owned(), 0)]
        );
        assert_eq!(counter_terms(&decl("counter-reset", "none"), 0), vec![]);
        assert_eq!(
            counter_terms(&decl("counter-increment", "chap"), 1),
            vec![("chap".to_owned(), 1)]
        );
    }
}
