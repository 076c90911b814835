//! Evaluation of declaration right-hand sides.
//!
//! A small parser over owned component values supplies the primitives the
//! function handlers need (`ident`, `qname`, `number`, separators); the
//! evaluator walks the token run, dispatches function blocks through the
//! registry, and assembles either a string value or fragment ops depending
//! on the destination type.

use std::collections::HashMap;
use std::fmt;

use markup5ever::{LocalName, Namespace, QualName, namespace_url, ns};
use tracing::{info, warn};

use crate::counters::CounterStyle;
use crate::dom::{Node, NodeExt};
use crate::oven::IdGenerator;
use crate::state::BakingState;
use crate::tokens::{Token, TokenValue, serialize};
use crate::value::{
    Action, Delayed, Dest, MapFn, StringValue, Value, lift_node, string_from_node,
};

/// A parse failure inside a declaration value, with its source position.
#[derive(Debug)]
pub struct ExprError {
    pub line: u32,
    pub column: u32,
    pub message: String,
}

impl ExprError {
    fn at(token: Option<&Token>, message: impl Into<String>) -> Self {
        let (line, column) = token.map_or((0, 0), |t| (t.line, t.column));
        Self {
            line,
            column,
            message: message.into(),
        }
    }
}

impl fmt::Display for ExprError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}: {}", self.line, self.column, self.message)
    }
}

type ExprResult<T> = Result<T, ExprError>;

/// Parser over a run of owned component values.
pub struct TokenParser<'a> {
    source: &'a [Token],
    position: usize,
}

impl<'a> TokenParser<'a> {
    pub fn new(source: &'a [Token]) -> Self {
        Self {
            source,
            position: 0,
        }
    }

    pub fn cur(&self) -> Option<&'a Token> {
        self.source.get(self.position)
    }

    pub fn is_done(&self) -> bool {
        self.position >= self.source.len()
    }

    pub fn next(&mut self) -> ExprResult<&'a Token> {
        let token = self.source.get(self.position).ok_or_else(|| {
            ExprError::at(self.source.last(), "expected more tokens after this one")
        })?;
        self.position += 1;
        Ok(token)
    }

    pub fn skip_space(&mut self) {
        while self.cur().is_some_and(Token::is_whitespace) {
            self.position += 1;
        }
    }

    /// Parses a CSS identifier.
    pub fn ident(&mut self) -> ExprResult<String> {
        self.skip_space();
        let token = self.next()?;
        match &token.value {
            TokenValue::Ident(name) => Ok(name.clone()),
            other => Err(ExprError::at(
                Some(token),
                format!("expected identifier, got {other}"),
            )),
        }
    }

    /// Parses a qualified name, resolving `prefix|name` through the
    /// stylesheet's `@namespace` declarations.
    pub fn qname(&mut self, namespaces: &HashMap<String, Namespace>) -> ExprResult<QualName> {
        let name = self.ident()?;
        if self.eat('|') {
            let namespace = namespaces.get(&name).cloned().ok_or_else(|| {
                ExprError::at(self.cur(), format!("unknown namespace: {name}"))
            })?;
            let local = self.ident()?;
            Ok(QualName::new(None, namespace, LocalName::from(local)))
        } else {
            Ok(QualName::new(None, ns!(), LocalName::from(name)))
        }
    }

    /// Parses a CSS number as an integer.
    #[expect(
        clippy::cast_possible_truncation,
        reason = "counter deltas in stylesheets are small integers"
    )]
    pub fn number(&mut self) -> ExprResult<i64> {
        self.skip_space();
        let token = self.next()?;
        match &token.value {
            TokenValue::Number { int_value, value } => Ok(int_value.unwrap_or(*value as i64)),
            other => Err(ExprError::at(
                Some(token),
                format!("expected number, got {other}"),
            )),
        }
    }

    /// Consumes the punctuation if it is next (whitespace skipped).
    pub fn eat(&mut self, delim: char) -> bool {
        self.skip_space();
        if matches!(self.cur().map(|t| &t.value), Some(TokenValue::Delim(c)) if *c == delim) {
            self.position += 1;
            true
        } else {
            false
        }
    }

    /// Consumes and returns all remaining tokens.
    pub fn remaining(&mut self) -> &'a [Token] {
        let rest = &self.source[self.position..];
        self.position = self.source.len();
        rest
    }

    pub fn ensure_eos(&mut self) -> ExprResult<()> {
        self.skip_space();
        if self.is_done() {
            Ok(())
        } else {
            Err(ExprError::at(self.cur(), "expected end of value"))
        }
    }

    /// Splits the rest of the source on a top-level delimiter, consuming
    /// everything. Function arguments keep their commas, they are nested.
    pub fn separated(&mut self, delim: char) -> Vec<TokenParser<'a>> {
        let rest = &self.source[self.position..];
        self.position = self.source.len();
        if rest.is_empty() {
            return Vec::new();
        }
        rest.split(|t| matches!(&t.value, TokenValue::Delim(c) if *c == delim))
            .map(TokenParser::new)
            .collect()
    }

    /// Tries a sub-parse, rewinding on failure.
    pub fn try_parse<T>(
        &mut self,
        parse: impl FnOnce(&mut Self) -> ExprResult<T>,
    ) -> Option<T> {
        let position = self.position;
        match parse(self) {
            Ok(value) => Some(value),
            Err(_) => {
                self.position = position;
                None
            }
        }
    }
}

/// Everything a function handler may touch while evaluating.
pub struct EvalCtx<'a> {
    pub state: &'a mut BakingState,
    pub namespaces: &'a HashMap<String, Namespace>,
    pub ids: &'a mut IdGenerator,
}

/// Evaluates a declaration value into the destination type. Parse errors
/// inside the value are logged and yield the destination's default.
pub fn evaluate(ctx: &mut EvalCtx<'_>, element: &Node, tokens: &[Token], dest: Dest) -> Value {
    let mut string_parts: Vec<StringValue> = Vec::new();
    let mut ops: Vec<Action> = Vec::new();

    let push_text = |text: String, ops: &mut Vec<Action>, parts: &mut Vec<StringValue>| {
        match dest {
            Dest::String => parts.push(StringValue::Text(text)),
            Dest::Fragment(_) => ops.push(Action::String(StringValue::Text(text))),
        }
    };

    for token in tokens {
        match &token.value {
            TokenValue::Whitespace => {}
            TokenValue::QuotedString(text) | TokenValue::Ident(text) => {
                push_text(text.clone(), &mut ops, &mut string_parts);
            }
            TokenValue::Delim(c) => push_text(c.to_string(), &mut ops, &mut string_parts),
            TokenValue::Number { .. } => {
                push_text(token.value.to_string(), &mut ops, &mut string_parts);
            }
            TokenValue::Hash(name) => {
                push_text(format!("#{name}"), &mut ops, &mut string_parts);
            }
            TokenValue::Function(name, args) => {
                let result = match call_function(ctx, element, name, args, dest) {
                    Ok(result) => result,
                    Err(e) => {
                        warn!("bad expression in {name}(): {e}");
                        return Value::default_for(dest);
                    }
                };
                match (result, dest) {
                    (FuncResult::Nothing, _) => {}
                    (FuncResult::Elem(node), Dest::String) => {
                        string_parts.push(string_from_node(&node));
                    }
                    (FuncResult::Elem(node), Dest::Fragment(flags)) => {
                        ops.extend(lift_node(&node, flags));
                    }
                    (FuncResult::Value(Value::String(sv)), Dest::String) => {
                        string_parts.push(sv);
                    }
                    (FuncResult::Value(Value::String(sv)), Dest::Fragment(_)) => match sv {
                        StringValue::Delayed(delayed) => ops.push(Action::Delayed(delayed)),
                        other => ops.push(Action::String(other)),
                    },
                    (FuncResult::Value(Value::Fragment(more)), Dest::Fragment(_)) => {
                        ops.extend(more);
                    }
                    (FuncResult::Value(Value::Fragment(_)), Dest::String) => {
                        // the node functions already warned for this case
                    }
                }
            }
        }
    }

    match dest {
        Dest::String => Value::String(match string_parts.len() {
            0 => StringValue::empty(),
            1 => string_parts.pop().expect("one part"),
            _ => StringValue::List(string_parts),
        }),
        Dest::Fragment(_) => Value::Fragment(ops),
    }
}

enum FuncResult {
    Value(Value),
    Elem(Node),
    Nothing,
}

/// Dispatches a function block by name. Unknown functions warn and
/// contribute nothing.
fn call_function(
    ctx: &mut EvalCtx<'_>,
    element: &Node,
    name: &str,
    args: &[Token],
    dest: Dest,
) -> ExprResult<FuncResult> {
    let mut p = TokenParser::new(args);
    match name {
        "attr" => eval_attr(ctx, element, &mut p, dest),
        "string" => eval_string(ctx, element, &mut p, dest),
        "content" => {
            p.ensure_eos()?;
            Ok(FuncResult::Elem(element.clone()))
        }
        "pending" => eval_pending(ctx, &mut p, dest, name),
        "nodes" => eval_nodes(ctx, &mut p, dest, name),
        "clear" => eval_clear(ctx, &mut p, dest, name),
        "counter" => eval_counter(ctx, &mut p),
        "target-counter" => eval_target_counter(ctx, element, &mut p),
        "target-text" => eval_target_text(ctx, element, &mut p),
        "first-letter" => eval_first_letter(ctx, element, &mut p),
        "uuid" => {
            p.ensure_eos()?;
            Ok(FuncResult::Value(Value::String(StringValue::Text(
                ctx.ids.generate(),
            ))))
        }
        _ => {
            warn!("unknown function {name}({})", serialize(args));
            Ok(FuncResult::Nothing)
        }
    }
}

// https://www.w3.org/TR/css-values-4/#attr-notation
fn eval_attr(
    ctx: &mut EvalCtx<'_>,
    element: &Node,
    p: &mut TokenParser<'_>,
    dest: Dest,
) -> ExprResult<FuncResult> {
    let name = p.qname(ctx.namespaces)?;
    let default = if p.eat(',') { Some(p.remaining()) } else { None };
    p.ensure_eos()?;

    match element.attr(&name) {
        Some(value) => Ok(FuncResult::Value(Value::String(StringValue::Text(value)))),
        None => match default {
            Some(tokens) => Ok(FuncResult::Value(evaluate(ctx, element, tokens, dest))),
            None => Ok(FuncResult::Value(Value::default_for(dest))),
        },
    }
}

fn eval_string(
    ctx: &mut EvalCtx<'_>,
    element: &Node,
    p: &mut TokenParser<'_>,
    dest: Dest,
) -> ExprResult<FuncResult> {
    let name = p.ident()?;
    let default = if p.eat(',') { Some(p.remaining()) } else { None };
    p.ensure_eos()?;

    let value = ctx.state.lookup_string(&name, None);
    if !value.is_empty() {
        return Ok(FuncResult::Value(Value::String(StringValue::Text(value))));
    }
    match default {
        Some(tokens) => Ok(FuncResult::Value(evaluate(ctx, element, tokens, dest))),
        None => {
            warn!("{name} blank string");
            Ok(FuncResult::Value(Value::default_for(dest)))
        }
    }
}

/// Common parsing for the bucket functions; `None` when the bucket is
/// absent or the destination is not a fragment.
fn bucket_name(
    p: &mut TokenParser<'_>,
    dest: Dest,
    func: &str,
) -> ExprResult<Option<String>> {
    let name = p.ident()?;
    p.ensure_eos()?;
    if matches!(dest, Dest::String) {
        warn!("{func}({name}) cannot be used in a string value");
        return Ok(None);
    }
    Ok(Some(name))
}

fn eval_pending(
    ctx: &mut EvalCtx<'_>,
    p: &mut TokenParser<'_>,
    dest: Dest,
    func: &str,
) -> ExprResult<FuncResult> {
    let Some(name) = bucket_name(p, dest, func)? else {
        return Ok(FuncResult::Nothing);
    };
    match ctx.state.take_pending(&name) {
        Some(ops) => Ok(FuncResult::Value(Value::Fragment(ops))),
        None => {
            info!("{name} empty bucket");
            Ok(FuncResult::Value(Value::default_for(dest)))
        }
    }
}

fn eval_nodes(
    ctx: &mut EvalCtx<'_>,
    p: &mut TokenParser<'_>,
    dest: Dest,
    func: &str,
) -> ExprResult<FuncResult> {
    let Some(name) = bucket_name(p, dest, func)? else {
        return Ok(FuncResult::Nothing);
    };
    match ctx.state.peek_pending(&name) {
        Some(ops) => {
            let ops = ops
                .into_iter()
                .map(|op| match op {
                    Action::Move(node) => Action::NodeSet(node),
                    other => other,
                })
                .collect();
            Ok(FuncResult::Value(Value::Fragment(ops)))
        }
        None => {
            info!("{name} empty bucket");
            Ok(FuncResult::Value(Value::default_for(dest)))
        }
    }
}

fn eval_clear(
    ctx: &mut EvalCtx<'_>,
    p: &mut TokenParser<'_>,
    dest: Dest,
    func: &str,
) -> ExprResult<FuncResult> {
    let Some(name) = bucket_name(p, dest, func)? else {
        return Ok(FuncResult::Nothing);
    };
    match ctx.state.take_pending(&name) {
        Some(ops) => {
            let drops = ops
                .iter()
                .filter_map(|op| op.node().map(|node| Action::Drop(node.clone())))
                .collect();
            Ok(FuncResult::Value(Value::Fragment(drops)))
        }
        None => {
            info!("{name} empty bucket");
            Ok(FuncResult::Value(Value::default_for(dest)))
        }
    }
}

fn eval_counter(ctx: &mut EvalCtx<'_>, p: &mut TokenParser<'_>) -> ExprResult<FuncResult> {
    let name = p.ident()?;
    let style = if p.eat(',') {
        CounterStyle::parse(&p.ident()?)
    } else {
        CounterStyle::Decimal
    };
    p.ensure_eos()?;

    let value = ctx.state.lookup_counter(&name, None);
    Ok(FuncResult::Value(Value::String(StringValue::Text(
        style.format(value),
    ))))
}

/// Parses the `#id` reference argument of the `target-*` functions. The
/// reference may itself be an expression (`attr(href)`), so it is
/// evaluated as a string first.
fn target_reference(
    ctx: &mut EvalCtx<'_>,
    element: &Node,
    p: &mut TokenParser<'_>,
) -> ExprResult<String> {
    let tokens = p.remaining();
    let value = evaluate(ctx, element, tokens, Dest::String);
    let Value::String(sv) = value else {
        unreachable!("string destination yields a string value");
    };
    let text = sv.immediate_text().unwrap_or_default();
    if let Some(id) = text.strip_prefix('#') {
        Ok(id.to_owned())
    } else {
        warn!("target reference `{text}` does not start with #, treating as missing");
        Ok("nonexistent".to_owned())
    }
}

fn eval_target_counter(
    ctx: &mut EvalCtx<'_>,
    element: &Node,
    p: &mut TokenParser<'_>,
) -> ExprResult<FuncResult> {
    let mut parts = p.separated(',');
    if parts.len() < 2 {
        return Err(ExprError::at(None, "target-counter(ref, name [, style])"));
    }
    let id = target_reference(ctx, element, &mut parts[0])?;
    let name = parts[1].ident()?;
    parts[1].ensure_eos()?;
    let style = match parts.get_mut(2) {
        Some(part) => CounterStyle::parse(&part.ident()?),
        None => CounterStyle::Decimal,
    };
    Ok(FuncResult::Value(Value::String(StringValue::Delayed(
        Delayed::TargetCounter { id, name, style },
    ))))
}

fn eval_target_text(
    ctx: &mut EvalCtx<'_>,
    element: &Node,
    p: &mut TokenParser<'_>,
) -> ExprResult<FuncResult> {
    let mut parts = p.separated(',');
    if parts.len() != 2 {
        return Err(ExprError::at(None, "target-text(ref, name)"));
    }
    let id = target_reference(ctx, element, &mut parts[0])?;
    let name = parts[1].ident()?;
    parts[1].ensure_eos()?;
    Ok(FuncResult::Value(Value::String(StringValue::Delayed(
        Delayed::TargetText { id, name },
    ))))
}

fn eval_first_letter(
    ctx: &mut EvalCtx<'_>,
    element: &Node,
    p: &mut TokenParser<'_>,
) -> ExprResult<FuncResult> {
    let tokens = p.remaining();
    let Value::String(sv) = evaluate(ctx, element, tokens, Dest::String) else {
        unreachable!("string destination yields a string value");
    };
    match sv.immediate_text() {
        Some(text) => Ok(FuncResult::Value(Value::String(StringValue::Text(
            MapFn::FirstLetter.apply(&text),
        )))),
        None => match sv {
            StringValue::Delayed(base) => Ok(FuncResult::Value(Value::String(
                StringValue::Delayed(Delayed::Chain {
                    base: Box::new(base),
                    map: MapFn::FirstLetter,
                }),
            ))),
            _ => {
                warn!("first-letter over a mixed delayed value is not supported");
                Ok(FuncResult::Value(Value::String(StringValue::empty())))
            }
        },
    }
}
