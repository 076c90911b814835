//! The recipe stylesheet dialect: parsing and the rule store.
//!
//! The `cssparser` crate tokenizes and drives rule/declaration parsing; the
//! `selectors` crate compiles and matches selector lists. Both are generic
//! over caller-provided types, so this module supplies the glue: the
//! `SelectorImpl` type family, the pseudo-classes (`:pass(...)`,
//! `:deferred`) and pseudo-elements (`::before`, `::after`, `::inside`,
//! `::outside`) of the dialect, an implementation of `selectors::Element`
//! for the document tree, and the store that indexes compiled rules by
//! processing pass and pseudo-label.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::rc::Rc;

use cssparser::{
    AtRuleParser, BasicParseErrorKind, CowRcStr, DeclarationParser, ParseErrorKind, Parser,
    ParserInput, ParserState, QualifiedRuleParser, RuleBodyItemParser, RuleBodyParser,
    SourceLocation, StyleSheetParser, ToCss, match_ignore_ascii_case,
};
use markup5ever::{Namespace, QualName};
use precomputed_hash::PrecomputedHash;
use selectors::attr::{AttrSelectorOperation, CaseSensitivity, NamespaceConstraint};
use selectors::bloom::BloomFilter;
use selectors::context::{
    MatchingContext, MatchingForInvalidation, MatchingMode, NeedsSelectorFlags, QuirksMode,
    SelectorCaches,
};
use selectors::matching::{ElementSelectorFlags, matches_selector};
use selectors::parser::{Component, ParseRelative, Selector};
use selectors::{OpaqueElement, SelectorImpl, SelectorList};
use tracing::warn;

use crate::dom::{ElementData, Node, NodeExt};
use crate::error::{BakeError, BakeResult};
use crate::tokens::{self, Token, TokenValue};

/// The default pass name; renamed to `"0"` when numeric passes exist.
pub const DEFAULT_PASS: &str = "default";

/// A parsed recipe declaration: its name and its owned value tokens.
#[derive(Debug, Clone)]
pub struct Declaration {
    pub name: String,
    pub value: Vec<Token>,
    pub line: u32,
    pub column: u32,
}

/// The pseudo-label a rule's declarations run under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Label {
    None,
    Before,
    After,
    Outside,
    Inside,
}

/// Non-tree-structural pseudo-classes of the dialect. Both are routing
/// markers consumed at rule load; they always match.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum NonTSPseudoClass {
    /// `:pass("name")` — assigns the rule to a processing pass.
    Pass(String),
    /// `:deferred` — runs the rule after the element's children.
    Deferred,
}

impl ToCss for NonTSPseudoClass {
    fn to_css<W>(&self, dest: &mut W) -> fmt::Result
    where
        W: fmt::Write,
    {
        match self {
            Self::Pass(name) => write!(dest, "pass(\"{name}\")"),
            Self::Deferred => write!(dest, "deferred"),
        }
    }
}

impl selectors::parser::NonTSPseudoClass for NonTSPseudoClass {
    type Impl = BakeSelectorImpl;

    fn is_active_or_hover(&self) -> bool {
        false
    }

    /// Allows these markers after a pseudo-element (`div::after:deferred`).
    fn is_user_action_state(&self) -> bool {
        true
    }
}

/// Pseudo-elements of the dialect. The first four label wrapper positions;
/// `::first-letter` and `::attr(...)` only appear inside `sort-by` /
/// `group-by` key selectors.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PseudoElement {
    Before,
    After,
    Inside,
    Outside,
    FirstLetter,
    Attr(String),
}

impl ToCss for PseudoElement {
    fn to_css<W>(&self, dest: &mut W) -> fmt::Result
    where
        W: fmt::Write,
    {
        match self {
            Self::Before => write!(dest, "::before"),
            Self::After => write!(dest, "::after"),
            Self::Inside => write!(dest, "::inside"),
            Self::Outside => write!(dest, "::outside"),
            Self::FirstLetter => write!(dest, "::first-letter"),
            Self::Attr(name) => write!(dest, "::attr({name})"),
        }
    }
}

impl selectors::parser::PseudoElement for PseudoElement {
    type Impl = BakeSelectorImpl;

    fn accepts_state_pseudo_classes(&self) -> bool {
        true
    }
}

/// Wrapper for attribute values.
///
/// A newtype because the associated type `AttrValue` must implement
/// `From<&str>` and `ToCss`, which are foreign traits.
#[derive(Clone, PartialEq, Eq)]
pub struct AttributeValue(String);

impl From<&str> for AttributeValue {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

impl ToCss for AttributeValue {
    fn to_css<W>(&self, dest: &mut W) -> fmt::Result
    where
        W: fmt::Write,
    {
        use std::fmt::Write;

        write!(cssparser::CssStringWriter::new(dest), "{}", &self.0)
    }
}

impl AsRef<str> for AttributeValue {
    fn as_ref(&self) -> &str {
        self.0.as_ref()
    }
}

/// Wrapper implementing `ToCss` over the `markup5ever::LocalName` atom,
/// used for identifiers (ids, classes).
#[derive(Clone, PartialEq, Eq)]
pub struct Identifier(markup5ever::LocalName);

impl From<&str> for Identifier {
    fn from(s: &str) -> Self {
        Self(markup5ever::LocalName::from(s))
    }
}

impl ToCss for Identifier {
    fn to_css<W>(&self, dest: &mut W) -> fmt::Result
    where
        W: fmt::Write,
    {
        cssparser::serialize_identifier(&self.0, dest)
    }
}

impl PrecomputedHash for Identifier {
    fn precomputed_hash(&self) -> u32 {
        self.0.precomputed_hash()
    }
}

/// Wrapper implementing `ToCss` over `markup5ever::LocalName` for element
/// and attribute local names.
#[derive(Clone, PartialEq, Eq)]
pub struct LocalName(markup5ever::LocalName);

impl From<&str> for LocalName {
    fn from(s: &str) -> Self {
        Self(markup5ever::LocalName::from(s))
    }
}

impl ToCss for LocalName {
    fn to_css<W>(&self, dest: &mut W) -> fmt::Result
    where
        W: fmt::Write,
    {
        cssparser::serialize_identifier(&self.0, dest)
    }
}

impl PrecomputedHash for LocalName {
    fn precomputed_hash(&self) -> u32 {
        self.0.precomputed_hash()
    }
}

/// Wrapper implementing `ToCss` over `markup5ever::Prefix`.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct NamespacePrefix(markup5ever::Prefix);

impl From<&str> for NamespacePrefix {
    fn from(s: &str) -> Self {
        Self(markup5ever::Prefix::from(s))
    }
}

impl ToCss for NamespacePrefix {
    fn to_css<W>(&self, dest: &mut W) -> fmt::Result
    where
        W: fmt::Write,
    {
        cssparser::serialize_identifier(&self.0, dest)
    }
}

/// Holds all the types for the `SelectorImpl` trait.
#[derive(Debug, Clone)]
pub struct BakeSelectorImpl;

impl SelectorImpl for BakeSelectorImpl {
    type ExtraMatchingData<'a> = ();
    type AttrValue = AttributeValue;
    type Identifier = Identifier;
    type LocalName = LocalName;
    type NamespaceUrl = Namespace;
    type NamespacePrefix = NamespacePrefix;
    type BorrowedNamespaceUrl = Namespace;
    type BorrowedLocalName = LocalName;
    type NonTSPseudoClass = NonTSPseudoClass;
    type PseudoElement = PseudoElement;
}

/// Newtype wrapper so `selectors::Element` can be implemented for the
/// document tree's node handle.
#[derive(Clone, PartialEq)]
pub struct BakeElement(pub Node);

impl fmt::Debug for BakeElement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}>", self.0.borrow().name.local)
    }
}

// The selectors crate uses this to examine our tree of elements.
impl selectors::Element for BakeElement {
    type Impl = BakeSelectorImpl;

    fn opaque(&self) -> OpaqueElement {
        // only used for pointer comparisons
        let data: &ElementData = &self.0.borrow();
        OpaqueElement::new::<ElementData>(data)
    }

    fn parent_element(&self) -> Option<Self> {
        self.0.parent().map(Self)
    }

    fn parent_node_is_shadow_root(&self) -> bool {
        false
    }

    fn containing_shadow_host(&self) -> Option<Self> {
        None
    }

    fn is_pseudo_element(&self) -> bool {
        false
    }

    fn prev_sibling_element(&self) -> Option<Self> {
        self.0.previous_sibling().map(Self)
    }

    fn next_sibling_element(&self) -> Option<Self> {
        self.0.next_sibling().map(Self)
    }

    fn first_element_child(&self) -> Option<Self> {
        self.0.first_child().map(Self)
    }

    fn is_html_element_in_html_document(&self) -> bool {
        false
    }

    fn has_local_name(&self, local_name: &LocalName) -> bool {
        self.0.borrow().name.local == local_name.0
    }

    fn has_namespace(&self, namespace: &Namespace) -> bool {
        self.0.borrow().name.ns == *namespace
    }

    fn is_same_type(&self, other: &Self) -> bool {
        self.0.borrow().name == other.0.borrow().name
    }

    fn attr_matches(
        &self,
        ns: &NamespaceConstraint<&Namespace>,
        local_name: &LocalName,
        operation: &AttrSelectorOperation<&AttributeValue>,
    ) -> bool {
        let data = self.0.borrow();
        data.attrs
            .iter()
            .find(|(attr, _)| match *ns {
                NamespaceConstraint::Any => local_name.0 == attr.local,
                NamespaceConstraint::Specific(ns) => {
                    QualName::new(None, ns.clone(), local_name.0.clone()) == **attr
                }
            })
            .is_some_and(|(_, value)| operation.eval_str(value))
    }

    fn match_non_ts_pseudo_class(
        &self,
        _pc: &NonTSPseudoClass,
        _context: &mut MatchingContext<'_, Self::Impl>,
    ) -> bool {
        // :pass() and :deferred route rules, they do not constrain matching
        true
    }

    fn match_pseudo_element(
        &self,
        _pe: &PseudoElement,
        _context: &mut MatchingContext<'_, Self::Impl>,
    ) -> bool {
        // the label is dispatched by the rule store
        true
    }

    fn is_link(&self) -> bool {
        false
    }

    fn is_html_slot_element(&self) -> bool {
        false
    }

    fn has_id(&self, id: &Identifier, case_sensitivity: CaseSensitivity) -> bool {
        self.0
            .id()
            .is_some_and(|self_id| case_sensitivity.eq(self_id.as_bytes(), id.0.as_bytes()))
    }

    fn has_class(&self, name: &Identifier, case_sensitivity: CaseSensitivity) -> bool {
        self.0.attr_local("class").is_some_and(|classes| {
            classes
                .split_whitespace()
                .any(|class| case_sensitivity.eq(class.as_bytes(), name.0.as_bytes()))
        })
    }

    fn has_custom_state(&self, _name: &Identifier) -> bool {
        false
    }

    fn imported_part(&self, _name: &Identifier) -> Option<Identifier> {
        None
    }

    fn is_part(&self, _name: &Identifier) -> bool {
        false
    }

    fn is_empty(&self) -> bool {
        !self.0.has_children() && self.0.text().unwrap_or_default().is_empty()
    }

    fn is_root(&self) -> bool {
        self.0.parent().is_none()
    }

    fn add_element_unique_hashes(&self, _filter: &mut BloomFilter) -> bool {
        false
    }

    fn apply_selector_flags(&self, _flags: ElementSelectorFlags) {}
}

/// Errors from stylesheet parsing.
#[derive(Debug)]
pub enum StyleParseError<'i> {
    Selector(selectors::parser::SelectorParseErrorKind<'i>),
}

impl<'i> From<selectors::parser::SelectorParseErrorKind<'i>> for StyleParseError<'i> {
    fn from(e: selectors::parser::SelectorParseErrorKind<'i>) -> Self {
        Self::Selector(e)
    }
}

/// Parses declaration blocks into [`Declaration`]s.
struct DeclParser;

impl<'i> DeclarationParser<'i> for DeclParser {
    type Declaration = Declaration;
    type Error = StyleParseError<'i>;

    fn parse_value<'t>(
        &mut self,
        name: CowRcStr<'i>,
        input: &mut Parser<'i, 't>,
    ) -> Result<Declaration, cssparser::ParseError<'i, Self::Error>> {
        let location = input.current_source_location();
        let mut value = tokens::collect(input);
        strip_important(&mut value);
        Ok(Declaration {
            name: name.to_string(),
            value,
            // cssparser lines are 0-based
            line: location.line + 1,
            column: location.column,
        })
    }
}

/// Drops a trailing `!important`, which carries no meaning for recipes.
fn strip_important(value: &mut Vec<Token>) {
    while value.last().is_some_and(Token::is_whitespace) {
        value.pop();
    }
    let n = value.len();
    if n >= 2
        && matches!(&value[n - 1].value, TokenValue::Ident(kw) if kw.eq_ignore_ascii_case("important"))
        && matches!(&value[n - 2].value, TokenValue::Delim('!'))
    {
        value.truncate(n - 2);
        while value.last().is_some_and(Token::is_whitespace) {
            value.pop();
        }
    }
}

impl<'i> AtRuleParser<'i> for DeclParser {
    type Prelude = ();
    type AtRule = Declaration;
    type Error = StyleParseError<'i>;
}

impl<'i> QualifiedRuleParser<'i> for DeclParser {
    type Prelude = ();
    type QualifiedRule = Declaration;
    type Error = StyleParseError<'i>;
}

impl<'i> RuleBodyItemParser<'i, Declaration, StyleParseError<'i>> for DeclParser {
    fn parse_declarations(&self) -> bool {
        true
    }

    fn parse_qualified(&self) -> bool {
        false
    }
}

/// A parsed rule, before the store explodes the selector list.
enum Rule {
    Qualified {
        selectors: SelectorList<BakeSelectorImpl>,
        declarations: Vec<Declaration>,
        line: u32,
    },
    Namespace {
        prefix: Option<String>,
        url: String,
    },
}

enum AtRulePrelude {
    Namespace { prefix: Option<String>, url: String },
}

/// Implements `cssparser::QualifiedRuleParser` / `AtRuleParser` and the
/// selector parser for the dialect.
struct RuleParser {
    namespaces: HashMap<String, Namespace>,
}

impl<'i> selectors::Parser<'i> for RuleParser {
    type Impl = BakeSelectorImpl;
    type Error = StyleParseError<'i>;

    fn default_namespace(&self) -> Option<Namespace> {
        None
    }

    fn namespace_for_prefix(&self, prefix: &NamespacePrefix) -> Option<Namespace> {
        self.namespaces.get(prefix.0.as_ref()).cloned()
    }

    fn parse_non_ts_pseudo_class(
        &self,
        location: SourceLocation,
        name: CowRcStr<'i>,
    ) -> Result<NonTSPseudoClass, cssparser::ParseError<'i, Self::Error>> {
        match_ignore_ascii_case! {
            &name,
            "deferred" => Ok(NonTSPseudoClass::Deferred),
            _ => Err(location.new_custom_error(
                selectors::parser::SelectorParseErrorKind::UnsupportedPseudoClassOrElement(name),
            )),
        }
    }

    fn parse_non_ts_functional_pseudo_class(
        &self,
        name: CowRcStr<'i>,
        arguments: &mut Parser<'i, '_>,
        _after_part: bool,
    ) -> Result<NonTSPseudoClass, cssparser::ParseError<'i, Self::Error>> {
        match_ignore_ascii_case! {
            &name,
            "pass" => {
                let pass = parse_pass_name(arguments)?;
                arguments.expect_exhausted()?;
                Ok(NonTSPseudoClass::Pass(pass))
            },
            _ => Err(arguments.new_custom_error(
                selectors::parser::SelectorParseErrorKind::UnsupportedPseudoClassOrElement(name),
            )),
        }
    }

    fn parse_pseudo_element(
        &self,
        location: SourceLocation,
        name: CowRcStr<'i>,
    ) -> Result<PseudoElement, cssparser::ParseError<'i, Self::Error>> {
        match_ignore_ascii_case! {
            &name,
            "before" => Ok(PseudoElement::Before),
            "after" => Ok(PseudoElement::After),
            "inside" => Ok(PseudoElement::Inside),
            "outside" => Ok(PseudoElement::Outside),
            "first-letter" => Ok(PseudoElement::FirstLetter),
            _ => Err(location.new_custom_error(
                selectors::parser::SelectorParseErrorKind::UnsupportedPseudoClassOrElement(name),
            )),
        }
    }

    fn parse_functional_pseudo_element(
        &self,
        name: CowRcStr<'i>,
        arguments: &mut Parser<'i, '_>,
    ) -> Result<PseudoElement, cssparser::ParseError<'i, Self::Error>> {
        match_ignore_ascii_case! {
            &name,
            "attr" => {
                let attr = arguments.expect_ident()?.to_string();
                arguments.expect_exhausted()?;
                Ok(PseudoElement::Attr(attr))
            },
            _ => Err(arguments.new_custom_error(
                selectors::parser::SelectorParseErrorKind::UnsupportedPseudoClassOrElement(name),
            )),
        }
    }
}

fn parse_pass_name<'i>(
    arguments: &mut Parser<'i, '_>,
) -> Result<String, cssparser::ParseError<'i, StyleParseError<'i>>> {
    let token = arguments.next()?.clone();
    match token {
        cssparser::Token::Ident(name) | cssparser::Token::QuotedString(name) => {
            Ok(name.to_string())
        }
        cssparser::Token::Number {
            int_value: Some(int),
            ..
        } => Ok(int.to_string()),
        t => Err(arguments.new_unexpected_token_error(t)),
    }
}

impl<'i> QualifiedRuleParser<'i> for RuleParser {
    type Prelude = SelectorList<BakeSelectorImpl>;
    type QualifiedRule = Rule;
    type Error = StyleParseError<'i>;

    fn parse_prelude<'t>(
        &mut self,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::Prelude, cssparser::ParseError<'i, Self::Error>> {
        SelectorList::parse(self, input, ParseRelative::No)
    }

    fn parse_block<'t>(
        &mut self,
        prelude: Self::Prelude,
        start: &ParserState,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::QualifiedRule, cssparser::ParseError<'i, Self::Error>> {
        let declarations = RuleBodyParser::<_, _, Self::Error>::new(input, &mut DeclParser)
            .filter_map(|result| match result {
                Ok(decl) => Some(decl),
                Err(e) => {
                    warn!("invalid declaration, ignoring: {e:?}");
                    None
                }
            })
            .collect();

        Ok(Rule::Qualified {
            selectors: prelude,
            declarations,
            // cssparser lines are 0-based, LCOV lines are not
            line: start.source_location().line + 1,
        })
    }
}

// Only `@namespace prefix "url"` is supported.
impl<'i> AtRuleParser<'i> for RuleParser {
    type Prelude = AtRulePrelude;
    type AtRule = Rule;
    type Error = StyleParseError<'i>;

    fn parse_prelude<'t>(
        &mut self,
        name: CowRcStr<'i>,
        input: &mut Parser<'i, 't>,
    ) -> Result<Self::Prelude, cssparser::ParseError<'i, Self::Error>> {
        match_ignore_ascii_case! {
            &name,
            "namespace" => {
                let prefix = input
                    .try_parse(|p| p.expect_ident().map(ToString::to_string))
                    .ok();
                let url = input.expect_url_or_string()?.as_ref().to_owned();
                Ok(AtRulePrelude::Namespace { prefix, url })
            },
            _ => Err(input.new_error(BasicParseErrorKind::AtRuleInvalid(name))),
        }
    }

    fn rule_without_block(
        &mut self,
        prelude: Self::Prelude,
        _start: &ParserState,
    ) -> Result<Self::AtRule, ()> {
        let AtRulePrelude::Namespace { prefix, url } = prelude;
        if let Some(prefix) = &prefix {
            self.namespaces
                .insert(prefix.clone(), Namespace::from(url.as_str()));
        }
        Ok(Rule::Namespace { prefix, url })
    }
}

/// One compiled selector with everything the builder needs to run it.
pub struct StoredRule {
    selector: Selector<BakeSelectorImpl>,
    pub line: u32,
    pub passes: Vec<String>,
    pub deferred: bool,
    pub label: Label,
    pub declarations: Rc<Vec<Declaration>>,
    order: usize,
}

/// A rule matched against a concrete element, in cascade order.
pub struct RuleMatch {
    pub line: u32,
    pub deferred: bool,
    pub label: Label,
    pub declarations: Rc<Vec<Declaration>>,
}

/// Compiled selectors indexed by processing pass and pseudo-label.
#[derive(Default)]
pub struct RuleSet {
    rules: Vec<StoredRule>,
    pub namespaces: HashMap<String, Namespace>,
    passes: Vec<String>,
}

impl RuleSet {
    /// Parses a stylesheet and adds its rules. Invalid selectors and unknown
    /// at-rules are skipped with a warning; structural parse errors are
    /// fatal.
    pub fn add_stylesheet(&mut self, css: &str) -> BakeResult<()> {
        let mut input = ParserInput::new(css);
        let mut parser = Parser::new(&mut input);
        let mut rule_parser = RuleParser {
            namespaces: std::mem::take(&mut self.namespaces),
        };

        let mut parsed = Vec::new();
        for result in StyleSheetParser::new(&mut parser, &mut rule_parser) {
            match result {
                Ok(rule) => parsed.push(rule),
                Err((error, slice)) => match &error.kind {
                    ParseErrorKind::Custom(StyleParseError::Selector(e)) => {
                        warn!("invalid selector, skipping rule `{}`: {e:?}", slice.trim());
                    }
                    ParseErrorKind::Basic(BasicParseErrorKind::AtRuleInvalid(name)) => {
                        warn!("unsupported at-rule @{name}, skipping");
                    }
                    kind => {
                        return Err(BakeError::StylesheetParse {
                            line: error.location.line,
                            column: error.location.column,
                            message: format!("{kind:?}"),
                        });
                    }
                },
            }
        }
        self.namespaces = rule_parser.namespaces;

        for rule in parsed {
            match rule {
                Rule::Namespace { prefix: None, url } => {
                    warn!("default @namespace \"{url}\" is unsupported, ignoring");
                }
                Rule::Namespace { .. } => {}
                Rule::Qualified {
                    selectors,
                    declarations,
                    line,
                } => self.add_rule(&selectors, declarations, line),
            }
        }
        self.order_passes();
        Ok(())
    }

    fn add_rule(
        &mut self,
        selectors: &SelectorList<BakeSelectorImpl>,
        declarations: Vec<Declaration>,
        line: u32,
    ) {
        let declarations = Rc::new(declarations);
        for selector in selectors.slice() {
            let mut passes = Vec::new();
            let mut deferred = false;
            let mut label = Label::None;
            let mut valid = true;
            for component in selector.iter_raw_match_order() {
                match component {
                    Component::NonTSPseudoClass(NonTSPseudoClass::Pass(name)) => {
                        if !passes.contains(name) {
                            passes.push(name.clone());
                        }
                    }
                    Component::NonTSPseudoClass(NonTSPseudoClass::Deferred) => deferred = true,
                    Component::PseudoElement(pe) => match pe {
                        PseudoElement::Before => label = Label::Before,
                        PseudoElement::After => label = Label::After,
                        PseudoElement::Inside => label = Label::Inside,
                        PseudoElement::Outside => label = Label::Outside,
                        PseudoElement::FirstLetter | PseudoElement::Attr(_) => {
                            warn!("{} is not a rule position, skipping rule", pe.to_css_string());
                            valid = false;
                        }
                    },
                    _ => {}
                }
            }
            if !valid {
                continue;
            }
            if passes.is_empty() {
                passes.push(DEFAULT_PASS.to_owned());
            }
            self.rules.push(StoredRule {
                selector: selector.clone(),
                line,
                passes,
                deferred,
                label,
                declarations: Rc::clone(&declarations),
                order: self.rules.len(),
            });
        }
    }

    /// Applies the pass ordering rule: when at least one pass name is
    /// numeric, `default` is renamed to `"0"` and the list sorts
    /// numerically; otherwise lexicographically with `default` first.
    fn order_passes(&mut self) {
        let mut names: BTreeSet<String> = BTreeSet::new();
        for rule in &self.rules {
            names.extend(rule.passes.iter().cloned());
        }
        if names.is_empty() {
            names.insert(DEFAULT_PASS.to_owned());
        }

        let any_numeric = names
            .iter()
            .any(|name| name != DEFAULT_PASS && name.parse::<i64>().is_ok());
        if any_numeric && names.remove(DEFAULT_PASS) {
            names.insert("0".to_owned());
            for rule in &mut self.rules {
                for pass in &mut rule.passes {
                    if pass == DEFAULT_PASS {
                        "0".clone_into(pass);
                    }
                }
            }
        }

        let mut ordered: Vec<String> = names.into_iter().collect();
        if any_numeric {
            ordered.sort_by(|a, b| match (a.parse::<i64>(), b.parse::<i64>()) {
                (Ok(x), Ok(y)) => x.cmp(&y),
                (Ok(_), Err(_)) => std::cmp::Ordering::Less,
                (Err(_), Ok(_)) => std::cmp::Ordering::Greater,
                (Err(_), Err(_)) => a.cmp(b),
            });
        } else {
            ordered.sort_by(|a, b| {
                let a_default = a == DEFAULT_PASS;
                let b_default = b == DEFAULT_PASS;
                b_default.cmp(&a_default).then_with(|| a.cmp(b))
            });
        }
        self.passes = ordered;
    }

    /// The ordered pass list.
    pub fn passes(&self) -> &[String] {
        &self.passes
    }

    /// Whether every pass name is numeric (drives `stop-at` comparison).
    pub fn passes_all_numeric(&self) -> bool {
        !self.passes.is_empty()
            && self.passes.iter().all(|name| name.parse::<i64>().is_ok())
    }

    /// Source lines of every stored selector, for coverage reporting.
    pub fn lines(&self) -> impl Iterator<Item = u32> + '_ {
        self.rules.iter().map(|rule| rule.line)
    }

    /// Matches `node` against every rule of `pass`, returning matches in
    /// cascade order (specificity, then source order).
    pub fn matches_for(&self, pass: &str, node: &Node) -> Vec<RuleMatch> {
        let element = BakeElement(node.clone());
        let mut matched: Vec<(u32, usize, &StoredRule)> = Vec::new();

        let mut plain_caches = SelectorCaches::default();
        let mut plain_ctx = MatchingContext::new(
            MatchingMode::Normal,
            None,
            &mut plain_caches,
            QuirksMode::NoQuirks,
            NeedsSelectorFlags::No,
            MatchingForInvalidation::No,
        );
        let mut pseudo_caches = SelectorCaches::default();
        let mut pseudo_ctx = MatchingContext::new(
            MatchingMode::ForStatelessPseudoElement,
            None,
            &mut pseudo_caches,
            QuirksMode::NoQuirks,
            NeedsSelectorFlags::No,
            MatchingForInvalidation::No,
        );

        for rule in &self.rules {
            if !rule.passes.iter().any(|p| p == pass) {
                continue;
            }
            let ctx = if rule.label == Label::None {
                &mut plain_ctx
            } else {
                &mut pseudo_ctx
            };
            if matches_selector(&rule.selector, 0, None, &element, ctx) {
                matched.push((rule.selector.specificity(), rule.order, rule));
            }
        }

        matched.sort_by_key(|&(specificity, order, _)| (specificity, order));
        matched
            .into_iter()
            .map(|(_, _, rule)| RuleMatch {
                line: rule.line,
                deferred: rule.deferred,
                label: rule.label,
                declarations: Rc::clone(&rule.declarations),
            })
            .collect()
    }
}

/// Parses a bare selector list (used by `sort-by`/`group-by` key
/// extractors).
pub fn parse_selector_list(
    css: &str,
    namespaces: &HashMap<String, Namespace>,
) -> Option<SelectorList<BakeSelectorImpl>> {
    let parser = RuleParser {
        namespaces: namespaces.clone(),
    };
    let mut input = ParserInput::new(css);
    let mut css_parser = Parser::new(&mut input);
    match SelectorList::parse(&parser, &mut css_parser, ParseRelative::No) {
        Ok(list) => Some(list),
        Err(e) => {
            warn!("invalid key selector `{css}`: {e:?}");
            None
        }
    }
}

/// Matches a single element against a selector list.
pub fn element_matches(list: &SelectorList<BakeSelectorImpl>, node: &Node) -> bool {
    let element = BakeElement(node.clone());
    let mut plain_caches = SelectorCaches::default();
    let mut plain_ctx = MatchingContext::new(
        MatchingMode::Normal,
        None,
        &mut plain_caches,
        QuirksMode::NoQuirks,
        NeedsSelectorFlags::No,
        MatchingForInvalidation::No,
    );
    let mut pseudo_caches = SelectorCaches::default();
    let mut pseudo_ctx = MatchingContext::new(
        MatchingMode::ForStatelessPseudoElement,
        None,
        &mut pseudo_caches,
        QuirksMode::NoQuirks,
        NeedsSelectorFlags::No,
        MatchingForInvalidation::No,
    );
    list.slice().iter().any(|selector| {
        let ctx = if selector.has_pseudo_element() {
            &mut pseudo_ctx
        } else {
            &mut plain_ctx
        };
        matches_selector(selector, 0, None, &element, ctx)
    })
}

/// The trailing pseudo-element of the first selector in a list, if any.
pub fn selector_pseudo_element(list: &SelectorList<BakeSelectorImpl>) -> Option<PseudoElement> {
    let selector = list.slice().first()?;
    selector.iter_raw_match_order().find_map(|c| match c {
        Component::PseudoElement(pe) => Some(pe.clone()),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::html::parse_str;

    fn rules(css: &str) -> RuleSet {
        let mut set = RuleSet::default();
        set.add_stylesheet(css).expect("stylesheet parses");
        set
    }

    #[test]
    fn passes_default_and_labels() {
        let set = rules(
            "div {copy-to: b} \
             div:pass(\"two\")::after {content: pending(b)}",
        );
        assert_eq!(set.passes(), ["default".to_owned(), "two".to_owned()]);
    }

    #[test]
    fn numeric_passes_rename_default() {
        let set = rules(
            "div {copy-to: b} \
             div:pass(\"5\")::after {content: \"Z\"} \
             div:pass(\"10\") {counter-increment: c}",
        );
        assert_eq!(
            set.passes(),
            ["0".to_owned(), "5".to_owned(), "10".to_owned()]
        );
        assert!(set.passes_all_numeric());
    }

    #[test]
    fn matching_buckets_by_label_and_order() {
        let set = rules(
            "div {class: \"a\"} \
             div[data-type=\"book\"]::after {content: \"x\"} \
             div:deferred {class: \"b\"}",
        );
        let doc = parse_str("<div data-type=\"book\" id=\"d\"></div>");
        let div = crate::dom::find_by_id(&doc.root, "d").unwrap();
        let matches = set.matches_for("default", &div);
        assert_eq!(matches.len(), 3);
        // specificity orders the attribute selector last
        assert_eq!(matches[0].label, Label::None);
        assert!(!matches[0].deferred);
        assert!(matches[1].deferred);
        assert_eq!(matches[2].label, Label::After);
    }

    #[test]
    fn invalid_selector_is_skipped() {
        let set = rules("div::unknown {class: \"a\"} p {class: \"b\"}");
        let doc = parse_str("<p id=\"p\"></p>");
        let p = crate::dom::find_by_id(&doc.root, "p").unwrap();
        assert_eq!(set.matches_for("default", &p).len(), 1);
    }

    #[test]
    fn key_selector_pseudo_elements() {
        let list = parse_selector_list(".term::first-letter", &HashMap::new()).unwrap();
        assert_eq!(selector_pseudo_element(&list), Some(PseudoElement::FirstLetter));
        let list = parse_selector_list("a::attr(href)", &HashMap::new()).unwrap();
        assert_eq!(
            selector_pseudo_element(&list),
            Some(PseudoElement::Attr("href".to_owned()))
        );
    }
}
