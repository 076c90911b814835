//! Locale-aware comparison and the key extractors behind `sort-by` and
//! `group-by`.
//!
//! Keys are pulled out of candidate subtrees by a compiled CSS selector
//! with an optional trailing pseudo-element: bare selectors read the
//! matched element's leading text, `::first-letter` its first character,
//! `::attr(name)` an attribute. Comparison runs through an ICU collator
//! for the target's language.

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use icu::casemap::CaseMapper;
use icu::collator::{Collator, CollatorOptions};
use icu::locid::Locale;
use markup5ever::Namespace;
use selectors::SelectorList;
use tracing::warn;

use crate::css::{self, BakeSelectorImpl, PseudoElement};
use crate::dom::{Node, NodeExt};

/// A collator bound to one language tag. Unknown or missing tags collate
/// with the root locale; if no collation data is available at all the
/// comparison degrades to code-point order.
pub struct LocaleCollation {
    collator: Option<Collator>,
}

impl LocaleCollation {
    pub fn new(lang: Option<&str>) -> Self {
        let locale = parse_locale(lang);
        let collator = match Collator::try_new(&locale.into(), CollatorOptions::new()) {
            Ok(collator) => Some(collator),
            Err(e) => {
                warn!("no collator for {lang:?} ({e}), falling back to code-point order");
                None
            }
        };
        Self { collator }
    }

    /// Compares two sort keys; `None` keys compare as empty strings.
    pub fn compare(&self, a: Option<&str>, b: Option<&str>) -> Ordering {
        let a = a.unwrap_or("");
        let b = b.unwrap_or("");
        match &self.collator {
            Some(collator) => collator.compare(a, b),
            None => a.cmp(b),
        }
    }
}

fn parse_locale(lang: Option<&str>) -> Locale {
    lang.and_then(|tag| tag.parse().ok()).unwrap_or(Locale::UND)
}

/// Locale-aware upper-casing, used by the `nocase` flag.
pub fn uppercase(text: &str, lang: Option<&str>) -> String {
    let locale = parse_locale(lang);
    CaseMapper::new().uppercase_to_string(text, &locale.id)
}

/// What a key extractor reads from the matched element.
#[derive(Debug, Clone, PartialEq, Eq)]
enum KeySource {
    Text,
    Attr(String),
}

/// A compiled key-extraction function over a node: match a selector in the
/// candidate subtree, then read text or an attribute off the match.
#[derive(Clone)]
pub struct KeyExtractor {
    source_css: String,
    selectors: SelectorList<BakeSelectorImpl>,
    source: KeySource,
    first_letter: bool,
    nocase: bool,
}

impl fmt::Debug for KeyExtractor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyExtractor({})", self.source_css)
    }
}

impl KeyExtractor {
    /// Compiles a key extractor from a selector string. Returns `None` (with
    /// a warning) when the selector does not parse.
    pub fn compile(
        css: &str,
        nocase: bool,
        namespaces: &HashMap<String, Namespace>,
    ) -> Option<Self> {
        // stylesheet toolchains sometimes quote the selector to protect the
        // pseudo-element; unwrap that
        let css = css.trim().trim_matches('"').trim();
        if css.is_empty() {
            return None;
        }
        let selectors = css::parse_selector_list(css, namespaces)?;
        let (source, first_letter) = match css::selector_pseudo_element(&selectors) {
            None => (KeySource::Text, false),
            Some(PseudoElement::FirstLetter) => (KeySource::Text, true),
            Some(PseudoElement::Attr(name)) => (KeySource::Attr(name), false),
            Some(other) => {
                warn!("pseudo-element {other:?} has no meaning in a key selector, reading text");
                (KeySource::Text, false)
            }
        };
        Some(Self {
            source_css: css.to_owned(),
            selectors,
            source,
            first_letter,
            nocase,
        })
    }

    /// Extracts the key from a candidate node: the first element of the
    /// subtree (in document order, self included) matching the selector
    /// provides the key. `None` when nothing matches or the source is
    /// absent.
    pub fn extract(&self, node: &Node, lang: Option<&str>) -> Option<String> {
        let mut key = node
            .descendants()
            .filter(|candidate| css::element_matches(&self.selectors, candidate))
            .find_map(|matched| match &self.source {
                KeySource::Text => matched.text(),
                KeySource::Attr(name) => matched.attr_local(name),
            })?;
        if self.first_letter {
            key = key.chars().next().map(String::from)?;
        }
        if self.nocase {
            key = uppercase(&key, lang);
        }
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dom::find_by_id;
    use crate::html::parse_str;

    #[test]
    fn collation_orders_accented_words() {
        let collation = LocaleCollation::new(Some("en"));
        assert_eq!(collation.compare(Some("almond"), Some("apple")), Ordering::Less);
        // a collator ignores case at the primary level where a byte
        // comparison would not
        assert_eq!(collation.compare(Some("Banana"), Some("apple")), Ordering::Greater);
        assert_eq!(collation.compare(None, Some("x")), Ordering::Less);
    }

    #[test]
    fn extracts_text_first_letter_and_attrs() {
        let doc = parse_str(
            "<div id=\"item\"><span class=\"term\">apple</span>\
             <a id=\"link\" href=\"#x\">go</a></div>",
        );
        let item = find_by_id(&doc.root, "item").unwrap();

        let text = KeyExtractor::compile(".term", false, &HashMap::new()).unwrap();
        assert_eq!(text.extract(&item, None), Some("apple".to_owned()));

        let first = KeyExtractor::compile(".term::first-letter", true, &HashMap::new()).unwrap();
        assert_eq!(first.extract(&item, Some("en")), Some("A".to_owned()));

        let attr = KeyExtractor::compile("a::attr(href)", false, &HashMap::new()).unwrap();
        assert_eq!(attr.extract(&item, None), Some("#x".to_owned()));

        let miss = KeyExtractor::compile(".nope", false, &HashMap::new()).unwrap();
        assert_eq!(miss.extract(&item, None), None);
    }

    #[test]
    fn quoted_selectors_are_unwrapped() {
        let doc = parse_str("<div id=\"d\"><span class=\"t\">x</span></div>");
        let d = find_by_id(&doc.root, "d").unwrap();
        let extractor = KeyExtractor::compile("\".t::first-letter\"", false, &HashMap::new()).unwrap();
        assert_eq!(extractor.extract(&d, None), Some("x".to_owned()));
    }
}
