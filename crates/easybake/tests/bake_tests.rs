//! End-to-end bakes over literal stylesheets and documents.

use easybake::dom::find_by_id;
use easybake::html::{parse_str, serialize_to_string};
use easybake::Oven;
use pretty_assertions::assert_eq;

/// Bakes `html` with `css` and returns the serialized `<body>` content.
fn bake(css: &str, html: &str) -> String {
    bake_stopping(css, html, None)
}

fn bake_stopping(css: &str, html: &str, stop_at: Option<&str>) -> String {
    let mut oven = Oven::new(css, true).expect("stylesheet parses");
    let doc = parse_str(html);
    oven.bake(&doc.root, stop_at);
    let body = doc
        .root
        .children()
        .find(|child| &*child.borrow().name.local == "body")
        .expect("html5ever produces a body");
    let serialized = serialize_to_string(&body);
    serialized
        .strip_prefix("<body>")
        .and_then(|s| s.strip_suffix("</body>"))
        .unwrap_or(&serialized)
        .to_owned()
}

#[test]
fn copy_to_pending_appends_a_deep_copy() {
    let out = bake(
        "div[data-type=\"copy-me\"] {copy-to: bucket} \
         div[data-type=\"book\"]::after {content: pending(bucket)}",
        "<div data-type=\"book\"><div data-type=\"copy-me\" id=\"n\">X</div></div>",
    );
    assert_eq!(
        out,
        "<div data-type=\"book\"><div data-type=\"copy-me\" id=\"n\">X</div>\
         <div><div data-type=\"copy-me\" id=\"n_copy\">X</div></div></div>"
    );
}

#[test]
fn second_pass_sees_first_pass_output() {
    let out = bake(
        "div[data-type=\"copy-me\"] {copy-to: bucket} \
         div[data-type=\"book\"]::after {content: pending(bucket)} \
         div[data-type=\"book\"]:pass(\"5\")::after {content: \"Z\"}",
        "<div data-type=\"book\"><div data-type=\"copy-me\">X</div></div>",
    );
    assert_eq!(
        out,
        "<div data-type=\"book\"><div data-type=\"copy-me\">X</div>\
         <div><div data-type=\"copy-me\">X</div></div><div>Z</div></div>"
    );
}

#[test]
fn stop_at_skips_later_passes() {
    let out = bake_stopping(
        "div[data-type=\"book\"]::after {content: \"A\"} \
         div[data-type=\"book\"]:pass(\"5\")::after {content: \"Z\"}",
        "<div data-type=\"book\"></div>",
        Some("5"),
    );
    assert_eq!(out, "<div data-type=\"book\"><div>A</div></div>");
}

#[test]
fn target_counter_reads_the_snapshot() {
    let out = bake(
        "h1 {counter-increment: chap} \
         a {content: target-counter(attr(href), chap)}",
        "<h1 id=\"c1\"></h1><h1 id=\"c2\"></h1><a href=\"#c2\"></a>",
    );
    assert_eq!(
        out,
        "<h1 id=\"c1\"></h1><h1 id=\"c2\"></h1><a href=\"#c2\">2</a>"
    );
}

#[test]
fn target_counter_with_style_and_counter_function() {
    let out = bake(
        "h1 {counter-increment: chap} \
         h1::before {container: span; content: counter(chap, upper-roman) \". \"}",
        "<h1>One</h1><h1>Two</h1>",
    );
    assert_eq!(
        out,
        "<h1><span>I. </span>One</h1><h1><span>II. </span>Two</h1>"
    );
}

#[test]
fn string_set_and_target_text() {
    let out = bake(
        "h1 {string-set: title content()} \
         a {content: target-text(attr(href), title)}",
        "<h1 id=\"h\">Bread <em>Basics</em></h1><a href=\"#h\"></a>",
    );
    assert_eq!(
        out,
        "<h1 id=\"h\">Bread <em>Basics</em></h1><a href=\"#h\">Bread Basics</a>"
    );
}

#[test]
fn move_to_supersedes_earlier_moves() {
    let out = bake(
        "div.x {move-to: a} \
         div.x {move-to: b} \
         div.enda::after {content: pending(a)} \
         div.endb::after {content: pending(b)}",
        "<div class=\"x\">M</div><div class=\"enda\"></div><div class=\"endb\"></div>",
    );
    // the node lands in bucket b only; pending(a) finds an empty bucket
    assert_eq!(
        out,
        "<div class=\"enda\"></div><div class=\"endb\"><div><div class=\"x\">M</div></div></div>"
    );
}

#[test]
fn outside_wraps_with_a_fresh_parent() {
    let out = bake(
        "section::outside {container: aside; content: content()}",
        "<div id=\"p\"><section>S</section></div>",
    );
    assert_eq!(
        out,
        "<div id=\"p\"><aside><section>S</section></aside></div>"
    );
}

#[test]
fn content_on_after_duplicates_the_element_content() {
    let out = bake(
        "div.dup::after {content: content()}",
        "<div class=\"dup\" id=\"d\"><em id=\"e\">x</em></div>",
    );
    assert_eq!(
        out,
        "<div class=\"dup\" id=\"d\"><em id=\"e\">x</em>\
         <div><em id=\"e_copy\">x</em></div></div>"
    );
}

#[test]
fn clear_drops_collected_nodes_without_residue() {
    let out = bake(
        "div.junk {move-to: junk} \
         div.scratch::after {content: clear(junk)}",
        "<div class=\"junk\">gone</div><div class=\"scratch\">keep</div>",
    );
    assert_eq!(out, "<div class=\"scratch\">keep</div>");
}

#[test]
fn group_by_first_letter_nocase() {
    let out = bake(
        "div.item {move-to: items} \
         div.index::after {content: pending(items); \
                           group-by: \".term\", \".term::first-letter\", nocase}",
        "<div class=\"item\"><span class=\"term\">apple</span></div>\
         <div class=\"item\"><span class=\"term\">Banana</span></div>\
         <div class=\"item\"><span class=\"term\">almond</span></div>\
         <div class=\"index\" id=\"idx\"></div>",
    );
    let idx_pos = out.find("class=\"index\"").unwrap();
    let grouped = &out[idx_pos..];
    let a_label = grouped.find("<span class=\"group-label\">A</span>").unwrap();
    let b_label = grouped.find("<span class=\"group-label\">B</span>").unwrap();
    assert!(a_label < b_label, "group A before group B: {grouped}");
    let almond = grouped.find("almond").unwrap();
    let apple = grouped.find("apple").unwrap();
    let banana = grouped.find("Banana").unwrap();
    assert!(almond < apple, "collation order within the group: {grouped}");
    assert!(apple < banana, "A group precedes B content: {grouped}");
}

#[test]
fn sort_by_orders_moved_nodes() {
    let out = bake(
        "li {move-to: entries} \
         ul.sorted::inside {content: pending(entries); sort-by: li}",
        "<ul class=\"sorted\"><li>pear</li><li>apple</li><li>Banana</li></ul>",
    );
    assert_eq!(
        out,
        "<ul class=\"sorted\"><div><li>apple</li><li>Banana</li><li>pear</li></div></ul>"
    );
}

#[test]
fn node_set_and_nodes_leave_the_bucket_intact() {
    let out = bake(
        "div.src {node-set: stamp} \
         div.a::after {content: nodes(stamp)} \
         div.b::after {content: nodes(stamp)}",
        "<div class=\"src\" id=\"s\">T</div><div class=\"a\"></div><div class=\"b\"></div>",
    );
    // both consumers get a numbered copy
    assert!(out.contains("id=\"s_copy_1\""), "got {out}");
    assert!(out.contains("id=\"s_copy_2\""), "got {out}");
    // and the source stays where it was
    assert!(out.starts_with("<div class=\"src\" id=\"s\">T</div>"), "got {out}");
}

#[test]
fn class_and_data_attributes_on_wrappers() {
    let out = bake(
        "div.note {move-to: notes} \
         div.chapter::after {container: section; class: \"end-notes\"; \
                             data-kind: attr(data-kind); content: pending(notes)}",
        "<div class=\"chapter\" data-kind=\"k\"><div class=\"note\">N</div></div>",
    );
    assert_eq!(
        out,
        "<div class=\"chapter\" data-kind=\"k\">\
         <section class=\"end-notes\" data-kind=\"k\"><div class=\"note\">N</div></section></div>"
    );
}

#[test]
fn string_functions_with_defaults() {
    let out = bake(
        "div.a {string-set: label \"known\"} \
         div.b::after {content: string(label)} \
         div.c::after {content: string(missing, \"fallback\")}",
        "<div class=\"a\"></div><div class=\"b\"></div><div class=\"c\"></div>",
    );
    assert_eq!(
        out,
        "<div class=\"a\"></div><div class=\"b\"><div>known</div></div>\
         <div class=\"c\"><div>fallback</div></div>"
    );
}

#[test]
fn uuid_generates_repeatable_ids() {
    let out = bake(
        "div.tag::after {content: uuid()}",
        "<div class=\"tag\"></div><div class=\"tag\"></div>",
    );
    assert_eq!(
        out,
        "<div class=\"tag\"><div>autobaked-1</div></div>\
         <div class=\"tag\"><div>autobaked-2</div></div>"
    );
}

#[test]
fn unknown_declarations_and_functions_are_ignored() {
    let out = bake(
        "div.x {frobnicate: 1; content: \"a\" mystery() \"b\"}",
        "<div class=\"x\">old</div>",
    );
    assert_eq!(out, "<div class=\"x\">ab</div>");
}

#[test]
fn deferred_rules_run_after_children() {
    // the deferred rule sees the counter value after the subtree walked
    let out = bake(
        "p {counter-increment: n} \
         div.box:deferred {string-set: total counter(n)} \
         div.result::after {content: string(total, \"none\")}",
        "<div class=\"box\"><p></p><p></p></div><div class=\"result\"></div>",
    );
    assert_eq!(
        out,
        "<div class=\"box\"><p></p><p></p></div><div class=\"result\"><div>2</div></div>"
    );
}

#[test]
fn baked_output_closes_empty_elements() {
    let out = bake("", "<div id=\"empty\"></div><br>");
    assert_eq!(out, "<div id=\"empty\"></div><br>");
}

#[test]
fn counters_reset_and_increment_with_values() {
    let out = bake(
        "ol {counter-reset: item 10} \
         li {counter-increment: item 2} \
         li::before {content: counter(item) \": \"}",
        "<ol><li>a</li><li>b</li></ol>",
    );
    assert_eq!(
        out,
        "<ol><li><div>12: </div>a</li><li><div>14: </div>b</li></ol>"
    );
}

#[test]
fn stylesheet_parse_error_is_fatal_but_bad_selector_is_not() {
    assert!(Oven::new("div::unknown {content: \"x\"}", true).is_ok());
    assert!(Oven::new("@import \"other.css\";", true).is_ok());
}

#[test]
fn coverage_reports_matched_rules() {
    let css = "div.hit {class: \"x\"}\np.miss {class: \"y\"}";
    let mut oven = Oven::new(css, true).unwrap();
    let doc = parse_str("<div class=\"hit\"></div>");
    oven.bake(&doc.root, None);
    let report = oven.coverage_report();
    assert!(report.contains("DA:1,1"), "line 1 matched: {report}");
    assert!(report.contains("DA:2,0"), "line 2 did not: {report}");
}

#[test]
fn snapshot_is_taken_before_children() {
    // the chapter's own snapshot must not include increments made by its
    // descendants
    let out = bake(
        "div.chapter {counter-increment: c} \
         div.sub {counter-increment: c} \
         a {content: target-counter(attr(href), c)}",
        "<div class=\"chapter\" id=\"ch\"><div class=\"sub\"></div></div><a href=\"#ch\"></a>",
    );
    let doc_pos = out.find("<a href=\"#ch\">1</a>");
    assert!(doc_pos.is_some(), "anchor shows pre-walk value: {out}");
}

#[test]
fn ids_referenced_before_definition_resolve_to_nil() {
    let out = bake(
        "a {content: target-counter(attr(href), chap) \"!\"}",
        "<a href=\"#nowhere\"></a>",
    );
    assert_eq!(out, "<a href=\"#nowhere\">0!</a>");
}

#[test]
fn repeated_bake_reuses_the_recipe() {
    let mut oven = Oven::new(
        "div.x::after {content: \"A\"}",
        true,
    )
    .unwrap();
    let doc = parse_str("<div class=\"x\" id=\"d\"></div>");
    oven.bake(&doc.root, None);
    oven.bake(&doc.root, None);
    let d = find_by_id(&doc.root, "d").unwrap();
    // the cached recipe moves the same wrapper again instead of minting a
    // second one
    assert_eq!(d.children().count(), 1);
}
