//! Structural extraction from raw markup.
//!
//! Parses the document with the `scraper` crate and collects the head
//! metadata, body structure and element statistics into a
//! [`StructuralSummary`]. Extraction never fails: a selector that does not
//! match, or markup that is malformed, simply yields empty collections.

use crate::error::{AnalyzerError, AnalyzerResult};
use crate::types::*;
use scraper::{ElementRef, Html, Selector};
use std::collections::BTreeMap;
use std::panic::{self, AssertUnwindSafe};

/// Number of characters of inline script source kept in [`ScriptRef::inline`].
const INLINE_SCRIPT_PREVIEW: usize = 50;

/// Extract the structural summary of a page.
pub fn extract(markup: &str) -> StructuralSummary {
    let document = Html::parse_document(markup);

    StructuralSummary {
        head: extract_head(&document),
        body: extract_body(&document),
        stats: extract_stats(&document),
    }
}

/// [`extract`], with a panic inside the parser reported as
/// [`AnalyzerError::ExtractionFailure`] instead of unwinding into the caller.
pub fn try_extract(markup: &str) -> AnalyzerResult<StructuralSummary> {
    panic::catch_unwind(AssertUnwindSafe(|| extract(markup)))
        .map_err(|_| AnalyzerError::ExtractionFailure("markup parser panicked".to_string()))
}

/// Depth of the subtree below `element`: 0 for a childless element, otherwise
/// one more than the deepest child. Only element children count.
pub fn tree_depth(element: ElementRef<'_>) -> usize {
    // Explicit stack: page markup can nest deeper than the call stack allows.
    let mut stack = vec![(element, 0usize)];
    let mut deepest = 0;

    while let Some((node, level)) = stack.pop() {
        deepest = deepest.max(level);
        stack.extend(
            node.children()
                .filter_map(ElementRef::wrap)
                .map(|child| (child, level + 1)),
        );
    }

    deepest
}

// ── Selection helpers ───────────────────────────────────────────────────────

fn select<'a>(document: &'a Html, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(sel) => document.select(&sel).collect(),
        Err(_) => Vec::new(),
    }
}

fn select_within<'a>(element: ElementRef<'a>, css: &str) -> Vec<ElementRef<'a>> {
    match Selector::parse(css) {
        Ok(sel) => element.select(&sel).collect(),
        Err(_) => Vec::new(),
    }
}

fn text_of(element: ElementRef<'_>) -> String {
    element.text().collect()
}

fn trimmed_text(element: ElementRef<'_>) -> String {
    text_of(element).trim().to_string()
}

fn attr(element: ElementRef<'_>, name: &str) -> Option<String> {
    element.value().attr(name).map(|s| s.to_string())
}

/// Attribute value, treating an empty attribute like a missing one.
fn non_empty_attr(element: ElementRef<'_>, name: &str) -> Option<String> {
    element
        .value()
        .attr(name)
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
}

// ── Head ────────────────────────────────────────────────────────────────────

fn extract_head(document: &Html) -> HeadSection {
    let title = select(document, "title")
        .into_iter()
        .map(text_of)
        .collect::<String>();

    let meta = select(document, "meta")
        .into_iter()
        .map(|el| MetaEntry {
            name: non_empty_attr(el, "name").or_else(|| attr(el, "property")),
            content: attr(el, "content"),
        })
        .collect();

    let links = select(document, "head link")
        .into_iter()
        .map(|el| LinkRelation {
            rel: attr(el, "rel"),
            href: attr(el, "href"),
        })
        .collect();

    let scripts = select(document, "head script")
        .into_iter()
        .map(|el| {
            let source = el.inner_html();
            let source = source.trim();
            ScriptRef {
                src: non_empty_attr(el, "src"),
                inline: (!source.is_empty())
                    .then(|| source.chars().take(INLINE_SCRIPT_PREVIEW).collect()),
            }
        })
        .collect();

    HeadSection {
        title,
        meta,
        links,
        scripts,
    }
}

// ── Body ────────────────────────────────────────────────────────────────────

fn extract_body(document: &Html) -> BodySection {
    let mut headings = Headings::default();
    for level in 1..=6u8 {
        if let Some(slot) = headings.level_mut(level) {
            *slot = select(document, &format!("h{level}"))
                .into_iter()
                .map(trimmed_text)
                .collect();
        }
    }

    let links = select(document, "a")
        .into_iter()
        .map(|el| Anchor {
            href: attr(el, "href"),
            text: trimmed_text(el),
        })
        .collect();

    let images = select(document, "img")
        .into_iter()
        .map(|el| ImageRef {
            src: attr(el, "src"),
            alt: attr(el, "alt").unwrap_or_default(),
        })
        .collect();

    let media = |tag: &str| -> Vec<MediaRef> {
        select(document, tag)
            .into_iter()
            .map(|el| MediaRef {
                src: non_empty_attr(el, "src"),
                controls: el.value().attr("controls").is_some(),
            })
            .collect()
    };

    let iframes = select(document, "iframe")
        .into_iter()
        .map(|el| FrameRef {
            src: non_empty_attr(el, "src"),
            title: non_empty_attr(el, "title"),
        })
        .collect();

    BodySection {
        headings,
        links,
        forms: extract_forms(document),
        images,
        videos: media("video"),
        audios: media("audio"),
        iframes,
        lists: extract_lists(document),
        tables: extract_tables(document),
    }
}

fn extract_forms(document: &Html) -> Vec<FormSummary> {
    select(document, "form")
        .into_iter()
        .map(|form| {
            let inputs = select_within(form, "input, select, textarea, button")
                .into_iter()
                .map(|field| {
                    let tag = field.value().name().to_string();
                    InputDescriptor {
                        name: non_empty_attr(field, "name"),
                        input_type: non_empty_attr(field, "type")
                            .unwrap_or_else(|| tag.to_lowercase()),
                        value: non_empty_attr(field, "value"),
                        placeholder: non_empty_attr(field, "placeholder"),
                        tag,
                    }
                })
                .collect();

            FormSummary {
                action: non_empty_attr(form, "action"),
                method: non_empty_attr(form, "method").unwrap_or_else(|| "GET".to_string()),
                inputs,
            }
        })
        .collect()
}

fn extract_lists(document: &Html) -> Vec<ListSummary> {
    select(document, "ul, ol")
        .into_iter()
        .map(|list| ListSummary {
            kind: if list.value().name().eq_ignore_ascii_case("ol") {
                ListKind::Ol
            } else {
                ListKind::Ul
            },
            items: select_within(list, "li")
                .into_iter()
                .map(trimmed_text)
                .collect(),
        })
        .collect()
}

fn extract_tables(document: &Html) -> Vec<TableSummary> {
    select(document, "table")
        .into_iter()
        .map(|table| TableSummary {
            rows: select_within(table, "tr")
                .into_iter()
                .map(|row| {
                    select_within(row, "th, td")
                        .into_iter()
                        .map(trimmed_text)
                        .collect()
                })
                .collect(),
        })
        .collect()
}

// ── Stats ───────────────────────────────────────────────────────────────────

fn extract_stats(document: &Html) -> DocumentStats {
    let mut tag_count: BTreeMap<String, usize> = BTreeMap::new();
    let mut total_elements = 0;

    for element in select(document, "*") {
        total_elements += 1;
        *tag_count
            .entry(element.value().name().to_lowercase())
            .or_insert(0) += 1;
    }

    DocumentStats {
        total_elements,
        depth: tree_depth(document.root_element()),
        tag_count,
    }
}
