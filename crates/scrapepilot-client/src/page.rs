//! Markup-only derivation of text and metadata from rendered HTML.
//!
//! Nothing here executes scripts. `scraper::Html` is not `Send`, so every
//! function parses and drops the document synchronously.

use std::collections::HashSet;
use std::sync::LazyLock;

use scraper::{ElementRef, Html, Node, Selector};
use scrapepilot_core::models::{MAX_IMAGES, MAX_LINKS, PageMetadata};
use url::Url;

/// Character budget of the text handed to the extraction backend.
pub const EXTRACTION_TEXT_LIMIT: usize = 15_000;

static BODY: LazyLock<Selector> = LazyLock::new(|| selector("body"));
static TITLE: LazyLock<Selector> = LazyLock::new(|| selector("title"));
static HTML_ROOT: LazyLock<Selector> = LazyLock::new(|| selector("html"));
static META_DESCRIPTION: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"meta[name="description"]"#));
static OG_DESCRIPTION: LazyLock<Selector> =
    LazyLock::new(|| selector(r#"meta[property="og:description"]"#));
static LINKS: LazyLock<Selector> = LazyLock::new(|| selector("a[href]"));
static IMAGES: LazyLock<Selector> = LazyLock::new(|| selector("img[src]"));

const NON_TEXT_TAGS: &[&str] = &["script", "style", "noscript", "iframe", "template"];
const NON_CONTENT_TAGS: &[&str] = &["svg", "head"];

fn selector(css: &str) -> Selector {
    Selector::parse(css).expect("static selector must parse")
}

/// Text and metadata of a page, as both render strategies report them.
#[derive(Debug, Clone, PartialEq)]
pub struct PageView {
    pub text: String,
    pub metadata: PageMetadata,
}

impl PageView {
    /// Parse `html` once. Relative links resolve against `base_url`.
    pub fn derive(html: &str, base_url: &str) -> Self {
        let document = Html::parse_document(html);
        let base = Url::parse(base_url).ok();

        Self {
            text: body_text(&document, is_non_text),
            metadata: metadata(&document, base.as_ref()),
        }
    }
}

/// Visible body text for the extraction stage: additionally drops hidden
/// and decorative elements, capped at [`EXTRACTION_TEXT_LIMIT`] characters.
pub fn extraction_text(html: &str) -> String {
    let document = Html::parse_document(html);
    let text = body_text(&document, |el| is_non_text(el) || is_hidden(el));
    truncate_chars(text, EXTRACTION_TEXT_LIMIT)
}

fn is_non_text(el: &ElementRef<'_>) -> bool {
    NON_TEXT_TAGS.contains(&el.value().name())
}

fn is_hidden(el: &ElementRef<'_>) -> bool {
    let value = el.value();
    if NON_CONTENT_TAGS.contains(&value.name()) || value.attr("hidden").is_some() {
        return true;
    }
    if value
        .attr("aria-hidden")
        .is_some_and(|v| v.eq_ignore_ascii_case("true"))
    {
        return true;
    }
    value.attr("style").is_some_and(|style| {
        let style: String = style
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        style.contains("display:none") || style.contains("visibility:hidden")
    })
}

fn body_text(document: &Html, skip: impl Fn(&ElementRef<'_>) -> bool) -> String {
    let mut raw = String::new();
    if let Some(body) = document.select(&BODY).next() {
        collect_text(body, &skip, &mut raw);
    }
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn collect_text(element: ElementRef<'_>, skip: &impl Fn(&ElementRef<'_>) -> bool, out: &mut String) {
    for child in element.children() {
        match child.value() {
            Node::Text(text) => {
                out.push_str(text);
                out.push(' ');
            }
            Node::Element(_) => {
                if let Some(child_el) = ElementRef::wrap(child)
                    && !skip(&child_el)
                {
                    collect_text(child_el, skip, out);
                }
            }
            _ => {}
        }
    }
}

fn metadata(document: &Html, base: Option<&Url>) -> PageMetadata {
    let title = document
        .select(&TITLE)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty());

    let description = [&*META_DESCRIPTION, &*OG_DESCRIPTION]
        .into_iter()
        .find_map(|sel| {
            document
                .select(sel)
                .filter_map(|m| m.value().attr("content"))
                .map(str::trim)
                .find(|c| !c.is_empty())
        })
        .map(str::to_string);

    let language = document
        .select(&HTML_ROOT)
        .next()
        .and_then(|h| h.value().attr("lang"))
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .map(str::to_string);

    PageMetadata {
        title,
        description,
        language,
        links: resolve_all(document, &LINKS, "href", base, MAX_LINKS),
        images: resolve_all(document, &IMAGES, "src", base, MAX_IMAGES),
    }
}

/// Absolute http(s) URLs from `attr` of every match, de-duplicated, capped.
fn resolve_all(
    document: &Html,
    sel: &Selector,
    attr: &str,
    base: Option<&Url>,
    cap: usize,
) -> Vec<String> {
    let mut seen = HashSet::new();
    document
        .select(sel)
        .filter_map(|el| el.value().attr(attr))
        .filter_map(|raw| resolve(raw.trim(), base))
        .filter(|url| seen.insert(url.clone()))
        .take(cap)
        .collect()
}

fn resolve(raw: &str, base: Option<&Url>) -> Option<String> {
    if raw.is_empty() {
        return None;
    }
    let url = match base {
        Some(base) => base.join(raw).ok()?,
        None => Url::parse(raw).ok()?,
    };
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

fn truncate_chars(text: String, limit: usize) -> String {
    match text.char_indices().nth(limit) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text,
    }
}
