//! Parsed view of a rendered [`Document`].
//!
//! [`ParsedDocument`] owns the DOM plus everything discovered in it up front:
//! the embedded JSON payloads pages ship in inline scripts, the visible text
//! and the raw script bodies. It is built and dropped inside a single
//! extraction call.

use scraper::{ElementRef, Html, Selector};
use serde_json::{Map, Value};
use url::Url;

use hermes_core::models::Document;

/// Script assignments whose object literal is captured, keyed by the name it
/// is stored under in `embedded_data`.
pub const PAYLOAD_MARKERS: &[(&str, &str)] = &[
    ("runParams", "window.runParams"),
    ("DCData", "window._d_c_.DCData"),
    ("productData", "window.productData"),
    ("pageData", "window.pageData"),
];

/// Key of the first schema.org `Product` node found in JSON-LD blocks.
pub const LD_JSON_KEY: &str = "ld_json";

/// An embedded payload that was located but could not be parsed.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadFailure {
    pub name: String,
    pub message: String,
}

pub struct ParsedDocument {
    html: Html,
    address: String,
    final_url: String,
    base_url: Option<Url>,
    embedded: Value,
    failures: Vec<PayloadFailure>,
    scripts: Vec<String>,
    text: String,
}

impl ParsedDocument {
    pub fn parse(document: &Document) -> Self {
        let html = Html::parse_document(&document.html);
        let base_url = Url::parse(&document.final_url)
            .or_else(|_| Url::parse(&document.address))
            .ok();

        let scripts = inline_scripts(&html);
        let text = visible_text(&html);
        let (embedded, failures) = discover_payloads(&html, &scripts);

        Self {
            html,
            address: document.address.clone(),
            final_url: document.final_url.clone(),
            base_url,
            embedded: Value::Object(embedded),
            failures,
            scripts,
            text,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn final_url(&self) -> &str {
        &self.final_url
    }

    /// Newline-separated text of every visible text node.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Bodies of inline `<script>` elements, in document order.
    pub fn scripts(&self) -> &[String] {
        &self.scripts
    }

    pub fn payload_failures(&self) -> &[PayloadFailure] {
        &self.failures
    }

    /// All successfully parsed payloads.
    pub fn embedded_data(&self) -> Map<String, Value> {
        match &self.embedded {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        }
    }

    /// Look up a JSON pointer (e.g. `/runParams/data/priceModule`) across the
    /// discovered payloads. `null` counts as absent.
    pub fn embedded(&self, pointer: &str) -> Option<&Value> {
        self.embedded.pointer(pointer).filter(|v| !v.is_null())
    }

    pub fn select(&self, css: &str) -> Vec<ElementRef<'_>> {
        match Selector::parse(css) {
            Ok(selector) => self.html.select(&selector).collect(),
            Err(e) => {
                tracing::debug!(%css, error = %e, "Ignoring invalid selector");
                Vec::new()
            }
        }
    }

    /// Text of the first matching element that has any.
    pub fn select_text(&self, css: &str) -> Option<String> {
        self.select(css)
            .into_iter()
            .map(element_text)
            .find(|t| !t.is_empty())
    }

    /// Attribute value of the first matching element that carries it.
    pub fn select_attr(&self, css: &str, attr: &str) -> Option<String> {
        self.select(css)
            .into_iter()
            .filter_map(|el| el.value().attr(attr))
            .map(str::trim)
            .find(|v| !v.is_empty())
            .map(String::from)
    }

    /// `content` of a `<meta>` tag by `property`, `name` or `itemprop`.
    pub fn meta(&self, key: &str) -> Option<String> {
        ["property", "name", "itemprop"]
            .iter()
            .find_map(|attr| self.select_attr(&format!(r#"meta[{attr}="{key}"]"#), "content"))
    }

    pub fn html_lang(&self) -> Option<String> {
        self.html
            .root_element()
            .value()
            .attr("lang")
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(String::from)
    }

    /// Resolve a possibly relative or protocol-relative URL against the page.
    pub fn resolve_url(&self, raw: &str) -> Option<String> {
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with("data:") || raw.starts_with("javascript:") {
            return None;
        }
        match &self.base_url {
            Some(base) => base.join(raw).ok().map(String::from),
            None => Url::parse(raw).ok().map(String::from),
        }
    }
}

/// Whitespace-normalized text content of an element.
pub fn element_text(element: ElementRef<'_>) -> String {
    let raw: String = element.text().collect();
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn inline_scripts(html: &Html) -> Vec<String> {
    let Ok(selector) = Selector::parse("script:not([src])") else {
        return Vec::new();
    };
    html.select(&selector)
        .map(|el| el.text().collect::<String>())
        .filter(|s| !s.trim().is_empty())
        .collect()
}

fn visible_text(html: &Html) -> String {
    let mut out = String::new();
    for node in html.root_element().descendants() {
        let Some(text) = node.value().as_text() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value().as_element().is_some_and(|e| {
                matches!(e.name(), "script" | "style" | "noscript" | "template")
            })
        });
        let text = text.trim();
        if !hidden && !text.is_empty() {
            out.push_str(text);
            out.push('\n');
        }
    }
    out
}

fn discover_payloads(html: &Html, scripts: &[String]) -> (Map<String, Value>, Vec<PayloadFailure>) {
    let mut payloads = Map::new();
    let mut failures = Vec::new();

    for (name, marker) in PAYLOAD_MARKERS {
        let Some(found) = scripts.iter().find_map(|s| find_assignment(s, marker)) else {
            continue;
        };
        let parsed = found
            .map_err(String::from)
            .and_then(|literal| serde_json::from_str::<Value>(literal).map_err(|e| e.to_string()));
        match parsed {
            Ok(value) => {
                payloads.insert(name.to_string(), value);
            }
            Err(message) => {
                tracing::debug!(payload = %name, %message, "Embedded payload did not parse");
                failures.push(PayloadFailure {
                    name: name.to_string(),
                    message,
                });
            }
        }
    }

    if let Ok(selector) = Selector::parse(r#"script[type="application/ld+json"]"#) {
        let mut product = None;
        for block in html.select(&selector) {
            let raw = block.text().collect::<String>();
            match serde_json::from_str::<Value>(raw.trim()) {
                Ok(value) => {
                    if product.is_none() {
                        product = find_product_node(&value).cloned();
                    }
                }
                Err(e) => failures.push(PayloadFailure {
                    name: LD_JSON_KEY.to_string(),
                    message: e.to_string(),
                }),
            }
        }
        if let Some(product) = product {
            payloads.insert(LD_JSON_KEY.to_string(), product);
        }
    }

    (payloads, failures)
}

/// First node typed `Product`, looking through arrays and `@graph`.
fn find_product_node(value: &Value) -> Option<&Value> {
    match value {
        Value::Array(items) => items.iter().find_map(find_product_node),
        Value::Object(map) => {
            let is_product = match map.get("@type") {
                Some(Value::String(t)) => t == "Product",
                Some(Value::Array(types)) => types.iter().any(|t| t == "Product"),
                _ => false,
            };
            if is_product {
                Some(value)
            } else {
                map.get("@graph").and_then(find_product_node)
            }
        }
        _ => None,
    }
}

/// Find `<marker> = { ... }` in a script and cut out the object literal.
///
/// Returns `None` when the marker is not assigned in this script, and
/// `Some(Err)` when the assignment is there but the braces never balance.
pub fn find_assignment<'a>(script: &'a str, marker: &str) -> Option<Result<&'a str, &'static str>> {
    let mut from = 0;
    while let Some(pos) = script[from..].find(marker) {
        let after = from + pos + marker.len();
        from = after;

        let rest = &script[after..];
        let trimmed = rest.trim_start();
        let Some(value) = trimmed.strip_prefix('=') else {
            continue;
        };
        if value.starts_with('=') {
            continue;
        }
        let value = value.trim_start();
        if !value.starts_with('{') {
            continue;
        }
        let start = script.len() - value.len();
        return Some(match balanced_object_end(value) {
            Some(end) => Ok(&script[start..start + end]),
            None => Err("unterminated object literal"),
        });
    }
    None
}

/// Byte length of the balanced `{...}` at the start of `s`, skipping braces
/// inside string literals.
fn balanced_object_end(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (idx, ch) in s.char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == q {
                quote = None;
            }
            continue;
        }
        match ch {
            '"' | '\'' | '`' => quote = Some(ch),
            '{' => depth += 1,
            '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(idx + 1);
                }
            }
            _ => {}
        }
    }
    None
}
