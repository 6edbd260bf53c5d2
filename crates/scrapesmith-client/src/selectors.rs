//! Field → CSS selector extraction shared by the scraping tools.
//!
//! Selector syntax, per field:
//! - `h1.title` → trimmed text of the first match
//! - `a.next@href` → attribute value of the first match
//! - `all:ul.tags li` → array with one entry per match (also accepts `@attr`)
//!
//! Fields without a match extract as `null`.

use std::collections::BTreeMap;

use scraper::{ElementRef, Html, Selector};
use scrapesmith_core::error::AppError;

const ALL_PREFIX: &str = "all:";

#[derive(Debug, Clone)]
struct FieldSelector {
    field: String,
    selector: Selector,
    attribute: Option<String>,
    all: bool,
}

impl FieldSelector {
    fn parse(field: &str, raw: &str) -> Result<Self, AppError> {
        let (all, rest) = match raw.trim().strip_prefix(ALL_PREFIX) {
            Some(rest) => (true, rest.trim()),
            None => (false, raw.trim()),
        };

        let (css, attribute) = match rest.rsplit_once('@') {
            Some((css, attr)) if is_attribute_name(attr) => (css.trim(), Some(attr.to_string())),
            _ => (rest, None),
        };

        let selector = Selector::parse(css).map_err(|e| {
            AppError::ConfigError(format!("Invalid selector for field '{field}' ({css}): {e}"))
        })?;

        Ok(Self {
            field: field.to_string(),
            selector,
            attribute,
            all,
        })
    }

    fn value_of(&self, element: ElementRef<'_>) -> Option<serde_json::Value> {
        let value = match &self.attribute {
            Some(attr) => element.value().attr(attr)?.trim().to_string(),
            None => collapse_whitespace(element.text()),
        };
        Some(serde_json::Value::String(value))
    }

    fn extract(&self, document: &Html) -> serde_json::Value {
        let mut matches = document.select(&self.selector);
        if self.all {
            serde_json::Value::Array(matches.filter_map(|el| self.value_of(el)).collect())
        } else {
            matches
                .next()
                .and_then(|el| self.value_of(el))
                .unwrap_or(serde_json::Value::Null)
        }
    }
}

fn is_attribute_name(s: &str) -> bool {
    !s.is_empty()
        && s
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':')
}

fn collapse_whitespace<'a>(text: impl Iterator<Item = &'a str>) -> String {
    text.flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Compiled selector map of a scraper tool configuration.
#[derive(Debug, Clone, Default)]
pub struct FieldSelectors {
    fields: Vec<FieldSelector>,
}

impl FieldSelectors {
    /// Compile every selector, failing on the first invalid one.
    pub fn compile(selectors: &BTreeMap<String, String>) -> Result<Self, AppError> {
        let fields = selectors
            .iter()
            .map(|(field, raw)| FieldSelector::parse(field, raw))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { fields })
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Extract a JSON object from `html`. With no selectors configured the
    /// page title is returned.
    pub fn extract(&self, html: &str) -> serde_json::Value {
        let document = Html::parse_document(html);

        if self.fields.is_empty() {
            let title = Selector::parse("title")
                .ok()
                .and_then(|s| document.select(&s).next().map(|t| collapse_whitespace(t.text())))
                .map(serde_json::Value::String)
                .unwrap_or(serde_json::Value::Null);
            return serde_json::json!({ "title": title });
        }

        let object = self
            .fields
            .iter()
            .map(|f| (f.field.clone(), f.extract(&document)))
            .collect::<serde_json::Map<_, _>>();
        serde_json::Value::Object(object)
    }
}

/// Lowercase substrings that identify a captcha or bot-challenge page.
pub const DEFAULT_CAPTCHA_MARKERS: &[&str] = &[
    "g-recaptcha",
    "h-captcha",
    "cf-challenge",
    "cf-turnstile",
    "are you a robot",
    "verify you are human",
];

/// First marker found in `html`, case-insensitively.
pub fn find_marker<'a>(html: &str, markers: &'a [String]) -> Option<&'a str> {
    let haystack = html.to_lowercase();
    markers
        .iter()
        .map(String::as_str)
        .find(|m| haystack.contains(&m.to_lowercase()))
}
