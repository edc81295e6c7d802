//! Selector-driven field extraction from rendered HTML.
//!
//! Pure functions over an HTML string, so extraction rules can be tested
//! without a browser.

use harvest_core::{FetchFailure, Payload};
use scraper::{ElementRef, Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

/// How to read one payload field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRule {
    pub name: String,
    /// CSS selector; may be a comma-separated list of fallbacks.
    pub selector: String,
    /// Read this attribute instead of the element text. URL attributes
    /// (`href`, `src`) are resolved against the page URL.
    #[serde(default)]
    pub attribute: Option<String>,
    /// Collect every match into an array instead of taking the first.
    #[serde(default)]
    pub multiple: bool,
}

impl FieldRule {
    pub fn text(name: impl Into<String>, selector: impl Into<String>) -> Self {
        Self { name: name.into(), selector: selector.into(), attribute: None, multiple: false }
    }

    pub fn attribute(mut self, attribute: impl Into<String>) -> Self {
        self.attribute = Some(attribute.into());
        self
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }
}

/// Extraction rules for one record kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRules {
    /// Present once the page has rendered enough to extract.
    pub ready_selector: String,
    pub fields: Vec<FieldRule>,
    /// Substrings of the final URL that mean the site demanded a login.
    #[serde(default)]
    pub auth_markers: Vec<String>,
    /// Matches only on the site's "page not found" view.
    #[serde(default)]
    pub not_found_selector: Option<String>,
}

impl ExtractionRules {
    pub fn new(ready_selector: impl Into<String>) -> Self {
        Self { ready_selector: ready_selector.into(), fields: Vec::new(), auth_markers: Vec::new(), not_found_selector: None }
    }

    pub fn field(mut self, rule: FieldRule) -> Self {
        self.fields.push(rule);
        self
    }

    pub fn auth_marker(mut self, marker: impl Into<String>) -> Self {
        self.auth_markers.push(marker.into());
        self
    }

    pub fn not_found(mut self, selector: impl Into<String>) -> Self {
        self.not_found_selector = Some(selector.into());
        self
    }
}

/// Collapse runs of whitespace into single spaces and trim.
pub fn clean_text(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub(crate) fn parse_selector(selector: &str) -> Result<Selector, FetchFailure> {
    Selector::parse(selector).map_err(|e| FetchFailure::malformed(format!("invalid selector '{selector}': {e}")))
}

/// Permanent failures recognisable from the loaded page itself.
pub fn classify_page(html: &str, final_url: &Url, rules: &ExtractionRules) -> Result<(), FetchFailure> {
    if let Some(marker) = rules.auth_markers.iter().find(|m| final_url.as_str().contains(m.as_str())) {
        return Err(FetchFailure::auth_required(format!("redirected to {final_url} ({marker})")));
    }

    if let Some(selector) = &rules.not_found_selector {
        let selector = parse_selector(selector)?;
        if Html::parse_document(html).select(&selector).next().is_some() {
            return Err(FetchFailure::not_found(format!("{final_url} shows a not-found page")));
        }
    }

    Ok(())
}

/// Whether the ready selector matches anywhere in `html`.
pub fn is_ready(html: &str, rules: &ExtractionRules) -> Result<bool, FetchFailure> {
    let selector = parse_selector(&rules.ready_selector)?;
    Ok(Html::parse_document(html).select(&selector).next().is_some())
}

/// Apply `rules` to `html`.
///
/// Fields whose selector matches nothing, or only empty text, are left out
/// of the payload rather than filled with placeholders.
pub fn extract_fields(html: &str, page_url: &Url, rules: &ExtractionRules) -> Result<Payload, FetchFailure> {
    let document = Html::parse_document(html);
    let mut payload = Payload::new();

    for rule in &rules.fields {
        let selector = parse_selector(&rule.selector)?;
        let values: Vec<String> = document
            .select(&selector)
            .filter_map(|element| read_value(element, rule, page_url))
            .collect();

        if rule.multiple {
            let mut unique: Vec<String> = Vec::with_capacity(values.len());
            for value in values {
                if !unique.contains(&value) {
                    unique.push(value);
                }
            }
            if !unique.is_empty() {
                payload.insert(rule.name.clone(), Value::from(unique));
            }
        } else if let Some(first) = values.into_iter().next() {
            payload.insert(rule.name.clone(), Value::String(first));
        }
    }

    Ok(payload)
}

fn read_value(element: ElementRef<'_>, rule: &FieldRule, page_url: &Url) -> Option<String> {
    let value = match rule.attribute.as_deref() {
        Some(attr @ ("href" | "src")) => {
            let raw = element.value().attr(attr)?;
            page_url.join(raw.trim()).ok()?.to_string()
        }
        Some(attr) => clean_text(element.value().attr(attr)?),
        None => clean_text(&element.text().collect::<Vec<_>>().join(" ")),
    };
    (!value.is_empty()).then_some(value)
}
