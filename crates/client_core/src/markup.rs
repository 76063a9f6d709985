//! Minimal HTML capability used by the login and checkpoint flows.

use std::{collections::BTreeMap, fmt::Debug};

use scraper::{ElementRef, Html, Selector};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum MarkupError {
    #[error("invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },
}

/// One element with its attributes and trimmed, non-empty text nodes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Element {
    pub tag: String,
    pub attributes: BTreeMap<String, String>,
    pub strings: Vec<String>,
}

impl Element {
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes.get(name).map(String::as_str)
    }

    pub fn text(&self) -> String {
        self.strings.join(" ")
    }
}

/// A form and the named controls (`input`, `button`) inside it, in order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FormElement {
    pub action: Option<String>,
    pub id: Option<String>,
    pub controls: Vec<Element>,
    pub strings: Vec<String>,
}

pub trait MarkupParser: Send + Sync + Debug {
    /// Every `form` in document order.
    fn forms(&self, html: &str) -> Result<Vec<FormElement>, MarkupError>;

    /// Elements with the given tag, optionally filtered on one attribute value.
    fn select(
        &self,
        html: &str,
        tag: &str,
        attribute: Option<(&str, &str)>,
    ) -> Result<Vec<Element>, MarkupError>;
}

/// [`MarkupParser`] backed by `scraper`.
#[derive(Debug, Clone, Copy, Default)]
pub struct ScraperMarkup;

fn selector(raw: &str) -> Result<Selector, MarkupError> {
    Selector::parse(raw).map_err(|err| MarkupError::Selector {
        selector: raw.to_string(),
        message: err.to_string(),
    })
}

fn to_element(node: ElementRef<'_>) -> Element {
    Element {
        tag: node.value().name().to_string(),
        attributes: node
            .value()
            .attrs()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect(),
        strings: stripped_strings(node),
    }
}

fn stripped_strings(node: ElementRef<'_>) -> Vec<String> {
    node.text()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

impl MarkupParser for ScraperMarkup {
    fn forms(&self, html: &str) -> Result<Vec<FormElement>, MarkupError> {
        let document = Html::parse_document(html);
        let form_selector = selector("form")?;
        let control_selector = selector("input, button")?;

        Ok(document
            .select(&form_selector)
            .map(|form| FormElement {
                action: form.value().attr("action").map(str::to_string),
                id: form.value().attr("id").map(str::to_string),
                controls: form.select(&control_selector).map(to_element).collect(),
                strings: stripped_strings(form),
            })
            .collect())
    }

    fn select(
        &self,
        html: &str,
        tag: &str,
        attribute: Option<(&str, &str)>,
    ) -> Result<Vec<Element>, MarkupError> {
        let document = Html::parse_document(html);
        let tag_selector = selector(tag)?;

        Ok(document
            .select(&tag_selector)
            .filter(|node| match attribute {
                Some((name, value)) => node.value().attr(name) == Some(value),
                None => true,
            })
            .map(to_element)
            .collect())
    }
}
