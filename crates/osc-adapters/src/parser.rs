//! Field extraction from one organization detail page.
//!
//! Every field is located through a structural anchor (a heading, a `mailto:` link, an icon,
//! a label) and extracted independently. A missing anchor blanks that field only.

use osc_core::normalize::normalize_key;
use osc_core::{EntityId, EntityRecord};
use scraper::{ElementRef, Html, Node, Selector};

use crate::AdapterError;

const PHONE_MARKERS: &str =
    "i.fa-phone-alt, i.fa-phone, svg[data-icon='phone-alt'], svg[data-icon='phone']";
const LEGAL_NATURE_LABEL: &str = "natureza juridica";
const REGISTRATION_STATUS_LABEL: &str = "situacao cadastral";

/// Fields found on a detail page; `None` where the anchor was missing or empty.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DetailFields {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub address: Option<String>,
    pub legal_nature: Option<String>,
    pub registration_status: Option<String>,
}

impl DetailFields {
    pub fn into_record(self, id: EntityId) -> EntityRecord {
        EntityRecord {
            name: self.name.unwrap_or_default(),
            email: self.email.unwrap_or_default(),
            phone: self.phone.unwrap_or_default(),
            address: self.address.unwrap_or_default(),
            legal_nature: self.legal_nature.unwrap_or_default(),
            registration_status: self.registration_status.unwrap_or_default(),
            ..EntityRecord::blank(id)
        }
    }
}

/// Detail page parser with its selectors compiled once. Shareable across workers.
#[derive(Debug)]
pub struct DetailParser {
    heading: Selector,
    mailto: Selector,
    phone_marker: Selector,
    strong: Selector,
    h4: Selector,
}

fn selector(css: &str) -> Result<Selector, AdapterError> {
    Selector::parse(css)
        .map_err(|e| AdapterError::Message(format!("invalid selector {css:?}: {e}")))
}

impl DetailParser {
    pub fn new() -> Result<Self, AdapterError> {
        Ok(Self {
            heading: selector("h1")?,
            mailto: selector("a[href^='mailto:']")?,
            phone_marker: selector(PHONE_MARKERS)?,
            strong: selector("strong")?,
            h4: selector("h4")?,
        })
    }

    pub fn parse(&self, id: EntityId, html: &str) -> EntityRecord {
        self.extract(html).into_record(id)
    }

    pub fn extract(&self, html: &str) -> DetailFields {
        let document = Html::parse_document(html);
        DetailFields {
            name: self.name(&document),
            email: self.email(&document),
            phone: self.phone(&document),
            address: self.address(&document),
            legal_nature: self.legal_nature(&document),
            registration_status: self.registration_status(&document),
        }
    }

    fn name(&self, document: &Html) -> Option<String> {
        document
            .select(&self.heading)
            .next()
            .and_then(|h| text_or_none(&h.text().collect::<String>()))
    }

    fn email(&self, document: &Html) -> Option<String> {
        let href = document.select(&self.mailto).next()?.value().attr("href")?;
        let target = href.trim().strip_prefix("mailto:")?;
        let address = target.split('?').next().unwrap_or_default();
        text_or_none(address)
    }

    fn phone(&self, document: &Html) -> Option<String> {
        let marker = document.select(&self.phone_marker).next()?;
        let sibling = marker
            .next_sibling()
            .and_then(|node| node_text(node.value(), ElementRef::wrap(node)));
        let parent = marker
            .parent()
            .and_then(ElementRef::wrap)
            .map(|p| p.text().collect::<String>());

        sibling
            .into_iter()
            .chain(parent)
            .find_map(|text| phone_digits(&text))
    }

    /// Text node right before the first `<br>` after the heading that has one.
    fn address(&self, document: &Html) -> Option<String> {
        let heading = document.select(&self.heading).next().map(|h| h.id());
        let mut after_heading = heading.is_none();

        for node in document.root_element().descendants() {
            if Some(node.id()) == heading {
                after_heading = true;
                continue;
            }
            if !after_heading {
                continue;
            }
            let is_break = matches!(node.value(), Node::Element(el) if el.name() == "br");
            if !is_break {
                continue;
            }
            let preceding = node
                .prev_sibling()
                .and_then(|prev| prev.value().as_text().map(|t| t.text.to_string()));
            if let Some(address) = preceding.as_deref().and_then(text_or_none) {
                return Some(address);
            }
        }
        None
    }

    fn legal_nature(&self, document: &Html) -> Option<String> {
        let label = document
            .select(&self.strong)
            .find(|el| normalize_key(&el.text().collect::<String>()).contains(LEGAL_NATURE_LABEL))?;
        label
            .next_sibling()
            .and_then(|node| node_text(node.value(), ElementRef::wrap(node)))
    }

    fn registration_status(&self, document: &Html) -> Option<String> {
        let label = document
            .select(&self.h4)
            .find(|el| normalize_key(&el.text().collect::<String>()) == REGISTRATION_STATUS_LABEL)?;
        let value = label.next_siblings().find_map(ElementRef::wrap)?;
        text_or_none(&value.text().collect::<String>())
    }
}

/// Trimmed text with inner whitespace collapsed; `None` when nothing is left.
fn text_or_none(value: &str) -> Option<String> {
    let collapsed = value.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        None
    } else {
        Some(collapsed)
    }
}

fn node_text(value: &Node, element: Option<ElementRef<'_>>) -> Option<String> {
    match value {
        Node::Text(text) => text_or_none(&text.text),
        _ => element.and_then(|el| text_or_none(&el.text().collect::<String>())),
    }
}

/// Keeps digits, spaces and `-()+`. `None` when no digit survives.
fn phone_digits(text: &str) -> Option<String> {
    let kept: String = text
        .chars()
        .filter_map(|c| match c {
            c if c.is_ascii_digit() => Some(c),
            '-' | '(' | ')' | '+' => Some(c),
            c if c.is_whitespace() => Some(' '),
            _ => None,
        })
        .collect();
    if !kept.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    text_or_none(&kept)
}
