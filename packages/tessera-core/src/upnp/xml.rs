//! XML helpers shared by the description, SOAP and GENA code.
//!
//! UPnP documents are small, so they are read into a light element tree
//! ([`XmlElement`]) and navigated by local name. Namespace prefixes are
//! dropped on the way in; no UPnP document we consume relies on them to
//! disambiguate element names.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum XmlError {
    #[error("malformed XML: {0}")]
    Malformed(String),

    #[error("document has no root element")]
    NoRoot,
}

pub type XmlResult<T> = Result<T, XmlError>;

/// One element of a parsed document.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    /// Local name (prefix stripped).
    pub name: String,
    /// Attributes by local name, values unescaped.
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlElement>,
    /// Concatenated, unescaped character data of this element.
    pub text: String,
}

impl XmlElement {
    /// First child with the given local name.
    pub fn child(&self, name: &str) -> Option<&XmlElement> {
        self.children.iter().find(|c| c.name == name)
    }

    /// Every child with the given local name, in document order.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlElement> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Trimmed text of the first child with the given name.
    pub fn child_text(&self, name: &str) -> Option<&str> {
        self.child(name).map(XmlElement::trimmed_text)
    }

    /// Trimmed text of the first child with the given name, `None` if absent or empty.
    pub fn child_text_non_empty(&self, name: &str) -> Option<&str> {
        self.child_text(name).filter(|t| !t.is_empty())
    }

    pub fn trimmed_text(&self) -> &str {
        self.text.trim()
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Depth-first search for the first descendant with the given name.
    pub fn descendant(&self, name: &str) -> Option<&XmlElement> {
        for child in &self.children {
            if child.name == name {
                return Some(child);
            }
            if let Some(found) = child.descendant(name) {
                return Some(found);
            }
        }
        None
    }

    fn from_start(e: &BytesStart) -> Self {
        let attributes = e
            .attributes()
            .flatten()
            .map(|a| {
                let key = String::from_utf8_lossy(a.key.local_name().as_ref()).into_owned();
                let raw = String::from_utf8_lossy(&a.value);
                (key, html_escape::decode_html_entities(&raw).into_owned())
            })
            .collect();
        Self {
            name: String::from_utf8_lossy(e.local_name().as_ref()).into_owned(),
            attributes,
            children: Vec::new(),
            text: String::new(),
        }
    }
}

/// An element under construction plus its not yet unescaped text.
struct OpenElement {
    element: XmlElement,
    raw_text: String,
}

impl OpenElement {
    fn flush(&mut self) {
        if !self.raw_text.is_empty() {
            let decoded = html_escape::decode_html_entities(&self.raw_text).into_owned();
            self.element.text.push_str(&decoded);
            self.raw_text.clear();
        }
    }
}

/// Parses a whole document and returns its root element.
pub fn parse_document(xml: &str) -> XmlResult<XmlElement> {
    let mut reader = Reader::from_str(xml);
    let mut buf = Vec::new();
    let mut stack: Vec<OpenElement> = Vec::new();
    let mut root: Option<XmlElement> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => stack.push(OpenElement {
                element: XmlElement::from_start(e),
                raw_text: String::new(),
            }),
            Ok(Event::Empty(ref e)) => {
                attach(&mut stack, &mut root, XmlElement::from_start(e));
            }
            Ok(Event::End(_)) => {
                let Some(mut open) = stack.pop() else {
                    return Err(XmlError::Malformed("unbalanced end tag".to_string()));
                };
                open.flush();
                attach(&mut stack, &mut root, open.element);
            }
            Ok(Event::Text(ref t)) => {
                if let Some(open) = stack.last_mut() {
                    open.raw_text.push_str(&String::from_utf8_lossy(t));
                }
            }
            Ok(Event::GeneralRef(ref r)) => {
                if let Some(open) = stack.last_mut() {
                    open.raw_text.push('&');
                    open.raw_text.push_str(&String::from_utf8_lossy(r));
                    open.raw_text.push(';');
                }
            }
            Ok(Event::CData(ref c)) => {
                if let Some(open) = stack.last_mut() {
                    open.flush();
                    open.element.text.push_str(&String::from_utf8_lossy(c));
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(XmlError::Malformed(e.to_string())),
            _ => {}
        }
        buf.clear();
    }

    if !stack.is_empty() {
        return Err(XmlError::Malformed("unexpected end of document".to_string()));
    }
    root.ok_or(XmlError::NoRoot)
}

fn attach(stack: &mut [OpenElement], root: &mut Option<XmlElement>, element: XmlElement) {
    match stack.last_mut() {
        Some(parent) => {
            parent.flush();
            parent.element.children.push(element);
        }
        None => {
            if root.is_none() {
                *root = Some(element);
            }
        }
    }
}

/// Escapes XML special characters for embedding in XML content.
///
/// ```ignore
/// assert_eq!(escape_xml("Tom & Jerry"), "Tom &amp; Jerry");
/// ```
pub fn escape_xml(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&apos;")
}
