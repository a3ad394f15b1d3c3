//! Owned XML element trees
//!
//! XML records are element subtrees. They are built from quick-xml events
//! either for a whole document or, while streaming, for each element an
//! iterator selects.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::BufRead;

use super::{ExpressionError, ExpressionResult};

/// A node inside an element
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

/// An XML element with its attributes and children
///
/// The document node is an element with an empty name whose only element
/// child is the root element.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct XmlElement {
    /// Qualified name as written (`prefix:local` or `local`)
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
}

impl XmlElement {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            attributes: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Wrap elements in a document node
    pub fn document(children: Vec<XmlElement>) -> Self {
        Self {
            name: String::new(),
            attributes: Vec::new(),
            children: children.into_iter().map(XmlNode::Element).collect(),
        }
    }

    pub fn is_document(&self) -> bool {
        self.name.is_empty()
    }

    /// Name without its namespace prefix
    pub fn local_name(&self) -> &str {
        local_part(&self.name)
    }

    pub fn attribute(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|child| match child {
            XmlNode::Element(element) => Some(element),
            XmlNode::Text(_) => None,
        })
    }

    /// Concatenated text of all descendant text nodes
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        for child in &self.children {
            match child {
                XmlNode::Text(text) => out.push_str(text),
                XmlNode::Element(element) => element.collect_text(out),
            }
        }
    }

    /// Parse a complete document into a document node
    pub fn parse_document<R: BufRead>(input: R) -> ExpressionResult<Self> {
        let mut reader = Reader::from_reader(input);
        let mut buf = Vec::new();
        let mut builder = TreeBuilder::new();
        let mut roots = Vec::new();

        loop {
            let event = reader
                .read_event_into(&mut buf)
                .map_err(|e| ExpressionError::new("/", format!("XML parse error: {}", e)))?;
            if let Event::Eof = event {
                break;
            }
            if let Some(root) = builder.feed(&event)? {
                roots.push(root);
            }
            buf.clear();
        }

        Ok(Self::document(roots))
    }
}

pub(crate) fn local_part(name: &str) -> &str {
    name.rsplit_once(':').map(|(_, local)| local).unwrap_or(name)
}

/// Name test: a prefixed test must match exactly, an unprefixed one matches
/// the local name
pub(crate) fn name_matches(test: &str, name: &str) -> bool {
    if test.contains(':') {
        test == name
    } else {
        test == local_part(name)
    }
}

pub(crate) fn start_to_element(start: &BytesStart<'_>) -> ExpressionResult<XmlElement> {
    let name = String::from_utf8_lossy(start.name().as_ref()).into_owned();
    let mut element = XmlElement::new(name);
    for attribute in start.attributes().flatten() {
        let key = String::from_utf8_lossy(attribute.key.as_ref()).into_owned();
        let value = attribute
            .unescape_value()
            .map_err(|e| ExpressionError::new(&element.name, format!("bad attribute value: {}", e)))?
            .into_owned();
        element.attributes.push((key, value));
    }
    Ok(element)
}

/// Assembles elements from a flat quick-xml event sequence
#[derive(Debug, Default)]
pub struct TreeBuilder {
    stack: Vec<XmlElement>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start capturing at `start`
    pub fn begin(start: &BytesStart<'_>) -> ExpressionResult<Self> {
        Ok(Self {
            stack: vec![start_to_element(start)?],
        })
    }

    /// Feed one event; returns an element once its outermost tag closes
    pub fn feed(&mut self, event: &Event<'_>) -> ExpressionResult<Option<XmlElement>> {
        match event {
            Event::Start(start) => {
                self.stack.push(start_to_element(start)?);
                Ok(None)
            }
            Event::Empty(start) => {
                let element = start_to_element(start)?;
                Ok(self.attach(XmlNode::Element(element)))
            }
            Event::End(_) => match self.stack.pop() {
                Some(element) => Ok(self.attach(XmlNode::Element(element))),
                None => Err(ExpressionError::new("/", "unbalanced closing tag")),
            },
            Event::Text(text) => {
                let text = text
                    .unescape()
                    .map_err(|e| ExpressionError::new("text()", format!("bad text: {}", e)))?;
                if !text.trim().is_empty() {
                    self.attach(XmlNode::Text(text.into_owned()));
                }
                Ok(None)
            }
            Event::CData(data) => {
                let text = String::from_utf8_lossy(data).into_owned();
                self.attach(XmlNode::Text(text));
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    fn attach(&mut self, node: XmlNode) -> Option<XmlElement> {
        match self.stack.last_mut() {
            Some(parent) => {
                parent.children.push(node);
                None
            }
            None => match node {
                XmlNode::Element(element) => Some(element),
                XmlNode::Text(_) => None,
            },
        }
    }
}
