//! Generic attributed XML tree and its text codec.
//!
//! The rest of the crate maps typed nodes onto [`XmlNode`] and back; this is
//! the only module that touches `quick-xml`, so the untyped shape never
//! leaks past the codec boundary. Empty elements are rendered self-closing
//! with a space before the slash (`<tag />`), a convention the server-side
//! parser requires.

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::ProtocolError;

/// A single element: name, ordered attributes, optional text, children.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlNode {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub text: Option<String>,
    pub children: Vec<XmlNode>,
}

impl XmlNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Appends an attribute, preserving insertion order.
    pub fn set_attr(&mut self, name: &str, value: impl Into<String>) {
        self.attributes.push((name.to_string(), value.into()));
    }

    /// Looks up an attribute by exact name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_str())
    }

    /// First child element with the given name.
    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.name == name)
    }

    /// All child elements with the given name. The server omits array
    /// wrapping when exactly one sibling exists; iterating by name makes
    /// the singleton and array shapes decode identically.
    pub fn children_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a XmlNode> {
        self.children.iter().filter(move |c| c.name == name)
    }

    /// Element text, or the empty string when absent.
    pub fn text_content(&self) -> &str {
        self.text.as_deref().unwrap_or("")
    }

    /// Parses an XML document into its root element.
    pub fn parse(xml: &str) -> Result<Self, ProtocolError> {
        let mut reader = Reader::from_str(xml);
        let mut stack: Vec<XmlNode> = Vec::new();
        let mut root: Option<XmlNode> = None;

        loop {
            match reader.read_event().map_err(xml_err)? {
                Event::Start(start) => stack.push(element_from(&start)?),
                Event::Empty(start) => {
                    let node = element_from(&start)?;
                    attach(&mut stack, &mut root, node)?;
                }
                Event::End(_) => {
                    let node = stack
                        .pop()
                        .ok_or_else(|| ProtocolError::Xml("unbalanced end tag".to_string()))?;
                    attach(&mut stack, &mut root, node)?;
                }
                Event::Text(text) => {
                    let text = text.decode().map_err(xml_err)?;
                    append_text(&mut stack, &text);
                }
                // Entity and character references (`&lt;`, `&#x30;`) arrive as
                // their own events; resolve them back into the surrounding text.
                Event::GeneralRef(reference) => {
                    let name = reference.decode().map_err(xml_err)?;
                    let entity = format!("&{name};");
                    let resolved = quick_xml::escape::unescape(&entity).map_err(xml_err)?;
                    append_text(&mut stack, &resolved);
                }
                Event::CData(cdata) => {
                    let bytes = cdata.into_inner();
                    append_text(&mut stack, &String::from_utf8_lossy(&bytes));
                }
                Event::Eof => break,
                // Declaration, comments, processing instructions.
                _ => {}
            }
        }

        root.ok_or_else(|| ProtocolError::Xml("document has no root element".to_string()))
    }

    /// Serializes this element as a complete document, declaration first.
    pub fn to_document(&self) -> Result<String, ProtocolError> {
        let mut writer = Writer::new(Vec::new());
        writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("utf-8"), None)))
            .map_err(xml_err)?;
        write_element(&mut writer, self)?;
        finish(writer)
    }

    /// Serializes this element without a declaration.
    pub fn to_fragment(&self) -> Result<String, ProtocolError> {
        let mut writer = Writer::new(Vec::new());
        write_element(&mut writer, self)?;
        finish(writer)
    }
}

fn xml_err(e: impl std::fmt::Display) -> ProtocolError {
    ProtocolError::Xml(e.to_string())
}

fn element_from(start: &BytesStart<'_>) -> Result<XmlNode, ProtocolError> {
    let name = String::from_utf8(start.name().as_ref().to_vec()).map_err(xml_err)?;
    let mut node = XmlNode::new(name);
    for attr in start.attributes() {
        let attr = attr.map_err(xml_err)?;
        let key = String::from_utf8(attr.key.as_ref().to_vec()).map_err(xml_err)?;
        let value = attr.unescape_value().map_err(xml_err)?;
        node.attributes.push((key, value.into_owned()));
    }
    Ok(node)
}

fn attach(
    stack: &mut [XmlNode],
    root: &mut Option<XmlNode>,
    node: XmlNode,
) -> Result<(), ProtocolError> {
    if let Some(parent) = stack.last_mut() {
        parent.children.push(node);
        Ok(())
    } else if root.is_none() {
        *root = Some(node);
        Ok(())
    } else {
        Err(ProtocolError::Xml("multiple root elements".to_string()))
    }
}

/// Whitespace-only chunks between elements are structural noise; anything
/// else is kept verbatim, including leading/trailing spaces (session tokens
/// may carry them).
fn append_text(stack: &mut [XmlNode], text: &str) {
    if text.trim().is_empty() {
        return;
    }
    if let Some(parent) = stack.last_mut() {
        match &mut parent.text {
            Some(existing) => existing.push_str(text),
            None => parent.text = Some(text.to_string()),
        }
    }
}

fn write_element(writer: &mut Writer<Vec<u8>>, node: &XmlNode) -> Result<(), ProtocolError> {
    let mut start = BytesStart::new(node.name.as_str());
    for (name, value) in &node.attributes {
        start.push_attribute((name.as_str(), value.as_str()));
    }

    let text = node.text.as_deref().unwrap_or("");
    if text.is_empty() && node.children.is_empty() {
        return writer.write_event(Event::Empty(start)).map_err(xml_err);
    }

    writer.write_event(Event::Start(start)).map_err(xml_err)?;
    if !text.is_empty() {
        writer
            .write_event(Event::Text(BytesText::new(text)))
            .map_err(xml_err)?;
    }
    for child in &node.children {
        write_element(writer, child)?;
    }
    writer
        .write_event(Event::End(BytesEnd::new(node.name.as_str())))
        .map_err(xml_err)
}

fn finish(writer: Writer<Vec<u8>>) -> Result<String, ProtocolError> {
    let xml = String::from_utf8(writer.into_inner()).map_err(xml_err)?;
    // quick-xml renders empty elements as `<tag/>`; the server wants a
    // space before the slash. Escaped content cannot contain a raw `>`.
    Ok(xml.replace("/>", " />"))
}
