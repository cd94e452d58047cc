//! Minimal owned XML document tree.
//!
//! Just enough structure to hold serialized transformers: elements with
//! attributes, child elements and text. Lookups are case-insensitive.

use std::io::Write;

use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::error::{Result, TpsError};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct XmlNode {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
    pub text: String,
}

impl XmlNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Element holding only text, e.g. `<Reversed>0</Reversed>`.
    pub fn with_text(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attribute(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let (key, value) = (key.into(), value.into());
        match self
            .attributes
            .iter_mut()
            .find(|(k, _)| k.eq_ignore_ascii_case(&key))
        {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((key, value)),
        }
    }

    pub fn child(&self, name: &str) -> Option<&XmlNode> {
        self.children.iter().find(|c| c.is(name))
    }

    pub fn add_child(&mut self, child: XmlNode) -> &mut XmlNode {
        self.children.push(child);
        let last = self.children.len() - 1;
        &mut self.children[last]
    }

    /// Resolves a dotted path of child elements. The last component may also
    /// name an attribute, which takes precedence over a child element.
    pub fn value(&self, path: &str) -> Option<&str> {
        let mut node = self;
        let mut parts = path.split('.').filter(|p| !p.is_empty()).peekable();
        while let Some(part) = parts.next() {
            if parts.peek().is_none() {
                if let Some(value) = node.attribute(part) {
                    return Some(value);
                }
            }
            node = node.child(part)?;
        }
        Some(node.text.as_str())
    }

    /// Parses the root element of `text`.
    pub fn parse(text: &str) -> Result<XmlNode> {
        let mut reader = Reader::from_str(text);
        reader.config_mut().trim_text(true);

        let mut stack: Vec<XmlNode> = Vec::new();
        let mut root: Option<XmlNode> = None;

        loop {
            match reader.read_event()? {
                Event::Start(e) => stack.push(node_from_start(&e)?),
                Event::Empty(e) => {
                    let node = node_from_start(&e)?;
                    attach(&mut stack, &mut root, node)?;
                }
                Event::End(_) => {
                    let node = stack.pop().ok_or_else(|| {
                        TpsError::MalformedDocument("unexpected closing tag".to_string())
                    })?;
                    attach(&mut stack, &mut root, node)?;
                }
                Event::Text(e) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&e.unescape()?);
                    }
                }
                Event::CData(e) => {
                    if let Some(top) = stack.last_mut() {
                        top.text.push_str(&String::from_utf8_lossy(&e.into_inner()));
                    }
                }
                Event::Eof => break,
                _ => (),
            }
        }

        if let Some(open) = stack.last() {
            return Err(TpsError::MalformedDocument(format!(
                "element <{}> is not closed",
                open.name
            )));
        }
        root.ok_or_else(|| TpsError::MalformedDocument("no root element".to_string()))
    }

    pub fn to_xml_string(&self) -> Result<String> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        self.write_into(&mut writer)?;
        String::from_utf8(writer.into_inner())
            .map_err(|e| TpsError::MalformedDocument(e.to_string()))
    }

    fn write_into<W: Write>(&self, writer: &mut Writer<W>) -> Result<()> {
        let mut start = BytesStart::new(self.name.as_str());
        for (key, value) in &self.attributes {
            start.push_attribute((key.as_str(), value.as_str()));
        }

        if self.children.is_empty() && self.text.is_empty() {
            writer.write_event(Event::Empty(start))?;
            return Ok(());
        }

        writer.write_event(Event::Start(start))?;
        if !self.text.is_empty() {
            writer.write_event(Event::Text(BytesText::new(&self.text)))?;
        }
        for child in &self.children {
            child.write_into(writer)?;
        }
        writer.write_event(Event::End(BytesEnd::new(self.name.as_str())))?;
        Ok(())
    }
}

fn node_from_start(start: &BytesStart) -> Result<XmlNode> {
    let mut node = XmlNode::new(String::from_utf8_lossy(start.name().as_ref()));
    for attr in start.attributes() {
        let attr = attr?;
        node.attributes.push((
            String::from_utf8_lossy(attr.key.as_ref()).into_owned(),
            attr.unescape_value()?.into_owned(),
        ));
    }
    Ok(node)
}

fn attach(stack: &mut [XmlNode], root: &mut Option<XmlNode>, node: XmlNode) -> Result<()> {
    match stack.last_mut() {
        Some(parent) => parent.children.push(node),
        None if root.is_none() => *root = Some(node),
        None => {
            return Err(TpsError::MalformedDocument(format!(
                "unexpected second root element <{}>",
                node.name
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_document() {
        let text = r#"<?xml version="1.0"?>
            <Root kind="test">
              <!-- comment -->
              <Flag>1</Flag>
              <Item Id="a &amp; b" Value="3.5"/>
              <Item Id="c"><Note>hello</Note></Item>
            </Root>"#;
        let root = XmlNode::parse(text).unwrap();

        assert_eq!(root.name, "Root");
        assert_eq!(root.attribute("KIND"), Some("test"));
        assert_eq!(root.value("Flag"), Some("1"));
        assert_eq!(root.children.len(), 3);
        assert_eq!(root.children[1].attribute("Id"), Some("a & b"));
        assert_eq!(root.value("item.Value"), Some("3.5"));
        assert_eq!(root.children[2].value("Note"), Some("hello"));
        assert_eq!(root.value("Missing"), None);
    }

    #[test]
    fn test_write_then_parse() {
        let mut root = XmlNode::new("Root");
        root.add_child(XmlNode::with_text("Flag", "0"));
        let item = root.add_child(XmlNode::new("Item"));
        item.set_attribute("Id", "<1>");
        item.set_attribute("id", "<2>");
        item.add_child(XmlNode::with_text("Info", "a \"quoted\" note"));

        let text = root.to_xml_string().unwrap();
        assert!(text.contains("<Flag>0</Flag>"), "{}", text);

        let parsed = XmlNode::parse(&text).unwrap();
        assert_eq!(parsed, root);
        assert_eq!(parsed.children[1].attribute("Id"), Some("<2>"));
    }

    #[test]
    fn test_malformed_documents() {
        assert!(XmlNode::parse("").is_err());
        assert!(XmlNode::parse("<A><B></A>").is_err());
        assert!(XmlNode::parse("<A>").is_err());
        assert!(XmlNode::parse("<A/><B/>").is_err());
    }
}
