//! Parsed XML element tree.
//!
//! An [`Element`] is the unit the broker routes: a tag, its attributes in
//! document order, nested children and character data. Elements are parsed
//! from one complete top-level element with `quick-xml` and can be written
//! back out with [`Element::to_xml`].

use std::fmt;

use quick_xml::escape::escape;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::error::{XmlError, XmlResult};

/// One XML element with attributes, children and character data.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Element {
    tag: String,
    attributes: Vec<(String, String)>,
    children: Vec<Element>,
    text: String,
}

impl Element {
    /// Create an element with no attributes, children or text.
    pub fn new(tag: impl Into<String>) -> Self {
        Self {
            tag: tag.into(),
            ..Default::default()
        }
    }

    /// Builder form of [`Element::set_attr`].
    pub fn with_attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.set_attr(name, value);
        self
    }

    /// Builder form of [`Element::push_child`].
    pub fn with_child(mut self, child: Element) -> Self {
        self.push_child(child);
        self
    }

    /// Builder form of [`Element::set_text`].
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.set_text(text);
        self
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Look up an attribute value by name.
    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Set an attribute, replacing an existing value in place or appending.
    pub fn set_attr(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.attributes.iter_mut().find(|(key, _)| *key == name) {
            Some(slot) => slot.1 = value,
            None => self.attributes.push((name, value)),
        }
    }

    /// Remove an attribute, returning its previous value.
    pub fn remove_attr(&mut self, name: &str) -> Option<String> {
        let index = self.attributes.iter().position(|(key, _)| key == name)?;
        Some(self.attributes.remove(index).1)
    }

    /// Attributes in document order.
    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes
            .iter()
            .map(|(key, value)| (key.as_str(), value.as_str()))
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    pub fn push_child(&mut self, child: Element) {
        self.children.push(child);
    }

    /// Character data directly inside this element.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.text = text.into();
    }

    /// Parse exactly one element from `input`.
    ///
    /// Declarations, comments and processing instructions around the element
    /// are skipped. Anything after the first complete element is ignored.
    pub fn parse(input: &str) -> XmlResult<Element> {
        let mut reader = Reader::from_str(input);
        reader.trim_text(true);

        let mut stack: Vec<Element> = Vec::new();

        loop {
            match reader.read_event()? {
                Event::Start(start) => stack.push(Self::from_start(&start)?),
                Event::Empty(start) => {
                    let element = Self::from_start(&start)?;
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => return Ok(element),
                    }
                }
                Event::End(end) => {
                    let found = std::str::from_utf8(end.name().as_ref())?.to_string();
                    let element = stack.pop().ok_or(XmlError::UnexpectedCloseTag)?;
                    if element.tag != found {
                        return Err(XmlError::MismatchedCloseTag {
                            expected: element.tag,
                            found,
                        });
                    }
                    match stack.last_mut() {
                        Some(parent) => parent.children.push(element),
                        None => return Ok(element),
                    }
                }
                Event::Text(text) => {
                    if let Some(current) = stack.last_mut() {
                        current.text.push_str(&text.unescape()?);
                    }
                }
                Event::CData(data) => {
                    if let Some(current) = stack.last_mut() {
                        let bytes = data.into_inner();
                        current.text.push_str(std::str::from_utf8(&bytes)?);
                    }
                }
                Event::Eof => {
                    return Err(match stack.pop() {
                        Some(open) => {
                            XmlError::ParseFailed(format!("unterminated element <{}>", open.tag))
                        }
                        None => XmlError::EmptyElement,
                    });
                }
                _ => {}
            }
        }
    }

    /// Parse one element from raw bytes.
    pub fn from_bytes(input: &[u8]) -> XmlResult<Element> {
        Self::parse(std::str::from_utf8(input)?)
    }

    fn from_start(start: &BytesStart<'_>) -> XmlResult<Element> {
        let tag = std::str::from_utf8(start.name().as_ref())?.to_string();
        let mut element = Element::new(tag);

        for attribute in start.attributes() {
            let attribute = attribute.map_err(|e| XmlError::ParseFailed(e.to_string()))?;
            let key = std::str::from_utf8(attribute.key.as_ref())?.to_string();
            let value = attribute.unescape_value()?.into_owned();
            element.attributes.push((key, value));
        }

        Ok(element)
    }

    /// Serialize the element and its children, one element per line.
    pub fn to_xml(&self) -> String {
        let mut out = String::new();
        self.write_into(&mut out, 0);
        out
    }

    fn write_into(&self, out: &mut String, level: usize) {
        for _ in 0..level {
            out.push_str("  ");
        }
        out.push('<');
        out.push_str(&self.tag);
        for (key, value) in &self.attributes {
            out.push(' ');
            out.push_str(key);
            out.push_str("=\"");
            out.push_str(&escape(value));
            out.push('"');
        }

        if self.children.is_empty() && self.text.is_empty() {
            out.push_str("/>\n");
            return;
        }

        out.push('>');
        if self.children.is_empty() {
            out.push_str(&escape(&self.text));
        } else {
            out.push('\n');
            if !self.text.is_empty() {
                out.push_str(&escape(&self.text));
                out.push('\n');
            }
            for child in &self.children {
                child.write_into(out, level + 1);
            }
            for _ in 0..level {
                out.push_str("  ");
            }
        }
        out.push_str("</");
        out.push_str(&self.tag);
        out.push_str(">\n");
    }
}

impl fmt::Display for Element {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_xml())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_nested_vector() {
        let xml = r#"<setNumberVector device="Telescope" name="EQUATORIAL_EOD_COORD" state="Ok">
  <oneNumber name="RA">5.5</oneNumber>
  <oneNumber name="DEC">-12.25</oneNumber>
</setNumberVector>"#;

        let element = Element::parse(xml).unwrap();
        assert_eq!(element.tag(), "setNumberVector");
        assert_eq!(element.attr("device"), Some("Telescope"));
        assert_eq!(element.attr("state"), Some("Ok"));
        assert_eq!(element.children().len(), 2);
        assert_eq!(element.children()[0].attr("name"), Some("RA"));
        assert_eq!(element.children()[1].text(), "-12.25");
    }

    #[test]
    fn test_parse_single_quoted_attributes() {
        let element = Element::parse("<getProperties version='1.7' device='CCD'/>").unwrap();
        assert_eq!(element.tag(), "getProperties");
        assert_eq!(element.attr("version"), Some("1.7"));
        assert_eq!(element.attr("device"), Some("CCD"));
        assert!(element.children().is_empty());
    }

    #[test]
    fn test_parse_unescapes_entities() {
        let element =
            Element::parse(r#"<message device="a&amp;b">x &lt; y</message>"#).unwrap();
        assert_eq!(element.attr("device"), Some("a&b"));
        assert_eq!(element.text(), "x < y");
    }

    #[test]
    fn test_parse_skips_declaration() {
        let element = Element::parse("<?xml version='1.0'?>\n<enableBLOB>Also</enableBLOB>").unwrap();
        assert_eq!(element.tag(), "enableBLOB");
        assert_eq!(element.text(), "Also");
    }

    #[test]
    fn test_parse_rejects_unterminated() {
        assert!(matches!(
            Element::parse("<defTextVector device='x'>"),
            Err(XmlError::ParseFailed(_))
        ));
        assert_eq!(Element::parse("   "), Err(XmlError::EmptyElement));
    }

    #[test]
    fn test_attribute_mutation() {
        let mut element = Element::new("getProperties").with_attr("version", "1.7");
        element.set_attr("device", "Focuser");
        assert_eq!(element.attr("device"), Some("Focuser"));

        element.set_attr("device", "Wheel");
        assert_eq!(element.attributes().count(), 2);
        assert_eq!(element.attr("device"), Some("Wheel"));

        assert_eq!(element.remove_attr("device"), Some("Wheel".to_string()));
        assert_eq!(element.attr("device"), None);
        assert_eq!(element.remove_attr("device"), None);
    }

    #[test]
    fn test_to_xml_reparses_to_same_tree() {
        let element = Element::new("newSwitchVector")
            .with_attr("device", "Dome \"North\"")
            .with_attr("name", "SHUTTER")
            .with_child(Element::new("oneSwitch").with_attr("name", "OPEN").with_text("On"))
            .with_child(Element::new("oneSwitch").with_attr("name", "CLOSE").with_text("Off"));

        let xml = element.to_xml();
        assert!(xml.ends_with("</newSwitchVector>\n"));
        assert!(xml.contains("&quot;North&quot;"));
        assert_eq!(Element::parse(&xml).unwrap(), element);
    }

    #[test]
    fn test_empty_element_serializes_self_closing() {
        let xml = Element::new("delProperty").with_attr("device", "CCD").to_xml();
        assert_eq!(xml, "<delProperty device=\"CCD\"/>\n");
    }
}
