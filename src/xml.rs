//! # XML element trees
//!
//! Just enough XML for the block instance format: elements, attributes,
//! text, the five predefined entities plus numeric character references,
//! comments, processing instructions and a doctype that are skipped.
//! Errors carry the line they were found on.

use crate::error::BlockLoadError;
use std::fmt::Write as _;

#[derive(Debug, Clone, PartialEq)]
pub enum XmlNode {
    Element(XmlElement),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct XmlElement {
    pub name: String,
    pub attributes: Vec<(String, String)>,
    pub children: Vec<XmlNode>,
    /// Line of the opening tag, 1-based; 0 for elements built in memory.
    pub line: usize,
}

// Source lines are diagnostics, not content.
impl PartialEq for XmlElement {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.attributes == other.attributes && self.children == other.children
    }
}

impl XmlElement {
    pub fn new(name: &str) -> Self {
        XmlElement {
            name: name.to_string(),
            attributes: Vec::new(),
            children: Vec::new(),
            line: 0,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    pub fn set_attr(&mut self, name: &str, value: &str) {
        match self.attributes.iter_mut().find(|(k, _)| k == name) {
            Some((_, v)) => *v = value.to_string(),
            None => self.attributes.push((name.to_string(), value.to_string())),
        }
    }

    pub fn with_attr(mut self, name: &str, value: &str) -> Self {
        self.set_attr(name, value);
        self
    }

    pub fn push_element(&mut self, element: XmlElement) {
        self.children.push(XmlNode::Element(element));
    }

    pub fn push_text(&mut self, text: &str) {
        self.children.push(XmlNode::Text(text.to_string()));
    }

    /// Child elements in document order.
    pub fn elements(&self) -> impl Iterator<Item = &XmlElement> {
        self.children.iter().filter_map(|node| match node {
            XmlNode::Element(e) => Some(e),
            XmlNode::Text(_) => None,
        })
    }

    /// Concatenated text content of the direct children.
    pub fn text(&self) -> String {
        self.children
            .iter()
            .filter_map(|node| match node {
                XmlNode::Text(t) => Some(t.as_str()),
                XmlNode::Element(_) => None,
            })
            .collect()
    }

    pub fn to_xml_string(&self) -> String {
        let mut out = String::new();
        self.write_to(&mut out);
        out
    }

    fn write_to(&self, out: &mut String) {
        out.push('<');
        out.push_str(&self.name);
        for (key, value) in &self.attributes {
            let _ = write!(out, " {}=\"{}\"", key, escape(value, true));
        }
        if self.children.is_empty() {
            out.push_str("/>");
            return;
        }
        out.push('>');
        for child in &self.children {
            match child {
                XmlNode::Element(e) => e.write_to(out),
                XmlNode::Text(t) => out.push_str(&escape(t, false)),
            }
        }
        let _ = write!(out, "</{}>", self.name);
    }

    /// Parses a document with a single root element.
    pub fn parse(input: &str) -> Result<XmlElement, BlockLoadError> {
        let mut parser = Parser::new(input);
        parser.skip_misc()?;
        if parser.at_end() {
            return Err(parser.error("document has no root element"));
        }
        let root = parser.parse_element()?;
        parser.skip_misc()?;
        if !parser.at_end() {
            return Err(parser.error("content after the root element"));
        }
        Ok(root)
    }
}

fn escape(text: &str, attribute: bool) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            '\n' if attribute => out.push_str("&#10;"),
            _ => out.push(c),
        }
    }
    out
}

struct Parser<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Parser { src, pos: 0, line: 1 }
    }

    fn error(&self, message: impl Into<String>) -> BlockLoadError {
        BlockLoadError::Xml {
            line: self.line,
            message: message.into(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn at_end(&self) -> bool {
        self.pos >= self.src.len()
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn advance(&mut self, bytes: usize) {
        let consumed = &self.src[self.pos..self.pos + bytes];
        self.line += consumed.matches('\n').count();
        self.pos += bytes;
    }

    fn eat(&mut self, token: &str) -> bool {
        if self.rest().starts_with(token) {
            self.advance(token.len());
            true
        } else {
            false
        }
    }

    fn expect(&mut self, token: &str) -> Result<(), BlockLoadError> {
        if self.eat(token) {
            Ok(())
        } else {
            Err(self.error(format!("expected '{}'", token)))
        }
    }

    fn skip_whitespace(&mut self) {
        let len = self.rest().len() - self.rest().trim_start().len();
        self.advance(len);
    }

    fn skip_until(&mut self, terminator: &str, what: &str) -> Result<(), BlockLoadError> {
        match self.rest().find(terminator) {
            Some(offset) => {
                self.advance(offset + terminator.len());
                Ok(())
            }
            None => Err(self.error(format!("unterminated {}", what))),
        }
    }

    /// Skips whitespace, comments, processing instructions and doctypes.
    fn skip_misc(&mut self) -> Result<(), BlockLoadError> {
        loop {
            self.skip_whitespace();
            if self.eat("<!--") {
                self.skip_until("-->", "comment")?;
            } else if self.eat("<?") {
                self.skip_until("?>", "processing instruction")?;
            } else if self.eat("<!DOCTYPE") {
                self.skip_until(">", "doctype")?;
            } else {
                return Ok(());
            }
        }
    }

    fn parse_name(&mut self) -> Result<String, BlockLoadError> {
        let len = self
            .rest()
            .find(|c: char| !(c.is_alphanumeric() || matches!(c, '_' | '-' | '.' | ':')))
            .unwrap_or(self.rest().len());
        if len == 0 {
            return Err(self.error("expected a name"));
        }
        let name = self.rest()[..len].to_string();
        self.advance(len);
        Ok(name)
    }

    fn parse_element(&mut self) -> Result<XmlElement, BlockLoadError> {
        let line = self.line;
        self.expect("<")?;
        let name = self.parse_name()?;
        let mut element = XmlElement::new(&name);
        element.line = line;

        loop {
            self.skip_whitespace();
            if self.eat("/>") {
                return Ok(element);
            }
            if self.eat(">") {
                break;
            }
            let key = self.parse_name()?;
            self.skip_whitespace();
            self.expect("=")?;
            self.skip_whitespace();
            let quote = match self.peek() {
                Some(q @ ('"' | '\'')) => q,
                _ => return Err(self.error(format!("attribute '{}' value must be quoted", key))),
            };
            self.advance(1);
            let end = self
                .rest()
                .find(quote)
                .ok_or_else(|| self.error(format!("unterminated value of attribute '{}'", key)))?;
            let raw = &self.rest()[..end];
            let value = self.decode(raw)?;
            self.advance(end + 1);
            if element.attr(&key).is_some() {
                return Err(self.error(format!("duplicate attribute '{}' on <{}>", key, name)));
            }
            element.attributes.push((key, value));
        }

        loop {
            if self.eat("</") {
                let closing = self.parse_name()?;
                if closing != name {
                    return Err(self.error(format!("</{}> does not close <{}>", closing, name)));
                }
                self.skip_whitespace();
                self.expect(">")?;
                break;
            }
            if self.eat("<!--") {
                self.skip_until("-->", "comment")?;
                continue;
            }
            if self.eat("<![CDATA[") {
                let end = self
                    .rest()
                    .find("]]>")
                    .ok_or_else(|| self.error("unterminated CDATA section"))?;
                let text = self.rest()[..end].to_string();
                self.advance(end + 3);
                element.push_text(&text);
                continue;
            }
            match self.peek() {
                None => return Err(self.error(format!("<{}> is not closed", name))),
                Some('<') => {
                    let child = self.parse_element()?;
                    element.push_element(child);
                }
                Some(_) => {
                    let end = self.rest().find('<').unwrap_or(self.rest().len());
                    let raw = &self.rest()[..end];
                    let text = self.decode(raw)?;
                    self.advance(end);
                    element.push_text(&text);
                }
            }
        }

        // Whitespace between child elements is formatting, not content.
        if element.elements().next().is_some() {
            element
                .children
                .retain(|node| !matches!(node, XmlNode::Text(t) if t.trim().is_empty()));
        }
        merge_text(&mut element.children);
        Ok(element)
    }

    fn decode(&self, raw: &str) -> Result<String, BlockLoadError> {
        let mut out = String::with_capacity(raw.len());
        let mut rest = raw;
        while let Some(amp) = rest.find('&') {
            out.push_str(&rest[..amp]);
            let after = &rest[amp + 1..];
            let semi = after
                .find(';')
                .ok_or_else(|| self.error("unterminated entity reference"))?;
            let entity = &after[..semi];
            let decoded = match entity {
                "lt" => '<',
                "gt" => '>',
                "amp" => '&',
                "quot" => '"',
                "apos" => '\'',
                _ => {
                    let code = if let Some(hex) = entity.strip_prefix("#x") {
                        u32::from_str_radix(hex, 16).ok()
                    } else if let Some(dec) = entity.strip_prefix('#') {
                        dec.parse::<u32>().ok()
                    } else {
                        None
                    };
                    code.and_then(char::from_u32)
                        .ok_or_else(|| self.error(format!("unknown entity '&{};'", entity)))?
                }
            };
            out.push(decoded);
            rest = &after[semi + 1..];
        }
        out.push_str(rest);
        Ok(out)
    }
}

fn merge_text(children: &mut Vec<XmlNode>) {
    let mut merged: Vec<XmlNode> = Vec::with_capacity(children.len());
    for node in children.drain(..) {
        match (merged.last_mut(), node) {
            (Some(XmlNode::Text(prev)), XmlNode::Text(next)) => prev.push_str(&next),
            (_, node) => merged.push(node),
        }
    }
    *children = merged;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_elements_and_attributes() {
        let xml = r#"<?xml version="1.0"?>
            <block type="math_number" id="a">
              <!-- a comment -->
              <field name="NUM">42</field>
            </block>"#;
        let root = XmlElement::parse(xml).unwrap();
        assert_eq!(root.name, "block");
        assert_eq!(root.attr("type"), Some("math_number"));
        assert_eq!(root.line, 2);
        let field = root.elements().next().unwrap();
        assert_eq!(field.text(), "42");
        assert_eq!(field.line, 4);
    }

    #[test]
    fn decodes_entities() {
        let root = XmlElement::parse("<a t=\"&lt;&quot;&#65;&#x42;\">x &amp; y</a>").unwrap();
        assert_eq!(root.attr("t"), Some("<\"AB"));
        assert_eq!(root.text(), "x & y");
    }

    #[test]
    fn writes_escaped_output_that_parses_back() {
        let mut root = XmlElement::new("comment").with_attr("q", "a\"b");
        root.push_text("1 < 2 & 3");
        let text = root.to_xml_string();
        assert_eq!(text, "<comment q=\"a&quot;b\">1 &lt; 2 &amp; 3</comment>");
        assert_eq!(XmlElement::parse(&text).unwrap(), root);
    }

    #[test]
    fn empty_elements_self_close() {
        assert_eq!(XmlElement::new("mutation").to_xml_string(), "<mutation/>");
    }

    #[test]
    fn reports_line_of_mismatched_tag() {
        let err = XmlElement::parse("<a>\n<b>\n</c></a>").unwrap_err();
        assert!(matches!(err, BlockLoadError::Xml { line: 3, .. }));
    }

    #[test]
    fn rejects_trailing_content_and_missing_root() {
        assert!(XmlElement::parse("<a/><b/>").is_err());
        assert!(XmlElement::parse("   ").is_err());
        assert!(XmlElement::parse("<a>").is_err());
        assert!(XmlElement::parse("<a x=1/>").is_err());
    }

    #[test]
    fn keeps_whitespace_only_text_without_child_elements() {
        let root = XmlElement::parse("<field name=\"T\">  </field>").unwrap();
        assert_eq!(root.text(), "  ");
    }
}
