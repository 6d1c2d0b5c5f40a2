//! # Block XML
//!
//! Converts block subtrees to and from the instance format:
//!
//! ```xml
//! <block type="controls_if" id="a1" x="10" y="20">
//!   <mutation else="1"/>
//!   <field name="NAME">value</field>
//!   <value name="IF0"><shadow type="logic_boolean"/><block type="..."/></value>
//!   <statement name="DO0">...</statement>
//!   <next><block type="..."/></next>
//! </block>
//! ```
//!
//! Writing walks the graph; reading produces [`BlockTemplate`]s for the
//! factory, so loaded blocks go through the same validation as any other.

use crate::block::{Block, BlockId, WorkspacePoint};
use crate::connection::Connection;
use crate::error::{BlockLoadError, StructureError};
use crate::graph::BlockGraph;
use crate::input::InputType;
use crate::template::{BlockTemplate, ChildTemplate};
use crate::xml::XmlElement;

/// Serializes `id` and everything below it. Ids are written only when
/// `include_ids` is set; `x`/`y` only for root blocks.
pub fn block_to_xml(graph: &BlockGraph, id: &BlockId, include_ids: bool) -> Result<XmlElement, StructureError> {
    let mut visited = Vec::new();
    write_block(graph, id, include_ids, graph.is_root(id), &mut visited)
}

/// Serializes each block into one `<xml>` document.
pub fn blocks_to_xml_string(graph: &BlockGraph, ids: &[BlockId], include_ids: bool) -> Result<String, StructureError> {
    let mut root = XmlElement::new("xml");
    for id in ids {
        root.push_element(block_to_xml(graph, id, include_ids)?);
    }
    Ok(root.to_xml_string())
}

fn write_block(
    graph: &BlockGraph,
    id: &BlockId,
    include_ids: bool,
    with_position: bool,
    visited: &mut Vec<BlockId>,
) -> Result<XmlElement, StructureError> {
    if visited.contains(id) {
        return Err(StructureError::Cycle {
            parent: visited.last().map(BlockId::to_string).unwrap_or_default(),
            child: id.to_string(),
        });
    }
    visited.push(id.clone());
    let block = graph.block_or_err(id)?;

    let mut element = XmlElement::new(if block.is_shadow() { "shadow" } else { "block" });
    element.set_attr("type", block.block_type());
    if include_ids {
        element.set_attr("id", block.id().as_str());
    }
    if with_position {
        let position = block.position();
        element.set_attr("x", &position.x.to_string());
        element.set_attr("y", &position.y.to_string());
    }
    write_flags(block, &mut element);

    if let Some(mutation) = block.mutation() {
        let parsed = XmlElement::parse(&mutation).map_err(|e| StructureError::Mutation(e.to_string()))?;
        element.push_element(parsed);
    }
    if let Some(comment) = block.comment() {
        let mut node = XmlElement::new("comment");
        node.push_text(comment);
        element.push_element(node);
    }
    for field in block.inputs().iter().flat_map(|i| i.fields()) {
        if let (true, Some(name)) = (field.is_serializable(), field.name()) {
            let mut node = XmlElement::new("field").with_attr("name", name);
            node.push_text(&field.serialized_value());
            element.push_element(node);
        }
    }
    for input in block.inputs() {
        let (tag, connection) = match (input.input_type().xml_tag(), input.connection()) {
            (Some(tag), Some(connection)) => (tag, connection),
            _ => continue,
        };
        if let Some(slot) = write_slot(graph, tag, connection, include_ids, visited)? {
            element.push_element(slot.with_attr("name", input.name()));
        }
    }
    if let Some(next) = block.next_connection() {
        if let Some(slot) = write_slot(graph, "next", next, include_ids, visited)? {
            element.push_element(slot);
        }
    }

    visited.pop();
    Ok(element)
}

fn write_flags(block: &Block, element: &mut XmlElement) {
    if block.is_collapsed() {
        element.set_attr("collapsed", "true");
    }
    if !block.is_deletable() {
        element.set_attr("deletable", "false");
    }
    if block.is_disabled() {
        element.set_attr("disabled", "true");
    }
    if !block.is_editable() {
        element.set_attr("editable", "false");
    }
    if block.inputs_inline_modified() {
        element.set_attr("inline", if block.inputs_inline() { "true" } else { "false" });
    }
    if !block.is_movable() {
        element.set_attr("movable", "false");
    }
}

/// A `<value>`, `<statement>` or `<next>` wrapper, shadow first. `None` when
/// the slot holds nothing.
fn write_slot(
    graph: &BlockGraph,
    tag: &str,
    connection: &Connection,
    include_ids: bool,
    visited: &mut Vec<BlockId>,
) -> Result<Option<XmlElement>, StructureError> {
    let shadow = connection.shadow_block();
    let live = connection.target_block().filter(|b| Some(*b) != shadow);
    if shadow.is_none() && live.is_none() {
        return Ok(None);
    }
    let mut slot = XmlElement::new(tag);
    if let Some(shadow) = shadow {
        slot.push_element(write_block(graph, shadow, include_ids, false, visited)?);
    }
    if let Some(live) = live {
        slot.push_element(write_block(graph, live, include_ids, false, visited)?);
    }
    Ok(Some(slot))
}

/// Reads a document holding one or more blocks: an `<xml>` wrapper or a
/// single `<block>`/`<shadow>` element.
pub fn templates_from_xml_str(text: &str) -> Result<Vec<BlockTemplate>, BlockLoadError> {
    let root = XmlElement::parse(text)?;
    match root.name.as_str() {
        "xml" => root
            .elements()
            .map(|child| match child.name.as_str() {
                "block" | "shadow" => template_from_xml(child),
                other => Err(BlockLoadError::element(
                    other,
                    None,
                    format!("line {}: unexpected top-level element", child.line),
                )),
            })
            .collect(),
        _ => Ok(vec![template_from_xml(&root)?]),
    }
}

/// Converts one `<block>` or `<shadow>` element into a template.
pub fn template_from_xml(element: &XmlElement) -> Result<BlockTemplate, BlockLoadError> {
    let tag = element.name.as_str();
    if tag != "block" && tag != "shadow" {
        return Err(BlockLoadError::element(
            tag,
            None,
            format!("line {}: expected <block> or <shadow>", element.line),
        ));
    }
    let block_type = element
        .attr("type")
        .filter(|t| !t.is_empty())
        .ok_or_else(|| BlockLoadError::element(tag, None, format!("line {}: missing 'type' attribute", element.line)))?;
    let fail = |message: String| BlockLoadError::element(tag, Some(block_type), format!("line {}: {}", element.line, message));

    let mut template = BlockTemplate::of_type(block_type).shadow(tag == "shadow");
    if let Some(id) = element.attr("id").filter(|id| !id.is_empty()) {
        template = template.with_id(id);
    }
    match (element.attr("x"), element.attr("y")) {
        (Some(x), Some(y)) => {
            let point: WorkspacePoint = format!("{},{}", x, y).parse().map_err(fail)?;
            template.position = Some(point);
        }
        (None, None) => {}
        _ => return Err(fail("'x' and 'y' must be given together".to_string())),
    }
    for (attribute, slot) in [
        ("collapsed", &mut template.collapsed),
        ("deletable", &mut template.deletable),
        ("disabled", &mut template.disabled),
        ("editable", &mut template.editable),
        ("inline", &mut template.inputs_inline),
        ("movable", &mut template.movable),
    ] {
        if let Some(value) = element.attr(attribute) {
            *slot = Some(parse_flag(value).ok_or_else(|| fail(format!("{}=\"{}\" is not a boolean", attribute, value)))?);
        }
    }

    for child in element.elements() {
        match child.name.as_str() {
            "mutation" => template.mutation = Some(child.to_xml_string()),
            "comment" => template.comment = Some(child.text()),
            "field" => {
                let name = required_name(child, block_type)?;
                template.field_values.push((name.to_string(), child.text()));
            }
            "value" | "statement" => {
                let name = required_name(child, block_type)?;
                let children = read_slot(child, block_type)?;
                template = template.input_child(&child.name, name, None, None);
                if let Some(slot) = template.inputs.iter_mut().find(|c| c.input_name == name) {
                    slot.children = children;
                }
            }
            "next" => template.next = Some(read_slot(child, block_type)?),
            // Editor-only state with no model counterpart.
            "data" => {}
            other => {
                return Err(BlockLoadError::element(
                    other,
                    Some(block_type),
                    format!("line {}: unknown element", child.line),
                ))
            }
        }
    }
    Ok(template)
}

fn required_name<'a>(element: &'a XmlElement, block_type: &str) -> Result<&'a str, BlockLoadError> {
    element.attr("name").filter(|n| !n.is_empty()).ok_or_else(|| {
        BlockLoadError::element(
            element.name.as_str(),
            Some(block_type),
            format!("line {}: missing 'name' attribute", element.line),
        )
    })
}

fn read_slot(element: &XmlElement, block_type: &str) -> Result<ChildTemplate, BlockLoadError> {
    let mut slot = ChildTemplate::default();
    for child in element.elements() {
        let target = match child.name.as_str() {
            "block" => &mut slot.block,
            "shadow" => &mut slot.shadow,
            other => {
                return Err(BlockLoadError::element(
                    other,
                    Some(block_type),
                    format!("line {}: expected <block> or <shadow> inside <{}>", child.line, element.name),
                ))
            }
        };
        if target.is_some() {
            return Err(BlockLoadError::element(
                element.name.as_str(),
                Some(block_type),
                format!("line {}: more than one <{}>", child.line, child.name),
            ));
        }
        *target = Some(Box::new(template_from_xml(child)?));
    }
    Ok(slot)
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "true" | "1" => Some(true),
        "false" | "0" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::TemplateSource;

    #[test]
    fn reads_nested_blocks() {
        let templates = templates_from_xml_str(
            r#"<xml>
                 <block type="controls_if" id="if1" x="5" y="-3" inline="false">
                   <mutation else="1"></mutation>
                   <value name="IF0"><shadow type="logic_boolean"><field name="BOOL">TRUE</field></shadow></value>
                   <next><block type="text_print"/></next>
                 </block>
               </xml>"#,
        )
        .unwrap();
        assert_eq!(templates.len(), 1);
        let t = &templates[0];
        assert!(matches!(t.source(), Some(TemplateSource::Type(name)) if name == "controls_if"));
        assert_eq!(t.id, Some(BlockId::from("if1")));
        assert_eq!(t.position, Some(WorkspacePoint::new(5.0, -3.0)));
        assert_eq!(t.inputs_inline, Some(false));
        assert_eq!(t.mutation.as_deref(), Some("<mutation else=\"1\"/>"));
        let shadow = t.inputs[0].children.shadow.as_ref().unwrap();
        assert_eq!(shadow.shadow, Some(true));
        assert_eq!(shadow.field_values, vec![("BOOL".to_string(), "TRUE".to_string())]);
        assert!(t.next.as_ref().unwrap().block.is_some());
    }

    #[test]
    fn missing_type_names_the_tag() {
        let err = templates_from_xml_str("<block id=\"x\"/>").unwrap_err();
        assert!(matches!(err, BlockLoadError::Element { ref tag, .. } if tag == "block"));
    }

    #[test]
    fn unknown_child_is_rejected_with_line() {
        let err = templates_from_xml_str("<block type=\"t\">\n<bogus/>\n</block>").unwrap_err();
        match err {
            BlockLoadError::Element { tag, block_type, message } => {
                assert_eq!(tag, "bogus");
                assert_eq!(block_type.as_deref(), Some("t"));
                assert!(message.contains("line 2"));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn two_blocks_in_one_slot_rejected() {
        let err = templates_from_xml_str(r#"<block type="t"><next><block type="a"/><block type="b"/></next></block>"#);
        assert!(err.is_err());
    }

    #[test]
    fn bad_flag_value() {
        assert!(templates_from_xml_str(r#"<block type="t" collapsed="maybe"/>"#).is_err());
        assert!(templates_from_xml_str(r#"<block type="t" x="1"/>"#).is_err());
    }
}
