//! # Block definitions
//!
//! A [`BlockDefinition`] is the parsed JSON shape template of a block type:
//! its connections, colour, mutator, extensions and the `message{N}` /
//! `args{N}` pairs that produce its inputs and fields.

use crate::block::{placeholder_index, Block, BlockId, Shape, ShapeConnection, ShapeInput};
use crate::color::Color;
use crate::connection::{Connection, ConnectionType};
use crate::error::BlockLoadError;
use crate::field::{DropdownOptionsRegistry, Field};
use crate::input::{parse_checks, Alignment, Input, InputType};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;

/// Check list of a definition connection; `None` accepts anything.
pub type ConnectionChecks = Option<Vec<String>>;

#[derive(Debug, Clone, PartialEq)]
struct MessageTemplate {
    message: String,
    args: Vec<Value>,
    last_dummy_align: Alignment,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockDefinition {
    type_name: String,
    json: Arc<Value>,
    output: Option<ConnectionChecks>,
    previous: Option<ConnectionChecks>,
    next: Option<ConnectionChecks>,
    color: Color,
    style: Option<Arc<Value>>,
    inputs_inline: Option<bool>,
    mutator: Option<String>,
    extensions: Vec<String>,
    tooltip: Option<String>,
    help_url: Option<String>,
    messages: Vec<MessageTemplate>,
}

impl BlockDefinition {
    /// Parses a definition object.
    pub fn from_json(json: &Value) -> Result<BlockDefinition, BlockLoadError> {
        let object = json
            .as_object()
            .ok_or_else(|| BlockLoadError::Json("block definition must be an object".to_string()))?;
        let type_name = object
            .get("type")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| BlockLoadError::Json("block definition is missing 'type'".to_string()))?
            .to_string();
        let t = type_name.as_str();

        let connection = |key: &str| -> Result<Option<ConnectionChecks>, BlockLoadError> {
            match object.get(key) {
                None => Ok(None),
                Some(checks) => Ok(Some(parse_checks(Some(checks), t)?)),
            }
        };
        let output = connection("output")?;
        let previous = connection("previousStatement")?;
        let next = connection("nextStatement")?;
        if output.is_some() && previous.is_some() {
            return Err(BlockLoadError::definition(
                t,
                "a block cannot have both 'output' and 'previousStatement'",
            ));
        }

        let color = match object.get("colour") {
            None | Some(Value::Null) => Color::default(),
            Some(Value::Number(hue)) => Color::from_hue(hue.as_f64().unwrap_or(0.0)),
            Some(Value::String(text)) if text.starts_with('#') => {
                text.parse().map_err(|e: String| BlockLoadError::definition(t, e))?
            }
            Some(Value::String(text)) => Color::from_hue(
                text.trim()
                    .parse::<f64>()
                    .map_err(|_| BlockLoadError::definition(t, format!("invalid colour '{}'", text)))?,
            ),
            Some(other) => return Err(BlockLoadError::definition(t, format!("invalid colour {}", other))),
        };

        let optional_str = |key: &str| object.get(key).and_then(Value::as_str).map(str::to_string);
        let inputs_inline = match object.get("inputsInline") {
            None | Some(Value::Null) => None,
            Some(Value::Bool(b)) => Some(*b),
            Some(other) => {
                return Err(BlockLoadError::definition(t, format!("inputsInline must be a boolean, found {}", other)))
            }
        };
        let extensions = match object.get("extensions") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(names)) => names
                .iter()
                .map(|n| {
                    n.as_str()
                        .map(str::to_string)
                        .ok_or_else(|| BlockLoadError::definition(t, "extension names must be strings"))
                })
                .collect::<Result<_, _>>()?,
            Some(other) => return Err(BlockLoadError::definition(t, format!("invalid extensions {}", other))),
        };

        let mut messages = Vec::new();
        let mut n = 0;
        while let Some(message) = object.get(&format!("message{}", n)) {
            let message = message
                .as_str()
                .ok_or_else(|| BlockLoadError::definition(t, format!("message{} must be a string", n)))?
                .to_string();
            let args = match object.get(&format!("args{}", n)) {
                None | Some(Value::Null) => Vec::new(),
                Some(Value::Array(args)) => args.clone(),
                Some(_) => return Err(BlockLoadError::definition(t, format!("args{} must be an array", n))),
            };
            let last_dummy_align = match object.get(&format!("lastDummyAlign{}", n)).and_then(Value::as_str) {
                Some(align) => Alignment::from_json_name(align)
                    .ok_or_else(|| BlockLoadError::definition(t, format!("unknown alignment '{}'", align)))?,
                None => Alignment::Left,
            };
            messages.push(MessageTemplate {
                message,
                args,
                last_dummy_align,
            });
            n += 1;
        }
        if object.contains_key(&format!("args{}", n)) {
            return Err(BlockLoadError::definition(t, format!("args{} has no matching message{}", n, n)));
        }

        Ok(BlockDefinition {
            output,
            previous,
            next,
            color,
            style: object.get("style").cloned().map(Arc::new),
            inputs_inline,
            mutator: optional_str("mutator"),
            extensions,
            tooltip: optional_str("tooltip"),
            help_url: optional_str("helpUrl"),
            messages,
            json: Arc::new(json.clone()),
            type_name,
        })
    }

    pub fn from_json_str(text: &str) -> Result<BlockDefinition, BlockLoadError> {
        let json: Value = serde_json::from_str(text)?;
        Self::from_json(&json)
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// The JSON this definition was parsed from.
    pub fn json(&self) -> &Value {
        &self.json
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn has_output(&self) -> bool {
        self.output.is_some()
    }

    pub fn has_previous(&self) -> bool {
        self.previous.is_some()
    }

    pub fn has_next(&self) -> bool {
        self.next.is_some()
    }

    pub fn mutator(&self) -> Option<&str> {
        self.mutator.as_deref()
    }

    pub fn extensions(&self) -> &[String] {
        &self.extensions
    }

    pub fn inputs_inline(&self) -> Option<bool> {
        self.inputs_inline
    }

    /// Builds the input list from the message templates.
    ///
    /// Every argument must be referenced exactly once; fields left after the
    /// last input of a message form a trailing dummy input.
    pub fn create_inputs(&self, dropdowns: &DropdownOptionsRegistry) -> Result<Vec<Input>, BlockLoadError> {
        let t = self.type_name.as_str();
        let mut inputs: Vec<Input> = Vec::new();
        let mut names: HashSet<String> = HashSet::new();

        for (n, template) in self.messages.iter().enumerate() {
            let mut used = vec![false; template.args.len()];
            let mut fields: Vec<Field> = Vec::new();

            for token in Block::tokenize_message(&template.message) {
                let index = match placeholder_index(&token) {
                    Some(index) => index,
                    None => {
                        fields.push(Field::label(&token));
                        continue;
                    }
                };
                if index == 0 || index > template.args.len() {
                    return Err(BlockLoadError::MessageArgument {
                        block_type: t.to_string(),
                        message: format!(
                            "message{} references %{} but args{} has {} item(s)",
                            n,
                            index,
                            n,
                            template.args.len()
                        ),
                    });
                }
                if std::mem::replace(&mut used[index - 1], true) {
                    return Err(BlockLoadError::MessageArgument {
                        block_type: t.to_string(),
                        message: format!("message{} references %{} more than once", n, index),
                    });
                }

                let arg = &template.args[index - 1];
                let arg_type = arg.get("type").and_then(Value::as_str).unwrap_or_default();
                if InputType::from_json_name(arg_type).is_some() {
                    let mut input = Input::from_json(arg, t)?;
                    if !input.name().is_empty() && !names.insert(input.name().to_ascii_lowercase()) {
                        return Err(BlockLoadError::definition(t, format!("duplicate input name '{}'", input.name())));
                    }
                    input.fields_mut().append(&mut fields);
                    inputs.push(input);
                } else {
                    fields.push(field_with_fallback(arg, t, dropdowns)?);
                }
            }

            if let Some(unused) = used.iter().position(|u| !u) {
                return Err(BlockLoadError::MessageArgument {
                    block_type: t.to_string(),
                    message: format!("args{} item {} is never referenced by message{}", n, unused + 1, n),
                });
            }
            if !fields.is_empty() {
                let mut dummy = Input::dummy("").with_align(template.last_dummy_align);
                dummy.fields_mut().append(&mut fields);
                inputs.push(dummy);
            }
        }
        Ok(inputs)
    }

    /// Builds a new, unattached block of this type.
    pub(crate) fn build_block(&self, id: BlockId, dropdowns: &DropdownOptionsRegistry) -> Result<Block, BlockLoadError> {
        let inputs = self.create_inputs(dropdowns)?;
        let mut block = Block::new(id, &self.type_name, self.color);
        block.style = self.style.clone();
        block.tooltip = self.tooltip.clone();
        block.help_url = self.help_url.clone();
        block.inputs_inline = self.inputs_inline.unwrap_or(false);

        let fresh = |kind: ConnectionType, checks: &Option<ConnectionChecks>| {
            checks
                .as_ref()
                .map(|c| ShapeConnection::Fresh(Connection::new(kind, c.clone())))
        };
        let shape = Shape {
            inputs: inputs.into_iter().map(ShapeInput::Fresh).collect(),
            output: fresh(ConnectionType::Output, &self.output),
            previous: fresh(ConnectionType::Previous, &self.previous),
            next: fresh(ConnectionType::Next, &self.next),
        };
        block
            .validate_shape(&shape)
            .map_err(|e| BlockLoadError::definition(&self.type_name, e.to_string()))?;
        block.apply_shape(shape);
        Ok(block)
    }
}

/// Builds a field, following `alt` definitions while the type is unknown.
fn field_with_fallback(
    arg: &Value,
    block_type: &str,
    dropdowns: &DropdownOptionsRegistry,
) -> Result<Field, BlockLoadError> {
    let mut current = arg;
    loop {
        match Field::from_json(current, block_type, dropdowns) {
            Err(BlockLoadError::UnknownFieldType { .. }) if current.get("alt").is_some() => {
                tracing::debug!(
                    "[DEFS] {}: unknown field type {:?}, using alt",
                    block_type,
                    current.get("type")
                );
                current = &current["alt"];
            }
            result => return result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::FieldType;
    use serde_json::json;

    fn inputs_of(json: Value) -> Result<Vec<Input>, BlockLoadError> {
        BlockDefinition::from_json(&json)?.create_inputs(&DropdownOptionsRegistry::new())
    }

    #[test]
    fn builds_inputs_from_message() {
        let inputs = inputs_of(json!({
            "type": "move_to",
            "message0": "Move %1 to %2",
            "args0": [
                {"type": "input_value", "name": "WHAT"},
                {"type": "input_value", "name": "WHERE", "check": "Position"}
            ],
            "previousStatement": null,
            "nextStatement": null
        }))
        .unwrap();
        assert_eq!(inputs.len(), 2);
        assert_eq!(inputs[0].name(), "WHAT");
        assert_eq!(inputs[0].fields()[0].serialized_value(), "Move");
        assert_eq!(inputs[1].fields()[0].serialized_value(), "to");
    }

    #[test]
    fn trailing_fields_form_dummy_input() {
        let inputs = inputs_of(json!({
            "type": "t",
            "message0": "set %1 to %2 please",
            "args0": [
                {"type": "field_variable", "name": "VAR"},
                {"type": "field_input", "name": "TEXT", "text": "x"}
            ],
            "lastDummyAlign0": "RIGHT"
        }))
        .unwrap();
        assert_eq!(inputs.len(), 1);
        assert_eq!(inputs[0].input_type(), InputType::Dummy);
        assert_eq!(inputs[0].align(), Alignment::Right);
        let types: Vec<FieldType> = inputs[0].fields().iter().map(Field::field_type).collect();
        assert_eq!(
            types,
            vec![FieldType::Label, FieldType::Variable, FieldType::Label, FieldType::Input, FieldType::Label]
        );
    }

    #[test]
    fn argument_index_errors() {
        let out_of_range = inputs_of(json!({"type": "t", "message0": "%2", "args0": [{"type": "input_dummy"}]}));
        assert!(matches!(out_of_range, Err(BlockLoadError::MessageArgument { .. })));
        let twice = inputs_of(json!({"type": "t", "message0": "%1 %1", "args0": [{"type": "input_dummy"}]}));
        assert!(matches!(twice, Err(BlockLoadError::MessageArgument { .. })));
        let unused = inputs_of(json!({"type": "t", "message0": "%1", "args0": [{"type": "input_dummy"}, {"type": "input_dummy"}]}));
        assert!(matches!(unused, Err(BlockLoadError::MessageArgument { .. })));
        let zero = inputs_of(json!({"type": "t", "message0": "%0", "args0": []}));
        assert!(matches!(zero, Err(BlockLoadError::MessageArgument { .. })));
    }

    #[test]
    fn unknown_field_uses_alt() {
        let inputs = inputs_of(json!({
            "type": "t",
            "message0": "%1",
            "args0": [{"type": "field_slider", "name": "S", "alt": {"type": "field_number", "name": "S", "value": 5}}]
        }))
        .unwrap();
        assert_eq!(inputs[0].fields()[0].field_type(), FieldType::Number);
        let missing = inputs_of(json!({"type": "t", "message0": "%1", "args0": [{"type": "field_slider", "name": "S"}]}));
        assert!(matches!(missing, Err(BlockLoadError::UnknownFieldType { .. })));
    }

    #[test]
    fn output_and_previous_conflict() {
        let err = BlockDefinition::from_json(&json!({"type": "t", "output": null, "previousStatement": null}));
        assert!(matches!(err, Err(BlockLoadError::Definition { .. })));
    }

    #[test]
    fn parses_colours_and_flags() {
        let def = BlockDefinition::from_json(&json!({
            "type": "t", "colour": "#102030", "inputsInline": true, "mutator": "m", "extensions": ["e1"], "output": "Number"
        }))
        .unwrap();
        assert_eq!(def.color(), Color::rgb(0x10, 0x20, 0x30));
        assert_eq!(def.inputs_inline(), Some(true));
        assert_eq!(def.mutator(), Some("m"));
        assert_eq!(def.extensions(), &["e1".to_string()]);
        let hue = BlockDefinition::from_json(&json!({"type": "t", "colour": "210"})).unwrap();
        assert_eq!(hue.color(), Color::from_hue(210.0));
    }

    #[test]
    fn duplicate_input_names_rejected() {
        let err = inputs_of(json!({
            "type": "t",
            "message0": "%1",
            "args0": [{"type": "input_value", "name": "A"}],
            "message1": "%1",
            "args1": [{"type": "input_statement", "name": "a"}]
        }));
        assert!(matches!(err, Err(BlockLoadError::Definition { .. })));
    }

    #[test]
    fn builds_block_with_connections() {
        let def = BlockDefinition::from_json(&json!({
            "type": "math_number",
            "message0": "%1",
            "args0": [{"type": "field_number", "name": "NUM", "value": 0}],
            "output": "Number"
        }))
        .unwrap();
        let block = def.build_block(BlockId::from("n"), &DropdownOptionsRegistry::new()).unwrap();
        assert_eq!(block.output_connection().unwrap().checks(), Some(&["Number".to_string()][..]));
        assert!(block.previous_connection().is_none());
        assert_eq!(block.field("NUM").unwrap().serialized_value(), "0");
    }
}
