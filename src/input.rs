//! # Inputs
//!
//! Named slots on a block. Value and statement inputs own one connection;
//! dummy inputs only carry fields.

use crate::block::BlockId;
use crate::connection::{Connection, ConnectionType};
use crate::error::BlockLoadError;
use crate::field::Field;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InputType {
    Value,
    Statement,
    Dummy,
}

impl InputType {
    pub fn from_json_name(name: &str) -> Option<InputType> {
        match name {
            "input_value" => Some(InputType::Value),
            "input_statement" => Some(InputType::Statement),
            "input_dummy" => Some(InputType::Dummy),
            _ => None,
        }
    }

    /// XML element used for a connected child of this input.
    pub fn xml_tag(&self) -> Option<&'static str> {
        match self {
            InputType::Value => Some("value"),
            InputType::Statement => Some("statement"),
            InputType::Dummy => None,
        }
    }

    fn connection_type(&self) -> Option<ConnectionType> {
        match self {
            InputType::Value => Some(ConnectionType::Input),
            InputType::Statement => Some(ConnectionType::Next),
            InputType::Dummy => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Alignment {
    #[default]
    Left,
    Centre,
    Right,
}

impl Alignment {
    pub fn from_json_name(name: &str) -> Option<Alignment> {
        match name.to_ascii_uppercase().as_str() {
            "LEFT" => Some(Alignment::Left),
            "CENTRE" | "CENTER" => Some(Alignment::Centre),
            "RIGHT" => Some(Alignment::Right),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Input {
    name: String,
    input_type: InputType,
    align: Alignment,
    fields: Vec<Field>,
    connection: Option<Connection>,
}

impl Input {
    pub fn new(name: &str, input_type: InputType, checks: Option<Vec<String>>) -> Input {
        let connection = input_type
            .connection_type()
            .map(|kind| Connection::new(kind, checks));
        Input {
            name: name.to_string(),
            input_type,
            align: Alignment::Left,
            fields: Vec::new(),
            connection,
        }
    }

    pub fn value(name: &str, checks: Option<Vec<String>>) -> Input {
        Input::new(name, InputType::Value, checks)
    }

    pub fn statement(name: &str, checks: Option<Vec<String>>) -> Input {
        Input::new(name, InputType::Statement, checks)
    }

    pub fn dummy(name: &str) -> Input {
        Input::new(name, InputType::Dummy, None)
    }

    pub fn with_field(mut self, field: Field) -> Input {
        self.fields.push(field);
        self
    }

    pub fn with_align(mut self, align: Alignment) -> Input {
        self.align = align;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn input_type(&self) -> InputType {
        self.input_type
    }

    pub fn align(&self) -> Alignment {
        self.align
    }

    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.name() == Some(name))
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.connection.as_ref()
    }

    /// The block linked to this input's connection, live or shadow.
    pub fn connected_block(&self) -> Option<&BlockId> {
        self.connection.as_ref().and_then(Connection::target_block)
    }

    pub fn shadow_block(&self) -> Option<&BlockId> {
        self.connection.as_ref().and_then(Connection::shadow_block)
    }

    /// True while any child (live or shadow) hangs off this input.
    pub fn has_children(&self) -> bool {
        self.connection
            .as_ref()
            .map(|c| c.target().is_some() || c.shadow_target().is_some())
            .unwrap_or(false)
    }

    /// Copy with the same name, type, fields and checks, but no links.
    pub fn clone_detached(&self) -> Input {
        Input {
            name: self.name.clone(),
            input_type: self.input_type,
            align: self.align,
            fields: self.fields.clone(),
            connection: self.connection.as_ref().map(Connection::clone_detached),
        }
    }

    pub(crate) fn fields_mut(&mut self) -> &mut Vec<Field> {
        &mut self.fields
    }

    pub(crate) fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.fields.iter_mut().find(|f| f.name() == Some(name))
    }

    pub(crate) fn connection_mut(&mut self) -> Option<&mut Connection> {
        self.connection.as_mut()
    }

    pub(crate) fn attach(&mut self, block: &BlockId) {
        let name = self.name.clone();
        if let Some(connection) = self.connection.as_mut() {
            connection.attach(block, Some(&name));
        }
    }

    /// Builds an input from a definition argument such as
    /// `{"type": "input_value", "name": "VALUE", "check": "Number"}`.
    pub fn from_json(json: &Value, block_type: &str) -> Result<Input, BlockLoadError> {
        let type_name = json.get("type").and_then(Value::as_str).unwrap_or_default();
        let input_type = InputType::from_json_name(type_name).ok_or_else(|| {
            BlockLoadError::definition(block_type, format!("'{}' is not an input type", type_name))
        })?;
        let name = json.get("name").and_then(Value::as_str).unwrap_or_default();
        if name.is_empty() && input_type != InputType::Dummy {
            return Err(BlockLoadError::definition(block_type, format!("{} requires a name", type_name)));
        }
        let checks = parse_checks(json.get("check"), block_type)?;
        let align = match json.get("align").and_then(Value::as_str) {
            Some(align) => Alignment::from_json_name(align).ok_or_else(|| {
                BlockLoadError::definition(block_type, format!("unknown alignment '{}'", align))
            })?,
            None => Alignment::Left,
        };
        Ok(Input::new(name, input_type, checks).with_align(align))
    }
}

/// Parses a `check` value: absent or `null` means any, otherwise a string
/// or an array of strings.
pub(crate) fn parse_checks(json: Option<&Value>, block_type: &str) -> Result<Option<Vec<String>>, BlockLoadError> {
    match json {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(check)) => Ok(Some(vec![check.clone()])),
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| BlockLoadError::definition(block_type, "connection checks must be strings"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(other) => Err(BlockLoadError::definition(
            block_type,
            format!("invalid connection check {}", other),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dummy_inputs_have_no_connection() {
        let input = Input::dummy("");
        assert!(input.connection().is_none());
        assert!(!input.has_children());
        assert_eq!(input.input_type().xml_tag(), None);
    }

    #[test]
    fn statement_inputs_use_next_connections() {
        let input = Input::statement("DO", None);
        assert_eq!(input.connection().unwrap().connection_type(), ConnectionType::Next);
        let value = Input::value("X", None);
        assert_eq!(value.connection().unwrap().connection_type(), ConnectionType::Input);
    }

    #[test]
    fn parses_definition_argument() {
        let input = Input::from_json(
            &json!({"type": "input_value", "name": "A", "check": ["Number", "String"], "align": "RIGHT"}),
            "t",
        )
        .unwrap();
        assert_eq!(input.name(), "A");
        assert_eq!(input.align(), Alignment::Right);
        assert_eq!(input.connection().unwrap().checks().unwrap().len(), 2);
    }

    #[test]
    fn value_input_requires_name() {
        assert!(Input::from_json(&json!({"type": "input_value"}), "t").is_err());
        assert!(Input::from_json(&json!({"type": "input_dummy"}), "t").is_ok());
    }

    #[test]
    fn attach_sets_owner_and_input_name() {
        let mut input = Input::value("X", None);
        input.attach(&BlockId::from("b1"));
        let connection = input.connection().unwrap();
        assert_eq!(connection.block(), Some(&BlockId::from("b1")));
        assert_eq!(connection.input_name(), Some("X"));
    }
}
