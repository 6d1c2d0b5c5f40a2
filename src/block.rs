//! # Blocks
//!
//! A [`Block`] is one node of the program graph: identity, type, shape
//! (inputs plus up to three connections), presentation flags and an optional
//! [`Mutator`]. Blocks live inside a [`BlockGraph`](crate::BlockGraph), which
//! performs every mutation so that events and observers stay consistent.

use crate::color::Color;
use crate::connection::{Connection, ConnectionSlot, ConnectionType};
use crate::error::StructureError;
use crate::field::{Field, FieldType};
use crate::graph::BlockGraph;
use crate::input::{Input, InputType};
use crate::mutator::Mutator;
use crate::observer::ObserverList;
use parking_lot::Mutex;
use serde_json::Value;
use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Globally unique block identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(String);

impl BlockId {
    pub fn new(id: impl Into<String>) -> Self {
        BlockId(id.into())
    }

    /// A fresh random id.
    pub fn generate() -> Self {
        BlockId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BlockId {
    fn from(id: &str) -> Self {
        BlockId(id.to_string())
    }
}

impl From<String> for BlockId {
    fn from(id: String) -> Self {
        BlockId(id)
    }
}

impl From<&BlockId> for BlockId {
    fn from(id: &BlockId) -> Self {
        id.clone()
    }
}

impl Borrow<str> for BlockId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Ids of the live blocks minted by one factory, across every graph it
/// mints into. Clones share the same set.
#[derive(Debug, Clone, Default)]
pub(crate) struct LiveIds(Arc<Mutex<HashSet<BlockId>>>);

impl LiveIds {
    pub(crate) fn contains(&self, id: &BlockId) -> bool {
        self.0.lock().contains(id)
    }

    /// Returns false if the id is already live.
    pub(crate) fn claim(&self, id: &BlockId) -> bool {
        self.0.lock().insert(id.clone())
    }

    pub(crate) fn release(&self, id: &BlockId) {
        self.0.lock().remove(id);
    }

    pub(crate) fn len(&self) -> usize {
        self.0.lock().len()
    }

    pub(crate) fn same_registry(&self, other: &LiveIds) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

/// Position of a root block in workspace coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct WorkspacePoint {
    pub x: f64,
    pub y: f64,
}

impl WorkspacePoint {
    pub fn new(x: f64, y: f64) -> Self {
        WorkspacePoint { x, y }
    }
}

impl fmt::Display for WorkspacePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{},{}", self.x, self.y)
    }
}

impl FromStr for WorkspacePoint {
    type Err = String;

    /// Parses `"x,y"`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (x, y) = s
            .split_once(',')
            .ok_or_else(|| format!("coordinate '{}' is not of the form x,y", s))?;
        let parse = |v: &str| {
            v.trim()
                .parse::<f64>()
                .map_err(|e| format!("coordinate '{}': {}", s, e))
        };
        Ok(WorkspacePoint::new(parse(x)?, parse(y)?))
    }
}

/// What changed on a block, delivered to [`BlockObserver`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockUpdate {
    Comment,
    IsDisabled,
    IsCollapsed,
    InputsInline,
    IsEditable,
    IsMovable,
    IsDeletable,
    IsShadow,
    Shape,
    Mutation,
    FieldValue,
    Position,
}

/// Structural observer of a single block.
///
/// Called after the change is applied and after the matching event has been
/// queued, so `graph.pending_events()` already contains it.
pub trait BlockObserver: Send + Sync {
    fn on_block_updated(&self, graph: &BlockGraph, block: &BlockId, update: BlockUpdate);
}

/// One input of a new shape for [`BlockGraph::reshape`](crate::BlockGraph::reshape).
#[derive(Debug)]
pub enum ShapeInput {
    /// Keep the block's current input of this name, with its attachments.
    Existing(String),
    /// A new, unattached input.
    Fresh(Input),
}

/// One of the output/previous/next connections of a new shape.
#[derive(Debug)]
pub enum ShapeConnection {
    /// Keep the block's current connection in this role.
    Existing,
    /// A new, unattached connection.
    Fresh(Connection),
}

/// Complete description of a block's shape.
#[derive(Debug, Default)]
pub struct Shape {
    pub inputs: Vec<ShapeInput>,
    pub output: Option<ShapeConnection>,
    pub previous: Option<ShapeConnection>,
    pub next: Option<ShapeConnection>,
}

#[derive(Debug)]
pub struct Block {
    pub(crate) id: BlockId,
    pub(crate) block_type: String,
    pub(crate) is_shadow: bool,
    pub(crate) color: Color,
    pub(crate) style: Option<Arc<Value>>,
    pub(crate) tooltip: Option<String>,
    pub(crate) help_url: Option<String>,
    pub(crate) output: Option<Connection>,
    pub(crate) previous: Option<Connection>,
    pub(crate) next: Option<Connection>,
    pub(crate) inputs: Vec<Input>,
    pub(crate) comment: Option<String>,
    pub(crate) disabled: bool,
    pub(crate) collapsed: bool,
    pub(crate) editable: bool,
    pub(crate) movable: bool,
    pub(crate) deletable: bool,
    pub(crate) inputs_inline: bool,
    pub(crate) inputs_inline_modified: bool,
    pub(crate) position: WorkspacePoint,
    pub(crate) mutator: Option<Box<dyn Mutator>>,
    pub(crate) mutator_id: Option<String>,
    pub(crate) mutation: Option<String>,
    pub(crate) event_workspace_id: Option<String>,
    pub(crate) observers: ObserverList<dyn BlockObserver>,
}

impl Block {
    /// A block with no inputs or connections. Shapes are applied with
    /// [`Block::apply_shape`] right after construction.
    pub(crate) fn new(id: BlockId, block_type: &str, color: Color) -> Block {
        Block {
            id,
            block_type: block_type.to_string(),
            is_shadow: false,
            color,
            style: None,
            tooltip: None,
            help_url: None,
            output: None,
            previous: None,
            next: None,
            inputs: Vec::new(),
            comment: None,
            disabled: false,
            collapsed: false,
            editable: true,
            movable: true,
            deletable: true,
            inputs_inline: false,
            inputs_inline_modified: false,
            position: WorkspacePoint::default(),
            mutator: None,
            mutator_id: None,
            mutation: None,
            event_workspace_id: None,
            observers: ObserverList::new(),
        }
    }

    pub fn id(&self) -> &BlockId {
        &self.id
    }

    pub fn block_type(&self) -> &str {
        &self.block_type
    }

    pub fn is_shadow(&self) -> bool {
        self.is_shadow
    }

    pub fn color(&self) -> Color {
        self.color
    }

    pub fn style(&self) -> Option<&Arc<Value>> {
        self.style.as_ref()
    }

    pub fn tooltip(&self) -> Option<&str> {
        self.tooltip.as_deref()
    }

    pub fn help_url(&self) -> Option<&str> {
        self.help_url.as_deref()
    }

    pub fn output_connection(&self) -> Option<&Connection> {
        self.output.as_ref()
    }

    pub fn previous_connection(&self) -> Option<&Connection> {
        self.previous.as_ref()
    }

    pub fn next_connection(&self) -> Option<&Connection> {
        self.next.as_ref()
    }

    pub fn inputs(&self) -> &[Input] {
        &self.inputs
    }

    /// Input names are unique ignoring ASCII case.
    pub fn input(&self, name: &str) -> Option<&Input> {
        self.inputs
            .iter()
            .find(|i| i.name() == name)
            .or_else(|| self.inputs.iter().find(|i| i.name().eq_ignore_ascii_case(name)))
    }

    pub fn field(&self, name: &str) -> Option<&Field> {
        self.inputs.iter().find_map(|i| i.field(name))
    }

    /// The connection in `slot`, if the block has one there.
    pub fn connection(&self, slot: &ConnectionSlot) -> Option<&Connection> {
        match slot {
            ConnectionSlot::Output => self.output.as_ref(),
            ConnectionSlot::Previous => self.previous.as_ref(),
            ConnectionSlot::Next => self.next.as_ref(),
            ConnectionSlot::Input(name) => self.input(name).and_then(Input::connection),
        }
    }

    pub(crate) fn connection_mut(&mut self, slot: &ConnectionSlot) -> Option<&mut Connection> {
        match slot {
            ConnectionSlot::Output => self.output.as_mut(),
            ConnectionSlot::Previous => self.previous.as_mut(),
            ConnectionSlot::Next => self.next.as_mut(),
            ConnectionSlot::Input(name) => {
                let index = self.input_index(name)?;
                self.inputs[index].connection_mut()
            }
        }
    }

    pub(crate) fn input_index(&self, name: &str) -> Option<usize> {
        self.inputs
            .iter()
            .position(|i| i.name() == name)
            .or_else(|| self.inputs.iter().position(|i| i.name().eq_ignore_ascii_case(name)))
    }

    pub(crate) fn field_mut(&mut self, name: &str) -> Option<&mut Field> {
        self.inputs.iter_mut().find_map(|i| i.field_mut(name))
    }

    /// Every connection of the block in order: output, previous, inputs, next.
    pub fn all_connections(&self) -> Vec<(ConnectionSlot, &Connection)> {
        let mut all = Vec::new();
        if let Some(c) = &self.output {
            all.push((ConnectionSlot::Output, c));
        }
        if let Some(c) = &self.previous {
            all.push((ConnectionSlot::Previous, c));
        }
        for input in &self.inputs {
            if let Some(c) = input.connection() {
                all.push((ConnectionSlot::Input(input.name().to_string()), c));
            }
        }
        if let Some(c) = &self.next {
            all.push((ConnectionSlot::Next, c));
        }
        all
    }

    /// The connection linking this block to its parent, if any.
    pub fn upward_connection(&self) -> Option<(ConnectionSlot, &Connection)> {
        self.output
            .as_ref()
            .map(|c| (ConnectionSlot::Output, c))
            .or_else(|| self.previous.as_ref().map(|c| (ConnectionSlot::Previous, c)))
    }

    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn is_collapsed(&self) -> bool {
        self.collapsed
    }

    pub fn is_editable(&self) -> bool {
        self.editable
    }

    pub fn is_movable(&self) -> bool {
        self.movable
    }

    pub fn is_deletable(&self) -> bool {
        self.deletable
    }

    pub fn inputs_inline(&self) -> bool {
        self.inputs_inline
    }

    /// True once `inputs_inline` has been set explicitly, even to its default.
    pub fn inputs_inline_modified(&self) -> bool {
        self.inputs_inline_modified
    }

    pub fn position(&self) -> WorkspacePoint {
        self.position
    }

    pub fn has_mutator(&self) -> bool {
        self.mutator.is_some()
    }

    pub fn mutator_id(&self) -> Option<&str> {
        self.mutator_id.as_deref()
    }

    /// The serialized mutator state, as produced by the mutator.
    pub fn mutation(&self) -> Option<String> {
        match &self.mutator {
            Some(mutator) => Some(mutator.serialize(self)),
            None => self.mutation.clone(),
        }
    }

    pub fn event_workspace_id(&self) -> Option<&str> {
        self.event_workspace_id.as_deref()
    }

    pub fn contains_variable_field(&self) -> bool {
        self.inputs
            .iter()
            .flat_map(|i| i.fields())
            .any(|f| f.field_type() == FieldType::Variable)
    }

    /// The single value input, if the block has exactly one.
    pub fn only_value_input(&self) -> Option<&Input> {
        let mut values = self.inputs.iter().filter(|i| i.input_type() == InputType::Value);
        match (values.next(), values.next()) {
            (Some(only), None) => Some(only),
            _ => None,
        }
    }

    /// The last value input with no live child, or only its shadow.
    pub fn last_unconnected_input_connection(&self) -> Option<(&str, &Connection)> {
        self.inputs
            .iter()
            .rev()
            .filter(|i| i.input_type() == InputType::Value)
            .filter_map(|i| i.connection().map(|c| (i.name(), c)))
            .find(|(_, c)| !c.is_connected() || c.is_shadow_live())
    }

    /// The shape the block currently has, keeping everything in place.
    pub fn current_shape(&self) -> Shape {
        Shape {
            inputs: self
                .inputs
                .iter()
                .map(|i| ShapeInput::Existing(i.name().to_string()))
                .collect(),
            output: self.output.as_ref().map(|_| ShapeConnection::Existing),
            previous: self.previous.as_ref().map(|_| ShapeConnection::Existing),
            next: self.next.as_ref().map(|_| ShapeConnection::Existing),
        }
    }

    /// Validates `shape` against the current state without changing anything.
    pub fn validate_shape(&self, shape: &Shape) -> Result<(), StructureError> {
        if shape.output.is_some() && shape.previous.is_some() {
            return Err(StructureError::OutputAndPrevious);
        }
        self.validate_role("output", &shape.output, &self.output, ConnectionType::Output)?;
        self.validate_role("previous", &shape.previous, &self.previous, ConnectionType::Previous)?;
        self.validate_role("next", &shape.next, &self.next, ConnectionType::Next)?;

        let mut seen: HashSet<String> = HashSet::new();
        let mut kept: HashSet<usize> = HashSet::new();
        for entry in &shape.inputs {
            let name = match entry {
                ShapeInput::Existing(name) => {
                    let index = self.input_index(name).ok_or_else(|| StructureError::InputNotFound {
                        block: self.id.to_string(),
                        input: name.clone(),
                    })?;
                    kept.insert(index);
                    self.inputs[index].name().to_string()
                }
                ShapeInput::Fresh(input) => {
                    if input.has_children() {
                        return Err(StructureError::InputAlreadyConnected(input.name().to_string()));
                    }
                    if let Some(owner) = input.connection().and_then(Connection::block) {
                        if owner != &self.id {
                            return Err(StructureError::InputAlreadyConnected(input.name().to_string()));
                        }
                    }
                    input.name().to_string()
                }
            };
            if !name.is_empty() && !seen.insert(name.to_ascii_lowercase()) {
                return Err(StructureError::DuplicateInput(name));
            }
        }

        for (index, input) in self.inputs.iter().enumerate() {
            if !kept.contains(&index) && input.has_children() {
                return Err(StructureError::InputStillConnected(input.name().to_string()));
            }
        }
        Ok(())
    }

    fn validate_role(
        &self,
        role: &'static str,
        wanted: &Option<ShapeConnection>,
        current: &Option<Connection>,
        expected: ConnectionType,
    ) -> Result<(), StructureError> {
        match wanted {
            Some(ShapeConnection::Existing) => {
                if current.is_none() {
                    return Err(StructureError::MissingConnection {
                        block: self.id.to_string(),
                        slot: role.to_string(),
                    });
                }
            }
            Some(ShapeConnection::Fresh(connection)) => {
                if connection.connection_type() != expected {
                    return Err(StructureError::ConnectionRole {
                        role,
                        found: connection.connection_type(),
                    });
                }
                if connection.target().is_some() || connection.shadow_target().is_some() {
                    return Err(StructureError::ConnectionAlreadyConnected(role.to_string()));
                }
                if current
                    .as_ref()
                    .map(|c| c.target().is_some() || c.shadow_target().is_some())
                    .unwrap_or(false)
                {
                    return Err(StructureError::ConnectionAlreadyConnected(role.to_string()));
                }
            }
            None => {
                if let Some(c) = current {
                    if c.target().is_some() || c.shadow_target().is_some() {
                        return Err(StructureError::ConnectionAlreadyConnected(role.to_string()));
                    }
                }
            }
        }
        Ok(())
    }

    /// Applies a shape already accepted by [`Block::validate_shape`].
    pub(crate) fn apply_shape(&mut self, shape: Shape) {
        let mut old: Vec<Option<Input>> = std::mem::take(&mut self.inputs).into_iter().map(Some).collect();
        let mut inputs = Vec::with_capacity(shape.inputs.len());
        for entry in shape.inputs {
            match entry {
                ShapeInput::Existing(name) => {
                    let position = old
                        .iter()
                        .position(|i| matches!(i, Some(i) if i.name() == name))
                        .or_else(|| {
                            old.iter()
                                .position(|i| matches!(i, Some(i) if i.name().eq_ignore_ascii_case(&name)))
                        });
                    if let Some(input) = position.and_then(|p| old[p].take()) {
                        inputs.push(input);
                    }
                }
                ShapeInput::Fresh(mut input) => {
                    input.attach(&self.id);
                    inputs.push(input);
                }
            }
        }
        self.inputs = inputs;

        let id = self.id.clone();
        let resolve = |wanted: Option<ShapeConnection>, current: &mut Option<Connection>| match wanted {
            Some(ShapeConnection::Existing) => {}
            Some(ShapeConnection::Fresh(mut connection)) => {
                connection.attach(&id, None);
                *current = Some(connection);
            }
            None => *current = None,
        };
        resolve(shape.output, &mut self.output);
        resolve(shape.previous, &mut self.previous);
        resolve(shape.next, &mut self.next);
    }

    /// Splits a display template into text runs and `%N` placeholders.
    ///
    /// `%%` is a literal percent sign and a `%` not followed by a digit is
    /// plain text. Text runs are trimmed; whitespace inside them is kept.
    pub fn tokenize_message(message: &str) -> Vec<String> {
        fn flush(text: &mut String, tokens: &mut Vec<String>) {
            let trimmed = text.trim();
            if !trimmed.is_empty() {
                tokens.push(trimmed.to_string());
            }
            text.clear();
        }

        let mut tokens = Vec::new();
        let mut text = String::new();
        let mut chars = message.chars().peekable();
        while let Some(c) = chars.next() {
            if c != '%' {
                text.push(c);
                continue;
            }
            match chars.peek().copied() {
                Some('%') => {
                    chars.next();
                    text.push('%');
                }
                Some(d) if d.is_ascii_digit() => {
                    let mut placeholder = String::from("%");
                    while let Some(d) = chars.peek().copied().filter(char::is_ascii_digit) {
                        placeholder.push(d);
                        chars.next();
                    }
                    flush(&mut text, &mut tokens);
                    tokens.push(placeholder);
                }
                _ => text.push('%'),
            }
        }
        flush(&mut text, &mut tokens);
        tokens
    }
}

/// Placeholder index of a token produced by [`Block::tokenize_message`].
pub(crate) fn placeholder_index(token: &str) -> Option<usize> {
    let digits = token.strip_prefix('%')?;
    if digits.is_empty() || !digits.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    digits.parse().ok()
}
