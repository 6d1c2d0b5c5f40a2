//! # Change events
//!
//! Immutable records of structural and value changes, with the JSON wire
//! format used for network sync and undo. The workspace id is kept in memory
//! but never serialized.
//!
//! Events are queued by the [`BlockGraph`](crate::BlockGraph) at the moment of
//! mutation and carry `group_id = None` until a flush stamps the batch.

use crate::block::{BlockId, WorkspacePoint};
use crate::error::BlockLoadError;
use crate::graph::BlockGraph;
use crate::observer::{ObserverId, ObserverList};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    Create,
    Delete,
    Move,
    Change,
    Ui,
}

impl EventType {
    /// Bit of this type in an event type mask.
    pub fn mask(self) -> u32 {
        match self {
            EventType::Create => 1 << 0,
            EventType::Delete => 1 << 1,
            EventType::Move => 1 << 2,
            EventType::Change => 1 << 3,
            EventType::Ui => 1 << 4,
        }
    }

    pub const ALL_MASK: u32 = 0b1_1111;
}

/// Which property a change event describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeElement {
    Field,
    Comment,
    Collapsed,
    Disabled,
    Inline,
    Mutate,
    Editable,
    Movable,
    Deletable,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum UiElement {
    Selected,
    Click,
    Category,
    CommentOpen,
    MutatorOpen,
    WarningOpen,
}

/// Type-specific content of an event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum EventPayload {
    /// A block subtree was added to the workspace.
    Create { xml: String, ids: Vec<String> },
    /// A block subtree was removed from the workspace.
    Delete { xml: String, ids: Vec<String> },
    #[serde(rename_all = "camelCase")]
    Move {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_parent_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_input_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none", with = "coordinate")]
        old_coordinate: Option<WorkspacePoint>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_parent_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_input_name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none", with = "coordinate")]
        new_coordinate: Option<WorkspacePoint>,
    },
    #[serde(rename_all = "camelCase")]
    Change {
        element: ChangeElement,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_value: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_value: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    Ui {
        element: UiElement,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_value: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        new_value: Option<String>,
    },
}

/// Coordinates travel as `"x,y"` strings.
mod coordinate {
    use crate::block::WorkspacePoint;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(point: &Option<WorkspacePoint>, serializer: S) -> Result<S::Ok, S::Error> {
        match point {
            Some(point) => serializer.serialize_str(&point.to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<WorkspacePoint>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            Some(text) => text.parse().map(Some).map_err(serde::de::Error::custom),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlocklyEvent {
    #[serde(skip)]
    workspace_id: String,
    #[serde(rename = "groupId", default, skip_serializing_if = "Option::is_none")]
    group_id: Option<String>,
    #[serde(rename = "blockId", default, skip_serializing_if = "Option::is_none")]
    block_id: Option<String>,
    #[serde(flatten)]
    payload: EventPayload,
}

impl BlocklyEvent {
    pub fn new(workspace_id: &str, block_id: Option<&BlockId>, payload: EventPayload) -> Self {
        BlocklyEvent {
            workspace_id: workspace_id.to_string(),
            group_id: None,
            block_id: block_id.map(|id| id.to_string()),
            payload,
        }
    }

    pub fn create(workspace_id: &str, block_id: &BlockId, xml: String, ids: Vec<String>) -> Self {
        Self::new(workspace_id, Some(block_id), EventPayload::Create { xml, ids })
    }

    pub fn delete(workspace_id: &str, block_id: &BlockId, xml: String, ids: Vec<String>) -> Self {
        Self::new(workspace_id, Some(block_id), EventPayload::Delete { xml, ids })
    }

    pub fn change(
        workspace_id: &str,
        block_id: &BlockId,
        element: ChangeElement,
        name: Option<&str>,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> Self {
        Self::new(
            workspace_id,
            Some(block_id),
            EventPayload::Change {
                element,
                name: name.map(str::to_string),
                old_value,
                new_value,
            },
        )
    }

    pub fn ui(
        workspace_id: &str,
        block_id: Option<&BlockId>,
        element: UiElement,
        old_value: Option<String>,
        new_value: Option<String>,
    ) -> Self {
        Self::new(workspace_id, block_id, EventPayload::Ui { element, old_value, new_value })
    }

    pub fn event_type(&self) -> EventType {
        match self.payload {
            EventPayload::Create { .. } => EventType::Create,
            EventPayload::Delete { .. } => EventType::Delete,
            EventPayload::Move { .. } => EventType::Move,
            EventPayload::Change { .. } => EventType::Change,
            EventPayload::Ui { .. } => EventType::Ui,
        }
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn group_id(&self) -> Option<&str> {
        self.group_id.as_deref()
    }

    pub fn block_id(&self) -> Option<&str> {
        self.block_id.as_deref()
    }

    pub fn payload(&self) -> &EventPayload {
        &self.payload
    }

    /// Sets the group id unless the event is already grouped.
    pub fn stamp_group(&mut self, group_id: &str) {
        if self.group_id.is_none() {
            self.group_id = Some(group_id.to_string());
        }
    }

    pub fn to_json(&self) -> Result<String, BlockLoadError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parses one event from its wire form, attaching it to `workspace_id`.
    pub fn from_json(workspace_id: &str, json: &str) -> Result<Self, BlockLoadError> {
        let mut event: BlocklyEvent = serde_json::from_str(json)?;
        event.workspace_id = workspace_id.to_string();
        event.validate()?;
        Ok(event)
    }

    fn validate(&self) -> Result<(), BlockLoadError> {
        let needs_block = !matches!(self.payload, EventPayload::Ui { .. });
        if needs_block && self.block_id.as_deref().map(str::is_empty).unwrap_or(true) {
            return Err(BlockLoadError::Event(format!("{:?} event requires a blockId", self.event_type())));
        }
        match &self.payload {
            EventPayload::Create { ids, .. } | EventPayload::Delete { ids, .. } if ids.is_empty() => {
                Err(BlockLoadError::Event("create and delete events require ids".to_string()))
            }
            EventPayload::Change {
                element: ChangeElement::Field,
                name: None,
                ..
            } => Err(BlockLoadError::Event("field change event requires a name".to_string())),
            _ => Ok(()),
        }
    }
}

/// Serializes a batch as a JSON array.
pub fn events_to_json(events: &[BlocklyEvent]) -> Result<String, BlockLoadError> {
    Ok(serde_json::to_string(events)?)
}

/// Parses a JSON array of events, attaching each to `workspace_id`.
pub fn events_from_json(workspace_id: &str, json: &str) -> Result<Vec<BlocklyEvent>, BlockLoadError> {
    let mut events: Vec<BlocklyEvent> = serde_json::from_str(json)?;
    for event in &mut events {
        event.workspace_id = workspace_id.to_string();
        event.validate()?;
    }
    Ok(events)
}

/// First half of a move event, captured before the block moves.
///
/// The event only exists once [`PendingMove::record_new`] has captured the
/// destination, so an incomplete move can never be queued.
#[derive(Debug, Clone, PartialEq)]
#[must_use = "a pending move must be completed with record_new"]
pub struct PendingMove {
    workspace_id: String,
    block_id: BlockId,
    old_parent_id: Option<String>,
    old_input_name: Option<String>,
    old_coordinate: Option<WorkspacePoint>,
}

impl PendingMove {
    /// Captures the current parent, input and position of `block`.
    pub fn capture(graph: &BlockGraph, workspace_id: &str, block: &BlockId) -> Self {
        let (old_parent_id, old_input_name, old_coordinate) = graph.location_of(block);
        PendingMove {
            workspace_id: workspace_id.to_string(),
            block_id: block.clone(),
            old_parent_id,
            old_input_name,
            old_coordinate,
        }
    }

    pub fn block_id(&self) -> &BlockId {
        &self.block_id
    }

    /// Captures the new location and produces the complete event.
    pub fn record_new(self, graph: &BlockGraph) -> BlocklyEvent {
        let (new_parent_id, new_input_name, new_coordinate) = graph.location_of(&self.block_id);
        BlocklyEvent::new(
            &self.workspace_id,
            Some(&self.block_id),
            EventPayload::Move {
                old_parent_id: self.old_parent_id,
                old_input_name: self.old_input_name,
                old_coordinate: self.old_coordinate,
                new_parent_id,
                new_input_name,
                new_coordinate,
            },
        )
    }
}

/// Receives flushed batches of events.
pub trait EventListener: Send + Sync {
    /// Types this listener wants, as a mask of [`EventType::mask`] bits.
    fn event_type_mask(&self) -> u32 {
        EventType::ALL_MASK
    }

    fn on_events(&self, events: &[BlocklyEvent]);
}

/// Pending events plus reentrant grouping state.
#[derive(Debug, Default)]
pub struct EventQueue {
    pending: Vec<BlocklyEvent>,
    group_depth: usize,
    group_single_events: bool,
    listeners: ObserverList<dyn EventListener>,
}

impl EventQueue {
    pub fn new(group_single_events: bool) -> Self {
        EventQueue {
            group_single_events,
            ..Default::default()
        }
    }

    pub fn push(&mut self, event: BlocklyEvent) {
        tracing::trace!("[EVENTS] queued {:?} for {:?}", event.event_type(), event.block_id());
        self.pending.push(event);
    }

    pub fn pending(&self) -> &[BlocklyEvent] {
        &self.pending
    }

    pub fn is_grouping(&self) -> bool {
        self.group_depth > 0
    }

    pub fn add_listener(&mut self, listener: Arc<dyn EventListener>) -> ObserverId {
        self.listeners.register(listener)
    }

    pub fn remove_listener(&mut self, id: ObserverId) -> bool {
        self.listeners.unregister(id)
    }

    pub(crate) fn begin_group(&mut self) {
        self.group_depth += 1;
    }

    /// Returns true when the outermost group just ended.
    pub(crate) fn end_group(&mut self) -> bool {
        self.group_depth = self.group_depth.saturating_sub(1);
        self.group_depth == 0
    }

    /// Stamps and delivers the pending batch.
    ///
    /// Inside a group this does nothing; the outermost group delivers. A
    /// batch of one event is only stamped when `force_group` is set or
    /// single-event grouping is configured.
    pub fn flush(&mut self, force_group: bool) -> Vec<BlocklyEvent> {
        if self.is_grouping() || self.pending.is_empty() {
            return Vec::new();
        }
        let mut batch = std::mem::take(&mut self.pending);
        if force_group || self.group_single_events || batch.len() > 1 {
            let group_id = uuid::Uuid::new_v4().to_string();
            for event in &mut batch {
                event.stamp_group(&group_id);
            }
        }
        tracing::debug!("[EVENTS] flushing {} event(s)", batch.len());
        for listener in self.listeners.snapshot() {
            let mask = listener.event_type_mask();
            let wanted: Vec<BlocklyEvent> = batch
                .iter()
                .filter(|e| e.event_type().mask() & mask != 0)
                .cloned()
                .collect();
            if !wanted.is_empty() {
                listener.on_events(&wanted);
            }
        }
        batch
    }
}
