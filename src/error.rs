//! # Errors
//!
//! Three kinds of failure exist in the block model:
//!
//! - [`ConnectionError`] - a connection refused a link, with the exact reason.
//! - [`StructureError`] - a caller broke a structural contract (fail fast).
//! - [`BlockLoadError`] - data coming from JSON or XML could not be loaded.

use crate::connection::ConnectionType;
use thiserror::Error;

/// Why two connections could not be linked.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConnectionError {
    #[error("cannot connect a block to itself")]
    SelfConnection,

    #[error("cannot connect {from:?} to {to:?}")]
    WrongType { from: ConnectionType, to: ConnectionType },

    #[error("connection is already connected; disconnect it first")]
    AlreadyConnected,

    #[error("target connection does not exist")]
    TargetNull,

    #[error("connection checks {ours:?} and {theirs:?} do not intersect")]
    ChecksFailed {
        ours: Option<Vec<String>>,
        theirs: Option<Vec<String>>,
    },
}

/// Structural contract violations.
///
/// These are raised before any state is touched, so the graph is unchanged
/// when one is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StructureError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("block not found: {0}")]
    BlockNotFound(String),

    #[error("input '{input}' not found on block {block}")]
    InputNotFound { block: String, input: String },

    #[error("field '{field}' not found on block {block}")]
    FieldNotFound { block: String, field: String },

    #[error("block {block} has no {slot} connection")]
    MissingConnection { block: String, slot: String },

    #[error("a block cannot have both an output and a previous connection")]
    OutputAndPrevious,

    #[error("{role} connection has type {found:?}")]
    ConnectionRole { role: &'static str, found: ConnectionType },

    #[error("input '{0}' is still connected to a child block")]
    InputStillConnected(String),

    #[error("input '{0}' is already connected; new inputs must be unattached")]
    InputAlreadyConnected(String),

    #[error("duplicate input name '{0}'")]
    DuplicateInput(String),

    #[error("connection '{0}' must be unattached")]
    ConnectionAlreadyConnected(String),

    #[error("a mutator is already attached to block {0}")]
    MutatorAlreadyAttached(String),

    #[error("illegal shadow state: {0}")]
    IllegalShadowState(String),

    #[error("block {0} is not a root block")]
    NotRoot(String),

    #[error("connecting {child} below {parent} would create a cycle")]
    Cycle { parent: String, child: String },

    #[error("event workspace id may only be set from the thread that owns the graph")]
    WrongThread,

    #[error("invalid value '{value}' for field '{field}': {reason}")]
    InvalidFieldValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("mutation update failed: {0}")]
    Mutation(String),
}

/// Load-time data errors from definitions, block XML or event JSON.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BlockLoadError {
    #[error("malformed JSON: {0}")]
    Json(String),

    #[error("malformed XML at line {line}: {message}")]
    Xml { line: usize, message: String },

    #[error("unknown block type: {0}")]
    UnknownBlockType(String),

    #[error("block type '{block_type}': {message}")]
    Definition { block_type: String, message: String },

    #[error("block type '{block_type}': unknown field type '{field_type}'")]
    UnknownFieldType { block_type: String, field_type: String },

    #[error("block type '{block_type}': {message}")]
    MessageArgument { block_type: String, message: String },

    #[error("<{tag}> (block type {block_type:?}): {message}")]
    Element {
        tag: String,
        block_type: Option<String>,
        message: String,
    },

    #[error("block id '{0}' is already in use by a live block")]
    DuplicateId(String),

    #[error("shadow block '{0}' cannot contain a variable field")]
    ShadowWithVariable(String),

    #[error("unknown extension '{extension}' on block type '{block_type}'")]
    UnknownExtension { block_type: String, extension: String },

    #[error("unknown mutator '{mutator}' on block type '{block_type}'")]
    UnknownMutator { block_type: String, mutator: String },

    #[error("invalid event: {0}")]
    Event(String),

    #[error("<{tag}>: {source}")]
    Structure {
        tag: String,
        #[source]
        source: StructureError,
    },
}

impl BlockLoadError {
    pub(crate) fn element(
        tag: impl Into<String>,
        block_type: Option<&str>,
        message: impl Into<String>,
    ) -> Self {
        BlockLoadError::Element {
            tag: tag.into(),
            block_type: block_type.map(str::to_string),
            message: message.into(),
        }
    }

    pub(crate) fn definition(block_type: &str, message: impl Into<String>) -> Self {
        BlockLoadError::Definition {
            block_type: block_type.to_string(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for BlockLoadError {
    fn from(err: serde_json::Error) -> Self {
        BlockLoadError::Json(format!("{} (line {}, column {})", err, err.line(), err.column()))
    }
}

pub type Result<T, E = StructureError> = std::result::Result<T, E>;
