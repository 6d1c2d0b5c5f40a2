//! # Connections
//!
//! Typed attachment points on a block. A connection never owns what it is
//! linked to: `target` and `shadow_target` are [`ConnectionRef`] handles
//! resolved through the owning [`BlockGraph`](crate::BlockGraph).

use crate::block::BlockId;
use crate::error::ConnectionError;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionType {
    /// Top of a statement block; links to a `Next`.
    Previous,
    /// Bottom of a statement block or a statement input; links to a `Previous`.
    Next,
    /// Value input slot; links to an `Output`.
    Input,
    /// Left edge of a value block; links to an `Input`.
    Output,
}

impl ConnectionType {
    /// The only type this type may link to.
    pub fn opposite(self) -> ConnectionType {
        match self {
            ConnectionType::Previous => ConnectionType::Next,
            ConnectionType::Next => ConnectionType::Previous,
            ConnectionType::Input => ConnectionType::Output,
            ConnectionType::Output => ConnectionType::Input,
        }
    }

    /// Whether this side holds children (and may hold a shadow pointer).
    pub fn is_parent_side(self) -> bool {
        matches!(self, ConnectionType::Next | ConnectionType::Input)
    }
}

/// Where a connection sits on its block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConnectionSlot {
    Output,
    Previous,
    Next,
    /// The connection of the named input.
    Input(String),
}

impl fmt::Display for ConnectionSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionSlot::Output => f.write_str("output"),
            ConnectionSlot::Previous => f.write_str("previous"),
            ConnectionSlot::Next => f.write_str("next"),
            ConnectionSlot::Input(name) => write!(f, "input '{}'", name),
        }
    }
}

/// Non-owning handle to a connection of a live block.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionRef {
    pub block: BlockId,
    pub slot: ConnectionSlot,
}

impl ConnectionRef {
    pub fn new(block: impl Into<BlockId>, slot: ConnectionSlot) -> Self {
        ConnectionRef { block: block.into(), slot }
    }

    pub fn output(block: impl Into<BlockId>) -> Self {
        Self::new(block, ConnectionSlot::Output)
    }

    pub fn previous(block: impl Into<BlockId>) -> Self {
        Self::new(block, ConnectionSlot::Previous)
    }

    pub fn next(block: impl Into<BlockId>) -> Self {
        Self::new(block, ConnectionSlot::Next)
    }

    pub fn input(block: impl Into<BlockId>, name: &str) -> Self {
        Self::new(block, ConnectionSlot::Input(name.to_string()))
    }
}

impl fmt::Display for ConnectionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of block {}", self.slot, self.block)
    }
}

/// Outcome of [`Connection::can_connect`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectCheck {
    Ok,
    SelfConnection,
    WrongType,
    AlreadyConnected,
    TargetNull,
    ChecksFailed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connection {
    connection_type: ConnectionType,
    checks: Option<Vec<String>>,
    block: Option<BlockId>,
    input: Option<String>,
    target: Option<ConnectionRef>,
    shadow_target: Option<ConnectionRef>,
}

impl Connection {
    /// Creates an unattached connection. An empty check list is stored as
    /// `None`: both accept anything.
    pub fn new(connection_type: ConnectionType, checks: Option<Vec<String>>) -> Self {
        Connection {
            connection_type,
            checks: checks.filter(|c| !c.is_empty()),
            block: None,
            input: None,
            target: None,
            shadow_target: None,
        }
    }

    pub fn connection_type(&self) -> ConnectionType {
        self.connection_type
    }

    pub fn checks(&self) -> Option<&[String]> {
        self.checks.as_deref()
    }

    /// The owning block, once the connection has been attached to one.
    pub fn block(&self) -> Option<&BlockId> {
        self.block.as_ref()
    }

    /// Name of the owning input, for input connections.
    pub fn input_name(&self) -> Option<&str> {
        self.input.as_deref()
    }

    pub fn target(&self) -> Option<&ConnectionRef> {
        self.target.as_ref()
    }

    pub fn shadow_target(&self) -> Option<&ConnectionRef> {
        self.shadow_target.as_ref()
    }

    pub fn is_connected(&self) -> bool {
        self.target.is_some()
    }

    /// True if the live target is the shadow block.
    pub fn is_shadow_live(&self) -> bool {
        match (&self.target, &self.shadow_target) {
            (Some(t), Some(s)) => t == s,
            _ => false,
        }
    }

    /// The block linked through `target`.
    pub fn target_block(&self) -> Option<&BlockId> {
        self.target.as_ref().map(|t| &t.block)
    }

    pub fn shadow_block(&self) -> Option<&BlockId> {
        self.shadow_target.as_ref().map(|t| &t.block)
    }

    /// Type and check compatibility, ignoring current attachments.
    pub fn check_compatible(&self, other: Option<&Connection>) -> ConnectCheck {
        let other = match other {
            Some(other) => other,
            None => return ConnectCheck::TargetNull,
        };
        if self.block.is_some() && self.block == other.block {
            return ConnectCheck::SelfConnection;
        }
        if other.connection_type != self.connection_type.opposite() {
            return ConnectCheck::WrongType;
        }
        if !self.checks_match(other) {
            return ConnectCheck::ChecksFailed;
        }
        ConnectCheck::Ok
    }

    /// Pure validation of a prospective link between `self` and `other`.
    pub fn can_connect(&self, other: Option<&Connection>) -> ConnectCheck {
        match self.check_compatible(other) {
            ConnectCheck::Ok => {}
            refused => return refused,
        }
        match other {
            Some(other) if self.target.is_some() || other.target.is_some() => ConnectCheck::AlreadyConnected,
            _ => ConnectCheck::Ok,
        }
    }

    /// True if either side accepts anything or the check sets intersect.
    pub fn checks_match(&self, other: &Connection) -> bool {
        match (&self.checks, &other.checks) {
            (Some(ours), Some(theirs)) => ours.iter().any(|c| theirs.contains(c)),
            _ => true,
        }
    }

    /// Structurally identical copy with no owner and no links.
    pub fn clone_detached(&self) -> Connection {
        Connection::new(self.connection_type, self.checks.clone())
    }

    /// Turns a refused [`ConnectCheck`] into the matching error.
    pub fn check_to_result(&self, other: Option<&Connection>, check: ConnectCheck) -> Result<(), ConnectionError> {
        match check {
            ConnectCheck::Ok => Ok(()),
            ConnectCheck::SelfConnection => Err(ConnectionError::SelfConnection),
            ConnectCheck::AlreadyConnected => Err(ConnectionError::AlreadyConnected),
            ConnectCheck::TargetNull => Err(ConnectionError::TargetNull),
            ConnectCheck::WrongType => Err(ConnectionError::WrongType {
                from: self.connection_type,
                to: other.map(|o| o.connection_type).unwrap_or(self.connection_type),
            }),
            ConnectCheck::ChecksFailed => Err(ConnectionError::ChecksFailed {
                ours: self.checks.clone(),
                theirs: other.and_then(|o| o.checks.clone()),
            }),
        }
    }

    pub(crate) fn attach(&mut self, block: &BlockId, input: Option<&str>) {
        self.block = Some(block.clone());
        self.input = input.map(str::to_string);
    }

    pub(crate) fn set_target(&mut self, target: Option<ConnectionRef>) {
        self.target = target;
    }

    pub(crate) fn set_shadow_target(&mut self, target: Option<ConnectionRef>) {
        self.shadow_target = target;
    }
}
