use super::BlockGraph;
use crate::block::BlockId;
use crate::connection::{Connection, ConnectionRef, ConnectionSlot, ConnectionType};
use crate::error::{BlockLoadError, ConnectionError, StructureError};
use crate::events::PendingMove;

impl BlockGraph {
    /// Canonical form of `r`, with the input name as the block declares it.
    fn resolve(&self, r: &ConnectionRef) -> Result<ConnectionRef, StructureError> {
        let block = self.block_or_err(&r.block)?;
        let missing = || StructureError::MissingConnection {
            block: r.block.to_string(),
            slot: r.slot.to_string(),
        };
        match &r.slot {
            ConnectionSlot::Input(name) => {
                let input = block.input(name).ok_or_else(|| StructureError::InputNotFound {
                    block: r.block.to_string(),
                    input: name.clone(),
                })?;
                if input.connection().is_none() {
                    return Err(missing());
                }
                Ok(ConnectionRef::input(&r.block, input.name()))
            }
            slot => match block.connection(slot) {
                Some(_) => Ok(r.clone()),
                None => Err(missing()),
            },
        }
    }

    /// The connection behind a resolved handle.
    pub fn connection(&self, r: &ConnectionRef) -> Option<&Connection> {
        self.blocks.get(&r.block)?.connection(&r.slot)
    }

    fn connection_or_err(&self, r: &ConnectionRef) -> Result<&Connection, StructureError> {
        self.connection(r).ok_or_else(|| StructureError::MissingConnection {
            block: r.block.to_string(),
            slot: r.slot.to_string(),
        })
    }

    fn connection_mut_at(&mut self, r: &ConnectionRef) -> Option<&mut Connection> {
        self.blocks.get_mut(&r.block)?.connection_mut(&r.slot)
    }

    /// Links two connections.
    ///
    /// Either side may be given first. Connecting to the exact current target
    /// is a no-op. A live shadow in the parent slot is hidden, not removed,
    /// and is not brought back by a later [`disconnect`](Self::disconnect).
    pub fn connect(&mut self, a: &ConnectionRef, b: &ConnectionRef) -> Result<(), StructureError> {
        let a = self.resolve(a)?;
        let b = self.resolve(b)?;
        let (ca, cb) = (self.connection_or_err(&a)?, self.connection_or_err(&b)?);
        if ca.target() == Some(&b) {
            return Ok(());
        }
        ca.check_to_result(Some(cb), ca.check_compatible(Some(cb)))?;
        let (parent, child) = if ca.connection_type().is_parent_side() {
            (a, b)
        } else {
            (b, a)
        };
        self.validate_link(&parent, &child)?;
        self.link(&parent, &child);
        Ok(())
    }

    fn validate_link(&self, parent: &ConnectionRef, child: &ConnectionRef) -> Result<(), StructureError> {
        let pc = self.connection_or_err(parent)?;
        let cc = self.connection_or_err(child)?;
        let child_block = self.block_or_err(&child.block)?;
        let parent_block = self.block_or_err(&parent.block)?;

        if cc.target().is_some() {
            return Err(ConnectionError::AlreadyConnected.into());
        }
        if pc.target().is_some() && (!pc.is_shadow_live() || child_block.is_shadow()) {
            return Err(ConnectionError::AlreadyConnected.into());
        }
        if parent_block.is_shadow() && !child_block.is_shadow() {
            return Err(StructureError::IllegalShadowState(format!(
                "shadow block {} cannot have the regular child {}",
                parent.block, child.block
            )));
        }
        if let Some(owner) = self.shadow_owner(&child.block) {
            if &owner != parent {
                return Err(StructureError::IllegalShadowState(format!(
                    "block {} is already the shadow of {}",
                    child.block, owner
                )));
            }
        }
        if child_block.is_shadow() {
            if let Some(existing) = pc.shadow_block().filter(|s| **s != child.block) {
                return Err(StructureError::IllegalShadowState(format!(
                    "{} already has the shadow {}",
                    parent, existing
                )));
            }
        }
        if self.is_ancestor_or_self(&child.block, &parent.block) {
            return Err(StructureError::Cycle {
                parent: parent.block.to_string(),
                child: child.block.to_string(),
            });
        }
        Ok(())
    }

    /// Commits a link that passed [`validate_link`](Self::validate_link).
    fn link(&mut self, parent: &ConnectionRef, child: &ConnectionRef) {
        let tracked = self
            .tracking_id(&parent.block)
            .or_else(|| self.tracking_id(&child.block));
        let pending = tracked.map(|ws| PendingMove::capture(self, &ws, &child.block));

        let child_is_shadow = self.block(&child.block).map(|b| b.is_shadow()).unwrap_or(false);
        let hidden = self
            .connection(parent)
            .filter(|c| c.is_shadow_live())
            .and_then(|c| c.target().cloned());
        if let Some(shadow) = hidden {
            if let Some(connection) = self.connection_mut_at(&shadow) {
                connection.set_target(None);
            }
        }
        if let Some(connection) = self.connection_mut_at(parent) {
            connection.set_target(Some(child.clone()));
            if child_is_shadow && connection.shadow_target().is_none() {
                connection.set_shadow_target(Some(child.clone()));
            }
        }
        if let Some(connection) = self.connection_mut_at(child) {
            connection.set_target(Some(parent.clone()));
        }
        self.roots.retain(|r| r != &child.block);

        if let Some(workspace_id) = self.tracking_id(&parent.block) {
            for member in self.descendants(&child.block, true) {
                if let Some(block) = self.blocks.get_mut(&member) {
                    block.event_workspace_id = Some(workspace_id.clone());
                }
            }
        }
        if let Some(pending) = pending {
            let event = pending.record_new(self);
            self.events.push(event);
        }
        tracing::debug!("[GRAPH] connected {} to {}", child, parent);
    }

    /// Breaks the link of `r`, from either side. No-op when unconnected.
    ///
    /// A regular child returns to the top level if its former tree was a
    /// root; a shadow stays owned by its slot.
    pub fn disconnect(&mut self, r: &ConnectionRef) -> Result<(), StructureError> {
        let r = self.resolve(r)?;
        let connection = self.connection_or_err(&r)?;
        let target = match connection.target() {
            Some(target) => target.clone(),
            None => return Ok(()),
        };
        let (parent, child) = if connection.connection_type().is_parent_side() {
            (r, target)
        } else {
            (target, r)
        };
        let was_shadow = self.connection(&parent).and_then(Connection::shadow_target) == Some(&child);

        let tracked = self
            .tracking_id(&parent.block)
            .or_else(|| self.tracking_id(&child.block));
        let pending = tracked.map(|ws| PendingMove::capture(self, &ws, &child.block));

        if let Some(connection) = self.connection_mut_at(&parent) {
            connection.set_target(None);
        }
        if let Some(connection) = self.connection_mut_at(&child) {
            connection.set_target(None);
        }
        if !was_shadow {
            let rooted = self
                .root_block(&parent.block)
                .map(|root| self.is_root(root))
                .unwrap_or(false);
            if rooted && !self.is_root(&child.block) {
                self.roots.push(child.block.clone());
            }
        }
        if let Some(pending) = pending {
            let event = pending.record_new(self);
            self.events.push(event);
        }
        tracing::debug!("[GRAPH] disconnected {} from {}", child, parent);
        Ok(())
    }

    /// Sets or clears the shadow of an input or next connection.
    ///
    /// The shadow becomes the live target when the slot has no live child.
    /// A hidden previous shadow is discarded; replacing a live one is refused.
    /// Clearing disconnects a live shadow and discards it.
    pub fn set_shadow_connection(&mut self, parent: &ConnectionRef, shadow: Option<&BlockId>) -> Result<(), StructureError> {
        let parent = self.resolve(parent)?;
        let pc = self.connection_or_err(&parent)?;
        if !pc.connection_type().is_parent_side() {
            return Err(StructureError::IllegalShadowState(format!(
                "{} cannot hold a shadow; only input and next connections can",
                parent
            )));
        }
        let current = pc.shadow_target().cloned();
        let shadow_live = pc.is_shadow_live();

        let shadow = match shadow {
            Some(shadow) => shadow,
            None => {
                let old = match current {
                    Some(old) => old,
                    None => return Ok(()),
                };
                if shadow_live {
                    self.disconnect(&parent)?;
                }
                if let Some(connection) = self.connection_mut_at(&parent) {
                    connection.set_shadow_target(None);
                }
                let subtree = self.descendants(&old.block, true);
                self.discard(&subtree);
                tracing::debug!("[GRAPH] removed shadow {} from {}", old.block, parent);
                return Ok(());
            }
        };

        let block = self.block_or_err(shadow)?;
        if !block.is_shadow() {
            return Err(StructureError::IllegalShadowState(format!(
                "block {} is not a shadow block",
                shadow
            )));
        }
        let (slot, cc) = block.upward_connection().ok_or_else(|| StructureError::MissingConnection {
            block: shadow.to_string(),
            slot: "output or previous".to_string(),
        })?;
        let child = ConnectionRef::new(shadow, slot);
        if current.as_ref() == Some(&child) {
            return Ok(());
        }
        cc.check_to_result(Some(pc), cc.check_compatible(Some(pc)))?;
        if cc.target().is_some() {
            return Err(ConnectionError::AlreadyConnected.into());
        }
        if let Some(owner) = self.shadow_owner(shadow) {
            return Err(StructureError::IllegalShadowState(format!(
                "block {} is already the shadow of {}",
                shadow, owner
            )));
        }
        if self.is_ancestor_or_self(shadow, &parent.block) {
            return Err(StructureError::Cycle {
                parent: parent.block.to_string(),
                child: shadow.to_string(),
            });
        }
        if shadow_live {
            return Err(StructureError::IllegalShadowState(format!(
                "the shadow of {} is live; disconnect it before replacing it",
                parent
            )));
        }
        let live_child = pc.target().is_some();

        if let Some(old) = current {
            if let Some(connection) = self.connection_mut_at(&parent) {
                connection.set_shadow_target(None);
            }
            let subtree = self.descendants(&old.block, true);
            self.discard(&subtree);
        }
        if let Some(connection) = self.connection_mut_at(&parent) {
            connection.set_shadow_target(Some(child.clone()));
        }
        self.roots.retain(|r| r != shadow);
        if !live_child {
            self.link(&parent, &child);
        } else if let Some(workspace_id) = self.tracking_id(&parent.block) {
            for member in self.descendants(shadow, true) {
                if let Some(block) = self.blocks.get_mut(&member) {
                    block.event_workspace_id = Some(workspace_id.clone());
                }
            }
        }
        tracing::debug!("[GRAPH] set shadow {} on {}", shadow, parent);
        Ok(())
    }

    /// Connects a loaded child and shadow to `parent`.
    ///
    /// The child is connected first; the shadow is then set and becomes live
    /// only when no child was given. Failures carry `tag` (`value`,
    /// `statement` or `next`) for diagnostics.
    pub fn connect_or_throw(
        &mut self,
        tag: &str,
        parent: &ConnectionRef,
        child: Option<&BlockId>,
        shadow: Option<&BlockId>,
    ) -> Result<(), BlockLoadError> {
        let wrap = |source: StructureError| BlockLoadError::Structure {
            tag: tag.to_string(),
            source,
        };
        let parent = self.resolve(parent).map_err(wrap)?;
        let parent_type = self
            .block(&parent.block)
            .map(|b| b.block_type().to_string())
            .unwrap_or_default();
        let upward = match self.connection(&parent).map(Connection::connection_type) {
            Some(ConnectionType::Input) => ConnectionSlot::Output,
            Some(ConnectionType::Next) => ConnectionSlot::Previous,
            _ => {
                return Err(BlockLoadError::element(
                    tag,
                    Some(parent_type.as_str()),
                    format!("{} cannot take child blocks", parent),
                ))
            }
        };

        if let Some(child) = child {
            let block = self.block_or_err(child).map_err(wrap)?;
            if block.is_shadow() {
                return Err(BlockLoadError::element(
                    tag,
                    Some(parent_type.as_str()),
                    format!("<shadow> {} given where a regular block is expected", child),
                ));
            }
            if block.connection(&upward).is_none() {
                return Err(BlockLoadError::element(
                    tag,
                    Some(parent_type.as_str()),
                    format!("block type '{}' has no {} connection", block.block_type(), upward),
                ));
            }
            self.connect(&parent, &ConnectionRef::new(child, upward.clone()))
                .map_err(wrap)?;
        }
        if let Some(shadow) = shadow {
            let block = self.block_or_err(shadow).map_err(wrap)?;
            if !block.is_shadow() {
                return Err(BlockLoadError::element(
                    tag,
                    Some(parent_type.as_str()),
                    format!("block {} given where a <shadow> is expected", shadow),
                ));
            }
            if block.connection(&upward).is_none() {
                return Err(BlockLoadError::element(
                    tag,
                    Some(parent_type.as_str()),
                    format!("shadow type '{}' has no {} connection", block.block_type(), upward),
                ));
            }
            self.set_shadow_connection(&parent, Some(shadow)).map_err(wrap)?;
        }
        Ok(())
    }
}
