use super::BlockGraph;
use crate::block::{Block, BlockId, BlockUpdate, Shape, WorkspacePoint};
use crate::error::StructureError;
use crate::events::{BlocklyEvent, ChangeElement, PendingMove};
use crate::field::FieldValue;
use crate::mutator::Mutator;
use crate::xml::XmlElement;
use std::thread;

impl BlockGraph {
    fn queue_change(
        &mut self,
        id: &BlockId,
        element: ChangeElement,
        name: Option<&str>,
        old_value: Option<String>,
        new_value: Option<String>,
    ) {
        if let Some(workspace_id) = self.tracking_id(id) {
            let event = BlocklyEvent::change(&workspace_id, id, element, name, old_value, new_value);
            self.events.push(event);
        }
    }

    /// Replaces the block's inputs and connections.
    ///
    /// Inputs and connections kept as `Existing` are reused with their
    /// attachments; removed ones must be empty and new ones unattached.
    /// Observers get one [`BlockUpdate::Shape`] per call, even when the shape
    /// is unchanged.
    pub fn reshape(&mut self, id: &BlockId, shape: Shape) -> Result<(), StructureError> {
        let block = self.block_mut(id)?;
        block.validate_shape(&shape)?;
        block.apply_shape(shape);
        tracing::debug!("[GRAPH] reshaped {} ({} input(s))", id, block.inputs().len());
        self.notify(id, BlockUpdate::Shape);
        Ok(())
    }

    /// Turns a block into a shadow or back.
    ///
    /// Refused while the block hangs below a parent, and, when becoming a
    /// shadow, while it holds a variable field or a regular child.
    pub fn set_shadow(&mut self, id: &BlockId, shadow: bool) -> Result<bool, StructureError> {
        let block = self.block_or_err(id)?;
        if block.is_shadow() == shadow {
            return Ok(false);
        }
        let illegal = |reason: String| Err(StructureError::IllegalShadowState(reason));
        if block.upward_connection().and_then(|(_, c)| c.target()).is_some() {
            return illegal(format!("block {} is connected to a parent", id));
        }
        if shadow {
            if self.is_root(id) {
                return illegal(format!("top-level block {} cannot become a shadow", id));
            }
            if block.contains_variable_field() {
                return illegal(format!("block {} contains a variable field", id));
            }
            for child in self.child_blocks(id, false) {
                if self.block(&child).map(|c| !c.is_shadow()).unwrap_or(false) {
                    return illegal(format!("block {} has the regular child {}", id, child));
                }
            }
        } else if let Some(owner) = self.shadow_owner(id) {
            return illegal(format!("block {} is the shadow of {}", id, owner));
        }

        self.block_mut(id)?.is_shadow = shadow;
        self.notify(id, BlockUpdate::IsShadow);
        Ok(true)
    }

    fn set_flag(
        &mut self,
        id: &BlockId,
        value: bool,
        element: ChangeElement,
        update: BlockUpdate,
        flag: fn(&mut Block) -> &mut bool,
    ) -> Result<bool, StructureError> {
        let slot = flag(self.block_mut(id)?);
        if *slot == value {
            return Ok(false);
        }
        *slot = value;
        self.queue_change(id, element, None, Some((!value).to_string()), Some(value.to_string()));
        self.notify(id, update);
        Ok(true)
    }

    pub fn set_disabled(&mut self, id: &BlockId, disabled: bool) -> Result<bool, StructureError> {
        self.set_flag(id, disabled, ChangeElement::Disabled, BlockUpdate::IsDisabled, |b| &mut b.disabled)
    }

    pub fn set_collapsed(&mut self, id: &BlockId, collapsed: bool) -> Result<bool, StructureError> {
        self.set_flag(id, collapsed, ChangeElement::Collapsed, BlockUpdate::IsCollapsed, |b| &mut b.collapsed)
    }

    pub fn set_editable(&mut self, id: &BlockId, editable: bool) -> Result<bool, StructureError> {
        self.set_flag(id, editable, ChangeElement::Editable, BlockUpdate::IsEditable, |b| &mut b.editable)
    }

    pub fn set_movable(&mut self, id: &BlockId, movable: bool) -> Result<bool, StructureError> {
        self.set_flag(id, movable, ChangeElement::Movable, BlockUpdate::IsMovable, |b| &mut b.movable)
    }

    pub fn set_deletable(&mut self, id: &BlockId, deletable: bool) -> Result<bool, StructureError> {
        self.set_flag(id, deletable, ChangeElement::Deletable, BlockUpdate::IsDeletable, |b| &mut b.deletable)
    }

    /// Always records that the value was set explicitly, even when unchanged.
    pub fn set_inputs_inline(&mut self, id: &BlockId, inline: bool) -> Result<bool, StructureError> {
        self.block_mut(id)?.inputs_inline_modified = true;
        self.set_flag(id, inline, ChangeElement::Inline, BlockUpdate::InputsInline, |b| &mut b.inputs_inline)
    }

    /// `None` removes the comment.
    pub fn set_comment(&mut self, id: &BlockId, comment: Option<&str>) -> Result<bool, StructureError> {
        let block = self.block_mut(id)?;
        if block.comment.as_deref() == comment {
            return Ok(false);
        }
        let old = std::mem::replace(&mut block.comment, comment.map(str::to_string));
        self.queue_change(id, ChangeElement::Comment, None, old, comment.map(str::to_string));
        self.notify(id, BlockUpdate::Comment);
        Ok(true)
    }

    /// Moves a block in workspace coordinates. Only meaningful for blocks
    /// without a parent.
    pub fn set_position(&mut self, id: &BlockId, position: WorkspacePoint) -> Result<bool, StructureError> {
        if self.block_or_err(id)?.position == position {
            return Ok(false);
        }
        let pending = self
            .tracking_id(id)
            .map(|ws| PendingMove::capture(self, &ws, id));
        self.block_mut(id)?.position = position;
        if let Some(pending) = pending {
            let event = pending.record_new(self);
            self.events.push(event);
        }
        self.notify(id, BlockUpdate::Position);
        Ok(true)
    }

    /// Sets a field from its serialized text.
    pub fn set_field_value(&mut self, id: &BlockId, field: &str, text: &str) -> Result<bool, StructureError> {
        let value = self
            .block_or_err(id)?
            .field(field)
            .ok_or_else(|| StructureError::FieldNotFound {
                block: id.to_string(),
                field: field.to_string(),
            })?
            .parse_value(text)?;
        self.set_field(id, field, value)
    }

    /// Sets a field to a typed value of the field's own kind.
    pub fn set_field(&mut self, id: &BlockId, field: &str, value: FieldValue) -> Result<bool, StructureError> {
        let current = self
            .block_or_err(id)?
            .field(field)
            .ok_or_else(|| StructureError::FieldNotFound {
                block: id.to_string(),
                field: field.to_string(),
            })?;
        let value = current.normalize_value(value)?;
        if *current.value() == value {
            return Ok(false);
        }
        let old = current.serialized_value();
        let mut preview = current.clone();
        preview.set_value(value.clone());
        let new = preview.serialized_value();

        self.queue_change(id, ChangeElement::Field, Some(field), Some(old), Some(new));
        if let Some(target) = self.block_mut(id)?.field_mut(field) {
            target.set_value(value);
        }
        self.notify(id, BlockUpdate::FieldValue);
        Ok(true)
    }

    /// Applies a serialized `<mutation>`.
    ///
    /// With a mutator attached the mutator reshapes the block; otherwise the
    /// string is stored as is and written back on serialization.
    pub fn set_mutation(&mut self, id: &BlockId, mutation: &str) -> Result<(), StructureError> {
        let block = self.block_mut(id)?;
        let old = block.mutation();
        match block.mutator.take() {
            Some(mut mutator) => {
                // Reshape updates are held until the mutate event is queued.
                let outer = self.deferred_updates.is_none();
                if outer {
                    self.deferred_updates = Some(Vec::new());
                }
                let result = mutator.update(self, id, mutation);
                if let Ok(block) = self.block_mut(id) {
                    block.mutator = Some(mutator);
                }
                let held = if outer {
                    self.deferred_updates.take().unwrap_or_default()
                } else {
                    Vec::new()
                };
                if let Err(error) = result {
                    for (target, update) in held {
                        self.deliver(&target, update);
                    }
                    return Err(error);
                }
                self.commit_mutation(id, old)?;
                for (target, update) in held {
                    self.notify(&target, update);
                }
            }
            None => {
                XmlElement::parse(mutation).map_err(|e| StructureError::Mutation(e.to_string()))?;
                block.mutation = Some(mutation.to_string());
                self.commit_mutation(id, old)?;
            }
        }
        self.notify(id, BlockUpdate::Mutation);
        Ok(())
    }

    fn commit_mutation(&mut self, id: &BlockId, old: Option<String>) -> Result<(), StructureError> {
        let new = self.block_or_err(id)?.mutation();
        if old != new {
            self.queue_change(id, ChangeElement::Mutate, None, old, new);
        }
        Ok(())
    }

    /// Attaches the block's mutator. A block gets at most one mutator for its
    /// whole life.
    pub fn attach_mutator(&mut self, id: &BlockId, mut mutator: Box<dyn Mutator>) -> Result<(), StructureError> {
        let block = self.block_mut(id)?;
        if block.mutator_id.is_some() {
            return Err(StructureError::MutatorAlreadyAttached(id.to_string()));
        }
        mutator.on_attached(block);
        block.mutator_id = Some(mutator.mutator_id().to_string());
        block.mutator = Some(mutator);
        tracing::debug!("[GRAPH] attached mutator {:?} to {}", block.mutator_id, id);
        Ok(())
    }

    /// Sets the workspace id events of this block are queued under; `None`
    /// stops tracking. Only the thread that created the graph may call this.
    pub fn set_event_workspace_id(&mut self, id: &BlockId, workspace_id: Option<&str>) -> Result<(), StructureError> {
        if thread::current().id() != self.owner_thread {
            return Err(StructureError::WrongThread);
        }
        self.block_mut(id)?.event_workspace_id = workspace_id.map(str::to_string);
        Ok(())
    }
}
