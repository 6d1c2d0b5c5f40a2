//! Templates describe a block to be minted by
//! [`BlockFactory::obtain`](crate::BlockFactory::obtain): where its shape comes
//! from, plus the state overlay applied on top of it.

use crate::block::{BlockId, WorkspacePoint};
use crate::definition::BlockDefinition;
use std::sync::Arc;

/// Where the shape of a new block comes from.
#[derive(Debug, Clone)]
pub enum TemplateSource {
    /// A registered definition, by type name.
    Type(String),
    /// An inline definition.
    Definition(Arc<BlockDefinition>),
    /// The type and current state of a live block. The live block's children
    /// are not copied; use [`BlockFactory::deep_copy`](crate::BlockFactory::deep_copy) for that.
    CopyOf(BlockId),
}

/// A child block and/or a shadow for one value, statement or next slot.
#[derive(Debug, Clone, Default)]
pub struct ChildTemplate {
    pub block: Option<Box<BlockTemplate>>,
    pub shadow: Option<Box<BlockTemplate>>,
}

/// Children hung off a named value or statement input.
#[derive(Debug, Clone)]
pub struct InputChildren {
    /// `value` or `statement`, used in load errors.
    pub tag: String,
    pub input_name: String,
    pub children: ChildTemplate,
}

#[derive(Debug, Clone, Default)]
pub struct BlockTemplate {
    pub(crate) source: Option<TemplateSource>,
    pub(crate) id: Option<BlockId>,
    pub(crate) shadow: Option<bool>,
    pub(crate) position: Option<WorkspacePoint>,
    pub(crate) collapsed: Option<bool>,
    pub(crate) disabled: Option<bool>,
    pub(crate) editable: Option<bool>,
    pub(crate) movable: Option<bool>,
    pub(crate) deletable: Option<bool>,
    pub(crate) inputs_inline: Option<bool>,
    pub(crate) comment: Option<String>,
    pub(crate) mutation: Option<String>,
    pub(crate) field_values: Vec<(String, String)>,
    pub(crate) inputs: Vec<InputChildren>,
    pub(crate) next: Option<ChildTemplate>,
}

impl BlockTemplate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn of_type(block_type: &str) -> Self {
        BlockTemplate {
            source: Some(TemplateSource::Type(block_type.to_string())),
            ..Default::default()
        }
    }

    pub fn from_definition(definition: Arc<BlockDefinition>) -> Self {
        BlockTemplate {
            source: Some(TemplateSource::Definition(definition)),
            ..Default::default()
        }
    }

    pub fn copy_of(block: &BlockId) -> Self {
        BlockTemplate {
            source: Some(TemplateSource::CopyOf(block.clone())),
            ..Default::default()
        }
    }

    pub fn source(&self) -> Option<&TemplateSource> {
        self.source.as_ref()
    }

    /// Requests a specific id. Obtaining fails if a live block already holds it.
    pub fn with_id(mut self, id: impl Into<BlockId>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn shadow(mut self, shadow: bool) -> Self {
        self.shadow = Some(shadow);
        self
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = Some(WorkspacePoint::new(x, y));
        self
    }

    pub fn collapsed(mut self, collapsed: bool) -> Self {
        self.collapsed = Some(collapsed);
        self
    }

    pub fn disabled(mut self, disabled: bool) -> Self {
        self.disabled = Some(disabled);
        self
    }

    pub fn editable(mut self, editable: bool) -> Self {
        self.editable = Some(editable);
        self
    }

    pub fn movable(mut self, movable: bool) -> Self {
        self.movable = Some(movable);
        self
    }

    pub fn deletable(mut self, deletable: bool) -> Self {
        self.deletable = Some(deletable);
        self
    }

    pub fn inputs_inline(mut self, inline: bool) -> Self {
        self.inputs_inline = Some(inline);
        self
    }

    pub fn comment(mut self, comment: &str) -> Self {
        self.comment = Some(comment.to_string());
        self
    }

    /// Serialized mutator state, applied before any field value.
    pub fn mutation(mut self, mutation: &str) -> Self {
        self.mutation = Some(mutation.to_string());
        self
    }

    /// Field value in its serialized text form.
    pub fn field(mut self, name: &str, value: &str) -> Self {
        self.field_values.push((name.to_string(), value.to_string()));
        self
    }

    pub fn value_child(self, input: &str, block: BlockTemplate) -> Self {
        self.input_child("value", input, Some(block), None)
    }

    /// The template is forced to be a shadow.
    pub fn value_shadow(self, input: &str, shadow: BlockTemplate) -> Self {
        self.input_child("value", input, None, Some(shadow.shadow(true)))
    }

    pub fn statement_child(self, input: &str, block: BlockTemplate) -> Self {
        self.input_child("statement", input, Some(block), None)
    }

    pub fn statement_shadow(self, input: &str, shadow: BlockTemplate) -> Self {
        self.input_child("statement", input, None, Some(shadow.shadow(true)))
    }

    pub fn next_child(mut self, block: BlockTemplate) -> Self {
        self.next.get_or_insert_with(ChildTemplate::default).block = Some(Box::new(block));
        self
    }

    pub fn next_shadow(mut self, shadow: BlockTemplate) -> Self {
        self.next.get_or_insert_with(ChildTemplate::default).shadow = Some(Box::new(shadow.shadow(true)));
        self
    }

    pub(crate) fn input_child(
        mut self,
        tag: &str,
        input: &str,
        block: Option<BlockTemplate>,
        shadow: Option<BlockTemplate>,
    ) -> Self {
        let index = match self.inputs.iter().position(|c| c.input_name == input) {
            Some(index) => index,
            None => {
                self.inputs.push(InputChildren {
                    tag: tag.to_string(),
                    input_name: input.to_string(),
                    children: ChildTemplate::default(),
                });
                self.inputs.len() - 1
            }
        };
        let slot = &mut self.inputs[index].children;
        if let Some(block) = block {
            slot.block = Some(Box::new(block));
        }
        if let Some(shadow) = shadow {
            slot.shadow = Some(Box::new(shadow));
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_child_and_shadow_share_a_slot() {
        let template = BlockTemplate::of_type("math_arithmetic")
            .value_shadow("A", BlockTemplate::of_type("math_number"))
            .value_child("A", BlockTemplate::of_type("variables_get"));
        assert_eq!(template.inputs.len(), 1);
        let slot = &template.inputs[0].children;
        assert!(slot.block.is_some());
        assert_eq!(slot.shadow.as_ref().and_then(|s| s.shadow), Some(true));
    }

    #[test]
    fn next_slot_collects_block_and_shadow() {
        let template = BlockTemplate::of_type("a")
            .next_shadow(BlockTemplate::of_type("b"))
            .next_child(BlockTemplate::of_type("c"));
        let next = template.next.unwrap();
        assert!(next.block.is_some() && next.shadow.is_some());
    }
}
