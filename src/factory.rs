//! # Block factory
//!
//! The registry of block definitions, mutators and extensions, and the only
//! place new blocks are minted. Blocks come out unattached; callers add them
//! to the document with [`BlockGraph::add_root`] or connect them to a parent.

use crate::block::{BlockId, LiveIds};
use crate::config::ModelConfig;
use crate::connection::ConnectionRef;
use crate::definition::BlockDefinition;
use crate::error::{BlockLoadError, StructureError};
use crate::field::DropdownOptionsRegistry;
use crate::graph::BlockGraph;
use crate::mutator::{IfElseMutator, Mutator, MutatorFactory};
use crate::serialize;
use crate::template::{BlockTemplate, ChildTemplate, TemplateSource};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Named behaviour applied to every new block of the types listing it.
pub trait BlockExtension: Send + Sync {
    fn apply(&self, graph: &mut BlockGraph, block: &BlockId) -> Result<(), StructureError>;
}

impl<F> BlockExtension for F
where
    F: Fn(&mut BlockGraph, &BlockId) -> Result<(), StructureError> + Send + Sync,
{
    fn apply(&self, graph: &mut BlockGraph, block: &BlockId) -> Result<(), StructureError> {
        self(graph, block)
    }
}

/// A definition skipped by [`BlockFactory::load_definitions`].
#[derive(Debug, Clone, PartialEq)]
pub struct SkippedDefinition {
    /// Position in the loaded array.
    pub index: usize,
    pub block_type: Option<String>,
    pub error: BlockLoadError,
}

/// Outcome of a batch definition load.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DefinitionLoadReport {
    pub loaded: Vec<String>,
    pub skipped: Vec<SkippedDefinition>,
}

impl DefinitionLoadReport {
    pub fn loaded_count(&self) -> usize {
        self.loaded.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }

    pub fn is_complete(&self) -> bool {
        self.skipped.is_empty()
    }
}

#[derive(Clone)]
pub struct BlockFactory {
    definitions: HashMap<String, Arc<BlockDefinition>>,
    mutators: HashMap<String, Arc<dyn MutatorFactory>>,
    extensions: HashMap<String, Arc<dyn BlockExtension>>,
    dropdowns: DropdownOptionsRegistry,
    live_ids: LiveIds,
    config: ModelConfig,
}

impl BlockFactory {
    pub fn new() -> Self {
        Self::with_config(ModelConfig::default())
    }

    /// A factory with the built-in `controls_if_mutator` registered.
    pub fn with_config(config: ModelConfig) -> Self {
        let mut factory = BlockFactory {
            definitions: HashMap::new(),
            mutators: HashMap::new(),
            extensions: HashMap::new(),
            dropdowns: DropdownOptionsRegistry::new(),
            live_ids: LiveIds::default(),
            config,
        };
        factory.register_mutator(
            IfElseMutator::ID,
            Arc::new(|| Box::new(IfElseMutator::new()) as Box<dyn Mutator>),
        );
        factory
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    /// Option lists shared by every dropdown field this factory builds.
    pub fn dropdowns(&self) -> &DropdownOptionsRegistry {
        &self.dropdowns
    }

    /// Whether a block with this id is alive in any graph this factory (or a
    /// clone of it) has minted into.
    pub fn is_live(&self, id: &BlockId) -> bool {
        self.live_ids.contains(id)
    }

    /// Registers a definition. A later definition of the same type replaces
    /// the earlier one.
    pub fn add_definition(&mut self, definition: BlockDefinition) {
        let type_name = definition.type_name().to_string();
        if self
            .definitions
            .insert(type_name.clone(), Arc::new(definition))
            .is_some()
        {
            tracing::debug!("[DEFS] replaced definition of '{}'", type_name);
        }
    }

    pub fn add_definition_json(&mut self, json: &Value) -> Result<(), BlockLoadError> {
        let definition = BlockDefinition::from_json(json)?;
        definition.create_inputs(&self.dropdowns)?;
        self.add_definition(definition);
        Ok(())
    }

    /// Loads a JSON array of definitions (or a single object).
    ///
    /// Invalid definitions are logged and skipped; the report lists them. Only
    /// malformed JSON fails the whole call.
    pub fn load_definitions(&mut self, json: &str) -> Result<DefinitionLoadReport, BlockLoadError> {
        let parsed: Value = serde_json::from_str(json)?;
        let items = match parsed {
            Value::Array(items) => items,
            object @ Value::Object(_) => vec![object],
            other => {
                return Err(BlockLoadError::Json(format!(
                    "expected an array of block definitions, found {}",
                    other
                )))
            }
        };

        let mut report = DefinitionLoadReport::default();
        for (index, item) in items.iter().enumerate() {
            match self.add_definition_json(item) {
                Ok(()) => {
                    let type_name = item.get("type").and_then(Value::as_str).unwrap_or_default();
                    self.warn_unknown_extensions(type_name);
                    report.loaded.push(type_name.to_string());
                }
                Err(error) => {
                    let block_type = item.get("type").and_then(Value::as_str).map(str::to_string);
                    tracing::warn!("[DEFS] skipping definition #{} ({:?}): {}", index, block_type, error);
                    report.skipped.push(SkippedDefinition {
                        index,
                        block_type,
                        error,
                    });
                }
            }
        }
        tracing::info!(
            "[DEFS] loaded {} definition(s), skipped {}",
            report.loaded_count(),
            report.skipped_count()
        );
        Ok(report)
    }

    fn warn_unknown_extensions(&self, type_name: &str) {
        if let Some(definition) = self.definitions.get(type_name) {
            for name in definition.extensions() {
                if !self.extensions.contains_key(name) {
                    tracing::warn!("[DEFS] '{}' uses unregistered extension '{}'", type_name, name);
                }
            }
        }
    }

    pub fn definition(&self, block_type: &str) -> Option<&Arc<BlockDefinition>> {
        self.definitions.get(block_type)
    }

    pub fn has_definition(&self, block_type: &str) -> bool {
        self.definitions.contains_key(block_type)
    }

    pub fn definition_types(&self) -> impl Iterator<Item = &str> {
        self.definitions.keys().map(String::as_str)
    }

    pub fn register_mutator(&mut self, name: &str, factory: Arc<dyn MutatorFactory>) {
        self.mutators.insert(name.to_string(), factory);
    }

    pub fn register_extension(&mut self, name: &str, extension: Arc<dyn BlockExtension>) {
        self.extensions.insert(name.to_string(), extension);
    }

    /// Mints a block (and its template children) into `graph`.
    ///
    /// The overlay is applied in a fixed order: mutation, field values, flags,
    /// position, then children. On failure every block created by this call is
    /// removed again.
    pub fn obtain(&self, graph: &mut BlockGraph, template: &BlockTemplate) -> Result<BlockId, BlockLoadError> {
        let mut created = Vec::new();
        match self.obtain_into(graph, template, &mut created) {
            Ok(id) => Ok(id),
            Err(error) => {
                graph.discard(&created);
                tracing::debug!("[FACTORY] obtain failed, discarded {} block(s): {}", created.len(), error);
                Err(error)
            }
        }
    }

    fn obtain_into(
        &self,
        graph: &mut BlockGraph,
        template: &BlockTemplate,
        created: &mut Vec<BlockId>,
    ) -> Result<BlockId, BlockLoadError> {
        let mut overlay = template.clone();
        let definition = match &template.source {
            Some(TemplateSource::Type(name)) => self
                .definitions
                .get(name)
                .cloned()
                .ok_or_else(|| BlockLoadError::UnknownBlockType(name.clone()))?,
            Some(TemplateSource::Definition(definition)) => Arc::clone(definition),
            Some(TemplateSource::CopyOf(source)) => {
                let source = graph.block(source).ok_or_else(|| {
                    BlockLoadError::element("block", None, format!("copy source {} is not a live block", source))
                })?;
                let definition = self
                    .definitions
                    .get(source.block_type())
                    .cloned()
                    .ok_or_else(|| BlockLoadError::UnknownBlockType(source.block_type().to_string()))?;
                copy_state(source, &mut overlay);
                definition
            }
            None => return Err(BlockLoadError::element("block", None, "template names no block type")),
        };
        let type_name = definition.type_name();
        let in_block = |source: StructureError| BlockLoadError::Structure {
            tag: "block".to_string(),
            source,
        };

        let taken = |id: &BlockId| graph.contains(id) || self.live_ids.contains(id);
        let id = match &overlay.id {
            Some(id) if taken(id) => return Err(BlockLoadError::DuplicateId(id.to_string())),
            Some(id) => id.clone(),
            None => loop {
                let id = BlockId::generate();
                if !taken(&id) {
                    break id;
                }
            },
        };
        let block = definition.build_block(id.clone(), &self.dropdowns)?;
        graph.share_live_ids(&self.live_ids);
        graph.insert(block);
        self.live_ids.claim(&id);
        created.push(id.clone());

        if let Some(name) = definition.mutator() {
            let factory = self.mutators.get(name).ok_or_else(|| BlockLoadError::UnknownMutator {
                block_type: type_name.to_string(),
                mutator: name.to_string(),
            })?;
            graph.attach_mutator(&id, factory.create()).map_err(in_block)?;
        }
        for name in definition.extensions() {
            match self.extensions.get(name) {
                Some(extension) => extension.apply(graph, &id).map_err(in_block)?,
                None if self.config.strict_extensions => {
                    return Err(BlockLoadError::UnknownExtension {
                        block_type: type_name.to_string(),
                        extension: name.clone(),
                    })
                }
                None => tracing::warn!("[FACTORY] '{}': unknown extension '{}' skipped", type_name, name),
            }
        }

        if let Some(mutation) = &overlay.mutation {
            graph
                .set_mutation(&id, mutation)
                .map_err(|source| BlockLoadError::Structure {
                    tag: "mutation".to_string(),
                    source,
                })?;
        }
        for (name, value) in &overlay.field_values {
            graph.set_field_value(&id, name, value).map_err(|e| match e {
                StructureError::FieldNotFound { .. } => {
                    BlockLoadError::element("field", Some(type_name), format!("unknown field '{}'", name))
                }
                source => BlockLoadError::Structure {
                    tag: "field".to_string(),
                    source,
                },
            })?;
        }
        if overlay.shadow == Some(true) && graph.block(&id).map(|b| b.contains_variable_field()).unwrap_or(false) {
            return Err(BlockLoadError::ShadowWithVariable(id.to_string()));
        }
        self.apply_flags(graph, &id, &overlay).map_err(in_block)?;
        if let Some(position) = overlay.position {
            graph.set_position(&id, position).map_err(in_block)?;
        }

        for slot in &overlay.inputs {
            let parent = ConnectionRef::input(&id, &slot.input_name);
            self.obtain_children(graph, &slot.tag, &parent, &slot.children, created)?;
        }
        if let Some(next) = &overlay.next {
            self.obtain_children(graph, "next", &ConnectionRef::next(&id), next, created)?;
        }

        tracing::debug!("[FACTORY] obtained {} ({})", id, type_name);
        Ok(id)
    }

    fn apply_flags(&self, graph: &mut BlockGraph, id: &BlockId, overlay: &BlockTemplate) -> Result<(), StructureError> {
        if overlay.shadow == Some(true) {
            graph.set_shadow(id, true)?;
        }
        if let Some(collapsed) = overlay.collapsed {
            graph.set_collapsed(id, collapsed)?;
        }
        if let Some(disabled) = overlay.disabled {
            graph.set_disabled(id, disabled)?;
        }
        if let Some(editable) = overlay.editable {
            graph.set_editable(id, editable)?;
        }
        if let Some(movable) = overlay.movable {
            graph.set_movable(id, movable)?;
        }
        if let Some(deletable) = overlay.deletable {
            graph.set_deletable(id, deletable)?;
        }
        if let Some(inline) = overlay.inputs_inline {
            graph.set_inputs_inline(id, inline)?;
        }
        if let Some(comment) = &overlay.comment {
            graph.set_comment(id, Some(comment.as_str()))?;
        }
        Ok(())
    }

    fn obtain_children(
        &self,
        graph: &mut BlockGraph,
        tag: &str,
        parent: &ConnectionRef,
        children: &ChildTemplate,
        created: &mut Vec<BlockId>,
    ) -> Result<(), BlockLoadError> {
        let child = match &children.block {
            Some(template) => Some(self.obtain_into(graph, template, created)?),
            None => None,
        };
        let shadow = match &children.shadow {
            Some(template) => Some(self.obtain_into(graph, template, created)?),
            None => None,
        };
        graph.connect_or_throw(tag, parent, child.as_ref(), shadow.as_ref())
    }

    /// Loads every block of an XML document as a top-level block.
    ///
    /// Either all blocks load or none do.
    pub fn load_blocks_from_xml(&self, graph: &mut BlockGraph, xml: &str) -> Result<Vec<BlockId>, BlockLoadError> {
        let templates = serialize::templates_from_xml_str(xml)?;
        if let Some(shadow) = templates.iter().find(|t| t.shadow == Some(true)) {
            let block_type = match shadow.source() {
                Some(TemplateSource::Type(name)) => Some(name.as_str()),
                _ => None,
            };
            return Err(BlockLoadError::element(
                "shadow",
                block_type,
                "a shadow block cannot be a top-level block",
            ));
        }

        let mut roots = Vec::with_capacity(templates.len());
        let checked = templates
            .iter()
            .try_for_each(|template| {
                let id = self.obtain(graph, template)?;
                roots.push(id.clone());
                graph.check_can_add_root(&id).map_err(|source| BlockLoadError::Structure {
                    tag: "xml".to_string(),
                    source,
                })
            });
        if let Err(error) = checked {
            for root in &roots {
                let subtree = graph.descendants(root, true);
                graph.discard(&subtree);
            }
            return Err(error);
        }

        for root in &roots {
            graph.add_root(root).map_err(|source| BlockLoadError::Structure {
                tag: "xml".to_string(),
                source,
            })?;
        }
        tracing::info!("[FACTORY] loaded {} top-level block(s) from XML", roots.len());
        Ok(roots)
    }

    /// Copies a block subtree through its XML form, so the copy is validated
    /// like any loaded block. The copy has fresh ids and is unattached.
    pub fn deep_copy(&self, graph: &mut BlockGraph, id: &BlockId) -> Result<BlockId, BlockLoadError> {
        let xml = serialize::block_to_xml(graph, id, false)
            .map_err(|source| BlockLoadError::Structure {
                tag: "block".to_string(),
                source,
            })?
            .to_xml_string();
        let mut templates = serialize::templates_from_xml_str(&xml)?;
        let template = templates
            .pop()
            .ok_or_else(|| BlockLoadError::element("block", None, "copy produced no block"))?;
        let copy = self.obtain(graph, &template)?;
        tracing::debug!("[FACTORY] deep-copied {} to {}", id, copy);
        Ok(copy)
    }
}

/// Fills overlay values the template leaves unset from a live block.
fn copy_state(source: &crate::block::Block, overlay: &mut BlockTemplate) {
    if overlay.mutation.is_none() {
        overlay.mutation = source.mutation();
    }
    for field in source.inputs().iter().flat_map(|i| i.fields()) {
        if let (true, Some(name)) = (field.is_serializable(), field.name()) {
            if !overlay.field_values.iter().any(|(n, _)| n == name) {
                overlay.field_values.push((name.to_string(), field.serialized_value()));
            }
        }
    }
    overlay.shadow = overlay.shadow.or(Some(source.is_shadow()));
    overlay.collapsed = overlay.collapsed.or(Some(source.is_collapsed()));
    overlay.disabled = overlay.disabled.or(Some(source.is_disabled()));
    overlay.editable = overlay.editable.or(Some(source.is_editable()));
    overlay.movable = overlay.movable.or(Some(source.is_movable()));
    overlay.deletable = overlay.deletable.or(Some(source.is_deletable()));
    if source.inputs_inline_modified() {
        overlay.inputs_inline = overlay.inputs_inline.or(Some(source.inputs_inline()));
    }
    if overlay.comment.is_none() {
        overlay.comment = source.comment().map(str::to_string);
    }
}

impl Default for BlockFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for BlockFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BlockFactory")
            .field("definitions", &self.definitions.len())
            .field("mutators", &self.mutators.keys().collect::<Vec<_>>())
            .field("extensions", &self.extensions.keys().collect::<Vec<_>>())
            .field("live_blocks", &self.live_ids.len())
            .field("config", &self.config)
            .finish()
    }
}
