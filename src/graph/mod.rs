//! # Block graph
//!
//! [`BlockGraph`] owns every live block of one document in an arena keyed by
//! [`BlockId`]. Connections refer to each other through [`ConnectionRef`]
//! handles, so parent and root lookups are walks over this table.
//!
//! Every mutation goes through the graph. Each one validates first and only
//! then commits, queues its event (for tracked blocks) and finally notifies
//! the block's observers.
//!
//! - `links` - connect, disconnect and shadow connections
//! - `mutate` - reshape, shadow state, flags, fields and mutations

mod links;
mod mutate;

use crate::block::{Block, BlockId, BlockObserver, BlockUpdate, LiveIds, WorkspacePoint};
use crate::config::ModelConfig;
use crate::connection::{ConnectionRef, ConnectionSlot};
use crate::error::StructureError;
use crate::events::{BlocklyEvent, EventListener, EventQueue, UiElement};
use crate::observer::ObserverId;
use crate::serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread::{self, ThreadId};

pub struct BlockGraph {
    workspace_id: String,
    blocks: HashMap<BlockId, Block>,
    roots: Vec<BlockId>,
    events: EventQueue,
    owner_thread: ThreadId,
    /// Observer updates held back while a mutator runs, so the mutation's
    /// change event is queued before any of them is delivered.
    deferred_updates: Option<Vec<(BlockId, BlockUpdate)>>,
    /// Factory-wide id sets the blocks of this graph are registered in.
    live_ids: Vec<LiveIds>,
}

impl BlockGraph {
    /// An empty graph with a fresh workspace id.
    pub fn new() -> Self {
        Self::with_config(&ModelConfig::default())
    }

    pub fn with_config(config: &ModelConfig) -> Self {
        BlockGraph {
            workspace_id: config.workspace_id.clone(),
            blocks: HashMap::new(),
            roots: Vec::new(),
            events: EventQueue::new(config.group_single_events),
            owner_thread: thread::current().id(),
            deferred_updates: None,
            live_ids: Vec::new(),
        }
    }

    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn contains(&self, id: &BlockId) -> bool {
        self.blocks.contains_key(id)
    }

    pub fn block(&self, id: &BlockId) -> Option<&Block> {
        self.blocks.get(id)
    }

    pub fn block_or_err(&self, id: &BlockId) -> Result<&Block, StructureError> {
        self.blocks
            .get(id)
            .ok_or_else(|| StructureError::BlockNotFound(id.to_string()))
    }

    pub(crate) fn block_mut(&mut self, id: &BlockId) -> Result<&mut Block, StructureError> {
        self.blocks
            .get_mut(id)
            .ok_or_else(|| StructureError::BlockNotFound(id.to_string()))
    }

    pub fn blocks(&self) -> impl Iterator<Item = &Block> {
        self.blocks.values()
    }

    /// Adds a freshly built, unattached block.
    pub(crate) fn insert(&mut self, block: Block) {
        self.blocks.insert(block.id().clone(), block);
    }

    /// Keeps `ids` in step with this graph: blocks leaving the graph, or the
    /// graph itself being dropped, release their ids.
    pub(crate) fn share_live_ids(&mut self, ids: &LiveIds) {
        if !self.live_ids.iter().any(|known| known.same_registry(ids)) {
            self.live_ids.push(ids.clone());
        }
    }

    /// Removes blocks without events or lifecycle hooks other than mutator
    /// detach. Used to roll back a failed load.
    pub(crate) fn discard(&mut self, ids: &[BlockId]) {
        for id in ids {
            self.unlink_from_neighbours(id);
        }
        for id in ids {
            self.roots.retain(|r| r != id);
            if let Some(block) = self.blocks.remove(id) {
                self.release(block);
            }
        }
    }

    /// Clears every link between `id` and a block outside of it.
    fn unlink_from_neighbours(&mut self, id: &BlockId) {
        let links: Vec<(ConnectionSlot, Option<ConnectionRef>, Option<ConnectionRef>)> = match self.blocks.get(id) {
            Some(block) => block
                .all_connections()
                .into_iter()
                .map(|(slot, c)| (slot, c.target().cloned(), c.shadow_target().cloned()))
                .collect(),
            None => return,
        };
        for (_, target, shadow) in links {
            for other in target.into_iter().chain(shadow) {
                if let Some(connection) = self
                    .blocks
                    .get_mut(&other.block)
                    .and_then(|b| b.connection_mut(&other.slot))
                {
                    if connection.target().map(|t| &t.block) == Some(id) {
                        connection.set_target(None);
                    }
                }
            }
        }
        // Parents still pointing at this block.
        let owners: Vec<ConnectionRef> = self
            .blocks
            .values()
            .flat_map(|b| {
                b.all_connections()
                    .into_iter()
                    .filter(|(_, c)| c.target_block() == Some(id) || c.shadow_block() == Some(id))
                    .map(move |(slot, _)| ConnectionRef::new(b.id(), slot))
                    .collect::<Vec<_>>()
            })
            .collect();
        for owner in owners {
            if let Some(connection) = self
                .blocks
                .get_mut(&owner.block)
                .and_then(|b| b.connection_mut(&owner.slot))
            {
                if connection.target_block() == Some(id) {
                    connection.set_target(None);
                }
                if connection.shadow_block() == Some(id) {
                    connection.set_shadow_target(None);
                }
            }
        }
    }

    fn release(&self, mut block: Block) {
        for ids in &self.live_ids {
            ids.release(block.id());
        }
        if let Some(mut mutator) = block.mutator.take() {
            mutator.on_detached(&block);
        }
        tracing::trace!("[GRAPH] released block {}", block.id());
    }

    // ---- roots & traversal -------------------------------------------------

    /// Top-level blocks of the document, in the order they were added.
    pub fn roots(&self) -> &[BlockId] {
        &self.roots
    }

    pub fn is_root(&self, id: &BlockId) -> bool {
        self.roots.contains(id)
    }

    /// Makes an unattached block a top-level block of the document.
    ///
    /// The whole subtree starts being tracked under the graph's workspace id
    /// and a `Create` event describing it is queued.
    pub fn add_root(&mut self, id: &BlockId) -> Result<(), StructureError> {
        if self.is_root(id) {
            return Ok(());
        }
        self.check_can_add_root(id)?;

        let subtree = self.descendants(id, true);
        let xml = serialize::block_to_xml(self, id, true)?.to_xml_string();
        let workspace_id = self.workspace_id.clone();
        for member in &subtree {
            if let Some(block) = self.blocks.get_mut(member) {
                block.event_workspace_id = Some(workspace_id.clone());
            }
        }
        self.roots.push(id.clone());
        let ids = subtree.iter().map(BlockId::to_string).collect();
        self.events.push(BlocklyEvent::create(&workspace_id, id, xml, ids));
        tracing::debug!("[GRAPH] added root {} ({} block(s))", id, subtree.len());
        Ok(())
    }

    /// Fails with the error [`add_root`](Self::add_root) would return,
    /// without changing anything.
    pub(crate) fn check_can_add_root(&self, id: &BlockId) -> Result<(), StructureError> {
        let block = self.block_or_err(id)?;
        if block.upward_connection().and_then(|(_, c)| c.target()).is_some() || self.shadow_owner(id).is_some() {
            return Err(StructureError::NotRoot(id.to_string()));
        }
        if block.is_shadow() {
            return Err(StructureError::IllegalShadowState(format!(
                "shadow block {} cannot be a top-level block",
                id
            )));
        }
        Ok(())
    }

    /// Removes a top-level or unattached block with its whole subtree,
    /// including shadows, detaching every mutator.
    pub fn dispose(&mut self, id: &BlockId) -> Result<(), StructureError> {
        let block = self.block_or_err(id)?;
        if block.upward_connection().and_then(|(_, c)| c.target()).is_some() || self.shadow_owner(id).is_some() {
            return Err(StructureError::NotRoot(id.to_string()));
        }
        let subtree = self.descendants(id, true);
        if let Some(workspace_id) = block.event_workspace_id.clone() {
            let xml = serialize::block_to_xml(self, id, true)?.to_xml_string();
            let ids = subtree.iter().map(BlockId::to_string).collect();
            self.events.push(BlocklyEvent::delete(&workspace_id, id, xml, ids));
        }
        self.roots.retain(|r| r != id);
        for member in &subtree {
            if let Some(block) = self.blocks.remove(member) {
                self.release(block);
            }
        }
        tracing::debug!("[GRAPH] disposed {} ({} block(s))", id, subtree.len());
        Ok(())
    }

    /// The block holding this block's output or previous connection target.
    pub fn parent_block(&self, id: &BlockId) -> Option<&BlockId> {
        let (_, upward) = self.blocks.get(id)?.upward_connection()?;
        upward.target_block()
    }

    /// The top of the tree containing `id`. Stops at a cycle.
    pub fn root_block(&self, id: &BlockId) -> Option<&BlockId> {
        let mut current = &self.blocks.get(id)?.id;
        let mut visited = HashSet::new();
        while visited.insert(current) {
            match self.parent_block(current) {
                Some(parent) => current = parent,
                None => break,
            }
        }
        Some(current)
    }

    /// Blocks directly below `id`: value and statement children, then next.
    ///
    /// A live shadow counts as a child only when `include_shadows` is set; a
    /// hidden shadow behind a live child is listed too in that case.
    pub fn child_blocks(&self, id: &BlockId, include_shadows: bool) -> Vec<BlockId> {
        let block = match self.blocks.get(id) {
            Some(block) => block,
            None => return Vec::new(),
        };
        let mut children = Vec::new();
        let downward = block
            .inputs()
            .iter()
            .filter_map(|i| i.connection())
            .chain(block.next_connection());
        for connection in downward {
            let shadow = connection.shadow_block();
            if let Some(target) = connection.target_block() {
                if include_shadows || Some(target) != shadow {
                    children.push(target.clone());
                }
            }
            if let Some(shadow) = shadow {
                if include_shadows && connection.target_block() != Some(shadow) {
                    children.push(shadow.clone());
                }
            }
        }
        children
    }

    /// `id` and every block below it, depth first.
    pub fn descendants(&self, id: &BlockId, include_shadows: bool) -> Vec<BlockId> {
        let mut out = Vec::new();
        if !self.blocks.contains_key(id) {
            return out;
        }
        let mut visited = HashSet::new();
        let mut stack = vec![id.clone()];
        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            let children = self.child_blocks(&current, include_shadows);
            out.push(current);
            stack.extend(children.into_iter().rev());
        }
        out
    }

    /// Follows live next connections to the end of the statement sequence.
    pub fn last_block_in_sequence(&self, id: &BlockId) -> Option<&BlockId> {
        let mut current = &self.blocks.get(id)?.id;
        let mut visited = HashSet::new();
        while visited.insert(current) {
            match self
                .blocks
                .get(current)
                .and_then(|b| b.next_connection())
                .and_then(|c| c.target_block())
            {
                Some(next) => current = next,
                None => break,
            }
        }
        Some(current)
    }

    /// The slot holding `id` as a shadow, whether or not it is live.
    pub fn shadow_owner(&self, id: &BlockId) -> Option<ConnectionRef> {
        self.blocks.values().find_map(|block| {
            block
                .all_connections()
                .into_iter()
                .find(|(_, c)| c.shadow_block() == Some(id))
                .map(|(slot, _)| ConnectionRef::new(block.id(), slot))
        })
    }

    /// Parent id, parent input name and, for unparented blocks, position.
    pub fn location_of(&self, id: &BlockId) -> (Option<String>, Option<String>, Option<WorkspacePoint>) {
        let block = match self.blocks.get(id) {
            Some(block) => block,
            None => return (None, None, None),
        };
        match block.upward_connection().and_then(|(_, c)| c.target()) {
            Some(target) => {
                let input = match &target.slot {
                    ConnectionSlot::Input(name) => Some(name.clone()),
                    _ => None,
                };
                (Some(target.block.to_string()), input, None)
            }
            None => (None, None, Some(block.position())),
        }
    }

    fn is_ancestor_or_self(&self, candidate: &BlockId, of: &BlockId) -> bool {
        let mut current = of;
        let mut visited = HashSet::new();
        loop {
            if current == candidate {
                return true;
            }
            if !visited.insert(current) {
                return false;
            }
            match self.parent_block(current) {
                Some(parent) => current = parent,
                None => return false,
            }
        }
    }

    // ---- observers & events ------------------------------------------------

    pub fn register_observer(
        &mut self,
        id: &BlockId,
        observer: Arc<dyn BlockObserver>,
    ) -> Result<ObserverId, StructureError> {
        Ok(self.block_mut(id)?.observers.register(observer))
    }

    pub fn unregister_observer(&mut self, id: &BlockId, observer: ObserverId) -> Result<bool, StructureError> {
        Ok(self.block_mut(id)?.observers.unregister(observer))
    }

    fn notify(&mut self, id: &BlockId, update: BlockUpdate) {
        match self.deferred_updates.as_mut() {
            Some(held) => held.push((id.clone(), update)),
            None => self.deliver(id, update),
        }
    }

    fn deliver(&self, id: &BlockId, update: BlockUpdate) {
        if let Some(block) = self.blocks.get(id) {
            for observer in block.observers.snapshot() {
                observer.on_block_updated(self, id, update);
            }
        }
    }

    fn tracking_id(&self, id: &BlockId) -> Option<String> {
        self.blocks.get(id).and_then(|b| b.event_workspace_id.clone())
    }

    pub fn add_event_listener(&mut self, listener: Arc<dyn EventListener>) -> ObserverId {
        self.events.add_listener(listener)
    }

    pub fn remove_event_listener(&mut self, id: ObserverId) -> bool {
        self.events.remove_listener(id)
    }

    /// Events queued since the last flush, oldest first.
    pub fn pending_events(&self) -> &[BlocklyEvent] {
        self.events.pending()
    }

    /// Queues an editor interaction event.
    pub fn fire_ui_event(
        &mut self,
        block: Option<&BlockId>,
        element: UiElement,
        old_value: Option<String>,
        new_value: Option<String>,
    ) {
        let event = BlocklyEvent::ui(&self.workspace_id, block, element, old_value, new_value);
        self.events.push(event);
    }

    /// Runs `operation` as one event group.
    ///
    /// Scopes nest; when the outermost one ends, everything queued is stamped
    /// with a single fresh group id and delivered to listeners.
    pub fn group_events<R>(&mut self, operation: impl FnOnce(&mut BlockGraph) -> R) -> R {
        self.events.begin_group();
        let result = operation(self);
        if self.events.end_group() {
            self.events.flush(true);
        }
        result
    }

    /// Delivers pending events outside of a group scope and returns them.
    pub fn flush_events(&mut self) -> Vec<BlocklyEvent> {
        self.events.flush(false)
    }
}

impl Drop for BlockGraph {
    fn drop(&mut self) {
        for ids in &self.live_ids {
            for id in self.blocks.keys() {
                ids.release(id);
            }
        }
    }
}

impl Default for BlockGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BlockGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockGraph")
            .field("workspace_id", &self.workspace_id)
            .field("blocks", &self.blocks.len())
            .field("roots", &self.roots)
            .field("pending_events", &self.events.pending().len())
            .finish()
    }
}
