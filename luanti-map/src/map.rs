//! The server side map: resident blocks, the database behind them and every edit made to them.

mod cursor;
mod edit_event;

use std::{
    cmp::Reverse,
    collections::{BTreeMap, BTreeSet},
    iter, mem,
    sync::Arc,
    time::{Duration, Instant},
};

use log::{debug, info, trace, warn};
use luanti_core::{MapBlockNodes, MapBlockPos, MapNode, MapNodePos};
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

pub(crate) use cursor::BlockCursor;
pub use edit_event::{MapEditEvent, MapEditEventKind};

use crate::{
    block_store::{BlockHandle, BlockStore},
    error::{MapError, MapResult},
    lighting::{self, LIGHTING_COMPLETE},
    liquid::{self, LiquidQueue},
    map_block::{
        MapBlock, ModifiedState, NodeMetadata, NodeTimer, SER_FMT_VER_HIGHEST_WRITE,
        SerializationTarget, deserialize_block, serialize_block,
    },
    node_def::NodeDefManager,
    settings::{MAX_MAP_GENERATION_LIMIT, MapSettings},
    storage::MapDatabaseAccessor,
};

/// How [`ServerMap::set_node`] treats positions in non-resident blocks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail with [`MapError::BlockNotLoaded`]
    ExistingOnly,
    /// Create a blank placeholder block
    CreateBlank,
}

/// Outcome of a save pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SaveReport {
    /// Blocks written and marked clean
    pub saved: usize,
    /// Blocks which could not be written; they stay modified
    pub failed: usize,
    /// Blocks left for a later pass because the deadline passed
    pub remaining: usize,
}

/// The map as seen by the server.
///
/// All methods take `&self`; the map is meant to be shared between threads in an `Arc`.
pub struct ServerMap {
    node_defs: Arc<NodeDefManager>,
    settings: MapSettings,
    blocks: BlockStore,
    database: Mutex<MapDatabaseAccessor>,
    events: UnboundedSender<MapEditEvent>,
    lighting_queue: Mutex<BTreeSet<MapBlockPos>>,
    liquids: Mutex<LiquidQueue>,
}

impl ServerMap {
    /// Creates an empty map on top of the given database.
    ///
    /// Edit events are delivered through the returned receiver.
    #[must_use]
    pub fn new(
        node_defs: Arc<NodeDefManager>,
        settings: MapSettings,
        database: MapDatabaseAccessor,
    ) -> (Self, UnboundedReceiver<MapEditEvent>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let map = Self {
            node_defs,
            settings,
            blocks: BlockStore::new(),
            database: Mutex::new(database),
            events,
            lighting_queue: Mutex::new(BTreeSet::new()),
            liquids: Mutex::new(LiquidQueue::default()),
        };
        (map, receiver)
    }

    /// The content table all blocks of this map refer to
    #[must_use]
    pub fn node_defs(&self) -> &Arc<NodeDefManager> {
        &self.node_defs
    }

    /// The settings this map was created with
    #[must_use]
    pub fn settings(&self) -> &MapSettings {
        &self.settings
    }

    /// The resident blocks
    #[must_use]
    pub fn blocks(&self) -> &BlockStore {
        &self.blocks
    }

    /// Whether a node lies within the largest map Luanti supports.
    #[must_use]
    pub fn is_valid_position(&self, pos: MapNodePos) -> bool {
        let limit = MAX_MAP_GENERATION_LIMIT >> MapBlockPos::SIZE_BITS;
        pos.block_pos().vec().abs().max_element() <= limit
    }

    /// Whether a block lies beyond the configured generation limit.
    #[must_use]
    pub fn blockpos_over_limit(&self, pos: MapBlockPos) -> bool {
        let limit =
            self.settings.mapgen_limit.clamp(0, MAX_MAP_GENERATION_LIMIT) >> MapBlockPos::SIZE_BITS;
        pos.vec().abs().max_element() > limit
    }

    fn check_position(&self, pos: MapNodePos) -> MapResult<()> {
        if self.is_valid_position(pos) {
            Ok(())
        } else {
            Err(MapError::InvalidPosition(pos))
        }
    }

    fn dispatch(&self, event: MapEditEvent) {
        if self.events.send(event).is_err() {
            trace!("nobody is listening to map edits");
        }
    }

    /// Reads a node, `IGNORE` if it lies outside of the map or its block is not resident.
    #[must_use]
    pub fn get_node(&self, pos: MapNodePos) -> MapNode {
        if !self.is_valid_position(pos) {
            return MapNode::IGNORE;
        }
        let (block_pos, index) = pos.split_index();
        self.blocks
            .get(block_pos)
            .map_or(MapNode::IGNORE, |handle| handle.lock().node(index))
    }

    /// Reads a node, loading its block from the database if necessary.
    ///
    /// # Errors
    ///
    /// Fails for invalid positions, database errors or corrupt blocks. A block missing from the
    /// database yields `IGNORE`.
    pub fn get_node_or_load(&self, pos: MapNodePos) -> MapResult<MapNode> {
        self.check_position(pos)?;
        let (block_pos, index) = pos.split_index();
        Ok(self
            .emerge_block(block_pos, false)?
            .map_or(MapNode::IGNORE, |handle| handle.lock().node(index)))
    }

    /// Writes a node without updating light, liquids or metadata and without an edit event.
    ///
    /// # Errors
    ///
    /// Fails for invalid positions and, with [`WriteMode::ExistingOnly`], for non-resident blocks.
    pub fn set_node(&self, pos: MapNodePos, node: MapNode, mode: WriteMode) -> MapResult<()> {
        self.check_position(pos)?;
        let (block_pos, index) = pos.split_index();
        let handle = match mode {
            WriteMode::ExistingOnly => self
                .blocks
                .get(block_pos)
                .ok_or(MapError::BlockNotLoaded(block_pos))?,
            WriteMode::CreateBlank => self.blocks.get_or_create_blank(block_pos),
        };
        handle.lock().set_node(index, node);
        Ok(())
    }

    /// Places a node and updates everything depending on it.
    ///
    /// Light is recomputed around the node and the liquids nearby are queued. Returns every block
    /// whose contents changed.
    ///
    /// # Errors
    ///
    /// Fails for invalid positions and non-resident blocks.
    pub fn add_node_and_update(
        &self,
        pos: MapNodePos,
        node: MapNode,
        remove_metadata: bool,
    ) -> MapResult<BTreeSet<MapBlockPos>> {
        self.check_position(pos)?;
        let (block_pos, index) = pos.split_index();
        let mut node = node;
        if self.node_defs.node(node).stores_light() {
            node.param1 = 0;
        }

        let mut cursor = BlockCursor::new(&self.blocks);
        let old_node = {
            let block = cursor
                .block(block_pos)
                .ok_or(MapError::BlockNotLoaded(block_pos))?;
            let old_node = block.node(index);
            if remove_metadata {
                block.remove_metadata(index);
                block.remove_node_timer(index);
            }
            block.set_node(index, node);
            old_node
        };
        cursor.mark_modified(block_pos);

        lighting::update_lighting_nodes(&mut cursor, &self.node_defs, &[(pos, old_node)]);

        let flowing: Vec<MapNodePos> = iter::once(pos)
            .chain(pos.neighbors().map(|(_, neighbor)| neighbor))
            .filter(|&candidate| {
                liquid::is_flow_candidate(cursor.node(candidate), &self.node_defs)
            })
            .collect();
        let modified = cursor.into_modified();

        let mut liquids = self.liquids.lock();
        for candidate in flowing {
            liquids.push(candidate);
        }
        Ok(modified)
    }

    /// Places a node like [`Self::add_node_and_update`] and reports the edit.
    ///
    /// # Errors
    ///
    /// Fails for invalid positions and non-resident blocks.
    pub fn add_node_with_event(
        &self,
        pos: MapNodePos,
        node: MapNode,
        remove_metadata: bool,
    ) -> MapResult<()> {
        let modified = self.add_node_and_update(pos, node, remove_metadata)?;
        let kind = if remove_metadata {
            MapEditEventKind::AddNode
        } else {
            MapEditEventKind::SwapNode
        };
        self.dispatch(MapEditEvent::node_event(kind, pos, node, modified));
        Ok(())
    }

    /// Replaces a node but keeps its metadata.
    ///
    /// # Errors
    ///
    /// Fails for invalid positions and non-resident blocks.
    pub fn swap_node(&self, pos: MapNodePos, node: MapNode) -> MapResult<()> {
        self.add_node_with_event(pos, node, false)
    }

    /// Replaces a node with air, dropping its metadata.
    ///
    /// # Errors
    ///
    /// Fails for invalid positions and non-resident blocks.
    pub fn remove_node_and_update(&self, pos: MapNodePos) -> MapResult<BTreeSet<MapBlockPos>> {
        self.add_node_and_update(pos, MapNode::AIR, true)
    }

    /// Removes a node like [`Self::remove_node_and_update`] and reports the edit.
    ///
    /// # Errors
    ///
    /// Fails for invalid positions and non-resident blocks.
    pub fn remove_node_with_event(&self, pos: MapNodePos) -> MapResult<()> {
        let modified = self.remove_node_and_update(pos)?;
        self.dispatch(MapEditEvent::node_event(
            MapEditEventKind::RemoveNode,
            pos,
            MapNode::AIR,
            modified,
        ));
        Ok(())
    }

    /// The metadata of a node in a resident block
    #[must_use]
    pub fn get_node_metadata(&self, pos: MapNodePos) -> Option<NodeMetadata> {
        let (block_pos, index) = pos.split_index();
        let handle = self.blocks.get(block_pos)?;
        let block = handle.lock();
        block.metadata(index).cloned()
    }

    /// Attaches metadata to a node, loading its block if necessary.
    ///
    /// Empty metadata removes the node's metadata.
    ///
    /// # Errors
    ///
    /// Fails for invalid positions and blocks that neither are resident nor stored.
    pub fn set_node_metadata(&self, pos: MapNodePos, metadata: NodeMetadata) -> MapResult<()> {
        self.check_position(pos)?;
        let (block_pos, index) = pos.split_index();
        let handle = self
            .emerge_block(block_pos, false)?
            .ok_or(MapError::BlockNotLoaded(block_pos))?;
        let is_private_change = {
            let mut block = handle.lock();
            let before = block.metadata(index).map(public_part).unwrap_or_default();
            let after = public_part(&metadata);
            block.set_metadata(index, metadata);
            before == after
        };
        self.dispatch(MapEditEvent::metadata_changed(pos, is_private_change));
        Ok(())
    }

    /// Removes the metadata of a node in a resident block and returns it.
    ///
    /// # Errors
    ///
    /// Fails for invalid positions and non-resident blocks.
    pub fn remove_node_metadata(&self, pos: MapNodePos) -> MapResult<Option<NodeMetadata>> {
        self.check_position(pos)?;
        let (block_pos, index) = pos.split_index();
        let handle = self
            .blocks
            .get(block_pos)
            .ok_or(MapError::BlockNotLoaded(block_pos))?;
        let removed = handle.lock().remove_metadata(index);
        if let Some(removed) = &removed {
            let is_private_change = public_part(removed) == PublicMetadata::default();
            self.dispatch(MapEditEvent::metadata_changed(pos, is_private_change));
        }
        Ok(removed)
    }

    /// Positions of all nodes with metadata in the (inclusive) box, as far as resident.
    ///
    /// # Errors
    ///
    /// Fails if `min` exceeds `max` on any axis.
    pub fn find_nodes_with_metadata(
        &self,
        min: MapNodePos,
        max: MapNodePos,
    ) -> MapResult<Vec<MapNodePos>> {
        check_area(min, max)?;
        let mut found = Vec::new();
        for block_pos in MapBlockPos::iter_area(min.block_pos(), max.block_pos()) {
            let Some(handle) = self.blocks.get(block_pos) else {
                continue;
            };
            let block = handle.lock();
            found.extend(
                block
                    .metadata_iter()
                    .map(|(index, _)| block_pos.node_pos(index))
                    .filter(|pos| pos.0.cmpge(min.0).all() && pos.0.cmple(max.0).all()),
            );
        }
        Ok(found)
    }

    /// The timer of a node in a resident block
    #[must_use]
    pub fn get_node_timer(&self, pos: MapNodePos) -> Option<NodeTimer> {
        let (block_pos, index) = pos.split_index();
        self.blocks
            .get(block_pos)
            .and_then(|handle| handle.lock().get_node_timer(index))
    }

    /// Starts the timer of a node in a resident block.
    ///
    /// # Errors
    ///
    /// Fails for invalid positions and non-resident blocks.
    pub fn set_node_timer(&self, pos: MapNodePos, timer: NodeTimer) -> MapResult<()> {
        self.check_position(pos)?;
        let (block_pos, index) = pos.split_index();
        let handle = self
            .blocks
            .get(block_pos)
            .ok_or(MapError::BlockNotLoaded(block_pos))?;
        handle.lock().set_node_timer(index, timer);
        Ok(())
    }

    /// Stops the timer of a node in a resident block.
    pub fn remove_node_timer(&self, pos: MapNodePos) -> Option<NodeTimer> {
        let (block_pos, index) = pos.split_index();
        self.blocks
            .get(block_pos)
            .and_then(|handle| handle.lock().remove_node_timer(index))
    }

    /// Advances the node timers of all resident blocks and returns the timers which fired.
    pub fn step_node_timers(&self, dtime: f32) -> Vec<(MapNodePos, NodeTimer)> {
        let mut fired = Vec::new();
        self.blocks.for_each_loaded(|handle| {
            let mut block = handle.lock();
            let pos = block.pos();
            fired.extend(
                block
                    .step_node_timers(dtime)
                    .into_iter()
                    .map(|(index, timer)| (pos.node_pos(index), timer)),
            );
        });
        fired
    }

    /// Calls `visit` for every node of the (inclusive) box.
    ///
    /// Nodes of non-resident blocks are reported as `IGNORE`. Each block is copied before its
    /// nodes are visited, so `visit` may access the map.
    ///
    /// # Errors
    ///
    /// Fails if `min` exceeds `max` on any axis.
    pub fn for_each_node_in_area(
        &self,
        min: MapNodePos,
        max: MapNodePos,
        mut visit: impl FnMut(MapNodePos, MapNode),
    ) -> MapResult<()> {
        check_area(min, max)?;
        for block_pos in MapBlockPos::iter_area(min.block_pos(), max.block_pos()) {
            let nodes: Option<Box<MapBlockNodes>> = self
                .blocks
                .get(block_pos)
                .map(|handle| Box::new(handle.lock().nodes().clone()));
            let from = block_pos.min_node().0.max(min.0);
            let to = block_pos.max_node().0.min(max.0);
            for z in from.z..=to.z {
                for y in from.y..=to.y {
                    for x in from.x..=to.x {
                        let pos = MapNodePos::new(x, y, z);
                        let node = nodes
                            .as_ref()
                            .map_or(MapNode::IGNORE, |nodes| nodes[pos.index()]);
                        visit(pos, node);
                    }
                }
            }
        }
        Ok(())
    }

    /// Returns a resident block, loading it from the database if necessary.
    ///
    /// With `create_blank` a blank placeholder is created for blocks missing from the database.
    ///
    /// # Errors
    ///
    /// Fails on database errors and corrupt blocks.
    pub fn emerge_block(
        &self,
        pos: MapBlockPos,
        create_blank: bool,
    ) -> MapResult<Option<BlockHandle>> {
        if let Some(handle) = self.blocks.get(pos) {
            return Ok(Some(handle));
        }
        if let Some(handle) = self.load_block(pos)? {
            return Ok(Some(handle));
        }
        Ok(create_blank.then(|| self.blocks.get_or_create_blank(pos)))
    }

    /// Reads a block from the database and makes it resident.
    ///
    /// A resident block which has not been generated yet is replaced by the stored one; a
    /// generated resident block wins over the database. Returns `None` if the block is not stored.
    ///
    /// # Errors
    ///
    /// Fails on database errors and corrupt blocks.
    pub fn load_block(&self, pos: MapBlockPos) -> MapResult<Option<BlockHandle>> {
        let data = self
            .database
            .lock()
            .load_block(pos)
            .map_err(MapError::Backend)?;
        let Some(data) = data else {
            return Ok(None);
        };
        let block = deserialize_block(pos, &data, SerializationTarget::Disk, &self.node_defs)
            .map_err(|source| MapError::Deserialize { pos, source })?;
        let needs_light = block.generated() && block.lighting_complete != LIGHTING_COMPLETE;

        let handle = self.blocks.get_or_create_blank(pos);
        {
            let mut resident = handle.lock();
            if resident.generated() {
                debug!("block {pos} became resident while it was loaded");
            } else {
                *resident = block;
                trace!("loaded block {pos}");
            }
        }
        if needs_light {
            self.queue_lighting([pos]);
        }
        Ok(Some(handle))
    }

    fn serialize_for_disk(&self, block: &MapBlock) -> MapResult<Vec<u8>> {
        serialize_block(
            block,
            SER_FMT_VER_HIGHEST_WRITE,
            SerializationTarget::Disk,
            &self.node_defs,
            self.settings.compression_level_disk,
        )
        .map_err(|source| MapError::Serialize {
            pos: block.pos(),
            source,
        })
    }

    /// Writes a single resident block to the database.
    ///
    /// Returns `false` if the block is not resident.
    ///
    /// # Errors
    ///
    /// Fails if the block cannot be serialized or written; it stays modified then.
    pub fn save_block(&self, pos: MapBlockPos) -> MapResult<bool> {
        let Some(handle) = self.blocks.get(pos) else {
            return Ok(false);
        };
        let (data, revision) = {
            let block = handle.lock();
            (self.serialize_for_disk(&block)?, block.revision())
        };
        self.database
            .lock()
            .primary()
            .save_block(pos, &data)
            .map_err(MapError::Backend)?;
        let mut block = handle.lock();
        if block.revision() == revision {
            block.reset_modified();
        }
        Ok(true)
    }

    /// Writes every block whose modified state reaches `level` in one batch.
    ///
    /// Blocks are marked clean only after the batch has been committed and only if they did not
    /// change in the meantime. The pass stops early once `deadline` has passed.
    pub fn save(&self, level: ModifiedState, deadline: Option<Instant>) -> SaveReport {
        let level = level.max(ModifiedState::WriteAtUnload);
        let mut handles = Vec::new();
        self.blocks.for_each_loaded(|handle| handles.push(handle.clone()));
        handles.sort_by_key(BlockHandle::pos);

        let mut report = SaveReport::default();
        let mut written = Vec::new();
        let mut database = self.database.lock();
        if let Err(error) = database.primary().begin_save() {
            warn!("could not start saving the map: {error:#}");
        }
        for handle in handles {
            let encoded = {
                let block = handle.lock();
                if block.modified() < level {
                    continue;
                }
                if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                    report.remaining += 1;
                    continue;
                }
                self.serialize_for_disk(&block)
                    .map(|data| (data, block.revision()))
            };
            let result = encoded.and_then(|(data, revision)| {
                database
                    .primary()
                    .save_block(handle.pos(), &data)
                    .map_err(MapError::Backend)?;
                Ok(revision)
            });
            match result {
                Ok(revision) => written.push((handle, revision)),
                Err(error) => {
                    warn!("could not save block {}: {error}", handle.pos());
                    report.failed += 1;
                }
            }
        }
        let committed = match database.primary().end_save() {
            Ok(()) => true,
            Err(error) => {
                warn!("could not commit the map: {error:#}");
                false
            }
        };
        drop(database);

        if committed {
            for (handle, revision) in written {
                let mut block = handle.lock();
                if block.revision() == revision {
                    block.reset_modified();
                }
                report.saved += 1;
            }
        } else {
            report.failed += written.len();
        }

        if report.saved > 0 || report.failed > 0 {
            info!(
                "saved {} blocks ({} failed, {} left)",
                report.saved, report.failed, report.remaining
            );
        }
        report
    }

    /// Removes a block from memory and from the database.
    ///
    /// Returns whether the database contained it.
    ///
    /// # Errors
    ///
    /// Fails on database errors.
    pub fn delete_block(&self, pos: MapBlockPos) -> MapResult<bool> {
        if let Some(handle) = self.blocks.get(pos) {
            self.blocks.erase(&handle);
        }
        self.database
            .lock()
            .primary()
            .delete_block(pos)
            .map_err(MapError::Backend)
    }

    /// Every block stored in the database(s).
    ///
    /// # Errors
    ///
    /// Fails on database errors.
    pub fn list_all_loadable_blocks(&self) -> MapResult<Vec<MapBlockPos>> {
        self.database
            .lock()
            .list_all_loadable_blocks()
            .map_err(MapError::Backend)
    }

    /// Positions of all resident blocks, sorted.
    #[must_use]
    pub fn list_all_loaded_blocks(&self) -> Vec<MapBlockPos> {
        self.blocks.positions()
    }

    /// Advances the usage timers of all blocks and unloads the unused ones.
    ///
    /// Blocks referenced from elsewhere are never unloaded. Of the others, every block unused for
    /// longer than `unload_timeout` seconds goes, and if more than `max_loaded_blocks` blocks are
    /// resident (zero meaning unlimited) the longest unused ones go as well. Modified blocks are
    /// saved first and stay if that fails. Returns the unloaded positions.
    pub fn timer_update(
        &self,
        dtime: f32,
        unload_timeout: f32,
        max_loaded_blocks: usize,
    ) -> Vec<MapBlockPos> {
        let mut resident = 0_usize;
        let mut candidates = Vec::new();
        self.blocks.for_each_loaded(|handle| {
            resident += 1;
            let Some(mut block) = handle.try_lock() else {
                return;
            };
            block.increment_usage_timer(dtime);
            // the store and the snapshot of the iteration
            if handle.other_references() <= 1 {
                candidates.push((block.usage_timer(), handle.clone()));
            }
        });
        candidates.sort_by(|(left, _), (right, _)| right.total_cmp(left));

        let mut excess = if max_loaded_blocks > 0 {
            resident.saturating_sub(max_loaded_blocks)
        } else {
            0
        };
        let mut unloaded = Vec::new();
        for (usage_timer, handle) in candidates {
            if excess == 0 && usage_timer <= unload_timeout {
                break;
            }
            if self.unload_block(&handle) {
                unloaded.push(handle.pos());
                excess = excess.saturating_sub(1);
            }
        }
        let released = self.blocks.reclaim();

        if !unloaded.is_empty() {
            info!(
                "unloaded {} blocks ({released} released), {} still resident",
                unloaded.len(),
                self.blocks.len()
            );
        }
        unloaded.sort_unstable();
        unloaded
    }

    /// Unloads every block not referenced from elsewhere.
    pub fn unload_unused_data(&self) -> Vec<MapBlockPos> {
        self.timer_update(0.0, -1.0, 0)
    }

    fn unload_block(&self, handle: &BlockHandle) -> bool {
        let pos = handle.pos();
        let encoded = {
            let Some(block) = handle.try_lock() else {
                return false;
            };
            (block.modified() != ModifiedState::Clean)
                .then(|| self.serialize_for_disk(&block).map(|data| (data, block.revision())))
        };
        let saved_revision = match encoded {
            None => None,
            Some(Ok((data, revision))) => {
                if let Err(error) = self.database.lock().primary().save_block(pos, &data) {
                    warn!("keeping block {pos} which could not be saved: {error:#}");
                    return false;
                }
                Some(revision)
            }
            Some(Err(error)) => {
                warn!("keeping block {pos}: {error}");
                return false;
            }
        };

        let mut block = handle.lock();
        if let Some(revision) = saved_revision {
            if block.revision() != revision {
                trace!("block {pos} changed while it was saved");
                return false;
            }
            block.reset_modified();
        } else if block.modified() != ModifiedState::Clean {
            return false;
        }
        // someone may have picked the block up since it was found unused
        self.blocks.erase_unused(handle)
    }

    /// Relights the given blocks, topmost first.
    ///
    /// Processed blocks are removed from `worklist`; at least one block is processed even if
    /// `budget` is zero. Returns the number of blocks left.
    pub fn update_lighting(
        &self,
        worklist: &mut BTreeSet<MapBlockPos>,
        budget: Option<Duration>,
    ) -> usize {
        let deadline = budget.map(|budget| Instant::now() + budget);
        let mut order: Vec<MapBlockPos> = worklist.iter().copied().collect();
        // sunlight enters from above
        order.sort_by_key(|pos| Reverse(pos.vec().y));

        let mut cursor = BlockCursor::new(&self.blocks);
        for pos in order {
            worklist.remove(&pos);
            lighting::relight_block(&mut cursor, &self.node_defs, pos);
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                break;
            }
        }
        let modified = cursor.into_modified();
        if !modified.is_empty() {
            self.dispatch(MapEditEvent::other(modified));
        }
        worklist.len()
    }

    /// Queues blocks for [`Self::update_queued_lighting`].
    pub fn queue_lighting(&self, blocks: impl IntoIterator<Item = MapBlockPos>) {
        self.lighting_queue.lock().extend(blocks);
    }

    /// Relights queued blocks within the configured time budget.
    ///
    /// Returns the number of blocks still queued.
    pub fn update_queued_lighting(&self) -> usize {
        let mut worklist = mem::take(&mut *self.lighting_queue.lock());
        self.update_lighting(&mut worklist, Some(self.settings.time_budget_lighting));
        let mut queue = self.lighting_queue.lock();
        queue.extend(worklist);
        queue.len()
    }

    /// Recomputes the light of a single block, loading it if necessary.
    ///
    /// # Errors
    ///
    /// Fails if the block neither is resident nor stored, or cannot be loaded.
    pub fn repair_block_light(&self, pos: MapBlockPos) -> MapResult<()> {
        self.emerge_block(pos, false)?
            .ok_or(MapError::BlockNotLoaded(pos))?;
        self.update_lighting(&mut BTreeSet::from([pos]), None);
        Ok(())
    }

    /// Whether a resident block looks different at day and at night.
    #[must_use]
    pub fn day_night_differs(&self, pos: MapBlockPos) -> bool {
        self.blocks
            .get(pos)
            .is_some_and(|handle| handle.lock().day_night_differs(&self.node_defs))
    }

    /// Queues a node for the liquid engine.
    pub fn transforming_liquid_add(&self, pos: MapNodePos) {
        self.liquids.lock().push(pos);
    }

    /// Number of nodes queued for the liquid engine
    #[must_use]
    pub fn transforming_liquid_size(&self) -> usize {
        self.liquids.lock().len()
    }

    /// Runs one pass of the liquid engine.
    ///
    /// Only nodes queued before the pass started are processed, at most `liquid_loop_max` of
    /// them, and the pass ends early once `budget` is used up. Returns the blocks changed; they
    /// are also reported as one edit event.
    pub fn transform_liquids(&self, budget: Option<Duration>) -> BTreeSet<MapBlockPos> {
        let started = Instant::now();
        let deadline = budget.map(|budget| started + budget);
        let (batch, len_before) = {
            let mut queue = self.liquids.lock();
            let len_before = queue.len();
            let count = len_before.min(self.settings.liquid_loop_max);
            let batch: Vec<MapNodePos> = iter::from_fn(|| queue.pop()).take(count).collect();
            (batch, len_before)
        };

        let mut cursor = BlockCursor::new(&self.blocks);
        let mut requeue = Vec::new();
        let mut unprocessed = Vec::new();
        let mut changed = 0_usize;
        let mut batch = batch.into_iter();
        for pos in batch.by_ref() {
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                unprocessed.push(pos);
                break;
            }
            let Some(new_node) = liquid::transform_node(&mut cursor, &self.node_defs, pos) else {
                continue;
            };
            let old_node = cursor.node(pos);
            cursor.set_node(pos, new_node);
            lighting::update_lighting_nodes(&mut cursor, &self.node_defs, &[(pos, old_node)]);
            changed += 1;
            requeue.extend(
                pos.neighbors()
                    .map(|(_, neighbor)| neighbor)
                    .filter(|&neighbor| {
                        liquid::is_flow_candidate(cursor.node(neighbor), &self.node_defs)
                    }),
            );
        }
        unprocessed.extend(batch);
        let modified = cursor.into_modified();

        {
            let mut queue = self.liquids.lock();
            for pos in unprocessed.into_iter().chain(requeue) {
                queue.push(pos);
            }
            let purge_time = Duration::try_from_secs_f32(self.settings.liquid_queue_purge_time)
                .unwrap_or_default();
            let purged = queue.purge_if_growing(len_before, purge_time, Instant::now());
            if purged > 0 {
                warn!("liquid queue kept growing, dropped {purged} queued nodes");
            }
        }

        if changed > 0 {
            trace!(
                "liquid pass changed {changed} nodes in {:?}",
                started.elapsed()
            );
        }
        if !modified.is_empty() {
            self.dispatch(MapEditEvent::other(modified.clone()));
        }
        modified
    }

    /// Serializes a resident, generated block for a client.
    ///
    /// Returns the data together with the revision it reflects, or `None` if the block is not
    /// available.
    ///
    /// # Errors
    ///
    /// Fails if the block cannot be serialized for the requested version.
    pub fn serialize_block_for_send(
        &self,
        pos: MapBlockPos,
        version: u8,
    ) -> MapResult<Option<(Vec<u8>, u64)>> {
        let Some(handle) = self.blocks.get(pos) else {
            return Ok(None);
        };
        let block = handle.lock();
        if !block.generated() {
            return Ok(None);
        }
        let data = serialize_block(
            &block,
            version,
            SerializationTarget::Network,
            &self.node_defs,
            self.settings.compression_level_net,
        )
        .map_err(|source| MapError::Serialize { pos, source })?;
        Ok(Some((data, block.revision())))
    }
}

/// What clients can see of node metadata
type PublicMetadata = (BTreeMap<String, Vec<u8>>, Vec<u8>);

fn public_part(metadata: &NodeMetadata) -> PublicMetadata {
    let vars = metadata
        .vars
        .iter()
        .filter(|(_, var)| !var.private)
        .map(|(name, var)| (name.clone(), var.value.clone()))
        .collect();
    (vars, metadata.inventory.clone())
}

fn check_area(min: MapNodePos, max: MapNodePos) -> MapResult<()> {
    if min.0.cmple(max.0).all() {
        Ok(())
    } else {
        Err(MapError::InvalidArea { min, max })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        map_block::StringVar,
        storage::{MapDatabase, MemoryDatabase},
        test_util::{content, fill_blocks, memory_map},
    };
    use glam::I16Vec3;
    use luanti_core::{ContentId, LightBank};

    fn block_pos(x: i16, y: i16, z: i16) -> MapBlockPos {
        MapBlockPos::new(I16Vec3::new(x, y, z)).unwrap()
    }

    fn map_with_database(
        database: &MemoryDatabase,
    ) -> (ServerMap, UnboundedReceiver<MapEditEvent>) {
        let content = content();
        ServerMap::new(
            Arc::clone(&content.node_defs),
            MapSettings::default(),
            MapDatabaseAccessor::new(Box::new(database.clone())),
        )
    }

    #[test]
    fn unloaded_nodes_read_as_ignore() {
        let content = content();
        let (map, _events) = memory_map(&content);
        let pos = MapNodePos::new(3, -40, 17);
        assert_eq!(map.get_node(pos), MapNode::IGNORE);
        assert_eq!(map.get_node_or_load(pos).unwrap(), MapNode::IGNORE);
        assert!(matches!(
            map.set_node(pos, MapNode::AIR, WriteMode::ExistingOnly),
            Err(MapError::BlockNotLoaded(_))
        ));
        map.set_node(pos, MapNode::AIR, WriteMode::CreateBlank)
            .unwrap();
        assert_eq!(map.get_node(pos), MapNode::AIR);
    }

    #[test]
    fn positions_beyond_the_limit_are_rejected() {
        let content = content();
        let (map, _events) = memory_map(&content);
        let outside = MapNodePos::new(31_100, 0, 0);
        assert!(!map.is_valid_position(outside));
        assert!(map.is_valid_position(MapNodePos::new(31_007, 0, -30_990)));
        assert!(!map.is_valid_position(MapNodePos::new(0, -31_007, 0)));
        assert_eq!(map.get_node(outside), MapNode::IGNORE);
        assert!(matches!(
            map.add_node_and_update(outside, MapNode::AIR, true),
            Err(MapError::InvalidPosition(_))
        ));
        assert!(map.blockpos_over_limit(block_pos(1_938, 0, 0)));
        assert!(!map.blockpos_over_limit(block_pos(-1_937, 0, 0)));
    }

    #[test]
    fn edits_produce_events() {
        let content = content();
        let (map, mut events) = memory_map(&content);
        let origin = block_pos(0, 0, 0);
        fill_blocks(&map, origin, origin, MapNode::AIR);

        let pos = MapNodePos::new(15, 3, 4);
        let stone = MapNode::new(content.stone);
        map.add_node_with_event(pos, stone, true).unwrap();
        let event = events.try_recv().unwrap();
        assert_eq!(event.kind, MapEditEventKind::AddNode);
        assert_eq!(event.pos, pos);
        assert_eq!(event.node, stone);
        assert!(event.modified_blocks.contains(&origin));

        map.swap_node(pos, MapNode::new(content.dirt)).unwrap();
        assert_eq!(events.try_recv().unwrap().kind, MapEditEventKind::SwapNode);
        map.remove_node_with_event(pos).unwrap();
        let event = events.try_recv().unwrap();
        assert_eq!(event.kind, MapEditEventKind::RemoveNode);
        assert_eq!(map.get_node(pos).content_id, ContentId::AIR);
    }

    #[test]
    fn private_metadata_changes_affect_no_client() {
        let content = content();
        let (map, mut events) = memory_map(&content);
        let origin = block_pos(0, 0, 0);
        fill_blocks(&map, origin, origin, MapNode::AIR);
        let pos = MapNodePos::new(1, 2, 3);

        let mut metadata = NodeMetadata::default();
        metadata.set_string("infotext", "a chest");
        map.set_node_metadata(pos, metadata.clone()).unwrap();
        let event = events.try_recv().unwrap();
        assert_eq!(event.kind, MapEditEventKind::MetadataChanged);
        assert!(!event.is_private_change);
        assert_eq!(event.affected_blocks().collect::<Vec<_>>(), [origin]);

        metadata.vars.insert(
            "owner".to_owned(),
            StringVar {
                value: b"somebody".to_vec(),
                private: true,
            },
        );
        map.set_node_metadata(pos, metadata.clone()).unwrap();
        let event = events.try_recv().unwrap();
        assert!(event.is_private_change);
        assert_eq!(event.affected_blocks().count(), 0);

        assert_eq!(map.get_node_metadata(pos), Some(metadata.clone()));
        assert_eq!(
            map.find_nodes_with_metadata(MapNodePos::ZERO, MapNodePos::new(15, 15, 15))
                .unwrap(),
            [pos]
        );
        assert!(
            map.find_nodes_with_metadata(MapNodePos::new(2, 0, 0), MapNodePos::new(15, 15, 15))
                .unwrap()
                .is_empty()
        );
        assert!(matches!(
            map.find_nodes_with_metadata(MapNodePos::new(2, 0, 0), MapNodePos::ZERO),
            Err(MapError::InvalidArea { .. })
        ));

        map.add_node_and_update(pos, MapNode::new(content.stone), true)
            .unwrap();
        assert_eq!(map.get_node_metadata(pos), None, "placing a node drops metadata");
    }

    #[test]
    fn area_iteration_covers_unloaded_blocks() {
        let content = content();
        let (map, _events) = memory_map(&content);
        let origin = block_pos(0, 0, 0);
        fill_blocks(&map, origin, origin, MapNode::AIR);

        let mut resident = 0;
        let mut ignored = 0;
        map.for_each_node_in_area(
            MapNodePos::new(14, 0, 0),
            MapNodePos::new(17, 1, 0),
            |pos, node| {
                if node.is_ignore() {
                    assert!(pos.0.x >= 16);
                    ignored += 1;
                } else {
                    resident += 1;
                }
            },
        )
        .unwrap();
        assert_eq!((resident, ignored), (4, 4));
    }

    #[test]
    fn saved_blocks_survive_unloading() {
        let database = MemoryDatabase::default();
        let (map, _events) = map_with_database(&database);
        let content = content();
        let origin = block_pos(0, 0, 0);
        fill_blocks(&map, origin, origin, MapNode::AIR);
        let edits = [
            (MapNodePos::new(5, 5, 5), content.torch),
            (MapNodePos::new(0, 0, 0), content.stone),
            (MapNodePos::new(15, 9, 2), content.dirt),
        ];
        for (index, (pos, content_id)) in edits.into_iter().enumerate() {
            map.add_node_and_update(pos, MapNode::new(content_id), true)
                .unwrap();
            let mut metadata = NodeMetadata::default();
            metadata.set_string("infotext", &format!("node {index}"));
            metadata.vars.insert(
                "owner".into(),
                StringVar {
                    value: b"singleplayer".to_vec(),
                    private: true,
                },
            );
            metadata.inventory = b"List main 1\nWidth 0\nEmpty\nEndInventoryList\n".to_vec();
            map.set_node_metadata(pos, metadata).unwrap();
        }
        let snapshot = |map: &ServerMap| {
            let handle = map.blocks().get(origin).unwrap();
            let block = handle.lock();
            let metadata: Vec<_> = block
                .metadata_iter()
                .map(|(index, meta)| (index, meta.clone()))
                .collect();
            (block.nodes().clone(), metadata)
        };
        let (nodes, metadata) = snapshot(&map);
        assert_eq!(metadata.len(), 3);

        let report = map.save(ModifiedState::WriteNeeded, None);
        assert_eq!(report.saved, 1);
        assert!(database.contains(origin));
        assert_eq!(
            map.blocks().get(origin).unwrap().lock().modified(),
            ModifiedState::Clean
        );

        assert_eq!(map.unload_unused_data(), [origin]);
        assert!(map.blocks().is_empty());
        assert_eq!(map.get_node(edits[0].0), MapNode::IGNORE);

        assert_eq!(map.get_node_or_load(edits[0].0).unwrap().content_id, content.torch);
        let (reloaded_nodes, reloaded_metadata) = snapshot(&map);
        assert!(reloaded_nodes == nodes, "nodes differ after reloading");
        assert_eq!(reloaded_metadata, metadata);
    }

    #[test]
    fn blocks_picked_up_during_unloading_stay() {
        let database = MemoryDatabase::default();
        let (map, _events) = map_with_database(&database);
        let origin = block_pos(0, 0, 0);
        fill_blocks(&map, origin, origin, MapNode::AIR);

        let candidate = map.blocks().get(origin).unwrap();
        let reader = map.blocks().get(origin).unwrap();
        assert!(!map.unload_block(&candidate));
        assert!(map.blocks().get(origin).is_some());
        assert!(database.contains(origin), "the block was saved nevertheless");

        drop(reader);
        assert!(map.unload_block(&candidate));
        assert!(map.blocks().is_empty());
    }

    #[test]
    fn referenced_and_unsaveable_blocks_stay() {
        let database = MemoryDatabase::default();
        let (map, _events) = map_with_database(&database);
        fill_blocks(&map, block_pos(0, 0, 0), block_pos(1, 0, 0), MapNode::AIR);

        let held = map.blocks().get(block_pos(0, 0, 0)).unwrap();
        database.set_fail_writes(true);
        assert!(map.unload_unused_data().is_empty());
        assert_eq!(map.blocks().len(), 2);

        database.set_fail_writes(false);
        assert_eq!(map.unload_unused_data(), [block_pos(1, 0, 0)]);
        drop(held);
        assert_eq!(map.unload_unused_data(), [block_pos(0, 0, 0)]);
        assert_eq!(database.len(), 2);
    }

    #[test]
    fn unloading_respects_timeout_and_limit() {
        let content = content();
        let (map, _events) = memory_map(&content);
        fill_blocks(&map, block_pos(0, 0, 0), block_pos(3, 0, 0), MapNode::AIR);
        assert!(map.timer_update(10.0, 29.0, 0).is_empty());

        // one block was just used, another one has been idle for longer
        map.blocks()
            .get(block_pos(0, 0, 0))
            .unwrap()
            .lock()
            .reset_usage_timer();
        map.blocks()
            .get(block_pos(1, 0, 0))
            .unwrap()
            .lock()
            .increment_usage_timer(5.0);
        assert_eq!(map.timer_update(1.0, 29.0, 3), [block_pos(1, 0, 0)]);
        assert_eq!(map.blocks().len(), 3);

        let unloaded = map.timer_update(20.0, 29.0, 0);
        assert_eq!(unloaded, [block_pos(2, 0, 0), block_pos(3, 0, 0)]);
        assert_eq!(map.list_all_loaded_blocks(), [block_pos(0, 0, 0)]);
    }

    #[test]
    fn failed_commits_keep_blocks_modified() {
        let database = MemoryDatabase::default();
        let (map, _events) = map_with_database(&database);
        let origin = block_pos(0, 0, 0);
        fill_blocks(&map, origin, origin, MapNode::AIR);

        database.set_fail_writes(true);
        let report = map.save(ModifiedState::WriteNeeded, None);
        assert_eq!((report.saved, report.failed), (0, 1));
        assert_eq!(
            map.blocks().get(origin).unwrap().lock().modified(),
            ModifiedState::WriteNeeded
        );

        database.set_fail_writes(false);
        let report = map.save(ModifiedState::WriteNeeded, Some(Instant::now()));
        assert_eq!((report.saved, report.remaining), (0, 1), "the deadline has passed");
        assert_eq!(map.save(ModifiedState::WriteNeeded, None).saved, 1);
    }

    #[test]
    fn corrupt_blocks_are_reported() {
        let database = MemoryDatabase::default();
        let origin = block_pos(0, 0, 0);
        database.put_raw(origin, vec![29, 1, 2, 3]);
        let (map, _events) = map_with_database(&database);
        assert!(matches!(
            map.emerge_block(origin, true),
            Err(MapError::Deserialize { .. })
        ));
        assert!(map.blocks().get(origin).is_none());
    }

    #[test]
    fn deleted_blocks_are_gone() {
        let database = MemoryDatabase::default();
        let (map, _events) = map_with_database(&database);
        let origin = block_pos(0, 0, 0);
        fill_blocks(&map, origin, origin, MapNode::AIR);
        map.save_block(origin).unwrap();
        assert_eq!(map.list_all_loadable_blocks().unwrap(), [origin]);
        assert!(map.delete_block(origin).unwrap());
        assert!(map.blocks().is_empty());
        assert!(map.emerge_block(origin, false).unwrap().is_none());
        let mut database = database;
        assert!(database.load_block(origin).unwrap().is_none());
    }

    #[test]
    fn blocks_are_sent_with_their_revision() {
        let content = content();
        let (map, _events) = memory_map(&content);
        let origin = block_pos(0, 0, 0);
        assert!(map.serialize_block_for_send(origin, 29).unwrap().is_none());
        fill_blocks(&map, origin, origin, MapNode::AIR);

        let (_, first) = map.serialize_block_for_send(origin, 29).unwrap().unwrap();
        let (_, unchanged) = map.serialize_block_for_send(origin, 29).unwrap().unwrap();
        assert_eq!(first, unchanged);
        map.add_node_and_update(MapNodePos::new(1, 1, 1), MapNode::new(content.stone), true)
            .unwrap();
        let (_, changed) = map.serialize_block_for_send(origin, 29).unwrap().unwrap();
        assert_ne!(first, changed);
    }

    #[test]
    fn water_survives_a_restart() {
        let database = MemoryDatabase::default();
        let content = content();
        let origin = block_pos(0, 0, 0);
        {
            let (map, _events) = map_with_database(&database);
            fill_blocks(&map, origin, origin, MapNode::new(content.stone));
            for x in 0..3 {
                map.set_node(MapNodePos::new(x, 1, 0), MapNode::AIR, WriteMode::ExistingOnly)
                    .unwrap();
            }
            map.add_node_and_update(
                MapNodePos::new(0, 1, 0),
                MapNode::new(content.water_source),
                true,
            )
            .unwrap();
            for _ in 0..3 {
                map.transform_liquids(None);
            }
            assert_eq!(map.save(ModifiedState::WriteAtUnload, None).failed, 0);
        }

        let (map, _events) = map_with_database(&database);
        let flowing = map.get_node_or_load(MapNodePos::new(2, 1, 0)).unwrap();
        assert_eq!(flowing.content_id, content.water_flowing);
        assert_eq!(flowing.param2, 6);
        assert_eq!(map.transforming_liquid_size(), 0);
        map.transforming_liquid_add(MapNodePos::new(2, 1, 0));
        assert!(map.transform_liquids(None).is_empty(), "nothing left to flow");
        let night = map.get_node(MapNodePos::new(2, 1, 0)).stored_light(LightBank::Night);
        assert_eq!(night, 0);
    }
}
