//! The set of resident map blocks.
//!
//! Blocks are spread over a fixed number of shards, each guarded by its own `RwLock`, so threads
//! working on different parts of the map rarely contend. The shard locks only protect the
//! structure of the map; node edits lock the individual block.

mod reclaim;

use std::{
    array,
    collections::{HashMap, hash_map::Entry},
    hash::{BuildHasher, RandomState},
    sync::Arc,
};

use lock_api::ArcMutexGuard;
use log::trace;
use luanti_core::MapBlockPos;
use parking_lot::{Mutex, MutexGuard, RawMutex, RwLock};

use crate::map_block::MapBlock;

pub(crate) use reclaim::EpochPin;
use reclaim::Reclaimer;

const SHARD_COUNT: usize = 16;

/// Shared access to a resident block.
///
/// A handle stays usable after the block has been removed from the store; the block is released
/// once the last handle is dropped.
#[derive(Clone, Debug)]
pub struct BlockHandle {
    pos: MapBlockPos,
    block: Arc<Mutex<MapBlock>>,
}

impl BlockHandle {
    /// Wraps a block which is not part of any store yet.
    #[must_use]
    pub fn new(block: MapBlock) -> Self {
        Self {
            pos: block.pos(),
            block: Arc::new(Mutex::new(block)),
        }
    }

    /// Position of the block
    #[must_use]
    pub fn pos(&self) -> MapBlockPos {
        self.pos
    }

    /// Locks the block for the lifetime of the guard.
    pub fn lock(&self) -> MutexGuard<'_, MapBlock> {
        self.block.lock()
    }

    /// Locks the block unless another thread is holding it.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, MapBlock>> {
        self.block.try_lock()
    }

    /// Locks the block with a guard that keeps the block alive on its own.
    pub(crate) fn lock_arc(&self) -> ArcMutexGuard<RawMutex, MapBlock> {
        self.block.lock_arc()
    }

    /// Number of handles to this block other than `self`.
    #[must_use]
    pub fn other_references(&self) -> usize {
        Arc::strong_count(&self.block) - 1
    }

    /// Whether both handles refer to the same block instance.
    #[must_use]
    pub fn same_block(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.block, &other.block)
    }
}

type Shard = RwLock<HashMap<MapBlockPos, BlockHandle>>;

/// Concurrent map from block positions to resident blocks.
pub struct BlockStore {
    shards: [Shard; SHARD_COUNT],
    hasher: RandomState,
    reclaimer: Reclaimer,
}

impl Default for BlockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl BlockStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shards: array::from_fn(|_| RwLock::new(HashMap::new())),
            hasher: RandomState::new(),
            reclaimer: Reclaimer::default(),
        }
    }

    fn shard(&self, pos: MapBlockPos) -> &Shard {
        let hash = self.hasher.hash_one(pos);
        let index = usize::try_from(hash % SHARD_COUNT as u64).unwrap_or_default();
        #[expect(clippy::indexing_slicing, reason = "the index is reduced modulo the length")]
        &self.shards[index]
    }

    /// Returns the resident block at `pos` without loading anything.
    #[must_use]
    pub fn get(&self, pos: MapBlockPos) -> Option<BlockHandle> {
        self.shard(pos).read().get(&pos).cloned()
    }

    /// Returns the resident block at `pos` or inserts a blank, ungenerated placeholder.
    pub fn get_or_create_blank(&self, pos: MapBlockPos) -> BlockHandle {
        if let Some(handle) = self.get(pos) {
            return handle;
        }
        self.shard(pos)
            .write()
            .entry(pos)
            .or_insert_with(|| {
                trace!("creating blank block {pos}");
                BlockHandle::new(MapBlock::new(pos))
            })
            .clone()
    }

    /// Makes a block resident.
    ///
    /// Returns `false` and leaves the store untouched if a block already resides at that position.
    pub fn insert(&self, handle: BlockHandle) -> bool {
        match self.shard(handle.pos()).write().entry(handle.pos()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(vacant) => {
                vacant.insert(handle);
                true
            }
        }
    }

    /// Unlinks the given block.
    ///
    /// Nothing happens if the position is occupied by a different instance. Outstanding handles
    /// remain valid.
    pub fn erase(&self, handle: &BlockHandle) -> bool {
        self.erase_where(handle, |_| true)
    }

    /// Unlinks the given block unless anything but the store and `handle` refers to it.
    ///
    /// New handles are only ever cloned from the store, so a block found unused here cannot be
    /// picked up by anyone else afterwards.
    pub fn erase_unused(&self, handle: &BlockHandle) -> bool {
        self.erase_where(handle, |stored| stored.other_references() <= 1)
    }

    fn erase_where(
        &self,
        handle: &BlockHandle,
        condition: impl FnOnce(&BlockHandle) -> bool,
    ) -> bool {
        let removed = {
            let mut shard = self.shard(handle.pos()).write();
            match shard.entry(handle.pos()) {
                Entry::Occupied(occupied)
                    if occupied.get().same_block(handle) && condition(occupied.get()) =>
                {
                    Some(occupied.remove())
                }
                Entry::Occupied(_) | Entry::Vacant(_) => None,
            }
        };
        if let Some(removed) = removed {
            self.reclaimer.retire(removed);
            true
        } else {
            false
        }
    }

    /// Calls `visit` for every resident block.
    ///
    /// The shards are snapshotted one at a time, so `visit` may lock blocks and modify the store.
    /// Blocks inserted during the iteration may or may not be visited.
    pub fn for_each_loaded(&self, mut visit: impl FnMut(&BlockHandle)) {
        let _pin = self.pin();
        for shard in &self.shards {
            let snapshot: Vec<BlockHandle> = shard.read().values().cloned().collect();
            for handle in &snapshot {
                visit(handle);
            }
        }
    }

    /// Positions of all resident blocks, sorted.
    #[must_use]
    pub fn positions(&self) -> Vec<MapBlockPos> {
        let mut positions: Vec<_> = self
            .shards
            .iter()
            .flat_map(|shard| shard.read().keys().copied().collect::<Vec<_>>())
            .collect();
        positions.sort_unstable();
        positions
    }

    /// Number of resident blocks
    #[must_use]
    pub fn len(&self) -> usize {
        self.shards.iter().map(|shard| shard.read().len()).sum()
    }

    /// Whether no block is resident
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|shard| shard.read().is_empty())
    }

    /// Delays the release of blocks erased from now on until the pin is dropped.
    pub(crate) fn pin(&self) -> EpochPin<'_> {
        self.reclaimer.pin()
    }

    /// Releases erased blocks no pinned consumer can observe anymore.
    pub fn reclaim(&self) -> usize {
        self.reclaimer.collect()
    }

    /// Number of erased blocks waiting to be released
    #[must_use]
    pub fn pending_reclaim(&self) -> usize {
        self.reclaimer.pending()
    }
}
