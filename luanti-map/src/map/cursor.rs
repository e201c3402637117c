//! Node access across block boundaries while holding at most one block lock.

use std::collections::BTreeSet;

use lock_api::ArcMutexGuard;
use luanti_core::{LightBank, MapBlockPos, MapNode, MapNodePos};
use parking_lot::RawMutex;

use crate::{
    block_store::BlockStore,
    map_block::{MapBlock, node_light},
    node_def::NodeDefManager,
};

/// Walks over the map node by node, keeping the most recently used block locked.
///
/// Moving to another block releases the current lock before the next one is taken, so two cursors
/// can never wait for each other. The cursor is the lock token of an operation: everything the
/// operation reads or writes goes through it, so a block is never locked twice by the same
/// operation.
pub(crate) struct BlockCursor<'store> {
    store: &'store BlockStore,
    current: Option<(MapBlockPos, Option<ArcMutexGuard<RawMutex, MapBlock>>)>,
    modified: BTreeSet<MapBlockPos>,
}

impl<'store> BlockCursor<'store> {
    pub(crate) fn new(store: &'store BlockStore) -> Self {
        Self {
            store,
            current: None,
            modified: BTreeSet::new(),
        }
    }

    /// The resident block at `pos`, locked.
    pub(crate) fn block(&mut self, pos: MapBlockPos) -> Option<&mut MapBlock> {
        let cached = matches!(&self.current, Some((current, _)) if *current == pos);
        if !cached {
            // release first
            self.current = None;
            let guard = self.store.get(pos).map(|handle| {
                let mut guard = handle.lock_arc();
                guard.reset_usage_timer();
                guard
            });
            self.current = Some((pos, guard));
        }
        self.current
            .as_mut()
            .and_then(|(_, guard)| guard.as_deref_mut())
    }

    /// The resident block at `pos` or a blank placeholder created on the fly.
    pub(crate) fn block_or_create(&mut self, pos: MapBlockPos) -> &mut MapBlock {
        if !matches!(&self.current, Some((current, Some(_))) if *current == pos) {
            self.current = None;
        }
        let store = self.store;
        let (_, guard) = self.current.get_or_insert_with(|| (pos, None));
        guard.get_or_insert_with(|| {
            let mut guard = store.get_or_create_blank(pos).lock_arc();
            guard.reset_usage_timer();
            guard
        })
    }

    /// Releases the currently held lock.
    pub(crate) fn release(&mut self) {
        self.current = None;
    }

    /// Reads a node, `IGNORE` if its block is not resident.
    pub(crate) fn node(&mut self, pos: MapNodePos) -> MapNode {
        let (block_pos, index) = pos.split_index();
        self.block(block_pos)
            .map_or(MapNode::IGNORE, |block| block.node(index))
    }

    /// Writes a node. Returns `false` if its block is not resident.
    pub(crate) fn set_node(&mut self, pos: MapNodePos, node: MapNode) -> bool {
        let (block_pos, index) = pos.split_index();
        let Some(block) = self.block(block_pos) else {
            return false;
        };
        block.set_node(index, node);
        self.modified.insert(block_pos);
        true
    }

    /// Light of a node in the given bank, `None` for `IGNORE`.
    pub(crate) fn light(
        &mut self,
        pos: MapNodePos,
        bank: LightBank,
        node_defs: &NodeDefManager,
    ) -> Option<u8> {
        let node = self.node(pos);
        (!node.is_ignore()).then(|| node_light(node, bank, node_defs))
    }

    /// Stores a light value. Nodes which do not store light are left alone.
    pub(crate) fn set_light(
        &mut self,
        pos: MapNodePos,
        bank: LightBank,
        light: u8,
        node_defs: &NodeDefManager,
    ) {
        let (block_pos, index) = pos.split_index();
        let Some(block) = self.block(block_pos) else {
            return;
        };
        if block.node(index).stored_light(bank) != light
            && block.set_light(index, bank, light, node_defs)
        {
            self.modified.insert(block_pos);
        }
    }

    /// Records a change made through [`Self::block`].
    pub(crate) fn mark_modified(&mut self, pos: MapBlockPos) {
        self.modified.insert(pos);
    }

    /// Every block changed through this cursor.
    pub(crate) fn into_modified(self) -> BTreeSet<MapBlockPos> {
        self.modified
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block_store::BlockHandle;
    use luanti_core::ContentId;

    #[test]
    fn crosses_blocks_and_tracks_changes() {
        let store = BlockStore::new();
        let left = MapNodePos::new(-1, 0, 0);
        let right = MapNodePos::new(0, 0, 0);
        store.insert(BlockHandle::new(MapBlock::new(left.block_pos())));

        let mut cursor = BlockCursor::new(&store);
        assert!(cursor.set_node(left, MapNode::AIR));
        assert!(!cursor.set_node(right, MapNode::AIR), "not resident");
        assert_eq!(cursor.node(right), MapNode::IGNORE);

        cursor
            .block_or_create(right.block_pos())
            .set_node(right.index(), MapNode::new(ContentId::UNKNOWN));
        cursor.mark_modified(right.block_pos());
        assert_eq!(cursor.node(left), MapNode::AIR);
        assert_eq!(cursor.node(right).content_id, ContentId::UNKNOWN);

        let modified = cursor.into_modified();
        assert_eq!(
            modified.into_iter().collect::<Vec<_>>(),
            vec![left.block_pos(), right.block_pos()]
        );
    }

    #[test]
    fn holds_a_single_lock() {
        let store = BlockStore::new();
        let first = MapBlockPos::ZERO;
        let second = MapNodePos::new(16, 0, 0).block_pos();
        let first_handle = store.get_or_create_blank(first);
        let second_handle = store.get_or_create_blank(second);

        let mut cursor = BlockCursor::new(&store);
        cursor.block(first);
        assert!(first_handle.try_lock().is_none());
        cursor.block(second);
        assert!(first_handle.try_lock().is_some(), "moving on releases the lock");
        assert!(second_handle.try_lock().is_none());
        cursor.release();
        assert!(second_handle.try_lock().is_some());
    }
}
