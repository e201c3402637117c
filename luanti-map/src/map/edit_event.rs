use std::collections::BTreeSet;

use luanti_core::{MapBlockPos, MapNode, MapNodePos};

/// What kind of change an edit event reports.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MapEditEventKind {
    /// A node was placed, replacing the old node and its metadata
    AddNode,
    /// A node was removed (replaced by air)
    RemoveNode,
    /// A node was replaced while its metadata was kept
    SwapNode,
    /// The metadata of a node changed
    MetadataChanged,
    /// Any other change, e.g. a pass of the liquid engine
    Other,
}

/// A change of the map clients might need to learn about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapEditEvent {
    /// Kind of the change
    pub kind: MapEditEventKind,
    /// The changed node; meaningless for `Other`
    pub pos: MapNodePos,
    /// The resulting node; meaningless for `Other` and `MetadataChanged`
    pub node: MapNode,
    /// Every block whose contents changed, including light changes in neighboring blocks
    pub modified_blocks: BTreeSet<MapBlockPos>,
    /// Only private metadata changed, which is never sent to clients
    pub is_private_change: bool,
}

impl MapEditEvent {
    pub(crate) fn node_event(
        kind: MapEditEventKind,
        pos: MapNodePos,
        node: MapNode,
        mut modified_blocks: BTreeSet<MapBlockPos>,
    ) -> Self {
        modified_blocks.insert(pos.block_pos());
        Self {
            kind,
            pos,
            node,
            modified_blocks,
            is_private_change: false,
        }
    }

    pub(crate) fn metadata_changed(pos: MapNodePos, is_private_change: bool) -> Self {
        Self {
            kind: MapEditEventKind::MetadataChanged,
            pos,
            node: MapNode::IGNORE,
            modified_blocks: BTreeSet::from([pos.block_pos()]),
            is_private_change,
        }
    }

    pub(crate) fn other(modified_blocks: BTreeSet<MapBlockPos>) -> Self {
        Self {
            kind: MapEditEventKind::Other,
            pos: MapNodePos::ZERO,
            node: MapNode::IGNORE,
            modified_blocks,
            is_private_change: false,
        }
    }

    /// Blocks which have to be resent to clients that already know them.
    ///
    /// Private metadata changes affect no client.
    pub fn affected_blocks(&self) -> impl Iterator<Item = MapBlockPos> + '_ {
        self.modified_blocks
            .iter()
            .copied()
            .filter(|_| !self.is_private_change)
    }
}
