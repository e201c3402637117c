//! A detached box of nodes map generators work on.

use glam::IVec3;
use luanti_core::{ContentId, MapBlockNodes, MapBlockPos, MapNode, MapNodeIndex, MapNodePos};

use crate::map_block::MapBlock;

/// An axis aligned box of nodes which is not part of the map.
///
/// Nodes outside of the box read as `IGNORE`; writes outside of it are dropped.
pub struct VoxelManipulator {
    min: IVec3,
    size: IVec3,
    nodes: Vec<MapNode>,
}

impl VoxelManipulator {
    /// Creates a box spanning `min..=max`, filled with `IGNORE`.
    #[must_use]
    pub fn new(min: MapNodePos, max: MapNodePos) -> Self {
        let min = min.as_ivec3();
        let size = (max.as_ivec3() - min + IVec3::ONE).max(IVec3::ZERO);
        let volume = usize::try_from(size.element_product()).unwrap_or_default();
        Self {
            min,
            size,
            nodes: vec![MapNode::IGNORE; volume],
        }
    }

    /// Lowest corner of the box
    #[must_use]
    pub fn min(&self) -> IVec3 {
        self.min
    }

    /// Highest corner of the box
    #[must_use]
    pub fn max(&self) -> IVec3 {
        self.min + self.size - IVec3::ONE
    }

    fn index(&self, pos: IVec3) -> Option<usize> {
        let local = pos - self.min;
        if local.cmplt(IVec3::ZERO).any() || local.cmpge(self.size).any() {
            return None;
        }
        let index = local.x + self.size.x * (local.y + self.size.y * local.z);
        usize::try_from(index).ok()
    }

    /// Whether `pos` lies within the box
    #[must_use]
    pub fn contains(&self, pos: IVec3) -> bool {
        self.index(pos).is_some()
    }

    /// Reads a node.
    #[must_use]
    pub fn get(&self, pos: IVec3) -> MapNode {
        self.index(pos)
            .and_then(|index| self.nodes.get(index))
            .copied()
            .unwrap_or(MapNode::IGNORE)
    }

    /// Writes a node, returns `false` outside of the box.
    pub fn set(&mut self, pos: IVec3, node: MapNode) -> bool {
        match self.index(pos).and_then(|index| self.nodes.get_mut(index)) {
            Some(slot) => {
                *slot = node;
                true
            }
            None => false,
        }
    }

    /// Replaces every node of the given content within `min..=max`.
    pub fn replace(&mut self, min: IVec3, max: IVec3, from: ContentId, to: MapNode) {
        for z in min.z..=max.z {
            for y in min.y..=max.y {
                for x in min.x..=max.x {
                    let pos = IVec3::new(x, y, z);
                    if self.get(pos).content_id == from {
                        self.set(pos, to);
                    }
                }
            }
        }
    }

    /// Copies the nodes of a block into the box.
    pub fn copy_from_block(&mut self, block: &MapBlock) {
        let pos = block.pos();
        for (index, &node) in block.nodes().iter() {
            self.set(pos.node_pos(index).as_ivec3(), node);
        }
    }

    /// The nodes of a block as far as covered by the box, `IGNORE` elsewhere.
    #[must_use]
    pub fn block_nodes(&self, pos: MapBlockPos) -> Box<MapBlockNodes> {
        let mut nodes = Box::<MapBlockNodes>::default();
        for index in MapNodeIndex::all() {
            nodes[index] = self.get(pos.node_pos(index).as_ivec3());
        }
        nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::I16Vec3;

    #[test]
    fn outside_reads_ignore() {
        let mut vm = VoxelManipulator::new(MapNodePos::new(-2, 0, 0), MapNodePos::new(1, 1, 1));
        assert_eq!(vm.max(), IVec3::new(1, 1, 1));
        assert_eq!(vm.get(IVec3::new(0, 0, 0)), MapNode::IGNORE);
        assert!(vm.set(IVec3::new(-2, 1, 1), MapNode::AIR));
        assert_eq!(vm.get(IVec3::new(-2, 1, 1)), MapNode::AIR);
        assert!(!vm.set(IVec3::new(2, 0, 0), MapNode::AIR));
        assert_eq!(vm.get(IVec3::new(2, 0, 0)), MapNode::IGNORE);
    }

    #[test]
    fn blocks_pass_through() {
        let pos = MapBlockPos::new(I16Vec3::new(-1, 2, 0)).unwrap();
        let mut block = MapBlock::new(pos);
        block.set_node(MapNodeIndex::from(17_u16), MapNode::AIR);

        let mut vm = VoxelManipulator::new(pos.min_node(), pos.max_node());
        vm.copy_from_block(&block);
        vm.replace(vm.min(), vm.max(), ContentId::IGNORE, MapNode::new(ContentId::UNKNOWN));
        let nodes = vm.block_nodes(pos);
        assert_eq!(nodes[MapNodeIndex::from(17_u16)], MapNode::AIR);
        assert_eq!(nodes[MapNodeIndex::MIN].content_id, ContentId::UNKNOWN);
    }
}
