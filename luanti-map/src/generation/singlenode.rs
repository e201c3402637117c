use std::sync::Arc;

use anyhow::Result;
use glam::IVec3;
use luanti_core::{ContentId, MapNode, MapNodePos};

use super::{MapGenerator, VoxelManipulator};
use crate::node_def::{NodeNameList, NodeResolver};

/// Fills the whole world with a single node, air unless `mapgen_singlenode` is defined.
pub struct MapgenSinglenode {
    nodes: Arc<NodeNameList>,
}

impl Default for MapgenSinglenode {
    fn default() -> Self {
        Self::new()
    }
}

impl MapgenSinglenode {
    /// Creates the generator.
    #[must_use]
    pub fn new() -> Self {
        let nodes = NodeNameList::new().with("mapgen_singlenode", Some("air"), ContentId::AIR);
        Self {
            nodes: Arc::new(nodes),
        }
    }
}

impl MapGenerator for MapgenSinglenode {
    fn name(&self) -> &'static str {
        "singlenode"
    }

    fn node_resolver(&self) -> Arc<dyn NodeResolver> {
        Arc::<NodeNameList>::clone(&self.nodes)
    }

    fn generate(
        &self,
        vm: &mut VoxelManipulator,
        min: MapNodePos,
        max: MapNodePos,
        _seed: u64,
    ) -> Result<()> {
        let content = self.nodes.id(0);
        let node = MapNode::new(if content == ContentId::IGNORE {
            ContentId::AIR
        } else {
            content
        });
        let (min, max) = (min.as_ivec3(), max.as_ivec3());
        for z in min.z..=max.z {
            for y in min.y..=max.y {
                for x in min.x..=max.x {
                    vm.set(IVec3::new(x, y, z), node);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::content;

    #[test]
    fn fills_with_air_by_default() {
        let content = content();
        let generator = MapgenSinglenode::new();
        content
            .node_defs
            .resolve_now(generator.node_resolver().as_ref());
        let min = MapNodePos::new(-1, -1, -1);
        let max = MapNodePos::new(1, 1, 1);
        let mut vm = VoxelManipulator::new(min, max);
        generator.generate(&mut vm, min, max, 42).unwrap();
        assert_eq!(vm.get(IVec3::ZERO), MapNode::AIR);
        assert_eq!(vm.get(IVec3::new(1, -1, 1)), MapNode::AIR);
    }
}
