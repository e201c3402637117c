use std::sync::Arc;

use anyhow::{Result, bail};
use glam::IVec3;
use luanti_core::{ContentId, MapBlockPos, MapNode, MapNodePos};

use super::{MapGenerator, VoxelManipulator};
use crate::node_def::{NodeNameList, NodeResolver};

const STONE: usize = 0;
const DIRT: usize = 1;
const DIRT_WITH_GRASS: usize = 2;
const WATER_SOURCE: usize = 3;

/// Depth of the dirt layer below the surface
const DIRT_DEPTH: i32 = 3;

/// A flat world: stone, a few layers of dirt, grass on top and water up to the water level.
pub struct MapgenFlat {
    ground_level: i16,
    water_level: i16,
    nodes: Arc<NodeNameList>,
}

impl MapgenFlat {
    /// Creates a generator with the surface at `ground_level`.
    #[must_use]
    pub fn new(ground_level: i16, water_level: i16) -> Self {
        let nodes = NodeNameList::new()
            .with("mapgen_stone", None, ContentId::IGNORE)
            .with("mapgen_dirt", None, ContentId::IGNORE)
            .with("mapgen_dirt_with_grass", None, ContentId::IGNORE)
            .with("mapgen_water_source", None, ContentId::AIR);
        Self {
            ground_level,
            water_level,
            nodes: Arc::new(nodes),
        }
    }

    /// The resolved content per layer, falling back to the layer below for missing nodes.
    fn layers(&self) -> Result<[ContentId; 4]> {
        let stone = self.nodes.id(STONE);
        if stone == ContentId::IGNORE {
            bail!("mapgen_stone is not defined");
        }
        let or = |id: ContentId, fallback: ContentId| {
            if id == ContentId::IGNORE { fallback } else { id }
        };
        let dirt = or(self.nodes.id(DIRT), stone);
        let grass = or(self.nodes.id(DIRT_WITH_GRASS), dirt);
        let water = or(self.nodes.id(WATER_SOURCE), ContentId::AIR);
        Ok([stone, dirt, grass, water])
    }
}

impl MapGenerator for MapgenFlat {
    fn name(&self) -> &'static str {
        "flat"
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
        let [stone, dirt, grass, water] = self.layers()?;
        let ground = i32::from(self.ground_level);
        let water_level = i32::from(self.water_level);
        let (min, max) = (min.as_ivec3(), max.as_ivec3());

        for y in min.y..=max.y {
            let content = if y > ground {
                if y <= water_level { water } else { ContentId::AIR }
            } else if y == ground {
                // flooded ground turns to plain dirt
                if ground < water_level { dirt } else { grass }
            } else if y > ground - DIRT_DEPTH {
                dirt
            } else {
                stone
            };
            let node = MapNode::new(content);
            for z in min.z..=max.z {
                for x in min.x..=max.x {
                    vm.set(IVec3::new(x, y, z), node);
                }
            }
        }
        Ok(())
    }

    fn is_underground(&self, block: MapBlockPos) -> bool {
        block.max_node().0.y < self.ground_level
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::content;

    #[test]
    fn layers_follow_the_levels() {
        let content = content();
        let generator = MapgenFlat::new(8, 1);
        content
            .node_defs
            .resolve_now(generator.node_resolver().as_ref());

        let min = MapNodePos::new(0, -16, 0);
        let max = MapNodePos::new(15, 15, 15);
        let mut vm = VoxelManipulator::new(min, max);
        generator.generate(&mut vm, min, max, 0).unwrap();

        let at = |y| vm.get(IVec3::new(3, y, 4)).content_id;
        assert_eq!(at(-16), content.stone);
        assert_eq!(at(5), content.stone);
        assert_eq!(at(6), content.dirt);
        assert_eq!(at(7), content.dirt);
        assert_eq!(at(8), content.grass);
        assert_eq!(at(9), ContentId::AIR);

        assert!(generator.is_underground(MapBlockPos::for_node(MapNodePos::new(0, -1, 0))));
        assert!(!generator.is_underground(MapBlockPos::ZERO));
    }

    #[test]
    fn low_ground_is_flooded() {
        let content = content();
        let generator = MapgenFlat::new(-2, 1);
        content
            .node_defs
            .resolve_now(generator.node_resolver().as_ref());

        let min = MapNodePos::new(0, -4, 0);
        let max = MapNodePos::new(0, 3, 0);
        let mut vm = VoxelManipulator::new(min, max);
        generator.generate(&mut vm, min, max, 0).unwrap();
        let at = |y| vm.get(IVec3::new(0, y, 0)).content_id;
        assert_eq!(at(-2), content.dirt);
        assert_eq!(at(-1), content.water_source);
        assert_eq!(at(1), content.water_source);
        assert_eq!(at(2), ContentId::AIR);
    }

    #[test]
    fn unresolved_names_fail() {
        let generator = MapgenFlat::new(8, 1);
        let min = MapNodePos::ZERO;
        let mut vm = VoxelManipulator::new(min, min);
        assert!(generator.generate(&mut vm, min, min, 0).is_err());
    }
}
