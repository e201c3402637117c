//! Cellular automaton moving liquids through the map.
//!
//! A source node never changes on its own. Flowing nodes carry their level in the lower bits of
//! `param2`: each horizontal step loses one level, while liquid falling down (or sitting below
//! any node of the same liquid) has the maximum level. Two horizontally adjacent sources turn a
//! node into a new source if the liquid is renewable.

use std::{
    collections::{HashSet, VecDeque},
    time::{Duration, Instant},
};

use luanti_core::{ContentId, DOWN, MapNode, MapNodePos, UP};

use crate::{
    map::BlockCursor,
    node_def::{LiquidType, NodeDefManager},
};

/// Bits of `param2` holding the level of a flowing liquid
pub const LIQUID_LEVEL_MASK: u8 = 0x07;
/// Set in `param2` of a flowing liquid which continues downwards
pub const LIQUID_FLOW_DOWN_MASK: u8 = 0x08;
/// Highest level of a flowing liquid
pub const LIQUID_LEVEL_MAX: u8 = LIQUID_LEVEL_MASK;
/// The level a source node counts as
pub const LIQUID_LEVEL_SOURCE: u8 = LIQUID_LEVEL_MAX + 1;

/// Positions waiting to be updated, each queued at most once.
#[derive(Debug, Default)]
pub(crate) struct LiquidQueue {
    order: VecDeque<MapNodePos>,
    queued: HashSet<MapNodePos>,
    growing_since: Option<Instant>,
}

impl LiquidQueue {
    /// Queues a position unless it is queued already.
    pub(crate) fn push(&mut self, pos: MapNodePos) -> bool {
        let added = self.queued.insert(pos);
        if added {
            self.order.push_back(pos);
        }
        added
    }

    pub(crate) fn pop(&mut self) -> Option<MapNodePos> {
        let pos = self.order.pop_front()?;
        self.queued.remove(&pos);
        Some(pos)
    }

    pub(crate) fn len(&self) -> usize {
        self.order.len()
    }

    /// Drops everything queued if the queue kept growing for longer than `purge_time`.
    ///
    /// Returns the number of dropped positions. A `purge_time` of zero disables purging.
    pub(crate) fn purge_if_growing(
        &mut self,
        len_before: usize,
        purge_time: Duration,
        now: Instant,
    ) -> usize {
        if purge_time.is_zero() || self.len() <= len_before {
            self.growing_since = None;
            return 0;
        }
        let since = *self.growing_since.get_or_insert(now);
        if now.duration_since(since) < purge_time {
            return 0;
        }
        let dropped = self.len();
        self.order.clear();
        self.queued.clear();
        self.growing_since = None;
        dropped
    }
}

/// Whether liquid could flow into or out of a node, i.e. whether it is worth queueing.
pub(crate) fn is_flow_candidate(node: MapNode, node_defs: &NodeDefManager) -> bool {
    if node.is_ignore() {
        return false;
    }
    let features = node_defs.node(node);
    node.content_id == ContentId::AIR || features.is_liquid() || features.floodable
}

/// The two node kinds a liquid consists of.
#[derive(Clone, Copy, PartialEq, Eq)]
struct Family {
    source: ContentId,
    flowing: ContentId,
}

impl Family {
    fn of(node: MapNode, node_defs: &NodeDefManager) -> Option<Self> {
        let features = node_defs.node(node);
        features.is_liquid().then_some(Self {
            source: features.liquid_alternative_source_id,
            flowing: features.liquid_alternative_flowing_id,
        })
    }

    fn contains(self, node: MapNode) -> bool {
        node.content_id == self.source || node.content_id == self.flowing
    }
}

/// Computes what the node at `pos` turns into.
///
/// Returns `None` if it stays as it is.
pub(crate) fn transform_node(
    cursor: &mut BlockCursor<'_>,
    node_defs: &NodeDefManager,
    pos: MapNodePos,
) -> Option<MapNode> {
    let node = cursor.node(pos);
    if node.is_ignore() {
        return None;
    }
    let features = node_defs.node(node);
    if features.liquid_type == LiquidType::Source {
        return None;
    }
    let replaceable = node.content_id == ContentId::AIR || features.floodable;
    if !features.is_liquid() && !replaceable {
        return None;
    }

    let neighbors: Vec<_> = pos
        .neighbors()
        .map(|(dir, neighbor)| (dir, cursor.node(neighbor)))
        .filter(|(_, neighbor)| !neighbor.is_ignore())
        .collect();

    // liquid never flows upwards, so the node below cannot decide the family
    let family = Family::of(node, node_defs).or_else(|| {
        neighbors
            .iter()
            .filter(|(dir, _)| *dir != DOWN)
            .find_map(|&(_, neighbor)| Family::of(neighbor, node_defs))
    })?;
    let family_features = node_defs.get(family.source);
    let range = family_features.liquid_range.min(LIQUID_LEVEL_MAX + 1);

    let mut side_sources = 0;
    let mut from_above = false;
    let mut max_level: Option<u8> = None;
    let mut flows_down = false;
    for &(dir, neighbor) in &neighbors {
        let member = family.contains(neighbor);
        if dir == DOWN {
            let below = node_defs.node(neighbor);
            flows_down = neighbor.content_id == ContentId::AIR
                || below.floodable
                || (member && neighbor.content_id == family.flowing);
            continue;
        }
        if !member {
            continue;
        }
        if dir == UP {
            from_above = true;
        } else if neighbor.content_id == family.source {
            side_sources += 1;
            max_level = max_level.max(Some(LIQUID_LEVEL_MAX));
        } else if neighbor.param2 & LIQUID_FLOW_DOWN_MASK == 0 {
            let level = neighbor.param2 & LIQUID_LEVEL_MASK;
            if level > 0 {
                max_level = max_level.max(Some(level - 1));
            }
        }
    }

    let new_node = if family_features.liquid_renewable && side_sources >= 2 && range > 1 {
        MapNode::new(family.source)
    } else {
        let level = if from_above {
            Some(LIQUID_LEVEL_MAX)
        } else {
            max_level
        };
        match level {
            Some(level) if level >= LIQUID_LEVEL_MAX + 1 - range => {
                let flow_down = if flows_down { LIQUID_FLOW_DOWN_MASK } else { 0 };
                MapNode::with_param2(family.flowing, level | flow_down)
            }
            _ if features.is_liquid() => MapNode::AIR,
            _ => return None,
        }
    };

    (new_node.content_id != node.content_id || new_node.param2 != node.param2).then_some(new_node)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        map::WriteMode,
        test_util::{content, fill_blocks, memory_map},
    };
    use glam::I16Vec3;
    use luanti_core::MapBlockPos;

    #[test]
    fn queue_holds_positions_once() {
        let mut queue = LiquidQueue::default();
        let pos = MapNodePos::new(1, 2, 3);
        assert!(queue.push(pos));
        assert!(!queue.push(pos));
        assert!(queue.push(MapNodePos::ZERO));
        assert_eq!(queue.len(), 2);
        assert_eq!(queue.pop(), Some(pos));
        assert!(queue.push(pos), "popped positions may be queued again");
    }

    #[test]
    fn growing_queue_is_purged() {
        let mut queue = LiquidQueue::default();
        let start = Instant::now();
        let purge_time = Duration::from_secs(5);
        queue.push(MapNodePos::ZERO);
        assert_eq!(queue.purge_if_growing(0, purge_time, start), 0);
        queue.push(MapNodePos::new(0, 1, 0));
        assert_eq!(
            queue.purge_if_growing(1, purge_time, start + Duration::from_secs(6)),
            2
        );
        assert_eq!(queue.len(), 0);
        queue.push(MapNodePos::ZERO);
        assert_eq!(queue.purge_if_growing(1, Duration::ZERO, start), 0);
    }

    #[test]
    fn water_fills_a_trough() {
        let content = content();
        let (map, _events) = memory_map(&content);
        let origin = MapBlockPos::new(I16Vec3::ZERO).unwrap();
        fill_blocks(&map, origin, origin, MapNode::new(content.stone));
        for x in 0..5 {
            map.set_node(MapNodePos::new(x, 1, 0), MapNode::AIR, WriteMode::ExistingOnly)
                .unwrap();
        }
        map.add_node_and_update(
            MapNodePos::new(0, 2, 0),
            MapNode::new(content.water_source),
            true,
        )
        .unwrap();

        for _ in 0..5 {
            map.transform_liquids(None);
        }
        let levels: Vec<_> = (0..5)
            .map(|x| {
                let node = map.get_node(MapNodePos::new(x, 1, 0));
                assert_eq!(node.content_id, content.water_flowing);
                node.param2
            })
            .collect();
        assert_eq!(levels, [7, 6, 5, 4, 3]);

        for _ in 0..3 {
            assert!(map.transform_liquids(None).is_empty(), "the trough is settled");
        }
    }

    #[test]
    fn two_sources_renew() {
        let content = content();
        let (map, _events) = memory_map(&content);
        let origin = MapBlockPos::new(I16Vec3::ZERO).unwrap();
        fill_blocks(&map, origin, origin, MapNode::new(content.stone));
        for x in 0..3 {
            map.set_node(MapNodePos::new(x, 1, 0), MapNode::AIR, WriteMode::ExistingOnly)
                .unwrap();
        }
        let water = MapNode::new(content.water_source);
        map.add_node_and_update(MapNodePos::new(0, 1, 0), water, true)
            .unwrap();
        map.add_node_and_update(MapNodePos::new(2, 1, 0), water, true)
            .unwrap();
        map.transform_liquids(None);
        assert_eq!(map.get_node(MapNodePos::new(1, 1, 0)), water);
    }

    #[test]
    fn removing_the_source_drains_the_flow() {
        let content = content();
        let (map, _events) = memory_map(&content);
        let origin = MapBlockPos::new(I16Vec3::ZERO).unwrap();
        fill_blocks(&map, origin, origin, MapNode::new(content.stone));
        for x in 0..4 {
            map.set_node(MapNodePos::new(x, 1, 0), MapNode::AIR, WriteMode::ExistingOnly)
                .unwrap();
        }
        let source = MapNodePos::new(0, 1, 0);
        map.add_node_and_update(source, MapNode::new(content.water_source), true)
            .unwrap();
        for _ in 0..4 {
            map.transform_liquids(None);
        }
        assert_eq!(map.get_node(MapNodePos::new(3, 1, 0)).param2, 5);

        map.remove_node_and_update(source).unwrap();
        for _ in 0..12 {
            map.transform_liquids(None);
        }
        for x in 0..4 {
            let node = map.get_node(MapNodePos::new(x, 1, 0));
            assert_eq!(node.content_id, ContentId::AIR, "drained at x = {x}");
        }
    }
}
