//! Light propagation for both light banks.
//!
//! Light spreads from emitting nodes and, in the day bank, from the sky. Every node which lets
//! light through stores the brightest value reaching it in `param1`; one step costs one level,
//! except for sunlight travelling straight down through nodes that let sunlight through.
//!
//! All functions work on a [`BlockCursor`] and therefore hold at most one block lock at a time.
//! Unloaded nodes (`IGNORE`) stop the propagation.

use std::collections::VecDeque;

use glam::U16Vec3;
use luanti_core::{DOWN, LIGHT_SUN, LightBank, MapBlockPos, MapNode, MapNodeIndex, MapNodePos, UP};

use crate::{map::BlockCursor, map_block::node_light, node_def::NodeDefManager};

/// Marks every node of a block as lit in both banks, as stored in `lighting_complete`.
pub(crate) const LIGHTING_COMPLETE: u16 = 0xffff;

/// Updates the light around edited nodes.
///
/// `changes` lists the edited positions together with the node which was there before. The new
/// nodes must already be in place.
pub(crate) fn update_lighting_nodes(
    cursor: &mut BlockCursor<'_>,
    node_defs: &NodeDefManager,
    changes: &[(MapNodePos, MapNode)],
) {
    for bank in LightBank::ALL {
        let mut unlight = Vec::new();
        for &(pos, old_node) in changes {
            if cursor.node(pos).is_ignore() {
                continue;
            }
            let old_light = if old_node.is_ignore() {
                0
            } else {
                node_light(old_node, bank, node_defs)
            };
            // the stored value belongs to the old node
            cursor.set_light(pos, bank, 0, node_defs);
            if old_light > 0 {
                unlight.push((pos, old_light));
            }
        }

        let mut sources = Vec::new();
        unspread_light(cursor, node_defs, bank, unlight, &mut sources);

        for &(pos, _) in changes {
            let node = cursor.node(pos);
            if node.is_ignore() {
                continue;
            }
            let features = node_defs.node(node);
            if features.light_emission() > 0 {
                sources.push(pos);
            }
            if bank.has_sunlight()
                && features.sunlight_propagates
                && is_sunlight_above(cursor, node_defs, pos)
            {
                cursor.set_light(pos, bank, LIGHT_SUN, node_defs);
                sources.push(pos);
            }
            for (_, neighbor) in pos.neighbors() {
                if cursor
                    .light(neighbor, bank, node_defs)
                    .is_some_and(|light| light > 0)
                {
                    sources.push(neighbor);
                }
            }
        }

        spread_light(cursor, node_defs, bank, sources);
    }
}

/// Recomputes the light of a whole block from scratch.
///
/// Light leaking out of the block into its neighbors is corrected as well. The block must be
/// resident; nothing happens otherwise.
pub(crate) fn relight_block(
    cursor: &mut BlockCursor<'_>,
    node_defs: &NodeDefManager,
    block_pos: MapBlockPos,
) {
    for bank in LightBank::ALL {
        let mut unlight = Vec::new();
        let mut sources = Vec::new();
        {
            let Some(block) = cursor.block(block_pos) else {
                return;
            };
            for index in MapNodeIndex::all() {
                let node = block.node(index);
                if node.is_ignore() {
                    continue;
                }
                let features = node_defs.node(node);
                if features.light_emission() > 0 {
                    sources.push(block_pos.node_pos(index));
                }
                if features.stores_light() && node.stored_light(bank) > 0 {
                    let light = node_light(node, bank, node_defs);
                    block.set_light(index, bank, 0, node_defs);
                    unlight.push((block_pos.node_pos(index), light));
                }
            }
        }
        if !unlight.is_empty() {
            cursor.mark_modified(block_pos);
        }

        unspread_light(cursor, node_defs, bank, unlight, &mut sources);
        if bank.has_sunlight() {
            propagate_sunlight_columns(cursor, node_defs, block_pos, &mut sources);
        }
        collect_outside_sources(cursor, node_defs, bank, block_pos, &mut sources);
        spread_light(cursor, node_defs, bank, sources);
    }

    if let Some(block) = cursor.block(block_pos) {
        block.lighting_complete = LIGHTING_COMPLETE;
    }
}

/// Lets sunlight fall down every column of a block which is open to the sky.
///
/// Nodes receiving sunlight are appended to `sources`.
fn propagate_sunlight_columns(
    cursor: &mut BlockCursor<'_>,
    node_defs: &NodeDefManager,
    block_pos: MapBlockPos,
    sources: &mut Vec<MapNodePos>,
) {
    let min = block_pos.min_node().0;
    let max = block_pos.max_node().0;
    for z in min.z..=max.z {
        for x in min.x..=max.x {
            let top = MapNodePos::new(x, max.y, z);
            if !is_sunlight_above(cursor, node_defs, top) {
                continue;
            }
            for y in (min.y..=max.y).rev() {
                let pos = MapNodePos::new(x, y, z);
                let node = cursor.node(pos);
                if node.is_ignore() || !node_defs.node(node).sunlight_propagates {
                    break;
                }
                cursor.set_light(pos, LightBank::Day, LIGHT_SUN, node_defs);
                sources.push(pos);
            }
        }
    }
}

/// Collects the lit nodes just outside the faces of a block.
fn collect_outside_sources(
    cursor: &mut BlockCursor<'_>,
    node_defs: &NodeDefManager,
    bank: LightBank,
    block_pos: MapBlockPos,
    sources: &mut Vec<MapNodePos>,
) {
    for index in MapNodeIndex::all() {
        let local = U16Vec3::from(index);
        if local.min_element() > 0 && local.max_element() < MapBlockPos::SIZE - 1 {
            continue;
        }
        for (_, neighbor) in block_pos.node_pos(index).neighbors() {
            if !block_pos.contains(neighbor)
                && cursor
                    .light(neighbor, bank, node_defs)
                    .is_some_and(|light| light > 0)
            {
                sources.push(neighbor);
            }
        }
    }
}

/// Removes light which may have come from the given nodes.
///
/// `from` lists nodes together with the light they had before. Every neighbor whose light could
/// have been derived from such a node is darkened and examined in turn. Nodes which are lit
/// independently are added to `sources` so a following [`spread_light`] fills the gap again.
pub(crate) fn unspread_light(
    cursor: &mut BlockCursor<'_>,
    node_defs: &NodeDefManager,
    bank: LightBank,
    from: Vec<(MapNodePos, u8)>,
    sources: &mut Vec<MapNodePos>,
) {
    let mut queue = VecDeque::from(from);
    while let Some((pos, old_light)) = queue.pop_front() {
        for (dir, neighbor) in pos.neighbors() {
            let node = cursor.node(neighbor);
            if node.is_ignore() {
                continue;
            }
            let light = node_light(node, bank, node_defs);
            if light == 0 {
                continue;
            }
            let derived = light < old_light
                || (bank.has_sunlight()
                    && old_light == LIGHT_SUN
                    && light == LIGHT_SUN
                    && dir == DOWN);
            if !derived {
                sources.push(neighbor);
                continue;
            }
            let features = node_defs.node(node);
            if features.stores_light() && node.stored_light(bank) > 0 {
                cursor.set_light(neighbor, bank, 0, node_defs);
                queue.push_back((neighbor, light));
            }
            if features.light_emission() > 0 {
                sources.push(neighbor);
            }
        }
    }
}

/// Spreads light outwards from the given nodes until it runs out.
pub(crate) fn spread_light(
    cursor: &mut BlockCursor<'_>,
    node_defs: &NodeDefManager,
    bank: LightBank,
    sources: Vec<MapNodePos>,
) {
    let mut queue = VecDeque::from(sources);
    while let Some(pos) = queue.pop_front() {
        let Some(light) = cursor.light(pos, bank, node_defs) else {
            continue;
        };
        if light <= 1 {
            continue;
        }
        for (dir, neighbor) in pos.neighbors() {
            let node = cursor.node(neighbor);
            if node.is_ignore() {
                continue;
            }
            let features = node_defs.node(node);
            let candidate = if bank.has_sunlight()
                && light == LIGHT_SUN
                && dir == DOWN
                && features.sunlight_propagates
            {
                LIGHT_SUN
            } else if features.light_propagates {
                light - 1
            } else {
                continue;
            };
            if candidate > node_light(node, bank, node_defs) {
                cursor.set_light(neighbor, bank, candidate, node_defs);
                queue.push_back(neighbor);
            }
        }
    }
}

/// Whether the node above `pos` passes full sunlight down.
///
/// Above unloaded or ungenerated space the block's `is_underground` flag decides.
pub(crate) fn is_sunlight_above(
    cursor: &mut BlockCursor<'_>,
    node_defs: &NodeDefManager,
    pos: MapNodePos,
) -> bool {
    let own_block_is_open = |cursor: &mut BlockCursor<'_>| {
        cursor
            .block(pos.block_pos())
            .is_some_and(|block| !block.is_underground)
    };
    let Some(above) = pos.checked_add(UP) else {
        return own_block_is_open(cursor);
    };
    let (above_block, index) = above.split_index();
    match cursor.block(above_block) {
        Some(block) => {
            let node = block.node(index);
            if node.is_ignore() {
                !block.is_underground
            } else {
                node_light(node, LightBank::Day, node_defs) == LIGHT_SUN
            }
        }
        None => own_block_is_open(cursor),
    }
}
