//! Contains all kinds of map position primitives and conversions between them.

use std::{
    cmp::Ordering,
    fmt::{self, Debug, Display},
    ops::{Index, IndexMut},
};

use glam::{I16Vec3, IVec3, UVec3};

use crate::map_node::{MapNode, MapNodeIndex, MapNodePos};

/// Contains all `MapNodes` of a single map block.
#[derive(Clone, PartialEq, Eq)]
pub struct MapBlockNodes(pub [MapNode; MapBlockPos::NODE_COUNT as usize]);

impl MapBlockNodes {
    /// Creates a block where every node is a copy of `node`.
    #[must_use]
    pub fn filled(node: MapNode) -> Self {
        Self([node; MapBlockPos::NODE_COUNT as usize])
    }

    /// Iterates over all nodes together with their index.
    pub fn iter(&self) -> impl Iterator<Item = (MapNodeIndex, &MapNode)> {
        self.0
            .iter()
            .enumerate()
            .map(|(index, node)| (MapNodeIndex::from(index), node))
    }
}

impl Default for MapBlockNodes {
    /// A block which has not been generated yet consists of `IGNORE` only.
    fn default() -> Self {
        Self::filled(MapNode::IGNORE)
    }
}

impl Debug for MapBlockNodes {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str("MapBlockNodes[…]")
    }
}

impl Index<MapNodeIndex> for MapBlockNodes {
    type Output = MapNode;

    fn index(&self, index: MapNodeIndex) -> &Self::Output {
        #[expect(
            clippy::indexing_slicing,
            reason = "MapNodeIndex by construction is guaranteed to be within bounds"
        )]
        &self.0[usize::from(index)]
    }
}

impl IndexMut<MapNodeIndex> for MapBlockNodes {
    fn index_mut(&mut self, index: MapNodeIndex) -> &mut Self::Output {
        #[expect(
            clippy::indexing_slicing,
            reason = "MapNodeIndex by construction is guaranteed to be within bounds"
        )]
        &mut self.0[usize::from(index)]
    }
}

/// The position of a map block.
/// The position is _not_ measured in world coordinates. It can be viewed as a signed 3D-index,
/// where `(0, 0, 0)` is located at the world's center
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapBlockPos(I16Vec3);

impl MapBlockPos {
    /// number of bit shifts to perform in order to convert between map node and map block
    /// coordinates.
    pub const SIZE_BITS: u32 = 4;
    /// Number of map nodes per map blocks in each dimension.
    pub const SIZE: u16 = 1 << Self::SIZE_BITS;
    /// Mask to be used to address the bits of a node coordinate that make up the the position
    /// within their block.
    pub const SIZE_MASK: u16 = Self::SIZE - 1;
    /// number of map nodes within a single block
    pub const NODE_COUNT: u16 = Self::SIZE * Self::SIZE * Self::SIZE;
    /// mask to be used to make a number a valid node index by wrapping around
    pub const NODE_COUNT_MASK: u16 = Self::NODE_COUNT - 1;

    /// Position of the map block at the world's center
    pub const ZERO: Self = Self(I16Vec3::ZERO);
    /// Position of the map block with the lowest possible coordinates.
    pub const MIN: Self = Self::for_node(MapNodePos::MIN);
    /// Position of the map block with the highest possible coordinates.
    pub const MAX: Self = Self::for_node(MapNodePos::MAX);

    /// Creates a new `MapBlockPos` as long as the resulting position would fit into the world.
    /// Returns `None` otherwise.
    #[must_use]
    pub fn new(position: I16Vec3) -> Option<Self> {
        (position.cmpge(Self::MIN.0).all() && position.cmple(Self::MAX.0).all())
            .then_some(Self(position))
    }

    /// Same as `new` but taking a wide vector, as produced by distance arithmetic.
    #[must_use]
    pub fn from_ivec3(position: IVec3) -> Option<Self> {
        Self::new(I16Vec3::new(
            i16::try_from(position.x).ok()?,
            i16::try_from(position.y).ok()?,
            i16::try_from(position.z).ok()?,
        ))
    }

    /// Converts a given node position into that of the containing map block.
    #[must_use]
    pub const fn for_node(node_pos: MapNodePos) -> Self {
        Self::for_pos(node_pos.0)
    }

    /// Converts a given world position into that of the containing map block.
    ///
    /// `for_node` is preferred in most cases but sometimes we only have a raw vector and it would
    /// be unnecessary to wrap that in a `MapNodePos`.
    ///
    /// The arithmetic shift rounds towards negative infinity, so node `-1` lies in block `-1`.
    #[must_use]
    pub const fn for_pos(pos: I16Vec3) -> Self {
        Self(I16Vec3 {
            x: pos.x >> MapBlockPos::SIZE_BITS,
            y: pos.y >> MapBlockPos::SIZE_BITS,
            z: pos.z >> MapBlockPos::SIZE_BITS,
        })
    }

    /// returns the inner position vector of this block which is measured in block steps from the
    /// origin
    #[must_use]
    pub fn vec(self) -> I16Vec3 {
        self.0
    }

    /// Returns the map block position with a given displacement.
    ///
    /// e.g. `pos.checked_add(IVec3::new(0, 1, 0))` returns the block above (`Y + 1`) the current
    /// one.
    ///
    /// Returns `None` if the resulting block would be located out of this map.
    #[must_use]
    pub fn checked_add(self, delta: I16Vec3) -> Option<Self> {
        self.0.checked_add(delta).and_then(Self::new)
    }

    /// Check whether the given map node is located within this map block
    #[must_use]
    pub fn contains(self, node_pos: MapNodePos) -> bool {
        Self::for_node(node_pos) == self
    }

    /// returns the map node position for a certain map node in this map block
    #[must_use]
    pub fn node_pos(self, index: MapNodeIndex) -> MapNodePos {
        MapNodePos(MapNodePos::from(self).0 + UVec3::from(index).as_i16vec3())
    }

    /// Returns the node with the lowest coordinates within this block.
    #[must_use]
    pub fn min_node(self) -> MapNodePos {
        MapNodePos::from(self)
    }

    /// Returns the node with the highest coordinates within this block.
    #[must_use]
    pub fn max_node(self) -> MapNodePos {
        self.node_pos(MapNodeIndex::MAX)
    }

    /// Iterates over all blocks within the (inclusive) box spanned by `min` and `max`.
    ///
    /// The iteration order is x fastest and z slowest, matching the node order within a block.
    pub fn iter_area(min: Self, max: Self) -> impl Iterator<Item = Self> {
        (min.0.z..=max.0.z).flat_map(move |z| {
            (min.0.y..=max.0.y)
                .flat_map(move |y| (min.0.x..=max.0.x).map(move |x| Self(I16Vec3::new(x, y, z))))
        })
    }
}

impl PartialOrd for MapBlockPos {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Orders by `z`, then `y`, then `x`, which is the order blocks are iterated in.
impl Ord for MapBlockPos {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.0.z, self.0.y, self.0.x).cmp(&(other.0.z, other.0.y, other.0.x))
    }
}

impl Display for MapBlockPos {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        // use double square brackets to indicate that a map block is bigger than a single map node
        write!(formatter, "[[{}, {}, {}]]", self.0.x, self.0.y, self.0.z)
    }
}

impl Debug for MapBlockPos {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        Display::fmt(self, formatter)
    }
}

impl From<MapBlockPos> for MapNodePos {
    fn from(value: MapBlockPos) -> Self {
        Self(value.0 << MapBlockPos::SIZE_BITS)
    }
}

impl From<MapBlockPos> for I16Vec3 {
    fn from(value: MapBlockPos) -> Self {
        value.vec()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_division_at_negative_boundary() {
        let block = |x: i16| MapBlockPos::for_node(MapNodePos::new(x, 0, 0)).vec().x;
        assert_eq!(block(-1), -1);
        assert_eq!(block(-16), -1);
        assert_eq!(block(-17), -2);
        assert_eq!(block(0), 0);
        assert_eq!(block(15), 0);
        assert_eq!(block(16), 1);
        assert_eq!(block(i16::MIN), -2048);
        assert_eq!(block(i16::MAX), 2047);
    }

    #[test]
    fn node_position_round_trip() {
        for x in [-33, -17, -16, -15, -1, 0, 1, 15, 16, 31_000] {
            for y in [-1, 0, 17] {
                for z in [-300, 5] {
                    let pos = MapNodePos::new(x, y, z);
                    let (block, index) = pos.split_index();
                    assert_eq!(block.node_pos(index), pos, "round trip of {pos}");
                    assert!(block.contains(pos), "{block} should contain {pos}");
                }
            }
        }
    }

    #[test]
    fn block_corners() {
        let block = MapBlockPos::new(I16Vec3::new(-1, 0, 2)).unwrap_or(MapBlockPos::ZERO);
        assert_eq!(block.min_node(), MapNodePos::new(-16, 0, 32));
        assert_eq!(block.max_node(), MapNodePos::new(-1, 15, 47));
    }

    #[test]
    fn area_iteration_is_sorted() {
        let min = MapBlockPos::for_pos(I16Vec3::new(-16, -16, -16));
        let max = MapBlockPos::for_pos(I16Vec3::new(16, 0, 16));
        let blocks: Vec<_> = MapBlockPos::iter_area(min, max).collect();
        assert_eq!(blocks.len(), 2 * 2 * 2);
        assert!(blocks.is_sorted(), "area iteration must follow the block order");
    }

    #[test]
    fn checked_add_stays_in_world() {
        assert_eq!(MapBlockPos::MAX.checked_add(I16Vec3::X), None);
        assert_eq!(
            MapBlockPos::ZERO.checked_add(I16Vec3::NEG_Y),
            MapBlockPos::new(I16Vec3::new(0, -1, 0))
        );
    }
}
