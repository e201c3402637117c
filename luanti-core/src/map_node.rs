//! Contains a single `MapNode` which is the fundamental building block (voxel, cube) of a Luanti
//! world.

use std::fmt::{self, Display};

use crate::{content_id::ContentId, light::LightBank, map_block::MapBlockPos};
use glam::{I16Vec3, IVec3, U8Vec3, U16Vec3, UVec3};

/// The six face-adjacent directions in the order `+X, -X, +Y, -Y, +Z, -Z`.
pub const FACE_DIRECTIONS: [I16Vec3; 6] = [
    I16Vec3::new(1, 0, 0),
    I16Vec3::new(-1, 0, 0),
    I16Vec3::new(0, 1, 0),
    I16Vec3::new(0, -1, 0),
    I16Vec3::new(0, 0, 1),
    I16Vec3::new(0, 0, -1),
];

/// Direction towards the sky
pub const UP: I16Vec3 = I16Vec3::new(0, 1, 0);

/// Direction towards the ground; sunlight travels this way without attenuation.
pub const DOWN: I16Vec3 = I16Vec3::new(0, -1, 0);

/// A single map node with its parameters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MapNode {
    /// describes the _material_ this node is made of.
    pub content_id: ContentId,
    /// content-dependent auxiliary parameter 1 describing the properties of this node
    pub param1: u8,
    /// content-dependent auxiliary parameter 2 describing the properties of this node
    pub param2: u8,
}

impl MapNode {
    /// The sentinel returned for nodes of blocks that are not loaded.
    pub const IGNORE: Self = Self::new(ContentId::IGNORE);

    /// A node of air without any light.
    pub const AIR: Self = Self::new(ContentId::AIR);

    /// Creates a node of the given content with both parameters cleared.
    #[must_use]
    pub const fn new(content_id: ContentId) -> Self {
        Self {
            content_id,
            param1: 0,
            param2: 0,
        }
    }

    /// Creates a node of the given content with the given `param2`.
    #[must_use]
    pub const fn with_param2(content_id: ContentId, param2: u8) -> Self {
        Self {
            content_id,
            param1: 0,
            param2,
        }
    }

    /// Returns the light level stored in `param1` for the given bank.
    ///
    /// This is only meaningful for content which stores light in `param1`.
    #[must_use]
    pub const fn stored_light(self, bank: LightBank) -> u8 {
        bank.get(self.param1)
    }

    /// Stores a light level in `param1` for the given bank.
    pub fn set_stored_light(&mut self, bank: LightBank, light: u8) {
        self.param1 = bank.set(self.param1, light);
    }

    /// Returns `true` if this is the sentinel for unloaded space.
    #[must_use]
    pub fn is_ignore(self) -> bool {
        self.content_id == ContentId::IGNORE
    }
}

/// The coordinates of a single node within the world
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MapNodePos(pub I16Vec3);

impl MapNodePos {
    /// Position of the map node at the world's center
    pub const ZERO: Self = Self(I16Vec3::ZERO);
    /// Position of the map node with the lowest possible coordinates.
    pub const MIN: Self = Self(I16Vec3::MIN);
    /// Position of the map node with the highest possible coordinates.
    pub const MAX: Self = Self(I16Vec3::MAX);

    /// Creates a node position from its components.
    #[must_use]
    pub const fn new(x: i16, y: i16, z: i16) -> Self {
        Self(I16Vec3::new(x, y, z))
    }

    /// Converts a wide vector into a node position if it fits into the world.
    #[must_use]
    pub fn from_ivec3(vec: IVec3) -> Option<Self> {
        Some(Self(I16Vec3::new(
            i16::try_from(vec.x).ok()?,
            i16::try_from(vec.y).ok()?,
            i16::try_from(vec.z).ok()?,
        )))
    }

    /// Widens this position for arithmetic that might leave the `i16` range.
    #[must_use]
    pub fn as_ivec3(self) -> IVec3 {
        self.0.as_ivec3()
    }

    /// Splits a map node position into its map block position and its index therein.
    #[must_use]
    pub fn split_index(self) -> (MapBlockPos, MapNodeIndex) {
        (self.block_pos(), self.index())
    }

    /// Returns the position of the map block which contains this node.
    #[must_use]
    pub const fn block_pos(self) -> MapBlockPos {
        MapBlockPos::for_node(self)
    }

    /// Returns the index of this node within its map block.
    #[must_use]
    pub fn index(self) -> MapNodeIndex {
        MapNodeIndex::for_node(self)
    }

    /// Returns the node position with a given displacement or `None` if it would leave the world.
    #[must_use]
    pub fn checked_add(self, delta: I16Vec3) -> Option<Self> {
        self.0.checked_add(delta).map(Self)
    }

    /// Iterates over the (up to six) face-adjacent neighbors together with their direction.
    pub fn neighbors(self) -> impl Iterator<Item = (I16Vec3, Self)> {
        FACE_DIRECTIONS
            .into_iter()
            .filter_map(move |dir| self.checked_add(dir).map(|pos| (dir, pos)))
    }
}

impl Display for MapNodePos {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "({}, {}, {})", self.0.x, self.0.y, self.0.z)
    }
}

impl From<MapNodePos> for I16Vec3 {
    fn from(value: MapNodePos) -> Self {
        value.0
    }
}

/// The index of a map node within its map block.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MapNodeIndex(u16);

impl MapNodeIndex {
    /// Bit indices of the individual coordinates within the index.
    const SHIFT: UVec3 = UVec3::new(0, MapBlockPos::SIZE_BITS, 2 * MapBlockPos::SIZE_BITS);
    /// Bit masks of the individual coordinates when they've been aligned towards the least significant bit.
    const MASK: U16Vec3 = U16Vec3::splat(MapBlockPos::SIZE_MASK);
    /// index of the first node within a block (0, 0, 0)
    pub const MIN: Self = Self(0);
    /// index of the last node within a block (15, 15, 15)
    pub const MAX: Self = Self(MapBlockPos::NODE_COUNT - 1);

    /// Converts a given node position into the index within its containing map block.
    #[must_use]
    pub fn for_node(node_pos: MapNodePos) -> Self {
        // only retain the lower-most bits of the coordinates and align them next to each other
        let vec = (node_pos.0.as_u16vec3() & Self::MASK) << Self::SHIFT;
        Self(vec.x | vec.y | vec.z)
    }

    /// Builds an index from in-block coordinates; excess bits are wrapped around.
    #[must_use]
    pub fn from_local(local: U16Vec3) -> Self {
        let vec = (local & Self::MASK) << Self::SHIFT;
        Self(vec.x | vec.y | vec.z)
    }

    /// Iterates over all indices of a block in storage order (x fastest, z slowest).
    pub fn all() -> impl Iterator<Item = Self> {
        (Self::MIN.0..=Self::MAX.0).map(Self)
    }
}

impl From<MapNodeIndex> for U16Vec3 {
    fn from(value: MapNodeIndex) -> Self {
        // right-align the bits of all three coordinates and mask off excessive high-bits
        (U16Vec3::splat(value.0) >> MapNodeIndex::SHIFT) & MapNodeIndex::MASK
    }
}

impl From<MapNodeIndex> for U8Vec3 {
    fn from(value: MapNodeIndex) -> Self {
        U16Vec3::from(value).as_u8vec3()
    }
}

impl From<MapNodeIndex> for UVec3 {
    fn from(value: MapNodeIndex) -> Self {
        U16Vec3::from(value).as_uvec3()
    }
}

impl From<MapNodeIndex> for u16 {
    fn from(value: MapNodeIndex) -> Self {
        value.0
    }
}

impl From<MapNodeIndex> for usize {
    fn from(value: MapNodeIndex) -> Self {
        value.0.into()
    }
}

impl From<usize> for MapNodeIndex {
    fn from(value: usize) -> Self {
        #[expect(
            clippy::cast_possible_truncation,
            reason = "truncation is the expected behavior"
        )]
        Self((value as u16) & MapBlockPos::NODE_COUNT_MASK)
    }
}

impl From<u16> for MapNodeIndex {
    fn from(value: u16) -> Self {
        Self(value & MapBlockPos::NODE_COUNT_MASK)
    }
}
