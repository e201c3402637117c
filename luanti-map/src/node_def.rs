//! Content definitions: what a content id means to the map engine.
//!
//! Definitions are collected in a [`NodeDefRegistry`] while mods register their nodes and then
//! frozen into an immutable [`NodeDefManager`] shared by all worker threads.

mod node_box;
mod registry;
mod resolver;
mod tile;
mod wire;

use std::collections::BTreeMap;

use luanti_core::{ContentId, LIGHT_MAX};

pub use node_box::{Aabb, ConnectedBoxes, NodeBox};
pub use registry::{NodeDefManager, NodeDefRegistry};
pub use resolver::{NodeNameList, NodeResolver, ResolverId};
pub use tile::{TileAnimation, TileDef};
pub use wire::{MIN_PROTOCOL_VERSION, deserialize_node_defs, serialize_node_defs};

/// Size of a node in world units; node boxes are expressed in these units.
pub const BS: f32 = 10.0;

/// Number of special tiles every definition carries
pub const SPECIAL_TILE_COUNT: usize = 6;

/// Declares a fieldless enum with a fixed `u8` wire representation.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        pub enum $name:ident {
            $( $(#[$variant_meta:meta])* $variant:ident = $value:literal, )*
        }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum $name {
            $( $(#[$variant_meta])* $variant = $value, )*
        }

        impl From<$name> for u8 {
            fn from(value: $name) -> Self {
                value as u8
            }
        }

        impl TryFrom<u8> for $name {
            type Error = crate::serialization::DeserializeError;

            fn try_from(value: u8) -> Result<Self, Self::Error> {
                match value {
                    $( $value => Ok(Self::$variant), )*
                    other => Err(crate::serialization::DeserializeError::InvalidValue(format!(
                        concat!("invalid ", stringify!($name), ": {}"),
                        other
                    ))),
                }
            }
        }
    };
}

pub(crate) use wire_enum;

wire_enum! {
    /// How a node is rendered. Only relevant for clients, but part of the definition table.
    pub enum DrawType {
        /// A solid cube
        Normal = 0,
        /// Invisible
        AirLike = 1,
        /// Liquid source
        Liquid = 2,
        /// Flowing liquid with a level
        FlowingLiquid = 3,
        /// Glass
        GlassLike = 4,
        /// Leaves
        AllFaces = 5,
        /// Leaves depending on client settings
        AllFacesOptional = 6,
        /// Torch
        TorchLike = 7,
        /// Sign
        SignLike = 8,
        /// Plant
        PlantLike = 9,
        /// Fence
        FenceLike = 10,
        /// Rail
        RailLike = 11,
        /// Composed from node boxes
        NodeBox = 12,
        /// Framed glass
        GlassLikeFramed = 13,
        /// Fire
        FireLike = 14,
        /// Framed glass depending on client settings
        GlassLikeFramedOptional = 15,
        /// Custom mesh
        Mesh = 16,
    }
}

wire_enum! {
    /// Meaning of `param1`
    pub enum ParamType {
        /// Unused
        None = 0,
        /// Holds the light of both banks
        Light = 1,
    }
}

wire_enum! {
    /// Meaning of `param2`
    pub enum ParamType2 {
        /// Unused
        None = 0,
        /// Free for content-specific use
        Full = 1,
        /// Level and flow direction of a flowing liquid
        FlowingLiquid = 2,
        /// Facing direction
        FaceDir = 3,
        /// Attached face
        WallMounted = 4,
        /// Level of a leveled node box
        Leveled = 5,
        /// Rotation in degrees/2
        DegRotate = 6,
        /// Plant mesh options
        MeshOptions = 7,
    }
}

wire_enum! {
    /// Liquid behaviour of a node
    pub enum LiquidType {
        /// Not a liquid
        None = 0,
        /// Flowing liquid; its level lives in `param2`
        Flowing = 1,
        /// Liquid source
        Source = 2,
    }
}

/// A sound reference with its gain.
#[derive(Clone, Debug, PartialEq)]
pub struct SimpleSoundSpec {
    /// Sound name without extension
    pub name: String,
    /// Loudness
    pub gain: f32,
}

impl SimpleSoundSpec {
    /// A sound spec which plays the given sound at full gain.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            gain: 1.0,
        }
    }
}

impl Default for SimpleSoundSpec {
    fn default() -> Self {
        Self {
            name: String::new(),
            gain: 1.0,
        }
    }
}

/// Everything the server knows about a single kind of content.
#[derive(Clone, Debug, PartialEq)]
#[expect(clippy::struct_excessive_bools, reason = "this is mandated by the format")]
pub struct ContentFeatures {
    /// Unique node name, e.g. `default:stone`
    pub name: String,
    /// Group memberships with their rating
    pub groups: BTreeMap<String, i16>,
    /// Rendering mode
    pub drawtype: DrawType,
    /// Mesh file for `DrawType::Mesh`
    pub mesh: String,
    /// Scale applied to the visual
    pub visual_scale: f32,
    /// Tiles in the order +Y, -Y, +X, -X, +Z, -Z
    pub tiles: [TileDef; 6],
    /// Extra tiles, e.g. for flowing liquids
    pub special_tiles: [TileDef; SPECIAL_TILE_COUNT],
    /// Legacy transparency
    pub alpha: u8,
    /// Screen tint while the camera is inside this node as `[a, r, g, b]`
    pub post_effect_color: [u8; 4],
    /// Meaning of `param1`
    pub param_type: ParamType,
    /// Meaning of `param2`
    pub param_type_2: ParamType2,
    /// May be replaced by the map generator
    pub is_ground_content: bool,
    /// Light passes through this node
    pub light_propagates: bool,
    /// Sunlight passes through this node straight down without losing intensity
    pub sunlight_propagates: bool,
    /// Collides with players
    pub walkable: bool,
    /// Can be pointed at
    pub pointable: bool,
    /// Can be dug
    pub diggable: bool,
    /// Can be climbed
    pub climbable: bool,
    /// Is replaced when building onto it
    pub buildable_to: bool,
    /// Has a right click action
    pub rightclickable: bool,
    /// Is replaced by flowing liquids
    pub floodable: bool,
    /// Liquid behaviour
    pub liquid_type: LiquidType,
    /// Name of the flowing variant of this liquid
    pub liquid_alternative_flowing: String,
    /// Name of the source variant of this liquid
    pub liquid_alternative_source: String,
    /// Resolved id of `liquid_alternative_flowing`; `IGNORE` until the registry is frozen
    pub liquid_alternative_flowing_id: ContentId,
    /// Resolved id of `liquid_alternative_source`; `IGNORE` until the registry is frozen
    pub liquid_alternative_source_id: ContentId,
    /// Resistance to flowing; higher values slow the flow down
    pub liquid_viscosity: u8,
    /// Two neighboring sources create a new source
    pub liquid_renewable: bool,
    /// Maximum number of nodes the liquid flows sideways
    pub liquid_range: u8,
    /// Emitted light, never more than `LIGHT_MAX`
    pub light_source: u8,
    /// Damage dealt to players inside this node
    pub damage_per_second: u32,
    /// Visual geometry for `DrawType::NodeBox`
    pub node_box: NodeBox,
    /// Geometry used for pointing
    pub selection_box: NodeBox,
    /// Geometry used for collisions
    pub collision_box: NodeBox,
    /// Legacy rotation support
    pub legacy_facedir_simple: bool,
    /// Legacy wall mounting support
    pub legacy_wallmounted: bool,
    /// Sound when walking on the node
    pub sound_footstep: SimpleSoundSpec,
    /// Sound while digging
    pub sound_dig: SimpleSoundSpec,
    /// Sound after digging
    pub sound_dug: SimpleSoundSpec,
    /// Breath lost per second while inside
    pub drowning: u8,
    /// Level for leveled node boxes
    pub leveled: u8,
    /// Waving mode
    pub waving: u8,
    /// Names (or `group:` names) this node connects to
    pub connects_to: Vec<String>,
    /// Resolved ids of `connects_to`, sorted and without duplicates
    pub connects_to_ids: Vec<ContentId>,
    /// Faces where other nodes may connect (bit mask, see [`ConnectedBoxes`])
    pub connect_sides: u8,
}

impl Default for ContentFeatures {
    fn default() -> Self {
        Self {
            name: String::new(),
            // unknown nodes can be dug
            groups: BTreeMap::from([(String::from("dig_immediate"), 2)]),
            drawtype: DrawType::Normal,
            mesh: String::new(),
            visual_scale: 1.0,
            tiles: Default::default(),
            special_tiles: Default::default(),
            alpha: 255,
            post_effect_color: [0; 4],
            param_type: ParamType::None,
            param_type_2: ParamType2::None,
            is_ground_content: false,
            light_propagates: false,
            sunlight_propagates: false,
            walkable: true,
            pointable: true,
            diggable: true,
            climbable: false,
            buildable_to: false,
            rightclickable: true,
            floodable: false,
            liquid_type: LiquidType::None,
            liquid_alternative_flowing: String::new(),
            liquid_alternative_source: String::new(),
            liquid_alternative_flowing_id: ContentId::IGNORE,
            liquid_alternative_source_id: ContentId::IGNORE,
            liquid_viscosity: 0,
            liquid_renewable: true,
            liquid_range: crate::liquid::LIQUID_LEVEL_MAX + 1,
            light_source: 0,
            damage_per_second: 0,
            node_box: NodeBox::Regular,
            selection_box: NodeBox::Regular,
            collision_box: NodeBox::Regular,
            legacy_facedir_simple: false,
            legacy_wallmounted: false,
            sound_footstep: SimpleSoundSpec::default(),
            sound_dig: SimpleSoundSpec::named("__group"),
            sound_dug: SimpleSoundSpec::default(),
            drowning: 0,
            leveled: 0,
            waving: 0,
            connects_to: Vec::new(),
            connects_to_ids: Vec::new(),
            connect_sides: 0,
        }
    }
}

impl ContentFeatures {
    /// Creates the default definition with the given name.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::default()
        }
    }

    /// Whether this node is a liquid of any kind
    #[must_use]
    pub fn is_liquid(&self) -> bool {
        self.liquid_type != LiquidType::None
    }

    /// Whether `param1` of this node holds light values
    #[must_use]
    pub fn stores_light(&self) -> bool {
        self.param_type == ParamType::Light
    }

    /// The light emitted by this node, clamped to the artificial maximum.
    #[must_use]
    pub fn light_emission(&self) -> u8 {
        self.light_source.min(LIGHT_MAX)
    }

    /// Rating of the given group or `0` if the node is no member
    #[must_use]
    pub fn group(&self, name: &str) -> i16 {
        self.groups.get(name).copied().unwrap_or(0)
    }
}
