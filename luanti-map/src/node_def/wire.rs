//! The content definition table as sent to clients.
//!
//! Every definition is wrapped in a length-prefixed string, and the whole list in a 32 bit
//! length-prefixed string, so readers can skip fields they do not understand.

use std::array;

use log::trace;
use luanti_core::{ContentId, LIGHT_MAX};

use super::{
    ContentFeatures, LiquidType, NodeBox, NodeDefManager, ParamType2, SPECIAL_TILE_COUNT,
    SimpleSoundSpec, TileDef,
};
use crate::serialization::{
    DeserializeError, DeserializeResult, Deserializer, SerializeError, SerializeResult, Serializer,
};

/// Oldest protocol version which can be served a content definition table
pub const MIN_PROTOCOL_VERSION: u16 = 24;

const TABLE_VERSION: u8 = 1;
const TILE_COUNT: u8 = 6;

/// Encodes all definitions except the built-in ones for the given protocol version.
///
/// # Errors
///
/// Fails for protocol versions older than [`MIN_PROTOCOL_VERSION`] or if a field exceeds its
/// length prefix.
pub fn serialize_node_defs(
    node_defs: &NodeDefManager,
    protocol_version: u16,
) -> SerializeResult<Vec<u8>> {
    if protocol_version < MIN_PROTOCOL_VERSION {
        return Err(SerializeError::UnsupportedProtocol(protocol_version));
    }

    let entries: Vec<_> = node_defs
        .iter()
        .filter(|(id, features)| !id.is_reserved() && !features.name.is_empty())
        .collect();

    let mut ser = Serializer::with_capacity(entries.len() * 256);
    ser.write_u8(TABLE_VERSION);
    ser.write_u16(
        u16::try_from(entries.len()).map_err(|_err| SerializeError::TooLarge("node definitions"))?,
    );
    let list = ser.write_marker(4);
    for (id, features) in entries {
        ser.write_u16(id.0);
        let wrapped = ser.write_marker(2);
        serialize_features(features, &mut ser, protocol_version)?;
        ser.finish_marker("node definition", wrapped)?;
    }
    ser.finish_marker("node definition list", list)?;
    Ok(ser.into_inner())
}

/// Decodes a table produced by [`serialize_node_defs`].
///
/// Resolved references (liquid alternatives, `connects_to`) are kept as sent; names that only
/// exist on the server side are not restored.
///
/// # Errors
///
/// Fails on truncated or malformed data.
pub fn deserialize_node_defs(data: &[u8]) -> DeserializeResult<Vec<(ContentId, ContentFeatures)>> {
    let mut deser = Deserializer::new(data);
    let version = deser.read_u8()?;
    if version != TABLE_VERSION {
        return Err(DeserializeError::UnsupportedVersion(version));
    }
    let count = deser.read_u16()?;
    let mut list = Deserializer::new(deser.read_bytes32()?);

    let mut result = Vec::with_capacity(usize::from(count));
    for _ in 0..count {
        let id = ContentId(list.read_u16()?);
        let mut wrapped = Deserializer::new(list.read_bytes16()?);
        result.push((id, deserialize_features(&mut wrapped)?));
    }
    Ok(result)
}

/// Encodes a single definition.
///
/// # Errors
///
/// Fails if a field exceeds its length prefix.
pub(crate) fn serialize_features(
    features: &ContentFeatures,
    ser: &mut Serializer,
    protocol_version: u16,
) -> SerializeResult {
    ser.write_u8(if protocol_version < 27 { 7 } else { 8 });

    ser.write_string16("node name", &features.name)?;
    ser.write_u16(
        u16::try_from(features.groups.len()).map_err(|_err| SerializeError::TooLarge("groups"))?,
    );
    for (group, rating) in &features.groups {
        ser.write_string16("group name", group)?;
        ser.write_i16(*rating);
    }

    ser.write_u8(features.drawtype.into());
    ser.write_f1000(features.visual_scale);
    ser.write_u8(TILE_COUNT);
    for tile in &features.tiles {
        tile.serialize(ser, protocol_version)?;
    }
    ser.write_u8(TILE_COUNT);
    for tile in &features.special_tiles {
        tile.serialize(ser, protocol_version)?;
    }
    ser.write_u8(features.alpha);
    ser.write_bytes(&features.post_effect_color);

    ser.write_u8(features.param_type.into());
    let param_type_2 = if protocol_version < 28 && features.param_type_2 == ParamType2::MeshOptions
    {
        ParamType2::None
    } else {
        features.param_type_2
    };
    ser.write_u8(param_type_2.into());

    for flag in [
        features.is_ground_content,
        features.light_propagates,
        features.sunlight_propagates,
        features.walkable,
        features.pointable,
        features.diggable,
        features.climbable,
        features.buildable_to,
    ] {
        ser.write_bool(flag);
    }
    // legacy metadata name
    ser.write_string16("metadata name", "")?;

    ser.write_u8(features.liquid_type.into());
    ser.write_string16("liquid alternative", &features.liquid_alternative_flowing)?;
    ser.write_string16("liquid alternative", &features.liquid_alternative_source)?;
    ser.write_u8(features.liquid_viscosity);
    ser.write_bool(features.liquid_renewable);
    ser.write_u8(features.light_source);
    ser.write_u32(features.damage_per_second);
    features.node_box.serialize(ser, protocol_version)?;
    features.selection_box.serialize(ser, protocol_version)?;
    ser.write_bool(features.legacy_facedir_simple);
    ser.write_bool(features.legacy_wallmounted);
    for sound in [
        &features.sound_footstep,
        &features.sound_dig,
        &features.sound_dug,
    ] {
        ser.write_string16("sound name", &sound.name)?;
        ser.write_f1000(sound.gain);
    }
    ser.write_bool(features.rightclickable);
    ser.write_u8(features.drowning);
    ser.write_u8(features.leveled);
    ser.write_u8(features.liquid_range);
    ser.write_u8(features.waving);

    // fields added after the format was versioned
    ser.write_string16("mesh", &features.mesh)?;
    features.collision_box.serialize(ser, protocol_version)?;
    ser.write_bool(features.floodable);
    ser.write_u16(
        u16::try_from(features.connects_to_ids.len())
            .map_err(|_err| SerializeError::TooLarge("connects_to"))?,
    );
    for id in &features.connects_to_ids {
        ser.write_u16(id.0);
    }
    ser.write_u8(features.connect_sides);
    Ok(())
}

/// Decodes a single definition of version 7 or 8.
///
/// # Errors
///
/// Fails on truncated or malformed data before the optional tail.
pub(crate) fn deserialize_features(deser: &mut Deserializer<'_>) -> DeserializeResult<ContentFeatures> {
    let version = deser.read_u8()?;
    if !(7..=8).contains(&version) {
        return Err(DeserializeError::UnsupportedVersion(version));
    }

    let mut features = ContentFeatures {
        name: deser.read_string16()?,
        groups: Default::default(),
        ..ContentFeatures::default()
    };
    for _ in 0..deser.read_u16()? {
        let group = deser.read_string16()?;
        let rating = deser.read_i16()?;
        features.groups.insert(group, rating);
    }

    features.drawtype = deser.read_u8()?.try_into()?;
    features.visual_scale = deser.read_f1000()?;
    read_tiles(deser, &mut features.tiles)?;
    read_tiles(deser, &mut features.special_tiles)?;
    features.alpha = deser.read_u8()?;
    features.post_effect_color = deser.take_n()?;
    features.param_type = deser.read_u8()?.try_into()?;
    features.param_type_2 = deser.read_u8()?.try_into()?;

    features.is_ground_content = deser.read_bool()?;
    features.light_propagates = deser.read_bool()?;
    features.sunlight_propagates = deser.read_bool()?;
    features.walkable = deser.read_bool()?;
    features.pointable = deser.read_bool()?;
    features.diggable = deser.read_bool()?;
    features.climbable = deser.read_bool()?;
    features.buildable_to = deser.read_bool()?;
    // legacy metadata name
    deser.read_bytes16()?;

    features.liquid_type = LiquidType::try_from(deser.read_u8()?)?;
    features.liquid_alternative_flowing = deser.read_string16()?;
    features.liquid_alternative_source = deser.read_string16()?;
    features.liquid_viscosity = deser.read_u8()?;
    features.liquid_renewable = deser.read_bool()?;
    features.light_source = deser.read_u8()?.min(LIGHT_MAX);
    features.damage_per_second = deser.read_u32()?;
    features.node_box = NodeBox::deserialize(deser)?;
    features.selection_box = NodeBox::deserialize(deser)?;
    features.legacy_facedir_simple = deser.read_bool()?;
    features.legacy_wallmounted = deser.read_bool()?;
    features.sound_footstep = read_sound(deser)?;
    features.sound_dig = read_sound(deser)?;
    features.sound_dug = read_sound(deser)?;
    features.rightclickable = deser.read_bool()?;
    features.drowning = deser.read_u8()?;
    features.leveled = deser.read_u8()?;
    features.liquid_range = deser.read_u8()?;
    features.waving = deser.read_u8()?;

    if let Err(error) = read_tail(deser, &mut features) {
        trace!("{}: incomplete definition tail ({error})", features.name);
    }
    Ok(features)
}

fn read_tail(deser: &mut Deserializer<'_>, features: &mut ContentFeatures) -> DeserializeResult<()> {
    features.mesh = deser.read_string16()?;
    features.collision_box = NodeBox::deserialize(deser)?;
    features.floodable = deser.read_bool()?;
    let count = deser.read_u16()?;
    features.connects_to_ids = (0..count)
        .map(|_| deser.read_u16().map(ContentId))
        .collect::<DeserializeResult<_>>()?;
    features.connect_sides = deser.read_u8()?;
    Ok(())
}

fn read_tiles(deser: &mut Deserializer<'_>, tiles: &mut [TileDef; SPECIAL_TILE_COUNT]) -> DeserializeResult<()> {
    let count = deser.read_u8()?;
    if count != TILE_COUNT {
        return Err(DeserializeError::InvalidValue(format!(
            "expected {TILE_COUNT} tiles, found {count}"
        )));
    }
    for tile in tiles {
        *tile = TileDef::deserialize(deser)?;
    }
    Ok(())
}

fn read_sound(deser: &mut Deserializer<'_>) -> DeserializeResult<SimpleSoundSpec> {
    Ok(SimpleSoundSpec {
        name: deser.read_string16()?,
        gain: deser.read_f1000()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_def::{Aabb, ConnectedBoxes, DrawType, NodeDefRegistry, ParamType, TileAnimation};

    fn fence() -> ContentFeatures {
        ContentFeatures {
            drawtype: DrawType::NodeBox,
            groups: [("choppy".to_owned(), 2), ("fence".to_owned(), 1)].into(),
            tiles: array::from_fn(|_| TileDef {
                animation: TileAnimation::VerticalFrames {
                    aspect_w: 16,
                    aspect_h: 16,
                    length: 1.5,
                },
                ..TileDef::named("default_wood.png")
            }),
            param_type_2: ParamType2::MeshOptions,
            node_box: NodeBox::Connected(Box::new(ConnectedBoxes {
                fixed: vec![Aabb::FULL_NODE],
                ..ConnectedBoxes::default()
            })),
            sound_footstep: SimpleSoundSpec {
                name: "default_wood_footstep".into(),
                gain: 0.5,
            },
            connects_to: vec!["group:fence".into()],
            connect_sides: ConnectedBoxes::LEFT | ConnectedBoxes::RIGHT,
            ..ContentFeatures::named("default:fence_wood")
        }
    }

    #[test]
    fn table_skips_built_in_content() {
        let mut registry = NodeDefRegistry::new();
        let fence_id = registry.register(fence());
        let node_defs = registry.freeze();

        let data = serialize_node_defs(&node_defs, 28).unwrap();
        let decoded = deserialize_node_defs(&data).unwrap();
        assert_eq!(decoded.len(), 1, "only the fence is sent");
        let (id, features) = &decoded[0];
        assert_eq!(*id, fence_id);

        let original = node_defs.get(fence_id);
        assert_eq!(features.connects_to_ids, vec![fence_id]);
        assert_eq!(features.param_type_2, ParamType2::MeshOptions);
        let expected = ContentFeatures {
            connects_to: Vec::new(),
            liquid_alternative_flowing_id: ContentId::IGNORE,
            liquid_alternative_source_id: ContentId::IGNORE,
            ..original.clone()
        };
        assert_eq!(*features, expected);
    }

    #[test]
    fn old_protocols_get_a_degraded_table() {
        let mut registry = NodeDefRegistry::new();
        let fence_id = registry.register(fence());
        let node_defs = registry.freeze();

        let data = serialize_node_defs(&node_defs, 26).unwrap();
        let decoded = deserialize_node_defs(&data).unwrap();
        let (_, features) = &decoded[0];
        assert_eq!(features.param_type_2, ParamType2::None);
        assert_eq!(features.node_box, NodeBox::Fixed(vec![Aabb::FULL_NODE]));
        assert_eq!(features.tiles[0].animation, node_defs.get(fence_id).tiles[0].animation);

        assert_eq!(
            serialize_node_defs(&node_defs, 23),
            Err(SerializeError::UnsupportedProtocol(23))
        );
    }

    #[test]
    fn truncated_tail_is_tolerated() {
        let features = ContentFeatures {
            light_propagates: true,
            param_type: ParamType::Light,
            mesh: "fence.obj".into(),
            ..fence()
        };
        let mut ser = Serializer::default();
        serialize_features(&features, &mut ser, 28).unwrap();
        let data = ser.into_inner();

        // drop connect_sides
        let mut deser = Deserializer::new(&data[..data.len() - 1]);
        let decoded = deserialize_features(&mut deser).unwrap();
        assert_eq!(decoded.mesh, "fence.obj");
        assert_eq!(decoded.connect_sides, 0, "missing tail falls back to the default");
        assert!(decoded.light_propagates, "mandatory part is intact");

        // cutting into the mandatory part is an error
        let mut deser = Deserializer::new(&data[..40]);
        assert_eq!(deserialize_features(&mut deser), Err(DeserializeError::Eof));
    }
}
