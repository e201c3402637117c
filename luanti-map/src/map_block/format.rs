//! The serialized form of a map block, shared between the database and the network.
//!
//! Version 29 compresses everything after the version byte with zstd. Versions 25 to 28 store
//! the header uncompressed and compress the node and metadata sections with zlib.

use std::collections::{BTreeMap, HashMap};

use glam::Vec3;
use log::warn;
use luanti_core::{ContentId, MapBlockNodes, MapBlockPos, MapNode, MapNodeIndex};

use super::{MapBlock, NodeMetadata, NodeTimer, StaticObject, StringVar};
use crate::{
    node_def::NodeDefManager,
    serialization::{
        DeserializeError, DeserializeResult, Deserializer, SerializeError, SerializeResult,
        Serializer,
        compression::{decompress_zlib, zstd_compress, zstd_decompress},
    },
};

/// The only version ever written
pub const SER_FMT_VER_HIGHEST_WRITE: u8 = 29;
/// The oldest version which can still be read
pub const SER_FMT_VER_LOWEST_READ: u8 = 25;

const FLAG_IS_UNDERGROUND: u8 = 0x01;
const FLAG_DAY_NIGHT_DIFFERS: u8 = 0x02;
const FLAG_NOT_GENERATED: u8 = 0x08;

const CONTENT_WIDTH: u8 = 2;
const PARAMS_WIDTH: u8 = 2;
const NAME_ID_MAPPING_VERSION: u8 = 0;
const STATIC_OBJECTS_VERSION: u8 = 0;
const NODE_TIMER_DATA_LEN: u8 = 10;
const METADATA_VERSION: u8 = 2;

const END_INVENTORY: &[u8] = b"EndInventory";
const NODE_COUNT: usize = MapBlockPos::NODE_COUNT as usize;

/// Where a serialized block is going to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SerializationTarget {
    /// The map database: node names are mapped, all sections are present
    Disk,
    /// A client: global content ids, only what a client needs
    Network,
}

/// Encodes a block in the current format version.
///
/// # Errors
///
/// Fails if `version` is not the current version, if a section exceeds its length prefix or if
/// compression fails.
pub fn serialize_block(
    block: &MapBlock,
    version: u8,
    target: SerializationTarget,
    node_defs: &NodeDefManager,
    compression_level: i32,
) -> SerializeResult<Vec<u8>> {
    if version != SER_FMT_VER_HIGHEST_WRITE {
        return Err(SerializeError::UnsupportedFormat(version));
    }
    let disk = target == SerializationTarget::Disk;

    let mut ser = Serializer::with_capacity(NODE_COUNT * 4 + 256);

    let mut flags = 0;
    if block.is_underground {
        flags |= FLAG_IS_UNDERGROUND;
    }
    let day_night_differs = block
        .day_night_differs
        .unwrap_or_else(|| block.compute_day_night_differs(node_defs));
    if day_night_differs {
        flags |= FLAG_DAY_NIGHT_DIFFERS;
    }
    if !block.generated {
        flags |= FLAG_NOT_GENERATED;
    }
    ser.write_u8(flags);
    ser.write_u16(block.lighting_complete);

    let content_ids: Vec<u16> = if disk {
        ser.write_u32(block.timestamp);
        let (local_ids, names) = name_id_mapping(block.nodes(), node_defs);
        ser.write_u8(NAME_ID_MAPPING_VERSION);
        ser.write_u16(
            u16::try_from(names.len()).map_err(|_err| SerializeError::TooLarge("name-id mapping"))?,
        );
        for (id, name) in names.iter().enumerate() {
            ser.write_u16(u16::try_from(id).map_err(|_err| SerializeError::TooLarge("name-id mapping"))?);
            ser.write_string16("node name", name)?;
        }
        local_ids
    } else {
        block.nodes.0.iter().map(|node| node.content_id.0).collect()
    };

    ser.write_u8(CONTENT_WIDTH);
    ser.write_u8(PARAMS_WIDTH);
    for id in content_ids {
        ser.write_u16(id);
    }
    for node in &block.nodes.0 {
        ser.write_u8(node.param1);
    }
    for node in &block.nodes.0 {
        ser.write_u8(node.param2);
    }

    write_metadata(&mut ser, block, disk)?;

    if disk {
        ser.write_u8(STATIC_OBJECTS_VERSION);
        ser.write_u16(
            u16::try_from(block.static_objects.len())
                .map_err(|_err| SerializeError::TooLarge("static objects"))?,
        );
        for object in &block.static_objects {
            ser.write_u8(object.kind);
            for value in object.pos.to_array() {
                ser.write_f1000(value);
            }
            ser.write_bytes16("static object", &object.data)?;
        }

        ser.write_u8(NODE_TIMER_DATA_LEN);
        ser.write_u16(
            u16::try_from(block.timers.len()).map_err(|_err| SerializeError::TooLarge("node timers"))?,
        );
        for (index, timer) in &block.timers {
            ser.write_u16(u16::from(*index));
            ser.write_i32(seconds_to_millis(timer.timeout));
            ser.write_i32(seconds_to_millis(timer.elapsed));
        }
    }

    let payload = ser.into_inner();
    let compressed = zstd_compress(&payload, compression_level)?;
    let mut result = Vec::with_capacity(compressed.len() + 1);
    result.push(version);
    result.extend_from_slice(&compressed);
    Ok(result)
}

/// Assigns compact local ids in order of first appearance.
fn name_id_mapping(nodes: &MapBlockNodes, node_defs: &NodeDefManager) -> (Vec<u16>, Vec<String>) {
    let mut mapping: HashMap<ContentId, u16> = HashMap::new();
    let mut names = Vec::new();
    let local_ids = nodes
        .0
        .iter()
        .map(|node| {
            *mapping.entry(node.content_id).or_insert_with(|| {
                names.push(node_defs.get(node.content_id).name.clone());
                // at most 4096 distinct ids exist within a block
                u16::try_from(names.len() - 1).unwrap_or(u16::MAX)
            })
        })
        .collect();
    (local_ids, names)
}

fn write_metadata(ser: &mut Serializer, block: &MapBlock, disk: bool) -> SerializeResult {
    if block.metadata.is_empty() {
        ser.write_u8(0);
        return Ok(());
    }
    ser.write_u8(METADATA_VERSION);
    ser.write_u16(
        u16::try_from(block.metadata.len()).map_err(|_err| SerializeError::TooLarge("metadata"))?,
    );
    for (index, meta) in &block.metadata {
        ser.write_u16(u16::from(*index));
        let vars: Vec<_> = meta
            .vars
            .iter()
            .filter(|(_, var)| disk || !var.private)
            .collect();
        ser.write_u32(
            u32::try_from(vars.len()).map_err(|_err| SerializeError::TooLarge("metadata vars"))?,
        );
        for (key, var) in vars {
            ser.write_string16("metadata key", key)?;
            ser.write_bytes32("metadata value", &var.value)?;
            ser.write_bool(var.private);
        }
        ser.write_bytes(&meta.inventory);
        if !meta.inventory.is_empty() && !meta.inventory.ends_with(b"\n") {
            ser.write_u8(b'\n');
        }
        ser.write_bytes(END_INVENTORY);
        ser.write_u8(b'\n');
    }
    Ok(())
}

#[expect(
    clippy::cast_possible_truncation,
    reason = "timers are far below the i32 millisecond range"
)]
fn seconds_to_millis(seconds: f32) -> i32 {
    (seconds * 1000.0) as i32
}

#[expect(
    clippy::cast_precision_loss,
    reason = "timers are far below the f32 integer precision"
)]
fn millis_to_seconds(millis: i32) -> f32 {
    millis as f32 / 1000.0
}

/// Decodes a block of version 25 to 29.
///
/// Node names unknown to `node_defs` are mapped to `ContentId::UNKNOWN`. Data following the last
/// section is ignored.
///
/// # Errors
///
/// Fails on unsupported versions, truncated or corrupt data.
pub fn deserialize_block(
    pos: MapBlockPos,
    data: &[u8],
    target: SerializationTarget,
    node_defs: &NodeDefManager,
) -> DeserializeResult<MapBlock> {
    let (&version, rest) = data.split_first().ok_or(DeserializeError::Eof)?;
    if !(SER_FMT_VER_LOWEST_READ..=SER_FMT_VER_HIGHEST_WRITE).contains(&version) {
        return Err(DeserializeError::UnsupportedVersion(version));
    }
    let disk = target == SerializationTarget::Disk;

    if version >= 29 {
        let (_, payload) = zstd_decompress(rest)?;
        read_current(pos, &mut Deserializer::new(&payload), disk, node_defs)
    } else {
        read_legacy(pos, version, &mut Deserializer::new(rest), disk, node_defs)
    }
}

struct Header {
    flags: u8,
    lighting_complete: u16,
}

fn block_from_header(pos: MapBlockPos, header: &Header) -> MapBlock {
    let mut block = MapBlock::new(pos);
    block.is_underground = header.flags & FLAG_IS_UNDERGROUND != 0;
    block.generated = header.flags & FLAG_NOT_GENERATED == 0;
    block.lighting_complete = header.lighting_complete;
    block
}

fn read_current(
    pos: MapBlockPos,
    deser: &mut Deserializer<'_>,
    disk: bool,
    node_defs: &NodeDefManager,
) -> DeserializeResult<MapBlock> {
    let header = Header {
        flags: deser.read_u8()?,
        lighting_complete: deser.read_u16()?,
    };
    let mut block = block_from_header(pos, &header);

    let mut mapping = None;
    if disk {
        block.timestamp = deser.read_u32()?;
        mapping = Some(read_name_id_mapping(deser)?);
    }

    read_widths(deser)?;
    let raw_nodes = read_nodes(deser)?;
    block.metadata = read_metadata(deser)?;

    if disk {
        block.static_objects = read_static_objects(deser)?;
        block.timers = read_timers(deser)?;
    }

    *block.nodes = resolve_nodes(raw_nodes, mapping.as_ref(), node_defs);
    Ok(block)
}

fn read_legacy(
    pos: MapBlockPos,
    version: u8,
    deser: &mut Deserializer<'_>,
    disk: bool,
    node_defs: &NodeDefManager,
) -> DeserializeResult<MapBlock> {
    let flags = deser.read_u8()?;
    let lighting_complete = if version >= 27 {
        deser.read_u16()?
    } else {
        0xffff
    };
    let mut block = block_from_header(
        pos,
        &Header {
            flags,
            lighting_complete,
        },
    );

    read_widths(deser)?;
    let nodes_data = read_zlib_section(deser)?;
    let raw_nodes = read_nodes(&mut Deserializer::new(&nodes_data))?;

    let metadata_data = read_zlib_section(deser)?;
    block.metadata = read_metadata(&mut Deserializer::new(&metadata_data))?;

    let mut mapping = None;
    if disk {
        block.static_objects = read_static_objects(deser)?;
        block.timestamp = deser.read_u32()?;
        mapping = Some(read_name_id_mapping(deser)?);
        block.timers = read_timers(deser)?;
    }

    *block.nodes = resolve_nodes(raw_nodes, mapping.as_ref(), node_defs);
    Ok(block)
}

/// Decompresses a zlib stream and consumes exactly its compressed bytes.
fn read_zlib_section(deser: &mut Deserializer<'_>) -> DeserializeResult<Vec<u8>> {
    let (consumed, data) = decompress_zlib(deser.peek_all())?;
    deser.take(consumed)?;
    Ok(data)
}

struct RawNodes {
    content: Vec<u16>,
    param1: Vec<u8>,
    param2: Vec<u8>,
}

fn read_widths(deser: &mut Deserializer<'_>) -> DeserializeResult<()> {
    let content_width = deser.read_u8()?;
    let params_width = deser.read_u8()?;
    if content_width != CONTENT_WIDTH || params_width != PARAMS_WIDTH {
        return Err(DeserializeError::InvalidValue(format!(
            "unsupported node widths {content_width}/{params_width}"
        )));
    }
    Ok(())
}

fn read_nodes(deser: &mut Deserializer<'_>) -> DeserializeResult<RawNodes> {
    let content = (0..NODE_COUNT)
        .map(|_| deser.read_u16())
        .collect::<DeserializeResult<_>>()?;
    let param1 = deser.take(NODE_COUNT)?.to_vec();
    let param2 = deser.take(NODE_COUNT)?.to_vec();
    Ok(RawNodes {
        content,
        param1,
        param2,
    })
}

fn read_name_id_mapping(deser: &mut Deserializer<'_>) -> DeserializeResult<HashMap<u16, String>> {
    let version = deser.read_u8()?;
    if version != NAME_ID_MAPPING_VERSION {
        return Err(DeserializeError::UnsupportedVersion(version));
    }
    let count = deser.read_u16()?;
    let mut mapping = HashMap::with_capacity(usize::from(count));
    for _ in 0..count {
        let id = deser.read_u16()?;
        let name = deser.read_string16()?;
        mapping.insert(id, name);
    }
    Ok(mapping)
}

fn resolve_nodes(
    raw: RawNodes,
    mapping: Option<&HashMap<u16, String>>,
    node_defs: &NodeDefManager,
) -> MapBlockNodes {
    let mut resolved: HashMap<u16, ContentId> = HashMap::new();
    let mut resolve = |raw_id: u16| -> ContentId {
        *resolved.entry(raw_id).or_insert_with(|| match mapping {
            Some(mapping) => {
                let Some(name) = mapping.get(&raw_id) else {
                    warn!("block uses id {raw_id} which is missing from its name-id mapping");
                    return ContentId::UNKNOWN;
                };
                node_defs.get_id(name).unwrap_or_else(|| {
                    warn!("unknown node name '{name}' in block, using 'unknown'");
                    ContentId::UNKNOWN
                })
            }
            None => {
                let id = ContentId(raw_id);
                if node_defs.id_map().name(id).is_some() {
                    id
                } else {
                    ContentId::UNKNOWN
                }
            }
        })
    };

    let mut nodes = MapBlockNodes::default();
    for (index, node) in nodes.0.iter_mut().enumerate() {
        let (Some(&content), Some(&param1), Some(&param2)) = (
            raw.content.get(index),
            raw.param1.get(index),
            raw.param2.get(index),
        ) else {
            break;
        };
        *node = MapNode {
            content_id: resolve(content),
            param1,
            param2,
        };
    }
    nodes
}

fn read_metadata(
    deser: &mut Deserializer<'_>,
) -> DeserializeResult<BTreeMap<MapNodeIndex, NodeMetadata>> {
    let mut result = BTreeMap::new();
    let version = deser.read_u8()?;
    if version == 0 {
        return Ok(result);
    }
    if !(1..=METADATA_VERSION).contains(&version) {
        return Err(DeserializeError::UnsupportedVersion(version));
    }

    let count = deser.read_u16()?;
    for _ in 0..count {
        let index = deser.read_u16()?;
        if index >= MapBlockPos::NODE_COUNT {
            return Err(DeserializeError::InvalidValue(format!(
                "metadata position {index} is out of range"
            )));
        }
        let mut meta = NodeMetadata::default();
        let num_vars = deser.read_u32()?;
        for _ in 0..num_vars {
            let key = deser.read_string16()?;
            let value = deser.read_bytes32()?.to_vec();
            let private = if version >= 2 {
                deser.read_bool()?
            } else {
                false
            };
            meta.vars.insert(key, StringVar { value, private });
        }
        meta.inventory = read_inventory(deser)?;
        result.insert(MapNodeIndex::from(index), meta);
    }
    Ok(result)
}

/// Reads inventory lines up to and including the terminating `EndInventory` line.
fn read_inventory(deser: &mut Deserializer<'_>) -> DeserializeResult<Vec<u8>> {
    let mut inventory = Vec::new();
    loop {
        let rest = deser.peek_all();
        let line_len = rest
            .iter()
            .position(|&byte| byte == b'\n')
            .map_or(rest.len(), |newline| newline + 1);
        if line_len == 0 {
            return Err(DeserializeError::Eof);
        }
        let line = deser.take(line_len)?;
        if line.trim_ascii() == END_INVENTORY {
            return Ok(inventory);
        }
        inventory.extend_from_slice(line);
    }
}

fn read_static_objects(deser: &mut Deserializer<'_>) -> DeserializeResult<Vec<StaticObject>> {
    let version = deser.read_u8()?;
    if version != STATIC_OBJECTS_VERSION {
        return Err(DeserializeError::UnsupportedVersion(version));
    }
    let count = deser.read_u16()?;
    (0..count)
        .map(|_| {
            let kind = deser.read_u8()?;
            let pos = Vec3::new(deser.read_f1000()?, deser.read_f1000()?, deser.read_f1000()?);
            let data = deser.read_bytes16()?.to_vec();
            Ok(StaticObject { kind, pos, data })
        })
        .collect()
}

fn read_timers(deser: &mut Deserializer<'_>) -> DeserializeResult<BTreeMap<MapNodeIndex, NodeTimer>> {
    let data_len = deser.read_u8()?;
    if data_len != NODE_TIMER_DATA_LEN {
        return Err(DeserializeError::InvalidValue(format!(
            "unsupported node timer length {data_len}"
        )));
    }
    let count = deser.read_u16()?;
    let mut timers = BTreeMap::new();
    for _ in 0..count {
        let index = deser.read_u16()?;
        let timeout = millis_to_seconds(deser.read_i32()?);
        let elapsed = millis_to_seconds(deser.read_i32()?);
        timers.insert(MapNodeIndex::from(index), NodeTimer { timeout, elapsed });
    }
    Ok(timers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        map_block::ModifiedState,
        serialization::compression::compress_zlib,
        test_util::{Content, content},
    };
    use luanti_core::{LightBank, MapNodePos};
    use rand::{Rng, SeedableRng, rngs::StdRng};

    fn random_block(content: &Content, rng: &mut StdRng) -> MapBlock {
        let pos = MapBlockPos::for_node(MapNodePos::new(-20, 5, 3000));
        let ids = [
            content.stone,
            content.dirt,
            ContentId::AIR,
            content.water_source,
            content.torch,
        ];
        let mut nodes = MapBlockNodes::default();
        for node in &mut nodes.0 {
            *node = MapNode {
                content_id: ids[rng.random_range(0..ids.len())],
                param1: rng.random(),
                param2: rng.random(),
            };
        }
        let mut block = MapBlock::new(pos);
        block.set_nodes(Box::new(nodes));
        block.set_generated(true);
        block.is_underground = true;
        block.lighting_complete = 0x0f0f;
        block.timestamp = 12_345;

        for _ in 0..3 {
            let mut meta = NodeMetadata::default();
            meta.set_string("infotext", "Locked chest");
            meta.vars.insert(
                "owner".into(),
                StringVar {
                    value: b"singleplayer".to_vec(),
                    private: true,
                },
            );
            meta.inventory = b"List main 1\nWidth 0\nEmpty\nEndInventoryList\n".to_vec();
            block.set_metadata(MapNodeIndex::from(rng.random_range(0..4096_u16)), meta);
        }
        block.set_node_timer(
            MapNodeIndex::from(5_u16),
            NodeTimer {
                timeout: 2.5,
                elapsed: 0.25,
            },
        );
        block.static_objects.push(StaticObject {
            kind: 7,
            pos: Vec3::new(-195.5, 80.0, 4_801.0),
            data: b"__builtin:item".to_vec(),
        });
        block
    }

    fn assert_same_content(left: &MapBlock, right: &MapBlock) {
        assert!(left.nodes() == right.nodes(), "nodes differ");
        assert_eq!(left.metadata, right.metadata);
        assert_eq!(left.timers, right.timers);
        assert_eq!(left.static_objects, right.static_objects);
        assert_eq!(left.is_underground, right.is_underground);
        assert_eq!(left.generated, right.generated);
        assert_eq!(left.lighting_complete, right.lighting_complete);
        assert_eq!(left.timestamp, right.timestamp);
    }

    #[test]
    fn disk_format_preserves_everything() {
        let content = content();
        let mut rng = StdRng::seed_from_u64(29);
        let block = random_block(&content, &mut rng);

        for level in [-1, 0, 9] {
            let data = serialize_block(
                &block,
                SER_FMT_VER_HIGHEST_WRITE,
                SerializationTarget::Disk,
                &content.node_defs,
                level,
            )
            .unwrap();
            assert_eq!(data[0], 29);
            let decoded =
                deserialize_block(block.pos(), &data, SerializationTarget::Disk, &content.node_defs)
                    .unwrap();
            assert_same_content(&block, &decoded);
            assert_eq!(decoded.modified(), ModifiedState::Clean);
        }
    }

    #[test]
    fn network_format_hides_private_state() {
        let content = content();
        let mut rng = StdRng::seed_from_u64(30);
        let block = random_block(&content, &mut rng);

        let data = serialize_block(
            &block,
            SER_FMT_VER_HIGHEST_WRITE,
            SerializationTarget::Network,
            &content.node_defs,
            -1,
        )
        .unwrap();
        let decoded = deserialize_block(
            block.pos(),
            &data,
            SerializationTarget::Network,
            &content.node_defs,
        )
        .unwrap();
        assert!(block.nodes() == decoded.nodes(), "global ids are sent as they are");
        assert!(decoded.timers.is_empty(), "timers stay on the server");
        assert!(decoded.static_objects.is_empty(), "objects stay on the server");
        for (_, meta) in decoded.metadata_iter() {
            assert!(meta.vars.contains_key("infotext"));
            assert!(!meta.vars.contains_key("owner"), "private vars are not sent");
        }
    }

    #[test]
    fn unterminated_inventories_stay_separate() {
        let content = content();
        let mut block = MapBlock::new(MapBlockPos::ZERO);
        let first = MapNodeIndex::from(1_u16);
        let second = MapNodeIndex::from(2_u16);
        block.metadata.insert(
            first,
            NodeMetadata {
                inventory: b"List main 0".to_vec(),
                ..NodeMetadata::default()
            },
        );
        let mut other = NodeMetadata::default();
        other.set_string("infotext", "Sign");
        block.set_metadata(second, other.clone());

        let data = serialize_block(
            &block,
            SER_FMT_VER_HIGHEST_WRITE,
            SerializationTarget::Disk,
            &content.node_defs,
            -1,
        )
        .unwrap();
        let decoded =
            deserialize_block(MapBlockPos::ZERO, &data, SerializationTarget::Disk, &content.node_defs)
                .unwrap();
        assert_eq!(
            decoded.metadata(first).map(|meta| meta.inventory.as_slice()),
            Some(&b"List main 0\n"[..])
        );
        assert_eq!(decoded.metadata(second), Some(&other));

        // metadata stored through the block is terminated right away
        block.set_metadata(
            first,
            NodeMetadata {
                inventory: b"List main 0".to_vec(),
                ..NodeMetadata::default()
            },
        );
        let data = serialize_block(
            &block,
            SER_FMT_VER_HIGHEST_WRITE,
            SerializationTarget::Disk,
            &content.node_defs,
            -1,
        )
        .unwrap();
        let decoded =
            deserialize_block(MapBlockPos::ZERO, &data, SerializationTarget::Disk, &content.node_defs)
                .unwrap();
        assert_eq!(decoded.metadata, block.metadata);
    }

    #[test]
    fn unknown_names_become_unknown() {
        let content = content();
        let mut block = MapBlock::new(MapBlockPos::ZERO);
        block.set_nodes(Box::new(MapBlockNodes::filled(MapNode::new(content.glass))));
        let data = serialize_block(
            &block,
            SER_FMT_VER_HIGHEST_WRITE,
            SerializationTarget::Disk,
            &content.node_defs,
            -1,
        )
        .unwrap();

        // a server which does not know glass
        let other = crate::node_def::NodeDefRegistry::new().freeze();
        let decoded =
            deserialize_block(MapBlockPos::ZERO, &data, SerializationTarget::Disk, &other).unwrap();
        assert!(
            decoded
                .nodes()
                .iter()
                .all(|(_, node)| node.content_id == ContentId::UNKNOWN),
            "glass must be replaced"
        );
    }

    #[test]
    fn reads_legacy_version_28() {
        let content = content();
        let mut nodes = Serializer::default();
        for index in 0..NODE_COUNT {
            // local id 0 is air, local id 1 is stone
            nodes.write_u16(u16::from(index < 256));
        }
        for _ in 0..NODE_COUNT {
            nodes.write_u8(0x0f);
        }
        for _ in 0..NODE_COUNT {
            nodes.write_u8(0);
        }

        let mut ser = Serializer::default();
        ser.write_u8(28);
        ser.write_u8(FLAG_IS_UNDERGROUND);
        ser.write_u16(0x00ff);
        ser.write_u8(CONTENT_WIDTH);
        ser.write_u8(PARAMS_WIDTH);
        ser.write_bytes(&compress_zlib(&nodes.into_inner(), -1));
        ser.write_bytes(&compress_zlib(&[0], -1));
        // static objects
        ser.write_u8(0);
        ser.write_u16(0);
        ser.write_u32(99);
        // name-id mapping
        ser.write_u8(0);
        ser.write_u16(2);
        ser.write_u16(0);
        ser.write_string16("name", "air").unwrap();
        ser.write_u16(1);
        ser.write_string16("name", "test:stone").unwrap();
        // timers
        ser.write_u8(NODE_TIMER_DATA_LEN);
        ser.write_u16(1);
        ser.write_u16(42);
        ser.write_i32(3000);
        ser.write_i32(500);
        // trailing data from a newer writer
        ser.write_bytes(b"future");

        let data = ser.into_inner();
        let block =
            deserialize_block(MapBlockPos::ZERO, &data, SerializationTarget::Disk, &content.node_defs)
                .unwrap();
        assert!(block.is_underground);
        assert!(block.generated());
        assert_eq!(block.lighting_complete, 0x00ff);
        assert_eq!(block.timestamp, 99);
        assert_eq!(block.node(MapNodeIndex::MIN).content_id, content.stone);
        assert_eq!(block.node(MapNodeIndex::MAX).content_id, ContentId::AIR);
        assert_eq!(block.node(MapNodeIndex::MAX).stored_light(LightBank::Day), 15);
        assert_eq!(
            block.get_node_timer(MapNodeIndex::from(42_u16)),
            Some(NodeTimer {
                timeout: 3.0,
                elapsed: 0.5
            })
        );
    }

    #[test]
    fn corrupt_data_is_an_error() {
        let content = content();
        let block = MapBlock::new(MapBlockPos::ZERO);
        let data = serialize_block(
            &block,
            SER_FMT_VER_HIGHEST_WRITE,
            SerializationTarget::Disk,
            &content.node_defs,
            -1,
        )
        .unwrap();

        let read = |data: &[u8]| {
            deserialize_block(MapBlockPos::ZERO, data, SerializationTarget::Disk, &content.node_defs)
        };
        assert!(
            matches!(read(&data[..data.len() / 2]), Err(DeserializeError::DecompressionFailed(_))),
            "truncated stream"
        );
        assert_eq!(read(&[]).err(), Some(DeserializeError::Eof));
        assert_eq!(read(&[24, 0]).err(), Some(DeserializeError::UnsupportedVersion(24)));
        assert_eq!(
            serialize_block(&block, 28, SerializationTarget::Disk, &content.node_defs, -1),
            Err(SerializeError::UnsupportedFormat(28))
        );
    }
}
