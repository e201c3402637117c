//! Node box geometry and its versioned encoding.

use glam::Vec3;

use super::BS;
use crate::serialization::{
    DeserializeError, DeserializeResult, Deserializer, SerializeResult, Serializer,
};

const TYPE_REGULAR: u8 = 0;
const TYPE_FIXED: u8 = 1;
const TYPE_WALLMOUNTED: u8 = 2;
const TYPE_LEVELED: u8 = 3;
const TYPE_CONNECTED: u8 = 4;

/// An axis aligned box in world units relative to the node's center.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Aabb {
    /// Corner with the lowest coordinates
    pub min: Vec3,
    /// Corner with the highest coordinates
    pub max: Vec3,
}

impl Aabb {
    /// The box covering a full node.
    pub const FULL_NODE: Self = Self {
        min: Vec3::splat(-BS / 2.0),
        max: Vec3::splat(BS / 2.0),
    };

    fn serialize(&self, ser: &mut Serializer) {
        for value in self.min.to_array().into_iter().chain(self.max.to_array()) {
            ser.write_f1000(value);
        }
    }

    fn deserialize(deser: &mut Deserializer<'_>) -> DeserializeResult<Self> {
        let mut read_vec = || -> DeserializeResult<Vec3> {
            Ok(Vec3::new(
                deser.read_f1000()?,
                deser.read_f1000()?,
                deser.read_f1000()?,
            ))
        };
        let min = read_vec()?;
        let max = read_vec()?;
        Ok(Self { min, max })
    }
}

/// Boxes of a node which visually connects to its neighbors.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConnectedBoxes {
    /// Always present
    pub fixed: Vec<Aabb>,
    /// Present if connected upwards
    pub connect_top: Vec<Aabb>,
    /// Present if connected downwards
    pub connect_bottom: Vec<Aabb>,
    /// Present if connected towards -Z
    pub connect_front: Vec<Aabb>,
    /// Present if connected towards -X
    pub connect_left: Vec<Aabb>,
    /// Present if connected towards +Z
    pub connect_back: Vec<Aabb>,
    /// Present if connected towards +X
    pub connect_right: Vec<Aabb>,
}

impl ConnectedBoxes {
    /// Connect face bit for the top face
    pub const TOP: u8 = 1;
    /// Connect face bit for the bottom face
    pub const BOTTOM: u8 = 2;
    /// Connect face bit for the front face
    pub const FRONT: u8 = 4;
    /// Connect face bit for the left face
    pub const LEFT: u8 = 8;
    /// Connect face bit for the back face
    pub const BACK: u8 = 16;
    /// Connect face bit for the right face
    pub const RIGHT: u8 = 32;

    fn lists(&self) -> [&Vec<Aabb>; 7] {
        [
            &self.fixed,
            &self.connect_top,
            &self.connect_bottom,
            &self.connect_front,
            &self.connect_left,
            &self.connect_back,
            &self.connect_right,
        ]
    }
}

/// The geometry of a node.
#[derive(Clone, Debug, Default, PartialEq)]
pub enum NodeBox {
    /// A full cube
    #[default]
    Regular,
    /// A fixed set of boxes
    Fixed(Vec<Aabb>),
    /// Boxes depending on the attached face
    Wallmounted {
        /// Used when attached to the ceiling
        top: Aabb,
        /// Used when attached to the floor
        bottom: Aabb,
        /// Used when attached to a wall
        side: Aabb,
    },
    /// Like `Fixed` but the top is moved according to the node's level
    Leveled(Vec<Aabb>),
    /// Boxes depending on connected neighbors
    Connected(Box<ConnectedBoxes>),
}

impl NodeBox {
    /// Writes this node box in the version understood by the given protocol.
    ///
    /// Old protocols cannot represent every variant; these receive a conservative replacement.
    ///
    /// # Errors
    ///
    /// Fails if a list contains more boxes than can be counted.
    pub fn serialize(&self, ser: &mut Serializer, protocol_version: u16) -> SerializeResult {
        let version = match protocol_version {
            27.. => 3,
            21.. => 2,
            _ => 1,
        };
        ser.write_u8(version);

        match self {
            Self::Regular => ser.write_u8(TYPE_REGULAR),
            Self::Fixed(boxes) => {
                ser.write_u8(TYPE_FIXED);
                write_boxes(ser, boxes)?;
            }
            Self::Leveled(boxes) => {
                ser.write_u8(if version >= 2 { TYPE_LEVELED } else { TYPE_FIXED });
                write_boxes(ser, boxes)?;
            }
            Self::Wallmounted { top, bottom, side } => {
                ser.write_u8(TYPE_WALLMOUNTED);
                top.serialize(ser);
                bottom.serialize(ser);
                side.serialize(ser);
            }
            Self::Connected(connected) => {
                if version <= 2 {
                    // keep collisions sane for clients that cannot connect
                    ser.write_u8(TYPE_FIXED);
                    write_boxes(ser, &[Aabb::FULL_NODE])?;
                } else {
                    ser.write_u8(TYPE_CONNECTED);
                    for list in connected.lists() {
                        write_boxes(ser, list)?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Reads a node box of version 1 to 3.
    ///
    /// # Errors
    ///
    /// Fails on truncated data, unknown versions or unknown box types.
    pub fn deserialize(deser: &mut Deserializer<'_>) -> DeserializeResult<Self> {
        let version = deser.read_u8()?;
        if !(1..=3).contains(&version) {
            return Err(DeserializeError::UnsupportedVersion(version));
        }

        match deser.read_u8()? {
            TYPE_REGULAR => Ok(Self::Regular),
            TYPE_FIXED => Ok(Self::Fixed(read_boxes(deser)?)),
            TYPE_LEVELED => Ok(Self::Leveled(read_boxes(deser)?)),
            TYPE_WALLMOUNTED => Ok(Self::Wallmounted {
                top: Aabb::deserialize(deser)?,
                bottom: Aabb::deserialize(deser)?,
                side: Aabb::deserialize(deser)?,
            }),
            TYPE_CONNECTED if version >= 3 => Ok(Self::Connected(Box::new(ConnectedBoxes {
                fixed: read_boxes(deser)?,
                connect_top: read_boxes(deser)?,
                connect_bottom: read_boxes(deser)?,
                connect_front: read_boxes(deser)?,
                connect_left: read_boxes(deser)?,
                connect_back: read_boxes(deser)?,
                connect_right: read_boxes(deser)?,
            }))),
            other => Err(DeserializeError::InvalidValue(format!(
                "invalid node box type {other} for version {version}"
            ))),
        }
    }

    /// Returns `true` for node boxes which depend on their neighbors.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected(_))
    }
}

fn write_boxes(ser: &mut Serializer, boxes: &[Aabb]) -> SerializeResult {
    let count = u16::try_from(boxes.len())
        .map_err(|_err| crate::serialization::SerializeError::TooLarge("node box list"))?;
    ser.write_u16(count);
    for aabb in boxes {
        aabb.serialize(ser);
    }
    Ok(())
}

fn read_boxes(deser: &mut Deserializer<'_>) -> DeserializeResult<Vec<Aabb>> {
    let count = deser.read_u16()?;
    (0..count).map(|_| Aabb::deserialize(deser)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(node_box: &NodeBox, protocol_version: u16) -> Vec<u8> {
        let mut ser = Serializer::default();
        node_box.serialize(&mut ser, protocol_version).unwrap();
        ser.into_inner()
    }

    fn decode(data: &[u8]) -> NodeBox {
        let mut deser = Deserializer::new(data);
        let result = NodeBox::deserialize(&mut deser).unwrap();
        assert!(deser.is_empty(), "node box must consume all data");
        result
    }

    fn slab() -> Aabb {
        Aabb {
            min: Vec3::new(-5.0, -5.0, -5.0),
            max: Vec3::new(5.0, 0.0, 5.0),
        }
    }

    #[test]
    fn connected_boxes_degrade_for_old_protocols() {
        let connected = NodeBox::Connected(Box::new(ConnectedBoxes {
            fixed: vec![slab()],
            connect_left: vec![slab(), slab()],
            ..ConnectedBoxes::default()
        }));

        assert_eq!(decode(&encode(&connected, 27)), connected);

        let old = encode(&connected, 26);
        assert_eq!(old[0], 2, "protocol 26 uses node box version 2");
        assert_eq!(decode(&old), NodeBox::Fixed(vec![Aabb::FULL_NODE]));
    }

    #[test]
    fn leveled_boxes_need_version_two() {
        let leveled = NodeBox::Leveled(vec![slab()]);
        assert_eq!(decode(&encode(&leveled, 21)), leveled);
        assert_eq!(decode(&encode(&leveled, 20)), NodeBox::Fixed(vec![slab()]));
    }

    #[test]
    fn rejects_unknown_versions_and_types() {
        let mut deser = Deserializer::new(&[4, 0]);
        assert_eq!(
            NodeBox::deserialize(&mut deser),
            Err(DeserializeError::UnsupportedVersion(4))
        );
        // connected boxes did not exist in version 2
        let mut deser = Deserializer::new(&[2, TYPE_CONNECTED]);
        assert!(
            matches!(
                NodeBox::deserialize(&mut deser),
                Err(DeserializeError::InvalidValue(_))
            ),
            "connected box in version 2 must be rejected"
        );
    }
}
