//! Texture tiles of a content definition.

use crate::serialization::{
    DeserializeError, DeserializeResult, Deserializer, SerializeResult, Serializer,
};

/// Animation of a single tile.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum TileAnimation {
    /// A static texture
    #[default]
    None,
    /// The texture is a vertical strip of frames
    VerticalFrames {
        /// Width of a frame in relation to `aspect_h`
        aspect_w: u16,
        /// Height of a frame in relation to `aspect_w`
        aspect_h: u16,
        /// Duration of the whole animation in seconds
        length: f32,
    },
}

/// A single texture tile
#[derive(Clone, Debug, PartialEq)]
pub struct TileDef {
    /// Texture name (may contain texture modifiers)
    pub name: String,
    /// Frame animation
    pub animation: TileAnimation,
    /// Hide faces pointing away from the camera
    pub backface_culling: bool,
    /// The texture repeats horizontally
    pub tileable_horizontal: bool,
    /// The texture repeats vertically
    pub tileable_vertical: bool,
}

impl Default for TileDef {
    fn default() -> Self {
        Self {
            name: String::new(),
            animation: TileAnimation::None,
            backface_culling: true,
            tileable_horizontal: true,
            tileable_vertical: true,
        }
    }
}

impl TileDef {
    /// A tile with the given texture and default flags.
    #[must_use]
    pub fn named(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            ..Self::default()
        }
    }

    /// # Errors
    ///
    /// Fails if the texture name is too long.
    pub fn serialize(&self, ser: &mut Serializer, protocol_version: u16) -> SerializeResult {
        let version = match protocol_version {
            26.. => 2,
            17.. => 1,
            _ => 0,
        };
        ser.write_u8(version);
        ser.write_string16("tile name", &self.name)?;

        let (kind, aspect_w, aspect_h, length) = match self.animation {
            TileAnimation::None => (0, 1, 1, 1.0),
            TileAnimation::VerticalFrames {
                aspect_w,
                aspect_h,
                length,
            } => (1, aspect_w, aspect_h, length),
        };
        ser.write_u8(kind);
        ser.write_u16(aspect_w);
        ser.write_u16(aspect_h);
        ser.write_f1000(length);

        if version >= 1 {
            ser.write_bool(self.backface_culling);
        }
        if version >= 2 {
            ser.write_bool(self.tileable_horizontal);
            ser.write_bool(self.tileable_vertical);
        }
        Ok(())
    }

    /// # Errors
    ///
    /// Fails on truncated data or unknown versions and animation types.
    pub fn deserialize(deser: &mut Deserializer<'_>) -> DeserializeResult<Self> {
        let version = deser.read_u8()?;
        if version > 2 {
            return Err(DeserializeError::UnsupportedVersion(version));
        }
        let name = deser.read_string16()?;
        let kind = deser.read_u8()?;
        let aspect_w = deser.read_u16()?;
        let aspect_h = deser.read_u16()?;
        let length = deser.read_f1000()?;
        let animation = match kind {
            0 => TileAnimation::None,
            1 => TileAnimation::VerticalFrames {
                aspect_w,
                aspect_h,
                length,
            },
            other => {
                return Err(DeserializeError::InvalidValue(format!(
                    "invalid tile animation type {other}"
                )));
            }
        };

        let mut tile = Self {
            name,
            animation,
            ..Self::default()
        };
        if version >= 1 {
            tile.backface_culling = deser.read_bool()?;
        }
        if version >= 2 {
            tile.tileable_horizontal = deser.read_bool()?;
            tile.tileable_vertical = deser.read_bool()?;
        }
        Ok(tile)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_depend_on_protocol_version() {
        let tile = TileDef {
            name: "default_water_animated.png".into(),
            animation: TileAnimation::VerticalFrames {
                aspect_w: 16,
                aspect_h: 16,
                length: 2.0,
            },
            backface_culling: false,
            tileable_horizontal: false,
            tileable_vertical: true,
        };

        for (protocol_version, expected_len) in [(26, 1 + 2 + 26 + 9 + 3), (17, 1 + 2 + 26 + 9 + 1)] {
            let mut ser = Serializer::default();
            tile.serialize(&mut ser, protocol_version).unwrap();
            let data = ser.into_inner();
            assert_eq!(data.len(), expected_len, "protocol {protocol_version}");

            let decoded = TileDef::deserialize(&mut Deserializer::new(&data)).unwrap();
            assert_eq!(decoded.name, tile.name);
            assert_eq!(decoded.animation, tile.animation);
            assert!(!decoded.backface_culling, "culling is sent since version 1");
            if protocol_version < 26 {
                assert!(
                    decoded.tileable_horizontal,
                    "old versions fall back to the default"
                );
            } else {
                assert_eq!(decoded, tile);
            }
        }
    }
}
