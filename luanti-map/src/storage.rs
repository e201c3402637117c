//! Persistence of serialized map blocks.

mod dummy;
mod memory;
mod sqlite;

use anyhow::Result;
use log::trace;
use luanti_core::MapBlockPos;

pub use dummy::DummyDatabase;
pub use memory::MemoryDatabase;
pub use sqlite::{MAP_FILE_NAME, SqliteDatabase};

/// A key/value store of serialized blocks.
///
/// Writes may be batched: callers bracket a series of `save_block` calls with `begin_save` and
/// `end_save` so the backend can use a single transaction.
pub trait MapDatabase: Send {
    /// Starts a batch of writes.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot start a transaction.
    fn begin_save(&mut self) -> Result<()> {
        Ok(())
    }

    /// Completes a batch of writes.
    ///
    /// # Errors
    ///
    /// Fails if the backend cannot commit.
    fn end_save(&mut self) -> Result<()> {
        Ok(())
    }

    /// Stores the serialized block, replacing an older version.
    ///
    /// # Errors
    ///
    /// Fails on any I/O error of the backend.
    fn save_block(&mut self, pos: MapBlockPos, data: &[u8]) -> Result<()>;

    /// Returns the serialized block or `None` if it has never been saved.
    ///
    /// # Errors
    ///
    /// Fails on any I/O error of the backend.
    fn load_block(&mut self, pos: MapBlockPos) -> Result<Option<Vec<u8>>>;

    /// Removes a block. Returns whether it existed.
    ///
    /// # Errors
    ///
    /// Fails on any I/O error of the backend.
    fn delete_block(&mut self, pos: MapBlockPos) -> Result<bool>;

    /// Positions of all stored blocks.
    ///
    /// # Errors
    ///
    /// Fails on any I/O error of the backend.
    fn list_all_loadable_blocks(&mut self) -> Result<Vec<MapBlockPos>>;
}

/// Encodes a block position the way Luanti keys its databases.
#[must_use]
pub fn block_pos_to_key(pos: MapBlockPos) -> i64 {
    let vec = pos.vec().as_i64vec3();
    vec.z * 0x0100_0000 + vec.y * 0x1000 + vec.x
}

/// Decodes a database key. Returns `None` for keys outside the world.
#[must_use]
pub fn key_to_block_pos(key: i64) -> Option<MapBlockPos> {
    // three signed 12 bit components never reach beyond 2^36
    const KEY_LIMIT: i64 = 1 << 36;

    fn take_component(key: &mut i64) -> i64 {
        let unsigned = key.rem_euclid(0x1000);
        let component = if unsigned < 0x0800 {
            unsigned
        } else {
            unsigned - 0x1000
        };
        *key = (*key - component) / 0x1000;
        component
    }

    if !(-KEY_LIMIT..KEY_LIMIT).contains(&key) {
        return None;
    }
    let mut rest = key;
    let x = take_component(&mut rest);
    let y = take_component(&mut rest);
    let z = take_component(&mut rest);
    if rest != 0 {
        return None;
    }
    MapBlockPos::new(glam::I16Vec3::new(
        i16::try_from(x).ok()?,
        i16::try_from(y).ok()?,
        i16::try_from(z).ok()?,
    ))
}

/// The primary database plus an optional read-only fallback.
///
/// Blocks missing from the primary database are looked up in the secondary one, which is never
/// written to.
pub struct MapDatabaseAccessor {
    primary: Box<dyn MapDatabase>,
    secondary: Option<Box<dyn MapDatabase>>,
}

impl MapDatabaseAccessor {
    /// Wraps the primary database.
    #[must_use]
    pub fn new(primary: Box<dyn MapDatabase>) -> Self {
        Self {
            primary,
            secondary: None,
        }
    }

    /// Adds a read-only fallback.
    #[must_use]
    pub fn with_secondary(mut self, secondary: Box<dyn MapDatabase>) -> Self {
        self.secondary = Some(secondary);
        self
    }

    /// The database all writes go to
    pub fn primary(&mut self) -> &mut dyn MapDatabase {
        self.primary.as_mut()
    }

    /// Loads a block from the primary database, falling back to the secondary one.
    ///
    /// # Errors
    ///
    /// Fails if either database reports an error.
    pub fn load_block(&mut self, pos: MapBlockPos) -> Result<Option<Vec<u8>>> {
        if let Some(data) = self.primary.load_block(pos)? {
            return Ok(Some(data));
        }
        if let Some(secondary) = &mut self.secondary {
            let data = secondary.load_block(pos)?;
            if data.is_some() {
                trace!("block {pos} loaded from the secondary database");
            }
            return Ok(data);
        }
        Ok(None)
    }

    /// Positions of all blocks stored in either database, sorted and without duplicates.
    ///
    /// # Errors
    ///
    /// Fails if either database reports an error.
    pub fn list_all_loadable_blocks(&mut self) -> Result<Vec<MapBlockPos>> {
        let mut positions = self.primary.list_all_loadable_blocks()?;
        if let Some(secondary) = &mut self.secondary {
            positions.extend(secondary.list_all_loadable_blocks()?);
        }
        positions.sort_unstable();
        positions.dedup();
        Ok(positions)
    }
}
