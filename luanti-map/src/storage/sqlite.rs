use std::path::Path;

use anyhow::{Context, Result};
use log::{debug, info, warn};
use luanti_core::MapBlockPos;
use rusqlite::{Connection, OpenFlags, OptionalExtension, params};

use super::{MapDatabase, block_pos_to_key, key_to_block_pos};

/// File name of the map database within a world directory
pub const MAP_FILE_NAME: &str = "map.sqlite";

/// A map database in Luanti's SQLite layout.
pub struct SqliteDatabase {
    connection: Connection,
}

impl SqliteDatabase {
    /// Opens (or creates) the map database of a world directory.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened or the schema cannot be created.
    pub fn open_world(world: impl AsRef<Path>) -> Result<Self> {
        let path = world.as_ref().join(MAP_FILE_NAME);
        info!("opening map database {}", path.display());
        let connection = Connection::open(&path)
            .with_context(|| format!("failed to open {}", path.display()))?;
        Self::with_connection(connection)
    }

    /// Opens an existing map database without ever writing to it.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be opened.
    pub fn open_read_only(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("opening read-only map database {}", path.display());
        let connection = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )
        .with_context(|| format!("failed to open {}", path.display()))?;
        Ok(Self { connection })
    }

    /// Creates a database which lives in memory only.
    ///
    /// # Errors
    ///
    /// Fails if SQLite cannot allocate the database.
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(connection: Connection) -> Result<Self> {
        connection
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS `blocks` (`pos` INT PRIMARY KEY, `data` BLOB);",
            )
            .context("failed to create the blocks table")?;
        Ok(Self { connection })
    }
}

impl MapDatabase for SqliteDatabase {
    fn begin_save(&mut self) -> Result<()> {
        if self.connection.is_autocommit() {
            self.connection.execute_batch("BEGIN;")?;
        } else {
            warn!("begin_save called while a transaction is open");
        }
        Ok(())
    }

    fn end_save(&mut self) -> Result<()> {
        if self.connection.is_autocommit() {
            debug!("end_save called without a transaction");
        } else {
            self.connection
                .execute_batch("COMMIT;")
                .context("failed to commit saved blocks")?;
        }
        Ok(())
    }

    fn save_block(&mut self, pos: MapBlockPos, data: &[u8]) -> Result<()> {
        self.connection
            .prepare_cached("REPLACE INTO `blocks` (`pos`, `data`) VALUES (?1, ?2)")?
            .execute(params![block_pos_to_key(pos), data])
            .with_context(|| format!("failed to save block {pos}"))?;
        Ok(())
    }

    fn load_block(&mut self, pos: MapBlockPos) -> Result<Option<Vec<u8>>> {
        let data = self
            .connection
            .prepare_cached("SELECT `data` FROM `blocks` WHERE `pos` = ?1 LIMIT 1")?
            .query_row(params![block_pos_to_key(pos)], |row| row.get(0))
            .optional()
            .with_context(|| format!("failed to load block {pos}"))?;
        Ok(data)
    }

    fn delete_block(&mut self, pos: MapBlockPos) -> Result<bool> {
        let deleted = self
            .connection
            .prepare_cached("DELETE FROM `blocks` WHERE `pos` = ?1")?
            .execute(params![block_pos_to_key(pos)])?;
        Ok(deleted > 0)
    }

    fn list_all_loadable_blocks(&mut self) -> Result<Vec<MapBlockPos>> {
        let mut statement = self.connection.prepare_cached("SELECT `pos` FROM `blocks`")?;
        let keys = statement.query_map([], |row| row.get::<_, i64>(0))?;
        let mut positions = Vec::new();
        for key in keys {
            let key = key?;
            if let Some(pos) = key_to_block_pos(key) {
                positions.push(pos);
            } else {
                warn!("ignoring invalid block key {key}");
            }
        }
        Ok(positions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::I16Vec3;

    #[test]
    fn store_load_delete() {
        let mut database = SqliteDatabase::open_in_memory().unwrap();
        let first = MapBlockPos::new(I16Vec3::new(-3, 7, 120)).unwrap();
        let second = MapBlockPos::new(I16Vec3::new(0, -1, 0)).unwrap();

        database.begin_save().unwrap();
        database.save_block(first, b"first").unwrap();
        database.save_block(second, b"second").unwrap();
        database.save_block(first, b"replaced").unwrap();
        database.end_save().unwrap();

        assert_eq!(database.load_block(first).unwrap().as_deref(), Some(&b"replaced"[..]));
        let mut positions = database.list_all_loadable_blocks().unwrap();
        positions.sort_unstable();
        assert_eq!(positions, vec![second, first]);

        assert!(database.delete_block(second).unwrap());
        assert!(!database.delete_block(second).unwrap());
        assert_eq!(database.load_block(second).unwrap(), None);
    }

    #[test]
    fn unbalanced_batches_are_tolerated() {
        let mut database = SqliteDatabase::open_in_memory().unwrap();
        database.end_save().unwrap();
        database.begin_save().unwrap();
        database.begin_save().unwrap();
        database.save_block(MapBlockPos::ZERO, b"x").unwrap();
        database.end_save().unwrap();
        assert!(database.load_block(MapBlockPos::ZERO).unwrap().is_some());
    }
}
