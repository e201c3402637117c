use std::{
    collections::BTreeMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use anyhow::{Result, bail};
use luanti_core::MapBlockPos;
use parking_lot::Mutex;

use super::MapDatabase;

/// A process-local map database.
///
/// Clones share their contents, so a test can keep a clone to inspect or manipulate the database
/// after handing it to a map.
#[derive(Debug, Default, Clone)]
pub struct MemoryDatabase {
    blocks: Arc<Mutex<BTreeMap<MapBlockPos, Vec<u8>>>>,
    fail_writes: Arc<AtomicBool>,
}

impl MemoryDatabase {
    /// Makes every following write fail (or succeed again).
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::Relaxed);
    }

    /// Whether a block is stored
    #[must_use]
    pub fn contains(&self, pos: MapBlockPos) -> bool {
        self.blocks.lock().contains_key(&pos)
    }

    /// Number of stored blocks
    #[must_use]
    pub fn len(&self) -> usize {
        self.blocks.lock().len()
    }

    /// Whether nothing is stored
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.blocks.lock().is_empty()
    }

    /// Stores raw bytes, bypassing write failure injection.
    pub fn put_raw(&self, pos: MapBlockPos, data: Vec<u8>) {
        self.blocks.lock().insert(pos, data);
    }
}

impl MapDatabase for MemoryDatabase {
    fn save_block(&mut self, pos: MapBlockPos, data: &[u8]) -> Result<()> {
        if self.fail_writes.load(Ordering::Relaxed) {
            bail!("simulated write failure for block {pos}");
        }
        self.blocks.lock().insert(pos, data.to_vec());
        Ok(())
    }

    fn load_block(&mut self, pos: MapBlockPos) -> Result<Option<Vec<u8>>> {
        Ok(self.blocks.lock().get(&pos).cloned())
    }

    fn delete_block(&mut self, pos: MapBlockPos) -> Result<bool> {
        Ok(self.blocks.lock().remove(&pos).is_some())
    }

    fn list_all_loadable_blocks(&mut self) -> Result<Vec<MapBlockPos>> {
        Ok(self.blocks.lock().keys().copied().collect())
    }
}
