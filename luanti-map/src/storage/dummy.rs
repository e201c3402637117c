use anyhow::Result;
use luanti_core::MapBlockPos;

use super::MapDatabase;

/// A map database which never stores or loads anything.
///
/// Useful for throwaway worlds and generator tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct DummyDatabase;

impl MapDatabase for DummyDatabase {
    fn save_block(&mut self, _pos: MapBlockPos, _data: &[u8]) -> Result<()> {
        Ok(())
    }

    fn load_block(&mut self, _pos: MapBlockPos) -> Result<Option<Vec<u8>>> {
        Ok(None)
    }

    fn delete_block(&mut self, _pos: MapBlockPos) -> Result<bool> {
        Ok(false)
    }

    fn list_all_loadable_blocks(&mut self) -> Result<Vec<MapBlockPos>> {
        Ok(Vec::new())
    }
}
