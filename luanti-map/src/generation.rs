//! Map generators filling new chunks with nodes.

mod flat;
mod singlenode;
mod voxel;

use std::sync::Arc;

use anyhow::{Result, bail};
use luanti_core::{MapBlockPos, MapNodePos};

pub use flat::MapgenFlat;
pub use singlenode::MapgenSinglenode;
pub use voxel::VoxelManipulator;

use crate::{node_def::NodeResolver, settings::MapSettings};

/// Fills a box of fresh nodes.
///
/// Generators only ever see a [`VoxelManipulator`], never the map itself. The nodes they need
/// are looked up by name through the resolver returned by [`Self::node_resolver`], which has to
/// be registered before the content table is frozen.
pub trait MapGenerator: Send + Sync {
    /// Name as used in the `mg_name` setting
    fn name(&self) -> &'static str;

    /// Resolves the nodes this generator places.
    fn node_resolver(&self) -> Arc<dyn NodeResolver>;

    /// Generates the nodes of `min..=max`.
    ///
    /// `vm` covers at least that box and may extend beyond it; nodes already present in `vm`
    /// belong to neighboring, already generated blocks.
    ///
    /// # Errors
    ///
    /// Fails if the generator cannot do its job, e.g. because required nodes are not defined.
    fn generate(
        &self,
        vm: &mut VoxelManipulator,
        min: MapNodePos,
        max: MapNodePos,
        seed: u64,
    ) -> Result<()>;

    /// Whether a generated block is cut off from the sky.
    fn is_underground(&self, _block: MapBlockPos) -> bool {
        false
    }
}

/// Creates the generator selected by `mg_name`.
///
/// # Errors
///
/// Fails for unknown generator names.
pub fn create_generator(settings: &MapSettings) -> Result<Arc<dyn MapGenerator>> {
    let generator: Arc<dyn MapGenerator> = match settings.mg_name.as_str() {
        "flat" => Arc::new(MapgenFlat::new(
            settings.mgflat_ground_level,
            settings.water_level,
        )),
        "singlenode" => Arc::new(MapgenSinglenode::new()),
        other => bail!("unknown map generator '{other}'"),
    };
    Ok(generator)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generators_are_selected_by_name() {
        let mut settings = MapSettings::default();
        assert_eq!(create_generator(&settings).unwrap().name(), "flat");
        settings.mg_name = "singlenode".to_owned();
        assert_eq!(create_generator(&settings).unwrap().name(), "singlenode");
        settings.mg_name = "v7".to_owned();
        assert!(create_generator(&settings).is_err());
    }
}
