//! Fixtures shared by the unit tests of this crate.

use std::sync::Arc;

use luanti_core::{ContentId, MapBlockNodes, MapBlockPos, MapNode};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::{
    map::{MapEditEvent, ServerMap},
    node_def::{ContentFeatures, DrawType, LiquidType, NodeDefManager, NodeDefRegistry, ParamType2},
    settings::MapSettings,
    storage::{MapDatabaseAccessor, MemoryDatabase},
};

/// A small frozen content table together with the ids of its nodes.
pub(crate) struct Content {
    pub(crate) node_defs: Arc<NodeDefManager>,
    pub(crate) stone: ContentId,
    pub(crate) dirt: ContentId,
    pub(crate) grass: ContentId,
    pub(crate) glass: ContentId,
    pub(crate) torch: ContentId,
    pub(crate) water_source: ContentId,
    pub(crate) water_flowing: ContentId,
}

pub(crate) fn content() -> Content {
    let mut registry = NodeDefRegistry::new();

    let stone = registry.register(ContentFeatures {
        is_ground_content: true,
        groups: [("cracky".to_owned(), 3)].into(),
        ..ContentFeatures::named("test:stone")
    });
    let dirt = registry.register(ContentFeatures {
        is_ground_content: true,
        groups: [("crumbly".to_owned(), 3), ("soil".to_owned(), 1)].into(),
        ..ContentFeatures::named("test:dirt")
    });
    let grass = registry.register(ContentFeatures {
        is_ground_content: true,
        groups: [("crumbly".to_owned(), 3), ("soil".to_owned(), 1)].into(),
        ..ContentFeatures::named("test:dirt_with_grass")
    });
    let glass = registry.register(ContentFeatures {
        drawtype: DrawType::GlassLike,
        light_propagates: true,
        sunlight_propagates: true,
        ..ContentFeatures::named("test:glass")
    });
    let torch = registry.register(ContentFeatures {
        drawtype: DrawType::TorchLike,
        light_propagates: true,
        sunlight_propagates: true,
        walkable: false,
        light_source: 13,
        ..ContentFeatures::named("test:torch")
    });
    let water = |name: &str, liquid_type, drawtype, param_type_2| ContentFeatures {
        drawtype,
        liquid_type,
        param_type_2,
        light_propagates: true,
        walkable: false,
        pointable: false,
        diggable: false,
        buildable_to: true,
        liquid_alternative_flowing: "test:water_flowing".to_owned(),
        liquid_alternative_source: "test:water_source".to_owned(),
        liquid_viscosity: 1,
        liquid_range: 8,
        ..ContentFeatures::named(name)
    };
    let water_source = registry.register(water(
        "test:water_source",
        LiquidType::Source,
        DrawType::Liquid,
        ParamType2::None,
    ));
    let water_flowing = registry.register(water(
        "test:water_flowing",
        LiquidType::Flowing,
        DrawType::FlowingLiquid,
        ParamType2::FlowingLiquid,
    ));
    registry.set_alias("test:water", "test:water_source");
    registry.set_alias("mapgen_stone", "test:stone");
    registry.set_alias("mapgen_dirt", "test:dirt");
    registry.set_alias("mapgen_dirt_with_grass", "test:dirt_with_grass");
    registry.set_alias("mapgen_water_source", "test:water_source");

    Content {
        node_defs: registry.freeze(),
        stone,
        dirt,
        grass,
        glass,
        torch,
        water_source,
        water_flowing,
    }
}

/// A map backed by a process-local database.
pub(crate) fn memory_map(content: &Content) -> (ServerMap, UnboundedReceiver<MapEditEvent>) {
    ServerMap::new(
        Arc::clone(&content.node_defs),
        MapSettings::default(),
        MapDatabaseAccessor::new(Box::new(MemoryDatabase::default())),
    )
}

/// Makes every block in the (inclusive) range resident and generated, filled with `node`.
pub(crate) fn fill_blocks(map: &ServerMap, min: MapBlockPos, max: MapBlockPos, node: MapNode) {
    for pos in MapBlockPos::iter_area(min, max) {
        let handle = map.blocks().get_or_create_blank(pos);
        let mut block = handle.lock();
        block.set_nodes(Box::new(MapBlockNodes::filled(node)));
        block.set_generated(true);
    }
}
