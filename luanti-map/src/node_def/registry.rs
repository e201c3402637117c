//! The two phases of the content definition table: a mutable registry which is frozen into an
//! immutable manager.

use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use flexstr::SharedStr;
use log::{debug, warn};
use luanti_core::{ContentId, LIGHT_MAX, MapNode};

use super::{
    ConnectedBoxes, ContentFeatures, DrawType, NodeResolver, ParamType, ParamType2, ResolverId,
};
use crate::content_id_map::ContentIdMap;

const GROUP_PREFIX: &str = "group:";

/// Collects content definitions while mods register their nodes.
pub struct NodeDefRegistry {
    features: Vec<ContentFeatures>,
    names: ContentIdMap,
    aliases: HashMap<String, String>,
    resolvers: Vec<(ResolverId, Arc<dyn NodeResolver>)>,
    next_resolver_id: u64,
    id_limit: u16,
}

impl Default for NodeDefRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeDefRegistry {
    /// Creates a registry containing the built-in `unknown`, `air` and `ignore` definitions.
    #[must_use]
    pub fn new() -> Self {
        Self::with_id_limit(ContentId::LIMIT)
    }

    /// Same as [`Self::new`] but hands out ids below `id_limit` only.
    #[must_use]
    pub fn with_id_limit(id_limit: u16) -> Self {
        let mut registry = Self {
            features: Vec::new(),
            names: ContentIdMap::new(),
            aliases: HashMap::new(),
            resolvers: Vec::new(),
            next_resolver_id: 0,
            id_limit,
        };

        registry.store(ContentId::UNKNOWN, ContentFeatures::named("unknown"));
        registry.store(
            ContentId::AIR,
            ContentFeatures {
                drawtype: DrawType::AirLike,
                param_type: ParamType::Light,
                light_propagates: true,
                sunlight_propagates: true,
                walkable: false,
                pointable: false,
                diggable: false,
                buildable_to: true,
                floodable: true,
                is_ground_content: true,
                groups: BTreeMap::new(),
                ..ContentFeatures::named("air")
            },
        );
        registry.store(
            ContentId::IGNORE,
            ContentFeatures {
                drawtype: DrawType::AirLike,
                walkable: false,
                pointable: false,
                diggable: false,
                buildable_to: true,
                is_ground_content: true,
                groups: BTreeMap::new(),
                ..ContentFeatures::named("ignore")
            },
        );
        registry
    }

    fn store(&mut self, id: ContentId, features: ContentFeatures) {
        let index = usize::from(id);
        if index >= self.features.len() {
            self.features.resize_with(index + 1, ContentFeatures::default);
        }
        if let Some(slot) = self.features.get_mut(index) {
            *slot = features;
        }
    }

    /// Registers a definition and returns its id.
    ///
    /// Registering a known name again replaces its definition and keeps the id. Returns
    /// `ContentId::IGNORE` for names that cannot be registered and when all ids are taken.
    pub fn register(&mut self, mut features: ContentFeatures) -> ContentId {
        if features.name.is_empty() || features.name == "ignore" {
            warn!("refusing to register content named '{}'", features.name);
            return ContentId::IGNORE;
        }

        if features.light_source > LIGHT_MAX {
            warn!(
                "{}: light_source {} clamped to {LIGHT_MAX}",
                features.name, features.light_source
            );
            features.light_source = LIGHT_MAX;
        }
        if (features.light_propagates || features.sunlight_propagates)
            && features.param_type != ParamType::Light
        {
            debug!("{}: light passes through, storing light in param1", features.name);
            features.param_type = ParamType::Light;
        }

        let id = if let Some(id) = self.names.get(&features.name) {
            debug!("overriding definition of {} ({id})", features.name);
            id
        } else if let Some(id) = self
            .names
            .push(SharedStr::from(features.name.clone()), self.id_limit)
        {
            id
        } else {
            warn!("content id table is full, cannot register {}", features.name);
            return ContentId::IGNORE;
        };

        self.store(id, features);
        id
    }

    /// Registers a definition without any properties under the given name.
    pub fn allocate_dummy(&mut self, name: &str) -> ContentId {
        self.register(ContentFeatures::named(name))
    }

    /// Resets the definition of `name` to that of an unknown node.
    ///
    /// The id stays bound to the name so blocks containing it remain readable.
    pub fn remove(&mut self, name: &str) -> bool {
        let Some(id) = self.names.get(name) else {
            return false;
        };
        if id.is_reserved() {
            warn!("refusing to remove built-in content {name}");
            return false;
        }
        self.store(id, ContentFeatures::named(name));
        true
    }

    /// Makes `alias` resolve to `target`, unless `alias` is a registered name itself.
    pub fn set_alias(&mut self, alias: &str, target: &str) {
        if self.names.get(alias).is_some() {
            warn!("alias {alias} shadows a registered name and is ignored");
            return;
        }
        self.aliases.insert(alias.to_owned(), target.to_owned());
    }

    /// Looks up the id of a name or alias.
    #[must_use]
    pub fn get_id(&self, name: &str) -> Option<ContentId> {
        lookup_id(&self.names, &self.aliases, name)
    }

    /// Looks up a name, or all members of a group if the name starts with `group:`.
    #[must_use]
    pub fn get_ids(&self, name: &str) -> Vec<ContentId> {
        if let Some(group) = name.strip_prefix(GROUP_PREFIX) {
            self.names
                .iter()
                .filter(|&(id, _)| {
                    self.features
                        .get(usize::from(id))
                        .is_some_and(|features| features.group(group) != 0)
                })
                .map(|(id, _)| id)
                .collect()
        } else {
            self.get_id(name).into_iter().collect()
        }
    }

    /// The current definition registered for `id`
    #[must_use]
    pub fn get(&self, id: ContentId) -> Option<&ContentFeatures> {
        self.features
            .get(usize::from(id))
            .filter(|features| !features.name.is_empty())
    }

    /// Registers a resolver which will be called once the registry is frozen.
    pub fn add_resolver(&mut self, resolver: Arc<dyn NodeResolver>) -> ResolverId {
        let id = ResolverId(self.next_resolver_id);
        self.next_resolver_id += 1;
        self.resolvers.push((id, resolver));
        id
    }

    /// Removes a pending resolver. Returns `false` if it was not pending.
    pub fn cancel_resolver(&mut self, id: ResolverId) -> bool {
        let before = self.resolvers.len();
        self.resolvers.retain(|(pending, _)| *pending != id);
        self.resolvers.len() != before
    }

    /// Closes registration.
    ///
    /// Liquid alternatives and `connects_to` names are resolved, then every pending resolver is
    /// called exactly once.
    #[must_use]
    pub fn freeze(self) -> Arc<NodeDefManager> {
        let Self {
            features,
            names,
            aliases,
            resolvers,
            ..
        } = self;

        let mut groups: HashMap<String, Vec<(ContentId, i16)>> = HashMap::new();
        for (id, _) in names.iter() {
            if let Some(definition) = features.get(usize::from(id)) {
                for (group, &rating) in &definition.groups {
                    groups.entry(group.clone()).or_default().push((id, rating));
                }
            }
        }

        let mut manager = NodeDefManager {
            unknown: features
                .get(usize::from(ContentId::UNKNOWN))
                .cloned()
                .unwrap_or_else(|| ContentFeatures::named("unknown")),
            features,
            names,
            aliases,
            groups,
        };

        let resolved: Vec<_> = manager
            .features
            .iter()
            .map(|definition| {
                let flowing = manager.resolve_optional(&definition.liquid_alternative_flowing);
                let source = manager.resolve_optional(&definition.liquid_alternative_source);
                let mut connects_to: Vec<_> = definition
                    .connects_to
                    .iter()
                    .flat_map(|name| manager.get_ids(name))
                    .collect();
                connects_to.sort_unstable();
                connects_to.dedup();
                (flowing, source, connects_to)
            })
            .collect();
        for (definition, (flowing, source, connects_to)) in
            manager.features.iter_mut().zip(resolved)
        {
            definition.liquid_alternative_flowing_id = flowing;
            definition.liquid_alternative_source_id = source;
            definition.connects_to_ids = connects_to;
        }

        debug!(
            "content definitions frozen with {} entries, {} pending resolvers",
            manager.names.len(),
            resolvers.len()
        );
        for (_, resolver) in resolvers {
            resolver.resolve_nodes(&manager);
        }
        Arc::new(manager)
    }
}

fn lookup_id(
    names: &ContentIdMap,
    aliases: &HashMap<String, String>,
    name: &str,
) -> Option<ContentId> {
    names.get(name).or_else(|| {
        aliases
            .get(name)
            .and_then(|target| names.get(target.as_str()))
    })
}

/// The frozen content definition table.
///
/// Lookups never fail: ids without a definition yield the definition of `unknown`.
pub struct NodeDefManager {
    features: Vec<ContentFeatures>,
    names: ContentIdMap,
    aliases: HashMap<String, String>,
    groups: HashMap<String, Vec<(ContentId, i16)>>,
    unknown: ContentFeatures,
}

impl NodeDefManager {
    /// The definition of the given id
    #[must_use]
    pub fn get(&self, id: ContentId) -> &ContentFeatures {
        self.features
            .get(usize::from(id))
            .filter(|features| !features.name.is_empty())
            .unwrap_or(&self.unknown)
    }

    /// The definition of the given node's content
    #[must_use]
    pub fn node(&self, node: MapNode) -> &ContentFeatures {
        self.get(node.content_id)
    }

    /// Looks up the id of a name or alias.
    #[must_use]
    pub fn get_id(&self, name: &str) -> Option<ContentId> {
        lookup_id(&self.names, &self.aliases, name)
    }

    /// Looks up a name, or all members of a group if the name starts with `group:`.
    #[must_use]
    pub fn get_ids(&self, name: &str) -> Vec<ContentId> {
        if let Some(group) = name.strip_prefix(GROUP_PREFIX) {
            self.groups
                .get(group)
                .map(|members| members.iter().map(|&(id, _)| id).collect())
                .unwrap_or_default()
        } else {
            self.get_id(name).into_iter().collect()
        }
    }

    fn resolve_optional(&self, name: &str) -> ContentId {
        if name.is_empty() {
            return ContentId::IGNORE;
        }
        self.get_id(name).unwrap_or_else(|| {
            warn!("unknown node {name} referenced by a content definition");
            ContentId::IGNORE
        })
    }

    /// The name bound to `id` or an empty string
    #[must_use]
    pub fn name(&self, id: ContentId) -> &str {
        &self.names[id]
    }

    /// The name to id mapping
    #[must_use]
    pub fn id_map(&self) -> &ContentIdMap {
        &self.names
    }

    /// Number of ids bound to a name
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Returns `true` if nothing is registered, not even the built-in content.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Iterates over all bound ids and their definitions in id order.
    pub fn iter(&self) -> impl Iterator<Item = (ContentId, &ContentFeatures)> {
        self.names.iter().map(|(id, _)| (id, self.get(id)))
    }

    /// Calls a resolver right away, for consumers created after registration was closed.
    pub fn resolve_now(&self, resolver: &dyn NodeResolver) {
        resolver.resolve_nodes(self);
    }

    /// Whether a connected node box at `from` joins `to`, which is located at `connect_face` of
    /// `from` (one of the [`ConnectedBoxes`] face bits).
    #[must_use]
    pub fn nodebox_connects(&self, from: MapNode, to: MapNode, connect_face: u8) -> bool {
        let from_features = self.node(from);
        if from_features.drawtype != DrawType::NodeBox || !from_features.node_box.is_connected() {
            return false;
        }
        if from_features
            .connects_to_ids
            .binary_search(&to.content_id)
            .is_err()
        {
            return false;
        }

        let to_features = self.node(to);
        if to_features.drawtype == DrawType::NodeBox && to_features.node_box.is_connected() {
            return to_features
                .connects_to_ids
                .binary_search(&from.content_id)
                .is_ok();
        }

        if to_features.connect_sides == 0 {
            // a plain node accepts connections on every face
            return true;
        }
        let face = if to_features.param_type_2 == ParamType2::FaceDir
            && connect_face >= ConnectedBoxes::FRONT
        {
            rotate_horizontal_face(connect_face, to.param2)
        } else {
            connect_face
        };
        to_features.connect_sides & face != 0
    }
}

/// Rotates a horizontal connect face by the facedir rotation around the Y axis.
fn rotate_horizontal_face(connect_face: u8, param2: u8) -> u8 {
    const CYCLE: [u8; 4] = [
        ConnectedBoxes::FRONT,
        ConnectedBoxes::RIGHT,
        ConnectedBoxes::BACK,
        ConnectedBoxes::LEFT,
    ];
    let Some(start) = CYCLE.iter().position(|&face| face == connect_face) else {
        return connect_face;
    };
    let rotation = usize::from(param2 & 0x03);
    CYCLE
        .get((start + rotation) % CYCLE.len())
        .copied()
        .unwrap_or(connect_face)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node_def::{LiquidType, NodeBox, NodeNameList};

    #[test]
    fn reserved_ids_are_built_in() {
        let node_defs = NodeDefRegistry::new().freeze();
        assert_eq!(node_defs.get_id("air"), Some(ContentId::AIR));
        assert_eq!(node_defs.get_id("ignore"), Some(ContentId::IGNORE));
        assert_eq!(node_defs.get_id("unknown"), Some(ContentId::UNKNOWN));
        assert!(node_defs.get(ContentId::AIR).sunlight_propagates, "air is transparent");
        assert!(!node_defs.get(ContentId::IGNORE).light_propagates, "ignore is opaque");
        assert_eq!(node_defs.get(ContentId(4000)).name, "unknown");
    }

    #[test]
    fn re_registration_keeps_the_id() {
        let mut registry = NodeDefRegistry::new();
        let first = registry.register(ContentFeatures::named("default:dirt"));
        let second = registry.register(ContentFeatures {
            walkable: false,
            ..ContentFeatures::named("default:dirt")
        });
        assert_eq!(first, second);
        assert_eq!(registry.get(first).map(|features| features.walkable), Some(false));

        assert_eq!(registry.register(ContentFeatures::named("ignore")), ContentId::IGNORE);
        assert_eq!(registry.register(ContentFeatures::named("")), ContentId::IGNORE);
    }

    #[test]
    fn exhausted_table_yields_ignore() {
        let mut registry = NodeDefRegistry::with_id_limit(2);
        assert_eq!(registry.allocate_dummy("a:0"), ContentId(0));
        assert_eq!(registry.allocate_dummy("a:1"), ContentId(1));
        assert_eq!(registry.allocate_dummy("a:2"), ContentId::IGNORE);
        // overriding still works when full
        assert_eq!(registry.allocate_dummy("a:1"), ContentId(1));
    }

    #[test]
    fn removal_keeps_the_name_bound() {
        let mut registry = NodeDefRegistry::new();
        let torch = registry.register(ContentFeatures {
            light_source: 20,
            ..ContentFeatures::named("default:torch")
        });
        assert_eq!(
            registry.get(torch).map(|features| features.light_source),
            Some(LIGHT_MAX),
            "light source is clamped"
        );
        assert!(registry.remove("default:torch"), "registered nodes can be removed");
        assert!(!registry.remove("air"), "built-in nodes stay");
        let node_defs = registry.freeze();
        assert_eq!(node_defs.get_id("default:torch"), Some(torch));
        assert_eq!(node_defs.get(torch).light_source, 0);
    }

    #[test]
    fn freezing_resolves_references_and_fires_resolvers_once() {
        let mut registry = NodeDefRegistry::new();
        let water_features = |name: &str, liquid_type| ContentFeatures {
            liquid_type,
            liquid_alternative_flowing: "default:water_flowing".into(),
            liquid_alternative_source: "default:water_source".into(),
            ..ContentFeatures::named(name)
        };
        let source = registry.register(water_features("default:water_source", LiquidType::Source));
        let flowing =
            registry.register(water_features("default:water_flowing", LiquidType::Flowing));
        registry.set_alias("water", "default:water_source");

        let kept = Arc::new(NodeNameList::new().with("water", None, ContentId::AIR));
        let cancelled = Arc::new(NodeNameList::new().with("water", None, ContentId::AIR));
        registry.add_resolver(kept.clone());
        let cancel_id = registry.add_resolver(cancelled.clone());
        assert!(registry.cancel_resolver(cancel_id), "pending resolver can be cancelled");
        assert!(!registry.cancel_resolver(cancel_id), "cannot cancel twice");

        let node_defs = registry.freeze();
        for id in [source, flowing] {
            let features = node_defs.get(id);
            assert_eq!(features.liquid_alternative_source_id, source);
            assert_eq!(features.liquid_alternative_flowing_id, flowing);
        }
        assert_eq!(kept.ids(), Some(&[source][..]));
        assert_eq!(cancelled.ids(), None, "cancelled resolvers are never called");
    }

    #[test]
    fn connected_node_boxes() {
        let mut registry = NodeDefRegistry::new();
        let fence = registry.register(ContentFeatures {
            drawtype: DrawType::NodeBox,
            node_box: NodeBox::Connected(Box::default()),
            connects_to: vec!["group:fence".into(), "default:chest".into()],
            groups: [("fence".to_owned(), 1)].into(),
            ..ContentFeatures::named("default:fence")
        });
        let chest = registry.register(ContentFeatures {
            param_type_2: ParamType2::FaceDir,
            connect_sides: ConnectedBoxes::BACK,
            ..ContentFeatures::named("default:chest")
        });
        let stone = registry.allocate_dummy("default:stone");
        let node_defs = registry.freeze();

        let fence_node = MapNode::new(fence);
        assert!(
            node_defs.nodebox_connects(fence_node, fence_node, ConnectedBoxes::LEFT),
            "fences connect to each other"
        );
        assert!(
            !node_defs.nodebox_connects(fence_node, MapNode::new(stone), ConnectedBoxes::LEFT),
            "stone is not listed"
        );
        let chest_node = MapNode::with_param2(chest, 0);
        assert!(node_defs.nodebox_connects(fence_node, chest_node, ConnectedBoxes::BACK));
        assert!(!node_defs.nodebox_connects(fence_node, chest_node, ConnectedBoxes::FRONT));
        // rotated by 180 degrees the back side faces the front
        let rotated = MapNode::with_param2(chest, 2);
        assert!(node_defs.nodebox_connects(fence_node, rotated, ConnectedBoxes::FRONT));
        assert!(
            !node_defs.nodebox_connects(chest_node, fence_node, ConnectedBoxes::FRONT),
            "only connected boxes connect"
        );
    }
}
