//! A single resident map block with everything attached to its nodes.

mod format;

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

use glam::Vec3;
use luanti_core::{ContentId, LightBank, MapBlockNodes, MapBlockPos, MapNode, MapNodeIndex};

use crate::node_def::NodeDefManager;

pub use format::{
    SER_FMT_VER_HIGHEST_WRITE, SER_FMT_VER_LOWEST_READ, SerializationTarget, deserialize_block,
    serialize_block,
};

/// Timestamp of a block which has never been saved
pub const BLOCK_TIMESTAMP_UNDEFINED: u32 = u32::MAX;

/// Every modification of any block draws a fresh number, so a reloaded block never repeats a
/// revision of an earlier instance at the same position.
static NEXT_REVISION: AtomicU64 = AtomicU64::new(1);

fn next_revision() -> u64 {
    NEXT_REVISION.fetch_add(1, Ordering::Relaxed)
}

/// How urgently a block needs to be written to the database.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Default)]
pub enum ModifiedState {
    /// Identical to the stored version
    #[default]
    Clean,
    /// Only derived state changed (light, timers); writing may wait until unloading
    WriteAtUnload,
    /// Nodes or metadata changed; the next save pass writes the block
    WriteNeeded,
}

/// A string variable of a node's metadata.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StringVar {
    /// Raw value
    pub value: Vec<u8>,
    /// Private variables are never sent to clients
    pub private: bool,
}

/// Key/value state attached to a single node.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct NodeMetadata {
    /// String variables by name
    pub vars: BTreeMap<String, StringVar>,
    /// Serialized inventory lines, each ending in a newline (without the terminating `EndInventory`)
    pub inventory: Vec<u8>,
}

impl NodeMetadata {
    /// Sets a public variable.
    pub fn set_string(&mut self, key: &str, value: &str) {
        self.vars.insert(
            key.to_owned(),
            StringVar {
                value: value.as_bytes().to_vec(),
                private: false,
            },
        );
    }

    /// Returns a variable's value.
    #[must_use]
    pub fn get_string(&self, key: &str) -> Option<&[u8]> {
        self.vars.get(key).map(|var| var.value.as_slice())
    }

    /// Metadata without variables and inventory is not stored at all.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty() && self.inventory.is_empty()
    }
}

/// A countdown attached to a node, in seconds.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NodeTimer {
    /// The timer fires once `elapsed` reaches this
    pub timeout: f32,
    /// Time passed since the timer was started
    pub elapsed: f32,
}

/// An entity stored inside a block while it is not active.
#[derive(Clone, Debug, PartialEq)]
pub struct StaticObject {
    /// Entity type
    pub kind: u8,
    /// World position in world units
    pub pos: Vec3,
    /// Opaque entity state
    pub data: Vec<u8>,
}

/// A map block as held in memory.
#[derive(Debug)]
pub struct MapBlock {
    pos: MapBlockPos,
    nodes: Box<MapBlockNodes>,
    metadata: BTreeMap<MapNodeIndex, NodeMetadata>,
    timers: BTreeMap<MapNodeIndex, NodeTimer>,
    /// Inactive entities stored in this block
    pub static_objects: Vec<StaticObject>,
    /// Hint that this block is not exposed to the sky
    pub is_underground: bool,
    generated: bool,
    /// One bit per face and bank telling whether light was propagated across it
    pub lighting_complete: u16,
    /// Game time of the last save, `BLOCK_TIMESTAMP_UNDEFINED` if never saved
    pub timestamp: u32,
    usage_timer: f32,
    revision: u64,
    modified: ModifiedState,
    modified_reason: &'static str,
    day_night_differs: Option<bool>,
}

impl MapBlock {
    /// Creates a blank placeholder consisting of `IGNORE` nodes which is not generated yet.
    #[must_use]
    pub fn new(pos: MapBlockPos) -> Self {
        Self::with_nodes(pos, Box::default())
    }

    fn with_nodes(pos: MapBlockPos, nodes: Box<MapBlockNodes>) -> Self {
        Self {
            pos,
            nodes,
            metadata: BTreeMap::new(),
            timers: BTreeMap::new(),
            static_objects: Vec::new(),
            is_underground: false,
            generated: false,
            lighting_complete: 0xffff,
            timestamp: BLOCK_TIMESTAMP_UNDEFINED,
            usage_timer: 0.0,
            revision: next_revision(),
            modified: ModifiedState::Clean,
            modified_reason: "",
            day_night_differs: None,
        }
    }

    /// Position of this block
    #[must_use]
    pub fn pos(&self) -> MapBlockPos {
        self.pos
    }

    /// All nodes of this block
    #[must_use]
    pub fn nodes(&self) -> &MapBlockNodes {
        &self.nodes
    }

    /// Reads a single node.
    #[must_use]
    pub fn node(&self, index: MapNodeIndex) -> MapNode {
        self.nodes[index]
    }

    /// Replaces a single node and marks the block for writing.
    pub fn set_node(&mut self, index: MapNodeIndex, node: MapNode) {
        self.nodes[index] = node;
        self.raise_modified(ModifiedState::WriteNeeded, "set_node");
    }

    /// Replaces all nodes at once, as done after generation.
    pub fn set_nodes(&mut self, nodes: Box<MapBlockNodes>) {
        self.nodes = nodes;
        self.raise_modified(ModifiedState::WriteNeeded, "set_nodes");
    }

    /// Stores a light value in `param1` of a node.
    ///
    /// Returns `false` without touching the node if it does not store light.
    pub fn set_light(
        &mut self,
        index: MapNodeIndex,
        bank: LightBank,
        light: u8,
        node_defs: &NodeDefManager,
    ) -> bool {
        let node = &mut self.nodes[index];
        if !node_defs.node(*node).stores_light() {
            return false;
        }
        if node.stored_light(bank) != light {
            node.set_stored_light(bank, light);
            self.raise_modified(ModifiedState::WriteAtUnload, "set_light");
        }
        true
    }

    /// The light of a node in the given bank, including its own emission.
    #[must_use]
    pub fn light(&self, index: MapNodeIndex, bank: LightBank, node_defs: &NodeDefManager) -> u8 {
        node_light(self.nodes[index], bank, node_defs)
    }

    /// Marks this block as changed.
    ///
    /// The modified state only ever increases until the block is saved; the revision changes on
    /// every call so clients which received an older revision are sent the block again.
    pub fn raise_modified(&mut self, state: ModifiedState, reason: &'static str) {
        if state > self.modified {
            self.modified = state;
            self.modified_reason = reason;
        }
        self.revision = next_revision();
        self.day_night_differs = None;
    }

    /// Marks this block for writing without changing anything clients can see.
    fn touch_storage(&mut self, reason: &'static str) {
        if self.modified == ModifiedState::Clean {
            self.modified = ModifiedState::WriteAtUnload;
            self.modified_reason = reason;
        }
    }

    /// How urgently this block needs saving
    #[must_use]
    pub fn modified(&self) -> ModifiedState {
        self.modified
    }

    /// The first change which raised the modified state, for debugging
    #[must_use]
    pub fn modified_reason(&self) -> &'static str {
        self.modified_reason
    }

    /// Marks the block as saved.
    pub fn reset_modified(&mut self) {
        self.modified = ModifiedState::Clean;
        self.modified_reason = "";
    }

    /// Changes with every modification
    #[must_use]
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Whether the block has been generated (or loaded), as opposed to a blank placeholder.
    #[must_use]
    pub fn generated(&self) -> bool {
        self.generated
    }

    /// Sets the generated flag.
    pub fn set_generated(&mut self, generated: bool) {
        if self.generated != generated {
            self.generated = generated;
            self.raise_modified(ModifiedState::WriteNeeded, "set_generated");
        }
    }

    /// Seconds since this block was last used
    #[must_use]
    pub fn usage_timer(&self) -> f32 {
        self.usage_timer
    }

    /// Marks this block as just used.
    pub fn reset_usage_timer(&mut self) {
        self.usage_timer = 0.0;
    }

    /// Advances the usage timer.
    pub fn increment_usage_timer(&mut self, dtime: f32) {
        self.usage_timer += dtime;
    }

    /// Metadata of a node
    #[must_use]
    pub fn metadata(&self, index: MapNodeIndex) -> Option<&NodeMetadata> {
        self.metadata.get(&index)
    }

    /// Iterates over all nodes carrying metadata.
    pub fn metadata_iter(&self) -> impl Iterator<Item = (MapNodeIndex, &NodeMetadata)> {
        self.metadata.iter().map(|(&index, meta)| (index, meta))
    }

    /// Attaches metadata to a node; empty metadata removes it.
    pub fn set_metadata(&mut self, index: MapNodeIndex, mut metadata: NodeMetadata) {
        if metadata.is_empty() {
            self.remove_metadata(index);
            return;
        }
        if !metadata.inventory.is_empty() && !metadata.inventory.ends_with(b"\n") {
            metadata.inventory.push(b'\n');
        }
        self.metadata.insert(index, metadata);
        self.raise_modified(ModifiedState::WriteNeeded, "set_metadata");
    }

    /// Removes the metadata of a node.
    pub fn remove_metadata(&mut self, index: MapNodeIndex) -> Option<NodeMetadata> {
        let removed = self.metadata.remove(&index);
        if removed.is_some() {
            self.raise_modified(ModifiedState::WriteNeeded, "remove_metadata");
        }
        removed
    }

    /// Starts (or restarts) the timer of a node.
    pub fn set_node_timer(&mut self, index: MapNodeIndex, timer: NodeTimer) {
        self.timers.insert(index, timer);
        self.touch_storage("set_node_timer");
    }

    /// The timer of a node
    #[must_use]
    pub fn get_node_timer(&self, index: MapNodeIndex) -> Option<NodeTimer> {
        self.timers.get(&index).copied()
    }

    /// Stops the timer of a node.
    pub fn remove_node_timer(&mut self, index: MapNodeIndex) -> Option<NodeTimer> {
        let removed = self.timers.remove(&index);
        if removed.is_some() {
            self.touch_storage("remove_node_timer");
        }
        removed
    }

    /// Iterates over all running timers.
    pub fn node_timers(&self) -> impl Iterator<Item = (MapNodeIndex, NodeTimer)> {
        self.timers.iter().map(|(&index, &timer)| (index, timer))
    }

    /// Advances all timers. Timers which reach their timeout are removed and returned.
    pub fn step_node_timers(&mut self, dtime: f32) -> Vec<(MapNodeIndex, NodeTimer)> {
        let mut fired = Vec::new();
        self.timers.retain(|&index, timer| {
            timer.elapsed += dtime;
            if timer.elapsed >= timer.timeout {
                fired.push((index, *timer));
                false
            } else {
                true
            }
        });
        if !self.timers.is_empty() || !fired.is_empty() {
            self.touch_storage("step_node_timers");
        }
        fired
    }

    /// Whether the day and the night bank differ anywhere, cached until the next modification.
    pub fn day_night_differs(&mut self, node_defs: &NodeDefManager) -> bool {
        if let Some(differs) = self.day_night_differs {
            return differs;
        }
        let differs = self.compute_day_night_differs(node_defs);
        self.day_night_differs = Some(differs);
        differs
    }

    fn compute_day_night_differs(&self, node_defs: &NodeDefManager) -> bool {
        let differs = self.nodes.0.iter().any(|&node| {
            node_light(node, LightBank::Day, node_defs)
                != node_light(node, LightBank::Night, node_defs)
        });
        // a block of nothing but air renders the same either way
        differs
            && !self
                .nodes
                .0
                .iter()
                .all(|node| node.content_id == ContentId::AIR)
    }
}

/// The light of a node in the given bank, including its own emission.
#[must_use]
pub fn node_light(node: MapNode, bank: LightBank, node_defs: &NodeDefManager) -> u8 {
    let features = node_defs.node(node);
    let stored = if features.stores_light() {
        node.stored_light(bank)
    } else {
        0
    };
    stored.max(features.light_emission())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::content;
    use luanti_core::MapNodePos;

    fn block() -> MapBlock {
        MapBlock::new(MapBlockPos::for_node(MapNodePos::new(0, 0, 0)))
    }

    #[test]
    fn modified_state_only_rises() {
        let mut block = block();
        assert_eq!(block.modified(), ModifiedState::Clean);
        let revision = block.revision();

        block.set_node(MapNodeIndex::MIN, MapNode::AIR);
        assert_eq!(block.modified(), ModifiedState::WriteNeeded);
        assert_eq!(block.modified_reason(), "set_node");
        assert_ne!(block.revision(), revision);

        block.raise_modified(ModifiedState::WriteAtUnload, "lighting");
        assert_eq!(block.modified(), ModifiedState::WriteNeeded, "state never drops");
        assert_eq!(block.modified_reason(), "set_node");

        block.reset_modified();
        assert_eq!(block.modified(), ModifiedState::Clean);
    }

    #[test]
    fn timers_fire_and_disappear() {
        let mut block = block();
        let index = MapNodeIndex::from(17_u16);
        block.set_node_timer(
            index,
            NodeTimer {
                timeout: 1.0,
                elapsed: 0.0,
            },
        );
        assert_eq!(block.modified(), ModifiedState::WriteAtUnload);
        let revision = block.revision();

        assert!(block.step_node_timers(0.6).is_empty(), "not yet elapsed");
        let fired = block.step_node_timers(0.6);
        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0].0, index);
        assert!(block.get_node_timer(index).is_none(), "fired timers are removed");
        assert_eq!(block.revision(), revision, "timers are invisible to clients");
    }

    #[test]
    fn empty_metadata_is_not_stored() {
        let mut block = block();
        let index = MapNodeIndex::from(3_u16);
        let mut meta = NodeMetadata::default();
        meta.set_string("infotext", "Chest");
        block.set_metadata(index, meta);
        assert_eq!(
            block.metadata(index).and_then(|meta| meta.get_string("infotext")),
            Some(&b"Chest"[..])
        );
        block.set_metadata(index, NodeMetadata::default());
        assert!(block.metadata(index).is_none(), "empty metadata removes the entry");
    }

    #[test]
    fn day_night_difference_is_cached() {
        let content = content();
        let mut block = block();
        block.set_nodes(Box::new(MapBlockNodes::filled(MapNode::new(content.stone))));
        assert!(!block.day_night_differs(&content.node_defs));

        let index = MapNodeIndex::from(100_u16);
        block.set_node(index, MapNode::AIR);
        assert!(block.set_light(index, LightBank::Day, 15, &content.node_defs));
        assert!(block.day_night_differs(&content.node_defs), "sunlit air differs");
        assert!(
            !block.set_light(MapNodeIndex::MIN, LightBank::Day, 15, &content.node_defs),
            "stone does not store light"
        );

        block.set_nodes(Box::new(MapBlockNodes::filled(MapNode {
            param1: 0x0f,
            ..MapNode::AIR
        })));
        assert!(
            !block.day_night_differs(&content.node_defs),
            "air-only blocks never differ"
        );
    }
}
