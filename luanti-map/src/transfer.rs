//! Decides which blocks each client gets next.
//!
//! Every scheduling pass looks at all blocks within the client's view range and orders them by
//! distance, preferring blocks in front of the camera. Blocks the client already has in their
//! current revision are skipped. The number of blocks on their way to a client is capped; blocks
//! which did not fit are carried over to the next pass and gain importance with every pass they
//! wait, so nothing starves.

use std::collections::{HashMap, HashSet, hash_map::Entry};

use flexstr::SharedStr;
use glam::{I16Vec3, Vec3};
use log::{debug, trace, warn};
use luanti_core::{MapBlockPos, MapNodePos};

use crate::{
    map::{MapEditEvent, ServerMap},
    priority::Priority,
    settings::MapSettings,
};

/// How much closer a block appears for every pass it had to wait
const AGE_BONUS: f32 = 0.5;

/// Penalty factor for blocks outside of the camera cone
const OUT_OF_VIEW_FACTOR: f32 = 2.0;

/// What a client is looking at.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ClientView {
    /// Camera position in nodes
    pub camera_pos: Vec3,
    /// Viewing direction, need not be normalized; zero means "all around"
    pub camera_dir: Vec3,
    /// Full opening angle of the view cone in radians
    pub fov: f32,
    /// Requested view range in blocks
    pub range: i16,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SentBlock {
    revision: u64,
    ser_fmt: u8,
}

#[derive(Debug)]
struct ClientState {
    view: Option<ClientView>,
    ser_fmt: u8,
    sent: HashMap<MapBlockPos, SentBlock>,
    in_flight: HashSet<MapBlockPos>,
    /// Blocks which did not fit into a previous pass, with the number of passes they waited
    carried_over: HashMap<MapBlockPos, u16>,
}

/// Result of a scheduling pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TransferPlan {
    /// Blocks to serialize and send now, most important first
    pub send: Vec<MapBlockPos>,
    /// Blocks the client would like to have but which are not available yet
    pub emerge: Vec<(MapBlockPos, Priority)>,
}

/// Keeps track of the blocks every connected client has and needs.
#[derive(Debug)]
pub struct BlockTransferScheduler {
    max_in_flight: usize,
    max_distance: i16,
    optimize_distance: i16,
    clients: HashMap<SharedStr, ClientState>,
}

impl BlockTransferScheduler {
    /// Creates a scheduler without any clients.
    #[must_use]
    pub fn new(settings: &MapSettings) -> Self {
        Self {
            max_in_flight: settings.max_simultaneous_block_sends_per_client,
            max_distance: settings.max_block_send_distance,
            optimize_distance: settings.block_send_optimize_distance,
            clients: HashMap::new(),
        }
    }

    /// Registers a client which understands blocks in serialization format `ser_fmt`.
    ///
    /// Returns `false` if the client is known already.
    pub fn add_client(&mut self, key: SharedStr, ser_fmt: u8) -> bool {
        match self.clients.entry(key) {
            Entry::Occupied(entry) => {
                warn!("client '{}' is registered already", entry.key());
                false
            }
            Entry::Vacant(entry) => {
                debug!("tracking blocks of client '{}'", entry.key());
                entry.insert(ClientState {
                    view: None,
                    ser_fmt,
                    sent: HashMap::new(),
                    in_flight: HashSet::new(),
                    carried_over: HashMap::new(),
                });
                true
            }
        }
    }

    /// Forgets everything about a client.
    pub fn remove_client(&mut self, key: &SharedStr) -> bool {
        self.clients.remove(key).is_some()
    }

    /// Number of registered clients
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    fn client_mut(&mut self, key: &SharedStr) -> Option<&mut ClientState> {
        let client = self.clients.get_mut(key);
        if client.is_none() {
            warn!("client '{key}' is unknown to the block transfer scheduler");
        }
        client
    }

    /// Sets the camera of a client.
    pub fn update_view(&mut self, key: &SharedStr, view: ClientView) {
        if let Some(client) = self.client_mut(key) {
            client.view = Some(view);
        }
    }

    /// Records that a block has been handed to the network layer.
    pub fn mark_sent(&mut self, key: &SharedStr, pos: MapBlockPos, revision: u64) {
        if let Some(client) = self.client_mut(key) {
            let ser_fmt = client.ser_fmt;
            client.sent.insert(pos, SentBlock { revision, ser_fmt });
            client.in_flight.insert(pos);
            client.carried_over.remove(&pos);
        }
    }

    /// The client confirmed the reception of some blocks.
    pub fn got_blocks(&mut self, key: &SharedStr, blocks: impl IntoIterator<Item = MapBlockPos>) {
        let Some(client) = self.client_mut(key) else {
            return;
        };
        for pos in blocks {
            if client.in_flight.remove(&pos) {
                trace!("client '{key}' confirmed reception of block {pos}");
            } else {
                warn!("client '{key}' confirmed reception of block {pos}, which was not in flight");
            }
        }
    }

    /// The client dropped some blocks from its cache; they are sent again when needed.
    pub fn deleted_blocks(
        &mut self,
        key: &SharedStr,
        blocks: impl IntoIterator<Item = MapBlockPos>,
    ) {
        let Some(client) = self.client_mut(key) else {
            return;
        };
        for pos in blocks {
            if client.sent.remove(&pos).is_none() {
                warn!("client '{key}' dropped block {pos}, which was never sent to them");
            }
            client.in_flight.remove(&pos);
        }
    }

    /// Forces the given blocks to be sent to a client again.
    pub fn set_blocks_not_sent(
        &mut self,
        key: &SharedStr,
        blocks: impl IntoIterator<Item = MapBlockPos>,
    ) {
        if let Some(client) = self.client_mut(key) {
            for pos in blocks {
                client.sent.remove(&pos);
            }
        }
    }

    /// Invalidates the blocks an edit touched for every client.
    pub fn on_map_edit(&mut self, event: &MapEditEvent) {
        for pos in event.affected_blocks() {
            for client in self.clients.values_mut() {
                client.sent.remove(&pos);
            }
        }
    }

    /// Computes the next blocks to send to a client.
    ///
    /// Blocks which are not resident (or not generated) end up in [`TransferPlan::emerge`] and
    /// are considered again once they are available.
    pub fn schedule(&mut self, key: &SharedStr, map: &ServerMap) -> TransferPlan {
        let (max_distance, optimize_distance, max_in_flight) =
            (self.max_distance, self.optimize_distance, self.max_in_flight);
        let Some(client) = self.client_mut(key) else {
            return TransferPlan::default();
        };
        let Some(view) = client.view else {
            return TransferPlan::default();
        };
        let Some(center) = MapNodePos::from_ivec3(view.camera_pos.floor().as_ivec3())
            .map(MapBlockPos::for_node)
        else {
            return TransferPlan::default();
        };

        let range = view.range.clamp(0, max_distance.max(0));
        let max_range = f32::from(range);
        let mut candidates = Vec::new();
        let mut emerge = Vec::new();
        for dz in -range..=range {
            for dy in -range..=range {
                for dx in -range..=range {
                    let offset = I16Vec3::new(dx, dy, dz);
                    let distance = offset.as_vec3().length();
                    if distance > max_range {
                        continue;
                    }
                    let Some(pos) = center.checked_add(offset) else {
                        continue;
                    };
                    if client.in_flight.contains(&pos) {
                        continue;
                    }
                    let available = map
                        .blocks()
                        .get(pos)
                        .map(|handle| {
                            let block = handle.lock();
                            block.generated().then(|| block.revision())
                        })
                        .unwrap_or_default();
                    let Some(revision) = available else {
                        emerge.push((pos, Priority::from_distance(distance)));
                        continue;
                    };
                    let current = SentBlock {
                        revision,
                        ser_fmt: client.ser_fmt,
                    };
                    if client.sent.get(&pos) == Some(&current) {
                        continue;
                    }

                    let mut score = distance;
                    if distance > f32::from(optimize_distance) && !in_view_cone(&view, pos) {
                        score *= OUT_OF_VIEW_FACTOR;
                    }
                    let waited = client.carried_over.get(&pos).copied().unwrap_or_default();
                    score -= f32::from(waited) * AGE_BONUS;
                    candidates.push((score, pos));
                }
            }
        }

        candidates.sort_by(|(score_a, pos_a), (score_b, pos_b)| {
            score_a.total_cmp(score_b).then_with(|| pos_a.cmp(pos_b))
        });
        emerge.sort_by_key(|&(pos, priority)| (priority, pos));

        let capacity = max_in_flight.saturating_sub(client.in_flight.len());
        let carried_over = candidates
            .iter()
            .skip(capacity)
            .map(|&(_, pos)| {
                let waited = client.carried_over.get(&pos).copied().unwrap_or_default();
                (pos, waited.saturating_add(1))
            })
            .collect();
        client.carried_over = carried_over;

        let send: Vec<_> = candidates
            .into_iter()
            .take(capacity)
            .map(|(_, pos)| pos)
            .collect();
        trace!(
            "client '{key}': {} block(s) to send, {} carried over, {} to emerge",
            send.len(),
            client.carried_over.len(),
            emerge.len()
        );
        TransferPlan { send, emerge }
    }
}

/// Whether the center of a block lies within the camera cone.
fn in_view_cone(view: &ClientView, pos: MapBlockPos) -> bool {
    let half_size = f32::from(MapBlockPos::SIZE) / 2.0;
    let center = pos.min_node().as_ivec3().as_vec3() + Vec3::splat(half_size);
    let (Some(to_block), Some(dir)) = (
        (center - view.camera_pos).try_normalize(),
        view.camera_dir.try_normalize(),
    ) else {
        return true;
    };
    to_block.dot(dir) >= (view.fov / 2.0).cos()
}
