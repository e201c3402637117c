//! Makes blocks resident: from memory, from the database or by generating them.
//!
//! Requests are queued by priority and worked off by a pool of dedicated threads. Generation
//! happens in chunks of `chunksize`³ blocks; a newly generated chunk is lit before any request
//! for one of its blocks completes.

mod ticket;

use std::{
    cmp::Reverse,
    collections::{BTreeSet, BinaryHeap, HashMap, HashSet, hash_map::Entry},
    sync::Arc,
    thread::{self, JoinHandle},
};

use anyhow::{Context as _, Result};
use glam::{I16Vec3, IVec3};
use log::{debug, error, trace, warn};
use luanti_core::{ContentId, MapBlockPos, MapNode};
use parking_lot::{Condvar, Mutex};

pub use ticket::{EmergeResult, EmergeStatus, EmergeTicket};

use crate::{
    block_store::BlockHandle,
    error::{EmergeFailure, MapError},
    generation::{MapGenerator, VoxelManipulator},
    map::ServerMap,
    priority::Priority,
};

/// Queue entry; the heap pops the most important request first.
#[derive(PartialEq, Eq, PartialOrd, Ord)]
struct QueueEntry {
    priority: Reverse<Priority>,
    pos: Reverse<MapBlockPos>,
}

struct PendingRequest {
    priority: Priority,
    ticket: EmergeTicket,
    in_flight: bool,
}

#[derive(Default)]
struct EmergeQueue {
    heap: BinaryHeap<QueueEntry>,
    pending: HashMap<MapBlockPos, PendingRequest>,
    shut_down: bool,
}

impl EmergeQueue {
    /// Takes the most important request which is not being worked on yet.
    fn next(&mut self) -> Option<(MapBlockPos, EmergeTicket)> {
        while let Some(QueueEntry {
            priority: Reverse(priority),
            pos: Reverse(pos),
        }) = self.heap.pop()
        {
            // entries are left behind when a request gets a higher priority
            let Some(request) = self.pending.get_mut(&pos) else {
                continue;
            };
            if request.in_flight || request.priority != priority {
                continue;
            }
            request.in_flight = true;
            return Some((pos, request.ticket.clone()));
        }
        None
    }
}

/// Chunks currently being generated.
#[derive(Default)]
struct ChunkLocks {
    active: Mutex<HashSet<IVec3>>,
    released: Condvar,
}

impl ChunkLocks {
    fn acquire(&self, chunk: IVec3) -> ChunkGuard<'_> {
        let mut active = self.active.lock();
        while active.contains(&chunk) {
            self.released.wait(&mut active);
        }
        active.insert(chunk);
        ChunkGuard { locks: self, chunk }
    }
}

struct ChunkGuard<'locks> {
    locks: &'locks ChunkLocks,
    chunk: IVec3,
}

impl Drop for ChunkGuard<'_> {
    fn drop(&mut self) {
        self.locks.active.lock().remove(&self.chunk);
        self.locks.released.notify_all();
    }
}

struct Shared {
    map: Arc<ServerMap>,
    generator: Option<Arc<dyn MapGenerator>>,
    seed: u64,
    queue: Mutex<EmergeQueue>,
    queue_changed: Condvar,
    chunks: ChunkLocks,
}

/// Owns the emerge worker threads.
///
/// Dropping the manager shuts the workers down; requests still queued fail with
/// [`EmergeFailure::ShutDown`].
pub struct EmergeManager {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
}

impl EmergeManager {
    /// Starts `num_emerge_threads` workers (at least one).
    ///
    /// Without a generator only stored blocks can be emerged.
    ///
    /// # Errors
    ///
    /// Fails if a worker thread cannot be spawned.
    pub fn start(
        map: Arc<ServerMap>,
        generator: Option<Arc<dyn MapGenerator>>,
        seed: u64,
    ) -> Result<Self> {
        let thread_count = map.settings().num_emerge_threads.max(1);
        let shared = Arc::new(Shared {
            map,
            generator,
            seed,
            queue: Mutex::default(),
            queue_changed: Condvar::new(),
            chunks: ChunkLocks::default(),
        });
        let mut manager = Self {
            shared,
            workers: Vec::with_capacity(thread_count),
        };
        for index in 0..thread_count {
            let shared = Arc::clone(&manager.shared);
            let worker = thread::Builder::new()
                .name(format!("emerge-{index}"))
                .spawn(move || shared.run_worker())
                .context("failed to spawn emerge worker")?;
            manager.workers.push(worker);
        }
        debug!("started {thread_count} emerge worker(s)");
        Ok(manager)
    }

    /// Requests a block.
    ///
    /// Requests for the same block share a ticket; the most important priority wins. Returns
    /// `None` if the queue is full, in which case the caller should try again later.
    pub fn request_block(&self, pos: MapBlockPos, priority: Priority) -> Option<EmergeTicket> {
        if let Some(handle) = self.shared.resident_generated(pos) {
            return Some(EmergeTicket::completed(pos, Ok(handle)));
        }
        if self.shared.map.blockpos_over_limit(pos) {
            return Some(EmergeTicket::completed(
                pos,
                Err(EmergeFailure::OutsideLimits),
            ));
        }

        let limit = self.shared.map.settings().emerge_queue_limit_total;
        let mut queue = self.shared.queue.lock();
        if queue.shut_down {
            return Some(EmergeTicket::completed(pos, Err(EmergeFailure::ShutDown)));
        }
        let pending = queue.pending.len();
        let ticket = match queue.pending.entry(pos) {
            Entry::Occupied(mut entry) => {
                let request = entry.get_mut();
                if request.in_flight || priority >= request.priority {
                    return Some(request.ticket.clone());
                }
                request.priority = priority;
                request.ticket.clone()
            }
            Entry::Vacant(entry) => {
                if pending >= limit {
                    trace!("emerge queue is full, rejecting {pos}");
                    return None;
                }
                let ticket = EmergeTicket::new(pos);
                entry.insert(PendingRequest {
                    priority,
                    ticket: ticket.clone(),
                    in_flight: false,
                });
                ticket
            }
        };
        queue.heap.push(QueueEntry {
            priority: Reverse(priority),
            pos: Reverse(pos),
        });
        drop(queue);
        self.shared.queue_changed.notify_one();
        Some(ticket)
    }

    /// Emerges a block on the calling thread, bypassing the queue.
    ///
    /// # Errors
    ///
    /// Reports why the block will never become available.
    pub fn emerge_now(&self, pos: MapBlockPos) -> EmergeResult {
        self.shared.emerge(pos)
    }

    /// Number of requests not completed yet
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.shared.queue.lock().pending.len()
    }

    /// Stops all workers after they finished their current block.
    pub fn shutdown(&mut self) {
        let abandoned: Vec<_> = {
            let mut queue = self.shared.queue.lock();
            queue.shut_down = true;
            queue.heap.clear();
            let mut abandoned = Vec::new();
            queue.pending.retain(|_, request| {
                if request.in_flight {
                    true
                } else {
                    abandoned.push(request.ticket.clone());
                    false
                }
            });
            abandoned
        };
        self.shared.queue_changed.notify_all();
        for ticket in abandoned {
            ticket.complete(Err(EmergeFailure::ShutDown));
        }
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                error!("an emerge worker panicked");
            }
        }
    }
}

impl Drop for EmergeManager {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn run_worker(&self) {
        loop {
            let (pos, ticket) = {
                let mut queue = self.queue.lock();
                loop {
                    if queue.shut_down {
                        return;
                    }
                    if let Some(next) = queue.next() {
                        break next;
                    }
                    self.queue_changed.wait(&mut queue);
                }
            };

            let result = self.emerge(pos);
            if let Err(failure) = &result {
                debug!("block {pos} cannot be emerged: {failure}");
            }
            self.queue.lock().pending.remove(&pos);
            ticket.complete(result);
        }
    }

    fn resident_generated(&self, pos: MapBlockPos) -> Option<BlockHandle> {
        self.map
            .blocks()
            .get(pos)
            .filter(|handle| handle.lock().generated())
    }

    /// Memory, then database, then generator.
    fn emerge(&self, pos: MapBlockPos) -> EmergeResult {
        if self.map.blockpos_over_limit(pos) {
            return Err(EmergeFailure::OutsideLimits);
        }
        if let Some(handle) = self.resident_generated(pos) {
            return Ok(handle);
        }
        if let Some(handle) = self.load(pos)? {
            trace!("emerged block {pos} from the database");
            return Ok(handle);
        }
        self.generate_chunk_of(pos)?;
        self.resident_generated(pos).ok_or_else(|| {
            EmergeFailure::GenerationFailed(format!("block {pos} was not generated"))
        })
    }

    /// Loads a generated block from the database.
    fn load(&self, pos: MapBlockPos) -> Result<Option<BlockHandle>, EmergeFailure> {
        match self.map.load_block(pos) {
            Ok(Some(handle)) if handle.lock().generated() => Ok(Some(handle)),
            Ok(_) => Ok(None),
            Err(MapError::Deserialize { pos, source }) => {
                warn!("stored block {pos} is corrupt and stays untouched: {source}");
                Err(EmergeFailure::Corrupt)
            }
            Err(error) => Err(EmergeFailure::Backend(error.to_string())),
        }
    }

    /// The chunk containing `pos` as `(chunk index, first block, last block)`.
    fn chunk_of(&self, pos: MapBlockPos) -> (IVec3, IVec3, IVec3) {
        let size = i32::from(self.map.settings().chunksize.max(1));
        let offset = IVec3::splat(-(size / 2));
        let chunk = (pos.vec().as_ivec3() - offset).div_euclid(IVec3::splat(size));
        let min = chunk * size + offset;
        (chunk, min, min + IVec3::splat(size - 1))
    }

    fn over_limit(&self, pos: IVec3) -> bool {
        MapBlockPos::from_ivec3(pos).is_none_or(|pos| self.map.blockpos_over_limit(pos))
    }

    /// Generates the chunk containing `pos` unless `pos` got generated in the meantime.
    fn generate_chunk_of(&self, pos: MapBlockPos) -> Result<(), EmergeFailure> {
        let Some(generator) = &self.generator else {
            return Err(EmergeFailure::GenerationFailed(
                "no map generator configured".to_owned(),
            ));
        };
        let (chunk, min, max) = self.chunk_of(pos);
        if self.over_limit(min - IVec3::ONE) || self.over_limit(max + IVec3::ONE) {
            return Err(EmergeFailure::OutsideLimits);
        }
        let (Some(min), Some(max)) = (MapBlockPos::from_ivec3(min), MapBlockPos::from_ivec3(max))
        else {
            return Err(EmergeFailure::OutsideLimits);
        };

        let _guard = self.chunks.acquire(chunk);
        if self.resident_generated(pos).is_some() {
            return Ok(());
        }

        // stored blocks win over generated ones, corrupt ones are left alone
        let mut skipped = HashSet::new();
        for block_pos in MapBlockPos::iter_area(min, max) {
            if self.resident_generated(block_pos).is_some() {
                continue;
            }
            match self.load(block_pos) {
                Ok(_) => {}
                Err(failure) => {
                    debug!("not generating block {block_pos}: {failure}");
                    skipped.insert(block_pos);
                }
            }
        }

        let border_min = min.checked_add(I16Vec3::NEG_ONE).unwrap_or(min);
        let border_max = max.checked_add(I16Vec3::ONE).unwrap_or(max);
        let mut vm = VoxelManipulator::new(border_min.min_node(), border_max.max_node());
        for block_pos in MapBlockPos::iter_area(border_min, border_max) {
            if let Some(handle) = self.resident_generated(block_pos) {
                vm.copy_from_block(&handle.lock());
            }
        }

        let (min_node, max_node) = (min.min_node(), max.max_node());
        generator
            .generate(&mut vm, min_node, max_node, self.seed)
            .map_err(|error| EmergeFailure::GenerationFailed(format!("{error:#}")))?;
        vm.replace(
            min_node.as_ivec3(),
            max_node.as_ivec3(),
            ContentId::IGNORE,
            MapNode::AIR,
        );

        let mut written = Vec::new();
        for block_pos in MapBlockPos::iter_area(min, max) {
            if skipped.contains(&block_pos) {
                continue;
            }
            let handle = self.map.blocks().get_or_create_blank(block_pos);
            let mut block = handle.lock();
            if block.generated() {
                continue;
            }
            block.set_nodes(vm.block_nodes(block_pos));
            block.is_underground = generator.is_underground(block_pos);
            written.push(handle.clone());
        }

        // light before the blocks count as generated
        let mut worklist: BTreeSet<_> = written.iter().map(BlockHandle::pos).collect();
        worklist.extend(
            MapBlockPos::iter_area(border_min, border_max)
                .filter(|block_pos| self.resident_generated(*block_pos).is_some()),
        );
        self.map.update_lighting(&mut worklist, None);
        for handle in &written {
            handle.lock().set_generated(true);
        }
        debug!(
            "generated chunk {chunk} ({} new blocks) with '{}'",
            written.len(),
            generator.name()
        );
        Ok(())
    }
}
