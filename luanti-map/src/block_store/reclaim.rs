//! Deferred destruction of blocks which have been removed from the store.
//!
//! Removing a block from the store only unlinks it. The store's own reference is parked here,
//! tagged with the epoch of its removal, until every consumer that might still be iterating over a
//! snapshot taken before the removal has finished.

use std::{
    collections::BTreeMap,
    sync::atomic::{AtomicU64, Ordering},
};

use parking_lot::Mutex;

use super::BlockHandle;

/// Counts removals and keeps track of the epochs consumers are pinned to.
#[derive(Default)]
pub(crate) struct Reclaimer {
    epoch: AtomicU64,
    /// number of live pins per epoch
    pins: Mutex<BTreeMap<u64, usize>>,
    retired: Mutex<Vec<(u64, BlockHandle)>>,
}

impl Reclaimer {
    /// Pins the current epoch until the returned guard is dropped.
    pub(crate) fn pin(&self) -> EpochPin<'_> {
        let mut pins = self.pins.lock();
        let epoch = self.epoch.load(Ordering::Acquire);
        *pins.entry(epoch).or_default() += 1;
        EpochPin {
            reclaimer: self,
            epoch,
        }
    }

    /// Parks a handle which has just been unlinked from the store.
    pub(crate) fn retire(&self, handle: BlockHandle) {
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel);
        self.retired.lock().push((epoch, handle));
    }

    /// Drops every retired handle no pinned consumer can observe anymore.
    ///
    /// Returns the number of handles released.
    pub(crate) fn collect(&self) -> usize {
        let oldest_pin = self.pins.lock().keys().next().copied();
        let mut retired = self.retired.lock();
        let before = retired.len();
        // a pin taken at epoch `e` was taken after every removal of an epoch below `e`
        retired.retain(|(epoch, _)| oldest_pin.is_some_and(|oldest| oldest <= *epoch));
        before - retired.len()
    }

    /// Number of retired handles waiting to be released
    pub(crate) fn pending(&self) -> usize {
        self.retired.lock().len()
    }

    fn unpin(&self, epoch: u64) {
        let mut pins = self.pins.lock();
        if let Some(count) = pins.get_mut(&epoch) {
            *count -= 1;
            if *count == 0 {
                pins.remove(&epoch);
            }
        }
    }
}

/// Keeps retired blocks from being released while alive.
#[must_use]
pub(crate) struct EpochPin<'reclaimer> {
    reclaimer: &'reclaimer Reclaimer,
    epoch: u64,
}

impl Drop for EpochPin<'_> {
    fn drop(&mut self) {
        self.reclaimer.unpin(self.epoch);
    }
}
