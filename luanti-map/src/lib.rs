//! Map storage and lighting engine for servers compatible with Luanti.
//!
//! The [`ServerMap`](map::ServerMap) keeps a sparse set of resident map blocks on top of a
//! [`MapDatabase`](storage::MapDatabase), relights blocks after edits, lets liquids flow and
//! reports every change as a [`MapEditEvent`](map::MapEditEvent). Blocks which are not resident
//! are obtained through the [`EmergeManager`](emerge::EmergeManager), either from the database
//! or from a [`MapGenerator`](generation::MapGenerator). The
//! [`BlockTransferScheduler`](transfer::BlockTransferScheduler) decides which blocks go to which
//! client.

pub mod block_store;
pub mod content_id_map;
pub mod emerge;
pub mod error;
pub mod generation;
mod lighting;
pub mod liquid;
pub mod map;
pub mod map_block;
pub mod node_def;
pub mod priority;
pub mod serialization;
pub mod settings;
pub mod storage;
pub mod transfer;

#[cfg(test)]
mod test_util;
