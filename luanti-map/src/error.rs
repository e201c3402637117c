//! Errors reported by map operations.

use luanti_core::{MapBlockPos, MapNodePos};

use crate::serialization::{DeserializeError, SerializeError};

/// Failures of explicit map operations.
///
/// Reading an unloaded node is not an error; such reads yield `MapNode::IGNORE` instead.
#[derive(thiserror::Error, Debug)]
pub enum MapError {
    /// The position lies outside of the configured map limits
    #[error("position {0} is outside of the map")]
    InvalidPosition(MapNodePos),
    /// An area with a negative extent was requested
    #[error("invalid area from {min} to {max}")]
    InvalidArea {
        /// Requested lower corner
        min: MapNodePos,
        /// Requested upper corner
        max: MapNodePos,
    },
    /// The operation requires a resident block
    #[error("block {0} is not loaded")]
    BlockNotLoaded(MapBlockPos),
    /// A stored block could not be decoded
    #[error("block {pos} is corrupt: {source}")]
    Deserialize {
        /// Position of the corrupt block
        pos: MapBlockPos,
        /// What went wrong
        source: DeserializeError,
    },
    /// A block could not be encoded
    #[error("block {pos} cannot be serialized: {source}")]
    Serialize {
        /// Position of the block
        pos: MapBlockPos,
        /// What went wrong
        source: SerializeError,
    },
    /// The database reported an error
    #[error("map database error: {0:#}")]
    Backend(anyhow::Error),
}

/// Result type of map operations
pub type MapResult<T> = Result<T, MapError>;

/// Why a block will never become available through the emerge pipeline.
///
/// Unlike a pending request, all of these are final.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum EmergeFailure {
    /// The block lies beyond the generation limit
    #[error("block is outside of the generation limit")]
    OutsideLimits,
    /// The stored block cannot be decoded; it is neither regenerated nor overwritten
    #[error("stored block is corrupt")]
    Corrupt,
    /// The map generator failed or is missing
    #[error("generation failed: {0}")]
    GenerationFailed(String),
    /// The database failed while loading
    #[error("database error: {0}")]
    Backend(String),
    /// The emerge manager shut down before the request was processed
    #[error("emerge manager shut down")]
    ShutDown,
}
