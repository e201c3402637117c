//! Contains the core types needed for most APIs.

mod content_id;
mod light;
mod map_block;
mod map_node;

pub use content_id::*;
pub use light::*;
pub use map_block::*;
pub use map_node::*;
