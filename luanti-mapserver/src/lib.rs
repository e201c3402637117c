//! Map storage and lighting for servers compatible with Luanti.
//!
//! This crate only re-exports the crates of this workspace:
//! - [`luanti_core`]: positions, nodes and light values shared by everything else
//! - [`luanti_map`]: the map engine with storage, lighting, liquids, emerging and block transfer

pub use luanti_core;
pub use luanti_map;
