//! Tunables of the map engine and their defaults.

mod config_file;

use std::{error::Error, path::Path, str::FromStr, thread, time::Duration};

use anyhow::{Context, Result};
use log::debug;

use config_file::Config;

/// Keys understood by [`MapSettings::from_config`]
const KNOWN_KEYS: &[&str] = &[
    "server_unload_unused_data_timeout",
    "max_loaded_blocks",
    "map_compression_level_disk",
    "map_compression_level_net",
    "mapgen_limit",
    "chunksize",
    "num_emerge_threads",
    "emerge_queue_limit_total",
    "max_simultaneous_block_sends_per_client",
    "max_block_send_distance",
    "block_send_optimize_distance",
    "liquid_loop_max",
    "liquid_queue_purge_time",
    "time_budget_lighting_ms",
    "fixed_map_seed",
    "mg_name",
    "water_level",
    "mgflat_ground_level",
];

/// Highest `mapgen_limit` that keeps every generated node within the coordinate range.
pub const MAX_MAP_GENERATION_LIMIT: i16 = 31_007;

/// Settings of a map and its surrounding machinery.
#[derive(Clone, Debug, PartialEq)]
pub struct MapSettings {
    /// Seconds an unused block stays resident
    pub unload_unused_data_timeout: f32,
    /// Resident blocks beyond which unused blocks are unloaded early; `0` disables the limit
    pub max_loaded_blocks: usize,
    /// zstd level for blocks written to disk; `-1` selects the library default
    pub compression_level_disk: i32,
    /// zstd level for blocks sent to clients
    pub compression_level_net: i32,
    /// Nodes further from the origin than this are never generated
    pub mapgen_limit: i16,
    /// Edge length of a generation chunk in blocks
    pub chunksize: i16,
    /// Number of emerge worker threads
    pub num_emerge_threads: usize,
    /// Maximum number of queued emerge requests
    pub emerge_queue_limit_total: usize,
    /// Blocks that may be in flight to a single client
    pub max_simultaneous_block_sends_per_client: usize,
    /// Blocks further away (in blocks) are never sent
    pub max_block_send_distance: i16,
    /// Blocks closer than this (in blocks) are sent regardless of the camera direction
    pub block_send_optimize_distance: i16,
    /// Maximum number of liquid nodes evaluated per pass
    pub liquid_loop_max: usize,
    /// Seconds the liquid queue may keep growing before it is purged; `0` disables purging
    pub liquid_queue_purge_time: f32,
    /// Time a single queued lighting update may take
    pub time_budget_lighting: Duration,
    /// Seed of the map generator, random if unset
    pub fixed_map_seed: Option<u64>,
    /// Name of the map generator
    pub mg_name: String,
    /// Surface level of oceans
    pub water_level: i16,
    /// Surface level of the flat map generator
    pub mgflat_ground_level: i16,
}

impl Default for MapSettings {
    fn default() -> Self {
        Self {
            unload_unused_data_timeout: 29.0,
            max_loaded_blocks: 5_000,
            compression_level_disk: -1,
            compression_level_net: -1,
            mapgen_limit: MAX_MAP_GENERATION_LIMIT,
            chunksize: 5,
            num_emerge_threads: 1,
            emerge_queue_limit_total: 1_024,
            max_simultaneous_block_sends_per_client: 40,
            max_block_send_distance: 10,
            block_send_optimize_distance: 4,
            liquid_loop_max: 100_000,
            liquid_queue_purge_time: 0.0,
            time_budget_lighting: Duration::from_millis(50),
            fixed_map_seed: None,
            mg_name: "flat".to_owned(),
            water_level: 1,
            mgflat_ground_level: 8,
        }
    }
}

impl MapSettings {
    /// Reads the settings from a `minetest.conf` style file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read or contains malformed values.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_config(&Config::load(path.as_ref())?)
    }

    /// Reads the settings from the contents of a `minetest.conf` style file.
    ///
    /// # Errors
    ///
    /// Fails if the text is malformed or contains malformed values.
    pub fn parse(text: &str) -> Result<Self> {
        Self::from_config(&Config::parse(text)?)
    }

    fn from_config(config: &Config) -> Result<Self> {
        for key in config.keys() {
            if !KNOWN_KEYS.contains(&key) {
                debug!("ignoring setting {key}");
            }
        }

        let mut settings = Self::default();
        read(config, "server_unload_unused_data_timeout", &mut settings.unload_unused_data_timeout)?;
        read(config, "max_loaded_blocks", &mut settings.max_loaded_blocks)?;
        read(config, "map_compression_level_disk", &mut settings.compression_level_disk)?;
        read(config, "map_compression_level_net", &mut settings.compression_level_net)?;
        read(config, "mapgen_limit", &mut settings.mapgen_limit)?;
        read(config, "chunksize", &mut settings.chunksize)?;
        read(config, "num_emerge_threads", &mut settings.num_emerge_threads)?;
        read(config, "emerge_queue_limit_total", &mut settings.emerge_queue_limit_total)?;
        read(
            config,
            "max_simultaneous_block_sends_per_client",
            &mut settings.max_simultaneous_block_sends_per_client,
        )?;
        read(config, "max_block_send_distance", &mut settings.max_block_send_distance)?;
        read(config, "block_send_optimize_distance", &mut settings.block_send_optimize_distance)?;
        read(config, "liquid_loop_max", &mut settings.liquid_loop_max)?;
        read(config, "liquid_queue_purge_time", &mut settings.liquid_queue_purge_time)?;
        read(config, "mg_name", &mut settings.mg_name)?;
        read(config, "water_level", &mut settings.water_level)?;
        read(config, "mgflat_ground_level", &mut settings.mgflat_ground_level)?;

        let mut lighting_ms = u64::try_from(settings.time_budget_lighting.as_millis())?;
        read(config, "time_budget_lighting_ms", &mut lighting_ms)?;
        settings.time_budget_lighting = Duration::from_millis(lighting_ms);

        if let Some(seed) = config.get("fixed_map_seed").filter(|seed| !seed.is_empty()) {
            settings.fixed_map_seed = Some(parse_seed(seed));
        }

        settings.mapgen_limit = settings.mapgen_limit.clamp(0, MAX_MAP_GENERATION_LIMIT);
        settings.chunksize = settings.chunksize.max(1);
        if settings.num_emerge_threads == 0 {
            settings.num_emerge_threads = thread::available_parallelism()
                .map_or(1, |count| count.get().saturating_sub(1).max(1));
        }
        Ok(settings)
    }

    /// Unload timeout as a duration.
    #[must_use]
    pub fn unload_timeout(&self) -> Duration {
        Duration::from_secs_f32(self.unload_unused_data_timeout.max(0.0))
    }
}

fn read<T>(config: &Config, key: &str, target: &mut T) -> Result<()>
where
    T: FromStr,
    T::Err: Error + Send + Sync + 'static,
{
    if let Some(value) = config.get(key) {
        *target = value
            .parse()
            .with_context(|| format!("invalid value for setting {key}: '{value}'"))?;
    }
    Ok(())
}

/// Numeric seeds are used as they are, anything else is hashed (64 bit FNV-1a).
fn parse_seed(seed: &str) -> u64 {
    if let Ok(number) = seed.parse::<u64>() {
        return number;
    }
    if let Ok(number) = seed.parse::<i64>() {
        #[expect(clippy::cast_sign_loss, reason = "negative seeds wrap around")]
        return number as u64;
    }
    seed.bytes().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(0x0100_0000_01b3)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_yields_defaults() {
        assert_eq!(MapSettings::parse("").unwrap(), MapSettings::default());
    }

    #[test]
    fn values_are_read_and_sanitized() {
        let settings = MapSettings::parse(
            "max_loaded_blocks = 0\n\
             chunksize = 0\n\
             mapgen_limit = 20000\n\
             time_budget_lighting_ms = 5\n\
             fixed_map_seed = 42\n\
             mg_name = singlenode\n\
             some_unrelated_key = whatever\n",
        )
        .unwrap();
        assert_eq!(settings.max_loaded_blocks, 0);
        assert_eq!(settings.chunksize, 1);
        assert_eq!(settings.mapgen_limit, 20_000);
        assert_eq!(settings.time_budget_lighting, Duration::from_millis(5));
        assert_eq!(settings.fixed_map_seed, Some(42));
        assert_eq!(settings.mg_name, "singlenode");
    }

    #[test]
    fn textual_seeds_are_stable() {
        let first = MapSettings::parse("fixed_map_seed = hello").unwrap();
        let second = MapSettings::parse("fixed_map_seed = hello").unwrap();
        assert_eq!(first.fixed_map_seed, second.fixed_map_seed);
        assert_ne!(first.fixed_map_seed, Some(0));
        assert_eq!(parse_seed("-1"), u64::MAX);
    }

    #[test]
    fn malformed_values_name_the_key() {
        let error = MapSettings::parse("chunksize = five").unwrap_err();
        assert!(format!("{error:#}").contains("chunksize"), "{error:#}");
    }
}
