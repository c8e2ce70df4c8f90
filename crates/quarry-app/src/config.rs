//! Engine configuration, loadable from TOML.

use std::path::Path;

use anyhow::Context as _;
use quarry_mesh::mesher::MesherConfig;
use quarry_world::manager::ChunkManagerConfig;
use quarry_world::terrain::TerrainConfig;
use serde::{Deserialize, Serialize};

/// Log filter threshold.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

impl From<LogLevel> for tracing::Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => tracing::Level::ERROR,
            LogLevel::Warn => tracing::Level::WARN,
            LogLevel::Info => tracing::Level::INFO,
            LogLevel::Debug => tracing::Level::DEBUG,
            LogLevel::Trace => tracing::Level::TRACE,
        }
    }
}

/// Top-level engine configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Box half-extent of the loaded chunk neighborhood
    pub chunk_load_radius: u32,
    /// Extra chunks beyond the radius before eviction
    pub unload_hysteresis: u32,
    /// Max chunks created and queued for meshing per manager tick
    pub chunks_per_tick: u32,
    /// Worker threads; 0 selects automatically
    pub thread_count: u32,
    /// Allow idle workers to steal queued critical work
    pub work_stealing_enabled: bool,
    /// Fixed game-tick frequency
    pub tick_rate_hz: u32,
    /// Log filter threshold
    pub log_level: LogLevel,
    /// Tolerance of the cutout full-face culling test
    pub full_face_epsilon: f32,
    /// Bundled noise-terrain settings
    pub terrain: TerrainConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            chunk_load_radius: 8,
            unload_hysteresis: 2,
            chunks_per_tick: 2,
            thread_count: 0,
            work_stealing_enabled: true,
            tick_rate_hz: 20,
            log_level: LogLevel::Info,
            full_face_epsilon: 0.01,
            terrain: TerrainConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load a configuration file; missing keys fall back to defaults.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        toml::from_str(&text).with_context(|| format!("parsing config {}", path.display()))
    }

    /// The chunk manager's slice of the configuration
    pub fn chunk_manager(&self) -> ChunkManagerConfig {
        ChunkManagerConfig {
            load_radius: self.chunk_load_radius,
            unload_hysteresis: self.unload_hysteresis,
            chunks_per_tick: self.chunks_per_tick,
        }
    }

    /// The mesher's slice of the configuration
    pub fn mesher(&self) -> MesherConfig {
        MesherConfig {
            full_face_epsilon: self.full_face_epsilon,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.chunk_load_radius, 8);
        assert_eq!(config.unload_hysteresis, 2);
        assert_eq!(config.chunks_per_tick, 2);
        assert_eq!(config.thread_count, 0);
        assert!(config.work_stealing_enabled);
        assert_eq!(config.tick_rate_hz, 20);
        assert_eq!(config.log_level, LogLevel::Info);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            chunk_load_radius = 4
            log_level = "debug"
            "#,
        )
        .unwrap();

        assert_eq!(config.chunk_load_radius, 4);
        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.tick_rate_hz, 20);
    }

    #[test]
    fn terrain_section_parses() {
        let config: EngineConfig = toml::from_str(
            r#"
            [terrain]
            seed = 7
            sea_level = 12
            "#,
        )
        .unwrap();

        assert_eq!(config.terrain.seed, 7);
        assert_eq!(config.terrain.sea_level, 12);
    }

    #[test]
    fn log_level_converts_to_tracing() {
        assert_eq!(tracing::Level::from(LogLevel::Warn), tracing::Level::WARN);
        assert_eq!(tracing::Level::from(LogLevel::Trace), tracing::Level::TRACE);
    }
}
