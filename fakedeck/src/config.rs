//! Configuration for the deck emulator.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeckConfig {
    /// Network settings.
    pub network: NetworkConfig,
    /// Deck identity and storage layout.
    pub deck: DeckSection,
    /// Simulated engine settings.
    pub engine: EngineConfig,
    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Network configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// TCP port for the deck control protocol.
    pub port: u16,
}

/// Deck identity and storage layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeckSection {
    /// Model string announced in the connection banner.
    pub model: String,
    /// Number of storage slots to mount.
    pub num_slots: u32,
    /// Directory containing one subdirectory per slot ("1", "2", ...).
    pub slots_path: PathBuf,
    /// Video format reported in slot and transport info.
    pub video_format: String,
}

/// Simulated engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Duration reported for every probed clip, in seconds.
    pub default_clip_secs: u64,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
}

// ── Defaults ─────────────────────────────────────────────────────

impl Default for DeckConfig {
    fn default() -> Self {
        Self {
            network: NetworkConfig::default(),
            deck: DeckSection::default(),
            engine: EngineConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self { port: 9993 }
    }
}

impl Default for DeckSection {
    fn default() -> Self {
        Self {
            model: "FakeDeck".into(),
            num_slots: 1,
            slots_path: PathBuf::from("media"),
            video_format: "720p5994".into(),
        }
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_clip_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
        }
    }
}

// ── Loading ──────────────────────────────────────────────────────

impl DeckConfig {
    /// Load configuration from a TOML file, falling back to defaults.
    pub fn load(path: &Path) -> Self {
        match std::fs::read_to_string(path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|e| {
                tracing::warn!("invalid config {}: {e}; using defaults", path.display());
                Self::default()
            }),
            Err(_) => {
                tracing::info!("no config at {}; using defaults", path.display());
                Self::default()
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
