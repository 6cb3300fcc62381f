//! Configuration loading and typed config structures for the greenhouse.
//!
//! The configuration lives in `greenhouse-config.yaml`. Every field has a
//! default, so a missing file or an empty document yields a working
//! single-process setup with the seed catalog and the in-process transport.
//!
//! Environment variables override connection settings:
//! - `NATS_URL` overrides `bridge.nats_url`
//! - `DATABASE_URL` overrides `database.url`
//! - `GREENHOUSE_PORT` overrides `hub.port`

use std::path::Path;
use std::time::Duration;

use greenhouse_types::{Catalog, Plant, Species, SpeciesId};
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::warn;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration, mirroring `greenhouse-config.yaml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct GreenhouseConfig {
    /// Decay scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Message broker settings.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// HTTP / WebSocket / event-stream server settings.
    #[serde(default)]
    pub hub: HubConfig,

    /// Persistence settings.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Catalog used when no database is configured.
    #[serde(default)]
    pub seed: SeedConfig,
}

impl GreenhouseConfig {
    /// Load configuration from a YAML file, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read, or
    /// [`ConfigError::Yaml`] if the content is not valid YAML.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = if yaml.trim().is_empty() {
            Self::default()
        } else {
            serde_yml::from_str(yaml)?
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    /// Override connection settings from `lookup` (normally the process
    /// environment). Unparseable port values are ignored with a warning.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("NATS_URL") {
            self.bridge.nats_url = val;
        }
        if let Some(val) = lookup("DATABASE_URL") {
            self.database.url = Some(val);
        }
        if let Some(val) = lookup("GREENHOUSE_PORT") {
            match val.parse() {
                Ok(port) => self.hub.port = port,
                Err(e) => warn!(value = val, error = %e, "Ignoring invalid GREENHOUSE_PORT"),
            }
        }
    }
}

/// Decay scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SchedulerConfig {
    /// Milliseconds between ticks.
    #[serde(default = "default_tick_interval_ms")]
    pub tick_interval_ms: u64,

    /// Upper bound for a single persistence write or audit request.
    #[serde(default = "default_persist_timeout_ms")]
    pub persist_timeout_ms: u64,

    /// Reload the repository catalog before each tick.
    #[serde(default = "default_true")]
    pub sync_each_tick: bool,

    /// Stop after this many ticks (0 = run until stopped).
    #[serde(default)]
    pub max_ticks: u64,
}

impl SchedulerConfig {
    /// [`persist_timeout_ms`](Self::persist_timeout_ms) as a [`Duration`].
    pub const fn persist_timeout(&self) -> Duration {
        Duration::from_millis(self.persist_timeout_ms)
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: default_tick_interval_ms(),
            persist_timeout_ms: default_persist_timeout_ms(),
            sync_each_tick: true,
            max_ticks: 0,
        }
    }
}

/// Which transport carries decay readings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BridgeMode {
    /// In-process broadcast; scheduler and hub share the process.
    #[default]
    Loopback,
    /// NATS broker.
    Nats,
}

/// Message broker configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BridgeConfig {
    /// Transport selection.
    #[serde(default)]
    pub mode: BridgeMode,

    /// NATS server URL.
    #[serde(default = "default_nats_url")]
    pub nats_url: String,

    /// First reconnect delay in milliseconds.
    #[serde(default = "default_reconnect_base_ms")]
    pub reconnect_base_ms: u64,

    /// Reconnect delay cap in milliseconds.
    #[serde(default = "default_reconnect_max_ms")]
    pub reconnect_max_ms: u64,

    /// Bounded outbound queue length; publishes beyond it are dropped.
    #[serde(default = "default_outbound_capacity")]
    pub outbound_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            mode: BridgeMode::default(),
            nats_url: default_nats_url(),
            reconnect_base_ms: default_reconnect_base_ms(),
            reconnect_max_ms: default_reconnect_max_ms(),
            outbound_capacity: default_outbound_capacity(),
        }
    }
}

/// Fan-out hub server configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct HubConfig {
    /// Bind address.
    #[serde(default = "default_host")]
    pub host: String,

    /// Listen port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Frames buffered per subscriber before new frames are dropped.
    #[serde(default = "default_subscriber_buffer")]
    pub subscriber_buffer: usize,

    /// Seconds between event-stream keep-alive comments.
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Allowed CORS origins. Empty allows any origin.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            subscriber_buffer: default_subscriber_buffer(),
            keep_alive_secs: default_keep_alive_secs(),
            cors_origins: default_cors_origins(),
        }
    }
}

/// Persistence configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct DatabaseConfig {
    /// `PostgreSQL` connection string. Without one, plants live in memory.
    #[serde(default)]
    pub url: Option<String>,

    /// Maximum pool connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: default_max_connections(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Output format.
    #[serde(default)]
    pub format: LogFormat,

    /// Default `EnvFilter` directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            format: LogFormat::default(),
            filter: default_log_filter(),
        }
    }
}

/// A species in the seed catalog.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeedSpecies {
    /// Species name, referenced by seed plants.
    pub name: String,
    /// Water lost per tick.
    pub decay_rate: Decimal,
}

/// A plant in the seed catalog.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeedPlant {
    /// Plant name.
    pub name: String,
    /// Name of a seed species.
    pub species: String,
    /// Starting water level.
    #[serde(default = "default_seed_water")]
    pub water: Decimal,
}

/// Catalog used when no database is configured.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SeedConfig {
    /// Seed species.
    #[serde(default)]
    pub species: Vec<SeedSpecies>,
    /// Seed plants.
    #[serde(default)]
    pub plants: Vec<SeedPlant>,
}

impl SeedConfig {
    /// Build a catalog with fresh ids.
    ///
    /// Plants naming an unknown species are skipped with a warning.
    pub fn to_catalog(&self) -> Catalog {
        let species: Vec<Species> = self
            .species
            .iter()
            .map(|s| Species {
                id: SpeciesId::new(),
                name: s.name.clone(),
                decay_rate: s.decay_rate,
            })
            .collect();

        let plants = self
            .plants
            .iter()
            .filter_map(|p| {
                let Some(sp) = species.iter().find(|s| s.name == p.species) else {
                    warn!(plant = p.name, species = p.species, "Seed plant has unknown species");
                    return None;
                };
                Some(Plant::new(p.name.clone(), sp.id).with_water(p.water))
            })
            .collect();

        Catalog { species, plants }
    }
}

impl Default for SeedConfig {
    fn default() -> Self {
        Self {
            species: vec![
                SeedSpecies {
                    name: String::from("Tomato"),
                    decay_rate: Decimal::new(20, 1),
                },
                SeedSpecies {
                    name: String::from("Cactus"),
                    decay_rate: Decimal::new(5, 1),
                },
            ],
            plants: vec![
                SeedPlant {
                    name: String::from("My Tomato"),
                    species: String::from("Tomato"),
                    water: Decimal::ONE_HUNDRED,
                },
                SeedPlant {
                    name: String::from("Office Cactus"),
                    species: String::from("Cactus"),
                    water: Decimal::new(80, 0),
                },
            ],
        }
    }
}

// ---------------------------------------------------------------------------
// Default value functions for serde
// ---------------------------------------------------------------------------

const fn default_tick_interval_ms() -> u64 {
    2000
}

const fn default_persist_timeout_ms() -> u64 {
    5000
}

const fn default_true() -> bool {
    true
}

fn default_nats_url() -> String {
    String::from("nats://localhost:4222")
}

const fn default_reconnect_base_ms() -> u64 {
    250
}

const fn default_reconnect_max_ms() -> u64 {
    30_000
}

const fn default_outbound_capacity() -> usize {
    1024
}

fn default_host() -> String {
    String::from("0.0.0.0")
}

const fn default_port() -> u16 {
    4000
}

const fn default_subscriber_buffer() -> usize {
    64
}

const fn default_keep_alive_secs() -> u64 {
    15
}

fn default_cors_origins() -> Vec<String> {
    vec![
        String::from("http://localhost:5173"),
        String::from("http://localhost:3000"),
    ]
}

const fn default_max_connections() -> u32 {
    10
}

fn default_log_filter() -> String {
    String::from("info")
}

const fn default_seed_water() -> Decimal {
    Decimal::ONE_HUNDRED
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_yields_defaults() {
        let mut config: GreenhouseConfig = serde_yml::from_str("{}").unwrap();
        config.apply_env_overrides(|_| None);
        assert_eq!(config, GreenhouseConfig::default());
        assert_eq!(config.scheduler.tick_interval_ms, 2000);
        assert!(config.scheduler.sync_each_tick);
        assert_eq!(config.hub.port, 4000);
        assert_eq!(config.bridge.mode, BridgeMode::Loopback);
        assert!(config.database.url.is_none());
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let yaml = "
scheduler:
  tick_interval_ms: 500
bridge:
  mode: nats
logging:
  format: json
";
        let config: GreenhouseConfig = serde_yml::from_str(yaml).unwrap();
        assert_eq!(config.scheduler.tick_interval_ms, 500);
        assert_eq!(config.scheduler.persist_timeout_ms, 5000);
        assert_eq!(config.bridge.mode, BridgeMode::Nats);
        assert_eq!(config.bridge.nats_url, "nats://localhost:4222");
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.logging.filter, "info");
    }

    #[test]
    fn env_overrides_win() {
        let mut config = GreenhouseConfig::default();
        config.apply_env_overrides(|key| match key {
            "NATS_URL" => Some(String::from("nats://broker:4222")),
            "DATABASE_URL" => Some(String::from("postgres://db/greenhouse")),
            "GREENHOUSE_PORT" => Some(String::from("8080")),
            _ => None,
        });
        assert_eq!(config.bridge.nats_url, "nats://broker:4222");
        assert_eq!(config.database.url.as_deref(), Some("postgres://db/greenhouse"));
        assert_eq!(config.hub.port, 8080);
    }

    #[test]
    fn invalid_port_override_is_ignored() {
        let mut config = GreenhouseConfig::default();
        config.apply_env_overrides(|key| (key == "GREENHOUSE_PORT").then(|| String::from("abc")));
        assert_eq!(config.hub.port, 4000);
    }

    #[test]
    fn default_seed_matches_the_demo_catalog() {
        let catalog = SeedConfig::default().to_catalog();
        assert_eq!(catalog.species.len(), 2);
        assert_eq!(catalog.plants.len(), 2);

        let cactus = catalog.species.iter().find(|s| s.name == "Cactus").unwrap();
        assert_eq!(cactus.decay_rate, Decimal::new(5, 1));
        let office = catalog
            .plants
            .iter()
            .find(|p| p.name == "Office Cactus")
            .unwrap();
        assert_eq!(office.species_id, cactus.id);
        assert_eq!(office.current_water, Decimal::new(80, 0));
    }

    #[test]
    fn seed_plants_with_unknown_species_are_skipped() {
        let yaml = "
seed:
  species:
    - name: Fern
      decay_rate: 1.5
  plants:
    - name: Ok
      species: Fern
    - name: Lost
      species: Orchid
";
        let config: GreenhouseConfig = serde_yml::from_str(yaml).unwrap();
        let catalog = config.seed.to_catalog();
        assert_eq!(catalog.plants.len(), 1);
        assert_eq!(catalog.plants.first().map(|p| p.current_water), Some(Decimal::ONE_HUNDRED));
        assert_eq!(catalog.species.first().map(|s| s.decay_rate), Some(Decimal::new(15, 1)));
    }

    #[test]
    fn shipped_config_file_is_the_defaults() {
        let yaml = include_str!("../../../greenhouse-config.yaml");
        let mut config: GreenhouseConfig = serde_yml::from_str(yaml).unwrap();
        config.apply_env_overrides(|_| None);
        assert_eq!(config.scheduler, SchedulerConfig::default());
        assert_eq!(config.bridge, BridgeConfig::default());
        assert_eq!(config.hub, HubConfig::default());
        assert_eq!(config.database, DatabaseConfig::default());
        assert_eq!(config.seed.plants, SeedConfig::default().plants);
    }

    #[test]
    fn invalid_yaml_is_an_error() {
        let result = GreenhouseConfig::parse("scheduler: [unclosed");
        assert!(matches!(result, Err(ConfigError::Yaml { .. })));
    }
}
