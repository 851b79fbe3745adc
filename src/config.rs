// ⚙️ Configuration - TOML file with built-in defaults
//
// [store]
// path = "data/standings.db"
//
// [audit]
// path = "data/pastes/audit.log"
//
// [import]
// lock = "fail_fast"    # or "block"
//
// [towns.ASH]
// name = "Ashland Youth Soccer"
// population = 18832

use crate::store::LockPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TownInfo {
    pub name: String,
    pub population: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            path: PathBuf::from("data/standings.db"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub path: PathBuf,
}

impl Default for AuditConfig {
    fn default() -> Self {
        AuditConfig {
            path: PathBuf::from("data/pastes/audit.log"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImportConfig {
    pub lock: LockPolicy,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub audit: AuditConfig,
    pub import: ImportConfig,
    /// Keyed by upper-case town code
    pub towns: BTreeMap<String, TownInfo>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            store: StoreConfig::default(),
            audit: AuditConfig::default(),
            import: ImportConfig::default(),
            towns: default_towns(),
        }
    }
}

impl Config {
    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!(path = %path.display(), "no config file, using defaults");
            return Ok(Config::default());
        }

        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config: {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("Invalid config: {}", path.display()))
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let mut config: Config = toml::from_str(text)?;
        // Town codes are matched case-insensitively
        config.towns = config
            .towns
            .into_iter()
            .map(|(code, info)| (code.to_ascii_uppercase(), info))
            .collect();
        Ok(config)
    }

    pub fn town(&self, code: &str) -> Option<&TownInfo> {
        self.towns.get(&code.trim().to_ascii_uppercase())
    }
}

fn town(name: &str, population: u32) -> TownInfo {
    TownInfo {
        name: name.to_string(),
        population,
    }
}

/// Foxborough and its peer towns (2020 census populations)
pub fn default_towns() -> BTreeMap<String, TownInfo> {
    [
        ("FOX", town("Foxborough Youth Soccer", 18618)),
        ("HOP", town("Hopkinton Youth Soccer", 18758)),
        ("WAL", town("Walpole Youth Soccer Association", 24070)),
        ("WSB", town("Westborough Youth Soccer Association", 21567)),
        ("MAN", town("Mansfield Youth Soccer", 25067)),
        ("ASH", town("Ashland Youth Soccer", 18832)),
        ("HOL", town("Holliston Youth Soccer Association", 15494)),
        ("BEL", town("Bellingham Soccer Association", 16945)),
        ("MDY", town("Medway Youth Soccer", 13115)),
    ]
    .into_iter()
    .map(|(code, info)| (code.to_string(), info))
    .collect()
}
