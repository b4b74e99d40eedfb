use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Defaults for sieving parameters, read from an optional `primal.toml` in
/// the working directory. Command-line flags override these; a missing
/// file just means the built-in defaults.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_offset_bits")]
    pub offset_bits: u8,
    #[serde(default = "default_entries")]
    pub entries: u16,
    #[serde(default = "default_batch_size")]
    pub batch_size: u64,
}

fn default_offset_bits() -> u8 {
    11
}

fn default_entries() -> u16 {
    300
}

fn default_batch_size() -> u64 {
    10_000_000_000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            offset_bits: default_offset_bits(),
            entries: default_entries(),
            batch_size: default_batch_size(),
        }
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        if !Path::new(path).exists() {
            return Ok(Self::default());
        }
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read {}", path))?;
        let config: Config =
            toml::from_str(&content).with_context(|| format!("Failed to parse {}", path))?;
        Ok(config)
    }
}
