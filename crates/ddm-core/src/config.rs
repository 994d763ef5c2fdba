//! Engine-wide configuration: loaded from `~/.config/ddm/config.toml`,
//! mutated at runtime through validated setters (spec's "descriptor-based
//! configuration" turns into eager-validating setters here — there is no
//! attribute-descriptor machinery to port, just the validation itself).

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{DdmError, Result};
use crate::mission::ConflictPolicy;

/// Outbound proxy configuration, one URL per scheme.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Proxies {
    pub http: Option<String>,
    pub https: Option<String>,
}

/// Engine-wide configuration.
///
/// Every setter validates its argument before storing it and returns
/// [`DdmError::Config`] on a bad value, matching §9's "each setter
/// validates eagerly" note.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Size of the bounded worker pool (number of "roads").
    pub roads: usize,
    /// Number of retry attempts after the first, per request.
    pub retry: u32,
    /// Sleep between retry attempts.
    #[serde(with = "duration_secs")]
    pub interval: Duration,
    /// Per-request read timeout.
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
    /// Default destination directory for missions that don't override it.
    pub goal_path: PathBuf,
    /// Default allow-split flag for new missions.
    pub split: bool,
    /// Target size of each range in a split download, in bytes.
    pub block_size: u64,
    /// Default conflict policy applied when a destination path exists.
    pub file_exists: ConflictPolicy,
    pub proxies: Proxies,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            roads: 10,
            retry: 3,
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(20),
            goal_path: default_goal_path(),
            split: true,
            block_size: 10 * 1024 * 1024,
            file_exists: ConflictPolicy::Rename,
            proxies: Proxies::default(),
        }
    }
}

fn default_goal_path() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Downloads")
}

impl EngineConfig {
    pub fn set_roads(&mut self, roads: usize) -> Result<()> {
        if roads == 0 {
            return Err(DdmError::Config {
                field: "roads",
                reason: "must be > 0".to_string(),
            });
        }
        self.roads = roads;
        Ok(())
    }

    pub fn set_retry(&mut self, retry: u32) -> Result<()> {
        self.retry = retry;
        Ok(())
    }

    pub fn set_interval(&mut self, secs: f64) -> Result<()> {
        if secs < 0.0 {
            return Err(DdmError::Config {
                field: "interval",
                reason: "must be >= 0".to_string(),
            });
        }
        self.interval = Duration::from_secs_f64(secs);
        Ok(())
    }

    pub fn set_timeout(&mut self, secs: f64) -> Result<()> {
        if secs < 0.0 {
            return Err(DdmError::Config {
                field: "timeout",
                reason: "must be >= 0".to_string(),
            });
        }
        self.timeout = Duration::from_secs_f64(secs);
        Ok(())
    }

    pub fn set_goal_path(&mut self, path: impl Into<PathBuf>) -> Result<()> {
        self.goal_path = path.into();
        Ok(())
    }

    pub fn set_split(&mut self, split: bool) -> Result<()> {
        self.split = split;
        Ok(())
    }

    /// Accepts a raw byte count or a string with suffix `{B, K, M, G}`
    /// (case-insensitive). `"50M"` = `50 * 1_048_576`.
    pub fn set_block_size(&mut self, value: &str) -> Result<()> {
        self.block_size = parse_block_size(value)?;
        Ok(())
    }

    pub fn set_file_exists(&mut self, policy: ConflictPolicy) -> Result<()> {
        self.file_exists = policy;
        Ok(())
    }

    pub fn set_proxies(&mut self, proxies: Proxies) -> Result<()> {
        self.proxies = proxies;
        Ok(())
    }
}

/// Parses a block-size string: a bare integer (bytes), or an integer
/// followed by one of `B`, `K`, `M`, `G` (case-insensitive).
///
/// Deliberately uses `1 << 30` for the `G` suffix. The system this engine
/// was modeled on computes the `G` multiplier as `20 * 2^30` instead of
/// the conventional `2^30` — a bug, not a feature; this implementation
/// uses the conventional binary gigabyte.
pub fn parse_block_size(value: &str) -> Result<u64> {
    let value = value.trim();
    if value.is_empty() {
        return Err(DdmError::Config {
            field: "block_size",
            reason: "empty value".to_string(),
        });
    }

    let (digits, multiplier) = match value.chars().last().unwrap() {
        'b' | 'B' => (&value[..value.len() - 1], 1u64),
        'k' | 'K' => (&value[..value.len() - 1], 1024u64),
        'm' | 'M' => (&value[..value.len() - 1], 1024 * 1024u64),
        'g' | 'G' => (&value[..value.len() - 1], 1024 * 1024 * 1024u64),
        _ => (value, 1u64),
    };

    let digits = digits.trim();
    let n: u64 = digits.parse().map_err(|_| DdmError::Config {
        field: "block_size",
        reason: format!("not a number: {:?}", digits),
    })?;

    n.checked_mul(multiplier).ok_or(DdmError::Config {
        field: "block_size",
        reason: "overflow".to_string(),
    })
}

pub fn config_path() -> anyhow::Result<PathBuf> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("ddm")?;
    Ok(xdg_dirs.place_config_file("config.toml")?)
}

/// Load configuration from disk, creating a default file if none exists.
pub fn load_or_init() -> anyhow::Result<EngineConfig> {
    let path = config_path()?;
    if !path.exists() {
        let default_cfg = EngineConfig::default();
        let toml = toml::to_string_pretty(&default_cfg)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&path, toml)?;
        tracing::info!(path = %path.display(), "created default config");
        return Ok(default_cfg);
    }

    let data = fs::read_to_string(&path)?;
    let cfg: EngineConfig = toml::from_str(&data)?;
    Ok(cfg)
}

/// `toml` has no native `Duration` support; store as whole seconds.
mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_f64(d.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}

impl Serialize for ConflictPolicy {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        let name = match self {
            ConflictPolicy::Skip => "skip",
            ConflictPolicy::Overwrite => "overwrite",
            ConflictPolicy::Rename => "rename",
            ConflictPolicy::Add => "add",
        };
        s.serialize_str(name)
    }
}

impl<'de> Deserialize<'de> for ConflictPolicy {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(d)?;
        match s.as_str() {
            "skip" => Ok(ConflictPolicy::Skip),
            "overwrite" => Ok(ConflictPolicy::Overwrite),
            "rename" => Ok(ConflictPolicy::Rename),
            "add" => Ok(ConflictPolicy::Add),
            other => Err(serde::de::Error::custom(format!(
                "unknown conflict policy: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeaderOverrides(pub HashMap<String, String>);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_block_size_plain_bytes() {
        assert_eq!(parse_block_size("1024").unwrap(), 1024);
    }

    #[test]
    fn parse_block_size_suffixes() {
        assert_eq!(parse_block_size("50M").unwrap(), 50 * 1024 * 1024);
        assert_eq!(parse_block_size("10k").unwrap(), 10 * 1024);
        assert_eq!(parse_block_size("2G").unwrap(), 2 * 1024 * 1024 * 1024);
        assert_eq!(parse_block_size("5B").unwrap(), 5);
    }

    #[test]
    fn parse_block_size_g_is_conventional_not_the_upstream_bug() {
        assert_eq!(parse_block_size("1G").unwrap(), 1_073_741_824);
    }

    #[test]
    fn parse_block_size_rejects_garbage() {
        assert!(parse_block_size("").is_err());
        assert!(parse_block_size("abc").is_err());
    }

    #[test]
    fn set_roads_rejects_zero() {
        let mut cfg = EngineConfig::default();
        assert!(cfg.set_roads(0).is_err());
        assert!(cfg.set_roads(5).is_ok());
        assert_eq!(cfg.roads, 5);
    }

    #[test]
    fn set_interval_rejects_negative() {
        let mut cfg = EngineConfig::default();
        assert!(cfg.set_interval(-1.0).is_err());
        assert!(cfg.set_interval(2.5).is_ok());
    }
}
