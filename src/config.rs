use std::{fmt, fs, path::Path, path::PathBuf, str::FromStr};

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::error::GpioError;

pub const DEFAULT_SYSFS_ROOT: &str = "/sys/class/gpio";

#[derive(Debug, Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Direction {
    In,
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

impl FromStr for Direction {
    type Err = GpioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in" => Ok(Direction::In),
            "out" => Ok(Direction::Out),
            other => Err(GpioError::Configuration(format!(
                "invalid direction {other:?}, expected \"in\" or \"out\""
            ))),
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Default, Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Edge {
    None,
    #[default]
    Rising,
    Falling,
    Both,
}

impl Edge {
    pub fn as_str(&self) -> &'static str {
        match self {
            Edge::None => "none",
            Edge::Rising => "rising",
            Edge::Falling => "falling",
            Edge::Both => "both",
        }
    }
}

impl FromStr for Edge {
    type Err = GpioError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(Edge::None),
            "rising" => Ok(Edge::Rising),
            "falling" => Ok(Edge::Falling),
            "both" => Ok(Edge::Both),
            other => Err(GpioError::Configuration(format!(
                "invalid trigger edge {other:?}, expected one of rising, falling, both, none"
            ))),
        }
    }
}

impl fmt::Display for Edge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Hash, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum Level {
    Low,
    High,
}

impl Level {
    pub fn as_int(&self) -> u8 {
        match self {
            Level::Low => 0,
            Level::High => 1,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Level::Low => "low",
            Level::High => "high",
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
pub struct PinConfig {
    pub direction: Direction,
    #[serde(default)]
    pub edge: Edge,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    #[serde(default = "default_sysfs_root")]
    pub sysfs_root: PathBuf,
    #[serde(default = "default_max_pins")]
    pub max_pins: usize,
    #[serde(default = "default_max_burst")]
    pub max_burst: usize,
    #[serde(default)]
    pub wait_timeout_ms: Option<u64>,
    #[serde(default = "default_max_wait_failures")]
    pub max_wait_failures: u32,
    #[serde(default = "default_wait_retry_backoff_ms")]
    pub wait_retry_backoff_ms: u64,
    #[serde(default)]
    pub pins: FxHashMap<u32, PinConfig>,
}

fn default_sysfs_root() -> PathBuf {
    PathBuf::from(DEFAULT_SYSFS_ROOT)
}

fn default_max_pins() -> usize {
    64
}

fn default_max_burst() -> usize {
    32
}

fn default_max_wait_failures() -> u32 {
    8
}

fn default_wait_retry_backoff_ms() -> u64 {
    50
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            sysfs_root: default_sysfs_root(),
            max_pins: default_max_pins(),
            max_burst: default_max_burst(),
            wait_timeout_ms: None,
            max_wait_failures: default_max_wait_failures(),
            wait_retry_backoff_ms: default_wait_retry_backoff_ms(),
            pins: FxHashMap::default(),
        }
    }
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, GpioError> {
        let contents = fs::read_to_string(&path)
            .map_err(|e| GpioError::Configuration(format!("Failed to read config: {e}")))?;
        let config: AppConfig = serde_json::from_str(&contents)
            .map_err(|e| GpioError::Configuration(format!("Invalid config json: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), GpioError> {
        if self.max_burst == 0 {
            return Err(GpioError::Configuration(
                "max_burst must be greater than zero".into(),
            ));
        }
        if self.max_pins == 0 {
            return Err(GpioError::Configuration(
                "max_pins must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}
