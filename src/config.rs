// src/config.rs - the configuration surface (spec §6), flat key/value grouped by section
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("lane group '{group}' references malformed member token '{token}' (expected FEEDER-BAY)")]
    BadMemberToken { group: String, token: String },
}

fn default_bay_count() -> u8 {
    4
}
fn default_hes_polarity() -> [bool; 4] {
    [true; 4]
}
fn default_load_retry_max() -> u32 {
    3
}
fn default_unload_retry_max() -> u32 {
    2
}
fn default_backoff_base() -> f64 {
    1.0
}
fn default_backoff_max() -> f64 {
    5.0
}
fn default_true() -> bool {
    true
}
fn default_min_progress_ticks() -> i64 {
    4
}
fn default_op_timeout() -> f64 {
    60.0
}
fn default_load_pressure_grace() -> f64 {
    2.0
}
fn default_ticks_per_mm() -> f64 {
    40.0
}
fn default_clog_alpha() -> f64 {
    0.5
}
fn default_runout_pause_distance() -> f64 {
    5.0
}
fn default_bowden_clear_grace() -> f64 {
    0.2
}
fn default_coast_distance() -> f64 {
    15.0
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FeederConfig {
    #[serde(default = "default_bay_count")]
    pub bay_count: u8,
    pub pressure_upper: f32,
    pub pressure_lower: f32,
    /// Raw telemetry bit that means "present" for each bay's filament
    /// sensor; lets a feeder whose hall-effect sensors are wired
    /// active-low still report `filament_present = true` meaningfully.
    #[serde(default = "default_hes_polarity")]
    pub f1s_hes_on: [bool; 4],
    #[serde(default = "default_hes_polarity")]
    pub hub_hes_on: [bool; 4],
    #[serde(default = "default_load_retry_max")]
    pub load_retry_max: u32,
    #[serde(default = "default_unload_retry_max")]
    pub unload_retry_max: u32,
    #[serde(default = "default_backoff_base")]
    pub retry_backoff_base: f64,
    #[serde(default = "default_backoff_max")]
    pub retry_backoff_max: f64,
    #[serde(default = "default_true")]
    pub auto_unload_on_failed_load: bool,
    /// Minimum accumulated |Δenc| ticks within a `stuck_threshold` window
    /// for an attempt to count as making progress (spec §4.2).
    #[serde(default = "default_min_progress_ticks")]
    pub min_progress_ticks: i64,
    /// Hard cap on a single load/unload operation regardless of retries
    /// remaining (spec §5).
    #[serde(default = "default_op_timeout")]
    pub load_timeout_s: f64,
    #[serde(default = "default_op_timeout")]
    pub unload_timeout_s: f64,
    /// Grace window after `hub_present` flips true for pressure to cross
    /// `pressure_upper` before the load attempt is treated as failed
    /// (spec §4.2's success criterion; see DESIGN.md).
    #[serde(default = "default_load_pressure_grace")]
    pub load_pressure_grace_s: f64,
    /// Calibrated encoder ticks per mm of filament travel for this
    /// feeder, used by the clog detector (spec §4.6).
    #[serde(default = "default_ticks_per_mm")]
    pub ticks_per_mm: f64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PressureSensorConfig {
    pub pin: String,
    pub extruder: String,
    pub feeders: Vec<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LaneGroupConfig {
    /// Ordered "feeder-bay" tokens, e.g. `["A-1", "A-2"]`.
    pub members: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ClogSensitivity {
    Low,
    Medium,
    High,
}

impl Default for ClogSensitivity {
    fn default() -> Self {
        ClogSensitivity::Medium
    }
}

impl ClogSensitivity {
    pub fn window_mm(self) -> f64 {
        match self {
            ClogSensitivity::Low => 48.0,
            ClogSensitivity::Medium => 24.0,
            ClogSensitivity::High => 12.0,
        }
    }
}

fn default_clog_sensitivity() -> ClogSensitivity {
    ClogSensitivity::Medium
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ManagerConfig {
    /// Extruder travel past the runout trigger (and bowden-clear) before a
    /// reload is committed - spec's "coast distance", aliased in the
    /// config surface to the more descriptive `reload_before_toolhead_distance`.
    #[serde(default = "default_coast_distance")]
    pub reload_before_toolhead_distance: f64,
    #[serde(default = "default_clog_sensitivity")]
    pub clog_sensitivity: ClogSensitivity,
    #[serde(default = "default_clog_alpha")]
    pub clog_alpha: f64,
    /// Extruder travel past the runout trigger before the follower is
    /// stopped and a tentative replacement lane is picked (spec §3's
    /// `pause_distance`; not named in the distilled §6 table - filled in
    /// here, see DESIGN.md). Distinct from, and smaller than,
    /// `reload_before_toolhead_distance`.
    #[serde(default = "default_runout_pause_distance")]
    pub runout_pause_distance: f64,
    /// How long pressure must stay below `pressure_lower` before the
    /// bowden is considered clear (spec §9 open question, resolved as
    /// AND of timed grace and pressure threshold).
    #[serde(default = "default_bowden_clear_grace")]
    pub bowden_clear_grace_s: f64,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            reload_before_toolhead_distance: default_coast_distance(),
            clog_sensitivity: ClogSensitivity::Medium,
            clog_alpha: default_clog_alpha(),
            runout_pause_distance: default_runout_pause_distance(),
            bowden_clear_grace_s: default_bowden_clear_grace(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub feeder: HashMap<String, FeederConfig>,
    #[serde(default)]
    pub pressure_sensor: HashMap<String, PressureSensorConfig>,
    #[serde(default)]
    pub lane_group: HashMap<String, LaneGroupConfig>,
    #[serde(default)]
    pub manager: ManagerConfig,
}

/// Parse a `"FEEDER-BAY"` lane-group member token, e.g. `"A-1"` -> `("A", 1)`.
pub fn parse_member_token(group: &str, token: &str) -> Result<(String, u8), ConfigError> {
    let (feeder, bay) = token.rsplit_once('-').ok_or_else(|| ConfigError::BadMemberToken {
        group: group.to_string(),
        token: token.to_string(),
    })?;
    let bay: u8 = bay.parse().map_err(|_| ConfigError::BadMemberToken {
        group: group.to_string(),
        token: token.to_string(),
    })?;
    Ok((feeder.to_string(), bay))
}

pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
        path: path.to_string(),
        source: e,
    })?;
    let config: Config = toml::from_str(&contents)?;
    Ok(config)
}
