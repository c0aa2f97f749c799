//! YAML configuration for a set of controllers sharing one bus.

use crate::error::{ConfigError, Result};
use crate::mode::{ControlMode, Gains};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PumaConfig {
    #[serde(default = "default_canbus_dev")]
    pub canbus_dev: String,
    #[serde(default = "default_encoder_cpr")]
    pub encoder_cpr: u16,
    /// Coordinator tick rate in Hz.
    #[serde(default = "default_frequency")]
    pub frequency: f64,
    #[serde(default)]
    pub gain: GainConfig,
    #[serde(default = "default_gear_ratio")]
    pub gear_ratio: f64,
    #[serde(default = "default_mode")]
    pub mode: ControlMode,
    #[serde(default)]
    pub joints: Vec<JointConfig>,
    /// Warn once a ladder step has failed this many checks in a row. Off when unset.
    #[serde(default)]
    pub stall_warn_ticks: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JointConfig {
    pub name: String,
    pub can_id: u8,
    #[serde(default = "default_direction")]
    pub direction: i8,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GainConfig {
    #[serde(default = "default_gain_p")]
    pub p: f64,
    #[serde(default = "default_gain_i")]
    pub i: f64,
    #[serde(default)]
    pub d: f64,
}

fn default_canbus_dev() -> String {
    "vcan0".to_string()
}

fn default_encoder_cpr() -> u16 {
    1024
}

fn default_frequency() -> f64 {
    25.0
}

fn default_gear_ratio() -> f64 {
    24.0
}

fn default_mode() -> ControlMode {
    ControlMode::Speed
}

fn default_direction() -> i8 {
    1
}

fn default_gain_p() -> f64 {
    0.1
}

fn default_gain_i() -> f64 {
    0.01
}

impl Default for GainConfig {
    fn default() -> Self {
        Self {
            p: default_gain_p(),
            i: default_gain_i(),
            d: 0.0,
        }
    }
}

impl From<GainConfig> for Gains {
    fn from(g: GainConfig) -> Self {
        Gains::new(g.p, g.i, g.d)
    }
}

impl PumaConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&raw)
    }

    /// Parse and validate.
    pub fn from_yaml(raw: &str) -> Result<Self> {
        let cfg: PumaConfig = serde_yaml::from_str(raw)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn gains(&self) -> Gains {
        self.gain.into()
    }

    /// Coordinator tick period derived from `frequency`.
    pub fn period(&self) -> Duration {
        Duration::try_from_secs_f64(self.frequency.recip()).unwrap_or(Duration::ZERO)
    }

    pub fn validate(&self) -> Result<()> {
        if self.joints.is_empty() {
            return Err(invalid("no joints configured"));
        }
        if !(self.frequency.is_finite() && self.frequency > 0.0) {
            return Err(invalid(format!("frequency must be positive, got {}", self.frequency)));
        }
        if !(self.gear_ratio.is_finite() && self.gear_ratio > 0.0) {
            return Err(invalid(format!("gear_ratio must be positive, got {}", self.gear_ratio)));
        }
        if self.encoder_cpr == 0 {
            return Err(invalid("encoder_cpr must be positive"));
        }
        let mut names = HashSet::new();
        let mut ids = HashSet::new();
        for joint in &self.joints {
            if !names.insert(joint.name.as_str()) {
                return Err(invalid(format!("duplicate joint name {}", joint.name)));
            }
            if !(1..=crate::api::MAX_DEVICE_NUMBER).contains(&joint.can_id) {
                return Err(invalid(format!(
                    "joint {}: can_id {} outside 1..=63",
                    joint.name, joint.can_id
                )));
            }
            if !ids.insert(joint.can_id) {
                return Err(invalid(format!("duplicate can_id {}", joint.can_id)));
            }
            if joint.direction != 1 && joint.direction != -1 {
                return Err(invalid(format!(
                    "joint {}: direction must be 1 or -1, got {}",
                    joint.name, joint.direction
                )));
            }
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> ConfigError {
    ConfigError::Invalid(msg.into())
}
