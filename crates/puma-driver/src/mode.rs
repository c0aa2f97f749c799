use crate::api::{self, ApiCode};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Control mode selected by the application. Values match what the controller reports
/// in `STATUS_CMODE`.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlMode {
    Voltage,
    Current,
    Speed,
    Position,
}

impl ControlMode {
    pub const fn raw(self) -> u8 {
        match self {
            ControlMode::Voltage => 0,
            ControlMode::Current => 1,
            ControlMode::Speed => 2,
            ControlMode::Position => 3,
        }
    }

    /// `None` for voltage-compensation (4) and unknown values.
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(ControlMode::Voltage),
            1 => Some(ControlMode::Current),
            2 => Some(ControlMode::Speed),
            3 => Some(ControlMode::Position),
            _ => None,
        }
    }

    pub const fn is_closed_loop(self) -> bool {
        !matches!(self, ControlMode::Voltage)
    }

    /// Command that switches the controller into this mode.
    pub const fn enable_api(self) -> ApiCode {
        match self {
            ControlMode::Voltage => api::VOLT_EN,
            ControlMode::Current => api::ICTRL_EN,
            ControlMode::Speed => api::SPD_EN,
            ControlMode::Position => api::POS_EN,
        }
    }

    /// Setpoint register for this mode.
    pub const fn setpoint_api(self) -> ApiCode {
        match self {
            ControlMode::Voltage => api::VOLT_SET,
            ControlMode::Current => api::ICTRL_SET,
            ControlMode::Speed => api::SPD_SET,
            ControlMode::Position => api::POS_SET,
        }
    }

    /// Gain register for this mode. Voltage mode has no loop and so no gains.
    pub const fn gain_api(self, term: GainTerm) -> Option<ApiCode> {
        let codes = match self {
            ControlMode::Voltage => return None,
            ControlMode::Current => [api::ICTRL_PC, api::ICTRL_IC, api::ICTRL_DC],
            ControlMode::Speed => [api::SPD_PC, api::SPD_IC, api::SPD_DC],
            ControlMode::Position => [api::POS_PC, api::POS_IC, api::POS_DC],
        };
        Some(codes[term as usize])
    }
}

impl fmt::Display for ControlMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ControlMode::Voltage => "voltage",
            ControlMode::Current => "current",
            ControlMode::Speed => "speed",
            ControlMode::Position => "position",
        };
        f.write_str(s)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GainTerm {
    P = 0,
    I = 1,
    D = 2,
}

impl GainTerm {
    pub const ALL: [GainTerm; 3] = [GainTerm::P, GainTerm::I, GainTerm::D];
}

/// PID gains as sent to the controller in 16.16.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Gains {
    pub p: f64,
    pub i: f64,
    pub d: f64,
}

impl Gains {
    pub const fn new(p: f64, i: f64, d: f64) -> Self {
        Self { p, i, d }
    }

    pub const fn get(&self, term: GainTerm) -> f64 {
        match term {
            GainTerm::P => self.p,
            GainTerm::I => self.i,
            GainTerm::D => self.d,
        }
    }
}

impl Default for Gains {
    fn default() -> Self {
        Self::new(1.0, 0.0, 0.0)
    }
}
