//! Configuration ladder.
//!
//! Two caller-paced steps drive a controller from power-up to a verified mode:
//! [`Driver::configure_params`] emits the command for the current state and
//! [`Driver::verify_params`] checks cached telemetry, advancing on a match or
//! requesting fresh telemetry otherwise. Neither step keeps time or limits retries;
//! [`Driver::attempts`] only reports how many checks the current state has failed.

use crate::api::{self, reference};
use crate::driver::Driver;
use crate::fixed::Fixed16x16;
use crate::mode::{ControlMode, GainTerm, Gains};
use serde::Serialize;
use std::fmt;
use tracing::{error, info, warn};

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigurationState {
    Initializing,
    PowerFlag,
    EncoderPosRef,
    EncoderSpdRef,
    EncoderCounts,
    ClosedLoop,
    ControlMode,
    PGain,
    IGain,
    DGain,
    VerifiedParameters,
    Configured,
}

impl ConfigurationState {
    /// Successor for a closed-loop mode; voltage mode leaves `ControlMode` for
    /// `VerifiedParameters` instead (see [`ConfigurationState::next_for`]).
    pub const fn next(self) -> Self {
        use ConfigurationState::*;
        match self {
            Initializing => PowerFlag,
            PowerFlag => EncoderPosRef,
            EncoderPosRef => EncoderSpdRef,
            EncoderSpdRef => EncoderCounts,
            EncoderCounts => ClosedLoop,
            ClosedLoop => ControlMode,
            ControlMode => PGain,
            PGain => IGain,
            IGain => DGain,
            DGain => VerifiedParameters,
            VerifiedParameters | Configured => Configured,
        }
    }

    pub const fn next_for(self, mode: crate::ControlMode) -> Self {
        match (self, mode) {
            (ConfigurationState::ControlMode, crate::ControlMode::Voltage) => {
                ConfigurationState::VerifiedParameters
            }
            _ => self.next(),
        }
    }

    const fn gain_term(self) -> Option<GainTerm> {
        match self {
            ConfigurationState::PGain => Some(GainTerm::P),
            ConfigurationState::IGain => Some(GainTerm::I),
            ConfigurationState::DGain => Some(GainTerm::D),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigurationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

impl Driver {
    pub fn state(&self) -> ConfigurationState {
        self.state
    }

    pub fn is_configured(&self) -> bool {
        self.configured
    }

    /// Failed checks since the ladder last moved.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Check cached telemetry against the current step.
    ///
    /// Returns the state the check advanced into, or `None` if the step is still
    /// pending (a read request for the relevant telemetry has been queued). Reaching
    /// `VerifiedParameters` marks the driver configured and moves on to `Configured`
    /// within the same call.
    pub fn verify_params(&mut self) -> Option<ConfigurationState> {
        let entered = match self.state {
            ConfigurationState::Initializing => {
                info!(device = %self.device_name, number = self.device_number, "starting to verify parameters");
                Some(self.advance())
            }
            ConfigurationState::PowerFlag => {
                if self.last_power() == 0 {
                    info!(device = %self.device_name, number = self.device_number, "cleared power flag");
                    Some(self.advance())
                } else {
                    self.send_id(api::STATUS_POWER);
                    None
                }
            }
            ConfigurationState::EncoderPosRef => {
                if self.pos_encoder_ref() == reference::ENCODER {
                    info!(device = %self.device_name, number = self.device_number, "set position encoder reference");
                    Some(self.advance())
                } else {
                    self.send_id(api::POS_REF);
                    None
                }
            }
            ConfigurationState::EncoderSpdRef => {
                if self.spd_encoder_ref() == reference::QUAD_ENCODER {
                    info!(device = %self.device_name, number = self.device_number, "set speed encoder reference");
                    Some(self.advance())
                } else {
                    self.send_id(api::SPD_REF);
                    None
                }
            }
            ConfigurationState::EncoderCounts => {
                if self.encoder_counts() == self.encoder_cpr {
                    info!(
                        device = %self.device_name,
                        number = self.device_number,
                        cpr = self.encoder_cpr,
                        "set encoder counts"
                    );
                    Some(self.advance())
                } else {
                    self.send_id(api::CFG_ENC_LINES);
                    None
                }
            }
            // Encoder data is only recorded once the controller has run a closed loop.
            ConfigurationState::ClosedLoop => {
                if self.last_mode() == ControlMode::Speed.raw() {
                    info!(device = %self.device_name, number = self.device_number, "entered a closed-loop control mode");
                    Some(self.advance())
                } else {
                    self.send_id(api::STATUS_CMODE);
                    None
                }
            }
            ConfigurationState::ControlMode => {
                if self.last_mode() == self.control_mode.raw() {
                    info!(
                        device = %self.device_name,
                        number = self.device_number,
                        mode = %self.control_mode,
                        "control mode set"
                    );
                    Some(self.advance())
                } else {
                    self.send_id(api::STATUS_CMODE);
                    None
                }
            }
            ConfigurationState::PGain | ConfigurationState::IGain | ConfigurationState::DGain => {
                self.verify_gain()
            }
            ConfigurationState::VerifiedParameters | ConfigurationState::Configured => None,
        };

        if entered.is_none() && self.state != ConfigurationState::Configured {
            self.attempts = self.attempts.saturating_add(1);
        }
        if self.state == ConfigurationState::VerifiedParameters {
            info!(device = %self.device_name, number = self.device_number, "all parameters verified");
            self.configured = true;
            self.state = ConfigurationState::Configured;
        }
        entered
    }

    fn advance(&mut self) -> ConfigurationState {
        self.state = self.state.next_for(self.control_mode);
        self.attempts = 0;
        self.state
    }

    fn verify_gain(&mut self) -> Option<ConfigurationState> {
        let term = self.state.gain_term()?;
        let Some(api) = self.control_mode.gain_api(term) else {
            // Voltage mode never enters the gain steps; skip ahead if it somehow did.
            self.state = ConfigurationState::VerifiedParameters;
            return Some(self.state);
        };
        let requested = self.gains.get(term);
        let reported = self.cache.peek(api);
        let actual = reported.fixed16x16().to_f64();
        if Fixed16x16::matches(reported.data(), requested) {
            info!(
                device = %self.device_name,
                number = self.device_number,
                gain = ?term,
                actual,
                requested,
                "gain constant verified"
            );
            Some(self.advance())
        } else {
            warn!(
                device = %self.device_name,
                number = self.device_number,
                gain = ?term,
                actual,
                requested,
                "gain constant mismatch"
            );
            self.send_id(api);
            None
        }
    }

    /// Emit the command that sets the value checked by the current step.
    pub fn configure_params(&mut self) {
        match self.state {
            ConfigurationState::PowerFlag => self.send_u8(api::STATUS_POWER, 1),
            ConfigurationState::EncoderPosRef => self.send_u8(api::POS_REF, reference::ENCODER),
            ConfigurationState::EncoderSpdRef => {
                self.send_u8(api::SPD_REF, reference::QUAD_ENCODER)
            }
            ConfigurationState::EncoderCounts => {
                self.send_u16(api::CFG_ENC_LINES, self.encoder_cpr)
            }
            ConfigurationState::ClosedLoop => self.send_id(api::SPD_EN),
            ConfigurationState::ControlMode => self.send_id(self.control_mode.enable_api()),
            ConfigurationState::PGain | ConfigurationState::IGain | ConfigurationState::DGain => {
                let Some(term) = self.state.gain_term() else {
                    return;
                };
                if let Some(api) = self.control_mode.gain_api(term) {
                    self.send_fixed16x16(api, self.gains.get(term));
                }
            }
            ConfigurationState::Initializing
            | ConfigurationState::VerifiedParameters
            | ConfigurationState::Configured => {}
        }
    }

    /// Store new gains; a configured driver re-verifies from `PGain`.
    pub fn set_gains(&mut self, gains: Gains) {
        self.gains = gains;
        if self.configured {
            self.update_gains();
        }
    }

    /// Select a mode that needs no gains. Closed-loop modes are refused here and must
    /// go through [`Driver::set_mode_with_gains`].
    pub fn set_mode(&mut self, mode: ControlMode) {
        if mode.is_closed_loop() {
            error!(
                device = %self.device_name,
                number = self.device_number,
                %mode,
                "closed-loop modes need PID gains"
            );
            return;
        }
        self.control_mode = mode;
        info!(device = %self.device_name, number = self.device_number, "mode set to voltage control");
        if self.configured {
            self.reset_configuration();
        }
    }

    pub fn set_mode_with_gains(&mut self, mode: ControlMode, gains: Gains) {
        self.control_mode = mode;
        if self.configured {
            self.reset_configuration();
        }
        if !mode.is_closed_loop() {
            warn!(
                device = %self.device_name,
                number = self.device_number,
                "mode set to voltage control, PID gains are not needed"
            );
            return;
        }
        self.set_gains(gains);
        info!(
            device = %self.device_name,
            number = self.device_number,
            %mode,
            p = gains.p,
            i = gains.i,
            d = gains.d,
            "mode set to closed-loop control"
        );
    }

    /// Re-run the whole ladder, e.g. after the controller lost power.
    pub fn reset_configuration(&mut self) {
        self.configured = false;
        self.state = ConfigurationState::Initializing;
        self.attempts = 0;
    }

    fn update_gains(&mut self) {
        self.configured = false;
        self.state = ConfigurationState::PGain;
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::ApiCode;
    use can_transport::{CanFrame, TxQueue};

    const DEV: u8 = 3;

    fn driver() -> (Driver, TxQueue) {
        let q = TxQueue::new();
        (Driver::new(q.clone(), DEV, "rear_left"), q)
    }

    fn feed(d: &mut Driver, api: ApiCode, data: &[u8]) {
        let frame = CanFrame::new(api.to_id(DEV), data);
        assert_eq!(frame.map(|f| d.process_message(&f)), Some(true));
    }

    fn configured_speed_driver() -> (Driver, TxQueue) {
        let (mut d, q) = driver();
        d.set_encoder_cpr(1024);
        d.set_mode_with_gains(ControlMode::Speed, Gains::new(0.1, 0.01, 0.0));
        d.verify_params();
        feed(&mut d, api::SPD_REF, &[reference::QUAD_ENCODER]);
        feed(&mut d, api::CFG_ENC_LINES, &1024u16.to_le_bytes());
        feed(&mut d, api::SPD_PC, &Fixed16x16::from_f64(0.1).to_le_bytes());
        feed(&mut d, api::SPD_IC, &Fixed16x16::from_f64(0.01).to_le_bytes());
        feed(&mut d, api::SPD_DC, &Fixed16x16::from_f64(0.0).to_le_bytes());
        for _ in 0..3 {
            feed(&mut d, api::STATUS_POWER, &[0]);
            feed(&mut d, api::STATUS_CMODE, &[ControlMode::Speed.raw()]);
            d.verify_params();
            d.verify_params();
            d.verify_params();
            d.verify_params();
        }
        assert!(d.is_configured());
        q.drain();
        (d, q)
    }

    #[test]
    fn test_successor_order() {
        use ConfigurationState::*;
        let mut s = Initializing;
        let mut seen = vec![s];
        while s != Configured {
            s = s.next_for(crate::ControlMode::Speed);
            seen.push(s);
        }
        assert_eq!(
            seen,
            vec![
                Initializing,
                PowerFlag,
                EncoderPosRef,
                EncoderSpdRef,
                EncoderCounts,
                ClosedLoop,
                ControlMode,
                PGain,
                IGain,
                DGain,
                VerifiedParameters,
                Configured
            ]
        );
        assert_eq!(ControlMode.next_for(crate::ControlMode::Voltage), VerifiedParameters);
    }

    #[test]
    fn test_pending_step_requests_telemetry() {
        let (mut d, q) = driver();
        d.state = ConfigurationState::EncoderSpdRef;
        assert_eq!(d.verify_params(), None);
        assert_eq!(d.verify_params(), None);
        assert_eq!(d.attempts(), 2);
        let sent = q.drain();
        assert_eq!(sent.len(), 2);
        assert!(sent.iter().all(|f| f.id == api::SPD_REF.to_id(DEV) && f.is_empty()));
    }

    #[test]
    fn test_power_flag_check_consumes() {
        let (mut d, q) = driver();
        d.state = ConfigurationState::PowerFlag;
        feed(&mut d, api::STATUS_POWER, &[1]);
        assert_eq!(d.verify_params(), None);
        assert!(!d.received_power());
        assert_eq!(q.drain()[0].id, api::STATUS_POWER.to_id(DEV));
        feed(&mut d, api::STATUS_POWER, &[0]);
        assert_eq!(d.verify_params(), Some(ConfigurationState::EncoderPosRef));
        assert_eq!(d.attempts(), 0);
    }

    #[test]
    fn test_configure_emits_step_command() {
        let (mut d, q) = driver();
        d.set_encoder_cpr(1024);
        d.set_mode_with_gains(ControlMode::Position, Gains::new(2.0, 0.5, 0.25));
        let cases: [(ConfigurationState, ApiCode, &[u8]); 8] = [
            (ConfigurationState::PowerFlag, api::STATUS_POWER, &[1]),
            (ConfigurationState::EncoderPosRef, api::POS_REF, &[reference::ENCODER]),
            (ConfigurationState::EncoderSpdRef, api::SPD_REF, &[reference::QUAD_ENCODER]),
            (ConfigurationState::EncoderCounts, api::CFG_ENC_LINES, &[0x00, 0x04]),
            (ConfigurationState::ClosedLoop, api::SPD_EN, &[]),
            (ConfigurationState::ControlMode, api::POS_EN, &[]),
            (ConfigurationState::PGain, api::POS_PC, &[0x00, 0x00, 0x02, 0x00]),
            (ConfigurationState::DGain, api::POS_DC, &[0x00, 0x40, 0x00, 0x00]),
        ];
        for (state, api, payload) in cases {
            d.state = state;
            d.configure_params();
            let sent = q.drain();
            assert_eq!(sent.len(), 1, "{state}");
            assert_eq!(sent[0].id, api.to_id(DEV), "{state}");
            assert_eq!(sent[0].payload(), payload, "{state}");
        }
        for state in [
            ConfigurationState::Initializing,
            ConfigurationState::VerifiedParameters,
            ConfigurationState::Configured,
        ] {
            d.state = state;
            d.configure_params();
            assert!(q.is_empty(), "{state}");
        }
    }

    #[test]
    fn test_gain_mismatch_requests_mode_register() {
        let (mut d, q) = driver();
        d.set_mode_with_gains(ControlMode::Current, Gains::new(0.5, 0.0, 0.0));
        d.state = ConfigurationState::PGain;
        feed(&mut d, api::ICTRL_PC, &Fixed16x16::from_f64(0.25).to_le_bytes());
        assert_eq!(d.verify_params(), None);
        assert_eq!(q.drain()[0].id, api::ICTRL_PC.to_id(DEV));
        feed(&mut d, api::ICTRL_PC, &Fixed16x16::from_f64(0.5).to_le_bytes());
        assert_eq!(d.verify_params(), Some(ConfigurationState::IGain));
    }

    #[test]
    fn test_verified_parameters_is_terminal_in_same_step() {
        let (mut d, _q) = driver();
        d.set_mode_with_gains(ControlMode::Speed, Gains::new(0.0, 0.0, 0.0));
        d.state = ConfigurationState::DGain;
        assert_eq!(d.verify_params(), Some(ConfigurationState::VerifiedParameters));
        assert_eq!(d.state(), ConfigurationState::Configured);
        assert!(d.is_configured());
        assert_eq!(d.verify_params(), None);
        assert_eq!(d.attempts(), 0);
    }

    #[test]
    fn test_set_gains_on_configured_driver_reverifies_gains_only() {
        let (mut d, _q) = configured_speed_driver();
        d.set_gains(Gains::new(0.2, 0.01, 0.0));
        assert_eq!(d.state(), ConfigurationState::PGain);
        assert!(!d.is_configured());
    }

    #[test]
    fn test_set_gains_on_unconfigured_driver_only_stores() {
        let (mut d, _q) = driver();
        d.state = ConfigurationState::EncoderCounts;
        d.set_gains(Gains::new(0.2, 0.01, 0.0));
        assert_eq!(d.state(), ConfigurationState::EncoderCounts);
        assert_eq!(d.gains(), Gains::new(0.2, 0.01, 0.0));
    }

    #[test]
    fn test_set_mode_rejects_closed_loop_without_gains() {
        let (mut d, _q) = configured_speed_driver();
        d.set_mode(ControlMode::Current);
        assert_eq!(d.control_mode(), ControlMode::Speed);
        assert_eq!(d.state(), ConfigurationState::Configured);
        assert!(d.is_configured());
    }

    #[test]
    fn test_set_mode_voltage_restarts_configured_driver() {
        let (mut d, _q) = configured_speed_driver();
        d.set_mode(ControlMode::Voltage);
        assert_eq!(d.control_mode(), ControlMode::Voltage);
        assert_eq!(d.state(), ConfigurationState::Initializing);
        assert!(!d.is_configured());
    }

    #[test]
    fn test_set_mode_on_unconfigured_driver_keeps_state() {
        let (mut d, _q) = driver();
        d.state = ConfigurationState::EncoderCounts;
        d.set_mode(ControlMode::Voltage);
        assert_eq!(d.control_mode(), ControlMode::Voltage);
        assert_eq!(d.state(), ConfigurationState::EncoderCounts);
    }

    #[test]
    fn test_set_mode_with_gains_voltage_ignores_gains() {
        let (mut d, _q) = configured_speed_driver();
        let before = d.gains();
        d.set_mode_with_gains(ControlMode::Voltage, Gains::new(9.0, 9.0, 9.0));
        assert_eq!(d.gains(), before);
        assert_eq!(d.state(), ConfigurationState::Initializing);
    }

    #[test]
    fn test_set_mode_with_gains_closed_loop_restarts_from_scratch() {
        let (mut d, _q) = configured_speed_driver();
        d.set_mode_with_gains(ControlMode::Position, Gains::new(1.0, 0.0, 0.0));
        assert_eq!(d.state(), ConfigurationState::Initializing);
        assert_eq!(d.gains(), Gains::new(1.0, 0.0, 0.0));
        assert!(!d.is_configured());
    }
}
