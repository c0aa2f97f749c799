//! Coordinator for several controllers sharing one bus.
//!
//! [`MultiDriver::run_once`] is one tick: while any controller is unconfigured it
//! pushes every driver up the configuration ladder, and once all are configured it
//! polls for power resets and assembles feedback and status snapshots.

use crate::config::PumaConfig;
use crate::driver::Driver;
use crate::ladder::ConfigurationState;
use crate::metrics::DriverMetrics;
use crate::mode::ControlMode;
use can_transport::{CanBus, TransportError, TxQueue};
use serde::Serialize;
use tracing::{debug, info, warn};

/// Motion feedback for one controller.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Feedback {
    pub device_number: u8,
    pub device_name: String,
    pub duty_cycle: f32,
    pub current: f32,
    /// Output shaft position in rad.
    pub travel: f64,
    /// Output shaft speed in rad/s.
    pub speed: f64,
    pub setpoint: f64,
}

/// Electrical status for one controller.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Status {
    pub device_number: u8,
    pub device_name: String,
    pub bus_voltage: f32,
    pub output_voltage: f32,
    pub analog_input: f32,
    pub temperature: f32,
    pub mode: u8,
    pub fault: u8,
}

/// Outcome of one [`MultiDriver::run_once`] tick.
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunReport {
    pub tick: u64,
    pub active: bool,
    /// Set on the tick where the last controller finished configuring.
    pub became_active: bool,
    /// Devices whose power flag was found set while running.
    pub power_resets: Vec<u8>,
    pub frames_sent: usize,
    pub frames_received: usize,
    /// Ladder state of every driver, in configuration order.
    pub states: Vec<ConfigurationState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub feedback: Option<Vec<Feedback>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<Vec<Status>>,
}

#[derive(Debug)]
pub struct MultiDriver {
    drivers: Vec<Driver>,
    queue: TxQueue,
    mode: ControlMode,
    active: bool,
    tick: u64,
    stall_warn_ticks: Option<u32>,
    metrics: Option<DriverMetrics>,
}

impl MultiDriver {
    /// One driver per configured joint, all enqueueing into `queue`.
    pub fn new(cfg: &PumaConfig, queue: TxQueue) -> Self {
        let drivers = cfg
            .joints
            .iter()
            .map(|joint| {
                let mut d = Driver::new(queue.clone(), joint.can_id, joint.name.as_str());
                d.clear_msg_cache();
                d.set_encoder_cpr(cfg.encoder_cpr);
                d.set_gear_ratio(cfg.gear_ratio * f64::from(joint.direction));
                d.set_mode_with_gains(cfg.mode, cfg.gains());
                d
            })
            .collect();
        info!(
            canbus = %cfg.canbus_dev,
            gear_ratio = cfg.gear_ratio,
            encoder_cpr = cfg.encoder_cpr,
            frequency = cfg.frequency,
            p = cfg.gain.p,
            i = cfg.gain.i,
            d = cfg.gain.d,
            joints = cfg.joints.len(),
            "puma coordinator created"
        );
        Self {
            drivers,
            queue,
            mode: cfg.mode,
            active: false,
            tick: 0,
            stall_warn_ticks: cfg.stall_warn_ticks,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: DriverMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn mode(&self) -> ControlMode {
        self.mode
    }

    pub fn queue(&self) -> &TxQueue {
        &self.queue
    }

    pub fn drivers(&self) -> &[Driver] {
        &self.drivers
    }

    pub fn driver(&self, name: &str) -> Option<&Driver> {
        self.drivers.iter().find(|d| d.device_name() == name)
    }

    pub fn driver_mut(&mut self, name: &str) -> Option<&mut Driver> {
        self.drivers.iter_mut().find(|d| d.device_name() == name)
    }

    pub fn all_configured(&self) -> bool {
        self.drivers.iter().all(Driver::is_configured)
    }

    /// Run one coordinator tick against `bus`.
    ///
    /// A failed flush leaves the unsent frames queued for the next tick; only receive
    /// errors other than an empty bus are returned.
    pub fn run_once<B: CanBus + ?Sized>(
        &mut self,
        bus: &mut B,
    ) -> Result<RunReport, TransportError> {
        self.tick += 1;
        let mut report = RunReport {
            tick: self.tick,
            ..RunReport::default()
        };

        if self.active {
            report.power_resets = self.check_power();
            for d in &self.drivers {
                d.request_status_messages();
                d.request_feedback_setpoint();
            }
        } else {
            for d in &mut self.drivers {
                d.configure_params();
            }
        }

        report.frames_sent += self.flush(bus);
        while let Some(frame) = bus.try_recv()? {
            report.frames_received += 1;
            for d in &mut self.drivers {
                d.process_message(&frame);
            }
        }

        if !self.active {
            for d in &mut self.drivers {
                d.verify_params();
            }
            self.warn_stalled();
        }
        report.frames_sent += self.flush(bus);

        if !self.active && self.all_configured() {
            self.active = true;
            report.became_active = true;
            info!(drivers = self.drivers.len(), "all controllers active");
        }
        if self.active {
            report.feedback = self.feedback();
            report.status = self.status();
        }
        report.active = self.active;
        report.states = self.drivers.iter().map(Driver::state).collect();
        self.record(&report);
        Ok(report)
    }

    fn flush<B: CanBus + ?Sized>(&self, bus: &mut B) -> usize {
        match self.queue.flush(bus) {
            Ok(n) => n,
            Err(TransportError::Flush { sent, .. }) => sent,
            Err(e) => {
                warn!(error = %e, "tx flush failed");
                0
            }
        }
    }

    /// Read every power flag; any set flag sends all drivers back to the start.
    fn check_power(&mut self) -> Vec<u8> {
        let reset: Vec<u8> = self
            .drivers
            .iter_mut()
            .filter_map(|d| (d.last_power() != 0).then(|| d.device_number()))
            .collect();
        if reset.is_empty() {
            return reset;
        }
        for number in &reset {
            warn!(number, "power reset detected, reconfiguring all drivers");
        }
        self.active = false;
        for d in &mut self.drivers {
            d.reset_configuration();
        }
        reset
    }

    fn warn_stalled(&self) {
        let Some(limit) = self.stall_warn_ticks else {
            return;
        };
        for d in &self.drivers {
            if limit > 0 && d.attempts() == limit {
                warn!(
                    device = %d.device_name(),
                    number = d.device_number(),
                    state = %d.state(),
                    attempts = limit,
                    "configuration step is not progressing"
                );
            }
        }
    }

    fn record(&self, report: &RunReport) {
        let Some(m) = &self.metrics else {
            return;
        };
        m.tx_frames.inc_by(report.frames_sent as u64);
        m.rx_frames.inc_by(report.frames_received as u64);
        m.power_resets.inc_by(report.power_resets.len() as u64);
        let configured = self.drivers.iter().filter(|d| d.is_configured()).count();
        m.configured_drivers.set(configured as i64);
    }

    /// Consume one feedback sample per driver, once every driver has fresh values for
    /// all five feedback fields.
    pub fn feedback(&mut self) -> Option<Vec<Feedback>> {
        let missing = self.drivers.iter().find(|d| {
            !(d.received_duty_cycle()
                && d.received_current()
                && d.received_position()
                && d.received_speed()
                && d.received_setpoint())
        });
        if let Some(d) = missing {
            debug!(device = %d.device_name(), number = d.device_number(), "feedback incomplete");
            return None;
        }
        let feedback = self
            .drivers
            .iter_mut()
            .map(|d| Feedback {
                device_number: d.device_number(),
                device_name: d.device_name().to_string(),
                duty_cycle: d.last_duty_cycle(),
                current: d.last_current(),
                travel: d.last_position(),
                speed: d.last_speed(),
                setpoint: d.last_setpoint(),
            })
            .collect();
        Some(feedback)
    }

    /// Consume one status sample per driver. The analog input is reported but not
    /// waited for.
    pub fn status(&mut self) -> Option<Vec<Status>> {
        let mut complete = true;
        for d in &self.drivers {
            let fields = [
                d.received_bus_voltage(),
                d.received_out_voltage(),
                d.received_temperature(),
                d.received_mode(),
                d.received_fault(),
            ];
            if !fields.iter().all(|&f| f) {
                debug!(device = %d.device_name(), number = d.device_number(), ?fields, "status incomplete");
                complete = false;
            }
        }
        if !complete {
            return None;
        }
        let status = self
            .drivers
            .iter_mut()
            .map(|d| Status {
                device_number: d.device_number(),
                device_name: d.device_name().to_string(),
                bus_voltage: d.last_bus_voltage(),
                output_voltage: d.last_out_voltage(),
                analog_input: d.last_analog_input(),
                temperature: d.last_temperature(),
                mode: d.last_mode(),
                fault: d.last_fault(),
            })
            .collect();
        Some(status)
    }

    /// Send one command per named joint. Ignored until every controller is
    /// configured; only voltage and speed modes take commands. Returns how many
    /// controllers were commanded.
    pub fn command<S: AsRef<str>>(&self, names: &[S], values: &[f64]) -> usize {
        if !self.active {
            return 0;
        }
        let mut sent = 0;
        for d in &self.drivers {
            for (name, &value) in names.iter().zip(values) {
                if d.device_name() != name.as_ref() {
                    continue;
                }
                match self.mode {
                    ControlMode::Voltage => d.command_duty_cycle(value as f32),
                    ControlMode::Speed => d.command_speed(value),
                    ControlMode::Current | ControlMode::Position => continue,
                }
                sent += 1;
            }
        }
        sent
    }
}
