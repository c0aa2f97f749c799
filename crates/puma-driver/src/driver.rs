use crate::api::{self, extract_api, extract_device, ApiCode};
use crate::cache::{Field, TelemetryCache};
use crate::ladder::ConfigurationState;
use crate::mode::{ControlMode, GainTerm, Gains};
use can_transport::{CanFrame, TxQueue};
use std::f64::consts::PI;

/// Driver for one controller on a shared bus.
///
/// Owns the controller's telemetry cache and configuration ladder. Every mutating
/// method takes `&mut self`; share across threads through [`crate::DriverHandle`].
/// Outbound frames go into the shared [`TxQueue`] and are never awaited.
///
/// `last_*` accessors decode whatever bytes the slot holds and clear its freshness
/// flag, whether or not a frame arrived since the previous read. Check the paired
/// `received_*` first when staleness matters.
#[derive(Debug)]
pub struct Driver {
    pub(crate) queue: TxQueue,
    pub(crate) device_number: u8,
    pub(crate) device_name: String,
    pub(crate) configured: bool,
    pub(crate) state: ConfigurationState,
    pub(crate) control_mode: ControlMode,
    pub(crate) gains: Gains,
    pub(crate) encoder_cpr: u16,
    pub(crate) gear_ratio: f64,
    pub(crate) cache: TelemetryCache,
    pub(crate) attempts: u32,
}

impl Driver {
    pub fn new(queue: TxQueue, device_number: u8, device_name: impl Into<String>) -> Self {
        Self {
            queue,
            device_number: device_number & api::MAX_DEVICE_NUMBER,
            device_name: device_name.into(),
            configured: false,
            state: ConfigurationState::Initializing,
            control_mode: ControlMode::Speed,
            gains: Gains::default(),
            encoder_cpr: 1,
            gear_ratio: 1.0,
            cache: TelemetryCache::new(),
            attempts: 0,
        }
    }

    pub fn device_number(&self) -> u8 {
        self.device_number
    }

    pub fn device_name(&self) -> &str {
        &self.device_name
    }

    pub fn control_mode(&self) -> ControlMode {
        self.control_mode
    }

    pub fn gains(&self) -> Gains {
        self.gains
    }

    pub fn encoder_cpr(&self) -> u16 {
        self.encoder_cpr
    }

    pub fn gear_ratio(&self) -> f64 {
        self.gear_ratio
    }

    pub fn cache(&self) -> &TelemetryCache {
        &self.cache
    }

    pub fn set_encoder_cpr(&mut self, encoder_cpr: u16) {
        self.encoder_cpr = encoder_cpr;
    }

    /// Signed: a negative ratio reverses the joint direction.
    pub fn set_gear_ratio(&mut self, gear_ratio: f64) {
        self.gear_ratio = gear_ratio;
    }

    /// Forget every cached payload and freshness flag.
    pub fn clear_msg_cache(&mut self) {
        self.cache.clear();
    }

    /// Cache an inbound frame if it is a data frame addressed to this controller.
    /// Returns whether a slot was written; foreign, empty and uncached frames are dropped.
    pub fn process_message(&mut self, frame: &CanFrame) -> bool {
        let id = frame.id.raw();
        if extract_device(id) != self.device_number {
            return false;
        }
        // No data: this is somebody's read request.
        if frame.is_empty() {
            return false;
        }
        self.cache.store(extract_api(id), frame.payload())
    }

    pub(crate) fn send_id(&self, api: ApiCode) {
        self.queue.enqueue(api::build_frame(api, self.device_number));
    }

    pub(crate) fn send_u8(&self, api: ApiCode, value: u8) {
        self.queue.enqueue(api::build_u8(api, self.device_number, value));
    }

    pub(crate) fn send_u16(&self, api: ApiCode, value: u16) {
        self.queue.enqueue(api::build_u16(api, self.device_number, value));
    }

    pub(crate) fn send_fixed8x8(&self, api: ApiCode, value: f32) {
        self.queue.enqueue(api::build_fixed8x8(api, self.device_number, value));
    }

    pub(crate) fn send_fixed16x16(&self, api: ApiCode, value: f64) {
        self.queue.enqueue(api::build_fixed16x16(api, self.device_number, value));
    }

    fn rad_per_sec_to_rpm(&self) -> f64 {
        (60.0 * self.gear_ratio) / (2.0 * PI)
    }

    fn rpm_to_rad_per_sec(&self, rpm: f64) -> f64 {
        rpm * ((2.0 * PI) / (self.gear_ratio * 60.0))
    }

    fn rev_to_rad(&self, rev: f64) -> f64 {
        rev * ((2.0 * PI) / self.gear_ratio)
    }

    // Commands

    pub fn command_duty_cycle(&self, cmd: f32) {
        self.send_fixed8x8(api::VOLT_SET, cmd);
    }

    /// Output shaft speed in rad/s, sent as motor RPM through the gearbox.
    pub fn command_speed(&self, cmd: f64) {
        self.send_fixed16x16(api::SPD_SET, cmd * self.rad_per_sec_to_rpm());
    }

    /// Output shaft position in rad, sent as motor revolutions.
    pub fn command_position(&self, cmd: f64) {
        self.send_fixed16x16(api::POS_SET, cmd * self.gear_ratio / (2.0 * PI));
    }

    /// Motor current in amps.
    pub fn command_current(&self, cmd: f32) {
        self.send_fixed8x8(api::ICTRL_SET, cmd);
    }

    // Requests

    pub fn request_status_messages(&self) {
        self.send_id(api::STATUS_POWER);
    }

    pub fn request_feedback_messages(&self) {
        self.send_id(api::STATUS_VOLTOUT);
        self.send_id(api::STATUS_CURRENT);
        self.send_id(api::STATUS_POS);
        self.send_id(api::STATUS_SPD);
        self.send_id(api::SPD_SET);
    }

    pub fn request_feedback_duty_cycle(&self) {
        self.send_id(api::STATUS_VOLTOUT);
    }

    pub fn request_feedback_current(&self) {
        self.send_id(api::STATUS_CURRENT);
    }

    pub fn request_feedback_position(&self) {
        self.send_id(api::STATUS_POS);
    }

    pub fn request_feedback_speed(&self) {
        self.send_id(api::STATUS_SPD);
    }

    pub fn request_feedback_power_state(&self) {
        self.send_id(api::STATUS_POWER);
    }

    pub fn request_feedback_setpoint(&self) {
        self.send_id(self.control_mode.setpoint_api());
    }

    // Freshness

    pub fn received_duty_cycle(&self) -> bool {
        self.cache.is_received(api::STATUS_VOLTOUT)
    }

    pub fn received_bus_voltage(&self) -> bool {
        self.cache.is_received(api::STATUS_VOLTBUS)
    }

    pub fn received_current(&self) -> bool {
        self.cache.is_received(api::STATUS_CURRENT)
    }

    pub fn received_position(&self) -> bool {
        self.cache.is_received(api::STATUS_POS)
    }

    pub fn received_speed(&self) -> bool {
        self.cache.is_received(api::STATUS_SPD)
    }

    pub fn received_fault(&self) -> bool {
        self.cache.is_received(api::STATUS_FAULT)
    }

    pub fn received_power(&self) -> bool {
        self.cache.is_received(api::STATUS_POWER)
    }

    pub fn received_mode(&self) -> bool {
        self.cache.is_received(api::STATUS_CMODE)
    }

    pub fn received_out_voltage(&self) -> bool {
        self.cache.is_received(api::STATUS_VOUT)
    }

    pub fn received_temperature(&self) -> bool {
        self.cache.is_received(api::STATUS_TEMP)
    }

    pub fn received_analog_input(&self) -> bool {
        self.cache.is_received(api::STATUS_ANALOG)
    }

    /// Setpoint echo of the active control mode.
    pub fn received_setpoint(&self) -> bool {
        self.cache.is_received(self.control_mode.setpoint_api())
    }

    pub fn received_speed_setpoint(&self) -> bool {
        self.cache.is_received(api::SPD_SET)
    }

    pub fn received_duty_cycle_setpoint(&self) -> bool {
        self.cache.is_received(api::VOLT_SET)
    }

    pub fn received_current_setpoint(&self) -> bool {
        self.cache.is_received(api::ICTRL_SET)
    }

    pub fn received_position_setpoint(&self) -> bool {
        self.cache.is_received(api::POS_SET)
    }

    // Consuming reads

    fn take(&mut self, api: ApiCode) -> Field {
        self.cache.consume(api)
    }

    /// Output duty cycle, -1.0..=1.0.
    pub fn last_duty_cycle(&mut self) -> f32 {
        self.take(api::STATUS_VOLTOUT).fixed8x8().to_f32() / 128.0
    }

    pub fn last_bus_voltage(&mut self) -> f32 {
        self.take(api::STATUS_VOLTBUS).fixed8x8().to_f32()
    }

    pub fn last_current(&mut self) -> f32 {
        self.take(api::STATUS_CURRENT).fixed8x8().to_f32()
    }

    /// Output shaft position in rad.
    pub fn last_position(&mut self) -> f64 {
        let rev = self.take(api::STATUS_POS).fixed16x16().to_f64();
        self.rev_to_rad(rev)
    }

    /// Output shaft speed in rad/s.
    pub fn last_speed(&mut self) -> f64 {
        let rpm = self.take(api::STATUS_SPD).fixed16x16().to_f64();
        self.rpm_to_rad_per_sec(rpm)
    }

    pub fn last_fault(&mut self) -> u8 {
        self.take(api::STATUS_FAULT).byte()
    }

    /// Non-zero after the controller has power-cycled and not yet been told otherwise.
    pub fn last_power(&mut self) -> u8 {
        self.take(api::STATUS_POWER).byte()
    }

    /// Raw `STATUS_CMODE` byte; see [`ControlMode::from_raw`].
    pub fn last_mode(&mut self) -> u8 {
        self.take(api::STATUS_CMODE).byte()
    }

    pub fn last_out_voltage(&mut self) -> f32 {
        self.take(api::STATUS_VOUT).fixed8x8().to_f32()
    }

    pub fn last_temperature(&mut self) -> f32 {
        self.take(api::STATUS_TEMP).fixed8x8().to_f32()
    }

    pub fn last_analog_input(&mut self) -> f32 {
        self.take(api::STATUS_ANALOG).fixed8x8().to_f32()
    }

    /// Setpoint echo of the active control mode, in the units that mode commands in.
    pub fn last_setpoint(&mut self) -> f64 {
        match self.control_mode {
            ControlMode::Current => f64::from(self.status_current_get()),
            ControlMode::Position => self.status_position_get(),
            ControlMode::Speed => self.status_speed_get(),
            ControlMode::Voltage => f64::from(self.status_duty_cycle_get()),
        }
    }

    pub fn status_speed_get(&mut self) -> f64 {
        let rpm = self.take(api::SPD_SET).fixed16x16().to_f64();
        self.rpm_to_rad_per_sec(rpm)
    }

    pub fn status_duty_cycle_get(&mut self) -> f32 {
        self.take(api::VOLT_SET).fixed8x8().to_f32() / 128.0
    }

    pub fn status_current_get(&mut self) -> f32 {
        self.take(api::ICTRL_SET).fixed8x8().to_f32()
    }

    pub fn status_position_get(&mut self) -> f64 {
        let rev = self.take(api::POS_SET).fixed16x16().to_f64();
        self.rev_to_rad(rev)
    }

    // Non-consuming configuration reads

    pub fn pos_encoder_ref(&self) -> u8 {
        self.cache.peek(api::POS_REF).byte()
    }

    pub fn spd_encoder_ref(&self) -> u8 {
        self.cache.peek(api::SPD_REF).byte()
    }

    pub fn encoder_counts(&self) -> u16 {
        self.cache.peek(api::CFG_ENC_LINES).u16_le()
    }

    /// Raw bytes last reported for a gain term of the active mode.
    pub fn raw_gain(&self, term: GainTerm) -> Option<[u8; 8]> {
        let api = self.control_mode.gain_api(term)?;
        Some(*self.cache.peek(api).data())
    }

    /// Decoded gain last reported for the active mode. `None` in voltage mode.
    pub fn reported_gain(&self, term: GainTerm) -> Option<f64> {
        let api = self.control_mode.gain_api(term)?;
        Some(self.cache.peek(api).fixed16x16().to_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::{Fixed16x16, Fixed8x8};

    const DEV: u8 = 7;

    fn driver() -> (Driver, TxQueue) {
        let q = TxQueue::new();
        (Driver::new(q.clone(), DEV, "left_wheel"), q)
    }

    fn frame(api: ApiCode, device: u8, data: &[u8]) -> CanFrame {
        match CanFrame::new(api.to_id(device), data) {
            Some(f) => f,
            None => panic!("payload too long"),
        }
    }

    #[test]
    fn test_foreign_address_is_ignored() {
        let (mut d, _q) = driver();
        assert!(!d.process_message(&frame(api::STATUS_POWER, DEV + 1, &[1])));
        assert!(!d.process_message(&frame(api::STATUS_SPD, 0, &[1, 2, 3, 4])));
        assert!(!d.cache().any_received());
    }

    #[test]
    fn test_empty_payload_is_ignored() {
        let (mut d, _q) = driver();
        d.process_message(&frame(api::STATUS_POS, DEV, &[1, 2, 3, 4]));
        d.last_position();
        let before = d.cache().peek(api::STATUS_POS);
        assert!(!d.process_message(&frame(api::STATUS_POS, DEV, &[])));
        assert_eq!(d.cache().peek(api::STATUS_POS), before);
        assert!(!d.received_position());
    }

    #[test]
    fn test_uncached_group_is_ignored() {
        let (mut d, _q) = driver();
        let ack = CanFrame::new(ApiCode::from_raw(0x0202_2000).to_id(DEV), &[1]);
        assert_eq!(ack.map(|f| d.process_message(&f)), Some(false));
        assert!(!d.cache().any_received());
    }

    #[test]
    fn test_consume_clears_flag_and_rereads_stale() {
        let (mut d, _q) = driver();
        d.process_message(&frame(api::STATUS_CURRENT, DEV, &Fixed8x8::from_f32(2.5).to_le_bytes()));
        assert!(d.received_current());
        assert!(d.received_current(), "peek must not consume");
        assert_eq!(d.last_current(), 2.5);
        assert!(!d.received_current());
        assert_eq!(d.last_current(), 2.5);
        assert!(!d.received_current());
    }

    #[test]
    fn test_unit_conversions() {
        let (mut d, _q) = driver();
        d.set_gear_ratio(24.0);
        // 24 motor revolutions = one output revolution.
        d.process_message(&frame(api::STATUS_POS, DEV, &Fixed16x16::from_f64(24.0).to_le_bytes()));
        assert!((d.last_position() - 2.0 * PI).abs() < 1e-9);
        // 24 * 60 motor rpm = one output revolution per second.
        d.process_message(&frame(api::STATUS_SPD, DEV, &Fixed16x16::from_f64(1440.0).to_le_bytes()));
        assert!((d.last_speed() - 2.0 * PI).abs() < 1e-9);
        // Duty cycle reports are scaled by 128.
        d.process_message(&frame(api::STATUS_VOLTOUT, DEV, &Fixed8x8::from_f32(64.0).to_le_bytes()));
        assert_eq!(d.last_duty_cycle(), 0.5);
    }

    #[test]
    fn test_command_speed_encodes_rpm() {
        let (mut d, q) = driver();
        d.set_gear_ratio(24.0);
        d.command_speed(2.0 * PI);
        let sent = q.drain();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].id, api::SPD_SET.to_id(DEV));
        assert_eq!(sent[0].len, 4);
        let rpm = Fixed16x16::from_le_slice(sent[0].payload()).to_f64();
        assert!((rpm - 1440.0).abs() <= 1.0 / Fixed16x16::SCALE);
    }

    #[test]
    fn test_command_duty_cycle_encodes_8x8() {
        let (d, q) = driver();
        d.command_duty_cycle(0.25);
        let sent = q.drain();
        assert_eq!(sent[0].id, api::VOLT_SET.to_id(DEV));
        assert_eq!(sent[0].payload(), &[0x40, 0x00]);
    }

    #[test]
    fn test_setpoint_follows_mode() {
        let (mut d, q) = driver();
        d.process_message(&frame(api::ICTRL_SET, DEV, &Fixed8x8::from_f32(1.5).to_le_bytes()));
        d.process_message(&frame(api::VOLT_SET, DEV, &Fixed8x8::from_f32(64.0).to_le_bytes()));
        d.control_mode = ControlMode::Current;
        assert!(d.received_setpoint());
        d.request_feedback_setpoint();
        assert_eq!(d.last_setpoint(), 1.5);
        d.control_mode = ControlMode::Voltage;
        assert!(d.received_setpoint());
        assert_eq!(d.last_setpoint(), 0.5);
        d.control_mode = ControlMode::Speed;
        assert!(!d.received_setpoint());
        let ids: Vec<_> = q.drain().into_iter().map(|f| f.id).collect();
        assert_eq!(ids, vec![api::ICTRL_SET.to_id(DEV)]);
    }

    #[test]
    fn test_feedback_request_bundle() {
        let (d, q) = driver();
        d.request_feedback_messages();
        let sent = q.drain();
        assert_eq!(sent.len(), 5);
        assert!(sent.iter().all(CanFrame::is_empty));
        assert_eq!(sent[4].id, api::SPD_SET.to_id(DEV));
    }

    #[test]
    fn test_config_reads_do_not_consume() {
        let (mut d, _q) = driver();
        d.process_message(&frame(api::CFG_ENC_LINES, DEV, &1024u16.to_le_bytes()));
        d.process_message(&frame(api::SPD_REF, DEV, &[api::reference::QUAD_ENCODER]));
        assert_eq!(d.encoder_counts(), 1024);
        assert_eq!(d.spd_encoder_ref(), api::reference::QUAD_ENCODER);
        assert!(d.cache().is_received(api::CFG_ENC_LINES));
        assert!(d.cache().is_received(api::SPD_REF));
    }
}
