//! In-process stand-in for controllers on a bus.
//!
//! A [`SimulatedController`] keeps a register file keyed by API code and answers the
//! protocol the way a freshly powered controller does: the power flag is set, both
//! encoder references are unset, and it runs in voltage mode with zero gains.
//! [`SimBus`] routes sent frames to every controller and queues their replies for
//! `recv`.

use crate::api::{self, reference, ApiCode};
use crate::fixed::{Fixed16x16, Fixed8x8};
use crate::mode::ControlMode;
use can_transport::{BusInfo, CanBus, CanFrame, Result, TransportError};
use std::collections::{HashMap, VecDeque};
use tracing::trace;

const NOMINAL_BUS_VOLTAGE: f32 = 12.0;
const AMBIENT_TEMPERATURE: f32 = 25.0;

const PERIODIC: [ApiCode; 10] = [
    api::STATUS_VOLTOUT,
    api::STATUS_VOLTBUS,
    api::STATUS_CURRENT,
    api::STATUS_TEMP,
    api::STATUS_POS,
    api::STATUS_SPD,
    api::STATUS_FAULT,
    api::STATUS_CMODE,
    api::STATUS_VOUT,
    api::STATUS_ANALOG,
];

#[derive(Debug, Clone)]
pub struct SimulatedController {
    device: u8,
    registers: HashMap<ApiCode, Vec<u8>>,
}

impl SimulatedController {
    pub fn new(device: u8) -> Self {
        let mut sim = Self {
            device: device & api::MAX_DEVICE_NUMBER,
            registers: HashMap::new(),
        };
        sim.power_cycle();
        sim
    }

    pub fn device(&self) -> u8 {
        self.device
    }

    /// Drop every setting and come back up as if power had been lost.
    pub fn power_cycle(&mut self) {
        self.registers.clear();
        let zero16 = Fixed16x16(0).to_le_bytes().to_vec();
        let zero8 = Fixed8x8(0).to_le_bytes().to_vec();
        self.set(api::STATUS_POWER, vec![1]);
        self.set(api::STATUS_CMODE, vec![ControlMode::Voltage.raw()]);
        self.set(api::STATUS_FAULT, vec![0]);
        self.set(api::POS_REF, vec![reference::NONE]);
        self.set(api::SPD_REF, vec![reference::NONE]);
        self.set(api::CFG_ENC_LINES, 0u16.to_le_bytes().to_vec());
        for mode in [ControlMode::Current, ControlMode::Speed, ControlMode::Position] {
            for term in crate::GainTerm::ALL {
                if let Some(code) = mode.gain_api(term) {
                    self.set(code, zero16.clone());
                }
            }
        }
        self.set(api::SPD_SET, zero16.clone());
        self.set(api::POS_SET, zero16.clone());
        self.set(api::STATUS_POS, zero16.clone());
        self.set(api::STATUS_SPD, zero16);
        self.set(api::VOLT_SET, zero8.clone());
        self.set(api::ICTRL_SET, zero8.clone());
        self.set(api::STATUS_VOLTOUT, zero8.clone());
        self.set(api::STATUS_CURRENT, zero8.clone());
        self.set(api::STATUS_VOUT, zero8.clone());
        self.set(api::STATUS_ANALOG, zero8);
        self.set(api::STATUS_VOLTBUS, Fixed8x8::from_f32(NOMINAL_BUS_VOLTAGE).to_le_bytes().to_vec());
        self.set(api::STATUS_TEMP, Fixed8x8::from_f32(AMBIENT_TEMPERATURE).to_le_bytes().to_vec());
    }

    fn set(&mut self, code: ApiCode, bytes: Vec<u8>) {
        self.registers.insert(code, bytes);
    }

    /// Raw register bytes, if the register exists.
    pub fn register(&self, code: ApiCode) -> Option<&[u8]> {
        self.registers.get(&code).map(Vec::as_slice)
    }

    pub fn mode(&self) -> Option<ControlMode> {
        self.register(api::STATUS_CMODE)
            .and_then(|b| b.first().copied())
            .and_then(ControlMode::from_raw)
    }

    /// Handle one frame from the bus. Returns the reply, if any.
    pub fn handle(&mut self, frame: &CanFrame) -> Option<CanFrame> {
        let id = frame.id.raw();
        if !frame.id.is_extended() || api::extract_device(id) != self.device {
            return None;
        }
        let code = api::extract_api(id);

        if frame.is_empty() {
            if let Some(mode) = enabled_mode(code) {
                self.set(api::STATUS_CMODE, vec![mode]);
                return None;
            }
            // Read request: answer on the same identifier.
            let value = self.registers.get(&code)?;
            return CanFrame::new(code.to_id(self.device), value);
        }

        let payload = frame.payload().to_vec();
        match code {
            // Writing the power flag acknowledges the power-up and clears it.
            c if c == api::STATUS_POWER => self.set(api::STATUS_POWER, vec![0]),
            c if c == api::SPD_SET => {
                self.set(api::STATUS_SPD, payload.clone());
                self.set(c, payload);
            }
            c if c == api::VOLT_SET => {
                let duty = Fixed8x8::from_le_slice(&payload).to_f32();
                let reported = Fixed8x8::from_f32(duty * 128.0).to_le_bytes().to_vec();
                self.set(api::STATUS_VOLTOUT, reported);
                self.set(c, payload);
            }
            c => self.set(c, payload),
        }
        trace!(device = self.device, api = %code, "register written");
        None
    }

    /// Integrate position over `dt` seconds at the reported speed.
    pub fn advance(&mut self, dt: f64) {
        let rpm = self.read16x16(api::STATUS_SPD).to_f64();
        let rev = self.read16x16(api::STATUS_POS).to_f64() + rpm / 60.0 * dt;
        self.set(api::STATUS_POS, Fixed16x16::from_f64(rev).to_le_bytes().to_vec());
    }

    /// Periodic status burst: every status register except the power flag.
    pub fn status_frames(&self) -> Vec<CanFrame> {
        PERIODIC
            .iter()
            .filter_map(|&code| {
                let value = self.register(code)?;
                CanFrame::new(code.to_id(self.device), value)
            })
            .collect()
    }

    fn read16x16(&self, code: ApiCode) -> Fixed16x16 {
        self.register(code).map(Fixed16x16::from_le_slice).unwrap_or_default()
    }
}

fn enabled_mode(code: ApiCode) -> Option<u8> {
    if code == api::VCOMP_EN {
        return Some(4);
    }
    [
        ControlMode::Voltage,
        ControlMode::Current,
        ControlMode::Speed,
        ControlMode::Position,
    ]
    .into_iter()
    .find(|m| m.enable_api() == code)
    .map(ControlMode::raw)
}

/// Bus populated by simulated controllers.
#[derive(Debug)]
pub struct SimBus {
    name: String,
    controllers: Vec<SimulatedController>,
    inbox: VecDeque<CanFrame>,
    sent: usize,
}

impl SimBus {
    pub fn with_devices(name: &str, devices: impl IntoIterator<Item = u8>) -> Result<Self> {
        let mut bus = Self::open(name)?;
        for device in devices {
            bus.add(SimulatedController::new(device));
        }
        Ok(bus)
    }

    pub fn add(&mut self, controller: SimulatedController) {
        self.controllers.push(controller);
    }

    pub fn controller(&self, device: u8) -> Option<&SimulatedController> {
        self.controllers.iter().find(|c| c.device == device)
    }

    pub fn controller_mut(&mut self, device: u8) -> Option<&mut SimulatedController> {
        self.controllers.iter_mut().find(|c| c.device == device)
    }

    /// Advance every controller by `dt` seconds and queue its periodic status burst.
    pub fn advance(&mut self, dt: f64) {
        for c in &mut self.controllers {
            c.advance(dt);
            self.inbox.extend(c.status_frames().into_iter().map(CanFrame::stamped));
        }
    }

    /// Frames accepted by `send` since the bus was opened.
    pub fn sent_count(&self) -> usize {
        self.sent
    }

    pub fn pending(&self) -> usize {
        self.inbox.len()
    }
}

impl CanBus for SimBus {
    fn open(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(TransportError::InterfaceNotFound(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            controllers: Vec::new(),
            inbox: VecDeque::new(),
            sent: 0,
        })
    }

    fn list() -> Result<Vec<BusInfo>> {
        Ok(vec![BusInfo {
            name: "sim0".to_string(),
            driver: "sim".to_string(),
        }])
    }

    fn recv(&mut self, _timeout_ms: Option<u64>) -> Result<CanFrame> {
        self.inbox.pop_front().ok_or(TransportError::Timeout)
    }

    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        trace!(bus = %self.name, %frame, "sim send");
        self.sent += 1;
        for c in &mut self.controllers {
            if let Some(reply) = c.handle(frame) {
                self.inbox.push_back(reply.stamped());
            }
        }
        Ok(())
    }
}
