//! Frame identifier layout and the named API codes of the controller protocol.
//!
//! A 29-bit extended identifier is `device type | manufacturer | group | index << 6 |
//! device number`. Masking out the device number leaves the API code, which in turn
//! splits into a message group and a sub-message index.

use can_transport::{CanFrame, CanId};
use core::fmt;

pub const MSGID_FULL_M: u32 = 0x1FFF_FFFF;
pub const MSGID_DEVNO_M: u32 = 0x0000_003F;
pub const MSGID_API_M: u32 = 0x0000_FFC0;
pub const MSGID_API_CLASS_M: u32 = 0x0000_FC00;
pub const MSGID_API_ID_M: u32 = 0x0000_03C0;
pub const MSGID_API_S: u32 = 6;

pub const MSGID_MFR_LM: u32 = 0x0002_0000;
pub const MSGID_DTYPE_MOTOR: u32 = 0x0200_0000;

/// Number of sub-message slots addressable inside one group (4 index bits).
pub const GROUP_SLOTS: usize = (MSGID_API_ID_M >> MSGID_API_S) as usize + 1;

/// Largest device number that fits the identifier.
pub const MAX_DEVICE_NUMBER: u8 = MSGID_DEVNO_M as u8;

/// Protocol subsystem selected by the API class bits.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum MessageGroup {
    Voltage,
    Speed,
    VelocityComp,
    Position,
    Current,
    Status,
    Config,
}

impl MessageGroup {
    pub const COUNT: usize = 7;

    /// Order in which inbound API codes are classified.
    pub const PRIORITY: [MessageGroup; Self::COUNT] = [
        MessageGroup::Config,
        MessageGroup::Status,
        MessageGroup::Current,
        MessageGroup::Position,
        MessageGroup::VelocityComp,
        MessageGroup::Speed,
        MessageGroup::Voltage,
    ];

    pub const fn code(self) -> u32 {
        match self {
            MessageGroup::Voltage => 0x0000,
            MessageGroup::Speed => 0x0400,
            MessageGroup::VelocityComp => 0x0800,
            MessageGroup::Position => 0x0C00,
            MessageGroup::Current => 0x1000,
            MessageGroup::Status => 0x1400,
            MessageGroup::Config => 0x1C00,
        }
    }

    /// Dense index used for cache tables.
    pub const fn table(self) -> usize {
        match self {
            MessageGroup::Config => 0,
            MessageGroup::Status => 1,
            MessageGroup::Current => 2,
            MessageGroup::Position => 3,
            MessageGroup::VelocityComp => 4,
            MessageGroup::Speed => 5,
            MessageGroup::Voltage => 6,
        }
    }

    /// Periodic-status (0x1800) and acknowledge (0x2000) classes fall through to `None`.
    pub fn classify(api: ApiCode) -> Option<Self> {
        let class = api.0 & MSGID_API_CLASS_M;
        Self::PRIORITY.into_iter().find(|g| class == g.code())
    }

    pub const fn name(self) -> &'static str {
        match self {
            MessageGroup::Voltage => "voltage",
            MessageGroup::Speed => "speed",
            MessageGroup::VelocityComp => "vcomp",
            MessageGroup::Position => "position",
            MessageGroup::Current => "current",
            MessageGroup::Status => "status",
            MessageGroup::Config => "config",
        }
    }
}

/// An identifier with the device number masked out.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ApiCode(u32);

impl ApiCode {
    pub const fn new(group: MessageGroup, index: u8) -> Self {
        Self(
            MSGID_DTYPE_MOTOR
                | MSGID_MFR_LM
                | group.code()
                | (((index as u32) << MSGID_API_S) & MSGID_API_ID_M),
        )
    }

    pub const fn from_raw(raw: u32) -> Self {
        Self(raw & (MSGID_FULL_M ^ MSGID_DEVNO_M))
    }

    pub const fn raw(self) -> u32 {
        self.0
    }

    pub fn group(self) -> Option<MessageGroup> {
        MessageGroup::classify(self)
    }

    /// Sub-message index within the group.
    pub const fn index(self) -> usize {
        ((self.0 & MSGID_API_ID_M) >> MSGID_API_S) as usize
    }

    /// Full identifier addressed to `device`.
    pub const fn to_id(self, device: u8) -> CanId {
        CanId::extended_masked(self.0 | (device as u32 & MSGID_DEVNO_M))
    }

    /// Protocol name if this is one of the codes the driver uses.
    pub fn name(self) -> Option<&'static str> {
        NAMED.iter().find(|(code, _)| *code == self).map(|(_, n)| *n)
    }

    /// Look up a named code, ignoring case (`spd_set`, `STATUS_POWER`).
    pub fn from_name(name: &str) -> Option<Self> {
        NAMED
            .iter()
            .find(|(_, n)| n.eq_ignore_ascii_case(name))
            .map(|(code, _)| *code)
    }
}

impl fmt::Display for ApiCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{name}"),
            None => write!(f, "0x{:08X}", self.0),
        }
    }
}

/// API code of an identifier (device bits cleared).
pub fn extract_api(id: u32) -> ApiCode {
    ApiCode::from_raw(id)
}

/// Device number of an identifier.
pub fn extract_device(id: u32) -> u8 {
    (id & MSGID_DEVNO_M) as u8
}

/// Zero-length extended frame for `api` addressed to `device`.
pub fn build_frame(api: ApiCode, device: u8) -> CanFrame {
    CanFrame::empty(api.to_id(device))
}

fn frame_with(api: ApiCode, device: u8, bytes: &[u8]) -> CanFrame {
    let mut frame = build_frame(api, device);
    let n = bytes.len().min(frame.data.len());
    frame.data[..n].copy_from_slice(&bytes[..n]);
    frame.len = n as u8;
    frame
}

pub fn build_u8(api: ApiCode, device: u8, value: u8) -> CanFrame {
    frame_with(api, device, &[value])
}

pub fn build_u16(api: ApiCode, device: u8, value: u16) -> CanFrame {
    frame_with(api, device, &value.to_le_bytes())
}

pub fn build_fixed8x8(api: ApiCode, device: u8, value: f32) -> CanFrame {
    frame_with(api, device, &crate::Fixed8x8::from_f32(value).to_le_bytes())
}

pub fn build_fixed16x16(api: ApiCode, device: u8, value: f64) -> CanFrame {
    frame_with(api, device, &crate::Fixed16x16::from_f64(value).to_le_bytes())
}

/// Encoder reference values for `POS_REF` / `SPD_REF`.
pub mod reference {
    pub const ENCODER: u8 = 0x00;
    pub const POTENTIOMETER: u8 = 0x01;
    pub const INV_ENCODER: u8 = 0x02;
    pub const QUAD_ENCODER: u8 = 0x03;
    pub const NONE: u8 = 0xFF;
}

macro_rules! api_codes {
    ($( $name:ident = ($group:ident, $index:expr) ),* $(,)?) => {
        $( pub const $name: ApiCode = ApiCode::new(MessageGroup::$group, $index); )*

        const NAMED: &[(ApiCode, &str)] = &[ $( ($name, stringify!($name)) ),* ];
    };
}

api_codes! {
    VOLT_EN = (Voltage, 0),
    VOLT_DIS = (Voltage, 1),
    VOLT_SET = (Voltage, 2),
    VOLT_SET_RAMP = (Voltage, 3),

    SPD_EN = (Speed, 0),
    SPD_DIS = (Speed, 1),
    SPD_SET = (Speed, 2),
    SPD_PC = (Speed, 3),
    SPD_IC = (Speed, 4),
    SPD_DC = (Speed, 5),
    SPD_REF = (Speed, 6),

    VCOMP_EN = (VelocityComp, 0),
    VCOMP_DIS = (VelocityComp, 1),
    VCOMP_SET = (VelocityComp, 2),
    VCOMP_IN_RAMP = (VelocityComp, 3),
    VCOMP_COMP_RAMP = (VelocityComp, 4),

    POS_EN = (Position, 0),
    POS_DIS = (Position, 1),
    POS_SET = (Position, 2),
    POS_PC = (Position, 3),
    POS_IC = (Position, 4),
    POS_DC = (Position, 5),
    POS_REF = (Position, 6),

    ICTRL_EN = (Current, 0),
    ICTRL_DIS = (Current, 1),
    ICTRL_SET = (Current, 2),
    ICTRL_PC = (Current, 3),
    ICTRL_IC = (Current, 4),
    ICTRL_DC = (Current, 5),

    STATUS_VOLTOUT = (Status, 0),
    STATUS_VOLTBUS = (Status, 1),
    STATUS_CURRENT = (Status, 2),
    STATUS_TEMP = (Status, 3),
    STATUS_POS = (Status, 4),
    STATUS_SPD = (Status, 5),
    STATUS_LIMIT = (Status, 6),
    STATUS_FAULT = (Status, 7),
    STATUS_POWER = (Status, 8),
    STATUS_CMODE = (Status, 9),
    STATUS_VOUT = (Status, 10),
    STATUS_STKY_FLT = (Status, 11),
    STATUS_FLT_COUNT = (Status, 12),
    STATUS_ANALOG = (Status, 13),

    CFG_NUM_BRUSHES = (Config, 0),
    CFG_ENC_LINES = (Config, 1),
    CFG_POT_TURNS = (Config, 2),
    CFG_BRAKE_COAST = (Config, 3),
    CFG_LIMIT_MODE = (Config, 4),
    CFG_LIMIT_FWD = (Config, 5),
    CFG_LIMIT_REV = (Config, 6),
    CFG_MAX_VOUT = (Config, 7),
    CFG_FAULT_TIME = (Config, 8),
}
