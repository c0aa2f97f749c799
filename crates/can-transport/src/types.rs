use core::fmt;
use time::OffsetDateTime;

const STANDARD_ID_MAX: u32 = 0x7FF;
const EXTENDED_ID_MASK: u32 = 0x1FFF_FFFF;

/// 11-bit or 29-bit CAN identifier
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct CanId {
    raw: u32,
    extended: bool,
}

impl CanId {
    pub fn standard(id11: u16) -> Option<Self> {
        if u32::from(id11) <= STANDARD_ID_MAX {
            Some(Self {
                raw: u32::from(id11),
                extended: false,
            })
        } else {
            None
        }
    }

    pub fn extended(id29: u32) -> Option<Self> {
        if id29 <= EXTENDED_ID_MASK {
            Some(Self {
                raw: id29,
                extended: true,
            })
        } else {
            None
        }
    }

    /// Extended identifier from the low 29 bits of `raw`; higher bits are dropped.
    pub const fn extended_masked(raw: u32) -> Self {
        Self {
            raw: raw & EXTENDED_ID_MASK,
            extended: true,
        }
    }

    /// Parse `0x`-prefixed hex or plain decimal. Values above 0x7FF become extended ids.
    pub fn parse(s: &str) -> Option<Self> {
        let t = s.trim();
        let val = match t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
            Some(hex) => u32::from_str_radix(hex, 16).ok()?,
            None => t.parse::<u32>().ok()?,
        };
        if val <= STANDARD_ID_MAX {
            Self::standard(val as u16)
        } else {
            Self::extended(val)
        }
    }

    pub fn raw(&self) -> u32 {
        self.raw
    }
    pub fn is_extended(&self) -> bool {
        self.extended
    }
}

impl fmt::Display for CanId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.extended {
            write!(f, "0x{raw:08X}", raw = self.raw)
        } else {
            write!(f, "0x{raw:03X}", raw = self.raw)
        }
    }
}

/// A classic CAN data frame: identifier plus up to 8 payload bytes.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CanFrame {
    pub id: CanId,
    pub len: u8,
    pub data: [u8; 8],
    pub timestamp: Option<Timestamp>,
}

impl CanFrame {
    pub fn new(id: CanId, data: &[u8]) -> Option<Self> {
        if data.len() > 8 {
            return None;
        }
        let mut buf = [0u8; 8];
        buf[..data.len()].copy_from_slice(data);
        Some(Self {
            id,
            len: data.len() as u8,
            data: buf,
            timestamp: None,
        })
    }

    /// Zero-length frame. On request/response protocols this asks the peer for a value.
    pub fn empty(id: CanId) -> Self {
        Self {
            id,
            len: 0,
            data: [0u8; 8],
            timestamp: None,
        }
    }

    /// The bytes actually carried by the frame.
    pub fn payload(&self) -> &[u8] {
        let len = usize::from(self.len).min(self.data.len());
        &self.data[..len]
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn stamped(mut self) -> Self {
        self.timestamp = Some(Timestamp(OffsetDateTime::now_utc()));
        self
    }
}

impl fmt::Display for CanFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.id, self.len)?;
        for b in self.payload() {
            write!(f, " {b:02X}")?;
        }
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Timestamp(pub OffsetDateTime);

#[derive(Clone, Debug)]
pub struct BusInfo {
    pub name: String,
    pub driver: String,
}
