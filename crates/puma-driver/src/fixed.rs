//! Signed fixed-point payload formats.
//!
//! Encoding truncates toward zero (`as` casts), it never rounds to nearest. Values past
//! the integer range saturate and NaN encodes as zero. Verification compares encoded
//! bytes, not decoded floats.

/// 8.8 fixed point carried in 2 little-endian bytes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct Fixed8x8(pub i16);

impl Fixed8x8 {
    pub const SCALE: f32 = 256.0;
    pub const WIDTH: usize = 2;

    pub fn from_f32(value: f32) -> Self {
        Self((value * Self::SCALE) as i16)
    }

    pub fn to_f32(self) -> f32 {
        f32::from(self.0) / Self::SCALE
    }

    pub fn to_le_bytes(self) -> [u8; 2] {
        self.0.to_le_bytes()
    }

    /// Decode from the leading bytes of `bytes`; missing bytes read as zero.
    pub fn from_le_slice(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 2];
        let n = bytes.len().min(Self::WIDTH);
        raw[..n].copy_from_slice(&bytes[..n]);
        Self(i16::from_le_bytes(raw))
    }

    /// True when `received` starts with exactly the encoding of `expected`.
    pub fn matches(received: &[u8], expected: f32) -> bool {
        received.get(..Self::WIDTH) == Some(&Self::from_f32(expected).to_le_bytes()[..])
    }
}

/// 16.16 fixed point carried in 4 little-endian bytes.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash)]
pub struct Fixed16x16(pub i32);

impl Fixed16x16 {
    pub const SCALE: f64 = 65536.0;
    pub const WIDTH: usize = 4;

    pub fn from_f64(value: f64) -> Self {
        Self((value * Self::SCALE) as i32)
    }

    pub fn to_f64(self) -> f64 {
        f64::from(self.0) / Self::SCALE
    }

    pub fn to_le_bytes(self) -> [u8; 4] {
        self.0.to_le_bytes()
    }

    pub fn from_le_slice(bytes: &[u8]) -> Self {
        let mut raw = [0u8; 4];
        let n = bytes.len().min(Self::WIDTH);
        raw[..n].copy_from_slice(&bytes[..n]);
        Self(i32::from_le_bytes(raw))
    }

    pub fn matches(received: &[u8], expected: f64) -> bool {
        received.get(..Self::WIDTH) == Some(&Self::from_f64(expected).to_le_bytes()[..])
    }
}
