//! Per-controller cache of the last payload seen for every (group, sub-message) pair.
//!
//! Slots hold raw bytes only. What the bytes mean, and how many of them matter, is
//! decided by the accessor that reads the slot.

use crate::api::{ApiCode, MessageGroup, GROUP_SLOTS};
use crate::fixed::{Fixed16x16, Fixed8x8};

/// Last raw payload for one sub-message plus a freshness flag.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Field {
    data: [u8; 8],
    received: bool,
}

impl Field {
    pub fn data(&self) -> &[u8; 8] {
        &self.data
    }

    pub fn is_received(&self) -> bool {
        self.received
    }

    /// Copy the bytes present in `payload` (at most 8) over the slot and mark it fresh.
    /// Bytes past the payload keep their previous value.
    pub(crate) fn store(&mut self, payload: &[u8]) {
        let n = payload.len().min(self.data.len());
        self.data[..n].copy_from_slice(&payload[..n]);
        self.received = true;
    }

    /// Clear the freshness flag and hand back the bytes, fresh or not.
    pub(crate) fn consume(&mut self) -> Field {
        let snapshot = *self;
        self.received = false;
        snapshot
    }

    pub fn byte(&self) -> u8 {
        self.data[0]
    }

    pub fn u16_le(&self) -> u16 {
        u16::from_le_bytes([self.data[0], self.data[1]])
    }

    pub fn fixed8x8(&self) -> Fixed8x8 {
        Fixed8x8::from_le_slice(&self.data)
    }

    pub fn fixed16x16(&self) -> Fixed16x16 {
        Fixed16x16::from_le_slice(&self.data)
    }
}

/// Seven tables of [`Field`]s, one per message group.
#[derive(Clone, Debug, Default)]
pub struct TelemetryCache {
    tables: [[Field; GROUP_SLOTS]; MessageGroup::COUNT],
}

impl TelemetryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` when the API code belongs to no cached group.
    pub fn field(&self, api: ApiCode) -> Option<&Field> {
        let group = api.group()?;
        self.tables[group.table()].get(api.index())
    }

    pub(crate) fn field_mut(&mut self, api: ApiCode) -> Option<&mut Field> {
        let group = api.group()?;
        self.tables[group.table()].get_mut(api.index())
    }

    /// Store an inbound payload. Returns false if the API code is not cached.
    pub(crate) fn store(&mut self, api: ApiCode, payload: &[u8]) -> bool {
        match self.field_mut(api) {
            Some(field) => {
                field.store(payload);
                true
            }
            None => false,
        }
    }

    /// Peek at the freshness flag without touching it.
    pub fn is_received(&self, api: ApiCode) -> bool {
        self.field(api).is_some_and(Field::is_received)
    }

    /// Read a slot and clear its freshness flag.
    pub(crate) fn consume(&mut self, api: ApiCode) -> Field {
        self.field_mut(api).map(Field::consume).unwrap_or_default()
    }

    /// Current slot contents without clearing the flag.
    pub fn peek(&self, api: ApiCode) -> Field {
        self.field(api).copied().unwrap_or_default()
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    pub fn any_received(&self) -> bool {
        self.tables.iter().flatten().any(Field::is_received)
    }
}
