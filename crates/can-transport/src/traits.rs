use crate::{BusInfo, CanFrame, Result, TransportError};

/// A minimal blocking CAN bus interface.
pub trait CanBus {
    /// Open a CAN interface by name (e.g., "can0", "vcan0").
    fn open(name: &str) -> Result<Self>
    where
        Self: Sized;

    /// Attempt to list available interfaces for this backend.
    fn list() -> Result<Vec<BusInfo>>;

    /// Receive one frame (blocking with optional timeout in milliseconds).
    fn recv(&mut self, _timeout_ms: Option<u64>) -> Result<CanFrame>;

    /// Non-blocking receive. `Ok(None)` when nothing is pending.
    fn try_recv(&mut self) -> Result<Option<CanFrame>> {
        match self.recv(Some(0)) {
            Ok(frame) => Ok(Some(frame)),
            Err(TransportError::Timeout) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Send one frame.
    fn send(&mut self, frame: &CanFrame) -> Result<()>;
}
