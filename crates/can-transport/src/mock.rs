use crate::{BusInfo, CanBus, CanFrame, Result, TransportError};
use std::collections::VecDeque;

/// A simple in-process mock bus. Each bus instance is independent.
///
/// Frames handed to [`MockBus::inject`] come back out of `recv`; everything sent is
/// recorded for inspection.
pub struct MockBus {
    name: String,
    inbox: VecDeque<CanFrame>,
    sent: Vec<CanFrame>,
    send_budget: Option<usize>,
}

impl MockBus {
    /// Queue a frame as if it had arrived from the wire.
    pub fn inject(&mut self, frame: CanFrame) {
        self.inbox.push_back(frame.stamped());
    }

    pub fn sent(&self) -> &[CanFrame] {
        &self.sent
    }

    pub fn take_sent(&mut self) -> Vec<CanFrame> {
        std::mem::take(&mut self.sent)
    }

    /// Make every send after the next `n` fail, to exercise error paths.
    pub fn fail_sends_after(&mut self, n: usize) {
        self.send_budget = Some(n);
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl CanBus for MockBus {
    fn open(name: &str) -> Result<Self> {
        if name.is_empty() {
            return Err(TransportError::InterfaceNotFound(name.to_string()));
        }
        Ok(Self {
            name: name.to_string(),
            inbox: VecDeque::new(),
            sent: Vec::new(),
            send_budget: None,
        })
    }

    fn list() -> Result<Vec<BusInfo>> {
        Ok(vec![BusInfo {
            name: "mock0".to_string(),
            driver: "mock".to_string(),
        }])
    }

    fn recv(&mut self, _timeout_ms: Option<u64>) -> Result<CanFrame> {
        // Never blocks: an empty inbox is reported as a timeout regardless of the budget.
        self.inbox.pop_front().ok_or(TransportError::Timeout)
    }

    fn send(&mut self, frame: &CanFrame) -> Result<()> {
        if let Some(budget) = self.send_budget.as_mut() {
            if *budget == 0 {
                return Err(TransportError::Unsupported("mock send budget exhausted"));
            }
            *budget -= 1;
        }
        tracing::trace!(bus = %self.name, %frame, "mock send");
        self.sent.push(frame.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::CanId;

    #[test]
    fn test_open_rejects_empty_name() {
        assert!(matches!(
            MockBus::open(""),
            Err(TransportError::InterfaceNotFound(_))
        ));
    }

    #[test]
    fn test_inject_then_receive() -> anyhow::Result<()> {
        let mut bus = MockBus::open("mock0")?;
        assert!(bus.try_recv()?.is_none());
        let frame = CanFrame::empty(CanId::extended_masked(0x0202_1405));
        bus.inject(frame.clone());
        let got = bus.try_recv()?;
        assert_eq!(got.as_ref().map(|f| f.id), Some(frame.id));
        assert!(got.and_then(|f| f.timestamp).is_some());
        assert!(matches!(bus.recv(Some(10)), Err(TransportError::Timeout)));
        Ok(())
    }
}
