use crate::{CanBus, CanFrame, Result, TransportError};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;

/// Shared outbound frame queue.
///
/// Producers `enqueue` without waiting for the bus; whoever owns the bus calls
/// [`TxQueue::flush`] on its own cadence. Clones share the same queue, so several
/// device drivers on one bus can hold a handle each.
#[derive(Clone, Debug, Default)]
pub struct TxQueue {
    inner: Arc<Mutex<VecDeque<CanFrame>>>,
}

impl TxQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fire-and-forget: no delivery or ordering guarantee beyond FIFO into the bus.
    pub fn enqueue(&self, frame: CanFrame) {
        self.inner.lock().push_back(frame);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// Remove and return everything queued, oldest first.
    pub fn drain(&self) -> Vec<CanFrame> {
        self.inner.lock().drain(..).collect()
    }

    /// Send queued frames in order. On a send error the failing frame and everything
    /// behind it stay queued.
    pub fn flush<B: CanBus + ?Sized>(&self, bus: &mut B) -> Result<usize> {
        let mut pending = self.drain();
        let queued = pending.len();
        let failure = pending
            .iter()
            .enumerate()
            .find_map(|(i, frame)| bus.send(frame).err().map(|e| (i, e)));
        let Some((sent, e)) = failure else {
            return Ok(queued);
        };
        let unsent = pending.split_off(sent);
        {
            let mut q = self.inner.lock();
            // Frames enqueued during the flush go behind the unsent ones.
            let newer: Vec<CanFrame> = q.drain(..).collect();
            q.extend(unsent);
            q.extend(newer);
        }
        tracing::warn!(sent, queued, error = %e, "tx flush interrupted");
        Err(TransportError::Flush {
            sent,
            queued,
            source: Box::new(e),
        })
    }
}

#[cfg(all(test, feature = "mock"))]
mod tests {
    use super::*;
    use crate::{CanId, MockBus};

    fn frame(raw: u32, data: &[u8]) -> CanFrame {
        match CanFrame::new(CanId::extended_masked(raw), data) {
            Some(f) => f,
            None => panic!("payload too long"),
        }
    }

    #[test]
    fn test_clones_share_queue() {
        let q = TxQueue::new();
        let other = q.clone();
        other.enqueue(frame(1, &[1]));
        q.enqueue(frame(2, &[]));
        assert_eq!(q.len(), 2);
        let drained = other.drain();
        assert_eq!(drained[0].id.raw(), 1);
        assert_eq!(drained[1].id.raw(), 2);
        assert!(q.is_empty());
    }

    #[test]
    fn test_flush_sends_in_order() -> anyhow::Result<()> {
        let q = TxQueue::new();
        q.enqueue(frame(10, &[0xAA]));
        q.enqueue(frame(11, &[0xBB]));
        let mut bus = MockBus::open("mock0")?;
        assert_eq!(q.flush(&mut bus)?, 2);
        let ids: Vec<u32> = bus.sent().iter().map(|f| f.id.raw()).collect();
        assert_eq!(ids, vec![10, 11]);
        assert!(q.is_empty());
        Ok(())
    }

    #[test]
    fn test_flush_failure_requeues_rest() -> anyhow::Result<()> {
        let q = TxQueue::new();
        q.enqueue(frame(1, &[]));
        q.enqueue(frame(2, &[]));
        q.enqueue(frame(3, &[]));
        let mut bus = MockBus::open("mock0")?;
        bus.fail_sends_after(1);
        let err = q.flush(&mut bus);
        assert!(matches!(err, Err(TransportError::Flush { sent: 1, queued: 3, .. })));
        let left: Vec<u32> = q.drain().iter().map(|f| f.id.raw()).collect();
        assert_eq!(left, vec![2, 3]);
        Ok(())
    }
}
