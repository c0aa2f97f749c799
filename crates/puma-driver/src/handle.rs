use crate::driver::Driver;
use can_transport::CanFrame;
use parking_lot::{Mutex, MutexGuard};
use std::sync::Arc;

/// Shared handle for feeding a [`Driver`] from a receive thread while another
/// thread runs the ladder and reads telemetry.
#[derive(Clone, Debug)]
pub struct DriverHandle {
    inner: Arc<Mutex<Driver>>,
}

impl DriverHandle {
    pub fn new(driver: Driver) -> Self {
        Self {
            inner: Arc::new(Mutex::new(driver)),
        }
    }

    pub fn lock(&self) -> MutexGuard<'_, Driver> {
        self.inner.lock()
    }

    pub fn process_message(&self, frame: &CanFrame) -> bool {
        self.inner.lock().process_message(frame)
    }
}

impl From<Driver> for DriverHandle {
    fn from(driver: Driver) -> Self {
        Self::new(driver)
    }
}
