use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use std::fmt;

#[derive(Clone)]
pub struct DriverMetrics {
    pub tx_frames: IntCounter,
    pub rx_frames: IntCounter,
    pub configured_drivers: IntGauge,
    pub power_resets: IntCounter,
}

#[derive(Clone)]
pub struct MetricsHub {
    pub registry: Registry,
    pub drivers: DriverMetrics,
}

impl MetricsHub {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();
        let drivers = DriverMetrics {
            tx_frames: IntCounter::new("puma_can_tx_frames", "Total CAN frames sent")?,
            rx_frames: IntCounter::new("puma_can_rx_frames", "Total CAN frames received")?,
            configured_drivers: IntGauge::new(
                "puma_configured_drivers",
                "Number of controllers that passed configuration",
            )?,
            power_resets: IntCounter::new(
                "puma_power_resets",
                "Controller power cycles detected while running",
            )?,
        };
        registry.register(Box::new(drivers.tx_frames.clone()))?;
        registry.register(Box::new(drivers.rx_frames.clone()))?;
        registry.register(Box::new(drivers.configured_drivers.clone()))?;
        registry.register(Box::new(drivers.power_resets.clone()))?;
        Ok(Self { registry, drivers })
    }

    /// Prometheus text exposition of every registered metric.
    pub fn encode_text(&self) -> String {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        if let Err(e) = encoder.encode(&self.registry.gather(), &mut buf) {
            return format!("error encoding metrics: {e}");
        }
        String::from_utf8(buf).unwrap_or_default()
    }
}

impl fmt::Debug for DriverMetrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverMetrics")
            .field("tx_frames", &self.tx_frames.get())
            .field("rx_frames", &self.rx_frames.get())
            .field("configured_drivers", &self.configured_drivers.get())
            .field("power_resets", &self.power_resets.get())
            .finish()
    }
}

impl fmt::Debug for MetricsHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetricsHub").field("drivers", &self.drivers).finish()
    }
}
