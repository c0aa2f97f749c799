use thiserror::Error;

pub type Result<T, E = TransportError> = core::result::Result<T, E>;

/// Failures reported by bus backends. Frame queueing itself never fails.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("interface not found: {0}")]
    InterfaceNotFound(String),
    #[error("operation not supported on this backend: {0}")]
    Unsupported(&'static str),
    #[error("timeout")]
    Timeout,
    #[error("invalid frame: {0}")]
    InvalidFrame(&'static str),
    #[error("flushed {sent} of {queued} queued frames: {source}")]
    Flush {
        sent: usize,
        queued: usize,
        #[source]
        source: Box<TransportError>,
    },
}
