use thiserror::Error;

use crate::types::SensorReading;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SensorError {
    #[error("no response from sensor on GPIO{0}")]
    NoResponse(u8),
    #[error("sensor checksum mismatch")]
    Checksum,
    #[error("sensor read timed out")]
    Timeout,
    #[error("sensor read aborted: {0}")]
    Aborted(String),
}

pub trait SensorDriver {
    fn read(&mut self) -> Result<SensorReading, SensorError>;
}

pub trait Relay {
    fn write(&mut self, energized: bool);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Identify,
    NetworkReady,
    SensorError,
}

// Implementations must return promptly; long patterns belong on their
// own task.
pub trait StatusSignal {
    fn signal(&self, code: StatusCode);
}
