// src/error.rs
use thiserror::Error;

/// The small set of outcome kinds the gcode-level command surface reports
/// (spec §7). Kept separate from `AmsError` so callers can match on the
/// exit code without destructuring every variant's fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotReady,
    Busy,
    LoadFailed,
    UnloadFailed,
    Timeout,
    Cancelled,
    ClogDetected,
    NoRunoutBackup,
    McuCommError,
    Unknown,
}

/// Structured error for the control core. Every variant carries the
/// subject (feeder or PS name) and enough detail for the host surface to
/// render a uniform message, per spec §7's closing paragraph.
#[derive(Debug, Clone, Error)]
pub enum AmsError {
    #[error("bay {bay} on feeder {feeder} is not ready")]
    NotReady { feeder: String, bay: u8 },

    #[error("feeder {feeder} is busy")]
    Busy { feeder: String },

    #[error("load of bay {bay} on feeder {feeder} failed after {attempts} attempt(s): {reason}")]
    LoadFailed {
        feeder: String,
        bay: u8,
        attempts: u32,
        reason: String,
    },

    #[error("unload on feeder {feeder} failed after {attempts} attempt(s): {reason}")]
    UnloadFailed {
        feeder: String,
        attempts: u32,
        reason: String,
    },

    #[error("timeout waiting for {feeder} ({op})")]
    Timeout { feeder: String, op: &'static str },

    #[error("operation on {feeder} was cancelled")]
    Cancelled { feeder: String },

    #[error("clog detected on pressure sensor {ps}")]
    ClogDetected { ps: String },

    #[error("no runout backup available for lane {lane}")]
    NoRunoutBackup { lane: String },

    #[error("MCU communication error on {feeder}: {detail}")]
    McuCommError { feeder: String, detail: String },

    #[error("unknown name: {0}")]
    UnknownName(String),
}

impl AmsError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AmsError::NotReady { .. } => ErrorKind::NotReady,
            AmsError::Busy { .. } => ErrorKind::Busy,
            AmsError::LoadFailed { .. } => ErrorKind::LoadFailed,
            AmsError::UnloadFailed { .. } => ErrorKind::UnloadFailed,
            AmsError::Timeout { .. } => ErrorKind::Timeout,
            AmsError::Cancelled { .. } => ErrorKind::Cancelled,
            AmsError::ClogDetected { .. } => ErrorKind::ClogDetected,
            AmsError::NoRunoutBackup { .. } => ErrorKind::NoRunoutBackup,
            AmsError::McuCommError { .. } => ErrorKind::McuCommError,
            AmsError::UnknownName(_) => ErrorKind::Unknown,
        }
    }

    pub fn subject(&self) -> &str {
        match self {
            AmsError::NotReady { feeder, .. } => feeder,
            AmsError::Busy { feeder } => feeder,
            AmsError::LoadFailed { feeder, .. } => feeder,
            AmsError::UnloadFailed { feeder, .. } => feeder,
            AmsError::Timeout { feeder, .. } => feeder,
            AmsError::Cancelled { feeder } => feeder,
            AmsError::ClogDetected { ps } => ps,
            AmsError::NoRunoutBackup { lane } => lane,
            AmsError::McuCommError { feeder, .. } => feeder,
            AmsError::UnknownName(name) => name,
        }
    }
}
