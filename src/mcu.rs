// src/mcu.rs - the command/event bridge to one physical feeder MCU (spec §6)
use crate::error::AmsError;
use async_trait::async_trait;

/// Follower drive direction. `Forward` feeds filament toward the
/// extruder; `Reverse` retracts it. Bit meaning is fixed here - a real
/// firmware's opposite convention is a translation concern for the
/// `McuLink` implementation, not the core (spec §9 open question).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Reverse,
}

/// Hardware status as reported by the feeder MCU (spec §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareStatus {
    Loading,
    Unloading,
    Forward,
    Reverse,
    Stopped,
    Error,
}

/// Commands a `FeederDriver` sends to its MCU (spec §6).
#[derive(Debug, Clone, PartialEq)]
pub enum McuCommand {
    Load { bay: u8 },
    Unload,
    Follower { enable: bool, direction: Direction },
    Stop,
    Query,
}

/// One periodic telemetry frame (spec §6: `telemetry{p, enc, f1s, hub, status}`).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Telemetry {
    /// Normalized pressure reading in `[0, 1]`.
    pub pressure: f32,
    /// Monotonic (wrapping) encoder tick accumulator.
    pub encoder: i32,
    pub filament_present: [bool; 4],
    pub hub_present: [bool; 4],
    pub status: HardwareStatus,
}

/// Aperiodic or periodic events arriving from the MCU.
#[derive(Debug, Clone, PartialEq)]
pub enum McuEvent {
    Telemetry(Telemetry),
    Loaded(u8),
    Unloaded,
    Error(u32),
}

/// Transport-agnostic bridge to one feeder's MCU. A real implementation
/// owns a serial/CAN transport; the `sim` crate provides a deterministic
/// in-memory fake for tests, keeping policy (load/unload/follower
/// sequencing) separate from the raw byte transport.
#[async_trait]
pub trait McuLink: Send {
    async fn send(&mut self, command: McuCommand) -> Result<(), AmsError>;

    /// Drain whatever telemetry/events have arrived since the last poll.
    /// Called once per coordinator tick (spec §4.7, "telemetry intake").
    async fn poll_events(&mut self) -> Vec<McuEvent>;
}
