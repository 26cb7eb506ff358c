//! Deterministic fakes for driving `oams_core::Coordinator` without real
//! hardware or wall-clock time: a controllable host clock/extruder and a
//! scriptable feeder MCU.
use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use oams_core::error::AmsError;
use oams_core::host::{Host, TimerHandle};
use oams_core::mcu::{Direction, HardwareStatus, McuCommand, McuEvent, McuLink, Telemetry};
use tokio::sync::Mutex as AsyncMutex;

/// A manually-advanced clock plus recorded host-facing side effects
/// (pauses, responses), standing in for the print host's reactor.
pub struct DeterministicHost {
    clock: f64,
    extruder_position: f64,
    next_timer: u64,
    pub pauses: Vec<String>,
    pub responses: Vec<String>,
    pub registered_gcode: Vec<String>,
}

impl DeterministicHost {
    pub fn new() -> Self {
        Self {
            clock: 0.0,
            extruder_position: 0.0,
            next_timer: 0,
            pauses: Vec::new(),
            responses: Vec::new(),
            registered_gcode: Vec::new(),
        }
    }

    pub fn advance(&mut self, dt: f64) {
        self.clock += dt;
    }

    pub fn advance_extruder(&mut self, dx: f64) {
        self.extruder_position += dx;
    }

    pub fn set_extruder_position(&mut self, pos: f64) {
        self.extruder_position = pos;
    }

    pub fn is_paused(&self) -> bool {
        !self.pauses.is_empty()
    }
}

impl Default for DeterministicHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for DeterministicHost {
    fn now(&self) -> f64 {
        self.clock
    }

    fn register_timer(&mut self, _period_s: f64) -> TimerHandle {
        let id = self.next_timer;
        self.next_timer += 1;
        TimerHandle(id)
    }

    fn extruder_position(&self, _extruder: &str) -> f64 {
        self.extruder_position
    }

    fn pause_print(&mut self, reason: &str) {
        self.pauses.push(reason.to_string());
    }

    fn respond(&mut self, message: &str) {
        self.responses.push(message.to_string());
    }

    fn register_gcode(&mut self, name: &str) {
        self.registered_gcode.push(name.to_string());
    }
}

/// A cloneable handle onto a [`DeterministicHost`], so a test can hand the
/// coordinator a `Box<dyn Host>` and still drive its clock/extruder
/// position and inspect pauses afterward. Plain `std::sync::Mutex` is fine
/// here since every `Host` method is synchronous - nothing ever holds the
/// guard across an `.await`.
#[derive(Clone)]
pub struct SharedHost(Arc<StdMutex<DeterministicHost>>);

impl SharedHost {
    pub fn new() -> Self {
        Self(Arc::new(StdMutex::new(DeterministicHost::new())))
    }

    pub fn advance(&self, dt: f64) {
        self.0.lock().unwrap().advance(dt);
    }

    pub fn advance_extruder(&self, dx: f64) {
        self.0.lock().unwrap().advance_extruder(dx);
    }

    pub fn set_extruder_position(&self, pos: f64) {
        self.0.lock().unwrap().set_extruder_position(pos);
    }

    pub fn is_paused(&self) -> bool {
        self.0.lock().unwrap().is_paused()
    }

    pub fn pauses(&self) -> Vec<String> {
        self.0.lock().unwrap().pauses.clone()
    }
}

impl Default for SharedHost {
    fn default() -> Self {
        Self::new()
    }
}

impl Host for SharedHost {
    fn now(&self) -> f64 {
        self.0.lock().unwrap().now()
    }

    fn register_timer(&mut self, period_s: f64) -> TimerHandle {
        self.0.lock().unwrap().register_timer(period_s)
    }

    fn extruder_position(&self, extruder: &str) -> f64 {
        self.0.lock().unwrap().extruder_position(extruder)
    }

    fn pause_print(&mut self, reason: &str) {
        self.0.lock().unwrap().pause_print(reason)
    }

    fn respond(&mut self, message: &str) {
        self.0.lock().unwrap().respond(message)
    }

    fn register_gcode(&mut self, name: &str) {
        self.0.lock().unwrap().register_gcode(name)
    }
}

/// Tunable load/unload timing for [`SimMcuLink`]. Defaults confirm a load
/// or unload after a handful of polls with steadily advancing encoder
/// ticks; set `stall` to model a jam that never confirms, for C2 watchdog
/// tests.
#[derive(Debug, Clone, Copy)]
pub struct LoadProfile {
    pub confirm_after_polls: u32,
    pub ticks_per_poll: i32,
    pub settled_pressure: f32,
    pub stall: bool,
}

impl Default for LoadProfile {
    fn default() -> Self {
        Self {
            confirm_after_polls: 3,
            ticks_per_poll: 20,
            settled_pressure: 0.9,
            stall: false,
        }
    }
}

/// A scriptable single-feeder MCU fake. Models the handful of behaviors
/// the coordinator actually depends on: follower motion advances the
/// encoder, `Load`/`Unload` confirm after `profile.confirm_after_polls`
/// polls unless `profile.stall` is set, and an injected error event can be
/// queued to exercise the ERROR-state path.
pub struct SimMcuLink {
    pub sent: Vec<McuCommand>,
    status: HardwareStatus,
    filament_present: [bool; 4],
    hub_present: [bool; 4],
    pressure: f32,
    encoder: i32,
    follower_enabled: bool,
    direction: Direction,
    pending: Option<PendingOp>,
    profile: LoadProfile,
    injected: VecDeque<McuEvent>,
}

enum PendingOp {
    Load { bay: u8, polls: u32 },
    Unload { polls: u32 },
}

impl SimMcuLink {
    pub fn new(profile: LoadProfile) -> Self {
        Self {
            sent: Vec::new(),
            status: HardwareStatus::Stopped,
            filament_present: [false; 4],
            hub_present: [false; 4],
            pressure: 0.0,
            encoder: 0,
            follower_enabled: false,
            direction: Direction::Forward,
            pending: None,
            profile,
            injected: VecDeque::new(),
        }
    }

    /// Mark a bay's filament sensor as present, as if a spool were loaded
    /// into it by hand.
    pub fn spool_present(&mut self, bay: u8) {
        self.filament_present[bay as usize] = true;
    }

    /// Clear a bay's filament sensor, as if its spool ran out - the hub
    /// sensor (whether a spool is mechanically docked) is untouched, since
    /// running dry and being physically unloaded are different events.
    pub fn runout(&mut self, bay: u8) {
        self.filament_present[bay as usize] = false;
    }

    /// Force the pressure reading, as if the exhausted spool's bowden
    /// segment had drained.
    pub fn set_pressure(&mut self, pressure: f32) {
        self.pressure = pressure;
    }

    /// Queue an out-of-band event (e.g. `McuEvent::Error`) to be returned
    /// on the next `poll_events`.
    pub fn inject(&mut self, event: McuEvent) {
        self.injected.push_back(event);
    }
}

#[async_trait]
impl McuLink for SimMcuLink {
    async fn send(&mut self, command: McuCommand) -> Result<(), AmsError> {
        match &command {
            McuCommand::Load { bay } => {
                self.status = HardwareStatus::Loading;
                self.pending = Some(PendingOp::Load { bay: *bay, polls: 0 });
            }
            McuCommand::Unload => {
                self.status = HardwareStatus::Unloading;
                self.pending = Some(PendingOp::Unload { polls: 0 });
            }
            McuCommand::Follower { enable, direction } => {
                self.follower_enabled = *enable;
                self.direction = *direction;
                self.status = if !enable {
                    HardwareStatus::Stopped
                } else if *direction == Direction::Forward {
                    HardwareStatus::Forward
                } else {
                    HardwareStatus::Reverse
                };
            }
            McuCommand::Stop => {
                self.follower_enabled = false;
                self.status = HardwareStatus::Stopped;
            }
            McuCommand::Query => {}
        }
        self.sent.push(command);
        Ok(())
    }

    async fn poll_events(&mut self) -> Vec<McuEvent> {
        let mut out = Vec::new();

        if self.follower_enabled {
            let sign = if self.direction == Direction::Forward { 1 } else { -1 };
            self.encoder = self.encoder.wrapping_add(sign * self.profile.ticks_per_poll);
        }

        match &mut self.pending {
            Some(PendingOp::Load { bay, polls }) => {
                *polls += 1;
                if !self.profile.stall && *polls >= self.profile.confirm_after_polls {
                    let bay = *bay;
                    self.hub_present[bay as usize] = true;
                    self.pressure = self.profile.settled_pressure;
                    self.encoder = self.encoder.wrapping_add(self.profile.ticks_per_poll);
                    self.status = HardwareStatus::Stopped;
                    self.pending = None;
                    out.push(McuEvent::Loaded(bay));
                } else {
                    self.encoder = self.encoder.wrapping_add(self.profile.ticks_per_poll / 2);
                }
            }
            Some(PendingOp::Unload { polls }) => {
                *polls += 1;
                if !self.profile.stall && *polls >= self.profile.confirm_after_polls {
                    self.hub_present = [false; 4];
                    self.pressure = 0.0;
                    self.status = HardwareStatus::Stopped;
                    self.pending = None;
                    out.push(McuEvent::Unloaded);
                } else {
                    self.encoder = self.encoder.wrapping_add(self.profile.ticks_per_poll / 2);
                }
            }
            None => {}
        }

        out.push(McuEvent::Telemetry(Telemetry {
            pressure: self.pressure,
            encoder: self.encoder,
            filament_present: self.filament_present,
            hub_present: self.hub_present,
            status: self.status,
        }));

        while let Some(ev) = self.injected.pop_front() {
            out.push(ev);
        }

        out
    }
}

/// A cloneable handle onto a [`SimMcuLink`], so a test can hand a feeder
/// driver a `Box<dyn McuLink>` and still script runouts/pressure after the
/// driver owns it. Needs `tokio::sync::Mutex` rather than
/// `std::sync::Mutex`: the `McuLink` methods are `async_trait`-boxed, so
/// the guard from the nested call is held across an `.await`, and only
/// tokio's guard is `Send`.
#[derive(Clone)]
pub struct SharedSimLink(Arc<AsyncMutex<SimMcuLink>>);

impl SharedSimLink {
    pub fn new(profile: LoadProfile) -> Self {
        Self(Arc::new(AsyncMutex::new(SimMcuLink::new(profile))))
    }

    pub async fn spool_present(&self, bay: u8) {
        self.0.lock().await.spool_present(bay);
    }

    pub async fn runout(&self, bay: u8) {
        self.0.lock().await.runout(bay);
    }

    pub async fn set_pressure(&self, pressure: f32) {
        self.0.lock().await.set_pressure(pressure);
    }

    pub async fn inject(&self, event: McuEvent) {
        self.0.lock().await.inject(event);
    }
}

#[async_trait]
impl McuLink for SharedSimLink {
    async fn send(&mut self, command: McuCommand) -> Result<(), AmsError> {
        self.0.lock().await.send(command).await
    }

    async fn poll_events(&mut self) -> Vec<McuEvent> {
        self.0.lock().await.poll_events().await
    }
}
