// src/host.rs - the host print-controller facade consumed by the Coordinator (spec §6, §9)
//
// Unlike `McuLink`, this surface is synchronous: in the real deployment it
// is a thin call into the host's own reactor object (time base, extruder
// kinematics, pause machinery), none of which blocks. Keeping it sync
// avoids threading a global `Rc<RefCell<_>>` printer object through the
// core - the Coordinator is simply handed a `Box<dyn Host>` at
// construction and never reaches for a global.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(pub u64);

pub trait Host: Send {
    /// Monotonic time base, seconds.
    fn now(&self) -> f64;

    /// Register a periodic wake-up. The core does not rely on this for its
    /// own tick (the owning binary drives `Coordinator::tick` directly) -
    /// it exists so gcode handlers registered via `register_gcode` can
    /// schedule follow-up work on the host's own reactor, per spec §6.
    fn register_timer(&mut self, period_s: f64) -> TimerHandle;

    /// Current extruder position in mm; monotone non-decreasing during a
    /// print (spec §6).
    fn extruder_position(&self, extruder: &str) -> f64;

    /// Pause the print and surface a reason to the operator.
    fn pause_print(&mut self, reason: &str);

    /// Surface a structured, asynchronous response to a previously issued
    /// command (spec §6's `respond(message)`; see DESIGN.md for why
    /// command resolution is reported this way rather than by blocking).
    fn respond(&mut self, message: &str);

    /// Register a gcode command name so the host's dispatcher knows to
    /// route it to `Coordinator::dispatch_gcode`.
    fn register_gcode(&mut self, name: &str);
}
