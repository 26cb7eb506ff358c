// src/runout.rs - C5: runout detection and lane-group failover (spec §4.5)

/// C5's own state set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunoutState {
    Stopped,
    Monitoring,
    Detected,
    Coasting,
    Reloading,
    Paused,
}

/// Action the coordinator must take in response to a `tick()` call.
#[derive(Debug, Clone, PartialEq)]
pub enum RunoutAction {
    None,
    /// Extruder has coasted `pause_distance` past the runout edge; stop the
    /// follower on the exhausted feeder so it cannot keep driving air.
    StopFollower { feeder: String },
    /// Bowden is clear and `coast_distance` has elapsed; begin loading the
    /// backup member selected when coasting started.
    BeginReload { feeder: String, bay: u8 },
    /// The backup member finished loading; it is now the group's active
    /// member and printing may continue unattended. `retired` names the
    /// exhausted feeder the coordinator should unload, so the lane
    /// group's "currently loaded" snapshot resolves to the new member
    /// instead of still matching the empty one.
    ResumeWithActive { feeder: String, bay: u8, retired: Option<String> },
    Pause { reason: String },
}

/// C5. One instance per lane group. Watches the active member's filament
/// sensor for a runout edge, stops the follower once the extruder has
/// coasted `pause_distance` past the edge, then - once the bowden has
/// cleared and a further `coast_distance` has elapsed - re-evaluates the
/// backup pick and either begins its load or pauses if none is available.
pub struct RunoutHandler {
    lane: String,
    pause_distance: f64,
    coast_distance: f64,
    state: RunoutState,
    trigger_extruder_pos: f64,
    exhausted_feeder: Option<String>,
    candidate: Option<(String, u8)>,
}

impl RunoutHandler {
    pub fn new(lane: impl Into<String>, pause_distance: f64, coast_distance: f64) -> Self {
        Self {
            lane: lane.into(),
            pause_distance,
            coast_distance,
            state: RunoutState::Stopped,
            trigger_extruder_pos: 0.0,
            exhausted_feeder: None,
            candidate: None,
        }
    }

    pub fn state(&self) -> RunoutState {
        self.state
    }

    pub fn start(&mut self) {
        self.state = RunoutState::Monitoring;
    }

    pub fn stop(&mut self) {
        self.state = RunoutState::Stopped;
        self.candidate = None;
        self.exhausted_feeder = None;
    }

    /// Advance the runout handler by one coordinator tick.
    ///
    /// - `active_feeder`: the lane group's currently loaded feeder, used to
    ///   name the `StopFollower` target.
    /// - `filament_present`: the active member's filament sensor.
    /// - `bowden_clear`: whether the exhausted feeder's bowden segment has
    ///   been empty for `bowden_clear_grace_s` (spec §9 resolved open
    ///   question); only consulted while `Coasting`.
    /// - `pick_backup`: called while `Detected` (tentative pick, to decide
    ///   whether coasting is even worth starting) and again while
    ///   `Coasting` once `coast_distance` has elapsed (authoritative pick,
    ///   since a bay may have become ready or unready in the meantime).
    /// - `reload_outcome`: `None` while the backup's load is still in
    ///   flight, `Some(true)`/`Some(false)` once it resolves.
    pub fn tick<F>(
        &mut self,
        extruder_pos: f64,
        filament_present: bool,
        bowden_clear: bool,
        mut pick_backup: F,
        reload_outcome: Option<bool>,
    ) -> RunoutAction
    where
        F: FnMut() -> Option<(String, u8)>,
    {
        match self.state {
            RunoutState::Stopped | RunoutState::Paused => RunoutAction::None,
            RunoutState::Monitoring => {
                if !filament_present {
                    self.state = RunoutState::Detected;
                    self.trigger_extruder_pos = extruder_pos;
                }
                RunoutAction::None
            }
            RunoutState::Detected => {
                if extruder_pos - self.trigger_extruder_pos < self.pause_distance {
                    return RunoutAction::None;
                }
                self.candidate = pick_backup();
                self.state = RunoutState::Coasting;
                match self.exhausted_feeder.clone() {
                    Some(feeder) => RunoutAction::StopFollower { feeder },
                    None => RunoutAction::None,
                }
            }
            RunoutState::Coasting => {
                if extruder_pos - self.trigger_extruder_pos < self.coast_distance || !bowden_clear {
                    return RunoutAction::None;
                }
                // authoritative re-evaluation: the tentative pick made on
                // entering Coasting may no longer be the right answer.
                self.candidate = pick_backup();
                match self.candidate.clone() {
                    Some((feeder, bay)) => {
                        self.state = RunoutState::Reloading;
                        RunoutAction::BeginReload { feeder, bay }
                    }
                    None => {
                        self.state = RunoutState::Paused;
                        RunoutAction::Pause {
                            reason: format!("no runout backup available for lane {}", self.lane),
                        }
                    }
                }
            }
            RunoutState::Reloading => match reload_outcome {
                Some(true) => {
                    let (feeder, bay) = self.candidate.take().expect("candidate set on entering Reloading");
                    let retired = self.exhausted_feeder.replace(feeder.clone());
                    self.state = RunoutState::Monitoring;
                    RunoutAction::ResumeWithActive { feeder, bay, retired }
                }
                Some(false) => {
                    self.state = RunoutState::Paused;
                    RunoutAction::Pause {
                        reason: format!("backup reload failed on lane {}", self.lane),
                    }
                }
                None => RunoutAction::None,
            },
        }
    }

    /// Record which feeder is currently the lane's active member, so a
    /// later `StopFollower` action can name it. Call whenever the active
    /// member changes (print start, or after a completed reload).
    pub fn set_exhausted_candidate(&mut self, feeder: impl Into<String>) {
        self.exhausted_feeder = Some(feeder.into());
    }
}
