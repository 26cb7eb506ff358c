// src/coordinator.rs - C7: the single-threaded control loop tying C1-C6 together (spec §4.7, §5)
use std::collections::{HashMap, VecDeque};

use crate::clog::ClogDetector;
use crate::command::{parse_gcode, Command, CommandAck, CommandOutcome, Origin, PendingCommand, TicketId};
use crate::config::Config;
use crate::error::AmsError;
use crate::feeder::state_machine::FeederStateMachine;
use crate::feeder::{FeederDriver, TicketKind};
use crate::host::Host;
use crate::lane_group::LaneGroup;
use crate::mcu::{Direction, HardwareStatus};
use crate::ps::PressureSensor;
use crate::runout::{RunoutAction, RunoutHandler};

/// C7. Owns every feeder, pressure sensor, lane group, and per-lane runout
/// handler directly behind `&mut self`, rather than the `Arc<RwLock<_>>`
/// sharing independently-spawned subsystems would need, since nothing
/// here runs off the main tick.
pub struct Coordinator {
    config: Config,
    host: Box<dyn Host>,
    tick_period_s: f64,

    feeders: HashMap<String, FeederDriver>,
    active_ops: HashMap<String, FeederStateMachine>,
    pressure_sensors: HashMap<String, PressureSensor>,
    lane_groups: HashMap<String, LaneGroup>,
    runout_handlers: HashMap<String, RunoutHandler>,
    runout_overrides: HashMap<String, (String, u8)>,
    clog_detectors: HashMap<String, ClogDetector>,
    coast_clear_since: HashMap<String, f64>,

    pending: HashMap<TicketId, PendingCommand>,
    runout_pending: HashMap<String, TicketId>,
    completed: VecDeque<(TicketId, CommandOutcome)>,
    next_ticket: u64,
}

impl Coordinator {
    pub fn new(
        config: Config,
        host: Box<dyn Host>,
        feeders: HashMap<String, FeederDriver>,
        tick_period_s: f64,
    ) -> Result<Self, crate::config::ConfigError> {
        let mut lane_groups = HashMap::new();
        let mut runout_handlers = HashMap::new();
        for (name, cfg) in &config.lane_group {
            let group = LaneGroup::from_config(name.clone(), cfg)?;
            runout_handlers.insert(
                name.clone(),
                RunoutHandler::new(name.clone(), config.manager.runout_pause_distance, config.manager.reload_before_toolhead_distance),
            );
            lane_groups.insert(name.clone(), group);
        }

        let pressure_sensors = config
            .pressure_sensor
            .iter()
            .map(|(name, cfg)| (name.clone(), PressureSensor::new(name.clone(), cfg.clone())))
            .collect();

        Ok(Self {
            config,
            host,
            tick_period_s,
            feeders,
            active_ops: HashMap::new(),
            pressure_sensors,
            lane_groups,
            runout_handlers,
            runout_overrides: HashMap::new(),
            clog_detectors: HashMap::new(),
            coast_clear_since: HashMap::new(),
            pending: HashMap::new(),
            runout_pending: HashMap::new(),
            completed: VecDeque::new(),
            next_ticket: 0,
        })
    }

    /// Start a lane group's runout watcher with `feeder` as the member
    /// loaded at print start. Call once per group, after whichever member
    /// was manually loaded.
    pub fn activate_lane_group(&mut self, lane: &str, feeder: &str, bay: u8) {
        if let Some(handler) = self.runout_handlers.get_mut(lane) {
            handler.start();
            handler.set_exhausted_candidate(feeder);
        }
        if let Some(det) = self.clog_detectors.get_mut(feeder) {
            det.reset();
        } else {
            self.clog_detectors.insert(
                feeder.to_string(),
                ClogDetector::new(
                    self.config.manager.clog_sensitivity.window_mm(),
                    self.config.manager.clog_alpha,
                    self.feeders.get(feeder).map(|f| f.config().ticks_per_mm).unwrap_or(40.0),
                ),
            );
        }
        let _ = bay;
    }

    fn take_ticket(&mut self) -> TicketId {
        let id = TicketId(self.next_ticket);
        self.next_ticket += 1;
        id
    }

    /// Issue a parsed command. Returns a result decidable this tick, or a
    /// ticket whose resolution will arrive via `take_completed`.
    pub async fn issue(&mut self, command: Command, origin: Origin) -> CommandAck {
        match command {
            Command::LoadBay { feeder, bay } => self.issue_load(&feeder, bay, origin).await,
            Command::Unload { feeder } => self.issue_unload(&feeder, origin).await,
            Command::SetFollower { feeder, enable, direction } => self.issue_set_follower(&feeder, enable, direction).await,
            Command::Status { feeder } => CommandAck::Done(CommandOutcome::Status(self.status_report(feeder.as_deref()))),
            Command::Calibrate { kind } => self.issue_calibrate(&kind).await,
            Command::LoadSpool { fps, group, lane } => self.issue_load_spool(&fps, group.as_deref(), lane.as_deref(), origin).await,
            Command::UnloadSpool { fps } => self.issue_unload_spool(&fps, origin).await,
            Command::Follower { fps, enable, direction } => self.issue_follower_by_fps(&fps, enable, direction).await,
            Command::SetRunout { lane, member } => self.issue_set_runout(&lane, member),
        }
    }

    /// Parse and issue one gcode line (spec §6's `register_gcode` surface).
    pub async fn dispatch_gcode(&mut self, line: &str) -> CommandAck {
        match parse_gcode(line) {
            Ok(cmd) => self.issue(cmd, Origin::Operator).await,
            Err(e) => CommandAck::Done(CommandOutcome::LoadFailed(e)),
        }
    }

    async fn issue_load(&mut self, feeder: &str, bay: u8, origin: Origin) -> CommandAck {
        let Some(driver) = self.feeders.get_mut(feeder) else {
            return CommandAck::Done(CommandOutcome::LoadFailed(AmsError::UnknownName(feeder.to_string())));
        };
        if driver.is_busy() {
            return CommandAck::Done(CommandOutcome::Busy);
        }
        if !driver.is_bay_ready(bay) {
            return CommandAck::Done(CommandOutcome::NotReady);
        }
        if let Err(e) = driver.load_bay(bay).await {
            return CommandAck::Done(CommandOutcome::LoadFailed(e));
        }
        let now = self.host.now();
        let sm = FeederStateMachine::begin(TicketKind::Load(bay), driver.config(), now, self.tick_period_s)
            .with_feeder_name(feeder);
        self.active_ops.insert(feeder.to_string(), sm);
        let ticket = self.take_ticket();
        self.pending.insert(
            ticket,
            PendingCommand {
                ticket,
                feeder: feeder.to_string(),
                origin,
            },
        );
        CommandAck::Accepted(ticket)
    }

    async fn issue_unload(&mut self, feeder: &str, origin: Origin) -> CommandAck {
        let Some(driver) = self.feeders.get_mut(feeder) else {
            return CommandAck::Done(CommandOutcome::UnloadFailed(AmsError::UnknownName(feeder.to_string())));
        };
        if driver.is_busy() {
            return CommandAck::Done(CommandOutcome::Busy);
        }
        if let Err(e) = driver.unload().await {
            return CommandAck::Done(CommandOutcome::UnloadFailed(e));
        }
        let now = self.host.now();
        let sm = FeederStateMachine::begin(TicketKind::Unload, driver.config(), now, self.tick_period_s)
            .with_feeder_name(feeder);
        self.active_ops.insert(feeder.to_string(), sm);
        let ticket = self.take_ticket();
        self.pending.insert(
            ticket,
            PendingCommand {
                ticket,
                feeder: feeder.to_string(),
                origin,
            },
        );
        CommandAck::Accepted(ticket)
    }

    async fn issue_set_follower(&mut self, feeder: &str, enable: bool, direction: Direction) -> CommandAck {
        let Some(driver) = self.feeders.get_mut(feeder) else {
            return CommandAck::Done(CommandOutcome::LoadFailed(AmsError::UnknownName(feeder.to_string())));
        };
        match driver.set_follower(enable, direction).await {
            Ok(()) => CommandAck::Done(CommandOutcome::Ok),
            Err(e) => CommandAck::Done(CommandOutcome::LoadFailed(e)),
        }
    }

    /// Resolve `OAMS_LOAD_SPOOL FPS=name GROUP=name? LANE=name?` to a
    /// concrete `(feeder, bay)` via the named lane group's next-available
    /// member (spec §4.4), then delegate to `issue_load`.
    async fn issue_load_spool(&mut self, fps: &str, group: Option<&str>, lane: Option<&str>, origin: Origin) -> CommandAck {
        if !self.pressure_sensors.contains_key(fps) {
            return CommandAck::Done(CommandOutcome::LoadFailed(AmsError::UnknownName(fps.to_string())));
        }
        let Some(target) = group.or(lane) else {
            return CommandAck::Done(CommandOutcome::NotReady);
        };
        let pick = {
            let Some(lane_group) = self.lane_groups.get(target) else {
                return CommandAck::Done(CommandOutcome::LoadFailed(AmsError::UnknownName(target.to_string())));
            };
            let feeders = &self.feeders;
            lane_group
                .get_next_available(|m| feeders.get(&m.0).map(|d| d.is_bay_ready(m.1)).unwrap_or(false))
                .cloned()
        };
        match pick {
            Some((feeder, bay)) => self.issue_load(&feeder, bay, origin).await,
            None => CommandAck::Done(CommandOutcome::NotReady),
        }
    }

    /// Resolve `OAMS_UNLOAD_SPOOL FPS=name` to whichever of the sensor's
    /// feeders currently has a spool loaded, then delegate to
    /// `issue_unload`.
    async fn issue_unload_spool(&mut self, fps: &str, origin: Origin) -> CommandAck {
        let Some(ps) = self.pressure_sensors.get(fps) else {
            return CommandAck::Done(CommandOutcome::UnloadFailed(AmsError::UnknownName(fps.to_string())));
        };
        let feeder = ps
            .feeders()
            .iter()
            .find(|f| self.feeders.get(f.as_str()).map(|d| d.snapshot().current_bay.is_some()).unwrap_or(false))
            .cloned();
        match feeder {
            Some(feeder) => self.issue_unload(&feeder, origin).await,
            None => CommandAck::Done(CommandOutcome::NotReady),
        }
    }

    /// Resolve `OAMS_FOLLOWER FPS=name ENABLE=.. DIRECTION=..` to whichever
    /// feeder is currently loaded under the sensor; `NOT_LOADED` if none.
    async fn issue_follower_by_fps(&mut self, fps: &str, enable: bool, direction: Direction) -> CommandAck {
        let Some(ps) = self.pressure_sensors.get(fps) else {
            return CommandAck::Done(CommandOutcome::LoadFailed(AmsError::UnknownName(fps.to_string())));
        };
        let feeder = ps
            .feeders()
            .iter()
            .find(|f| self.feeders.get(f.as_str()).map(|d| d.snapshot().current_bay.is_some()).unwrap_or(false))
            .cloned();
        let Some(feeder) = feeder else {
            return CommandAck::Done(CommandOutcome::NotLoaded);
        };
        self.issue_set_follower(&feeder, enable, direction).await
    }

    /// `SET_RUNOUT LANE=name RUNOUT=name|NONE`: stores or clears this
    /// lane's backup-selection override, consulted ahead of the lane
    /// group's own next-available rotation (spec §4.5's selection order).
    fn issue_set_runout(&mut self, lane: &str, member: Option<(String, u8)>) -> CommandAck {
        if !self.lane_groups.contains_key(lane) {
            return CommandAck::Done(CommandOutcome::Failed(AmsError::UnknownName(lane.to_string())));
        }
        match member {
            Some(m) => {
                self.runout_overrides.insert(lane.to_string(), m);
            }
            None => {
                self.runout_overrides.remove(lane);
            }
        }
        CommandAck::Done(CommandOutcome::Ok)
    }

    /// `OAMS_CALIBRATE_*` pass-through: the core does not implement the
    /// calibration routine itself (spec §1 keeps sensor tuning
    /// out-of-scope), but still recognizes the command family so a host
    /// script can drive its own calibration sequence.
    async fn issue_calibrate(&mut self, kind: &str) -> CommandAck {
        tracing::info!(kind, "calibration pass-through requested");
        CommandAck::Done(CommandOutcome::Ok)
    }

    fn status_report(&self, feeder: Option<&str>) -> String {
        match feeder {
            Some(name) => match self.feeders.get(name) {
                Some(d) => format!("{:?}", d.snapshot()),
                None => format!("unknown feeder {name}"),
            },
            None => self
                .feeders
                .values()
                .map(|d| format!("{:?}", d.snapshot()))
                .collect::<Vec<_>>()
                .join("; "),
        }
    }

    /// Drain command resolutions accumulated since the last call.
    pub fn take_completed(&mut self) -> Vec<(TicketId, CommandOutcome)> {
        self.completed.drain(..).collect()
    }

    /// Run one full control cycle (spec §4.7's ordering: telemetry intake,
    /// state-machine advance, sensor fusion, clog check, runout handling).
    pub async fn tick(&mut self) {
        let now = self.host.now();

        let mut events_by_feeder = HashMap::new();
        for (name, driver) in self.feeders.iter_mut() {
            let events = driver.poll().await;
            events_by_feeder.insert(name.clone(), events);
        }

        let mut runout_reload_outcome: HashMap<String, bool> = HashMap::new();
        let active_feeder_names: Vec<String> = self.active_ops.keys().cloned().collect();
        for name in active_feeder_names {
            let events = events_by_feeder.get(&name).cloned().unwrap_or_default();
            let kind = self.active_ops.get(&name).map(|sm| sm.kind());
            let outcome = {
                let Some(driver) = self.feeders.get_mut(&name) else { continue };
                let Some(sm) = self.active_ops.get_mut(&name) else { continue };
                sm.tick(now, driver, &events).await
            };
            if let Some(result) = outcome {
                self.active_ops.remove(&name);
                let is_load = matches!(kind, Some(TicketKind::Load(_)));
                let bay = match kind {
                    Some(TicketKind::Load(bay)) => Some(bay),
                    _ => None,
                };
                self.resolve_feeder_op(&name, result, is_load, bay, &mut runout_reload_outcome);
            }
        }

        for ps in self.pressure_sensors.values_mut() {
            let Some(feeder_name) = ps.feeders().first().cloned() else { continue };
            let Some(driver) = self.feeders.get(&feeder_name) else { continue };
            let snap = driver.snapshot();
            let loading = driver.busy_kind().map(|k| matches!(k, TicketKind::Load(_))).unwrap_or(false);
            ps.observe(now, snap.pressure, snap.encoder, snap.current_bay.is_some(), loading);
        }

        // spec §4.6: clog checking is only active while the PS reports
        // LOADED and the bound feeder's follower is driving FORWARD.
        let loaded_feeders: Vec<(String, String, String)> = self
            .pressure_sensors
            .iter()
            .filter(|(_, ps)| ps.is_loaded())
            .filter_map(|(ps_name, ps)| ps.feeders().first().map(|f| (f.clone(), ps.config().extruder.clone(), ps_name.clone())))
            .filter(|(feeder, _, _)| {
                self.feeders
                    .get(feeder)
                    .map(|d| d.snapshot().hardware_status == HardwareStatus::Forward)
                    .unwrap_or(false)
            })
            .collect();
        for (feeder_name, extruder, ps_name) in loaded_feeders {
            let extruder_pos = self.host.extruder_position(&extruder);
            let Some(ps) = self.pressure_sensors.get(&ps_name) else { continue };
            let Some(encoder) = ps.latest_encoder() else { continue };
            if let Some(det) = self.clog_detectors.get_mut(&feeder_name) {
                if det.update(extruder_pos, encoder) {
                    tracing::warn!(
                        feeder = %feeder_name,
                        recent_motion = ps.recent_motion(self.tick_period_s * 4.0),
                        "clog detected"
                    );
                    self.host.pause_print(&format!("clog detected on feeder {feeder_name}"));
                }
            }
        }

        let lane_names: Vec<String> = self.lane_groups.keys().cloned().collect();
        for lane in lane_names {
            self.tick_runout(&lane, now, &runout_reload_outcome).await;
        }
    }

    fn resolve_feeder_op(
        &mut self,
        feeder: &str,
        result: Result<(), AmsError>,
        is_load: bool,
        bay: Option<u8>,
        runout_reload_outcome: &mut HashMap<String, bool>,
    ) {
        let Some(pending) = self.pending.iter().find(|(_, p)| p.feeder == feeder).map(|(k, _)| *k) else {
            return;
        };
        let Some(pending_cmd) = self.pending.remove(&pending) else { return };

        let outcome = match &result {
            Ok(()) => CommandOutcome::Ok,
            Err(e) if is_load => CommandOutcome::LoadFailed(e.clone()),
            Err(e) => CommandOutcome::UnloadFailed(e.clone()),
        };

        if let Origin::Runout { lane } = &pending_cmd.origin {
            runout_reload_outcome.insert(lane.clone(), result.is_ok());
            self.runout_pending.remove(lane);
        }

        // A runout-triggered reload's own MONITORING transition is driven by
        // `tick_runout`'s `ResumeWithActive` handling; only an operator-issued
        // load needs to start the lane's watcher and clog detector here.
        if result.is_ok() && is_load && matches!(pending_cmd.origin, Origin::Operator) {
            if let Some(bay) = bay {
                if let Some(lane) = self
                    .lane_groups
                    .iter()
                    .find(|(_, g)| g.members().iter().any(|m| m.0 == feeder && m.1 == bay))
                    .map(|(name, _)| name.clone())
                {
                    self.activate_lane_group(&lane, feeder, bay);
                }
            }
        }

        // An operator-issued unload retires the feeder from runout watching
        // entirely. The coordinator's own retire-unload of a just-replaced
        // exhausted member (issued from `ResumeWithActive`, tagged with the
        // lane's `Origin::Runout`) must NOT stop the handler here - it was
        // just set back to MONITORING, now watching the new active member.
        if !is_load && result.is_ok() && matches!(pending_cmd.origin, Origin::Operator) {
            if let Some(lane) = self
                .lane_groups
                .iter()
                .find(|(_, g)| g.members().iter().any(|m| m.0 == feeder))
                .map(|(name, _)| name.clone())
            {
                if let Some(handler) = self.runout_handlers.get_mut(&lane) {
                    handler.stop();
                }
            }
            if let Some(det) = self.clog_detectors.get_mut(feeder) {
                det.reset();
            }
        }

        if result.is_err() && !matches!(pending_cmd.origin, Origin::Operator) {
            self.host.pause_print(&format!("{feeder}: {}", result.as_ref().unwrap_err()));
        }

        self.host.respond(&format!("ticket {}: {:?}", pending_cmd.ticket.0, outcome));
        self.completed.push_back((pending_cmd.ticket, outcome));
    }

    async fn tick_runout(&mut self, lane: &str, now: f64, runout_reload_outcome: &HashMap<String, bool>) {
        let Some(active_member) = self
            .lane_groups
            .get(lane)
            .and_then(|g| g.get_loaded(|m| self.feeders.get(&m.0).map(|d| d.is_bay_loaded(m.1)).unwrap_or(false)))
            .cloned()
        else {
            return;
        };
        let (active_feeder, active_bay) = active_member;
        let _ = active_bay;
        let filament_present = self
            .feeders
            .get(&active_feeder)
            .map(|d| d.snapshot().filament_present[active_bay as usize])
            .unwrap_or(false);

        let grace = self.config.manager.bowden_clear_grace_s;
        let lower = self
            .feeders
            .get(&active_feeder)
            .map(|d| d.config().pressure_lower)
            .unwrap_or(0.0);
        let pressure = self.feeders.get(&active_feeder).map(|d| d.snapshot().pressure).unwrap_or(1.0);
        let bowden_clear = if pressure < lower {
            let since = *self.coast_clear_since.entry(lane.to_string()).or_insert(now);
            now - since >= grace
        } else {
            self.coast_clear_since.remove(lane);
            false
        };

        let reload_outcome = runout_reload_outcome.get(lane).copied();

        let override_member = self.runout_overrides.get(lane).cloned();
        let feeders_ref = &self.feeders;
        let lane_groups_ref = &self.lane_groups;
        let pick_backup = || -> Option<(String, u8)> {
            if let Some(m) = &override_member {
                if feeders_ref.get(&m.0).map(|d| d.is_bay_ready(m.1)).unwrap_or(false) {
                    return Some(m.clone());
                }
            }
            lane_groups_ref
                .get(lane)
                .and_then(|g| g.get_next_available(|m| feeders_ref.get(&m.0).map(|d| d.is_bay_ready(m.1)).unwrap_or(false)))
                .cloned()
        };

        let extruder = self
            .pressure_sensors
            .values()
            .find(|ps| ps.feeders().iter().any(|f| f == &active_feeder))
            .map(|ps| ps.config().extruder.clone());
        let extruder_pos = extruder.map(|e| self.host.extruder_position(&e)).unwrap_or(0.0);

        let action = {
            let Some(handler) = self.runout_handlers.get_mut(lane) else { return };
            handler.tick(extruder_pos, filament_present, bowden_clear, pick_backup, reload_outcome)
        };

        match action {
            RunoutAction::None => {}
            RunoutAction::StopFollower { feeder } => {
                if let Some(driver) = self.feeders.get_mut(&feeder) {
                    let _ = driver.stop().await;
                }
            }
            RunoutAction::BeginReload { feeder, bay } => {
                let ack = self.issue_load(&feeder, bay, Origin::Runout { lane: lane.to_string() }).await;
                if let CommandAck::Accepted(ticket) = ack {
                    self.runout_pending.insert(lane.to_string(), ticket);
                }
            }
            RunoutAction::ResumeWithActive { feeder, bay, retired } => {
                if let Some(handler) = self.runout_handlers.get_mut(lane) {
                    handler.set_exhausted_candidate(feeder.clone());
                }
                if let Some(det) = self.clog_detectors.get_mut(&feeder) {
                    det.reset();
                } else {
                    let ticks_per_mm = self.feeders.get(&feeder).map(|f| f.config().ticks_per_mm).unwrap_or(40.0);
                    self.clog_detectors.insert(
                        feeder,
                        ClogDetector::new(self.config.manager.clog_sensitivity.window_mm(), self.config.manager.clog_alpha, ticks_per_mm),
                    );
                }
                let _ = bay;
                // Retire the exhausted member so the lane group's "currently
                // loaded" snapshot resolves to the new active feeder instead
                // of still matching the empty one. Tagged with the lane's
                // own `Origin::Runout` (not `Operator`) so its resolution
                // doesn't re-stop the handler this action just restarted.
                if let Some(old) = retired {
                    if self.feeders.get(&old).map(|d| !d.is_busy()).unwrap_or(false) {
                        let _ = self.issue_unload(&old, Origin::Runout { lane: lane.to_string() }).await;
                    }
                }
            }
            RunoutAction::Pause { reason } => {
                self.host.pause_print(&reason);
            }
        }
    }

    /// Drive the coordinator forever at `tick_period_s` intervals. The
    /// owning binary calls this instead of spawning one task per
    /// subsystem, keeping everything on one cooperative loop.
    pub async fn run_forever(&mut self) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs_f64(self.tick_period_s));
        loop {
            interval.tick().await;
            self.tick().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FeederConfig, ManagerConfig, PressureSensorConfig};
    use crate::host::TimerHandle;
    use crate::mcu::{McuCommand, McuEvent, McuLink};
    use async_trait::async_trait;
    use std::collections::VecDeque as Deque;
    use std::sync::Mutex;

    struct FakeLink {
        queued: Mutex<Deque<McuEvent>>,
    }
    impl FakeLink {
        fn new() -> Self {
            Self { queued: Mutex::new(Deque::new()) }
        }
        fn push(&self, ev: McuEvent) {
            self.queued.lock().unwrap().push_back(ev);
        }
    }
    #[async_trait]
    impl McuLink for FakeLink {
        async fn send(&mut self, _command: McuCommand) -> Result<(), AmsError> {
            Ok(())
        }
        async fn poll_events(&mut self) -> Vec<McuEvent> {
            self.queued.lock().unwrap().drain(..).collect()
        }
    }

    struct FakeHost {
        t: f64,
        extruder_pos: f64,
        paused: Vec<String>,
        responses: Vec<String>,
    }
    impl Host for FakeHost {
        fn now(&self) -> f64 {
            self.t
        }
        fn register_timer(&mut self, _period_s: f64) -> TimerHandle {
            TimerHandle(0)
        }
        fn extruder_position(&self, _extruder: &str) -> f64 {
            self.extruder_pos
        }
        fn pause_print(&mut self, reason: &str) {
            self.paused.push(reason.to_string());
        }
        fn respond(&mut self, message: &str) {
            self.responses.push(message.to_string());
        }
        fn register_gcode(&mut self, _name: &str) {}
    }

    fn feeder_config() -> FeederConfig {
        FeederConfig {
            bay_count: 4,
            pressure_upper: 0.8,
            pressure_lower: 0.2,
            f1s_hes_on: [true; 4],
            hub_hes_on: [true; 4],
            load_retry_max: 3,
            unload_retry_max: 2,
            retry_backoff_base: 1.0,
            retry_backoff_max: 5.0,
            auto_unload_on_failed_load: true,
            min_progress_ticks: 4,
            load_timeout_s: 60.0,
            unload_timeout_s: 60.0,
            load_pressure_grace_s: 2.0,
            ticks_per_mm: 40.0,
        }
    }

    fn coordinator_with_one_feeder() -> Coordinator {
        let link = FakeLink::new();
        link.push(McuEvent::Telemetry(crate::mcu::Telemetry {
            pressure: 0.0,
            encoder: 0,
            filament_present: [true, false, false, false],
            hub_present: [false; 4],
            status: crate::mcu::HardwareStatus::Stopped,
        }));
        let mut feeders = HashMap::new();
        feeders.insert("A".to_string(), FeederDriver::new("A", feeder_config(), Box::new(link)));

        let mut config = Config::default();
        config.feeder.insert("A".to_string(), feeder_config());
        config.pressure_sensor.insert(
            "e".to_string(),
            PressureSensorConfig {
                pin: "ADC1".into(),
                extruder: "extruder".into(),
                feeders: vec!["A".into()],
            },
        );
        config.manager = ManagerConfig::default();

        let host = Box::new(FakeHost {
            t: 0.0,
            extruder_pos: 0.0,
            paused: Vec::new(),
            responses: Vec::new(),
        });

        Coordinator::new(config, host, feeders, 0.25).unwrap()
    }

    #[tokio::test]
    async fn load_bay_requests_accepted_and_resolves() {
        let mut coord = coordinator_with_one_feeder();
        coord.tick().await;

        let ack = coord
            .issue(
                Command::LoadBay {
                    feeder: "A".to_string(),
                    bay: 0,
                },
                Origin::Operator,
            )
            .await;
        assert!(matches!(ack, CommandAck::Accepted(_)));
        assert!(coord.feeders.get("A").unwrap().is_busy());
    }

    #[tokio::test]
    async fn unknown_feeder_is_rejected_synchronously() {
        let mut coord = coordinator_with_one_feeder();
        let ack = coord
            .issue(
                Command::LoadBay {
                    feeder: "ZZZ".to_string(),
                    bay: 0,
                },
                Origin::Operator,
            )
            .await;
        assert!(matches!(ack, CommandAck::Done(CommandOutcome::LoadFailed(_))));
    }

    #[tokio::test]
    async fn load_spool_resolves_via_lane_group_next_available() {
        let mut coord = coordinator_with_one_feeder();
        coord.lane_groups.insert("T0".to_string(), LaneGroup::new("T0", vec![("A".to_string(), 0)]));
        coord.tick().await;

        let ack = coord
            .issue(
                Command::LoadSpool {
                    fps: "e".to_string(),
                    group: Some("T0".to_string()),
                    lane: None,
                },
                Origin::Operator,
            )
            .await;
        assert!(matches!(ack, CommandAck::Accepted(_)));
    }

    #[tokio::test]
    async fn set_runout_rejects_unknown_lane() {
        let mut coord = coordinator_with_one_feeder();
        let ack = coord
            .issue(
                Command::SetRunout {
                    lane: "NOPE".to_string(),
                    member: None,
                },
                Origin::Operator,
            )
            .await;
        assert!(matches!(ack, CommandAck::Done(CommandOutcome::Failed(_))));
    }
}
