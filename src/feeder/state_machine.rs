// src/feeder/state_machine.rs - C2: load/unload watchdog and exponential retry
use super::{FeederDriver, FeederEvent, TicketKind};
use crate::config::FeederConfig;
use crate::error::AmsError;
use crate::ring::RingBuffer;

/// C2's own state set (spec §4.2). `Idle`/`DoneOk`/`DoneFail` are terminal
/// with respect to a single operation; the coordinator removes a state
/// machine from its active set once it observes `DoneOk`/`DoneFail`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpState {
    Idle,
    Attempting,
    ConfirmingLoad,
    StuckWait,
    DoneOk,
    DoneFail,
}

/// Outcome of one `tick()` call. `None` means the operation is still in
/// flight; `Some(_)` is reported exactly once, on the tick the operation
/// resolves.
pub type TickOutcome = Option<Result<(), AmsError>>;

const COAST_SAMPLE_WINDOW_S: f64 = 1.0; // spec §4.2 stuck_threshold

/// C2. Wraps a `FeederDriver`'s load/unload with a 250ms-sample motion
/// watchdog and exponential retry/backoff (spec §4.2).
pub struct FeederStateMachine {
    feeder: String,
    kind: TicketKind,
    cfg_retry_max: u32,
    cfg_backoff_base: f64,
    cfg_backoff_max: f64,
    cfg_min_progress: i64,
    cfg_overall_timeout: f64,
    cfg_pressure_upper: f32,
    cfg_pressure_grace: f64,
    cfg_auto_unload_on_failed_load: bool,

    state: OpState,
    attempt: u32,
    started_at: f64,
    op_issued_at: f64,
    confirming_since: f64,
    last_enc: Option<i32>,
    deltas: RingBuffer<i64>,
    tick_period_s: f64,
}

impl FeederStateMachine {
    /// Begin tracking a freshly-issued load/unload attempt. `now` is the
    /// time the first attempt was issued; `tick_period_s` is the
    /// coordinator's tick period (spec's `W = 250ms`), used to size the
    /// watchdog's sample window.
    pub fn begin(kind: TicketKind, config: &FeederConfig, now: f64, tick_period_s: f64) -> Self {
        let window_samples = ((COAST_SAMPLE_WINDOW_S / tick_period_s).round() as usize).max(1);
        let (retry_max, overall_timeout) = match kind {
            TicketKind::Load(_) => (config.load_retry_max, config.load_timeout_s),
            TicketKind::Unload => (config.unload_retry_max, config.unload_timeout_s),
        };
        Self {
            feeder: String::new(),
            kind,
            cfg_retry_max: retry_max,
            cfg_backoff_base: config.retry_backoff_base,
            cfg_backoff_max: config.retry_backoff_max,
            cfg_min_progress: config.min_progress_ticks,
            cfg_overall_timeout: overall_timeout,
            cfg_pressure_upper: config.pressure_upper,
            cfg_pressure_grace: config.load_pressure_grace_s,
            cfg_auto_unload_on_failed_load: config.auto_unload_on_failed_load,
            state: OpState::Attempting,
            attempt: 1,
            started_at: now,
            op_issued_at: now,
            confirming_since: now,
            last_enc: None,
            deltas: RingBuffer::new(window_samples),
            tick_period_s,
        }
    }

    pub fn with_feeder_name(mut self, name: impl Into<String>) -> Self {
        self.feeder = name.into();
        self
    }

    pub fn state(&self) -> OpState {
        self.state
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn kind(&self) -> TicketKind {
        self.kind
    }

    fn backoff(&self) -> f64 {
        (self.cfg_backoff_base * self.attempt as f64).min(self.cfg_backoff_max)
    }

    /// Advance by one coordinator tick. `events` are the `FeederEvent`s the
    /// coordinator harvested from this feeder during this tick's telemetry
    /// intake step.
    pub async fn tick(&mut self, now: f64, driver: &mut FeederDriver, events: &[FeederEvent]) -> TickOutcome {
        if now - self.started_at > self.cfg_overall_timeout {
            self.state = OpState::DoneFail;
            return Some(Err(AmsError::Timeout {
                feeder: self.feeder.clone(),
                op: self.op_name(),
            }));
        }

        match self.state {
            OpState::Idle | OpState::DoneOk | OpState::DoneFail => None,
            OpState::Attempting => self.tick_attempting(now, driver, events).await,
            OpState::ConfirmingLoad => self.tick_confirming(now, driver).await,
            OpState::StuckWait => self.tick_stuck_wait(now, driver).await,
        }
    }

    fn op_name(&self) -> &'static str {
        match self.kind {
            TicketKind::Load(_) => "load",
            TicketKind::Unload => "unload",
        }
    }

    async fn tick_attempting(
        &mut self,
        now: f64,
        driver: &mut FeederDriver,
        events: &[FeederEvent],
    ) -> TickOutcome {
        for ev in events {
            match (ev, self.kind) {
                (FeederEvent::Error(code), _) => {
                    self.state = OpState::DoneFail;
                    return Some(Err(AmsError::McuCommError {
                        feeder: self.feeder.clone(),
                        detail: format!("MCU error {code} during {}", self.op_name()),
                    }));
                }
                (FeederEvent::Loaded(bay), TicketKind::Load(expected)) if *bay == expected => {
                    if driver.snapshot().pressure > self.cfg_pressure_upper {
                        self.state = OpState::DoneOk;
                        return Some(Ok(()));
                    }
                    self.state = OpState::ConfirmingLoad;
                    self.confirming_since = now;
                    return None;
                }
                (FeederEvent::Unloaded, TicketKind::Unload) => {
                    self.state = OpState::DoneOk;
                    return Some(Ok(()));
                }
                _ => {}
            }
        }

        // No resolving event yet: sample the watchdog.
        let enc = driver.snapshot().encoder;
        if let Some(prev) = self.last_enc {
            let delta = (enc.wrapping_sub(prev)) as i64;
            self.deltas.push(delta.abs());
        }
        self.last_enc = Some(enc);

        if self.deltas.len() >= self.deltas_capacity_reached() {
            let progress: i64 = self.deltas.iter().sum();
            if progress < self.cfg_min_progress {
                return self.fail_attempt(now, driver, "stuck: insufficient encoder motion").await;
            }
        }
        None
    }

    fn deltas_capacity_reached(&self) -> usize {
        ((COAST_SAMPLE_WINDOW_S / self.tick_period_s).round() as usize).max(1)
    }

    async fn tick_confirming(&mut self, now: f64, driver: &mut FeederDriver) -> TickOutcome {
        if driver.snapshot().pressure > self.cfg_pressure_upper {
            self.state = OpState::DoneOk;
            return Some(Ok(()));
        }
        if now - self.confirming_since > self.cfg_pressure_grace {
            return self
                .fail_attempt(now, driver, "pressure did not cross upper threshold in time")
                .await;
        }
        None
    }

    async fn tick_stuck_wait(&mut self, now: f64, driver: &mut FeederDriver) -> TickOutcome {
        if now < self.op_issued_at {
            return None;
        }
        // reissue
        let reissue = match self.kind {
            TicketKind::Load(bay) => driver.load_bay(bay).await,
            TicketKind::Unload => driver.unload().await,
        };
        match reissue {
            Ok(()) => {
                self.state = OpState::Attempting;
                self.last_enc = None;
                self.deltas.clear();
                None
            }
            Err(e) => {
                self.state = OpState::DoneFail;
                Some(Err(e))
            }
        }
    }

    async fn fail_attempt(&mut self, now: f64, driver: &mut FeederDriver, reason: &str) -> TickOutcome {
        let _ = driver.stop().await;

        if let TicketKind::Load(bay) = self.kind {
            if self.cfg_auto_unload_on_failed_load && driver.snapshot().hub_present[bay as usize] {
                tracing::warn!(feeder = %self.feeder, bay, "load partially advanced, backing out before retry");
                let _ = driver.unload().await;
            }
        }

        if self.attempt >= self.cfg_retry_max {
            self.state = OpState::DoneFail;
            return Some(Err(match self.kind {
                TicketKind::Load(bay) => AmsError::LoadFailed {
                    feeder: self.feeder.clone(),
                    bay,
                    attempts: self.attempt,
                    reason: reason.to_string(),
                },
                TicketKind::Unload => AmsError::UnloadFailed {
                    feeder: self.feeder.clone(),
                    attempts: self.attempt,
                    reason: reason.to_string(),
                },
            }));
        }

        // Backoff for *this* retry is keyed to the attempt that just failed,
        // not the one about to start - `attempt` still holds that value here.
        let delay = self.backoff();
        self.attempt += 1;
        self.op_issued_at = now + delay;
        self.state = OpState::StuckWait;
        tracing::info!(
            feeder = %self.feeder,
            attempt = self.attempt,
            delay_s = delay,
            "retrying after {}",
            reason
        );
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeder::FeederDriver;
    use crate::mcu::{HardwareStatus, McuCommand, McuEvent, McuLink, Telemetry};
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    struct ScriptedLink {
        events: Mutex<VecDeque<McuEvent>>,
    }
    impl ScriptedLink {
        fn new() -> Self {
            Self {
                events: Mutex::new(VecDeque::new()),
            }
        }
        fn push(&self, ev: McuEvent) {
            self.events.lock().unwrap().push_back(ev);
        }
    }
    #[async_trait]
    impl McuLink for ScriptedLink {
        async fn send(&mut self, _command: McuCommand) -> Result<(), AmsError> {
            Ok(())
        }
        async fn poll_events(&mut self) -> Vec<McuEvent> {
            self.events.lock().unwrap().drain(..).collect()
        }
    }

    fn test_config() -> FeederConfig {
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

    #[tokio::test]
    async fn stuck_then_retry_succeeds() {
        let link = ScriptedLink::new();
        let cfg = test_config();
        let mut driver = FeederDriver::new("A", cfg.clone(), Box::new(link));
        driver
            .poll()
            .await;
        let mut sm = FeederStateMachine::begin(TicketKind::Load(1), &cfg, 0.0, 0.25).with_feeder_name("A");

        // encoder never moves for 1s (4 ticks) -> declared stuck, enters StuckWait
        let mut now = 0.0;
        for _ in 0..4 {
            now += 0.25;
            let out = sm.tick(now, &mut driver, &[]).await;
            assert!(out.is_none());
        }
        assert_eq!(sm.state(), OpState::StuckWait);
        assert_eq!(sm.attempt(), 2);

        // advance past the backoff deadline, reissue happens
        now += 1.1;
        let out = sm.tick(now, &mut driver, &[]).await;
        assert!(out.is_none());
        assert_eq!(sm.state(), OpState::Attempting);

        // MCU confirms loaded with pressure already above threshold
        driver.poll().await;
        // simulate pressure crossing via a synthetic successful resolution
        let out = sm
            .tick(now + 0.25, &mut driver, &[FeederEvent::Loaded(1)])
            .await;
        // pressure is still 0.0 in this fake, so it should move to ConfirmingLoad
        assert!(out.is_none());
        assert_eq!(sm.state(), OpState::ConfirmingLoad);
    }

    #[tokio::test]
    async fn exhausts_retries_with_monotone_backoff() {
        let link = ScriptedLink::new();
        let cfg = test_config();
        let mut driver = FeederDriver::new("A", cfg.clone(), Box::new(link));
        driver.poll().await;
        let mut sm = FeederStateMachine::begin(TicketKind::Load(1), &cfg, 0.0, 0.25).with_feeder_name("A");

        // retry_backoff_base = 1.0, so the first stuck retry waits base x 1
        // (the attempt that just failed, not the one about to start) and the
        // second waits base x 2. These are asserted as literal seconds, not
        // derived from `backoff()` itself, so an off-by-one in that ordering
        // fails this test instead of hiding behind it.
        let expected_delays = [1.0, 2.0];
        let mut now = 0.0;
        let mut delays = Vec::new();
        loop {
            now += 0.25;
            let out = sm.tick(now, &mut driver, &[]).await;
            if let Some(result) = out {
                assert!(result.is_err());
                break;
            }
            if sm.state() == OpState::StuckWait {
                let before = now;
                let expected = expected_delays[delays.len()];
                now = before + expected;
                delays.push(expected);
                let out2 = sm.tick(now, &mut driver, &[]).await;
                assert!(out2.is_none());
                assert_eq!(sm.state(), OpState::Attempting);
            }
        }
        assert_eq!(delays, expected_delays);
    }
}
