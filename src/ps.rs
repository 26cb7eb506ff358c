// src/ps.rs - C3: pressure-sensor load tracking (spec §4.3)
use crate::config::PressureSensorConfig;
use crate::ring::RingBuffer;

const ENCODER_HISTORY_LEN: usize = 16;

/// Encoder ticks below this net travel over a `recent_motion` window are
/// sensor jitter, not real feed motion.
const MOTION_NOISE_FLOOR_TICKS: i64 = 2;

/// C3's own state set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PsState {
    Unloaded,
    Loading,
    Loaded,
    Unloading,
}

/// C3. Tracks one pressure sensor's load state and a short encoder-delta
/// history used by the clog detector (C6) to compute throughput.
pub struct PressureSensor {
    name: String,
    config: PressureSensorConfig,
    state: PsState,
    pressure: f32,
    history: RingBuffer<(f64, i32)>,
}

impl PressureSensor {
    pub fn new(name: impl Into<String>, config: PressureSensorConfig) -> Self {
        Self {
            name: name.into(),
            config,
            state: PsState::Unloaded,
            pressure: 0.0,
            history: RingBuffer::new(ENCODER_HISTORY_LEN),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &PressureSensorConfig {
        &self.config
    }

    pub fn state(&self) -> PsState {
        self.state
    }

    pub fn pressure(&self) -> f32 {
        self.pressure
    }

    /// Record one active feeder's encoder reading at time `now`, driving
    /// the PS state machine from the feeder's pressure (spec §4.3: a
    /// pressure sensor transitions on the pressure of whichever feeder is
    /// currently assigned to it).
    pub fn observe(&mut self, now: f64, pressure: f32, encoder: i32, feeder_loaded: bool, feeder_loading: bool) {
        self.pressure = pressure;
        self.history.push((now, encoder));

        self.state = match self.state {
            PsState::Unloaded if feeder_loading => PsState::Loading,
            PsState::Loading if feeder_loaded => PsState::Loaded,
            PsState::Loading if !feeder_loading && !feeder_loaded => PsState::Unloaded,
            PsState::Loaded if !feeder_loaded && !feeder_loading => PsState::Unloading,
            PsState::Unloading if !feeder_loaded && !feeder_loading => PsState::Unloaded,
            other => other,
        };
    }

    /// True iff `encoder_ring` shows net travel greater than the noise
    /// floor within the trailing `window_s` seconds (spec §4.3). Used to
    /// gate motion-dependent checks - e.g. the coordinator skips a clog
    /// evaluation while a feeder shows no recent motion at all, rather
    /// than let a startup transient read as a divergent ratio.
    pub fn recent_motion(&self, window_s: f64) -> bool {
        let Some(&(latest_t, latest_e)) = self.history.iter().last() else {
            return false;
        };
        let Some(&(_, earliest_e)) = self.history.iter().find(|&&(t, _)| latest_t - t <= window_s) else {
            return false;
        };
        let net = (latest_e.wrapping_sub(earliest_e) as i64).unsigned_abs() as i64;
        net > MOTION_NOISE_FLOOR_TICKS
    }

    /// The most recent encoder reading this sensor's binding has observed,
    /// sourced from `encoder_ring` rather than a fresh driver poll - the
    /// clog detector (C6) reads the feeder's encoder through here so the
    /// two don't keep independent, possibly-skewed polls of the same MCU
    /// counter.
    pub fn latest_encoder(&self) -> Option<i32> {
        self.history.iter().last().map(|&(_, e)| e)
    }

    pub fn is_loaded(&self) -> bool {
        self.state == PsState::Loaded
    }

    pub fn feeders(&self) -> &[String] {
        &self.config.feeders
    }
}
