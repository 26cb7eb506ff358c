// src/clog.rs - C6: encoder-throughput clog detection (spec §4.6)
use crate::ring::RingBuffer;

/// An encoder tick rate far below what the commanded extrusion rate
/// predicts, sustained across one full sliding window, is a clog.
const CLOG_RATIO_THRESHOLD: f64 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClogState {
    Ok,
    Clogged,
}

struct Sample {
    distance_mm: f64,
    ratio: f64,
}

/// C6. One instance per active feeder. Compares encoder throughput against
/// the expected rate implied by extruder travel and the feeder's
/// calibrated `ticks_per_mm`, smoothed by an EWMA, over a sensitivity-sized
/// sliding window of extruder travel.
pub struct ClogDetector {
    window_mm: f64,
    alpha: f64,
    ticks_per_mm: f64,
    ewma_ratio: Option<f64>,
    window: RingBuffer<Sample>,
    accumulated_mm: f64,
    last_extruder_pos: Option<f64>,
    last_encoder: Option<i32>,
    state: ClogState,
}

impl ClogDetector {
    pub fn new(window_mm: f64, alpha: f64, ticks_per_mm: f64) -> Self {
        Self {
            window_mm,
            alpha,
            ticks_per_mm,
            ewma_ratio: None,
            window: RingBuffer::new(256),
            accumulated_mm: 0.0,
            last_extruder_pos: None,
            last_encoder: None,
            state: ClogState::Ok,
        }
    }

    pub fn state(&self) -> ClogState {
        self.state
    }

    pub fn reset(&mut self) {
        self.ewma_ratio = None;
        self.window.clear();
        self.accumulated_mm = 0.0;
        self.last_extruder_pos = None;
        self.last_encoder = None;
        self.state = ClogState::Ok;
    }

    /// Feed one tick's extruder position and feeder encoder reading.
    /// Returns `true` the tick a clog is newly detected.
    pub fn update(&mut self, extruder_pos: f64, encoder: i32) -> bool {
        let (prev_pos, prev_enc) = match (self.last_extruder_pos, self.last_encoder) {
            (Some(p), Some(e)) => (p, e),
            _ => {
                self.last_extruder_pos = Some(extruder_pos);
                self.last_encoder = Some(encoder);
                return false;
            }
        };
        self.last_extruder_pos = Some(extruder_pos);
        self.last_encoder = Some(encoder);

        let distance = extruder_pos - prev_pos;
        if distance <= 0.0 {
            return false;
        }
        let expected_ticks = distance * self.ticks_per_mm;
        let actual_ticks = (encoder.wrapping_sub(prev_enc) as i64).unsigned_abs() as f64;
        let ratio = if expected_ticks > 0.0 {
            (actual_ticks / expected_ticks).min(2.0)
        } else {
            1.0
        };

        self.ewma_ratio = Some(match self.ewma_ratio {
            Some(prev) => self.alpha * ratio + (1.0 - self.alpha) * prev,
            None => ratio,
        });

        self.window.push(Sample {
            distance_mm: distance,
            ratio: self.ewma_ratio.unwrap(),
        });
        self.accumulated_mm += distance;

        while self.accumulated_mm > self.window_mm {
            if let Some(front) = self.window.pop_front() {
                self.accumulated_mm -= front.distance_mm;
            } else {
                break;
            }
        }

        if self.accumulated_mm < self.window_mm {
            return false;
        }

        if self.state == ClogState::Clogged {
            // latched: only `reset()` (an unload/load cycle boundary) clears it.
            return false;
        }
        let sustained_low = self.window.iter().all(|s| s.ratio < CLOG_RATIO_THRESHOLD);
        if sustained_low {
            self.state = ClogState::Clogged;
            return true;
        }
        false
    }
}
