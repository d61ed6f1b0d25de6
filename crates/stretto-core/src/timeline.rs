//! Virtual musical timeline
//!
//! A wall-clock driven clock that advances at `tempo_ratio` times real
//! time and exposes bar/beat positions against a fixed reference tempo.
//! The timeline lives entirely in the control context; nothing here is
//! touched by the render thread.

use std::time::Instant;

/// Default reference tempo when no config overrides it
pub const DEFAULT_BASE_TEMPO_BPM: f64 = 120.0;

/// Default beats per bar (4/4)
pub const DEFAULT_BEATS_PER_BAR: u32 = 4;

/// Bar/beat/time snapshot for display
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimelinePosition {
    /// 1-based bar number
    pub bar: u64,
    /// 1-based beat within the bar
    pub beat: u32,
    /// Virtual musical seconds since start
    pub elapsed_seconds: f64,
}

/// Tempo-scaled virtual clock
///
/// While running, each tick adds `wall_clock_delta * tempo_ratio` to the
/// elapsed time. The first tick after `start()` only records its
/// timestamp, so a stale timestamp can never produce a jump.
pub struct Timeline {
    running: bool,
    elapsed_seconds: f64,
    base_tempo_bpm: f64,
    tempo_ratio: f64,
    beats_per_bar: u32,
    last_tick: Option<Instant>,
}

impl Timeline {
    pub fn new(base_tempo_bpm: f64, beats_per_bar: u32) -> Self {
        Self {
            running: false,
            elapsed_seconds: 0.0,
            base_tempo_bpm: if base_tempo_bpm > 0.0 {
                base_tempo_bpm
            } else {
                DEFAULT_BASE_TEMPO_BPM
            },
            tempo_ratio: 1.0,
            beats_per_bar: beats_per_bar.max(1),
            last_tick: None,
        }
    }

    /// Begin advancing from the next tick
    pub fn start(&mut self) {
        self.running = true;
        self.last_tick = None;
    }

    /// Halt and rewind to zero
    pub fn stop(&mut self) {
        self.running = false;
        self.elapsed_seconds = 0.0;
        self.last_tick = None;
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Advance the clock; call at the control tick rate (10-20 Hz)
    pub fn tick(&mut self, now: Instant) {
        if !self.running {
            return;
        }
        if let Some(last) = self.last_tick {
            let wall_delta = now.saturating_duration_since(last).as_secs_f64();
            self.elapsed_seconds += wall_delta * self.tempo_ratio;
        }
        self.last_tick = Some(now);
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed_seconds
    }

    /// Set the tempo scaling; non-positive or non-finite values fall back
    /// to 1.0 so the clock can never stall or run backwards
    pub fn set_tempo_ratio(&mut self, ratio: f64) {
        self.tempo_ratio = if ratio.is_finite() && ratio > 0.0 {
            ratio
        } else {
            1.0
        };
    }

    pub fn tempo_ratio(&self) -> f64 {
        self.tempo_ratio
    }

    pub fn base_tempo_bpm(&self) -> f64 {
        self.base_tempo_bpm
    }

    /// Effective tempo after scaling (the BPM readout)
    pub fn adjusted_tempo(&self) -> f64 {
        self.base_tempo_bpm * self.tempo_ratio
    }

    pub fn set_beats_per_bar(&mut self, beats: u32) {
        if beats > 0 {
            self.beats_per_bar = beats;
        }
    }

    pub fn beats_per_bar(&self) -> u32 {
        self.beats_per_bar
    }

    pub fn seconds_per_beat(&self) -> f64 {
        60.0 / self.base_tempo_bpm
    }

    pub fn seconds_per_bar(&self) -> f64 {
        self.seconds_per_beat() * self.beats_per_bar as f64
    }

    /// 1-based bar number at the current elapsed time
    pub fn bar(&self) -> u64 {
        (self.elapsed_seconds / self.seconds_per_bar()) as u64 + 1
    }

    /// 1-based beat within the current bar
    pub fn beat(&self) -> u32 {
        ((self.elapsed_seconds / self.seconds_per_beat()) as u64 % self.beats_per_bar as u64)
            as u32
            + 1
    }

    pub fn position(&self) -> TimelinePosition {
        TimelinePosition {
            bar: self.bar(),
            beat: self.beat(),
            elapsed_seconds: self.elapsed_seconds,
        }
    }

    #[cfg(test)]
    pub(crate) fn set_elapsed_for_test(&mut self, seconds: f64) {
        self.elapsed_seconds = seconds;
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new(DEFAULT_BASE_TEMPO_BPM, DEFAULT_BEATS_PER_BAR)
    }
}
