//! Stretch engine contract and the signalsmith-stretch implementation
//!
//! The engine is the external collaborator that performs the actual
//! pitch/time DSP. The adapter in [`super`] only ever talks to the
//! [`StretchEngine`] trait, which exposes a feed/poll/retrieve surface:
//! push raw frames in, ask how many stretched frames are ready, pull
//! exactly as many as needed.

use std::collections::VecDeque;

use signalsmith_stretch::Stretch;

use crate::types::{StereoSample, MAX_BUFFER_SIZE};

/// Formant handling under pitch shifts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FormantMode {
    /// Formants move with the pitch shift (chipmunk effect at high shifts)
    #[default]
    Shifted,
    /// Vocal timbre is kept stable while pitch moves
    Preserved,
}

/// Tonal content below this frequency keeps its character when formant
/// preservation is on; signalsmith expresses it relative to sample rate.
const FORMANT_TONALITY_HZ: f32 = 8000.0;

/// Output frames buffered beyond the adapter's watermark before the
/// engine would have to drop audio. Never reached in practice; the
/// adapter drains the queue every render call.
const QUEUE_CAPACITY: usize = 4 * MAX_BUFFER_SIZE;

/// Pitch/time-ratio DSP consumed by the stretch adapter
///
/// `process` accepts frames at the input tempo; stretched output
/// accumulates internally and is drained with `retrieve`. The engine
/// makes no promise about how much output any single `process` call
/// yields — callers poll `available` and iterate.
pub trait StretchEngine: Send {
    /// Initialize for a sample rate and channel count; must be called
    /// before any processing. Reconfiguring discards buffered output.
    fn configure(&mut self, sample_rate: u32, channels: u32);

    /// Set the linear pitch-scale factor (1.0 = unchanged)
    fn set_pitch_scale(&mut self, scale: f32);

    /// Set the time ratio (output duration / input duration, > 0)
    fn set_time_ratio(&mut self, ratio: f64);

    /// Switch between formant-preserved and formant-shifted modes
    fn set_formant(&mut self, mode: FormantMode);

    /// Feed input frames; `is_final` flushes the engine's tail
    fn process(&mut self, input: &[StereoSample], is_final: bool);

    /// Stretched frames ready for retrieval
    fn available(&self) -> usize;

    /// Move up to `out.len()` frames into `out`, returning the count
    fn retrieve(&mut self, out: &mut [StereoSample]) -> usize;

    /// Drop all internal state and buffered output
    fn reset(&mut self);
}

/// [`StretchEngine`] backed by signalsmith-stretch
///
/// signalsmith sizes its output per call (the in/out length ratio *is*
/// the stretch ratio), so this wrapper derives each call's output length
/// from the configured time ratio and queues the result, giving the
/// adapter the poll/retrieve surface it expects. A fractional-frame
/// accumulator keeps long runs from drifting off the exact ratio.
pub struct SignalsmithEngine {
    stretch: Option<Stretch>,
    sample_rate: u32,
    time_ratio: f64,
    pitch_scale: f32,
    formant: FormantMode,
    /// Stretched output awaiting retrieval
    queue: VecDeque<StereoSample>,
    /// Interleaved scratch for one process call
    scratch: Vec<f32>,
    /// Sub-frame remainder carried between process calls
    pending_frames: f64,
}

impl SignalsmithEngine {
    pub fn new() -> Self {
        Self {
            stretch: None,
            sample_rate: 0,
            time_ratio: 1.0,
            pitch_scale: 1.0,
            formant: FormantMode::Shifted,
            queue: VecDeque::new(),
            scratch: Vec::new(),
            pending_frames: 0.0,
        }
    }

    /// Re-apply pitch and formant settings to the live stretcher.
    ///
    /// signalsmith folds both into one transpose call: the tonality limit
    /// is its formant-preservation control, expressed relative to the
    /// sample rate.
    fn apply_transpose(&mut self) {
        let Some(stretch) = &mut self.stretch else {
            return;
        };
        let semitones = 12.0 * self.pitch_scale.log2();
        let tonality_limit = match self.formant {
            FormantMode::Preserved if self.sample_rate > 0 => {
                Some(FORMANT_TONALITY_HZ / self.sample_rate as f32)
            }
            _ => None,
        };
        stretch.set_transpose_factor_semitones(semitones, tonality_limit);
    }

    /// Run the stretcher over `input`, appending to the output queue.
    fn run(&mut self, input: &[StereoSample], out_frames: usize) {
        let Some(stretch) = &mut self.stretch else {
            return;
        };
        if out_frames == 0 {
            return;
        }
        self.scratch.resize(out_frames * 2, 0.0);
        self.scratch.fill(0.0);
        stretch.process(bytemuck::cast_slice(input), &mut self.scratch[..out_frames * 2]);

        debug_assert!(self.queue.len() + out_frames <= QUEUE_CAPACITY, "stretch output queue overrun");
        for frame in self.scratch[..out_frames * 2].chunks_exact(2) {
            self.queue.push_back(StereoSample::new(frame[0], frame[1]));
        }
    }
}

impl Default for SignalsmithEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl StretchEngine for SignalsmithEngine {
    fn configure(&mut self, sample_rate: u32, channels: u32) {
        self.sample_rate = sample_rate;
        self.stretch = Some(Stretch::preset_default(channels, sample_rate));
        self.queue = VecDeque::with_capacity(QUEUE_CAPACITY);
        self.scratch = Vec::with_capacity(2 * MAX_BUFFER_SIZE);
        self.pending_frames = 0.0;
        self.apply_transpose();
    }

    fn set_pitch_scale(&mut self, scale: f32) {
        self.pitch_scale = scale;
        self.apply_transpose();
    }

    fn set_time_ratio(&mut self, ratio: f64) {
        self.time_ratio = ratio;
    }

    fn set_formant(&mut self, mode: FormantMode) {
        self.formant = mode;
        self.apply_transpose();
    }

    fn process(&mut self, input: &[StereoSample], is_final: bool) {
        if self.stretch.is_none() {
            return;
        }

        let exact = input.len() as f64 * self.time_ratio + self.pending_frames;
        let out_frames = exact.floor() as usize;
        self.pending_frames = exact - out_frames as f64;
        self.run(input, out_frames);

        if is_final {
            // Drain the engine's look-ahead tail. Only happens at stream
            // teardown, so the potential allocation is acceptable.
            if let Some(stretch) = &mut self.stretch {
                let tail = stretch.output_latency();
                if tail > 0 {
                    self.scratch.resize(tail * 2, 0.0);
                    self.scratch.fill(0.0);
                    stretch.flush(&mut self.scratch[..tail * 2]);
                    for frame in self.scratch[..tail * 2].chunks_exact(2) {
                        self.queue.push_back(StereoSample::new(frame[0], frame[1]));
                    }
                }
            }
        }
    }

    fn available(&self) -> usize {
        self.queue.len()
    }

    fn retrieve(&mut self, out: &mut [StereoSample]) -> usize {
        let n = out.len().min(self.queue.len());
        for slot in out.iter_mut().take(n) {
            // pop_front cannot fail within n
            *slot = self.queue.pop_front().unwrap_or_default();
        }
        n
    }

    fn reset(&mut self) {
        if let Some(stretch) = &mut self.stretch {
            stretch.reset();
        }
        self.queue.clear();
        self.pending_frames = 0.0;
    }
}
