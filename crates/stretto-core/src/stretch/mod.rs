//! Time/pitch adapter over a block-based stretch engine
//!
//! [`TimePitch`] hides the engine's internal look-ahead and output
//! granularity: callers ask for exactly N output frames and get exactly N,
//! however many feed iterations that takes. One adapter instance serves one
//! bus, so all tracks on a bus share its pitch/tempo/formant settings.

mod engine;

pub use engine::{FormantMode, SignalsmithEngine, StretchEngine};

use crate::types::{StereoBuffer, CHANNELS};

/// Frames fed to the engine per iteration of the feed loop
pub const FEED_BLOCK: usize = 256;

/// Expected usable tempo-ratio range; values outside are clamped
const MIN_TEMPO_RATIO: f64 = 0.25;
const MAX_TEMPO_RATIO: f64 = 4.0;

/// Supplies fresh input frames to the feed loop
///
/// Invoked with a scratch buffer of [`FEED_BLOCK`] frames to fill; the
/// buffer arrives silenced, so a provider with nothing to add can return
/// without writing.
pub type InputProvider<'a> = &'a mut dyn FnMut(&mut StereoBuffer);

/// Real-time pitch/tempo shifting for one bus
///
/// Wraps a [`StretchEngine`] and keeps the current pitch/tempo/formant
/// settings so they survive (and are re-applied across) `prepare` calls.
/// Setters are safe to call from the parameter-owning thread at any time;
/// they take effect on the next processed block.
pub struct TimePitch {
    engine: Box<dyn StretchEngine>,
    prepared: bool,
    pitch_semitones: f32,
    tempo_ratio: f64,
    formant: FormantMode,
    /// Scratch handed to the input provider each feed iteration
    feed_buf: StereoBuffer,
}

impl TimePitch {
    /// Create an adapter backed by signalsmith-stretch
    pub fn new() -> Self {
        Self::with_engine(Box::new(SignalsmithEngine::new()))
    }

    /// Create an adapter over a caller-supplied engine
    pub fn with_engine(engine: Box<dyn StretchEngine>) -> Self {
        Self {
            engine,
            prepared: false,
            pitch_semitones: 0.0,
            tempo_ratio: 1.0,
            formant: FormantMode::Shifted,
            feed_buf: StereoBuffer::silence(FEED_BLOCK),
        }
    }

    /// Initialize the engine and apply the current settings
    pub fn prepare(&mut self, sample_rate: u32, channels: u32) {
        debug_assert_eq!(channels, CHANNELS, "the engine is fixed stereo");
        self.engine.configure(sample_rate, channels);
        self.engine.set_pitch_scale(self.pitch_scale());
        self.engine.set_time_ratio(self.tempo_ratio);
        self.engine.set_formant(self.formant);
        self.prepared = true;
    }

    /// Set the pitch shift in semitones (positive = up)
    pub fn set_pitch_semitones(&mut self, semitones: f32) {
        self.pitch_semitones = semitones;
        if self.prepared {
            self.engine.set_pitch_scale(self.pitch_scale());
        }
    }

    pub fn pitch_semitones(&self) -> f32 {
        self.pitch_semitones
    }

    /// Linear pitch-scale factor derived from the semitone setting
    pub fn pitch_scale(&self) -> f32 {
        2.0_f32.powf(self.pitch_semitones / 12.0)
    }

    /// Set the tempo ratio (1.0 = pass-through speed)
    ///
    /// A non-positive or non-finite ratio is undefined for the engine and
    /// falls back to 1.0; everything else is clamped to the usable range.
    pub fn set_tempo_ratio(&mut self, ratio: f64) {
        self.tempo_ratio = sanitize_tempo_ratio(ratio);
        if self.prepared {
            self.engine.set_time_ratio(self.tempo_ratio);
        }
    }

    pub fn tempo_ratio(&self) -> f64 {
        self.tempo_ratio
    }

    /// Switch between formant-preserved and formant-shifted pitch shifting
    pub fn set_formant_enabled(&mut self, preserve: bool) {
        self.formant = if preserve {
            FormantMode::Preserved
        } else {
            FormantMode::Shifted
        };
        if self.prepared {
            self.engine.set_formant(self.formant);
        }
    }

    pub fn formant_enabled(&self) -> bool {
        self.formant == FormantMode::Preserved
    }

    pub fn is_prepared(&self) -> bool {
        self.prepared
    }

    /// Drop engine state (buffered look-ahead and output)
    pub fn reset(&mut self) {
        self.engine.reset();
    }

    /// Produce exactly `output.len()` stretched frames
    ///
    /// Repeatedly asks `provider` for [`FEED_BLOCK`] fresh frames and feeds
    /// them to the engine until enough output has accumulated, then
    /// retrieves. The watermark is twice the requested size: the margin
    /// absorbs the engine's process-call granularity so a mid-block stall
    /// cannot occur. An unprepared adapter fills `output` with silence and
    /// returns; a real-time render must never stall on a missing engine.
    pub fn render_block(&mut self, provider: InputProvider, output: &mut StereoBuffer) {
        if !self.prepared {
            output.fill_silence();
            return;
        }

        let watermark = output.len() * 2;
        // Upper bound on feed iterations: at the minimum tempo ratio each
        // feed yields FEED_BLOCK/4 frames. A misconfigured engine that
        // never reaches the watermark gets caught here instead of looping
        // forever.
        let max_feeds = 8 + (watermark * 4) / FEED_BLOCK;

        let mut feeds = 0;
        while self.engine.available() < watermark {
            if feeds >= max_feeds {
                log::error!(
                    "stretch engine starved: {} of {} frames after {} feeds",
                    self.engine.available(),
                    watermark,
                    feeds
                );
                break;
            }
            self.feed_buf.fill_silence();
            provider(&mut self.feed_buf);
            self.engine.process(self.feed_buf.as_slice(), false);
            feeds += 1;
        }

        output.fill_silence();
        // Short only if the feed guard tripped; the tail stays silent.
        let _ = self.engine.retrieve(output.as_mut_slice());
    }
}

impl Default for TimePitch {
    fn default() -> Self {
        Self::new()
    }
}

fn sanitize_tempo_ratio(ratio: f64) -> f64 {
    if !ratio.is_finite() || ratio <= 0.0 {
        return 1.0;
    }
    ratio.clamp(MIN_TEMPO_RATIO, MAX_TEMPO_RATIO)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StereoSample;

    /// Deterministic pass-through engine: every fed frame becomes exactly
    /// one output frame, released through the queue like the real engine.
    struct MockEngine {
        queue: Vec<StereoSample>,
        /// When set, the engine swallows input without producing output
        starved: bool,
    }

    impl MockEngine {
        fn new() -> Self {
            Self {
                queue: Vec::new(),
                starved: false,
            }
        }
    }

    impl StretchEngine for MockEngine {
        fn configure(&mut self, _sample_rate: u32, _channels: u32) {}

        fn set_pitch_scale(&mut self, _scale: f32) {}

        fn set_time_ratio(&mut self, _ratio: f64) {}

        fn set_formant(&mut self, _mode: FormantMode) {}

        fn process(&mut self, input: &[StereoSample], _is_final: bool) {
            if !self.starved {
                self.queue.extend_from_slice(input);
            }
        }

        fn available(&self) -> usize {
            self.queue.len()
        }

        fn retrieve(&mut self, out: &mut [StereoSample]) -> usize {
            let n = out.len().min(self.queue.len());
            out[..n].copy_from_slice(&self.queue[..n]);
            self.queue.drain(..n);
            n
        }

        fn reset(&mut self) {
            self.queue.clear();
        }
    }

    fn prepared_adapter(engine: MockEngine) -> TimePitch {
        let mut tp = TimePitch::with_engine(Box::new(engine));
        tp.prepare(44100, 2);
        tp
    }

    #[test]
    fn test_unprepared_renders_silence() {
        let mut tp = TimePitch::with_engine(Box::new(MockEngine::new()));
        let mut out = StereoBuffer::from_interleaved(&[1.0; 64]);

        tp.render_block(&mut |_| panic!("provider must not run unprepared"), &mut out);

        assert!(out.as_slice().iter().all(|s| *s == StereoSample::silence()));
    }

    #[test]
    fn test_exact_output_size_for_odd_requests() {
        // Request sizes that do not divide the feed quantum
        for n in [1usize, 100, 333, 512, 1000] {
            let mut tp = prepared_adapter(MockEngine::new());
            let mut out = StereoBuffer::silence(n);
            let mut fed = 0u32;

            tp.render_block(
                &mut |buf| {
                    for s in buf.as_mut_slice() {
                        *s = StereoSample::mono(1.0);
                    }
                    fed += 1;
                },
                &mut out,
            );

            assert_eq!(out.len(), n);
            assert!(out.as_slice().iter().all(|s| s.left == 1.0));
            // The watermark is 2N, so the loop feeds ceil(2N / FEED_BLOCK)
            assert_eq!(fed as usize, (2 * n).div_ceil(FEED_BLOCK));
        }
    }

    #[test]
    fn test_starved_engine_degrades_to_silence() {
        let mut engine = MockEngine::new();
        engine.starved = true;
        let mut tp = prepared_adapter(engine);
        let mut out = StereoBuffer::from_interleaved(&[0.5; 256]);

        // Must terminate despite the engine never reaching the watermark
        tp.render_block(&mut |_| {}, &mut out);

        assert_eq!(out.len(), 128);
        assert!(out.as_slice().iter().all(|s| *s == StereoSample::silence()));
    }

    #[test]
    fn test_pitch_scale_roundtrip() {
        let mut tp = TimePitch::with_engine(Box::new(MockEngine::new()));

        tp.set_pitch_semitones(7.0);
        assert!((tp.pitch_scale() - 2.0_f32.powf(7.0 / 12.0)).abs() < 1e-6);

        tp.set_pitch_semitones(0.0);
        assert_eq!(tp.pitch_scale(), 1.0);
    }

    #[test]
    fn test_tempo_ratio_sanitized() {
        let mut tp = TimePitch::new();

        tp.set_tempo_ratio(0.0);
        assert_eq!(tp.tempo_ratio(), 1.0);

        tp.set_tempo_ratio(-2.0);
        assert_eq!(tp.tempo_ratio(), 1.0);

        tp.set_tempo_ratio(f64::NAN);
        assert_eq!(tp.tempo_ratio(), 1.0);

        tp.set_tempo_ratio(0.5);
        assert_eq!(tp.tempo_ratio(), 0.5);

        tp.set_tempo_ratio(100.0);
        assert_eq!(tp.tempo_ratio(), MAX_TEMPO_RATIO);
    }

    #[test]
    fn test_settings_survive_prepare() {
        let mut tp = TimePitch::with_engine(Box::new(MockEngine::new()));
        tp.set_pitch_semitones(-3.0);
        tp.set_formant_enabled(true);

        tp.prepare(48000, 2);

        assert_eq!(tp.pitch_semitones(), -3.0);
        assert!(tp.formant_enabled());
        assert!(tp.is_prepared());
    }
}
