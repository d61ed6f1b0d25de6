//! Track - one audio source with playback cursor and shared control state

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;

use crate::meter::{self, Levels};
use crate::source::AudioSource;
use crate::types::{BusKind, PlayState, StereoBuffer, StereoSample, MAX_BUFFER_SIZE};

/// Shared per-track scalar state
///
/// Lock-free bridge between the two execution contexts. Each field has
/// exactly one writer:
/// - `gain`, `muted`, `looping`, `queued_to_play`: written by the control
///   context, read by the render context
/// - `position`, `state`, `rms`, `peak`: written by the render context
///   after each block, read by the control context for display
///
/// All operations use `Ordering::Relaxed`; visibility within one render
/// block is the only requirement.
pub struct TrackAtomics {
    /// Linear gain, f32 bits, [0, 1]
    gain: AtomicU32,
    muted: AtomicBool,
    looping: AtomicBool,
    /// Pending quantized start; set by control, cleared by the scheduler
    /// tick that fires it (same context, so never concurrently written)
    queued_to_play: AtomicBool,
    /// Playback cursor in frames
    position: AtomicU64,
    /// 0=Stopped, 1=Playing, 2=Paused
    state: AtomicU8,
    /// Linear RMS of the last rendered block, f32 bits
    rms: AtomicU32,
    /// Linear peak of the last rendered block, f32 bits
    peak: AtomicU32,
}

impl TrackAtomics {
    pub fn new() -> Self {
        Self {
            gain: AtomicU32::new(1.0f32.to_bits()),
            muted: AtomicBool::new(false),
            looping: AtomicBool::new(false),
            queued_to_play: AtomicBool::new(false),
            position: AtomicU64::new(0),
            state: AtomicU8::new(0),
            rms: AtomicU32::new(0.0f32.to_bits()),
            peak: AtomicU32::new(0.0f32.to_bits()),
        }
    }

    #[inline]
    pub fn gain(&self) -> f32 {
        f32::from_bits(self.gain.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn set_gain(&self, gain: f32) {
        self.gain
            .store(gain.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    #[inline]
    pub fn muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    #[inline]
    pub fn looping(&self) -> bool {
        self.looping.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_looping(&self, looping: bool) {
        self.looping.store(looping, Ordering::Relaxed);
    }

    #[inline]
    pub fn queued_to_play(&self) -> bool {
        self.queued_to_play.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn set_queued_to_play(&self, queued: bool) {
        self.queued_to_play.store(queued, Ordering::Relaxed);
    }

    /// Playback cursor in frames (render-published)
    #[inline]
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Relaxed)
    }

    /// Playback state (render-published)
    #[inline]
    pub fn play_state(&self) -> PlayState {
        match self.state.load(Ordering::Relaxed) {
            1 => PlayState::Playing,
            2 => PlayState::Paused,
            _ => PlayState::Stopped,
        }
    }

    /// Levels of the last rendered block (render-published)
    #[inline]
    pub fn levels(&self) -> Levels {
        Levels {
            rms: f32::from_bits(self.rms.load(Ordering::Relaxed)),
            peak: f32::from_bits(self.peak.load(Ordering::Relaxed)),
        }
    }

    #[inline]
    fn store_position(&self, position: u64) {
        self.position.store(position, Ordering::Relaxed);
    }

    #[inline]
    fn store_state(&self, state: PlayState) {
        let value = match state {
            PlayState::Stopped => 0,
            PlayState::Playing => 1,
            PlayState::Paused => 2,
        };
        self.state.store(value, Ordering::Relaxed);
    }

    #[inline]
    fn store_levels(&self, levels: Levels) {
        self.rms.store(levels.rms.to_bits(), Ordering::Relaxed);
        self.peak.store(levels.peak.to_bits(), Ordering::Relaxed);
    }
}

impl Default for TrackAtomics {
    fn default() -> Self {
        Self::new()
    }
}

/// A single playback track
///
/// Exclusively owns its audio source and cursor; lives on the render
/// thread once handed to the engine. Continuous controls arrive through
/// the shared [`TrackAtomics`]; discrete transport changes arrive as
/// engine commands.
pub struct Track {
    name: String,
    source: Box<dyn AudioSource>,
    /// Playback cursor in frames, mirroring the source's read position
    position: u64,
    state: PlayState,
    /// Bus assignment, fixed at creation
    percussive: bool,
    /// Most recent rendered block; the meter reads only this.
    /// Empty until the first render, then always the last block size.
    last_block: StereoBuffer,
    atomics: Arc<TrackAtomics>,
}

impl Track {
    pub fn new(name: impl Into<String>, source: Box<dyn AudioSource>, percussive: bool) -> Self {
        Self {
            name: name.into(),
            source,
            position: 0,
            state: PlayState::Stopped,
            percussive,
            last_block: StereoBuffer::with_capacity(MAX_BUFFER_SIZE),
            atomics: Arc::new(TrackAtomics::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bus(&self) -> BusKind {
        BusKind::from_percussive(self.percussive)
    }

    pub fn is_percussive(&self) -> bool {
        self.percussive
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn position(&self) -> u64 {
        self.position
    }

    /// Shared control/telemetry handle for the control context
    pub fn atomics(&self) -> Arc<TrackAtomics> {
        Arc::clone(&self.atomics)
    }

    /// Borrow the shared state without touching the refcount (render path)
    pub(crate) fn controls(&self) -> &TrackAtomics {
        &self.atomics
    }

    pub fn last_block(&self) -> &StereoBuffer {
        &self.last_block
    }

    /// Forward stream parameters to the source (control context, before
    /// the track is handed to the engine)
    pub fn prepare(&mut self, sample_rate: u32, expected_block: usize) {
        self.source.prepare(sample_rate, expected_block);
    }

    /// Start or resume playback from the current cursor
    pub fn play(&mut self) {
        self.state = PlayState::Playing;
    }

    /// Halt playback, keeping the cursor
    pub fn pause(&mut self) {
        self.state = PlayState::Paused;
    }

    /// Halt playback and rewind to the start
    ///
    /// Idempotent; the scheduler clears any pending quantized start
    /// before issuing this.
    pub fn stop(&mut self) {
        self.state = PlayState::Stopped;
        self.position = 0;
        self.source.seek(0);
    }

    /// Move the cursor to an absolute frame offset
    pub fn seek(&mut self, frame: u64) {
        let frame = frame.min(self.source.len_frames());
        self.source.seek(frame);
        self.position = frame;
    }

    /// Render the next block into `last_block` and return it
    ///
    /// Not playing: silence, cursor untouched. Playing: pull from the
    /// source; when the source runs out, either wrap to the start
    /// (looping) or pad with silence and stop at the end. Mute is not
    /// handled here; the mixer scales this block by zero so the cursor
    /// keeps advancing while muted.
    pub fn next_block(&mut self, frames: usize) -> &StereoBuffer {
        self.last_block.set_len_from_capacity(frames);

        if self.state != PlayState::Playing {
            self.last_block.fill_silence();
            return &self.last_block;
        }

        let looping = self.atomics.looping();
        let out = self.last_block.as_mut_slice();
        let mut written = 0;
        while written < frames {
            let n = self.source.read(&mut out[written..]);
            written += n;
            self.position += n as u64;
            if written >= frames {
                break;
            }
            if looping && self.source.len_frames() > 0 {
                self.source.seek(0);
                self.position = 0;
            } else {
                for frame in &mut out[written..] {
                    *frame = StereoSample::silence();
                }
                self.position = self.source.len_frames();
                self.state = PlayState::Stopped;
                break;
            }
        }

        &self.last_block
    }

    /// Push cursor, state and meter levels to the shared atomics
    pub fn publish(&self) {
        self.atomics.store_position(self.position);
        self.atomics.store_state(self.state);
        self.atomics.store_levels(meter::measure(&self.last_block));
    }
}

impl Drop for Track {
    fn drop(&mut self) {
        self.source.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MemorySource;

    fn ramp_track(len: usize, percussive: bool) -> Track {
        let frames = (0..len).map(|i| StereoSample::mono(i as f32)).collect();
        Track::new(
            "ramp",
            Box::new(MemorySource::new(frames, 44100)),
            percussive,
        )
    }

    #[test]
    fn test_last_block_empty_before_first_render() {
        let track = ramp_track(16, false);
        assert!(track.last_block().is_empty());
    }

    #[test]
    fn test_stopped_track_renders_silence_without_advancing() {
        let mut track = ramp_track(16, false);

        let block = track.next_block(8);
        assert_eq!(block.len(), 8);
        assert!(block.as_slice().iter().all(|s| *s == StereoSample::silence()));
        assert_eq!(track.position(), 0);
    }

    #[test]
    fn test_playing_track_pulls_from_cursor() {
        let mut track = ramp_track(16, false);
        track.play();

        let block = track.next_block(4);
        assert_eq!(block[0].left, 0.0);
        assert_eq!(block[3].left, 3.0);

        let block = track.next_block(4);
        assert_eq!(block[0].left, 4.0);
        assert_eq!(track.position(), 8);
    }

    #[test]
    fn test_end_of_source_pads_silence_and_stops() {
        let mut track = ramp_track(6, false);
        track.play();

        let block = track.next_block(8);
        assert_eq!(block[5].left, 5.0);
        assert_eq!(block[6], StereoSample::silence());
        assert_eq!(block[7], StereoSample::silence());
        assert_eq!(track.state(), PlayState::Stopped);
        assert_eq!(track.position(), 6);
    }

    #[test]
    fn test_looping_wraps_to_start() {
        let mut track = ramp_track(6, false);
        track.atomics().set_looping(true);
        track.play();

        let block = track.next_block(8);
        // Frames past the end restart from position 0
        assert_eq!(block[5].left, 5.0);
        assert_eq!(block[6].left, 0.0);
        assert_eq!(block[7].left, 1.0);
        assert_eq!(track.state(), PlayState::Playing);
        assert_eq!(track.position(), 2);
    }

    #[test]
    fn test_stop_rewinds_cursor() {
        let mut track = ramp_track(16, false);
        track.play();
        track.next_block(4);
        assert_eq!(track.position(), 4);

        track.stop();
        assert_eq!(track.position(), 0);
        assert_eq!(track.state(), PlayState::Stopped);

        track.play();
        let block = track.next_block(2);
        assert_eq!(block[0].left, 0.0);
    }

    #[test]
    fn test_pause_keeps_cursor() {
        let mut track = ramp_track(16, false);
        track.play();
        track.next_block(4);

        track.pause();
        let block = track.next_block(4);
        assert!(block.as_slice().iter().all(|s| *s == StereoSample::silence()));
        assert_eq!(track.position(), 4);

        track.play();
        let block = track.next_block(2);
        assert_eq!(block[0].left, 4.0);
    }

    #[test]
    fn test_publish_exposes_levels_and_position() {
        let mut track = ramp_track(16, true);
        let atomics = track.atomics();
        track.play();
        track.next_block(4);
        track.publish();

        assert_eq!(atomics.position(), 4);
        assert_eq!(atomics.play_state(), PlayState::Playing);
        assert!(atomics.levels().peak > 0.0);
    }

    #[test]
    fn test_gain_clamped() {
        let atomics = TrackAtomics::new();
        atomics.set_gain(1.7);
        assert_eq!(atomics.gain(), 1.0);
        atomics.set_gain(-0.3);
        assert_eq!(atomics.gain(), 0.0);
    }
}
