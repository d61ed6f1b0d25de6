//! Audio source collaborator interface
//!
//! A track owns exactly one [`AudioSource`]: a seekable, finite provider of
//! stereo frames. File decoding lives outside the engine; whatever decodes
//! a file hands the result to the engine as a source (typically a
//! [`MemorySource`] over the decoded frames).

use crate::types::{StereoSample, DEFAULT_SAMPLE_RATE};

/// A seekable provider of stereo audio frames
///
/// Sources keep their own read position; the owning track mirrors it as the
/// playback cursor and decides the looping/end-of-source policy. All methods
/// are called from the render context once the track is live, so
/// implementations must not allocate or block in `read`.
pub trait AudioSource: Send {
    /// Called once before playback with the negotiated stream parameters
    fn prepare(&mut self, sample_rate: u32, expected_block: usize);

    /// Called when playback is torn down
    fn release(&mut self);

    /// Fill `out` with frames from the current position, advancing it.
    ///
    /// Returns the number of frames written; fewer than `out.len()` means
    /// the source ran out. The unwritten tail of `out` is left untouched.
    fn read(&mut self, out: &mut [StereoSample]) -> usize;

    /// Move the read position to an absolute frame offset
    fn seek(&mut self, frame: u64);

    /// Total length of the source in frames
    fn len_frames(&self) -> u64;

    /// Total length of the source in seconds
    fn length_seconds(&self) -> f64;
}

/// An in-memory audio source over fully decoded stereo frames
///
/// The reference implementation used by tests and by hosts that decode
/// whole files up front.
pub struct MemorySource {
    frames: Vec<StereoSample>,
    sample_rate: u32,
    position: u64,
}

impl MemorySource {
    pub fn new(frames: Vec<StereoSample>, sample_rate: u32) -> Self {
        Self {
            frames,
            sample_rate,
            position: 0,
        }
    }

    /// Build a source from interleaved samples [L, R, L, R, ...]
    pub fn from_interleaved(interleaved: &[f32], sample_rate: u32) -> Self {
        let frames = interleaved
            .chunks_exact(2)
            .map(|c| StereoSample::new(c[0], c[1]))
            .collect();
        Self::new(frames, sample_rate)
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}

impl AudioSource for MemorySource {
    fn prepare(&mut self, _sample_rate: u32, _expected_block: usize) {}

    fn release(&mut self) {}

    fn read(&mut self, out: &mut [StereoSample]) -> usize {
        let pos = self.position.min(self.frames.len() as u64) as usize;
        let available = self.frames.len() - pos;
        let n = out.len().min(available);
        out[..n].copy_from_slice(&self.frames[pos..pos + n]);
        self.position += n as u64;
        n
    }

    fn seek(&mut self, frame: u64) {
        self.position = frame.min(self.frames.len() as u64);
    }

    fn len_frames(&self) -> u64 {
        self.frames.len() as u64
    }

    fn length_seconds(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.frames.len() as f64 / self.sample_rate as f64
    }
}

impl Default for MemorySource {
    fn default() -> Self {
        Self::new(Vec::new(), DEFAULT_SAMPLE_RATE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::StereoSample;

    fn ramp_source(len: usize) -> MemorySource {
        let frames = (0..len)
            .map(|i| StereoSample::mono(i as f32))
            .collect();
        MemorySource::new(frames, 44100)
    }

    #[test]
    fn test_read_advances_position() {
        let mut source = ramp_source(8);
        let mut out = [StereoSample::silence(); 4];

        assert_eq!(source.read(&mut out), 4);
        assert_eq!(out[0].left, 0.0);
        assert_eq!(out[3].left, 3.0);

        assert_eq!(source.read(&mut out), 4);
        assert_eq!(out[0].left, 4.0);
    }

    #[test]
    fn test_short_read_past_end() {
        let mut source = ramp_source(6);
        let mut out = [StereoSample::silence(); 4];

        source.read(&mut out);
        assert_eq!(source.read(&mut out), 2);
        assert_eq!(source.read(&mut out), 0);
    }

    #[test]
    fn test_seek_and_length() {
        let mut source = ramp_source(44100);
        assert_eq!(source.len_frames(), 44100);
        assert!((source.length_seconds() - 1.0).abs() < 1e-9);

        source.seek(44099);
        let mut out = [StereoSample::silence(); 4];
        assert_eq!(source.read(&mut out), 1);

        // Seeking past the end clamps
        source.seek(u64::MAX);
        assert_eq!(source.read(&mut out), 0);
    }
}
