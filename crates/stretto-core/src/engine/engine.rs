//! Main audio engine - tracks, bus mixer, command processing

use crate::config::EngineConfig;
use crate::types::{StereoBuffer, CHANNELS};

use super::{EngineCommand, Mixer, Track};

/// Maximum number of simultaneous tracks
///
/// Track slots are reserved up front so accepting a track on the render
/// thread never allocates.
pub const MAX_TRACKS: usize = 16;

/// The main audio engine
///
/// Owned exclusively by the render context: the audio callback drains the
/// command queue, then renders one master block. Everything reachable from
/// here is allocation-free after construction.
pub struct AudioEngine {
    tracks: Vec<Track>,
    mixer: Mixer,
    sample_rate: u32,
}

impl AudioEngine {
    /// Create an engine prepared for the given sample rate
    pub fn new(sample_rate: u32, config: &EngineConfig) -> Self {
        let mut mixer = Mixer::new(config.mute_advances_cursor);
        mixer.prepare(sample_rate, CHANNELS);

        Self {
            tracks: Vec::with_capacity(MAX_TRACKS),
            mixer,
            sample_rate,
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn track(&self, index: usize) -> Option<&Track> {
        self.tracks.get(index)
    }

    pub fn track_mut(&mut self, index: usize) -> Option<&mut Track> {
        self.tracks.get_mut(index)
    }

    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    pub fn mixer_mut(&mut self) -> &mut Mixer {
        &mut self.mixer
    }

    /// Accept a track into a pre-allocated slot
    ///
    /// A track arriving past [`MAX_TRACKS`] is dropped; growing the vec
    /// would allocate on the render thread.
    pub fn add_track(&mut self, track: Box<Track>) {
        if self.tracks.len() < MAX_TRACKS {
            self.tracks.push(*track);
        } else {
            log::warn!("track limit reached ({}), dropping '{}'", MAX_TRACKS, track.name());
        }
    }

    /// Drain and apply all pending commands (render context, block start)
    pub fn process_commands(&mut self, rx: &mut rtrb::Consumer<EngineCommand>) {
        while let Ok(cmd) = rx.pop() {
            self.apply(cmd);
        }
    }

    fn apply(&mut self, cmd: EngineCommand) {
        match cmd {
            EngineCommand::AddTrack { track } => self.add_track(track),
            EngineCommand::Play { track } => {
                if let Some(t) = self.tracks.get_mut(track) {
                    t.play();
                }
            }
            EngineCommand::Pause { track } => {
                if let Some(t) = self.tracks.get_mut(track) {
                    t.pause();
                }
            }
            EngineCommand::Stop { track } => {
                if let Some(t) = self.tracks.get_mut(track) {
                    t.stop();
                }
            }
            EngineCommand::Seek { track, frame } => {
                if let Some(t) = self.tracks.get_mut(track) {
                    t.seek(frame);
                }
            }
            EngineCommand::SetPitch { bus, semitones } => {
                self.mixer.time_pitch_mut(bus).set_pitch_semitones(semitones);
            }
            EngineCommand::SetTempoRatio { bus, ratio } => {
                self.mixer.time_pitch_mut(bus).set_tempo_ratio(ratio);
            }
            EngineCommand::SetFormant { bus, preserve } => {
                self.mixer.time_pitch_mut(bus).set_formant_enabled(preserve);
            }
        }
    }

    /// Render one master block and publish per-track telemetry
    pub fn render(&mut self, output: &mut StereoBuffer) {
        self.mixer.process(&mut self.tracks, output);
        for track in &self.tracks {
            track.publish();
        }
    }
}
