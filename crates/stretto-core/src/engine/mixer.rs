//! Bus mixer - sums tracks per bus and runs each bus through its stretch adapter

use crate::stretch::TimePitch;
use crate::types::{BusKind, StereoBuffer, MAX_BUFFER_SIZE};

use super::Track;

/// Two-bus mixer with per-bus time/pitch processing
///
/// The bus split is recomputed every render cycle from each track's fixed
/// percussive flag. Each bus owns one [`TimePitch`]; the bus mix is the
/// adapter's input provider, so every feed iteration of the stretch loop
/// mixes a fresh quantum of track audio.
pub struct Mixer {
    percussive: TimePitch,
    melodic: TimePitch,
    percussive_out: StereoBuffer,
    melodic_out: StereoBuffer,
    /// Whether muted tracks keep rendering (and advancing) at zero gain.
    /// Off means mute behaves like pause for the affected track.
    mute_advances_cursor: bool,
}

impl Mixer {
    pub fn new(mute_advances_cursor: bool) -> Self {
        Self {
            percussive: TimePitch::new(),
            melodic: TimePitch::new(),
            percussive_out: StereoBuffer::silence(MAX_BUFFER_SIZE),
            melodic_out: StereoBuffer::silence(MAX_BUFFER_SIZE),
            mute_advances_cursor,
        }
    }

    /// Prepare both bus adapters for the negotiated stream parameters
    pub fn prepare(&mut self, sample_rate: u32, channels: u32) {
        self.percussive.prepare(sample_rate, channels);
        self.melodic.prepare(sample_rate, channels);
    }

    pub fn time_pitch(&self, bus: BusKind) -> &TimePitch {
        match bus {
            BusKind::Percussive => &self.percussive,
            BusKind::Melodic => &self.melodic,
        }
    }

    pub fn time_pitch_mut(&mut self, bus: BusKind) -> &mut TimePitch {
        match bus {
            BusKind::Percussive => &mut self.percussive,
            BusKind::Melodic => &mut self.melodic,
        }
    }

    /// Render one master block
    ///
    /// Mixes each bus through its adapter and sums the two adapter outputs
    /// into `output`. All intermediate buffers are pre-allocated; this path
    /// never allocates.
    pub fn process(&mut self, tracks: &mut [Track], output: &mut StereoBuffer) {
        let frames = output.len();
        self.percussive_out.set_len_from_capacity(frames);
        self.melodic_out.set_len_from_capacity(frames);

        let mute_advances = self.mute_advances_cursor;
        self.percussive.render_block(
            &mut |buf| mix_bus(tracks, BusKind::Percussive, buf, mute_advances),
            &mut self.percussive_out,
        );
        self.melodic.render_block(
            &mut |buf| mix_bus(tracks, BusKind::Melodic, buf, mute_advances),
            &mut self.melodic_out,
        );

        output.fill_silence();
        output.add_buffer(&self.percussive_out);
        output.add_buffer(&self.melodic_out);
    }
}

/// Sum one bus's tracks into `out`
///
/// Each matching track contributes its next block scaled by
/// `muted ? 0.0 : gain`. Muted tracks still render so their cursor keeps
/// moving; mute silences, it does not pause (unless configured otherwise).
fn mix_bus(tracks: &mut [Track], bus: BusKind, out: &mut StereoBuffer, mute_advances: bool) {
    out.fill_silence();
    let frames = out.len();

    for track in tracks.iter_mut().filter(|t| t.bus() == bus) {
        let muted = track.controls().muted();
        if muted && !mute_advances {
            continue;
        }
        let gain = if muted { 0.0 } else { track.controls().gain() };
        let block = track.next_block(frames);
        out.accumulate_scaled(block, gain);
    }
}
