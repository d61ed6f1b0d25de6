//! Control-context scheduler
//!
//! The control-side counterpart of the engine: owns the musical timeline,
//! the command sender and a handle per track. A low-frequency tick (timer
//! thread or host-driven) advances the timeline and fires queued track
//! starts at bar boundaries. Everything here runs outside the real-time
//! deadline; the render thread is only ever reached through the lock-free
//! command queue and the per-track atomics.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

use crate::config::EngineConfig;
use crate::engine::{CommandSender, EngineCommand, Track, TrackAtomics, MAX_TRACKS};
use crate::meter::Levels;
use crate::source::AudioSource;
use crate::stretch::FEED_BLOCK;
use crate::timeline::{Timeline, TimelinePosition};
use crate::types::{BusKind, PlayState};

/// Control-side view of one track
///
/// Continuous parameter setters write straight to the shared atomics;
/// telemetry getters read what the render thread last published.
pub struct TrackHandle {
    index: usize,
    name: String,
    percussive: bool,
    atomics: Arc<TrackAtomics>,
}

impl TrackHandle {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_percussive(&self) -> bool {
        self.percussive
    }

    pub fn set_gain(&self, gain: f32) {
        self.atomics.set_gain(gain);
    }

    pub fn gain(&self) -> f32 {
        self.atomics.gain()
    }

    pub fn set_muted(&self, muted: bool) {
        self.atomics.set_muted(muted);
    }

    pub fn is_muted(&self) -> bool {
        self.atomics.muted()
    }

    pub fn set_looping(&self, looping: bool) {
        self.atomics.set_looping(looping);
    }

    pub fn is_looping(&self) -> bool {
        self.atomics.looping()
    }

    /// Defer this track's start to the next bar boundary
    ///
    /// The scheduler tick that lands on beat 1 starts the track and
    /// clears the flag.
    pub fn request_queued_start(&self) {
        self.atomics.set_queued_to_play(true);
    }

    pub fn is_queued(&self) -> bool {
        self.atomics.queued_to_play()
    }

    /// Playback cursor in frames, as last published by the render thread
    pub fn position(&self) -> u64 {
        self.atomics.position()
    }

    pub fn play_state(&self) -> PlayState {
        self.atomics.play_state()
    }

    /// RMS/peak of the track's last rendered block
    pub fn levels(&self) -> Levels {
        self.atomics.levels()
    }
}

/// Tempo-synced transport scheduler
pub struct Scheduler {
    timeline: Timeline,
    sender: CommandSender,
    tracks: Vec<TrackHandle>,
    /// When on, play requests defer to the next bar boundary
    quantize: bool,
    sample_rate: u32,
}

impl Scheduler {
    pub fn new(sender: CommandSender, sample_rate: u32, config: &EngineConfig) -> Self {
        Self {
            timeline: Timeline::new(config.base_tempo_bpm, config.beats_per_bar),
            sender,
            tracks: Vec::new(),
            quantize: config.quantize_starts,
            sample_rate,
        }
    }

    /// Create a track around an opened source and hand it to the engine
    ///
    /// Returns the track index, or `None` if the session is full or the
    /// command queue rejected the track. A source that failed to open
    /// never reaches this point, so no partial track state can exist.
    pub fn add_track(
        &mut self,
        name: impl Into<String>,
        source: Box<dyn AudioSource>,
        percussive: bool,
    ) -> Option<usize> {
        if self.tracks.len() >= MAX_TRACKS {
            log::warn!("track limit reached ({}), not adding", MAX_TRACKS);
            return None;
        }

        let name = name.into();
        let mut track = Track::new(name.clone(), source, percussive);
        track.prepare(self.sample_rate, FEED_BLOCK);

        let index = self.tracks.len();
        let atomics = track.atomics();
        if self
            .sender
            .send(EngineCommand::AddTrack { track: Box::new(track) })
            .is_err()
        {
            log::error!("command queue full, dropping track '{}'", name);
            return None;
        }

        self.tracks.push(TrackHandle {
            index,
            name,
            percussive,
            atomics,
        });
        Some(index)
    }

    pub fn track(&self, index: usize) -> Option<&TrackHandle> {
        self.tracks.get(index)
    }

    pub fn tracks(&self) -> &[TrackHandle] {
        &self.tracks
    }

    pub fn set_quantize(&mut self, quantize: bool) {
        self.quantize = quantize;
    }

    pub fn quantize(&self) -> bool {
        self.quantize
    }

    /// Request playback for a track
    ///
    /// With quantize on, the track is queued and starts at the next tick
    /// that lands on beat 1; otherwise it starts on the next block.
    pub fn request_play(&mut self, index: usize) {
        let Some(handle) = self.tracks.get(index) else {
            return;
        };
        if self.quantize {
            handle.atomics.set_queued_to_play(true);
        } else {
            let _ = self.sender.send(EngineCommand::Play { track: index });
        }
    }

    pub fn pause_track(&mut self, index: usize) {
        if index < self.tracks.len() {
            let _ = self.sender.send(EngineCommand::Pause { track: index });
        }
    }

    /// Stop a track: rewind the cursor and drop any pending quantized start
    pub fn stop_track(&mut self, index: usize) {
        let Some(handle) = self.tracks.get(index) else {
            return;
        };
        handle.atomics.set_queued_to_play(false);
        let _ = self.sender.send(EngineCommand::Stop { track: index });
    }

    /// Start every track immediately (bypasses quantization)
    pub fn play_all(&mut self) {
        for index in 0..self.tracks.len() {
            let _ = self.sender.send(EngineCommand::Play { track: index });
        }
    }

    /// Stop and rewind every track, clearing queued starts
    pub fn stop_all(&mut self) {
        for index in 0..self.tracks.len() {
            self.tracks[index].atomics.set_queued_to_play(false);
            let _ = self.sender.send(EngineCommand::Stop { track: index });
        }
    }

    pub fn seek_track(&mut self, index: usize, frame: u64) {
        if index < self.tracks.len() {
            let _ = self.sender.send(EngineCommand::Seek { track: index, frame });
        }
    }

    /// Scale the timeline and both bus adapters together
    pub fn set_tempo_ratio(&mut self, ratio: f64) {
        self.timeline.set_tempo_ratio(ratio);
        for bus in BusKind::ALL {
            let _ = self.sender.send(EngineCommand::SetTempoRatio { bus, ratio });
        }
    }

    /// Pitch-shift one bus (drums are typically left at zero)
    pub fn set_pitch_semitones(&mut self, bus: BusKind, semitones: f32) {
        let _ = self.sender.send(EngineCommand::SetPitch { bus, semitones });
    }

    /// Toggle formant preservation on both bus adapters
    pub fn set_formant_enabled(&mut self, preserve: bool) {
        for bus in BusKind::ALL {
            let _ = self.sender.send(EngineCommand::SetFormant { bus, preserve });
        }
    }

    pub fn start_timeline(&mut self) {
        self.timeline.start();
    }

    pub fn stop_timeline(&mut self) {
        self.timeline.stop();
    }

    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    pub fn timeline_mut(&mut self) -> &mut Timeline {
        &mut self.timeline
    }

    pub fn position(&self) -> TimelinePosition {
        self.timeline.position()
    }

    /// One control tick: advance the clock, then fire due queued starts
    pub fn tick(&mut self, now: Instant) {
        self.timeline.tick(now);
        self.fire_queued();
    }

    /// Start every queued track when the timeline sits on beat 1
    ///
    /// Level-triggered: evaluated once per tick, and the flag is cleared in
    /// the same evaluation that fires it, so a track can never double-start
    /// across consecutive beat-1 polls. With the timeline stopped the clock
    /// reads beat 1, so queued starts degrade to immediate starts.
    fn fire_queued(&mut self) {
        if self.timeline.beat() != 1 {
            return;
        }
        for handle in &self.tracks {
            if handle.atomics.queued_to_play() {
                handle.atomics.set_queued_to_play(false);
                let _ = self.sender.send(EngineCommand::Play { track: handle.index });
            }
        }
    }
}

/// Handle for the background timer driving [`Scheduler::tick`]
///
/// Stops the timer thread when dropped.
pub struct SchedulerTimer {
    stop_tx: crossbeam::channel::Sender<()>,
    handle: Option<thread::JoinHandle<()>>,
}

impl SchedulerTimer {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SchedulerTimer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run a scheduler tick at `tick_hz` on a background thread
///
/// The scheduler stays behind a mutex so user input (the other half of
/// the control context) can keep calling it; neither side is anywhere
/// near the real-time path.
pub fn spawn_timer(scheduler: Arc<Mutex<Scheduler>>, tick_hz: u32) -> SchedulerTimer {
    let period = Duration::from_secs_f64(1.0 / tick_hz.max(1) as f64);
    let ticker = crossbeam::channel::tick(period);
    let (stop_tx, stop_rx) = crossbeam::channel::bounded::<()>(1);

    let handle = thread::Builder::new()
        .name("stretto-scheduler".into())
        .spawn(move || loop {
            crossbeam::select! {
                recv(ticker) -> _ => {
                    scheduler.lock().unwrap().tick(Instant::now());
                }
                recv(stop_rx) -> _ => break,
            }
        })
        .expect("failed to spawn scheduler timer thread");

    SchedulerTimer {
        stop_tx,
        handle: Some(handle),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::command_channel;
    use crate::source::MemorySource;
    use crate::types::StereoSample;

    fn test_scheduler() -> (Scheduler, rtrb::Consumer<EngineCommand>) {
        let (tx, rx) = command_channel();
        let scheduler = Scheduler::new(CommandSender::new(tx), 44100, &EngineConfig::default());
        (scheduler, rx)
    }

    fn tone_source(len: usize) -> Box<MemorySource> {
        Box::new(MemorySource::new(
            vec![StereoSample::mono(0.5); len],
            44100,
        ))
    }

    fn drain(rx: &mut rtrb::Consumer<EngineCommand>) -> Vec<EngineCommand> {
        let mut cmds = Vec::new();
        while let Ok(cmd) = rx.pop() {
            cmds.push(cmd);
        }
        cmds
    }

    #[test]
    fn test_add_track_sends_command_and_keeps_handle() {
        let (mut scheduler, mut rx) = test_scheduler();

        let index = scheduler.add_track("vocals", tone_source(64), false);
        assert_eq!(index, Some(0));
        assert_eq!(scheduler.tracks().len(), 1);
        assert_eq!(scheduler.track(0).unwrap().name(), "vocals");

        let cmds = drain(&mut rx);
        assert_eq!(cmds.len(), 1);
        assert!(matches!(cmds[0], EngineCommand::AddTrack { .. }));
    }

    #[test]
    fn test_unquantized_play_is_immediate() {
        let (mut scheduler, mut rx) = test_scheduler();
        scheduler.add_track("drums", tone_source(64), true);
        drain(&mut rx);

        scheduler.request_play(0);

        let cmds = drain(&mut rx);
        assert!(matches!(cmds.as_slice(), [EngineCommand::Play { track: 0 }]));
        assert!(!scheduler.track(0).unwrap().is_queued());
    }

    #[test]
    fn test_quantized_play_waits_for_bar_boundary() {
        // 120 BPM, 4/4: 0.5s per beat, 2.0s per bar
        let (mut scheduler, mut rx) = test_scheduler();
        scheduler.add_track("bass", tone_source(64), false);
        scheduler.set_quantize(true);
        drain(&mut rx);

        let base = Instant::now();
        scheduler.start_timeline();
        scheduler.tick(base);

        // Mid-bar: queue the track at 1.3s (beat 3)
        scheduler.tick(base + Duration::from_millis(1300));
        scheduler.request_play(0);
        assert!(scheduler.track(0).unwrap().is_queued());
        assert!(drain(&mut rx).is_empty());

        // Still before the bar turns
        scheduler.tick(base + Duration::from_millis(1900));
        assert!(drain(&mut rx).is_empty());
        assert!(scheduler.track(0).unwrap().is_queued());

        // Bar boundary at 2.0s: beat 1 again, the queued start fires
        scheduler.tick(base + Duration::from_millis(2000));
        let cmds = drain(&mut rx);
        assert!(matches!(cmds.as_slice(), [EngineCommand::Play { track: 0 }]));
        assert!(!scheduler.track(0).unwrap().is_queued());

        // And only once
        scheduler.tick(base + Duration::from_millis(2050));
        assert!(drain(&mut rx).is_empty());
    }

    #[test]
    fn test_queued_track_fires_while_sitting_on_beat_one() {
        let (mut scheduler, mut rx) = test_scheduler();
        scheduler.add_track("keys", tone_source(64), false);
        scheduler.set_quantize(true);
        drain(&mut rx);

        // Timeline stopped: elapsed stays 0, which reads as beat 1, so the
        // queued start fires on the current tick's evaluation
        scheduler.request_play(0);
        scheduler.tick(Instant::now());

        let cmds = drain(&mut rx);
        assert!(matches!(cmds.as_slice(), [EngineCommand::Play { track: 0 }]));
    }

    #[test]
    fn test_stop_clears_queued_flag() {
        let (mut scheduler, mut rx) = test_scheduler();
        scheduler.add_track("pad", tone_source(64), false);
        scheduler.set_quantize(true);
        drain(&mut rx);

        scheduler.request_play(0);
        assert!(scheduler.track(0).unwrap().is_queued());

        scheduler.stop_track(0);
        assert!(!scheduler.track(0).unwrap().is_queued());

        let cmds = drain(&mut rx);
        assert!(matches!(cmds.as_slice(), [EngineCommand::Stop { track: 0 }]));
    }

    #[test]
    fn test_tempo_ratio_reaches_timeline_and_both_buses() {
        let (mut scheduler, mut rx) = test_scheduler();

        scheduler.set_tempo_ratio(1.5);

        assert_eq!(scheduler.timeline().tempo_ratio(), 1.5);
        let cmds = drain(&mut rx);
        assert_eq!(cmds.len(), 2);
        assert!(cmds.iter().all(|c| matches!(
            c,
            EngineCommand::SetTempoRatio { ratio, .. } if *ratio == 1.5
        )));
    }

    #[test]
    fn test_play_all_and_stop_all() {
        let (mut scheduler, mut rx) = test_scheduler();
        scheduler.add_track("a", tone_source(64), true);
        scheduler.add_track("b", tone_source(64), false);
        drain(&mut rx);

        scheduler.play_all();
        assert_eq!(drain(&mut rx).len(), 2);

        scheduler.stop_all();
        let cmds = drain(&mut rx);
        assert_eq!(cmds.len(), 2);
        assert!(cmds.iter().all(|c| matches!(c, EngineCommand::Stop { .. })));
    }
}
