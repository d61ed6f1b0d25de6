//! Lock-free command queue for real-time engine control
//!
//! Discrete state changes travel from the control context to the render
//! context as commands over an SPSC ring buffer: pushes and pops are
//! wait-free and allocation-free, so neither side can stall the other.
//! Commands are applied at the start of a render block, which gives every
//! setter "takes effect on the next processed block" semantics.
//! Continuous values (gain, mute, loop) bypass the queue entirely via
//! [`super::TrackAtomics`].

use crate::types::BusKind;

use super::Track;

/// Commands sent from the control context to the render context
pub enum EngineCommand {
    /// Hand a fully constructed track to the engine
    ///
    /// Boxed so the enum stays pointer-sized; the engine's track slots are
    /// pre-allocated, so accepting the box never allocates on the render
    /// thread.
    AddTrack { track: Box<Track> },
    /// Start or resume playback from the current cursor
    Play { track: usize },
    /// Halt playback, keeping the cursor
    Pause { track: usize },
    /// Halt playback and rewind to the start
    Stop { track: usize },
    /// Move the playback cursor to an absolute frame
    Seek { track: usize, frame: u64 },
    /// Set a bus adapter's pitch shift in semitones
    SetPitch { bus: BusKind, semitones: f32 },
    /// Set a bus adapter's tempo ratio (1.0 = pass-through)
    SetTempoRatio { bus: BusKind, ratio: f64 },
    /// Toggle formant preservation on a bus adapter
    SetFormant { bus: BusKind, preserve: bool },
}

/// Capacity of the command queue
///
/// Control traffic is a handful of commands per user gesture; 256 gives
/// ample headroom for bursts (e.g. stop-all across a full session).
pub const COMMAND_QUEUE_CAPACITY: usize = 256;

/// Create a new command channel (producer/consumer pair)
///
/// The producer side belongs to the control context, the consumer side to
/// the render callback.
pub fn command_channel() -> (rtrb::Producer<EngineCommand>, rtrb::Consumer<EngineCommand>) {
    rtrb::RingBuffer::new(COMMAND_QUEUE_CAPACITY)
}

/// Control-side handle for sending commands
///
/// Wraps the lock-free producer; every send is non-blocking.
pub struct CommandSender {
    producer: rtrb::Producer<EngineCommand>,
}

impl CommandSender {
    pub fn new(producer: rtrb::Producer<EngineCommand>) -> Self {
        Self { producer }
    }

    /// Send a command to the engine
    ///
    /// Returns the command back if the queue is full.
    pub fn send(&mut self, cmd: EngineCommand) -> Result<(), EngineCommand> {
        self.producer.push(cmd).map_err(|e| match e {
            rtrb::PushError::Full(cmd) => cmd,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_channel_roundtrip() {
        let (tx, mut rx) = command_channel();
        let mut sender = CommandSender::new(tx);

        sender.send(EngineCommand::Play { track: 2 }).ok().unwrap();

        let cmd = rx.pop().unwrap();
        assert!(matches!(cmd, EngineCommand::Play { track: 2 }));
    }

    #[test]
    fn test_empty_queue_pops_nothing() {
        let (_tx, mut rx) = command_channel();
        assert!(rx.pop().is_err());
    }

    #[test]
    fn test_command_size_stays_small() {
        // Large payloads (tracks) must be boxed so queue slots stay within
        // a cache line.
        let size = std::mem::size_of::<EngineCommand>();
        assert!(size <= 32, "EngineCommand is {} bytes, expected <= 32", size);
    }
}
