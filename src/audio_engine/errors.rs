//! Audio-engine error types.

use thiserror::Error;

use crate::audio_engine::voice_key::VoiceKey;

/// Errors reported by a synthesis backend.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum BackendError {
    /// The backend could not allocate the nodes for a voice.
    #[error("failed to allocate voice: {0}")]
    Allocation(String),

    /// The backend is not available (e.g. audio context not unlocked).
    #[error("synthesis backend unavailable")]
    Unavailable,
}

/// Errors that can occur while driving the engine.
///
/// None of these are fatal: the engine logs them, reports a diagnostic and
/// degrades to silence.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EngineError {
    /// The backend could not allocate a voice. The key stays unplayable until rebuffered.
    #[error("could not buffer voice '{key}': {reason}")]
    ResourceAcquisition {
        /// Voice that failed to buffer.
        key: VoiceKey,
        /// Backend failure.
        reason: BackendError,
    },

    /// The voice is not part of the session's catalog.
    #[error("unknown voice '{0}'")]
    UnknownVoice(VoiceKey),

    /// Algorithm id outside `1..=10`; the fallback algorithm is used instead.
    #[error("invalid signature algorithm id {0}")]
    InvalidAlgorithmId(u8),

    /// Step time outside the accepted range.
    #[error("step time {0} ms out of range")]
    InvalidStepTime(u32),

    /// Slot count not in the list of valid sizes.
    #[error("invalid slot count {0}")]
    InvalidStepCount(usize),

    /// Slot index past the end of the sequence.
    #[error("slot {slot} out of range (sequence has {len} slots)")]
    SlotOutOfRange {
        /// Requested slot.
        slot: usize,
        /// Current number of slots.
        len: usize,
    },

    /// Velocity not finite or outside `0.0..=1.0`.
    #[error("velocity {0} out of range")]
    InvalidVelocity(f32),

    /// The sequence cannot be resized while it is playing.
    #[error("cannot resize the sequence while it is playing")]
    ResizeWhilePlaying,

    /// Playback was requested before the engine was started.
    #[error("engine not started")]
    NotStarted,

    /// A ring buffer between the UI and the engine thread is full.
    #[error("failed to send {0} - buffer may be full")]
    QueueFull(&'static str),

    /// The engine thread is gone.
    #[error("engine runtime is not running")]
    Disconnected,
}
