//! Message definitions for communication between the UI and the engine.
//!
//! This module defines the enums that serve as the wire format for messages passed through the
//! ring buffers between the UI thread and the engine thread.

use crate::audio_engine::PlaybackMode;
use crate::audio_engine::preset::TimbreDescriptor;
use crate::audio_engine::voice_key::VoiceKey;

/// Intent sent from the UI side.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlMessage {
    /// Used for testing message passing functionality.
    Ping(),

    /// Buffer every voice and make Hum audible.
    Start,

    /// Stop all playback, dispose every voice and reset the session.
    Stop,

    /// Select a voice and make it audible.
    SelectVoice(VoiceKey),

    /// End of a transient trigger: back to Hum unless latch is on.
    ReleaseVoice,

    ToggleLatch,

    ToggleLoop,

    /// Switch the sequencer between plain and signature playback.
    ToggleSignatureMode,

    ToggleSequencerMode,

    /// Arm recording at a slot.
    StartRecording(usize),

    /// Record a value at the record cursor (`0` is Hum, `n` the n-th shape).
    RecordStep(usize),

    /// Empty one slot.
    ClearSlot(usize),

    /// Set the sequencer step time.
    ///
    /// # Parameters
    /// * `ms` - Step time in milliseconds (50 to 2000)
    SetStepTime(u32),

    /// Resize the pattern (8, 16, 32 or 64 slots).
    SetStepCount(usize),

    /// Set one slot's velocity.
    ///
    /// # Parameters
    /// * `slot` - Slot index
    /// * `velocity` - Velocity (0.0 to 1.0)
    SetVelocity { slot: usize, velocity: f32 },

    /// Reseed the session. Empty seeds fall back to `"default"`.
    SetSeed(String),

    /// Toggle signature playback for the selected voice.
    PlaySignature,

    StopSignature,

    /// Play the signature of a specific voice.
    PlaySignatureFor(VoiceKey),

    PlaySequence,

    StopSequence,
}

impl ControlMessage {
    /// Variant name, used in queue diagnostics.
    pub fn name(&self) -> &'static str {
        match self {
            ControlMessage::Ping() => "Ping",
            ControlMessage::Start => "Start",
            ControlMessage::Stop => "Stop",
            ControlMessage::SelectVoice(_) => "SelectVoice",
            ControlMessage::ReleaseVoice => "ReleaseVoice",
            ControlMessage::ToggleLatch => "ToggleLatch",
            ControlMessage::ToggleLoop => "ToggleLoop",
            ControlMessage::ToggleSignatureMode => "ToggleSignatureMode",
            ControlMessage::ToggleSequencerMode => "ToggleSequencerMode",
            ControlMessage::StartRecording(_) => "StartRecording",
            ControlMessage::RecordStep(_) => "RecordStep",
            ControlMessage::ClearSlot(_) => "ClearSlot",
            ControlMessage::SetStepTime(_) => "SetStepTime",
            ControlMessage::SetStepCount(_) => "SetStepCount",
            ControlMessage::SetVelocity { .. } => "SetVelocity",
            ControlMessage::SetSeed(_) => "SetSeed",
            ControlMessage::PlaySignature => "PlaySignature",
            ControlMessage::StopSignature => "StopSignature",
            ControlMessage::PlaySignatureFor(_) => "PlaySignatureFor",
            ControlMessage::PlaySequence => "PlaySequence",
            ControlMessage::StopSequence => "StopSequence",
        }
    }
}

/// Notification emitted from the engine.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// Response to a Ping message.
    Pong(),

    /// The selected voice changed. Hum carries no descriptor.
    VoiceChanged {
        key: VoiceKey,
        descriptor: Option<TimbreDescriptor>,
    },

    /// Playback or sequencer state changed.
    PlaybackStateChanged(PlaybackSnapshot),

    /// A recoverable problem worth showing to the user.
    Error { message: String },

    /// Shape to show before audio starts, chosen from the seed.
    Preview {
        key: VoiceKey,
        descriptor: Option<TimbreDescriptor>,
    },

    /// The sequencer playhead reached a slot.
    SequencerStep { index: usize, velocity: f32 },

    /// A non-looping signature played to the end.
    SignatureFinished { key: VoiceKey },
}

/// Point-in-time view of the playback state.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackSnapshot {
    pub mode: PlaybackMode,
    pub is_started: bool,
    /// The step sequencer is playing (plain or signature mode).
    pub is_playing: bool,
    pub is_recording: bool,
    pub current_record_slot: Option<usize>,
    pub is_signature_playing: bool,
    /// Recorded values; `None` is an empty slot.
    pub sequence: Vec<Option<usize>>,
    pub velocities: Vec<f32>,
    pub play_index: usize,
    pub step_time_ms: u32,
    pub is_latch_on: bool,
    pub is_loop_enabled: bool,
    pub is_signature_mode: bool,
    pub is_sequencer_mode: bool,
    pub current_key: VoiceKey,
    pub active_key: Option<VoiceKey>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_message_names() {
        assert_eq!(ControlMessage::Ping().name(), "Ping");
        assert_eq!(
            ControlMessage::SetVelocity { slot: 0, velocity: 0.5 }.name(),
            "SetVelocity"
        );
        assert_eq!(
            ControlMessage::PlaySignatureFor(VoiceKey::Hum).name(),
            "PlaySignatureFor"
        );
    }
}
