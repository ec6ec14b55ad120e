//! Voice lifecycle.
//!
//! This module provides the [`Voice`] struct which represents one buffered,
//! ready-to-sound instantiation of a timbre together with its gain state.
//!
//! Voices are owned exclusively by the
//! [`VoiceLifecycleManager`](crate::audio_engine::voice_manager::VoiceLifecycleManager).

use crate::audio_engine::backend::VoiceOutput;
use crate::audio_engine::voice_key::VoiceKey;

/// Lifecycle stage of a [`Voice`].
///
/// `Buffering -> Ready -> (Active | Inactive) -> Disposing -> Disposed`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Buffering,
    Ready,
    Active,
    Inactive,
    Disposing,
    Disposed,
}

/// A live voice handle.
#[derive(Debug)]
pub struct Voice {
    /// Key this voice was buffered for.
    pub key: VoiceKey,

    /// Current lifecycle stage.
    state: VoiceState,

    /// Gain the output is ramping towards (0.0 or 1.0).
    target_gain: f32,

    output: Box<dyn VoiceOutput>,
}

impl Voice {
    /// Wraps a freshly acquired output.
    ///
    /// # Parameters
    ///
    /// - `key`: Voice the output was allocated for
    /// - `output`: Backend output stage, silent on arrival
    ///
    /// # Returns
    ///
    /// A `Voice` in the [`VoiceState::Ready`] stage with zero target gain.
    pub fn new(key: VoiceKey, output: Box<dyn VoiceOutput>) -> Self {
        let mut voice = Self {
            key,
            state: VoiceState::Buffering,
            target_gain: 0.0,
            output,
        };
        voice.output.ramp_gain(0.0, 0.0);
        voice.state = VoiceState::Ready;
        voice
    }

    pub fn state(&self) -> VoiceState {
        self.state
    }

    pub fn target_gain(&self) -> f32 {
        self.target_gain
    }

    /// True while the voice is ramping towards unity.
    pub fn is_audible(&self) -> bool {
        self.target_gain > 0.0
    }

    /// Ramps to unity and marks the voice active.
    pub fn fade_in(&mut self, duration_sec: f32) {
        if self.is_gone() {
            return;
        }
        self.target_gain = 1.0;
        self.output.ramp_gain(1.0, duration_sec);
        self.state = VoiceState::Active;
    }

    /// Ramps to silence and marks the voice inactive. Voices that are
    /// already silent are left untouched.
    pub fn fade_out(&mut self, duration_sec: f32) {
        if self.is_gone() || !self.is_audible() {
            return;
        }
        self.target_gain = 0.0;
        self.output.ramp_gain(0.0, duration_sec);
        self.state = VoiceState::Inactive;
    }

    /// Starts the dispose fade. The caller must wait at least `duration_sec`
    /// before calling [`Voice::release`].
    pub fn begin_dispose(&mut self, duration_sec: f32) {
        if self.is_gone() {
            return;
        }
        self.target_gain = 0.0;
        self.output.ramp_gain(0.0, duration_sec);
        self.state = VoiceState::Disposing;
    }

    /// Frees the backend resources. Idempotent.
    pub fn release(&mut self) {
        if self.state == VoiceState::Disposed {
            return;
        }
        self.target_gain = 0.0;
        self.output.release();
        self.state = VoiceState::Disposed;
    }

    fn is_gone(&self) -> bool {
        matches!(self.state, VoiceState::Disposing | VoiceState::Disposed)
    }
}
