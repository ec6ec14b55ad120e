//! Synthesis backend seam.
//!
//! The engine never produces samples itself. A [`SynthBackend`] turns a
//! [`TimbreDescriptor`] into a live [`VoiceOutput`] whose only controls are a
//! gain ramp and a release. [`NullBackend`] is a silent implementation that
//! records every call, used by tests and headless runs.

use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use crate::audio_engine::errors::BackendError;
use crate::audio_engine::preset::TimbreDescriptor;
use crate::audio_engine::voice_key::VoiceKey;

/// Output stage of one allocated voice.
pub trait VoiceOutput: Send + fmt::Debug {
    /// Ramps output gain to `target` over `duration_sec`.
    ///
    /// A new ramp cancels any ramp still in progress and starts from the
    /// current value; ramps never accumulate.
    fn ramp_gain(&mut self, target: f32, duration_sec: f32);

    /// Frees the underlying resources. Called once, after the voice is silent.
    fn release(&mut self);
}

/// Factory for voice outputs.
pub trait SynthBackend: Send {
    /// Allocates the synthesis graph for `key`. The returned voice starts silent.
    fn acquire(
        &mut self,
        key: &VoiceKey,
        descriptor: &TimbreDescriptor,
    ) -> Result<Box<dyn VoiceOutput>, BackendError>;
}

/// One call observed by a [`NullBackend`].
#[derive(Debug, Clone, PartialEq)]
pub enum BackendCall {
    Acquire { key: VoiceKey },
    Ramp { key: VoiceKey, target: f32, duration_sec: f32 },
    Release { key: VoiceKey },
}

/// Shared log of backend calls.
#[derive(Debug, Clone, Default)]
pub struct CallLog {
    calls: Arc<Mutex<Vec<BackendCall>>>,
}

impl CallLog {
    fn push(&self, call: BackendCall) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push(call);
        }
    }

    /// Copy of every call recorded so far.
    pub fn snapshot(&self) -> Vec<BackendCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn clear(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    /// Number of releases recorded for `key`.
    pub fn release_count(&self, key: &VoiceKey) -> usize {
        self.snapshot()
            .iter()
            .filter(|call| matches!(call, BackendCall::Release { key: k } if k == key))
            .count()
    }
}

/// Silent backend that records what the engine asked of it.
#[derive(Debug, Clone, Default)]
pub struct NullBackend {
    log: CallLog,
    failing: HashSet<VoiceKey>,
}

impl NullBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend that refuses to allocate any of `keys`.
    pub fn failing_for<I: IntoIterator<Item = VoiceKey>>(keys: I) -> Self {
        Self {
            log: CallLog::default(),
            failing: keys.into_iter().collect(),
        }
    }

    /// Handle to the call log; stays valid after the backend is moved into an engine.
    pub fn call_log(&self) -> CallLog {
        self.log.clone()
    }
}

impl SynthBackend for NullBackend {
    fn acquire(
        &mut self,
        key: &VoiceKey,
        _descriptor: &TimbreDescriptor,
    ) -> Result<Box<dyn VoiceOutput>, BackendError> {
        if self.failing.contains(key) {
            return Err(BackendError::Allocation(format!("no nodes left for '{key}'")));
        }
        self.log.push(BackendCall::Acquire { key: key.clone() });
        Ok(Box::new(NullVoice {
            key: key.clone(),
            log: self.log.clone(),
        }))
    }
}

#[derive(Debug)]
struct NullVoice {
    key: VoiceKey,
    log: CallLog,
}

impl VoiceOutput for NullVoice {
    fn ramp_gain(&mut self, target: f32, duration_sec: f32) {
        self.log.push(BackendCall::Ramp {
            key: self.key.clone(),
            target,
            duration_sec,
        });
    }

    fn release(&mut self) {
        self.log.push(BackendCall::Release {
            key: self.key.clone(),
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_backend_records_calls() {
        let mut backend = NullBackend::new();
        let log = backend.call_log();
        let key = VoiceKey::shape("circle");

        let mut voice = backend
            .acquire(&key, &TimbreDescriptor::hum())
            .expect("null backend allocates");
        voice.ramp_gain(1.0, 0.008);
        voice.release();

        assert_eq!(
            log.snapshot(),
            vec![
                BackendCall::Acquire { key: key.clone() },
                BackendCall::Ramp {
                    key: key.clone(),
                    target: 1.0,
                    duration_sec: 0.008
                },
                BackendCall::Release { key: key.clone() },
            ]
        );
        assert_eq!(log.release_count(&key), 1);
    }

    #[test]
    fn test_failing_backend() {
        let key = VoiceKey::shape("star");
        let mut backend = NullBackend::failing_for([key.clone()]);

        let result = backend.acquire(&key, &TimbreDescriptor::hum());
        assert!(matches!(result, Err(BackendError::Allocation(_))));
        assert!(backend.call_log().snapshot().is_empty());

        assert!(backend.acquire(&VoiceKey::Hum, &TimbreDescriptor::hum()).is_ok());
    }
}
