//! Buffered voice set with click-free switching.
//!
//! The [`VoiceLifecycleManager`] owns every live [`Voice`] and is the only
//! place that changes which one is audible. Switching ramps the old voice to
//! zero and the new one to unity over the short switch window; disposal uses
//! the longer dispose window and releases backend resources only after that
//! window (plus a guard) has elapsed on the logical clock.

use std::collections::BTreeMap;

use crate::audio_engine::backend::SynthBackend;
use crate::audio_engine::config::FadeTimings;
use crate::audio_engine::errors::EngineError;
use crate::audio_engine::preset::TimbreDescriptor;
use crate::audio_engine::voice::{Voice, VoiceState};
use crate::audio_engine::voice_key::VoiceKey;

/// Side effects requested alongside an activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActivateOptions {
    /// Tell the renderer about the newly selected voice.
    pub update_visual: bool,
    /// Make the key the UI's current selection.
    pub set_current: bool,
    /// Push a fresh playback snapshot to the UI.
    pub sync_play_state: bool,
}

impl Default for ActivateOptions {
    fn default() -> Self {
        Self {
            update_visual: true,
            set_current: true,
            sync_play_state: true,
        }
    }
}

impl ActivateOptions {
    /// Changes audio only; the UI keeps showing what it showed before.
    pub fn audio_only() -> Self {
        Self {
            update_visual: false,
            set_current: false,
            sync_play_state: false,
        }
    }
}

#[derive(Debug)]
struct PendingRelease {
    release_at_ms: u64,
    voice: Voice,
    /// Descriptor to build the replacement from once `voice` is released.
    rebuild: Option<TimbreDescriptor>,
}

/// Owner of all buffered voices.
pub struct VoiceLifecycleManager {
    backend: Box<dyn SynthBackend>,
    voices: BTreeMap<VoiceKey, Voice>,
    releasing: Vec<PendingRelease>,
    active_key: Option<VoiceKey>,
    /// Voice to fade in as soon as its rebuild completes.
    awaiting: Option<VoiceKey>,
    current_key: VoiceKey,
    fades: FadeTimings,
    failures: Vec<EngineError>,
}

impl VoiceLifecycleManager {
    pub fn new(backend: Box<dyn SynthBackend>, fades: FadeTimings) -> Self {
        Self {
            backend,
            voices: BTreeMap::new(),
            releasing: Vec::new(),
            active_key: None,
            awaiting: None,
            current_key: VoiceKey::Hum,
            fades,
            failures: Vec::new(),
        }
    }

    /// Buffers a voice for `key`.
    ///
    /// A fresh key is allocated immediately, silent. An existing voice is
    /// detached and faded out over the dispose window first; the replacement
    /// is built by [`VoiceLifecycleManager::collect_released`] once the old
    /// voice has been released. If the old voice was audible the replacement
    /// is faded in when it arrives.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::ResourceAcquisition`] when the backend refuses an
    /// immediate allocation. No entry is left for `key` in that case. Failures
    /// of a deferred rebuild are collected by [`VoiceLifecycleManager::take_failures`].
    pub fn buffer(
        &mut self,
        key: &VoiceKey,
        descriptor: &TimbreDescriptor,
        now_ms: u64,
    ) -> Result<(), EngineError> {
        if let Some(old) = self.voices.remove(key) {
            log::debug!("Replacing buffered voice '{key}' after its dispose fade");
            if self.active_key.as_ref() == Some(key) {
                self.active_key = None;
                self.awaiting = Some(key.clone());
            }
            self.schedule_release(old, now_ms, Some(descriptor.clone()));
            return Ok(());
        }

        if let Some(pending) = self
            .releasing
            .iter_mut()
            .find(|p| p.rebuild.is_some() && &p.voice.key == key)
        {
            pending.rebuild = Some(descriptor.clone());
            return Ok(());
        }

        self.construct(key, descriptor)
    }

    fn construct(&mut self, key: &VoiceKey, descriptor: &TimbreDescriptor) -> Result<(), EngineError> {
        match self.backend.acquire(key, descriptor) {
            Ok(output) => {
                self.voices.insert(key.clone(), Voice::new(key.clone(), output));
                Ok(())
            }
            Err(reason) => {
                log::error!("Failed to buffer voice '{key}': {reason}");
                Err(EngineError::ResourceAcquisition {
                    key: key.clone(),
                    reason,
                })
            }
        }
    }

    /// Makes `key` the audible voice.
    ///
    /// Every other voice is ramped to zero and `key` to unity over the switch
    /// window. If `key` is not buffered the audio is left as it is, but the
    /// current selection still follows `options.set_current`. A key that is
    /// being rebuilt becomes audible when the rebuild completes.
    ///
    /// Returns `true` if the audible voice is now `key`.
    pub fn activate(&mut self, key: &VoiceKey, options: ActivateOptions) -> bool {
        if options.set_current {
            self.current_key = key.clone();
        }

        if !self.voices.contains_key(key) {
            if self.is_rebuilding(key) {
                log::debug!("Voice '{key}' is being rebuilt; activating when ready");
                self.awaiting = Some(key.clone());
            } else {
                log::debug!("Voice '{key}' not buffered; selection only");
                self.awaiting = None;
            }
            return false;
        }

        self.awaiting = None;
        self.switch_to(key);
        true
    }

    fn switch_to(&mut self, key: &VoiceKey) {
        let fade = self.fades.switch_sec;
        for (other_key, voice) in self.voices.iter_mut() {
            if other_key != key {
                voice.fade_out(fade);
            }
        }
        if let Some(voice) = self.voices.get_mut(key) {
            voice.fade_in(fade);
        }
        self.active_key = Some(key.clone());
    }

    /// Fades out and schedules release of every buffered voice. Pending
    /// rebuilds are cancelled.
    pub fn dispose_all(&mut self, now_ms: u64) {
        for pending in &mut self.releasing {
            pending.rebuild = None;
        }
        let voices = std::mem::take(&mut self.voices);
        if !voices.is_empty() {
            log::debug!("Disposing {} voices", voices.len());
        }
        for voice in voices.into_values() {
            self.schedule_release(voice, now_ms, None);
        }
        self.active_key = None;
        self.awaiting = None;
    }

    /// Releases every disposed voice whose fade has finished by `now_ms` and
    /// builds any replacement waiting on it. Returns the number released.
    pub fn collect_released(&mut self, now_ms: u64) -> usize {
        let (due, waiting): (Vec<PendingRelease>, Vec<PendingRelease>) =
            std::mem::take(&mut self.releasing)
                .into_iter()
                .partition(|pending| pending.release_at_ms <= now_ms);
        self.releasing = waiting;

        let released = due.len();
        for mut pending in due {
            pending.voice.release();
            let Some(descriptor) = pending.rebuild else {
                continue;
            };
            let key = pending.voice.key.clone();
            match self.construct(&key, &descriptor) {
                Ok(()) => {
                    if self.awaiting.as_ref() == Some(&key) {
                        self.awaiting = None;
                        self.switch_to(&key);
                    }
                }
                Err(err) => self.failures.push(err),
            }
        }
        released
    }

    /// Takes the errors of deferred rebuilds.
    pub fn take_failures(&mut self) -> Vec<EngineError> {
        std::mem::take(&mut self.failures)
    }

    /// Releases everything immediately, pending disposals included. Pending
    /// rebuilds are dropped.
    pub fn release_all_now(&mut self) {
        for mut voice in std::mem::take(&mut self.voices).into_values() {
            voice.release();
        }
        for mut pending in self.releasing.drain(..) {
            pending.voice.release();
        }
        self.active_key = None;
        self.awaiting = None;
    }

    /// Voice that is audible (or ramping to audible), if any.
    pub fn active_key(&self) -> Option<&VoiceKey> {
        self.active_key.as_ref()
    }

    /// Voice the UI considers selected.
    pub fn current_key(&self) -> &VoiceKey {
        &self.current_key
    }

    pub fn set_current(&mut self, key: VoiceKey) {
        self.current_key = key;
    }

    pub fn is_buffered(&self, key: &VoiceKey) -> bool {
        self.voices.contains_key(key)
    }

    /// True while an old voice for `key` is fading out ahead of its replacement.
    pub fn is_rebuilding(&self, key: &VoiceKey) -> bool {
        self.releasing
            .iter()
            .any(|p| p.rebuild.is_some() && &p.voice.key == key)
    }

    pub fn voice_state(&self, key: &VoiceKey) -> Option<VoiceState> {
        self.voices.get(key).map(Voice::state)
    }

    /// Number of voices with a non-zero target gain.
    pub fn audible_count(&self) -> usize {
        self.voices.values().filter(|v| v.is_audible()).count()
    }

    pub fn buffered_count(&self) -> usize {
        self.voices.len()
    }

    pub fn pending_release_count(&self) -> usize {
        self.releasing.len()
    }

    fn schedule_release(&mut self, mut voice: Voice, now_ms: u64, rebuild: Option<TimbreDescriptor>) {
        voice.begin_dispose(self.fades.dispose_sec);
        self.releasing.push(PendingRelease {
            release_at_ms: now_ms + self.fades.dispose_delay_ms(),
            voice,
            rebuild,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_engine::backend::{BackendCall, CallLog, NullBackend};
    use crate::audio_engine::rng::SeededRandom;
    use crate::audio_engine::voice_key::VoiceCatalog;

    fn manager_with(backend: NullBackend) -> VoiceLifecycleManager {
        VoiceLifecycleManager::new(Box::new(backend), FadeTimings::default())
    }

    fn buffer_all(manager: &mut VoiceLifecycleManager, catalog: &VoiceCatalog) {
        for key in catalog.all_keys() {
            manager
                .buffer(&key, &TimbreDescriptor::hum(), 0)
                .expect("null backend allocates");
        }
    }

    #[test]
    fn test_activate_switches_audible_voice() {
        let mut manager = manager_with(NullBackend::new());
        let catalog = VoiceCatalog::new(["a", "b"]);
        buffer_all(&mut manager, &catalog);

        assert!(manager.activate(&VoiceKey::Hum, ActivateOptions::default()));
        assert!(manager.activate(&VoiceKey::shape("a"), ActivateOptions::default()));

        assert_eq!(manager.active_key(), Some(&VoiceKey::shape("a")));
        assert_eq!(manager.current_key(), &VoiceKey::shape("a"));
        assert_eq!(manager.audible_count(), 1);
        assert_eq!(manager.voice_state(&VoiceKey::Hum), Some(VoiceState::Inactive));
        assert_eq!(manager.voice_state(&VoiceKey::shape("a")), Some(VoiceState::Active));
    }

    #[test]
    fn test_at_most_one_audible_after_any_activation_order() {
        let mut manager = manager_with(NullBackend::new());
        let catalog = VoiceCatalog::default();
        buffer_all(&mut manager, &catalog);
        let keys: Vec<VoiceKey> = catalog.all_keys().collect();

        let mut rng = SeededRandom::new("activation-order");
        for _ in 0..500 {
            let key = &keys[rng.index(keys.len())];
            manager.activate(key, ActivateOptions::default());
            assert_eq!(manager.audible_count(), 1);
        }
    }

    #[test]
    fn test_activate_unbuffered_updates_selection_only() {
        let mut manager = manager_with(NullBackend::new());
        manager
            .buffer(&VoiceKey::Hum, &TimbreDescriptor::hum(), 0)
            .expect("null backend allocates");
        manager.activate(&VoiceKey::Hum, ActivateOptions::default());

        let switched = manager.activate(&VoiceKey::shape("ghost"), ActivateOptions::default());

        assert!(!switched);
        assert_eq!(manager.active_key(), Some(&VoiceKey::Hum));
        assert_eq!(manager.current_key(), &VoiceKey::shape("ghost"));
    }

    #[test]
    fn test_audio_only_keeps_selection() {
        let mut manager = manager_with(NullBackend::new());
        let catalog = VoiceCatalog::new(["a"]);
        buffer_all(&mut manager, &catalog);
        manager.activate(&VoiceKey::shape("a"), ActivateOptions::default());

        manager.activate(&VoiceKey::Hum, ActivateOptions::audio_only());

        assert_eq!(manager.active_key(), Some(&VoiceKey::Hum));
        assert_eq!(manager.current_key(), &VoiceKey::shape("a"));
    }

    fn acquire_count(log: &CallLog, key: &VoiceKey) -> usize {
        log.snapshot()
            .iter()
            .filter(|call| matches!(call, BackendCall::Acquire { key: k } if k == key))
            .count()
    }

    #[test]
    fn test_rebuffer_builds_replacement_after_old_voice_released() {
        let backend = NullBackend::new();
        let log = backend.call_log();
        let mut manager = manager_with(backend);
        let key = VoiceKey::shape("a");
        manager.buffer(&key, &TimbreDescriptor::hum(), 0).expect("allocates");
        manager.activate(&key, ActivateOptions::default());

        manager.buffer(&key, &TimbreDescriptor::hum(), 100).expect("deferred");

        assert_eq!(manager.active_key(), None);
        assert_eq!(manager.pending_release_count(), 1);
        assert!(manager.is_rebuilding(&key));
        assert_eq!(manager.voice_state(&key), None);
        assert_eq!(acquire_count(&log, &key), 1);

        assert_eq!(manager.collect_released(113), 0);
        assert_eq!(log.release_count(&key), 0);
        assert_eq!(acquire_count(&log, &key), 1);

        assert_eq!(manager.collect_released(114), 1);
        assert_eq!(log.release_count(&key), 1);
        assert_eq!(acquire_count(&log, &key), 2);
        let release_at = log
            .snapshot()
            .iter()
            .position(|c| matches!(c, BackendCall::Release { .. }));
        let second_acquire = log
            .snapshot()
            .iter()
            .rposition(|c| matches!(c, BackendCall::Acquire { .. }));
        assert!(release_at < second_acquire);
        assert_eq!(manager.pending_release_count(), 0);
        assert_eq!(manager.active_key(), Some(&key));
        assert_eq!(manager.voice_state(&key), Some(VoiceState::Active));
    }

    #[test]
    fn test_rebuffer_of_inactive_voice_stays_silent() {
        let mut manager = manager_with(NullBackend::new());
        let catalog = VoiceCatalog::new(["a"]);
        buffer_all(&mut manager, &catalog);
        manager.activate(&VoiceKey::Hum, ActivateOptions::default());
        let key = VoiceKey::shape("a");

        manager.buffer(&key, &TimbreDescriptor::hum(), 0).expect("deferred");
        manager.collect_released(100);

        assert_eq!(manager.voice_state(&key), Some(VoiceState::Ready));
        assert_eq!(manager.active_key(), Some(&VoiceKey::Hum));
        assert_eq!(manager.audible_count(), 1);
    }

    #[test]
    fn test_failed_rebuild_is_collected() {
        let key = VoiceKey::shape("a");
        let mut manager = manager_with(NullBackend::new());
        manager.buffer(&key, &TimbreDescriptor::hum(), 0).expect("allocates");
        manager.backend = Box::new(NullBackend::failing_for([key.clone()]));

        manager.buffer(&key, &TimbreDescriptor::hum(), 0).expect("deferred");
        manager.collect_released(100);

        assert!(!manager.is_buffered(&key));
        let failures = manager.take_failures();
        assert_eq!(failures.len(), 1);
        assert!(matches!(failures[0], EngineError::ResourceAcquisition { .. }));
        assert!(manager.take_failures().is_empty());
    }

    #[test]
    fn test_failed_acquisition_leaves_no_entry() {
        let key = VoiceKey::shape("broken");
        let mut manager = manager_with(NullBackend::failing_for([key.clone()]));

        let result = manager.buffer(&key, &TimbreDescriptor::hum(), 0);

        assert!(matches!(result, Err(EngineError::ResourceAcquisition { .. })));
        assert!(!manager.is_buffered(&key));
        assert!(!manager.activate(&key, ActivateOptions::default()));
    }

    #[test]
    fn test_dispose_all() {
        let backend = NullBackend::new();
        let log = backend.call_log();
        let mut manager = manager_with(backend);
        let catalog = VoiceCatalog::new(["a", "b"]);
        buffer_all(&mut manager, &catalog);
        manager.activate(&VoiceKey::shape("b"), ActivateOptions::default());

        manager.dispose_all(50);

        assert_eq!(manager.active_key(), None);
        assert_eq!(manager.buffered_count(), 0);
        assert_eq!(manager.audible_count(), 0);
        assert!(log.snapshot().contains(&BackendCall::Ramp {
            key: VoiceKey::shape("b"),
            target: 0.0,
            duration_sec: FadeTimings::default().dispose_sec
        }));

        manager.collect_released(1_000);
        for key in catalog.all_keys() {
            assert_eq!(log.release_count(&key), 1);
        }
    }

    #[test]
    fn test_release_all_now_includes_pending() {
        let backend = NullBackend::new();
        let log = backend.call_log();
        let mut manager = manager_with(backend);
        let key = VoiceKey::shape("a");
        manager.buffer(&key, &TimbreDescriptor::hum(), 0).expect("allocates");
        manager.buffer(&key, &TimbreDescriptor::hum(), 0).expect("allocates");

        manager.release_all_now();

        assert_eq!(log.release_count(&key), 1);
        assert!(!manager.is_rebuilding(&key));
        assert_eq!(manager.pending_release_count(), 0);
        assert_eq!(manager.buffered_count(), 0);
    }
}
