//! Audio Signature Engine Module
//!
//! This module provides deterministic voice selection and playback on a
//! logical clock. It is organized into sub-modules, each with a specific
//! responsibility:
//!
//! - [`rng`]: Seeded pseudo-random streams
//! - [`preset`]: Per-voice timbre generation
//! - [`voice`] / [`voice_manager`]: Voice lifecycle and click-free switching
//! - [`signature`]: The ten signature algorithms and voice -> algorithm mapping
//! - [`sequencer`]: The user-recordable step pattern
//! - [`player`]: Timed signature playback
//! - [`clock`]: Timer queue
//! - [`runtime`]: Threaded driver with ring-buffer message passing
//!
//! The main [`SignatureEngine`] struct owns these components and enforces that
//! exactly one [`PlaybackMode`] drives voice changes at any time.

use crate::audio_engine::backend::SynthBackend;
use crate::audio_engine::clock::{Scheduler, Timer};
use crate::audio_engine::config::{EngineConfig, normalize_seed};
use crate::audio_engine::constants::{
    SIG_SEQ_EMPTY_WAIT_MIN_MS, SIG_SEQ_GAP_MIN_MS, STARTUP_SIGNATURE_DELAY_MS,
};
use crate::audio_engine::errors::EngineError;
use crate::audio_engine::player::{Completion, SignaturePlayer};
use crate::audio_engine::preset::{PresetBank, preview_key};
use crate::audio_engine::sequencer::StepSequencer;
use crate::audio_engine::signature::{AlgorithmMapping, signature_for};
use crate::audio_engine::voice_key::{SequenceStep, VoiceCatalog, VoiceKey};
use crate::audio_engine::voice_manager::{ActivateOptions, VoiceLifecycleManager};
use crate::messages::{ControlMessage, EngineEvent, PlaybackSnapshot};

pub mod backend;
pub mod clock;
pub mod config;
pub mod constants;
pub mod errors;
pub mod player;
pub mod preset;
pub mod rng;
pub mod runtime;
pub mod sequencer;
pub mod signature;
pub mod voice;
pub mod voice_key;
pub mod voice_manager;

/// Which component is driving voice changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PlaybackMode {
    #[default]
    Idle,
    /// A signature started by the user.
    PlainSignature,
    /// The step sequencer activating one voice per slot.
    SequencerPlain,
    /// The step sequencer firing one signature per slot.
    SequencerSignature,
}

impl PlaybackMode {
    pub fn as_str(self) -> &'static str {
        match self {
            PlaybackMode::Idle => "idle",
            PlaybackMode::PlainSignature => "signature",
            PlaybackMode::SequencerPlain => "sequencer",
            PlaybackMode::SequencerSignature => "signature_sequencer",
        }
    }

    pub fn is_sequencer(self) -> bool {
        matches!(
            self,
            PlaybackMode::SequencerPlain | PlaybackMode::SequencerSignature
        )
    }
}

/// User toggles that are not playback modes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Flags {
    pub latch: bool,
    pub looping: bool,
    pub signature_mode: bool,
    pub sequencer_mode: bool,
}

/// Pending outbound events plus a "state changed" marker.
#[derive(Debug, Default)]
pub(crate) struct Outbox {
    events: Vec<EngineEvent>,
    state_dirty: bool,
}

impl Outbox {
    pub(crate) fn push(&mut self, event: EngineEvent) {
        self.events.push(event);
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.state_dirty = true;
    }

    pub(crate) fn drain(&mut self) -> Vec<EngineEvent> {
        std::mem::take(&mut self.events)
    }
}

/// Borrowed view of the engine parts playback code needs.
pub(crate) struct PlaybackContext<'a> {
    pub(crate) voices: &'a mut VoiceLifecycleManager,
    pub(crate) clock: &'a mut Scheduler<Timer>,
    pub(crate) outbox: &'a mut Outbox,
    pub(crate) catalog: &'a VoiceCatalog,
    pub(crate) presets: &'a PresetBank,
    pub(crate) flags: &'a mut Flags,
}

impl PlaybackContext<'_> {
    /// Activates `key` through the voice manager and reports the change.
    pub(crate) fn activate(&mut self, key: &VoiceKey, options: ActivateOptions) -> bool {
        let switched = self.voices.activate(key, options);
        if options.update_visual {
            self.outbox.push(EngineEvent::VoiceChanged {
                key: key.clone(),
                descriptor: self.presets.get(key).cloned(),
            });
        }
        if options.sync_play_state {
            self.outbox.mark_dirty();
        }
        switched
    }
}

macro_rules! playback_ctx {
    ($engine:ident) => {
        PlaybackContext {
            voices: &mut $engine.voices,
            clock: &mut $engine.clock,
            outbox: &mut $engine.outbox,
            catalog: &$engine.catalog,
            presets: &$engine.presets,
            flags: &mut $engine.flags,
        }
    };
}

/// Release back to Hum without moving the UI selection.
const RELEASE_TO_HUM: ActivateOptions = ActivateOptions {
    update_visual: true,
    set_current: false,
    sync_play_state: true,
};

/// Deterministic audio-signature engine.
///
/// All time is logical: [`SignatureEngine::advance_to`] fires due timers and
/// [`SignatureEngine::handle_at`] applies an intent at a timestamp. Feeding
/// the same timestamped intents to an engine built from the same seed yields
/// the same events.
pub struct SignatureEngine {
    config: EngineConfig,
    seed: String,
    catalog: VoiceCatalog,
    presets: PresetBank,
    mapping: AlgorithmMapping,
    voices: VoiceLifecycleManager,
    clock: Scheduler<Timer>,
    sequencer: StepSequencer,
    player: SignaturePlayer,
    mode: PlaybackMode,
    flags: Flags,
    outbox: Outbox,
    started: bool,
    sequencer_generation: u64,
    startup_generation: u64,
    startup_signature_done: bool,
    /// Voice the play-signature toggle plays: the last shape picked outside
    /// signature playback, or the last voice a signature was played for.
    return_key: Option<VoiceKey>,
}

impl SignatureEngine {
    /// Creates an engine for `config.seed`. Nothing is buffered until [`SignatureEngine::start`].
    pub fn new(config: EngineConfig, backend: Box<dyn SynthBackend>) -> Self {
        let config = config.validated();
        let seed = normalize_seed(&config.seed);
        let catalog = config.catalog();
        let presets = PresetBank::build(&seed, &catalog);
        let mapping = AlgorithmMapping::build(&seed, &catalog);
        let voices = VoiceLifecycleManager::new(backend, config.fades);
        let sequencer = StepSequencer::new(config.slot_count, config.step_time_ms);

        let mut engine = Self {
            config,
            seed,
            catalog,
            presets,
            mapping,
            voices,
            clock: Scheduler::new(),
            sequencer,
            player: SignaturePlayer::new(),
            mode: PlaybackMode::Idle,
            flags: Flags::default(),
            outbox: Outbox::default(),
            started: false,
            sequencer_generation: 0,
            startup_generation: 0,
            startup_signature_done: false,
            return_key: None,
        };
        engine.emit_preview();
        engine.outbox.mark_dirty();
        engine
    }

    pub fn seed(&self) -> &str {
        &self.seed
    }

    pub fn catalog(&self) -> &VoiceCatalog {
        &self.catalog
    }

    pub fn presets(&self) -> &PresetBank {
        &self.presets
    }

    pub fn mapping(&self) -> &AlgorithmMapping {
        &self.mapping
    }

    pub fn mode(&self) -> PlaybackMode {
        self.mode
    }

    pub fn flags(&self) -> Flags {
        self.flags
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    pub fn sequencer(&self) -> &StepSequencer {
        &self.sequencer
    }

    pub fn voices(&self) -> &VoiceLifecycleManager {
        &self.voices
    }

    pub fn active_key(&self) -> Option<&VoiceKey> {
        self.voices.active_key()
    }

    pub fn current_key(&self) -> &VoiceKey {
        self.voices.current_key()
    }

    pub fn is_signature_playing(&self) -> bool {
        self.player.is_playing()
    }

    /// Earliest pending timer, if any.
    pub fn next_due(&self) -> Option<u64> {
        self.clock.next_due()
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        PlaybackSnapshot {
            mode: self.mode,
            is_started: self.started,
            is_playing: self.sequencer.is_playing(),
            is_recording: self.sequencer.is_recording(),
            current_record_slot: self.sequencer.record_slot(),
            is_signature_playing: self.player.is_playing(),
            sequence: self
                .sequencer
                .slots()
                .iter()
                .map(|slot| slot.and_then(SequenceStep::value))
                .collect(),
            velocities: self.sequencer.velocities().to_vec(),
            play_index: self.sequencer.play_index(),
            step_time_ms: self.sequencer.step_time_ms(),
            is_latch_on: self.flags.latch,
            is_loop_enabled: self.flags.looping,
            is_signature_mode: self.flags.signature_mode,
            is_sequencer_mode: self.flags.sequencer_mode,
            current_key: self.voices.current_key().clone(),
            active_key: self.voices.active_key().cloned(),
        }
    }

    /// Takes every event produced so far.
    pub fn drain_events(&mut self) -> Vec<EngineEvent> {
        self.flush_state();
        self.outbox.drain()
    }

    /// Fires every timer due up to `now_ms`, in order, then moves the clock.
    pub fn advance_to(&mut self, now_ms: u64) {
        while let Some((due, timer)) = self.clock.pop_due(now_ms) {
            self.collect_released(due);
            self.fire(timer);
            self.flush_state();
        }
        self.clock.set_now(now_ms);
        self.collect_released(now_ms);
    }

    fn collect_released(&mut self, now_ms: u64) {
        self.voices.collect_released(now_ms);
        for err in self.voices.take_failures() {
            self.report(err);
        }
    }

    /// Advances to `now_ms`, then applies `message`.
    pub fn handle_at(&mut self, now_ms: u64, message: ControlMessage) {
        self.advance_to(now_ms);
        self.handle(message);
    }

    /// Applies one intent at the current logical time.
    ///
    /// Failures are logged and reported as [`EngineEvent::Error`]; none of
    /// them stop the engine.
    pub fn handle(&mut self, message: ControlMessage) {
        let result = match message {
            ControlMessage::Ping() => {
                self.outbox.push(EngineEvent::Pong());
                Ok(())
            }
            ControlMessage::Start => {
                self.start();
                Ok(())
            }
            ControlMessage::Stop => {
                self.stop();
                Ok(())
            }
            ControlMessage::SelectVoice(key) => self.select_voice(key),
            ControlMessage::ReleaseVoice => {
                self.release_voice();
                Ok(())
            }
            ControlMessage::ToggleLatch => {
                self.toggle_latch();
                Ok(())
            }
            ControlMessage::ToggleLoop => {
                self.toggle_loop();
                Ok(())
            }
            ControlMessage::ToggleSignatureMode => {
                self.toggle_signature_mode();
                Ok(())
            }
            ControlMessage::ToggleSequencerMode => {
                self.toggle_sequencer_mode();
                Ok(())
            }
            ControlMessage::StartRecording(slot) => self.start_recording(slot),
            ControlMessage::RecordStep(value) => {
                self.record_step(value);
                Ok(())
            }
            ControlMessage::ClearSlot(slot) => self.clear_slot(slot),
            ControlMessage::SetStepTime(ms) => self.set_step_time(ms),
            ControlMessage::SetStepCount(slots) => self.set_step_count(slots),
            ControlMessage::SetVelocity { slot, velocity } => self.set_velocity(slot, velocity),
            ControlMessage::SetSeed(seed) => {
                self.set_seed(&seed);
                Ok(())
            }
            ControlMessage::PlaySignature => self.toggle_signature(),
            ControlMessage::StopSignature => {
                self.stop_signature();
                Ok(())
            }
            ControlMessage::PlaySignatureFor(key) => self.play_signature_for(key),
            ControlMessage::PlaySequence => self.play_sequence(),
            ControlMessage::StopSequence => {
                self.stop_sequence();
                Ok(())
            }
        };

        if let Err(err) = result {
            self.report(err);
        }
        self.flush_state();
    }

    /// Buffers every voice and makes Hum audible. Does nothing if already started.
    pub fn start(&mut self) {
        if self.started {
            log::debug!("Start ignored: already running");
            return;
        }
        self.started = true;
        self.buffer_all_voices();
        log::info!(
            "Engine started (seed '{}', {} voices)",
            self.seed,
            self.catalog.voice_count()
        );
        playback_ctx!(self).activate(&VoiceKey::Hum, ActivateOptions::default());

        if self.config.startup_signature && !self.startup_signature_done {
            self.startup_signature_done = true;
            self.startup_generation += 1;
            self.clock.schedule(
                STARTUP_SIGNATURE_DELAY_MS,
                Timer::StartupSignature {
                    generation: self.startup_generation,
                },
            );
        }
        self.outbox.mark_dirty();
    }

    /// Stops all playback, disposes every voice and resets the session state.
    pub fn stop(&mut self) {
        if !self.started {
            log::debug!("Stop ignored: not running");
            return;
        }
        self.stop_current_mode();
        self.clock.clear();
        self.startup_generation += 1;
        self.voices.dispose_all(self.clock.now());
        self.started = false;
        self.reset_session();
        log::info!("Engine stopped");
    }

    /// Selects `key` and makes it audible. In signature mode a running engine
    /// plays the voice's signature instead.
    pub fn select_voice(&mut self, key: VoiceKey) -> Result<(), EngineError> {
        if !self.catalog.contains(&key) {
            return Err(EngineError::UnknownVoice(key));
        }
        if self.flags.signature_mode && self.started {
            return self.play_signature_for(key);
        }
        if !self.signature_driving() && !key.is_hum() {
            self.return_key = Some(key.clone());
        }
        playback_ctx!(self).activate(&key, ActivateOptions::default());
        Ok(())
    }

    /// Returns audio to Hum unless latch is on or a playback mode owns the voice.
    pub fn release_voice(&mut self) {
        if !self.started || self.mode != PlaybackMode::Idle {
            return;
        }
        if self.flags.latch {
            log::debug!("Latch on; keeping '{}'", self.voices.current_key());
            return;
        }
        playback_ctx!(self).activate(&VoiceKey::Hum, RELEASE_TO_HUM);
    }

    pub fn toggle_latch(&mut self) {
        self.flags.latch = !self.flags.latch;
        log::debug!("Latch {}", if self.flags.latch { "on" } else { "off" });
        if !self.flags.latch
            && self.started
            && self.mode == PlaybackMode::Idle
            && self.voices.active_key().is_some_and(|k| !k.is_hum())
        {
            playback_ctx!(self).activate(&VoiceKey::Hum, RELEASE_TO_HUM);
        }
        self.outbox.mark_dirty();
    }

    /// Flips looping. A running plain signature picks the change up at its end.
    pub fn toggle_loop(&mut self) {
        self.flags.looping = !self.flags.looping;
        if self.mode == PlaybackMode::PlainSignature {
            self.player.set_looping(self.flags.looping);
        }
        self.outbox.mark_dirty();
    }

    /// Flips signature mode, stopping the sequencer and any signature.
    pub fn toggle_signature_mode(&mut self) {
        self.flags.signature_mode = !self.flags.signature_mode;
        self.stop_current_mode();
        self.outbox.mark_dirty();
    }

    /// Flips sequencer mode. Leaving it ends recording and sequencer playback.
    pub fn toggle_sequencer_mode(&mut self) {
        self.flags.sequencer_mode = !self.flags.sequencer_mode;
        if !self.flags.sequencer_mode {
            self.sequencer.stop_recording();
            if self.mode.is_sequencer() {
                self.stop_sequence();
            }
        }
        self.outbox.mark_dirty();
    }

    pub fn start_recording(&mut self, slot: usize) -> Result<(), EngineError> {
        self.sequencer.start_recording(slot)?;
        self.outbox.mark_dirty();
        Ok(())
    }

    pub fn record_step(&mut self, value: usize) {
        if self.sequencer.record_step(value).is_some() {
            self.outbox.mark_dirty();
        }
    }

    pub fn clear_slot(&mut self, slot: usize) -> Result<(), EngineError> {
        self.sequencer.clear_slot(slot)?;
        self.outbox.mark_dirty();
        Ok(())
    }

    /// Sets the sequencer step time; a running sequencer uses it from its next step.
    pub fn set_step_time(&mut self, ms: u32) -> Result<(), EngineError> {
        self.sequencer.set_step_time(ms)?;
        self.outbox.mark_dirty();
        Ok(())
    }

    pub fn set_step_count(&mut self, slots: usize) -> Result<(), EngineError> {
        self.sequencer.set_step_count(slots)?;
        self.outbox.mark_dirty();
        Ok(())
    }

    pub fn set_velocity(&mut self, slot: usize, velocity: f32) -> Result<(), EngineError> {
        self.sequencer.set_velocity(slot, velocity)?;
        self.outbox.mark_dirty();
        Ok(())
    }

    /// Reseeds the session: stops playback, rebuilds presets and the algorithm
    /// mapping, resets the session state and, if running, rebuffers every voice.
    pub fn set_seed(&mut self, seed: &str) {
        let seed = normalize_seed(seed);
        self.stop_current_mode();
        self.clock.clear();
        self.startup_generation += 1;
        self.voices.dispose_all(self.clock.now());

        self.presets = PresetBank::build(&seed, &self.catalog);
        self.mapping = AlgorithmMapping::build(&seed, &self.catalog);
        log::info!("Seed set to '{seed}'");
        self.seed = seed;
        self.reset_session();

        if self.started {
            self.buffer_all_voices();
            playback_ctx!(self).activate(&VoiceKey::Hum, ActivateOptions::default());
        }
    }

    /// Stops a plain signature, or plays the selected voice's signature.
    pub fn toggle_signature(&mut self) -> Result<(), EngineError> {
        if self.mode == PlaybackMode::PlainSignature {
            self.stop_signature();
            return Ok(());
        }
        let key = self
            .return_key
            .clone()
            .unwrap_or_else(|| self.voices.current_key().clone());
        self.play_signature_for(key)
    }

    /// Plays the signature mapped to `key`, replacing whatever mode is active.
    pub fn play_signature_for(&mut self, key: VoiceKey) -> Result<(), EngineError> {
        if !self.started {
            return Err(EngineError::NotStarted);
        }
        if !self.catalog.contains(&key) {
            return Err(EngineError::UnknownVoice(key));
        }

        self.stop_current_mode();
        self.return_key = Some(key.clone());
        let signature = signature_for(
            &self.seed,
            &key,
            &self.mapping,
            &self.catalog,
            self.config.signature_steps,
        );
        self.mode = PlaybackMode::PlainSignature;
        let looping = self.flags.looping;
        self.player
            .start(&mut playback_ctx!(self), key, signature, looping, None);
        Ok(())
    }

    /// Stops signature playback. In signature-sequencer mode the whole
    /// sequencer stops. A no-op when no signature is playing.
    pub fn stop_signature(&mut self) {
        match self.mode {
            PlaybackMode::PlainSignature => {
                self.player.stop(&mut playback_ctx!(self));
                self.mode = PlaybackMode::Idle;
                self.outbox.mark_dirty();
            }
            PlaybackMode::SequencerSignature => self.stop_sequence(),
            PlaybackMode::Idle | PlaybackMode::SequencerPlain => {
                log::debug!("Stop signature ignored: no signature playing");
            }
        }
    }

    /// Starts the step sequencer in plain or signature mode. Does nothing if it is already playing.
    pub fn play_sequence(&mut self) -> Result<(), EngineError> {
        if !self.started {
            return Err(EngineError::NotStarted);
        }
        if self.mode.is_sequencer() {
            log::debug!("Sequencer already playing");
            return Ok(());
        }

        self.stop_current_mode();
        self.sequencer.begin_playback();
        self.flags.sequencer_mode = true;
        self.sequencer_generation += 1;
        self.outbox.mark_dirty();

        if self.flags.signature_mode {
            self.mode = PlaybackMode::SequencerSignature;
            log::info!("Signature sequencer started ({} slots)", self.sequencer.len());
            self.signature_sequencer_step();
        } else {
            self.mode = PlaybackMode::SequencerPlain;
            log::info!(
                "Sequencer started ({} slots, {} ms/step)",
                self.sequencer.len(),
                self.sequencer.step_time_ms()
            );
            self.sequencer_step();
        }
        Ok(())
    }

    /// Stops the step sequencer (and any signature it started). Audio returns
    /// to Hum unless latch is on. A no-op when the sequencer is not playing.
    pub fn stop_sequence(&mut self) {
        if !self.mode.is_sequencer() {
            log::debug!("Stop sequence ignored: sequencer not playing");
            return;
        }

        let generation = self.sequencer_generation;
        self.clock.cancel_where(|timer| {
            matches!(
                timer,
                Timer::SequencerStep { .. } | Timer::SignatureSequencerStep { .. }
            ) && timer.generation() == generation
        });
        self.sequencer_generation += 1;

        if self.mode == PlaybackMode::SequencerSignature {
            self.player.stop(&mut playback_ctx!(self));
        }
        self.sequencer.end_playback();
        self.mode = PlaybackMode::Idle;
        log::info!("Sequencer stopped");

        if !self.flags.latch {
            playback_ctx!(self).activate(&VoiceKey::Hum, ActivateOptions::default());
        }
        self.outbox.mark_dirty();
    }

    /// Stops every voice and frees all backend resources immediately.
    pub fn shutdown(&mut self) {
        self.stop();
        self.voices.release_all_now();
    }

    fn stop_current_mode(&mut self) {
        match self.mode {
            PlaybackMode::Idle => {}
            PlaybackMode::PlainSignature => {
                self.player.stop(&mut playback_ctx!(self));
                self.mode = PlaybackMode::Idle;
                self.outbox.mark_dirty();
            }
            PlaybackMode::SequencerPlain | PlaybackMode::SequencerSignature => {
                self.stop_sequence();
            }
        }
    }

    fn signature_driving(&self) -> bool {
        matches!(
            self.mode,
            PlaybackMode::PlainSignature | PlaybackMode::SequencerSignature
        )
    }

    fn fire(&mut self, timer: Timer) {
        match timer {
            Timer::SignatureStep { generation } => {
                self.player.on_step(&mut playback_ctx!(self), generation);
            }
            Timer::SignatureFinish { generation } => self.finish_signature(generation),
            Timer::SequencerStep { generation } => {
                if self.is_live_sequencer(generation, PlaybackMode::SequencerPlain) {
                    self.sequencer_step();
                }
            }
            Timer::SignatureSequencerStep { generation } => {
                if self.is_live_sequencer(generation, PlaybackMode::SequencerSignature) {
                    self.signature_sequencer_step();
                }
            }
            Timer::StartupSignature { generation } => {
                if generation != self.startup_generation || !self.started {
                    log::debug!("Discarding stale startup signature");
                } else if self.mode != PlaybackMode::Idle {
                    log::debug!("Skipping startup signature: {} active", self.mode.as_str());
                } else if let Err(err) = self.play_signature_for(VoiceKey::Hum) {
                    self.report(err);
                }
            }
        }
    }

    fn is_live_sequencer(&self, generation: u64, mode: PlaybackMode) -> bool {
        let live = self.mode == mode && generation == self.sequencer_generation;
        if !live {
            log::debug!("Discarding stale sequencer step (generation {generation})");
        }
        live
    }

    fn finish_signature(&mut self, generation: u64) {
        let Some(finished) = self.player.on_finish(&mut playback_ctx!(self), generation) else {
            return;
        };
        match finished.completion {
            Some(Completion::ResumeSignatureSequencer { generation }) => {
                if self.is_live_sequencer(generation, PlaybackMode::SequencerSignature) {
                    let gap = u64::from(self.sequencer.step_time_ms()).max(SIG_SEQ_GAP_MIN_MS);
                    self.clock
                        .schedule(gap, Timer::SignatureSequencerStep { generation });
                }
            }
            None => {
                if self.mode == PlaybackMode::PlainSignature {
                    self.mode = PlaybackMode::Idle;
                }
                self.outbox
                    .push(EngineEvent::SignatureFinished { key: finished.key });
            }
        }
        self.outbox.mark_dirty();
    }

    /// One slot of plain sequencer playback.
    fn sequencer_step(&mut self) {
        let Some(visit) = self.sequencer.next_visit(self.flags.looping) else {
            self.stop_sequence();
            return;
        };
        self.outbox.push(EngineEvent::SequencerStep {
            index: visit.index,
            velocity: visit.velocity,
        });

        let mut ctx = playback_ctx!(self);
        match visit.step {
            None | Some(SequenceStep::Silence) => {
                if !ctx.flags.latch {
                    ctx.activate(&VoiceKey::Hum, ActivateOptions::default());
                }
            }
            Some(step) => match ctx.catalog.resolve(step) {
                Some(key) => {
                    ctx.activate(&key, ActivateOptions::default());
                }
                None => log::debug!("Slot {} holds an unknown voice; skipping", visit.index),
            },
        }

        let delay = u64::from(self.sequencer.step_time_ms());
        self.clock.schedule(
            delay,
            Timer::SequencerStep {
                generation: self.sequencer_generation,
            },
        );
        self.outbox.mark_dirty();
    }

    /// One slot of signature-sequencer playback: start the slot's signature,
    /// or wait and move on if the slot selects nothing.
    fn signature_sequencer_step(&mut self) {
        let Some(visit) = self.sequencer.next_visit(self.flags.looping) else {
            self.stop_sequence();
            return;
        };
        self.outbox.push(EngineEvent::SequencerStep {
            index: visit.index,
            velocity: visit.velocity,
        });
        self.outbox.mark_dirty();

        let generation = self.sequencer_generation;
        let key = visit.step.and_then(|step| self.catalog.resolve(step));
        let Some(key) = key else {
            let wait = u64::from(self.sequencer.step_time_ms()).max(SIG_SEQ_EMPTY_WAIT_MIN_MS);
            self.clock
                .schedule(wait, Timer::SignatureSequencerStep { generation });
            return;
        };

        let signature = signature_for(
            &self.seed,
            &key,
            &self.mapping,
            &self.catalog,
            self.config.signature_steps,
        );
        let completion = Completion::ResumeSignatureSequencer { generation };
        self.player.start(
            &mut playback_ctx!(self),
            key,
            signature,
            false,
            Some(completion),
        );
    }

    fn buffer_all_voices(&mut self) {
        let now = self.clock.now();
        let keys: Vec<VoiceKey> = self.catalog.all_keys().collect();
        for key in keys {
            let Some(descriptor) = self.presets.descriptor_for(&key) else {
                continue;
            };
            if let Err(err) = self.voices.buffer(&key, &descriptor, now) {
                self.report(err);
            }
        }
    }

    /// Back to a fresh session for the current seed.
    fn reset_session(&mut self) {
        self.mode = PlaybackMode::Idle;
        self.flags = Flags::default();
        self.sequencer = StepSequencer::new(self.config.slot_count, self.config.step_time_ms);
        self.return_key = None;
        self.startup_signature_done = false;
        self.voices.set_current(VoiceKey::Hum);
        self.emit_preview();
        self.outbox.mark_dirty();
    }

    fn emit_preview(&mut self) {
        let key = preview_key(&self.seed, &self.catalog);
        let descriptor = self.presets.get(&key).cloned();
        self.outbox.push(EngineEvent::Preview { key, descriptor });
    }

    fn report(&mut self, err: EngineError) {
        match err {
            EngineError::NotStarted => log::warn!("Ignoring playback request: {err}"),
            err => {
                log::warn!("{err}");
                self.outbox.push(EngineEvent::Error {
                    message: err.to_string(),
                });
            }
        }
    }

    fn flush_state(&mut self) {
        if self.outbox.state_dirty {
            self.outbox.state_dirty = false;
            let snapshot = self.snapshot();
            self.outbox
                .push(EngineEvent::PlaybackStateChanged(snapshot));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio_engine::backend::NullBackend;

    fn config() -> EngineConfig {
        EngineConfig::default()
            .with_seed("abc")
            .with_shapes(["A", "B", "C"])
            .with_startup_signature(false)
    }

    fn started(config: EngineConfig) -> SignatureEngine {
        let mut engine = SignatureEngine::new(config, Box::new(NullBackend::new()));
        engine.handle_at(0, ControlMessage::Start);
        engine.drain_events();
        engine
    }

    fn a() -> VoiceKey {
        VoiceKey::shape("A")
    }

    fn b() -> VoiceKey {
        VoiceKey::shape("B")
    }

    #[test]
    fn test_new_emits_preview() {
        let mut engine = SignatureEngine::new(config(), Box::new(NullBackend::new()));
        let events = engine.drain_events();

        assert!(events.iter().any(|e| matches!(
            e,
            EngineEvent::Preview { key, descriptor: Some(_) } if *key == VoiceKey::shape("C")
        )));
        assert!(!engine.is_started());
        assert_eq!(engine.active_key(), None);
    }

    #[test]
    fn test_start_buffers_and_activates_hum() {
        let engine = started(config());

        assert!(engine.is_started());
        assert_eq!(engine.voices().buffered_count(), 4);
        assert_eq!(engine.active_key(), Some(&VoiceKey::Hum));
        assert_eq!(engine.voices().audible_count(), 1);
    }

    #[test]
    fn test_play_signature_for_restores_previous_voice() {
        let mut engine = started(config());
        engine.handle_at(5, ControlMessage::SelectVoice(a()));
        assert_eq!(engine.mapping().algorithm_for(&b()), 4);

        engine.handle_at(10, ControlMessage::PlaySignatureFor(b()));
        assert_eq!(engine.mode(), PlaybackMode::PlainSignature);
        assert_eq!(engine.active_key(), Some(&VoiceKey::Hum));

        engine.advance_to(3885);
        assert_eq!(engine.active_key(), Some(&b()));
        engine.advance_to(4009);
        assert_eq!(engine.active_key(), Some(&b()));
        assert!(engine.is_signature_playing());

        engine.drain_events();
        engine.advance_to(4010);
        assert_eq!(engine.active_key(), Some(&a()));
        assert_eq!(engine.current_key(), &a());
        assert_eq!(engine.mode(), PlaybackMode::Idle);
        assert!(
            engine
                .drain_events()
                .contains(&EngineEvent::SignatureFinished { key: b() })
        );
    }

    #[test]
    fn test_plain_sequencer_stops_after_one_pass() {
        let mut engine = started(config());
        engine.handle(ControlMessage::SetStepTime(400));
        engine.handle(ControlMessage::StartRecording(0));
        for value in [1, 9, 0, 2] {
            engine.handle(ControlMessage::RecordStep(value));
        }
        engine.handle(ControlMessage::ClearSlot(1));
        engine.drain_events();

        engine.handle(ControlMessage::PlaySequence);
        assert_eq!(engine.mode(), PlaybackMode::SequencerPlain);
        assert_eq!(engine.active_key(), Some(&a()));

        engine.advance_to(400);
        assert_eq!(engine.active_key(), Some(&VoiceKey::Hum));
        engine.advance_to(1200);
        assert_eq!(engine.active_key(), Some(&b()));

        engine.advance_to(3199);
        assert!(engine.sequencer().is_playing());
        engine.advance_to(3200);
        assert!(!engine.sequencer().is_playing());
        assert_eq!(engine.mode(), PlaybackMode::Idle);
        assert_eq!(engine.active_key(), Some(&VoiceKey::Hum));

        let visited: Vec<usize> = engine
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::SequencerStep { index, .. } => Some(index),
                _ => None,
            })
            .collect();
        assert_eq!(visited, (0..8).collect::<Vec<_>>());
    }

    #[test]
    fn test_signature_sequencer_timing() {
        let mut engine = started(config());
        engine.handle(ControlMessage::StartRecording(0));
        engine.handle(ControlMessage::RecordStep(2));
        engine.handle(ControlMessage::ToggleSignatureMode);

        engine.handle(ControlMessage::PlaySequence);
        assert_eq!(engine.mode(), PlaybackMode::SequencerSignature);
        assert!(engine.is_signature_playing());

        engine.advance_to(3999);
        assert!(engine.is_signature_playing());
        engine.advance_to(4000);
        assert!(!engine.is_signature_playing());
        assert_eq!(engine.next_due(), Some(4200));
        assert_eq!(engine.sequencer().play_index(), 1);

        engine.advance_to(5599);
        assert_eq!(engine.mode(), PlaybackMode::SequencerSignature);
        engine.advance_to(5600);
        assert_eq!(engine.mode(), PlaybackMode::Idle);
        assert_eq!(engine.next_due(), None);
    }

    #[test]
    fn test_stopping_sequencer_stops_inner_signature() {
        let mut engine = started(config());
        engine.handle(ControlMessage::StartRecording(0));
        engine.handle(ControlMessage::RecordStep(2));
        engine.handle(ControlMessage::ToggleSignatureMode);
        engine.handle(ControlMessage::PlaySequence);

        engine.handle_at(500, ControlMessage::StopSequence);

        assert_eq!(engine.mode(), PlaybackMode::Idle);
        assert!(!engine.is_signature_playing());
        assert_eq!(engine.next_due(), None);
        assert_eq!(engine.active_key(), Some(&VoiceKey::Hum));
    }

    #[test]
    fn test_play_signature_replaces_sequencer() {
        let mut engine = started(config());
        engine.handle(ControlMessage::PlaySequence);
        engine.handle_at(100, ControlMessage::PlaySignatureFor(a()));

        assert_eq!(engine.mode(), PlaybackMode::PlainSignature);
        assert!(!engine.sequencer().is_playing());

        engine.handle(ControlMessage::PlaySequence);
        assert_eq!(engine.mode(), PlaybackMode::SequencerPlain);
        assert!(!engine.is_signature_playing());
    }

    #[test]
    fn test_release_respects_latch() {
        let mut engine = started(config());
        engine.handle(ControlMessage::SelectVoice(a()));
        engine.handle(ControlMessage::ReleaseVoice);
        assert_eq!(engine.active_key(), Some(&VoiceKey::Hum));
        assert_eq!(engine.current_key(), &a());

        engine.handle(ControlMessage::ToggleLatch);
        engine.handle(ControlMessage::SelectVoice(b()));
        engine.handle(ControlMessage::ReleaseVoice);
        assert_eq!(engine.active_key(), Some(&b()));

        engine.handle(ControlMessage::ToggleLatch);
        assert_eq!(engine.active_key(), Some(&VoiceKey::Hum));
    }

    #[test]
    fn test_stop_resets_and_is_idempotent() {
        let mut engine = started(config());
        engine.handle(ControlMessage::ToggleLoop);
        engine.handle(ControlMessage::StartRecording(0));
        engine.handle(ControlMessage::RecordStep(3));
        engine.handle(ControlMessage::PlaySequence);

        engine.handle_at(250, ControlMessage::Stop);
        let snapshot = engine.snapshot();
        assert!(!snapshot.is_started);
        assert!(!snapshot.is_playing);
        assert!(!snapshot.is_loop_enabled);
        assert!(snapshot.sequence.iter().all(Option::is_none));
        assert_eq!(snapshot.active_key, None);
        assert_eq!(engine.next_due(), None);
        assert!(
            engine
                .drain_events()
                .iter()
                .any(|e| matches!(e, EngineEvent::Preview { .. }))
        );

        engine.handle_at(300, ControlMessage::Stop);
        assert!(engine.drain_events().is_empty());
        assert_eq!(engine.voices().pending_release_count(), 0);
    }

    #[test]
    fn test_identical_intents_give_identical_events() {
        let script = [
            (0, ControlMessage::Start),
            (40, ControlMessage::SelectVoice(VoiceKey::shape("C"))),
            (90, ControlMessage::PlaySignature),
            (1_500, ControlMessage::ToggleLoop),
            (2_000, ControlMessage::StartRecording(2)),
            (2_010, ControlMessage::RecordStep(1)),
            (2_020, ControlMessage::RecordStep(3)),
            (2_500, ControlMessage::PlaySequence),
            (6_000, ControlMessage::ToggleSignatureMode),
            (6_100, ControlMessage::PlaySequence),
            (20_000, ControlMessage::Stop),
        ];
        let run = || {
            let mut engine = SignatureEngine::new(
                config().with_startup_signature(true),
                Box::new(NullBackend::new()),
            );
            for (at, message) in script.iter().cloned() {
                engine.handle_at(at, message);
            }
            engine.advance_to(25_000);
            engine.drain_events()
        };

        let first = run();
        assert!(first.len() > 10);
        assert_eq!(first, run());
    }

    #[test]
    fn test_failed_buffer_reports_error() {
        let backend = NullBackend::failing_for([b()]);
        let mut engine = SignatureEngine::new(config(), Box::new(backend));
        engine.handle(ControlMessage::Start);

        let errors: Vec<String> = engine
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::Error { message } => Some(message),
                _ => None,
            })
            .collect();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("'B'"));

        engine.handle(ControlMessage::SelectVoice(b()));
        assert_eq!(engine.active_key(), Some(&VoiceKey::Hum));
        assert_eq!(engine.current_key(), &b());
    }

    #[test]
    fn test_rejected_intents() {
        let mut engine = SignatureEngine::new(config(), Box::new(NullBackend::new()));
        engine.drain_events();

        engine.handle(ControlMessage::PlaySignature);
        assert!(engine.drain_events().is_empty());

        engine.handle(ControlMessage::SelectVoice(VoiceKey::shape("Z")));
        engine.handle(ControlMessage::SetStepTime(10));
        let errors = engine
            .drain_events()
            .into_iter()
            .filter(|e| matches!(e, EngineEvent::Error { .. }))
            .count();
        assert_eq!(errors, 2);
    }

    #[test]
    fn test_startup_signature_plays_once() {
        let mut engine = started(config().with_startup_signature(true));
        assert_eq!(engine.next_due(), Some(200));

        engine.advance_to(200);
        assert_eq!(engine.mode(), PlaybackMode::PlainSignature);
        engine.advance_to(10_000);
        assert_eq!(engine.mode(), PlaybackMode::Idle);
        assert!(
            engine
                .drain_events()
                .contains(&EngineEvent::SignatureFinished { key: VoiceKey::Hum })
        );
        assert_eq!(engine.active_key(), Some(&VoiceKey::Hum));
    }

    #[test]
    fn test_set_seed_rebuilds_session() {
        let mut engine = started(config());
        engine.handle(ControlMessage::SelectVoice(a()));

        engine.handle_at(100, ControlMessage::SetSeed("  ".to_string()));

        assert_eq!(engine.seed(), "default");
        assert_eq!(engine.active_key(), Some(&VoiceKey::Hum));
        assert_eq!(engine.voices().buffered_count(), 4);
        assert_eq!(engine.voices().pending_release_count(), 4);
        engine.advance_to(114);
        assert_eq!(engine.voices().pending_release_count(), 0);
    }

    fn visited_slots(events: Vec<EngineEvent>) -> Vec<usize> {
        events
            .into_iter()
            .filter_map(|e| match e {
                EngineEvent::SequencerStep { index, .. } => Some(index),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_zero_length_signature_config_does_not_hang() {
        let config = EngineConfig {
            signature_steps: 0,
            ..config()
        };
        let mut engine = started(config);

        engine.handle(ControlMessage::PlaySignatureFor(a()));
        engine.advance_to(1_000_000);

        assert_eq!(engine.mode(), PlaybackMode::Idle);
        assert!(!engine.is_signature_playing());
        assert_eq!(engine.next_due(), None);
    }

    #[test]
    fn test_select_in_signature_mode_plays_signature() {
        let mut engine = started(config());
        engine.handle(ControlMessage::ToggleSignatureMode);

        engine.handle(ControlMessage::SelectVoice(b()));

        assert_eq!(engine.mode(), PlaybackMode::PlainSignature);
        assert_eq!(engine.player.playing_key(), Some(&b()));

        engine.handle(ControlMessage::ToggleLoop);
        engine.handle_at(100, ControlMessage::SelectVoice(a()));
        assert_eq!(engine.player.playing_key(), Some(&a()));
        engine.advance_to(100_000);
        assert!(engine.is_signature_playing());
    }

    #[test]
    fn test_play_signature_toggle_reuses_last_signature_voice() {
        let mut engine = started(config());
        engine.handle(ControlMessage::SelectVoice(a()));
        engine.handle_at(10, ControlMessage::PlaySignatureFor(b()));
        engine.advance_to(5_000);
        assert_eq!(engine.mode(), PlaybackMode::Idle);
        assert_eq!(engine.current_key(), &a());

        engine.handle(ControlMessage::PlaySignature);

        assert_eq!(engine.player.playing_key(), Some(&b()));
    }

    #[test]
    fn test_empty_slot_keeps_voice_while_latched() {
        let mut engine = started(config());
        engine.handle(ControlMessage::ToggleLatch);
        engine.handle(ControlMessage::StartRecording(0));
        engine.handle(ControlMessage::RecordStep(1));

        engine.handle(ControlMessage::PlaySequence);
        assert_eq!(engine.active_key(), Some(&a()));

        engine.advance_to(200);
        assert_eq!(engine.sequencer().play_index(), 2);
        assert_eq!(engine.active_key(), Some(&a()));
        engine.advance_to(1_400);
        assert_eq!(engine.active_key(), Some(&a()));
    }

    #[test]
    fn test_looping_sequencer_keeps_running() {
        let mut engine = started(config());
        engine.handle(ControlMessage::ToggleLoop);
        engine.handle(ControlMessage::StartRecording(0));
        engine.handle(ControlMessage::RecordStep(1));
        engine.drain_events();

        engine.handle(ControlMessage::PlaySequence);
        engine.advance_to(1_600);
        assert_eq!(engine.mode(), PlaybackMode::SequencerPlain);
        assert_eq!(engine.active_key(), Some(&a()));

        engine.advance_to(10_000);
        assert_eq!(engine.mode(), PlaybackMode::SequencerPlain);
        let visited = visited_slots(engine.drain_events());
        assert_eq!(visited.len(), 51);
        assert_eq!(visited[8], 0);
        assert_eq!(visited[50], 2);
    }

    #[test]
    fn test_stale_sequencer_timer_is_discarded() {
        let mut engine = started(config());
        engine.handle(ControlMessage::PlaySequence);
        let old_generation = engine.sequencer_generation;
        engine.handle_at(100, ControlMessage::StopSequence);
        engine.handle(ControlMessage::PlaySequence);
        assert_ne!(engine.sequencer_generation, old_generation);
        engine.drain_events();

        engine.clock.schedule(
            50,
            Timer::SequencerStep {
                generation: old_generation,
            },
        );
        engine.advance_to(299);
        assert_eq!(engine.sequencer().play_index(), 1);
        assert!(visited_slots(engine.drain_events()).is_empty());

        engine.advance_to(300);
        assert_eq!(visited_slots(engine.drain_events()), vec![1]);
    }

    #[test]
    fn test_ping() {
        let mut engine = SignatureEngine::new(config(), Box::new(NullBackend::new()));
        engine.handle(ControlMessage::Ping());
        assert!(engine.drain_events().contains(&EngineEvent::Pong()));
    }
}
