//! Timed signature playback.
//!
//! [`SignaturePlayer`] walks a generated [`Signature`] one step per timer,
//! activating the voice each step selects. Every start and stop bumps the
//! player's generation; timers scheduled under an older generation are
//! discarded when they fire.

use crate::audio_engine::PlaybackContext;
use crate::audio_engine::clock::Timer;
use crate::audio_engine::signature::Signature;
use crate::audio_engine::voice_key::VoiceKey;
use crate::audio_engine::voice_manager::ActivateOptions;

/// Work to run when a signature finishes on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    /// Continue the signature sequencer run identified by `generation`.
    ResumeSignatureSequencer { generation: u64 },
}

/// Outcome of a signature that played to its end.
#[derive(Debug, Clone, PartialEq)]
pub struct Finished {
    pub key: VoiceKey,
    pub completion: Option<Completion>,
}

#[derive(Debug, Clone)]
struct ActiveSignature {
    key: VoiceKey,
    signature: Signature,
    index: usize,
    looping: bool,
    /// Voice restored when playback ends.
    start_key: VoiceKey,
    completion: Option<Completion>,
}

#[derive(Debug, Clone, Default)]
pub struct SignaturePlayer {
    active: Option<ActiveSignature>,
    generation: u64,
}

impl SignaturePlayer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_playing(&self) -> bool {
        self.active.is_some()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Voice whose signature is playing.
    pub fn playing_key(&self) -> Option<&VoiceKey> {
        self.active.as_ref().map(|a| &a.key)
    }

    /// Updates the loop flag of the running signature.
    pub fn set_looping(&mut self, looping: bool) {
        if let Some(active) = self.active.as_mut() {
            active.looping = looping;
        }
    }

    /// Starts `signature` and plays its first step immediately.
    ///
    /// A signature that is already playing is stopped (and its start voice
    /// restored) first. The voice selected right now becomes the voice this
    /// run restores when it ends.
    pub(crate) fn start(
        &mut self,
        ctx: &mut PlaybackContext<'_>,
        key: VoiceKey,
        signature: Signature,
        looping: bool,
        completion: Option<Completion>,
    ) {
        self.stop(ctx);

        self.generation += 1;
        log::info!(
            "Playing signature for '{key}' (algorithm {}, {} ms/step{})",
            signature.algorithm,
            signature.step_ms,
            if looping { ", loop" } else { "" }
        );
        self.active = Some(ActiveSignature {
            key,
            signature,
            index: 0,
            looping,
            start_key: ctx.voices.current_key().clone(),
            completion,
        });
        ctx.outbox.mark_dirty();
        self.tick(ctx);
    }

    /// Handles a [`Timer::SignatureStep`].
    pub(crate) fn on_step(&mut self, ctx: &mut PlaybackContext<'_>, generation: u64) {
        if generation != self.generation || self.active.is_none() {
            log::debug!("Discarding stale signature step (generation {generation})");
            return;
        }
        self.tick(ctx);
    }

    fn tick(&mut self, ctx: &mut PlaybackContext<'_>) {
        let Some(active) = self.active.as_mut() else {
            return;
        };
        let Some(&step) = active.signature.steps.get(active.index) else {
            // Empty signature: finish after one step instead of hanging.
            let generation = self.generation;
            ctx.clock
                .schedule(active.signature.step_ms, Timer::SignatureFinish { generation });
            return;
        };

        if let Some(key) = ctx.catalog.resolve(step) {
            ctx.activate(&key, ActivateOptions::default());
        }

        active.index += 1;
        let delay = active.signature.step_ms;
        let generation = self.generation;
        if active.index < active.signature.steps.len() {
            ctx.clock.schedule(delay, Timer::SignatureStep { generation });
        } else if active.looping {
            active.index = 0;
            ctx.clock.schedule(delay, Timer::SignatureStep { generation });
        } else {
            // Let the last step sound for one step before restoring.
            ctx.clock.schedule(delay, Timer::SignatureFinish { generation });
        }
    }

    /// Handles a [`Timer::SignatureFinish`]: restores the start voice and ends the run.
    pub(crate) fn on_finish(
        &mut self,
        ctx: &mut PlaybackContext<'_>,
        generation: u64,
    ) -> Option<Finished> {
        if generation != self.generation {
            log::debug!("Discarding stale signature finish (generation {generation})");
            return None;
        }
        let active = self.active.take()?;
        self.generation += 1;
        restore(ctx, &active.start_key);
        log::info!("Signature for '{}' complete", active.key);
        Some(Finished {
            key: active.key,
            completion: active.completion,
        })
    }

    /// Cancels the running signature and restores the voice selected before it
    /// started. Returns `false` (and does nothing) when nothing is playing.
    pub(crate) fn stop(&mut self, ctx: &mut PlaybackContext<'_>) -> bool {
        let Some(active) = self.active.take() else {
            return false;
        };

        let generation = self.generation;
        ctx.clock.cancel_where(|timer| {
            matches!(
                timer,
                Timer::SignatureStep { .. } | Timer::SignatureFinish { .. }
            ) && timer.generation() == generation
        });
        self.generation += 1;

        log::info!("Stopped signature for '{}'", active.key);
        restore(ctx, &active.start_key);
        true
    }
}

/// Ends latch and makes `start_key` audible again.
fn restore(ctx: &mut PlaybackContext<'_>, start_key: &VoiceKey) {
    if ctx.flags.latch {
        log::debug!("Releasing latch at end of signature");
        ctx.flags.latch = false;
    }
    ctx.activate(start_key, ActivateOptions::default());
    ctx.outbox.mark_dirty();
}
