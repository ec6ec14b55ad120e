//! Engine configuration.
//!
//! [`EngineConfig::default`] reproduces the tuning constants in
//! [`constants`](crate::audio_engine::constants). The `with_*` builders ignore
//! out-of-range input with a warning instead of failing, so a bad value from
//! the UI never prevents the engine from starting.

use crate::audio_engine::constants::{
    DEFAULT_SLOTS, DEFAULT_STEP_TIME_MS, DISPOSE_FADE_SEC, DISPOSE_GUARD_MS, FALLBACK_SEED,
    SIGNATURE_STEPS, STEP_TIME_MAX_MS, STEP_TIME_MIN_MS, SWITCH_FADE_SEC, TICK_PERIOD_MS,
    VALID_SLOT_COUNTS,
};
use crate::audio_engine::voice_key::{DEFAULT_SHAPES, VoiceCatalog};

/// Crossfade and disposal windows.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FadeTimings {
    /// Ramp used when switching the audible voice (seconds).
    pub switch_sec: f32,
    /// Ramp used before disposal (seconds).
    pub dispose_sec: f32,
    /// Wait after the dispose ramp before resources are released (milliseconds).
    pub guard_ms: u64,
}

impl FadeTimings {
    /// Milliseconds between starting a dispose fade and releasing the voice.
    pub fn dispose_delay_ms(&self) -> u64 {
        (self.dispose_sec * 1000.0).round() as u64 + self.guard_ms
    }
}

impl Default for FadeTimings {
    fn default() -> Self {
        Self {
            switch_sec: SWITCH_FADE_SEC,
            dispose_sec: DISPOSE_FADE_SEC,
            guard_ms: DISPOSE_GUARD_MS,
        }
    }
}

/// Overridable engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub seed: String,
    pub shapes: Vec<String>,
    pub fades: FadeTimings,
    pub signature_steps: usize,
    pub step_time_ms: u32,
    pub slot_count: usize,
    pub tick_period_ms: u64,
    /// Play Hum's signature once, shortly after the first start of a session.
    pub startup_signature: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            seed: FALLBACK_SEED.to_string(),
            shapes: DEFAULT_SHAPES.iter().map(|s| s.to_string()).collect(),
            fades: FadeTimings::default(),
            signature_steps: SIGNATURE_STEPS,
            step_time_ms: DEFAULT_STEP_TIME_MS,
            slot_count: DEFAULT_SLOTS,
            tick_period_ms: TICK_PERIOD_MS,
            startup_signature: true,
        }
    }
}

impl EngineConfig {
    pub fn with_seed(mut self, seed: &str) -> Self {
        self.seed = normalize_seed(seed);
        self
    }

    /// Replaces the shape list. An empty list keeps the current one.
    pub fn with_shapes<I, S>(mut self, shapes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let shapes: Vec<String> = shapes.into_iter().map(Into::into).collect();
        if shapes.is_empty() {
            log::warn!("Ignoring empty shape list");
        } else {
            self.shapes = shapes;
        }
        self
    }

    pub fn with_fades(mut self, switch_sec: f32, dispose_sec: f32) -> Self {
        let valid = |v: f32| v.is_finite() && v >= 0.0;
        if valid(switch_sec) && valid(dispose_sec) {
            self.fades.switch_sec = switch_sec;
            self.fades.dispose_sec = dispose_sec;
        } else {
            log::warn!("Ignoring invalid fade windows ({switch_sec}, {dispose_sec})");
        }
        self
    }

    pub fn with_signature_steps(mut self, steps: usize) -> Self {
        if steps == 0 {
            log::warn!("Ignoring zero signature length");
        } else {
            self.signature_steps = steps;
        }
        self
    }

    pub fn with_step_time_ms(mut self, ms: u32) -> Self {
        if (STEP_TIME_MIN_MS..=STEP_TIME_MAX_MS).contains(&ms) {
            self.step_time_ms = ms;
        } else {
            log::warn!("Ignoring step time {ms} ms");
        }
        self
    }

    pub fn with_slot_count(mut self, slots: usize) -> Self {
        if VALID_SLOT_COUNTS.contains(&slots) {
            self.slot_count = slots;
        } else {
            log::warn!("Ignoring slot count {slots}");
        }
        self
    }

    pub fn with_tick_period_ms(mut self, ms: u64) -> Self {
        self.tick_period_ms = ms.max(1);
        self
    }

    pub fn with_startup_signature(mut self, enabled: bool) -> Self {
        self.startup_signature = enabled;
        self
    }

    /// Runs every field through its `with_*` builder, so a config assembled
    /// as a struct literal gets the same checks.
    pub fn validated(self) -> Self {
        let EngineConfig {
            seed,
            shapes,
            fades,
            signature_steps,
            step_time_ms,
            slot_count,
            tick_period_ms,
            startup_signature,
        } = self;

        let mut config = EngineConfig::default()
            .with_seed(&seed)
            .with_shapes(shapes)
            .with_fades(fades.switch_sec, fades.dispose_sec)
            .with_signature_steps(signature_steps)
            .with_step_time_ms(step_time_ms)
            .with_slot_count(slot_count)
            .with_tick_period_ms(tick_period_ms)
            .with_startup_signature(startup_signature);
        config.fades.guard_ms = fades.guard_ms;
        config
    }

    pub(crate) fn catalog(&self) -> VoiceCatalog {
        VoiceCatalog::new(&self.shapes)
    }
}

/// Trims `seed`; empty or whitespace-only seeds become the fallback literal.
pub fn normalize_seed(seed: &str) -> String {
    let trimmed = seed.trim();
    if trimmed.is_empty() {
        FALLBACK_SEED.to_string()
    } else {
        trimmed.to_string()
    }
}
