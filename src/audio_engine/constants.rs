//! Audio engine configuration constants and limits.
//!
//! Timing values are empirical tuning constants carried over from the
//! browser implementation; they are not derived from a formula.

/// Crossfade window used when switching the audible voice (seconds).
pub const SWITCH_FADE_SEC: f32 = 0.008;

/// Fade-out window used before a voice is disposed (seconds).
pub const DISPOSE_FADE_SEC: f32 = 0.012;

/// Extra wait after a dispose fade before resources are released (milliseconds).
pub const DISPOSE_GUARD_MS: u64 = 2;

/// Number of steps in a generated signature.
pub const SIGNATURE_STEPS: usize = 32;

/// Length of the repeated phrase used by the looped-phrase algorithm.
pub const PHRASE_LEN: usize = 8;

/// Number of distinct signature algorithms.
pub const NUM_ALGORITHMS: u8 = 10;

/// Algorithm used when an invalid id is requested.
pub const FALLBACK_ALGORITHM: u8 = 2;

/// Largest palette the constrained algorithm draws shapes from.
pub const CONSTRAINED_PALETTE_MAX: usize = 6;

/// Step time for the fast algorithms (looped phrase, fibonacci onsets).
pub const STEP_MS_FAST: u64 = 100;

/// Step time for most algorithms.
pub const STEP_MS_DEFAULT: u64 = 125;

/// Step time for run-length bursts.
pub const STEP_MS_BURST: u64 = 150;

/// Step time for periodic refresh.
pub const STEP_MS_SLOW: u64 = 200;

/// Default number of sequencer slots.
pub const DEFAULT_SLOTS: usize = 8;

/// Slot counts the sequencer can be resized to.
pub const VALID_SLOT_COUNTS: [usize; 4] = [8, 16, 32, 64];

/// Default sequencer step time (milliseconds).
pub const DEFAULT_STEP_TIME_MS: u32 = 200;

/// Minimum sequencer step time (milliseconds).
pub const STEP_TIME_MIN_MS: u32 = 50;

/// Maximum sequencer step time (milliseconds).
pub const STEP_TIME_MAX_MS: u32 = 2000;

/// Minimum wait on an empty slot in signature-sequencer mode (milliseconds).
pub const SIG_SEQ_EMPTY_WAIT_MIN_MS: u64 = 50;

/// Minimum wait after an inner signature completes (milliseconds).
pub const SIG_SEQ_GAP_MIN_MS: u64 = 30;

/// Delay between start and the one-time startup signature (milliseconds).
pub const STARTUP_SIGNATURE_DELAY_MS: u64 = 200;

/// Minimum per-step velocity.
pub const VELOCITY_MIN: f32 = 0.0;

/// Maximum per-step velocity.
pub const VELOCITY_MAX: f32 = 1.0;

/// Seed used when the supplied seed is empty or whitespace.
pub const FALLBACK_SEED: &str = "default";

/// Capacity of the intent ring buffer (UI -> engine).
pub const CONTROL_QUEUE_CAPACITY: usize = 1024;

/// Capacity of the event ring buffer (engine -> UI).
pub const EVENT_QUEUE_CAPACITY: usize = 4096;

/// How often the runtime thread advances the logical clock (milliseconds).
pub const TICK_PERIOD_MS: u64 = 5;
