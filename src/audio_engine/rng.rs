//! Deterministic pseudo-random streams keyed by string seeds.
//!
//! Every random decision in the engine comes from a [`SeededRandom`] derived
//! from the session seed plus a purpose suffix. Two generators built from the
//! same string produce bit-identical output forever.

/// Fast integer hash-mix generator. Not suitable for cryptography.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeededRandom {
    state: u32,
}

impl SeededRandom {
    /// Folds the UTF-16 code units of `seed` into the initial 32-bit state.
    pub fn new(seed: &str) -> Self {
        let len = seed.encode_utf16().count() as u32;
        let mut state = 0x6d2b_79f5_u32 ^ len;
        for unit in seed.encode_utf16() {
            state = (state ^ u32::from(unit)).wrapping_mul(2_654_435_761);
        }
        Self { state }
    }

    /// Next value in `[0, 1)`.
    pub fn next_f64(&mut self) -> f64 {
        let a = self.state;
        self.state = (a ^ (a >> 15)).wrapping_mul(1 | a);
        f64::from((self.state >> 16) & 0xffff) / 65_536.0
    }

    /// Next value in `[0, 1)` narrowed to `f32`.
    pub fn next_f32(&mut self) -> f32 {
        self.next_f64() as f32
    }

    /// Uniform integer in `lo..=hi`.
    pub fn int_inclusive(&mut self, lo: usize, hi: usize) -> usize {
        let span = (hi - lo + 1) as f64;
        lo + (self.next_f64() * span).floor() as usize
    }

    /// Uniform index into a collection of `len` items. `len` must be non-zero.
    pub fn index(&mut self, len: usize) -> usize {
        (self.next_f64() * len as f64) as usize
    }
}

/// Names the independent streams drawn from one session seed.
///
/// Each purpose maps to a distinct suffix; suffixes must never collide or two
/// unrelated decisions would share a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPurpose<'a> {
    /// Timbre of one voice.
    Preset(&'a str),
    /// Signature generated by the numbered algorithm.
    Signature(u8),
    /// The constrained-probabilistic signature variant.
    ConstrainedSignature,
    /// Voice -> algorithm assignment.
    AlgorithmMapping,
    /// Shape shown as a preview right after reseeding.
    Preview,
}

/// Builds the generator for `purpose` under `seed`.
pub fn derive_stream(seed: &str, purpose: StreamPurpose<'_>) -> SeededRandom {
    let key = match purpose {
        StreamPurpose::Preset(voice) => format!("{seed}_{voice}"),
        StreamPurpose::Signature(algorithm) => format!("{seed}_audio_signature_v{algorithm}"),
        StreamPurpose::ConstrainedSignature => format!("{seed}_audio_signature_constrained"),
        StreamPurpose::AlgorithmMapping => format!("{seed}_unique_algo_mapping"),
        StreamPurpose::Preview => seed.to_string(),
    };
    SeededRandom::new(&key)
}
