//! Procedural signature generation.
//!
//! A signature is a fixed-length list of [`SequenceStep`]s produced by one of
//! ten algorithms. Every algorithm draws from its own seeded stream, so a
//! `(seed, algorithm, shape count)` triple always yields the same steps.
//!
//! Which algorithm a voice uses comes from [`AlgorithmMapping`], a seeded
//! shuffle of the algorithm ids cycled to cover every voice.

use std::collections::HashMap;

use crate::audio_engine::constants::{
    CONSTRAINED_PALETTE_MAX, FALLBACK_ALGORITHM, NUM_ALGORITHMS, PHRASE_LEN, STEP_MS_BURST,
    STEP_MS_DEFAULT, STEP_MS_FAST, STEP_MS_SLOW,
};
use crate::audio_engine::errors::EngineError;
use crate::audio_engine::rng::{SeededRandom, StreamPurpose, derive_stream};
use crate::audio_engine::voice_key::{SequenceStep, VoiceCatalog, VoiceKey};

/// Probabilities used by the constrained algorithm.
#[derive(Debug, Clone, Copy)]
struct Constraints {
    palette: usize,
    p_silence: f64,
    p_hum: f64,
    p_repeat: f64,
    avoid_back_and_forth: bool,
}

impl Constraints {
    fn for_shape_count(shape_count: usize) -> Self {
        Self {
            palette: shape_count.clamp(1, CONSTRAINED_PALETTE_MAX),
            p_silence: 0.2,
            p_hum: 0.15,
            p_repeat: 0.35,
            avoid_back_and_forth: true,
        }
    }
}

/// A generated signature ready for playback.
#[derive(Debug, Clone, PartialEq)]
pub struct Signature {
    /// Algorithm that produced the steps.
    pub algorithm: u8,
    pub steps: Vec<SequenceStep>,
    /// Wait between consecutive steps.
    pub step_ms: u64,
}

/// Checks that `id` names one of the ten algorithms.
pub fn validate_algorithm(id: u8) -> Result<u8, EngineError> {
    if (1..=NUM_ALGORITHMS).contains(&id) {
        Ok(id)
    } else {
        Err(EngineError::InvalidAlgorithmId(id))
    }
}

/// Step time for an algorithm; unknown ids use the default.
pub fn step_time_for(algorithm: u8) -> u64 {
    match algorithm {
        3 | 7 => STEP_MS_FAST,
        5 => STEP_MS_BURST,
        10 => STEP_MS_SLOW,
        _ => STEP_MS_DEFAULT,
    }
}

/// Generates `steps` values with `algorithm` for a catalog of `shape_count` shapes.
///
/// Invalid algorithm ids log a warning and behave as the constrained algorithm.
pub fn generate(seed: &str, algorithm: u8, shape_count: usize, steps: usize) -> Vec<SequenceStep> {
    let algorithm = match validate_algorithm(algorithm) {
        Ok(id) => id,
        Err(err) => {
            log::warn!("{err}; using algorithm {FALLBACK_ALGORITHM}");
            FALLBACK_ALGORITHM
        }
    };

    if algorithm == 2 {
        return constrained(seed, Constraints::for_shape_count(shape_count), steps);
    }

    let mut rng = derive_stream(seed, StreamPurpose::Signature(algorithm));
    let n = shape_count;
    let values: Vec<usize> = match algorithm {
        1 => (0..steps).map(|_| any_value(&mut rng, n)).collect(),
        3 => {
            let phrase: Vec<usize> = (0..PHRASE_LEN).map(|_| any_value(&mut rng, n)).collect();
            (0..steps).map(|i| phrase[i % PHRASE_LEN]).collect()
        }
        4 => random_walk(&mut rng, n, steps),
        5 => bursts(&mut rng, n, steps),
        6 => (0..steps)
            .map(|_| {
                if rng.next_f64() > 0.7 {
                    non_hum_value(&mut rng, n)
                } else {
                    0
                }
            })
            .collect(),
        7 => fibonacci_onsets(&mut rng, n, steps),
        8 => {
            let a = any_value(&mut rng, n);
            let b = any_value(&mut rng, n);
            (0..steps).map(|i| if i % 2 == 0 { a } else { b }).collect()
        }
        9 => decaying(&mut rng, n, steps),
        _ => periodic_refresh(&mut rng, n, steps),
    };

    values.into_iter().map(SequenceStep::from_value).collect()
}

/// Uniform over Hum and every shape.
fn any_value(rng: &mut SeededRandom, n: usize) -> usize {
    rng.int_inclusive(0, n)
}

/// Uniform over shapes; Hum only when there are none.
fn non_hum_value(rng: &mut SeededRandom, n: usize) -> usize {
    if n > 0 { rng.int_inclusive(1, n) } else { 0 }
}

fn constrained(seed: &str, c: Constraints, steps: usize) -> Vec<SequenceStep> {
    let mut rng = derive_stream(seed, StreamPurpose::ConstrainedSignature);
    let mut seq: Vec<SequenceStep> = Vec::with_capacity(steps);
    let mut last: Option<usize> = None;
    let mut prev_shape: Option<usize> = None;

    for _ in 0..steps {
        if rng.next_f64() < c.p_silence {
            seq.push(SequenceStep::Silence);
            continue;
        }

        let roll = rng.next_f64();
        let next = if roll < c.p_hum {
            0
        } else if let (true, Some(prev)) = (roll < c.p_hum + c.p_repeat, prev_shape) {
            prev
        } else {
            loop {
                let candidate = rng.int_inclusive(1, c.palette);
                let bounces_back = c.avoid_back_and_forth
                    && c.palette > 1
                    && last.is_some_and(|l| l >= 1)
                    && seq.len() >= 2
                    && seq[seq.len() - 2] == SequenceStep::Shape(candidate);
                if !bounces_back {
                    break candidate;
                }
            }
        };

        seq.push(SequenceStep::from_value(next));
        if next >= 1 {
            prev_shape = Some(next);
        }
        last = Some(next);
    }
    seq
}

fn random_walk(rng: &mut SeededRandom, n: usize, steps: usize) -> Vec<usize> {
    let mut values = Vec::with_capacity(steps);
    if steps == 0 {
        return values;
    }
    let mut current: i64 = 0;
    values.push(0);
    for _ in 1..steps {
        let direction = if rng.next_f64() > 0.5 { 1 } else { -1 };
        let stride = rng.index(3) as i64 + 1;
        current = (current + direction * stride).clamp(0, n as i64);
        values.push(current as usize);
    }
    values
}

fn bursts(rng: &mut SeededRandom, n: usize, steps: usize) -> Vec<usize> {
    let mut values = Vec::with_capacity(steps);
    let mut cluster = any_value(rng, n);
    while values.len() < steps {
        let run = (rng.index(6) + 2).min(steps - values.len());
        values.extend(std::iter::repeat_n(cluster, run));
        cluster = any_value(rng, n);
    }
    values
}

fn fibonacci_onsets(rng: &mut SeededRandom, n: usize, steps: usize) -> Vec<usize> {
    let mut values = vec![0; steps];
    let (mut pos, mut a, mut b) = (0usize, 1usize, 1usize);
    while pos < steps {
        values[pos] = non_hum_value(rng, n);
        let next = a + b;
        a = b;
        b = next;
        pos += next;
    }
    values
}

fn decaying(rng: &mut SeededRandom, n: usize, steps: usize) -> Vec<usize> {
    let mut value = non_hum_value(rng, n);
    let mut values = Vec::with_capacity(steps);
    for _ in 0..steps {
        if rng.next_f64() < 0.2 || value == 0 {
            value = any_value(rng, n);
        }
        values.push(value);
        if rng.next_f64() > 0.7 {
            value = value.saturating_sub(1);
        }
    }
    values
}

fn periodic_refresh(rng: &mut SeededRandom, n: usize, steps: usize) -> Vec<usize> {
    let mut current = any_value(rng, n);
    let mut values = Vec::with_capacity(steps);
    for i in 0..steps {
        if i % PHRASE_LEN == 0 || rng.next_f64() > 0.6 {
            current = any_value(rng, n);
        }
        values.push(current);
    }
    values
}

/// Seeded voice -> algorithm assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgorithmMapping {
    by_key: HashMap<VoiceKey, u8>,
}

impl AlgorithmMapping {
    /// Shuffles the cycled pool `1..=10` (truncated to the voice count) and
    /// deals it out to Hum and the shapes in catalog order.
    pub fn build(seed: &str, catalog: &VoiceCatalog) -> Self {
        let keys: Vec<VoiceKey> = catalog.all_keys().collect();
        let mut pool: Vec<u8> = (1..=NUM_ALGORITHMS).cycle().take(keys.len()).collect();

        let mut rng = derive_stream(seed, StreamPurpose::AlgorithmMapping);
        for i in (1..pool.len()).rev() {
            let j = rng.index(i + 1);
            pool.swap(i, j);
        }

        Self {
            by_key: keys.into_iter().zip(pool).collect(),
        }
    }

    /// Algorithm for `key`; unknown keys use algorithm 1.
    pub fn algorithm_for(&self, key: &VoiceKey) -> u8 {
        self.by_key.get(key).copied().unwrap_or(1)
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Signature for `key` using its mapped algorithm.
pub fn signature_for(
    seed: &str,
    key: &VoiceKey,
    mapping: &AlgorithmMapping,
    catalog: &VoiceCatalog,
    steps: usize,
) -> Signature {
    let algorithm = mapping.algorithm_for(key);
    Signature {
        algorithm,
        steps: generate(seed, algorithm, catalog.shape_count(), steps),
        step_ms: step_time_for(algorithm),
    }
}
