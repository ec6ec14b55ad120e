//! Deterministic timbre presets.
//!
//! A [`TimbreDescriptor`] is a pure function of `(seed, voice)`: the same pair
//! always yields the same descriptor. One weighted draw picks a character
//! mode which biases the LFO, filter and envelope draws that follow.

use std::collections::HashMap;

use crate::audio_engine::rng::{StreamPurpose, derive_stream};
use crate::audio_engine::voice_key::{VoiceCatalog, VoiceKey};

/// Oscillator waveform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Waveform {
    Sine,
    Triangle,
    Square,
    Sawtooth,
}

impl Waveform {
    const ALL: [Waveform; 4] = [
        Waveform::Sine,
        Waveform::Triangle,
        Waveform::Square,
        Waveform::Sawtooth,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Waveform::Sine => "sine",
            Waveform::Triangle => "triangle",
            Waveform::Square => "square",
            Waveform::Sawtooth => "sawtooth",
        }
    }
}

/// Pitches oscillators are drawn from.
const NOTES: [&str; 13] = [
    "C1", "C2", "E2", "G2", "A2", "C3", "E3", "G3", "B3", "D4", "F#4", "A4", "C5",
];

/// Qualitative timbre family chosen by the first draw of a preset stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacterMode {
    /// Slow, soft pad with short envelope.
    Pad,
    /// Mid-rate modulation.
    Lively,
    /// Fast, aggressive modulation.
    Aggressive,
    /// Extremely slow swelling envelope, audio-rate LFO.
    Swell,
}

impl CharacterMode {
    pub fn as_str(self) -> &'static str {
        match self {
            CharacterMode::Pad => "pad",
            CharacterMode::Lively => "lively",
            CharacterMode::Aggressive => "aggressive",
            CharacterMode::Swell => "swell",
        }
    }

    /// Cumulative thresholds 0.18 / 0.56 / 0.85 / 1.0.
    fn from_roll(roll: f32) -> Self {
        if roll < 0.18 {
            CharacterMode::Pad
        } else if roll < 0.56 {
            CharacterMode::Lively
        } else if roll < 0.85 {
            CharacterMode::Aggressive
        } else {
            CharacterMode::Swell
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Oscillator {
    pub waveform: Waveform,
    pub note: &'static str,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Lfo {
    pub rate_hz: f32,
    pub min_hz: f32,
    pub max_hz: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Reverb {
    pub wet: f32,
    pub room_size: f32,
}

/// Immutable timbre parameters for one voice.
#[derive(Debug, Clone, PartialEq)]
pub struct TimbreDescriptor {
    pub mode: CharacterMode,
    /// One to three oscillators; the first is always present.
    pub oscillators: Vec<Oscillator>,
    pub filter_hz: f32,
    pub filter_q: f32,
    pub lfo: Option<Lfo>,
    pub envelope: Option<Envelope>,
    pub reverb: Reverb,
    /// Output level in dB.
    pub volume_db: f32,
    /// Rate the renderer cycles colour at.
    pub color_speed: f32,
    /// Per-frame drift applied to the drawn shape.
    pub shape_drift: f32,
}

impl TimbreDescriptor {
    /// The fixed ambient Hum: A0 sine through an 80 Hz low-pass.
    pub fn hum() -> Self {
        Self {
            mode: CharacterMode::Pad,
            oscillators: vec![Oscillator {
                waveform: Waveform::Sine,
                note: "A0",
            }],
            filter_hz: 80.0,
            filter_q: 0.5,
            lfo: None,
            envelope: None,
            reverb: Reverb {
                wet: 0.3,
                room_size: 0.9,
            },
            volume_db: -25.0,
            color_speed: 0.0,
            shape_drift: 0.0,
        }
    }
}

/// Derives the timbre for `key` under `seed`.
pub fn generate(seed: &str, key: &VoiceKey) -> TimbreDescriptor {
    if key.is_hum() {
        return TimbreDescriptor::hum();
    }

    let mut rng = derive_stream(seed, StreamPurpose::Preset(key.name()));
    let mode = CharacterMode::from_roll(rng.next_f32());

    let osc_count = match mode {
        CharacterMode::Swell => 2 + usize::from(rng.next_f32() > 0.7),
        _ => 1 + usize::from(rng.next_f32() > 0.6),
    };
    let oscillators = (0..osc_count)
        .map(|_| {
            let waveform = Waveform::ALL[rng.index(Waveform::ALL.len())];
            let note = NOTES[rng.index(NOTES.len())];
            Oscillator { waveform, note }
        })
        .collect();

    let (lfo, filter_hz, envelope) = match mode {
        CharacterMode::Pad => {
            let lfo = Lfo {
                rate_hz: 0.07 + rng.next_f32() * 0.3,
                min_hz: 400.0 + rng.next_f32() * 400.0,
                max_hz: 900.0 + rng.next_f32() * 600.0,
            };
            let filter_hz = 700.0 + rng.next_f32() * 500.0;
            let envelope = Envelope {
                attack: 0.005 + rng.next_f32() * 0.03,
                decay: 0.04 + rng.next_f32() * 0.08,
                sustain: 0.1 + rng.next_f32() * 0.2,
                release: 0.03 + rng.next_f32() * 0.1,
            };
            (lfo, filter_hz, envelope)
        }
        CharacterMode::Lively | CharacterMode::Aggressive => {
            let lfo = if mode == CharacterMode::Lively {
                Lfo {
                    rate_hz: 0.25 + rng.next_f32() * 8.0,
                    min_hz: 120.0 + rng.next_f32() * 700.0,
                    max_hz: 1200.0 + rng.next_f32() * 1400.0,
                }
            } else {
                Lfo {
                    rate_hz: 6.0 + rng.next_f32() * 20.0,
                    min_hz: 80.0 + rng.next_f32() * 250.0,
                    max_hz: 1500.0 + rng.next_f32() * 3500.0,
                }
            };
            let filter_hz = 300.0 + rng.next_f32() * 2400.0;
            let envelope = Envelope {
                attack: 0.03 + rng.next_f32() * 0.4,
                decay: 0.1 + rng.next_f32() * 0.7,
                sustain: 0.2 + rng.next_f32() * 0.5,
                release: 0.2 + rng.next_f32() * 3.0,
            };
            (lfo, filter_hz, envelope)
        }
        CharacterMode::Swell => {
            let lfo = Lfo {
                rate_hz: 24.0 + rng.next_f32() * 36.0,
                min_hz: 80.0 + rng.next_f32() * 250.0,
                max_hz: 1500.0 + rng.next_f32() * 3500.0,
            };
            let filter_hz = 300.0 + rng.next_f32() * 2400.0;
            let envelope = Envelope {
                attack: 2.0 + rng.next_f32() * 8.0,
                decay: 4.0 + rng.next_f32() * 20.0,
                sustain: 0.7 + rng.next_f32() * 0.2,
                release: 8.0 + rng.next_f32() * 24.0,
            };
            (lfo, filter_hz, envelope)
        }
    };

    let filter_q = 0.6 + rng.next_f32() * 0.7;
    let reverb = if mode == CharacterMode::Swell {
        Reverb {
            wet: 0.4 + rng.next_f32() * 0.5,
            room_size: 0.85 + rng.next_f32() * 0.12,
        }
    } else {
        Reverb {
            wet: 0.1 + rng.next_f32() * 0.5,
            room_size: 0.6 + rng.next_f32() * 0.38,
        }
    };

    TimbreDescriptor {
        mode,
        oscillators,
        filter_hz,
        filter_q,
        lfo: Some(lfo),
        envelope: Some(envelope),
        reverb,
        volume_db: 5.0,
        color_speed: 0.06 + rng.next_f32() * 0.22,
        shape_drift: 0.0006 + rng.next_f32() * 0.0032,
    }
}

/// Shape shown before audio starts: one seeded pick from the catalog, Hum if it is empty.
pub fn preview_key(seed: &str, catalog: &VoiceCatalog) -> VoiceKey {
    let shapes = catalog.shapes();
    if shapes.is_empty() {
        return VoiceKey::Hum;
    }
    let mut rng = derive_stream(seed, StreamPurpose::Preview);
    shapes[rng.index(shapes.len())].clone()
}

/// Descriptors for every shape of a session, generated once per seed.
#[derive(Debug, Clone, Default)]
pub struct PresetBank {
    presets: HashMap<VoiceKey, TimbreDescriptor>,
}

impl PresetBank {
    pub fn build(seed: &str, catalog: &VoiceCatalog) -> Self {
        let presets = catalog
            .shapes()
            .iter()
            .map(|key| (key.clone(), generate(seed, key)))
            .collect();
        Self { presets }
    }

    /// Descriptor for a shape; Hum has none.
    pub fn get(&self, key: &VoiceKey) -> Option<&TimbreDescriptor> {
        self.presets.get(key)
    }

    /// Descriptor used to buffer `key`, including the fixed Hum timbre.
    pub fn descriptor_for(&self, key: &VoiceKey) -> Option<TimbreDescriptor> {
        if key.is_hum() {
            Some(TimbreDescriptor::hum())
        } else {
            self.presets.get(key).cloned()
        }
    }

    pub fn len(&self) -> usize {
        self.presets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.presets.is_empty()
    }
}
