//! Voice identifiers and the ordered catalog that maps sequence values to them.
//!
//! Sequence value `0` always means Hum; values `1..=N` index the shape list.

use std::fmt;
use std::sync::Arc;

/// Name the Hum voice is seeded and reported under.
pub const HUM_NAME: &str = "hum";

/// Shapes available when no custom list is supplied.
pub const DEFAULT_SHAPES: [&str; 17] = [
    "circle",
    "square",
    "butterfly",
    "lissajous",
    "spiro",
    "harmonograph",
    "rose",
    "hypocycloid",
    "epicycloid",
    "spiral",
    "star",
    "flower",
    "wave",
    "mandala",
    "infinity",
    "dna",
    "tornado",
];

/// Identifies one voice: the ambient Hum or a named shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum VoiceKey {
    Hum,
    Shape(Arc<str>),
}

impl VoiceKey {
    pub fn shape(name: &str) -> Self {
        VoiceKey::Shape(Arc::from(name))
    }

    /// Parses a name coming from the UI; `"hum"` is Hum.
    pub fn from_name(name: &str) -> Self {
        if name == HUM_NAME {
            VoiceKey::Hum
        } else {
            VoiceKey::shape(name)
        }
    }

    pub fn is_hum(&self) -> bool {
        matches!(self, VoiceKey::Hum)
    }

    /// Name used for seeding and display.
    pub fn name(&self) -> &str {
        match self {
            VoiceKey::Hum => HUM_NAME,
            VoiceKey::Shape(name) => name,
        }
    }
}

impl fmt::Display for VoiceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One element of a generated or recorded sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceStep {
    Silence,
    Hum,
    /// 1-based index into the catalog's shape list.
    Shape(usize),
}

impl SequenceStep {
    /// Maps a raw value: `0` is Hum, anything else a shape index.
    pub fn from_value(value: usize) -> Self {
        if value == 0 {
            SequenceStep::Hum
        } else {
            SequenceStep::Shape(value)
        }
    }

    /// Raw value; `None` for silence.
    pub fn value(self) -> Option<usize> {
        match self {
            SequenceStep::Silence => None,
            SequenceStep::Hum => Some(0),
            SequenceStep::Shape(n) => Some(n),
        }
    }
}

/// Ordered, finite set of voices for a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceCatalog {
    shapes: Vec<VoiceKey>,
}

impl VoiceCatalog {
    /// Builds a catalog from shape names, dropping duplicates and any entry named like Hum.
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut shapes: Vec<VoiceKey> = Vec::new();
        for name in names {
            let name = name.as_ref().trim();
            if name.is_empty() || name == HUM_NAME {
                continue;
            }
            let key = VoiceKey::shape(name);
            if !shapes.contains(&key) {
                shapes.push(key);
            }
        }
        Self { shapes }
    }

    /// Number of shapes (Hum excluded).
    pub fn shape_count(&self) -> usize {
        self.shapes.len()
    }

    pub fn shapes(&self) -> &[VoiceKey] {
        &self.shapes
    }

    /// Hum followed by every shape, in catalog order.
    pub fn all_keys(&self) -> impl Iterator<Item = VoiceKey> + '_ {
        std::iter::once(VoiceKey::Hum).chain(self.shapes.iter().cloned())
    }

    /// Number of voices including Hum.
    pub fn voice_count(&self) -> usize {
        self.shapes.len() + 1
    }

    /// Resolves a sequence value: `0` is Hum, `1..=N` a shape, anything else nothing.
    pub fn key_for_value(&self, value: usize) -> Option<VoiceKey> {
        match value {
            0 => Some(VoiceKey::Hum),
            n => self.shapes.get(n - 1).cloned(),
        }
    }

    /// Voice a step selects. Silence and out-of-range indices select nothing.
    pub fn resolve(&self, step: SequenceStep) -> Option<VoiceKey> {
        match step {
            SequenceStep::Silence => None,
            SequenceStep::Hum => Some(VoiceKey::Hum),
            SequenceStep::Shape(n) => self.key_for_value(n),
        }
    }

    /// Sequence value of `key`, the inverse of [`VoiceCatalog::key_for_value`].
    pub fn value_of(&self, key: &VoiceKey) -> Option<usize> {
        match key {
            VoiceKey::Hum => Some(0),
            shape => self.shapes.iter().position(|k| k == shape).map(|i| i + 1),
        }
    }

    pub fn contains(&self, key: &VoiceKey) -> bool {
        key.is_hum() || self.shapes.contains(key)
    }

    /// Looks a key up by its name.
    pub fn find(&self, name: &str) -> Option<VoiceKey> {
        if name == HUM_NAME {
            return Some(VoiceKey::Hum);
        }
        self.shapes.iter().find(|k| k.name() == name).cloned()
    }
}

impl Default for VoiceCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_SHAPES)
    }
}
