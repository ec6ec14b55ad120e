//! Python bindings.
//!
//! [`SignatureEngine`] wraps an [`EngineRuntime`]: every method queues one
//! intent, and [`SignatureEngine::poll`] hands published events back as
//! dictionaries with a `"type"` key.

use pyo3::exceptions::PyRuntimeError;
use pyo3::prelude::*;
use pyo3::types::PyDict;

use crate::audio_engine::backend::NullBackend;
use crate::audio_engine::config::EngineConfig;
use crate::audio_engine::errors::EngineError;
use crate::audio_engine::preset::TimbreDescriptor;
use crate::audio_engine::runtime::EngineRuntime;
use crate::audio_engine::voice_key::VoiceKey;
use crate::messages::{ControlMessage, EngineEvent, PlaybackSnapshot};

/// Deterministic audio-signature engine running on a background thread.
#[pyclass]
pub struct SignatureEngine {
    config: EngineConfig,
    runtime: Option<EngineRuntime>,
}

impl SignatureEngine {
    fn send(&self, message: ControlMessage) -> PyResult<()> {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| PyRuntimeError::new_err("Signature engine not initialized"))?;
        runtime.send(message).map_err(|e| match e {
            EngineError::QueueFull(name) => {
                PyRuntimeError::new_err(format!("Failed to send {name} - buffer may be full"))
            }
            other => PyRuntimeError::new_err(other.to_string()),
        })
    }
}

#[pymethods]
impl SignatureEngine {
    /// Create an engine for `seed` (empty seeds become `"default"`).
    #[new]
    #[pyo3(signature = (seed=None, shapes=None))]
    pub fn new(seed: Option<String>, shapes: Option<Vec<String>>) -> PyResult<Self> {
        let mut config = EngineConfig::default().with_seed(seed.as_deref().unwrap_or_default());
        if let Some(shapes) = shapes {
            config = config.with_shapes(shapes);
        }
        Ok(SignatureEngine {
            config,
            runtime: None,
        })
    }

    /// Start the engine thread.
    pub fn run(&mut self) -> PyResult<()> {
        if self.runtime.is_some() {
            return Err(PyRuntimeError::new_err("Signature engine already running"));
        }
        self.runtime = Some(EngineRuntime::spawn(
            self.config.clone(),
            Box::new(NullBackend::new()),
        ));
        Ok(())
    }

    /// Stop the engine thread and release every voice.
    pub fn shut_down(&mut self) -> PyResult<()> {
        if let Some(mut runtime) = self.runtime.take() {
            runtime.shutdown();
        }
        Ok(())
    }

    pub fn ping(&self) -> PyResult<()> {
        self.send(ControlMessage::Ping())
    }

    pub fn start(&self) -> PyResult<()> {
        self.send(ControlMessage::Start)
    }

    pub fn stop(&self) -> PyResult<()> {
        self.send(ControlMessage::Stop)
    }

    /// Select a voice by name (`"hum"` or a shape name).
    pub fn select_voice(&self, name: &str) -> PyResult<()> {
        self.send(ControlMessage::SelectVoice(VoiceKey::from_name(name)))
    }

    pub fn release_voice(&self) -> PyResult<()> {
        self.send(ControlMessage::ReleaseVoice)
    }

    pub fn toggle_latch(&self) -> PyResult<()> {
        self.send(ControlMessage::ToggleLatch)
    }

    pub fn toggle_loop(&self) -> PyResult<()> {
        self.send(ControlMessage::ToggleLoop)
    }

    pub fn toggle_signature_mode(&self) -> PyResult<()> {
        self.send(ControlMessage::ToggleSignatureMode)
    }

    pub fn toggle_sequencer_mode(&self) -> PyResult<()> {
        self.send(ControlMessage::ToggleSequencerMode)
    }

    pub fn start_recording(&self, slot: usize) -> PyResult<()> {
        self.send(ControlMessage::StartRecording(slot))
    }

    pub fn record_step(&self, value: usize) -> PyResult<()> {
        self.send(ControlMessage::RecordStep(value))
    }

    pub fn clear_slot(&self, slot: usize) -> PyResult<()> {
        self.send(ControlMessage::ClearSlot(slot))
    }

    pub fn set_step_time(&self, ms: u32) -> PyResult<()> {
        self.send(ControlMessage::SetStepTime(ms))
    }

    pub fn set_step_count(&self, slots: usize) -> PyResult<()> {
        self.send(ControlMessage::SetStepCount(slots))
    }

    pub fn set_velocity(&self, slot: usize, velocity: f32) -> PyResult<()> {
        self.send(ControlMessage::SetVelocity { slot, velocity })
    }

    pub fn set_seed(&self, seed: String) -> PyResult<()> {
        self.send(ControlMessage::SetSeed(seed))
    }

    /// Toggle signature playback for the selected voice.
    pub fn play_signature(&self) -> PyResult<()> {
        self.send(ControlMessage::PlaySignature)
    }

    pub fn stop_signature(&self) -> PyResult<()> {
        self.send(ControlMessage::StopSignature)
    }

    pub fn play_signature_for(&self, name: &str) -> PyResult<()> {
        self.send(ControlMessage::PlaySignatureFor(VoiceKey::from_name(name)))
    }

    pub fn play_sequence(&self) -> PyResult<()> {
        self.send(ControlMessage::PlaySequence)
    }

    pub fn stop_sequence(&self) -> PyResult<()> {
        self.send(ControlMessage::StopSequence)
    }

    /// Poll for the next engine event.
    pub fn poll(&self, py: Python<'_>) -> PyResult<Option<Py<PyAny>>> {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| PyRuntimeError::new_err("Signature engine not initialized"))?;

        let Some(event) = runtime.try_recv() else {
            return Ok(None);
        };

        let dict = PyDict::new(py);
        match event {
            EngineEvent::Pong() => {
                dict.set_item("type", "pong")?;
            }
            EngineEvent::VoiceChanged { key, descriptor } => {
                dict.set_item("type", "voice_changed")?;
                dict.set_item("key", key.name())?;
                set_descriptor(py, &dict, descriptor.as_ref())?;
            }
            EngineEvent::PlaybackStateChanged(snapshot) => {
                dict.set_item("type", "playback_state")?;
                set_snapshot(&dict, &snapshot)?;
            }
            EngineEvent::Error { message } => {
                dict.set_item("type", "error")?;
                dict.set_item("msg", message)?;
            }
            EngineEvent::Preview { key, descriptor } => {
                dict.set_item("type", "preview")?;
                dict.set_item("key", key.name())?;
                set_descriptor(py, &dict, descriptor.as_ref())?;
            }
            EngineEvent::SequencerStep { index, velocity } => {
                dict.set_item("type", "sequencer_step")?;
                dict.set_item("index", index)?;
                dict.set_item("velocity", velocity)?;
            }
            EngineEvent::SignatureFinished { key } => {
                dict.set_item("type", "signature_finished")?;
                dict.set_item("key", key.name())?;
            }
        }

        Ok(Some(dict.into_any().unbind()))
    }
}

fn set_descriptor(
    py: Python<'_>,
    dict: &Bound<'_, PyDict>,
    descriptor: Option<&TimbreDescriptor>,
) -> PyResult<()> {
    let Some(descriptor) = descriptor else {
        dict.set_item("descriptor", py.None())?;
        return Ok(());
    };

    let inner = PyDict::new(py);
    inner.set_item("mode", descriptor.mode.as_str())?;
    let oscillators: Vec<(&str, &str)> = descriptor
        .oscillators
        .iter()
        .map(|osc| (osc.waveform.as_str(), osc.note))
        .collect();
    inner.set_item("oscillators", oscillators)?;
    inner.set_item("filter_hz", descriptor.filter_hz)?;
    inner.set_item("filter_q", descriptor.filter_q)?;
    inner.set_item("volume_db", descriptor.volume_db)?;
    inner.set_item("reverb_wet", descriptor.reverb.wet)?;
    inner.set_item("color_speed", descriptor.color_speed)?;
    inner.set_item("shape_drift", descriptor.shape_drift)?;
    dict.set_item("descriptor", inner)?;
    Ok(())
}

fn set_snapshot(dict: &Bound<'_, PyDict>, snapshot: &PlaybackSnapshot) -> PyResult<()> {
    dict.set_item("mode", snapshot.mode.as_str())?;
    dict.set_item("is_started", snapshot.is_started)?;
    dict.set_item("is_playing", snapshot.is_playing)?;
    dict.set_item("is_recording", snapshot.is_recording)?;
    dict.set_item("current_record_slot", snapshot.current_record_slot)?;
    dict.set_item("is_signature_playing", snapshot.is_signature_playing)?;
    dict.set_item("sequence", snapshot.sequence.clone())?;
    dict.set_item("velocities", snapshot.velocities.clone())?;
    dict.set_item("play_index", snapshot.play_index)?;
    dict.set_item("step_time_ms", snapshot.step_time_ms)?;
    dict.set_item("is_latch_on", snapshot.is_latch_on)?;
    dict.set_item("is_loop_enabled", snapshot.is_loop_enabled)?;
    dict.set_item("is_signature_mode", snapshot.is_signature_mode)?;
    dict.set_item("is_sequencer_mode", snapshot.is_sequencer_mode)?;
    dict.set_item("current_key", snapshot.current_key.name())?;
    dict.set_item("active_key", snapshot.active_key.as_ref().map(VoiceKey::name))?;
    Ok(())
}
