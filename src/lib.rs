pub mod audio_engine;
pub mod messages;

#[cfg(feature = "python")]
mod python;

/// The Python module implemented in Rust.
#[cfg(feature = "python")]
#[pyo3::pymodule]
mod audio_signature_engine {
    #[pymodule_export]
    use super::python::SignatureEngine;
}
