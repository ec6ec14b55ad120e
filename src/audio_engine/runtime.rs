//! Engine Runtime Module
//!
//! This module runs a [`SignatureEngine`] on its own thread:
//! - Logger setup
//! - Ring buffers for intents (UI -> engine) and events (engine -> UI)
//! - A tick loop that maps wall-clock time onto the engine's logical clock
//! - Orderly shutdown

use env_logger::{Builder, Env};
use rtrb::{Consumer, Producer, RingBuffer};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::audio_engine::SignatureEngine;
use crate::audio_engine::backend::SynthBackend;
use crate::audio_engine::config::EngineConfig;
use crate::audio_engine::constants::{CONTROL_QUEUE_CAPACITY, EVENT_QUEUE_CAPACITY};
use crate::audio_engine::errors::EngineError;
use crate::messages::{ControlMessage, EngineEvent};

/// Setup and configure the logger for engine operations
pub fn setup_logger() {
    // Users can override via `RUST_LOG`, e.g. `RUST_LOG=debug` to see stale-timer discards.
    Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .try_init()
        .unwrap_or(()); // Ignore initialization errors
}

/// Handle to a running engine thread with its message channels
pub struct EngineRuntime {
    producer: Arc<Mutex<Producer<ControlMessage>>>,
    consumer: Arc<Mutex<Consumer<EngineEvent>>>,
    shutdown: Arc<AtomicBool>,
    worker: Option<JoinHandle<()>>,
}

impl EngineRuntime {
    /// Starts the engine thread.
    ///
    /// The thread wakes every `config.tick_period_ms`, fires due timers,
    /// applies queued intents in arrival order and publishes the resulting
    /// events.
    pub fn spawn(config: EngineConfig, backend: Box<dyn SynthBackend>) -> Self {
        setup_logger();

        // Create ring buffer for incoming intents (UI->engine)
        let (producer_in, mut consumer_in) = RingBuffer::<ControlMessage>::new(CONTROL_QUEUE_CAPACITY);

        // Create ring buffer for outgoing events (engine->UI)
        let (mut producer_out, consumer_out) = RingBuffer::<EngineEvent>::new(EVENT_QUEUE_CAPACITY);

        let tick = Duration::from_millis(config.tick_period_ms.max(1));
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop_flag = shutdown.clone();

        log::info!(
            "Starting engine thread (seed '{}', tick {} ms)",
            config.seed,
            tick.as_millis()
        );

        let worker = thread::spawn(move || {
            let mut engine = SignatureEngine::new(config, backend);
            let epoch = Instant::now();

            while !stop_flag.load(Ordering::Acquire) {
                engine.advance_to(elapsed_ms(epoch));
                while let Ok(message) = consumer_in.pop() {
                    engine.handle(message);
                }
                publish(&mut engine, &mut producer_out);
                thread::sleep(tick);
            }

            engine.shutdown();
            publish(&mut engine, &mut producer_out);
            log::info!("Engine thread stopped");
        });

        Self {
            producer: Arc::new(Mutex::new(producer_in)),
            consumer: Arc::new(Mutex::new(consumer_out)),
            shutdown,
            worker: Some(worker),
        }
    }

    /// Queues an intent for the engine thread.
    ///
    /// # Errors
    ///
    /// [`EngineError::Disconnected`] after shutdown, [`EngineError::QueueFull`]
    /// when the intent queue has no room.
    pub fn send(&self, message: ControlMessage) -> Result<(), EngineError> {
        if !self.is_running() {
            return Err(EngineError::Disconnected);
        }
        let mut producer = self
            .producer
            .lock()
            .map_err(|_| EngineError::Disconnected)?;
        let name = message.name();
        producer.push(message).map_err(|_| EngineError::QueueFull(name))
    }

    /// Takes the next published event, if any.
    pub fn try_recv(&self) -> Option<EngineEvent> {
        let mut consumer = self.consumer.lock().ok()?;
        consumer.pop().ok()
    }

    pub fn is_running(&self) -> bool {
        self.worker.is_some() && !self.shutdown.load(Ordering::Acquire)
    }

    /// Stops the engine thread and waits for it. Safe to call more than once.
    pub fn shutdown(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::error!("Engine thread panicked");
            }
        }
    }
}

impl Drop for EngineRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn elapsed_ms(epoch: Instant) -> u64 {
    u64::try_from(epoch.elapsed().as_millis()).unwrap_or(u64::MAX)
}

fn publish(engine: &mut SignatureEngine, producer: &mut Producer<EngineEvent>) {
    for event in engine.drain_events() {
        if producer.push(event).is_err() {
            log::warn!("Event queue full; dropping event");
        }
    }
}
