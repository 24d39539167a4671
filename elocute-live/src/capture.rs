//! Microphone capture sliced into fixed-size blocks.
//!
//! The device pushes sample slices of whatever size it likes;
//! [`BlockAccumulator`] re-slices them into [`AudioBlock`]s of exactly
//! `block_size` samples. [`CapturePipeline`] owns the device stream and
//! guarantees that once [`stop`](CapturePipeline::stop) returns, the block
//! sink is never called again.

use crate::audio::AudioBlock;
use crate::device::{AudioBackend, InputStream};
use crate::error::{LiveError, Result};
use parking_lot::Mutex;
use std::sync::Arc;

/// Receives complete capture blocks. Runs on the device thread.
pub type BlockSink = Box<dyn FnMut(AudioBlock) + Send + 'static>;

/// Accumulates samples until a full block is available.
#[derive(Debug, Clone)]
pub struct BlockAccumulator {
    buffer: Vec<f32>,
    block_size: usize,
    sample_rate: u32,
}

impl BlockAccumulator {
    /// Create an accumulator producing blocks of `block_size` samples.
    pub fn new(block_size: usize, sample_rate: u32) -> Self {
        Self { buffer: Vec::with_capacity(block_size), block_size, sample_rate }
    }

    /// Push samples, emitting every block that fills up along the way.
    pub fn push(&mut self, mut samples: &[f32], mut emit: impl FnMut(AudioBlock)) {
        while !samples.is_empty() {
            let room = self.block_size - self.buffer.len();
            let take = room.min(samples.len());
            self.buffer.extend_from_slice(&samples[..take]);
            samples = &samples[take..];

            if self.buffer.len() == self.block_size {
                let full = std::mem::replace(&mut self.buffer, Vec::with_capacity(self.block_size));
                emit(AudioBlock::new(full, self.sample_rate));
            }
        }
    }

    /// Samples waiting for the next block.
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop any partial block.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

struct DeliveryGate {
    open: bool,
    sink: BlockSink,
}

struct ActiveCapture {
    stream: Box<dyn InputStream>,
    gate: Arc<Mutex<DeliveryGate>>,
}

/// Owns at most one microphone stream at a time.
pub struct CapturePipeline {
    backend: Arc<dyn AudioBackend>,
    block_size: usize,
    sample_rate: u32,
    active: Mutex<Option<ActiveCapture>>,
}

impl CapturePipeline {
    /// Create a pipeline capturing mono audio at `sample_rate`.
    pub fn new(backend: Arc<dyn AudioBackend>, block_size: usize, sample_rate: u32) -> Self {
        Self { backend, block_size, sample_rate, active: Mutex::new(None) }
    }

    /// Open the microphone and start delivering blocks to `sink`.
    ///
    /// Fails with [`LiveError::CaptureAlreadyActive`] if a stream is already
    /// open, or with a device error if the microphone cannot be opened.
    pub fn start(&self, sink: BlockSink) -> Result<()> {
        if self.block_size == 0 {
            return Err(LiveError::config("block_size must be greater than zero"));
        }

        let mut active = self.active.lock();
        if active.is_some() {
            return Err(LiveError::CaptureAlreadyActive);
        }

        let gate = Arc::new(Mutex::new(DeliveryGate { open: true, sink }));
        let device_gate = gate.clone();
        let mut accumulator = BlockAccumulator::new(self.block_size, self.sample_rate);

        let stream = self.backend.open_input(
            self.sample_rate,
            Box::new(move |samples: &[f32]| {
                let mut gate = device_gate.lock();
                if !gate.open {
                    return;
                }
                accumulator.push(samples, |block| (gate.sink)(block));
            }),
        )?;

        tracing::info!(
            sample_rate = self.sample_rate,
            block_size = self.block_size,
            "Microphone capture started"
        );
        *active = Some(ActiveCapture { stream, gate });
        Ok(())
    }

    /// Stop capturing and release the device. Safe to call repeatedly.
    pub fn stop(&self) {
        let Some(capture) = self.active.lock().take() else {
            return;
        };
        // Closing the gate under its lock waits out any in-progress delivery.
        capture.gate.lock().open = false;
        capture.stream.close();
        tracing::info!("Microphone capture stopped");
    }

    /// Whether a stream is open.
    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }
}

impl Drop for CapturePipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for CapturePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapturePipeline")
            .field("block_size", &self.block_size)
            .field("sample_rate", &self.sample_rate)
            .field("active", &self.is_active())
            .finish()
    }
}
