//! Audio device seams.
//!
//! The core never touches a sound API directly. An [`AudioBackend`] opens a
//! microphone stream that pushes raw sample slices into a callback, and an
//! output timeline that accepts buffers scheduled at absolute times. The cpal
//! implementation lives in [`crate::desktop`]; tests drive fakes.

use crate::error::Result;
use crate::playback::PlaybackBuffer;
use std::sync::Arc;

/// Receives raw mono samples from the device thread.
///
/// Called on the device's own scheduling domain; it must not block.
pub type SampleCallback = Box<dyn FnMut(&[f32]) + Send + 'static>;

/// A live microphone stream. Dropping or closing it releases the device.
pub trait InputStream: Send {
    /// Stop the stream and release the device.
    fn close(self: Box<Self>);
}

/// An output device with its own clock, accepting scheduled buffers.
pub trait OutputTimeline: Send + Sync {
    /// Current position of the output clock, in seconds.
    fn current_time(&self) -> f64;

    /// Play `buffer` starting at `start_at` seconds on the output clock.
    fn schedule(&self, buffer: PlaybackBuffer, start_at: f64) -> Result<()>;

    /// Stop everything scheduled or playing.
    fn stop_all(&self);

    /// Tear the output down. Further schedules are ignored.
    fn close(&self);
}

/// Opens audio devices.
pub trait AudioBackend: Send + Sync {
    /// Open the default microphone as a mono stream at `sample_rate`.
    ///
    /// Fails with [`LiveError::DeviceError`](crate::LiveError::DeviceError)
    /// when no input device exists or access is denied.
    fn open_input(&self, sample_rate: u32, on_samples: SampleCallback)
    -> Result<Box<dyn InputStream>>;

    /// Open the default output device.
    fn open_output(&self) -> Result<Arc<dyn OutputTimeline>>;
}

/// A shared backend handle.
pub type BoxedBackend = Arc<dyn AudioBackend>;
