//! Gapless playback scheduling of model speech.
//!
//! Each decoded chunk is placed on the output timeline at
//! `max(now, next_start_time)` and `next_start_time` moves to the end of that
//! chunk. Chunks therefore play back-to-back in arrival order however bursty
//! delivery is; late chunks add latency, nothing is dropped to catch up.

use crate::audio::AudioChunk;
use crate::device::OutputTimeline;
use crate::error::Result;
use std::sync::Arc;

/// Decoded samples ready for the output device.
#[derive(Debug, Clone, PartialEq)]
pub struct PlaybackBuffer {
    /// Mono samples in `[-1.0, 1.0]`.
    pub samples: Vec<f32>,
    /// Rate the samples were produced at.
    pub sample_rate: u32,
}

impl PlaybackBuffer {
    /// Create a playback buffer.
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self { samples, sample_rate }
    }

    /// Duration in seconds.
    pub fn duration(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Where a chunk landed on the output timeline.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledSpan {
    /// Start time on the output clock, in seconds.
    pub start: f64,
    /// End time on the output clock, in seconds.
    pub end: f64,
}

impl ScheduledSpan {
    /// Length of the span.
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Schedules inbound audio on a shared output timeline.
///
/// Single writer: the owner serializes calls to [`enqueue`](Self::enqueue).
pub struct PlaybackScheduler {
    output: Arc<dyn OutputTimeline>,
    next_start_time: f64,
}

impl PlaybackScheduler {
    /// Create a scheduler on top of an output timeline.
    pub fn new(output: Arc<dyn OutputTimeline>) -> Self {
        Self { output, next_start_time: 0.0 }
    }

    /// Decode `chunk` and schedule it right after everything already queued.
    pub fn enqueue(&mut self, chunk: &AudioChunk) -> Result<ScheduledSpan> {
        let buffer = PlaybackBuffer::new(chunk.to_samples()?, chunk.format.sample_rate);
        let duration = buffer.duration();

        let now = self.output.current_time();
        let start = now.max(self.next_start_time);
        self.output.schedule(buffer, start)?;
        self.next_start_time = start + duration;

        tracing::trace!(start, duration, "Scheduled playback chunk");
        Ok(ScheduledSpan { start, end: self.next_start_time })
    }

    /// Time the next chunk would start at, ignoring the current clock.
    pub fn next_start_time(&self) -> f64 {
        self.next_start_time
    }

    /// Seconds of audio still queued ahead of the output clock.
    pub fn queued_secs(&self) -> f64 {
        (self.next_start_time - self.output.current_time()).max(0.0)
    }

    /// Stop in-flight buffers and rewind the schedule.
    pub fn reset(&mut self) {
        self.output.stop_all();
        self.next_start_time = 0.0;
    }

    /// Reset and release the output device.
    pub fn shutdown(mut self) {
        self.reset();
        self.output.close();
    }
}

impl std::fmt::Debug for PlaybackScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PlaybackScheduler").field("next_start_time", &self.next_start_time).finish()
    }
}
