//! cpal-backed microphone and speaker.
//!
//! cpal streams are not `Send` on every host, so each stream is built, played
//! and dropped on its own thread. Devices that cannot run at the requested
//! rate are opened at their default rate and resampled with rubato.

use crate::audio::PLAYBACK_SAMPLE_RATE;
use crate::device::{AudioBackend, InputStream, OutputTimeline, SampleCallback};
use crate::error::{LiveError, Result};
use crate::playback::PlaybackBuffer;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SampleRate, SizedSample, SupportedStreamConfig};
use parking_lot::Mutex;
use rubato::{FftFixedIn, Resampler};
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread::JoinHandle;

const RESAMPLE_CHUNK: usize = 1024;
const RESAMPLE_SUB_CHUNKS: usize = 2;

/// Default system microphone and speaker.
#[derive(Debug, Clone)]
pub struct CpalBackend {
    output_rate: u32,
}

impl Default for CpalBackend {
    fn default() -> Self {
        Self { output_rate: PLAYBACK_SAMPLE_RATE }
    }
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rate to try opening the speaker at before falling back to its default.
    pub fn with_output_rate(mut self, rate: u32) -> Self {
        self.output_rate = rate;
        self
    }
}

impl AudioBackend for CpalBackend {
    fn open_input(
        &self,
        sample_rate: u32,
        on_samples: SampleCallback,
    ) -> Result<Box<dyn InputStream>> {
        let thread = StreamThread::spawn("elocute-mic", move || {
            let host = cpal::default_host();
            let device = host
                .default_input_device()
                .ok_or_else(|| LiveError::device("No input device available"))?;

            let supported = pick_config(
                device.supported_input_configs().map_err(|e| LiveError::device(e.to_string()))?,
                sample_rate,
            )
            .map(Ok)
            .unwrap_or_else(|| {
                device.default_input_config().map_err(|e| LiveError::device(e.to_string()))
            })?;

            let config = supported.config();
            let converter = MicConverter::new(
                config.channels as usize,
                config.sample_rate.0,
                sample_rate,
                on_samples,
            )?;
            tracing::info!(
                device = %device.name().unwrap_or_default(),
                device_rate = config.sample_rate.0,
                channels = config.channels,
                format = ?supported.sample_format(),
                "Opened microphone"
            );

            let stream = match supported.sample_format() {
                SampleFormat::F32 => build_input::<f32>(&device, &config, converter),
                SampleFormat::I16 => build_input::<i16>(&device, &config, converter),
                SampleFormat::U16 => build_input::<u16>(&device, &config, converter),
                other => {
                    Err(LiveError::device(format!("Unsupported input sample format {other:?}")))
                }
            }?;
            Ok((stream, ()))
        })?;

        Ok(Box::new(CpalInputStream { thread: thread.0 }))
    }

    fn open_output(&self) -> Result<Arc<dyn OutputTimeline>> {
        let preferred = self.output_rate;
        let (thread, shared) = StreamThread::spawn("elocute-speaker", move || {
            let host = cpal::default_host();
            let device = host
                .default_output_device()
                .ok_or_else(|| LiveError::device("No output device available"))?;

            let supported = pick_config(
                device.supported_output_configs().map_err(|e| LiveError::device(e.to_string()))?,
                preferred,
            )
            .map(Ok)
            .unwrap_or_else(|| {
                device.default_output_config().map_err(|e| LiveError::device(e.to_string()))
            })?;

            let config = supported.config();
            let shared = Arc::new(OutputShared::new(config.sample_rate.0));
            tracing::info!(
                device = %device.name().unwrap_or_default(),
                device_rate = config.sample_rate.0,
                channels = config.channels,
                format = ?supported.sample_format(),
                "Opened speaker"
            );

            let stream = match supported.sample_format() {
                SampleFormat::F32 => build_output::<f32>(&device, &config, shared.clone()),
                SampleFormat::I16 => build_output::<i16>(&device, &config, shared.clone()),
                SampleFormat::U16 => build_output::<u16>(&device, &config, shared.clone()),
                other => {
                    Err(LiveError::device(format!("Unsupported output sample format {other:?}")))
                }
            }?;
            Ok((stream, shared))
        })?;

        Ok(Arc::new(CpalOutput { shared, thread: Mutex::new(Some(thread)) }))
    }
}

fn pick_config(
    ranges: impl Iterator<Item = cpal::SupportedStreamConfigRange>,
    rate: u32,
) -> Option<SupportedStreamConfig> {
    let rank = |format: SampleFormat| match format {
        SampleFormat::F32 => 0,
        SampleFormat::I16 => 1,
        _ => 2,
    };
    ranges
        .filter(|r| {
            matches!(r.sample_format(), SampleFormat::F32 | SampleFormat::I16 | SampleFormat::U16)
        })
        .filter(|r| r.min_sample_rate().0 <= rate && rate <= r.max_sample_rate().0)
        .min_by_key(|r| (r.channels(), rank(r.sample_format())))
        .map(|r| r.with_sample_rate(SampleRate(rate)))
}

fn build_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut converter: MicConverter,
) -> Result<cpal::Stream>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let mut scratch: Vec<f32> = Vec::new();
    device
        .build_input_stream(
            config,
            move |data: &[T], _: &cpal::InputCallbackInfo| {
                scratch.clear();
                scratch.extend(data.iter().map(|s| s.to_sample::<f32>()));
                converter.push(&scratch);
            },
            |err| tracing::error!(error = %err, "Microphone stream error"),
            None,
        )
        .map_err(|e| LiveError::device(format!("Failed to open microphone: {e}")))
}

fn build_output<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    shared: Arc<OutputShared>,
) -> Result<cpal::Stream>
where
    T: SizedSample + FromSample<f32>,
{
    let channels = config.channels as usize;
    let mut scratch: Vec<f32> = Vec::new();
    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                scratch.resize(data.len(), 0.0);
                shared.render(&mut scratch, channels);
                for (out, sample) in data.iter_mut().zip(&scratch) {
                    *out = sample.to_sample::<T>();
                }
            },
            |err| tracing::error!(error = %err, "Speaker stream error"),
            None,
        )
        .map_err(|e| LiveError::device(format!("Failed to open speaker: {e}")))
}

/// A stream owned by a dedicated thread until stopped.
struct StreamThread {
    stop: Option<mpsc::Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl StreamThread {
    fn spawn<F, T>(name: &str, build: F) -> Result<(Self, T)>
    where
        F: FnOnce() -> Result<(cpal::Stream, T)> + Send + 'static,
        T: Send + 'static,
    {
        let (ready_tx, ready_rx) = mpsc::channel::<Result<T>>();
        let (stop_tx, stop_rx) = mpsc::channel::<()>();

        let handle = std::thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let (stream, value) = match build() {
                    Ok(built) => built,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let error = LiveError::device(format!("Failed to start stream: {e}"));
                    let _ = ready_tx.send(Err(error));
                    return;
                }
                let _ = ready_tx.send(Ok(value));
                // Returns once stopped or once the sender is dropped.
                let _ = stop_rx.recv();
                drop(stream);
            })
            .map_err(|e| LiveError::device(format!("Failed to spawn audio thread: {e}")))?;

        match ready_rx.recv() {
            Ok(Ok(value)) => Ok((Self { stop: Some(stop_tx), handle: Some(handle) }, value)),
            Ok(Err(e)) => {
                let _ = handle.join();
                Err(e)
            }
            Err(_) => Err(LiveError::device("Audio thread exited before the stream started")),
        }
    }

    fn stop(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StreamThread {
    fn drop(&mut self) {
        self.stop();
    }
}

struct CpalInputStream {
    thread: StreamThread,
}

impl InputStream for CpalInputStream {
    fn close(mut self: Box<Self>) {
        self.thread.stop();
    }
}

/// Downmixes device frames to mono and resamples to the requested rate.
struct MicConverter {
    channels: usize,
    resampler: Option<StreamResampler>,
    mono: Vec<f32>,
    on_samples: SampleCallback,
}

impl MicConverter {
    fn new(
        channels: usize,
        device_rate: u32,
        target_rate: u32,
        on_samples: SampleCallback,
    ) -> Result<Self> {
        let resampler = if device_rate == target_rate {
            None
        } else {
            tracing::info!(device_rate, target_rate, "Resampling microphone input");
            Some(StreamResampler::new(device_rate, target_rate)?)
        };
        Ok(Self { channels: channels.max(1), resampler, mono: Vec::new(), on_samples })
    }

    fn push(&mut self, interleaved: &[f32]) {
        self.mono.clear();
        self.mono.extend(
            interleaved
                .chunks(self.channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
        );
        match &mut self.resampler {
            None => (self.on_samples)(&self.mono),
            Some(resampler) => {
                let out = resampler.push(&self.mono);
                if !out.is_empty() {
                    (self.on_samples)(&out);
                }
            }
        }
    }
}

fn fft_resampler(from: u32, to: u32) -> Result<FftFixedIn<f32>> {
    FftFixedIn::<f32>::new(from as usize, to as usize, RESAMPLE_CHUNK, RESAMPLE_SUB_CHUNKS, 1)
        .map_err(|e| LiveError::audio(format!("Failed to create resampler: {e}")))
}

/// Continuous mono resampler fed with arbitrary slice sizes.
pub(crate) struct StreamResampler {
    inner: FftFixedIn<f32>,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub(crate) fn new(from: u32, to: u32) -> Result<Self> {
        let inner = fft_resampler(from, to)?;
        Ok(Self { inner, pending: Vec::with_capacity(RESAMPLE_CHUNK * 2) })
    }

    pub(crate) fn push(&mut self, samples: &[f32]) -> Vec<f32> {
        self.pending.extend_from_slice(samples);
        let mut out = Vec::new();
        loop {
            let need = self.inner.input_frames_next();
            if self.pending.len() < need {
                break;
            }
            let block: Vec<f32> = self.pending.drain(..need).collect();
            match self.inner.process(&[block], None) {
                Ok(frames) => out.extend_from_slice(&frames[0]),
                Err(e) => {
                    tracing::warn!(error = %e, "Resampling failed, dropping input");
                    self.pending.clear();
                    break;
                }
            }
        }
        out
    }
}

/// Resample a complete mono buffer, compensating for the filter delay.
pub fn resample(samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
    if from == to || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let mut resampler = fft_resampler(from, to)?;

    let delay = resampler.output_delay();
    let expected = (samples.len() as f64 * to as f64 / from as f64).round() as usize;
    let mut out = Vec::with_capacity(expected + delay + RESAMPLE_CHUNK);
    let mut pos = 0;

    while out.len() < delay + expected {
        let need = resampler.input_frames_next();
        let mut block = vec![0.0f32; need];
        if pos < samples.len() {
            let end = (pos + need).min(samples.len());
            block[..end - pos].copy_from_slice(&samples[pos..end]);
            pos = end;
        }
        let frames = resampler
            .process(&[block], None)
            .map_err(|e| LiveError::audio(format!("Resampling failed: {e}")))?;
        out.extend_from_slice(&frames[0]);
    }

    Ok(out[delay..delay + expected].to_vec())
}

struct Voice {
    start_frame: u64,
    samples: Vec<f32>,
}

impl Voice {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Output clock and scheduled buffers, shared with the device callback.
struct OutputShared {
    device_rate: u32,
    frames_played: AtomicU64,
    voices: Mutex<VecDeque<Voice>>,
    closed: AtomicBool,
}

impl OutputShared {
    fn new(device_rate: u32) -> Self {
        Self {
            device_rate,
            frames_played: AtomicU64::new(0),
            voices: Mutex::new(VecDeque::new()),
            closed: AtomicBool::new(false),
        }
    }

    /// Mix every voice overlapping the next `data.len() / channels` frames.
    fn render(&self, data: &mut [f32], channels: usize) {
        data.fill(0.0);
        let channels = channels.max(1);
        let frames = (data.len() / channels) as u64;
        let base = self.frames_played.load(Ordering::Acquire);
        let window_end = base + frames;

        if !self.closed.load(Ordering::Acquire) {
            let mut voices = self.voices.lock();
            for voice in voices.iter() {
                let from = voice.start_frame.max(base);
                let to = voice.end_frame().min(window_end);
                for frame in from..to {
                    let sample = voice.samples[(frame - voice.start_frame) as usize];
                    let offset = (frame - base) as usize * channels;
                    for out in &mut data[offset..offset + channels] {
                        *out += sample;
                    }
                }
            }
            voices.retain(|v| v.end_frame() > window_end);
        }

        for sample in data.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }
        self.frames_played.fetch_add(frames, Ordering::Release);
    }
}

struct CpalOutput {
    shared: Arc<OutputShared>,
    thread: Mutex<Option<StreamThread>>,
}

impl OutputTimeline for CpalOutput {
    fn current_time(&self) -> f64 {
        self.shared.frames_played.load(Ordering::Acquire) as f64 / self.shared.device_rate as f64
    }

    fn schedule(&self, buffer: PlaybackBuffer, start_at: f64) -> Result<()> {
        if self.shared.closed.load(Ordering::Acquire) {
            return Ok(());
        }
        let samples = resample(&buffer.samples, buffer.sample_rate, self.shared.device_rate)?;
        let start_frame = (start_at * self.shared.device_rate as f64).round() as u64;
        self.shared.voices.lock().push_back(Voice { start_frame, samples });
        Ok(())
    }

    fn stop_all(&self) {
        self.shared.voices.lock().clear();
    }

    fn close(&self) {
        self.shared.closed.store(true, Ordering::Release);
        self.stop_all();
        if let Some(mut thread) = self.thread.lock().take() {
            thread.stop();
            tracing::info!("Speaker closed");
        }
    }
}
