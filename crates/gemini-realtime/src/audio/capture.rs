use super::{AudioChunk, CAPTURE_BLOCK_FRAMES, INPUT_SAMPLE_RATE, convert};
use crate::error::{RealtimeError, Result};
use async_trait::async_trait;
use rubato::FastFixedIn;
use tokio::{sync::mpsc, task::JoinHandle};
use tracing::{debug, info};

/// A live stream of mono f32 samples from an input device.
#[async_trait]
pub trait CaptureSource: Send + 'static {
    fn sample_rate(&self) -> u32;

    /// The next batch of samples, of any length. `None` once the device stops.
    async fn next_samples(&mut self) -> Option<Vec<f32>>;
}

/// A [`CaptureSource`] fed through a channel, the shape a device callback
/// naturally produces.
pub struct ChannelSource {
    rx: mpsc::Receiver<Vec<f32>>,
    sample_rate: u32,
}

impl ChannelSource {
    pub fn new(sample_rate: u32, capacity: usize) -> (mpsc::Sender<Vec<f32>>, Self) {
        let (tx, rx) = mpsc::channel(capacity);
        (tx, Self { rx, sample_rate })
    }
}

#[async_trait]
impl CaptureSource for ChannelSource {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn next_samples(&mut self) -> Option<Vec<f32>> {
        self.rx.recv().await
    }
}

/// Owns a running capture. Stopping or dropping it releases the source.
#[derive(Debug)]
pub struct CaptureHandle {
    task: Option<JoinHandle<()>>,
}

impl CaptureHandle {
    pub fn stop(mut self) {
        self.release();
    }

    /// False once the source has ended or the capture was stopped.
    pub fn is_active(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    fn release(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
            debug!("Audio capture released.");
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Starts capturing from `source`, delivering `audio/pcm;rate=16000` chunks of
/// one [`CAPTURE_BLOCK_FRAMES`] input block each to `on_chunk`.
///
/// Must be called from within a Tokio runtime.
pub fn start_capture<S, F>(mut source: S, mut on_chunk: F) -> Result<CaptureHandle>
where
    S: CaptureSource,
    F: FnMut(AudioChunk) + Send + 'static,
{
    let source_rate = source.sample_rate();
    let mut resampler = if source_rate == INPUT_SAMPLE_RATE {
        None
    } else {
        Some(
            convert::create_resampler(source_rate, INPUT_SAMPLE_RATE, CAPTURE_BLOCK_FRAMES)
                .map_err(|e| RealtimeError::Audio(e.to_string()))?,
        )
    };
    info!(source_rate, "Starting audio capture.");

    let task = tokio::spawn(async move {
        let mut pending: Vec<f32> = Vec::with_capacity(CAPTURE_BLOCK_FRAMES * 2);
        while let Some(samples) = source.next_samples().await {
            pending.extend_from_slice(&samples);
            while pending.len() >= CAPTURE_BLOCK_FRAMES {
                let block: Vec<f32> = pending.drain(..CAPTURE_BLOCK_FRAMES).collect();
                if let Some(chunk) = encode_block(resampler.as_mut(), block) {
                    on_chunk(chunk);
                }
            }
        }
        if !pending.is_empty() {
            if let Some(chunk) = encode_block(resampler.as_mut(), pending) {
                on_chunk(chunk);
            }
        }
        debug!("Audio capture source ended.");
    });

    Ok(CaptureHandle { task: Some(task) })
}

fn encode_block(resampler: Option<&mut FastFixedIn<f32>>, block: Vec<f32>) -> Option<AudioChunk> {
    let samples = match resampler {
        Some(resampler) => convert::resample_block(resampler, &block),
        None => block,
    };
    if samples.is_empty() {
        return None;
    }
    Some(AudioChunk::from_samples(
        &convert::f32_to_i16(&samples),
        INPUT_SAMPLE_RATE,
    ))
}
