//! Writes the model's spoken replies to a raw PCM file, pulling from the
//! playback queue at the pace a sound card would.

use gemini_realtime::audio::PlaybackQueue;
use gemini_realtime::audio::convert::{f32_to_i16, i16_to_le_bytes};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Drains `queue` into `path` every `period` until the task is aborted.
///
/// Output is mono PCM16 little-endian at the queue's sample rate. Only queued
/// audio is written; silence between replies is skipped.
pub async fn run(queue: Arc<PlaybackQueue>, path: PathBuf, period: Duration) -> std::io::Result<()> {
    let mut file = tokio::fs::File::create(&path).await?;
    info!(path = %path.display(), rate = queue.sample_rate(), "Writing spoken replies as PCM16.");

    let frames = (queue.sample_rate() as u64 * period.as_millis() as u64 / 1000).max(1) as usize;
    let mut block = vec![0.0f32; frames];
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let filled = queue.fill(&mut block);
        if filled == 0 {
            continue;
        }
        let bytes = i16_to_le_bytes(&f32_to_i16(&block[..filled]));
        file.write_all(&bytes).await?;
        file.flush().await?;
        debug!(frames = filled, "Wrote audio block.");
    }
}
