//! Audio pipeline: microphone capture to outbound chunks, inbound chunks to a
//! gapless playback queue. Device access stays outside this crate; capture reads
//! from a [`CaptureSource`] and playback is drained by whatever owns the output
//! device.

mod capture;
pub mod convert;
mod playback;

pub use capture::{CaptureHandle, CaptureSource, ChannelSource, start_capture};
pub use playback::PlaybackQueue;

use crate::protocol::Blob;
use bytes::Bytes;
use std::time::Duration;

/// Sample rate the Live API accepts for input audio.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Sample rate of audio the Live API produces.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;
/// Input frames per captured block.
pub const CAPTURE_BLOCK_FRAMES: usize = 512;

/// A buffer of mono PCM16 little-endian samples. Never mutated after creation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    data: Bytes,
    sample_rate: u32,
    mime_type: String,
}

impl AudioChunk {
    /// Builds a chunk from samples, copying them.
    pub fn from_samples(samples: &[i16], sample_rate: u32) -> Self {
        Self::from_pcm16(
            Bytes::from(convert::i16_to_le_bytes(samples)),
            sample_rate,
        )
    }

    pub fn from_pcm16(data: Bytes, sample_rate: u32) -> Self {
        Self {
            data,
            sample_rate,
            mime_type: format!("audio/pcm;rate={}", sample_rate),
        }
    }

    /// Builds a chunk from an inline blob. The rate comes from the mime type's
    /// `rate` parameter and defaults to [`OUTPUT_SAMPLE_RATE`].
    pub fn from_blob(blob: &Blob) -> Self {
        let sample_rate = blob
            .mime_type
            .split(';')
            .filter_map(|param| param.trim().strip_prefix("rate="))
            .find_map(|rate| rate.parse().ok())
            .unwrap_or(OUTPUT_SAMPLE_RATE);
        Self {
            data: blob.data.clone(),
            sample_rate,
            mime_type: blob.mime_type.clone(),
        }
    }

    pub fn data(&self) -> &Bytes {
        &self.data
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn samples(&self) -> Vec<i16> {
        convert::le_bytes_to_i16(&self.data)
    }

    pub fn frames(&self) -> usize {
        self.data.len() / 2
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs_f64(self.frames() as f64 / self.sample_rate as f64)
    }

    pub fn to_blob(&self) -> Blob {
        Blob {
            mime_type: self.mime_type.clone(),
            data: self.data.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_from_samples() {
        let chunk = AudioChunk::from_samples(&[1, -1, 16384], INPUT_SAMPLE_RATE);
        assert_eq!(chunk.mime_type(), "audio/pcm;rate=16000");
        assert_eq!(chunk.frames(), 3);
        assert_eq!(chunk.samples(), vec![1, -1, 16384]);
    }

    #[test]
    fn test_chunk_duration() {
        let chunk = AudioChunk::from_samples(&vec![0; 2400], OUTPUT_SAMPLE_RATE);
        assert_eq!(chunk.duration(), Duration::from_millis(100));
    }

    #[test]
    fn test_chunk_rate_from_blob() {
        let blob = Blob {
            mime_type: "audio/pcm;rate=24000".into(),
            data: Bytes::from_static(&[0, 0, 1, 0]),
        };
        let chunk = AudioChunk::from_blob(&blob);
        assert_eq!(chunk.sample_rate(), 24000);
        assert_eq!(chunk.samples(), vec![0, 1]);
        assert_eq!(chunk.to_blob(), blob);

        let bare = Blob {
            mime_type: "audio/pcm".into(),
            data: Bytes::new(),
        };
        assert_eq!(AudioChunk::from_blob(&bare).sample_rate(), OUTPUT_SAMPLE_RATE);
    }
}
