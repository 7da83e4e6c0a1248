use super::{AudioChunk, convert};
use crate::error::{RealtimeError, Result};
use parking_lot::Mutex;
use std::collections::VecDeque;
use tracing::debug;

struct Scheduled {
    samples: Vec<f32>,
    /// Position on the queue's sample timeline where this chunk starts.
    start: u64,
}

#[derive(Default)]
struct PlaybackState {
    queue: VecDeque<Scheduled>,
    /// Samples of the front chunk already handed to the device.
    cursor: usize,
    /// Timeline position of the next sample the device will pull.
    played: u64,
    /// Timeline position where the last queued chunk ends.
    scheduled_end: u64,
}

/// Inbound audio waiting to be played.
///
/// Chunks are laid out back to back on a sample timeline: each one starts
/// where the previous one ends, or at the current play position if the queue
/// had run dry. The output device pulls samples with [`PlaybackQueue::fill`].
pub struct PlaybackQueue {
    sample_rate: u32,
    state: Mutex<PlaybackState>,
}

impl PlaybackQueue {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            state: Mutex::new(PlaybackState::default()),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Schedules `chunk` and returns its start position on the timeline.
    /// Chunks at another sample rate are resampled to the queue's rate first.
    pub fn enqueue(&self, chunk: &AudioChunk) -> Result<u64> {
        let mut samples = convert::i16_to_f32(&chunk.samples());
        if chunk.sample_rate() != self.sample_rate {
            if chunk.sample_rate() == 0 {
                return Err(RealtimeError::Audio("chunk has a sample rate of 0".into()));
            }
            debug!(
                chunk_rate = chunk.sample_rate(),
                queue_rate = self.sample_rate,
                "Resampling chunk to playback rate."
            );
            samples = convert::resample_clip(&samples, chunk.sample_rate(), self.sample_rate)
                .map_err(|e| RealtimeError::Audio(format!("Failed to create resampler: {}", e)))?;
        }
        let mut state = self.state.lock();
        let start = state.scheduled_end.max(state.played);
        state.scheduled_end = start + samples.len() as u64;
        state.queue.push_back(Scheduled { samples, start });
        Ok(start)
    }

    /// Drops everything not yet played. Returns how many chunks were discarded.
    pub fn clear(&self) -> usize {
        let mut state = self.state.lock();
        let dropped = state.queue.len();
        state.queue.clear();
        state.cursor = 0;
        state.scheduled_end = state.played;
        if dropped > 0 {
            debug!(dropped, "Flushed playback queue.");
        }
        dropped
    }

    /// Fills `out` with the next samples, writing silence past the end of the
    /// queue. Returns how many samples came from queued audio.
    pub fn fill(&self, out: &mut [f32]) -> usize {
        let mut state = self.state.lock();
        let mut written = 0;
        while written < out.len() {
            let cursor = state.cursor;
            let Some(front) = state.queue.front() else {
                break;
            };
            let available = &front.samples[cursor..];
            let n = available.len().min(out.len() - written);
            out[written..written + n].copy_from_slice(&available[..n]);
            written += n;
            if cursor + n == front.samples.len() {
                state.queue.pop_front();
                state.cursor = 0;
            } else {
                state.cursor = cursor + n;
            }
        }
        out[written..].fill(0.0);
        state.played += out.len() as u64;
        written
    }

    pub fn queued_chunks(&self) -> usize {
        self.state.lock().queue.len()
    }

    /// Samples still waiting to be played.
    pub fn queued_frames(&self) -> usize {
        let state = self.state.lock();
        let total: usize = state.queue.iter().map(|c| c.samples.len()).sum();
        total - state.cursor
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().queue.is_empty()
    }

    /// Timeline start positions of the queued chunks, front first.
    pub fn schedule(&self) -> Vec<u64> {
        self.state.lock().queue.iter().map(|c| c.start).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::OUTPUT_SAMPLE_RATE;
    use approx::assert_abs_diff_eq;

    fn chunk(value: i16, frames: usize) -> AudioChunk {
        AudioChunk::from_samples(&vec![value; frames], OUTPUT_SAMPLE_RATE)
    }

    #[test]
    fn test_chunks_are_scheduled_back_to_back() {
        let queue = PlaybackQueue::new(OUTPUT_SAMPLE_RATE);
        assert_eq!(queue.enqueue(&chunk(1, 100)).unwrap(), 0);
        assert_eq!(queue.enqueue(&chunk(2, 50)).unwrap(), 100);
        assert_eq!(queue.enqueue(&chunk(3, 10)).unwrap(), 150);
        assert_eq!(queue.schedule(), vec![0, 100, 150]);
        assert_eq!(queue.queued_frames(), 160);
    }

    #[test]
    fn test_fill_crosses_chunk_boundaries_without_gaps() {
        let queue = PlaybackQueue::new(OUTPUT_SAMPLE_RATE);
        queue.enqueue(&chunk(16384, 3)).unwrap();
        queue.enqueue(&chunk(-16384, 3)).unwrap();

        let mut out = [9.0f32; 4];
        assert_eq!(queue.fill(&mut out), 4);
        assert_abs_diff_eq!(out[2], 0.5, epsilon = 0.0001);
        assert_abs_diff_eq!(out[3], -0.5, epsilon = 0.0001);
        assert_eq!(queue.queued_frames(), 2);

        let mut out = [9.0f32; 4];
        assert_eq!(queue.fill(&mut out), 2);
        assert_abs_diff_eq!(out[1], -0.5, epsilon = 0.0001);
        assert_eq!(&out[2..], &[0.0, 0.0]);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_after_underrun_new_chunk_starts_at_play_position() {
        let queue = PlaybackQueue::new(OUTPUT_SAMPLE_RATE);
        queue.enqueue(&chunk(1, 10)).unwrap();
        let mut out = [0.0f32; 25];
        queue.fill(&mut out);
        assert_eq!(queue.enqueue(&chunk(1, 10)).unwrap(), 25);
    }

    #[test]
    fn test_chunk_at_another_rate_is_resampled() {
        let queue = PlaybackQueue::new(OUTPUT_SAMPLE_RATE);
        let input_rate = AudioChunk::from_samples(&[8192; 160], crate::audio::INPUT_SAMPLE_RATE);
        assert_eq!(queue.enqueue(&input_rate).unwrap(), 0);
        // 10 ms at 16 kHz is 240 samples at 24 kHz.
        assert_eq!(queue.queued_frames(), 240);
        assert_eq!(queue.enqueue(&chunk(1, 10)).unwrap(), 240);

        let mut out = [0.0f32; 240];
        assert_eq!(queue.fill(&mut out), 240);
        assert_abs_diff_eq!(out[120], 0.25, epsilon = 0.05);
    }

    #[test]
    fn test_chunk_with_zero_rate_is_rejected() {
        let queue = PlaybackQueue::new(OUTPUT_SAMPLE_RATE);
        let broken = AudioChunk::from_samples(&[1, 2, 3], 0);
        assert!(matches!(queue.enqueue(&broken), Err(RealtimeError::Audio(_))));
        assert!(queue.is_empty());
    }

    #[test]
    fn test_clear_discards_queued_chunks() {
        let queue = PlaybackQueue::new(OUTPUT_SAMPLE_RATE);
        queue.enqueue(&chunk(1, 100)).unwrap();
        queue.enqueue(&chunk(1, 100)).unwrap();
        let mut out = [0.0f32; 30];
        queue.fill(&mut out);

        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert_eq!(queue.queued_frames(), 0);

        let mut out = [7.0f32; 8];
        assert_eq!(queue.fill(&mut out), 0);
        assert!(out.iter().all(|&s| s == 0.0));

        // Scheduling resumes from the play position, not the discarded end.
        assert_eq!(queue.enqueue(&chunk(1, 10)).unwrap(), 38);
    }
}
