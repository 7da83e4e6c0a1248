//! PCM sample conversions and resampling.

use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};

/// Creates a mono resampler between two sample rates.
pub fn create_resampler(
    in_sampling_rate: u32,
    out_sampling_rate: u32,
    chunk_size: usize,
) -> Result<FastFixedIn<f32>, rubato::ResamplerConstructionError> {
    FastFixedIn::<f32>::new(
        out_sampling_rate as f64 / in_sampling_rate as f64,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )
}

/// Feeds one block through `resampler`. Blocks shorter than the resampler's
/// fixed input size are treated as the final, partial block.
pub fn resample_block(resampler: &mut FastFixedIn<f32>, block: &[f32]) -> Vec<f32> {
    let result = if block.len() >= resampler.input_frames_next() {
        resampler.process(&[block], None)
    } else {
        let wave_in = [block];
        resampler.process_partial(Some(&wave_in[..]), None)
    };
    match result {
        Ok(mut channels) => channels.pop().unwrap_or_default(),
        Err(e) => {
            tracing::error!("Failed to resample audio block: {}", e);
            Vec::new()
        }
    }
}

/// Resamples a whole clip at once. The result holds exactly
/// `len * out_rate / in_rate` samples, with the filter delay trimmed off.
pub fn resample_clip(
    samples: &[f32],
    in_sampling_rate: u32,
    out_sampling_rate: u32,
) -> Result<Vec<f32>, rubato::ResamplerConstructionError> {
    if in_sampling_rate == out_sampling_rate || samples.is_empty() {
        return Ok(samples.to_vec());
    }
    let mut resampler = create_resampler(in_sampling_rate, out_sampling_rate, samples.len())?;
    let delay = resampler.output_delay();
    let mut resampled = resample_block(&mut resampler, samples);
    // Push silence through to flush what is still inside the filter.
    let silence = vec![0.0; resampler.input_frames_next()];
    resampled.extend(resample_block(&mut resampler, &silence));

    let expected = (samples.len() as u64 * out_sampling_rate as u64 / in_sampling_rate as u64) as usize;
    let mut clip: Vec<f32> = resampled.into_iter().skip(delay).collect();
    clip.resize(expected, 0.0);
    Ok(clip)
}

/// Converts f32 samples in [-1.0, 1.0] to i16, clamping out-of-range values.
pub fn f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * 32768.0).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

pub fn i16_to_f32(pcm16: &[i16]) -> Vec<f32> {
    pcm16.iter().map(|&sample| sample as f32 / 32768.0).collect()
}

/// Serialises samples as PCM16 little-endian bytes.
pub fn i16_to_le_bytes(pcm16: &[i16]) -> Vec<u8> {
    pcm16.iter().flat_map(|&sample| sample.to_le_bytes()).collect()
}

/// Reads PCM16 little-endian bytes. A trailing odd byte is dropped.
pub fn le_bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|chunk| i16::from_le_bytes([chunk[0], chunk[1]]))
        .collect()
}

/// Base64 text of an inline data blob.
pub fn encode_base64(bytes: &[u8]) -> String {
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

pub fn decode_base64(fragment: &str) -> Result<Vec<u8>, base64::DecodeError> {
    base64::engine::general_purpose::STANDARD.decode(fragment)
}
