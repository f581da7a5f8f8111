use ringbuf::HeapRb;
use rubato::{FastFixedIn, PolynomialDegree};

/// Sample rate the backend expects on the input audio stream.
pub const STREAM_PCM16_SAMPLE_RATE: f64 = 16000.0;

/// Fixed-ratio resampler between a device rate and the wire rate.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Splits captured samples into fixed-size chunks, zero-padding the tail.
pub fn split_for_chunks(samples: &[f32], chunk_size: usize) -> Vec<Vec<f32>> {
    samples
        .chunks(chunk_size)
        .map(|chunk| {
            let mut chunk = chunk.to_vec();
            chunk.resize(chunk_size, 0.0);
            chunk
        })
        .collect()
}

/// Ring buffer shared between a capture callback and the task draining it.
pub fn shared_buffer(size: usize) -> HeapRb<f32> {
    HeapRb::new(size)
}

/// PCM16 little-endian frame to f32 samples. A trailing odd byte is dropped.
pub fn decode_frame(frame: &[u8]) -> Vec<f32> {
    if frame.len() % 2 != 0 {
        tracing::warn!("pcm16 frame has odd length {}", frame.len());
    }
    frame
        .chunks_exact(2)
        .map(|pair| {
            let v = i16::from_le_bytes([pair[0], pair[1]]);
            (v as f32 / i16::MAX as f32).clamp(-1.0, 1.0)
        })
        .collect()
}

pub fn decode_frames(frames: &[Vec<u8>]) -> Vec<f32> {
    frames.iter().flat_map(|frame| decode_frame(frame)).collect()
}

/// f32 samples to a PCM16 little-endian frame.
pub fn encode_frame(pcm32: &[f32]) -> Vec<u8> {
    pcm32
        .iter()
        .flat_map(|&sample| {
            let clamped = (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16;
            clamped.to_le_bytes()
        })
        .collect()
}
