use crate::error::Result;

/// Callback fed by an input device: mono f32 samples plus the rate they
/// were captured at.
pub type FrameSink = Box<dyn FnMut(&[f32], u32) + Send>;

/// What an input device reported when it opened.
#[derive(Debug, Clone, Copy)]
pub struct StreamInfo {
    pub sample_rate: u32,
}

/// Host seam for microphone capture.
///
/// Implementations deliver mono f32 frames to the sink from their own
/// capture thread. After `close()` the sink must be dropped and no more
/// frames delivered; `open()` may be called again later.
pub trait AudioInput: Send {
    fn open(&mut self, sink: FrameSink) -> Result<StreamInfo>;

    /// Stops delivery but keeps the device claimed.
    fn suspend(&mut self) -> Result<()>;

    fn resume(&mut self) -> Result<()>;

    fn close(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CaptureState {
    Closed,
    Running,
    Suspended,
}

/// Converts a mono f32 frame to little-endian PCM16 at `target_rate`,
/// linearly interpolating when the device rate differs.
pub(crate) fn encode_pcm16(samples: &[f32], source_rate: u32, target_rate: u32) -> Vec<u8> {
    if samples.is_empty() || source_rate == 0 || target_rate == 0 {
        return Vec::new();
    }

    let mut bytes;
    if source_rate == target_rate {
        bytes = Vec::with_capacity(samples.len() * 2);
        for sample in samples {
            bytes.extend_from_slice(&to_i16(*sample).to_le_bytes());
        }
    } else {
        let ratio = source_rate as f32 / target_rate as f32;
        let out_len = (samples.len() as f32 / ratio) as usize;
        bytes = Vec::with_capacity(out_len * 2);
        for i in 0..out_len {
            let pos = i as f32 * ratio;
            let idx = pos as usize;
            let frac = pos - idx as f32;
            let a = samples[idx];
            let b = if idx + 1 < samples.len() { samples[idx + 1] } else { a };
            bytes.extend_from_slice(&to_i16(a + (b - a) * frac).to_le_bytes());
        }
    }
    bytes
}

fn to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}
