//! Assembling captured chunks into an uploadable WAV clip.

use super::device::AudioChunk;
use super::resample::{downmix_to_mono, resample};

/// A finished recording, encoded as 16-bit PCM mono WAV.
#[derive(Debug, Clone, PartialEq)]
pub struct AudioClip {
    pub wav: Vec<u8>,
    pub sample_rate: u32,
    pub duration_secs: f32,
}

impl AudioClip {
    pub const FILE_NAME: &'static str = "recording.wav";
    pub const MIME_TYPE: &'static str = "audio/wav";

    /// Join `chunks` in arrival order, downmix, resample to `target_rate` and
    /// encode.  Returns `None` when the chunks hold no samples.
    ///
    /// A single capture stream has one format, so the first chunk's rate is
    /// taken as the source rate for the whole clip.
    pub fn assemble(chunks: &[AudioChunk], target_rate: u32) -> Option<Self> {
        let source_rate = chunks.iter().find(|c| !c.samples.is_empty())?.sample_rate;

        let mono: Vec<f32> = chunks
            .iter()
            .flat_map(|c| downmix_to_mono(&c.samples, c.channels))
            .collect();
        let samples = resample(&mono, source_rate, target_rate);
        if samples.is_empty() {
            return None;
        }

        Some(Self {
            wav: encode_wav(&samples, target_rate),
            sample_rate: target_rate,
            duration_secs: samples.len() as f32 / target_rate as f32,
        })
    }
}

/// Encode mono `f32` samples as a canonical 44-byte-header PCM16 WAV file.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Vec<u8> {
    const CHANNELS: u16 = 1;
    const BITS_PER_SAMPLE: u16 = 16;
    let block_align = CHANNELS * BITS_PER_SAMPLE / 8;
    let byte_rate = sample_rate * block_align as u32;
    let data_len = (samples.len() * block_align as usize) as u32;

    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");

    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&CHANNELS.to_le_bytes());
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&BITS_PER_SAMPLE.to_le_bytes());

    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    for &s in samples {
        let pcm = (s.clamp(-1.0, 1.0) * i16::MAX as f32).round() as i16;
        out.extend_from_slice(&pcm.to_le_bytes());
    }
    out
}
