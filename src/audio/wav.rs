//! WAV and raw PCM conversion for service uploads and synthesized speech.

use crate::error::{Result, TalkbackError};
use std::io::Cursor;

/// Mono 16-bit PCM with its sample rate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PcmAudio {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
}

impl PcmAudio {
    pub fn duration_ms(&self) -> u64 {
        if self.sample_rate == 0 {
            return 0;
        }
        self.samples.len() as u64 * 1000 / self.sample_rate as u64
    }
}

/// Encodes mono 16-bit samples as an in-memory WAV file.
pub fn encode_wav(samples: &[i16], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let wav_error = |e: hound::Error| TalkbackError::Other(format!("Failed to encode WAV: {}", e));

    let mut cursor = Cursor::new(Vec::with_capacity(44 + samples.len() * 2));
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).map_err(wav_error)?;
        for &sample in samples {
            writer.write_sample(sample).map_err(wav_error)?;
        }
        writer.finalize().map_err(wav_error)?;
    }
    Ok(cursor.into_inner())
}

/// Decodes a 16-bit WAV file, downmixing to mono.
///
/// Keeps the file's own sample rate; see [`resample`] to convert.
pub fn decode_wav(data: &[u8]) -> Result<PcmAudio> {
    let mut reader =
        hound::WavReader::new(Cursor::new(data)).map_err(|e| TalkbackError::Synthesis {
            message: format!("Failed to parse WAV data: {}", e),
        })?;

    let spec = reader.spec();
    if spec.sample_format != hound::SampleFormat::Int || spec.bits_per_sample != 16 {
        return Err(TalkbackError::Synthesis {
            message: format!(
                "Unsupported WAV format: {} bit {:?}",
                spec.bits_per_sample, spec.sample_format
            ),
        });
    }

    let raw_samples: Vec<i16> = reader
        .samples::<i16>()
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| TalkbackError::Synthesis {
            message: format!("Failed to read WAV samples: {}", e),
        })?;

    Ok(PcmAudio {
        samples: downmix(&raw_samples, spec.channels as usize),
        sample_rate: spec.sample_rate,
    })
}

/// Decodes headerless 16-bit little-endian mono PCM.
///
/// A trailing odd byte is dropped.
pub fn decode_pcm16le(data: &[u8], sample_rate: u32) -> PcmAudio {
    let samples = data
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();
    PcmAudio {
        samples,
        sample_rate,
    }
}

/// Averages interleaved frames down to one channel.
pub fn downmix(samples: &[i16], channels: usize) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}

/// Simple linear interpolation resampling.
pub fn resample(samples: &[i16], from_rate: u32, to_rate: u32) -> Vec<i16> {
    if from_rate == to_rate || from_rate == 0 || to_rate == 0 {
        return samples.to_vec();
    }

    let ratio = from_rate as f64 / to_rate as f64;
    let output_len = (samples.len() as f64 / ratio).ceil() as usize;

    (0..output_len)
        .map(|i| {
            let source_pos = i as f64 * ratio;
            let source_idx = (source_pos.floor() as usize).min(samples.len() - 1);
            let fraction = source_pos - source_idx as f64;

            if source_idx + 1 >= samples.len() {
                samples[source_idx]
            } else {
                let left = samples[source_idx] as f64;
                let right = samples[source_idx + 1] as f64;
                (left + (right - left) * fraction) as i16
            }
        })
        .collect()
}

/// Converts float samples in -1.0..=1.0 to 16-bit.
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}

/// Converts a 16-bit sample to a float in -1.0..=1.0.
pub fn i16_to_f32(sample: i16) -> f32 {
    sample as f32 / i16::MAX as f32
}
