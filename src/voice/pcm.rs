//! PCM helpers for the relay's fixed audio format
//!
//! All inbound audio is 16 kHz, 16-bit, mono, little-endian PCM.

use crate::{Error, Result};

/// Sample rate for inbound audio
pub const SAMPLE_RATE: u32 = 16_000;

/// Pack signed 16-bit samples into little-endian bytes
#[must_use]
pub fn samples_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

/// Unpack little-endian bytes into signed 16-bit samples
///
/// A trailing odd byte is ignored.
#[must_use]
pub fn bytes_to_samples(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

/// RMS energy of 16-bit samples, normalized to `[0.0, 1.0]`
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn rms(samples: &[i16]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }

    let sum_squares: f32 = samples
        .iter()
        .map(|&s| {
            let normalized = f32::from(s) / f32::from(i16::MAX);
            normalized * normalized
        })
        .sum();
    (sum_squares / samples.len() as f32).sqrt()
}

/// Wrap raw PCM bytes in a WAV container
///
/// # Errors
///
/// Returns error if the WAV writer fails
pub fn pcm_to_wav(pcm: &[u8], sample_rate: u32) -> Result<Vec<u8>> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer =
            hound::WavWriter::new(&mut cursor, spec).map_err(|e| Error::Audio(e.to_string()))?;

        for sample in bytes_to_samples(pcm) {
            writer
                .write_sample(sample)
                .map_err(|e| Error::Audio(e.to_string()))?;
        }

        writer.finalize().map_err(|e| Error::Audio(e.to_string()))?;
    }

    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_byte_roundtrip() {
        let samples = vec![0i16, -32768, 32767, 1000, -1000];
        let bytes = samples_to_bytes(&samples);
        assert_eq!(bytes.len(), samples.len() * 2);
        assert_eq!(bytes_to_samples(&bytes), samples);
    }

    #[test]
    fn odd_trailing_byte_ignored() {
        assert_eq!(bytes_to_samples(&[0x01, 0x00, 0xff]), vec![1]);
    }

    #[test]
    fn rms_of_silence_is_zero() {
        assert!(rms(&vec![0i16; 160]) < 0.001);
        assert!(rms(&[]) < f32::EPSILON);
    }

    #[test]
    fn rms_of_loud_signal_is_high() {
        let loud: Vec<i16> = vec![i16::MAX / 2; 160];
        assert!(rms(&loud) > 0.4);
    }

    #[test]
    fn wav_has_riff_header() {
        let samples: Vec<i16> = (0..160).map(|i| (i * 100) as i16).collect();
        let wav = pcm_to_wav(&samples_to_bytes(&samples), SAMPLE_RATE).unwrap();
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(&wav[8..12], b"WAVE");
        assert!(wav.len() > 44);
    }
}
