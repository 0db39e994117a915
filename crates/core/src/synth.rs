//! Synthetic test recordings: tone sequences whose pitch spread and loudness
//! loosely follow emotional prosody.

use crate::emotion::Emotion;
use rand::Rng;
use std::io::{Cursor, Seek, Write};
use std::path::Path;

const LOG_TARGET: &str = "synth";

pub const SYNTH_SAMPLE_RATE_HZ: u32 = 16_000;
const TONE_SECS: f64 = 0.1;
const NOISE_STD: f64 = 0.01;
const PEAK: f32 = 0.9;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EmotionProfile {
    pub base_freq: f64,
    pub freq_variation: f64,
    pub amplitude: f64,
}

impl EmotionProfile {
    /// Emotions without a profile of their own sound neutral.
    pub fn for_emotion(emotion: Emotion) -> Self {
        let (base_freq, freq_variation, amplitude) = match emotion {
            Emotion::Happy => (300.0, 50.0, 0.4),
            Emotion::Sad => (150.0, 10.0, 0.2),
            Emotion::Angry => (350.0, 80.0, 0.5),
            Emotion::Fearful => (280.0, 100.0, 0.35),
            _ => (200.0, 20.0, 0.3),
        };
        Self {
            base_freq,
            freq_variation,
            amplitude,
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum SynthError {
    #[error("wav encoding failed: {0}")]
    Wav(#[from] hound::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Sine burst over `0..=duration` with `duration * sample_rate` points.
fn tone(freq: f64, duration: f64, sample_rate: u32, amplitude: f64) -> Vec<f64> {
    let n = (f64::from(sample_rate) * duration) as usize;
    let step = if n > 1 { duration / (n - 1) as f64 } else { 0.0 };
    (0..n)
        .map(|i| amplitude * (2.0 * std::f64::consts::PI * freq * i as f64 * step).sin())
        .collect()
}

fn gaussian<R: Rng>(rng: &mut R, std_dev: f64) -> f64 {
    // Box-Muller; u1 is kept away from 0.
    let u1 = 1.0 - rng.random::<f64>();
    let u2 = rng.random::<f64>();
    std_dev * (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}

/// `duration` seconds of jittered 100 ms tones plus light noise, scaled to a
/// 0.9 peak.
pub fn generate_emotion<R: Rng>(
    rng: &mut R,
    emotion: Emotion,
    duration: f64,
    sample_rate: u32,
) -> Vec<f32> {
    let profile = EmotionProfile::for_emotion(emotion);
    let tones = (duration / TONE_SECS).round().max(0.0) as usize;

    let mut audio = Vec::with_capacity(tones * (f64::from(sample_rate) * TONE_SECS) as usize);
    for _ in 0..tones {
        let freq = profile.base_freq
            + rng.random_range(-profile.freq_variation..=profile.freq_variation);
        for s in tone(freq, TONE_SECS, sample_rate, profile.amplitude) {
            audio.push(s + gaussian(rng, NOISE_STD));
        }
    }

    let peak = audio.iter().fold(0.0f64, |m, s| m.max(s.abs()));
    if peak <= 0.0 {
        return audio.into_iter().map(|s| s as f32).collect();
    }
    audio
        .into_iter()
        .map(|s| (s / peak) as f32 * PEAK)
        .collect()
}

/// Concatenation of independently normalized segments.
pub fn generate_sequence<R: Rng>(
    rng: &mut R,
    segments: &[(Emotion, f64)],
    sample_rate: u32,
) -> Vec<f32> {
    segments
        .iter()
        .flat_map(|&(emotion, duration)| generate_emotion(rng, emotion, duration, sample_rate))
        .collect()
}

fn write_pcm16<W: Write + Seek>(
    writer: W,
    samples: &[f32],
    sample_rate: u32,
) -> Result<(), SynthError> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut wav = hound::WavWriter::new(writer, spec)?;
    for &s in samples {
        let v = (s.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16;
        wav.write_sample(v)?;
    }
    wav.finalize()?;
    Ok(())
}

/// 16-bit mono PCM WAV in memory.
pub fn encode_wav(samples: &[f32], sample_rate: u32) -> Result<Vec<u8>, SynthError> {
    let mut buf = Vec::new();
    write_pcm16(Cursor::new(&mut buf), samples, sample_rate)?;
    Ok(buf)
}

pub fn write_wav(path: &Path, samples: &[f32], sample_rate: u32) -> Result<(), SynthError> {
    let file = std::io::BufWriter::new(std::fs::File::create(path)?);
    write_pcm16(file, samples, sample_rate)?;
    tracing::debug!(target: LOG_TARGET, path = %path.display(), samples = samples.len(), "wrote wav");
    Ok(())
}

/// A named recording in the standard sample set.
#[derive(Clone, Debug, PartialEq)]
pub struct SampleSpec {
    pub file_name: String,
    pub segments: Vec<(Emotion, f64)>,
}

/// Single-emotion recordings, a mixed sequence and a conversation.
pub fn standard_samples() -> Vec<SampleSpec> {
    use Emotion::*;
    let mut specs: Vec<SampleSpec> = [Happy, Sad, Angry, Neutral, Fearful]
        .into_iter()
        .map(|e| SampleSpec {
            file_name: format!("sample_{e}.wav"),
            segments: vec![(e, 10.0)],
        })
        .collect();
    specs.push(SampleSpec {
        file_name: "sample_mixed_emotions.wav".to_owned(),
        segments: [Neutral, Happy, Angry, Sad, Fearful, Happy]
            .into_iter()
            .map(|e| (e, 3.0))
            .collect(),
    });
    specs.push(SampleSpec {
        file_name: "sample_conversation.wav".to_owned(),
        segments: [Neutral, Happy, Happy, Angry, Angry, Sad, Neutral]
            .into_iter()
            .map(|e| (e, 2.0))
            .collect(),
    });
    specs
}
