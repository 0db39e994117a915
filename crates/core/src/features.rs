//! Hand-engineered acoustic descriptors for the rule-based classifier.
//!
//! Frame layout follows librosa's defaults so the thresholds in
//! [`crate::emotion::RuleBasedClassifier`] see the values they were tuned on:
//! 2048-sample frames, hop 512, centred frames.

use rustfft::num_complex::Complex;
use rustfft::FftPlanner;
use serde::{Deserialize, Serialize};

const LOG_TARGET: &str = "features";

pub const FRAME_LENGTH: usize = 2048;
pub const HOP_LENGTH: usize = 512;
const ZERO_THRESHOLD: f64 = 1e-10;
const PITCH_FMIN_HZ: f64 = 150.0;
const PITCH_FMAX_HZ: f64 = 4000.0;
const PEAK_THRESHOLD: f64 = 0.1;

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct FeatureVector {
    pub energy: f64,
    pub zero_crossing_rate: f64,
    pub pitch_mean: f64,
    pub pitch_std: f64,
}

impl FeatureVector {
    pub const ZERO: Self = Self {
        energy: 0.0,
        zero_crossing_rate: 0.0,
        pitch_mean: 0.0,
        pitch_std: 0.0,
    };

    fn is_finite(&self) -> bool {
        self.energy.is_finite()
            && self.zero_crossing_rate.is_finite()
            && self.pitch_mean.is_finite()
            && self.pitch_std.is_finite()
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
enum FeatureError {
    #[error("numerically degenerate input: {0}")]
    NumericDegenerate(&'static str),
}

/// Computes a [`FeatureVector`] for one chunk. Never fails: degenerate input
/// yields [`FeatureVector::ZERO`].
pub fn extract(samples: &[f32], sample_rate: u32) -> FeatureVector {
    match try_extract(samples, sample_rate) {
        Ok(v) => v,
        Err(e) => {
            tracing::debug!(target: LOG_TARGET, error = %e, "using zero feature vector");
            FeatureVector::ZERO
        }
    }
}

fn try_extract(samples: &[f32], sample_rate: u32) -> Result<FeatureVector, FeatureError> {
    if samples.is_empty() {
        return Err(FeatureError::NumericDegenerate("empty chunk"));
    }
    if sample_rate == 0 {
        return Err(FeatureError::NumericDegenerate("zero sample rate"));
    }

    let y: Vec<f64> = samples.iter().map(|&s| f64::from(s)).collect();
    let (pitch_mean, pitch_std) = pitch_stats(&y, sample_rate);
    let v = FeatureVector {
        energy: energy(&y),
        zero_crossing_rate: zero_crossing_rate(&y),
        pitch_mean,
        pitch_std,
    };
    if !v.is_finite() {
        return Err(FeatureError::NumericDegenerate("non-finite feature"));
    }
    Ok(v)
}

/// Mean squared amplitude.
fn energy(y: &[f64]) -> f64 {
    y.iter().map(|s| s * s).sum::<f64>() / y.len() as f64
}

fn zero_crossing_rate(y: &[f64]) -> f64 {
    let pad = FRAME_LENGTH / 2;
    let first = y[0];
    let last = y[y.len() - 1];
    let mut padded = Vec::with_capacity(y.len() + 2 * pad);
    padded.resize(pad, first);
    padded.extend_from_slice(y);
    padded.resize(padded.len() + pad, last);

    // Near-zero samples count as non-negative.
    let negative: Vec<bool> = padded.iter().map(|&s| s < -ZERO_THRESHOLD).collect();

    let n_frames = frame_count(padded.len());
    if n_frames == 0 {
        return 0.0;
    }
    let total: f64 = (0..n_frames)
        .map(|t| {
            let frame = &negative[t * HOP_LENGTH..t * HOP_LENGTH + FRAME_LENGTH];
            let crossings = frame.windows(2).filter(|w| w[0] != w[1]).count();
            crossings as f64 / FRAME_LENGTH as f64
        })
        .sum();
    total / n_frames as f64
}

fn frame_count(len: usize) -> usize {
    if len < FRAME_LENGTH {
        0
    } else {
        1 + (len - FRAME_LENGTH) / HOP_LENGTH
    }
}

/// Periodic Hann window.
fn hann(n: usize) -> Vec<f64> {
    (0..n)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f64::consts::PI * i as f64 / n as f64).cos())
        .collect()
}

/// Magnitude spectrogram, one `Vec` of `n_fft / 2 + 1` bins per frame.
fn magnitude_frames(y: &[f64]) -> Vec<Vec<f64>> {
    let pad = FRAME_LENGTH / 2;
    let mut padded = vec![0.0; pad];
    padded.extend_from_slice(y);
    padded.resize(padded.len() + pad, 0.0);

    let window = hann(FRAME_LENGTH);
    let fft = FftPlanner::<f64>::new().plan_fft_forward(FRAME_LENGTH);
    let bins = FRAME_LENGTH / 2 + 1;

    let mut buffer = vec![Complex::new(0.0, 0.0); FRAME_LENGTH];
    (0..frame_count(padded.len()))
        .map(|t| {
            let frame = &padded[t * HOP_LENGTH..t * HOP_LENGTH + FRAME_LENGTH];
            for (slot, (&s, &w)) in buffer.iter_mut().zip(frame.iter().zip(window.iter())) {
                *slot = Complex::new(s * w, 0.0);
            }
            fft.process(&mut buffer);
            buffer[..bins].iter().map(|c| c.norm()).collect()
        })
        .collect()
}

/// Strongest interpolated spectral peak of one frame, in Hz; 0 when unvoiced.
fn frame_pitch(s: &[f64], sample_rate: u32) -> f64 {
    let n = s.len();
    if n < 3 {
        return 0.0;
    }
    let sr = f64::from(sample_rate);
    let fmax = PITCH_FMAX_HZ.min(sr / 2.0);
    let max_mag = s.iter().copied().fold(0.0f64, f64::max);
    let ref_value = PEAK_THRESHOLD * max_mag;
    let gated = |i: usize| if s[i] > ref_value { s[i] } else { 0.0 };

    let mut best_mag = 0.0f64;
    let mut best_pitch = 0.0f64;
    // Bin 0 and the Nyquist bin carry no interpolation shift.
    for i in 1..n {
        let freq = i as f64 * sr / FRAME_LENGTH as f64;
        if freq < PITCH_FMIN_HZ || freq >= fmax {
            continue;
        }
        let here = gated(i);
        let prev = gated(i - 1);
        let next = if i + 1 < n { gated(i + 1) } else { here };
        if !(here > prev && here >= next) {
            continue;
        }

        let (shift, avg) = if i + 1 < n {
            let avg = 0.5 * (s[i + 1] - s[i - 1]);
            let curvature = 2.0 * s[i] - s[i + 1] - s[i - 1];
            let denom = if curvature.abs() < f64::MIN_POSITIVE {
                curvature + 1.0
            } else {
                curvature
            };
            (avg / denom, avg)
        } else {
            (0.0, 0.0)
        };
        let mag = s[i] + 0.5 * avg * shift;
        if mag > best_mag {
            best_mag = mag;
            best_pitch = (i as f64 + shift) * sr / FRAME_LENGTH as f64;
        }
    }
    best_pitch
}

/// Mean and population standard deviation of voiced-frame pitch.
fn pitch_stats(y: &[f64], sample_rate: u32) -> (f64, f64) {
    let pitches: Vec<f64> = magnitude_frames(y)
        .iter()
        .map(|frame| frame_pitch(frame, sample_rate))
        .filter(|&p| p > 0.0)
        .collect();
    if pitches.is_empty() {
        return (0.0, 0.0);
    }
    let n = pitches.len() as f64;
    let mean = pitches.iter().sum::<f64>() / n;
    let var = pitches.iter().map(|p| (p - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}
