mod resample;

use crate::config::{ChunkDuration, SampleRate};
use crate::decode::Waveform;
use crate::util::round_to;
use serde::{Deserialize, Serialize};

pub use resample::{resample, resampled_len};

/// One fixed-length analysis window.
///
/// `samples` always holds exactly one window of audio; a short tail is padded
/// with silence. `start_time`/`end_time` describe the real audio covered, so
/// the last chunk may report less than the window length.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub index: usize,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub start_time: f64,
    pub end_time: f64,
    pub duration: f64,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SegmentError {
    #[error("audio contains no samples")]
    EmptyAudio,

    #[error("resampling failed: {0}")]
    Resample(String),
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Segmenter {
    target_sample_rate: SampleRate,
    chunk_duration: ChunkDuration,
}

impl Segmenter {
    pub fn new(target_sample_rate: SampleRate, chunk_duration: ChunkDuration) -> Self {
        Self {
            target_sample_rate,
            chunk_duration,
        }
    }

    pub fn target_sample_rate(&self) -> SampleRate {
        self.target_sample_rate
    }

    pub fn chunk_samples(&self) -> usize {
        self.chunk_duration.samples_at(self.target_sample_rate)
    }

    /// Downmixes, resamples and returns a lazy iterator over the windows.
    pub fn segment(&self, waveform: Waveform) -> Result<Chunks, SegmentError> {
        if waveform.sample_rate == 0 {
            return Err(SegmentError::Resample("source sample rate is 0".to_owned()));
        }
        let mono = waveform.to_mono();
        if mono.samples.is_empty() {
            return Err(SegmentError::EmptyAudio);
        }

        let target = self.target_sample_rate.hz();
        let samples = resample(&mono.samples, mono.sample_rate, target)?;
        if samples.is_empty() {
            return Err(SegmentError::EmptyAudio);
        }

        tracing::debug!(
            source_rate = mono.sample_rate,
            target_rate = target,
            samples = samples.len(),
            "resampled audio"
        );

        Ok(Chunks {
            samples,
            sample_rate: target,
            chunk_samples: self.chunk_samples(),
            position: 0,
            index: 0,
        })
    }
}

/// Iterator over the windows of one resampled signal.
#[derive(Clone, Debug)]
pub struct Chunks {
    samples: Vec<f32>,
    sample_rate: u32,
    chunk_samples: usize,
    position: usize,
    index: usize,
}

impl Chunks {
    pub fn total_duration(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

impl Iterator for Chunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let total = self.samples.len();
        if self.position >= total {
            return None;
        }
        let start = self.position;
        let end = (start + self.chunk_samples).min(total);

        let mut audio = Vec::with_capacity(self.chunk_samples);
        audio.extend_from_slice(&self.samples[start..end]);
        audio.resize(self.chunk_samples, 0.0);

        let rate = f64::from(self.sample_rate);
        let start_time = round_to(start as f64 / rate, 2);
        let end_time = round_to(end as f64 / rate, 2);
        let chunk = Chunk {
            index: self.index,
            samples: audio,
            sample_rate: self.sample_rate,
            start_time,
            end_time,
            duration: round_to(end_time - start_time, 2),
        };

        self.position = end;
        self.index += 1;
        Some(chunk)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.samples.len().saturating_sub(self.position);
        let n = remaining.div_ceil(self.chunk_samples);
        (n, Some(n))
    }
}

impl ExactSizeIterator for Chunks {}

/// Eager form of [`Segmenter::segment`].
pub fn segment(
    waveform: Waveform,
    target_sample_rate: SampleRate,
    chunk_duration: ChunkDuration,
) -> Result<Vec<Chunk>, SegmentError> {
    Ok(Segmenter::new(target_sample_rate, chunk_duration)
        .segment(waveform)?
        .collect())
}
