#[cfg(feature = "ffmpeg-sidecar")]
mod ffmpeg;
mod native;

use bytes::Bytes;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;

#[cfg(feature = "ffmpeg-sidecar")]
pub use ffmpeg::FfmpegAudioDecoder;
pub use native::SymphoniaDecoder;

const LOG_TARGET: &str = "decode";

/// Decoded PCM, interleaved when `channels > 1`.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Waveform {
    pub sample_rate: u32,
    pub channels: u16,
    pub samples: Vec<f32>,
}

impl Waveform {
    pub fn mono(sample_rate: u32, samples: Vec<f32>) -> Self {
        Self {
            sample_rate,
            channels: 1,
            samples,
        }
    }

    pub fn frames(&self) -> usize {
        if self.channels == 0 {
            return 0;
        }
        self.samples.len() / usize::from(self.channels)
    }

    pub fn is_empty(&self) -> bool {
        self.frames() == 0
    }

    /// Averages interleaved channels into a single channel. A trailing
    /// partial frame is dropped.
    pub fn to_mono(self) -> Self {
        if self.channels <= 1 {
            return Self::mono(self.sample_rate, self.samples);
        }
        let channels = usize::from(self.channels);
        let scale = 1.0f32 / channels as f32;
        let samples = self
            .samples
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() * scale)
            .collect();
        Self::mono(self.sample_rate, samples)
    }
}

/// Where the recording comes from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AudioSource {
    Path(PathBuf),
    Memory {
        bytes: Bytes,
        extension: Option<String>,
    },
}

impl AudioSource {
    pub fn from_path<P: Into<PathBuf>>(path: P) -> Self {
        Self::Path(path.into())
    }

    pub fn from_bytes<B: Into<Bytes>>(bytes: B, extension: Option<&str>) -> Self {
        Self::Memory {
            bytes: bytes.into(),
            extension: extension.map(|e| e.to_ascii_lowercase()),
        }
    }

    /// Lowercase file extension used as a container hint.
    pub fn extension_hint(&self) -> Option<String> {
        match self {
            Self::Path(p) => p
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| e.to_ascii_lowercase()),
            Self::Memory { extension, .. } => extension.clone(),
        }
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unsupported audio format: {0}")]
    UnsupportedFormat(String),

    #[error("decoded audio contains no samples")]
    EmptyAudio,

    #[error("failed to read audio: {0}")]
    Io(String),

    #[error("ffmpeg unavailable: {0}")]
    FfmpegUnavailable(String),

    #[error("invalid pcm output: {0}")]
    InvalidPcm(String),
}

pub type Result<T> = std::result::Result<T, DecodeError>;

pub trait AudioDecoder: Send + Sync {
    fn name(&self) -> &'static str;

    fn decode(&self, source: AudioSource) -> BoxFuture<'_, Result<Waveform>>;
}

/// Tries each decoder in order; the first success wins.
#[derive(Clone)]
pub struct DecoderChain {
    decoders: Vec<Arc<dyn AudioDecoder>>,
}

impl DecoderChain {
    pub fn new(decoders: Vec<Arc<dyn AudioDecoder>>) -> Self {
        Self { decoders }
    }

    /// Symphonia first, then ffmpeg resampling straight to `target_sample_rate`
    /// when the feature is enabled.
    pub fn with_defaults(target_sample_rate: u32) -> Self {
        let native: Arc<dyn AudioDecoder> = Arc::new(SymphoniaDecoder);
        #[cfg(feature = "ffmpeg-sidecar")]
        let decoders = {
            let ffmpeg: Arc<dyn AudioDecoder> =
                Arc::new(FfmpegAudioDecoder::new(target_sample_rate));
            vec![native, ffmpeg]
        };
        #[cfg(not(feature = "ffmpeg-sidecar"))]
        let decoders = {
            let _ = target_sample_rate;
            vec![native]
        };
        Self { decoders }
    }

    pub async fn decode(&self, source: AudioSource) -> Result<Waveform> {
        let mut failures = Vec::with_capacity(self.decoders.len());
        for decoder in &self.decoders {
            match decoder.decode(source.clone()).await {
                Ok(waveform) if waveform.is_empty() => return Err(DecodeError::EmptyAudio),
                Ok(waveform) => {
                    tracing::debug!(
                        target: LOG_TARGET,
                        decoder = decoder.name(),
                        sample_rate = waveform.sample_rate,
                        channels = waveform.channels,
                        frames = waveform.frames(),
                        "decoded audio"
                    );
                    return Ok(waveform);
                }
                // No later decoder can read what this one could not open.
                Err(DecodeError::Io(msg)) => {
                    return Err(DecodeError::UnsupportedFormat(format!("{}: {msg}", decoder.name())))
                }
                Err(e) => {
                    tracing::debug!(target: LOG_TARGET, decoder = decoder.name(), error = %e, "decoder rejected input");
                    failures.push(format!("{}: {e}", decoder.name()));
                }
            }
        }
        if failures.is_empty() {
            failures.push("no decoders configured".to_owned());
        }
        Err(DecodeError::UnsupportedFormat(failures.join("; ")))
    }
}
