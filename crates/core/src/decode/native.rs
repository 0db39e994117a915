use crate::decode::{AudioDecoder, AudioSource, DecodeError, Result, Waveform, LOG_TARGET};
use futures::future::BoxFuture;
use futures::FutureExt;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::{MediaSource, MediaSourceStream};
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Pure-Rust decoder covering WAV, FLAC, OGG/Vorbis, MP3 and AAC in MP4.
#[derive(Clone, Copy, Debug, Default)]
pub struct SymphoniaDecoder;

impl SymphoniaDecoder {
    fn open(source: &AudioSource) -> Result<Box<dyn MediaSource>> {
        match source {
            AudioSource::Path(p) => std::fs::File::open(p)
                .map(|f| Box::new(f) as Box<dyn MediaSource>)
                .map_err(|e| DecodeError::Io(format!("{}: {e}", p.display()))),
            AudioSource::Memory { bytes, .. } => {
                Ok(Box::new(std::io::Cursor::new(bytes.clone())))
            }
        }
    }

    fn decode_blocking(source: AudioSource) -> Result<Waveform> {
        let media = Self::open(&source)?;
        let mss = MediaSourceStream::new(media, Default::default());

        let mut hint = Hint::new();
        if let Some(ext) = source.extension_hint() {
            hint.with_extension(&ext);
        }

        let probed = symphonia::default::get_probe()
            .format(
                &hint,
                mss,
                &FormatOptions::default(),
                &MetadataOptions::default(),
            )
            .map_err(unsupported)?;
        let mut format = probed.format;

        let track = format
            .tracks()
            .iter()
            .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
            .ok_or_else(|| DecodeError::UnsupportedFormat("no audio track".to_owned()))?;
        let track_id = track.id;
        let mut sample_rate = track.codec_params.sample_rate;
        let mut channels = track.codec_params.channels.map(|c| c.count());

        let mut decoder = symphonia::default::get_codecs()
            .make(&track.codec_params, &DecoderOptions::default())
            .map_err(unsupported)?;

        let mut samples: Vec<f32> = Vec::new();
        loop {
            let packet = match format.next_packet() {
                Ok(p) => p,
                Err(SymphoniaError::IoError(e))
                    if e.kind() == std::io::ErrorKind::UnexpectedEof =>
                {
                    break
                }
                Err(SymphoniaError::ResetRequired) => break,
                Err(e) => return Err(unsupported(e)),
            };
            if packet.track_id() != track_id {
                continue;
            }

            match decoder.decode(&packet) {
                Ok(decoded) => {
                    let spec = *decoded.spec();
                    sample_rate = Some(spec.rate);
                    channels = Some(spec.channels.count());
                    let mut buf = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
                Err(SymphoniaError::DecodeError(e)) => {
                    tracing::warn!(target: LOG_TARGET, error = %e, "skipping corrupt packet");
                }
                Err(e) => return Err(unsupported(e)),
            }
        }

        let sample_rate = sample_rate
            .filter(|&r| r > 0)
            .ok_or_else(|| DecodeError::UnsupportedFormat("unknown sample rate".to_owned()))?;
        let channels = channels
            .and_then(|c| u16::try_from(c).ok())
            .filter(|&c| c > 0)
            .ok_or_else(|| DecodeError::UnsupportedFormat("unknown channel layout".to_owned()))?;

        Ok(Waveform {
            sample_rate,
            channels,
            samples,
        })
    }
}

fn unsupported(e: SymphoniaError) -> DecodeError {
    DecodeError::UnsupportedFormat(e.to_string())
}

impl AudioDecoder for SymphoniaDecoder {
    fn name(&self) -> &'static str {
        "symphonia"
    }

    fn decode(&self, source: AudioSource) -> BoxFuture<'_, Result<Waveform>> {
        async move {
            tokio::task::spawn_blocking(move || Self::decode_blocking(source))
                .await
                .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn wav_bytes(sample_rate: u32, channels: u16, frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut out = Vec::new();
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut out), spec).expect("writer");
            for i in 0..frames {
                for ch in 0..channels {
                    let v = if ch == 0 { 8_192i16 } else { -8_192i16 };
                    writer.write_sample(if i % 2 == 0 { v } else { 0 }).expect("sample");
                }
            }
            writer.finalize().expect("finalize");
        }
        out
    }

    #[tokio::test]
    async fn decodes_in_memory_wav() {
        let src = AudioSource::from_bytes(wav_bytes(22_050, 2, 2_205), Some("wav"));
        let w = SymphoniaDecoder.decode(src).await.expect("decodes");
        assert_eq!(w.sample_rate, 22_050);
        assert_eq!(w.channels, 2);
        assert_eq!(w.frames(), 2_205);
        assert!((w.samples[0] - 0.25).abs() < 1e-3);
        assert!((w.samples[1] + 0.25).abs() < 1e-3);
    }

    #[tokio::test]
    async fn garbage_is_unsupported() {
        let src = AudioSource::from_bytes(vec![0x42u8; 512], None);
        let err = SymphoniaDecoder.decode(src).await.unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFormat(_)));
    }

    #[tokio::test]
    async fn missing_file_is_io_error() {
        let src = AudioSource::from_path("/definitely/not/here.wav");
        let err = SymphoniaDecoder.decode(src).await.unwrap_err();
        assert!(matches!(err, DecodeError::Io(_)));
    }
}
