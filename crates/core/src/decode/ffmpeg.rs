use crate::decode::{AudioDecoder, AudioSource, DecodeError, Result, Waveform, LOG_TARGET};
use ffmpeg_sidecar::{download, paths::ffmpeg_path};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;

/// Last-resort decoder for containers symphonia cannot open. ffmpeg mixes to
/// mono and resamples, so output is always f32 mono at `output_sample_rate`.
#[derive(Clone, Debug)]
pub struct FfmpegAudioDecoder {
    output_sample_rate: u32,
}

impl FfmpegAudioDecoder {
    pub fn new(output_sample_rate: u32) -> Self {
        Self { output_sample_rate }
    }

    fn parse_f32le(raw: &[u8]) -> Result<Vec<f32>> {
        if raw.len() % 4 != 0 {
            return Err(DecodeError::InvalidPcm(format!(
                "f32le byte length must be multiple of 4, got {}",
                raw.len()
            )));
        }
        Ok(raw
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect())
    }

    fn command(&self, input: &str) -> tokio::process::Command {
        let rate = self.output_sample_rate.to_string();
        let mut cmd = tokio::process::Command::new(ffmpeg_path());
        cmd.args(["-hide_banner", "-nostdin", "-loglevel", "error", "-i", input])
            .args(["-vn", "-ac", "1", "-ar", rate.as_str()])
            .args(["-f", "f32le", "-acodec", "pcm_f32le", "pipe:1"])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    async fn run(&self, source: AudioSource) -> Result<Vec<f32>> {
        let output = match source {
            AudioSource::Path(path) => {
                let input = path.to_string_lossy().into_owned();
                self.command(&input)
                    .stdin(Stdio::null())
                    .output()
                    .await
                    .map_err(|e| DecodeError::FfmpegUnavailable(e.to_string()))?
            }
            AudioSource::Memory { bytes, .. } => {
                let mut child = self
                    .command("pipe:0")
                    .stdin(Stdio::piped())
                    .spawn()
                    .map_err(|e| DecodeError::FfmpegUnavailable(e.to_string()))?;
                let mut stdin = child.stdin.take().ok_or_else(|| {
                    DecodeError::FfmpegUnavailable("ffmpeg stdin was not piped".to_owned())
                })?;
                // A broken pipe here means ffmpeg gave up early; the exit
                // status carries the reason.
                let writer = tokio::spawn(async move {
                    let _ = stdin.write_all(&bytes).await;
                    let _ = stdin.shutdown().await;
                });
                let output = child
                    .wait_with_output()
                    .await
                    .map_err(|e| DecodeError::UnsupportedFormat(e.to_string()))?;
                let _ = writer.await;
                output
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();
            return Err(DecodeError::UnsupportedFormat(format!(
                "ffmpeg exited with {:?}: {stderr}",
                output.status.code()
            )));
        }
        Self::parse_f32le(&output.stdout)
    }
}

impl AudioDecoder for FfmpegAudioDecoder {
    fn name(&self) -> &'static str {
        "ffmpeg"
    }

    fn decode(&self, source: AudioSource) -> BoxFuture<'_, Result<Waveform>> {
        async move {
            if let AudioSource::Path(p) = &source {
                if !p.exists() {
                    return Err(DecodeError::Io(format!("{}: not found", p.display())));
                }
            }
            tokio::task::spawn_blocking(download::auto_download)
                .await
                .map_err(|e| DecodeError::FfmpegUnavailable(e.to_string()))?
                .map_err(|e| DecodeError::FfmpegUnavailable(e.to_string()))?;
            tracing::debug!(target: LOG_TARGET, rate = self.output_sample_rate, "decoding with ffmpeg");
            let samples = self.run(source).await?;
            Ok(Waveform::mono(self.output_sample_rate, samples))
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcm_length_must_be_whole_floats() {
        let err = FfmpegAudioDecoder::parse_f32le(&[0, 1, 2]).unwrap_err();
        assert!(matches!(err, DecodeError::InvalidPcm(_)));
    }

    #[test]
    fn pcm_is_little_endian_f32() {
        let raw: Vec<u8> = [0.0f32, -0.5, 1.0]
            .iter()
            .flat_map(|f| f.to_le_bytes())
            .collect();
        assert_eq!(
            FfmpegAudioDecoder::parse_f32le(&raw).unwrap(),
            vec![0.0, -0.5, 1.0]
        );
    }

    #[test]
    fn command_targets_requested_rate() {
        let cmd = FfmpegAudioDecoder::new(22_050).command("pipe:0");
        let args: Vec<String> = cmd
            .as_std()
            .get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        let at = args.iter().position(|a| a == "-ar").expect("-ar present");
        assert_eq!(args[at + 1], "22050");
    }
}
