//! Offline sample-rate conversion for whole buffers.
//!
//! Uses rubato's sinc interpolator, which band-limits the signal before
//! interpolating. The resampler's group delay is trimmed from the front and
//! the output is cut (or zero-extended) to exactly `round(n * dst / src)`
//! samples so the signal duration is preserved to within one sample.

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::segment::SegmentError;

const BLOCK_FRAMES: usize = 1024;

fn interpolation_parameters() -> SincInterpolationParameters {
    SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    }
}

/// Number of output samples for `input_len` samples converted `from` -> `to` Hz.
pub fn resampled_len(input_len: usize, from_hz: u32, to_hz: u32) -> usize {
    if from_hz == 0 {
        return 0;
    }
    (input_len as f64 * f64::from(to_hz) / f64::from(from_hz)).round() as usize
}

/// Resamples a mono buffer. Identity when the rates match.
pub fn resample(samples: &[f32], from_hz: u32, to_hz: u32) -> Result<Vec<f32>, SegmentError> {
    if from_hz == 0 || to_hz == 0 {
        return Err(SegmentError::Resample(format!(
            "invalid rates {from_hz} -> {to_hz}"
        )));
    }
    if from_hz == to_hz || samples.is_empty() {
        return Ok(samples.to_vec());
    }

    let ratio = f64::from(to_hz) / f64::from(from_hz);
    let mut resampler =
        SincFixedIn::<f32>::new(ratio, 1.0, interpolation_parameters(), BLOCK_FRAMES, 1)
            .map_err(|e| SegmentError::Resample(e.to_string()))?;

    let expected = resampled_len(samples.len(), from_hz, to_hz);
    let delay = resampler.output_delay();
    let mut out: Vec<f32> = Vec::with_capacity(expected + delay + BLOCK_FRAMES);

    let mut pos = 0usize;
    while samples.len() - pos >= resampler.input_frames_next() {
        let n = resampler.input_frames_next();
        let block = resampler
            .process(&[&samples[pos..pos + n]][..], None)
            .map_err(|e| SegmentError::Resample(e.to_string()))?;
        out.extend_from_slice(&block[0]);
        pos += n;
    }
    if pos < samples.len() {
        let block = resampler
            .process_partial(Some(&[&samples[pos..]][..]), None)
            .map_err(|e| SegmentError::Resample(e.to_string()))?;
        out.extend_from_slice(&block[0]);
    }
    // Flush the interpolator's tail until the delayed signal is complete.
    while out.len() < expected + delay {
        let block = resampler
            .process_partial::<&[f32]>(None, None)
            .map_err(|e| SegmentError::Resample(e.to_string()))?;
        if block[0].is_empty() {
            break;
        }
        out.extend_from_slice(&block[0]);
    }

    let mut out: Vec<f32> = out.into_iter().skip(delay).take(expected).collect();
    out.resize(expected, 0.0);
    Ok(out)
}
