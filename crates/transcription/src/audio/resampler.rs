use audioadapter_buffers::direct::InterleavedSlice;
use rubato::{
    Async as AsyncResampler, FixedAsync, Resampler as RubatoResampler,
    SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::audio::SAMPLE_RATE;
use crate::errors::AudioFormatError;

/// Persistent sinc resampler for the streaming codec path.
///
/// The filter state is carried across calls; input of arbitrary length is
/// staged in `pending` and processed in fixed-size chunks, the remainder
/// waiting for the next packet.
pub struct StreamResampler {
    inner: AsyncResampler<f32>,
    chunk_size: usize,
    pending: Vec<f32>,
}

impl StreamResampler {
    pub fn new(input_rate: u32) -> Result<Self, AudioFormatError> {
        let ratio = SAMPLE_RATE as f64 / input_rate as f64;
        let chunk_size = 960;

        let params = SincInterpolationParameters {
            sinc_len: 256,
            f_cutoff: 0.95,
            interpolation: SincInterpolationType::Linear,
            oversampling_factor: 256,
            window: WindowFunction::BlackmanHarris2,
        };

        let inner = AsyncResampler::<f32>::new_sinc(
            ratio,
            2.0,
            &params,
            chunk_size,
            1, // mono
            FixedAsync::Input,
        )
        .map_err(|e| AudioFormatError::DecoderInit(format!("resampler: {e}")))?;

        Ok(Self {
            inner,
            chunk_size,
            pending: Vec::new(),
        })
    }

    /// Feeds mono input samples, returning whatever full chunks produced.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>, AudioFormatError> {
        self.pending.extend_from_slice(input);

        let mut output = Vec::new();
        while self.pending.len() >= self.chunk_size {
            let block: Vec<f32> = self.pending.drain(..self.chunk_size).collect();
            let adapter = InterleavedSlice::new(&block, 1, self.chunk_size)
                .map_err(|e| AudioFormatError::Resample(format!("input adapter: {e}")))?;
            let result = self
                .inner
                .process(&adapter, 0, None)
                .map_err(|e| AudioFormatError::Resample(e.to_string()))?;
            output.extend(result.take_data());
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn downsamples_48k_by_three() {
        let mut resampler = StreamResampler::new(48_000).unwrap();
        // 10 full chunks of a 440 Hz tone.
        let input: Vec<f32> = (0..9600)
            .map(|i| (i as f32 * 440.0 * std::f32::consts::TAU / 48_000.0).sin())
            .collect();
        let output = resampler.process(&input).unwrap();
        // 9600 input samples at 1/3 ratio; allow for filter startup slack.
        assert!(
            (output.len() as i64 - 3200).abs() <= 64,
            "unexpected output length {}",
            output.len()
        );
    }

    #[test]
    fn short_input_stays_pending() {
        let mut resampler = StreamResampler::new(48_000).unwrap();
        let output = resampler.process(&[0.0f32; 100]).unwrap();
        assert!(output.is_empty());
        // Completing the chunk releases it.
        let output = resampler.process(&[0.0f32; 860]).unwrap();
        assert!(!output.is_empty());
    }
}
