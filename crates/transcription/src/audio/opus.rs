use audiopus::coder::Decoder;
use audiopus::{Channels, SampleRate};

use crate::errors::AudioFormatError;

/// Largest opus frame: 120 ms at 48 kHz, stereo.
const MAX_FRAME_SAMPLES: usize = 5760;

/// Persistent opus decoder context.
///
/// Holds libopus state across packet boundaries, so it must live for the
/// whole stream and never be shared between jobs.
pub struct OpusDecoder {
    inner: Decoder,
    pcm: Vec<i16>,
}

impl OpusDecoder {
    pub fn new() -> Result<Self, AudioFormatError> {
        let inner = Decoder::new(SampleRate::Hz48000, Channels::Stereo)
            .map_err(|e| AudioFormatError::DecoderInit(format!("opus: {e}")))?;
        Ok(Self {
            inner,
            pcm: vec![0i16; MAX_FRAME_SAMPLES * 2],
        })
    }

    /// Decodes one packet to mono f32 at 48 kHz.
    pub fn decode_to_mono(&mut self, packet: &[u8]) -> Result<Vec<f32>, AudioFormatError> {
        let samples_per_channel = self
            .inner
            .decode(Some(packet), &mut self.pcm, false)
            .map_err(|e| AudioFormatError::Decode(format!("opus: {e}")))?;

        let mono = self.pcm[..samples_per_channel * 2]
            .chunks_exact(2)
            .map(|frame| (frame[0] as f32 + frame[1] as f32) / 2.0 / 32_768.0)
            .collect();
        Ok(mono)
    }
}
