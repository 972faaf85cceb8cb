pub mod convert;
pub mod opus;
pub mod resampler;
pub mod vad;
pub mod webm;

pub use convert::{AudioConverter, AudioFormat, ConverterStats};
pub use vad::{EnergyVad, SpeechSegment, VadPolicy, VadSegmenter};

use tracing::debug;

use crate::errors::AudioFormatError;

/// Target sample rate after normalization.
pub const SAMPLE_RATE: u32 = 16_000;
/// Frame duration fed to the VAD.
pub const FRAME_DURATION_MS: usize = 30;
/// One 30 ms frame of 16 kHz mono s16le audio.
pub const FRAME_BYTES: usize =
    (SAMPLE_RATE as usize / 1000) * FRAME_DURATION_MS * 2;
/// Samples per frame.
pub const FRAME_SAMPLES: usize = FRAME_BYTES / 2;

/// Interprets little-endian 16-bit PCM bytes as samples. A trailing odd
/// byte is the caller's responsibility.
pub fn bytes_to_i16(bytes: &[u8]) -> Vec<i16> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect()
}

pub fn i16_to_bytes(samples: &[i16]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(samples.len() * 2);
    for sample in samples {
        bytes.extend_from_slice(&sample.to_le_bytes());
    }
    bytes
}

pub fn i16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|s| *s as f32 / 32_768.0).collect()
}

pub fn f32_to_i16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|s| (s.clamp(-1.0, 1.0) * 32_767.0) as i16)
        .collect()
}

/// Averages interleaved channels down to mono.
pub fn downmix_to_mono(samples: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return samples.to_vec();
    }
    samples
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Streaming linear-interpolation resampler for the raw PCM path.
///
/// Keeps the fractional read position and the last input sample across
/// calls so packet boundaries do not produce seams.
pub struct LinearResampler {
    step: f64,
    pos: f64,
    last: Option<f32>,
}

impl LinearResampler {
    pub fn new(input_rate: u32, output_rate: u32) -> Self {
        Self {
            step: input_rate as f64 / output_rate as f64,
            pos: 0.0,
            last: None,
        }
    }

    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        if input.is_empty() {
            return Vec::new();
        }

        let mut window = Vec::with_capacity(input.len() + 1);
        if let Some(last) = self.last {
            window.push(last);
        }
        window.extend_from_slice(input);

        let mut output = Vec::with_capacity((input.len() as f64 / self.step) as usize + 1);
        let mut pos = self.pos;
        while pos + 1.0 < window.len() as f64 {
            let index = pos as usize;
            let frac = pos - index as f64;
            let sample =
                window[index] as f64 * (1.0 - frac) + window[index + 1] as f64 * frac;
            output.push(sample as f32);
            pos += self.step;
        }

        // Keep the final sample as the left edge of the next window.
        let consumed = window.len() - 1;
        self.last = Some(window[consumed]);
        self.pos = pos - consumed as f64;
        output
    }
}

/// Decoded interleaved samples plus their source layout.
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: usize,
}

/// Decodes a complete in-memory file (mp3/aac/wav/...) to interleaved f32.
/// Used by the whole-file converter path on flush.
pub fn decode_whole_file(
    data: Vec<u8>,
    extension: Option<&str>,
) -> Result<DecodedAudio, AudioFormatError> {
    use symphonia::core::audio::SampleBuffer;
    use symphonia::core::codecs::DecoderOptions;
    use symphonia::core::errors::Error as SymphoniaError;
    use symphonia::core::formats::FormatOptions;
    use symphonia::core::io::MediaSourceStream;
    use symphonia::core::meta::MetadataOptions;
    use symphonia::core::probe::Hint;

    let mss = MediaSourceStream::new(Box::new(std::io::Cursor::new(data)), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = extension {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AudioFormatError::Decode(format!("probe failed: {e}")))?;
    let mut format = probed.format;

    let track = format
        .default_track()
        .ok_or_else(|| AudioFormatError::Decode("no default audio track".to_string()))?
        .clone();
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AudioFormatError::DecoderInit(e.to_string()))?;

    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(SAMPLE_RATE);
    let mut channels = track
        .codec_params
        .channels
        .map(|c| c.count())
        .unwrap_or(1);
    let mut samples = Vec::new();
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            // End of stream surfaces as an I/O error from the reader.
            Err(SymphoniaError::IoError(_)) | Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(AudioFormatError::Decode(e.to_string())),
        };
        if packet.track_id() != track.id {
            continue;
        }

        match decoder.decode(&packet) {
            Ok(decoded) => {
                if sample_buf.is_none() {
                    let spec = *decoded.spec();
                    sample_rate = spec.rate;
                    channels = spec.channels.count();
                    sample_buf = Some(SampleBuffer::new(decoded.capacity() as u64, spec));
                }
                if let Some(buf) = &mut sample_buf {
                    buf.copy_interleaved_ref(decoded);
                    samples.extend_from_slice(buf.samples());
                }
            }
            Err(SymphoniaError::DecodeError(e)) => {
                debug!(error = %e, "recoverable decode error, skipping packet");
            }
            Err(e) => return Err(AudioFormatError::Decode(e.to_string())),
        }
    }

    Ok(DecodedAudio {
        samples,
        sample_rate,
        channels,
    })
}
