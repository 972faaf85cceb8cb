use tracing::{debug, info};

use crate::audio::opus::OpusDecoder;
use crate::audio::resampler::StreamResampler;
use crate::audio::webm::WebmOpusExtractor;
use crate::audio::{
    FRAME_BYTES, LinearResampler, SAMPLE_RATE, bytes_to_i16, decode_whole_file, downmix_to_mono,
    f32_to_i16, i16_to_bytes, i16_to_f32,
};
use crate::errors::AudioFormatError;

/// Declared input format of a stream or upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Pcm,
    PcmS16le,
    Raw,
    Opus,
    Webm,
    Mp3,
    Aac,
    M4a,
    Wav,
    Ogg,
}

impl AudioFormat {
    pub fn parse(tag: &str) -> Result<Self, AudioFormatError> {
        match tag.to_ascii_lowercase().as_str() {
            "pcm" => Ok(AudioFormat::Pcm),
            "pcm_s16le" => Ok(AudioFormat::PcmS16le),
            "raw" => Ok(AudioFormat::Raw),
            "opus" => Ok(AudioFormat::Opus),
            "webm" => Ok(AudioFormat::Webm),
            "mp3" => Ok(AudioFormat::Mp3),
            "aac" => Ok(AudioFormat::Aac),
            "m4a" => Ok(AudioFormat::M4a),
            "wav" => Ok(AudioFormat::Wav),
            "ogg" => Ok(AudioFormat::Ogg),
            other => Err(AudioFormatError::UnsupportedFormat(other.to_string())),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AudioFormat::Pcm => "pcm",
            AudioFormat::PcmS16le => "pcm_s16le",
            AudioFormat::Raw => "raw",
            AudioFormat::Opus => "opus",
            AudioFormat::Webm => "webm",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Aac => "aac",
            AudioFormat::M4a => "m4a",
            AudioFormat::Wav => "wav",
            AudioFormat::Ogg => "ogg",
        }
    }
}

/// Processing strategy, chosen once at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Strategy {
    /// Interpret bytes directly as interleaved s16le.
    RawPcm,
    /// Persistent decoder fed packet by packet.
    StreamingCodec,
    /// Buffer everything, decode on flush.
    WholeFile,
}

impl Strategy {
    fn for_format(format: AudioFormat) -> Self {
        match format {
            AudioFormat::Pcm | AudioFormat::PcmS16le | AudioFormat::Raw => Strategy::RawPcm,
            AudioFormat::Opus | AudioFormat::Webm => Strategy::StreamingCodec,
            _ => Strategy::WholeFile,
        }
    }

    fn as_str(&self) -> &'static str {
        match self {
            Strategy::RawPcm => "raw_pcm",
            Strategy::StreamingCodec => "streaming_codec",
            Strategy::WholeFile => "whole_file",
        }
    }
}

/// Cumulative converter counters, reported by the health surface and the
/// finalize log line.
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct ConverterStats {
    pub strategy: &'static str,
    pub total_received_bytes: u64,
    pub total_output_frames: u64,
    pub buffer_bytes: usize,
}

/// Normalizes a stream of raw input packets into 30 ms frames of 16 kHz
/// mono s16le PCM (exactly 960 bytes each).
///
/// Decoder and resampler state is scoped to one pipeline; instances are
/// never shared between jobs.
pub struct AudioConverter {
    format: AudioFormat,
    strategy: Strategy,
    input_channels: usize,
    /// Normalized PCM awaiting frame extraction.
    carry: Vec<u8>,
    /// Raw-path tail that did not fill a whole interleaved sample group.
    raw_remainder: Vec<u8>,
    /// Whole-file accumulation, decoded on flush.
    file_buf: Vec<u8>,
    opus: Option<OpusDecoder>,
    resampler: Option<StreamResampler>,
    raw_resampler: Option<LinearResampler>,
    webm: Option<WebmOpusExtractor>,
    total_received_bytes: u64,
    total_output_frames: u64,
}

impl AudioConverter {
    pub fn new(
        format: AudioFormat,
        input_sample_rate: Option<u32>,
        input_channels: Option<u16>,
    ) -> Result<Self, AudioFormatError> {
        let strategy = Strategy::for_format(format);
        let input_sample_rate = input_sample_rate.unwrap_or(48_000);
        let input_channels = input_channels.unwrap_or(2) as usize;

        let (opus, resampler, webm) = match strategy {
            Strategy::StreamingCodec => (
                Some(OpusDecoder::new()?),
                // Opus always decodes at 48 kHz regardless of the
                // declared input rate.
                Some(StreamResampler::new(48_000)?),
                (format == AudioFormat::Webm).then(WebmOpusExtractor::new),
            ),
            _ => (None, None, None),
        };

        let raw_resampler = (strategy == Strategy::RawPcm && input_sample_rate != SAMPLE_RATE)
            .then(|| LinearResampler::new(input_sample_rate, SAMPLE_RATE));

        info!(
            format = format.as_str(),
            strategy = strategy.as_str(),
            input_sample_rate,
            input_channels,
            "audio converter initialized"
        );

        Ok(Self {
            format,
            strategy,
            input_channels,
            carry: Vec::new(),
            raw_remainder: Vec::new(),
            file_buf: Vec::new(),
            opus,
            resampler,
            raw_resampler,
            webm,
            total_received_bytes: 0,
            total_output_frames: 0,
        })
    }

    /// Consumes one input packet and returns every complete frame now
    /// available. Streaming decode failures drop the packet and keep the
    /// stream alive.
    pub fn convert(&mut self, packet: &[u8]) -> Vec<Vec<u8>> {
        if packet.is_empty() {
            return Vec::new();
        }
        self.total_received_bytes += packet.len() as u64;

        match self.strategy {
            Strategy::WholeFile => {
                self.file_buf.extend_from_slice(packet);
                return Vec::new();
            }
            Strategy::RawPcm => self.process_raw(packet),
            Strategy::StreamingCodec => self.process_codec(packet),
        }

        self.extract_frames()
    }

    fn process_raw(&mut self, packet: &[u8]) {
        let mut bytes = std::mem::take(&mut self.raw_remainder);
        bytes.extend_from_slice(packet);

        // Only whole interleaved sample groups are usable now; the tail
        // waits for the next packet.
        let group = 2 * self.input_channels.max(1);
        let usable = bytes.len() - bytes.len() % group;
        self.raw_remainder = bytes.split_off(usable);

        let samples = bytes_to_i16(&bytes);
        let mono = if self.input_channels > 1 {
            downmix_to_mono(&i16_to_f32(&samples), self.input_channels)
        } else {
            i16_to_f32(&samples)
        };

        let resampled = match &mut self.raw_resampler {
            Some(resampler) => resampler.process(&mono),
            None => mono,
        };
        self.carry.extend(i16_to_bytes(&f32_to_i16(&resampled)));
    }

    fn process_codec(&mut self, packet: &[u8]) {
        let opus_packets = match &mut self.webm {
            Some(extractor) => extractor.push(packet),
            None => vec![packet.to_vec()],
        };

        let (Some(opus), Some(resampler)) = (&mut self.opus, &mut self.resampler) else {
            return;
        };

        for opus_packet in opus_packets {
            let pcm_48k = match opus.decode_to_mono(&opus_packet) {
                Ok(pcm) => pcm,
                Err(e) => {
                    debug!(error = %e, "opus decode failed, dropping packet");
                    continue;
                }
            };
            let pcm_16k = match resampler.process(&pcm_48k) {
                Ok(pcm) => pcm,
                Err(e) => {
                    debug!(error = %e, "resample failed, dropping packet");
                    continue;
                }
            };
            self.carry.extend(i16_to_bytes(&f32_to_i16(&pcm_16k)));
        }
    }

    fn extract_frames(&mut self) -> Vec<Vec<u8>> {
        let mut frames = Vec::new();
        while self.carry.len() >= FRAME_BYTES {
            frames.push(self.carry.drain(..FRAME_BYTES).collect());
            self.total_output_frames += 1;
        }
        frames
    }

    /// Runs the whole-file decode if one is pending, then drains the carry
    /// buffer. The returned bytes may span several frames and end in a
    /// short tail.
    pub fn flush(&mut self) -> Result<Option<Vec<u8>>, AudioFormatError> {
        if self.strategy == Strategy::WholeFile && !self.file_buf.is_empty() {
            let data = std::mem::take(&mut self.file_buf);
            let decoded = decode_whole_file(data, Some(self.format.as_str()))?;
            let mono = downmix_to_mono(&decoded.samples, decoded.channels);
            let resampled = if decoded.sample_rate != SAMPLE_RATE {
                LinearResampler::new(decoded.sample_rate, SAMPLE_RATE).process(&mono)
            } else {
                mono
            };
            self.carry.extend(i16_to_bytes(&f32_to_i16(&resampled)));
            info!(
                format = self.format.as_str(),
                pcm_bytes = self.carry.len(),
                "whole-file decode complete"
            );
        }

        if self.carry.is_empty() {
            Ok(None)
        } else {
            Ok(Some(std::mem::take(&mut self.carry)))
        }
    }

    pub fn stats(&self) -> ConverterStats {
        ConverterStats {
            strategy: self.strategy.as_str(),
            total_received_bytes: self.total_received_bytes,
            total_output_frames: self.total_output_frames,
            buffer_bytes: self.carry.len(),
        }
    }
}
