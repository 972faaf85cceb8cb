use tracing::{debug, warn};

// Matroska/WebM element ids (EBML, marker bits included).
const ID_EBML_HEADER: u32 = 0x1A45_DFA3;
const ID_SEGMENT: u32 = 0x1853_8067;
const ID_TRACKS: u32 = 0x1654_AE6B;
const ID_TRACK_ENTRY: u32 = 0xAE;
const ID_TRACK_NUMBER: u32 = 0xD7;
const ID_CODEC_ID: u32 = 0x86;
const ID_CLUSTER: u32 = 0x1F43_B675;
const ID_BLOCK_GROUP: u32 = 0xA0;
const ID_SIMPLE_BLOCK: u32 = 0xA3;
const ID_BLOCK: u32 = 0xA1;

const OPUS_CODEC_ID: &str = "A_OPUS";

/// Largest possible element header: 4-byte id + 8-byte size.
const MAX_HEADER_BYTES: usize = 12;

/// Incremental extractor of opus packets from a MediaRecorder-style
/// webm byte stream.
///
/// Feeds on arbitrary byte chunks (elements may straddle chunk
/// boundaries), walks the EBML tree without requiring seekability, and
/// yields the payload of every audio SimpleBlock/Block. Container-level
/// damage poisons the extractor: remaining input is discarded instead of
/// being misparsed as audio.
pub struct WebmOpusExtractor {
    buf: Vec<u8>,
    /// Absolute stream offset of `buf[0]`.
    abs: u64,
    /// Bytes of an uninteresting leaf element still to discard.
    skip: u64,
    track: Option<PendingTrack>,
    audio_track: Option<u64>,
    poisoned: bool,
}

struct PendingTrack {
    number: Option<u64>,
    is_opus: bool,
    /// Absolute offset one past the TrackEntry body.
    end: u64,
}

impl WebmOpusExtractor {
    pub fn new() -> Self {
        Self {
            buf: Vec::new(),
            abs: 0,
            skip: 0,
            track: None,
            audio_track: None,
            poisoned: false,
        }
    }

    /// Appends a chunk and returns every complete opus packet found.
    pub fn push(&mut self, data: &[u8]) -> Vec<Vec<u8>> {
        if self.poisoned {
            return Vec::new();
        }
        self.buf.extend_from_slice(data);

        let mut packets = Vec::new();
        loop {
            if self.skip > 0 {
                let n = (self.skip).min(self.buf.len() as u64) as usize;
                self.consume(n);
                self.skip -= n as u64;
                if self.skip > 0 {
                    break;
                }
            }

            self.maybe_finalize_track();

            let Some((id, id_len)) = read_id(&self.buf) else {
                self.poison_if_stuck();
                break;
            };
            let Some((size, size_len)) = read_size(&self.buf[id_len..]) else {
                self.poison_if_stuck();
                break;
            };
            let header_len = id_len + size_len;

            match id {
                // Masters we walk straight into. Their size (often the
                // unknown-size marker for Segment/Cluster in live streams)
                // does not matter: children are parsed in place.
                ID_SEGMENT | ID_TRACKS | ID_BLOCK_GROUP => {
                    self.consume(header_len);
                }
                ID_CLUSTER => {
                    // A cluster begins after track metadata is complete.
                    self.finalize_track();
                    self.consume(header_len);
                }
                ID_TRACK_ENTRY => {
                    self.finalize_track();
                    self.consume(header_len);
                    self.track = Some(PendingTrack {
                        number: None,
                        is_opus: false,
                        end: size.map(|s| self.abs + s).unwrap_or(u64::MAX),
                    });
                }
                ID_TRACK_NUMBER | ID_CODEC_ID => {
                    let Some(body_len) = size else {
                        warn!("unknown-size track field, abandoning webm stream");
                        self.poison();
                        break;
                    };
                    let body_len = body_len as usize;
                    if self.buf.len() < header_len + body_len {
                        break;
                    }
                    let body = &self.buf[header_len..header_len + body_len];
                    if let Some(track) = &mut self.track {
                        if id == ID_TRACK_NUMBER {
                            track.number = Some(uint_be(body));
                        } else {
                            track.is_opus = body == OPUS_CODEC_ID.as_bytes();
                        }
                    }
                    self.consume(header_len + body_len);
                }
                ID_SIMPLE_BLOCK | ID_BLOCK => {
                    let Some(body_len) = size else {
                        warn!("unknown-size block, abandoning webm stream");
                        self.poison();
                        break;
                    };
                    let body_len = body_len as usize;
                    if self.buf.len() < header_len + body_len {
                        break;
                    }
                    let body = &self.buf[header_len..header_len + body_len];
                    if let Some(payload) = self.block_payload(body) {
                        packets.push(payload);
                    }
                    self.consume(header_len + body_len);
                }
                ID_EBML_HEADER => {
                    // Nothing needed from the DocType; skip the body.
                    let Some(body_len) = size else {
                        warn!("unknown-size EBML header, abandoning webm stream");
                        self.poison();
                        break;
                    };
                    self.consume(header_len);
                    self.skip = body_len;
                }
                _ => {
                    let Some(body_len) = size else {
                        warn!(id = %format!("{id:#x}"), "unknown-size element, abandoning webm stream");
                        self.poison();
                        break;
                    };
                    self.consume(header_len);
                    self.skip = body_len;
                }
            }
        }
        packets
    }

    /// Block layout: track vint, 2-byte relative timecode, flags, frame
    /// data. Laced blocks are not produced by MediaRecorder; skip them.
    fn block_payload(&self, body: &[u8]) -> Option<Vec<u8>> {
        let (track_num, vint_len) = read_size(body)?;
        let track_num = track_num?;
        if body.len() < vint_len + 3 {
            return None;
        }
        let flags = body[vint_len + 2];
        if flags & 0x06 != 0 {
            debug!(flags, "laced block, skipping");
            return None;
        }
        // Before Tracks is parsed (audio-only streams in practice),
        // accept any track.
        if self.audio_track.is_some_and(|t| t != track_num) {
            return None;
        }
        Some(body[vint_len + 3..].to_vec())
    }

    fn maybe_finalize_track(&mut self) {
        if self.track.as_ref().is_some_and(|t| self.abs >= t.end) {
            self.finalize_track();
        }
    }

    fn finalize_track(&mut self) {
        if let Some(track) = self.track.take() {
            if track.is_opus {
                self.audio_track = track.number;
                debug!(track = ?track.number, "opus audio track identified");
            }
        }
    }

    fn consume(&mut self, n: usize) {
        self.buf.drain(..n);
        self.abs += n as u64;
    }

    /// A header that still cannot be parsed with the maximum header length
    /// buffered is malformed, not incomplete.
    fn poison_if_stuck(&mut self) {
        if self.buf.len() >= MAX_HEADER_BYTES {
            warn!(
                offset = self.abs,
                "malformed webm element header, abandoning stream"
            );
            self.poison();
        }
    }

    fn poison(&mut self) {
        self.poisoned = true;
        self.buf.clear();
    }
}

impl Default for WebmOpusExtractor {
    fn default() -> Self {
        Self::new()
    }
}

/// EBML id: 1-4 bytes, marker bit kept in the value.
fn read_id(buf: &[u8]) -> Option<(u32, usize)> {
    let first = *buf.first()?;
    let len = match first {
        b if b & 0x80 != 0 => 1,
        b if b & 0x40 != 0 => 2,
        b if b & 0x20 != 0 => 3,
        b if b & 0x10 != 0 => 4,
        _ => return None,
    };
    if buf.len() < len {
        return None;
    }
    let mut value = 0u32;
    for byte in &buf[..len] {
        value = (value << 8) | *byte as u32;
    }
    Some((value, len))
}

/// EBML size: 1-8 bytes, marker bit stripped. `None` value = unknown size.
fn read_size(buf: &[u8]) -> Option<(Option<u64>, usize)> {
    let first = *buf.first()?;
    if first == 0 {
        return None;
    }
    let len = first.leading_zeros() as usize + 1;
    if len > 8 || buf.len() < len {
        return None;
    }

    let mask = (0xFFu16 >> len) as u8;
    let mut value = (first & mask) as u64;
    let mut all_ones = first & mask == mask;
    for byte in &buf[1..len] {
        value = (value << 8) | *byte as u64;
        all_ones = all_ones && *byte == 0xFF;
    }
    Some((if all_ones { None } else { Some(value) }, len))
}

fn uint_be(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0u64, |acc, b| (acc << 8) | *b as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode_size(len: usize) -> Vec<u8> {
        if len < 0x7F {
            vec![0x80 | len as u8]
        } else {
            vec![0x40 | (len >> 8) as u8, (len & 0xFF) as u8]
        }
    }

    fn element(id: u32, body: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        let id_bytes = id.to_be_bytes();
        let skip = id_bytes.iter().take_while(|b| **b == 0).count();
        out.extend_from_slice(&id_bytes[skip..]);
        out.extend_from_slice(&encode_size(body.len()));
        out.extend_from_slice(body);
        out
    }

    fn simple_block(track: u8, payload: &[u8]) -> Vec<u8> {
        let mut body = vec![0x80 | track, 0x00, 0x00, 0x00];
        body.extend_from_slice(payload);
        element(ID_SIMPLE_BLOCK, &body)
    }

    fn sample_stream(payloads: &[&[u8]]) -> Vec<u8> {
        let track_entry = element(
            ID_TRACK_ENTRY,
            &[
                element(ID_TRACK_NUMBER, &[1]),
                element(ID_CODEC_ID, OPUS_CODEC_ID.as_bytes()),
            ]
            .concat(),
        );
        let tracks = element(ID_TRACKS, &track_entry);

        let mut cluster_body = Vec::new();
        for payload in payloads {
            cluster_body.extend(simple_block(1, payload));
        }
        let cluster = element(ID_CLUSTER, &cluster_body);

        let mut stream = element(ID_EBML_HEADER, b"webm");
        // Segment with unknown size, as MediaRecorder emits for live data.
        stream.extend_from_slice(&0x1853_8067u32.to_be_bytes());
        stream.push(0x01);
        stream.extend_from_slice(&[0xFF; 7]);
        stream.extend(tracks);
        stream.extend(cluster);
        stream
    }

    #[test]
    fn extracts_block_payloads() {
        let stream = sample_stream(&[&[1, 2, 3], &[9, 8, 7, 6]]);
        let mut extractor = WebmOpusExtractor::new();
        let packets = extractor.push(&stream);
        assert_eq!(packets, vec![vec![1, 2, 3], vec![9, 8, 7, 6]]);
    }

    #[test]
    fn survives_arbitrary_chunk_boundaries() {
        let stream = sample_stream(&[&[1, 2, 3], &[9, 8, 7, 6]]);
        let mut extractor = WebmOpusExtractor::new();
        let mut packets = Vec::new();
        for byte in stream {
            packets.extend(extractor.push(&[byte]));
        }
        assert_eq!(packets, vec![vec![1, 2, 3], vec![9, 8, 7, 6]]);
    }

    #[test]
    fn ignores_blocks_from_other_tracks() {
        let track_entry = element(
            ID_TRACK_ENTRY,
            &[
                element(ID_TRACK_NUMBER, &[2]),
                element(ID_CODEC_ID, OPUS_CODEC_ID.as_bytes()),
            ]
            .concat(),
        );
        let tracks = element(ID_TRACKS, &track_entry);
        let mut cluster_body = simple_block(1, &[0xAA]);
        cluster_body.extend(simple_block(2, &[0xBB]));
        let cluster = element(ID_CLUSTER, &cluster_body);

        let stream = element(ID_SEGMENT, &[tracks, cluster].concat());
        let mut extractor = WebmOpusExtractor::new();
        let packets = extractor.push(&stream);
        assert_eq!(packets, vec![vec![0xBB]]);
    }

    #[test]
    fn garbage_poisons_instead_of_spinning() {
        let mut extractor = WebmOpusExtractor::new();
        let packets = extractor.push(&[0x00; 64]);
        assert!(packets.is_empty());
        assert!(extractor.push(&[0x01; 64]).is_empty());
    }
}
