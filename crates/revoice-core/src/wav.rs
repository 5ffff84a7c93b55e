//! WAV encoding and decoding for 16-bit PCM.
//!
//! Pure functions with no I/O and no async runtime. The inference runtime speaks
//! raw PCM; these helpers turn it into files and check files handed between
//! pipeline stages.

/// Convert raw little-endian bytes to i16 samples.
///
/// A trailing odd byte is returned so streamed bodies can carry it into the
/// next chunk. `leftover` is the byte carried from the previous chunk.
pub fn pcm_from_le_bytes(bytes: &[u8], leftover: Option<u8>) -> (Vec<i16>, Option<u8>) {
    let joined: Vec<u8>;
    let slice = match leftover {
        Some(lo) => {
            joined = std::iter::once(lo).chain(bytes.iter().copied()).collect();
            &joined[..]
        }
        None => bytes,
    };

    let samples = slice
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
        .collect();

    let remainder = (slice.len() % 2 == 1).then(|| slice[slice.len() - 1]);

    (samples, remainder)
}

/// Encode 16-bit mono PCM samples as a complete WAV file.
pub fn write_wav(samples: &[i16], sample_rate: u32) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let file_len = 36 + data_len;
    let mut buf = Vec::with_capacity(44 + data_len as usize);

    // RIFF header
    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&file_len.to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    // fmt chunk
    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes()); // chunk size
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM
    buf.extend_from_slice(&1u16.to_le_bytes()); // mono
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&sample_rate.saturating_mul(2).to_le_bytes()); // byte rate
    buf.extend_from_slice(&2u16.to_le_bytes()); // block align
    buf.extend_from_slice(&16u16.to_le_bytes()); // bits per sample

    // data chunk
    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    for &sample in samples {
        buf.extend_from_slice(&sample.to_le_bytes());
    }

    buf
}

/// Parsed WAV header fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WavHeader {
    pub channels: u16,
    pub sample_rate: u32,
    pub bits_per_sample: u16,
    /// Byte offset in the buffer where raw PCM data begins.
    pub data_offset: usize,
    /// Declared data size; `None` for the streaming `0xFFFFFFFF` sentinel.
    pub data_len: Option<u32>,
}

impl WavHeader {
    /// Length of the audio in seconds, given the total buffer length.
    pub fn duration_secs(&self, buf_len: usize) -> f64 {
        let data = self
            .data_len
            .map_or(buf_len.saturating_sub(self.data_offset), |n| n as usize);
        let frame = self.channels as usize * (self.bits_per_sample as usize / 8);
        if frame == 0 || self.sample_rate == 0 {
            return 0.0;
        }
        (data / frame) as f64 / self.sample_rate as f64
    }
}

/// Parse a WAV header from a byte buffer.
///
/// Only PCM (format 1) is accepted. Sentinel chunk sizes from streamed
/// writers are tolerated.
pub fn parse_wav_header(buf: &[u8]) -> Result<WavHeader, &'static str> {
    if buf.len() < 12 {
        return Err("too short for RIFF header");
    }
    if &buf[0..4] != b"RIFF" {
        return Err("missing RIFF tag");
    }
    if &buf[8..12] != b"WAVE" {
        return Err("missing WAVE tag");
    }

    let mut pos = 12;
    let mut format: Option<(u16, u32, u16)> = None;

    while pos + 8 <= buf.len() {
        let chunk_id = &buf[pos..pos + 4];
        let chunk_size =
            u32::from_le_bytes([buf[pos + 4], buf[pos + 5], buf[pos + 6], buf[pos + 7]]);

        if chunk_id == b"fmt " {
            if pos + 24 > buf.len() {
                return Err("fmt chunk truncated");
            }
            let audio_format = u16::from_le_bytes([buf[pos + 8], buf[pos + 9]]);
            if audio_format != 1 {
                return Err("not PCM format");
            }
            let channels = u16::from_le_bytes([buf[pos + 10], buf[pos + 11]]);
            let sample_rate = u32::from_le_bytes([
                buf[pos + 12],
                buf[pos + 13],
                buf[pos + 14],
                buf[pos + 15],
            ]);
            let bits = u16::from_le_bytes([buf[pos + 22], buf[pos + 23]]);
            format = Some((channels, sample_rate, bits));

            let skip = if chunk_size == 0xFFFFFFFF {
                16 // standard fmt chunk payload
            } else {
                chunk_size as usize
            };
            pos += 8 + skip;
            continue;
        }

        if chunk_id == b"data" {
            let (channels, sample_rate, bits_per_sample) =
                format.ok_or("data chunk before fmt chunk")?;
            return Ok(WavHeader {
                channels,
                sample_rate,
                bits_per_sample,
                data_offset: pos + 8,
                data_len: (chunk_size != 0xFFFFFFFF).then_some(chunk_size),
            });
        }

        // Skip unknown chunks (LIST, fact, ...), padded to even size
        let skip = if chunk_size == 0xFFFFFFFF {
            0
        } else {
            chunk_size as usize + (chunk_size as usize & 1)
        };
        pos += 8 + skip;
    }

    Err("data chunk not found")
}

/// Decode a 16-bit mono WAV into its samples and sample rate.
pub fn read_wav(buf: &[u8]) -> Result<(Vec<i16>, u32), &'static str> {
    let header = parse_wav_header(buf)?;
    if header.bits_per_sample != 16 {
        return Err("not 16-bit PCM");
    }
    if header.channels != 1 {
        return Err("not mono");
    }
    let end = header
        .data_len
        .map_or(buf.len(), |n| (header.data_offset + n as usize).min(buf.len()));
    let (samples, _) = pcm_from_le_bytes(&buf[header.data_offset..end], None);
    Ok((samples, header.sample_rate))
}
