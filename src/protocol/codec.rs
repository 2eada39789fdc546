//! Encode/decode the 24-byte header framing (spec §4.1, §6).
//!
//! Wire layout, all integers big-endian:
//! `magic(4) | version(1) | type(1) | flags(2) | sequence_id(8) | method(2)
//! | reserved(2)=0 | data_size(4)`, followed by `data_size` payload bytes.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

use crate::error::CoreError;

use super::frame::{Frame, FrameFlags, FrameType, DEFAULT_COMPRESSION_MIN_BYTES, HEADER_LEN, MAGIC,
    PROTOCOL_VERSION};

#[derive(Debug, Clone, Copy)]
pub struct CodecConfig {
    pub max_frame_bytes: u32,
    pub compression_min_bytes: usize,
}

impl Default for CodecConfig {
    fn default() -> Self {
        Self {
            max_frame_bytes: super::frame::DEFAULT_MAX_FRAME_BYTES,
            compression_min_bytes: DEFAULT_COMPRESSION_MIN_BYTES,
        }
    }
}

/// Encodes a frame, opting into DEFLATE compression only when the payload
/// is large enough and compression strictly shrinks it (spec §4.1
/// "Encoding contract"). Returns the full wire bytes (header + payload).
pub fn encode(frame: &Frame, config: &CodecConfig) -> CoreResult<Vec<u8>> {
    let mut flags = frame.flags;
    flags.remove(FrameFlags::COMPRESSED);

    let payload = if frame.payload.len() >= config.compression_min_bytes {
        let compressed = deflate(&frame.payload)?;
        if compressed.len() < frame.payload.len() {
            flags.insert(FrameFlags::COMPRESSED);
            compressed
        } else {
            frame.payload.clone()
        }
    } else {
        frame.payload.clone()
    };

    if payload.len() as u64 > config.max_frame_bytes as u64 {
        return Err(CoreError::ProtocolViolation(format!(
            "encoded payload {} exceeds max_frame_bytes {}",
            payload.len(),
            config.max_frame_bytes
        )));
    }

    let mut out = Vec::with_capacity(HEADER_LEN + payload.len());
    out.write_u32::<BigEndian>(MAGIC).unwrap();
    out.write_u8(frame.version).unwrap();
    out.write_u8(frame.frame_type as u8).unwrap();
    out.write_u16::<BigEndian>(flags.bits()).unwrap();
    out.write_u64::<BigEndian>(frame.sequence_id).unwrap();
    out.write_u16::<BigEndian>(frame.method).unwrap();
    out.write_u16::<BigEndian>(0).unwrap(); // reserved
    out.write_u32::<BigEndian>(payload.len() as u32).unwrap();
    out.extend_from_slice(&payload);
    Ok(out)
}

type CoreResult<T> = Result<T, CoreError>;

/// Decodes exactly one frame from `bytes`. Returns the frame and the number
/// of bytes consumed; callers reading from a stream should buffer until at
/// least `HEADER_LEN` bytes are available, peek `data_size`, then wait for
/// the full frame before calling this.
pub fn decode(bytes: &[u8], config: &CodecConfig) -> CoreResult<(Frame, usize)> {
    if bytes.len() < HEADER_LEN {
        return Err(CoreError::MalformedFrame(
            "fewer than 24 header bytes available".into(),
        ));
    }

    let mut cursor = Cursor::new(bytes);
    let magic = cursor
        .read_u32::<BigEndian>()
        .map_err(|e| CoreError::MalformedFrame(e.to_string()))?;
    if magic != MAGIC {
        return Err(CoreError::ProtocolViolation(format!(
            "bad magic: {magic:#010x}"
        )));
    }

    let version = cursor
        .read_u8()
        .map_err(|e| CoreError::MalformedFrame(e.to_string()))?;
    if version != PROTOCOL_VERSION {
        return Err(CoreError::ProtocolViolation(format!(
            "unsupported version: {version}"
        )));
    }

    let raw_type = cursor
        .read_u8()
        .map_err(|e| CoreError::MalformedFrame(e.to_string()))?;
    let frame_type = FrameType::from_u8(raw_type)
        .ok_or_else(|| CoreError::ProtocolViolation(format!("unknown frame type {raw_type}")))?;

    let raw_flags = cursor
        .read_u16::<BigEndian>()
        .map_err(|e| CoreError::MalformedFrame(e.to_string()))?;
    // Unknown flag bits are preserved, never rejected (forward-compat) —
    // from_bits_retain keeps bits outside the known set instead of
    // silently dropping them.
    let flags = FrameFlags::from_bits_retain(raw_flags);

    let sequence_id = cursor
        .read_u64::<BigEndian>()
        .map_err(|e| CoreError::MalformedFrame(e.to_string()))?;
    let method = cursor
        .read_u16::<BigEndian>()
        .map_err(|e| CoreError::MalformedFrame(e.to_string()))?;
    let _reserved = cursor
        .read_u16::<BigEndian>()
        .map_err(|e| CoreError::MalformedFrame(e.to_string()))?;
    let data_size = cursor
        .read_u32::<BigEndian>()
        .map_err(|e| CoreError::MalformedFrame(e.to_string()))?;

    if data_size > config.max_frame_bytes {
        return Err(CoreError::ProtocolViolation(format!(
            "frame of {data_size} bytes exceeds max_frame_bytes {}",
            config.max_frame_bytes
        )));
    }

    let header_end = cursor.position() as usize;
    let total_len = header_end + data_size as usize;
    if bytes.len() < total_len {
        return Err(CoreError::MalformedFrame(
            "payload shorter than data_size".into(),
        ));
    }

    let raw_payload = &bytes[header_end..total_len];
    let payload = if flags.contains(FrameFlags::COMPRESSED) {
        inflate(raw_payload)?
    } else {
        raw_payload.to_vec()
    };

    let frame = Frame {
        version,
        frame_type,
        flags,
        sequence_id,
        method,
        payload,
    };

    Ok((frame, total_len))
}

fn deflate(data: &[u8]) -> CoreResult<Vec<u8>> {
    use flate2::write::DeflateEncoder;
    use flate2::Compression;

    let mut encoder = DeflateEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| CoreError::Fatal(format!("compression failed: {e}")))?;
    encoder
        .finish()
        .map_err(|e| CoreError::Fatal(format!("compression failed: {e}")))
}

fn inflate(data: &[u8]) -> CoreResult<Vec<u8>> {
    use flate2::read::DeflateDecoder;

    let mut decoder = DeflateDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| CoreError::MalformedFrame(format!("decompression failed: {e}")))?;
    Ok(out)
}

/// Encodes a Batch frame's payload: a length-prefixed sequence of inner
/// frame wire bytes sharing the outer sequence_id (spec §4.1/§6).
pub fn encode_batch_payload(inner_frames: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    for frame_bytes in inner_frames {
        out.write_u32::<BigEndian>(frame_bytes.len() as u32)
            .unwrap();
        out.extend_from_slice(frame_bytes);
    }
    out
}

/// Decodes a Batch frame's payload back into the raw wire bytes of each
/// inner frame (caller then runs [`decode`] on each).
pub fn decode_batch_payload(payload: &[u8]) -> CoreResult<Vec<Vec<u8>>> {
    let mut cursor = Cursor::new(payload);
    let mut frames = Vec::new();

    while (cursor.position() as usize) < payload.len() {
        let len = cursor
            .read_u32::<BigEndian>()
            .map_err(|e| CoreError::MalformedFrame(e.to_string()))? as usize;
        let start = cursor.position() as usize;
        let end = start + len;
        if end > payload.len() {
            return Err(CoreError::MalformedFrame(
                "batch inner frame length exceeds remaining payload".into(),
            ));
        }
        frames.push(payload[start..end].to_vec());
        cursor.set_position(end as u64);
    }

    Ok(frames)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_frame(payload: Vec<u8>) -> Frame {
        Frame::new(FrameType::Request, 42, 1, FrameFlags::empty(), payload)
    }

    #[test]
    fn round_trips_small_uncompressed_frame() {
        let config = CodecConfig::default();
        let frame = sample_frame(b"{\"hello\":\"world\"}".to_vec());
        let bytes = encode(&frame, &config).unwrap();
        let (decoded, consumed) = decode(&bytes, &config).unwrap();
        assert_eq!(consumed, bytes.len());
        assert_eq!(decoded, frame);
        assert!(!decoded.flags.contains(FrameFlags::COMPRESSED));
    }

    #[test]
    fn compresses_large_compressible_payload_and_normalizes_flag() {
        let config = CodecConfig::default();
        let payload = vec![b'a'; 4096];
        let frame = sample_frame(payload.clone());
        let bytes = encode(&frame, &config).unwrap();
        // A run of identical bytes compresses well below the threshold.
        assert!(bytes.len() < payload.len());
        let (decoded, _) = decode(&bytes, &config).unwrap();
        assert_eq!(decoded.payload, payload);
        // P1: decode(encode(m)) == m except the Compressed flag normalizes.
        assert_eq!(decoded.flags, frame.flags);
    }

    #[test]
    fn rejects_bad_magic() {
        let config = CodecConfig::default();
        let mut bytes = encode(&sample_frame(vec![1, 2, 3]), &config).unwrap();
        bytes[0] ^= 0xFF;
        let err = decode(&bytes, &config).unwrap_err();
        assert_eq!(err.code(), 1001);
    }

    #[test]
    fn rejects_oversized_frame() {
        let config = CodecConfig {
            max_frame_bytes: 16,
            compression_min_bytes: 1_000_000,
        };
        let frame = sample_frame(vec![0u8; 64]);
        let err = encode(&frame, &config).unwrap_err();
        assert_eq!(err.code(), 1001);
    }

    #[test]
    fn batch_payload_round_trips_multiple_inner_frames() {
        let config = CodecConfig::default();
        let inner_a = encode(&sample_frame(b"a".to_vec()), &config).unwrap();
        let inner_b = encode(&sample_frame(b"bb".to_vec()), &config).unwrap();
        let batch_payload = encode_batch_payload(&[inner_a.clone(), inner_b.clone()]);
        let decoded = decode_batch_payload(&batch_payload).unwrap();
        assert_eq!(decoded, vec![inner_a, inner_b]);
    }

    #[test]
    fn unknown_flag_bits_are_preserved_not_rejected() {
        let config = CodecConfig::default();
        let mut frame = sample_frame(b"x".to_vec());
        // Bit 0x8000 isn't in FrameFlags; a forward-compat receiver must
        // round-trip it rather than silently drop it.
        frame.flags = FrameFlags::from_bits_retain(0x8000);
        let bytes = encode(&frame, &config).unwrap();
        let (decoded, _) = decode(&bytes, &config).unwrap();
        assert_eq!(decoded.flags.bits() & 0x8000, 0x8000, "unknown bit must survive decode");
    }
}
