use std::io::Read;

use flate2::read::ZlibDecoder;

use crate::buffer::BodyReader;
use crate::error::WireError;
use crate::header::MsgHeader;
use crate::{HEADER_LEN, MAX_MESSAGE_SIZE};

/// Compressors defined for OP_COMPRESSED.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressorId {
    /// Payload is stored uncompressed.
    Noop,
    /// Snappy framing (not supported).
    Snappy,
    /// zlib stream.
    Zlib,
    /// Zstandard frame (not supported).
    Zstd,
}

impl CompressorId {
    /// Map the wire byte onto a compressor.
    pub fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            0 => Self::Noop,
            1 => Self::Snappy,
            2 => Self::Zlib,
            3 => Self::Zstd,
            _ => return None,
        })
    }
}

/// Unwrap an OP_COMPRESSED body into the header and full frame of the
/// original message.
///
/// ```text
/// originalOpcode i32 | uncompressedSize i32 | compressorId u8 | compressedMessage
/// ```
pub fn decompress(header: MsgHeader, r: &mut BodyReader<'_>) -> Result<(MsgHeader, Vec<u8>), WireError> {
    let original_op_code = r.read_i32("originalOpcode")?;
    let uncompressed_size = r.read_i32("uncompressedSize")?;
    let compressor = r.read_u8("compressorId")?;
    let payload = r.read_bytes(r.remaining(), "compressedMessage")?;

    if uncompressed_size < 0 || uncompressed_size > MAX_MESSAGE_SIZE - HEADER_LEN as i32 {
        return Err(WireError::Malformed {
            detail: format!("uncompressed size {uncompressed_size} out of range"),
        });
    }
    let size = uncompressed_size as usize;

    let inner_body = match CompressorId::from_u8(compressor) {
        Some(CompressorId::Noop) => payload.to_vec(),
        Some(CompressorId::Zlib) => {
            let mut out = Vec::with_capacity(size);
            ZlibDecoder::new(payload)
                .take(size as u64 + 1)
                .read_to_end(&mut out)?;
            out
        }
        _ => return Err(WireError::UnsupportedCompressor { id: compressor }),
    };
    if inner_body.len() != size {
        return Err(WireError::Malformed {
            detail: format!(
                "compressed op expanded to {} bytes, header declared {size}",
                inner_body.len()
            ),
        });
    }

    let inner = MsgHeader {
        message_length: (HEADER_LEN + size) as i32,
        request_id: header.request_id,
        response_to: header.response_to,
        raw_op_code: original_op_code,
    };
    let mut frame = Vec::with_capacity(HEADER_LEN + size);
    frame.extend_from_slice(&inner.to_bytes());
    frame.extend_from_slice(&inner_body);
    Ok((inner, frame))
}
