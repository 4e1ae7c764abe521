//! Live execution of a single op against a socket.

use std::io::{Read, Write};
use std::time::Instant;

use tracing::trace;

use crate::error::WireError;
use crate::header::MsgHeader;
use crate::op::{Op, RawOp, Reply};
use crate::HEADER_LEN;

/// Read one complete frame from `reader`.
///
/// The header is validated with [`MsgHeader::looks_real`] before the body
/// is allocated, so a desynchronised peer cannot force a huge read.
pub fn read_raw_op<R: Read + ?Sized>(reader: &mut R) -> Result<RawOp, WireError> {
    let mut head = [0u8; HEADER_LEN];
    reader.read_exact(&mut head)?;
    let header = MsgHeader::from_bytes(&head)?;
    if !header.looks_real() {
        return Err(WireError::InvalidHeader {
            message_length: header.message_length,
            op_code: header.raw_op_code,
        });
    }
    let len = header.message_length as usize;
    let mut frame = vec![0u8; len];
    frame[..HEADER_LEN].copy_from_slice(&head);
    reader.read_exact(&mut frame[HEADER_LEN..])?;
    Ok(RawOp {
        header,
        body: frame,
    })
}

/// Send `op` over `stream` and wait for its reply.
///
/// Returns `Ok(None)` for ops that expect no reply. Frames on the stream
/// whose `responseTo` does not match the op's request id are skipped.
/// The returned reply carries the measured round-trip latency.
pub fn execute<S: Read + Write + ?Sized>(op: &Op, stream: &mut S) -> Result<Option<Reply>, WireError> {
    let frame = op.encode()?;
    let started = Instant::now();
    stream.write_all(&frame)?;
    stream.flush()?;
    if !op.expects_reply() {
        return Ok(None);
    }

    let request_id = op.header().request_id;
    loop {
        let raw = read_raw_op(stream)?;
        if raw.header.response_to != request_id {
            trace!(
                request_id,
                response_to = raw.header.response_to,
                "skipping unrelated frame"
            );
            continue;
        }
        let latency = started.elapsed();
        let mut reply = raw.parse()?.into_reply().ok_or_else(|| WireError::Malformed {
            detail: format!(
                "response to request {request_id} has non-reply op code {}",
                raw.header.raw_op_code
            ),
        })?;
        reply.set_latency(latency);
        return Ok(Some(reply));
    }
}
