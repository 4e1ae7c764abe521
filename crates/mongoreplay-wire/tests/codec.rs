//! Codec integration tests: compressed frames, desync bytes and
//! arbitrary-input robustness.

use std::io::Write;

use bson::doc;
use flate2::write::ZlibEncoder;
use flate2::Compression;
use mongoreplay_wire::{MsgHeader, MsgOp, Op, OpCode, RawOp, WireError, HEADER_LEN};
use proptest::prelude::*;

// ── Helpers ─────────────────────────────────────────────────────

fn find_msg(request_id: i32) -> Op {
    let mut op = Op::Msg(MsgOp::new(
        MsgHeader::new(OpCode::Msg, request_id, 0),
        doc! { "find": "coll", "filter": { "x": { "$gt": 3 } }, "$db": "test" },
    ));
    op.sync_header().unwrap();
    op
}

/// Wrap `inner` in an OP_COMPRESSED frame using `compressor`.
fn compress(inner: &Op, compressor: u8) -> Vec<u8> {
    let frame = inner.encode().unwrap();
    let body = &frame[HEADER_LEN..];
    let payload = match compressor {
        2 => {
            let mut enc = ZlibEncoder::new(Vec::new(), Compression::default());
            enc.write_all(body).unwrap();
            enc.finish().unwrap()
        }
        _ => body.to_vec(),
    };

    let mut out = Vec::new();
    out.extend_from_slice(&[0u8; HEADER_LEN]);
    out.extend_from_slice(&inner.op_code().as_i32().to_le_bytes());
    out.extend_from_slice(&(body.len() as i32).to_le_bytes());
    out.push(compressor);
    out.extend_from_slice(&payload);
    let header = MsgHeader {
        message_length: out.len() as i32,
        request_id: inner.header().request_id,
        response_to: inner.header().response_to,
        raw_op_code: OpCode::Compressed.as_i32(),
    };
    out[..HEADER_LEN].copy_from_slice(&header.to_bytes());
    out
}

// ── OP_COMPRESSED ───────────────────────────────────────────────

#[test]
fn zlib_compressed_msg_parses_as_inner_op() {
    let inner = find_msg(17);
    let raw = RawOp::from_frame(compress(&inner, 2)).unwrap();
    assert_eq!(raw.header.raw_op_code, OpCode::Compressed.as_i32());
    assert_eq!(raw.parse().unwrap(), inner);
}

#[test]
fn noop_compressed_msg_parses_as_inner_op() {
    let inner = find_msg(18);
    let raw = RawOp::from_frame(compress(&inner, 0)).unwrap();
    assert_eq!(raw.parse().unwrap(), inner);
}

#[test]
fn snappy_and_zstd_are_reported_unsupported() {
    let inner = find_msg(19);
    for id in [1u8, 3u8] {
        let raw = RawOp::from_frame(compress(&inner, id)).unwrap();
        assert!(matches!(
            raw.parse(),
            Err(WireError::UnsupportedCompressor { id: got }) if got == id
        ));
    }
}

#[test]
fn compressed_size_mismatch_is_malformed() {
    let inner = find_msg(20);
    let mut frame = compress(&inner, 0);
    // Bump uncompressedSize past the real payload.
    let at = HEADER_LEN + 4;
    let declared = i32::from_le_bytes(frame[at..at + 4].try_into().unwrap());
    frame[at..at + 4].copy_from_slice(&(declared + 8).to_le_bytes());
    let raw = RawOp::from_frame(frame).unwrap();
    assert!(matches!(raw.parse(), Err(WireError::Malformed { .. })));
}

// ── Malformed frames ────────────────────────────────────────────

#[test]
fn sequence_section_overrunning_frame_is_malformed() {
    let mut frame = Vec::new();
    frame.extend_from_slice(&[0u8; HEADER_LEN]);
    frame.extend_from_slice(&0u32.to_le_bytes());
    frame.push(1);
    frame.extend_from_slice(&1000i32.to_le_bytes());
    frame.extend_from_slice(b"documents\0");
    let header = MsgHeader {
        message_length: frame.len() as i32,
        request_id: 1,
        response_to: 0,
        raw_op_code: OpCode::Msg.as_i32(),
    };
    frame[..HEADER_LEN].copy_from_slice(&header.to_bytes());
    let raw = RawOp::from_frame(frame).unwrap();
    assert!(matches!(raw.parse(), Err(WireError::Malformed { .. })));
}

#[test]
fn unknown_section_kind_is_malformed() {
    let mut frame = Vec::new();
    frame.extend_from_slice(&[0u8; HEADER_LEN]);
    frame.extend_from_slice(&0u32.to_le_bytes());
    frame.push(7);
    frame.extend_from_slice(&[0u8; 8]);
    let header = MsgHeader {
        message_length: frame.len() as i32,
        request_id: 1,
        response_to: 0,
        raw_op_code: OpCode::Msg.as_i32(),
    };
    frame[..HEADER_LEN].copy_from_slice(&header.to_bytes());
    assert!(RawOp::from_frame(frame).unwrap().parse().is_err());
}

#[test]
fn command_reply_over_msg_exposes_cursor() {
    let reply = MsgOp::new(
        MsgHeader::new(OpCode::Msg, 5, 4),
        doc! { "cursor": { "id": 111_i64, "ns": "test.coll", "firstBatch": [ {}, {} ] }, "ok": 1.0 },
    );
    let raw = RawOp::from_op(&Op::Msg(reply)).unwrap();
    let op = raw.parse().unwrap();
    let replyable = op.as_replyable().unwrap();
    assert_eq!(replyable.cursor_id().unwrap(), 111);
    assert_eq!(replyable.num_returned(), 2);
}

// ── Robustness ──────────────────────────────────────────────────

proptest! {
    #[test]
    fn arbitrary_bodies_never_panic(
        op in prop::sample::select(vec![1, 2001, 2002, 2004, 2005, 2006, 2007, 2010, 2011, 2012, 2013]),
        body in prop::collection::vec(any::<u8>(), 0..256),
    ) {
        let mut frame = Vec::with_capacity(HEADER_LEN + body.len());
        let header = MsgHeader {
            message_length: (HEADER_LEN + body.len()) as i32,
            request_id: 1,
            response_to: 0,
            raw_op_code: op,
        };
        frame.extend_from_slice(&header.to_bytes());
        frame.extend_from_slice(&body);
        let _ = RawOp::from_frame(frame).unwrap().parse();
    }

    #[test]
    fn getmore_cursor_rewrite_survives_reencode(recorded in any::<i64>(), live in any::<i64>()) {
        let mut op = Op::Msg(MsgOp::new(
            MsgHeader::new(OpCode::Msg, 9, 0),
            doc! { "getMore": recorded, "collection": "c", "$db": "test" },
        ));
        op.as_cursor_bearing_mut().unwrap().set_cursor_ids(&[live]).unwrap();
        let parsed = RawOp::from_op(&op).unwrap().parse().unwrap();
        let ids = parsed.as_cursor_bearing().unwrap().cursor_ids().unwrap();
        prop_assert_eq!(ids.as_slice(), &[live]);
    }
}
