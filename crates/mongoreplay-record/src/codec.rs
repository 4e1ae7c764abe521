//! Document conversion and raw BSON stream framing.
//!
//! Every field is written explicitly with lowercase keys. Decoding accepts
//! any integer width for numeric fields so files written by other tools
//! still load.

use std::io::{self, Read, Write};

use bson::spec::BinarySubtype;
use bson::{Binary, Bson, Document};

use mongoreplay_wire::cursor::bson_as_i64;
use mongoreplay_wire::{MsgHeader, RawOp};

use crate::error::RecordError;
use crate::time::PreciseTime;
use crate::types::{PlaybackFileMetadata, RecordedOp};

// ── Raw stream framing ──────────────────────────────────────────

/// Read the bytes of the next BSON document, or `None` at a clean end of
/// stream.
pub fn read_raw_document<R: Read + ?Sized>(r: &mut R) -> Result<Option<Vec<u8>>, RecordError> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        match r.read(&mut len_buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => {
                return Err(RecordError::Truncated {
                    needed: 4,
                    available: filled,
                })
            }
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    let len = i32::from_le_bytes(len_buf);
    if len < 5 {
        return Err(RecordError::InvalidField {
            field: "document length",
            detail: format!("{len} is smaller than an empty document"),
        });
    }
    let len = len as usize;
    let mut buf = vec![0u8; len];
    buf[..4].copy_from_slice(&len_buf);
    let mut got = 4;
    while got < len {
        match r.read(&mut buf[got..]) {
            Ok(0) => {
                return Err(RecordError::Truncated {
                    needed: len,
                    available: got,
                })
            }
            Ok(n) => got += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(Some(buf))
}

/// Read and decode the next document, or `None` at a clean end of stream.
pub fn read_document<R: Read + ?Sized>(r: &mut R) -> Result<Option<Document>, RecordError> {
    match read_raw_document(r)? {
        Some(bytes) => Ok(Some(Document::from_reader(bytes.as_slice())?)),
        None => Ok(None),
    }
}

/// Encode `doc` onto `w`.
pub fn write_document<W: Write + ?Sized>(w: &mut W, doc: &Document) -> Result<(), RecordError> {
    let mut buf = Vec::with_capacity(256);
    doc.to_writer(&mut buf)?;
    w.write_all(&buf)?;
    Ok(())
}

// ── Field helpers ───────────────────────────────────────────────

fn get_i64(doc: &Document, field: &'static str) -> Result<i64, RecordError> {
    let v = doc.get(field).ok_or(RecordError::MissingField { field })?;
    bson_as_i64(v).ok_or_else(|| RecordError::InvalidField {
        field,
        detail: format!("expected an integer, found {v}"),
    })
}

fn get_i32(doc: &Document, field: &'static str) -> Result<i32, RecordError> {
    let v = get_i64(doc, field)?;
    i32::try_from(v).map_err(|_| RecordError::InvalidField {
        field,
        detail: format!("{v} does not fit in 32 bits"),
    })
}

fn get_opt_i64(doc: &Document, field: &'static str) -> Result<i64, RecordError> {
    if doc.contains_key(field) {
        get_i64(doc, field)
    } else {
        Ok(0)
    }
}

fn get_string(doc: &Document, field: &'static str) -> Result<String, RecordError> {
    match doc.get(field) {
        None | Some(Bson::Null) => Ok(String::new()),
        Some(Bson::String(s)) => Ok(s.clone()),
        Some(other) => Err(RecordError::InvalidField {
            field,
            detail: format!("expected a string, found {other}"),
        }),
    }
}

fn get_bool(doc: &Document, field: &'static str) -> bool {
    matches!(doc.get(field), Some(Bson::Boolean(true)))
}

// ── PreciseTime ─────────────────────────────────────────────────

fn time_to_bson(t: PreciseTime) -> Bson {
    let mut d = Document::new();
    d.insert("sec", t.sec());
    d.insert("nsec", t.nsec());
    Bson::Document(d)
}

fn time_from_doc(doc: &Document, field: &'static str) -> Result<Option<PreciseTime>, RecordError> {
    match doc.get(field) {
        None | Some(Bson::Null) => Ok(None),
        Some(Bson::Document(t)) => Ok(Some(PreciseTime::new(
            get_i64(t, "sec")?,
            get_i64(t, "nsec")?,
        ))),
        Some(Bson::DateTime(dt)) => {
            let ms = dt.timestamp_millis();
            Ok(Some(PreciseTime::new(
                ms.div_euclid(1000),
                ms.rem_euclid(1000) * 1_000_000,
            )))
        }
        Some(other) => Err(RecordError::InvalidField {
            field,
            detail: format!("expected a timestamp, found {other}"),
        }),
    }
}

// ── Metadata ────────────────────────────────────────────────────

/// Encode the recording header.
pub fn metadata_to_document(meta: &PlaybackFileMetadata) -> Document {
    let mut d = Document::new();
    d.insert("playbackfileversion", meta.playback_file_version);
    d.insert("driveropsfiltered", meta.driver_ops_filtered);
    d
}

/// Decode the recording header.
pub fn metadata_from_document(doc: &Document) -> Result<PlaybackFileMetadata, RecordError> {
    Ok(PlaybackFileMetadata {
        playback_file_version: get_i32(doc, "playbackfileversion")?,
        driver_ops_filtered: get_bool(doc, "driveropsfiltered"),
    })
}

// ── RecordedOp ──────────────────────────────────────────────────

fn header_to_bson(h: &MsgHeader) -> Bson {
    let mut d = Document::new();
    d.insert("messagelength", h.message_length);
    d.insert("requestid", h.request_id);
    d.insert("responseto", h.response_to);
    d.insert("opcode", h.raw_op_code);
    Bson::Document(d)
}

fn header_from_doc(doc: &Document) -> Result<MsgHeader, RecordError> {
    Ok(MsgHeader {
        message_length: get_i32(doc, "messagelength")?,
        request_id: get_i32(doc, "requestid")?,
        response_to: get_i32(doc, "responseto")?,
        raw_op_code: get_i32(doc, "opcode")?,
    })
}

/// Encode one recorded op.
pub fn op_to_document(op: &RecordedOp) -> Document {
    let mut raw = Document::new();
    raw.insert("header", header_to_bson(&op.raw.header));
    raw.insert(
        "body",
        Binary {
            subtype: BinarySubtype::Generic,
            bytes: op.raw.body.clone(),
        },
    );

    let mut d = Document::new();
    d.insert("rawop", raw);
    d.insert("seen", time_to_bson(op.seen));
    if let Some(t) = op.play_at {
        d.insert("playat", time_to_bson(t));
    }
    if op.eof {
        d.insert("eof", true);
    }
    d.insert("srcendpoint", op.src_endpoint.as_str());
    d.insert("dstendpoint", op.dst_endpoint.as_str());
    d.insert("seenconnectionnum", op.seen_connection_num);
    d.insert("playedconnectionnum", op.played_connection_num);
    if let Some(t) = op.played_at {
        d.insert("playedat", time_to_bson(t));
    }
    d.insert("generation", op.generation);
    d.insert("order", op.order);
    d
}

/// Decode one recorded op.
pub fn op_from_document(doc: &Document) -> Result<RecordedOp, RecordError> {
    let raw_doc = doc
        .get_document("rawop")
        .map_err(|_| RecordError::MissingField { field: "rawop" })?;
    let header = match raw_doc.get_document("header") {
        Ok(h) => header_from_doc(h)?,
        Err(_) => MsgHeader::default(),
    };
    let body = match raw_doc.get("body") {
        Some(Bson::Binary(b)) => b.bytes.clone(),
        None | Some(Bson::Null) => Vec::new(),
        Some(other) => {
            return Err(RecordError::InvalidField {
                field: "rawop.body",
                detail: format!("expected binary data, found {other}"),
            })
        }
    };

    Ok(RecordedOp {
        raw: RawOp { header, body },
        seen: time_from_doc(doc, "seen")?.ok_or(RecordError::MissingField { field: "seen" })?,
        play_at: time_from_doc(doc, "playat")?,
        eof: get_bool(doc, "eof"),
        src_endpoint: get_string(doc, "srcendpoint")?,
        dst_endpoint: get_string(doc, "dstendpoint")?,
        seen_connection_num: get_opt_i64(doc, "seenconnectionnum")?,
        played_connection_num: get_opt_i64(doc, "playedconnectionnum")?,
        played_at: time_from_doc(doc, "playedat")?,
        generation: i32::try_from(get_opt_i64(doc, "generation")?).map_err(|_| {
            RecordError::InvalidField {
                field: "generation",
                detail: "out of range".into(),
            }
        })?,
        order: get_opt_i64(doc, "order")?,
    })
}

/// Decode one recorded op straight from its document bytes.
pub fn op_from_bytes(bytes: &[u8]) -> Result<RecordedOp, RecordError> {
    op_from_document(&Document::from_reader(bytes)?)
}
