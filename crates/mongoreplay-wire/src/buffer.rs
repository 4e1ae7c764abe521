//! Bounded body reader and primitive writers.
//!
//! A [`BodyReader`] walks the body bytes of exactly one frame. Every read
//! is bounds-checked against the frame, so a decoder can never consume
//! bytes belonging to the next message.

use bson::Document;

use crate::error::WireError;

// ── Primitive writers ───────────────────────────────────────────

/// Append a little-endian i32.
pub fn put_i32(buf: &mut Vec<u8>, v: i32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Append a little-endian u32.
pub fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Append a little-endian i64.
pub fn put_i64(buf: &mut Vec<u8>, v: i64) {
    buf.extend_from_slice(&v.to_le_bytes());
}

/// Append a null-terminated string.
pub fn put_cstring(buf: &mut Vec<u8>, s: &str) {
    buf.extend_from_slice(s.as_bytes());
    buf.push(0);
}

/// Append a BSON document.
pub fn put_document(buf: &mut Vec<u8>, doc: &Document) -> Result<(), WireError> {
    doc.to_writer(buf)?;
    Ok(())
}

// ── BodyReader ──────────────────────────────────────────────────

/// Cursor over the body of a single frame.
#[derive(Debug)]
pub struct BodyReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> BodyReader<'a> {
    /// Wrap a frame body (everything after the 16-byte header).
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    /// Bytes not yet consumed.
    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    /// Whether every byte has been consumed.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Current offset from the start of the body.
    pub fn position(&self) -> usize {
        self.pos
    }

    fn take(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::Truncated {
                field,
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    /// Read a single byte.
    pub fn read_u8(&mut self, field: &'static str) -> Result<u8, WireError> {
        Ok(self.take(1, field)?[0])
    }

    /// Read a little-endian i32.
    pub fn read_i32(&mut self, field: &'static str) -> Result<i32, WireError> {
        let b = self.take(4, field)?;
        Ok(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a little-endian u32.
    pub fn read_u32(&mut self, field: &'static str) -> Result<u32, WireError> {
        let b = self.take(4, field)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    /// Read a little-endian i64.
    pub fn read_i64(&mut self, field: &'static str) -> Result<i64, WireError> {
        let b = self.take(8, field)?;
        let mut arr = [0u8; 8];
        arr.copy_from_slice(b);
        Ok(i64::from_le_bytes(arr))
    }

    /// Read `n` raw bytes.
    pub fn read_bytes(&mut self, n: usize, field: &'static str) -> Result<&'a [u8], WireError> {
        self.take(n, field)
    }

    /// Read a null-terminated UTF-8 string.
    pub fn read_cstring(&mut self, field: &'static str) -> Result<String, WireError> {
        let rest = &self.data[self.pos..];
        let nul = rest.iter().position(|&b| b == 0).ok_or(WireError::Truncated {
            field,
            needed: rest.len() + 1,
            remaining: rest.len(),
        })?;
        let s = std::str::from_utf8(&rest[..nul]).map_err(|e| WireError::Malformed {
            detail: format!("{field} is not UTF-8: {e}"),
        })?;
        self.pos += nul + 1;
        Ok(s.to_owned())
    }

    /// Read one BSON document, checking its declared length against the frame.
    pub fn read_document(&mut self, field: &'static str) -> Result<Document, WireError> {
        if self.remaining() < 4 {
            return Err(WireError::Truncated {
                field,
                needed: 4,
                remaining: self.remaining(),
            });
        }
        let p = self.pos;
        let len = i32::from_le_bytes([
            self.data[p],
            self.data[p + 1],
            self.data[p + 2],
            self.data[p + 3],
        ]);
        if len < 5 {
            return Err(WireError::Malformed {
                detail: format!("{field} declares impossible length {len}"),
            });
        }
        let bytes = self.take(len as usize, field)?;
        Ok(Document::from_reader(bytes)?)
    }

    /// Read documents until the body offset `end` is reached.
    pub fn read_documents_until(
        &mut self,
        end: usize,
        field: &'static str,
    ) -> Result<Vec<Document>, WireError> {
        let mut docs = Vec::new();
        while self.pos < end {
            let doc = self.read_document(field)?;
            if self.pos > end {
                return Err(WireError::Malformed {
                    detail: format!("{field} overruns its enclosing section"),
                });
            }
            docs.push(doc);
        }
        Ok(docs)
    }

    /// Fail if any body bytes were left unconsumed.
    pub fn finish(&self, op_code: i32) -> Result<(), WireError> {
        if self.is_empty() {
            Ok(())
        } else {
            Err(WireError::TrailingBytes {
                op_code,
                remaining: self.remaining(),
            })
        }
    }
}
