//! Compact binary encoding for postings and the term dictionary.
//!
//! Integers are LEB128 varints. A postings list is written as
//!
//! ```text
//! count
//! repeat count times:
//!     doc_id - previous_doc_id      (first entry: doc_id itself)
//!     term_frequency
//!     repeat term_frequency times:
//!         position - previous_position   (first: position itself)
//! ```

use crate::error::{EngineError, Result};
use crate::postings::{Posting, PostingsList};

/// Upper bound on a u64 varint.
pub const MAX_VARINT_BYTES: usize = 10;

pub fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            break;
        }
        buf.push(byte | 0x80);
    }
}

pub fn write_str(buf: &mut Vec<u8>, s: &str) {
    write_varint(buf, s.len() as u64);
    buf.extend_from_slice(s.as_bytes());
}

/// Cursor over an encoded buffer.
#[derive(Debug)]
pub struct ByteReader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn is_empty(&self) -> bool {
        self.pos >= self.buf.len()
    }

    pub fn read_varint(&mut self) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0;
        for i in 0..MAX_VARINT_BYTES {
            let byte = *self
                .buf
                .get(self.pos + i)
                .ok_or_else(|| EngineError::corrupt("incomplete varint"))?;
            result |= ((byte & 0x7F) as u64) << shift;
            if byte & 0x80 == 0 {
                self.pos += i + 1;
                return Ok(result);
            }
            shift += 7;
        }
        Err(EngineError::corrupt("varint exceeds maximum length"))
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        let v = self.read_varint()?;
        u32::try_from(v).map_err(|_| EngineError::corrupt(format!("value {v} does not fit in u32")))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.buf.len())
            .ok_or_else(|| EngineError::corrupt("unexpected end of buffer"))?;
        let out = &self.buf[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    pub fn read_str(&mut self) -> Result<&'a str> {
        let len = self.read_varint()? as usize;
        let bytes = self.read_bytes(len)?;
        std::str::from_utf8(bytes).map_err(|e| EngineError::corrupt(format!("invalid UTF-8 in term: {e}")))
    }
}

pub fn encode_postings(list: &PostingsList, buf: &mut Vec<u8>) {
    write_varint(buf, list.len() as u64);
    let mut prev_doc = 0u32;
    for (i, posting) in list.iter().enumerate() {
        let delta = if i == 0 { posting.doc_id } else { posting.doc_id - prev_doc };
        write_varint(buf, delta as u64);
        prev_doc = posting.doc_id;

        write_varint(buf, posting.term_frequency() as u64);
        let mut prev_pos = 0u32;
        for &pos in &posting.positions {
            write_varint(buf, (pos - prev_pos) as u64);
            prev_pos = pos;
        }
    }
}

pub fn decode_postings(reader: &mut ByteReader<'_>) -> Result<PostingsList> {
    let count = reader.read_varint()? as usize;
    let mut postings = Vec::with_capacity(count.min(1 << 16));
    let mut prev_doc: Option<u32> = None;
    for _ in 0..count {
        let delta = reader.read_u32()?;
        let doc_id = match prev_doc {
            None => delta,
            Some(_) if delta == 0 => return Err(EngineError::corrupt("duplicate document in postings list")),
            Some(prev) => prev
                .checked_add(delta)
                .ok_or_else(|| EngineError::corrupt("document id overflow"))?,
        };
        prev_doc = Some(doc_id);

        let tf = reader.read_varint()? as usize;
        let mut positions = Vec::with_capacity(tf.min(1 << 12));
        let mut pos = 0u32;
        for _ in 0..tf {
            pos = pos
                .checked_add(reader.read_u32()?)
                .ok_or_else(|| EngineError::corrupt("position overflow"))?;
            positions.push(pos);
        }
        postings.push(Posting { doc_id, positions });
    }
    PostingsList::from_sorted(postings).ok_or_else(|| EngineError::corrupt("postings out of order"))
}
