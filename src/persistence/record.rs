//! Log record layout shared by message logs and redelivery ledgers.
//!
//! ```text
//! [type:1][id-length:1][id bytes][content-length:varint][content bytes]
//! ```
//!
//! A zero-filled region decodes as a run of three-byte `Empty` records, so a
//! preallocated or zeroed tail never breaks replay.

use bytes::{Buf, BufMut, Bytes};

use super::varint::{self, VarintError};

/// Ids are length-prefixed with a single byte.
pub const MAX_ID_LEN: usize = u8::MAX as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordType {
    Empty = 0x00,
    Insert = 0x10,
    Delete = 0x11,
}

impl RecordType {
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0x00 => Some(Self::Empty),
            0x10 => Some(Self::Insert),
            0x11 => Some(Self::Delete),
            _ => None,
        }
    }
}

/// One entry of a log file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub kind: RecordType,
    pub id: String,
    pub content: Bytes,
}

/// Why a record could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The buffer ends inside the record (torn write).
    Incomplete,
    /// The record is framed correctly but its contents are unusable; `len`
    /// bytes can be skipped to reach the next record.
    Corrupt { len: usize, reason: String },
    /// The framing itself is broken; nothing after this point can be trusted.
    Unframed(String),
}

impl Record {
    pub fn insert(id: impl Into<String>, content: impl Into<Bytes>) -> Self {
        Self {
            kind: RecordType::Insert,
            id: id.into(),
            content: content.into(),
        }
    }

    pub fn delete(id: impl Into<String>) -> Self {
        Self {
            kind: RecordType::Delete,
            id: id.into(),
            content: Bytes::new(),
        }
    }

    pub fn encoded_len(&self) -> usize {
        2 + self.id.len() + varint::size(self.content.len() as u64) + self.content.len()
    }

    /// Appends the encoded record to `buf`. Fails only for over-long ids.
    pub fn encode(&self, buf: &mut impl BufMut) -> Result<(), String> {
        if self.id.len() > MAX_ID_LEN {
            return Err(format!(
                "id of {} bytes exceeds the {MAX_ID_LEN} byte limit",
                self.id.len()
            ));
        }
        buf.put_u8(self.kind as u8);
        buf.put_u8(self.id.len() as u8);
        buf.put_slice(self.id.as_bytes());
        varint::write(self.content.len() as u64, buf);
        buf.put_slice(&self.content);
        Ok(())
    }

    /// Decodes the record at the start of `input`, returning it together with
    /// the number of bytes it occupied.
    pub fn decode(input: &Bytes) -> Result<(Record, usize), DecodeError> {
        let mut buf = input.clone();
        if buf.remaining() < 2 {
            return Err(DecodeError::Incomplete);
        }
        let type_byte = buf.get_u8();
        let id_len = buf.get_u8() as usize;
        if buf.remaining() < id_len {
            return Err(DecodeError::Incomplete);
        }
        let id_bytes = buf.split_to(id_len);
        let content_len = match varint::read(&mut buf) {
            Ok(len) => len,
            Err(VarintError::EndOfBuffer) => return Err(DecodeError::Incomplete),
            Err(VarintError::Overflow) => {
                return Err(DecodeError::Unframed("content length overflows".into()));
            }
        };
        let content_len = usize::try_from(content_len)
            .map_err(|_| DecodeError::Unframed("content length too large".into()))?;
        if buf.remaining() < content_len {
            return Err(DecodeError::Incomplete);
        }
        let content = buf.split_to(content_len);
        let consumed = input.len() - buf.remaining();

        let Some(kind) = RecordType::from_byte(type_byte) else {
            return Err(DecodeError::Corrupt {
                len: consumed,
                reason: format!("unknown record type 0x{type_byte:02x}"),
            });
        };
        let id = match String::from_utf8(id_bytes.to_vec()) {
            Ok(id) => id,
            Err(_) => {
                return Err(DecodeError::Corrupt {
                    len: consumed,
                    reason: "id is not valid utf-8".into(),
                });
            }
        };
        if kind != RecordType::Empty && id.is_empty() {
            return Err(DecodeError::Corrupt {
                len: consumed,
                reason: "record without id".into(),
            });
        }

        Ok((Record { kind, id, content }, consumed))
    }
}
