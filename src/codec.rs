//! Wire codec for [`Update`].
//!
//! One update per datagram, little-endian:
//!
//! ```text
//! Data: 0x00 | payload_len: u32 | payload
//! Join: 0x01 | identity_len: u8 | identity | address_len: u8 | address
//! ```
//!
//! Decoding is the boundary where bytes from the network enter the
//! process, so every declared length is checked against what is left in
//! the buffer before anything is sliced.

use thiserror::Error;

use crate::types::Update;

/// Largest payload a single UDP datagram can carry over IPv4.
pub const MAX_DATAGRAM_SIZE: usize = 65_507;

const TAG_DATA: u8 = 0;
const TAG_JOIN: u8 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EncodeError {
    #[error("payload of {0} bytes overflows the u32 length field")]
    PayloadTooLarge(usize),
    #[error("{field} of {len} bytes is longer than 255 bytes")]
    FieldTooLong { field: &'static str, len: usize },
    #[error("encoded update of {0} bytes does not fit in one datagram")]
    DatagramTooLarge(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("empty datagram")]
    Empty,
    #[error("unknown type tag {0}")]
    UnknownTag(u8),
    #[error("{field} needs {needed} bytes but only {remaining} remain")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },
    #[error("{field} is not valid UTF-8")]
    InvalidUtf8 { field: &'static str },
    #[error("{0} unexpected bytes after the update")]
    TrailingBytes(usize),
}

/// Serialize an update into a single datagram.
pub fn encode(update: &Update) -> Result<Vec<u8>, EncodeError> {
    match update {
        Update::Data { payload } => {
            let len = u32::try_from(payload.len())
                .map_err(|_| EncodeError::PayloadTooLarge(payload.len()))?;
            check_size(1 + 4 + payload.len())?;

            let mut buf = Vec::with_capacity(1 + 4 + payload.len());
            buf.push(TAG_DATA);
            buf.extend_from_slice(&len.to_le_bytes());
            buf.extend_from_slice(payload);
            Ok(buf)
        }
        Update::Join { identity, address } => {
            check_size(1 + 1 + identity.len() + 1 + address.len())?;

            let mut buf = Vec::with_capacity(3 + identity.len() + address.len());
            buf.push(TAG_JOIN);
            put_short_str(&mut buf, "identity", identity)?;
            put_short_str(&mut buf, "address", address)?;
            Ok(buf)
        }
    }
}

/// Parse one datagram.  Never panics, whatever the input.
pub fn decode(buf: &[u8]) -> Result<Update, DecodeError> {
    let (&tag, rest) = buf.split_first().ok_or(DecodeError::Empty)?;
    let mut reader = Reader { buf: rest };

    let update = match tag {
        TAG_DATA => {
            let len = reader.u32_le("payload_len")? as usize;
            let payload = reader.take("payload", len)?.to_vec();
            Update::Data { payload }
        }
        TAG_JOIN => {
            let identity = reader.short_str("identity")?;
            let address = reader.short_str("address")?;
            Update::Join { identity, address }
        }
        other => return Err(DecodeError::UnknownTag(other)),
    };

    if !reader.buf.is_empty() {
        return Err(DecodeError::TrailingBytes(reader.buf.len()));
    }
    Ok(update)
}

fn check_size(len: usize) -> Result<(), EncodeError> {
    if len > MAX_DATAGRAM_SIZE {
        return Err(EncodeError::DatagramTooLarge(len));
    }
    Ok(())
}

fn put_short_str(buf: &mut Vec<u8>, field: &'static str, value: &str) -> Result<(), EncodeError> {
    let len = u8::try_from(value.len()).map_err(|_| EncodeError::FieldTooLong {
        field,
        len: value.len(),
    })?;
    buf.push(len);
    buf.extend_from_slice(value.as_bytes());
    Ok(())
}

/// Cursor over the unread part of a datagram.
struct Reader<'a> {
    buf: &'a [u8],
}

impl<'a> Reader<'a> {
    fn take(&mut self, field: &'static str, len: usize) -> Result<&'a [u8], DecodeError> {
        if self.buf.len() < len {
            return Err(DecodeError::Truncated {
                field,
                needed: len,
                remaining: self.buf.len(),
            });
        }
        let (head, tail) = self.buf.split_at(len);
        self.buf = tail;
        Ok(head)
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        Ok(self.take(field, 1)?[0])
    }

    fn u32_le(&mut self, field: &'static str) -> Result<u32, DecodeError> {
        let bytes = self.take(field, 4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    fn short_str(&mut self, field: &'static str) -> Result<String, DecodeError> {
        let len = self.u8(field)? as usize;
        let bytes = self.take(field, len)?;
        std::str::from_utf8(bytes)
            .map(str::to_owned)
            .map_err(|_| DecodeError::InvalidUtf8 { field })
    }
}
