//! Field-tagged payload primitives.
//!
//! Payloads are protobuf-shaped: a sequence of fields, each headed by
//! `(field_number << 3) | wire_type`. Wire types used on this protocol are
//! varint (0), 64-bit fixed (1), length-delimited (2) and 32-bit fixed (5).
//! Decoding borrows from the input buffer and never copies payload bytes;
//! truncation or overflow is a terminal [`PanelError::Codec`].

use gridpanel_error::{PanelError, PanelResult};

/// Longest legal varint: 10 bytes of 7 payload bits each.
const VARINT_MAX_BYTES: usize = 10;

/// One decoded field value, borrowing the payload buffer.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Varint(u64),
    Fixed64(u64),
    Bytes(&'a [u8]),
    Fixed32(u32),
}

impl<'a> FieldValue<'a> {
    pub fn as_varint(&self) -> Option<u64> {
        match self {
            FieldValue::Varint(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&'a [u8]> {
        match self {
            FieldValue::Bytes(b) => Some(b),
            _ => None,
        }
    }
}

/// Decode a varint at `offset`, advancing it past the value.
pub fn read_varint(data: &[u8], offset: &mut usize) -> PanelResult<u64> {
    let mut result: u64 = 0;
    let mut shift = 0u32;
    let mut consumed = 0usize;
    loop {
        let byte = *data
            .get(*offset + consumed)
            .ok_or_else(|| PanelError::Codec("truncated varint".into()))?;
        consumed += 1;
        if consumed > VARINT_MAX_BYTES {
            return Err(PanelError::Codec("varint overflows 64 bits".into()));
        }
        result |= u64::from(byte & 0x7F)
            .checked_shl(shift)
            .ok_or_else(|| PanelError::Codec("varint overflows 64 bits".into()))?;
        if byte & 0x80 == 0 {
            break;
        }
        shift += 7;
    }
    *offset += consumed;
    Ok(result)
}

/// Iterator over `(field_number, value)` pairs of a payload.
///
/// Unknown field numbers are the caller's business to skip; unknown wire
/// types terminate the scan with a codec error.
pub struct FieldReader<'a> {
    data: &'a [u8],
    offset: usize,
}

impl<'a> FieldReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, offset: 0 }
    }

    fn read_field(&mut self) -> PanelResult<(u32, FieldValue<'a>)> {
        let tag = read_varint(self.data, &mut self.offset)?;
        let field_number = (tag >> 3) as u32;
        let wire_type = (tag & 0x07) as u8;
        let value = match wire_type {
            0 => FieldValue::Varint(read_varint(self.data, &mut self.offset)?),
            1 => {
                let end = self.offset + 8;
                let bytes = self
                    .data
                    .get(self.offset..end)
                    .ok_or_else(|| PanelError::Codec("truncated 64-bit field".into()))?;
                self.offset = end;
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                FieldValue::Fixed64(u64::from_le_bytes(raw))
            }
            2 => {
                let len = read_varint(self.data, &mut self.offset)? as usize;
                let end = self
                    .offset
                    .checked_add(len)
                    .ok_or_else(|| PanelError::Codec("length-delimited field overflows".into()))?;
                let bytes = self
                    .data
                    .get(self.offset..end)
                    .ok_or_else(|| PanelError::Codec("truncated length-delimited field".into()))?;
                self.offset = end;
                FieldValue::Bytes(bytes)
            }
            5 => {
                let end = self.offset + 4;
                let bytes = self
                    .data
                    .get(self.offset..end)
                    .ok_or_else(|| PanelError::Codec("truncated 32-bit field".into()))?;
                self.offset = end;
                let mut raw = [0u8; 4];
                raw.copy_from_slice(bytes);
                FieldValue::Fixed32(u32::from_le_bytes(raw))
            }
            other => {
                return Err(PanelError::Codec(format!(
                    "unsupported wire type {other} for field {field_number}"
                )))
            }
        };
        Ok((field_number, value))
    }
}

impl<'a> Iterator for FieldReader<'a> {
    type Item = PanelResult<(u32, FieldValue<'a>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.data.len() {
            return None;
        }
        match self.read_field() {
            Ok(field) => Some(Ok(field)),
            Err(e) => {
                // Poison the reader so a malformed tail yields exactly one error.
                self.offset = self.data.len();
                Some(Err(e))
            }
        }
    }
}

/// First value of `field_number`, if present.
pub fn first_field<'a>(data: &'a [u8], field_number: u32) -> PanelResult<Option<FieldValue<'a>>> {
    for field in FieldReader::new(data) {
        let (num, value) = field?;
        if num == field_number {
            return Ok(Some(value));
        }
    }
    Ok(None)
}

/// First length-delimited value of `field_number`, if present.
pub fn first_bytes<'a>(data: &'a [u8], field_number: u32) -> PanelResult<Option<&'a [u8]>> {
    Ok(first_field(data, field_number)?.and_then(|v| v.as_bytes()))
}

/// First varint value of `field_number`, if present.
pub fn first_varint(data: &[u8], field_number: u32) -> PanelResult<Option<u64>> {
    Ok(first_field(data, field_number)?.and_then(|v| v.as_varint()))
}

pub fn put_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value > 0x7F {
        buf.push((value as u8 & 0x7F) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}

pub fn put_varint_field(buf: &mut Vec<u8>, field_number: u32, value: u64) {
    put_varint(buf, u64::from(field_number) << 3);
    put_varint(buf, value);
}

pub fn put_bytes_field(buf: &mut Vec<u8>, field_number: u32, value: &[u8]) {
    put_varint(buf, (u64::from(field_number) << 3) | 2);
    put_varint(buf, value.len() as u64);
    buf.extend_from_slice(value);
}

pub fn put_string_field(buf: &mut Vec<u8>, field_number: u32, value: &str) {
    put_bytes_field(buf, field_number, value.as_bytes());
}
