//! Binary codec
//!
//! Deterministic big-endian encoding shared by every consensus structure.
//! Encoding never fails; decoding any malformed input yields
//! `CodecError::CorruptedEncoding` and nothing is partially applied.

use thiserror::Error;

/// Decoding errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Corrupted encoding: {0}")]
    CorruptedEncoding(&'static str),
}

/// Cursor over an encoded buffer
pub struct ByteReader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> ByteReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    /// Take the next `count` bytes
    pub fn read(&mut self, count: usize) -> Result<&'a [u8], CodecError> {
        let end = self
            .pos
            .checked_add(count)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(CodecError::CorruptedEncoding("truncated buffer"))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    /// Take a fixed-size array
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u16(&mut self) -> Result<u16, CodecError> {
        Ok(u16::from_be_bytes(self.read_array()?))
    }

    pub fn read_u32(&mut self) -> Result<u32, CodecError> {
        Ok(u32::from_be_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64, CodecError> {
        Ok(u64::from_be_bytes(self.read_array()?))
    }

    /// Bytes prefixed with a 1-byte length
    pub fn read_short_bytes(&mut self) -> Result<&'a [u8], CodecError> {
        let len = self.read_u8()? as usize;
        self.read(len)
    }

    /// ASCII string prefixed with a 1-byte length
    pub fn read_ascii(&mut self) -> Result<String, CodecError> {
        let raw = self.read_short_bytes()?;
        if !raw.is_ascii() {
            return Err(CodecError::CorruptedEncoding("non-ascii text"));
        }
        // ASCII is always valid UTF-8
        String::from_utf8(raw.to_vec()).map_err(|_| CodecError::CorruptedEncoding("non-ascii text"))
    }

    /// Whatever is left in the buffer
    pub fn read_rest(&mut self) -> &'a [u8] {
        let rest = &self.bytes[self.pos..];
        self.pos = self.bytes.len();
        rest
    }

    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.pos
    }

    /// Fail if any bytes were left unread
    pub fn finish(&self) -> Result<(), CodecError> {
        if self.remaining() == 0 {
            Ok(())
        } else {
            Err(CodecError::CorruptedEncoding("trailing bytes"))
        }
    }
}

/// Append bytes prefixed with a 1-byte length.
///
/// Callers check `bytes.len() <= 255` before encoding (see
/// `Transaction::is_well_formed`). Debug builds panic on longer input;
/// release builds truncate so the encoding stays self-consistent.
pub fn write_short_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    debug_assert!(bytes.len() <= u8::MAX as usize, "short field of {} bytes", bytes.len());
    let len = bytes.len().min(u8::MAX as usize);
    out.push(len as u8);
    out.extend_from_slice(&bytes[..len]);
}

/// Append `items` framed as a `u32` count followed by `u32` length + bytes each
pub fn write_framed_list<T, F>(out: &mut Vec<u8>, items: &[T], mut encode: F)
where
    F: FnMut(&T) -> Vec<u8>,
{
    out.extend_from_slice(&(items.len() as u32).to_be_bytes());
    for item in items {
        let encoded = encode(item);
        out.extend_from_slice(&(encoded.len() as u32).to_be_bytes());
        out.extend_from_slice(&encoded);
    }
}

/// Inverse of [`write_framed_list`]; every frame must be consumed exactly
pub fn read_framed_list<T, F>(bytes: &[u8], mut decode: F) -> Result<Vec<T>, CodecError>
where
    F: FnMut(&[u8]) -> Result<T, CodecError>,
{
    let mut reader = ByteReader::new(bytes);
    let count = reader.read_u32()? as usize;
    // Each frame costs at least its 4-byte length
    if count > reader.remaining() / 4 {
        return Err(CodecError::CorruptedEncoding("list count exceeds buffer"));
    }
    let mut items = Vec::with_capacity(count);
    for _ in 0..count {
        let len = reader.read_u32()? as usize;
        items.push(decode(reader.read(len)?)?);
    }
    reader.finish()?;
    Ok(items)
}
