//! Transaction payload
//!
//! Opaque to consensus: carried, hashed and serialized, never interpreted.

use crate::codec::{ByteReader, CodecError};
use crate::crypto::{hash_bytes, Hash};

/// Nesting limit for lists and maps when decoding untrusted bytes
const MAX_DEPTH: usize = 32;

/// Tagged payload value
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Data {
    #[default]
    None,
    String(String),
    Blob(Vec<u8>),
    Decimal(u64),
    Boolean(bool),
    List(Vec<Data>),
    /// Ordered pairs; keys need not be unique
    Map(Vec<(Data, Data)>),
}

impl Data {
    fn tag(&self) -> u8 {
        match self {
            Data::None => 0,
            Data::String(_) => 1,
            Data::Blob(_) => 2,
            Data::Decimal(_) => 3,
            Data::Boolean(_) => 4,
            Data::List(_) => 5,
            Data::Map(_) => 6,
        }
    }

    /// Whether every length and count fits its `u16` prefix
    pub fn is_encodable(&self) -> bool {
        let limit = u16::MAX as usize;
        match self {
            Data::None | Data::Decimal(_) | Data::Boolean(_) => true,
            Data::String(s) => s.len() <= limit,
            Data::Blob(b) => b.len() <= limit,
            Data::List(items) => items.len() <= limit && items.iter().all(Data::is_encodable),
            Data::Map(pairs) => pairs.len() <= limit && pairs.iter().all(|(k, v)| k.is_encodable() && v.is_encodable()),
        }
    }

    /// Append the encoding. Variable-length bodies carry a `u16` length.
    /// Values failing [`Data::is_encodable`] panic in debug builds and are
    /// truncated in release builds.
    pub fn write(&self, out: &mut Vec<u8>) {
        out.push(self.tag());
        match self {
            Data::None => {}
            Data::String(s) => write_long_bytes(out, s.as_bytes()),
            Data::Blob(b) => write_long_bytes(out, b),
            Data::Decimal(n) => out.extend_from_slice(&n.to_be_bytes()),
            Data::Boolean(b) => out.push(u8::from(*b)),
            Data::List(items) => {
                debug_assert!(items.len() <= u16::MAX as usize, "list of {} items", items.len());
                let count = items.len().min(u16::MAX as usize);
                out.extend_from_slice(&(count as u16).to_be_bytes());
                for item in &items[..count] {
                    item.write(out);
                }
            }
            Data::Map(pairs) => {
                debug_assert!(pairs.len() <= u16::MAX as usize, "map of {} pairs", pairs.len());
                let count = pairs.len().min(u16::MAX as usize);
                out.extend_from_slice(&(count as u16).to_be_bytes());
                for (k, v) in &pairs[..count] {
                    k.write(out);
                    v.write(out);
                }
            }
        }
    }

    pub fn read(reader: &mut ByteReader<'_>) -> Result<Self, CodecError> {
        Self::read_nested(reader, 0)
    }

    fn read_nested(reader: &mut ByteReader<'_>, depth: usize) -> Result<Self, CodecError> {
        if depth > MAX_DEPTH {
            return Err(CodecError::CorruptedEncoding("payload nested too deeply"));
        }
        let data = match reader.read_u8()? {
            0 => Data::None,
            1 => {
                let len = reader.read_u16()? as usize;
                let text = std::str::from_utf8(reader.read(len)?)
                    .map_err(|_| CodecError::CorruptedEncoding("invalid utf-8"))?;
                Data::String(text.to_string())
            }
            2 => {
                let len = reader.read_u16()? as usize;
                Data::Blob(reader.read(len)?.to_vec())
            }
            3 => Data::Decimal(reader.read_u64()?),
            4 => match reader.read_u8()? {
                0 => Data::Boolean(false),
                1 => Data::Boolean(true),
                _ => return Err(CodecError::CorruptedEncoding("invalid boolean")),
            },
            5 => {
                let count = reader.read_u16()?;
                let items = (0..count)
                    .map(|_| Self::read_nested(reader, depth + 1))
                    .collect::<Result<Vec<_>, _>>()?;
                Data::List(items)
            }
            6 => {
                let count = reader.read_u16()?;
                let mut pairs = Vec::new();
                for _ in 0..count {
                    let key = Self::read_nested(reader, depth + 1)?;
                    let value = Self::read_nested(reader, depth + 1)?;
                    pairs.push((key, value));
                }
                Data::Map(pairs)
            }
            _ => return Err(CodecError::CorruptedEncoding("unknown data tag")),
        };
        Ok(data)
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        self.write(&mut out);
        out
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CodecError> {
        let mut reader = ByteReader::new(bytes);
        let data = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(data)
    }

    /// Regular hash of the encoding
    pub fn hash(&self) -> Hash {
        hash_bytes(&self.to_bytes())
    }
}

fn write_long_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
    debug_assert!(bytes.len() <= u16::MAX as usize, "long field of {} bytes", bytes.len());
    let len = bytes.len().min(u16::MAX as usize);
    out.extend_from_slice(&(len as u16).to_be_bytes());
    out.extend_from_slice(&bytes[..len]);
}
