//! Tagged slot values and their flash encoding.
//!
//! Every slot in a store holds one [`Value`]. The closed set of shapes maps
//! to what the device actually configures: flags, fixed-width counters and
//! state codes, and short fixed-capacity text (SSIDs, passwords, host
//! names).
//!
//! Values are persisted as fixed-width little-endian bytes (strings as raw
//! UTF-8). The widths are part of the on-flash schema: a persisted blob
//! whose length does not match the slot's expected width is treated as
//! drift and rejected by [`Value::decode`].

use core::cmp::Ordering;

/// Capacity of the text variant, in bytes.
pub const STR_CAPACITY: usize = 32;

/// Largest possible encoded value (a full text slot).
pub const MAX_ENCODED_LEN: usize = STR_CAPACITY;

/// One slot value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Bool(bool),
    U8(u8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    F32(f32),
    Str(heapless::String<STR_CAPACITY>),
}

/// Shape of a [`Value`], without the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Bool,
    U8,
    U16,
    I16,
    U32,
    I32,
    U64,
    F32,
    Str,
}

impl ValueKind {
    /// Encoded width in bytes, `None` for the variable-length text variant.
    pub const fn wire_size(self) -> Option<usize> {
        match self {
            ValueKind::Bool | ValueKind::U8 => Some(1),
            ValueKind::U16 | ValueKind::I16 => Some(2),
            ValueKind::U32 | ValueKind::I32 | ValueKind::F32 => Some(4),
            ValueKind::U64 => Some(8),
            ValueKind::Str => None,
        }
    }
}

impl Value {
    /// Build a text value from a literal. Fatal if the literal exceeds the
    /// slot capacity; an oversized default is a schema bug, caught at boot.
    pub fn str(s: &str) -> Self {
        match heapless::String::try_from(s) {
            Ok(s) => Value::Str(s),
            Err(_) => panic!("text value longer than {} bytes", STR_CAPACITY),
        }
    }

    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(_) => ValueKind::Bool,
            Value::U8(_) => ValueKind::U8,
            Value::U16(_) => ValueKind::U16,
            Value::I16(_) => ValueKind::I16,
            Value::U32(_) => ValueKind::U32,
            Value::I32(_) => ValueKind::I32,
            Value::U64(_) => ValueKind::U64,
            Value::F32(_) => ValueKind::F32,
            Value::Str(_) => ValueKind::Str,
        }
    }

    /// Encode into `buf`, returning the number of bytes used.
    ///
    /// `buf` must hold at least [`MAX_ENCODED_LEN`] bytes.
    pub fn encode(&self, buf: &mut [u8]) -> usize {
        match self {
            Value::Bool(b) => {
                buf[0] = *b as u8;
                1
            }
            Value::U8(v) => {
                buf[0] = *v;
                1
            }
            Value::U16(v) => {
                buf[..2].copy_from_slice(&v.to_le_bytes());
                2
            }
            Value::I16(v) => {
                buf[..2].copy_from_slice(&v.to_le_bytes());
                2
            }
            Value::U32(v) => {
                buf[..4].copy_from_slice(&v.to_le_bytes());
                4
            }
            Value::I32(v) => {
                buf[..4].copy_from_slice(&v.to_le_bytes());
                4
            }
            Value::U64(v) => {
                buf[..8].copy_from_slice(&v.to_le_bytes());
                8
            }
            Value::F32(v) => {
                buf[..4].copy_from_slice(&v.to_le_bytes());
                4
            }
            Value::Str(s) => {
                let bytes = s.as_bytes();
                buf[..bytes.len()].copy_from_slice(bytes);
                bytes.len()
            }
        }
    }

    /// Decode persisted bytes as a value of shape `kind`.
    ///
    /// Returns `None` on any mismatch: wrong width for a numeric, invalid
    /// UTF-8 or over-capacity bytes for text.
    pub fn decode(kind: ValueKind, bytes: &[u8]) -> Option<Value> {
        if let Some(expected) = kind.wire_size() {
            if bytes.len() != expected {
                return None;
            }
        }

        match kind {
            ValueKind::Bool => Some(Value::Bool(bytes[0] != 0)),
            ValueKind::U8 => Some(Value::U8(bytes[0])),
            ValueKind::U16 => Some(Value::U16(u16::from_le_bytes([bytes[0], bytes[1]]))),
            ValueKind::I16 => Some(Value::I16(i16::from_le_bytes([bytes[0], bytes[1]]))),
            ValueKind::U32 => Some(Value::U32(u32::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ]))),
            ValueKind::I32 => Some(Value::I32(i32::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ]))),
            ValueKind::U64 => {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(bytes);
                Some(Value::U64(u64::from_le_bytes(raw)))
            }
            ValueKind::F32 => Some(Value::F32(f32::from_le_bytes([
                bytes[0], bytes[1], bytes[2], bytes[3],
            ]))),
            ValueKind::Str => {
                let s = core::str::from_utf8(bytes).ok()?;
                let s = heapless::String::try_from(s).ok()?;
                Some(Value::Str(s))
            }
        }
    }

    /// Compare two numeric values of the same kind. `None` for text, bools
    /// or mismatched kinds.
    pub fn numeric_cmp(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::U8(a), Value::U8(b)) => Some(a.cmp(b)),
            (Value::U16(a), Value::U16(b)) => Some(a.cmp(b)),
            (Value::I16(a), Value::I16(b)) => Some(a.cmp(b)),
            (Value::U32(a), Value::U32(b)) => Some(a.cmp(b)),
            (Value::I32(a), Value::I32(b)) => Some(a.cmp(b)),
            (Value::U64(a), Value::U64(b)) => Some(a.cmp(b)),
            (Value::F32(a), Value::F32(b)) => a.partial_cmp(b),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> Option<u8> {
        match self {
            Value::U8(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        match self {
            Value::U16(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i16(&self) -> Option<i16> {
        match self {
            Value::I16(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u32(&self) -> Option<u32> {
        match self {
            Value::U32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f32(&self) -> Option<f32> {
        match self {
            Value::F32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s.as_str()),
            _ => None,
        }
    }
}
