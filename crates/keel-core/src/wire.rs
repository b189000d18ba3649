//! Keel wire format: the byte layout every payload, metadata blob and
//! signed intent is written in.
//!
//! These constants ARE the protocol. The runtime decodes program payloads
//! with exactly this layout, so changing a width or a flag value here is a
//! breaking change for every deployed program.
//!
//!   integers      little-endian at natural width (u8..u128, i8..i128)
//!   bool          one byte, 0x00 / 0x01
//!   length prefix SCALE compact integer (sequences, bytes, text)
//!   variant tag   one byte, declared per arm in the schema
//!   option flag   one byte, 0x00 absent / 0x01 present
//!   fixed bytes   N raw bytes, no prefix

// ── Constants ─────────────────────────────────────────────────────────────────

/// Width of a variant discriminant on the wire, in bytes.
pub const VARIANT_TAG_WIDTH: usize = 1;

/// Option flag byte for an absent value.
pub const OPTION_NONE: u8 = 0x00;

/// Option flag byte for a present value.
pub const OPTION_SOME: u8 = 0x01;

pub const BOOL_FALSE: u8 = 0x00;
pub const BOOL_TRUE: u8 = 0x01;

/// Largest value representable in each fixed compact mode.
const COMPACT_SINGLE_MAX: u64 = (1 << 6) - 1;
const COMPACT_TWO_MAX: u64 = (1 << 14) - 1;
const COMPACT_FOUR_MAX: u64 = (1 << 30) - 1;

// ── Writer ────────────────────────────────────────────────────────────────────

/// Append-only byte sink. Every write is infallible; layout errors are the
/// caller's job to catch before bytes are produced.
#[derive(Debug, Default, Clone)]
pub struct Writer {
    buf: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: Vec::with_capacity(capacity),
        }
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.push(v);
    }

    pub fn put_slice(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_u64(&mut self, v: u64) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    pub fn put_u128(&mut self, v: u128) {
        self.buf.extend_from_slice(&v.to_le_bytes());
    }

    /// SCALE compact integer.
    pub fn put_compact(&mut self, v: u64) {
        if v <= COMPACT_SINGLE_MAX {
            self.buf.push((v as u8) << 2);
        } else if v <= COMPACT_TWO_MAX {
            self.buf
                .extend_from_slice(&(((v as u16) << 2) | 0b01).to_le_bytes());
        } else if v <= COMPACT_FOUR_MAX {
            self.buf
                .extend_from_slice(&(((v as u32) << 2) | 0b10).to_le_bytes());
        } else {
            let len = (8 - v.leading_zeros() as usize / 8).max(4);
            self.buf.push((((len - 4) as u8) << 2) | 0b11);
            self.buf.extend_from_slice(&v.to_le_bytes()[..len]);
        }
    }

    /// Compact length followed by the raw bytes.
    pub fn put_prefixed(&mut self, bytes: &[u8]) {
        self.put_compact(bytes.len() as u64);
        self.buf.extend_from_slice(bytes);
    }

    pub fn put_str(&mut self, s: &str) {
        self.put_prefixed(s.as_bytes());
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// Bounds-checked cursor over a borrowed byte slice.
///
/// Never reads past the end: every accessor checks `remaining()` first and
/// reports `WireError::Truncated` with the shortfall.
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8], WireError> {
        if self.remaining() < n {
            return Err(WireError::Truncated {
                needed: n,
                remaining: self.remaining(),
            });
        }
        let out = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(out)
    }

    pub fn take_array<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take(1)?[0])
    }

    pub fn u64(&mut self) -> Result<u64, WireError> {
        Ok(u64::from_le_bytes(self.take_array()?))
    }

    pub fn u128(&mut self) -> Result<u128, WireError> {
        Ok(u128::from_le_bytes(self.take_array()?))
    }

    /// SCALE compact integer. Non-canonical encodings are rejected so that
    /// every decoded value re-encodes to the same bytes.
    pub fn compact(&mut self) -> Result<u64, WireError> {
        let first = self.u8()?;
        let value = match first & 0b11 {
            0b00 => return Ok(u64::from(first >> 2)),
            0b01 => {
                let raw = u16::from_le_bytes([first, self.u8()?]);
                let v = u64::from(raw >> 2);
                if v <= COMPACT_SINGLE_MAX {
                    return Err(WireError::NonCanonicalCompact);
                }
                v
            }
            0b10 => {
                let rest: [u8; 3] = self.take_array()?;
                let raw = u32::from_le_bytes([first, rest[0], rest[1], rest[2]]);
                let v = u64::from(raw >> 2);
                if v <= COMPACT_TWO_MAX {
                    return Err(WireError::NonCanonicalCompact);
                }
                v
            }
            _ => {
                let len = usize::from(first >> 2) + 4;
                if len > 8 {
                    return Err(WireError::CompactOverflow);
                }
                let mut le = [0u8; 8];
                le[..len].copy_from_slice(self.take(len)?);
                let v = u64::from_le_bytes(le);
                let minimal = (8 - v.leading_zeros() as usize / 8).max(4);
                if v <= COMPACT_FOUR_MAX || len != minimal {
                    return Err(WireError::NonCanonicalCompact);
                }
                v
            }
        };
        Ok(value)
    }

    /// Compact length as usize, without checking that the bytes exist.
    pub fn length(&mut self) -> Result<usize, WireError> {
        let len = self.compact()?;
        usize::try_from(len).map_err(|_| WireError::CompactOverflow)
    }

    /// Compact length followed by that many raw bytes.
    pub fn prefixed(&mut self) -> Result<&'a [u8], WireError> {
        let len = self.length()?;
        self.take(len)
    }

    pub fn string(&mut self) -> Result<String, WireError> {
        let raw = self.prefixed()?;
        std::str::from_utf8(raw)
            .map(str::to_owned)
            .map_err(|_| WireError::InvalidUtf8)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when reading wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("truncated input: need {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    #[error("compact integer does not fit in 64 bits")]
    CompactOverflow,

    #[error("compact integer is not minimally encoded")]
    NonCanonicalCompact,

    #[error("text is not valid UTF-8")]
    InvalidUtf8,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
