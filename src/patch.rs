//! Patch payloads and the records a transfer produces.
//!
//! A patch is a fixed 379-byte parameter payload. Name and category are
//! derived fields stored inside the payload at fixed offsets; everything
//! else is synthesis parameters plus a reserved tail.

use crate::address::SlotAddress;
use crate::error::ProtocolError;
use bytes::Bytes;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Length of one patch parameter payload.
pub const PATCH_PAYLOAD_LEN: usize = 379;

/// Byte offset of the fixed-width name field.
pub const NAME_OFFSET: usize = 363;

/// Width of the name field, space padded ASCII.
pub const NAME_LEN: usize = 10;

/// Byte offset of the category byte.
pub const CATEGORY_OFFSET: usize = 373;

/// Start of the reserved tail; everything from here to the end is ignored
/// by content comparison.
pub const RESERVED_OFFSET: usize = 374;

/// Patch category, decoded from the category byte. Out-of-range bytes fall
/// back to `Unknown` rather than failing the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PatchCategory {
    Init,
    Arp,
    Atmo,
    Bass,
    Drum,
    Fx,
    Keys,
    Lead,
    Mono,
    Pad,
    Perc,
    Poly,
    Seq,
    Unknown,
}

impl PatchCategory {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0 => Self::Init,
            1 => Self::Arp,
            2 => Self::Atmo,
            3 => Self::Bass,
            4 => Self::Drum,
            5 => Self::Fx,
            6 => Self::Keys,
            7 => Self::Lead,
            8 => Self::Mono,
            9 => Self::Pad,
            10 => Self::Perc,
            11 => Self::Poly,
            12 => Self::Seq,
            _ => Self::Unknown,
        }
    }
}

impl fmt::Display for PatchCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Init => "init",
            Self::Arp => "arp",
            Self::Atmo => "atmo",
            Self::Bass => "bass",
            Self::Drum => "drum",
            Self::Fx => "fx",
            Self::Keys => "keys",
            Self::Lead => "lead",
            Self::Mono => "mono",
            Self::Pad => "pad",
            Self::Perc => "perc",
            Self::Poly => "poly",
            Self::Seq => "seq",
            Self::Unknown => "unknown",
        };
        write!(f, "{}", s)
    }
}

/// Immutable fixed-length parameter payload. Always exactly
/// [`PATCH_PAYLOAD_LEN`] bytes; cloning is cheap (shared buffer).
#[derive(Clone, PartialEq, Eq)]
pub struct PatchPayload(Bytes);

impl PatchPayload {
    pub fn from_bytes(raw: Bytes) -> Result<Self, ProtocolError> {
        if raw.len() != PATCH_PAYLOAD_LEN {
            return Err(ProtocolError::BadPayloadLength {
                actual: raw.len(),
                expected: PATCH_PAYLOAD_LEN,
            });
        }
        Ok(Self(raw))
    }

    pub fn from_slice(raw: &[u8]) -> Result<Self, ProtocolError> {
        Self::from_bytes(Bytes::copy_from_slice(raw))
    }

    /// An all-zero payload, useful as an init patch scaffold.
    pub fn zeroed() -> Self {
        Self(Bytes::from(vec![0u8; PATCH_PAYLOAD_LEN]))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Derived name: the fixed-width field, trimmed, with non-printable
    /// bytes rendered as spaces.
    pub fn name(&self) -> String {
        self.0[NAME_OFFSET..NAME_OFFSET + NAME_LEN]
            .iter()
            .map(|&b| {
                if (0x20..0x7F).contains(&b) {
                    b as char
                } else {
                    ' '
                }
            })
            .collect::<String>()
            .trim_end()
            .to_string()
    }

    pub fn category(&self) -> PatchCategory {
        PatchCategory::from_byte(self.0[CATEGORY_OFFSET])
    }

    /// Copy with the name field replaced. Writes up to [`NAME_LEN`] ASCII
    /// characters, space padded.
    pub fn with_name(&self, name: &str) -> Self {
        let mut buf = self.0.to_vec();
        let field = &mut buf[NAME_OFFSET..NAME_OFFSET + NAME_LEN];
        field.fill(b' ');
        for (dst, ch) in field.iter_mut().zip(name.bytes()) {
            *dst = if (0x20..0x7F).contains(&ch) { ch } else { b' ' };
        }
        Self(Bytes::from(buf))
    }

    /// Copy with the category byte replaced.
    pub fn with_category(&self, category: u8) -> Self {
        let mut buf = self.0.to_vec();
        buf[CATEGORY_OFFSET] = category;
        Self(Bytes::from(buf))
    }
}

impl fmt::Debug for PatchPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PatchPayload")
            .field("name", &self.name())
            .field("category", &self.category())
            .finish()
    }
}

/// One patch as read off the wire: its payload plus the source address it
/// was dumped from. The address records where the patch came from, not
/// where it will be stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchRecord {
    pub source: SlotAddress,
    pub payload: PatchPayload,
}

impl PatchRecord {
    pub fn new(source: SlotAddress, payload: PatchPayload) -> Self {
        Self { source, payload }
    }

    pub fn name(&self) -> String {
        self.payload.name()
    }

    pub fn category(&self) -> PatchCategory {
        self.payload.category()
    }
}
