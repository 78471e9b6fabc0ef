//! Frame codec: encode/decode between protocol frames and raw bytes.
//!
//! Frame layouts (fixed positions, bit-exact):
//!
//! ```text
//! Request: [START, FAM1, FAM2, unit, KIND_REQUEST, bank, program, FRAMING, END]
//! Data:    [START, FAM1, FAM2, unit, KIND_DATA,    bank, program, payload[379], FRAMING, END]
//! ```

use crate::address::SlotAddress;
use crate::error::ProtocolError;
use crate::patch::{PatchPayload, PATCH_PAYLOAD_LEN};
use bytes::{BufMut, Bytes, BytesMut};

/// Frame start delimiter.
pub const FRAME_START: u8 = 0xF0;

/// Frame end delimiter.
pub const FRAME_END: u8 = 0xF7;

/// Two-byte device family id carried by every frame.
pub const FAMILY_ID: [u8; 2] = [0x3E, 0x13];

/// Kind byte of a request frame.
pub const KIND_REQUEST: u8 = 0x00;

/// Kind byte of a data frame.
pub const KIND_DATA: u8 = 0x10;

/// Trailing protocol byte before END. Observed as a fixed constant in
/// captures, not a computed checksum; unverified against real hardware.
pub const FRAMING_BYTE: u8 = 0x7F;

/// Unit id that addresses every device on the transport.
pub const BROADCAST_UNIT: u8 = 0x7F;

/// Wildcard bank in a request frame asking the device to stream its entire
/// patch memory. Not an addressable slot.
pub const DUMP_ALL_BANK: u8 = 0x40;

/// Request frame length.
pub const REQUEST_FRAME_LEN: usize = 9;

/// Data frame length.
pub const DATA_FRAME_LEN: usize = 9 + PATCH_PAYLOAD_LEN;

// Byte positions shared by both layouts.
const POS_UNIT: usize = 3;
const POS_KIND: usize = 4;
const POS_BANK: usize = 5;
const POS_PROGRAM: usize = 6;
const POS_PAYLOAD: usize = 7;

// =============================================================================
// Frame kinds
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameKind {
    Request = KIND_REQUEST,
    Data = KIND_DATA,
}

impl FrameKind {
    pub fn from_u8(b: u8) -> Option<Self> {
        match b {
            KIND_REQUEST => Some(Self::Request),
            KIND_DATA => Some(Self::Data),
            _ => None,
        }
    }

    fn frame_len(self) -> usize {
        match self {
            Self::Request => REQUEST_FRAME_LEN,
            Self::Data => DATA_FRAME_LEN,
        }
    }
}

// =============================================================================
// Decoded frames
// =============================================================================

/// A decoded protocol frame. Dispatch is an exhaustive match; there is no
/// fall-through branch to forget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    /// Request for one patch at the given address.
    Request { addr: SlotAddress },
    /// Request for the device to stream its entire patch memory.
    DumpAllRequest,
    /// One patch payload, tagged with the address it was read from.
    Data {
        addr: SlotAddress,
        payload: PatchPayload,
    },
}

// =============================================================================
// Codec
// =============================================================================

/// Encoder/decoder bound to one device unit id.
#[derive(Debug, Clone, Copy)]
pub struct Codec {
    unit: u8,
}

impl Codec {
    pub fn new(unit: u8) -> Self {
        Self { unit }
    }

    pub fn unit(&self) -> u8 {
        self.unit
    }

    fn put_header(&self, buf: &mut BytesMut, kind: u8) {
        buf.put_u8(FRAME_START);
        buf.put_slice(&FAMILY_ID);
        buf.put_u8(self.unit);
        buf.put_u8(kind);
    }

    /// Encode a 9-byte request frame for one address.
    pub fn encode_request(&self, addr: SlotAddress) -> Bytes {
        let mut buf = BytesMut::with_capacity(REQUEST_FRAME_LEN);
        self.put_header(&mut buf, KIND_REQUEST);
        buf.put_u8(addr.bank);
        buf.put_u8(addr.program);
        buf.put_u8(FRAMING_BYTE);
        buf.put_u8(FRAME_END);
        buf.freeze()
    }

    /// Encode the single "dump all" request used by fast mode.
    pub fn encode_dump_all(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(REQUEST_FRAME_LEN);
        self.put_header(&mut buf, KIND_REQUEST);
        buf.put_u8(DUMP_ALL_BANK);
        buf.put_u8(0x00);
        buf.put_u8(FRAMING_BYTE);
        buf.put_u8(FRAME_END);
        buf.freeze()
    }

    /// Encode a data frame carrying one patch payload.
    pub fn encode_data(&self, addr: SlotAddress, payload: &PatchPayload) -> Bytes {
        let mut buf = BytesMut::with_capacity(DATA_FRAME_LEN);
        self.put_header(&mut buf, KIND_DATA);
        buf.put_u8(addr.bank);
        buf.put_u8(addr.program);
        buf.put_slice(payload.as_bytes());
        buf.put_u8(FRAMING_BYTE);
        buf.put_u8(FRAME_END);
        buf.freeze()
    }

    /// Decode a raw frame. Every defect maps to a distinct
    /// [`ProtocolError`]; the caller drops the frame and carries on.
    pub fn decode(&self, raw: &[u8]) -> Result<Frame, ProtocolError> {
        let len = raw.len();
        if len != REQUEST_FRAME_LEN && len != DATA_FRAME_LEN {
            return Err(ProtocolError::BadLength { actual: len });
        }
        if raw[0] != FRAME_START || raw[len - 1] != FRAME_END {
            return Err(ProtocolError::BadDelimiters);
        }
        if raw[1..3] != FAMILY_ID {
            return Err(ProtocolError::FamilyMismatch {
                found: [raw[1], raw[2]],
            });
        }
        let unit = raw[POS_UNIT];
        if unit != self.unit && unit != BROADCAST_UNIT {
            return Err(ProtocolError::UnitMismatch {
                found: unit,
                expected: self.unit,
            });
        }
        let kind =
            FrameKind::from_u8(raw[POS_KIND]).ok_or(ProtocolError::UnknownKind(raw[POS_KIND]))?;
        if len != kind.frame_len() {
            return Err(ProtocolError::BadLength { actual: len });
        }
        if raw[len - 2] != FRAMING_BYTE {
            return Err(ProtocolError::BadFraming { found: raw[len - 2] });
        }

        let (bank, program) = (raw[POS_BANK], raw[POS_PROGRAM]);
        match kind {
            FrameKind::Request => {
                if bank == DUMP_ALL_BANK && program == 0x00 {
                    return Ok(Frame::DumpAllRequest);
                }
                let addr = SlotAddress::new(bank, program)
                    .ok_or(ProtocolError::BadAddress { bank, program })?;
                Ok(Frame::Request { addr })
            }
            FrameKind::Data => {
                let addr = SlotAddress::new(bank, program)
                    .ok_or(ProtocolError::BadAddress { bank, program })?;
                let payload =
                    PatchPayload::from_slice(&raw[POS_PAYLOAD..POS_PAYLOAD + PATCH_PAYLOAD_LEN])?;
                Ok(Frame::Data { addr, payload })
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
