//! Wire protocol for bulk patch dumps.
//!
//! Two frame layouts, both fixed-position: a 9-byte request and a
//! 388-byte data frame carrying one patch payload. Decoding classifies
//! every defect as a [`crate::error::ProtocolError`]; callers drop bad
//! frames and keep the session alive.

pub mod codec;

pub use codec::{
    Codec, Frame, FrameKind, BROADCAST_UNIT, DATA_FRAME_LEN, DUMP_ALL_BANK, FAMILY_ID,
    FRAME_END, FRAME_START, FRAMING_BYTE, KIND_DATA, KIND_REQUEST, REQUEST_FRAME_LEN,
};
