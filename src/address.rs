//! Slot addressing: bank/program pairs and their linearization.
//!
//! Ordinary patch memory is 8 banks of 128 programs, linearized to a slot
//! index in `0..1024`. Two reserved high banks address transient storage:
//! the edit buffer and the 16-slot multi region. Reserved addresses are
//! never ordinary collection slots.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Number of ordinary banks.
pub const BANK_COUNT: u8 = 8;

/// Programs per bank.
pub const PROGRAMS_PER_BANK: u16 = 128;

/// Total addressable collection slots.
pub const SLOT_CAPACITY: usize = (BANK_COUNT as usize) * (PROGRAMS_PER_BANK as usize);

/// Reserved bank addressing the single transient edit buffer.
pub const EDIT_BUFFER_BANK: u8 = 0x7F;

/// Reserved bank addressing the multi region.
pub const MULTI_BANK: u8 = 0x7E;

/// Addressable slots in the multi region.
pub const MULTI_SLOTS: u8 = 16;

/// A raw wire address: 7-bit bank and program bytes as they appear in
/// request and data frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SlotAddress {
    pub bank: u8,
    pub program: u8,
}

/// Classification of a wire address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressRegion {
    /// Ordinary collection slot, carrying its linear index.
    Slot(u16),
    /// The single transient edit buffer.
    EditBuffer,
    /// One of the multi-region slots.
    Multi(u8),
    /// A reserved address outside the regions above.
    Reserved,
}

impl SlotAddress {
    /// Build an address from raw 7-bit bytes. `None` if either byte has the
    /// high bit set (not representable on the wire).
    pub fn new(bank: u8, program: u8) -> Option<Self> {
        if bank > 0x7F || program > 0x7F {
            return None;
        }
        Some(Self { bank, program })
    }

    /// Address of an ordinary slot by linear index.
    pub fn slot(index: u16) -> Option<Self> {
        if (index as usize) >= SLOT_CAPACITY {
            return None;
        }
        Some(Self {
            bank: (index / PROGRAMS_PER_BANK) as u8,
            program: (index % PROGRAMS_PER_BANK) as u8,
        })
    }

    /// The transient edit buffer address.
    pub fn edit_buffer() -> Self {
        Self {
            bank: EDIT_BUFFER_BANK,
            program: 0,
        }
    }

    /// A multi-region slot address.
    pub fn multi(slot: u8) -> Option<Self> {
        if slot >= MULTI_SLOTS {
            return None;
        }
        Some(Self {
            bank: MULTI_BANK,
            program: slot,
        })
    }

    pub fn region(&self) -> AddressRegion {
        if self.bank < BANK_COUNT {
            AddressRegion::Slot(self.bank as u16 * PROGRAMS_PER_BANK + self.program as u16)
        } else if self.bank == EDIT_BUFFER_BANK && self.program == 0 {
            AddressRegion::EditBuffer
        } else if self.bank == MULTI_BANK && self.program < MULTI_SLOTS {
            AddressRegion::Multi(self.program)
        } else {
            AddressRegion::Reserved
        }
    }

    /// Linear slot index, for ordinary slots only.
    pub fn index(&self) -> Option<u16> {
        match self.region() {
            AddressRegion::Slot(i) => Some(i),
            _ => None,
        }
    }

    /// Whether this address maps into ordinary slot space.
    pub fn is_indexed(&self) -> bool {
        self.bank < BANK_COUNT
    }

    /// All ordinary slot addresses of one bank, in program order.
    pub fn bank_range(bank: u8) -> Vec<Self> {
        (0..PROGRAMS_PER_BANK as u8)
            .filter_map(|p| Self::new(bank, p))
            .collect()
    }

    /// All 1024 ordinary slot addresses, in linear order.
    pub fn full_range() -> Vec<Self> {
        (0..SLOT_CAPACITY as u16).filter_map(Self::slot).collect()
    }
}

impl fmt::Display for SlotAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.region() {
            AddressRegion::Slot(_) => {
                // Banks print as letters A-H, programs as 1-based numbers.
                let letter = (b'A' + self.bank) as char;
                write!(f, "{}{:03}", letter, self.program as u16 + 1)
            }
            AddressRegion::EditBuffer => write!(f, "edit"),
            AddressRegion::Multi(slot) => write!(f, "multi{:02}", slot + 1),
            AddressRegion::Reserved => {
                write!(f, "reserved({:#04x},{:#04x})", self.bank, self.program)
            }
        }
    }
}
