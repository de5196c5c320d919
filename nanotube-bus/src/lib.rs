//! Bus word layouts, the map control capsule wire format and the packet
//! taps: the ABI shared between the compiler back-end and the generated
//! streaming code.
//!
//! Everything here is bit-exact and little-endian.  The taps are pure
//! state machines: output streams are a function of the input stream and
//! the initial state only.

#![forbid(unsafe_code)]

pub mod capsule;
pub mod simple;
pub mod softhub;
pub mod taps;
pub mod x3rx;

use serde::{Deserialize, Serialize};

/// The fate of a packet as returned by a kernel.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum KernelVerdict {
    Pass,
    Drop,
}

impl KernelVerdict {
    pub fn from_raw(raw: i32) -> KernelVerdict {
        if raw == 0 {
            KernelVerdict::Pass
        } else {
            KernelVerdict::Drop
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            KernelVerdict::Pass => 0,
            KernelVerdict::Drop => 1,
        }
    }
}

/// The supported bus formats.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub enum BusKind {
    Simple,
    Softhub,
    X3rx,
}

impl BusKind {
    /// Map the raw export-type/bus-type encoding onto a format.
    pub fn from_raw(raw: i32) -> Option<BusKind> {
        match raw {
            1 => Some(BusKind::Simple),
            2 => Some(BusKind::Softhub),
            3 => Some(BusKind::X3rx),
            _ => None,
        }
    }

    /// Payload bytes per bus word.
    pub fn data_bytes(self) -> usize {
        match self {
            BusKind::Simple => simple::DATA_BYTES,
            BusKind::Softhub => softhub::DATA_BYTES,
            BusKind::X3rx => x3rx::DATA_BYTES,
        }
    }

    /// Total flat bytes per bus word, data plus sideband and signals.
    pub fn total_bytes(self) -> usize {
        match self {
            BusKind::Simple => simple::TOTAL_BYTES,
            BusKind::Softhub => softhub::TOTAL_BYTES,
            BusKind::X3rx => x3rx::TOTAL_BYTES,
        }
    }

    pub fn is_eop(self, word: &[u8]) -> bool {
        match self {
            BusKind::Simple => simple::is_eop(word),
            BusKind::Softhub => softhub::is_eop(word),
            BusKind::X3rx => x3rx::is_eop(word),
        }
    }

    /// Unused trailing bytes of the final word; zero elsewhere.
    pub fn empty_bytes(self, word: &[u8]) -> usize {
        match self {
            BusKind::Simple => simple::empty_bytes(word),
            BusKind::Softhub => softhub::empty_bytes(word),
            BusKind::X3rx => x3rx::empty_bytes(word),
        }
    }

    /// Valid payload bytes in this word.
    pub fn word_length(self, word: &[u8]) -> usize {
        if self.is_eop(word) {
            self.data_bytes() - self.empty_bytes(word)
        } else {
            self.data_bytes()
        }
    }

    /// Mark a word as mid-packet or end-of-packet with `empty` unused
    /// trailing bytes.
    pub fn set_eop(self, word: &mut [u8], eop: bool, empty: usize) {
        match self {
            BusKind::Simple => simple::set_eop(word, eop, empty),
            BusKind::Softhub => softhub::set_eop(word, eop, empty),
            BusKind::X3rx => x3rx::set_eop(word, eop, empty),
        }
    }

    /// The destination port carried by the word, when the format has one.
    pub fn port(self, word: &[u8]) -> Option<u8> {
        match self {
            BusKind::Simple => None,
            BusKind::Softhub => Some(softhub::route(word) as u8),
            BusKind::X3rx => Some(x3rx::port(word)),
        }
    }

    pub fn set_port(self, word: &mut [u8], port: u8) {
        match self {
            BusKind::Simple => {}
            BusKind::Softhub => softhub::set_route(word, port as u16),
            BusKind::X3rx => x3rx::set_port(word, port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_mapping_matches_export_types() {
        assert_eq!(BusKind::from_raw(1), Some(BusKind::Simple));
        assert_eq!(BusKind::from_raw(2), Some(BusKind::Softhub));
        assert_eq!(BusKind::from_raw(3), Some(BusKind::X3rx));
        assert_eq!(BusKind::from_raw(0), None);
        assert_eq!(BusKind::from_raw(-1), None);
    }

    #[test]
    fn word_lengths() {
        for bus in [BusKind::Simple, BusKind::Softhub, BusKind::X3rx] {
            let mut word = vec![0u8; bus.total_bytes()];
            assert_eq!(bus.word_length(&word), bus.data_bytes());
            bus.set_eop(&mut word, true, 10);
            assert!(bus.is_eop(&word));
            assert_eq!(bus.word_length(&word), bus.data_bytes() - 10);
            bus.set_eop(&mut word, false, 0);
            assert!(!bus.is_eop(&word));
        }
    }
}
