//! End-of-packet detection over a word stream.

use crate::BusKind;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketEopState {
    /// Set while inside a packet (a word has been seen and the packet's
    /// end has not).
    pub mid_packet: u8,
}

impl PacketEopState {
    pub fn new() -> PacketEopState {
        PacketEopState::default()
    }
}

/// Process one word; returns whether it ends the current packet.
pub fn packet_eop_tap(bus: BusKind, state: &mut PacketEopState, word: &[u8]) -> bool {
    debug_assert_eq!(word.len(), bus.total_bytes());
    let eop = bus.is_eop(word);
    state.mid_packet = (!eop) as u8;
    eop
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tracks_packet_boundaries() {
        let bus = BusKind::Simple;
        let mut state = PacketEopState::new();
        let mut word = vec![0u8; bus.total_bytes()];
        assert!(!packet_eop_tap(bus, &mut state, &word));
        assert_eq!(state.mid_packet, 1);
        bus.set_eop(&mut word, true, 0);
        assert!(packet_eop_tap(bus, &mut state, &word));
        assert_eq!(state.mid_packet, 0);
    }
}
