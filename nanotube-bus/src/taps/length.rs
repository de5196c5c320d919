//! The packet length tap: count payload bytes until end-of-packet and
//! answer length requests bounded by the caller's maximum.

use crate::BusKind;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketLengthReq {
    pub valid: u8,
    pub max_length: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketLengthResp {
    pub valid: u8,
    pub result_length: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketLengthTapState {
    pub packet_length: u16,
    pub packet_offset: u16,
    pub done: u8,
}

impl PacketLengthTapState {
    pub fn new() -> PacketLengthTapState {
        PacketLengthTapState::default()
    }
}

/// Process one bus word.  The response fires on the end-of-packet word of
/// each packet with a pending request, carrying
/// `min(packet_length, req.max_length)`.
pub fn packet_length_tap(
    bus: BusKind,
    resp: &mut PacketLengthResp,
    state: &mut PacketLengthTapState,
    word: &[u8],
    req: &PacketLengthReq,
) {
    debug_assert_eq!(word.len(), bus.total_bytes());
    resp.valid = 0;
    resp.result_length = 0;
    state.packet_offset += bus.word_length(word) as u16;
    if bus.is_eop(word) {
        state.packet_length = state.packet_offset;
        state.packet_offset = 0;
        if req.valid != 0 {
            resp.valid = 1;
            resp.result_length = state.packet_length.min(req.max_length);
            state.done = 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn measure(bus: BusKind, payload_len: usize, max: u16) -> PacketLengthResp {
        let data = bus.data_bytes();
        let mut state = PacketLengthTapState::new();
        let req = PacketLengthReq { valid: 1, max_length: max };
        let mut resp = PacketLengthResp::default();
        let mut remaining = payload_len;
        let mut out = PacketLengthResp::default();
        loop {
            let chunk = remaining.min(data);
            remaining -= chunk;
            let mut word = vec![0u8; bus.total_bytes()];
            let last = remaining == 0;
            bus.set_eop(&mut word, last, if last { data - chunk } else { 0 });
            packet_length_tap(bus, &mut resp, &mut state, &word, &req);
            if resp.valid != 0 {
                out = resp;
            }
            if last {
                break;
            }
        }
        out
    }

    #[test]
    fn counts_bytes_to_eop() {
        let resp = measure(BusKind::Simple, 147, 65535);
        assert_eq!(resp.valid, 1);
        assert_eq!(resp.result_length, 147);
    }

    #[test]
    fn result_is_capped_by_request() {
        let resp = measure(BusKind::Simple, 147, 100);
        assert_eq!(resp.result_length, 100);
    }

    #[test]
    fn works_for_every_bus_format() {
        for bus in [BusKind::Simple, BusKind::Softhub, BusKind::X3rx] {
            assert_eq!(measure(bus, 130, 65535).result_length, 130);
        }
    }
}
