//! The packet write tap: splice the requested byte range into the word
//! stream, leaving unmasked bytes untouched.

use crate::BusKind;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketWriteReq {
    pub valid: u8,
    pub write_offset: u16,
    pub write_length: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketWriteTapState {
    pub packet_length: u16,
    pub packet_offset: u16,
    pub rotate_amount: u16,
    pub request_offset: u16,
    pub done: u8,
    pub data_eop_seen: u8,
}

impl PacketWriteTapState {
    pub fn new() -> PacketWriteTapState {
        PacketWriteTapState::default()
    }

    fn reset_for_next_packet(&mut self) {
        self.packet_offset = 0;
        self.rotate_amount = 0;
        self.request_offset = 0;
        self.done = 0;
    }
}

/// Process one bus word in place.  `data_in` holds `write_length` request
/// bytes and `mask` one enable bit per byte; masked-off bytes preserve
/// the packet's content.  Returns true on the word that completes the
/// request.
pub fn packet_write_tap(
    bus: BusKind,
    word: &mut [u8],
    state: &mut PacketWriteTapState,
    req: &PacketWriteReq,
    data_in: &[u8],
    mask: &[u8],
) -> bool {
    debug_assert_eq!(word.len(), bus.total_bytes());
    let word_len = bus.word_length(word) as u16;
    let eop = bus.is_eop(word);

    let mut completed = false;
    if req.valid != 0 && state.done == 0 {
        state.rotate_amount = req.write_offset % bus.data_bytes() as u16;
        let start = req.write_offset;
        let end = req.write_offset.saturating_add(req.write_length);
        for i in 0..word_len {
            let pos = state.packet_offset + i;
            if pos >= start && pos < end {
                let idx = (pos - start) as usize;
                if idx < data_in.len() && mask[idx / 8] & (1 << (idx % 8)) != 0 {
                    word[i as usize] = data_in[idx];
                }
                state.request_offset = state.request_offset.max(pos - start + 1);
            }
        }
        let next_offset = state.packet_offset + word_len;
        if eop || next_offset >= end {
            state.done = 1;
            completed = true;
        }
    }

    state.packet_offset += word_len;
    state.data_eop_seen = eop as u8;
    if eop {
        state.packet_length = state.packet_offset;
        state.reset_for_next_packet();
    }
    completed
}
