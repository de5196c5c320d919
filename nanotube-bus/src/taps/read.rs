//! The packet read tap: accumulate the requested byte range into the
//! caller's buffer across however many bus words the range spans.

use crate::BusKind;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketReadReq {
    pub valid: u8,
    pub read_offset: u16,
    pub read_length: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketReadResp {
    pub valid: u8,
    pub result_length: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketReadTapState {
    pub packet_length: u16,
    pub packet_offset: u16,
    pub rotate_amount: u16,
    pub result_offset: u16,
    pub done: u8,
    pub data_eop_seen: u8,
}

impl PacketReadTapState {
    pub fn new() -> PacketReadTapState {
        PacketReadTapState::default()
    }

    fn reset_for_next_packet(&mut self) {
        self.packet_offset = 0;
        self.rotate_amount = 0;
        self.result_offset = 0;
        self.done = 0;
    }
}

/// Process one bus word.  With `req.valid` set, bytes of the requested
/// range present in this word land in `result_buffer`; the response
/// asserts `valid` on the word that completes the request, carrying the
/// number of bytes actually available.
pub fn packet_read_tap(
    bus: BusKind,
    resp: &mut PacketReadResp,
    result_buffer: &mut [u8],
    state: &mut PacketReadTapState,
    word: &[u8],
    req: &PacketReadReq,
) {
    debug_assert_eq!(word.len(), bus.total_bytes());
    let word_len = bus.word_length(word) as u16;
    let eop = bus.is_eop(word);
    resp.valid = 0;
    resp.result_length = 0;

    let active = req.valid != 0 && state.done == 0;
    if active {
        state.rotate_amount = req.read_offset % bus.data_bytes() as u16;
        let start = req.read_offset;
        let end = req.read_offset.saturating_add(req.read_length);
        for i in 0..word_len {
            let pos = state.packet_offset + i;
            if pos >= start && pos < end {
                let idx = (pos - start) as usize;
                if idx < result_buffer.len() {
                    result_buffer[idx] = word[i as usize];
                }
                state.result_offset = state.result_offset.max(pos - start + 1);
            }
        }
    }

    state.packet_offset += word_len;

    if active {
        let end = req.read_offset.saturating_add(req.read_length);
        if eop {
            state.packet_length = state.packet_offset;
            resp.valid = 1;
            resp.result_length = req
                .read_length
                .min(state.packet_length.saturating_sub(req.read_offset));
            state.done = 1;
        } else if state.packet_offset >= end {
            resp.valid = 1;
            resp.result_length = req.read_length;
            state.done = 1;
        }
    }

    state.data_eop_seen = eop as u8;
    if eop {
        state.reset_for_next_packet();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(bus: BusKind, payload: &[u8]) -> Vec<Vec<u8>> {
        let data = bus.data_bytes();
        let mut words = Vec::new();
        let mut chunks = payload.chunks(data).peekable();
        while let Some(chunk) = chunks.next() {
            let mut word = vec![0u8; bus.total_bytes()];
            word[..chunk.len()].copy_from_slice(chunk);
            let last = chunks.peek().is_none();
            bus.set_eop(&mut word, last, if last { data - chunk.len() } else { 0 });
            words.push(word);
        }
        words
    }

    fn run_read(bus: BusKind, payload: &[u8], offset: u16, length: u16) -> (Vec<u8>, PacketReadResp) {
        let mut state = PacketReadTapState::new();
        let mut buffer = vec![0u8; length as usize];
        let req = PacketReadReq { valid: 1, read_offset: offset, read_length: length };
        let mut last_resp = PacketReadResp::default();
        for word in stream(bus, payload) {
            let mut resp = PacketReadResp::default();
            packet_read_tap(bus, &mut resp, &mut buffer, &mut state, &word, &req);
            if resp.valid != 0 {
                last_resp = resp;
            }
        }
        (buffer, last_resp)
    }

    #[test]
    fn read_spanning_word_boundary() {
        let payload: Vec<u8> = (0..200u16).map(|i| i as u8).collect();
        let (buffer, resp) = run_read(BusKind::Simple, &payload, 60, 10);
        assert_eq!(resp.valid, 1);
        assert_eq!(resp.result_length, 10);
        assert_eq!(buffer, (60..70u8).collect::<Vec<u8>>());
    }

    #[test]
    fn read_truncated_at_packet_end() {
        let payload: Vec<u8> = (0..40u8).collect();
        let (buffer, resp) = run_read(BusKind::Simple, &payload, 32, 16);
        assert_eq!(resp.result_length, 8);
        assert_eq!(&buffer[..8], &payload[32..40]);
    }

    #[test]
    fn deterministic_across_runs() {
        let payload: Vec<u8> = (0..150u16).map(|i| (i * 7) as u8).collect();
        let a = run_read(BusKind::Softhub, &payload, 10, 64);
        let b = run_read(BusKind::Softhub, &payload, 10, 64);
        assert_eq!(a, b);
    }

    #[test]
    fn state_resets_between_packets() {
        let bus = BusKind::Simple;
        let mut state = PacketReadTapState::new();
        let req = PacketReadReq { valid: 0, read_offset: 0, read_length: 0 };
        let mut resp = PacketReadResp::default();
        let mut buffer = [0u8; 4];
        for word in stream(bus, &[1, 2, 3]) {
            packet_read_tap(bus, &mut resp, &mut buffer, &mut state, &word, &req);
        }
        assert_eq!(state.packet_offset, 0);
        assert_eq!(state.data_eop_seen, 1);
    }
}
