//! The packet resize taps.
//!
//! The ingress tap holds the in-flight edit plan (delete `delete_length`
//! bytes at `write_offset`, insert `insert_length` zero bytes in their
//! place) and emits one control word per input word.  The control word
//! fully determines the egress tap's behaviour:
//!
//! * `output_insert_start` — input bytes kept before the edit point;
//! * `output_insert_end` — the same plus the zeros inserted here;
//! * `carried_insert_start..carried_insert_end` — the input byte range
//!   kept after the deleted span;
//! * `select_carried` — the egress holds carried bytes from the previous
//!   word;
//! * `push_1`/`push_2` — how many output words this input word produces;
//! * `packet_rot` — the net byte rotation applied after the edit point;
//! * `word_length`/`eop` — the raw word geometry.

use crate::BusKind;

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketResizeReq {
    pub write_offset: u16,
    pub delete_length: u16,
    pub insert_length: u16,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PacketResizeCword {
    pub packet_rot: u16,
    pub output_insert_start: u16,
    pub output_insert_end: u16,
    pub carried_insert_start: u16,
    pub carried_insert_end: u16,
    pub select_carried: u8,
    pub push_1: u8,
    pub push_2: u8,
    pub eop: u8,
    pub word_length: u16,
}

#[derive(Clone, Debug, Default)]
pub struct PacketResizeIngressState {
    req: PacketResizeReq,
    packet_offset: u16,
    staged: u16,
    total_out: u16,
    active: bool,
}

impl PacketResizeIngressState {
    pub fn new() -> PacketResizeIngressState {
        PacketResizeIngressState::default()
    }
}

/// Process one input word of the current packet.  The request is latched
/// on the packet's first word.  Returns the control word and, on the
/// final word, the packet's new total length.
pub fn packet_resize_ingress_tap(
    bus: BusKind,
    state: &mut PacketResizeIngressState,
    req: &PacketResizeReq,
    word: &[u8],
) -> (PacketResizeCword, Option<u16>) {
    debug_assert_eq!(word.len(), bus.total_bytes());
    let w = bus.data_bytes() as u16;
    debug_assert!(req.insert_length <= w);

    if !state.active {
        state.req = *req;
        state.packet_offset = 0;
        state.staged = 0;
        state.total_out = 0;
        state.active = true;
    }
    let edit = state.req;
    let p = state.packet_offset;
    let len = bus.word_length(word) as u16;
    let eop = bus.is_eop(word);

    let off = edit.write_offset;
    let delete = edit.delete_length;
    let insert = edit.insert_length;

    // Kept prefix, deleted overlap, insertion placement, kept suffix.
    let keep_front = off.saturating_sub(p).min(len);
    let del_start = p.max(off);
    let del_end = (p + len).min(off.saturating_add(delete));
    let deleted = del_end.saturating_sub(del_start);
    let insert_here = if (off >= p && off < p + len) || (eop && off >= p + len) { insert } else { 0 };
    let resume = keep_front + deleted;

    let added = keep_front + insert_here + (len - resume);
    let staged = state.staged + added;
    let emitted = if eop {
        staged.div_ceil(w).max(1)
    } else {
        staged / w
    };

    let cword = PacketResizeCword {
        packet_rot: ((insert as i32 - delete as i32).rem_euclid(w as i32)) as u16,
        output_insert_start: keep_front,
        output_insert_end: keep_front + insert_here,
        carried_insert_start: resume,
        carried_insert_end: len,
        select_carried: (state.staged > 0) as u8,
        push_1: (emitted >= 1) as u8,
        push_2: (emitted >= 2) as u8,
        eop: eop as u8,
        word_length: len,
    };

    state.packet_offset += len;
    state.total_out += added;
    // Mid-packet words leave a sub-word remainder staged; the final word
    // drains everything.
    state.staged = if eop { 0 } else { staged - emitted * w };

    let new_length = if eop { Some(state.total_out) } else { None };
    if eop {
        state.active = false;
    }
    (cword, new_length)
}

#[derive(Clone, Debug, Default)]
pub struct PacketResizeEgressState {
    staging: Vec<u8>,
}

impl PacketResizeEgressState {
    pub fn new() -> PacketResizeEgressState {
        PacketResizeEgressState::default()
    }
}

/// Output of one egress step: zero or more complete bus words, plus the
/// pacing flags.
#[derive(Clone, Debug, Default)]
pub struct PacketResizeEgressResult {
    pub words: Vec<Vec<u8>>,
    pub input_consumed: bool,
    pub packet_valid: bool,
}

/// Rewrite one input word according to its control word.  Complete output
/// words are emitted as soon as enough bytes are staged; the final word
/// of the packet carries the end-of-packet marker and the empty count for
/// `new_length`.
pub fn packet_resize_egress_tap(
    bus: BusKind,
    state: &mut PacketResizeEgressState,
    cword: &PacketResizeCword,
    word: &[u8],
    new_length: u16,
) -> PacketResizeEgressResult {
    debug_assert_eq!(word.len(), bus.total_bytes());
    let w = bus.data_bytes();

    let keep_front = cword.output_insert_start as usize;
    let insert = (cword.output_insert_end - cword.output_insert_start) as usize;
    let resume = cword.carried_insert_start as usize;
    let end = cword.carried_insert_end as usize;

    state.staging.extend_from_slice(&word[..keep_front]);
    state.staging.extend(std::iter::repeat(0u8).take(insert));
    state.staging.extend_from_slice(&word[resume..end]);

    let mut result = PacketResizeEgressResult {
        words: Vec::new(),
        input_consumed: true,
        packet_valid: false,
    };

    if cword.eop == 0 {
        while state.staging.len() >= w {
            let mut out = vec![0u8; bus.total_bytes()];
            out[..w].copy_from_slice(&state.staging[..w]);
            bus.set_eop(&mut out, false, 0);
            state.staging.drain(..w);
            result.words.push(out);
        }
    } else {
        debug_assert_eq!(state.staging.len(), new_length as usize);
        debug_assert!(new_length > 0, "a packet cannot shrink to nothing");
        let mut offset = 0usize;
        let total = state.staging.len();
        loop {
            let chunk = (total - offset).min(w);
            let mut out = vec![0u8; bus.total_bytes()];
            out[..chunk].copy_from_slice(&state.staging[offset..offset + chunk]);
            offset += chunk;
            let last = offset >= total;
            bus.set_eop(&mut out, last, if last { w - chunk } else { 0 });
            result.words.push(out);
            if last {
                break;
            }
        }
        state.staging.clear();
    }

    result.packet_valid = !result.words.is_empty();
    result
}
