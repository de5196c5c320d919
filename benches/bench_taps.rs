//! Micro benchmarks for the packet taps. Pure CPU - no network, no IO.
//!
//! ```bash
//! cargo bench --bench bench_taps
//! ```

use criterion::{criterion_group, criterion_main, Criterion};
use nanotube_bus::taps::{
    packet_read_tap, packet_resize_egress_tap, packet_resize_ingress_tap, PacketReadReq,
    PacketReadResp, PacketReadTapState, PacketResizeEgressState, PacketResizeIngressState,
    PacketResizeReq,
};
use nanotube_bus::BusKind;

/// A deterministic 1500-byte payload split into simple-bus words.
fn packet_words(bus: BusKind, len: usize) -> Vec<Vec<u8>> {
    let data = bus.data_bytes();
    let payload: Vec<u8> = (0..len).map(|i| (i * 31 % 251) as u8).collect();
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

fn bench_read_tap(c: &mut Criterion) {
    let bus = BusKind::Simple;
    let words = packet_words(bus, 1500);
    c.bench_function("read_tap_64b_at_700", |b| {
        b.iter(|| {
            let mut state = PacketReadTapState::new();
            let mut buffer = [0u8; 64];
            let req = PacketReadReq { valid: 1, read_offset: 700, read_length: 64 };
            let mut resp = PacketReadResp::default();
            for word in &words {
                packet_read_tap(bus, &mut resp, &mut buffer, &mut state, word, &req);
            }
            std::hint::black_box((buffer, resp))
        })
    });
}

fn bench_resize_taps(c: &mut Criterion) {
    let bus = BusKind::Simple;
    let words = packet_words(bus, 1500);
    let req = PacketResizeReq { write_offset: 14, delete_length: 4, insert_length: 20 };
    c.bench_function("resize_taps_insert_20_at_14", |b| {
        b.iter(|| {
            let mut ingress = PacketResizeIngressState::new();
            let mut egress = PacketResizeEgressState::new();
            let mut new_len = 0u16;
            let mut out_words = 0usize;
            for word in &words {
                let (cword, len) = packet_resize_ingress_tap(bus, &mut ingress, &req, word);
                if let Some(len) = len {
                    new_len = len;
                }
                let step = packet_resize_egress_tap(bus, &mut egress, &cword, word, new_len);
                out_words += step.words.len();
            }
            std::hint::black_box(out_words)
        })
    });
}

criterion_group!(benches, bench_read_tap, bench_resize_taps);
criterion_main!(benches);
