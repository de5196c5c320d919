//! The packet taps: state machines translating flat packet operations
//! into per-bus-word streaming operations.
//!
//! The request, response and state records are part of the ABI between
//! the back-end and the generated streaming code; their layouts are
//! fixed.  Each tap's output stream is a function of its input stream and
//! initial state only.

pub mod eop;
pub mod length;
pub mod merge;
pub mod read;
pub mod resize;
pub mod write;

pub use eop::{packet_eop_tap, PacketEopState};
pub use length::{packet_length_tap, PacketLengthReq, PacketLengthResp, PacketLengthTapState};
pub use merge::merge_data_mask;
pub use read::{packet_read_tap, PacketReadReq, PacketReadResp, PacketReadTapState};
pub use resize::{
    packet_resize_egress_tap, packet_resize_ingress_tap, PacketResizeCword,
    PacketResizeEgressState, PacketResizeEgressResult, PacketResizeIngressState, PacketResizeReq,
};
pub use write::{packet_write_tap, PacketWriteReq, PacketWriteTapState};
