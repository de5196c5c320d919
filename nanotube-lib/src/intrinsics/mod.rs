//! The intrinsic registry: maps callee symbols to a closed enum and carries
//! the per-intrinsic memory-effect contract used by the alias helper and
//! the request-merging pass.

pub mod args;

use crate::ir::{Function, ValueId};
use std::sync::OnceLock;

/// Every call target the compiler understands.  `None` is a call to an
/// ordinary function (or not a call at all); `LlvmUnknown` is a host
/// intrinsic without its own entry.
#[derive(Copy, Clone, PartialEq, Eq, Hash, Debug)]
pub enum Intrinsic {
    None,

    // Host intrinsics.
    LlvmBswap,
    LlvmDbgDeclare,
    LlvmDbgValue,
    LlvmLifetimeStart,
    LlvmLifetimeEnd,
    LlvmMemset,
    LlvmMemcpy,
    LlvmMemcmp,
    LlvmStacksave,
    LlvmStackrestore,
    LlvmUnknown,

    // Channels.
    ChannelCreate,
    ChannelSetAttr,
    ChannelExport,
    ChannelRead,
    ChannelTryRead,
    ChannelWrite,
    ChannelHasSpace,

    // Contexts and threads.
    ContextCreate,
    ContextAddChannel,
    ContextAddMap,
    ThreadCreate,
    ThreadWait,
    AddPlainPacketKernel,

    // Maps.
    MapCreate,
    MapOp,
    MapOpSend,
    MapOpReceive,
    MapLookup,
    MapRead,
    MapWrite,
    MapInsert,
    MapUpdate,
    MapRemove,
    MapGetId,
    MapProcessCapsule,

    // Packets.
    PacketRead,
    PacketWrite,
    PacketWriteMasked,
    PacketBoundedLength,
    PacketGetPort,
    PacketSetPort,
    PacketData,
    PacketEnd,
    PacketMeta,
    PacketResize,
    PacketResizeIngress,
    PacketResizeEgress,
    PacketDrop,
    PacketEdit,

    // Misc.
    GetTimeNs,
    DebugTrace,
    Malloc,
    CapsuleClassify,
    MergeDataMask,

    // Taps (only appear after hardware lowering; the setup parser rejects
    // them in strict mode).
    TapPacketRead,
    TapPacketWrite,
    TapPacketLength,
    TapPacketIsEop,
    TapPacketResizeIngress,
    TapPacketResizeEgress,
    TapPacketResizeIngressStateInit,
    TapPacketResizeEgressStateInit,
    TapMapCreate,
    TapMapAddClient,
    TapMapBuild,
    TapMapSendReq,
    TapMapRecvResp,
}

/// Coarse summary of what memory a call may touch.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum Fmrb {
    DoesNotAccess,
    OnlyReadsArgumentPointees,
    OnlyAccessesArgumentPointees,
    OnlyAccessesInaccessibleMem,
    OnlyAccessesInaccessibleOrArgMem,
    Unknown,
}

/// Per-argument access pattern through a pointer argument.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum ModRef {
    NoModRef,
    MustRef,
    MustMod,
    MustModRef,
    ModRef,
}

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SizeUnit {
    Bytes,
    Bits,
}

#[derive(Copy, Clone, Debug)]
pub struct ArgDesc {
    pub mod_ref: ModRef,
    /// Which other argument holds this argument's length, and its unit.
    pub size_arg: Option<(usize, SizeUnit)>,
}

#[derive(Copy, Clone, Debug)]
pub struct IntrinsicDesc {
    pub id: Intrinsic,
    pub symbol: &'static str,
    pub fmrb: Fmrb,
    pub args: &'static [ArgDesc],
}

const fn plain(mod_ref: ModRef) -> ArgDesc {
    ArgDesc { mod_ref, size_arg: None }
}

const fn sized(mod_ref: ModRef, size_arg: usize, unit: SizeUnit) -> ArgDesc {
    ArgDesc { mod_ref, size_arg: Some((size_arg, unit)) }
}

const N: ArgDesc = plain(ModRef::NoModRef);

use Fmrb::{
    DoesNotAccess, OnlyAccessesArgumentPointees, OnlyAccessesInaccessibleMem,
    OnlyAccessesInaccessibleOrArgMem, OnlyReadsArgumentPointees, Unknown,
};
use Intrinsic::{
    AddPlainPacketKernel, CapsuleClassify, ChannelCreate, ChannelExport, ChannelHasSpace,
    ChannelRead, ChannelSetAttr, ChannelTryRead, ChannelWrite, ContextAddChannel, ContextAddMap,
    ContextCreate, DebugTrace, GetTimeNs, LlvmBswap, LlvmDbgDeclare, LlvmDbgValue,
    LlvmLifetimeEnd, LlvmLifetimeStart, LlvmMemcmp, LlvmMemcpy, LlvmMemset, LlvmStackrestore,
    LlvmStacksave, LlvmUnknown, Malloc, MapCreate, MapGetId, MapInsert, MapLookup, MapOp,
    MapOpReceive, MapOpSend, MapProcessCapsule, MapRead, MapRemove, MapUpdate, MapWrite,
    MergeDataMask, PacketBoundedLength, PacketData, PacketDrop, PacketEdit, PacketEnd,
    PacketGetPort, PacketMeta, PacketRead, PacketResize, PacketResizeEgress, PacketResizeIngress,
    PacketSetPort, PacketWrite, PacketWriteMasked, TapMapAddClient, TapMapBuild, TapMapCreate,
    TapMapRecvResp, TapMapSendReq, TapPacketIsEop, TapPacketLength, TapPacketRead,
    TapPacketResizeEgress, TapPacketResizeEgressStateInit, TapPacketResizeIngress,
    TapPacketResizeIngressStateInit, TapPacketWrite, ThreadCreate, ThreadWait,
};
use ModRef::{MustMod, MustModRef, MustRef};
use SizeUnit::{Bits, Bytes};

/// The registry data.  One row per intrinsic: symbol, memory behaviour and
/// the width-annotated argument list.
pub static INTRINSIC_TABLE: &[IntrinsicDesc] = &[
    IntrinsicDesc {
        id: ChannelCreate,
        symbol: "nanotube_channel_create",
        fmrb: OnlyAccessesInaccessibleOrArgMem,
        args: &[plain(MustRef), N, N],
    },
    IntrinsicDesc {
        id: ChannelSetAttr,
        symbol: "nanotube_channel_set_attr",
        fmrb: OnlyAccessesInaccessibleMem,
        args: &[N, N, N],
    },
    IntrinsicDesc {
        id: ChannelExport,
        symbol: "nanotube_channel_export",
        fmrb: OnlyAccessesInaccessibleMem,
        args: &[N, N, N],
    },
    IntrinsicDesc {
        id: ChannelRead,
        symbol: "nanotube_channel_read",
        fmrb: OnlyAccessesInaccessibleOrArgMem,
        args: &[N, N, sized(MustMod, 3, Bytes), N],
    },
    IntrinsicDesc {
        id: ChannelTryRead,
        symbol: "nanotube_channel_try_read",
        fmrb: OnlyAccessesInaccessibleOrArgMem,
        args: &[N, N, sized(MustMod, 3, Bytes), N],
    },
    IntrinsicDesc {
        id: ChannelWrite,
        symbol: "nanotube_channel_write",
        fmrb: OnlyAccessesInaccessibleOrArgMem,
        args: &[N, N, sized(MustRef, 3, Bytes), N],
    },
    IntrinsicDesc {
        id: ChannelHasSpace,
        symbol: "nanotube_channel_has_space",
        fmrb: OnlyAccessesInaccessibleMem,
        args: &[N, N],
    },
    IntrinsicDesc {
        id: ContextCreate,
        symbol: "nanotube_context_create",
        fmrb: OnlyAccessesInaccessibleMem,
        args: &[],
    },
    IntrinsicDesc {
        id: ContextAddChannel,
        symbol: "nanotube_context_add_channel",
        fmrb: OnlyAccessesInaccessibleMem,
        args: &[N, N, N, N],
    },
    IntrinsicDesc {
        id: ContextAddMap,
        symbol: "nanotube_context_add_map",
        fmrb: OnlyAccessesInaccessibleMem,
        args: &[N, N],
    },
    IntrinsicDesc {
        id: ThreadCreate,
        symbol: "nanotube_thread_create",
        fmrb: OnlyAccessesInaccessibleOrArgMem,
        args: &[N, plain(MustRef), N, sized(MustRef, 4, Bytes), N],
    },
    IntrinsicDesc {
        id: ThreadWait,
        symbol: "nanotube_thread_wait",
        fmrb: OnlyAccessesInaccessibleMem,
        args: &[N],
    },
    IntrinsicDesc {
        id: AddPlainPacketKernel,
        symbol: "nanotube_add_plain_packet_kernel",
        fmrb: OnlyAccessesInaccessibleOrArgMem,
        args: &[plain(MustRef), N, N, N],
    },
    IntrinsicDesc {
        id: MapCreate,
        symbol: "nanotube_map_create",
        fmrb: OnlyAccessesInaccessibleMem,
        args: &[N, N, N, N],
    },
    IntrinsicDesc {
        id: MapOp,
        symbol: "nanotube_map_op",
        fmrb: OnlyAccessesInaccessibleOrArgMem,
        args: &[
            N,
            N,
            N,
            sized(MustRef, 4, Bytes),
            N,
            sized(MustRef, 9, Bytes),
            sized(MustMod, 9, Bytes),
            sized(MustRef, 9, Bits),
            N,
            N,
        ],
    },
    IntrinsicDesc {
        id: MapOpSend,
        symbol: "nanotube_map_op_send",
        fmrb: OnlyAccessesInaccessibleOrArgMem,
        args: &[
            N,
            N,
            N,
            sized(MustRef, 4, Bytes),
            N,
            sized(MustRef, 8, Bytes),
            sized(MustRef, 8, Bits),
            N,
            N,
        ],
    },
    IntrinsicDesc {
        id: MapOpReceive,
        symbol: "nanotube_map_op_receive",
        fmrb: OnlyAccessesInaccessibleOrArgMem,
        args: &[N, N, sized(MustMod, 3, Bytes), N],
    },
    IntrinsicDesc {
        id: MapLookup,
        symbol: "nanotube_map_lookup",
        fmrb: OnlyAccessesInaccessibleOrArgMem,
        args: &[N, N, sized(MustRef, 3, Bytes), N, N],
    },
    IntrinsicDesc {
        id: MapRead,
        symbol: "nanotube_map_read",
        fmrb: OnlyAccessesInaccessibleOrArgMem,
        args: &[N, N, sized(MustRef, 3, Bytes), N, sized(MustMod, 6, Bytes), N, N],
    },
    IntrinsicDesc {
        id: MapWrite,
        symbol: "nanotube_map_write",
        fmrb: OnlyAccessesInaccessibleOrArgMem,
        args: &[N, N, sized(MustRef, 3, Bytes), N, sized(MustRef, 6, Bytes), N, N],
    },
    IntrinsicDesc {
        id: MapInsert,
        symbol: "nanotube_map_insert",
        fmrb: OnlyAccessesInaccessibleOrArgMem,
        args: &[
            N,
            N,
            sized(MustRef, 3, Bytes),
            N,
            sized(MustRef, 7, Bytes),
            sized(MustRef, 7, Bits),
            N,
            N,
        ],
    },
    IntrinsicDesc {
        id: MapUpdate,
        symbol: "nanotube_map_update",
        fmrb: OnlyAccessesInaccessibleOrArgMem,
        args: &[
            N,
            N,
            sized(MustRef, 3, Bytes),
            N,
            sized(MustRef, 7, Bytes),
            sized(MustRef, 7, Bits),
            N,
            N,
        ],
    },
    IntrinsicDesc {
        id: MapRemove,
        symbol: "nanotube_map_remove",
        fmrb: OnlyAccessesInaccessibleOrArgMem,
        args: &[N, N, sized(MustRef, 3, Bytes), N],
    },
    IntrinsicDesc {
        id: MapGetId,
        symbol: "nanotube_map_get_id",
        fmrb: OnlyAccessesInaccessibleMem,
        args: &[N],
    },
    IntrinsicDesc {
        id: MapProcessCapsule,
        symbol: "nanotube_map_process_capsule",
        fmrb: OnlyAccessesInaccessibleOrArgMem,
        args: &[N, N, sized(MustModRef, 3, Bytes), N],
    },
    IntrinsicDesc {
        id: PacketRead,
        symbol: "nanotube_packet_read",
        fmrb: OnlyAccessesInaccessibleOrArgMem,
        args: &[N, sized(MustMod, 3, Bytes), N, N],
    },
    IntrinsicDesc {
        id: PacketWrite,
        symbol: "nanotube_packet_write",
        fmrb: OnlyAccessesInaccessibleOrArgMem,
        args: &[N, sized(MustRef, 3, Bytes), N, N],
    },
    IntrinsicDesc {
        id: PacketWriteMasked,
        symbol: "nanotube_packet_write_masked",
        fmrb: OnlyAccessesInaccessibleOrArgMem,
        args: &[N, sized(MustRef, 4, Bytes), sized(MustRef, 4, Bits), N, N],
    },
    IntrinsicDesc {
        id: PacketBoundedLength,
        symbol: "nanotube_packet_bounded_length",
        fmrb: OnlyAccessesInaccessibleMem,
        args: &[N, N],
    },
    IntrinsicDesc {
        id: PacketGetPort,
        symbol: "nanotube_packet_get_port",
        fmrb: OnlyAccessesInaccessibleMem,
        args: &[N],
    },
    IntrinsicDesc {
        id: PacketSetPort,
        symbol: "nanotube_packet_set_port",
        fmrb: OnlyAccessesInaccessibleMem,
        args: &[N, N],
    },
    IntrinsicDesc {
        id: PacketData,
        symbol: "nanotube_packet_data",
        fmrb: OnlyAccessesInaccessibleMem,
        args: &[N],
    },
    IntrinsicDesc {
        id: PacketEnd,
        symbol: "nanotube_packet_end",
        fmrb: OnlyAccessesInaccessibleMem,
        args: &[N],
    },
    IntrinsicDesc {
        id: PacketMeta,
        symbol: "nanotube_packet_meta",
        fmrb: OnlyAccessesInaccessibleMem,
        args: &[N],
    },
    IntrinsicDesc {
        id: PacketResize,
        symbol: "nanotube_packet_resize",
        fmrb: OnlyAccessesInaccessibleMem,
        args: &[N, N, N],
    },
    IntrinsicDesc {
        id: PacketResizeIngress,
        symbol: "nanotube_packet_resize_ingress",
        fmrb: OnlyAccessesInaccessibleOrArgMem,
        args: &[plain(MustMod), plain(MustMod), N, N, N],
    },
    IntrinsicDesc {
        id: PacketResizeEgress,
        symbol: "nanotube_packet_resize_egress",
        fmrb: OnlyAccessesInaccessibleOrArgMem,
        args: &[N, plain(MustRef), N],
    },
    IntrinsicDesc {
        id: PacketDrop,
        symbol: "nanotube_packet_drop",
        fmrb: OnlyAccessesInaccessibleMem,
        args: &[N, N],
    },
    IntrinsicDesc {
        id: PacketEdit,
        symbol: "nanotube_packet_edit",
        fmrb: OnlyAccessesInaccessibleOrArgMem,
        args: &[N, N, N, N],
    },
    IntrinsicDesc {
        id: GetTimeNs,
        symbol: "nanotube_get_time_ns",
        fmrb: OnlyAccessesInaccessibleMem,
        args: &[],
    },
    IntrinsicDesc {
        id: DebugTrace,
        symbol: "nanotube_debug_trace",
        fmrb: OnlyAccessesInaccessibleMem,
        args: &[N, N],
    },
    IntrinsicDesc {
        id: Malloc,
        symbol: "nanotube_malloc",
        fmrb: OnlyAccessesInaccessibleMem,
        args: &[N],
    },
    IntrinsicDesc {
        id: CapsuleClassify,
        symbol: "nanotube_capsule_classify",
        fmrb: OnlyAccessesInaccessibleMem,
        args: &[N],
    },
    IntrinsicDesc {
        id: MergeDataMask,
        symbol: "nanotube_merge_data_mask",
        fmrb: OnlyAccessesArgumentPointees,
        args: &[
            sized(MustModRef, 5, Bytes),
            sized(MustModRef, 5, Bits),
            sized(MustRef, 5, Bytes),
            sized(MustRef, 5, Bits),
            N,
            N,
        ],
    },
    IntrinsicDesc {
        id: TapPacketRead,
        symbol: "nanotube_tap_packet_read",
        fmrb: Unknown,
        args: &[],
    },
    IntrinsicDesc {
        id: TapPacketWrite,
        symbol: "nanotube_tap_packet_write",
        fmrb: Unknown,
        args: &[],
    },
    IntrinsicDesc {
        id: TapPacketLength,
        symbol: "nanotube_tap_packet_length",
        fmrb: Unknown,
        args: &[],
    },
    IntrinsicDesc {
        id: TapPacketIsEop,
        symbol: "nanotube_tap_packet_is_eop",
        fmrb: Unknown,
        args: &[],
    },
    IntrinsicDesc {
        id: TapPacketResizeIngress,
        symbol: "nanotube_tap_packet_resize_ingress",
        fmrb: Unknown,
        args: &[],
    },
    IntrinsicDesc {
        id: TapPacketResizeEgress,
        symbol: "nanotube_tap_packet_resize_egress",
        fmrb: Unknown,
        args: &[],
    },
    IntrinsicDesc {
        id: TapPacketResizeIngressStateInit,
        symbol: "nanotube_tap_packet_resize_ingress_state_init",
        fmrb: Unknown,
        args: &[],
    },
    IntrinsicDesc {
        id: TapPacketResizeEgressStateInit,
        symbol: "nanotube_tap_packet_resize_egress_state_init",
        fmrb: Unknown,
        args: &[],
    },
    IntrinsicDesc { id: TapMapCreate, symbol: "nanotube_tap_map_create", fmrb: Unknown, args: &[] },
    IntrinsicDesc {
        id: TapMapAddClient,
        symbol: "nanotube_tap_map_add_client",
        fmrb: Unknown,
        args: &[],
    },
    IntrinsicDesc { id: TapMapBuild, symbol: "nanotube_tap_map_build", fmrb: Unknown, args: &[] },
    IntrinsicDesc {
        id: TapMapSendReq,
        symbol: "nanotube_tap_map_send_req",
        fmrb: Unknown,
        args: &[],
    },
    IntrinsicDesc {
        id: TapMapRecvResp,
        symbol: "nanotube_tap_map_recv_resp",
        fmrb: Unknown,
        args: &[],
    },
    // Host intrinsics.  Size links for the memory ones feed the alias
    // helper exactly like the Nanotube rows above.
    IntrinsicDesc {
        id: LlvmMemcpy,
        symbol: "llvm.memcpy",
        fmrb: OnlyAccessesArgumentPointees,
        args: &[sized(MustMod, 2, Bytes), sized(MustRef, 2, Bytes), N],
    },
    IntrinsicDesc {
        id: LlvmMemset,
        symbol: "llvm.memset",
        fmrb: OnlyAccessesArgumentPointees,
        args: &[sized(MustMod, 2, Bytes), N, N],
    },
    IntrinsicDesc {
        id: LlvmMemcmp,
        symbol: "memcmp",
        fmrb: OnlyReadsArgumentPointees,
        args: &[sized(MustRef, 2, Bytes), sized(MustRef, 2, Bytes), N],
    },
    IntrinsicDesc { id: LlvmBswap, symbol: "llvm.bswap", fmrb: DoesNotAccess, args: &[N] },
    IntrinsicDesc {
        id: LlvmDbgDeclare,
        symbol: "llvm.dbg.declare",
        fmrb: DoesNotAccess,
        args: &[N, N],
    },
    IntrinsicDesc { id: LlvmDbgValue, symbol: "llvm.dbg.value", fmrb: DoesNotAccess, args: &[N, N] },
    IntrinsicDesc {
        id: LlvmLifetimeStart,
        symbol: "llvm.lifetime.start",
        fmrb: DoesNotAccess,
        args: &[N, N],
    },
    IntrinsicDesc {
        id: LlvmLifetimeEnd,
        symbol: "llvm.lifetime.end",
        fmrb: DoesNotAccess,
        args: &[N, N],
    },
    IntrinsicDesc { id: LlvmStacksave, symbol: "llvm.stacksave", fmrb: DoesNotAccess, args: &[] },
    IntrinsicDesc {
        id: LlvmStackrestore,
        symbol: "llvm.stackrestore",
        fmrb: DoesNotAccess,
        args: &[N],
    },
];

fn symbol_map() -> &'static ahash::AHashMap<&'static str, Intrinsic> {
    static MAP: OnceLock<ahash::AHashMap<&'static str, Intrinsic>> = OnceLock::new();
    MAP.get_or_init(|| INTRINSIC_TABLE.iter().map(|d| (d.symbol, d.id)).collect())
}

fn desc_map() -> &'static ahash::AHashMap<Intrinsic, &'static IntrinsicDesc> {
    static MAP: OnceLock<ahash::AHashMap<Intrinsic, &'static IntrinsicDesc>> = OnceLock::new();
    MAP.get_or_init(|| INTRINSIC_TABLE.iter().map(|d| (d.id, d)).collect())
}

/// Identify a callee symbol.  Mangled host intrinsics are matched by
/// prefix, e.g. `llvm.memcpy.p0.p0.i64`.
pub fn intrinsic_from_symbol(symbol: &str) -> Intrinsic {
    if let Some(id) = symbol_map().get(symbol) {
        return *id;
    }
    if let Some(rest) = symbol.strip_prefix("llvm.") {
        for prefix in [
            ("memcpy", LlvmMemcpy),
            ("memset", LlvmMemset),
            ("bswap", LlvmBswap),
            ("dbg.declare", LlvmDbgDeclare),
            ("dbg.value", LlvmDbgValue),
            ("lifetime.start", LlvmLifetimeStart),
            ("lifetime.end", LlvmLifetimeEnd),
            ("stacksave", LlvmStacksave),
            ("stackrestore", LlvmStackrestore),
        ] {
            if rest.starts_with(prefix.0) {
                return prefix.1;
            }
        }
        return LlvmUnknown;
    }
    Intrinsic::None
}

/// Identify an instruction.  Non-calls are `Intrinsic::None`.
pub fn get_intrinsic(f: &Function, inst: ValueId) -> Intrinsic {
    match f.call_target(inst) {
        Some(symbol) => intrinsic_from_symbol(symbol),
        None => Intrinsic::None,
    }
}

pub fn intrinsic_to_string(id: Intrinsic) -> &'static str {
    match desc_map().get(&id) {
        Some(d) => d.symbol,
        None => match id {
            Intrinsic::None => "<none>",
            LlvmUnknown => "<unknown llvm intrinsic>",
            _ => "<unknown>",
        },
    }
}

/// True for intrinsics with no runtime effect; they carry compile-time
/// information only.
pub fn intrinsic_is_nop(id: Intrinsic) -> bool {
    matches!(id, LlvmLifetimeStart | LlvmLifetimeEnd | LlvmDbgDeclare | LlvmDbgValue)
}

pub fn intrinsic_desc(id: Intrinsic) -> Option<&'static IntrinsicDesc> {
    desc_map().get(&id).copied()
}

/// The access pattern for an argument.  Unknown callees over-approximate.
pub fn arg_mod_ref(id: Intrinsic, arg_idx: usize) -> ModRef {
    if id == Intrinsic::None || id == LlvmUnknown {
        return ModRef::ModRef;
    }
    match intrinsic_desc(id) {
        Some(desc) => desc.args.get(arg_idx).map(|a| a.mod_ref).unwrap_or(ModRef::ModRef),
        None => ModRef::ModRef,
    }
}

pub fn fn_mem_ref_behavior(id: Intrinsic) -> Fmrb {
    match intrinsic_desc(id) {
        Some(desc) => desc.fmrb,
        None => Fmrb::Unknown,
    }
}

/// The (size argument index, unit) link for a pointer argument, if the
/// registry declares one.
pub fn size_arg_link(id: Intrinsic, arg_idx: usize) -> Option<(usize, SizeUnit)> {
    intrinsic_desc(id)?.args.get(arg_idx)?.size_arg
}

/// Packet-side accesses as the request-merging pass understands them.
pub fn is_packet_access(id: Intrinsic) -> bool {
    matches!(
        id,
        PacketRead | PacketWrite | PacketWriteMasked | PacketBoundedLength | PacketResize
    )
}

/// Map-side accesses.
pub fn is_map_access(id: Intrinsic) -> bool {
    matches!(
        id,
        MapOp | MapOpSend | MapOpReceive | MapLookup | MapRead | MapWrite | MapInsert | MapUpdate
            | MapRemove
    )
}

pub fn is_read_access(id: Intrinsic) -> bool {
    matches!(id, PacketRead | MapRead | MapLookup)
}

pub fn is_write_access(id: Intrinsic) -> bool {
    matches!(id, PacketWrite | PacketWriteMasked | MapWrite | MapInsert | MapUpdate | MapRemove)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_lookup() {
        assert_eq!(intrinsic_from_symbol("nanotube_packet_read"), PacketRead);
        assert_eq!(intrinsic_from_symbol("llvm.memcpy.p0.p0.i64"), LlvmMemcpy);
        assert_eq!(intrinsic_from_symbol("llvm.umax.i32"), LlvmUnknown);
        assert_eq!(intrinsic_from_symbol("helper"), Intrinsic::None);
        assert_eq!(intrinsic_from_symbol("memcmp"), LlvmMemcmp);
    }

    #[test]
    fn nop_set() {
        assert!(intrinsic_is_nop(LlvmLifetimeStart));
        assert!(intrinsic_is_nop(LlvmDbgValue));
        assert!(!intrinsic_is_nop(PacketRead));
    }

    #[test]
    fn mod_ref_over_approximates_unknown_callees() {
        assert_eq!(arg_mod_ref(Intrinsic::None, 0), ModRef::ModRef);
        assert_eq!(arg_mod_ref(LlvmUnknown, 3), ModRef::ModRef);
        assert_eq!(arg_mod_ref(PacketRead, 1), ModRef::MustMod);
        assert_eq!(arg_mod_ref(PacketWriteMasked, 2), ModRef::MustRef);
    }

    #[test]
    fn size_links_match_argument_conventions() {
        assert_eq!(size_arg_link(PacketRead, 1), Some((3, SizeUnit::Bytes)));
        assert_eq!(size_arg_link(PacketWriteMasked, 2), Some((4, SizeUnit::Bits)));
        assert_eq!(size_arg_link(MapOp, 3), Some((4, SizeUnit::Bytes)));
        assert_eq!(size_arg_link(MapOp, 7), Some((9, SizeUnit::Bits)));
        assert_eq!(size_arg_link(MapInsert, 5), Some((7, SizeUnit::Bits)));
        assert_eq!(size_arg_link(LlvmMemcpy, 1), Some((2, SizeUnit::Bytes)));
        assert_eq!(size_arg_link(PacketRead, 0), None);
    }
}
