//! Pointer classification: every pointer-typed value is (root, constant
//! byte offset) over a small closed set of roots.

use crate::error::{CompileError, Result};
use crate::intrinsics::{get_intrinsic, Intrinsic};
use crate::ir::{CastOp, DataLayout, Function, Inst, Type, ValueDef, ValueId};
use crate::intrinsics::args::gep_constant_offset;
use ahash::AHashMap;
use tracing::{debug, warn};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum PointerKind {
    Unknown,
    Argument,
    Stack,
    ChannelHandle,
    MapData,
}

#[derive(Clone, Copy, Debug)]
pub struct PointerInfo {
    pub kind: PointerKind,
    pub def_base: ValueId,
    pub def_offset: i64,
    /// Set when the pointer was obtained by loading through another
    /// pointer (a spilled argument).
    pub indirect: bool,
}

pub struct PointerAnalysis {
    info: AHashMap<ValueId, PointerInfo>,
}

impl PointerAnalysis {
    pub fn get(&self, v: ValueId) -> Option<&PointerInfo> {
        self.info.get(&v)
    }

    /// Classify every pointer-typed value of the function.
    pub fn run(f: &Function) -> Result<PointerAnalysis> {
        let dl = DataLayout;
        let mut analysis = PointerAnalysis { info: AHashMap::new() };

        for &param in &f.params {
            if f.result_type(param).is_pointer() {
                analysis.add_pointer(f, param, param, 0, false)?;
            }
        }

        for block in &f.blocks {
            for &inst_id in &block.insts {
                if !f.result_type(inst_id).is_pointer() {
                    continue;
                }
                let mut val = inst_id;
                let mut indirect = false;
                if let Some(Inst::Load { ptr, .. }) = f.inst(inst_id) {
                    val = *ptr;
                    indirect = true;
                }

                // Follow the chain of bitcasts and constant-offset GEPs.
                let mut offset: i64 = 0;
                loop {
                    match f.inst(val) {
                        Some(Inst::Cast { op: CastOp::Bitcast, arg, .. }) => val = *arg,
                        Some(Inst::Gep { base, pointee, indices }) => {
                            let mut const_indices = Vec::with_capacity(indices.len());
                            for idx in indices {
                                match f.const_int(*idx) {
                                    Some(c) => const_indices.push(c.as_i64()),
                                    None => {
                                        return Err(
                                            CompileError::VariablePointerArithmetic {
                                                func: f.name.clone(),
                                            },
                                        )
                                    }
                                }
                            }
                            offset += gep_constant_offset(&dl, pointee, &const_indices);
                            val = *base;
                        }
                        _ => break,
                    }
                }

                analysis.add_pointer(f, inst_id, val, offset, indirect)?;
            }
        }

        Ok(analysis)
    }

    fn add_pointer(
        &mut self,
        f: &Function,
        value: ValueId,
        def_base: ValueId,
        def_offset: i64,
        indirect: bool,
    ) -> Result<()> {
        let mut def_base = def_base;
        let kind = match f.value(def_base) {
            ValueDef::Param { .. } => PointerKind::Argument,
            ValueDef::Inst(Inst::Alloca { .. }) => PointerKind::Stack,
            ValueDef::Inst(Inst::Call { callee, args, .. }) => {
                match get_intrinsic(f, def_base) {
                    Intrinsic::ChannelCreate => PointerKind::ChannelHandle,
                    Intrinsic::MapLookup => PointerKind::MapData,
                    _ if callee == "bpf_map_lookup_elem" => PointerKind::MapData,
                    // Payload pointers alias the packet handle they were
                    // derived from; re-root them at that argument.
                    Intrinsic::PacketData | Intrinsic::PacketEnd | Intrinsic::PacketMeta => {
                        let packet = args[0];
                        if matches!(f.value(packet), ValueDef::Param { .. }) {
                            def_base = packet;
                            PointerKind::Argument
                        } else {
                            PointerKind::Unknown
                        }
                    }
                    _ => {
                        return Err(CompileError::UnknownPointerSource {
                            name: callee.clone(),
                        })
                    }
                }
            }
            _ => PointerKind::Unknown,
        };

        if indirect && kind != PointerKind::Argument {
            warn!(value = %value, "ignoring load from non-argument pointer");
        }
        if kind == PointerKind::Unknown {
            warn!(value = %value, base = %def_base, "pointer has no recognised root");
        }

        debug!(
            value = %value,
            base = %def_base,
            offset = def_offset,
            ?kind,
            "classified pointer"
        );
        self.info.insert(value, PointerInfo { kind, def_base, def_offset, indirect });
        Ok(())
    }
}

/// True when `ty` makes `v` interesting to the analysis.
pub fn is_pointer_value(f: &Function, v: ValueId) -> bool {
    matches!(f.result_type(v), Type::Ptr)
}
