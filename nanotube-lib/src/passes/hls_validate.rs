//! Validation of thread and kernel functions for HLS output.
//!
//! The control flow must be loop-free: starting from the entry block, a
//! block may be visited once all of its predecessors have been, and every
//! block must be visited this way.  At the same time each invocation must
//! obey the call protocol:
//!
//!   R1. There must be channel activity or a call to thread_wait.
//!   R2. Every call to thread_wait must follow a failed read.
//!   R3. There must be no thread_wait after a blocking call.
//!   R4. Only nop instructions and branches can follow a thread_wait.
//!
//! The rules are tracked through four flags (`can_return`, `read_fail`,
//! `no_blocking`, `no_wait`); joins combine flags with logical AND, and
//! branch edges on the result of `channel_try_read` add `can_return` on
//! the success edge and `read_fail` on the failure edge.

use crate::error::{CompileError, Result};
use crate::intrinsics::{get_intrinsic, intrinsic_is_nop, Intrinsic};
use crate::ir::{BlockId, Cfg, Function, ICmpPred, Inst, ValueId};
use ahash::AHashMap;
use tracing::debug;

bitflags::bitflags! {
    #[derive(Copy, Clone, PartialEq, Eq, Debug)]
    struct ThreadFlags: u8 {
        const CAN_RETURN = 1 << 0;
        const READ_FAIL = 1 << 1;
        const NO_BLOCKING = 1 << 2;
        const NO_WAIT = 1 << 3;
    }
}

const DEFAULT_FLAGS: ThreadFlags = ThreadFlags::NO_BLOCKING.union(ThreadFlags::NO_WAIT);

/// Options for the historically disabled checks.  Both default to off and
/// are reachable through the driver's strict mode.
#[derive(Copy, Clone, Default)]
pub struct HlsValidateOptions {
    /// Require `can_return` on every return.
    pub check_can_return: bool,
    /// Require `read_fail` before a call to thread_wait.
    pub check_read_fail: bool,
}

pub fn run(f: &Function, options: HlsValidateOptions) -> Result<()> {
    Validator { f, cfg: Cfg::new(f), options, flags: AHashMap::new() }.validate()
}

struct Validator<'f> {
    f: &'f Function,
    cfg: Cfg,
    options: HlsValidateOptions,
    flags: AHashMap<BlockId, ThreadFlags>,
}

impl<'f> Validator<'f> {
    fn validate(mut self) -> Result<()> {
        let entry = self.f.entry();
        let mut entry_flags = DEFAULT_FLAGS;
        self.update_flags_for_block(&mut entry_flags, entry)?;
        self.flags.insert(entry, entry_flags);

        let mut pending = vec![entry];
        while let Some(block) = pending.pop() {
            for &succ in self.cfg.successors(block).to_vec().iter() {
                self.try_visit(succ, &mut pending)?;
            }
        }

        // Any unvisited block has a predecessor cycle.
        for (bi, _) in self.f.blocks.iter().enumerate() {
            let block = BlockId(bi as u32);
            if !self.flags.contains_key(&block) {
                return Err(CompileError::HlsValidation {
                    func: self.f.name.clone(),
                    reason: format!(
                        "function contains a loop or loops (block '{}' is unreachable in \
                         topological order)",
                        self.f.block(block).name
                    ),
                });
            }
        }
        Ok(())
    }

    fn try_visit(&mut self, block: BlockId, pending: &mut Vec<BlockId>) -> Result<()> {
        if self.flags.contains_key(&block) {
            return Ok(());
        }
        let mut flags = ThreadFlags::all();
        for &pred in self.cfg.predecessors(block) {
            let Some(pred_flags) = self.flags.get(&pred).copied() else {
                // Not all predecessors visited yet.
                return Ok(());
            };
            flags &= self.adjust_edge_flags(pred, block, pred_flags);
        }
        debug!(block = %self.f.block(block).name, ?flags, "visiting block");
        self.update_flags_for_block(&mut flags, block)?;
        self.flags.insert(block, flags);
        pending.push(block);
        Ok(())
    }

    fn update_flags_for_block(&self, flags: &mut ThreadFlags, block: BlockId) -> Result<()> {
        for &inst_id in &self.f.block(block).insts {
            let inst = self.f.inst(inst_id).expect("block holds non-instruction");
            match inst {
                Inst::Br { .. } | Inst::CondBr { .. } | Inst::Switch { .. } | Inst::Gep { .. } => {}
                Inst::Cast { .. } => {}
                Inst::Ret { .. } => self.check_flags_for_return(*flags, inst_id)?,
                Inst::Call { .. } => self.update_flags_for_call(flags, inst_id)?,
                _ => {
                    if !flags.contains(ThreadFlags::NO_WAIT) {
                        return Err(self.invalid_after_wait(inst_id));
                    }
                }
            }
        }
        Ok(())
    }

    fn check_flags_for_return(&self, flags: ThreadFlags, inst: ValueId) -> Result<()> {
        if self.options.check_can_return && !flags.contains(ThreadFlags::CAN_RETURN) {
            return Err(CompileError::HlsValidation {
                func: self.f.name.clone(),
                reason: format!(
                    "function can return without activity: {}",
                    self.f.display_value(inst)
                ),
            });
        }
        Ok(())
    }

    fn update_flags_for_call(&self, flags: &mut ThreadFlags, inst: ValueId) -> Result<()> {
        match get_intrinsic(self.f, inst) {
            Intrinsic::ChannelWrite => {
                if !flags.contains(ThreadFlags::NO_WAIT) {
                    return Err(CompileError::HlsValidation {
                        func: self.f.name.clone(),
                        reason: format!(
                            "invalid write to channel after call to nanotube_thread_wait: {}",
                            self.f.display_value(inst)
                        ),
                    });
                }
                flags.insert(ThreadFlags::CAN_RETURN);
                flags.remove(ThreadFlags::NO_BLOCKING);
            }
            Intrinsic::ThreadWait => {
                if !flags.contains(ThreadFlags::NO_WAIT) {
                    return Err(CompileError::HlsValidation {
                        func: self.f.name.clone(),
                        reason: format!(
                            "multiple calls to nanotube_thread_wait: {}",
                            self.f.display_value(inst)
                        ),
                    });
                }
                if self.options.check_read_fail && !flags.contains(ThreadFlags::READ_FAIL) {
                    return Err(CompileError::HlsValidation {
                        func: self.f.name.clone(),
                        reason: format!(
                            "call to nanotube_thread_wait does not follow a read failure: {}",
                            self.f.display_value(inst)
                        ),
                    });
                }
                if !flags.contains(ThreadFlags::NO_BLOCKING) {
                    return Err(CompileError::HlsValidation {
                        func: self.f.name.clone(),
                        reason: format!(
                            "call to nanotube_thread_wait follows a blocking call: {}",
                            self.f.display_value(inst)
                        ),
                    });
                }
                flags.insert(ThreadFlags::CAN_RETURN);
                flags.remove(ThreadFlags::NO_BLOCKING | ThreadFlags::NO_WAIT);
            }
            other => {
                if !intrinsic_is_nop(other) && !flags.contains(ThreadFlags::NO_WAIT) {
                    return Err(self.invalid_after_wait(inst));
                }
            }
        }
        Ok(())
    }

    fn invalid_after_wait(&self, inst: ValueId) -> CompileError {
        CompileError::HlsValidation {
            func: self.f.name.clone(),
            reason: format!(
                "invalid instruction after call to nanotube_thread_wait: {}",
                self.f.display_value(inst)
            ),
        }
    }

    /// Extra flags on a branch edge whose condition is the result of
    /// `channel_try_read`, possibly through icmp-eq/ne-zero inversions.
    fn adjust_edge_flags(
        &self,
        pred: BlockId,
        succ: BlockId,
        flags: ThreadFlags,
    ) -> ThreadFlags {
        let Some(term) = self.f.terminator(pred) else { return flags };
        let Some(Inst::CondBr { cond, if_true, if_false }) = self.f.inst(term) else {
            return flags;
        };
        let mut is_true = succ == *if_true;
        if *if_true == *if_false {
            // Both edges target the join; no information.
            return flags;
        }

        // Strip equality-with-zero modifiers.
        let mut cond = *cond;
        loop {
            let Some(Inst::ICmp { pred: cmp, lhs, rhs }) = self.f.inst(cond) else { break };
            let is_eq = matches!(cmp, ICmpPred::Eq);
            let is_ne = matches!(cmp, ICmpPred::Ne);
            if !(is_eq || is_ne) {
                break;
            }
            let Some(c) = self.f.const_int(*rhs) else { break };
            if !c.is_zero() {
                break;
            }
            if is_eq {
                is_true = !is_true;
            }
            cond = *lhs;
        }

        if get_intrinsic(self.f, cond) == Intrinsic::ChannelTryRead {
            return if is_true {
                flags | ThreadFlags::CAN_RETURN
            } else {
                flags | ThreadFlags::READ_FAIL
            };
        }
        flags
    }
}
