//! Diagnostic code metrics per kernel: total instruction weight, the
//! data-flow critical path and the CFG critical path.  Observational
//! output only; nothing downstream depends on these numbers.

use crate::ir::{BlockId, Cfg, Function, Inst, ValueId};
use ahash::AHashMap;
use serde::Serialize;
use tracing::info;

#[derive(Clone, Copy, Debug, Default, Serialize, PartialEq, Eq)]
pub struct CodeMetrics {
    /// Sum of instruction weights over the whole function.
    pub total_weight: u64,
    /// Longest weighted dependency chain.
    pub data_flow_critical_path: u64,
    /// Heaviest block path from entry to a return.
    pub cfg_critical_path: u64,
    /// Longest entry-to-return path measured in blocks.
    pub cfg_longest_path: u64,
}

fn inst_weight(f: &Function, inst: ValueId) -> u64 {
    match f.inst(inst) {
        Some(Inst::Load { .. }) | Some(Inst::Store { .. }) | Some(Inst::Call { .. }) => 2,
        Some(Inst::Binary { op, .. }) => match op {
            crate::ir::BinOp::Mul | crate::ir::BinOp::UDiv | crate::ir::BinOp::SDiv => 3,
            _ => 1,
        },
        Some(Inst::Br { .. }) | Some(Inst::CondBr { .. }) | Some(Inst::Switch { .. })
        | Some(Inst::Ret { .. }) => 0,
        Some(_) => 1,
        None => 0,
    }
}

/// Compute and log the metrics for one function.
pub fn run(f: &Function) -> CodeMetrics {
    let cfg = Cfg::new(f);
    let order = crate::ir::cfg::reverse_post_order(f, &cfg);

    let mut total_weight = 0u64;
    // Ready time per value: when its result becomes available assuming
    // all dependencies are met as early as possible.
    let mut ready: AHashMap<ValueId, u64> = AHashMap::new();
    // Heaviest path into each block.
    let mut block_depth: AHashMap<BlockId, u64> = AHashMap::new();
    let mut block_len: AHashMap<BlockId, u64> = AHashMap::new();
    let mut df_path = 0u64;
    let mut cfg_path = 0u64;
    let mut longest = 0u64;

    for &block in &order {
        let in_depth = cfg
            .predecessors(block)
            .iter()
            .filter_map(|p| block_depth.get(p))
            .copied()
            .max()
            .unwrap_or(0);
        let in_len = cfg
            .predecessors(block)
            .iter()
            .filter_map(|p| block_len.get(p))
            .copied()
            .max()
            .unwrap_or(0);
        let mut weight = 0u64;
        for &inst in &f.block(block).insts {
            let w = inst_weight(f, inst);
            total_weight += w;
            weight += w;
            let dep_ready = f
                .inst(inst)
                .map(|i| {
                    i.operands()
                        .iter()
                        .filter_map(|op| ready.get(op))
                        .copied()
                        .max()
                        .unwrap_or(0)
                })
                .unwrap_or(0);
            let done = dep_ready + w;
            ready.insert(inst, done);
            df_path = df_path.max(done);
        }
        let depth = in_depth + weight;
        let len = in_len + 1;
        block_depth.insert(block, depth);
        block_len.insert(block, len);
        if cfg.successors(block).is_empty() {
            cfg_path = cfg_path.max(depth);
            longest = longest.max(len);
        }
    }

    let metrics = CodeMetrics {
        total_weight,
        data_flow_critical_path: df_path,
        cfg_critical_path: cfg_path,
        cfg_longest_path: longest,
    };
    info!(
        function = %f.name,
        total = metrics.total_weight,
        df_path = metrics.data_flow_critical_path,
        cfg_path = metrics.cfg_critical_path,
        blocks = metrics.cfg_longest_path,
        "code metrics"
    );
    metrics
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{FunctionBuilder, Type};

    #[test]
    fn straight_line_metrics() {
        let mut b = FunctionBuilder::new("k", &[("x", Type::I32)], Type::I32);
        let entry = b.block("entry");
        b.switch_to(entry);
        let x = b.param(0);
        let one = b.iconst(32, 1);
        let a = b.add(Type::I32, x, one);
        let c = b.add(Type::I32, a, one);
        b.ret(Some(c));
        let f = b.finish();
        let m = run(&f);
        assert_eq!(m.total_weight, 2);
        // The two adds form a dependent chain.
        assert_eq!(m.data_flow_critical_path, 2);
        assert_eq!(m.cfg_longest_path, 1);
    }

    #[test]
    fn diamond_takes_heavier_arm() {
        let mut b = FunctionBuilder::new("k", &[("c", Type::I1), ("x", Type::I32)], Type::Void);
        let entry = b.block("entry");
        let heavy = b.block("heavy");
        let light = b.block("light");
        let join = b.block("join");
        b.switch_to(entry);
        let cond = b.param(0);
        b.cond_br(cond, heavy, light);
        b.switch_to(heavy);
        let x = b.param(1);
        let m = b.binary(crate::ir::BinOp::Mul, Type::I32, x, x);
        let _ = b.binary(crate::ir::BinOp::Mul, Type::I32, m, m);
        b.br(join);
        b.switch_to(light);
        b.br(join);
        b.switch_to(join);
        b.ret(None);
        let f = b.finish();
        let metrics = run(&f);
        assert_eq!(metrics.cfg_critical_path, 6);
        assert_eq!(metrics.cfg_longest_path, 3);
    }
}
