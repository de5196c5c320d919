use super::function::{BlockId, Function, ValueId};
use ahash::{AHashMap, AHashSet};

/// Predecessor/successor lists for a function's blocks.
pub struct Cfg {
    pub succs: Vec<Vec<BlockId>>,
    pub preds: Vec<Vec<BlockId>>,
}

impl Cfg {
    pub fn new(f: &Function) -> Cfg {
        let n = f.blocks.len();
        let mut succs = vec![Vec::new(); n];
        let mut preds = vec![Vec::new(); n];
        for (bi, _) in f.blocks.iter().enumerate() {
            let block = BlockId(bi as u32);
            if let Some(term) = f.terminator(block) {
                if let Some(inst) = f.inst(term) {
                    for succ in inst.successors() {
                        succs[bi].push(succ);
                        preds[succ.index()].push(block);
                    }
                }
            }
        }
        Cfg { succs, preds }
    }

    pub fn successors(&self, b: BlockId) -> &[BlockId] {
        &self.succs[b.index()]
    }

    pub fn predecessors(&self, b: BlockId) -> &[BlockId] {
        &self.preds[b.index()]
    }
}

/// Reverse post-order over the CFG from the entry block.
pub fn reverse_post_order(f: &Function, cfg: &Cfg) -> Vec<BlockId> {
    let n = f.blocks.len();
    let mut visited = vec![false; n];
    let mut postorder = Vec::with_capacity(n);
    // Iterative DFS; the explicit stack carries the next successor index.
    let mut stack: Vec<(BlockId, usize)> = vec![(BlockId::ENTRY, 0)];
    if n == 0 {
        return postorder;
    }
    visited[0] = true;
    while let Some((block, idx)) = stack.last_mut() {
        let succs = cfg.successors(*block);
        if *idx < succs.len() {
            let next = succs[*idx];
            *idx += 1;
            if !visited[next.index()] {
                visited[next.index()] = true;
                stack.push((next, 0));
            }
        } else {
            postorder.push(*block);
            stack.pop();
        }
    }
    postorder.reverse();
    postorder
}

/// Dominator tree (forward or, over the reversed CFG, post-dominator tree).
///
/// Built with the iterative Cooper-Harvey-Kennedy scheme.  For the
/// post-dominator variant a virtual exit joins every `ret` block, so
/// functions with several returns still have a single root.
pub struct DomTree {
    // Parent in the dominator tree, indexed by node; the root points at
    // itself.  Virtual exit (post-dominators only) is node `n`.
    idom: Vec<Option<usize>>,
    rpo_number: Vec<usize>,
    virtual_root: Option<usize>,
}

impl DomTree {
    pub fn dominators(f: &Function, cfg: &Cfg) -> DomTree {
        let n = f.blocks.len();
        let order = reverse_post_order(f, cfg);
        let nodes: Vec<usize> = order.iter().map(|b| b.index()).collect();
        let preds = |node: usize| -> Vec<usize> {
            cfg.predecessors(BlockId(node as u32)).iter().map(|b| b.index()).collect()
        };
        DomTree::build(n, 0, &nodes, preds, None)
    }

    pub fn post_dominators(f: &Function, cfg: &Cfg) -> DomTree {
        let n = f.blocks.len();
        let virtual_exit = n;
        // Reversed edges: successors of a node are its CFG predecessors;
        // the virtual exit's successors are the return blocks.
        let exits: Vec<usize> = (0..n)
            .filter(|bi| cfg.successors(BlockId(*bi as u32)).is_empty())
            .collect();
        // Post-order over the reversed graph, rooted at the virtual exit.
        let mut visited = vec![false; n + 1];
        let mut postorder: Vec<usize> = Vec::with_capacity(n + 1);
        let mut stack: Vec<(usize, usize)> = vec![(virtual_exit, 0)];
        visited[virtual_exit] = true;
        let rev_succs = |node: usize| -> Vec<usize> {
            if node == virtual_exit {
                exits.clone()
            } else {
                cfg.predecessors(BlockId(node as u32)).iter().map(|b| b.index()).collect()
            }
        };
        while let Some((node, idx)) = stack.last_mut() {
            let succs = rev_succs(*node);
            if *idx < succs.len() {
                let next = succs[*idx];
                *idx += 1;
                if !visited[next] {
                    visited[next] = true;
                    stack.push((next, 0));
                }
            } else {
                postorder.push(*node);
                stack.pop();
            }
        }
        postorder.reverse();
        let preds = |node: usize| -> Vec<usize> {
            // Predecessors in the reversed graph are CFG successors, plus
            // the virtual exit for return blocks.
            let mut out: Vec<usize> = cfg
                .successors(BlockId(node as u32))
                .iter()
                .map(|b| b.index())
                .collect();
            if out.is_empty() {
                out.push(virtual_exit);
            }
            out
        };
        DomTree::build(n + 1, virtual_exit, &postorder, preds, Some(virtual_exit))
    }

    fn build<P>(
        num_nodes: usize,
        root: usize,
        rpo: &[usize],
        preds: P,
        virtual_root: Option<usize>,
    ) -> DomTree
    where
        P: Fn(usize) -> Vec<usize>,
    {
        let mut rpo_number = vec![usize::MAX; num_nodes];
        for (i, node) in rpo.iter().enumerate() {
            rpo_number[*node] = i;
        }
        let mut idom: Vec<Option<usize>> = vec![None; num_nodes];
        idom[root] = Some(root);
        let mut changed = true;
        while changed {
            changed = false;
            for &node in rpo.iter().skip(1) {
                let mut new_idom: Option<usize> = None;
                for p in preds(node) {
                    if idom[p].is_none() {
                        continue;
                    }
                    new_idom = Some(match new_idom {
                        None => p,
                        Some(cur) => intersect(&idom, &rpo_number, p, cur),
                    });
                }
                if let Some(ni) = new_idom {
                    if idom[node] != Some(ni) {
                        idom[node] = Some(ni);
                        changed = true;
                    }
                }
            }
        }
        DomTree { idom, rpo_number, virtual_root }
    }

    /// Does `a` dominate `b`?  Every block dominates itself.
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        self.dominates_idx(a.index(), b.index())
    }

    fn dominates_idx(&self, a: usize, mut b: usize) -> bool {
        loop {
            if a == b {
                return true;
            }
            match self.idom[b] {
                Some(parent) if parent != b => b = parent,
                _ => return false,
            }
        }
    }

    /// Nearest common dominator; `None` when the only common ancestor is
    /// the virtual exit of a post-dominator tree or a node is unreachable.
    pub fn nearest_common_dominator(&self, a: BlockId, b: BlockId) -> Option<BlockId> {
        let mut x = a.index();
        let mut y = b.index();
        self.idom[x]?;
        self.idom[y]?;
        while x != y {
            while self.rpo_number[x] > self.rpo_number[y] {
                x = self.idom[x]?;
            }
            while self.rpo_number[y] > self.rpo_number[x] {
                y = self.idom[y]?;
            }
        }
        if Some(x) == self.virtual_root {
            return None;
        }
        Some(BlockId(x as u32))
    }
}

fn intersect(idom: &[Option<usize>], rpo_number: &[usize], a: usize, b: usize) -> usize {
    let mut x = a;
    let mut y = b;
    while x != y {
        while rpo_number[x] > rpo_number[y] {
            x = idom[x].unwrap();
        }
        while rpo_number[y] > rpo_number[x] {
            y = idom[y].unwrap();
        }
    }
    x
}

/// Block-level reachability with a per-query memo, owned by one pass run.
#[derive(Default)]
pub struct Reachability {
    cache: AHashMap<BlockId, AHashSet<BlockId>>,
}

impl Reachability {
    pub fn new() -> Reachability {
        Reachability::default()
    }

    /// Is `to` reachable from `from`?  A block is considered reachable from
    /// itself, matching how the merge pass uses this query.
    pub fn is_reachable(&mut self, cfg: &Cfg, from: BlockId, to: BlockId) -> bool {
        if from == to {
            return true;
        }
        if !self.cache.contains_key(&from) {
            let mut seen = AHashSet::new();
            let mut todo = vec![from];
            while let Some(b) = todo.pop() {
                for &succ in cfg.successors(b) {
                    if seen.insert(succ) {
                        todo.push(succ);
                    }
                }
            }
            self.cache.insert(from, seen);
        }
        self.cache[&from].contains(&to)
    }

    /// Instruction-level reachability: strictly-after within one block,
    /// block reachability otherwise.
    pub fn inst_reachable(
        &mut self,
        f: &Function,
        cfg: &Cfg,
        from: ValueId,
        to: ValueId,
    ) -> bool {
        let (from_bb, from_pos) = match f.position_of(from) {
            Some(p) => p,
            None => return false,
        };
        let (to_bb, to_pos) = match f.position_of(to) {
            Some(p) => p,
            None => return false,
        };
        if from_bb == to_bb {
            from_pos < to_pos
        } else {
            self.is_reachable(cfg, from_bb, to_bb)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::function::{Function, Inst};
    use crate::ir::types::Type;

    /// entry -> (a | b) -> join -> exit
    fn diamond() -> Function {
        let mut f = Function::new("d", &[("c", Type::I1)], Type::Void);
        let entry = f.add_block("entry");
        let a = f.add_block("a");
        let b = f.add_block("b");
        let join = f.add_block("join");
        let cond = f.params[0];
        f.append_inst(entry, Inst::CondBr { cond, if_true: a, if_false: b });
        f.append_inst(a, Inst::Br { dest: join });
        f.append_inst(b, Inst::Br { dest: join });
        f.append_inst(join, Inst::Ret { value: None });
        f
    }

    #[test]
    fn diamond_dominators() {
        let f = diamond();
        let cfg = Cfg::new(&f);
        let dt = DomTree::dominators(&f, &cfg);
        let (entry, a, b, join) = (BlockId(0), BlockId(1), BlockId(2), BlockId(3));
        assert!(dt.dominates(entry, join));
        assert!(!dt.dominates(a, join));
        assert_eq!(dt.nearest_common_dominator(a, b), Some(entry));
        assert_eq!(dt.nearest_common_dominator(a, join), Some(entry));
    }

    #[test]
    fn diamond_post_dominators() {
        let f = diamond();
        let cfg = Cfg::new(&f);
        let pdt = DomTree::post_dominators(&f, &cfg);
        let (entry, a, b, join) = (BlockId(0), BlockId(1), BlockId(2), BlockId(3));
        assert!(pdt.dominates(join, entry));
        assert!(pdt.dominates(join, a));
        assert!(!pdt.dominates(a, entry));
        assert_eq!(pdt.nearest_common_dominator(a, b), Some(join));
    }

    #[test]
    fn reachability() {
        let f = diamond();
        let cfg = Cfg::new(&f);
        let mut r = Reachability::new();
        assert!(r.is_reachable(&cfg, BlockId(0), BlockId(3)));
        assert!(!r.is_reachable(&cfg, BlockId(1), BlockId(2)));
        assert!(r.is_reachable(&cfg, BlockId(2), BlockId(2)));
    }
}
