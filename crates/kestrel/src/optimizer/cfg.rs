//! Control-flow graph construction.
//!
//! The graph is rooted at the entry block. Handler blocks are entered as soon
//! as the block they protect is discovered, so exception edges live in the
//! same adjacency maps as ordinary jumps. Continuations of `yield`/`await`
//! are additionally recorded as *exported*: the generator can resume there
//! from outside the function, so later passes must keep them addressable.
//!
//! A `Cfg` only stores block ids. It is rebuilt from scratch whenever block
//! identities change and is never patched incrementally.

use crate::ir::{BlockId, FunctionUnit, Instr, Reg};
use anyhow::{bail, Result};
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;

/// Loop tail → loop headers it jumps back to.
pub type BackEdges = HashMap<BlockId, BTreeSet<BlockId>>;

/// Registers live around one block.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Liveness {
    /// Registers live immediately before the block's first instruction
    pub live_in: BTreeSet<Reg>,
    /// Registers live immediately after the block's terminator
    pub live_out: BTreeSet<Reg>,
}

/// Control-flow graph of one function unit.
#[derive(Debug, Clone)]
pub struct Cfg {
    /// Entry block the graph was built from
    pub entry: BlockId,

    /// Successors of every reachable block, handler edges included
    pub forward: HashMap<BlockId, BTreeSet<BlockId>>,

    /// Predecessors of every reachable block; mirror of `forward`
    pub inverted: HashMap<BlockId, BTreeSet<BlockId>>,

    /// Continuations of suspension points
    pub exported: BTreeSet<BlockId>,

    /// Set by the loop finder; `None` until then
    pub back_edges: Option<BackEdges>,

    /// Set by liveness analysis; empty until then
    pub liveness: HashMap<BlockId, Liveness>,
}

impl Cfg {
    fn empty(entry: BlockId) -> Self {
        Self {
            entry,
            forward: HashMap::new(),
            inverted: HashMap::new(),
            exported: BTreeSet::new(),
            back_edges: None,
            liveness: HashMap::new(),
        }
    }

    /// Builds the graph of every block reachable from `unit.entry`.
    pub fn build(unit: &FunctionUnit) -> Result<Self> {
        let block_map = unit.block_map();
        let mut cfg = Cfg::empty(unit.entry);

        // (block, index of the next instruction to scan)
        let mut stack: Vec<(BlockId, usize)> = Vec::new();
        cfg.discover(unit, &block_map, unit.entry, &mut stack)?;

        while let Some((id, pos)) = stack.pop() {
            let block = &unit.blocks[block_map[&id]];
            let Some(instr) = block.instructions.get(pos) else {
                continue;
            };
            stack.push((id, pos + 1));

            let targets = match instr {
                Instr::JumpTable { table, .. } => unit.dispatch_table(*table)?.distinct_targets(),
                other => {
                    let mut targets = Vec::new();
                    other.for_each_target(|t| targets.push(t));
                    targets
                }
            };
            if let Some(resume) = instr.resume_target() {
                cfg.exported.insert(resume);
            }
            for target in targets {
                cfg.add_edge(id, target);
                cfg.discover(unit, &block_map, target, &mut stack)?;
            }
        }

        log::trace!(
            target: "cfg",
            "built cfg for `{}`: {} blocks, {} exported",
            unit.name,
            cfg.forward.len(),
            cfg.exported.len()
        );
        Ok(cfg)
    }

    /// Enters `id` if it has not been seen yet, along with its handler.
    fn discover(
        &mut self,
        unit: &FunctionUnit,
        block_map: &HashMap<BlockId, usize>,
        id: BlockId,
        stack: &mut Vec<(BlockId, usize)>,
    ) -> Result<()> {
        let mut pending = vec![id];
        while let Some(id) = pending.pop() {
            if self.forward.contains_key(&id) {
                continue;
            }
            let Some(&idx) = block_map.get(&id) else {
                bail!(
                    "CFG invariant violated: `{}` references {} which is not in the block list",
                    unit.name,
                    id
                );
            };
            self.forward.insert(id, BTreeSet::new());
            self.inverted.entry(id).or_default();
            stack.push((id, 0));

            if let Some(handler) = unit.blocks[idx].handler {
                self.add_edge(id, handler);
                pending.push(handler);
            }
        }
        Ok(())
    }

    fn add_edge(&mut self, from: BlockId, to: BlockId) {
        self.forward.entry(from).or_default().insert(to);
        self.inverted.entry(to).or_default().insert(from);
    }

    /// Successors of `id` (empty for blocks outside the graph).
    pub fn successors(&self, id: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.forward.get(&id).into_iter().flatten().copied()
    }

    /// Predecessors of `id` (empty for blocks outside the graph).
    pub fn predecessors(&self, id: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.inverted.get(&id).into_iter().flatten().copied()
    }

    pub fn contains(&self, id: BlockId) -> bool {
        self.forward.contains_key(&id)
    }

    /// Whether `from → to` was classified as a back edge.
    pub fn is_back_edge(&self, from: BlockId, to: BlockId) -> bool {
        self.back_edges
            .as_ref()
            .and_then(|edges| edges.get(&from))
            .is_some_and(|headers| headers.contains(&to))
    }

    /// Human-readable dump in block layout order.
    pub fn dump(&self, unit: &FunctionUnit) -> String {
        let names = |ids: Vec<BlockId>| -> String {
            ids.into_iter()
                .map(|id| unit.block_name(id))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let regs = |set: &BTreeSet<Reg>| -> String {
            set.iter().map(Reg::to_string).collect::<Vec<_>>().join(" ")
        };

        let mut out = String::new();
        let _ = writeln!(out, "cfg {}:", unit.name);
        for block in unit.blocks.iter().filter(|b| self.contains(b.id)) {
            let mut marks = String::new();
            if block.id == self.entry {
                marks.push_str(" (entry)");
            }
            if self.exported.contains(&block.id) {
                marks.push_str(" (exported)");
            }
            let _ = writeln!(
                out,
                "  {}{} -> [{}]",
                block.name,
                marks,
                names(self.successors(block.id).collect())
            );
            if let Some(headers) = self.back_edges.as_ref().and_then(|e| e.get(&block.id)) {
                let _ = writeln!(out, "    back edges: [{}]", names(headers.iter().copied().collect()));
            }
            if let Some(live) = self.liveness.get(&block.id) {
                let _ = writeln!(
                    out,
                    "    live in: {{{}}} out: {{{}}}",
                    regs(&live.live_in),
                    regs(&live.live_out)
                );
            }
        }
        out
    }
}
