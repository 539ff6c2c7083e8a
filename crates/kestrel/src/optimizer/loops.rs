//! Back-edge detection.
//!
//! A depth-first walk from the entry keeps the blocks of the current path on
//! a chain. An edge to a block still on the chain closes a loop: the source is
//! the loop tail, the target its header. The walk is iterative, so nesting
//! depth is bounded by [`Limits::max_depth`] rather than by the native stack.

use super::cfg::{BackEdges, Cfg};
use super::limits::{Limit, Limits};
use crate::ir::{BlockId, FunctionUnit};
use anyhow::{bail, Result};
use std::collections::HashSet;

struct Frame {
    block: BlockId,
    successors: Vec<BlockId>,
    next: usize,
}

impl Frame {
    fn new(cfg: &Cfg, block: BlockId) -> Self {
        Self {
            block,
            successors: cfg.successors(block).collect(),
            next: 0,
        }
    }
}

/// Classifies the back edges of `cfg` and stores them in `cfg.back_edges`.
pub fn find_back_edges(unit: &FunctionUnit, cfg: &mut Cfg, limits: &Limits) -> Result<()> {
    if cfg.entry != unit.entry {
        bail!(
            "CFG invariant violated: graph of `{}` is rooted at {} but the entry is {}",
            unit.name,
            cfg.entry,
            unit.entry
        );
    }

    let mut back_edges = BackEdges::new();
    let mut visited: HashSet<BlockId> = HashSet::new();
    let mut on_chain: HashSet<BlockId> = HashSet::new();
    let mut stack = vec![Frame::new(cfg, cfg.entry)];
    visited.insert(cfg.entry);
    on_chain.insert(cfg.entry);

    while let Some(frame) = stack.last_mut() {
        let Some(&succ) = frame.successors.get(frame.next) else {
            on_chain.remove(&frame.block);
            stack.pop();
            continue;
        };
        frame.next += 1;
        let from = frame.block;

        if on_chain.contains(&succ) {
            log::trace!(
                target: "loops",
                "back edge {} -> {}",
                unit.block_name(from),
                unit.block_name(succ)
            );
            back_edges.entry(from).or_default().insert(succ);
        } else if visited.insert(succ) {
            limits.check(Limit::Depth, stack.len() + 1)?;
            on_chain.insert(succ);
            stack.push(Frame::new(cfg, succ));
        }
    }

    log::debug!(
        target: "loops",
        "`{}`: {} back edges",
        unit.name,
        back_edges.values().map(|h| h.len()).sum::<usize>()
    );
    cfg.back_edges = Some(back_edges);
    Ok(())
}
