//! Block coalescing.
//!
//! Two phases, both expressed as id rewrites through
//! [`FunctionUnit::retarget`]:
//!
//! 1. **Redirect.** A block consisting of a single `jump` is a passthrough.
//!    Every reference to it is replaced by its ultimate target and the block
//!    is removed. Chains such as `B1: jump B2`, `B2: jump B3` resolve to `B3`;
//!    cycles of passthroughs are left alone. Continuations of suspension
//!    points are never redirected, since a generator resumes there by id.
//! 2. **Merge.** An edge `A → B` is mergeable when `A` ends in `jump B` (or a
//!    `jump_if` whose two targets are both `B`), `A` is `B`'s only
//!    predecessor, and `B` is an ordinary block: not exported, not the entry,
//!    not a handler, not a dispatch target, and protected by the same handler
//!    as `A`. Maximal chains of such edges are concatenated
//!    into the chain head, which keeps its id, name and position.
//!
//! The CFG the pass was given is stale afterwards.

use super::cfg::Cfg;
use crate::ir::{BlockId, FunctionUnit, Instr};
use anyhow::Result;
use std::collections::{HashMap, HashSet};

/// What a merge run changed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MergeStats {
    /// Passthrough blocks removed by redirection
    pub redirected: usize,
    /// Blocks absorbed into a chain head
    pub merged: usize,
}

/// Redirects passthrough blocks, then merges single-predecessor chains.
pub fn merge_blocks(unit: &mut FunctionUnit, cfg: &Cfg) -> Result<MergeStats> {
    let redirected = redirect(unit, cfg);

    // Identities changed; phase 2 needs predecessors of the current layout.
    let fresh = Cfg::build(unit)?;
    let merged = merge_chains(unit, &fresh);

    let stats = MergeStats { redirected, merged };
    log::debug!(
        target: "merge",
        "`{}`: redirected {} blocks, merged {} blocks, {} remain",
        unit.name,
        stats.redirected,
        stats.merged,
        unit.blocks.len()
    );
    Ok(stats)
}

// ── Phase 1: redirect ───────────────────────────────────────────────────

fn redirect(unit: &mut FunctionUnit, cfg: &Cfg) -> usize {
    let mut forward: HashMap<BlockId, BlockId> = HashMap::new();
    for block in &unit.blocks {
        if cfg.exported.contains(&block.id) {
            continue;
        }
        if let Some(Instr::Jump { target }) = block.instructions.first() {
            forward.insert(block.id, *target);
        }
    }
    if forward.is_empty() {
        return 0;
    }

    // Resolve chains to their final target. A chain that revisits a block
    // is a passthrough cycle and keeps its blocks.
    let mut resolved: HashMap<BlockId, BlockId> = HashMap::new();
    for &start in forward.keys() {
        let mut seen: HashSet<BlockId> = HashSet::from([start]);
        let mut cur = start;
        let mut cyclic = false;
        while let Some(&next) = forward.get(&cur) {
            if !seen.insert(next) {
                cyclic = true;
                break;
            }
            cur = next;
        }
        if !cyclic {
            resolved.insert(start, cur);
        }
    }
    if resolved.is_empty() {
        return 0;
    }

    for (from, to) in &resolved {
        log::trace!(
            target: "merge",
            "redirect `{}` -> `{}`",
            unit.block_name(*from),
            unit.block_name(*to)
        );
    }
    unit.retarget(&resolved);
    unit.blocks.retain(|b| !resolved.contains_key(&b.id));
    unit.seat_entry();
    resolved.len()
}

// ── Phase 2: merge ──────────────────────────────────────────────────────

/// The one block an unconditional transfer leads to.
fn sole_target(instr: &Instr) -> Option<BlockId> {
    match *instr {
        Instr::Jump { target } => Some(target),
        Instr::JumpIf {
            if_true, if_false, ..
        } if if_true == if_false => Some(if_true),
        _ => None,
    }
}

fn merge_chains(unit: &mut FunctionUnit, cfg: &Cfg) -> usize {
    let handlers: HashSet<BlockId> = unit.blocks.iter().filter_map(|b| b.handler).collect();
    let dispatch: HashSet<BlockId> = unit.dispatch_targets().into_iter().collect();
    let handler_of: HashMap<BlockId, Option<BlockId>> =
        unit.blocks.iter().map(|b| (b.id, b.handler)).collect();

    let mergeable = |a: BlockId, b: BlockId| -> bool {
        let mut preds = cfg.predecessors(b);
        let only_pred = preds.next() == Some(a) && preds.next().is_none();
        b != a
            && only_pred
            && !cfg.exported.contains(&b)
            && b != unit.entry
            && !handlers.contains(&b)
            && !dispatch.contains(&b)
            && handler_of.get(&a) == handler_of.get(&b)
    };

    let mut next: HashMap<BlockId, BlockId> = HashMap::new();
    for block in unit.blocks.iter().filter(|b| cfg.contains(b.id)) {
        if let Some(target) = block.terminator().and_then(sole_target) {
            if mergeable(block.id, target) {
                next.insert(block.id, target);
            }
        }
    }
    if next.is_empty() {
        return 0;
    }
    let absorbed_somewhere: HashSet<BlockId> = next.values().copied().collect();

    // Chains start at a block that is not itself absorbed; pure cycles have
    // no such head and are left alone.
    let heads: Vec<BlockId> = unit
        .blocks
        .iter()
        .map(|b| b.id)
        .filter(|id| next.contains_key(id) && !absorbed_somewhere.contains(id))
        .collect();

    let block_map = unit.block_map();
    let mut map: HashMap<BlockId, BlockId> = HashMap::new();
    for head in heads {
        let mut members = vec![head];
        let mut cur = head;
        while let Some(&succ) = next.get(&cur) {
            members.push(succ);
            cur = succ;
        }

        let mut body: Vec<Instr> = Vec::new();
        let mut terminator = None;
        for &member in &members {
            let mut instructions = std::mem::take(&mut unit.blocks[block_map[&member]].instructions);
            terminator = instructions.pop();
            body.append(&mut instructions);
        }
        body.extend(terminator);
        unit.blocks[block_map[&head]].instructions = body;

        log::trace!(
            target: "merge",
            "merged {} blocks into `{}`",
            members.len() - 1,
            unit.block_name(head)
        );
        for &member in &members[1..] {
            map.insert(member, head);
        }
    }

    unit.retarget(&map);
    unit.blocks.retain(|b| !map.contains_key(&b.id));
    unit.seat_entry();
    map.len()
}
