//! Block placement: unreachable block elimination.
//!
//! Blocks unreachable from the entry (through jumps, dispatch tables,
//! continuations and handler edges) are removed. Merging is what usually
//! strands them: a redirected target or a handler whose last throwing
//! protected block went away. Dispatch tables referenced only by removed
//! blocks are replaced by `undefined` so constant indices stay stable.

use super::cfg::Cfg;
use crate::ir::{BlockId, Constant, FunctionUnit, Instr};
use anyhow::{bail, Result};
use std::collections::HashSet;

/// Computes the set of block ids reachable from the entry of `cfg`.
fn reachable_blocks(cfg: &Cfg) -> HashSet<BlockId> {
    let mut reachable = HashSet::new();
    let mut worklist = vec![cfg.entry];
    while let Some(id) = worklist.pop() {
        if !reachable.insert(id) {
            continue;
        }
        worklist.extend(cfg.successors(id));
    }
    reachable
}

/// Removes blocks unreachable from the entry.
///
/// `cfg` must have been built from the current block list. Returns the
/// number of blocks removed.
pub fn place_blocks(unit: &mut FunctionUnit, cfg: &Cfg) -> Result<usize> {
    if cfg.entry != unit.entry {
        bail!(
            "CFG invariant violated: graph of `{}` is rooted at {} but the entry is {}",
            unit.name,
            cfg.entry,
            unit.entry
        );
    }

    let reachable = reachable_blocks(cfg);
    let before = unit.blocks.len();
    unit.blocks.retain(|b| reachable.contains(&b.id));
    let removed = before - unit.blocks.len();

    let live_tables: HashSet<usize> = unit
        .blocks
        .iter()
        .flat_map(|b| &b.instructions)
        .filter_map(|instr| match instr {
            Instr::JumpTable { table, .. } => Some(table.as_usize()),
            _ => None,
        })
        .collect();
    for (i, constant) in unit.constants.iter_mut().enumerate() {
        if matches!(constant, Constant::Dispatch(_)) && !live_tables.contains(&i) {
            *constant = Constant::Undefined;
        }
    }

    check_references(unit)?;

    log::debug!(
        target: "place",
        "`{}`: removed {} unreachable blocks, {} remain",
        unit.name,
        removed,
        unit.blocks.len()
    );
    Ok(removed)
}

/// Fails if anything still refers to a block that is not in the list.
fn check_references(unit: &FunctionUnit) -> Result<()> {
    let live: HashSet<BlockId> = unit.blocks.iter().map(|b| b.id).collect();
    if !live.contains(&unit.entry) {
        bail!("dangling reference: entry {} of `{}` was removed", unit.entry, unit.name);
    }
    for target in unit.dispatch_targets() {
        if !live.contains(&target) {
            bail!(
                "dangling reference: a dispatch table of `{}` targets removed {}",
                unit.name,
                target
            );
        }
    }
    for block in &unit.blocks {
        if let Some(handler) = block.handler.filter(|h| !live.contains(h)) {
            bail!(
                "dangling reference: block `{}` is protected by removed {}",
                block.name,
                handler
            );
        }
        for (i, instr) in block.instructions.iter().enumerate() {
            let mut dangling = None;
            instr.for_each_target(|t| {
                if !live.contains(&t) {
                    dangling.get_or_insert(t);
                }
            });
            if let Some(t) = dangling {
                bail!(
                    "dangling reference: block `{}` instruction {} targets removed {}",
                    block.name,
                    i,
                    t
                );
            }
        }
    }
    Ok(())
}
