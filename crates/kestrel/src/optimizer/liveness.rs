//! Register liveness.
//!
//! Two walks over the CFG:
//!
//! 1. A forward *definedness* walk proves that no instruction reads a register
//!    that is undefined on some path. The set defined on entry to a block is
//!    the intersection of what its predecessors provide, back edges included,
//!    iterated down from "everything defined" until it stops changing.
//! 2. A backward dataflow fixed point computes `live_in`/`live_out` per block:
//!    `out[B] = ∪ in[S]`, `in[B] = gen[B] ∪ (out[B] − kill[B])`.
//!
//! A handler may be entered from any instruction of the block it protects, so
//! what a handler needs is live across the whole protected block: its `in`
//! set is added to both `out` and `in` of the protected block, and for
//! definedness the handler only sees what was defined on entry to it.

use super::bitset::BitSet;
use super::cfg::{Cfg, Liveness};
use super::limits::Limits;
use super::loops::find_back_edges;
use crate::ir::{Block, BlockId, FunctionUnit, Instr, Reg};
use anyhow::{bail, Result};
use std::collections::{BTreeSet, HashMap};

/// Registers read before any write (`gen`) and registers written (`kill`).
#[derive(Debug, Default)]
struct Summary {
    gen: BTreeSet<Reg>,
    kill: BTreeSet<Reg>,
}

impl Summary {
    fn of(block: &Block) -> Self {
        let mut s = Summary::default();
        for instr in &block.instructions {
            instr.for_each_read(|r| {
                if !s.kill.contains(&r) {
                    s.gen.insert(r);
                }
            });
            instr.for_each_write(|r| {
                s.kill.insert(r);
            });
        }
        s
    }
}

/// Computes per-block liveness into `cfg.liveness`.
///
/// Classifies back edges first if the loop finder has not run on `cfg`.
pub fn liveness_analysis(unit: &FunctionUnit, cfg: &mut Cfg, limits: &Limits) -> Result<()> {
    if cfg.back_edges.is_none() {
        find_back_edges(unit, cfg, limits)?;
    }

    let block_map = unit.block_map();
    if let Some(stale) = cfg.forward.keys().find(|id| !block_map.contains_key(id)) {
        bail!(
            "CFG invariant violated: graph of `{}` contains {} which is not in the block list",
            unit.name,
            stale
        );
    }
    let block = |id: BlockId| &unit.blocks[block_map[&id]];

    let order = forward_order(unit, cfg)?;
    check_definedness(unit, cfg, &block_map, &order)?;

    let summaries: HashMap<BlockId, Summary> =
        order.iter().map(|&id| (id, Summary::of(block(id)))).collect();
    let mut live: HashMap<BlockId, Liveness> =
        order.iter().map(|&id| (id, Liveness::default())).collect();

    let mut rounds = 0;
    let mut changed = true;
    while changed {
        changed = false;
        rounds += 1;
        for &id in order.iter().rev() {
            let mut live_out: BTreeSet<Reg> = BTreeSet::new();
            for succ in cfg.successors(id) {
                live_out.extend(live[&succ].live_in.iter().copied());
            }
            let summary = &summaries[&id];
            let mut live_in: BTreeSet<Reg> =
                live_out.difference(&summary.kill).copied().collect();
            live_in.extend(summary.gen.iter().copied());
            if let Some(handler) = block(id).handler {
                live_in.extend(live[&handler].live_in.iter().copied());
            }

            let next = Liveness { live_in, live_out };
            if live[&id] != next {
                live.insert(id, next);
                changed = true;
            }
        }
    }

    log::debug!(
        target: "liveness",
        "`{}`: liveness of {} blocks reached a fixed point after {} rounds",
        unit.name,
        order.len(),
        rounds
    );
    cfg.liveness = live;
    Ok(())
}

/// Reachable blocks ordered so that forward predecessors come first.
fn forward_order(unit: &FunctionUnit, cfg: &Cfg) -> Result<Vec<BlockId>> {
    let mut indegree: HashMap<BlockId, usize> = cfg.forward.keys().map(|&id| (id, 0)).collect();
    for (&from, succs) in &cfg.forward {
        for &to in succs {
            if !cfg.is_back_edge(from, to) {
                *indegree.entry(to).or_default() += 1;
            }
        }
    }

    let mut order = Vec::with_capacity(indegree.len());
    let mut ready = vec![cfg.entry];
    while let Some(id) = ready.pop() {
        order.push(id);
        // Reverse so the lowest-numbered successor is visited first.
        for succ in cfg.successors(id).collect::<Vec<_>>().into_iter().rev() {
            if cfg.is_back_edge(id, succ) {
                continue;
            }
            if let Some(n) = indegree.get_mut(&succ) {
                *n -= 1;
                if *n == 0 {
                    ready.push(succ);
                }
            }
        }
    }

    if order.len() != cfg.forward.len() {
        bail!(
            "CFG invariant violated: forward edges of `{}` contain a cycle ({} of {} blocks ordered)",
            unit.name,
            order.len(),
            cfg.forward.len()
        );
    }
    Ok(order)
}

fn check_definedness(
    unit: &FunctionUnit,
    cfg: &Cfg,
    block_map: &HashMap<BlockId, usize>,
    order: &[BlockId],
) -> Result<()> {
    let block = |id: BlockId| &unit.blocks[block_map[&id]];
    let count = unit.register_count as usize;

    let mut params = BitSet::new_empty(count);
    for r in 0..unit.arg_count as usize {
        params.set(r);
    }

    let exit_of = |id: BlockId, on_entry: &BitSet| {
        let mut current = on_entry.clone();
        for instr in &block(id).instructions {
            instr.for_each_write(|r| current.set(r.index()));
        }
        current
    };

    // Greatest fixed point: start from "everything defined" and narrow.
    let mut on_entry: HashMap<BlockId, BitSet> = order
        .iter()
        .map(|&id| {
            let set = if id == cfg.entry {
                params.clone()
            } else {
                BitSet::new_full(count)
            };
            (id, set)
        })
        .collect();
    let mut on_exit: HashMap<BlockId, BitSet> = order
        .iter()
        .map(|&id| (id, exit_of(id, &on_entry[&id])))
        .collect();

    let mut changed = true;
    while changed {
        changed = false;
        for &id in order {
            let mut defined: Option<BitSet> = (id == cfg.entry).then(|| params.clone());
            for pred in cfg.predecessors(id) {
                let pred_block = block(pred);
                let incoming = if pred_block.handler == Some(id) {
                    &on_entry[&pred]
                } else if cfg.exported.contains(&id)
                    && matches!(pred_block.terminator(), Some(Instr::JumpTable { .. }))
                {
                    // Dispatch into a continuation restores a saved frame.
                    continue;
                } else {
                    &on_exit[&pred]
                };
                match &mut defined {
                    Some(set) => set.intersect_with(incoming),
                    None => defined = Some(incoming.clone()),
                }
            }
            let entry_set = defined.unwrap_or_else(|| params.clone());
            if on_entry[&id] != entry_set {
                on_exit.insert(id, exit_of(id, &entry_set));
                on_entry.insert(id, entry_set);
                changed = true;
            }
        }
    }

    for &id in order {
        let this = block(id);
        let mut current = on_entry[&id].clone();
        for (i, instr) in this.instructions.iter().enumerate() {
            let mut undefined = None;
            instr.for_each_read(|r| {
                if !current.get(r.index()) {
                    undefined.get_or_insert(r);
                }
            });
            if let Some(r) = undefined {
                bail!(
                    "read before write: {} is not defined on every path to block `{}` instruction {} (`{}`) in `{}`",
                    r,
                    this.name,
                    i,
                    instr,
                    unit.name
                );
            }
            instr.for_each_write(|r| current.set(r.index()));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_unit;

    fn analyze(source: &str) -> (FunctionUnit, Cfg) {
        let unit = parse_unit(source).unwrap();
        let mut cfg = Cfg::build(&unit).unwrap();
        liveness_analysis(&unit, &mut cfg, &Limits::default()).unwrap();
        (unit, cfg)
    }

    fn error(source: &str) -> String {
        let unit = parse_unit(source).unwrap();
        let mut cfg = Cfg::build(&unit).unwrap();
        liveness_analysis(&unit, &mut cfg, &Limits::default())
            .unwrap_err()
            .to_string()
    }

    fn regs(ids: &[u32]) -> BTreeSet<Reg> {
        ids.iter().map(|&r| Reg(r)).collect()
    }

    fn live<'a>(unit: &FunctionUnit, cfg: &'a Cfg, name: &str) -> &'a Liveness {
        let id = unit.blocks.iter().find(|b| b.name == name).unwrap().id;
        &cfg.liveness[&id]
    }

    const LOOP: &str = r#"
        function count(args=1, registers=4) {
          const 0 = number 1
        entry:
          load_int r1, 0
          jump head
        head:
          lt r2, r1, r0
          jump_if r2, body, done
        body:
          load_const r3, #0
          add r1, r1, r3
          jump head
        done:
          return r1
        }
    "#;

    // ── Dataflow ─────────────────────────────────────────────────────────

    #[test]
    fn straight_line() {
        let (unit, cfg) = analyze(
            r#"
            function f(args=1, registers=3) {
            entry:
              move r1, r0
              jump exit
            exit:
              add r2, r1, r1
              return r2
            }
            "#,
        );
        assert_eq!(live(&unit, &cfg, "entry").live_in, regs(&[0]));
        assert_eq!(live(&unit, &cfg, "entry").live_out, regs(&[1]));
        assert_eq!(live(&unit, &cfg, "exit").live_in, regs(&[1]));
        assert_eq!(live(&unit, &cfg, "exit").live_out, regs(&[]));
    }

    #[test]
    fn loop_carried_registers_stay_live() {
        let (unit, cfg) = analyze(LOOP);
        assert_eq!(live(&unit, &cfg, "head").live_in, regs(&[0, 1]));
        assert_eq!(live(&unit, &cfg, "body").live_out, regs(&[0, 1]));
        assert_eq!(live(&unit, &cfg, "body").live_in, regs(&[0, 1]));
        assert_eq!(live(&unit, &cfg, "done").live_in, regs(&[1]));
        assert_eq!(live(&unit, &cfg, "entry").live_in, regs(&[0]));
    }

    #[test]
    fn out_covers_every_successor() {
        let (unit, cfg) = analyze(LOOP);
        for block in &unit.blocks {
            let out = &cfg.liveness[&block.id].live_out;
            for succ in cfg.successors(block.id) {
                assert!(cfg.liveness[&succ].live_in.is_subset(out));
            }
        }
    }

    #[test]
    fn rerun_is_idempotent() {
        let (unit, mut cfg) = analyze(LOOP);
        let first = cfg.liveness.clone();
        liveness_analysis(&unit, &mut cfg, &Limits::default()).unwrap();
        assert_eq!(cfg.liveness, first);
    }

    #[test]
    fn computes_back_edges_when_missing() {
        let (_, cfg) = analyze(LOOP);
        assert!(cfg.back_edges.is_some());
    }

    // ── Handlers and generators ──────────────────────────────────────────

    #[test]
    fn handler_inputs_live_through_protected_block() {
        let (unit, cfg) = analyze(
            r#"
            function f(args=1, registers=3) {
            entry:
              load_int r1, 7
              jump try
            try [handler=catch]:
              get_prop r2, r0, r0
              move r1, r2
              return r1
            catch:
              exception r2
              return r1
            }
            "#,
        );
        let try_live = live(&unit, &cfg, "try");
        // r1 is overwritten inside `try`, but the handler may run first.
        assert!(try_live.live_in.contains(&Reg(1)));
        assert!(try_live.live_out.contains(&Reg(1)));
        assert_eq!(live(&unit, &cfg, "catch").live_in, regs(&[1]));
    }

    #[test]
    fn handler_sees_only_registers_defined_on_entry() {
        let err = error(
            r#"
            function f(args=1, registers=3) {
            entry [handler=catch]:
              get_prop r1, r0, r0
              return r1
            catch:
              return r1
            }
            "#,
        );
        assert!(err.contains("read before write"), "{err}");
        assert!(err.contains("block `catch` instruction 0"), "{err}");
    }

    #[test]
    fn generator_continuation_inherits_suspended_registers() {
        let (unit, cfg) = analyze(
            r#"
            function gen(args=1, registers=2) {
              const 0 = table { 0 -> start, 1 -> resume }
            entry:
              jump_table r0, #0
            start:
              load_int r1, 5
              yield r1, resume
            resume:
              return r1
            }
            "#,
        );
        assert!(cfg.exported.contains(&unit.blocks[2].id));
        assert_eq!(live(&unit, &cfg, "resume").live_in, regs(&[1]));
        assert_eq!(live(&unit, &cfg, "start").live_out, regs(&[1]));
    }

    #[test]
    fn continuation_laid_out_before_its_suspension_point() {
        // `resume` comes first in block order, so the yield edge into it is
        // classified as a back edge.
        let (unit, cfg) = analyze(
            r#"
            function counter(args=1, registers=4) {
              const 0 = table { 0 -> start, 1 -> resume }
              const 1 = number 1
            entry:
              jump_table r0, #0
            resume:
              load_const r2, #1
              add r1, r1, r2
              jump head
            start:
              load_int r1, 0
              jump head
            head:
              load_int r2, 3
              lt r3, r1, r2
              jump_if r3, body, done
            body:
              yield r1, resume
            done:
              return r1
            }
            "#,
        );
        let resume = unit.blocks[1].id;
        let body = unit.blocks[4].id;
        assert!(cfg.is_back_edge(body, resume));
        assert_eq!(live(&unit, &cfg, "resume").live_in, regs(&[1]));
    }

    #[test]
    fn loop_body_write_does_not_define_header_read() {
        let err = error(
            r#"
            function f(args=1, registers=3) {
            entry:
              jump head
            head:
              add r2, r1, r0
              jump_if r0, body, done
            body:
              load_int r1, 1
              jump head
            done:
              return r2
            }
            "#,
        );
        assert!(err.contains("block `head` instruction 0"), "{err}");
    }

    // ── Read before write ────────────────────────────────────────────────

    #[test]
    fn read_of_never_written_register_fails() {
        let err = error(
            r#"
            function f(args=1, registers=3) {
            entry:
              add r2, r0, r1
              return r2
            }
            "#,
        );
        assert!(err.contains("r1"), "{err}");
        assert!(err.contains("block `entry` instruction 0"), "{err}");
    }

    #[test]
    fn register_defined_on_one_branch_only_fails() {
        let err = error(
            r#"
            function f(args=1, registers=2) {
            entry:
              jump_if r0, then, join
            then:
              load_int r1, 1
              jump join
            join:
              return r1
            }
            "#,
        );
        assert!(err.contains("block `join` instruction 0"), "{err}");
    }

    #[test]
    fn register_defined_on_both_branches_passes() {
        analyze(
            r#"
            function f(args=1, registers=2) {
            entry:
              jump_if r0, then, else
            then:
              load_int r1, 1
              jump join
            else:
              load_int r1, 2
              jump join
            join:
              return r1
            }
            "#,
        );
    }

    #[test]
    fn definition_inside_loop_body_does_not_reach_header() {
        let err = error(
            r#"
            function f(args=1, registers=3) {
            entry:
              jump head
            head:
              move r2, r1
              jump_if r0, body, done
            body:
              load_int r1, 1
              jump head
            done:
              return r2
            }
            "#,
        );
        assert!(err.contains("block `head` instruction 0"), "{err}");
    }
}
