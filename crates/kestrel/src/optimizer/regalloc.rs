//! Register allocation with live-range reuse.
//!
//! Virtual registers are numbered by the front end without reuse. The
//! allocator assigns them to the fewest slots it can by reusing a slot once
//! the register holding it is dead.
//!
//! Program points follow the block list: each block contributes an entry
//! point followed by one point per instruction. A register's live range is
//! the hull of every point where it is live: its definitions, its reads, the
//! entry point of blocks where it is live-in and the terminator of blocks
//! where it is live-out. Parameters (`r0..arg_count`) are pinned to their
//! own slots for the whole function.
//!
//! Ranges are assigned in order of their start, each taking the lowest free
//! slot. A range ending at the instruction where another starts hands its
//! slot over: operands are read before the destination is written.

use super::bitset::BitSet;
use super::cfg::Cfg;
use crate::ir::{FunctionUnit, Reg};
use anyhow::{bail, Result};

/// Inclusive range of program points.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LiveRange {
    start: usize,
    end: usize,
}

impl LiveRange {
    fn extend(range: &mut Option<LiveRange>, point: usize) {
        match range {
            Some(r) => {
                r.start = r.start.min(point);
                r.end = r.end.max(point);
            }
            None => {
                *range = Some(LiveRange {
                    start: point,
                    end: point,
                })
            }
        }
    }
}

/// Live range of every virtual register, indexed by register number.
fn live_ranges(unit: &FunctionUnit, cfg: &Cfg) -> Result<Vec<Option<LiveRange>>> {
    let count = unit.register_count as usize;
    let mut ranges: Vec<Option<LiveRange>> = vec![None; count];
    let mut written = BitSet::new_empty(count);
    let mut read = BitSet::new_empty(count);

    let mut point = 0;
    for block in &unit.blocks {
        let Some(live) = cfg.liveness.get(&block.id) else {
            bail!(
                "CFG invariant violated: no liveness for block `{}` of `{}`",
                block.name,
                unit.name
            );
        };

        for r in &live.live_in {
            LiveRange::extend(&mut ranges[r.index()], point);
        }
        for instr in &block.instructions {
            point += 1;
            instr.for_each_read(|r| {
                read.set(r.index());
                LiveRange::extend(&mut ranges[r.index()], point);
            });
            instr.for_each_write(|r| {
                written.set(r.index());
                LiveRange::extend(&mut ranges[r.index()], point);
            });
        }
        for r in &live.live_out {
            LiveRange::extend(&mut ranges[r.index()], point);
        }
        point += 1;
    }

    for r in (unit.arg_count as usize)..count {
        if read.get(r) && !written.get(r) {
            bail!(
                "register allocation of `{}`: {} is read but never written",
                unit.name,
                Reg(r as u32)
            );
        }
    }
    Ok(ranges)
}

/// Renumbers registers in place and shrinks `unit.register_count`.
///
/// `cfg` must carry liveness for the current block list. The final count is
/// at least `reserved_registers` (capped at the current count) and never
/// grows. Returns the new register count.
pub fn register_allocation(unit: &mut FunctionUnit, cfg: &Cfg, reserved_registers: u32) -> Result<u32> {
    if cfg.liveness.is_empty() {
        bail!(
            "register allocation of `{}` requires liveness analysis",
            unit.name
        );
    }

    let count = unit.register_count as usize;
    let pinned = unit.arg_count as usize;
    let ranges = live_ranges(unit, cfg)?;

    let mut order: Vec<(LiveRange, usize)> = ranges
        .iter()
        .enumerate()
        .skip(pinned)
        .filter_map(|(r, range)| range.map(|range| (range, r)))
        .collect();
    order.sort_by_key(|(range, r)| (range.start, *r));

    let mut slots: Vec<u32> = (0..count as u32).collect();
    let mut occupied = BitSet::new_empty(count);
    for r in 0..pinned {
        occupied.set(r);
    }
    // (end, slot) of ranges currently holding a slot
    let mut active: Vec<(usize, usize)> = Vec::new();
    let mut max_slot: Option<usize> = None;

    for (range, r) in order {
        active.retain(|&(end, slot)| {
            let expired = end <= range.start;
            if expired {
                occupied.clear(slot);
            }
            !expired
        });
        let Some(slot) = occupied.first_clear() else {
            bail!(
                "register allocation of `{}`: no free slot for {} among {} registers",
                unit.name,
                Reg(r as u32),
                count
            );
        };
        occupied.set(slot);
        active.push((range.end, slot));
        slots[r] = slot as u32;
        max_slot = max_slot.max(Some(slot));
        log::trace!(
            target: "regalloc",
            "{} [{}..={}] -> slot {}",
            Reg(r as u32),
            range.start,
            range.end,
            slot
        );
    }

    for block in &mut unit.blocks {
        for instr in &mut block.instructions {
            instr.for_each_read_mut(|r| *r = Reg(slots[r.index()]));
            if let Some(dest) = instr.dest_mut() {
                *dest = Reg(slots[dest.index()]);
            }
        }
    }

    let used = max_slot.map_or(0, |s| s as u32 + 1);
    let before = unit.register_count;
    let after = used
        .max(unit.arg_count)
        .max(reserved_registers.min(before))
        .min(before);
    unit.register_count = after;

    log::debug!(
        target: "regalloc",
        "`{}`: {} virtual registers -> {} slots",
        unit.name,
        before,
        after
    );
    Ok(after)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{BlockId, Instr};
    use crate::optimizer::limits::Limits;
    use crate::optimizer::liveness::liveness_analysis;
    use crate::parser::parse_unit;

    fn allocate(source: &str, reserved: u32) -> FunctionUnit {
        let mut unit = parse_unit(source).unwrap();
        let mut cfg = Cfg::build(&unit).unwrap();
        liveness_analysis(&unit, &mut cfg, &Limits::default()).unwrap();
        register_allocation(&mut unit, &cfg, reserved).unwrap();
        unit
    }

    fn text(unit: &FunctionUnit) -> String {
        unit.to_string()
    }

    // ── Reuse ────────────────────────────────────────────────────────────

    #[test]
    fn dead_temporaries_share_a_slot() {
        let unit = allocate(
            r#"
            function f(args=1, registers=5) {
            entry:
              move r1, r0
              add r2, r1, r1
              move r3, r2
              add r4, r3, r3
              return r4
            }
            "#,
            0,
        );
        assert_eq!(unit.register_count, 2);
        let t = text(&unit);
        assert!(t.contains("move r1, r0"), "{t}");
        assert!(t.contains("add r1, r1, r1"), "{t}");
        assert!(t.contains("return r1"), "{t}");
    }

    #[test]
    fn loop_carried_register_keeps_its_slot() {
        let unit = allocate(
            r#"
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
            "#,
            0,
        );
        assert_eq!(unit.register_count, 3);
        let t = text(&unit);
        assert!(t.contains("lt r2, r1, r0"), "{t}");
        assert!(t.contains("load_const r2, #0"), "{t}");
        assert!(t.contains("add r1, r1, r2"), "{t}");
    }

    #[test]
    fn handler_inputs_do_not_share_with_protected_temporaries() {
        let unit = allocate(
            r#"
            function f(args=1, registers=4) {
            entry:
              load_int r1, 7
              jump try
            try [handler=catch]:
              get_prop r2, r0, r0
              get_prop r3, r2, r0
              return r3
            catch:
              exception r2
              return r1
            }
            "#,
            0,
        );
        // r1 must survive the whole protected block.
        let t = text(&unit);
        assert!(t.contains("load_int r1, 7"), "{t}");
        assert!(!t.contains("get_prop r1"), "{t}");
    }

    // ── Count ────────────────────────────────────────────────────────────

    #[test]
    fn arguments_are_never_reassigned() {
        let unit = allocate(
            r#"
            function f(args=3, registers=4) {
            entry:
              add r3, r2, r2
              return r3
            }
            "#,
            0,
        );
        assert_eq!(unit.arg_count, 3);
        assert_eq!(unit.register_count, 4);
        let t = text(&unit);
        assert!(t.contains("add r3, r2, r2"), "{t}");
    }

    #[test]
    fn unused_arguments_still_count() {
        let unit = allocate(
            r#"
            function f(args=3, registers=5) {
            entry:
              return r0
            }
            "#,
            0,
        );
        assert_eq!(unit.register_count, 3);
    }

    #[test]
    fn reserved_registers_are_a_floor() {
        let source = r#"
            function f(args=1, registers=6) {
            entry:
              move r5, r0
              return r5
            }
            "#;
        assert_eq!(allocate(source, 0).register_count, 2);
        assert_eq!(allocate(source, 4).register_count, 4);
        // Never above the virtual count.
        assert_eq!(allocate(source, 40).register_count, 6);
    }

    #[test]
    fn dead_write_still_gets_a_slot() {
        let unit = allocate(
            r#"
            function f(args=1, registers=3) {
            entry:
              load_int r2, 1
              return r0
            }
            "#,
            0,
        );
        assert_eq!(unit.register_count, 2);
        assert!(text(&unit).contains("load_int r1, 1"));
    }

    // ── Invariants ───────────────────────────────────────────────────────

    #[test]
    fn requires_liveness() {
        let mut unit = parse_unit(
            r#"
            function f(args=1, registers=1) {
            entry:
              return r0
            }
            "#,
        )
        .unwrap();
        let cfg = Cfg::build(&unit).unwrap();
        let err = register_allocation(&mut unit, &cfg, 0).unwrap_err();
        assert!(err.to_string().contains("requires liveness"));
    }

    #[test]
    fn read_of_unwritten_register_is_fatal() {
        let mut unit = parse_unit(
            r#"
            function f(args=1, registers=2) {
            entry:
              return r0
            }
            "#,
        )
        .unwrap();
        let mut cfg = Cfg::build(&unit).unwrap();
        liveness_analysis(&unit, &mut cfg, &Limits::default()).unwrap();
        // Bypass the definedness check by editing after the analysis.
        unit.blocks[0].instructions = vec![Instr::Return { value: Reg(1) }];
        let err = register_allocation(&mut unit, &cfg, 0).unwrap_err();
        assert!(err.to_string().contains("r1 is read but never written"), "{err}");
    }

    #[test]
    fn missing_block_liveness_is_fatal() {
        let mut unit = parse_unit(
            r#"
            function f(args=1, registers=1) {
            entry:
              return r0
            }
            "#,
        )
        .unwrap();
        let mut cfg = Cfg::build(&unit).unwrap();
        liveness_analysis(&unit, &mut cfg, &Limits::default()).unwrap();
        unit.blocks[0].id = BlockId(9);
        unit.entry = BlockId(9);
        assert!(register_allocation(&mut unit, &cfg, 0).is_err());
    }
}
