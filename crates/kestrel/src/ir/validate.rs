//! Structural validation of function units.
//!
//! The front end guarantees these properties; a violation is a front-end bug.
//! The pipeline validates its input before any pass mutates the unit and its
//! output after the last pass, so malformed units are rejected early instead
//! of being miscompiled.

use super::instr::Instr;
use super::types::{BlockId, ConstIdx, Constant, FunctionUnit, Reg};
use anyhow::{bail, Result};
use std::collections::{HashMap, HashSet};

/// Checks every structural invariant of `unit`.
pub fn validate(unit: &FunctionUnit) -> Result<()> {
    if unit.blocks.is_empty() {
        bail!("function `{}` has no blocks", unit.name);
    }
    if unit.arg_count > unit.register_count {
        bail!(
            "function `{}` declares {} arguments but only {} registers",
            unit.name,
            unit.arg_count,
            unit.register_count
        );
    }

    let mut ids: HashSet<BlockId> = HashSet::new();
    let mut names: HashSet<&str> = HashSet::new();
    for block in &unit.blocks {
        if !ids.insert(block.id) {
            bail!("function `{}` has duplicate {}", unit.name, block.id);
        }
        if !names.insert(block.name.as_str()) {
            bail!(
                "function `{}` has duplicate block name `{}`",
                unit.name,
                block.name
            );
        }
    }
    if unit.blocks[0].id != unit.entry {
        bail!(
            "function `{}`: entry {} is not the first block",
            unit.name,
            unit.entry
        );
    }

    for table in unit.constants.iter().filter_map(|c| match c {
        Constant::Dispatch(t) => Some(t),
        _ => None,
    }) {
        for (state, target) in &table.targets {
            if !ids.contains(target) {
                bail!(
                    "function `{}`: dispatch state {} targets missing {}",
                    unit.name,
                    state,
                    target
                );
            }
        }
    }

    for block in &unit.blocks {
        validate_block_shape(unit, block.id, &block.instructions, &block.name)?;

        if let Some(handler) = block.handler {
            if !ids.contains(&handler) {
                bail!(
                    "block `{}`: handler {} does not exist",
                    block.name,
                    handler
                );
            }
        }

        for (i, instr) in block.instructions.iter().enumerate() {
            let mut bad_target = None;
            instr.for_each_target(|t| {
                if !ids.contains(&t) {
                    bad_target.get_or_insert(t);
                }
            });
            if let Some(t) = bad_target {
                bail!("block `{}` instruction {}: target {} does not exist", block.name, i, t);
            }

            let mut bad_reg = None;
            let mut check = |r: Reg| {
                if r.0 >= unit.register_count {
                    bad_reg.get_or_insert(r);
                }
            };
            instr.for_each_read(&mut check);
            instr.for_each_write(&mut check);
            if let Some(r) = bad_reg {
                bail!(
                    "block `{}` instruction {}: {} exceeds register count {}",
                    block.name,
                    i,
                    r,
                    unit.register_count
                );
            }

            validate_constant_refs(unit, instr, &block.name, i)?;
        }
    }

    validate_handler_forest(unit)?;
    Ok(())
}

/// Terminator discipline and operand stack balance of one block.
fn validate_block_shape(
    unit: &FunctionUnit,
    id: BlockId,
    instructions: &[Instr],
    name: &str,
) -> Result<()> {
    let Some((last, body)) = instructions.split_last() else {
        bail!("function `{}`: block `{}` ({}) is empty", unit.name, name, id);
    };
    if !last.is_terminator() {
        bail!(
            "block `{}` does not end in a terminator (ends in `{}`)",
            name,
            last.mnemonic()
        );
    }
    if let Some(pos) = body.iter().position(Instr::is_terminator) {
        bail!(
            "block `{}` has terminator `{}` at instruction {} before its end",
            name,
            body[pos].mnemonic(),
            pos
        );
    }

    // The operand stack is block-local: it starts and ends empty.
    let mut height: i64 = 0;
    for (i, instr) in instructions.iter().enumerate() {
        height += i64::from(instr.stack_delta());
        if height < 0 {
            bail!(
                "block `{}` instruction {} (`{}`) underflows the operand stack",
                name,
                i,
                instr.mnemonic()
            );
        }
    }
    if height != 0 {
        bail!(
            "block `{}` leaves {} values on the operand stack",
            name,
            height
        );
    }
    Ok(())
}

fn validate_constant_refs(unit: &FunctionUnit, instr: &Instr, block: &str, i: usize) -> Result<()> {
    let expect = |idx: ConstIdx, want: &str, ok: fn(&Constant) -> bool| -> Result<()> {
        match unit.constants.get(idx.as_usize()) {
            Some(c) if ok(c) => Ok(()),
            Some(c) => bail!(
                "block `{}` instruction {}: constant #{} is {:?}, expected {}",
                block,
                i,
                idx.as_usize(),
                c,
                want
            ),
            None => bail!(
                "block `{}` instruction {}: constant #{} out of range",
                block,
                i,
                idx.as_usize()
            ),
        }
    };
    match instr {
        Instr::LoadConst { index, .. } => {
            expect(*index, "a value", |c| !matches!(c, Constant::Dispatch(_)))
        }
        Instr::GetGlobal { name, .. } | Instr::SetGlobal { name, .. } => {
            expect(*name, "a string", |c| matches!(c, Constant::String(_)))
        }
        Instr::JumpTable { table, .. } => {
            expect(*table, "a dispatch table", |c| matches!(c, Constant::Dispatch(_)))
        }
        _ => Ok(()),
    }
}

/// Handler associations must not form cycles.
///
/// Each block is walked at most once: a chain stops at the first block an
/// earlier walk already cleared.
fn validate_handler_forest(unit: &FunctionUnit) -> Result<()> {
    let handler_of: HashMap<BlockId, BlockId> = unit
        .blocks
        .iter()
        .filter_map(|b| b.handler.map(|h| (b.id, h)))
        .collect();
    let mut cleared: HashSet<BlockId> = HashSet::new();
    for block in &unit.blocks {
        let mut path: HashSet<BlockId> = HashSet::new();
        let mut cur = block.id;
        while !cleared.contains(&cur) {
            if !path.insert(cur) {
                bail!(
                    "function `{}`: handler chain starting at `{}` is cyclic",
                    unit.name,
                    block.name
                );
            }
            match handler_of.get(&cur) {
                Some(&next) => cur = next,
                None => break,
            }
        }
        cleared.extend(path);
    }
    Ok(())
}
