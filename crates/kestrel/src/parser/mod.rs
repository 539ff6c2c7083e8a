//! Textual assembly parser.
//!
//! Reads the format produced by `FunctionUnit`'s `Display` impl:
//!
//! ```text
//! function f(args=1, registers=3) {
//!   const 0 = number 1
//! entry:
//!   load_const r1, #0
//!   add r2, r0, r1
//!   return r2
//! }
//! ```
//!
//! `;` starts a comment. The first block of a function is its entry.

use crate::ir::{
    BinaryOp, Block, BlockId, ConstIdx, Constant, DispatchTable, FunctionUnit, Instr, Reg,
    UnaryOp,
};
use anyhow::{anyhow, bail, Context, Result};
use std::collections::HashMap;

/// A source line with its 1-based line number, comment stripped.
#[derive(Debug, Clone, Copy)]
struct Line<'a> {
    number: usize,
    text: &'a str,
}

/// Parses every function in `source`.
pub fn parse_units(source: &str) -> Result<Vec<FunctionUnit>> {
    let lines: Vec<Line<'_>> = source
        .lines()
        .enumerate()
        .map(|(i, raw)| Line {
            number: i + 1,
            text: strip_comment(raw).trim(),
        })
        .filter(|l| !l.text.is_empty())
        .collect();

    let mut units = Vec::new();
    let mut pos = 0;
    while pos < lines.len() {
        let header = lines[pos];
        let end = lines[pos..]
            .iter()
            .position(|l| l.text == "}")
            .map(|off| pos + off)
            .ok_or_else(|| anyhow!("line {}: function is not closed by `}}`", header.number))?;
        let unit = parse_function(header, &lines[pos + 1..end])
            .with_context(|| format!("failed to parse function at line {}", header.number))?;
        units.push(unit);
        pos = end + 1;
    }
    Ok(units)
}

/// Parses a source containing exactly one function.
pub fn parse_unit(source: &str) -> Result<FunctionUnit> {
    let mut units = parse_units(source)?;
    if units.len() != 1 {
        bail!("expected exactly one function, found {}", units.len());
    }
    Ok(units.remove(0))
}

fn strip_comment(raw: &str) -> &str {
    let mut in_string = false;
    let mut escaped = false;
    for (i, c) in raw.char_indices() {
        match c {
            _ if escaped => escaped = false,
            '\\' if in_string => escaped = true,
            '"' => in_string = !in_string,
            ';' if !in_string => return &raw[..i],
            _ => {}
        }
    }
    raw
}

/// `function NAME(args=A, registers=R) {`
fn parse_header(line: Line<'_>) -> Result<(String, u32, u32)> {
    let err = || anyhow!("line {}: malformed function header `{}`", line.number, line.text);
    let rest = line.text.strip_prefix("function ").ok_or_else(err)?;
    let rest = rest.strip_suffix('{').ok_or_else(err)?.trim_end();
    let (name, params) = rest.split_once('(').ok_or_else(err)?;
    let params = params.strip_suffix(')').ok_or_else(err)?;

    let mut args = None;
    let mut registers = None;
    for param in params.split(',') {
        let (key, value) = param.split_once('=').ok_or_else(err)?;
        let value: u32 = value.trim().parse().map_err(|_| err())?;
        match key.trim() {
            "args" => args = Some(value),
            "registers" => registers = Some(value),
            _ => return Err(err()),
        }
    }
    Ok((
        name.trim().to_string(),
        args.ok_or_else(err)?,
        registers.ok_or_else(err)?,
    ))
}

/// `NAME:` or `NAME [handler=OTHER]:`
fn parse_block_header(text: &str) -> Option<(&str, Option<&str>)> {
    let head = text.strip_suffix(':')?.trim_end();
    if let Some((name, attr)) = head.split_once('[') {
        let handler = attr.strip_suffix(']')?.trim().strip_prefix("handler=")?;
        Some((name.trim(), Some(handler.trim())))
    } else {
        Some((head, None))
    }
}

fn is_block_header(line: Line<'_>) -> bool {
    !line.text.starts_with("const ") && line.text.ends_with(':')
}

fn parse_function(header: Line<'_>, body: &[Line<'_>]) -> Result<FunctionUnit> {
    let (name, args, registers) = parse_header(header)?;

    // Pass 1: block ids in order of appearance, so forward references resolve.
    let mut ids: HashMap<&str, BlockId> = HashMap::new();
    let mut order: Vec<&str> = Vec::new();
    for line in body.iter().copied().filter(|l| is_block_header(*l)) {
        let (block, _) = parse_block_header(line.text)
            .ok_or_else(|| anyhow!("line {}: malformed block header", line.number))?;
        let id = BlockId(u32::try_from(order.len())?);
        if ids.insert(block, id).is_some() {
            bail!("line {}: duplicate block `{}`", line.number, block);
        }
        order.push(block);
    }
    if order.is_empty() {
        bail!("function `{}` has no blocks", name);
    }

    // Pass 2: constants, then blocks.
    let mut constants = Vec::new();
    let mut blocks: Vec<Block> = Vec::new();
    for line in body.iter().copied() {
        if let Some(rest) = line.text.strip_prefix("const ") {
            if !blocks.is_empty() {
                bail!("line {}: constants must precede the first block", line.number);
            }
            let (index, value) = rest
                .split_once('=')
                .ok_or_else(|| anyhow!("line {}: malformed constant", line.number))?;
            let index: usize = index
                .trim()
                .parse()
                .with_context(|| format!("line {}: bad constant index", line.number))?;
            if index != constants.len() {
                bail!(
                    "line {}: constant {} out of order (expected {})",
                    line.number,
                    index,
                    constants.len()
                );
            }
            constants.push(parse_constant(value.trim(), line, &ids)?);
        } else if is_block_header(line) {
            let (block, handler) = parse_block_header(line.text)
                .ok_or_else(|| anyhow!("line {}: malformed block header", line.number))?;
            let mut b = Block::new(resolve(&ids, block, line)?, block, Vec::new());
            if let Some(handler) = handler {
                b.handler = Some(resolve(&ids, handler, line)?);
            }
            blocks.push(b);
        } else {
            let Some(current) = blocks.last_mut() else {
                bail!("line {}: instruction outside of a block", line.number);
            };
            current.instructions.push(parse_instr(line, &ids)?);
        }
    }

    let mut unit = FunctionUnit::new(name, args, registers, blocks);
    unit.constants = constants;
    Ok(unit)
}

fn resolve(ids: &HashMap<&str, BlockId>, name: &str, line: Line<'_>) -> Result<BlockId> {
    ids.get(name)
        .copied()
        .ok_or_else(|| anyhow!("line {}: unknown block `{}`", line.number, name))
}

fn parse_constant(text: &str, line: Line<'_>, ids: &HashMap<&str, BlockId>) -> Result<Constant> {
    let (kind, rest) = text.split_once(' ').unwrap_or((text, ""));
    let rest = rest.trim();
    match kind {
        "undefined" => Ok(Constant::Undefined),
        "number" => rest
            .parse()
            .map(Constant::Number)
            .with_context(|| format!("line {}: bad number `{}`", line.number, rest)),
        "string" => parse_string(rest)
            .map(Constant::String)
            .ok_or_else(|| anyhow!("line {}: bad string literal {}", line.number, rest)),
        "table" => {
            let inner = rest
                .strip_prefix('{')
                .and_then(|r| r.strip_suffix('}'))
                .ok_or_else(|| anyhow!("line {}: malformed dispatch table", line.number))?;
            let mut table = DispatchTable::default();
            for entry in inner.split(',').map(str::trim).filter(|e| !e.is_empty()) {
                let (state, target) = entry
                    .split_once("->")
                    .ok_or_else(|| anyhow!("line {}: malformed table entry `{}`", line.number, entry))?;
                let state: u32 = state
                    .trim()
                    .parse()
                    .with_context(|| format!("line {}: bad state `{}`", line.number, state))?;
                table.targets.insert(state, resolve(ids, target.trim(), line)?);
            }
            Ok(Constant::Dispatch(table))
        }
        _ => bail!("line {}: unknown constant kind `{}`", line.number, kind),
    }
}

fn parse_string(lit: &str) -> Option<String> {
    let inner = lit.strip_prefix('"')?.strip_suffix('"')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            match chars.next()? {
                'n' => out.push('\n'),
                't' => out.push('\t'),
                'r' => out.push('\r'),
                '0' => out.push('\0'),
                '\\' => out.push('\\'),
                '"' => out.push('"'),
                '\'' => out.push('\''),
                'u' => {
                    // `\u{XXXX}`, as written by the printer for other control
                    // and non-printable characters.
                    if chars.next()? != '{' {
                        return None;
                    }
                    let mut hex = String::new();
                    loop {
                        match chars.next()? {
                            '}' => break,
                            c => hex.push(c),
                        }
                    }
                    out.push(char::from_u32(u32::from_str_radix(&hex, 16).ok()?)?);
                }
                _ => return None,
            }
        } else {
            out.push(c);
        }
    }
    Some(out)
}

fn parse_reg(op: &str, line: Line<'_>) -> Result<Reg> {
    op.strip_prefix('r')
        .and_then(|n| n.parse().ok())
        .map(Reg)
        .ok_or_else(|| anyhow!("line {}: expected register, found `{}`", line.number, op))
}

fn parse_const_ref(op: &str, line: Line<'_>) -> Result<ConstIdx> {
    op.strip_prefix('#')
        .and_then(|n| n.parse().ok())
        .map(ConstIdx::new)
        .ok_or_else(|| anyhow!("line {}: expected constant ref, found `{}`", line.number, op))
}

fn parse_instr(line: Line<'_>, ids: &HashMap<&str, BlockId>) -> Result<Instr> {
    let (mnemonic, rest) = line.text.split_once(' ').unwrap_or((line.text, ""));
    let ops: Vec<&str> = rest
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    let arity = |n: usize| -> Result<()> {
        if ops.len() != n {
            bail!(
                "line {}: `{}` takes {} operands, found {}",
                line.number,
                mnemonic,
                n,
                ops.len()
            );
        }
        Ok(())
    };
    let reg = |i: usize| parse_reg(ops[i], line);
    let konst = |i: usize| parse_const_ref(ops[i], line);
    let block = |i: usize| resolve(ids, ops[i], line);

    if let Some(op) = BinaryOp::from_mnemonic(mnemonic) {
        arity(3)?;
        return Ok(Instr::Binary {
            op,
            dest: reg(0)?,
            lhs: reg(1)?,
            rhs: reg(2)?,
        });
    }
    if let Some(op) = UnaryOp::from_mnemonic(mnemonic) {
        arity(2)?;
        return Ok(Instr::Unary {
            op,
            dest: reg(0)?,
            operand: reg(1)?,
        });
    }

    let instr = match mnemonic {
        "load_const" => {
            arity(2)?;
            Instr::LoadConst {
                dest: reg(0)?,
                index: konst(1)?,
            }
        }
        "load_int" => {
            arity(2)?;
            let value = ops[1]
                .parse()
                .with_context(|| format!("line {}: bad integer `{}`", line.number, ops[1]))?;
            Instr::LoadInt {
                dest: reg(0)?,
                value,
            }
        }
        "load_undefined" => {
            arity(1)?;
            Instr::LoadUndefined { dest: reg(0)? }
        }
        "move" => {
            arity(2)?;
            Instr::Move {
                dest: reg(0)?,
                src: reg(1)?,
            }
        }
        "push" => {
            arity(1)?;
            Instr::Push { src: reg(0)? }
        }
        "pop" => {
            arity(1)?;
            Instr::Pop { dest: reg(0)? }
        }
        "get_prop" => {
            arity(3)?;
            Instr::GetProperty {
                dest: reg(0)?,
                object: reg(1)?,
                key: reg(2)?,
            }
        }
        "set_prop" => {
            arity(3)?;
            Instr::SetProperty {
                object: reg(0)?,
                key: reg(1)?,
                value: reg(2)?,
            }
        }
        "get_global" => {
            arity(2)?;
            Instr::GetGlobal {
                dest: reg(0)?,
                name: konst(1)?,
            }
        }
        "set_global" => {
            arity(2)?;
            Instr::SetGlobal {
                name: konst(0)?,
                value: reg(1)?,
            }
        }
        "call" => {
            arity(3)?;
            let argc = ops[2]
                .parse()
                .with_context(|| format!("line {}: bad argument count `{}`", line.number, ops[2]))?;
            Instr::Call {
                dest: reg(0)?,
                callee: reg(1)?,
                argc,
            }
        }
        "new_object" => {
            arity(1)?;
            Instr::NewObject { dest: reg(0)? }
        }
        "exception" => {
            arity(1)?;
            Instr::Exception { dest: reg(0)? }
        }
        "jump" => {
            arity(1)?;
            Instr::Jump { target: block(0)? }
        }
        "jump_if" => {
            arity(3)?;
            Instr::JumpIf {
                condition: reg(0)?,
                if_true: block(1)?,
                if_false: block(2)?,
            }
        }
        "jump_table" => {
            arity(2)?;
            Instr::JumpTable {
                index: reg(0)?,
                table: konst(1)?,
            }
        }
        "return" => {
            arity(1)?;
            Instr::Return { value: reg(0)? }
        }
        "throw" => {
            arity(1)?;
            Instr::Throw { value: reg(0)? }
        }
        "yield" => {
            arity(2)?;
            Instr::Yield {
                value: reg(0)?,
                resume: block(1)?,
            }
        }
        "await" => {
            arity(2)?;
            Instr::Await {
                value: reg(0)?,
                resume: block(1)?,
            }
        }
        _ => bail!("line {}: unknown instruction `{}`", line.number, mnemonic),
    };
    Ok(instr)
}
