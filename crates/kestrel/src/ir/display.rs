//! Textual form of function units.
//!
//! The output is accepted by [`crate::parser::parse_units`], so a unit can be
//! printed, edited by hand, and fed back to the optimizer.

use super::instr::Instr;
use super::types::{Constant, FunctionUnit};
use std::fmt;

impl fmt::Display for FunctionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "function {}(args={}, registers={}) {{",
            self.name, self.arg_count, self.register_count
        )?;
        for (i, constant) in self.constants.iter().enumerate() {
            write!(f, "  const {} = ", i)?;
            match constant {
                Constant::Undefined => writeln!(f, "undefined")?,
                Constant::Number(n) => writeln!(f, "number {}", n)?,
                Constant::String(s) => writeln!(f, "string {:?}", s)?,
                Constant::Dispatch(table) => {
                    let entries: Vec<String> = table
                        .targets
                        .iter()
                        .map(|(state, target)| format!("{} -> {}", state, self.block_name(*target)))
                        .collect();
                    writeln!(f, "table {{ {} }}", entries.join(", "))?
                }
            }
        }
        for block in &self.blocks {
            match block.handler {
                Some(handler) => writeln!(
                    f,
                    "{} [handler={}]:",
                    block.name,
                    self.block_name(handler)
                )?,
                None => writeln!(f, "{}:", block.name)?,
            }
            for instr in &block.instructions {
                writeln!(f, "  {}", DisplayInstr { unit: self, instr })?;
            }
        }
        writeln!(f, "}}")
    }
}

/// Formats an instruction with block operands resolved to block names.
pub struct DisplayInstr<'a> {
    pub unit: &'a FunctionUnit,
    pub instr: &'a Instr,
}

impl fmt::Display for DisplayInstr<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = |id| self.unit.block_name(id);
        let m = self.instr.mnemonic();
        match self.instr {
            Instr::Jump { target } => write!(f, "{m} {}", name(*target)),
            Instr::JumpIf {
                condition,
                if_true,
                if_false,
            } => write!(f, "{m} {condition}, {}, {}", name(*if_true), name(*if_false)),
            Instr::Yield { value, resume } | Instr::Await { value, resume } => {
                write!(f, "{m} {value}, {}", name(*resume))
            }
            other => write!(f, "{}", other),
        }
    }
}
