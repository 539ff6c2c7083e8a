//! The instruction model.
//!
//! Every pass matches on [`Instr`] exhaustively, so adding an opcode forces
//! each of them to decide how the new instruction behaves. The effect queries
//! (`for_each_read`, `for_each_write`, `stack_delta`, `is_terminator`,
//! `can_throw`, `for_each_target`) are the only place opcode semantics are
//! spelled out.

use super::types::{BlockId, ConstIdx, Reg};
use std::fmt;

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    LessThan,
    GreaterThan,
    LooseEquals,
    StrictEquals,
    StrictNotEquals,
    BitAnd,
    BitOr,
}

impl BinaryOp {
    pub const ALL: [BinaryOp; 12] = [
        BinaryOp::Add,
        BinaryOp::Sub,
        BinaryOp::Mul,
        BinaryOp::Div,
        BinaryOp::Mod,
        BinaryOp::LessThan,
        BinaryOp::GreaterThan,
        BinaryOp::LooseEquals,
        BinaryOp::StrictEquals,
        BinaryOp::StrictNotEquals,
        BinaryOp::BitAnd,
        BinaryOp::BitOr,
    ];

    pub fn mnemonic(self) -> &'static str {
        match self {
            BinaryOp::Add => "add",
            BinaryOp::Sub => "sub",
            BinaryOp::Mul => "mul",
            BinaryOp::Div => "div",
            BinaryOp::Mod => "mod",
            BinaryOp::LessThan => "lt",
            BinaryOp::GreaterThan => "gt",
            BinaryOp::LooseEquals => "eq",
            BinaryOp::StrictEquals => "strict_eq",
            BinaryOp::StrictNotEquals => "strict_ne",
            BinaryOp::BitAnd => "bit_and",
            BinaryOp::BitOr => "bit_or",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.mnemonic() == s)
    }

    /// Strict (in)equality never coerces its operands; everything else may
    /// call `valueOf`/`toString` on an object and so may throw.
    pub fn can_throw(self) -> bool {
        !matches!(self, BinaryOp::StrictEquals | BinaryOp::StrictNotEquals)
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    TypeOf,
    Negate,
    ToNumber,
}

impl UnaryOp {
    pub const ALL: [UnaryOp; 4] = [
        UnaryOp::Not,
        UnaryOp::TypeOf,
        UnaryOp::Negate,
        UnaryOp::ToNumber,
    ];

    pub fn mnemonic(self) -> &'static str {
        match self {
            UnaryOp::Not => "not",
            UnaryOp::TypeOf => "typeof",
            UnaryOp::Negate => "neg",
            UnaryOp::ToNumber => "to_number",
        }
    }

    pub fn from_mnemonic(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|op| op.mnemonic() == s)
    }

    pub fn can_throw(self) -> bool {
        matches!(self, UnaryOp::Negate | UnaryOp::ToNumber)
    }
}

/// A single bytecode instruction.
#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    /// dest = constants[index]
    LoadConst { dest: Reg, index: ConstIdx },

    /// dest = value
    LoadInt { dest: Reg, value: i32 },

    /// dest = undefined
    LoadUndefined { dest: Reg },

    /// dest = src
    Move { dest: Reg, src: Reg },

    /// Push src onto the operand stack
    Push { src: Reg },

    /// Pop the operand stack into dest
    Pop { dest: Reg },

    /// dest = lhs op rhs
    Binary {
        op: BinaryOp,
        dest: Reg,
        lhs: Reg,
        rhs: Reg,
    },

    /// dest = op operand
    Unary { op: UnaryOp, dest: Reg, operand: Reg },

    /// dest = object[key]
    GetProperty { dest: Reg, object: Reg, key: Reg },

    /// object[key] = value
    SetProperty { object: Reg, key: Reg, value: Reg },

    /// dest = global named by constants[name]
    GetGlobal { dest: Reg, name: ConstIdx },

    /// global named by constants[name] = value
    SetGlobal { name: ConstIdx, value: Reg },

    /// dest = callee(...argc values popped from the operand stack)
    Call { dest: Reg, callee: Reg, argc: u32 },

    /// dest = {}
    NewObject { dest: Reg },

    /// dest = the exception that transferred control to this handler
    Exception { dest: Reg },

    /// Unconditional jump
    Jump { target: BlockId },

    /// Conditional jump on the truthiness of `condition`
    JumpIf {
        condition: Reg,
        if_true: BlockId,
        if_false: BlockId,
    },

    /// Multi-way dispatch through a dispatch table in the constant pool
    JumpTable { index: Reg, table: ConstIdx },

    /// Return from the function
    Return { value: Reg },

    /// Throw `value`
    Throw { value: Reg },

    /// Suspend a generator, yielding `value`; execution resumes at `resume`
    Yield { value: Reg, resume: BlockId },

    /// Suspend an async function on `value`; execution resumes at `resume`
    Await { value: Reg, resume: BlockId },
}

impl Instr {
    /// Textual opcode name, shared by the printer and the parser.
    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instr::LoadConst { .. } => "load_const",
            Instr::LoadInt { .. } => "load_int",
            Instr::LoadUndefined { .. } => "load_undefined",
            Instr::Move { .. } => "move",
            Instr::Push { .. } => "push",
            Instr::Pop { .. } => "pop",
            Instr::Binary { op, .. } => op.mnemonic(),
            Instr::Unary { op, .. } => op.mnemonic(),
            Instr::GetProperty { .. } => "get_prop",
            Instr::SetProperty { .. } => "set_prop",
            Instr::GetGlobal { .. } => "get_global",
            Instr::SetGlobal { .. } => "set_global",
            Instr::Call { .. } => "call",
            Instr::NewObject { .. } => "new_object",
            Instr::Exception { .. } => "exception",
            Instr::Jump { .. } => "jump",
            Instr::JumpIf { .. } => "jump_if",
            Instr::JumpTable { .. } => "jump_table",
            Instr::Return { .. } => "return",
            Instr::Throw { .. } => "throw",
            Instr::Yield { .. } => "yield",
            Instr::Await { .. } => "await",
        }
    }

    /// Change in operand stack depth after execution.
    pub fn stack_delta(&self) -> i32 {
        match self {
            Instr::Push { .. } => 1,
            Instr::Pop { .. } => -1,
            Instr::Call { argc, .. } => -(i32::try_from(*argc).unwrap_or(i32::MAX)),
            Instr::LoadConst { .. }
            | Instr::LoadInt { .. }
            | Instr::LoadUndefined { .. }
            | Instr::Move { .. }
            | Instr::Binary { .. }
            | Instr::Unary { .. }
            | Instr::GetProperty { .. }
            | Instr::SetProperty { .. }
            | Instr::GetGlobal { .. }
            | Instr::SetGlobal { .. }
            | Instr::NewObject { .. }
            | Instr::Exception { .. }
            | Instr::Jump { .. }
            | Instr::JumpIf { .. }
            | Instr::JumpTable { .. }
            | Instr::Return { .. }
            | Instr::Throw { .. }
            | Instr::Yield { .. }
            | Instr::Await { .. } => 0,
        }
    }

    /// Control-transfer instructions; exactly one ends every block.
    pub fn is_terminator(&self) -> bool {
        match self {
            Instr::Jump { .. }
            | Instr::JumpIf { .. }
            | Instr::JumpTable { .. }
            | Instr::Return { .. }
            | Instr::Throw { .. }
            | Instr::Yield { .. }
            | Instr::Await { .. } => true,
            Instr::LoadConst { .. }
            | Instr::LoadInt { .. }
            | Instr::LoadUndefined { .. }
            | Instr::Move { .. }
            | Instr::Push { .. }
            | Instr::Pop { .. }
            | Instr::Binary { .. }
            | Instr::Unary { .. }
            | Instr::GetProperty { .. }
            | Instr::SetProperty { .. }
            | Instr::GetGlobal { .. }
            | Instr::SetGlobal { .. }
            | Instr::Call { .. }
            | Instr::NewObject { .. }
            | Instr::Exception { .. } => false,
        }
    }

    /// Whether executing this instruction may raise an exception.
    ///
    /// Suspension points count: `generator.throw()` and rejected promises
    /// resume the function with an exception at the yield/await site.
    pub fn can_throw(&self) -> bool {
        match self {
            Instr::Binary { op, .. } => op.can_throw(),
            Instr::Unary { op, .. } => op.can_throw(),
            Instr::GetProperty { .. }
            | Instr::SetProperty { .. }
            | Instr::GetGlobal { .. }
            | Instr::SetGlobal { .. }
            | Instr::Call { .. }
            | Instr::Throw { .. }
            | Instr::Yield { .. }
            | Instr::Await { .. } => true,
            Instr::LoadConst { .. }
            | Instr::LoadInt { .. }
            | Instr::LoadUndefined { .. }
            | Instr::Move { .. }
            | Instr::Push { .. }
            | Instr::Pop { .. }
            | Instr::NewObject { .. }
            | Instr::Exception { .. }
            | Instr::Jump { .. }
            | Instr::JumpIf { .. }
            | Instr::JumpTable { .. }
            | Instr::Return { .. } => false,
        }
    }

    /// Calls `f` with every register read by this instruction.
    pub fn for_each_read<F: FnMut(Reg)>(&self, mut f: F) {
        match self {
            Instr::Move { src, .. } | Instr::Push { src } => f(*src),
            Instr::Binary { lhs, rhs, .. } => {
                f(*lhs);
                f(*rhs);
            }
            Instr::Unary { operand, .. } => f(*operand),
            Instr::GetProperty { object, key, .. } => {
                f(*object);
                f(*key);
            }
            Instr::SetProperty { object, key, value } => {
                f(*object);
                f(*key);
                f(*value);
            }
            Instr::SetGlobal { value, .. } => f(*value),
            Instr::Call { callee, .. } => f(*callee),
            Instr::JumpIf { condition, .. } => f(*condition),
            Instr::JumpTable { index, .. } => f(*index),
            Instr::Return { value }
            | Instr::Throw { value }
            | Instr::Yield { value, .. }
            | Instr::Await { value, .. } => f(*value),
            Instr::LoadConst { .. }
            | Instr::LoadInt { .. }
            | Instr::LoadUndefined { .. }
            | Instr::Pop { .. }
            | Instr::GetGlobal { .. }
            | Instr::NewObject { .. }
            | Instr::Exception { .. }
            | Instr::Jump { .. } => {}
        }
    }

    /// Calls `f` with a mutable reference to every register read.
    pub fn for_each_read_mut<F: FnMut(&mut Reg)>(&mut self, mut f: F) {
        match self {
            Instr::Move { src, .. } | Instr::Push { src } => f(src),
            Instr::Binary { lhs, rhs, .. } => {
                f(lhs);
                f(rhs);
            }
            Instr::Unary { operand, .. } => f(operand),
            Instr::GetProperty { object, key, .. } => {
                f(object);
                f(key);
            }
            Instr::SetProperty { object, key, value } => {
                f(object);
                f(key);
                f(value);
            }
            Instr::SetGlobal { value, .. } => f(value),
            Instr::Call { callee, .. } => f(callee),
            Instr::JumpIf { condition, .. } => f(condition),
            Instr::JumpTable { index, .. } => f(index),
            Instr::Return { value }
            | Instr::Throw { value }
            | Instr::Yield { value, .. }
            | Instr::Await { value, .. } => f(value),
            Instr::LoadConst { .. }
            | Instr::LoadInt { .. }
            | Instr::LoadUndefined { .. }
            | Instr::Pop { .. }
            | Instr::GetGlobal { .. }
            | Instr::NewObject { .. }
            | Instr::Exception { .. }
            | Instr::Jump { .. } => {}
        }
    }

    /// Returns the register written by this instruction, if any.
    pub fn dest(&self) -> Option<Reg> {
        match self {
            Instr::LoadConst { dest, .. }
            | Instr::LoadInt { dest, .. }
            | Instr::LoadUndefined { dest }
            | Instr::Move { dest, .. }
            | Instr::Pop { dest }
            | Instr::Binary { dest, .. }
            | Instr::Unary { dest, .. }
            | Instr::GetProperty { dest, .. }
            | Instr::GetGlobal { dest, .. }
            | Instr::Call { dest, .. }
            | Instr::NewObject { dest }
            | Instr::Exception { dest } => Some(*dest),
            Instr::Push { .. }
            | Instr::SetProperty { .. }
            | Instr::SetGlobal { .. }
            | Instr::Jump { .. }
            | Instr::JumpIf { .. }
            | Instr::JumpTable { .. }
            | Instr::Return { .. }
            | Instr::Throw { .. }
            | Instr::Yield { .. }
            | Instr::Await { .. } => None,
        }
    }

    /// Mutable access to the destination register, if any.
    pub fn dest_mut(&mut self) -> Option<&mut Reg> {
        match self {
            Instr::LoadConst { dest, .. }
            | Instr::LoadInt { dest, .. }
            | Instr::LoadUndefined { dest }
            | Instr::Move { dest, .. }
            | Instr::Pop { dest }
            | Instr::Binary { dest, .. }
            | Instr::Unary { dest, .. }
            | Instr::GetProperty { dest, .. }
            | Instr::GetGlobal { dest, .. }
            | Instr::Call { dest, .. }
            | Instr::NewObject { dest }
            | Instr::Exception { dest } => Some(dest),
            Instr::Push { .. }
            | Instr::SetProperty { .. }
            | Instr::SetGlobal { .. }
            | Instr::Jump { .. }
            | Instr::JumpIf { .. }
            | Instr::JumpTable { .. }
            | Instr::Return { .. }
            | Instr::Throw { .. }
            | Instr::Yield { .. }
            | Instr::Await { .. } => None,
        }
    }

    /// Calls `f` with every register written by this instruction.
    pub fn for_each_write<F: FnMut(Reg)>(&self, mut f: F) {
        if let Some(dest) = self.dest() {
            f(dest);
        }
    }

    /// Calls `f` with every block this instruction targets directly.
    ///
    /// `jump_table` targets live in the constant pool and are not reported
    /// here; use [`FunctionUnit::successors`](super::FunctionUnit::successors).
    pub fn for_each_target<F: FnMut(BlockId)>(&self, mut f: F) {
        match self {
            Instr::Jump { target } => f(*target),
            Instr::JumpIf {
                if_true, if_false, ..
            } => {
                f(*if_true);
                f(*if_false);
            }
            Instr::Yield { resume, .. } | Instr::Await { resume, .. } => f(*resume),
            _ => {}
        }
    }

    /// Calls `f` with a mutable reference to every block targeted directly.
    pub fn for_each_target_mut<F: FnMut(&mut BlockId)>(&mut self, mut f: F) {
        match self {
            Instr::Jump { target } => f(target),
            Instr::JumpIf {
                if_true, if_false, ..
            } => {
                f(if_true);
                f(if_false);
            }
            Instr::Yield { resume, .. } | Instr::Await { resume, .. } => f(resume),
            _ => {}
        }
    }

    /// The continuation of a suspension point.
    pub fn resume_target(&self) -> Option<BlockId> {
        match self {
            Instr::Yield { resume, .. } | Instr::Await { resume, .. } => Some(*resume),
            _ => None,
        }
    }
}

impl fmt::Display for Instr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = self.mnemonic();
        match self {
            Instr::LoadConst { dest, index } => write!(f, "{m} {dest}, #{}", index.as_usize()),
            Instr::LoadInt { dest, value } => write!(f, "{m} {dest}, {value}"),
            Instr::LoadUndefined { dest }
            | Instr::Pop { dest }
            | Instr::NewObject { dest }
            | Instr::Exception { dest } => write!(f, "{m} {dest}"),
            Instr::Move { dest, src } => write!(f, "{m} {dest}, {src}"),
            Instr::Push { src } => write!(f, "{m} {src}"),
            Instr::Binary { dest, lhs, rhs, .. } => write!(f, "{m} {dest}, {lhs}, {rhs}"),
            Instr::Unary { dest, operand, .. } => write!(f, "{m} {dest}, {operand}"),
            Instr::GetProperty { dest, object, key } => write!(f, "{m} {dest}, {object}, {key}"),
            Instr::SetProperty { object, key, value } => {
                write!(f, "{m} {object}, {key}, {value}")
            }
            Instr::GetGlobal { dest, name } => write!(f, "{m} {dest}, #{}", name.as_usize()),
            Instr::SetGlobal { name, value } => write!(f, "{m} #{}, {value}", name.as_usize()),
            Instr::Call { dest, callee, argc } => write!(f, "{m} {dest}, {callee}, {argc}"),
            Instr::Return { value } | Instr::Throw { value } => write!(f, "{m} {value}"),
            Instr::JumpTable { index, table } => write!(f, "{m} {index}, #{}", table.as_usize()),
            // Block operands need the unit's block names; see `ir::display`.
            Instr::Jump { target } => write!(f, "{m} {target}"),
            Instr::JumpIf {
                condition,
                if_true,
                if_false,
            } => write!(f, "{m} {condition}, {if_true}, {if_false}"),
            Instr::Yield { value, resume } | Instr::Await { value, resume } => {
                write!(f, "{m} {value}, {resume}")
            }
        }
    }
}
