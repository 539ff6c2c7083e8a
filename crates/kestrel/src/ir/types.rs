//! IR type definitions.
//!
//! These types describe one function body as produced by the front end: an
//! arena of basic blocks addressed by [`BlockId`], instructions over virtual
//! registers ([`Reg`]), and a constant pool that also carries the dispatch
//! tables generators use to resume at a continuation block.

use super::instr::Instr;
use anyhow::{bail, Result};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// A register operand.
///
/// Before allocation this is a virtual register; after allocation it is a
/// physical frame slot. Registers `0..arg_count` are the function's
/// parameters in both numberings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Reg(pub u32);

impl Reg {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Stable identifier of a basic block.
///
/// Blocks are compared by identity, never by content. Passes that redirect or
/// replace blocks rewrite ids; the numbering itself never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockId(pub u32);

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "block_{}", self.0)
    }
}

/// Generic index type with a phantom tag to distinguish different index spaces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Idx<TAG> {
    idx: usize,
    _marker: std::marker::PhantomData<TAG>,
}

impl<TAG> Idx<TAG> {
    pub fn new(idx: usize) -> Self {
        Self {
            idx,
            _marker: std::marker::PhantomData,
        }
    }

    pub fn as_usize(&self) -> usize {
        self.idx
    }
}

impl<TAG> From<Idx<TAG>> for usize {
    fn from(idx: Idx<TAG>) -> Self {
        idx.idx
    }
}

/// Marker type for constant pool indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConstTag;

/// Constant pool index into `FunctionUnit::constants`.
pub type ConstIdx = Idx<ConstTag>;

/// Resumption dispatch table: generator state → continuation block.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchTable {
    pub targets: BTreeMap<u32, BlockId>,
}

impl DispatchTable {
    /// Distinct target blocks, in state order of first appearance.
    pub fn distinct_targets(&self) -> Vec<BlockId> {
        let mut out: Vec<BlockId> = Vec::with_capacity(self.targets.len());
        for target in self.targets.values() {
            if !out.contains(target) {
                out.push(*target);
            }
        }
        out
    }
}

/// An entry of the function's constant pool.
#[derive(Debug, Clone, PartialEq)]
pub enum Constant {
    Undefined,
    Number(f64),
    String(String),
    Dispatch(DispatchTable),
}

/// A basic block: instructions ending in exactly one terminator.
#[derive(Debug, Clone)]
pub struct Block {
    /// Unique identifier for this block
    pub id: BlockId,

    /// Display name, used in diagnostics and the textual form
    pub name: String,

    /// Instructions; the last one is the terminator
    pub instructions: Vec<Instr>,

    /// Block entered when an instruction of this block throws
    pub handler: Option<BlockId>,
}

impl Block {
    pub fn new(id: BlockId, name: impl Into<String>, instructions: Vec<Instr>) -> Self {
        Self {
            id,
            name: name.into(),
            instructions,
            handler: None,
        }
    }

    pub fn with_handler(mut self, handler: BlockId) -> Self {
        self.handler = Some(handler);
        self
    }

    /// The block's final instruction.
    ///
    /// Validated units never contain empty blocks; `None` only shows up on
    /// input that has not been through [`validate`](super::validate).
    pub fn terminator(&self) -> Option<&Instr> {
        self.instructions.last()
    }

    /// Whether any instruction of this block may raise an exception.
    pub fn can_throw(&self) -> bool {
        self.instructions.iter().any(Instr::can_throw)
    }
}

/// One function body: the unit of work of the optimization pipeline.
#[derive(Debug, Clone)]
pub struct FunctionUnit {
    /// Function name (diagnostics only)
    pub name: String,

    /// Live blocks, in layout order
    pub blocks: Vec<Block>,

    /// Entry block (where execution starts)
    ///
    /// INVARIANT: after every pass the entry block is `blocks[0]`.
    pub entry: BlockId,

    /// Number of declared parameters; registers `0..arg_count`
    pub arg_count: u32,

    /// Number of registers (virtual before allocation, slots after)
    pub register_count: u32,

    /// Constants referenced by `load_const`, `get_global`, `set_global` and
    /// `jump_table`
    pub constants: Vec<Constant>,
}

impl FunctionUnit {
    /// Creates a unit whose entry is the first block.
    pub fn new(
        name: impl Into<String>,
        arg_count: u32,
        register_count: u32,
        blocks: Vec<Block>,
    ) -> Self {
        let entry = blocks.first().map(|b| b.id).unwrap_or(BlockId(0));
        Self {
            name: name.into(),
            blocks,
            entry,
            arg_count,
            register_count,
            constants: Vec::new(),
        }
    }

    /// Maps every block id to its position in `blocks`.
    pub fn block_map(&self) -> HashMap<BlockId, usize> {
        self.blocks
            .iter()
            .enumerate()
            .map(|(i, b)| (b.id, i))
            .collect()
    }

    pub fn block(&self, id: BlockId) -> Option<&Block> {
        self.blocks.iter().find(|b| b.id == id)
    }

    /// Display name of a block, falling back to its id.
    pub fn block_name(&self, id: BlockId) -> String {
        self.block(id)
            .map(|b| b.name.clone())
            .unwrap_or_else(|| id.to_string())
    }

    /// Resolves a constant index to a dispatch table.
    pub fn dispatch_table(&self, idx: ConstIdx) -> Result<&DispatchTable> {
        match self.constants.get(idx.as_usize()) {
            Some(Constant::Dispatch(table)) => Ok(table),
            Some(other) => bail!(
                "constant {} of `{}` is not a dispatch table: {:?}",
                idx.as_usize(),
                self.name,
                other
            ),
            None => bail!(
                "constant {} of `{}` is out of range ({} constants)",
                idx.as_usize(),
                self.name,
                self.constants.len()
            ),
        }
    }

    /// Distinct blocks control can transfer to from `block`'s terminator.
    ///
    /// Handler edges are not included; see [`Block::handler`].
    pub fn successors(&self, block: &Block) -> Result<Vec<BlockId>> {
        let Some(term) = block.terminator() else {
            bail!("block `{}` of `{}` is empty", block.name, self.name);
        };
        let mut out: Vec<BlockId> = Vec::new();
        if let Instr::JumpTable { table, .. } = term {
            out = self.dispatch_table(*table)?.distinct_targets();
        } else {
            term.for_each_target(|t| {
                if !out.contains(&t) {
                    out.push(t);
                }
            });
        }
        Ok(out)
    }

    /// Rewrites every reference to a block according to `map`.
    ///
    /// Covers jump targets, resume targets, dispatch tables, handler
    /// associations and the entry slot. Ids absent from `map` are kept.
    pub fn retarget(&mut self, map: &HashMap<BlockId, BlockId>) {
        if map.is_empty() {
            return;
        }
        let fwd = |id: BlockId| map.get(&id).copied().unwrap_or(id);

        for block in &mut self.blocks {
            for instr in &mut block.instructions {
                instr.for_each_target_mut(|t| *t = fwd(*t));
            }
            if let Some(handler) = block.handler {
                block.handler = Some(fwd(handler));
            }
        }
        for constant in &mut self.constants {
            if let Constant::Dispatch(table) = constant {
                for target in table.targets.values_mut() {
                    *target = fwd(*target);
                }
            }
        }
        self.entry = fwd(self.entry);
    }

    /// Moves the entry block to index 0 if a pass displaced it.
    pub fn seat_entry(&mut self) {
        if let Some(pos) = self.blocks.iter().position(|b| b.id == self.entry) {
            if pos != 0 {
                let entry = self.blocks.remove(pos);
                self.blocks.insert(0, entry);
            }
        }
    }

    /// Blocks targeted by any dispatch table in the constant pool.
    pub fn dispatch_targets(&self) -> Vec<BlockId> {
        let mut out = Vec::new();
        for constant in &self.constants {
            if let Constant::Dispatch(table) = constant {
                for target in table.targets.values() {
                    if !out.contains(target) {
                        out.push(*target);
                    }
                }
            }
        }
        out
    }
}
