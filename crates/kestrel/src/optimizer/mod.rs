//! Function-level optimization passes.
//!
//! Each pass is a self-contained sub-module. [`Pipeline`] owns one function
//! unit and its current CFG and runs the passes in the required order:
//!
//! ```text
//! remove_handlers → generate_cfg → merge_blocks → remove_handlers →
//! generate_cfg → place_blocks [→ liveness_analysis → register_allocation]
//! ```
//!
//! A pass that needs a CFG fails with an invariant violation when none is
//! current, so out-of-order use is caught instead of silently miscompiling.

use crate::ir::{validate, FunctionUnit};
use anyhow::{anyhow, Context, Result};

// ── Passes ───────────────────────────────────────────────────────────────────
mod bitset;
mod cfg;
mod dead_blocks;
mod handlers;
mod limits;
mod liveness;
mod loops;
mod merge_blocks;
mod regalloc;

pub use cfg::{BackEdges, Cfg, Liveness};
pub use limits::{Limit, Limits, TooComplex};
pub use merge_blocks::MergeStats;

/// Configuration of a full optimization run.
#[derive(Debug, Clone)]
pub struct OptimizeOptions {
    /// Run liveness analysis and register allocation after block placement
    pub allocate_registers: bool,
    /// Lower bound for the register count after allocation
    pub reserved_registers: u32,
    /// Resource limits; exceeding one fails with [`TooComplex`]
    pub limits: Limits,
}

impl Default for OptimizeOptions {
    fn default() -> Self {
        Self {
            allocate_registers: true,
            reserved_registers: 0,
            limits: Limits::default(),
        }
    }
}

/// One function unit moving through the passes.
#[derive(Debug)]
pub struct Pipeline {
    unit: FunctionUnit,
    cfg: Option<Cfg>,
    limits: Limits,
}

impl Pipeline {
    /// Validates `unit` and checks it against `limits`.
    pub fn new(unit: FunctionUnit, limits: Limits) -> Result<Self> {
        validate(&unit).with_context(|| format!("invalid input unit `{}`", unit.name))?;
        limits.check(Limit::Blocks, unit.blocks.len())?;
        limits.check(Limit::Registers, unit.register_count as usize)?;
        Ok(Self {
            unit,
            cfg: None,
            limits,
        })
    }

    pub fn unit(&self) -> &FunctionUnit {
        &self.unit
    }

    /// The current CFG, if one has been built since blocks last changed.
    pub fn cfg(&self) -> Option<&Cfg> {
        self.cfg.as_ref()
    }

    /// Drops handlers of blocks that cannot throw.
    pub fn remove_handlers(&mut self) -> usize {
        let removed = handlers::remove_handlers(&mut self.unit);
        if removed > 0 {
            // Handler edges are part of the graph.
            self.cfg = None;
        }
        log::debug!(
            target: "pipeline",
            "`{}`: removed {} dead handlers",
            self.unit.name,
            removed
        );
        removed
    }

    /// Builds the CFG of the current block list.
    pub fn generate_cfg(&mut self) -> Result<&Cfg> {
        let cfg = Cfg::build(&self.unit)
            .with_context(|| format!("failed to build the CFG of `{}`", self.unit.name))?;
        Ok(&*self.cfg.insert(cfg))
    }

    /// Redirects passthrough blocks and merges chains. Invalidates the CFG.
    pub fn merge_blocks(&mut self) -> Result<MergeStats> {
        let Some(cfg) = self.cfg.take() else {
            return Err(missing_cfg("merge_blocks", &self.unit));
        };
        merge_blocks::merge_blocks(&mut self.unit, &cfg)
            .with_context(|| format!("failed to merge blocks of `{}`", self.unit.name))
    }

    /// Removes blocks unreachable from the entry.
    pub fn place_blocks(&mut self) -> Result<usize> {
        let Some(cfg) = self.cfg.as_ref() else {
            return Err(missing_cfg("place_blocks", &self.unit));
        };
        dead_blocks::place_blocks(&mut self.unit, cfg)
            .with_context(|| format!("failed to place blocks of `{}`", self.unit.name))
    }

    /// Computes per-block liveness on the current CFG.
    pub fn liveness_analysis(&mut self) -> Result<&Cfg> {
        let Some(cfg) = self.cfg.as_mut() else {
            return Err(missing_cfg("liveness_analysis", &self.unit));
        };
        liveness::liveness_analysis(&self.unit, cfg, &self.limits)
            .with_context(|| format!("liveness analysis of `{}` failed", self.unit.name))?;
        Ok(&*cfg)
    }

    /// Renumbers registers onto the fewest slots. Returns the new count.
    pub fn register_allocation(&mut self, reserved_registers: u32) -> Result<u32> {
        let Some(cfg) = self.cfg.as_mut() else {
            return Err(missing_cfg("register_allocation", &self.unit));
        };
        let count = regalloc::register_allocation(&mut self.unit, cfg, reserved_registers)
            .with_context(|| format!("register allocation of `{}` failed", self.unit.name))?;
        // Liveness was expressed in virtual registers.
        cfg.liveness.clear();
        Ok(count)
    }

    /// Runs the structural passes, ending with a CFG of the final layout.
    pub fn run_structural(&mut self) -> Result<()> {
        self.remove_handlers();
        self.generate_cfg()?;
        self.merge_blocks()?;
        self.remove_handlers();
        self.generate_cfg()?;
        self.place_blocks()?;
        Ok(())
    }

    /// Runs the whole protocol and returns the optimized unit.
    pub fn run(self, options: &OptimizeOptions) -> Result<FunctionUnit> {
        self.run_inspected(options, |_, _| {})
    }

    /// Runs the whole protocol, handing the final CFG to `inspect` before
    /// registers are renumbered. With allocation enabled the CFG carries
    /// liveness.
    pub fn run_inspected(
        mut self,
        options: &OptimizeOptions,
        mut inspect: impl FnMut(&FunctionUnit, &Cfg),
    ) -> Result<FunctionUnit> {
        self.run_structural()?;
        if options.allocate_registers {
            self.liveness_analysis()?;
        }
        if let Some(cfg) = self.cfg.as_ref() {
            inspect(&self.unit, cfg);
        }
        if options.allocate_registers {
            self.register_allocation(options.reserved_registers)?;
        }
        self.finish()
    }

    /// Re-validates and releases the unit.
    pub fn finish(self) -> Result<FunctionUnit> {
        validate(&self.unit).with_context(|| {
            format!("optimizer produced an invalid unit for `{}`", self.unit.name)
        })?;
        Ok(self.unit)
    }
}

fn missing_cfg(pass: &str, unit: &FunctionUnit) -> anyhow::Error {
    anyhow!(
        "CFG invariant violated: {} on `{}` requires a freshly built CFG",
        pass,
        unit.name
    )
}

// ── Pipeline integration tests ───────────────────────────────────────────────
