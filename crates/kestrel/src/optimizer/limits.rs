//! Resource limits.
//!
//! Pathological inputs (huge or deeply nested functions) are rejected with a
//! [`TooComplex`] error instead of exhausting memory or time. Embedders
//! detect it with `err.downcast_ref::<TooComplex>()` and decide how to report
//! it to the script.

use std::fmt;

/// The resource a [`TooComplex`] error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Limit {
    /// Number of blocks in the function
    Blocks,
    /// Number of virtual registers in the function
    Registers,
    /// Length of the longest path explored by a graph walk
    Depth,
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Limit::Blocks => write!(f, "blocks"),
            Limit::Registers => write!(f, "registers"),
            Limit::Depth => write!(f, "nested control-flow levels"),
        }
    }
}

/// A function exceeded one of the configured [`Limits`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TooComplex {
    pub limit: Limit,
    pub max: usize,
    pub actual: usize,
}

impl fmt::Display for TooComplex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "function too complex to compile: {} {} exceeds the limit of {}",
            self.actual, self.limit, self.max
        )
    }
}

impl std::error::Error for TooComplex {}

/// Upper bounds the pipeline enforces on a single function.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub max_blocks: usize,
    pub max_registers: usize,
    pub max_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_blocks: 65_536,
            max_registers: 1 << 20,
            max_depth: 16_384,
        }
    }
}

impl Limits {
    /// Fails if `actual` exceeds the bound configured for `limit`.
    pub fn check(&self, limit: Limit, actual: usize) -> Result<(), TooComplex> {
        let max = match limit {
            Limit::Blocks => self.max_blocks,
            Limit::Registers => self.max_registers,
            Limit::Depth => self.max_depth,
        };
        if actual > max {
            return Err(TooComplex { limit, max, actual });
        }
        Ok(())
    }
}
