//! kestrel: function-level bytecode optimizer for a JavaScript engine.
//!
//! This crate takes the block-structured bytecode a front end emits for one
//! function and turns it into a compact, register-allocated program: passthrough
//! blocks are redirected, single-predecessor chains merged, dead handlers and
//! unreachable blocks dropped, and virtual registers packed onto the fewest
//! slots their live ranges allow.

pub mod ir;
pub mod optimizer;
pub mod parser;

// Re-export key types for convenience
pub use anyhow::{Context, Result};
pub use ir::FunctionUnit;
pub use optimizer::{Cfg, Limit, Limits, OptimizeOptions, Pipeline, TooComplex};

use parser::parse_units;

/// Optimize one function unit.
///
/// Runs the full pass protocol. The unit is consumed: on error nothing
/// partially optimized escapes.
///
/// # Example
/// ```
/// use kestrel::{optimize, parser::parse_unit, OptimizeOptions};
///
/// let unit = parse_unit(
///     "function f(args=1, registers=2) {
///      entry:
///        move r1, r0
///        jump exit
///      exit:
///        return r1
///      }",
/// )
/// .unwrap();
/// let optimized = optimize(unit, &OptimizeOptions::default()).unwrap();
/// assert_eq!(optimized.blocks.len(), 1);
/// ```
pub fn optimize(unit: FunctionUnit, options: &OptimizeOptions) -> Result<FunctionUnit> {
    optimize_inspected(unit, options, |_, _| {})
}

/// Optimize one function unit, showing its final CFG to `inspect`.
///
/// See [`Pipeline::run_inspected`].
pub fn optimize_inspected(
    unit: FunctionUnit,
    options: &OptimizeOptions,
    inspect: impl FnMut(&FunctionUnit, &Cfg),
) -> Result<FunctionUnit> {
    let name = unit.name.clone();
    Pipeline::new(unit, options.limits)
        .and_then(|pipeline| pipeline.run_inspected(options, inspect))
        .with_context(|| format!("failed to optimize `{}`", name))
}

/// Optimize every function in an assembly source and print the result.
pub fn optimize_source(source: &str, options: &OptimizeOptions) -> Result<String> {
    optimize_source_inspected(source, options, |_, _| {})
}

/// [`optimize_source`], showing the final CFG of every function to `inspect`.
pub fn optimize_source_inspected(
    source: &str,
    options: &OptimizeOptions,
    mut inspect: impl FnMut(&FunctionUnit, &Cfg),
) -> Result<String> {
    let units = parse_units(source).context("failed to parse assembly")?;
    let mut out = String::new();
    for unit in units {
        let name = unit.name.clone();
        let (blocks, registers) = (unit.blocks.len(), unit.register_count);
        let optimized = optimize_inspected(unit, options, &mut inspect)?;
        log::info!(
            "`{}`: {} -> {} blocks, {} -> {} registers",
            name,
            blocks,
            optimized.blocks.len(),
            registers,
            optimized.register_count
        );
        if !out.is_empty() {
            out.push('\n');
        }
        out.push_str(&optimized.to_string());
    }
    Ok(out)
}
