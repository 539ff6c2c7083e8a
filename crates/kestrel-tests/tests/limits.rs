//! Resource limits surface as a typed error.

mod common;

use common::*;
use kestrel::optimizer::{Limit, Limits, TooComplex};
use kestrel::parser::parse_unit;
use kestrel::{optimize, OptimizeOptions};

fn too_complex(source: &str, limits: Limits) -> TooComplex {
    let options = OptimizeOptions {
        limits,
        ..Default::default()
    };
    let err = optimize(parse_unit(source).unwrap(), &options).unwrap_err();
    *err.downcast_ref::<TooComplex>().unwrap()
}

/// A chain of `n` blocks, each branching to the next or to a shared exit.
fn chain(n: usize) -> String {
    let mut s = String::from("function deep(args=1, registers=1) {\n");
    for i in 0..n {
        s.push_str(&format!("b{i}:\n  jump_if r0, b{}, end\n", i + 1));
    }
    s.push_str(&format!("b{n}:\n  return r0\nend:\n  return r0\n}}\n"));
    s
}

#[test]
fn test_block_limit() {
    let err = too_complex(
        NESTED_LOOPS,
        Limits {
            max_blocks: 4,
            ..Default::default()
        },
    );
    assert_eq!(err.limit, Limit::Blocks);
    assert_eq!(err.max, 4);
    assert_eq!(err.actual, 7);
}

#[test]
fn test_register_limit() {
    let err = too_complex(
        NESTED_LOOPS,
        Limits {
            max_registers: 5,
            ..Default::default()
        },
    );
    assert_eq!(err.limit, Limit::Registers);
    assert_eq!(err.actual, 6);
}

#[test]
fn test_depth_limit() {
    let err = too_complex(
        &chain(64),
        Limits {
            max_depth: 16,
            ..Default::default()
        },
    );
    assert_eq!(err.limit, Limit::Depth);
    assert!(err.to_string().starts_with("function too complex to compile"));
}

#[test]
fn test_deep_chain_within_limits() {
    let unit = optimize(parse_unit(&chain(2_000)).unwrap(), &OptimizeOptions::default()).unwrap();
    assert_eq!(unit.blocks.len(), 2_002);
}
