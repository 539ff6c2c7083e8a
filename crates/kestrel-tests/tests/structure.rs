//! Structural properties of optimized units.

mod common;

use common::*;
use kestrel::ir::{validate, FunctionUnit, Reg};
use kestrel::optimizer::{Limits, Pipeline};
use kestrel::parser::{parse_unit, parse_units};
use kestrel::{optimize, OptimizeOptions};

fn optimized(source: &str) -> FunctionUnit {
    optimize(parse_unit(source).unwrap(), &OptimizeOptions::default()).unwrap()
}

fn names(unit: &FunctionUnit) -> Vec<&str> {
    unit.blocks.iter().map(|b| b.name.as_str()).collect()
}

fn max_register(unit: &FunctionUnit) -> Option<u32> {
    let mut max = None;
    for instr in unit.blocks.iter().flat_map(|b| &b.instructions) {
        let mut note = |r: Reg| max = max.max(Some(r.0));
        instr.for_each_read(&mut note);
        instr.for_each_write(&mut note);
    }
    max
}

// ── Block layout ───────────────────────────────────────────────────────────

#[test]
fn test_if_statement_shrinks() {
    assert_eq!(parse_unit(IF_STATEMENT).unwrap().blocks.len(), 4);
    let unit = optimized(IF_STATEMENT);
    assert!((2..=3).contains(&unit.blocks.len()), "{unit}");
    assert!(unit.register_count <= unit.arg_count + 2, "{unit}");
}

#[test]
fn test_dead_handler_and_its_block_are_removed() {
    let unit = optimized(DEAD_HANDLER);
    assert_eq!(names(&unit), vec!["entry"]);
    assert_eq!(unit.blocks[0].handler, None);
}

#[test]
fn test_live_handler_survives() {
    let unit = optimized(TRY_CATCH);
    let protected = unit.blocks.iter().find(|b| b.name == "try").unwrap();
    let handler = protected.handler.unwrap();
    assert_eq!(unit.block_name(handler), "catch");
}

#[test]
fn test_continuations_keep_their_identity() {
    let before = parse_unit(GENERATOR).unwrap();
    let resume_id = before.blocks.iter().find(|b| b.name == "resume").unwrap().id;
    let unit = optimized(GENERATOR);
    let resume = unit.block(resume_id).unwrap();
    assert_eq!(resume.name, "resume");
    assert!(unit.to_string().contains("table { 0 -> start, 1 -> resume }"));
}

#[test]
fn test_entry_stays_first() {
    for source in [IF_STATEMENT, NESTED_LOOPS, TRY_CATCH, GENERATOR, OBJECTS] {
        let unit = optimized(source);
        assert_eq!(unit.entry, unit.blocks[0].id);
    }
}

// ── Loops ──────────────────────────────────────────────────────────────────

#[test]
fn test_back_edges_of_nested_loops() {
    let mut p = Pipeline::new(parse_unit(NESTED_LOOPS).unwrap(), Limits::default()).unwrap();
    p.run_structural().unwrap();
    let cfg = p.liveness_analysis().unwrap();
    let edges = cfg.back_edges.as_ref().unwrap();
    assert_eq!(edges.values().map(|h| h.len()).sum::<usize>(), 2);
}

#[test]
fn test_loop_free_code_has_no_back_edges() {
    let mut p = Pipeline::new(parse_unit(IF_STATEMENT).unwrap(), Limits::default()).unwrap();
    p.run_structural().unwrap();
    let cfg = p.liveness_analysis().unwrap();
    assert!(cfg.back_edges.as_ref().unwrap().is_empty());
}

// ── Registers ──────────────────────────────────────────────────────────────

#[test]
fn test_registers_fit_the_new_count() {
    for source in [
        IF_STATEMENT,
        NESTED_LOOPS,
        TRY_CATCH,
        GENERATOR,
        ASYNC_GUARD,
        OBJECTS,
        NESTED_HANDLERS,
    ] {
        let before = parse_unit(source).unwrap();
        let unit = optimized(source);
        assert!(unit.register_count <= before.register_count, "{unit}");
        assert_eq!(unit.arg_count, before.arg_count);
        if let Some(max) = max_register(&unit) {
            assert!(max < unit.register_count, "{unit}");
        }
    }
}

#[test]
fn test_nested_loops_reuse_slots() {
    let unit = optimized(NESTED_LOOPS);
    assert!(unit.register_count < 6, "{unit}");
}

#[test]
fn test_reserved_registers_floor() {
    let options = OptimizeOptions {
        reserved_registers: 3,
        ..Default::default()
    };
    let unit = optimize(parse_unit(DEAD_HANDLER).unwrap(), &options).unwrap();
    assert_eq!(unit.register_count, 2);
    let unit = optimize(parse_unit(NESTED_LOOPS).unwrap(), &options).unwrap();
    assert!(unit.register_count >= 3);
}

// ── Assembly ───────────────────────────────────────────────────────────────

#[test]
fn test_optimized_output_round_trips() {
    for source in [IF_STATEMENT, NESTED_LOOPS, TRY_CATCH, GENERATOR, NESTED_HANDLERS] {
        let unit = optimized(source);
        let text = unit.to_string();
        let reparsed = parse_unit(&text).unwrap();
        validate(&reparsed).unwrap();
        assert_eq!(reparsed.to_string(), text);
    }
}

#[test]
fn test_optimizing_twice_is_stable() {
    for source in [IF_STATEMENT, NESTED_LOOPS, TRY_CATCH, GENERATOR] {
        let once = optimized(source);
        let twice = optimize(once.clone(), &OptimizeOptions::default()).unwrap();
        assert_eq!(names(&twice), names(&once));
        assert!(twice.register_count <= once.register_count, "{twice}");
    }
}

#[test]
fn test_source_with_many_functions() {
    let source = [IF_STATEMENT, GENERATOR, OBJECTS].concat();
    let out = kestrel::optimize_source(&source, &OptimizeOptions::default()).unwrap();
    let units = parse_units(&out).unwrap();
    let names: Vec<_> = units.iter().map(|u| u.name.as_str()).collect();
    assert_eq!(names, vec!["f", "counter", "props"]);
}
