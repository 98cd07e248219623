//! Pipeline integration tests.
//!
//! These tests build graphs through the public builder API, run the analyses and the
//! pipeline on them, and check the results a code generator would rely on:
//! 1. Ranges inferred for merges and loop induction variables
//! 2. Blocks behind constant tests removed and the dominator tree rebuilt
//! 3. Bounds checks hoisted out of counted loops, up to lengths of INT32_MAX
//! 4. Tests decided by ranges folded, while contradicting branch conditions are kept
//! 5. Configuration flags and cancellation honoured by the pipeline

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use jitmir::{
    analysis::{build_dominator_tree, RangeAnalysis},
    compiler::ValueNumberer,
    mir::{verify_graph, BlockId, DefId, MirOp},
    CompareOp, Error, Graph, MirType, OptimizationConfig, Pipeline, Result,
};

/// Routes the passes' `log` output to the test harness. Set `RUST_LOG=jitmir=trace` to see it.
fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// `if (x < 0) v = 1; else v = 2; return v;`
///
/// Returns the graph and the phi merging `v`.
fn diamond() -> Result<(Graph, DefId)> {
    let mut graph = Graph::new();
    let entry = graph.new_entry_block(1)?;
    let x = graph.parameter(entry, 0, MirType::Int32)?;
    let zero = graph.constant_i32(entry, 0)?;
    let cond = graph.compare(entry, CompareOp::Lt, x, zero)?;
    let then_block = graph.new_block(Some(entry))?;
    let else_block = graph.new_block(Some(entry))?;
    graph.test(entry, cond, then_block, else_block)?;

    let one = graph.constant_i32(then_block, 1)?;
    graph.set_slot(then_block, 0, one);
    let two = graph.constant_i32(else_block, 2)?;
    graph.set_slot(else_block, 0, two);

    let join = graph.new_block(Some(then_block))?;
    graph.goto(then_block, join)?;
    graph.goto(else_block, join)?;
    graph.add_predecessor(join, else_block)?;
    let phi = graph.slot(join, 0);
    graph.ret(join, phi)?;
    Ok((graph, phi))
}

/// `for (i = 0; i < limit; i++) {} return i;`
///
/// Returns the graph, the loop header and the induction variable.
fn counted_loop(limit: i32) -> Result<(Graph, BlockId, DefId)> {
    let mut graph = Graph::new();
    let entry = graph.new_entry_block(1)?;
    let zero = graph.constant_i32(entry, 0)?;
    let bound = graph.constant_i32(entry, limit)?;
    let one = graph.constant_i32(entry, 1)?;
    graph.set_slot(entry, 0, zero);

    let header = graph.new_pending_loop_header(entry)?;
    graph.goto(entry, header)?;
    let i = graph.slot(header, 0);
    let cond = graph.compare(header, CompareOp::Lt, i, bound)?;
    let body = graph.new_block(Some(header))?;
    let exit = graph.new_block(Some(header))?;
    graph.test(header, cond, body, exit)?;

    let next = graph.binary(body, MirOp::Add, i, one, MirType::Int32)?;
    graph.set_slot(body, 0, next);
    graph.goto(body, header)?;
    graph.set_backedge(header, body)?;
    graph.ret(exit, i)?;
    Ok((graph, header, i))
}

/// `if (false) { A } else { B }` with both arms jumping to a returning block.
///
/// Returns the graph and the blocks `[entry, A, B, end]`.
fn constant_branch() -> Result<(Graph, [BlockId; 4])> {
    let mut graph = Graph::new();
    let entry = graph.new_entry_block(0)?;
    let never = graph.constant_bool(entry, false)?;
    let a = graph.new_block(Some(entry))?;
    let b = graph.new_block(Some(entry))?;
    graph.test(entry, never, a, b)?;
    let end = graph.new_block(Some(a))?;
    graph.goto(a, end)?;
    graph.goto(b, end)?;
    graph.add_predecessor(end, b)?;
    let zero = graph.constant_i32(end, 0)?;
    graph.ret(end, zero)?;
    Ok((graph, [entry, a, b, end]))
}

/// `for (i = 0; i < a.length; i++) sum += a[i]; return sum;`
///
/// Returns the graph, the loop header and the loop body.
fn array_sum_loop() -> Result<(Graph, BlockId, BlockId)> {
    let mut graph = Graph::new();
    let entry = graph.new_entry_block(2)?;
    let array = graph.parameter(entry, 0, MirType::Object)?;
    let length = graph.array_length(entry, array)?;
    let zero = graph.constant_i32(entry, 0)?;
    let one = graph.constant_i32(entry, 1)?;
    graph.set_slot(entry, 0, zero);
    graph.set_slot(entry, 1, zero);

    let header = graph.new_pending_loop_header(entry)?;
    graph.goto(entry, header)?;
    let i = graph.slot(header, 0);
    let sum = graph.slot(header, 1);
    let cond = graph.compare(header, CompareOp::Lt, i, length)?;
    let body = graph.new_block(Some(header))?;
    let exit = graph.new_block(Some(header))?;
    graph.test(header, cond, body, exit)?;

    let checked = graph.bounds_check(body, i, length)?;
    let element = graph.load_element(body, array, checked, MirType::Int32)?;
    let next_sum = graph.binary(body, MirOp::Add, sum, element, MirType::Int32)?;
    let next_i = graph.binary(body, MirOp::Add, i, one, MirType::Int32)?;
    graph.set_slot(body, 0, next_i);
    graph.set_slot(body, 1, next_sum);
    graph.goto(body, header)?;
    graph.set_backedge(header, body)?;
    graph.ret(exit, sum)?;
    Ok((graph, header, body))
}

fn is_bounds_check(graph: &Graph, def: DefId) -> bool {
    matches!(
        graph.def(def).op(),
        MirOp::BoundsCheck | MirOp::BoundsCheckLower { .. }
    )
}

#[test]
fn test_diamond_merge_range() -> Result<()> {
    init_logging();
    let (mut graph, phi) = diamond()?;
    build_dominator_tree(&mut graph)?;
    RangeAnalysis::new(&mut graph, OptimizationConfig::default()).run()?;

    let range = graph.def(phi).range().copied().expect("phi has a range");
    assert_eq!(range.lower(), Some(1));
    assert_eq!(range.upper(), Some(2));
    assert!(range.is_int32());
    assert!(!range.has_fraction());
    verify_graph(&graph)?;
    Ok(())
}

#[test]
fn test_bounded_loop() -> Result<()> {
    init_logging();
    let (mut graph, header, i) = counted_loop(10)?;
    build_dominator_tree(&mut graph)?;
    let mut analysis = RangeAnalysis::new(&mut graph, OptimizationConfig::default());
    let stats = analysis.run()?;
    assert_eq!(stats.loops_bounded, 1);

    let [bound] = analysis.loop_iteration_bounds() else {
        panic!("expected one loop bound");
    };
    assert_eq!(bound.header, header);
    assert_eq!(bound.bound.as_constant(), Some(10));

    let range = graph.def(i).range().copied().expect("phi has a range");
    assert!(range.lower().is_some_and(|lower| lower >= 0));
    assert!(range.upper().is_some_and(|upper| upper <= 10));
    verify_graph(&graph)?;
    Ok(())
}

#[test]
fn test_constant_branch_removed() -> Result<()> {
    init_logging();
    let (mut graph, [entry, a, b, end]) = constant_branch()?;
    let report = Pipeline::new(OptimizationConfig::default()).run(&mut graph)?;

    assert_eq!(report.blocks_removed(), 1);
    assert!(report.changed);
    assert!(!graph.contains_block(a));
    let terminator = graph.block(entry).terminator().expect("entry is closed");
    assert_eq!(*graph.def(terminator).op(), MirOp::Goto(b));
    assert_eq!(graph.block(end).predecessors(), &[b]);

    // `end` is now dominated by `B`, and preorder numbering places it inside B's subtree.
    assert!(graph.has_dominator_tree());
    assert_eq!(graph.block(end).immediate_dominator(), Some(b));
    assert!(graph.dominates(b, end));
    let b_index = graph.block(b).dom_index();
    let end_index = graph.block(end).dom_index();
    assert!(b_index < end_index);
    assert!(end_index <= b_index + graph.block(b).num_dominated());
    verify_graph(&graph)?;
    Ok(())
}

#[test]
fn test_bounds_check_hoisted_out_of_loop() -> Result<()> {
    init_logging();
    let (mut graph, header, body) = array_sum_loop()?;
    let report = Pipeline::new(OptimizationConfig::default()).run(&mut graph)?;
    assert_eq!(report.range_analysis.bounds_checks_hoisted, 1);

    assert!(!graph
        .block(body)
        .instructions()
        .iter()
        .any(|&def| is_bounds_check(&graph, def)));
    let preheader = graph
        .block(header)
        .loop_predecessor()
        .expect("loop has a preheader");
    assert!(graph
        .block(preheader)
        .instructions()
        .iter()
        .any(|&def| is_bounds_check(&graph, def)));
    verify_graph(&graph)?;
    Ok(())
}

/// `n = p & INT32_MAX; for (i = 0; i < n; i++) check(i, n); return i;`
///
/// Returns the graph and the loop header.
fn masked_length_loop() -> Result<(Graph, BlockId)> {
    let mut graph = Graph::new();
    let entry = graph.new_entry_block(1)?;
    let p = graph.parameter(entry, 0, MirType::Int32)?;
    let mask = graph.constant_i32(entry, i32::MAX)?;
    let n = graph.binary(entry, MirOp::BitAnd, p, mask, MirType::Int32)?;
    let zero = graph.constant_i32(entry, 0)?;
    let one = graph.constant_i32(entry, 1)?;
    graph.set_slot(entry, 0, zero);

    let header = graph.new_pending_loop_header(entry)?;
    graph.goto(entry, header)?;
    let i = graph.slot(header, 0);
    let cond = graph.compare(header, CompareOp::Lt, i, n)?;
    let body = graph.new_block(Some(header))?;
    let exit = graph.new_block(Some(header))?;
    graph.test(header, cond, body, exit)?;

    graph.bounds_check(body, i, n)?;
    let next = graph.binary(body, MirOp::Add, i, one, MirType::Int32)?;
    graph.set_slot(body, 0, next);
    graph.goto(body, header)?;
    graph.set_backedge(header, body)?;
    let result = graph.slot(exit, 0);
    graph.ret(exit, result)?;
    Ok((graph, header))
}

#[test]
fn test_hoisted_check_covers_int32_max_length() -> Result<()> {
    init_logging();
    let (mut graph, header) = masked_length_loop()?;
    let report = Pipeline::new(OptimizationConfig::default()).run(&mut graph)?;
    assert_eq!(report.range_analysis.bounds_checks_hoisted, 1);

    let preheader = graph
        .block(header)
        .loop_predecessor()
        .expect("loop has a preheader");
    let upper = graph
        .block(preheader)
        .instructions()
        .iter()
        .copied()
        .find(|&def| matches!(graph.def(def).op(), MirOp::BoundsCheck))
        .expect("upper check hoisted");
    // The highest index is n - 1, computed without overflow for n = INT32_MAX.
    let high = graph.def(upper).operand(0);
    let range = graph.def(high).range().expect("int32 value has a range");
    assert_eq!(range.upper(), Some(i32::MAX - 1));
    verify_graph(&graph)?;
    Ok(())
}

/// `x = p & 7; if (x < 100) return x; return -1;`
///
/// Returns the graph and the block returning -1.
fn masked_branch() -> Result<(Graph, BlockId)> {
    let mut graph = Graph::new();
    let entry = graph.new_entry_block(0)?;
    let p = graph.parameter(entry, 0, MirType::Int32)?;
    let seven = graph.constant_i32(entry, 7)?;
    let x = graph.binary(entry, MirOp::BitAnd, p, seven, MirType::Int32)?;
    let hundred = graph.constant_i32(entry, 100)?;
    let cond = graph.compare(entry, CompareOp::Lt, x, hundred)?;
    let taken = graph.new_block(Some(entry))?;
    let never = graph.new_block(Some(entry))?;
    graph.test(entry, cond, taken, never)?;
    graph.ret(taken, x)?;
    let minus_one = graph.constant_i32(never, -1)?;
    graph.ret(never, minus_one)?;
    Ok((graph, never))
}

#[test]
fn test_range_decided_branch_removed() -> Result<()> {
    init_logging();
    let (mut graph, never) = masked_branch()?;
    let report = Pipeline::new(OptimizationConfig::default()).run(&mut graph)?;
    assert_eq!(report.range_analysis.blocks_unreachable, 1);
    assert_eq!(report.range_analysis.tests_folded, 1);
    assert_eq!(report.uce.len(), 2);
    assert_eq!(report.blocks_removed(), 1);
    assert!(!graph.contains_block(never));
    verify_graph(&graph)?;
    Ok(())
}

/// `if (x < 10) { if (x > 20) return 1; } return 0;`
///
/// Returns the graph and the block returning 1.
fn nested_contradiction() -> Result<(Graph, BlockId)> {
    let mut graph = Graph::new();
    let entry = graph.new_entry_block(0)?;
    let x = graph.parameter(entry, 0, MirType::Int32)?;
    let ten = graph.constant_i32(entry, 10)?;
    let twenty = graph.constant_i32(entry, 20)?;
    let outer = graph.compare(entry, CompareOp::Lt, x, ten)?;
    let inner_block = graph.new_block(Some(entry))?;
    let join = graph.new_block(Some(entry))?;
    graph.test(entry, outer, inner_block, join)?;

    let inner = graph.compare(inner_block, CompareOp::Gt, x, twenty)?;
    let never = graph.new_block(Some(inner_block))?;
    let fallthrough = graph.new_block(Some(inner_block))?;
    graph.test(inner_block, inner, never, fallthrough)?;
    let one = graph.constant_i32(never, 1)?;
    graph.ret(never, one)?;
    graph.goto(fallthrough, join)?;
    graph.add_predecessor(join, fallthrough)?;
    let zero = graph.constant_i32(join, 0)?;
    graph.ret(join, zero)?;
    Ok((graph, never))
}

#[test]
fn test_contradicting_branches_are_kept() -> Result<()> {
    init_logging();
    let (mut graph, never) = nested_contradiction()?;
    let report = Pipeline::new(OptimizationConfig::default()).run(&mut graph)?;
    assert_eq!(report.range_analysis.blocks_unreachable, 0);
    assert_eq!(report.range_analysis.tests_folded, 0);
    assert_eq!(report.uce.len(), 1);
    assert!(graph.contains_block(never));
    assert!(!graph.block(never).is_unreachable());
    verify_graph(&graph)?;
    Ok(())
}

#[test]
fn test_range_assertions_inserted_when_configured() -> Result<()> {
    init_logging();
    let (mut graph, _) = diamond()?;
    let report = Pipeline::new(OptimizationConfig::default()).run(&mut graph)?;
    assert_eq!(report.range_analysis.assertions_inserted, 0);

    let (mut graph, phi) = diamond()?;
    let config = OptimizationConfig::default().with_range_assertions(true);
    let report = Pipeline::new(config).run(&mut graph)?;
    assert!(report.range_analysis.assertions_inserted > 0);

    let asserted = graph.def(phi).uses().iter().any(|u| match u.consumer {
        jitmir::mir::Consumer::Definition(def) => {
            matches!(graph.def(def).op(), MirOp::AssertRange(_))
        }
        jitmir::mir::Consumer::ResumePoint(_) => false,
    });
    assert!(asserted);
    verify_graph(&graph)?;
    Ok(())
}

#[test]
fn test_asmjs_mode_truncates_captured_values() -> Result<()> {
    init_logging();
    // `sum` is captured by the entry resume point of `next`.
    let build = || -> Result<(Graph, DefId)> {
        let mut graph = Graph::new();
        let entry = graph.new_entry_block(1)?;
        let a = graph.parameter(entry, 0, MirType::Int32)?;
        let x = graph.unary(entry, MirOp::ToDouble, a, MirType::Double)?;
        let sum = graph.binary(entry, MirOp::Add, x, x, MirType::Double)?;
        graph.set_slot(entry, 0, sum);
        let next = graph.new_block(Some(entry))?;
        graph.goto(entry, next)?;
        let zero = graph.constant_i32(next, 0)?;
        let masked = graph.binary(next, MirOp::BitOr, sum, zero, MirType::Int32)?;
        graph.ret(next, masked)?;
        Ok((graph, sum))
    };

    let (mut graph, sum) = build()?;
    let report = Pipeline::new(OptimizationConfig::default()).run(&mut graph)?;
    assert!(!graph.def(sum).is_truncated());
    assert_eq!(graph.def(sum).ty(), MirType::Int32);
    assert_eq!(report.range_analysis.truncated, 0);
    assert!(report.range_analysis.retyped_int32 > 0);

    let (mut graph, sum) = build()?;
    let config = OptimizationConfig::default().with_asmjs_like_mode(true);
    let report = Pipeline::new(config).run(&mut graph)?;
    assert!(graph.def(sum).is_truncated());
    assert!(report.range_analysis.truncated > 0);
    assert_eq!(report.range_analysis.retyped_int32, 0);
    verify_graph(&graph)?;
    Ok(())
}

/// Requests cancellation when it runs, which is right after the first elimination.
struct CancelOnRun(Arc<AtomicBool>);

impl ValueNumberer for CancelOnRun {
    fn run(&mut self, _graph: &mut Graph) -> Result<bool> {
        self.0.store(true, Ordering::Relaxed);
        Ok(false)
    }
}

#[test]
fn test_cancellation_between_passes() -> Result<()> {
    init_logging();
    let (mut graph, [_, a, _, _]) = constant_branch()?;
    let flag = Arc::new(AtomicBool::new(false));
    let result = Pipeline::new(OptimizationConfig::default())
        .with_cancellation(Arc::clone(&flag))
        .with_value_numberer(Box::new(CancelOnRun(Arc::clone(&flag))))
        .run(&mut graph);

    assert!(matches!(result, Err(Error::Cancelled)));
    // The elimination completed before the flag was observed.
    assert!(!graph.contains_block(a));
    assert!(graph.has_dominator_tree());
    verify_graph(&graph)?;
    Ok(())
}

#[test]
fn test_pipeline_on_empty_graph() -> Result<()> {
    let mut graph = Graph::new();
    let report = Pipeline::new(OptimizationConfig::default()).run(&mut graph)?;
    assert!(!report.changed);
    assert_eq!(report.blocks_removed(), 0);
    Ok(())
}
