//! Beta nodes: branch conditions turned into range constraints.
//!
//! After `if (x < 10)`, every use of `x` dominated by the true successor may assume
//! `x <= 9`. A beta node placed at the head of that successor carries the constraint, and
//! the dominated uses are redirected to it so that propagation sees the refined range.
//! Betas change no value; [`remove_beta_nodes`] undoes the redirection once the analysis is
//! done.

use crate::{
    analysis::ranges::range::{Range, INCLUDES_INFINITY_AND_NAN},
    mir::{BlockId, CompareOp, Constant, Consumer, DefId, Graph, MirOp, MirType},
    Result,
};

/// For a block with a single predecessor ending in a two-way test, the test and whether
/// `block` is its true successor.
pub(crate) fn dominating_test(graph: &Graph, block: BlockId) -> Option<(DefId, bool)> {
    let b = graph.block(block);
    let [pred] = b.predecessors() else {
        return None;
    };
    if b.immediate_dominator() != Some(*pred) {
        return None;
    }
    let term = graph.block(*pred).terminator()?;
    match *graph.def(term).op() {
        MirOp::Test { if_true, if_false } if if_true != if_false => Some((term, if_true == block)),
        _ => None,
    }
}

fn numeric_constant(graph: &Graph, def: DefId) -> Option<f64> {
    match graph.def(def).op() {
        MirOp::Constant(c @ (Constant::Int32(_) | Constant::Double(_))) => Some(c.to_number()),
        _ => None,
    }
}

/// Range of the doubles in `lower..=upper`, optionally admitting NaN.
fn double_constraint(lower: f64, upper: f64, nan: bool) -> Range {
    let hull = Range::from_f64(lower).union(&Range::from_f64(upper));
    let exponent = if nan {
        INCLUDES_INFINITY_AND_NAN
    } else {
        hull.max_exponent()
    };
    Range::new(hull.lower(), hull.upper(), true, exponent)
}

/// Constraint on `value` when `value op bound` holds. On a false branch the comparison may
/// have failed because `value` is NaN, so the constraint keeps NaN.
fn constraint(op: CompareOp, bound: f64, value_ty: MirType, false_branch: bool) -> Option<Range> {
    let int_bound = |delta: i32| {
        if value_ty != MirType::Int32 || bound.fract() != 0.0 {
            return bound;
        }
        // Represented exactly, so the cast does not truncate.
        i32::try_from(bound as i64)
            .ok()
            .and_then(|b| b.checked_add(delta))
            .map_or(bound, f64::from)
    };
    let (lo, hi) = (f64::NEG_INFINITY, f64::INFINITY);
    let range = match op {
        CompareOp::Le => double_constraint(lo, bound, false_branch),
        CompareOp::Lt => double_constraint(lo, int_bound(-1), false_branch),
        CompareOp::Ge => double_constraint(bound, hi, false_branch),
        CompareOp::Gt => double_constraint(int_bound(1), hi, false_branch),
        CompareOp::Eq => double_constraint(bound, bound, false_branch),
        CompareOp::Ne => return None,
    };
    Some(range)
}

/// Inserts a beta for `value` at the head of `block` and redirects every use of `value`
/// dominated by `block` to it.
fn insert_beta(graph: &mut Graph, block: BlockId, value: DefId, range: Range) -> Result<DefId> {
    let ty = graph.def(value).ty();
    let beta = graph.insert_at(block, 0, MirOp::Beta(range), ty, vec![value])?;
    replace_dominated_uses(graph, value, beta, block)?;
    log::trace!("{block}: {beta} = beta {value} {range}");
    Ok(beta)
}

/// Redirects the uses of `orig` that execute only after `block` to `replacement`.
///
/// A phi operand is used at the end of the matching predecessor, so the predecessor decides
/// whether the use is dominated, not the phi's own block.
pub(crate) fn replace_dominated_uses(
    graph: &mut Graph,
    orig: DefId,
    replacement: DefId,
    block: BlockId,
) -> Result<()> {
    let uses = graph.def(orig).uses().to_vec();
    for u in uses {
        if u.consumer == Consumer::Definition(replacement) {
            continue;
        }
        let use_block = match u.consumer {
            Consumer::Definition(def) if graph.def(def).is_phi() => {
                let phi_block = graph.def(def).block();
                graph.block(phi_block).predecessors()[u.index as usize]
            }
            other => graph.consumer_block(other),
        };
        if graph.dominates(block, use_block) {
            graph.set_consumer_operand(u.consumer, u.index as usize, replacement)?;
        }
    }
    Ok(())
}

/// Adds beta nodes below every conditional branch on a numeric comparison. Requires the
/// dominator tree. Returns the number of betas inserted.
pub(crate) fn add_beta_nodes(graph: &mut Graph) -> Result<usize> {
    let mut inserted = 0;
    for block in graph.postorder() {
        if graph.block(block).is_unreachable() {
            continue;
        }
        let Some((test, true_branch)) = dominating_test(graph, block) else {
            continue;
        };
        let condition = graph.def(test).operand(0);
        let MirOp::Compare(mut op) = *graph.def(condition).op() else {
            continue;
        };
        let (left, right) = (graph.def(condition).operand(0), graph.def(condition).operand(1));
        if !graph.def(left).ty().is_numeric() || !graph.def(right).ty().is_numeric() {
            continue;
        }
        if !true_branch {
            op = op.negate();
        }

        let (value, bound) = if let Some(bound) = numeric_constant(graph, left) {
            op = op.swap();
            (right, bound)
        } else if let Some(bound) = numeric_constant(graph, right) {
            (left, bound)
        } else {
            let int32 = |d: DefId| graph.def(d).ty() == MirType::Int32;
            if !int32(left) || !int32(right) {
                continue;
            }
            // `smaller < greater` leaves room above `smaller` and below `greater`.
            let (smaller, greater) = match op {
                CompareOp::Lt => (left, right),
                CompareOp::Gt => (right, left),
                _ => continue,
            };
            insert_beta(graph, block, smaller, Range::int32(i32::MIN, i32::MAX - 1))?;
            insert_beta(graph, block, greater, Range::int32(i32::MIN + 1, i32::MAX))?;
            inserted += 2;
            continue;
        };

        if bound.is_nan() {
            continue;
        }
        let Some(range) = constraint(op, bound, graph.def(value).ty(), !true_branch) else {
            continue;
        };
        insert_beta(graph, block, value, range)?;
        inserted += 1;
    }
    log::debug!("inserted {inserted} beta nodes");
    Ok(inserted)
}

/// Replaces every beta by its operand and discards it. Returns the number removed.
pub(crate) fn remove_beta_nodes(graph: &mut Graph) -> Result<usize> {
    let mut removed = 0;
    for block in graph.block_ids().collect::<Vec<_>>() {
        let betas: Vec<DefId> = graph
            .block(block)
            .instructions()
            .iter()
            .copied()
            .filter(|&d| graph.def(d).op().is_beta())
            .collect();
        for beta in betas {
            let operand = graph.def(beta).operand(0);
            graph.replace_all_uses_with(beta, operand)?;
            graph.discard(beta);
            removed += 1;
        }
    }
    log::debug!("removed {removed} beta nodes");
    Ok(removed)
}
