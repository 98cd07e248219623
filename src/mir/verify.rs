//! Structural self-checks.
//!
//! [`verify_graph`] walks the whole graph and reports the first broken invariant as
//! [`Error::Malformed`](crate::Error::Malformed). Passes call it in debug builds after they
//! mutate the graph, and the tests call it after every transformation.

use crate::{
    mir::{BlockId, BlockKind, Consumer, Graph, ResumePointId},
    Result,
};

/// Checks the structural invariants of `graph`.
///
/// Verified:
/// - every live block is closed, and successor and predecessor lists mirror each other,
/// - every phi has one operand per predecessor and sits in its block's phi list,
/// - every operand appears in its producer's use list and every use names a live consumer
///   reading the producer at the recorded position,
/// - finalized loop headers have exactly two predecessors,
/// - when the dominator tree is present, child lists, subtree sizes and pre-order indices
///   agree with the immediate dominators.
///
/// # Errors
///
/// Returns [`Error::Malformed`](crate::Error::Malformed) describing the first violation.
pub fn verify_graph(graph: &Graph) -> Result<()> {
    if graph.num_blocks() > 0 && graph.entry_block().is_none() {
        return Err(malformed_error!("graph has blocks but no entry block"));
    }

    for id in graph.block_ids() {
        verify_block(graph, id)?;
    }

    for (index, slot) in graph.resume_points.iter().enumerate() {
        if let Some(rp) = slot {
            if !graph.contains_block(rp.block) {
                return Err(malformed_error!("rp{} belongs to removed {}", index, rp.block));
            }
            let consumer = Consumer::ResumePoint(ResumePointId::new(index as u32));
            verify_operands(graph, consumer, rp.operands())?;
        }
    }

    if graph.block_ids().all(|b| graph.block(b).idom.is_some()) && graph.num_blocks() > 0 {
        verify_dominator_tree(graph)?;
    }
    Ok(())
}

fn verify_block(graph: &Graph, id: BlockId) -> Result<()> {
    let block = graph.block(id);
    if !block.is_closed() {
        return Err(malformed_error!("{} has no terminator", id));
    }

    for succ in graph.successors(id) {
        let Some(s) = graph.try_block(succ) else {
            return Err(malformed_error!("{} jumps to removed {}", id, succ));
        };
        if !s.predecessors.contains(&id) {
            return Err(malformed_error!("{} is missing predecessor {}", succ, id));
        }
    }
    for &pred in &block.predecessors {
        if !graph.contains_block(pred) {
            return Err(malformed_error!("{} lists removed predecessor {}", id, pred));
        }
        if !graph.successors(pred).any(|s| s == id) {
            return Err(malformed_error!("{} lists {} which does not jump to it", id, pred));
        }
    }

    if block.kind == BlockKind::LoopHeader && block.predecessors.len() != 2 {
        return Err(malformed_error!(
            "loop header {} has {} predecessors",
            id,
            block.predecessors.len()
        ));
    }

    for &phi in &block.phis {
        let def = graph
            .try_def(phi)
            .ok_or_else(|| malformed_error!("{} lists removed phi {}", id, phi))?;
        if !def.is_phi() || def.block != id {
            return Err(malformed_error!("{} in the phi list of {} is not its phi", phi, id));
        }
        if def.operands.len() != block.predecessors.len() {
            return Err(malformed_error!(
                "phi {} in {} has {} operands for {} predecessors",
                phi,
                id,
                def.operands.len(),
                block.predecessors.len()
            ));
        }
    }

    let last = block.instructions.len().saturating_sub(1);
    for (pos, &ins) in block.instructions.iter().enumerate() {
        let def = graph
            .try_def(ins)
            .ok_or_else(|| malformed_error!("{} lists removed instruction {}", id, ins))?;
        if def.block != id || def.is_phi() {
            return Err(malformed_error!("{} is misplaced in {}", ins, id));
        }
        if def.is_control() != (pos == last) {
            return Err(malformed_error!("{} has a terminator out of place at {}", id, ins));
        }
    }

    for def in graph.definitions(id) {
        verify_operands(graph, Consumer::Definition(def), graph.def(def).operands())?;
        for u in graph.def(def).uses() {
            let operands = match u.consumer {
                Consumer::Definition(c) if graph.contains_def(c) => graph.def(c).operands(),
                Consumer::ResumePoint(rp)
                    if matches!(graph.resume_points.get(rp.index()), Some(Some(_))) =>
                {
                    graph.resume_point(rp).operands()
                }
                other => {
                    return Err(malformed_error!("{} is used by removed {:?}", def, other));
                }
            };
            if operands.get(u.index as usize) != Some(&def) {
                return Err(malformed_error!(
                    "use of {} by {:?} at {} is stale",
                    def,
                    u.consumer,
                    u.index
                ));
            }
        }
    }
    Ok(())
}

fn verify_operands(graph: &Graph, consumer: Consumer, operands: &[crate::mir::DefId]) -> Result<()> {
    for (index, &operand) in operands.iter().enumerate() {
        let Some(producer) = graph.try_def(operand) else {
            return Err(malformed_error!("{:?} reads removed {}", consumer, operand));
        };
        if !producer
            .uses
            .iter()
            .any(|u| u.consumer == consumer && u.index as usize == index)
        {
            return Err(malformed_error!(
                "{} lacks the use by {:?} at {}",
                operand,
                consumer,
                index
            ));
        }
    }
    Ok(())
}

fn verify_dominator_tree(graph: &Graph) -> Result<()> {
    for id in graph.block_ids() {
        let block = graph.block(id);
        let mut expected = 1;
        for &child in &block.dominated {
            let c = graph.block(child);
            if c.idom != Some(id) {
                return Err(malformed_error!("{} is listed under {} but is not its child", child, id));
            }
            expected += c.num_dominated;
            if c.dom_index <= block.dom_index
                || c.dom_index + c.num_dominated > block.dom_index + block.num_dominated
            {
                return Err(malformed_error!("dominator subtree of {} escapes {}", child, id));
            }
        }
        if block.num_dominated != expected {
            return Err(malformed_error!(
                "{} dominates {} blocks but its children account for {}",
                id,
                block.num_dominated,
                expected
            ));
        }
        match block.idom {
            Some(parent) if parent != id => {
                if !graph.block(parent).dominated.contains(&id) {
                    return Err(malformed_error!("{} is missing from the children of {}", id, parent));
                }
            }
            _ => {}
        }
    }
    Ok(())
}
