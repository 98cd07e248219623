//! Dominator tree construction with the iterative Cooper-Harvey-Kennedy algorithm.
//!
//! The tree is stored directly on the blocks: every block records its immediate
//! dominator, the blocks it immediately dominates, its pre-order index in the tree and the
//! size of its subtree. Those last two make dominance queries constant time:
//!
//! ```text
//! A dominates B  <=>  dom_index(A) <= dom_index(B) < dom_index(A) + num_dominated(A)
//! ```
//!
//! # Roots
//!
//! A block whose immediate dominator is itself is a root of the dominator forest. The
//! entry block and the OSR block are roots, and so is any block that can be reached from
//! two roots along disjoint paths, as well as every block no root reaches. Edges leaving
//! such dead blocks are ignored when computing the dominators of live blocks.
//!
//! # Algorithm
//!
//! Blocks are visited in reverse postorder until no immediate dominator changes. The
//! candidate dominator of a block is the intersection of the dominator chains of its
//! already processed predecessors, walking up whichever chain has the larger
//! reverse-postorder rank. When a walk reaches a root without meeting the other chain the
//! block is reachable from two roots and becomes a root itself.

use crate::{
    mir::{BlockId, Graph},
    utils::{traversal, BitSet},
    Result,
};

/// Intersects the dominator chains of `a` and `b`.
///
/// Returns `None` when the chains end at different roots.
fn intersect(
    idom: &[Option<BlockId>],
    rank: &[usize],
    mut a: BlockId,
    mut b: BlockId,
) -> Option<BlockId> {
    while a != b {
        while rank[a.index()] > rank[b.index()] {
            let up = idom[a.index()]?;
            if up == a {
                return None;
            }
            a = up;
        }
        while rank[b.index()] > rank[a.index()] {
            let up = idom[b.index()]?;
            if up == b {
                return None;
            }
            b = up;
        }
    }
    Some(a)
}

/// Runs the fixpoint over `rpo`, updating `idom` in place. Returns the iteration count.
fn iterate(
    graph: &Graph,
    rpo: &[BlockId],
    rank: &[usize],
    live: &BitSet,
    idom: &mut [Option<BlockId>],
) -> usize {
    let mut iterations = 0;
    let mut changed = true;
    while changed {
        changed = false;
        iterations += 1;
        for &block in rpo {
            if idom[block.index()] == Some(block) {
                continue;
            }
            let preds = graph.block(block).predecessors();
            if preds.is_empty() {
                idom[block.index()] = Some(block);
                changed = true;
                continue;
            }

            let mut candidate: Option<BlockId> = None;
            let mut disjoint = false;
            for &pred in preds {
                if !live.contains(pred.index()) || idom[pred.index()].is_none() {
                    continue;
                }
                candidate = match candidate {
                    None => Some(pred),
                    Some(current) => match intersect(idom, rank, pred, current) {
                        Some(common) => Some(common),
                        None => {
                            disjoint = true;
                            break;
                        }
                    },
                };
            }

            let new_idom = if disjoint { Some(block) } else { candidate };
            if new_idom.is_some() && idom[block.index()] != new_idom {
                idom[block.index()] = new_idom;
                changed = true;
            }
        }
    }
    iterations
}

/// Computes the dominator tree of `graph` and stores it on the blocks.
///
/// Any previous tree is discarded first, so this is also how the tree is rebuilt after the
/// graph changed shape.
///
/// # Errors
///
/// Returns [`Error::OutOfMemory`](crate::Error::OutOfMemory) if the child lists cannot
/// grow.
///
/// # Examples
///
/// ```rust
/// use jitmir::{analysis::build_dominator_tree, Graph};
///
/// // entry -> a -> exit, entry -> exit
/// let mut graph = Graph::new();
/// let entry = graph.new_entry_block(0)?;
/// let cond = graph.constant_bool(entry, true)?;
/// let a = graph.new_block(Some(entry))?;
/// let exit = graph.new_block(Some(entry))?;
/// graph.test(entry, cond, a, exit)?;
/// graph.goto(a, exit)?;
/// graph.add_predecessor(exit, a)?;
/// let value = graph.constant_i32(exit, 0)?;
/// graph.ret(exit, value)?;
///
/// build_dominator_tree(&mut graph)?;
/// assert!(graph.dominates(entry, exit));
/// assert!(!graph.dominates(a, exit));
/// assert_eq!(graph.block(exit).immediate_dominator(), Some(entry));
/// # Ok::<(), jitmir::Error>(())
/// ```
pub fn build_dominator_tree(graph: &mut Graph) -> Result<()> {
    clear_dominator_tree(graph);

    let capacity = graph.block_capacity();
    let rpo = graph.reverse_postorder();
    let mut rank = vec![usize::MAX; capacity];
    for (position, block) in rpo.iter().enumerate() {
        rank[block.index()] = position;
    }

    let (reached, _) =
        traversal::depth_first_orders(&*graph, graph.roots().map(BlockId::index));
    let mut live = BitSet::new(capacity);
    for slot in reached {
        live.insert(slot);
    }

    let mut idom: Vec<Option<BlockId>> = vec![None; capacity];
    for root in graph.roots() {
        idom[root.index()] = Some(root);
    }
    for &block in &rpo {
        if !live.contains(block.index()) {
            idom[block.index()] = Some(block);
        }
    }

    let iterations = iterate(graph, &rpo, &rank, &live, &mut idom);

    for &block in &rpo {
        graph.block_mut(block).idom = idom[block.index()];
    }

    // Children come before their immediate dominator in postorder.
    for block in rpo.iter().rev().copied() {
        let b = graph.block_mut(block);
        b.num_dominated += 1;
        let count = b.num_dominated;
        let Some(parent) = b.idom else { continue };
        if parent == block {
            continue;
        }
        let p = graph.block_mut(parent);
        p.num_dominated += count;
        p.dominated.try_reserve(1)?;
        p.dominated.push(block);
    }

    let mut stack: Vec<BlockId> = Vec::new();
    let mut index = 0u32;
    let mut roots = 0usize;
    for &block in &rpo {
        if idom[block.index()] != Some(block) {
            continue;
        }
        roots += 1;
        stack.push(block);
        while let Some(next) = stack.pop() {
            let b = graph.block_mut(next);
            b.dom_index = index;
            index += 1;
            stack.try_reserve(b.dominated.len())?;
            stack.extend(b.dominated.iter().rev().copied());
        }
    }

    log::debug!(
        "dominator tree: {} blocks, {} roots, {} iterations",
        rpo.len(),
        roots,
        iterations
    );
    Ok(())
}

/// Removes the dominator tree from every block.
pub fn clear_dominator_tree(graph: &mut Graph) {
    for block in graph.blocks.iter_mut().flatten() {
        block.clear_dominator_info();
    }
}

impl Graph {
    /// Returns `true` if every path from a root to `b` passes through `a`.
    ///
    /// A block dominates itself. Requires a current dominator tree.
    #[must_use]
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        let a = self.block(a);
        let b = self.block(b);
        debug_assert!(
            a.idom.is_some() && b.idom.is_some(),
            "dominance queried without a dominator tree"
        );
        b.dom_index >= a.dom_index && b.dom_index < a.dom_index + a.num_dominated
    }

    /// Returns `true` if `a` dominates `b` and the two differ.
    #[must_use]
    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    /// Returns `true` if every live block carries dominator information.
    #[must_use]
    pub fn has_dominator_tree(&self) -> bool {
        self.block_ids().all(|b| self.block(b).idom.is_some())
    }
}
