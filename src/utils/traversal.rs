//! Depth-first orders over graphs addressed by dense slot indices.
//!
//! The traversals here are iterative and accept several roots, which is what a control-flow
//! graph with a secondary OSR entry needs: nodes reachable from the first root are numbered
//! first, then whatever the next root adds, and so on.

use crate::utils::BitSet;

/// A graph whose nodes are addressed by slot indices `0..slot_count()`.
pub trait Successors {
    /// Upper bound (exclusive) on the slot indices of this graph.
    fn slot_count(&self) -> usize;

    /// Appends the successors of `slot` to `out`, in edge order.
    fn successors_of(&self, slot: usize, out: &mut Vec<usize>);
}

#[derive(Clone, Copy)]
enum Visit {
    Enter(usize),
    Exit(usize),
}

/// Computes a depth-first preorder and postorder starting from each root in turn.
///
/// Roots already visited from an earlier root are skipped. Successors are explored in
/// edge order.
pub fn depth_first_orders<G, I>(graph: &G, roots: I) -> (Vec<usize>, Vec<usize>)
where
    G: Successors + ?Sized,
    I: IntoIterator<Item = usize>,
{
    let count = graph.slot_count();
    let mut visited = BitSet::new(count);
    let mut pre = Vec::with_capacity(count);
    let mut post = Vec::with_capacity(count);
    let mut stack = Vec::new();
    let mut succs = Vec::new();

    for root in roots {
        if root >= count || visited.contains(root) {
            continue;
        }
        stack.push(Visit::Enter(root));
        while let Some(visit) = stack.pop() {
            match visit {
                Visit::Enter(node) => {
                    if !visited.insert(node) {
                        continue;
                    }
                    pre.push(node);
                    stack.push(Visit::Exit(node));
                    succs.clear();
                    graph.successors_of(node, &mut succs);
                    for &succ in succs.iter().rev() {
                        if succ < count && !visited.contains(succ) {
                            stack.push(Visit::Enter(succ));
                        }
                    }
                }
                Visit::Exit(node) => post.push(node),
            }
        }
    }

    (pre, post)
}

/// Postorder from the given roots.
pub fn postorder<G, I>(graph: &G, roots: I) -> Vec<usize>
where
    G: Successors + ?Sized,
    I: IntoIterator<Item = usize>,
{
    depth_first_orders(graph, roots).1
}

/// Reverse postorder from the given roots; forward dataflow visits nodes in this order.
pub fn reverse_postorder<G, I>(graph: &G, roots: I) -> Vec<usize>
where
    G: Successors + ?Sized,
    I: IntoIterator<Item = usize>,
{
    let mut order = postorder(graph, roots);
    order.reverse();
    order
}
