//! Basic blocks.

use strum::IntoStaticStr;

use crate::mir::{BlockId, DefId, ResumePointId};

/// Structural role of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, IntoStaticStr)]
pub enum BlockKind {
    /// An ordinary block.
    Normal,
    /// A loop header whose backedge has not been attached yet.
    PendingLoopHeader,
    /// A loop header with exactly two predecessors: loop entry first, backedge second.
    LoopHeader,
    /// A block inserted to split a critical edge.
    SplitEdge,
    /// A block scheduled for removal.
    Dead,
}

/// A node of the control-flow graph.
///
/// Besides its phis and instructions a block carries the dominator tree fields computed by
/// [`build_dominator_tree`](crate::analysis::build_dominator_tree) and the per-slot
/// values used while the graph is being built.
#[derive(Debug, Clone)]
pub struct BasicBlock {
    pub(crate) id: BlockId,
    pub(crate) number: u32,
    pub(crate) kind: BlockKind,
    pub(crate) phis: Vec<DefId>,
    pub(crate) instructions: Vec<DefId>,
    pub(crate) predecessors: Vec<BlockId>,
    pub(crate) loop_depth: u32,
    pub(crate) unreachable: bool,
    pub(crate) marked: bool,
    pub(crate) loop_type_changed: bool,
    pub(crate) idom: Option<BlockId>,
    pub(crate) dominated: Vec<BlockId>,
    pub(crate) dom_index: u32,
    pub(crate) num_dominated: u32,
    pub(crate) slots: Vec<DefId>,
    pub(crate) entry_resume_point: Option<ResumePointId>,
    pub(crate) closed: bool,
}

impl BasicBlock {
    pub(crate) fn new(id: BlockId, number: u32, kind: BlockKind) -> Self {
        BasicBlock {
            id,
            number,
            kind,
            phis: Vec::new(),
            instructions: Vec::new(),
            predecessors: Vec::new(),
            loop_depth: 0,
            unreachable: false,
            marked: false,
            loop_type_changed: false,
            idom: None,
            dominated: Vec::new(),
            dom_index: 0,
            num_dominated: 0,
            slots: Vec::new(),
            entry_resume_point: None,
            closed: false,
        }
    }

    /// Arena handle of this block.
    #[must_use]
    pub const fn id(&self) -> BlockId {
        self.id
    }

    /// Dense block number; renumbered when blocks are removed.
    #[must_use]
    pub const fn number(&self) -> u32 {
        self.number
    }

    /// Structural role.
    #[must_use]
    pub const fn kind(&self) -> BlockKind {
        self.kind
    }

    /// Returns `true` for finalized loop headers.
    #[must_use]
    pub const fn is_loop_header(&self) -> bool {
        matches!(self.kind, BlockKind::LoopHeader)
    }

    /// Phi nodes, in creation order.
    #[must_use]
    pub fn phis(&self) -> &[DefId] {
        &self.phis
    }

    /// Instructions, ending with the terminator once the block is closed.
    #[must_use]
    pub fn instructions(&self) -> &[DefId] {
        &self.instructions
    }

    /// The terminator, if the block has been closed.
    #[must_use]
    pub fn terminator(&self) -> Option<DefId> {
        if self.closed {
            self.instructions.last().copied()
        } else {
            None
        }
    }

    /// Returns `true` once a terminator has been set.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        self.closed
    }

    /// Predecessors; phi operand `i` flows in from predecessor `i`.
    #[must_use]
    pub fn predecessors(&self) -> &[BlockId] {
        &self.predecessors
    }

    /// Position of `pred` in the predecessor list.
    #[must_use]
    pub fn predecessor_index(&self, pred: BlockId) -> Option<usize> {
        self.predecessors.iter().position(|&p| p == pred)
    }

    /// For a loop header, the predecessor entering the loop.
    #[must_use]
    pub fn loop_predecessor(&self) -> Option<BlockId> {
        match self.kind {
            BlockKind::LoopHeader | BlockKind::PendingLoopHeader => {
                self.predecessors.first().copied()
            }
            _ => None,
        }
    }

    /// For a loop header, the single backedge predecessor.
    #[must_use]
    pub fn backedge(&self) -> Option<BlockId> {
        if self.is_loop_header() && self.predecessors.len() == 2 {
            Some(self.predecessors[1])
        } else {
            None
        }
    }

    /// Loop nesting depth.
    #[must_use]
    pub const fn loop_depth(&self) -> u32 {
        self.loop_depth
    }

    /// Returns `true` if an analysis proved the block can never execute.
    #[must_use]
    pub const fn is_unreachable(&self) -> bool {
        self.unreachable
    }

    /// Scratch mark used by worklist algorithms.
    #[must_use]
    pub const fn is_marked(&self) -> bool {
        self.marked
    }

    /// Returns `true` if closing this loop widened a phi type.
    #[must_use]
    pub const fn loop_type_changed(&self) -> bool {
        self.loop_type_changed
    }

    /// Immediate dominator; a root block names itself. `None` until computed.
    #[must_use]
    pub const fn immediate_dominator(&self) -> Option<BlockId> {
        self.idom
    }

    /// Blocks whose immediate dominator is this block.
    #[must_use]
    pub fn immediately_dominated(&self) -> &[BlockId] {
        &self.dominated
    }

    /// Pre-order index in the dominator tree.
    #[must_use]
    pub const fn dom_index(&self) -> u32 {
        self.dom_index
    }

    /// Number of blocks this block dominates, itself included.
    #[must_use]
    pub const fn num_dominated(&self) -> u32 {
        self.num_dominated
    }

    /// Current slot values.
    #[must_use]
    pub fn slots(&self) -> &[DefId] {
        &self.slots
    }

    /// Resume point describing the slots at block entry.
    #[must_use]
    pub const fn entry_resume_point(&self) -> Option<ResumePointId> {
        self.entry_resume_point
    }

    pub(crate) fn clear_dominator_info(&mut self) {
        self.idom = None;
        self.dominated.clear();
        self.dom_index = 0;
        self.num_dominated = 0;
    }
}
