//! The graph store: arenas of blocks, definitions and resume points.
//!
//! A [`Graph`] owns every node of one function body. Blocks, definitions and resume points
//! live in three arenas indexed by [`BlockId`], [`DefId`] and [`ResumePointId`]; all cross
//! references are handles into those arenas. Removing a node vacates its slot, so a stale
//! handle is detected instead of silently aliasing a new node.
//!
//! The store exposes iteration in insertion order, reverse insertion order and depth-first
//! preorder/postorder from the graph's roots (the entry block, then the OSR block, then any
//! block neither reaches).

use crate::{
    mir::{
        BasicBlock, BlockId, BlockKind, Consumer, DefId, Definition, MirOp, MirType,
        ResumePoint, ResumePointId, Use,
    },
    utils::traversal::{self, Successors},
    Result,
};

/// Control-flow graph of one function in SSA form.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    pub(crate) blocks: Vec<Option<BasicBlock>>,
    pub(crate) defs: Vec<Option<Definition>>,
    pub(crate) resume_points: Vec<Option<ResumePoint>>,
    pub(crate) order: Vec<BlockId>,
    pub(crate) entry: Option<BlockId>,
    pub(crate) osr: Option<BlockId>,
    pub(crate) next_def_number: u32,
}

impl Graph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Graph::default()
    }

    /// The primary entry block.
    #[must_use]
    pub const fn entry_block(&self) -> Option<BlockId> {
        self.entry
    }

    /// The secondary entry used for on-stack replacement, if any.
    #[must_use]
    pub const fn osr_block(&self) -> Option<BlockId> {
        self.osr
    }

    /// Root blocks: the entry block followed by the OSR block.
    pub fn roots(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.entry.into_iter().chain(self.osr)
    }

    /// Number of live blocks.
    #[must_use]
    pub fn num_blocks(&self) -> usize {
        self.order.len()
    }

    /// Number of live definitions.
    #[must_use]
    pub fn num_definitions(&self) -> usize {
        self.defs.iter().filter(|d| d.is_some()).count()
    }

    /// Size of the block arena; every live [`BlockId::index`] is below this.
    #[must_use]
    pub fn block_capacity(&self) -> usize {
        self.blocks.len()
    }

    /// Size of the definition arena; every live [`DefId::index`] is below this.
    #[must_use]
    pub fn def_capacity(&self) -> usize {
        self.defs.len()
    }

    /// Live blocks in insertion order.
    pub fn block_ids(&self) -> impl DoubleEndedIterator<Item = BlockId> + '_ {
        self.order.iter().copied()
    }

    /// Live blocks in reverse insertion order.
    pub fn block_ids_rev(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.order.iter().rev().copied()
    }

    /// Returns `true` if `id` names a live block.
    #[must_use]
    pub fn contains_block(&self, id: BlockId) -> bool {
        matches!(self.blocks.get(id.index()), Some(Some(_)))
    }

    /// Returns `true` if `id` names a live definition.
    #[must_use]
    pub fn contains_def(&self, id: DefId) -> bool {
        matches!(self.defs.get(id.index()), Some(Some(_)))
    }

    /// The block named by `id`.
    ///
    /// # Panics
    ///
    /// Panics if the block was removed; holding a handle past removal is a caller bug.
    #[must_use]
    pub fn block(&self, id: BlockId) -> &BasicBlock {
        match self.blocks.get(id.index()) {
            Some(Some(block)) => block,
            _ => panic!("{id} is not a live block"),
        }
    }

    /// The block named by `id`, or `None` if it was removed.
    #[must_use]
    pub fn try_block(&self, id: BlockId) -> Option<&BasicBlock> {
        self.blocks.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn block_mut(&mut self, id: BlockId) -> &mut BasicBlock {
        match self.blocks.get_mut(id.index()) {
            Some(Some(block)) => block,
            _ => panic!("{id} is not a live block"),
        }
    }

    /// The definition named by `id`.
    ///
    /// # Panics
    ///
    /// Panics if the definition was discarded.
    #[must_use]
    pub fn def(&self, id: DefId) -> &Definition {
        match self.defs.get(id.index()) {
            Some(Some(def)) => def,
            _ => panic!("{id} is not a live definition"),
        }
    }

    /// The definition named by `id`, or `None` if it was discarded.
    #[must_use]
    pub fn try_def(&self, id: DefId) -> Option<&Definition> {
        self.defs.get(id.index()).and_then(Option::as_ref)
    }

    pub(crate) fn def_mut(&mut self, id: DefId) -> &mut Definition {
        match self.defs.get_mut(id.index()) {
            Some(Some(def)) => def,
            _ => panic!("{id} is not a live definition"),
        }
    }

    /// The resume point named by `id`.
    ///
    /// # Panics
    ///
    /// Panics if the resume point was removed with its block.
    #[must_use]
    pub fn resume_point(&self, id: ResumePointId) -> &ResumePoint {
        match self.resume_points.get(id.index()) {
            Some(Some(rp)) => rp,
            _ => panic!("{id} is not a live resume point"),
        }
    }

    /// Block holding the consumer of a use.
    #[must_use]
    pub fn consumer_block(&self, consumer: Consumer) -> BlockId {
        match consumer {
            Consumer::Definition(def) => self.def(def).block,
            Consumer::ResumePoint(rp) => self.resume_point(rp).block,
        }
    }

    /// Control-flow successors of `block`; empty until the block is closed.
    pub fn successors(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        self.block(block)
            .terminator()
            .into_iter()
            .flat_map(move |term| self.def(term).op.successors())
    }

    /// Phis followed by instructions of `block`.
    pub fn definitions(&self, block: BlockId) -> impl Iterator<Item = DefId> + '_ {
        let b = self.block(block);
        b.phis.iter().chain(b.instructions.iter()).copied()
    }

    fn traversal_roots(&self) -> Vec<usize> {
        self.roots()
            .chain(self.order.iter().copied())
            .map(BlockId::index)
            .collect()
    }

    fn to_block_ids(slots: Vec<usize>) -> Vec<BlockId> {
        slots
            .into_iter()
            .map(|slot| BlockId::new(slot as u32))
            .collect()
    }

    /// Depth-first preorder over every live block, starting from the roots.
    #[must_use]
    pub fn preorder(&self) -> Vec<BlockId> {
        let (pre, _) = traversal::depth_first_orders(self, self.traversal_roots());
        Self::to_block_ids(pre)
    }

    /// Depth-first postorder over every live block, starting from the roots.
    #[must_use]
    pub fn postorder(&self) -> Vec<BlockId> {
        Self::to_block_ids(traversal::postorder(self, self.traversal_roots()))
    }

    /// Reverse postorder over every live block; most predecessors precede their successors.
    #[must_use]
    pub fn reverse_postorder(&self) -> Vec<BlockId> {
        Self::to_block_ids(traversal::reverse_postorder(self, self.traversal_roots()))
    }

    /// Reassigns dense block numbers following insertion order.
    pub fn renumber_blocks(&mut self) {
        for (number, id) in self.order.clone().into_iter().enumerate() {
            self.block_mut(id).number = number as u32;
        }
    }

    /// Clears the scratch mark of every block.
    pub fn unmark_blocks(&mut self) {
        for block in self.blocks.iter_mut().flatten() {
            block.marked = false;
        }
    }

    pub(crate) fn set_marked(&mut self, block: BlockId, marked: bool) {
        self.block_mut(block).marked = marked;
    }

    /// Flags `block` as never executing. Unreachable code elimination removes it once its
    /// incoming branch has been folded.
    pub fn set_unreachable(&mut self, block: BlockId) {
        self.block_mut(block).unreachable = true;
    }

    pub(crate) fn alloc_block(&mut self, kind: BlockKind) -> Result<BlockId> {
        self.blocks.try_reserve(1)?;
        self.order.try_reserve(1)?;
        let id = BlockId::new(self.blocks.len() as u32);
        let number = self.order.len() as u32;
        self.blocks.push(Some(BasicBlock::new(id, number, kind)));
        self.order.push(id);
        Ok(id)
    }

    pub(crate) fn alloc_def(
        &mut self,
        block: BlockId,
        op: MirOp,
        ty: MirType,
        operands: Vec<DefId>,
    ) -> Result<DefId> {
        self.defs.try_reserve(1)?;
        let id = DefId::new(self.defs.len() as u32);
        let number = self.next_def_number;
        self.next_def_number += 1;
        for (index, &operand) in operands.iter().enumerate() {
            self.add_use(operand, Consumer::Definition(id), index as u32)?;
        }
        self.defs
            .push(Some(Definition::new(id, number, block, op, ty, operands)));
        Ok(id)
    }

    pub(crate) fn alloc_resume_point(
        &mut self,
        block: BlockId,
        operands: Vec<DefId>,
    ) -> Result<ResumePointId> {
        self.resume_points.try_reserve(1)?;
        let id = ResumePointId::new(self.resume_points.len() as u32);
        for (index, &operand) in operands.iter().enumerate() {
            self.add_use(operand, Consumer::ResumePoint(id), index as u32)?;
        }
        self.resume_points.push(Some(ResumePoint { block, operands }));
        Ok(id)
    }

    pub(crate) fn add_use(&mut self, producer: DefId, consumer: Consumer, index: u32) -> Result<()> {
        let uses = &mut self.def_mut(producer).uses;
        uses.try_reserve(1)?;
        uses.push(Use { consumer, index });
        Ok(())
    }

    pub(crate) fn remove_use(&mut self, producer: DefId, consumer: Consumer, index: u32) {
        let uses = &mut self.def_mut(producer).uses;
        if let Some(pos) = uses
            .iter()
            .position(|u| u.consumer == consumer && u.index == index)
        {
            uses.swap_remove(pos);
        } else {
            debug_assert!(false, "{producer} has no use by {consumer:?}@{index}");
        }
    }

    fn reindex_use(&mut self, producer: DefId, consumer: Consumer, from: u32, to: u32) {
        if let Some(entry) = self
            .def_mut(producer)
            .uses
            .iter_mut()
            .find(|u| u.consumer == consumer && u.index == from)
        {
            entry.index = to;
        }
    }

    pub(crate) fn consumer_operands(&self, consumer: Consumer) -> &[DefId] {
        match consumer {
            Consumer::Definition(def) => &self.def(def).operands,
            Consumer::ResumePoint(rp) => &self.resume_point(rp).operands,
        }
    }

    fn consumer_operands_mut(&mut self, consumer: Consumer) -> &mut Vec<DefId> {
        match consumer {
            Consumer::Definition(def) => &mut self.def_mut(def).operands,
            Consumer::ResumePoint(rp) => match self.resume_points.get_mut(rp.index()) {
                Some(Some(point)) => &mut point.operands,
                _ => panic!("{rp} is not a live resume point"),
            },
        }
    }

    /// Points operand `index` of `consumer` at `value`, keeping both use lists exact.
    pub(crate) fn set_consumer_operand(
        &mut self,
        consumer: Consumer,
        index: usize,
        value: DefId,
    ) -> Result<()> {
        let old = self.consumer_operands(consumer)[index];
        if old == value {
            return Ok(());
        }
        self.remove_use(old, consumer, index as u32);
        self.add_use(value, consumer, index as u32)?;
        self.consumer_operands_mut(consumer)[index] = value;
        Ok(())
    }

    /// Appends an operand to `consumer`.
    pub(crate) fn push_consumer_operand(&mut self, consumer: Consumer, value: DefId) -> Result<()> {
        let index = self.consumer_operands(consumer).len();
        self.add_use(value, consumer, index as u32)?;
        let operands = self.consumer_operands_mut(consumer);
        operands.try_reserve(1)?;
        operands.push(value);
        Ok(())
    }

    /// Removes operand `index` of `consumer`, shifting later operands down.
    pub(crate) fn remove_consumer_operand(&mut self, consumer: Consumer, index: usize) {
        let operands = self.consumer_operands(consumer).to_vec();
        self.remove_use(operands[index], consumer, index as u32);
        for (later, &operand) in operands.iter().enumerate().skip(index + 1) {
            self.reindex_use(operand, consumer, later as u32, later as u32 - 1);
        }
        self.consumer_operands_mut(consumer).remove(index);
    }

    /// Drops every operand of `consumer` from its producers' use lists.
    pub(crate) fn unlink_operands(&mut self, consumer: Consumer) {
        let operands = std::mem::take(self.consumer_operands_mut(consumer));
        for (index, operand) in operands.into_iter().enumerate() {
            if self.contains_def(operand) {
                self.remove_use(operand, consumer, index as u32);
            }
        }
    }

    pub(crate) fn free_def(&mut self, id: DefId) {
        if let Some(slot) = self.defs.get_mut(id.index()) {
            *slot = None;
        }
    }

    pub(crate) fn free_resume_point(&mut self, id: ResumePointId) {
        if let Some(slot) = self.resume_points.get_mut(id.index()) {
            *slot = None;
        }
    }

    pub(crate) fn free_block(&mut self, id: BlockId) {
        if let Some(slot) = self.blocks.get_mut(id.index()) {
            *slot = None;
        }
        self.order.retain(|&b| b != id);
        if self.entry == Some(id) {
            self.entry = None;
        }
        if self.osr == Some(id) {
            self.osr = None;
        }
    }
}

impl Successors for Graph {
    fn slot_count(&self) -> usize {
        self.blocks.len()
    }

    fn successors_of(&self, slot: usize, out: &mut Vec<usize>) {
        let id = BlockId::new(slot as u32);
        if self.contains_block(id) {
            out.extend(self.successors(id).map(BlockId::index));
        }
    }
}
