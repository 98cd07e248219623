//! Construction and mutation API.
//!
//! The operations here are what an IR builder calls while translating a function, and what
//! the optimization passes call while rewriting it. They keep three structural properties
//! intact at all times:
//!
//! - every operand of a definition or resume point appears in the producer's use list,
//! - every phi has exactly one operand per predecessor of its block, in predecessor order,
//! - a closed block's terminator only changes through [`Graph::discard_terminator`].
//!
//! Slots model the abstract locals/stack of the source program. While a block is being
//! filled, [`Graph::set_slot`] records the current value of each slot; when control flow
//! merges, [`Graph::add_predecessor`] and [`Graph::set_backedge`] create phis for the
//! slots whose values disagree.
//!
//! # Examples
//!
//! ```rust
//! use jitmir::{CompareOp, Graph, MirType};
//!
//! // entry: x = param 0; if (x < 10) goto then else goto join
//! let mut graph = Graph::new();
//! let entry = graph.new_entry_block(1)?;
//! let x = graph.parameter(entry, 0, MirType::Int32)?;
//! graph.set_slot(entry, 0, x);
//! let ten = graph.constant_i32(entry, 10)?;
//! let cond = graph.compare(entry, CompareOp::Lt, x, ten)?;
//!
//! let then_block = graph.new_block(Some(entry))?;
//! let join = graph.new_block(Some(entry))?;
//! graph.test(entry, cond, then_block, join)?;
//!
//! let one = graph.constant_i32(then_block, 1)?;
//! graph.set_slot(then_block, 0, one);
//! graph.goto(then_block, join)?;
//! graph.add_predecessor(join, then_block)?;
//!
//! // The join now merges `x` and `1` in a phi.
//! assert_eq!(graph.block(join).phis().len(), 1);
//! # Ok::<(), jitmir::Error>(())
//! ```

use crate::{
    mir::{BlockId, BlockKind, Constant, Consumer, DefId, MirOp, MirType},
    Result,
};

use super::Graph;

/// Outcome of [`Graph::set_backedge`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackedgeStatus {
    /// The loop header is finalized and every phi kept its type.
    Finalized,
    /// The loop header is finalized but at least one phi had to widen its type to accept
    /// the backedge value. The loop is excluded from loop optimizations.
    TypeChanged,
}

impl Graph {
    fn inherit_slots(&mut self, block: BlockId, pred: Option<BlockId>) -> Result<()> {
        if let Some(pred) = pred {
            let (slots, depth) = {
                let p = self.block(pred);
                (p.slots.clone(), p.loop_depth)
            };
            let b = self.block_mut(block);
            b.slots = slots;
            b.loop_depth = depth;
            b.predecessors.try_reserve(1)?;
            b.predecessors.push(pred);
        }
        Ok(())
    }

    fn capture_entry_resume_point(&mut self, block: BlockId) -> Result<()> {
        let slots = self.block(block).slots.clone();
        if !slots.is_empty() {
            let rp = self.alloc_resume_point(block, slots)?;
            self.block_mut(block).entry_resume_point = Some(rp);
        }
        Ok(())
    }

    /// Creates the primary entry block with `num_slots` slots, all holding `undefined`.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if the graph already has an entry block.
    pub fn new_entry_block(&mut self, num_slots: usize) -> Result<BlockId> {
        debug_assert!(self.entry.is_none(), "graph already has an entry block");
        let block = self.alloc_block(BlockKind::Normal)?;
        self.entry = Some(block);
        if num_slots > 0 {
            let undefined = self.constant(block, Constant::Undefined)?;
            self.block_mut(block).slots = vec![undefined; num_slots];
        }
        Ok(block)
    }

    /// Creates the OSR entry block. Slot `i` holds an [`MirOp::OsrValue`] of type
    /// `slot_types[i]`.
    pub fn new_osr_block(&mut self, slot_types: &[MirType]) -> Result<BlockId> {
        debug_assert!(self.osr.is_none(), "graph already has an OSR block");
        let block = self.alloc_block(BlockKind::Normal)?;
        self.osr = Some(block);
        let mut slots = Vec::with_capacity(slot_types.len());
        for (index, &ty) in slot_types.iter().enumerate() {
            slots.push(self.push(block, MirOp::OsrValue(index as u32), ty, vec![])?);
        }
        self.block_mut(block).slots = slots;
        self.capture_entry_resume_point(block)?;
        Ok(block)
    }

    /// Creates a block, optionally inheriting the slots of `pred` and listing it as the
    /// first predecessor.
    pub fn new_block(&mut self, pred: Option<BlockId>) -> Result<BlockId> {
        let block = self.alloc_block(BlockKind::Normal)?;
        self.inherit_slots(block, pred)?;
        self.capture_entry_resume_point(block)?;
        Ok(block)
    }

    /// Creates a loop header entered from `pred`. Every slot gets a phi whose first operand
    /// is the entering value; [`Graph::set_backedge`] supplies the second.
    pub fn new_pending_loop_header(&mut self, pred: BlockId) -> Result<BlockId> {
        let block = self.alloc_block(BlockKind::PendingLoopHeader)?;
        self.inherit_slots(block, Some(pred))?;
        self.block_mut(block).loop_depth += 1;
        let slots = self.block(block).slots.clone();
        let mut phis = Vec::with_capacity(slots.len());
        for value in slots {
            let ty = self.def(value).ty;
            let phi = self.alloc_def(block, MirOp::Phi, ty, vec![value])?;
            phis.push(phi);
        }
        {
            let b = self.block_mut(block);
            b.phis.extend_from_slice(&phis);
            b.slots = phis;
        }
        self.capture_entry_resume_point(block)?;
        Ok(block)
    }

    /// Inserts a [`BlockKind::SplitEdge`] block on the edge `pred -> succ`.
    ///
    /// The new block takes `pred`'s place in `succ`'s predecessor list, so phi operands of
    /// `succ` keep flowing in from the same position.
    pub fn split_edge(&mut self, pred: BlockId, succ: BlockId) -> Result<BlockId> {
        let index = self
            .block(succ)
            .predecessor_index(pred)
            .ok_or_else(|| malformed_error!("{} is not a predecessor of {}", pred, succ))?;
        let split = self.alloc_block(BlockKind::SplitEdge)?;
        self.inherit_slots(split, Some(pred))?;
        if let Some(term) = self.block(pred).terminator() {
            self.def_mut(term).op.replace_successor(succ, split);
        }
        self.block_mut(succ).predecessors[index] = split;
        self.goto(split, succ)?;
        Ok(split)
    }

    /// Records `value` as the current content of slot `slot` of `block`.
    ///
    /// # Panics
    ///
    /// Panics if the block has fewer slots.
    pub fn set_slot(&mut self, block: BlockId, slot: usize, value: DefId) {
        self.block_mut(block).slots[slot] = value;
    }

    /// Current content of slot `slot` of `block`.
    #[must_use]
    pub fn slot(&self, block: BlockId, slot: usize) -> DefId {
        self.block(block).slots[slot]
    }

    /// Adds `pred` as the next predecessor of `block`.
    ///
    /// For every slot whose value in `pred` differs from the value in `block`, either the
    /// phi this block already created for the slot receives the new operand, or a new phi
    /// is created that repeats the previous value for every existing predecessor and takes
    /// `pred`'s value last.
    pub fn add_predecessor(&mut self, block: BlockId, pred: BlockId) -> Result<()> {
        debug_assert!(
            self.block(pred).is_closed(),
            "{pred} must be closed before it becomes a predecessor"
        );
        debug_assert_eq!(
            self.block(block).slots.len(),
            self.block(pred).slots.len(),
            "slot count mismatch between {block} and {pred}"
        );

        let num_slots = self.block(block).slots.len();
        for slot in 0..num_slots {
            let mine = self.block(block).slots[slot];
            let other = self.block(pred).slots[slot];
            if mine == other {
                continue;
            }

            let own_phi = {
                let def = self.def(mine);
                def.is_phi() && def.block == block
            };
            if own_phi {
                self.push_consumer_operand(Consumer::Definition(mine), other)?;
                let merged = self.def(mine).ty.merge(self.def(other).ty);
                self.def_mut(mine).ty = merged;
                continue;
            }

            let existing = self.block(block).predecessors.len();
            let ty = self.def(mine).ty.merge(self.def(other).ty);
            let mut operands = vec![mine; existing];
            operands.push(other);
            let phi = self.alloc_def(block, MirOp::Phi, ty, operands)?;
            self.block_mut(block).phis.push(phi);
            self.block_mut(block).slots[slot] = phi;
            if let Some(rp) = self.block(block).entry_resume_point {
                self.set_consumer_operand(Consumer::ResumePoint(rp), slot, phi)?;
            }
        }

        let preds = &mut self.block_mut(block).predecessors;
        preds.try_reserve(1)?;
        preds.push(pred);
        Ok(())
    }

    /// Closes the loop headed by `header` with the backedge coming from `pred`.
    ///
    /// Each header phi receives `pred`'s value of its slot as second operand. When that
    /// value is the phi itself the loop does not modify the slot and the phi gets its entry
    /// value again; such redundant phis are left in place for phi elimination.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if `header` is not a pending loop header.
    pub fn set_backedge(&mut self, header: BlockId, pred: BlockId) -> Result<BackedgeStatus> {
        debug_assert_eq!(
            self.block(header).kind,
            BlockKind::PendingLoopHeader,
            "set_backedge requires a pending loop header"
        );
        debug_assert!(self.block(pred).is_closed(), "{pred} must be closed first");

        let mut type_changed = false;
        // Pending headers create one phi per slot, in slot order.
        let phis = self.block(header).phis.clone();
        for (slot, &entry_def) in phis.iter().enumerate() {
            let mut exit_def = self.block(pred).slots[slot];
            if exit_def == entry_def {
                exit_def = self.def(entry_def).operands[0];
            }
            self.push_consumer_operand(Consumer::Definition(entry_def), exit_def)?;
            self.block_mut(header).slots[slot] = entry_def;

            let phi_ty = self.def(entry_def).ty;
            let merged = phi_ty.merge(self.def(exit_def).ty);
            if merged != phi_ty {
                self.def_mut(entry_def).ty = merged;
                type_changed = true;
            }
        }

        let b = self.block_mut(header);
        b.predecessors.try_reserve(1)?;
        b.predecessors.push(pred);
        b.kind = BlockKind::LoopHeader;
        b.loop_type_changed = type_changed;

        if type_changed {
            log::debug!("loop {header}: backedge widened a phi type");
            Ok(BackedgeStatus::TypeChanged)
        } else {
            Ok(BackedgeStatus::Finalized)
        }
    }

    /// Appends an instruction to the open block `block`.
    pub fn push(
        &mut self,
        block: BlockId,
        op: MirOp,
        ty: MirType,
        operands: Vec<DefId>,
    ) -> Result<DefId> {
        debug_assert!(!self.block(block).closed, "{block} is already closed");
        debug_assert!(!op.is_phi() && !op.is_control());
        let def = self.alloc_def(block, op, ty, operands)?;
        let instrs = &mut self.block_mut(block).instructions;
        instrs.try_reserve(1)?;
        instrs.push(def);
        Ok(def)
    }

    /// Inserts an instruction at position `index` of `block`'s instruction list.
    pub fn insert_at(
        &mut self,
        block: BlockId,
        index: usize,
        op: MirOp,
        ty: MirType,
        operands: Vec<DefId>,
    ) -> Result<DefId> {
        let def = self.alloc_def(block, op, ty, operands)?;
        let instrs = &mut self.block_mut(block).instructions;
        instrs.try_reserve(1)?;
        instrs.insert(index, def);
        Ok(def)
    }

    /// Inserts an instruction immediately before the terminator of the closed `block`.
    pub fn insert_before_terminator(
        &mut self,
        block: BlockId,
        op: MirOp,
        ty: MirType,
        operands: Vec<DefId>,
    ) -> Result<DefId> {
        let b = self.block(block);
        debug_assert!(b.closed, "{block} has no terminator yet");
        let index = b.instructions.len().saturating_sub(usize::from(b.closed));
        self.insert_at(block, index, op, ty, operands)
    }

    /// Inserts an instruction right after `after`, which must not be a terminator. When
    /// `after` is a phi the instruction becomes the first one of the block.
    pub fn insert_after(
        &mut self,
        after: DefId,
        op: MirOp,
        ty: MirType,
        operands: Vec<DefId>,
    ) -> Result<DefId> {
        let block = self.def(after).block;
        let index = if self.def(after).is_phi() {
            0
        } else {
            self.block(block)
                .instructions
                .iter()
                .position(|&d| d == after)
                .map_or(0, |pos| pos + 1)
        };
        self.insert_at(block, index, op, ty, operands)
    }

    /// Closes `block` with the terminator `op`.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if the block is already closed.
    pub fn end(&mut self, block: BlockId, op: MirOp, operands: Vec<DefId>) -> Result<DefId> {
        debug_assert!(!self.block(block).closed, "{block} is already closed");
        debug_assert!(op.is_control());
        let def = self.alloc_def(block, op, MirType::None, operands)?;
        let b = self.block_mut(block);
        b.instructions.try_reserve(1)?;
        b.instructions.push(def);
        b.closed = true;
        Ok(def)
    }

    /// Removes the terminator of `block`, reopening it.
    pub fn discard_terminator(&mut self, block: BlockId) {
        if let Some(term) = self.block(block).terminator() {
            let b = self.block_mut(block);
            b.instructions.pop();
            b.closed = false;
            self.unlink_operands(Consumer::Definition(term));
            self.free_def(term);
        }
    }

    /// Points operand `index` of `consumer` at `value`.
    pub fn replace_operand(&mut self, consumer: DefId, index: usize, value: DefId) -> Result<()> {
        self.set_consumer_operand(Consumer::Definition(consumer), index, value)
    }

    /// Redirects every use of `old`, including resume point captures, to `new`.
    pub fn replace_all_uses_with(&mut self, old: DefId, new: DefId) -> Result<()> {
        if old == new {
            return Ok(());
        }
        let uses = std::mem::take(&mut self.def_mut(old).uses);
        for u in uses {
            self.consumer_operands_mut_checked(u.consumer, u.index as usize, new);
            self.add_use(new, u.consumer, u.index)?;
        }
        Ok(())
    }

    fn consumer_operands_mut_checked(&mut self, consumer: Consumer, index: usize, value: DefId) {
        match consumer {
            Consumer::Definition(def) => self.def_mut(def).operands[index] = value,
            Consumer::ResumePoint(rp) => {
                if let Some(Some(point)) = self.resume_points.get_mut(rp.index()) {
                    point.operands[index] = value;
                }
            }
        }
    }

    /// Removes an instruction or phi that has no remaining uses.
    ///
    /// # Panics
    ///
    /// Panics in debug builds if something still reads `def`.
    pub fn discard(&mut self, def: DefId) {
        debug_assert!(
            self.def(def).uses.is_empty(),
            "discarding {def} which still has uses"
        );
        let (block, is_phi, is_control) = {
            let d = self.def(def);
            (d.block, d.is_phi(), d.is_control())
        };
        if is_control {
            self.discard_terminator(block);
            return;
        }
        self.unlink_operands(Consumer::Definition(def));
        let b = self.block_mut(block);
        if is_phi {
            b.phis.retain(|&p| p != def);
        } else {
            b.instructions.retain(|&i| i != def);
        }
        self.free_def(def);
    }

    /// Removes `pred` from `block`'s predecessor list along with the matching phi operands.
    ///
    /// A loop header losing its backedge stops being a loop header.
    pub fn remove_predecessor(&mut self, block: BlockId, pred: BlockId) {
        let Some(index) = self.block(block).predecessor_index(pred) else {
            return;
        };
        let phis = self.block(block).phis.clone();
        for phi in phis {
            self.remove_consumer_operand(Consumer::Definition(phi), index);
        }
        let b = self.block_mut(block);
        b.predecessors.remove(index);
        if b.kind == BlockKind::LoopHeader && index == 1 {
            b.kind = BlockKind::Normal;
        }
    }

    /// Removes `block` and everything in it.
    ///
    /// Operands of the removed definitions and of the block's resume point are unlinked
    /// from their producers. Definitions of the block must not be read from outside it.
    pub fn discard_block(&mut self, block: BlockId) {
        self.discard_blocks(&[block]);
    }

    /// Removes a set of blocks whose definitions are only read from inside the set.
    ///
    /// Every operand is unlinked before anything is freed, so the blocks may use each
    /// other's values in any order, cycles through loop phis included.
    pub fn discard_blocks(&mut self, blocks: &[BlockId]) {
        let mut defs = Vec::new();
        for &block in blocks {
            defs.extend(self.definitions(block));
            if let Some(rp) = self.block(block).entry_resume_point {
                self.unlink_operands(Consumer::ResumePoint(rp));
                self.free_resume_point(rp);
            }
        }
        for &def in &defs {
            self.unlink_operands(Consumer::Definition(def));
        }
        for &def in &defs {
            debug_assert!(
                self.def(def).uses.is_empty(),
                "{def} in {} is still used outside the discarded blocks",
                self.def(def).block
            );
            self.free_def(def);
        }
        for &block in blocks {
            self.free_block(block);
        }
    }

    /// Appends a constant to `block`.
    pub fn constant(&mut self, block: BlockId, value: Constant) -> Result<DefId> {
        let ty = match value {
            Constant::Int32(_) => MirType::Int32,
            Constant::Double(_) => MirType::Double,
            Constant::Boolean(_) => MirType::Boolean,
            Constant::Undefined => MirType::Value,
        };
        self.push(block, MirOp::Constant(value), ty, vec![])
    }

    /// Appends an int32 constant.
    pub fn constant_i32(&mut self, block: BlockId, value: i32) -> Result<DefId> {
        self.constant(block, Constant::Int32(value))
    }

    /// Appends a double constant.
    pub fn constant_f64(&mut self, block: BlockId, value: f64) -> Result<DefId> {
        self.constant(block, Constant::Double(value))
    }

    /// Appends a boolean constant.
    pub fn constant_bool(&mut self, block: BlockId, value: bool) -> Result<DefId> {
        self.constant(block, Constant::Boolean(value))
    }

    /// Appends a read of parameter `index`.
    pub fn parameter(&mut self, block: BlockId, index: u32, ty: MirType) -> Result<DefId> {
        self.push(block, MirOp::Parameter(index), ty, vec![])
    }

    /// Appends a unary operation.
    pub fn unary(&mut self, block: BlockId, op: MirOp, input: DefId, ty: MirType) -> Result<DefId> {
        self.push(block, op, ty, vec![input])
    }

    /// Appends a binary operation.
    pub fn binary(
        &mut self,
        block: BlockId,
        op: MirOp,
        lhs: DefId,
        rhs: DefId,
        ty: MirType,
    ) -> Result<DefId> {
        self.push(block, op, ty, vec![lhs, rhs])
    }

    /// Appends a comparison producing a boolean.
    pub fn compare(&mut self, block: BlockId, op: super::CompareOp, lhs: DefId, rhs: DefId) -> Result<DefId> {
        self.push(block, MirOp::Compare(op), MirType::Boolean, vec![lhs, rhs])
    }

    /// Appends `array.length`.
    pub fn array_length(&mut self, block: BlockId, array: DefId) -> Result<DefId> {
        self.push(block, MirOp::ArrayLength, MirType::Int32, vec![array])
    }

    /// Appends a bounds check of `index` against `length`; the result is the checked index.
    pub fn bounds_check(&mut self, block: BlockId, index: DefId, length: DefId) -> Result<DefId> {
        self.push(block, MirOp::BoundsCheck, MirType::Int32, vec![index, length])
    }

    /// Appends `array[index]`.
    pub fn load_element(
        &mut self,
        block: BlockId,
        array: DefId,
        index: DefId,
        ty: MirType,
    ) -> Result<DefId> {
        self.push(block, MirOp::LoadElement, ty, vec![array, index])
    }

    /// Closes `block` with a jump to `target`. The caller links `target` with
    /// [`Graph::add_predecessor`], [`Graph::new_block`] or [`Graph::set_backedge`].
    pub fn goto(&mut self, block: BlockId, target: BlockId) -> Result<DefId> {
        self.end(block, MirOp::Goto(target), vec![])
    }

    /// Closes `block` with a conditional branch on `condition`.
    pub fn test(
        &mut self,
        block: BlockId,
        condition: DefId,
        if_true: BlockId,
        if_false: BlockId,
    ) -> Result<DefId> {
        self.end(block, MirOp::Test { if_true, if_false }, vec![condition])
    }

    /// Closes `block` with a return of `value`.
    pub fn ret(&mut self, block: BlockId, value: DefId) -> Result<DefId> {
        self.end(block, MirOp::Return, vec![value])
    }
}
