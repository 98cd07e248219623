//! SSA definitions and their use lists.

use bitflags::bitflags;

use crate::{
    analysis::Range,
    mir::{BlockId, DefId, MirOp, MirType, ResumePointId},
};

bitflags! {
    /// Per-definition state bits maintained by the passes.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct DefFlags: u8 {
        /// Committed to int32 semantics by truncation; arithmetic wraps instead of bailing.
        const TRUNCATED = 1 << 0;
        /// Must not be removed even when unused.
        const GUARD = 1 << 1;
        /// Scratch bit for worklist algorithms.
        const IN_WORKLIST = 1 << 2;
        /// Inserted by range analysis when hoisting a bounds check out of a loop.
        const HOISTED = 1 << 3;
    }
}

/// Something that reads a definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Consumer {
    /// An instruction, phi or terminator.
    Definition(DefId),
    /// A resume point capturing the value for a bailout.
    ResumePoint(ResumePointId),
}

/// One entry of a use list: `consumer` reads the producer as its operand `index`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Use {
    /// The reading node.
    pub consumer: Consumer,
    /// Operand position inside the consumer.
    pub index: u32,
}

/// A value-producing node of the graph: an instruction, a phi or a terminator.
#[derive(Debug, Clone)]
pub struct Definition {
    pub(crate) id: DefId,
    pub(crate) number: u32,
    pub(crate) op: MirOp,
    pub(crate) ty: MirType,
    pub(crate) operands: Vec<DefId>,
    pub(crate) uses: Vec<Use>,
    pub(crate) block: BlockId,
    pub(crate) range: Option<Range>,
    pub(crate) flags: DefFlags,
}

impl Definition {
    pub(crate) fn new(
        id: DefId,
        number: u32,
        block: BlockId,
        op: MirOp,
        ty: MirType,
        operands: Vec<DefId>,
    ) -> Self {
        let flags = if op.is_guard() {
            DefFlags::GUARD
        } else {
            DefFlags::empty()
        };
        Definition {
            id,
            number,
            op,
            ty,
            operands,
            uses: Vec::new(),
            block,
            range: None,
            flags,
        }
    }

    /// Arena handle of this definition.
    #[must_use]
    pub const fn id(&self) -> DefId {
        self.id
    }

    /// Monotonic creation number, unique within the graph.
    #[must_use]
    pub const fn number(&self) -> u32 {
        self.number
    }

    /// The operation this definition performs.
    #[must_use]
    pub const fn op(&self) -> &MirOp {
        &self.op
    }

    /// Result type.
    #[must_use]
    pub const fn ty(&self) -> MirType {
        self.ty
    }

    /// Operands in order.
    #[must_use]
    pub fn operands(&self) -> &[DefId] {
        &self.operands
    }

    /// Operand at position `index`.
    ///
    /// # Panics
    ///
    /// Panics if the definition has fewer operands.
    #[must_use]
    pub fn operand(&self, index: usize) -> DefId {
        self.operands[index]
    }

    /// Every place reading this definition.
    #[must_use]
    pub fn uses(&self) -> &[Use] {
        &self.uses
    }

    /// Returns `true` if nothing reads this definition.
    #[must_use]
    pub fn has_uses(&self) -> bool {
        !self.uses.is_empty()
    }

    /// The block holding this definition.
    #[must_use]
    pub const fn block(&self) -> BlockId {
        self.block
    }

    /// Inferred range, if range analysis computed one.
    #[must_use]
    pub const fn range(&self) -> Option<&Range> {
        self.range.as_ref()
    }

    /// State bits.
    #[must_use]
    pub const fn flags(&self) -> DefFlags {
        self.flags
    }

    /// Returns `true` once truncation committed this definition to int32 semantics.
    #[must_use]
    pub const fn is_truncated(&self) -> bool {
        self.flags.contains(DefFlags::TRUNCATED)
    }

    /// Returns `true` for phis.
    #[must_use]
    pub const fn is_phi(&self) -> bool {
        self.op.is_phi()
    }

    /// Returns `true` for terminators.
    #[must_use]
    pub const fn is_control(&self) -> bool {
        self.op.is_control()
    }

    /// For a phi whose operands all name the same value (ignoring the phi itself), that
    /// value.
    #[must_use]
    pub fn operand_if_redundant(&self) -> Option<DefId> {
        if !self.is_phi() {
            return None;
        }
        let mut unique = None;
        for &operand in &self.operands {
            if operand == self.id {
                continue;
            }
            match unique {
                None => unique = Some(operand),
                Some(seen) if seen == operand => {}
                Some(_) => return None,
            }
        }
        unique
    }
}

/// Snapshot of a block's slots, read when execution resumes in a lower tier.
#[derive(Debug, Clone)]
pub struct ResumePoint {
    pub(crate) block: BlockId,
    pub(crate) operands: Vec<DefId>,
}

impl ResumePoint {
    /// The block whose entry state this resume point describes.
    #[must_use]
    pub const fn block(&self) -> BlockId {
        self.block
    }

    /// Captured slot values.
    #[must_use]
    pub fn operands(&self) -> &[DefId] {
        &self.operands
    }
}
