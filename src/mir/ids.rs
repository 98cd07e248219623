//! Arena handles for blocks, definitions and resume points.
//!
//! Every cross reference inside a [`Graph`](crate::Graph) is one of these dense 32-bit
//! handles. They are non-owning: the graph's arenas are the only owners, so removing a
//! block or definition never leaves a dangling pointer behind, only a stale handle that the
//! arena reports as vacant.

use std::fmt;

macro_rules! arena_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub(crate) u32);

        impl $name {
            /// Creates a handle from a raw arena slot.
            #[must_use]
            #[inline]
            pub const fn new(index: u32) -> Self {
                $name(index)
            }

            /// Returns the arena slot of this handle.
            #[must_use]
            #[inline]
            pub const fn index(self) -> usize {
                self.0 as usize
            }

            /// Returns the raw 32-bit value.
            #[must_use]
            #[inline]
            pub const fn raw(self) -> u32 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "{}"), self.0)
            }
        }
    };
}

arena_id!(
    /// Handle of a basic block in the graph's block arena.
    ///
    /// The handle stays valid for the lifetime of the block. The dense, renumbered id used
    /// for ordering is [`BasicBlock::number`](crate::mir::BasicBlock::number).
    BlockId,
    "block"
);

arena_id!(
    /// Handle of a definition (instruction, phi or terminator) in the definition arena.
    DefId,
    "#"
);

arena_id!(
    /// Handle of a resume point in the resume point arena.
    ResumePointId,
    "rp"
);

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_roundtrip_index() {
        let id = DefId::new(42);
        assert_eq!(id.index(), 42);
        assert_eq!(id.raw(), 42);
    }

    #[test]
    fn test_formatting() {
        assert_eq!(format!("{}", BlockId::new(3)), "block3");
        assert_eq!(format!("{:?}", DefId::new(7)), "#7");
        assert_eq!(format!("{}", ResumePointId::new(0)), "rp0");
    }

    #[test]
    fn test_hash_and_order() {
        let set: HashSet<BlockId> = [BlockId::new(1), BlockId::new(1), BlockId::new(2)]
            .into_iter()
            .collect();
        assert_eq!(set.len(), 2);
        assert!(BlockId::new(1) < BlockId::new(2));
    }
}
