//! Result types of MIR definitions.

use strum::{Display, IntoStaticStr};

/// The static type of the value a definition produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, IntoStaticStr)]
#[strum(serialize_all = "lowercase")]
pub enum MirType {
    /// No value; control instructions and checks that produce nothing.
    None,
    /// A boolean, ranged as the integers `0` and `1`.
    Boolean,
    /// A 32-bit signed integer.
    Int32,
    /// An IEEE 754 double.
    Double,
    /// A boxed value of unknown representation.
    Value,
    /// A heap object reference, e.g. an array.
    Object,
}

impl MirType {
    /// Returns `true` for the two numeric representations.
    #[must_use]
    pub const fn is_numeric(self) -> bool {
        matches!(self, MirType::Int32 | MirType::Double)
    }

    /// Returns `true` if definitions of this type carry a range.
    #[must_use]
    pub const fn has_range(self) -> bool {
        matches!(self, MirType::Boolean | MirType::Int32 | MirType::Double)
    }

    /// The type a phi must have to hold values of both `self` and `other`.
    ///
    /// Int32 and Double widen to Double; any other disagreement widens to Value.
    #[must_use]
    pub fn merge(self, other: MirType) -> MirType {
        match (self, other) {
            (a, b) if a == b => a,
            (MirType::Int32, MirType::Double) | (MirType::Double, MirType::Int32) => MirType::Double,
            _ => MirType::Value,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge() {
        assert_eq!(MirType::Int32.merge(MirType::Int32), MirType::Int32);
        assert_eq!(MirType::Int32.merge(MirType::Double), MirType::Double);
        assert_eq!(MirType::Boolean.merge(MirType::Int32), MirType::Value);
        assert_eq!(MirType::Object.merge(MirType::Object), MirType::Object);
    }

    #[test]
    fn test_display() {
        assert_eq!(MirType::Int32.to_string(), "int32");
        assert_eq!(MirType::None.to_string(), "none");
    }

    #[test]
    fn test_range_carrying_types() {
        assert!(MirType::Boolean.has_range());
        assert!(!MirType::Boolean.is_numeric());
        assert!(!MirType::Value.has_range());
    }
}
