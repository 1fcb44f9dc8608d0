//! Offset type: a position inside a byte-bearing node.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A byte displacement within the node named by `element_id`.
///
/// Ordering is by element identifier first and displacement second, so
/// offsets into one element sort by position and can serve as sparse index
/// keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Offset {
    /// Identifier of the referenced element (usually a byte interval)
    pub element_id: Uuid,
    /// Displacement in bytes from the start of the element
    pub displacement: u64,
}

impl Offset {
    pub fn new(element_id: Uuid, displacement: u64) -> Self {
        Self {
            element_id,
            displacement,
        }
    }

    /// The same element, `delta` bytes further on.
    pub fn advance(&self, delta: u64) -> Option<Offset> {
        self.displacement
            .checked_add(delta)
            .map(|displacement| Offset::new(self.element_id, displacement))
    }
}

impl fmt::Display for Offset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{:#x}", self.element_id, self.displacement)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::id::new_identifier;

    #[test]
    fn test_ordering_within_element_follows_displacement() {
        let element = new_identifier();
        let a = Offset::new(element, 4);
        let b = Offset::new(element, 8);
        assert!(a < b);
        assert!(!(b < a));
        assert_eq!(a.cmp(&Offset::new(element, 4)), std::cmp::Ordering::Equal);
    }

    #[test]
    fn test_ordering_across_elements_uses_identifier_first() {
        let low = Uuid::from_u128(1);
        let high = Uuid::from_u128(2);
        assert!(Offset::new(low, 1000) < Offset::new(high, 0));
    }

    #[test]
    fn test_advance() {
        let o = Offset::new(Uuid::nil(), 10);
        assert_eq!(o.advance(6).unwrap().displacement, 16);
        assert!(Offset::new(Uuid::nil(), u64::MAX).advance(1).is_none());
    }
}
