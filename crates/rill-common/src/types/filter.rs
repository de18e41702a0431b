//! Range filter over a message's routing hash.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Inclusive range on a message's `uint16_payload`.
///
/// Readers that consume a hash range of a partition identify themselves by
/// client id plus filter, so the filter is part of the reader key.
///
/// # Example
///
/// ```rust
/// use rill_common::types::Filter;
///
/// let filter = Filter::new(100, 200);
/// assert!(filter.matches(150));
/// assert!(!filter.matches(201));
/// assert!(Filter::ALL.is_all());
/// ```
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Filter {
    /// Lower bound (inclusive).
    pub from: u16,
    /// Upper bound (inclusive).
    pub to: u16,
}

impl Filter {
    /// Filter that accepts every message.
    pub const ALL: Self = Self {
        from: 0,
        to: u16::MAX,
    };

    /// Creates a new filter.
    #[inline]
    #[must_use]
    pub const fn new(from: u16, to: u16) -> Self {
        Self { from, to }
    }

    /// Returns true if `value` falls in the range.
    #[inline]
    #[must_use]
    pub const fn matches(self, value: u16) -> bool {
        value >= self.from && value <= self.to
    }

    /// Returns true if the filter accepts everything.
    #[inline]
    #[must_use]
    pub const fn is_all(self) -> bool {
        self.from == 0 && self.to == u16::MAX
    }

    /// Returns true if the range is non-empty.
    #[inline]
    #[must_use]
    pub const fn is_valid(self) -> bool {
        self.from <= self.to
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::ALL
    }
}

impl fmt::Debug for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Filter({}..={})", self.from, self.to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_inclusive() {
        let f = Filter::new(10, 10);
        assert!(f.matches(10));
        assert!(!f.matches(9));
        assert!(!f.matches(11));
    }

    #[test]
    fn test_validity() {
        assert!(Filter::default().is_all());
        assert!(!Filter::new(5, 4).is_valid());
        assert!(Filter::new(4, 5).is_valid());
    }
}
