// Copyright 2025 Accenture.
//
// SPDX-License-Identifier: Apache-2.0

//! Participant identifiers

use core::fmt;

/// Identifies a participant among `cardinality` total participants
///
/// Ranks are unique, contiguous and zero-based, and immutable once assigned.
#[derive(Debug, Clone, Copy, Hash, PartialEq, Eq, PartialOrd, Ord)]
pub struct Rank(u64);

impl Rank {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    pub fn id(self) -> u64 {
        self.0
    }

    /// Position in per-link tables sized to the cardinality
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u64> for Rank {
    fn from(value: u64) -> Self {
        Self(value)
    }
}

impl From<Rank> for u64 {
    fn from(value: Rank) -> Self {
        value.0
    }
}

impl fmt::Display for Rank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;

    #[test]
    fn rank_display_carries_prefix() {
        assert_eq!(format!("{}", Rank::new(3)), "R3");
    }
}
