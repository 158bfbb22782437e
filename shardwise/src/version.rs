//! Affinity topology version
//!
//! Identifies one snapshot of cluster membership and partition distribution.
//! The major component changes when nodes join or leave; the minor component
//! changes when the distribution is recomputed for the same membership.

use serde::{Deserialize, Serialize};

/// Topology version, ordered lexicographically by `(major, minor)`
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TopologyVersion {
    /// Membership version
    pub major: u64,
    /// Distribution version within one membership
    pub minor: u32,
}

impl TopologyVersion {
    /// Create a new topology version
    pub const fn new(major: u64, minor: u32) -> Self {
        Self { major, minor }
    }

    /// Check if this version is newer than another
    pub fn is_newer_than(&self, other: &TopologyVersion) -> bool {
        self > other
    }
}

impl std::fmt::Display for TopologyVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_is_lexicographic() {
        assert!(TopologyVersion::new(1, 0) < TopologyVersion::new(1, 1));
        assert!(TopologyVersion::new(1, 9) < TopologyVersion::new(2, 0));
        assert!(TopologyVersion::new(3, 0) > TopologyVersion::new(2, u32::MAX));
    }

    #[test]
    fn test_is_newer_than() {
        let v1 = TopologyVersion::new(5, 2);
        let v2 = TopologyVersion::new(5, 3);
        assert!(v2.is_newer_than(&v1));
        assert!(!v1.is_newer_than(&v2));
        assert!(!v1.is_newer_than(&v1));
    }

    #[test]
    fn test_default_and_display() {
        assert_eq!(TopologyVersion::default(), TopologyVersion::new(0, 0));
        assert_eq!(TopologyVersion::new(12, 3).to_string(), "12.3");
    }
}
