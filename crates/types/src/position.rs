//! Log positions.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A coordinate identifying one entry in a cluster's topic log.
///
/// Positions are totally ordered within a single cluster (ledger id major,
/// entry id minor). Clusters do not share a log position space, so comparing
/// positions from different clusters is meaningless; the snapshot protocol
/// never does it, and neither should callers.
///
/// # Display
///
/// Formats as `ledger:entry`, e.g. `5:10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Position {
    /// Identifier of the ledger (log segment) holding the entry.
    pub ledger_id: u64,
    /// Offset of the entry within its ledger.
    pub entry_id: u64,
}

impl Position {
    /// Creates a position from raw ledger and entry ids.
    #[inline]
    pub const fn new(ledger_id: u64, entry_id: u64) -> Self {
        Self { ledger_id, entry_id }
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.ledger_id, self.entry_id)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_is_ledger_major() {
        assert!(Position::new(1, 100) < Position::new(2, 0));
        assert!(Position::new(3, 4) < Position::new(3, 5));
        assert_eq!(Position::new(7, 7), Position::new(7, 7));
    }

    #[test]
    fn test_display() {
        assert_eq!(Position::new(5, 10).to_string(), "5:10");
    }
}
