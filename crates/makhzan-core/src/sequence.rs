//! # Document Number Sequences
//!
//! Pure formatting, parsing and merge math for invoice-style document
//! numbers. The stateful allocator (persistence, duplicate scan) lives in
//! makhzan-store; everything here is deterministic.
//!
//! Numbers look like `SW0042`: a fixed prefix per document family and a
//! 4-digit zero-padded tail. The tail is the counter; two devices that
//! allocated offline merge by taking the maximum of their counters.

use crate::SEQUENCE_MAX;

// =============================================================================
// SequenceKind
// =============================================================================

/// Document families that carry allocated numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SequenceKind {
    /// Issue invoices: `SW####`.
    Issue,
    /// Return documents: `R####`.
    Return,
    /// Branch operations (branch invoices): `OP####`.
    BranchOps,
}

impl SequenceKind {
    pub const ALL: [SequenceKind; 3] = [
        SequenceKind::Issue,
        SequenceKind::Return,
        SequenceKind::BranchOps,
    ];

    pub fn prefix(&self) -> &'static str {
        match self {
            SequenceKind::Issue => "SW",
            SequenceKind::Return => "R",
            SequenceKind::BranchOps => "OP",
        }
    }

    /// Settings key the counter persists under (locally and in the cloud
    /// settings document).
    pub fn counter_key(&self) -> &'static str {
        match self {
            SequenceKind::Issue => "seq_issue",
            SequenceKind::Return => "seq_return",
            SequenceKind::BranchOps => "seq_branch_ops",
        }
    }
}

// =============================================================================
// Formatting / Parsing
// =============================================================================

/// Formats a counter value as a document number (`SW0042`).
pub fn format_number(kind: SequenceKind, n: u32) -> String {
    format!("{}{:04}", kind.prefix(), n.min(SEQUENCE_MAX))
}

/// Parses the counter out of a document number.
///
/// Only the exact shape `PREFIX` + 4 digits counts; anything else (manual
/// numbers, legacy imports) is ignored by recovery rather than rejected at
/// the document level.
pub fn parse_tail(kind: SequenceKind, number: &str) -> Option<u32> {
    let tail = number.strip_prefix(kind.prefix())?;
    if tail.len() != 4 || !tail.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    tail.parse().ok()
}

// =============================================================================
// Merge / Recovery Math
// =============================================================================

/// Merges a local counter with the cloud's view of it.
///
/// Counters only move forward; whichever side has allocated further wins.
pub fn merge_counters(local: u32, cloud: u32) -> u32 {
    local.max(cloud)
}

/// The next number to try after `merged`, clamped at the 4-digit ceiling.
pub fn next_candidate(merged: u32) -> u32 {
    (merged + 1).min(SEQUENCE_MAX)
}

/// True when a counter has hit the ceiling and can no longer advance.
pub fn is_exhausted(n: u32) -> bool {
    n >= SEQUENCE_MAX
}

/// Recovers a counter from existing document numbers.
///
/// Scans every number, keeps the well-formed tails and returns the maximum
/// (0 when none match). Used when the persisted counter was lost or is
/// suspected stale.
pub fn recover_counter<'a>(kind: SequenceKind, numbers: impl Iterator<Item = &'a str>) -> u32 {
    numbers
        .filter_map(|n| parse_tail(kind, n))
        .max()
        .unwrap_or(0)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_with_zero_padding() {
        assert_eq!(format_number(SequenceKind::Issue, 1), "SW0001");
        assert_eq!(format_number(SequenceKind::Return, 42), "R0042");
        assert_eq!(format_number(SequenceKind::BranchOps, 9999), "OP9999");
    }

    #[test]
    fn format_clamps_above_ceiling() {
        assert_eq!(format_number(SequenceKind::Issue, 12000), "SW9999");
    }

    #[test]
    fn parses_only_exact_shape() {
        assert_eq!(parse_tail(SequenceKind::Issue, "SW0042"), Some(42));
        assert_eq!(parse_tail(SequenceKind::Issue, "SW42"), None);
        assert_eq!(parse_tail(SequenceKind::Issue, "SW00421"), None);
        assert_eq!(parse_tail(SequenceKind::Issue, "R0042"), None);
        assert_eq!(parse_tail(SequenceKind::Issue, "SWABCD"), None);
        // "R" is a prefix of nothing else, but an issue number must not
        // parse as a return tail ("SW0042" → "W004" is not digits).
        assert_eq!(parse_tail(SequenceKind::Return, "SW0042"), None);
    }

    #[test]
    fn merge_takes_the_larger_counter() {
        assert_eq!(merge_counters(12, 15), 15);
        assert_eq!(merge_counters(15, 12), 15);
        assert_eq!(next_candidate(merge_counters(12, 15)), 16);
    }

    #[test]
    fn next_candidate_clamps() {
        assert_eq!(next_candidate(9998), 9999);
        assert_eq!(next_candidate(9999), 9999);
        assert!(is_exhausted(9999));
        assert!(!is_exhausted(9998));
    }

    #[test]
    fn recovery_scans_document_tails() {
        let numbers = ["SW0005", "SW0009", "SW0015", "DRAFT", "R0044"];
        let n = recover_counter(SequenceKind::Issue, numbers.iter().copied());
        assert_eq!(n, 15);
    }

    #[test]
    fn recovery_of_empty_set_is_zero() {
        assert_eq!(recover_counter(SequenceKind::Return, [].iter().copied()), 0);
    }
}
