use serde::{Deserialize, Serialize};

/// Signing performance of one validator over a window of blocks.
///
/// This is always recomputed from stored blocks and never persisted on its
/// own, so out-of-order block arrival cannot make it drift.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct SignatureInfo {
    /// Blocks carrying a commit signature from the validator.
    pub signed: i64,
    /// Blocks where the validator was active but left no record at all.
    pub no_signature: i64,
    /// Blocks where the validator left an explicit non-commit flag.
    pub not_signed: i64,
    /// Blocks where the validator was outside the active set.
    pub not_active: i64,
    /// Blocks proposed by the validator.
    pub proposed: i64,
}

impl SignatureInfo {
    /// Blocks the validator was expected to sign but did not.
    pub fn missed(&self) -> i64 {
        self.not_signed + self.no_signature
    }

    /// Blocks in the window the validator was part of the active set for.
    pub fn active(&self) -> i64 {
        self.signed + self.missed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missed_counts_both_kinds_of_non_signature() {
        let info = SignatureInfo {
            signed: 90,
            no_signature: 3,
            not_signed: 7,
            not_active: 0,
            proposed: 1,
        };
        assert_eq!(info.missed(), 10);
        assert_eq!(info.active(), 100);
    }
}
