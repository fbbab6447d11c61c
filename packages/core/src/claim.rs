//! Outcome of a single claim attempt.

/// Result of one attempt to claim a record. Internal to the claim protocol;
/// the queue facade never exposes it.
#[derive(Debug, Clone, PartialEq)]
pub enum ClaimResult<R> {
    /// The record was acquired and mutated; holds its pre-mutation contents.
    Claimed(R),
    /// Nothing matched the eligibility predicate.
    NoneEligible,
    /// Eligible records exist but another claimant holds them.
    Busy,
}

impl<R> ClaimResult<R> {
    pub fn is_busy(&self) -> bool {
        matches!(self, ClaimResult::Busy)
    }
}
