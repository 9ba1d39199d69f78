use tracing::debug;

use super::allocation::AllocationState;
use super::backend::{BackendError, SaccoBackend};
use super::domain::{GuarantorCandidate, MemberSession, Money};

/// Fetches and caches the set of members able to guarantee the requested
/// amount. The cache is keyed on the amount, so asking again for an
/// unchanged amount never repeats the network call.
#[derive(Debug, Default)]
pub struct GuarantorPoolResolver {
    fetched_for: Option<Money>,
    candidates: Vec<GuarantorCandidate>,
}

impl GuarantorPoolResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure the cached pool matches `amount`, fetching when it does not.
    /// An empty result is a valid pool, not an error.
    pub async fn refresh<B: SaccoBackend>(
        &mut self,
        backend: &B,
        session: &MemberSession,
        amount: Money,
    ) -> Result<(), BackendError> {
        if self.fetched_for == Some(amount) {
            debug!(amount, "guarantor pool already current");
            return Ok(());
        }

        let candidates = backend.list_eligible_guarantors(session, amount).await?;
        debug!(amount, count = candidates.len(), "guarantor pool refreshed");
        self.fetched_for = Some(amount);
        self.candidates = candidates;
        Ok(())
    }

    /// Candidates open for new selection: anyone already pledged is filtered
    /// out, so a member can never appear in the pool and the pledge set at
    /// once.
    pub fn available(&self, allocation: &AllocationState) -> Vec<GuarantorCandidate> {
        self.candidates
            .iter()
            .filter(|candidate| !allocation.contains(&candidate.id))
            .cloned()
            .collect()
    }

    /// Look a candidate up by id, regardless of selection state.
    pub fn find(&self, id: &str) -> Option<&GuarantorCandidate> {
        self.candidates.iter().find(|candidate| candidate.id.0 == id)
    }

    /// Drop the cache, forcing the next `refresh` to hit the backend.
    pub fn invalidate(&mut self) {
        self.fetched_for = None;
        self.candidates.clear();
    }
}
