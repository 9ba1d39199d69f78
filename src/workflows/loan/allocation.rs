//! Guarantor allocation: a pledge set whose percentages must reach exactly
//! 100% without exceeding any guarantor's own ceiling. Every mutation either
//! applies fully or leaves the prior state intact.

use serde::Serialize;

use super::domain::{GuarantorCandidate, GuarantorPledge, MemberId, PERCENT_EPSILON};

/// Rejection raised by an allocation command. The two cap violations stay
/// distinct because they call for different corrections from the user.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AllocationError {
    #[error("{name} is already pledged on this application")]
    DuplicateGuarantor { name: String },
    #[error("{name} cannot guarantee more than {cap}% of this loan")]
    ExceedsOwnCap { name: String, cap: f64 },
    #[error("total coverage cannot exceed 100%; only {headroom}% remains unallocated")]
    ExceedsTotalCap { headroom: f64 },
    #[error("guarantee percentage must be greater than zero")]
    InvalidPercentage,
    #[error("no pledge found for guarantor {id}")]
    UnknownGuarantor { id: String },
}

/// The live pledge set. `total_percentage` is always derived from the
/// pledges, never stored, so readiness can never go stale.
#[derive(Debug, Clone, Default, Serialize)]
pub struct AllocationState {
    pledges: Vec<GuarantorPledge>,
}

impl AllocationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pledges(&self) -> &[GuarantorPledge] {
        &self.pledges
    }

    pub fn is_empty(&self) -> bool {
        self.pledges.is_empty()
    }

    pub fn contains(&self, id: &MemberId) -> bool {
        self.pledges.iter().any(|pledge| &pledge.candidate.id == id)
    }

    pub fn total_percentage(&self) -> f64 {
        self.pledges.iter().map(|pledge| pledge.percentage).sum()
    }

    /// Coverage still unallocated, floored at zero.
    pub fn remaining_percentage(&self) -> f64 {
        (100.0 - self.total_percentage()).max(0.0)
    }

    /// Submission is permitted only for a non-empty set summing to exactly
    /// 100% within [`PERCENT_EPSILON`].
    pub fn can_submit(&self) -> bool {
        !self.pledges.is_empty() && (self.total_percentage() - 100.0).abs() < PERCENT_EPSILON
    }

    /// Select a candidate. The default pledge is the largest percentage that
    /// honors both the candidate's own ceiling and the global 100% ceiling,
    /// so repeated adds converge toward full coverage without manual
    /// arithmetic. Returns the assigned default.
    pub fn add(&mut self, candidate: GuarantorCandidate) -> Result<f64, AllocationError> {
        if self.contains(&candidate.id) {
            return Err(AllocationError::DuplicateGuarantor {
                name: candidate.full_name,
            });
        }

        // A pledge must carry a positive percentage; with no headroom left
        // there is nothing for a new guarantor to cover.
        let headroom = self.remaining_percentage();
        if headroom < PERCENT_EPSILON {
            return Err(AllocationError::ExceedsTotalCap { headroom: 0.0 });
        }

        let assigned = candidate.maximum_percentage.min(headroom);
        self.pledges.push(GuarantorPledge {
            candidate,
            percentage: assigned,
        });
        Ok(assigned)
    }

    /// Drop a pledge. Remaining pledges are left exactly as they are; the
    /// user reallocates the freed headroom explicitly.
    pub fn remove(&mut self, id: &MemberId) -> Result<GuarantorCandidate, AllocationError> {
        let position = self
            .pledges
            .iter()
            .position(|pledge| &pledge.candidate.id == id)
            .ok_or_else(|| AllocationError::UnknownGuarantor { id: id.0.clone() })?;

        Ok(self.pledges.remove(position).candidate)
    }

    /// Set a pledge's percentage. Rejections leave the prior value intact and
    /// name the specific violated ceiling.
    pub fn set_percentage(&mut self, id: &MemberId, value: f64) -> Result<(), AllocationError> {
        let position = self
            .pledges
            .iter()
            .position(|pledge| &pledge.candidate.id == id)
            .ok_or_else(|| AllocationError::UnknownGuarantor { id: id.0.clone() })?;

        if value <= 0.0 {
            return Err(AllocationError::InvalidPercentage);
        }

        let candidate = &self.pledges[position].candidate;
        if value > candidate.maximum_percentage + PERCENT_EPSILON {
            return Err(AllocationError::ExceedsOwnCap {
                name: candidate.full_name.clone(),
                cap: candidate.maximum_percentage,
            });
        }

        let others_total: f64 = self
            .pledges
            .iter()
            .enumerate()
            .filter(|(index, _)| *index != position)
            .map(|(_, pledge)| pledge.percentage)
            .sum();
        if others_total + value > 100.0 + PERCENT_EPSILON {
            return Err(AllocationError::ExceedsTotalCap {
                headroom: (100.0 - others_total).max(0.0),
            });
        }

        self.pledges[position].percentage = value;
        Ok(())
    }
}
