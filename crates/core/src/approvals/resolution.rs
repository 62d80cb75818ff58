use serde::{Deserialize, Serialize};

use crate::domain::approval::ApprovalStrategy;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Resolution {
    Pending,
    Approved,
    Rejected,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Tally {
    pub approvals: usize,
    pub rejections: usize,
    /// Size of the eligible pool, fixed when the case was opened.
    pub pool_size: usize,
}

impl Tally {
    pub fn remaining(&self) -> usize {
        self.pool_size.saturating_sub(self.approvals + self.rejections)
    }
}

pub fn evaluate(strategy: ApprovalStrategy, min_approvals: u32, tally: Tally) -> Resolution {
    let min = min_approvals.max(1) as usize;
    match strategy {
        ApprovalStrategy::AnyOne => {
            if tally.rejections > 0 {
                Resolution::Rejected
            } else if tally.approvals > 0 {
                Resolution::Approved
            } else {
                Resolution::Pending
            }
        }
        ApprovalStrategy::Majority => evaluate_majority(min, tally),
        ApprovalStrategy::Unanimous => {
            if tally.rejections > 0 {
                Resolution::Rejected
            } else if tally.approvals >= tally.pool_size && tally.approvals >= min {
                Resolution::Approved
            } else {
                Resolution::Pending
            }
        }
    }
}

fn evaluate_majority(min: usize, tally: Tally) -> Resolution {
    let remaining = tally.remaining();
    if tally.approvals >= min && tally.approvals > tally.rejections {
        return Resolution::Approved;
    }
    if tally.approvals + remaining < min {
        return Resolution::Rejected;
    }
    if tally.rejections > remaining + tally.approvals {
        return Resolution::Rejected;
    }
    // Everyone voted and approvals never pulled ahead.
    if remaining == 0 {
        return Resolution::Rejected;
    }
    Resolution::Pending
}

#[cfg(test)]
mod tests {
    use super::{evaluate, Resolution, Tally};
    use crate::domain::approval::ApprovalStrategy::{AnyOne, Majority, Unanimous};

    fn tally(approvals: usize, rejections: usize, pool_size: usize) -> Tally {
        Tally { approvals, rejections, pool_size }
    }

    #[test]
    fn any_one_resolves_on_first_decisive_vote_regardless_of_pool() {
        assert_eq!(evaluate(AnyOne, 1, tally(0, 0, 12)), Resolution::Pending);
        assert_eq!(evaluate(AnyOne, 1, tally(1, 0, 12)), Resolution::Approved);
        assert_eq!(evaluate(AnyOne, 1, tally(0, 1, 12)), Resolution::Rejected);
    }

    #[test]
    fn majority_two_of_three_approves_without_third_vote() {
        assert_eq!(evaluate(Majority, 2, tally(1, 0, 3)), Resolution::Pending);
        assert_eq!(evaluate(Majority, 2, tally(2, 0, 3)), Resolution::Approved);
        assert_eq!(evaluate(Majority, 2, tally(2, 1, 3)), Resolution::Approved);
    }

    #[test]
    fn majority_rejects_once_quorum_is_unreachable() {
        assert_eq!(evaluate(Majority, 2, tally(0, 1, 3)), Resolution::Pending);
        assert_eq!(evaluate(Majority, 2, tally(0, 2, 3)), Resolution::Rejected);
        assert_eq!(evaluate(Majority, 3, tally(0, 1, 3)), Resolution::Rejected);
    }

    #[test]
    fn majority_rejects_when_rejections_outnumber_everything_else() {
        // 5 approvers, quorum 1: three rejections cannot be overturned by the remaining two.
        assert_eq!(evaluate(Majority, 1, tally(0, 3, 5)), Resolution::Rejected);
    }

    #[test]
    fn majority_tie_with_exhausted_pool_rejects() {
        assert_eq!(evaluate(Majority, 2, tally(2, 2, 4)), Resolution::Rejected);
    }

    #[test]
    fn unanimous_requires_every_approver() {
        assert_eq!(evaluate(Unanimous, 3, tally(2, 0, 3)), Resolution::Pending);
        assert_eq!(evaluate(Unanimous, 3, tally(3, 0, 3)), Resolution::Approved);
    }

    #[test]
    fn unanimous_single_reject_is_final_even_before_everyone_votes() {
        assert_eq!(evaluate(Unanimous, 3, tally(0, 1, 3)), Resolution::Rejected);
        assert_eq!(evaluate(Unanimous, 3, tally(2, 1, 3)), Resolution::Rejected);
    }
}
