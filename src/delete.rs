//! Outcomes of delete operations.

use std::fmt;
use std::iter::Sum;
use std::ops::Add;

use serde::Serialize;

/// Outcome of deleting a single object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeleteResult {
    Success,
    Failure,
}

impl DeleteResult {
    pub fn is_success(self) -> bool {
        matches!(self, DeleteResult::Success)
    }
}

/// Aggregated counts of deleted and failed objects.
///
/// Summaries only change through [`DeleteSummary::add`] (or `+`), which is
/// associative and commutative with [`DeleteSummary::EMPTY`] as identity, so any
/// reduction order over a batch yields the same totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct DeleteSummary {
    deleted: u64,
    failed: u64,
}

impl DeleteSummary {
    pub const EMPTY: DeleteSummary = DeleteSummary {
        deleted: 0,
        failed: 0,
    };

    pub const fn of(deleted: u64, failed: u64) -> Self {
        Self { deleted, failed }
    }

    pub fn deleted_count(&self) -> u64 {
        self.deleted
    }

    pub fn failed_count(&self) -> u64 {
        self.failed
    }

    pub fn total(&self) -> u64 {
        self.deleted + self.failed
    }

    #[must_use]
    pub fn add(self, other: DeleteSummary) -> Self {
        Self {
            deleted: self.deleted + other.deleted,
            failed: self.failed + other.failed,
        }
    }

    #[must_use]
    pub fn add_result(self, result: DeleteResult) -> Self {
        self.add(result.into())
    }
}

impl From<DeleteResult> for DeleteSummary {
    fn from(result: DeleteResult) -> Self {
        match result {
            DeleteResult::Success => DeleteSummary::of(1, 0),
            DeleteResult::Failure => DeleteSummary::of(0, 1),
        }
    }
}

impl Add for DeleteSummary {
    type Output = DeleteSummary;

    fn add(self, rhs: DeleteSummary) -> DeleteSummary {
        DeleteSummary::add(self, rhs)
    }
}

impl Add<DeleteResult> for DeleteSummary {
    type Output = DeleteSummary;

    fn add(self, rhs: DeleteResult) -> DeleteSummary {
        self.add_result(rhs)
    }
}

impl Sum for DeleteSummary {
    fn sum<I: Iterator<Item = DeleteSummary>>(iter: I) -> Self {
        iter.fold(DeleteSummary::EMPTY, DeleteSummary::add)
    }
}

impl Sum<DeleteResult> for DeleteSummary {
    fn sum<I: Iterator<Item = DeleteResult>>(iter: I) -> Self {
        iter.fold(DeleteSummary::EMPTY, DeleteSummary::add_result)
    }
}

impl fmt::Display for DeleteSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} deleted, {} failed", self.deleted, self.failed)
    }
}
