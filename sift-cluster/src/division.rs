use sift::Job;

use crate::error::ClusterError;

/// Decides how many slave jobs a job is split into.
///
/// The distributed runner never splits a job with no expected rows, nor
/// into more slaves than there are rows, whatever the manager answers.
pub trait JobDivisionManager: Send + Sync {
    /// Number of slaves wanted for `job` over `expected_rows` rows
    fn division_count(&self, job: &Job, expected_rows: u64) -> usize;
}

/// Always the same number of slaves, e.g. one per worker node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedDivisionManager {
    count: usize,
}

impl FixedDivisionManager {
    /// Splits every job into `count` slaves; `count` must be positive
    pub fn new(count: i64) -> Result<Self, ClusterError> {
        if count <= 0 {
            return Err(ClusterError::InvalidDivisionCount(count));
        }
        Ok(FixedDivisionManager { count: count as usize })
    }

    /// The configured count
    pub fn count(&self) -> usize {
        self.count
    }
}

impl JobDivisionManager for FixedDivisionManager {
    fn division_count(&self, _job: &Job, _expected_rows: u64) -> usize {
        self.count
    }
}

/// One slave per `rows_per_division` rows, capped at `max_divisions`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowCountDivisionManager {
    rows_per_division: u64,
    max_divisions: usize,
}

impl RowCountDivisionManager {
    /// Both arguments must be positive
    pub fn new(rows_per_division: u64, max_divisions: i64) -> Result<Self, ClusterError> {
        if max_divisions <= 0 {
            return Err(ClusterError::InvalidDivisionCount(max_divisions));
        }
        if rows_per_division == 0 {
            return Err(ClusterError::InvalidDivisionCount(0));
        }
        Ok(RowCountDivisionManager { rows_per_division, max_divisions: max_divisions as usize })
    }
}

impl JobDivisionManager for RowCountDivisionManager {
    fn division_count(&self, _job: &Job, expected_rows: u64) -> usize {
        let wanted = (expected_rows + self.rows_per_division - 1) / self.rows_per_division;
        (wanted as usize).max(1).min(self.max_divisions)
    }
}
