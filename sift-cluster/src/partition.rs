/// The rows one slave processes, 1-based; `max_rows` of `None` reads to
/// the end of the table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowRange {
    /// First row, 1-based
    pub first_row: u64,
    /// Number of rows; `None` for the last slave
    pub max_rows: Option<u64>,
}

/// Clamps a requested slave count to what `expected_rows` can feed: at
/// least one slave, and never more slaves than rows.
pub fn effective_divisions(requested: usize, expected_rows: u64) -> usize {
    if expected_rows == 0 {
        return 1;
    }
    let cap = if expected_rows > usize::max_value() as u64 { usize::max_value() } else { expected_rows as usize };
    requested.max(1).min(cap)
}

/// Splits `expected_rows` evenly over `divisions` slaves.  The last slave
/// is unbounded so it absorbs the remainder and any rows added since
/// counting.
pub fn row_ranges(expected_rows: u64, divisions: usize) -> Vec<RowRange> {
    let divisions = effective_divisions(divisions, expected_rows);
    let per_slave = expected_rows / divisions as u64;
    (0..divisions)
        .map(|i| RowRange {
            first_row: 1 + i as u64 * per_slave,
            max_rows: if i + 1 == divisions { None } else { Some(per_slave) },
        })
        .collect()
}
