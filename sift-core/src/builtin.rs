//! Components shipped with the engine.

use std::sync::Arc;

use crate::component::{ComponentDescriptor, Filter, Lifecycle, Properties};
use crate::error::ComponentError;
use crate::row::{InputRow, Query};

/// Descriptor name of `MaxRowsFilter`
pub const MAX_ROWS_FILTER: &str = "max-rows";
/// Property: first row let through, 1-based.  Defaults to 1.
pub const FIRST_ROW: &str = "first_row";
/// Property: number of rows let through.  Unbounded if absent.
pub const MAX_ROWS: &str = "max_rows";
/// Category of rows inside the window
pub const VALID: &str = "VALID";
/// Category of rows outside the window
pub const INVALID: &str = "INVALID";

/// Lets through a window of rows, by physical row id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaxRowsFilter {
    first_row: u64,
    max_rows: Option<u64>,
}

impl MaxRowsFilter {
    /// Window starting at `first_row`; 0 is treated as 1
    pub fn new(first_row: u64, max_rows: Option<u64>) -> Self {
        MaxRowsFilter { first_row: first_row.max(1), max_rows }
    }

    /// Reads `FIRST_ROW` and `MAX_ROWS`
    pub fn from_properties(properties: &Properties) -> Result<Self, ComponentError> {
        let parse = |key: &str| -> Result<Option<u64>, ComponentError> {
            match properties.get(key) {
                None => Ok(None),
                Some(v) => v
                    .trim()
                    .parse::<u64>()
                    .map(Some)
                    .map_err(|e| ComponentError::new(format!("invalid {} '{}': {}", key, v, e))),
            }
        };
        let first_row = parse(FIRST_ROW)?.unwrap_or(1);
        if first_row == 0 {
            return Err(ComponentError::new("first_row is 1-based"));
        }
        Ok(MaxRowsFilter::new(first_row, parse(MAX_ROWS)?))
    }

    /// First row let through
    pub fn first_row(&self) -> u64 {
        self.first_row
    }

    /// Size of the window
    pub fn max_rows(&self) -> Option<u64> {
        self.max_rows
    }

    fn accepts(&self, id: u64) -> bool {
        id >= self.first_row && self.max_rows.map_or(true, |m| id - self.first_row < m)
    }
}

impl Lifecycle for MaxRowsFilter {}

impl Filter for MaxRowsFilter {
    fn categorize(&self, row: &InputRow) -> Result<String, ComponentError> {
        let category = if self.accepts(row.id()) { VALID } else { INVALID };
        Ok(category.to_owned())
    }

    fn optimize_query(&self, query: &Query, category: &str) -> Option<Query> {
        if category != VALID {
            return None;
        }
        Some(query.clone().restrict(self.first_row, self.max_rows))
    }
}

/// Descriptor of `MaxRowsFilter`, registered by
/// `ComponentRegistry::with_builtins`
pub fn max_rows_descriptor() -> Arc<ComponentDescriptor> {
    let descriptor = ComponentDescriptor::filter(MAX_ROWS_FILTER, &[VALID, INVALID], MaxRowsFilter::from_properties)
        .concurrent(true)
        .query_optimizable(true);
    Arc::new(descriptor)
}
