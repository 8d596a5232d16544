use std::fmt;

use thiserror::Error;

use crate::job::{ComponentId, ComponentKind};

/// Raised by a component implementation while initializing, processing a
/// row or producing its result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ComponentError {
    message: String,
}

impl ComponentError {
    /// Creates a new component error with the given message
    pub fn new<S: Into<String>>(message: S) -> Self {
        ComponentError { message: message.into() }
    }

    /// The error message
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl From<String> for ComponentError {
    fn from(message: String) -> Self {
        ComponentError { message }
    }
}

impl<'a> From<&'a str> for ComponentError {
    fn from(message: &'a str) -> Self {
        ComponentError { message: message.to_owned() }
    }
}

/// Raised by a row source while querying or iterating rows.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    /// The source has no table by that name
    #[error("no such table: {0}")]
    NoSuchTable(String),

    /// The table has no column by that name
    #[error("no such column: {table}.{column}")]
    NoSuchColumn {
        /// Table queried
        table: String,
        /// Column missing from it
        column: String,
    },

    /// Reading failed
    #[error("row source failure: {0}")]
    Io(String),
}

/// Problems in the job graph or its configuration.  These are always
/// detected before a single row is read.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// A requirement names a component that is not a filter
    #[error("requirement of {component} refers to {filter}, which is not a filter in this job")]
    MissingFilter {
        /// Component declaring the requirement
        component: String,
        /// The id it refers to
        filter: ComponentId,
    },

    /// A requirement names a category its filter does not declare
    #[error("requirement of {component} refers to unknown category '{category}' of filter {filter}")]
    UnknownCategory {
        /// Component declaring the requirement
        component: String,
        /// Name of the filter
        filter: String,
        /// The undeclared category
        category: String,
    },

    /// A column id outside the job
    #[error("column {0} does not exist in this job")]
    MissingColumn(usize),

    /// Requirements or inputs form a cycle
    #[error("cyclic dependency involving component {0}")]
    Cycle(String),

    /// A component without input columns
    #[error("component {component} has no input columns, but {kind} components require input")]
    MissingInput {
        /// Offending component
        component: String,
        /// Its kind
        kind: ComponentKind,
    },

    /// A non-transformer declares output columns
    #[error("only transformers may declare output columns, but {0} does")]
    UnexpectedOutput(String),

    /// A component reads from more than one table
    #[error("component {component} consumes columns from several tables: {tables:?}")]
    MultipleTables {
        /// Offending component
        component: String,
        /// Tables it reads from
        tables: Vec<String>,
    },

    /// No source column is reachable from a component
    #[error("cannot determine the source table of component {0}")]
    NoTable(String),

    /// A descriptor name is registered twice
    #[error("descriptor '{0}' is already registered")]
    DuplicateDescriptor(String),

    /// A descriptor name is not in the registry
    #[error("no descriptor named '{0}' is registered")]
    UnknownDescriptor(String),

    /// A property value cannot be used
    #[error("invalid property '{property}' for {component}: {reason}")]
    InvalidProperty {
        /// Component the property belongs to
        component: String,
        /// Property key
        property: String,
        /// What is wrong with the value
        reason: String,
    },

    /// A descriptor's factory failed
    #[error("failed to instantiate {component}: {reason}")]
    Instantiation {
        /// Component being instantiated
        component: String,
        /// Message of the factory's error
        reason: String,
    },

    /// The job cannot be split into slave jobs
    #[error("job is not distributable: {0}")]
    NotDistributable(String),
}

/// A single entry in the error list of an execution handle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalysisError {
    /// A component raised while processing a row
    #[error("{kind} '{component}' failed on row {row:?}: {source}")]
    Component {
        /// Name of the component
        component: String,
        /// Its kind
        kind: ComponentKind,
        /// Row being processed; `None` when producing a result
        row: Option<u64>,
        /// What the component raised
        #[source]
        source: ComponentError,
    },

    /// Secondary marker: work was skipped because an earlier error made
    /// its input untrustworthy
    #[error("a previous error has occurred, '{component}' was not executed (row {row:?})")]
    PreviousErrorsExist {
        /// What was skipped
        component: String,
        /// Row it was skipped on; `None` for a whole component
        row: Option<u64>,
    },

    /// A component failed to initialize
    #[error("failed to initialize '{component}': {source}")]
    Initialization {
        /// Name of the component
        component: String,
        /// What the hook raised
        #[source]
        source: ComponentError,
    },

    /// The row source failed
    #[error("reading table '{table}' failed: {source}")]
    Source {
        /// Table being read
        table: String,
        /// What the source raised
        #[source]
        source: SourceError,
    },

    /// A slave job could not be dispatched
    #[error("dispatching slave job {slave} failed: {message}")]
    Dispatch {
        /// Index of the slave
        slave: usize,
        /// Why dispatch failed
        message: String,
    },

    /// A reducer raised while merging partial results
    #[error("reduction of '{component}' failed: {source}")]
    Reduction {
        /// Name of the analyzer
        component: String,
        /// What the reducer raised
        #[source]
        source: ComponentError,
    },

    /// Anything else, such as a panic or an aborted table scan
    #[error("{0}")]
    Unknown(String),
}

impl AnalysisError {
    /// Whether this error is a secondary marker rather than a root cause
    pub fn is_previous_error_marker(&self) -> bool {
        match self {
            AnalysisError::PreviousErrorsExist { .. } => true,
            _ => false,
        }
    }
}

/// Returned when asking a failed, cancelled or unsupported execution for
/// its results.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum JobError {
    /// The execution is errornous
    #[error("job failed with {count} error(s), first: {first}")]
    Failed {
        /// Length of the error list
        count: usize,
        /// First root cause, or the first marker if there is none
        first: String,
    },

    /// The execution was cancelled before it failed
    #[error("job was cancelled")]
    Cancelled,

    /// The handle cannot perform the operation
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl JobError {
    /// Summarizes an error list into a single failure
    pub fn from_errors(errors: &[AnalysisError]) -> Self {
        let first = errors
            .iter()
            .find(|e| !e.is_previous_error_marker())
            .or_else(|| errors.first())
            .map(|e| e.to_string())
            .unwrap_or_else(|| "unknown".to_owned());
        JobError::Failed { count: errors.len(), first }
    }
}

impl fmt::Display for ComponentKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            ComponentKind::Filter => "filter",
            ComponentKind::Transformer => "transformer",
            ComponentKind::Analyzer => "analyzer",
            ComponentKind::Explorer => "explorer",
        };
        f.write_str(name)
    }
}
