//! sift
//!
//! `sift` executes analysis jobs: graphs of filters, transformers and
//! analyzers wired together by columns and by data-dependent requirements,
//! run against the rows of a tabular source.
//!
//! What is it?
//! ---
//!
//! A job is declared once with a `JobBuilder`.  Filters categorize each
//! row, and any component can require a filter outcome before it sees a
//! row.  Components that declare no requirement inherit one from the
//! components producing their inputs; where several branches converge the
//! inherited requirements are merged by union, so a component fed by both
//! the EVEN and the ODD branch of a filter still sees every row.
//!
//! Running a job returns immediately with an execution handle.  Rows are
//! read table by table and dispatched to the components on a worker pool,
//! errors are collected per row without stopping the scan, and every
//! analyzer produces one result at the end.
//!
//! Example
//! ---
//! ```rust
//! use std::sync::Arc;
//! use sift::{AnalysisResultFuture, AnalysisRunner, JobBuilder, MemoryRowSource, RunnerConfig, Value};
//! use sift::builtin::max_rows_descriptor;
//!
//! let source = MemoryRowSource::new().with_table(
//!     "people",
//!     &["name"],
//!     vec![vec![Value::from("ann")], vec![Value::from("bob")], vec![Value::from("cid")]],
//! );
//!
//! let mut builder = JobBuilder::new();
//! let name = builder.source_column("people", "name");
//! let first_two = builder
//!     .add_component(&max_rows_descriptor())
//!     .input(name)
//!     .property("max_rows", "2")
//!     .add();
//! let job = builder.build().unwrap();
//!
//! let runner = AnalysisRunner::new(RunnerConfig::single_threaded());
//! let future = runner.run(Arc::new(job), Arc::new(source)).unwrap();
//! assert!(future.is_successful());
//! # let _ = first_two;
//! ```

#![warn(missing_docs)]

#[macro_use]
extern crate log;

/// Built-in components
pub mod builtin;

/// Component traits, descriptors and the registry
pub mod component;

/// Error types
pub mod error;

/// Execution handles
pub mod future;

/// The job graph model
pub mod job;

/// Progress and error callbacks
pub mod listener;

pub mod optimizer;

/// Per-table row processing
pub mod publisher;

/// Requirement resolution
pub mod requirement;

/// Values, rows and row sources
pub mod row;

/// Analysis runner and its configuration
pub mod runner;

/// Task runners
pub mod scheduler;

/// Units of work
pub mod task;

/// Internal dependency graph
mod graph;

#[cfg(any(test, feature = "testkit"))]
pub mod testkit;

pub use crate::component::{
    Analyzer, AnalyzerResult, ComponentDescriptor, ComponentRegistry, Filter, Lifecycle, Properties, Reducer,
    ResultRef, Transformer,
};
pub use crate::error::{AnalysisError, ComponentError, ConfigError, JobError, SourceError};
pub use crate::future::{AnalysisResultFuture, AnalysisResults, ExecutionId, JobStatus, LocalResultFuture};
pub use crate::job::{ColumnId, ComponentId, ComponentKey, ComponentKind, FilterOutcome, Job, JobBuilder, Requirement};
pub use crate::listener::{AnalysisListener, CompositeAnalysisListener, LoggingAnalysisListener};
pub use crate::requirement::EffectiveRequirement;
pub use crate::row::{InputRow, MemoryRowSource, Query, Record, Row, RowSource, Value};
pub use crate::runner::{AnalysisRunner, RunnerConfig};
