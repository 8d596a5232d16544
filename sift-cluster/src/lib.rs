//! sift-cluster
//! ---
//! Splits a `sift` analysis job into row ranges, runs each range as a slave
//! job and merges the partial analyzer results back into one.
//!
//! What is it?
//! ---
//! A `DistributedAnalysisRunner` asks a `JobDivisionManager` how many slaves
//! to use, restricts a copy of the job to one row range per slave, encodes
//! it and hands it to a `ClusterManager`.  The returned handle behaves like
//! a local one: once every slave is done, each analyzer's partial results
//! are matched by structural key and merged with the analyzer's reducer.
//!
//! `VirtualClusterManager` runs the slaves in this process, which is what
//! tests and single-machine deployments use.
//!
//! Example
//! ---
//! ```rust
//! use std::sync::Arc;
//! use sift::{AnalysisResultFuture, ComponentRegistry, JobBuilder, MemoryRowSource, RowSource, Value};
//! use sift_cluster::{DistributedAnalysisRunner, FixedDivisionManager, VirtualClusterManager};
//!
//! let rows = (0..10i64).map(|i| vec![Value::Int(i)]).collect();
//! let source: Arc<dyn RowSource> = Arc::new(MemoryRowSource::new().with_table("t", &["n"], rows));
//!
//! let mut builder = JobBuilder::new();
//! let n = builder.source_column("t", "n");
//! builder.add_component(&sift::builtin::max_rows_descriptor()).input(n).add();
//! let job = Arc::new(builder.build().unwrap());
//!
//! let cluster = VirtualClusterManager::new(Arc::new(ComponentRegistry::with_builtins()), source.clone());
//! let runner = DistributedAnalysisRunner::new(Arc::new(cluster), Arc::new(FixedDivisionManager::new(3).unwrap()));
//! let future = runner.run(job, &*source).unwrap();
//! assert!(future.is_successful());
//! ```

#![warn(missing_docs)]

#[macro_use]
extern crate log;
#[macro_use]
extern crate serde_derive;

/// Dispatching slave jobs
pub mod cluster;

/// Choosing the number of slaves
pub mod division;

/// Errors of distributed execution
pub mod error;

/// Row ranges per slave
pub mod partition;

/// Merging slave results
pub mod reducer;

/// The distributed runner
pub mod runner;

/// Wire form of slave jobs
pub mod serial;

pub use crate::cluster::{ClusterManager, DistributedJobContext, VirtualClusterManager};
pub use crate::division::{FixedDivisionManager, JobDivisionManager, RowCountDivisionManager};
pub use crate::error::ClusterError;
pub use crate::partition::RowRange;
pub use crate::reducer::DistributedResultFuture;
pub use crate::runner::DistributedAnalysisRunner;
pub use crate::serial::JobSpec;
