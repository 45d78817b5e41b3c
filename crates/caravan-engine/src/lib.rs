//! Orchestration core of the caravan installer.
//!
//! This crate is a pure decision engine: given a stream of job
//! completions it produces a stream of new jobs and a terminal
//! success/failure verdict. It owns the global view of every
//! distribution under consideration and drives each through
//! resolve → fetch → configure → install while honoring dependency
//! constraints, version ranges, alternate sources, and the modules
//! already present in the target environment.
//!
//! The pieces:
//! - [`master::Master`]: the scheduler/state machine
//! - [`job`]: work items and results crossing the worker boundary
//! - [`dist`]: per-distribution pipeline state
//! - [`cycle`]: circular-dependency detection for the terminal report
//! - [`env`]: installed-module oracle, core inventory, configuration
//! - [`report`]: pluggable log sink for DONE/FAIL/WARN records
//! - [`pool`]: serial and threaded drive loops

pub mod cycle;
pub mod dist;
pub mod env;
pub mod job;
pub mod master;
pub mod pool;
pub mod report;

pub use cycle::CircularDependency;
pub use dist::{DistData, DistMeta, Distribution, Phase, PhaseRequirements, Provide, Source};
pub use env::{CoreInventory, EmptyEnvironment, InstalledInfo, InstalledOracle, MasterConfig, StaticEnvironment};
pub use job::{GitSpec, Job, JobKind, JobOutcome, JobResult, JobType};
pub use master::{FailureReport, InstalledQuery, Master, Satisfaction, Status, ROOT_DISTFILE};
pub use pool::{drive, run, Worker};
pub use report::{MemoryReporter, Outcome, Reporter, ResultLine, TracingReporter};
