//! In-process job management for the telejob service.
//!
//! The [`Controller`] starts arbitrary commands inside dedicated cgroup v2
//! subtrees, tracks their status, terminates them with a kernel-enforced
//! kill and reaps them. Each job's merged stdout and stderr is retained in
//! full and served to any number of concurrent [`LogReader`]s.

mod error;
pub use error::JobError;

mod cgroup;

mod logs;
pub use logs::LogReader;

mod job;

mod controller;
pub use controller::{Controller, ControllerConfig};
