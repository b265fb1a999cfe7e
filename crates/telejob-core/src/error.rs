use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by the job controller and its jobs.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("command error: {0}")]
    Command(String),

    #[error("job not found: {0:?}")]
    NotFound(String),

    #[error("unauthorized: owner {owner:?} does not have access to job {id:?}")]
    Unauthorized { owner: String, id: String },

    #[error("already shut down")]
    Shutdown,

    #[error("cannot set up cgroup {}: {source}", .path.display())]
    CgroupSetup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot write cgroup file {}: {source}", .path.display())]
    CgroupWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot delete cgroup {}: {source}", .path.display())]
    CgroupDelete {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("cannot stop job {id:?}: {source}")]
    Stop {
        id: String,
        #[source]
        source: io::Error,
    },

    #[error("log reader cancelled")]
    ReaderCancelled,

    #[error("shutdown finished with {} error(s): {}", .0.len(), join(.0))]
    StopAll(Vec<JobError>),
}

fn join(errors: &[JobError]) -> String {
    errors
        .iter()
        .map(|err| err.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}
