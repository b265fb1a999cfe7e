use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info};

use telejob_model::{Limits, Status};

use crate::cgroup;
use crate::error::JobError;
use crate::job::{self, Job};
use crate::logs::LogReader;

const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup/telejob";

/// Configuration for a [`Controller`].
#[derive(Debug, Clone)]
pub struct ControllerConfig {
    /// Parent cgroup under which every job cgroup is created.
    pub cgroup_root: PathBuf,
    /// Resource limits applied to each job.
    pub limits: Limits,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            cgroup_root: PathBuf::from(DEFAULT_CGROUP_ROOT),
            limits: Limits::default(),
        }
    }
}

/// Registry and lifecycle manager for jobs.
///
/// Jobs are keyed by a monotonically increasing decimal id and owned by the
/// caller that started them; only that owner may stop, query or observe a
/// job. The controller is safe to share across tasks.
pub struct Controller {
    registry: Mutex<Registry>,
    next_id: AtomicU64,
    cgroup_root: PathBuf,
    limits: Limits,
    reapers: TaskTracker,
}

struct Registry {
    jobs: HashMap<String, Arc<Job>>,
    shut_down: bool,
}

impl Controller {
    /// Creates a controller and its parent cgroup with the cpu, io and
    /// memory controllers enabled.
    pub fn new(config: ControllerConfig) -> Result<Self, JobError> {
        cgroup::create_root(&config.cgroup_root)?;
        Ok(Self {
            registry: Mutex::new(Registry {
                jobs: HashMap::new(),
                shut_down: false,
            }),
            next_id: AtomicU64::new(0),
            cgroup_root: config.cgroup_root,
            limits: config.limits,
            reapers: TaskTracker::new(),
        })
    }

    /// Starts a new job running `command` with `args` for `owner` and
    /// returns its id.
    ///
    /// The job executes within its own cgroup with the controller's limits
    /// applied. Ids start at 1 and are never reused.
    pub async fn start(
        &self,
        owner: &str,
        command: &str,
        args: &[String],
    ) -> Result<String, JobError> {
        if command.is_empty() {
            return Err(JobError::Command("empty command".to_string()));
        }
        if self.registry.lock().await.shut_down {
            return Err(JobError::Shutdown);
        }

        let id = (self.next_id.fetch_add(1, Ordering::Relaxed) + 1).to_string();
        let cgroup = self.cgroup_root.join(&id);
        let started = Job::start(owner, &id, command, args, &self.limits, cgroup)?;

        let mut registry = self.registry.lock().await;
        if registry.shut_down {
            // Shutdown won the race while the job was being created. Kill
            // the fresh process and let its reaper clean up the cgroup.
            if let Err(err) = started.job.stop() {
                error!(%id, %err, "cannot stop job spawned during shutdown");
            }
            self.reapers.spawn(job::reap(started.job, started.child));
            return Err(JobError::Shutdown);
        }
        registry.jobs.insert(id.clone(), started.job.clone());
        self.reapers.spawn(job::reap(started.job, started.child));
        debug!(%owner, %id, %command, "job started");
        Ok(id)
    }

    /// Stops the job with the given id by killing its process. Descendants
    /// are killed through the job cgroup when the job is reaped.
    pub async fn stop(&self, owner: &str, id: &str) -> Result<(), JobError> {
        self.get(owner, id).await?.stop()
    }

    /// Returns a snapshot of the job's status.
    pub async fn status(&self, owner: &str, id: &str) -> Result<Status, JobError> {
        Ok(self.get(owner, id).await?.status())
    }

    /// Subscribes a new log reader to the job's output, starting at byte
    /// zero. The cancel token ends the subscription.
    pub async fn logs(
        &self,
        owner: &str,
        id: &str,
        cancel: CancellationToken,
    ) -> Result<LogReader, JobError> {
        Ok(self.get(owner, id).await?.new_reader(cancel))
    }

    /// Stops all running jobs, waits for their reapers and removes the
    /// parent cgroup.
    ///
    /// Intended for shutdown: the registry lock is held for the whole run,
    /// and every later `start` is rejected. Errors are collected and
    /// returned together once cleanup is complete.
    pub async fn stop_all(&self) -> Result<(), JobError> {
        let mut registry = self.registry.lock().await;
        if registry.shut_down {
            info!("already shut down");
            return Ok(());
        }
        registry.shut_down = true;

        let mut errors = Vec::new();
        for job in registry.jobs.values() {
            if job.is_running() {
                if let Err(err) = job.stop() {
                    errors.push(err);
                }
            }
        }

        self.reapers.close();
        self.reapers.wait().await;

        if let Err(err) = cgroup::delete_cgroup(&self.cgroup_root) {
            errors.push(err);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(JobError::StopAll(errors))
        }
    }

    /// Looks a job up by id and verifies the caller owns it.
    async fn get(&self, owner: &str, id: &str) -> Result<Arc<Job>, JobError> {
        let registry = self.registry.lock().await;
        let job = registry
            .jobs
            .get(id)
            .ok_or_else(|| JobError::NotFound(id.to_string()))?;
        if job.owner() != owner {
            return Err(JobError::Unauthorized {
                owner: owner.to_string(),
                id: id.to_string(),
            });
        }
        Ok(job.clone())
    }
}
