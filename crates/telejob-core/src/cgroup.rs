//! Minimal cgroup v2 helpers for per-job resource limits.
//!
//! Jobs run under a dedicated parent cgroup (one per controller). Each job
//! gets its own child cgroup with `cpu.max`, `memory.max` and `io.max`
//! applied before the process is spawned into it.

use std::fs;
use std::io;
use std::path::Path;
use std::time::Duration;

use tracing::{error, info};

use telejob_model::Limits;

use crate::error::JobError;

/// Controllers enabled on the parent cgroup for all job cgroups.
const SUBTREE_CONTROLLERS: &str = "+cpu +io +memory";

const DELETE_RETRIES: u32 = 3;
const DELETE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Creates the parent cgroup and enables the cpu, io and memory controllers
/// for its children.
///
/// The parent is expected to be unique per controller instance, so an
/// already existing directory is an error.
pub(crate) fn create_root(root: &Path) -> Result<(), JobError> {
    mkdir(root).map_err(|source| JobError::CgroupSetup {
        path: root.to_path_buf(),
        source,
    })?;
    let control = root.join("cgroup.subtree_control");
    fs::write(&control, SUBTREE_CONTROLLERS).map_err(|source| JobError::CgroupSetup {
        path: control,
        source,
    })
}

/// Creates a job cgroup under the parent and applies the given limits.
///
/// A failed limit write rolls the fresh directory back so no half-configured
/// cgroup is left behind.
pub(crate) fn create_job_cgroup(cgroup: &Path, limits: &Limits) -> Result<(), JobError> {
    mkdir(cgroup).map_err(|source| JobError::CgroupSetup {
        path: cgroup.to_path_buf(),
        source,
    })?;
    if let Err(err) = apply_limits(cgroup, limits) {
        delete_best_effort(cgroup);
        return Err(err);
    }
    Ok(())
}

fn apply_limits(cgroup: &Path, limits: &Limits) -> Result<(), JobError> {
    if limits.cpus > 0.0 {
        write_file(cgroup, "cpu.max", &cpu_max_contents(limits.cpus))?;
    }
    if limits.memory_kib > 0 {
        write_file(cgroup, "memory.max", &memory_max_contents(limits.memory_kib))?;
    }
    // Each io.max line is an independent apply, one write per device.
    for io_limit in &limits.io {
        write_file(cgroup, "io.max", io_limit)?;
    }
    Ok(())
}

/// Sends SIGKILL to every process still in the cgroup, including
/// grandchildren, via the kernel's `cgroup.kill` interface.
pub(crate) fn kill_all(cgroup: &Path) -> Result<(), JobError> {
    write_file(cgroup, "cgroup.kill", "1")
}

/// Removes the cgroup directory. A missing directory is not an error.
pub(crate) fn delete_cgroup(cgroup: &Path) -> Result<(), JobError> {
    match fs::remove_dir(cgroup) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(JobError::CgroupDelete {
            path: cgroup.to_path_buf(),
            source,
        }),
    }
}

/// Removes the cgroup directory, logging instead of failing.
///
/// Used on cleanup paths where the original error is the one worth
/// reporting.
pub(crate) fn delete_best_effort(cgroup: &Path) {
    if let Err(err) = delete_cgroup(cgroup) {
        error!(cgroup = %cgroup.display(), %err, "cgroup cleanup failed");
    }
}

/// Removes the cgroup directory, retrying while the kernel reports it busy.
///
/// Processes in the cgroup can take a moment to be torn down after a kill,
/// during which `rmdir` fails with EBUSY. Retries are spaced by a constant
/// delay. Exhausting the retries leaks the directory and logs an error.
pub(crate) async fn delete_cgroup_with_retry(cgroup: &Path, id: &str) {
    for attempt in 1..=DELETE_RETRIES {
        match delete_cgroup(cgroup) {
            Ok(()) => {
                if attempt > 1 {
                    info!(id, attempt, "job cgroup removed after retry");
                }
                return;
            }
            Err(err) if is_busy(&err) => {
                info!(id, attempt, %err, "job cgroup busy, retrying removal");
                tokio::time::sleep(DELETE_RETRY_DELAY).await;
            }
            Err(err) => {
                error!(id, %err, "cannot delete job cgroup");
                return;
            }
        }
    }
    error!(id, retries = DELETE_RETRIES, "cannot delete job cgroup after retries");
}

fn is_busy(err: &JobError) -> bool {
    match err {
        JobError::CgroupDelete { source, .. } => source.raw_os_error() == Some(libc::EBUSY),
        _ => false,
    }
}

fn mkdir(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::DirBuilderExt;

    let mut builder = fs::DirBuilder::new();
    builder.mode(0o750);
    builder.create(path)
}

fn write_file(cgroup: &Path, name: &str, contents: &str) -> Result<(), JobError> {
    let path = cgroup.join(name);
    fs::write(&path, contents).map_err(|source| JobError::CgroupWrite { path, source })
}

/// `cpu.max` payload for a fractional CPU share. The kernel default period
/// of 100000us is kept, so only the quota is written.
fn cpu_max_contents(cpus: f64) -> String {
    format!("{}\n", (cpus * 100_000.0) as u64)
}

fn memory_max_contents(memory_kib: u64) -> String {
    format!("{}\n", memory_kib * 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cpu_max_half_core() {
        assert_eq!(cpu_max_contents(0.5), "50000\n");
    }

    #[test]
    fn cpu_max_truncates() {
        assert_eq!(cpu_max_contents(1.999999), "199999\n");
    }

    #[test]
    fn memory_max_in_bytes() {
        assert_eq!(memory_max_contents(1000), "1024000\n");
    }

    #[test]
    fn delete_missing_cgroup_is_ok() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("gone");
        assert!(delete_cgroup(&missing).is_ok());
    }

    #[test]
    fn create_root_rejects_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("jobs");

        create_root(&root).unwrap();
        let err = create_root(&root).unwrap_err();
        assert!(matches!(err, JobError::CgroupSetup { .. }));
    }

    #[test]
    fn job_cgroup_without_limits_creates_plain_directory() {
        let dir = tempfile::tempdir().unwrap();
        let cgroup = dir.path().join("1");

        create_job_cgroup(&cgroup, &Limits::default()).unwrap();
        assert!(cgroup.is_dir());
    }
}
