use std::fs::File;
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use nix::errno::Errno;
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use telejob_model::{Limits, Status, TERMINATED_BY_SIGNAL};

use crate::cgroup;
use crate::error::JobError;
use crate::logs::{LogDispatcher, LogReader, LogSink};

/// A process with an owner and resource limits, in any execution state.
///
/// The job owns its cgroup directory and its log dispatcher. Mutable state
/// lives in the status snapshot behind a mutex held only for field updates
/// and snapshot reads.
pub(crate) struct Job {
    status: Mutex<Status>,
    id: String,
    owner: String,
    cgroup: PathBuf,
    pid: Pid,
    dispatcher: LogDispatcher,
}

/// A freshly spawned job together with the child handle its reaper needs.
pub(crate) struct StartedJob {
    pub(crate) job: Arc<Job>,
    pub(crate) child: Child,
}

impl Job {
    /// Creates the job cgroup, spawns the command into it and wires the
    /// process output into a new log dispatcher.
    ///
    /// On spawn failure the job cgroup is removed again and no job exists.
    pub(crate) fn start(
        owner: &str,
        id: &str,
        command: &str,
        args: &[String],
        limits: &Limits,
        cgroup: PathBuf,
    ) -> Result<StartedJob, JobError> {
        cgroup::create_job_cgroup(&cgroup, limits)?;

        // The directory descriptor lets the child enter the cgroup before
        // it execs. It is only needed until spawn returns; the kernel keeps
        // the membership alive afterwards.
        let dir = match File::open(&cgroup) {
            Ok(dir) => dir,
            Err(source) => {
                cgroup::delete_best_effort(&cgroup);
                return Err(JobError::CgroupSetup {
                    path: cgroup,
                    source,
                });
            }
        };

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        let cgroup_fd = dir.as_raw_fd();
        unsafe {
            cmd.pre_exec(move || enter_cgroup(cgroup_fd));
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(source) => {
                drop(dir);
                cgroup::delete_best_effort(&cgroup);
                return Err(JobError::Command(format!(
                    "cannot start command {command:?}: {source}"
                )));
            }
        };
        drop(dir);

        let Some(raw_pid) = child.id() else {
            // Unreachable for a child that has not been awaited yet.
            cgroup::delete_best_effort(&cgroup);
            return Err(JobError::Command(format!(
                "command {command:?} exited before it could be tracked"
            )));
        };

        let (dispatcher, sink) = LogDispatcher::start();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, sink.clone()));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, sink));
        }

        let job = Arc::new(Job {
            status: Mutex::new(Status::started_now(
                id.to_string(),
                command.to_string(),
                args.to_vec(),
            )),
            id: id.to_string(),
            owner: owner.to_string(),
            cgroup,
            pid: Pid::from_raw(raw_pid as i32),
            dispatcher,
        });
        Ok(StartedJob { job, child })
    }

    pub(crate) fn owner(&self) -> &str {
        &self.owner
    }

    /// Returns a concurrency-safe copy of the job status.
    pub(crate) fn status(&self) -> Status {
        self.status.lock().unwrap().clone()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.status.lock().unwrap().running
    }

    /// Creates a log reader for this job's output, starting at byte zero.
    pub(crate) fn new_reader(&self, cancel: CancellationToken) -> LogReader {
        self.dispatcher.new_reader(cancel)
    }

    /// Kills the job's process with SIGKILL. Stopping a job that already
    /// terminated is a no-op.
    pub(crate) fn stop(&self) -> Result<(), JobError> {
        let status = self.status.lock().unwrap();
        if !status.running {
            info!(id = %self.id, "job already stopped");
            return Ok(());
        }
        match kill(self.pid, Signal::SIGKILL) {
            // The process may have exited between the running check and the
            // kill. The reaper broadcasts a cgroup kill for any children
            // either way.
            Ok(()) | Err(Errno::ESRCH) => Ok(()),
            Err(errno) => Err(JobError::Stop {
                id: self.id.clone(),
                source: io::Error::from_raw_os_error(errno as i32),
            }),
        }
    }
}

/// Waits for the job's process, records the exit status, kills any
/// surviving descendants through the cgroup and removes the job cgroup.
///
/// Runs once per job on its own task. Failures are logged, never
/// propagated.
pub(crate) async fn reap(job: Arc<Job>, mut child: Child) {
    let wait_result = child.wait().await;
    {
        let mut status = job.status.lock().unwrap();
        status.running = false;
        status.stopped = Some(SystemTime::now());
        status.exit_code = match &wait_result {
            Ok(exit) => exit.code().unwrap_or(TERMINATED_BY_SIGNAL),
            Err(err) => {
                error!(id = %job.id, %err, "cannot wait for job");
                TERMINATED_BY_SIGNAL
            }
        };
    }

    if let Err(err) = cgroup::kill_all(&job.cgroup) {
        error!(id = %job.id, %err, "cannot kill job cgroup members");
    }
    cgroup::delete_cgroup_with_retry(&job.cgroup, &job.id).await;
}

/// Moves the calling process into the cgroup identified by the inherited
/// directory descriptor.
///
/// Runs in the child between fork and exec, so only async-signal-safe
/// calls are allowed. Raw OS errors are preserved for the parent.
fn enter_cgroup(cgroup_fd: RawFd) -> io::Result<()> {
    let procs = c"cgroup.procs";
    let fd = unsafe { libc::openat(cgroup_fd, procs.as_ptr(), libc::O_WRONLY | libc::O_CLOEXEC) };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    // Writing "0" to cgroup.procs means "this process".
    let buf: &[u8] = b"0\n";
    let written = unsafe { libc::write(fd, buf.as_ptr().cast(), buf.len()) };
    let write_err = io::Error::last_os_error();
    unsafe {
        libc::close(fd);
    }
    if written < 0 {
        return Err(write_err);
    }
    Ok(())
}

/// Copies one output pipe of the child into the log sink, one owned chunk
/// per read, until the pipe reaches EOF.
async fn forward_output<R>(mut pipe: R, sink: LogSink)
where
    R: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4096];
    loop {
        match pipe.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => sink.write(bytes::Bytes::copy_from_slice(&buf[..n])).await,
            Err(err) => {
                debug!(%err, "job output pipe closed");
                return;
            }
        }
    }
}
