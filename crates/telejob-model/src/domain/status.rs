use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// Exit code reported while a job has not yet terminated.
///
/// The operating system reports -1 both for processes that were killed by a
/// signal and for processes that have not exited yet. To keep the two cases
/// apart on the wire, a job that is still running reports -2.
pub const NOT_TERMINATED: i32 = -2;

/// Exit code reported for a job that was terminated by a signal,
/// including a kill requested through the service itself.
pub const TERMINATED_BY_SIGNAL: i32 = -1;

/// Point-in-time snapshot of a job's state.
///
/// Snapshots are plain values. Once handed out they are safe to read
/// without further synchronization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// Job identifier, a decimal string assigned by the controller.
    pub id: String,
    /// Program that was started.
    pub command: String,
    /// Arguments passed to the program.
    pub args: Vec<String>,
    /// When the process was spawned.
    pub started: SystemTime,
    /// Whether the process has not been reaped yet.
    pub running: bool,
    /// Exit code following the encoding above: -2 while running, -1 for
    /// signal-terminated jobs, 0..=255 for natural exits.
    pub exit_code: i32,
    /// When the process was reaped. `None` while the job is running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stopped: Option<SystemTime>,
}

impl Status {
    /// Creates the snapshot for a freshly spawned job.
    pub fn started_now(id: String, command: String, args: Vec<String>) -> Self {
        Self {
            id,
            command,
            args,
            started: SystemTime::now(),
            running: true,
            exit_code: NOT_TERMINATED,
            stopped: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn started_now_is_running() {
        let status = Status::started_now("1".into(), "sleep".into(), vec!["10".into()]);

        assert!(status.running);
        assert_eq!(status.exit_code, NOT_TERMINATED);
        assert_eq!(status.stopped, None);
        assert!(status.started <= SystemTime::now());
    }

    #[test]
    fn serde_roundtrip() {
        let status = Status {
            id: "7".into(),
            command: "echo".into(),
            args: vec!["hi".into()],
            started: SystemTime::now(),
            running: false,
            exit_code: 0,
            stopped: Some(SystemTime::now()),
        };

        let json = serde_json::to_string(&status).unwrap();
        let back: Status = serde_json::from_str(&json).unwrap();
        assert_eq!(back, status);
    }

    #[test]
    fn stopped_omitted_while_running() {
        let status = Status::started_now("1".into(), "true".into(), vec![]);
        let json = serde_json::to_string(&status).unwrap();
        assert!(!json.contains("stopped"));
    }
}
