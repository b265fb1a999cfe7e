use prost_types::Timestamp;

use telejob_model::Status;

use crate::proto;

impl From<Status> for proto::JobStatus {
    fn from(status: Status) -> Self {
        let state = if status.running {
            proto::State::Running
        } else {
            proto::State::Stopped
        };
        proto::JobStatus {
            id: status.id,
            command: status.command,
            arguments: status.args,
            state: state as i32,
            started: Some(Timestamp::from(status.started)),
            stopped: status.stopped.map(Timestamp::from),
            exit_code: i64::from(status.exit_code),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::SystemTime;
    use telejob_model::{NOT_TERMINATED, TERMINATED_BY_SIGNAL};

    fn running_status() -> Status {
        Status {
            id: "3".into(),
            command: "sleep".into(),
            args: vec!["100".into()],
            started: SystemTime::now(),
            running: true,
            exit_code: NOT_TERMINATED,
            stopped: None,
        }
    }

    #[test]
    fn running_job_converts() {
        let proto_status = proto::JobStatus::from(running_status());

        assert_eq!(proto_status.id, "3");
        assert_eq!(proto_status.command, "sleep");
        assert_eq!(proto_status.arguments, vec!["100".to_string()]);
        assert_eq!(proto_status.state, proto::State::Running as i32);
        assert_eq!(proto_status.exit_code, i64::from(NOT_TERMINATED));
        assert!(proto_status.started.is_some());
        assert_eq!(proto_status.stopped, None);
    }

    #[test]
    fn stopped_job_converts() {
        let status = Status {
            running: false,
            exit_code: TERMINATED_BY_SIGNAL,
            stopped: Some(SystemTime::now()),
            ..running_status()
        };

        let proto_status = proto::JobStatus::from(status);
        assert_eq!(proto_status.state, proto::State::Stopped as i32);
        assert_eq!(proto_status.exit_code, -1);
        assert!(proto_status.stopped.is_some());
    }

    #[test]
    fn natural_exit_code_passes_through() {
        let status = Status {
            running: false,
            exit_code: 137,
            stopped: Some(SystemTime::now()),
            ..running_status()
        };

        let proto_status = proto::JobStatus::from(status);
        assert_eq!(proto_status.exit_code, 137);
    }
}
