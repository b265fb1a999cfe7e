use thiserror::Error;

use telejob_core::JobError;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("credentials load error: {0}")]
    CredentialsLoad(String),

    #[error("CA setup error: {0}")]
    CaSetup(String),

    #[error("job error: {0}")]
    Job(#[from] JobError),

    #[error("transport error: {0}")]
    Transport(#[from] tonic::transport::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<ApiError> for tonic::Status {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Job(err) => job_status(&err),
            other => tonic::Status::internal(other.to_string()),
        }
    }
}

/// Maps a job error to the gRPC status code the caller should see.
pub(crate) fn job_status(err: &JobError) -> tonic::Status {
    match err {
        JobError::Command(_) => tonic::Status::invalid_argument(err.to_string()),
        JobError::NotFound(_) => tonic::Status::not_found(err.to_string()),
        JobError::Unauthorized { .. } => tonic::Status::permission_denied(err.to_string()),
        _ => tonic::Status::internal(err.to_string()),
    }
}
