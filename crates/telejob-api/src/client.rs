use std::path::Path;

use tonic::transport::{Channel, Endpoint};
use tonic::Streaming;

use crate::creds;
use crate::error::ApiError;
use crate::proto;
use crate::proto::telejob_client::TelejobClient;

/// mTLS client for the telejob service.
///
/// A convenience wrapper around the generated client that loads the client
/// certificate and key, optionally pins the server CA and exposes the four
/// RPCs directly.
pub struct Client {
    inner: TelejobClient<Channel>,
}

impl Client {
    /// Connects to `address` (host:port) using the given client certificate
    /// and key. When `server_ca` is set the server certificate is verified
    /// against it instead of the system roots.
    pub async fn connect(
        address: &str,
        cert: &Path,
        key: &Path,
        server_ca: Option<&Path>,
    ) -> Result<Self, ApiError> {
        let tls = creds::client_tls_config(cert, key, server_ca)?;
        let channel = Endpoint::from_shared(format!("https://{address}"))
            .map_err(ApiError::Transport)?
            .tls_config(tls)?
            .connect()
            .await?;
        Ok(Self {
            inner: TelejobClient::new(channel),
        })
    }

    /// Starts a job and returns its id.
    pub async fn start(
        &mut self,
        command: &str,
        arguments: &[String],
    ) -> Result<String, tonic::Status> {
        let response = self
            .inner
            .start(proto::StartRequest {
                command: command.to_string(),
                arguments: arguments.to_vec(),
            })
            .await?;
        Ok(response.into_inner().id)
    }

    /// Stops the job with the given id.
    pub async fn stop(&mut self, id: &str) -> Result<(), tonic::Status> {
        self.inner
            .stop(proto::StopRequest { id: id.to_string() })
            .await?;
        Ok(())
    }

    /// Returns the status of the job with the given id.
    pub async fn status(&mut self, id: &str) -> Result<proto::JobStatus, tonic::Status> {
        let response = self
            .inner
            .status(proto::StatusRequest { id: id.to_string() })
            .await?;
        response
            .into_inner()
            .job_status
            .ok_or_else(|| tonic::Status::internal("status response without job status"))
    }

    /// Opens the log stream of the job with the given id.
    pub async fn logs(&mut self, id: &str) -> Result<Streaming<proto::LogsResponse>, tonic::Status> {
        let response = self
            .inner
            .logs(proto::LogsRequest {
                id: id.to_string(),
                follow: true,
            })
            .await?;
        Ok(response.into_inner())
    }

    /// The underlying generated client.
    pub fn inner_mut(&mut self) -> &mut TelejobClient<Channel> {
        &mut self.inner
    }
}
