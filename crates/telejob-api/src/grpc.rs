use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tonic::{Request, Response, Status};
use tracing::debug;

use telejob_core::{Controller, JobError};

use crate::error::job_status;
use crate::identity::peer_owner;
use crate::proto::{self, telejob_server::Telejob};

const LOG_CHUNK_SIZE: usize = 4096;
const LOG_STREAM_CAPACITY: usize = 16;

/// gRPC service implementation.
///
/// Wraps a [`Controller`] and implements the generated `Telejob` trait. The
/// owner of every request is the subject common name of the verified client
/// certificate.
pub struct TelejobService {
    controller: Arc<Controller>,
    shutdown: CancellationToken,
}

impl TelejobService {
    /// Create a new gRPC service backed by the given controller.
    ///
    /// Every log reader is created under `shutdown`; cancelling it ends all
    /// open log streams, so the transport can finish draining at shutdown.
    pub fn new(controller: Arc<Controller>, shutdown: CancellationToken) -> Self {
        Self {
            controller,
            shutdown,
        }
    }
}

#[tonic::async_trait]
impl Telejob for TelejobService {
    async fn start(
        &self,
        request: Request<proto::StartRequest>,
    ) -> Result<Response<proto::StartResponse>, Status> {
        let owner = peer_owner(&request)?;
        let req = request.into_inner();
        if req.command.is_empty() {
            return Err(Status::invalid_argument("empty command"));
        }

        let id = self
            .controller
            .start(&owner, &req.command, &req.arguments)
            .await
            .map_err(|err| job_status(&err))?;

        debug!(%owner, %id, command = %req.command, "grpc: job started");
        Ok(Response::new(proto::StartResponse { id }))
    }

    async fn stop(
        &self,
        request: Request<proto::StopRequest>,
    ) -> Result<Response<proto::StopResponse>, Status> {
        let owner = peer_owner(&request)?;
        let req = request.into_inner();

        self.controller
            .stop(&owner, &req.id)
            .await
            .map_err(|err| job_status(&err))?;

        debug!(%owner, id = %req.id, "grpc: job stopped");
        Ok(Response::new(proto::StopResponse {}))
    }

    async fn status(
        &self,
        request: Request<proto::StatusRequest>,
    ) -> Result<Response<proto::StatusResponse>, Status> {
        let owner = peer_owner(&request)?;
        let req = request.into_inner();

        let status = self
            .controller
            .status(&owner, &req.id)
            .await
            .map_err(|err| job_status(&err))?;

        Ok(Response::new(proto::StatusResponse {
            job_status: Some(proto::JobStatus::from(status)),
        }))
    }

    type LogsStream = ReceiverStream<Result<proto::LogsResponse, Status>>;

    async fn logs(
        &self,
        request: Request<proto::LogsRequest>,
    ) -> Result<Response<Self::LogsStream>, Status> {
        let owner = peer_owner(&request)?;
        let req = request.into_inner();
        // The stream always serves the full history and then follows new
        // output until the job terminates, regardless of req.follow.

        let cancel = self.shutdown.child_token();
        let mut reader = self
            .controller
            .logs(&owner, &req.id, cancel.clone())
            .await
            .map_err(|err| job_status(&err))?;

        let (tx, rx) = mpsc::channel(LOG_STREAM_CAPACITY);

        // Cancel the reader as soon as the client goes away so a parked
        // subscription does not linger.
        let client_gone = tx.clone();
        let reader_cancel = cancel.clone();
        tokio::spawn(async move {
            client_gone.closed().await;
            reader_cancel.cancel();
        });

        debug!(%owner, id = %req.id, "grpc: log stream opened");
        tokio::spawn(async move {
            let mut buf = vec![0u8; LOG_CHUNK_SIZE];
            loop {
                match reader.read(&mut buf).await {
                    Ok(0) => return,
                    Ok(n) => {
                        let response = proto::LogsResponse {
                            chunk: buf[..n].to_vec(),
                        };
                        if tx.send(Ok(response)).await.is_err() {
                            return;
                        }
                    }
                    Err(JobError::ReaderCancelled) => return,
                    Err(err) => {
                        let _ = tx.send(Err(job_status(&err))).await;
                        return;
                    }
                }
            }
        });

        Ok(Response::new(ReceiverStream::new(rx)))
    }
}
