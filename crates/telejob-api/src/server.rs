use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use telejob_core::{Controller, ControllerConfig};

use crate::creds;
use crate::error::ApiError;
use crate::grpc::TelejobService;
use crate::proto::telejob_server::TelejobServer;

/// How long draining log streams may keep running after the jobs are
/// stopped before they are cut off.
const STREAM_DRAIN_GRACE: Duration = Duration::from_secs(2);

/// Configuration for a telejob [`Server`].
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to listen on. Port 0 picks a free port.
    pub address: String,
    /// Server certificate file (PEM).
    pub server_cert: PathBuf,
    /// Server private key file (PEM).
    pub server_key: PathBuf,
    /// CA certificate file clients are verified against (PEM, required).
    pub client_ca_cert: PathBuf,
    /// Job controller configuration.
    pub controller: ControllerConfig,
}

/// mTLS gRPC server for the telejob service.
///
/// Binds eagerly so tests can discover the picked port, serves until the
/// shutdown token fires and then shuts the job controller down, removing
/// every cgroup it created.
pub struct Server {
    controller: Arc<Controller>,
    listener: TcpListener,
    tls: tonic::transport::ServerTlsConfig,
    shutdown: CancellationToken,
    readers: CancellationToken,
}

impl Server {
    /// Loads credentials, creates the job controller and binds the listen
    /// address.
    pub async fn bind(config: ServerConfig) -> Result<Self, ApiError> {
        let tls = creds::server_tls_config(
            &config.server_cert,
            &config.server_key,
            &config.client_ca_cert,
        )?;
        let controller = Arc::new(Controller::new(config.controller)?);
        let listener = TcpListener::bind(&config.address).await?;
        Ok(Self {
            controller,
            listener,
            tls,
            shutdown: CancellationToken::new(),
            readers: CancellationToken::new(),
        })
    }

    /// The bound listen address.
    pub fn local_addr(&self) -> Result<SocketAddr, ApiError> {
        Ok(self.listener.local_addr()?)
    }

    /// Token that stops the server when cancelled.
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Serves requests until the shutdown token fires.
    ///
    /// The job controller is stopped as soon as the token fires, while the
    /// transport drains its in-flight streams. Stopping the jobs closes
    /// every log producer, so open log streams observe EOF and finish;
    /// stragglers are cut off after a short grace period so a stalled
    /// client cannot hold the shutdown hostage.
    pub async fn serve(self) -> Result<(), ApiError> {
        let address = self.listener.local_addr()?;
        let service = TelejobService::new(self.controller.clone(), self.readers.clone());

        info!(%address, "server listening");
        let router = tonic::transport::Server::builder()
            .tls_config(self.tls)?
            .add_service(TelejobServer::new(service));

        let stop_jobs = {
            let shutdown = self.shutdown.clone();
            let controller = self.controller.clone();
            let readers = self.readers.clone();
            tokio::spawn(async move {
                shutdown.cancelled().await;
                info!("stopping job controller");
                let result = controller.stop_all().await;
                // Every job is reaped and every dispatcher has its EOF;
                // remaining streams are draining history. Cut whatever is
                // left after the grace period.
                tokio::spawn(async move {
                    tokio::time::sleep(STREAM_DRAIN_GRACE).await;
                    readers.cancel();
                });
                result
            })
        };

        let serve_shutdown = self.shutdown.clone();
        let serve_result = router
            .serve_with_incoming_shutdown(TcpListenerStream::new(self.listener), async move {
                serve_shutdown.cancelled().await;
            })
            .await;

        // A transport failure ends serving without the token having fired;
        // the controller still has to shut down before returning.
        self.shutdown.cancel();
        let stop_result = match stop_jobs.await {
            Ok(result) => result,
            Err(err) => {
                error!(%err, "job shutdown task failed");
                Ok(())
            }
        };

        serve_result?;
        stop_result.map_err(ApiError::from)
    }
}
