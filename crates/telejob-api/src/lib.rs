//! gRPC surface for the telejob service: generated protocol types, the
//! service implementation, mTLS credential loading and thin server and
//! client wrappers.

mod error;
pub use error::ApiError;

/// Generated protocol types for `telejob.v1`.
pub mod proto {
    tonic::include_proto!("telejob.v1");
}

mod convert;

mod identity;

mod grpc;
pub use grpc::TelejobService;

mod creds;
pub use creds::{client_tls_config, server_tls_config};

mod server;
pub use server::{Server, ServerConfig};

mod client;
pub use client::Client;

pub use proto::telejob_client::TelejobClient;
pub use proto::telejob_server::TelejobServer;

pub use tonic;
