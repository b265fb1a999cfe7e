use std::path::Path;

use tonic::transport::{Certificate, ClientTlsConfig, Identity, ServerTlsConfig};

use crate::error::ApiError;

/// Builds the server-side mTLS configuration.
///
/// The server presents `cert`/`key` and requires clients to present a
/// certificate signed by `client_ca`. The client CA is mandatory; without
/// it there is no caller identity to authorize against.
pub fn server_tls_config(
    cert: &Path,
    key: &Path,
    client_ca: &Path,
) -> Result<ServerTlsConfig, ApiError> {
    if client_ca.as_os_str().is_empty() {
        return Err(ApiError::CaSetup(
            "client CA certificate file is required".to_string(),
        ));
    }
    let identity = load_identity(cert, key)?;
    let ca = read_pem(client_ca)
        .map_err(|err| ApiError::CaSetup(format!("cannot read {}: {err}", client_ca.display())))?;
    Ok(ServerTlsConfig::new()
        .identity(identity)
        .client_ca_root(Certificate::from_pem(ca)))
}

/// Builds the client-side mTLS configuration.
///
/// The client presents `cert`/`key`. When `server_ca` is given the server
/// certificate is verified against it; otherwise the system's native root
/// store is used.
pub fn client_tls_config(
    cert: &Path,
    key: &Path,
    server_ca: Option<&Path>,
) -> Result<ClientTlsConfig, ApiError> {
    let identity = load_identity(cert, key)?;
    let mut config = ClientTlsConfig::new().identity(identity);
    match server_ca {
        Some(server_ca) => {
            let ca = read_pem(server_ca).map_err(|err| {
                ApiError::CaSetup(format!("cannot read {}: {err}", server_ca.display()))
            })?;
            config = config.ca_certificate(Certificate::from_pem(ca));
        }
        None => {
            config = config.with_native_roots();
        }
    }
    Ok(config)
}

fn load_identity(cert: &Path, key: &Path) -> Result<Identity, ApiError> {
    let cert_pem = read_pem(cert).map_err(|err| {
        ApiError::CredentialsLoad(format!("cannot read cert {}: {err}", cert.display()))
    })?;
    let key_pem = read_pem(key).map_err(|err| {
        ApiError::CredentialsLoad(format!("cannot read key {}: {err}", key.display()))
    })?;
    Ok(Identity::from_pem(cert_pem, key_pem))
}

fn read_pem(path: &Path) -> std::io::Result<Vec<u8>> {
    std::fs::read(path)
}
