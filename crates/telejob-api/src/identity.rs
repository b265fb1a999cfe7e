use tonic::{Request, Status};
use x509_parser::prelude::{FromDer, X509Certificate};

/// Extracts the caller identity from the verified peer certificate.
///
/// The subject common name of the client certificate is the job owner. The
/// TLS layer has already verified the certificate against the client CA, so
/// a missing certificate or common name means the connection was not set up
/// for mutual TLS.
pub(crate) fn peer_owner<T>(request: &Request<T>) -> Result<String, Status> {
    let certs = request
        .peer_certs()
        .ok_or_else(|| Status::unauthenticated("no peer certificates"))?;
    let cert = certs
        .first()
        .ok_or_else(|| Status::unauthenticated("no peer certificates"))?;
    let (_, parsed) = X509Certificate::from_der(cert.as_ref())
        .map_err(|err| Status::unauthenticated(format!("cannot parse peer certificate: {err}")))?;
    let owner = parsed
        .subject()
        .iter_common_name()
        .next()
        .and_then(|cn| cn.as_str().ok())
        .ok_or_else(|| Status::unauthenticated("peer certificate has no common name"))?;
    Ok(owner.to_string())
}
