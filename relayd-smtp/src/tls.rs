//! Loading the server identity used for STARTTLS.

use std::{fs::File, io::BufReader, path::Path, sync::Arc};

use relayd_common::internal;
use tokio_rustls::{
    TlsAcceptor,
    rustls::{
        ServerConfig,
        crypto::ring,
        pki_types::{CertificateDer, PrivateKeyDer},
    },
};

use crate::error::{TlsError, TlsResult};

fn load_certs(path: &Path) -> TlsResult<Vec<CertificateDer<'static>>> {
    let failed = |reason: String| TlsError::CertificateLoad {
        path: path.display().to_string(),
        reason,
    };

    let file = File::open(path).map_err(|e| failed(e.to_string()))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| failed(e.to_string()))?;

    if certs.is_empty() {
        return Err(failed("no certificates found".to_string()));
    }

    Ok(certs)
}

fn load_key(path: &Path) -> TlsResult<PrivateKeyDer<'static>> {
    let failed = |reason: String| TlsError::KeyLoad {
        path: path.display().to_string(),
        reason,
    };

    let file = File::open(path).map_err(|e| failed(e.to_string()))?;

    rustls_pemfile::private_key(&mut BufReader::new(file))
        .map_err(|e| failed(e.to_string()))?
        .ok_or_else(|| failed("no PKCS1, PKCS8 or SEC1 private key found".to_string()))
}

/// Builds the acceptor shared by every session.
///
/// This happens once at startup, so a bad certificate or key is reported
/// before the listener ever binds.
///
/// # Errors
///
/// Returns a [`TlsError`] if either file cannot be read or parsed, or if
/// rustls rejects the pair.
#[tracing::instrument(level = "debug", skip_all, fields(cert = %cert.display(), key = %key.display()))]
pub fn acceptor(cert: &Path, key: &Path) -> TlsResult<TlsAcceptor> {
    let certs = load_certs(cert)?;
    let key = load_key(key)?;

    let config = ServerConfig::builder_with_provider(Arc::new(ring::default_provider()))
        .with_safe_default_protocol_versions()?
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    internal!(level = DEBUG, "Loaded TLS identity from {}", cert.display());

    Ok(TlsAcceptor::from(Arc::new(config)))
}
