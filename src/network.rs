//! Transport setup for host server connections
//!
//! Opens the TCP socket with a connect timeout, applies the per-operation
//! read/write timeouts, and optionally wraps the stream in TLS. Certificate
//! validation is always enforced.

use std::fs;
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use log::{debug, info, warn};
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConnection, RootCertStore, StreamOwned};

use crate::config::ClientConfig;
use crate::error::{TransportError, TransportResult};

/// A helper trait alias for byte streams a connection can run over
pub trait Transport: Read + Write + Send {}
impl<T: Read + Write + Send> Transport for T {}

/// Boxed transport owned by a connection
pub type DynTransport = Box<dyn Transport>;

const MAX_CA_BUNDLE_SIZE: usize = 10_000_000;

/// Open a transport to the configured host.
pub fn connect(config: &ClientConfig) -> TransportResult<DynTransport> {
    let addr = resolve(&config.host, config.port)?;
    let tcp = TcpStream::connect_timeout(&addr, config.connect_timeout()).map_err(|e| {
        match e.kind() {
            std::io::ErrorKind::ConnectionRefused => TransportError::ConnectionRefused {
                host: config.host.clone(),
                port: config.port,
            },
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => TransportError::Timeout {
                operation: format!("connecting to {addr}"),
                timeout_ms: config.connect_timeout_ms,
            },
            _ => TransportError::from(e),
        }
    })?;
    tcp.set_read_timeout(Some(config.io_timeout()))?;
    tcp.set_write_timeout(Some(config.io_timeout()))?;
    tcp.set_nodelay(true)?;
    info!("connected to {}:{} ({})", config.host, config.port, addr);

    if !config.tls {
        return Ok(Box::new(tcp));
    }

    let tls_config = build_tls_config(config.tls_ca_bundle_path.as_deref())?;
    let name = ServerName::try_from(config.host.as_str())
        .map(|name| name.to_owned())
        .map_err(|e| TransportError::Tls { message: format!("invalid server name {}: {e}", config.host) })?;
    let session = ClientConnection::new(Arc::new(tls_config), name)
        .map_err(|e| TransportError::Tls { message: e.to_string() })?;
    debug!("TLS enabled for {}", config.host);
    Ok(Box::new(StreamOwned::new(session, tcp)))
}

fn resolve(host: &str, port: u16) -> TransportResult<SocketAddr> {
    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|_| TransportError::DnsResolution { host: host.to_string() })?;
    addrs.next().ok_or_else(|| TransportError::DnsResolution { host: host.to_string() })
}

/// Build a rustls client config trusting the bundled web roots, the
/// platform store, and an optional PEM bundle.
fn build_tls_config(ca_bundle_path: Option<&str>) -> TransportResult<rustls::ClientConfig> {
    let mut roots = RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

    match rustls_native_certs::load_native_certs() {
        Ok(certs) => {
            let (added, ignored) = roots.add_parsable_certificates(certs);
            debug!("loaded {added} platform certificates ({ignored} ignored)");
        }
        Err(e) => warn!("failed to load platform certificates: {e}"),
    }

    if let Some(path) = ca_bundle_path {
        let bytes = fs::read(path).map_err(|e| TransportError::Tls {
            message: format!("failed to read CA bundle {path}: {e}"),
        })?;
        let certs = parse_pem_bundle(&bytes).map_err(|message| TransportError::Tls {
            message: format!("CA bundle {path}: {message}"),
        })?;
        let count = certs.len();
        for cert in certs {
            roots.add(cert).map_err(|e| TransportError::Tls {
                message: format!("CA bundle {path}: {e}"),
            })?;
        }
        info!("added {count} trusted CA certificates from {path}");
    }

    Ok(rustls::ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth())
}

/// Split a PEM bundle into DER certificates.
pub fn parse_pem_bundle(bytes: &[u8]) -> Result<Vec<CertificateDer<'static>>, String> {
    const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
    const END: &str = "-----END CERTIFICATE-----";

    if bytes.len() > MAX_CA_BUNDLE_SIZE {
        return Err("certificate bundle too large".to_string());
    }
    let text = std::str::from_utf8(bytes).map_err(|_| "bundle contains invalid UTF-8".to_string())?;

    let mut certs = Vec::new();
    let mut start = 0;
    while let Some(b) = text[start..].find(BEGIN) {
        let body_start = start + b + BEGIN.len();
        let Some(e) = text[body_start..].find(END) else {
            return Err("unterminated certificate block".to_string());
        };
        let body_end = body_start + e;
        let b64: String = text[body_start..body_end]
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .collect();
        let der = STANDARD
            .decode(b64.as_bytes())
            .map_err(|e| format!("invalid base64 in certificate {}: {e}", certs.len() + 1))?;
        certs.push(CertificateDer::from(der));
        start = body_end + END.len();
    }

    if certs.is_empty() {
        return Err("no certificates found".to_string());
    }
    Ok(certs)
}
