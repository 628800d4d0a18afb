//! Transport module - Secure channel to the controller
//!
//! Provides:
//! - Mutually authenticated TLS connection establishment
//! - A shared, line-atomic write handle used by all concurrent exchanges
//!
//! The read side has exactly one consumer (the engine's reader loop) and
//! needs no locking; the write side is shared by every exchange and must
//! emit each complete line as one atomic operation.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_native_tls::native_tls::{Certificate, Identity, Protocol, TlsConnector};
use tokio_native_tls::TlsStream;

use crate::protocol::Line;

/// Transport errors
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("TLS error: {0}")]
    Tls(#[from] tokio_native_tls::native_tls::Error),

    #[error("Invalid controller address: {0}")]
    InvalidAddress(String),

    #[error("Connection timeout")]
    Timeout,
}

pub type TransportResult<T> = Result<T, TransportError>;

/// Certificate material for the mutually authenticated session
#[derive(Debug, Clone)]
pub struct TlsSettings {
    /// CA certificate the controller must be signed with
    pub ca_cert: PathBuf,
    /// Client certificate presented to the controller
    pub certificate: PathBuf,
    /// Client private key
    pub key: PathBuf,
}

/// Connect to the controller and complete the TLS handshake.
///
/// The controller certificate must chain to the configured CA, and the
/// client identity is presented for mutual authentication. TLS 1.2 is the
/// minimum accepted protocol version.
pub async fn connect(
    addr: &str,
    settings: &TlsSettings,
    connect_timeout: Duration,
) -> TransportResult<TlsStream<TcpStream>> {
    let (host, _port) = addr
        .rsplit_once(':')
        .ok_or_else(|| TransportError::InvalidAddress(addr.to_string()))?;

    let connector = build_connector(settings).await?;

    let stream = match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => return Err(TransportError::Io(e)),
        Err(_) => return Err(TransportError::Timeout),
    };

    tracing::debug!("TCP connected to {}, starting TLS handshake", addr);

    let tls = connector.connect(host, stream).await?;

    tracing::info!("Secure session established with {}", addr);

    Ok(tls)
}

/// Load certificate material and build the TLS connector
async fn build_connector(settings: &TlsSettings) -> TransportResult<tokio_native_tls::TlsConnector> {
    let ca = tokio::fs::read(&settings.ca_cert).await?;
    let cert = tokio::fs::read(&settings.certificate).await?;
    let key = tokio::fs::read(&settings.key).await?;

    let identity = Identity::from_pkcs8(&cert, &key)?;

    let connector = TlsConnector::builder()
        .identity(identity)
        .add_root_certificate(Certificate::from_pem(&ca)?)
        .min_protocol_version(Some(Protocol::Tlsv12))
        .build()?;

    Ok(connector.into())
}

/// Shared write handle that emits each line as one atomic write.
///
/// Cloning is cheap; all clones serialize on the same underlying writer so
/// concurrently replying exchanges never interleave mid-line.
pub struct LineWriter<W> {
    inner: Arc<Mutex<W>>,
}

impl<W> Clone for LineWriter<W> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<W: AsyncWrite + Unpin> LineWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(writer)),
        }
    }

    /// Write one complete line and flush it.
    ///
    /// The encoded bytes go out under a single lock acquisition.
    pub async fn send(&self, line: &Line) -> io::Result<()> {
        let encoded = line.encode();
        let mut writer = self.inner.lock().await;
        writer.write_all(encoded.as_bytes()).await?;
        writer.flush().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::CorrelationId;
    use tokio::io::{AsyncBufReadExt, BufReader};

    #[tokio::test]
    async fn test_concurrent_writes_stay_line_atomic() {
        let (tx, rx) = tokio::io::duplex(4096);
        let writer = LineWriter::new(tx);

        let mut handles = Vec::new();
        for i in 0..8 {
            let writer = writer.clone();
            handles.push(tokio::spawn(async move {
                let id = CorrelationId::from(format!("task{i}").as_str());
                let line = Line::metric(&id, "level", i as f64);
                for _ in 0..16 {
                    writer.send(&line).await.unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }
        drop(writer);

        let mut lines = BufReader::new(rx).lines();
        let mut count = 0;
        while let Some(raw) = lines.next_line().await.unwrap() {
            let line = Line::parse(&raw).unwrap();
            let expect = Line::metric(
                &line.id,
                "level",
                line.id.as_str()[4..].parse::<f64>().unwrap(),
            );
            assert_eq!(line, expect);
            count += 1;
        }
        assert_eq!(count, 8 * 16);
    }

    #[tokio::test]
    async fn test_connect_rejects_address_without_port() {
        let settings = TlsSettings {
            ca_cert: "ca.crt".into(),
            certificate: "client.crt".into(),
            key: "client.key".into(),
        };
        let result = connect("no-port-here", &settings, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(TransportError::InvalidAddress(_))));
    }
}
