//! In-process webhook server and raw TLS client helpers.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum_server::Handle;
use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, RootCertStore};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::task::JoinHandle;
use tokio_rustls::TlsConnector;
use tokio_rustls::client::TlsStream;

use kube_resourceless::{HealthState, RemoveResources, WebhookConfig, run_webhook_server};

use crate::common::fixtures::TlsFiles;

/// Timeout for any single network step
pub const STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Webhook server running on an ephemeral loopback port.
///
/// The listener is shut down when the value is dropped.
pub struct TestServer {
    pub addr: SocketAddr,
    pub health: Arc<HealthState>,
    handle: Handle,
    task: JoinHandle<kube_resourceless::Result<()>>,
}

impl TestServer {
    /// Start serving the identity in `files`.
    pub async fn start(files: &TlsFiles) -> Self {
        let config = WebhookConfig {
            cert_path: files.cert_path.clone(),
            key_path: files.key_path.clone(),
            addr: "127.0.0.1:0".parse().unwrap(),
            health_addr: "127.0.0.1:0".parse().unwrap(),
        };
        let health = Arc::new(HealthState::new());
        let handle = Handle::new();

        let task = {
            let health = health.clone();
            let handle = handle.clone();
            tokio::spawn(async move {
                run_webhook_server(&config, RemoveResources, health, handle).await
            })
        };

        let addr = tokio::time::timeout(STEP_TIMEOUT, handle.listening())
            .await
            .expect("listener did not bind in time")
            .expect("listener failed to bind");

        Self {
            addr,
            health,
            handle,
            task,
        }
    }

    /// Number of identity loads performed by the server's certificate loader
    pub fn certificate_loads(&self) -> u64 {
        self.health.metrics.certificate_loads.get()
    }

    /// Whether the server task is still running
    pub fn is_running(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.shutdown();
    }
}

/// Open a TLS connection to `addr` trusting only `trusted`.
pub async fn connect(
    addr: SocketAddr,
    trusted: &CertificateDer<'static>,
) -> io::Result<TlsStream<TcpStream>> {
    let mut roots = RootCertStore::empty();
    roots
        .add(trusted.clone())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;

    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?
        .with_root_certificates(roots)
        .with_no_client_auth();
    let connector = TlsConnector::from(Arc::new(config));

    let server_name = ServerName::try_from("localhost")
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;
    let tcp = TcpStream::connect(addr).await?;
    tokio::time::timeout(STEP_TIMEOUT, connector.connect(server_name, tcp))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "handshake timed out"))?
}

/// Leaf certificate presented by the server on `stream`
pub fn peer_leaf(stream: &TlsStream<TcpStream>) -> CertificateDer<'static> {
    stream.get_ref().1.peer_certificates().unwrap()[0].clone()
}

/// Status code and body of an HTTP/1.1 response
#[derive(Debug)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

/// Send a POST to the mutate route and read the full response.
pub async fn post(
    stream: &mut TlsStream<TcpStream>,
    content_type: &str,
    body: &[u8],
) -> io::Result<HttpResponse> {
    let head = format!(
        "POST {} HTTP/1.1\r\nHost: localhost\r\nContent-Type: {}\r\nContent-Length: {}\r\n\r\n",
        kube_resourceless::MUTATE_PATH,
        content_type,
        body.len()
    );
    stream.write_all(head.as_bytes()).await?;
    stream.write_all(body).await?;
    stream.flush().await?;

    tokio::time::timeout(STEP_TIMEOUT, read_response(stream))
        .await
        .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "response timed out"))?
}

/// Read one Content-Length delimited response, leaving the connection open
async fn read_response(stream: &mut TlsStream<TcpStream>) -> io::Result<HttpResponse> {
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let header_end = loop {
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "no response head"));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = String::from_utf8_lossy(&buf[..header_end]).to_string();
    let status: u16 = head
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "bad status line"))?;
    let content_length: usize = head
        .lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("content-length")
                .then(|| value.trim().parse::<usize>().ok())
                .flatten()
        })
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no content-length"))?;

    while buf.len() < header_end + content_length {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "truncated body"));
        }
        buf.extend_from_slice(&chunk[..n]);
    }

    Ok(HttpResponse {
        status,
        body: buf[header_end..header_end + content_length].to_vec(),
    })
}
