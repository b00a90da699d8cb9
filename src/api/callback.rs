use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_rustls::rustls;
use tokio_rustls::TlsAcceptor;
use tracing::{debug, warn};
use url::Url;

use crate::error::{Error, Result};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);
const READ_TIMEOUT: Duration = Duration::from_secs(5);

/// Exactly one of these is delivered per login attempt. Browsers love to
/// re-request the callback (favicon fetches, reloads); extra events are
/// dropped by the capacity-1 channel instead of blocking the listener.
#[derive(Debug)]
pub enum CallbackEvent {
    Code(String),
    Error(String),
}

/// Short-lived listener that captures the provider's redirect during a
/// PKCE login. A scoped resource: the caller must `shutdown()` it on
/// every exit path.
pub struct CallbackReceiver {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl CallbackReceiver {
    /// Bind on host:port (ephemeral when port is 0) and start the accept
    /// loop. With `tls` material the listener serves HTTPS, otherwise
    /// plain HTTP. An empty `path` registers the handler at "/".
    pub async fn bind(
        host: &str,
        port: u16,
        path: &str,
        state: &str,
        tls: Option<(&Path, &Path)>,
    ) -> Result<(Self, mpsc::Receiver<CallbackEvent>)> {
        let listener = TcpListener::bind((host, port)).await?;
        let local_addr = listener.local_addr()?;

        let acceptor = match tls {
            Some((cert, key)) => Some(build_acceptor(cert, key)?),
            None => None,
        };

        let path = if path.is_empty() { "/" } else { path }.to_string();
        let state = state.to_string();
        let (tx, rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        debug!("callback listener bound on {}", local_addr);
        let task = tokio::spawn(accept_loop(listener, acceptor, path, state, tx, shutdown_rx));

        Ok((
            Self {
                local_addr,
                shutdown: Some(shutdown_tx),
                task,
            },
            rx,
        ))
    }

    /// Actual bound address; differs from the requested one when port 0
    /// was used.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop the accept loop, waiting at most a couple of seconds before
    /// aborting it outright.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut self.task)
            .await
            .is_err()
        {
            self.task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    acceptor: Option<TlsAcceptor>,
    path: String,
    state: String,
    tx: mpsc::Sender<CallbackEvent>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => {
                debug!("callback listener shutting down");
                break;
            }
            res = listener.accept() => {
                match res {
                    Ok((stream, _)) => match &acceptor {
                        Some(a) => match a.accept(stream).await {
                            Ok(tls_stream) => handle_conn(tls_stream, &path, &state, &tx).await,
                            Err(e) => warn!("tls handshake failed: {}", e),
                        },
                        None => handle_conn(stream, &path, &state, &tx).await,
                    },
                    Err(e) => warn!("accept failed: {}", e),
                }
            }
        }
    }
}

async fn handle_conn<S>(mut stream: S, path: &str, state: &str, tx: &mpsc::Sender<CallbackEvent>)
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let mut buf = vec![0u8; 8192];
    let n = match tokio::time::timeout(READ_TIMEOUT, stream.read(&mut buf)).await {
        Ok(Ok(n)) if n > 0 => n,
        _ => return,
    };
    let request = String::from_utf8_lossy(&buf[..n]);

    let target = match request_target(&request) {
        Some(t) => t,
        None => {
            let _ = write_response(&mut stream, 400, "malformed request").await;
            return;
        }
    };
    let url = match Url::parse(&format!("http://callback.invalid{}", target)) {
        Ok(u) => u,
        Err(_) => {
            let _ = write_response(&mut stream, 400, "malformed request").await;
            return;
        }
    };
    if url.path() != path {
        let _ = write_response(&mut stream, 404, "not found").await;
        return;
    }

    let query: HashMap<String, String> = url
        .query_pairs()
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    if query.get("state").map(String::as_str) != Some(state) {
        let _ = write_response(&mut stream, 400, "invalid state").await;
        return;
    }
    if let Some(e) = query.get("error") {
        let _ = write_response(&mut stream, 400, &format!("spotify auth error: {}", e)).await;
        let _ = tx.try_send(CallbackEvent::Error(e.clone()));
        return;
    }
    let code = match query.get("code") {
        Some(c) if !c.is_empty() => c.clone(),
        _ => {
            let _ = write_response(&mut stream, 400, "missing code").await;
            return;
        }
    };

    let _ = write_response(&mut stream, 200, "Login complete. You can close this window.").await;
    let _ = tx.try_send(CallbackEvent::Code(code));
}

/// Origin-form request target from the request line ("GET /cb?x HTTP/1.1").
fn request_target(request: &str) -> Option<&str> {
    let first_line = request.lines().next()?;
    let target = first_line.split_whitespace().nth(1)?;
    if target.starts_with('/') {
        Some(target)
    } else {
        None
    }
}

async fn write_response<S>(stream: &mut S, status: u16, body: &str) -> std::io::Result<()>
where
    S: AsyncWrite + Unpin,
{
    let reason = match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "",
    };
    let resp = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: text/plain; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason,
        body.len(),
        body
    );
    stream.write_all(resp.as_bytes()).await?;
    stream.shutdown().await
}

fn build_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let cert_file = std::fs::File::open(cert_path)?;
    let mut reader = std::io::BufReader::new(cert_file);
    let certs = rustls_pemfile::certs(&mut reader).collect::<std::io::Result<Vec<_>>>()?;
    if certs.is_empty() {
        return Err(Error::Config(format!(
            "no certificates found in {}",
            cert_path.display()
        )));
    }

    let key_file = std::fs::File::open(key_path)?;
    let mut reader = std::io::BufReader::new(key_file);
    let key = rustls_pemfile::private_key(&mut reader)?.ok_or_else(|| {
        Error::Config(format!("no private key found in {}", key_path.display()))
    })?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::Config(format!("invalid tls certificate/key: {}", e)))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}
