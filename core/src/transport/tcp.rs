// TCP transport — length-prefixed frames over plain tokio sockets
//
// Request:  u32 length (BE) || bytes
// Response: u8 status || u32 length (BE) || body
//
// A connection may carry several request/response pairs in sequence.

use super::rpc::{decode_outcome, encode_outcome, RelayTransport, RequestHandler, RpcError};
use async_trait::async_trait;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Largest frame either side will accept
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Default bound on one outbound call, connect included
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Outbound TCP client; opens a fresh connection per call
#[derive(Debug, Clone)]
pub struct TcpTransport {
    timeout: Duration,
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(DEFAULT_CALL_TIMEOUT)
    }
}

impl TcpTransport {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    async fn exchange(addr: SocketAddr, request: &[u8]) -> Result<Vec<u8>, RpcError> {
        let mut stream = TcpStream::connect(addr)
            .await
            .map_err(|e| RpcError::Unavailable(format!("connect {}: {}", addr, e)))?;

        write_request(&mut stream, request)
            .await
            .map_err(|e| RpcError::Unavailable(format!("send to {}: {}", addr, e)))?;

        let (status, body) = read_response(&mut stream)
            .await
            .map_err(|e| RpcError::Unavailable(format!("reply from {}: {}", addr, e)))?;
        decode_outcome(status, body)
    }
}

#[async_trait]
impl RelayTransport for TcpTransport {
    async fn call(&self, addr: SocketAddr, request: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        if request.len() > MAX_FRAME_SIZE {
            return Err(RpcError::Internal(format!(
                "request of {} bytes exceeds frame limit",
                request.len()
            )));
        }
        tokio::time::timeout(self.timeout, Self::exchange(addr, &request))
            .await
            .map_err(|_| {
                RpcError::Unavailable(format!("{} did not answer within {:?}", addr, self.timeout))
            })?
    }
}

async fn write_request(stream: &mut TcpStream, request: &[u8]) -> io::Result<()> {
    stream.write_u32(request.len() as u32).await?;
    stream.write_all(request).await?;
    stream.flush().await
}

async fn read_response(stream: &mut TcpStream) -> io::Result<(u8, Vec<u8>)> {
    let status = stream.read_u8().await?;
    let len = stream.read_u32().await? as usize;
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("response frame of {} bytes exceeds limit", len),
        ));
    }
    let mut body = vec![0u8; len];
    stream.read_exact(&mut body).await?;
    Ok((status, body))
}

/// Read one request frame; `None` on a clean close between frames
async fn read_request(stream: &mut TcpStream) -> io::Result<Option<Vec<u8>>> {
    let len = match stream.read_u32().await {
        Ok(len) => len as usize,
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    if len > MAX_FRAME_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("request frame of {} bytes exceeds limit", len),
        ));
    }
    let mut buf = vec![0u8; len];
    stream.read_exact(&mut buf).await?;
    Ok(Some(buf))
}

async fn write_response(stream: &mut TcpStream, status: u8, body: &[u8]) -> io::Result<()> {
    stream.write_u8(status).await?;
    stream.write_u32(body.len() as u32).await?;
    stream.write_all(body).await?;
    stream.flush().await
}

async fn serve_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    handler: Arc<dyn RequestHandler>,
    read_timeout: Duration,
) -> io::Result<()> {
    loop {
        let request = tokio::time::timeout(read_timeout, read_request(&mut stream))
            .await
            .map_err(|_| {
                io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("no request frame within {:?}", read_timeout),
                )
            })??;
        let Some(request) = request else {
            break;
        };
        let outcome = handler.handle(peer, request).await;
        let (status, body) = encode_outcome(outcome);
        write_response(&mut stream, status, &body).await?;
    }
    Ok(())
}

/// Accept connections on `listener` until `shutdown` flips to true.
/// Every connection runs on its own task and is dropped once a peer goes
/// [`DEFAULT_CALL_TIMEOUT`] without completing a request frame.
pub async fn serve(
    listener: TcpListener,
    handler: Arc<dyn RequestHandler>,
    shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    serve_with_timeout(listener, handler, DEFAULT_CALL_TIMEOUT, shutdown).await
}

/// [`serve`] with an explicit per-frame read deadline
pub async fn serve_with_timeout(
    listener: TcpListener,
    handler: Arc<dyn RequestHandler>,
    read_timeout: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> io::Result<()> {
    let local = listener.local_addr()?;
    info!("Listening on {}", local);

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(pair) => pair,
                    Err(e) => {
                        warn!("Accept failed on {}: {}", local, e);
                        continue;
                    }
                };
                let handler = Arc::clone(&handler);
                tokio::spawn(async move {
                    if let Err(e) = serve_connection(stream, peer, handler, read_timeout).await {
                        debug!("Connection from {} closed: {}", peer, e);
                    }
                });
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    info!("Listener on {} shutting down", local);
                    return Ok(());
                }
            }
        }
    }
}
