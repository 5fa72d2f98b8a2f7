// Application server — the destination behind the exit hop
//
// Requests arrive as one type byte followed by a UTF-8 body:
//
//   Greet (1)          → "Welcome, This is Onion-Routing Server"
//   Fibonacci (2)      body "n", n ≤ 40      → "Fibonacci of n is f"
//   RandomNumbers (3)  body "n", n ≤ 1000    → "N-Random Numbers: a, b, ..."
//   Echo (4)           body "ping" → "pong", anything else echoed back

use crate::cell::RequestType;
use crate::transport::{RequestHandler, RpcError};
use async_trait::async_trait;
use rand::Rng;
use std::net::SocketAddr;
use thiserror::Error;
use tracing::{debug, info};

pub const GREETING: &str = "Welcome, This is Onion-Routing Server";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AppError {
    #[error("Malformed request: {0}")]
    Malformed(String),
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Unsupported request type {0:?}")]
    Unsupported(RequestType),
}

/// What the exit hop sends to the application server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppRequest {
    pub request_type: RequestType,
    pub body: Vec<u8>,
}

impl AppRequest {
    pub fn new(request_type: RequestType, body: Vec<u8>) -> Self {
        Self { request_type, body }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(1 + self.body.len());
        out.push(self.request_type as u8);
        out.extend_from_slice(&self.body);
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, AppError> {
        let (kind, body) = bytes
            .split_first()
            .ok_or_else(|| AppError::Malformed("empty request".to_string()))?;
        let request_type = RequestType::from_u8(*kind)
            .ok_or_else(|| AppError::Malformed(format!("unknown request type {}", kind)))?;
        Ok(Self {
            request_type,
            body: body.to_vec(),
        })
    }
}

/// Limits on the numeric requests
#[derive(Debug, Clone)]
pub struct AppServerConfig {
    pub max_fibonacci: u32,
    pub max_random_numbers: usize,
}

impl Default for AppServerConfig {
    fn default() -> Self {
        Self {
            max_fibonacci: 40,
            max_random_numbers: 1000,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ApplicationServer {
    config: AppServerConfig,
}

fn parse_count(body: &[u8]) -> Result<u64, AppError> {
    let text = std::str::from_utf8(body)
        .map_err(|_| AppError::InvalidArgument("argument is not UTF-8".to_string()))?;
    text.trim()
        .parse::<u64>()
        .map_err(|_| AppError::InvalidArgument(format!("'{}' is not a non-negative integer", text.trim())))
}

/// `None` once the result no longer fits in a u64 (n > 93)
fn fibonacci(n: u32) -> Option<u64> {
    let (mut a, mut b) = (0u128, 1u128);
    for _ in 0..n {
        let next = a.checked_add(b)?;
        a = b;
        b = next;
    }
    u64::try_from(a).ok()
}

impl ApplicationServer {
    pub fn new(config: AppServerConfig) -> Self {
        Self { config }
    }

    pub fn respond(&self, request: &AppRequest) -> Result<String, AppError> {
        match request.request_type {
            RequestType::Greet => Ok(GREETING.to_string()),
            RequestType::Fibonacci => {
                let n = parse_count(&request.body)?;
                if n > self.config.max_fibonacci as u64 {
                    return Err(AppError::InvalidArgument(format!(
                        "n must be at most {}",
                        self.config.max_fibonacci
                    )));
                }
                let value = fibonacci(n as u32).ok_or_else(|| {
                    AppError::InvalidArgument(format!("Fibonacci of {} does not fit in 64 bits", n))
                })?;
                Ok(format!("Fibonacci of {} is {}", n, value))
            }
            RequestType::RandomNumbers => {
                let n = parse_count(&request.body)?;
                if n > self.config.max_random_numbers as u64 {
                    return Err(AppError::InvalidArgument(format!(
                        "n must be at most {}",
                        self.config.max_random_numbers
                    )));
                }
                let mut rng = rand::thread_rng();
                let numbers: Vec<String> = (0..n)
                    .map(|_| rng.gen_range(0..100u32).to_string())
                    .collect();
                Ok(format!("N-Random Numbers: {}", numbers.join(", ")))
            }
            RequestType::Echo => {
                if request.body == b"ping" {
                    Ok("pong".to_string())
                } else {
                    Ok(String::from_utf8_lossy(&request.body).into_owned())
                }
            }
            RequestType::None => Err(AppError::Unsupported(RequestType::None)),
        }
    }
}

#[async_trait]
impl RequestHandler for ApplicationServer {
    async fn handle(&self, peer: SocketAddr, request: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        let request = AppRequest::decode(&request).map_err(|e| RpcError::Internal(e.to_string()))?;
        info!("{:?} request from {}", request.request_type, peer);

        let reply = self
            .respond(&request)
            .map_err(|e| RpcError::Internal(e.to_string()))?;
        debug!("Replying with {} bytes", reply.len());
        Ok(reply.into_bytes())
    }
}
