// In-process network — handlers registered by address, called directly
//
// Stands in for TCP in tests and single-process demos. Unregistering an address
// makes it unreachable, which is how tests simulate a relay going down.

use super::rpc::{RelayTransport, RequestHandler, RpcError};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

/// Cloning shares the registry
#[derive(Clone, Default)]
pub struct LocalNetwork {
    handlers: Arc<RwLock<HashMap<SocketAddr, Arc<dyn RequestHandler>>>>,
}

impl LocalNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, addr: SocketAddr, handler: Arc<dyn RequestHandler>) {
        self.handlers.write().insert(addr, handler);
    }

    pub fn unregister(&self, addr: &SocketAddr) {
        self.handlers.write().remove(addr);
    }

    pub fn is_registered(&self, addr: &SocketAddr) -> bool {
        self.handlers.read().contains_key(addr)
    }

    /// Transport whose calls identify themselves as coming from `local_addr`
    pub fn endpoint(&self, local_addr: SocketAddr) -> LocalEndpoint {
        LocalEndpoint {
            network: self.clone(),
            local_addr,
        }
    }

    async fn dispatch(
        &self,
        from: SocketAddr,
        to: SocketAddr,
        request: Vec<u8>,
    ) -> Result<Vec<u8>, RpcError> {
        // Clone the handler out so the registry lock is released before awaiting
        let handler = self
            .handlers
            .read()
            .get(&to)
            .cloned()
            .ok_or_else(|| RpcError::Unavailable(format!("no listener at {}", to)))?;
        handler.handle(from, request).await
    }
}

#[async_trait]
impl RelayTransport for LocalNetwork {
    async fn call(&self, addr: SocketAddr, request: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        let anonymous = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, 0));
        self.dispatch(anonymous, addr, request).await
    }
}

/// A [`LocalNetwork`] handle bound to a source address
#[derive(Clone)]
pub struct LocalEndpoint {
    network: LocalNetwork,
    local_addr: SocketAddr,
}

impl LocalEndpoint {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
}

#[async_trait]
impl RelayTransport for LocalEndpoint {
    async fn call(&self, addr: SocketAddr, request: Vec<u8>) -> Result<Vec<u8>, RpcError> {
        self.network.dispatch(self.local_addr, addr, request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct WhoAmI;

    #[async_trait]
    impl RequestHandler for WhoAmI {
        async fn handle(&self, peer: SocketAddr, _request: Vec<u8>) -> Result<Vec<u8>, RpcError> {
            Ok(peer.to_string().into_bytes())
        }
    }

    #[tokio::test]
    async fn test_register_call_unregister() {
        let net = LocalNetwork::new();
        let addr: SocketAddr = "127.0.0.1:7001".parse().unwrap();
        net.register(addr, Arc::new(WhoAmI));
        assert!(net.is_registered(&addr));

        let reply = net.call(addr, Vec::new()).await.unwrap();
        assert_eq!(reply, b"0.0.0.0:0");

        let from: SocketAddr = "127.0.0.1:7002".parse().unwrap();
        let reply = net.endpoint(from).call(addr, Vec::new()).await.unwrap();
        assert_eq!(reply, b"127.0.0.1:7002");

        net.unregister(&addr);
        assert!(matches!(
            net.call(addr, Vec::new()).await,
            Err(RpcError::Unavailable(_))
        ));
    }
}
