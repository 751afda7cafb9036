//! DHT server module
//!
//! Receives DHT datagrams, screens every sender through the host throttle
//! and hands accepted ones to the request handling layer.

use crate::dht::peer_store::PeerStore;
use crate::error::DhtError;
use crate::net::throttle::HostThrottle;
use anyhow::Result;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::{error, info, trace, warn};

/// Request handling layer (message decoding, routing table, RPC replies).
pub trait DatagramHandler: Send + Sync {
    fn handle(&self, data: &[u8], from: SocketAddr, store: &PeerStore);
}

/// Datagram counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    /// Datagrams passed to the handler
    pub accepted: u64,
    /// Datagrams dropped by the throttle
    pub dropped: u64,
}

/// UDP front door of the DHT node
pub struct DhtServer {
    socket: UdpSocket,
    local_addr: SocketAddr,
    store: Arc<PeerStore>,
    throttle: Arc<HostThrottle>,
    accepted: AtomicU64,
    dropped: AtomicU64,
    stop_tx: watch::Sender<bool>,
}

impl DhtServer {
    /// Bind the DHT socket
    pub async fn new(
        bind_addr: SocketAddr,
        store: Arc<PeerStore>,
        throttle: Arc<HostThrottle>,
    ) -> Result<Self> {
        let socket = UdpSocket::bind(bind_addr).await.map_err(|e| {
            error!("Failed to bind UDP socket to {}: {}", bind_addr, e);
            DhtError::from(e).with_context(format!("binding UDP socket to {}", bind_addr))
        })?;
        let local_addr = socket.local_addr().map_err(DhtError::from)?;
        info!("DHT listening on: {}", local_addr);

        let (stop_tx, _) = watch::channel(false);
        Ok(Self {
            socket,
            local_addr,
            store,
            throttle,
            accepted: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
            stop_tx,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn stats(&self) -> ServerStats {
        ServerStats {
            accepted: self.accepted.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    /// Receive until `stop` is called.
    pub async fn run_loop(&self, handler: &dyn DatagramHandler) -> Result<()> {
        info!("Starting DHT event loop");

        let mut stop_rx = self.stop_tx.subscribe();
        if *stop_rx.borrow_and_update() {
            return Ok(());
        }
        let mut buffer = [0u8; 4096];

        loop {
            tokio::select! {
                result = self.socket.recv_from(&mut buffer) => {
                    match result {
                        Ok((len, from)) => self.dispatch(&buffer[..len], from, handler),
                        Err(e) => warn!("Error receiving datagram: {}", e),
                    }
                }
                _ = stop_rx.changed() => break,
            }
        }

        info!("DHT event loop stopped");
        Ok(())
    }

    fn dispatch(&self, data: &[u8], from: SocketAddr, handler: &dyn DatagramHandler) {
        if !self.throttle.check_block(from.ip()) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            trace!("Dropped {} bytes from throttled host {}", data.len(), from);
            return;
        }
        self.accepted.fetch_add(1, Ordering::Relaxed);
        handler.handle(data, from, &self.store);
    }

    pub fn stop(&self) {
        self.stop_tx.send_replace(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dht::contacts::PeerContact;
    use crate::dht::info_hash::InfoHash;
    use std::time::Duration;

    /// Treats every datagram as an announce of its sender for a fixed info hash.
    struct AnnounceHandler {
        info_hash: InfoHash,
    }

    impl DatagramHandler for AnnounceHandler {
        fn handle(&self, _data: &[u8], from: SocketAddr, store: &PeerStore) {
            if let Some(contact) = PeerContact::from_socket_addr(from) {
                store.add_contact(self.info_hash, contact);
            }
        }
    }

    async fn server(max_per_minute: usize) -> Arc<DhtServer> {
        let store = Arc::new(PeerStore::new(16, 16).unwrap());
        let throttle = Arc::new(HostThrottle::new(max_per_minute, 16).unwrap());
        let bind_addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
        Arc::new(DhtServer::new(bind_addr, store, throttle).await.unwrap())
    }

    async fn wait_for(server: &DhtServer, total: u64) {
        for _ in 0..200 {
            let stats = server.stats();
            if stats.accepted + stats.dropped >= total {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn test_bind_failure_names_address() {
        let taken = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        let store = Arc::new(PeerStore::new(4, 4).unwrap());
        let throttle = Arc::new(HostThrottle::new(10, 4).unwrap());

        let err = DhtServer::new(addr, store, throttle).await.err().unwrap();
        let dht_err = err.downcast_ref::<DhtError>().unwrap();
        assert!(matches!(dht_err, DhtError::NetworkError { .. }));
        assert!(dht_err.to_string().contains(&addr.to_string()));
    }

    #[tokio::test]
    async fn test_server_stop_before_run() {
        let server = server(10).await;
        server.stop();
        let handler = AnnounceHandler { info_hash: InfoHash::new([1u8; 20]) };
        assert!(server.run_loop(&handler).await.is_ok());
    }

    #[tokio::test]
    async fn test_throttled_datagrams_are_dropped() {
        let server = server(3).await;
        let info_hash = InfoHash::new([1u8; 20]);

        let runner = server.clone();
        let task = tokio::spawn(async move {
            let handler = AnnounceHandler { info_hash };
            runner.run_loop(&handler).await
        });

        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        for _ in 0..5 {
            client.send_to(b"d1:y1:qe", server.local_addr()).await.unwrap();
        }
        wait_for(&server, 5).await;

        assert_eq!(server.stats(), ServerStats { accepted: 3, dropped: 2 });
        assert_eq!(server.store.count(&info_hash), 1);

        server.stop();
        task.await.unwrap().unwrap();
    }
}
