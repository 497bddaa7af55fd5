//! P2P gossip host: a long-lived TCP listener plus mDNS discovery,
//! exchanging the six PoA gossip messages defined in [`message`].
//!
//! Framing and transport are deliberately plain: one `TcpStream` per
//! logical request (and, where the table calls for one, its reply),
//! closed after a full read to EOF. No libp2p `Swarm`, no multiplexed
//! streams — this protocol is small enough that a bare socket per message
//! is simpler to reason about than an extra transport layer.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, error, info, warn};
use mdns_sd::{ServiceDaemon, ServiceInfo};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use sole_chain::{AcceptOutcome, Chain, ChainError};
use sole_mempool::{InsertOutcome, Mempool, MempoolError};

pub mod message;
pub mod peer;

pub use message::{
    BlockPayload, GetBlocksPayload, GetDataPayload, InvKind, InvPayload, Message, MessageError,
    MessageType, Payload, TxPayload, VersionPayload,
};
pub use peer::{NodeIdentity, PeerError, PeerManager};

pub const PROTOCOL_ID: &str = "/ledger/1.0.0";
const MDNS_SERVICE_TYPE: &str = "_sole._tcp.local.";

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Chain(#[from] ChainError),

    #[error(transparent)]
    Mempool(#[from] MempoolError),

    #[error(transparent)]
    Peer(#[from] PeerError),

    #[error("mDNS discovery error: {0}")]
    Discovery(String),
}

/// The propagation policy treats every networking failure as retryable
/// except the one class the store cannot recover from on its own.
fn abort_on_store_corruption(e: &NetworkError) {
    if matches!(e, NetworkError::Chain(c) if c.is_fatal()) {
        error!("chain store corruption detected, aborting: {e}");
        std::process::abort();
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub listen_addr: SocketAddr,
    /// Operator-configured peers dialed directly at startup, in addition
    /// to whatever mDNS surfaces.
    pub bootstrap_peers: Vec<SocketAddr>,
    pub identity_path: PathBuf,
    pub protocol_version: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        NetworkConfig {
            listen_addr: "0.0.0.0:7733".parse().unwrap(),
            bootstrap_peers: Vec::new(),
            identity_path: PathBuf::from("node_identity.key"),
            protocol_version: 1,
        }
    }
}

/// The running gossip host: owns the chain/mempool handles it mutates on
/// behalf of inbound messages, plus its own identity and peer table.
pub struct Host {
    config: NetworkConfig,
    identity: NodeIdentity,
    peers: PeerManager,
    chain: Arc<Chain>,
    mempool: Arc<Mempool>,
}

impl Host {
    pub fn new(config: NetworkConfig, chain: Arc<Chain>, mempool: Arc<Mempool>) -> Result<Arc<Self>, NetworkError> {
        let identity = NodeIdentity::load_or_generate(&config.identity_path)?;
        Ok(Arc::new(Host {
            config,
            identity,
            peers: PeerManager::new(),
            chain,
            mempool,
        }))
    }

    pub fn peer_id(&self) -> &str {
        self.identity.peer_id()
    }

    pub async fn listed_peers(&self) -> Vec<String> {
        self.peers.peer_ids().await
    }

    /// Binds the listener and serves inbound streams until the process is
    /// asked to shut down (the caller races this future against a signal).
    pub async fn serve(self: Arc<Self>) -> Result<(), NetworkError> {
        let listener = TcpListener::bind(self.config.listen_addr).await?;
        info!("network host listening on {}", self.config.listen_addr);
        loop {
            let (stream, addr) = listener.accept().await?;
            let host = self.clone();
            tokio::spawn(async move {
                if let Err(e) = host.handle_inbound(stream, addr).await {
                    abort_on_store_corruption(&e);
                    debug!("inbound stream from {addr} failed: {e}");
                }
            });
        }
    }

    /// Dials every bootstrap peer and sends a `version` handshake.
    pub async fn dial_bootstrap_peers(self: &Arc<Self>) {
        for addr in self.config.bootstrap_peers.clone() {
            let host = self.clone();
            tokio::spawn(async move {
                if let Err(e) = host.send_version(addr).await {
                    abort_on_store_corruption(&e);
                    warn!("failed to dial bootstrap peer {addr}: {e}");
                }
            });
        }
    }

    /// Advertises this node over mDNS and dials peers the browser finds.
    /// Runs until the daemon's receiver channel closes.
    pub async fn run_discovery(self: Arc<Self>) -> Result<(), NetworkError> {
        let daemon = ServiceDaemon::new().map_err(|e| NetworkError::Discovery(e.to_string()))?;
        let port = self.config.listen_addr.port();
        let host_name = format!("{}.local.", self.identity.peer_id());
        let service = ServiceInfo::new(
            MDNS_SERVICE_TYPE,
            self.identity.peer_id(),
            &host_name,
            (),
            port,
            None,
        )
        .map_err(|e| NetworkError::Discovery(e.to_string()))?;
        daemon
            .register(service)
            .map_err(|e| NetworkError::Discovery(e.to_string()))?;

        let receiver = daemon
            .browse(MDNS_SERVICE_TYPE)
            .map_err(|e| NetworkError::Discovery(e.to_string()))?;

        while let Ok(event) = receiver.recv_async().await {
            if let mdns_sd::ServiceEvent::ServiceResolved(info) = event {
                for ip in info.get_addresses() {
                    let addr = SocketAddr::new(*ip, info.get_port());
                    let host = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = host.send_version(addr).await {
                            abort_on_store_corruption(&e);
                            debug!("failed to dial discovered peer {addr}: {e}");
                        }
                    });
                }
            }
        }
        Ok(())
    }

    /// Sends the initial handshake to `addr` and, if the remote reports a
    /// taller chain, pulls the catch-up chain (`getblocks` → `inv` →
    /// `getdata`/`block` per missing block) to bring the local tip level.
    async fn send_version(self: &Arc<Self>, addr: SocketAddr) -> Result<(), NetworkError> {
        let payload = VersionPayload {
            proto_version: self.config.protocol_version,
            best_height: self.chain.tip_height()?,
            from_id: self.peer_id().to_string(),
        };
        let reply = match self.send(addr, &payload.encode()?).await? {
            Some(reply) => reply,
            None => return Ok(()),
        };
        if let MessageType::Version = reply.msg_type {
            let remote = VersionPayload::decode(&reply)?;
            self.peers.record_handshake(&remote.from_id, addr).await;
            if remote.best_height > self.chain.tip_height()? {
                self.request_catch_up(addr).await?;
            }
        }
        Ok(())
    }

    /// Asks `addr` for its block inventory and fetches every block the
    /// local chain is missing, oldest first so each one extends the
    /// current tip by exactly one height.
    async fn request_catch_up(self: &Arc<Self>, addr: SocketAddr) -> Result<(), NetworkError> {
        let request = GetBlocksPayload {
            from_id: self.peer_id().to_string(),
        };
        let reply = match self.send(addr, &request.encode()?).await? {
            Some(reply) => reply,
            None => return Ok(()),
        };
        if let MessageType::Inv = reply.msg_type {
            let inv = InvPayload::decode(&reply)?;
            if let InvKind::Block = inv.kind {
                for id in inv.items.into_iter().rev() {
                    if !self.chain.has_block(&id)? {
                        self.fetch_and_apply_block(addr, id).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Opens one connection, writes one message, half-closes, and waits
    /// for an optional reply written back on the same stream.
    async fn send(&self, addr: SocketAddr, message: &Message) -> Result<Option<Message>, NetworkError> {
        let mut stream = TcpStream::connect(addr).await?;
        stream.write_all(&message.encode()).await?;
        stream.shutdown().await?;
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await?;
        if buf.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Message::decode(&buf)?))
        }
    }

    async fn handle_inbound(self: &Arc<Self>, mut stream: TcpStream, addr: SocketAddr) -> Result<(), NetworkError> {
        let mut buf = Vec::new();
        stream.read_to_end(&mut buf).await?;
        let message = Message::decode(&buf)?;
        if let Some(reply) = self.dispatch(message, addr).await? {
            stream.write_all(&reply.encode()).await?;
        }
        Ok(())
    }

    /// Runs the handler table from the protocol description and returns
    /// whatever reply (if any) belongs on the same stream.
    async fn dispatch(self: &Arc<Self>, message: Message, remote_addr: SocketAddr) -> Result<Option<Message>, NetworkError> {
        match message.msg_type {
            MessageType::Version => {
                let payload = VersionPayload::decode(&message)?;
                if !self.peers.record_handshake(&payload.from_id, remote_addr).await {
                    return Ok(None);
                }
                let local_height = self.chain.tip_height()?;
                if payload.best_height > local_height {
                    let reply = GetBlocksPayload {
                        from_id: self.peer_id().to_string(),
                    };
                    Ok(Some(reply.encode()?))
                } else if payload.best_height < local_height {
                    let reply = VersionPayload {
                        proto_version: self.config.protocol_version,
                        best_height: local_height,
                        from_id: self.peer_id().to_string(),
                    };
                    Ok(Some(reply.encode()?))
                } else {
                    Ok(None)
                }
            }
            MessageType::GetBlocks => {
                let items = self.chain.block_hashes()?;
                let reply = InvPayload {
                    from_id: self.peer_id().to_string(),
                    kind: InvKind::Block,
                    items,
                };
                Ok(Some(reply.encode()?))
            }
            MessageType::Inv => {
                let payload = InvPayload::decode(&message)?;
                match payload.kind {
                    InvKind::Block => {
                        for id in payload.items {
                            if !self.chain.has_block(&id)? {
                                self.fetch_and_apply_block(remote_addr, id).await?;
                            }
                        }
                    }
                    InvKind::Tx => {
                        for id in payload.items {
                            if !self.mempool.contains(&id).await {
                                self.fetch_and_apply_tx(remote_addr, id).await?;
                            }
                        }
                    }
                }
                Ok(None)
            }
            MessageType::GetData => {
                let payload = GetDataPayload::decode(&message)?;
                match payload.kind {
                    InvKind::Block => match self.chain.get_block(&payload.id) {
                        Ok(block) => {
                            let reply = BlockPayload {
                                from_id: self.peer_id().to_string(),
                                block,
                            };
                            Ok(Some(reply.encode()?))
                        }
                        Err(_) => Ok(None),
                    },
                    InvKind::Tx => {
                        let snapshot = self.mempool.snapshot().await;
                        match snapshot.into_iter().find(|tx| tx.id == payload.id) {
                            Some(tx) => {
                                let reply = TxPayload {
                                    from_id: self.peer_id().to_string(),
                                    tx,
                                };
                                Ok(Some(reply.encode()?))
                            }
                            None => Ok(None),
                        }
                    }
                }
            }
            MessageType::Block => {
                let payload = BlockPayload::decode(&message)?;
                if self.chain.accept_block(&payload.block)? == AcceptOutcome::Added {
                    self.mempool.remove_confirmed(&payload.block).await;
                }
                Ok(None)
            }
            MessageType::Tx => {
                let payload = TxPayload::decode(&message)?;
                let from_id = payload.from_id.clone();
                if self.mempool.try_insert(payload.tx.clone(), &self.chain).await? == InsertOutcome::Accepted {
                    self.broadcast_tx_inv(payload.tx.id, &from_id).await;
                }
                Ok(None)
            }
        }
    }

    async fn fetch_and_apply_block(self: &Arc<Self>, addr: SocketAddr, id: sole_core::Hash) -> Result<(), NetworkError> {
        let request = GetDataPayload {
            from_id: self.peer_id().to_string(),
            kind: InvKind::Block,
            id,
        };
        if let Some(reply) = self.send(addr, &request.encode()?).await? {
            if let MessageType::Block = reply.msg_type {
                let payload = BlockPayload::decode(&reply)?;
                if self.chain.accept_block(&payload.block)? == AcceptOutcome::Added {
                    self.mempool.remove_confirmed(&payload.block).await;
                }
            }
        }
        Ok(())
    }

    async fn fetch_and_apply_tx(self: &Arc<Self>, addr: SocketAddr, id: sole_core::Hash) -> Result<(), NetworkError> {
        let request = GetDataPayload {
            from_id: self.peer_id().to_string(),
            kind: InvKind::Tx,
            id,
        };
        if let Some(reply) = self.send(addr, &request.encode()?).await? {
            if let MessageType::Tx = reply.msg_type {
                let payload = TxPayload::decode(&reply)?;
                self.mempool.try_insert(payload.tx, &self.chain).await?;
            }
        }
        Ok(())
    }

    /// Sends `inv(tx)` to every currently connected peer except the one
    /// the transaction arrived from.
    pub async fn broadcast_tx_inv(self: &Arc<Self>, tx_id: sole_core::Hash, exclude_peer_id: &str) {
        let targets = self.peers.addrs_except(exclude_peer_id).await;
        for addr in targets {
            let payload = InvPayload {
                from_id: self.peer_id().to_string(),
                kind: InvKind::Tx,
                items: vec![tx_id],
            };
            if let Ok(message) = payload.encode() {
                let host = self.clone();
                tokio::spawn(async move {
                    let _ = host.send(addr, &message).await;
                });
            }
        }
    }

    /// Sends `inv(block)` to every connected peer; used by the mining loop
    /// after it forges a new block.
    pub async fn broadcast_block_inv(self: &Arc<Self>, block_hash: sole_core::Hash) {
        let targets = self.peers.all_addrs().await;
        for addr in targets {
            let payload = InvPayload {
                from_id: self.peer_id().to_string(),
                kind: InvKind::Block,
                items: vec![block_hash],
            };
            if let Ok(message) = payload.encode() {
                let host = self.clone();
                tokio::spawn(async move {
                    let _ = host.send(addr, &message).await;
                });
            }
        }
    }
}
