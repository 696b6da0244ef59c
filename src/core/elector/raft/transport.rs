// src/core/elector/raft/transport.rs

//! TCP transport for the consensus protocol: a listener that feeds decoded
//! messages into the node's inbox, and one lazily connected writer task
//! per peer. Messages are length-delimited bincode frames.

use crate::core::elector::raft::message::RaftMessage;
use crate::core::errors::ClusterError;
use bytes::Bytes;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tracing::{debug, info, warn};

const PEER_QUEUE_DEPTH: usize = 256;
const INBOUND_QUEUE_DEPTH: usize = 1024;

pub struct RaftTransport {
    writers: DashMap<SocketAddr, mpsc::Sender<RaftMessage>>,
    shutdown_tx: broadcast::Sender<()>,
}

impl RaftTransport {
    /// Binds the consensus listener and returns the transport, the actual
    /// bound address, and the inbound message stream.
    pub async fn bind(
        bind_addr: SocketAddr,
    ) -> Result<(Arc<Self>, SocketAddr, mpsc::Receiver<RaftMessage>), ClusterError> {
        let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
            ClusterError::Transport(format!("failed to bind consensus listener on {bind_addr}: {e}"))
        })?;
        let bound = listener.local_addr()?;
        info!("Consensus transport listening on {bound}");

        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_QUEUE_DEPTH);
        let (shutdown_tx, _) = broadcast::channel(1);
        let transport = Arc::new(Self {
            writers: DashMap::new(),
            shutdown_tx: shutdown_tx.clone(),
        });

        let mut shutdown_rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!("Consensus listener shutting down.");
                        return;
                    }
                    accepted = listener.accept() => {
                        match accepted {
                            Ok((stream, peer)) => {
                                debug!("Consensus connection from {peer}");
                                tokio::spawn(Self::run_reader(
                                    stream,
                                    peer,
                                    inbound_tx.clone(),
                                ));
                            }
                            Err(e) => warn!("Consensus accept failed: {e}"),
                        }
                    }
                }
            }
        });

        Ok((transport, bound, inbound_rx))
    }

    async fn run_reader(stream: TcpStream, peer: SocketAddr, inbound: mpsc::Sender<RaftMessage>) {
        let mut framed = FramedRead::new(stream, LengthDelimitedCodec::new());
        while let Some(frame) = framed.next().await {
            let frame = match frame {
                Ok(f) => f,
                Err(e) => {
                    debug!("Consensus connection from {peer} closed: {e}");
                    return;
                }
            };
            match bincode::serde::decode_from_slice::<RaftMessage, _>(
                &frame,
                bincode::config::standard(),
            ) {
                Ok((msg, _)) => {
                    if inbound.send(msg).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!("Undecodable consensus frame from {peer}: {e}");
                    return;
                }
            }
        }
    }

    /// Queues a message for a peer, creating its writer task on first use.
    /// Delivery is best-effort; the protocol retries through its timers.
    pub fn send(&self, addr: SocketAddr, msg: RaftMessage) {
        let tx = self
            .writers
            .entry(addr)
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(PEER_QUEUE_DEPTH);
                tokio::spawn(Self::run_writer(addr, rx, self.shutdown_tx.subscribe()));
                tx
            })
            .clone();
        if tx.try_send(msg).is_err() {
            debug!("Consensus send queue to {addr} is full; dropping message");
        }
    }

    async fn run_writer(
        addr: SocketAddr,
        mut rx: mpsc::Receiver<RaftMessage>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut sink: Option<FramedWrite<TcpStream, LengthDelimitedCodec>> = None;
        loop {
            let msg = tokio::select! {
                _ = shutdown_rx.recv() => return,
                msg = rx.recv() => match msg {
                    Some(m) => m,
                    None => return,
                },
            };

            let encoded = match bincode::serde::encode_to_vec(&msg, bincode::config::standard()) {
                Ok(e) => e,
                Err(e) => {
                    warn!("Failed to encode consensus message for {addr}: {e}");
                    continue;
                }
            };

            if sink.is_none() {
                match TcpStream::connect(addr).await {
                    Ok(stream) => {
                        sink = Some(FramedWrite::new(stream, LengthDelimitedCodec::new()));
                    }
                    Err(e) => {
                        debug!("Consensus connect to {addr} failed: {e}");
                        continue;
                    }
                }
            }

            if let Some(s) = sink.as_mut() {
                if let Err(e) = s.send(Bytes::from(encoded)).await {
                    debug!("Consensus write to {addr} failed: {e}");
                    sink = None;
                }
            }
        }
    }

    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        self.writers.clear();
    }
}
