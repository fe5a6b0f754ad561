//! Mailbox RPC primitive
//!
//! A mailbox is a typed inbox. Its address can be cloned and handed to any
//! task; a request carries a reply address that the handler answers once.
//! Waiting for a reply is interruptible.

use nk_core::{interruptible, Interruptor};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

const MAILBOX_CAPACITY: usize = 64;

/// RPC error
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RpcError {
    /// The receiving mailbox is gone
    #[error("mailbox closed")]
    Disconnected,
    /// The handler dropped the reply address without answering
    #[error("request dropped without a reply")]
    NoReply,
    #[error(transparent)]
    Interrupted(#[from] nk_core::Interrupted),
}

/// Sending half of a mailbox
pub struct MailboxAddress<M> {
    tx: mpsc::Sender<M>,
}

impl<M> Clone for MailboxAddress<M> {
    fn clone(&self) -> Self {
        Self { tx: self.tx.clone() }
    }
}

impl<M> MailboxAddress<M> {
    pub async fn send(&self, message: M) -> Result<(), RpcError> {
        self.tx.send(message).await.map_err(|_| RpcError::Disconnected)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Receiving half of a mailbox
pub struct Mailbox<M> {
    rx: mpsc::Receiver<M>,
}

impl<M> Mailbox<M> {
    pub async fn recv(&mut self) -> Option<M> {
        self.rx.recv().await
    }
}

/// Create a mailbox and its address
pub fn mailbox<M>() -> (MailboxAddress<M>, Mailbox<M>) {
    let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
    (MailboxAddress { tx }, Mailbox { rx })
}

/// Where a handler sends its one reply
pub struct ReplyAddress<T> {
    tx: oneshot::Sender<T>,
}

impl<T> ReplyAddress<T> {
    /// Returns false if the requester stopped waiting
    pub fn send(self, reply: T) -> bool {
        self.tx.send(reply).is_ok()
    }
}

/// Send a request built around a fresh reply address and wait for the reply
pub async fn request<M, T, F>(
    address: &MailboxAddress<M>,
    make_request: F,
    interruptor: &Interruptor,
) -> Result<T, RpcError>
where
    F: FnOnce(ReplyAddress<T>) -> M,
{
    let (tx, rx) = oneshot::channel();
    let exchange = async move {
        address.send(make_request(ReplyAddress { tx })).await?;
        rx.await.map_err(|_| RpcError::NoReply)
    };
    interruptible(exchange, interruptor).await?
}

/// Addresses of known peers by node id
pub struct PeerDirectory<M> {
    peers: Arc<RwLock<BTreeMap<String, MailboxAddress<M>>>>,
}

impl<M> Clone for PeerDirectory<M> {
    fn clone(&self) -> Self {
        Self {
            peers: self.peers.clone(),
        }
    }
}

impl<M> Default for PeerDirectory<M> {
    fn default() -> Self {
        Self {
            peers: Arc::new(RwLock::new(BTreeMap::new())),
        }
    }
}

impl<M> PeerDirectory<M> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, peer: impl Into<String>, address: MailboxAddress<M>) {
        self.peers.write().insert(peer.into(), address);
    }

    pub fn remove(&self, peer: &str) -> bool {
        self.peers.write().remove(peer).is_some()
    }

    pub fn len(&self) -> usize {
        self.peers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.read().is_empty()
    }

    /// Snapshot of all registered peers
    pub fn peers(&self) -> Vec<(String, MailboxAddress<M>)> {
        self.peers
            .read()
            .iter()
            .map(|(peer, address)| (peer.clone(), address.clone()))
            .collect()
    }
}
