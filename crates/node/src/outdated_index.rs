//! Outdated index issue tracking
//!
//! Every node answers `OutdatedIndexRequest`s with the union of its worker
//! threads' outdated index maps. Collecting issues fans a request out to every
//! known peer under one deadline; peers that fail or miss the deadline simply
//! contribute nothing. All outdated indexes in the cluster collapse into at
//! most one issue.

use crate::issues::{GlobalIssue, IssueSource, OutdatedIndexIssue};
use crate::mailbox::{self, MailboxAddress, PeerDirectory, ReplyAddress};
use async_trait::async_trait;
use futures_util::stream::{FuturesUnordered, StreamExt};
use nk_core::{Interruptor, ThreadPool};
use std::sync::Arc;
use std::time::Duration;
use storage::outdated::merge_into;
use storage::{OutdatedIndexMap, OutdatedIndexTracker};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Ask a node for its local outdated indexes
pub struct OutdatedIndexRequest {
    pub reply: ReplyAddress<OutdatedIndexMap>,
}

/// The node-local state a tracker reads from once storage is up
#[derive(Clone)]
pub struct LocalIndexes {
    pub pool: Arc<ThreadPool>,
    pub tracker: Arc<OutdatedIndexTracker>,
}

pub struct OutdatedIndexIssueTracker {
    local: Option<LocalIndexes>,
    peers: PeerDirectory<OutdatedIndexRequest>,
    timeout: Duration,
}

impl OutdatedIndexIssueTracker {
    /// `local` is `None` while the node's storage is not running yet
    pub fn new(
        local: Option<LocalIndexes>,
        peers: PeerDirectory<OutdatedIndexRequest>,
        timeout: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            local,
            peers,
            timeout,
        })
    }

    /// Union of every worker thread's map on this node
    pub async fn collect_local_indexes(&self) -> OutdatedIndexMap {
        let Some(local) = &self.local else {
            return OutdatedIndexMap::new();
        };
        match local.tracker.collect_local(&local.pool).await {
            Ok(map) => map,
            Err(e) => {
                warn!(error = %e, "Failed to collect local outdated indexes");
                OutdatedIndexMap::new()
            }
        }
    }

    /// Answer one peer request
    pub async fn handle_request(&self, request: OutdatedIndexRequest) {
        let map = self.collect_local_indexes().await;
        if !request.reply.send(map) {
            debug!("Requester stopped waiting for outdated indexes");
        }
    }

    /// Serve requests until every address is dropped
    pub fn spawn_mailbox_server(self: &Arc<Self>) -> (MailboxAddress<OutdatedIndexRequest>, JoinHandle<()>) {
        let (address, mut inbox) = mailbox::mailbox::<OutdatedIndexRequest>();
        let tracker = self.clone();
        let handle = tokio::spawn(async move {
            while let Some(request) = inbox.recv().await {
                let tracker = tracker.clone();
                tokio::spawn(async move { tracker.handle_request(request).await });
            }
            debug!("Outdated index mailbox closed");
        });
        (address, handle)
    }

    /// Union of the maps of every peer that answers before the deadline
    pub async fn collect_all_indexes(&self) -> OutdatedIndexMap {
        let interruptor = Interruptor::new();
        let timer = {
            let interruptor = interruptor.clone();
            let timeout = self.timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                interruptor.cancel();
            })
        };

        let peers = self.peers.peers();
        let mut requests: FuturesUnordered<_> = peers
            .iter()
            .map(|(peer, address)| {
                let interruptor = &interruptor;
                async move {
                    let reply =
                        mailbox::request(address, |reply| OutdatedIndexRequest { reply }, interruptor).await;
                    (peer, reply)
                }
            })
            .collect();

        let mut merged = OutdatedIndexMap::new();
        let mut answered = 0;
        while let Some((peer, reply)) = requests.next().await {
            match reply {
                Ok(map) => {
                    answered += 1;
                    merge_into(&mut merged, map);
                }
                Err(e) => warn!(peer = %peer, error = %e, "Peer did not report outdated indexes"),
            }
        }
        timer.abort();
        debug!(peers = peers.len(), answered, tables = merged.len(), "Collected outdated indexes");
        merged
    }
}

#[async_trait]
impl IssueSource for OutdatedIndexIssueTracker {
    async fn get_issues(&self) -> Vec<Box<dyn GlobalIssue>> {
        let indexes = self.collect_all_indexes().await;
        if indexes.is_empty() {
            return Vec::new();
        }
        info!(tables = indexes.len(), "Reporting outdated indexes");
        let issue: Box<dyn GlobalIssue> = Box::new(OutdatedIndexIssue::new(indexes));
        vec![issue]
    }
}
