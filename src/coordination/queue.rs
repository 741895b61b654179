//! Per-chain request queues and the request book that owns them

use super::request::{InteropRequest, RequestSnapshot, RequestStatus};
use crate::chain::{ChainClient, ChainKind};
use crate::error::{FinalizerError, FinalizerResult};
use crate::state::{RequestStats, StateManager};

use dashmap::DashMap;
use ethers::types::H256;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

/// FIFO backlog of requests for one destination chain
#[derive(Default)]
pub struct RequestQueue {
    requests: Mutex<VecDeque<InteropRequest>>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn enqueue(&self, request: InteropRequest) -> usize {
        let mut requests = self.requests.lock().await;
        requests.push_back(request);
        requests.len()
    }

    /// Copy of the head of the queue
    pub async fn peek_head(&self) -> Option<InteropRequest> {
        self.requests.lock().await.front().cloned()
    }

    pub async fn dequeue_head(&self) -> Option<InteropRequest> {
        self.requests.lock().await.pop_front()
    }

    /// Overwrite the head with its latest state, if it is still the same request
    pub async fn replace_head(&self, request: InteropRequest) {
        let mut requests = self.requests.lock().await;
        match requests.front_mut() {
            Some(head) if head.source_tx_hash == request.source_tx_hash => *head = request,
            _ => warn!(
                "Queue head changed under {:?}, not writing it back",
                request.source_tx_hash
            ),
        }
    }

    pub async fn len(&self) -> usize {
        self.requests.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.requests.lock().await.is_empty()
    }
}

/// Owner of all per-chain queues, the status index and the completed log
pub struct RequestBook {
    /// Queues keyed by destination chain
    queues: DashMap<ChainKind, Arc<RequestQueue>>,
    /// Latest known state of every request, keyed by source tx hash
    index: DashMap<H256, RequestSnapshot>,
    /// Finalized and failed requests in completion order
    completed: RwLock<Vec<RequestSnapshot>>,
    /// Optional durable mirror
    state_manager: Option<Arc<StateManager>>,
}

impl RequestBook {
    pub fn new(state_manager: Option<Arc<StateManager>>) -> Self {
        Self {
            queues: DashMap::new(),
            index: DashMap::new(),
            completed: RwLock::new(Vec::new()),
            state_manager,
        }
    }

    /// Queue of a destination chain, created on first use
    pub fn queue(&self, chain: &ChainKind) -> Arc<RequestQueue> {
        self.queues
            .entry(chain.clone())
            .or_insert_with(|| Arc::new(RequestQueue::new()))
            .clone()
    }

    /// Enqueue a request for `to`.
    ///
    /// A source transaction that is already known is ignored.
    pub async fn add_request(
        &self,
        from: ChainKind,
        to: ChainKind,
        source_tx_hash: H256,
        source: Arc<dyn ChainClient>,
    ) -> FinalizerResult<()> {
        if !to.is_finalization_target() {
            return Err(FinalizerError::UnsupportedChain {
                chain: to.to_string(),
            });
        }

        let request = InteropRequest::new(from, to, source_tx_hash, source);
        match self.index.entry(source_tx_hash) {
            dashmap::mapref::entry::Entry::Occupied(existing) => {
                warn!(
                    "Ignoring duplicate request {:?} (already {})",
                    source_tx_hash,
                    existing.get().status
                );
                return Ok(());
            }
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(request.snapshot());
            }
        }

        self.persist(&request.snapshot()).await;

        let chain = request.to.clone();
        info!(
            "Enqueued {:?} from {} to {}",
            source_tx_hash, request.from, chain
        );
        let depth = self.queue(&chain).enqueue(request).await;
        crate::metrics::record_request_enqueued(&chain);
        crate::metrics::record_queue_depth(&chain, depth);
        Ok(())
    }

    /// Re-enqueue a request recovered from persistence, keeping its progress
    pub async fn restore(&self, request: InteropRequest) {
        if request.status().is_terminal() {
            self.index
                .insert(request.source_tx_hash, request.snapshot());
            return;
        }
        if self.index.contains_key(&request.source_tx_hash) {
            return;
        }

        debug!(
            "Restoring {:?} at {} for {}",
            request.source_tx_hash,
            request.status(),
            request.to
        );
        self.index
            .insert(request.source_tx_hash, request.snapshot());
        let chain = request.to.clone();
        let depth = self.queue(&chain).enqueue(request).await;
        crate::metrics::record_queue_depth(&chain, depth);
    }

    /// Mirror a state change of a live request.
    ///
    /// Returns `false` when the indexed request is already terminal, in
    /// which case nothing is recorded.
    pub async fn record(&self, request: &InteropRequest) -> bool {
        let snapshot = request.snapshot();
        let mut previous = None;
        let known = match self.index.get_mut(&request.source_tx_hash) {
            Some(mut entry) => {
                if entry.status.is_terminal() {
                    if *entry != snapshot {
                        warn!(
                            "Refusing to overwrite {} request {:?} with {}",
                            entry.status, request.source_tx_hash, snapshot.status
                        );
                    }
                    return false;
                }
                previous = Some(entry.status);
                *entry = snapshot.clone();
                true
            }
            None => false,
        };
        if !known {
            self.index.insert(request.source_tx_hash, snapshot.clone());
        }

        if previous != Some(request.status()) {
            crate::metrics::record_transition(&request.to, request.status());
        }
        self.persist(&snapshot).await;

        if request.status().is_terminal() {
            self.completed.write().await.push(snapshot);
        }
        true
    }

    /// Latest status of a request
    pub fn request_status(&self, source_tx_hash: &H256) -> Option<RequestStatus> {
        self.index.get(source_tx_hash).map(|entry| entry.status)
    }

    pub fn request(&self, source_tx_hash: &H256) -> Option<RequestSnapshot> {
        self.index.get(source_tx_hash).map(|entry| entry.clone())
    }

    /// Every known request, oldest first
    pub fn requests(&self) -> Vec<RequestSnapshot> {
        let mut all: Vec<_> = self.index.iter().map(|entry| entry.clone()).collect();
        all.sort_by_key(|snapshot| snapshot.enqueued_at);
        all
    }

    /// Request counts per status, as known to this process
    pub fn stats(&self) -> RequestStats {
        let mut stats = RequestStats::default();
        for entry in self.index.iter() {
            match entry.status {
                RequestStatus::Finalized => stats.finalized += 1,
                RequestStatus::Failed => stats.failed += 1,
                _ => stats.pending += 1,
            }
        }
        stats
    }

    /// Finalized and failed requests in completion order
    pub async fn completed(&self) -> Vec<RequestSnapshot> {
        self.completed.read().await.clone()
    }

    async fn persist(&self, snapshot: &RequestSnapshot) {
        if let Some(state_manager) = &self.state_manager {
            if let Err(e) = state_manager.upsert_request(snapshot).await {
                warn!(
                    "Failed to persist request {:?}: {}",
                    snapshot.source_tx_hash, e
                );
            }
        }
    }
}
