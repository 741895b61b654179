//! Interop requests and their finalization status

use crate::chain::{ChainClient, ChainKind};
use crate::error::{FinalizerError, FinalizerResult};

use chrono::{DateTime, Utc};
use ethers::types::H256;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

/// Finalization stage of a request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Initiated,
    WaitingSourceFinality,
    WaitingGatewayFinality,
    WaitingTargetRootIngestion,
    Broadcasting,
    Finalized,
    Failed,
}

impl RequestStatus {
    fn rank(self) -> u8 {
        match self {
            RequestStatus::Initiated => 0,
            RequestStatus::WaitingSourceFinality => 1,
            RequestStatus::WaitingGatewayFinality => 2,
            RequestStatus::WaitingTargetRootIngestion => 3,
            RequestStatus::Broadcasting => 4,
            RequestStatus::Finalized => 5,
            RequestStatus::Failed => 6,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Finalized | RequestStatus::Failed)
    }

    /// Stages advance one at a time; `Failed` is reachable from any live stage
    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        match next {
            RequestStatus::Failed => true,
            next => next.rank() == self.rank() + 1,
        }
    }

    /// Stage following this one on the success path
    pub fn next(self) -> Option<RequestStatus> {
        match self {
            RequestStatus::Initiated => Some(RequestStatus::WaitingSourceFinality),
            RequestStatus::WaitingSourceFinality => Some(RequestStatus::WaitingGatewayFinality),
            RequestStatus::WaitingGatewayFinality => Some(RequestStatus::WaitingTargetRootIngestion),
            RequestStatus::WaitingTargetRootIngestion => Some(RequestStatus::Broadcasting),
            RequestStatus::Broadcasting => Some(RequestStatus::Finalized),
            RequestStatus::Finalized | RequestStatus::Failed => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Initiated => "initiated",
            RequestStatus::WaitingSourceFinality => "waiting_source_finality",
            RequestStatus::WaitingGatewayFinality => "waiting_gateway_finality",
            RequestStatus::WaitingTargetRootIngestion => "waiting_target_root_ingestion",
            RequestStatus::Broadcasting => "broadcasting",
            RequestStatus::Finalized => "finalized",
            RequestStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = FinalizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "initiated" => RequestStatus::Initiated,
            "waiting_source_finality" => RequestStatus::WaitingSourceFinality,
            "waiting_gateway_finality" => RequestStatus::WaitingGatewayFinality,
            "waiting_target_root_ingestion" => RequestStatus::WaitingTargetRootIngestion,
            "broadcasting" => RequestStatus::Broadcasting,
            "finalized" => RequestStatus::Finalized,
            "failed" => RequestStatus::Failed,
            other => {
                return Err(FinalizerError::Internal(format!(
                    "unknown request status {}",
                    other
                )))
            }
        })
    }
}

/// One cross-chain message on its way to the target chain
#[derive(Clone)]
pub struct InteropRequest {
    pub from: ChainKind,
    pub to: ChainKind,
    pub source_tx_hash: H256,
    /// Resolved from the source receipt when not known at enqueue time
    pub source_block_number: Option<u64>,
    /// Gateway batch aggregating the request, once its proof resolves
    pub gateway_batch: Option<u128>,
    /// Source chain handle
    pub source: Arc<dyn ChainClient>,
    status: RequestStatus,
    error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    /// When the request first reached the head of its queue
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl InteropRequest {
    pub fn new(
        from: ChainKind,
        to: ChainKind,
        source_tx_hash: H256,
        source: Arc<dyn ChainClient>,
    ) -> Self {
        let now = Utc::now();
        Self {
            from,
            to,
            source_tx_hash,
            source_block_number: None,
            gateway_batch: None,
            source,
            status: RequestStatus::Initiated,
            error: None,
            enqueued_at: now,
            started_at: None,
            updated_at: now,
        }
    }

    /// Rebuild a request from its persisted snapshot
    pub fn restore(snapshot: RequestSnapshot, source: Arc<dyn ChainClient>) -> Self {
        Self {
            from: snapshot.from,
            to: snapshot.to,
            source_tx_hash: snapshot.source_tx_hash,
            source_block_number: snapshot.source_block_number,
            gateway_batch: snapshot.gateway_batch,
            source,
            status: snapshot.status,
            error: snapshot.error,
            enqueued_at: snapshot.enqueued_at,
            started_at: snapshot.started_at,
            updated_at: snapshot.updated_at,
        }
    }

    pub fn status(&self) -> RequestStatus {
        self.status
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Stamp the first time the request is worked on.
    ///
    /// Returns `true` if this call set the stamp.
    pub fn start(&mut self) -> bool {
        if self.started_at.is_some() {
            return false;
        }
        self.started_at = Some(Utc::now());
        true
    }

    /// Move to the next stage
    pub fn advance(&mut self, next: RequestStatus) -> FinalizerResult<()> {
        if next == RequestStatus::Failed || !self.status.can_transition_to(next) {
            return Err(FinalizerError::InvalidStateTransition {
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Absorb a fatal error
    pub fn fail(&mut self, error: &FinalizerError) -> FinalizerResult<()> {
        if !self.status.can_transition_to(RequestStatus::Failed) {
            return Err(FinalizerError::InvalidStateTransition {
                from: self.status.to_string(),
                to: RequestStatus::Failed.to_string(),
            });
        }
        self.status = RequestStatus::Failed;
        self.error = Some(error.to_string());
        self.updated_at = Utc::now();
        Ok(())
    }

    pub fn snapshot(&self) -> RequestSnapshot {
        RequestSnapshot {
            from: self.from.clone(),
            to: self.to.clone(),
            source_tx_hash: self.source_tx_hash,
            source_block_number: self.source_block_number,
            gateway_batch: self.gateway_batch,
            status: self.status,
            error: self.error.clone(),
            enqueued_at: self.enqueued_at,
            started_at: self.started_at,
            updated_at: self.updated_at,
        }
    }
}

impl fmt::Debug for InteropRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InteropRequest")
            .field("from", &self.from)
            .field("to", &self.to)
            .field("source_tx_hash", &self.source_tx_hash)
            .field("source_block_number", &self.source_block_number)
            .field("gateway_batch", &self.gateway_batch)
            .field("status", &self.status)
            .field("error", &self.error)
            .field("started_at", &self.started_at)
            .finish()
    }
}

/// Serializable view of a request, as persisted and reported
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestSnapshot {
    pub from: ChainKind,
    pub to: ChainKind,
    pub source_tx_hash: H256,
    pub source_block_number: Option<u64>,
    pub gateway_batch: Option<u128>,
    pub status: RequestStatus,
    pub error: Option<String>,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
