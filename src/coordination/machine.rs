//! Per-stage polling of a single interop request

use super::request::{InteropRequest, RequestStatus};
use crate::chain::{ChainClient, ChainMover, FinalityOracle};
use crate::error::{FinalizerError, FinalizerResult};
use crate::proof::decoder::decode_message;
use crate::proof::{resolve_gateway_batch, InteropTrigger, ProofMode};
use crate::tx::assembler::TRIGGER_LOG_INDEX;
use crate::tx::TransactionAssembler;

use ethers::types::Address;
use std::sync::Arc;
use tracing::{debug, info};

/// Drives requests for one target chain through their stages
pub struct FinalizationStateMachine {
    target: Arc<dyn ChainClient>,
    oracle: FinalityOracle,
    assembler: TransactionAssembler,
    mover: Option<Arc<dyn ChainMover>>,
    gateway_chain_id: u64,
    interop_center: Address,
}

impl FinalizationStateMachine {
    pub fn new(
        target: Arc<dyn ChainClient>,
        oracle: FinalityOracle,
        assembler: TransactionAssembler,
        mover: Option<Arc<dyn ChainMover>>,
        gateway_chain_id: u64,
        interop_center: Address,
    ) -> Self {
        Self {
            target,
            oracle,
            assembler,
            mover,
            gateway_chain_id,
            interop_center,
        }
    }

    /// Poll the request's current stage once.
    ///
    /// `Ok(true)` when the request moved to the next stage, `Ok(false)` when
    /// the stage is not ready yet. Errors leave the request untouched.
    pub async fn poll(&self, request: &mut InteropRequest) -> FinalizerResult<bool> {
        let ready = match request.status() {
            RequestStatus::Initiated => true,
            RequestStatus::WaitingSourceFinality => self.poll_source_finality(request).await?,
            RequestStatus::WaitingGatewayFinality => self.poll_gateway_finality(request).await?,
            RequestStatus::WaitingTargetRootIngestion => self.poll_root_ingestion(request).await?,
            RequestStatus::Broadcasting => self.poll_broadcast(request).await?,
            RequestStatus::Finalized | RequestStatus::Failed => return Ok(false),
        };

        if !ready {
            return Ok(false);
        }

        let next = request
            .status()
            .next()
            .ok_or_else(|| FinalizerError::Internal("no stage after a live one".to_string()))?;
        request.advance(next)?;
        debug!("Request {:?} -> {}", request.source_tx_hash, next);
        Ok(true)
    }

    async fn poll_source_finality(&self, request: &mut InteropRequest) -> FinalizerResult<bool> {
        if request.source_block_number.is_none() {
            let Some(receipt) = request
                .source
                .get_transaction_receipt(request.source_tx_hash)
                .await?
            else {
                debug!("Source tx {:?} not mined yet", request.source_tx_hash);
                return Ok(false);
            };
            let Some(block) = receipt.block_number else {
                return Ok(false);
            };
            request.source_block_number = Some(block.as_u64());
        }

        self.oracle.is_finalized_on_source(request).await
    }

    async fn poll_gateway_finality(&self, request: &mut InteropRequest) -> FinalizerResult<bool> {
        let Some(bundle) = request
            .source
            .get_withdrawal_proof(
                request.source_tx_hash,
                TRIGGER_LOG_INDEX,
                ProofMode::ProofBasedGateway,
            )
            .await?
        else {
            return Ok(false);
        };

        decode_message::<InteropTrigger>(
            &bundle,
            request.source.chain_id(),
            TRIGGER_LOG_INDEX,
            self.interop_center,
        )?;
        let batch = resolve_gateway_batch(&bundle.proof)?;

        info!(
            "Request {:?} aggregated in gateway batch {}",
            request.source_tx_hash, batch
        );
        request.gateway_batch = Some(batch);
        Ok(true)
    }

    async fn poll_root_ingestion(&self, request: &mut InteropRequest) -> FinalizerResult<bool> {
        let batch = request.gateway_batch.ok_or_else(|| {
            FinalizerError::Internal(format!(
                "request {:?} waits for a root without a gateway batch",
                request.source_tx_hash
            ))
        })?;

        if self
            .oracle
            .has_non_zero_interop_root(self.gateway_chain_id, batch)
            .await?
        {
            return Ok(true);
        }

        if let Some(mover) = &self.mover {
            self.oracle.force_block_production(mover.as_ref()).await;
        }
        Ok(false)
    }

    async fn poll_broadcast(&self, request: &mut InteropRequest) -> FinalizerResult<bool> {
        let receipt = self
            .assembler
            .assemble_and_broadcast(
                request.source.as_ref(),
                self.target.as_ref(),
                request.source_tx_hash,
            )
            .await?;
        Ok(receipt.is_some())
    }
}
