//! Finalizer service: wires chains, wallets and persistence into runners

use super::machine::FinalizationStateMachine;
use super::queue::RequestBook;
use super::request::InteropRequest;
use super::runner::FinalizerRunner;
use crate::chain::{ChainKind, ChainManager, ChainMover, FinalityOracle};
use crate::config::{ContractAddresses, FinalizerConfig};
use crate::error::{FinalizerError, FinalizerResult};
use crate::state::{RequestStats, StateManager};
use crate::tx::{AccountProvider, TransactionAssembler};

use ethers::types::H256;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Owns the request book and spawns one runner per destination rollup
pub struct FinalizerService {
    /// Chain manager for multi-chain access
    chain_manager: Arc<ChainManager>,
    /// Queues, status index and completed log
    book: Arc<RequestBook>,
    /// Optional durable state
    state_manager: Option<Arc<StateManager>>,
    /// Signing accounts, when any key is configured
    accounts: Option<Arc<AccountProvider>>,
    config: FinalizerConfig,
    contracts: ContractAddresses,
}

impl FinalizerService {
    pub fn new(
        chain_manager: Arc<ChainManager>,
        state_manager: Option<Arc<StateManager>>,
        accounts: Option<Arc<AccountProvider>>,
        config: FinalizerConfig,
        contracts: ContractAddresses,
    ) -> Self {
        let book = Arc::new(RequestBook::new(state_manager.clone()));
        Self {
            chain_manager,
            book,
            state_manager,
            accounts,
            config,
            contracts,
        }
    }

    pub fn book(&self) -> Arc<RequestBook> {
        self.book.clone()
    }

    /// Request counts, from the database when one is configured
    pub async fn stats(&self) -> FinalizerResult<RequestStats> {
        match &self.state_manager {
            Some(state_manager) => state_manager.get_stats().await,
            None => Ok(self.book.stats()),
        }
    }

    /// Re-enqueue the unfinished requests of a previous run
    pub async fn restore_pending(&self) -> FinalizerResult<usize> {
        let Some(state_manager) = &self.state_manager else {
            return Ok(0);
        };

        let mut restored = 0;
        for snapshot in state_manager.load_pending().await? {
            let source = match self.chain_manager.client(&snapshot.from) {
                Ok(source) => source,
                Err(e) => {
                    warn!(
                        "Skipping persisted request {:?}: {}",
                        snapshot.source_tx_hash, e
                    );
                    continue;
                }
            };
            self.book
                .restore(InteropRequest::restore(snapshot, source))
                .await;
            restored += 1;
        }

        info!("Restored {} pending requests", restored);
        Ok(restored)
    }

    /// Enqueue API: parse identifiers and hand the request to its queue
    pub async fn submit(&self, from: &str, to: &str, source_tx_hash: &str) -> FinalizerResult<()> {
        let from: ChainKind = from.parse()?;
        let to: ChainKind = to.parse()?;
        let source_tx_hash = parse_tx_hash(source_tx_hash)?;

        let source = self.chain_manager.client(&from)?;
        self.book.add_request(from, to, source_tx_hash, source).await
    }

    /// Build the runner of a destination chain
    pub fn runner_for(&self, chain: &ChainKind) -> FinalizerResult<FinalizerRunner> {
        if !chain.is_finalization_target() {
            return Err(FinalizerError::UnsupportedChain {
                chain: chain.to_string(),
            });
        }

        let target = self.chain_manager.client(chain)?;
        let machine = FinalizationStateMachine::new(
            target.clone(),
            FinalityOracle::new(chain.clone(), target),
            TransactionAssembler::new(self.contracts.clone()),
            self.mover_for(chain),
            self.config.gateway_chain_id,
            self.contracts.interop_center,
        );

        FinalizerRunner::new(
            chain.clone(),
            self.book.clone(),
            machine,
            self.config.poll_intervals(),
            self.config.request_timeout(),
        )
    }

    fn mover_for(&self, chain: &ChainKind) -> Option<Arc<dyn ChainMover>> {
        if !self.config.force_block_production {
            return None;
        }
        let accounts = self.accounts.as_ref()?;
        match accounts.mover(chain) {
            Ok(mover) => Some(Arc::new(mover)),
            Err(e) => {
                warn!("No block production mover for {}: {}", chain, e);
                None
            }
        }
    }

    /// Spawn one runner task per connected rollup
    pub fn spawn(&self, cancel: &CancellationToken) -> FinalizerResult<Vec<JoinHandle<()>>> {
        let mut handles = Vec::new();

        for chain in self.chain_manager.finalization_targets() {
            let runner = self.runner_for(&chain)?;
            let cancel = cancel.child_token();
            handles.push(tokio::spawn(async move {
                if let Err(e) = runner.run(cancel).await {
                    error!("Finalizer for {} exited: {}", chain, e);
                }
            }));
        }

        info!("Started {} finalizer runners", handles.len());
        Ok(handles)
    }
}

pub(crate) fn parse_tx_hash(value: &str) -> FinalizerResult<H256> {
    let hex = value.strip_prefix("0x").unwrap_or(value);
    if hex.len() != 64 {
        return Err(FinalizerError::MalformedIdentifier(format!(
            "transaction hash {:?} is not 32 bytes",
            value
        )));
    }
    let bytes = hex::decode(hex).map_err(|e| {
        FinalizerError::MalformedIdentifier(format!("transaction hash {:?}: {}", value, e))
    })?;
    Ok(H256::from_slice(&bytes))
}
