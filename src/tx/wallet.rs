//! Signing accounts per chain and role

use crate::chain::{ChainClient, ChainKind, ChainManager, ChainMover};
use crate::config::WalletConfig;
use crate::error::{FinalizerError, FinalizerResult};

use async_trait::async_trait;
use ethers::middleware::SignerMiddleware;
use ethers::prelude::*;
use ethers::providers::{Http, Provider};
use ethers::signers::{LocalWallet, Signer};
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Role an account plays for the finalizer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WalletRole {
    /// Account that initiates interop requests
    User,
    /// Account the finalizer itself spends from
    Finalizer,
}

impl fmt::Display for WalletRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WalletRole::User => f.write_str("user"),
            WalletRole::Finalizer => f.write_str("finalizer"),
        }
    }
}

pub type ChainSigner = SignerMiddleware<Provider<Http>, LocalWallet>;

/// Hands out signers per `(chain, role)`
pub struct AccountProvider {
    wallets: HashMap<WalletRole, LocalWallet>,
    chains: Arc<ChainManager>,
}

impl AccountProvider {
    /// Load keys from the environment variables named in the wallet config
    pub fn from_config(config: &WalletConfig, chains: Arc<ChainManager>) -> FinalizerResult<Self> {
        let mut wallets = HashMap::new();

        for (role, env_name) in [
            (WalletRole::User, &config.user_private_key_env),
            (WalletRole::Finalizer, &config.finalizer_private_key_env),
        ] {
            let Some(env_name) = env_name else {
                continue;
            };
            let wallet = load_wallet(env_name)?;
            info!("Loaded {} wallet {:?}", role, wallet.address());
            wallets.insert(role, wallet);
        }

        Ok(Self::new(wallets, chains))
    }

    pub fn new(wallets: HashMap<WalletRole, LocalWallet>, chains: Arc<ChainManager>) -> Self {
        Self { wallets, chains }
    }

    fn wallet(&self, role: WalletRole) -> FinalizerResult<&LocalWallet> {
        self.wallets.get(&role).ok_or_else(|| {
            FinalizerError::InvalidConfiguration(format!("no {} wallet configured", role))
        })
    }

    /// Address of the account behind a role
    pub fn address(&self, role: WalletRole) -> FinalizerResult<Address> {
        Ok(self.wallet(role)?.address())
    }

    /// Signer middleware for `role` on `chain`
    pub fn signer(&self, chain: &ChainKind, role: WalletRole) -> FinalizerResult<Arc<ChainSigner>> {
        let wallet = self.wallet(role)?.clone();
        let provider = self.chains.get_provider(chain).map_err(|_| {
            FinalizerError::InvalidConfiguration(format!("no chain {} for {} signer", chain, role))
        })?;

        let chain_id = ChainClient::chain_id(provider.as_ref());
        debug!("Building {} signer for chain {} ({})", role, chain, chain_id);

        Ok(Arc::new(SignerMiddleware::new(
            provider.http().as_ref().clone(),
            wallet.with_chain_id(chain_id),
        )))
    }

    /// Block-production mover backed by the finalizer account on `chain`
    pub fn mover(&self, chain: &ChainKind) -> FinalizerResult<WalletMover> {
        Ok(WalletMover {
            chain: chain.clone(),
            signer: self.signer(chain, WalletRole::Finalizer)?,
        })
    }
}

fn load_wallet(env_name: &str) -> FinalizerResult<LocalWallet> {
    let key = std::env::var(env_name)
        .map_err(|_| FinalizerError::Wallet(format!("{} is not set", env_name)))?;
    key.trim()
        .parse::<LocalWallet>()
        .map_err(|e| FinalizerError::Wallet(format!("Invalid private key in {}: {}", env_name, e)))
}

/// Produces blocks on a chain with zero-value self transfers
pub struct WalletMover {
    chain: ChainKind,
    signer: Arc<ChainSigner>,
}

#[async_trait]
impl ChainMover for WalletMover {
    async fn move_chain(&self) -> FinalizerResult<H256> {
        let address = self.signer.address();
        let tx = TransactionRequest::new()
            .from(address)
            .to(address)
            .value(U256::zero());

        let pending = self
            .signer
            .send_transaction(tx, None)
            .await
            .map_err(|e| FinalizerError::BroadcastFailed(e.to_string()))?;

        let tx_hash = pending.tx_hash();
        debug!("Block production nudge on {}: {:?}", self.chain, tx_hash);

        let receipt = pending
            .await
            .map_err(|e| FinalizerError::ChainConnection {
                chain_id: self.signer.signer().chain_id(),
                message: e.to_string(),
            })?
            .ok_or_else(|| {
                FinalizerError::BroadcastFailed(format!("nudge {:?} dropped from mempool", tx_hash))
            })?;
        check_included(tx_hash, &receipt)?;

        debug!(
            "Block production nudge {:?} included in block {:?}",
            tx_hash, receipt.block_number
        );
        Ok(tx_hash)
    }
}

/// A mover transaction only counts once it landed with success status
fn check_included(tx_hash: H256, receipt: &TransactionReceipt) -> FinalizerResult<()> {
    match receipt.status.map(|s| s.as_u64()) {
        Some(1) => Ok(()),
        status => Err(FinalizerError::BroadcastFailed(format!(
            "nudge {:?} reverted (status {:?})",
            tx_hash, status
        ))),
    }
}
