//! Withdrawal proofs and interop message decoding
//!
//! Handles:
//! - Locating the gateway batch inside a layered Merkle inclusion proof
//! - Schema-driven decoding of interop triggers and bundles
//! - Re-encoding messages with their inclusion proofs for the destination verifier

pub mod abi;
pub mod decoder;

pub use abi::{InteropBundle, InteropTrigger};
pub use decoder::{extract_message, resolve_gateway_batch, DecodedMessage};

use ethers::types::{Address, Bytes, H256};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Gas per pubdata byte every interop trigger must request
pub const REQUIRED_L2_GAS_PRICE_PER_PUBDATA: u64 = 800;

/// Proof flavour requested from the source chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProofMode {
    /// Proof against the gateway chain's aggregated batch root
    #[serde(rename = "proof_based_gw")]
    ProofBasedGateway,
}

/// Message, proof and position of one L2→L1 message, as served by the source chain
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProofBundle {
    /// Layered Merkle inclusion proof; element 0 is metadata
    pub proof: Vec<H256>,
    /// Raw message bytes, identifier byte included
    pub message: Bytes,
    /// Contract that sent the message
    pub sender: Address,
    pub l1_batch_number: u64,
    pub l2_tx_number_in_block: u16,
    pub l2_message_index: u64,
}

/// Errors raised while decoding proofs and interop messages
#[derive(Error, Debug)]
pub enum DecodeError {
    #[error("proof is empty")]
    EmptyProof,

    #[error("proof has {len} elements, gateway batch root expected at index {index}")]
    ProofTooShort { index: usize, len: usize },

    #[error("message is empty")]
    EmptyMessage,

    #[error("ABI decoding failed: {0}")]
    Abi(#[from] alloy_sol_types::Error),

    #[error("message at log index {log_index} is not an interop trigger (gas per pubdata {found})")]
    TriggerNotFound { log_index: usize, found: String },

    #[error("message sent by {found:?}, expected the interop center {expected:?}")]
    UnexpectedSender { expected: Address, found: Address },
}
