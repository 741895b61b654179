//! Destination transaction assembly, envelopes and signing accounts

pub mod assembler;
pub mod envelope;
mod gas;
pub mod wallet;

pub use assembler::TransactionAssembler;
pub use gas::FeeData;
pub use wallet::AccountProvider;
