//! Error types for the TPU fanout sender.

use solana_client::client_error::ClientError;
use solana_client::nonblocking::pubsub_client::PubsubClientError;
use solana_sdk::signer::SignerError;
use thiserror::Error;

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, TpuSenderError>;

/// Failures surfaced by the sender and its leader-tracking machinery.
///
/// Fetch failures inside the refresh loop are logged and retried there;
/// everything below propagates to the immediate caller instead.
#[derive(Debug, Error)]
pub enum TpuSenderError {
    #[error("rpc error: {0}")]
    Rpc(#[from] ClientError),
    #[error("pubsub error: {0}")]
    Pubsub(#[from] PubsubClientError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("signer error: {0}")]
    Signer(#[from] SignerError),
    /// The slot estimator was asked for an estimate before any slot was
    /// ever recorded.
    #[error("no recent slots recorded")]
    NoRecentSlots,
    /// Caller passed a transaction/signers pairing that cannot be signed
    /// or has already been signed. Rejected before any network activity.
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),
    /// Raw bytes parse as neither a legacy nor a versioned transaction,
    /// or carry no signature to report.
    #[error("invalid wire transaction: {0}")]
    InvalidWireTransaction(String),
    #[error("{0}")]
    Custom(String),
}
