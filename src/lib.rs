//! tpu-fanout
//!
//! Direct UDP client for Solana TPU transaction submission. Sends
//! pre-signed transactions straight to the current and upcoming leaders'
//! transaction ports, bypassing the RPC broadcast path.
//!
//! ## Features
//!
//! - Current-slot estimation from websocket slot notifications
//! - Continuously refreshed leader schedule and TPU contact cache
//! - Deduplicated fanout to the next N distinct leaders
//! - Legacy and versioned transaction support
//!
//! ## Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use solana_client::nonblocking::rpc_client::RpcClient;
//! use tpu_fanout::{TpuClient, TpuClientConfig};
//!
//! # async fn example(wire_transaction: Vec<u8>) -> tpu_fanout::Result<()> {
//! let rpc_client = Arc::new(RpcClient::new("https://api.mainnet-beta.solana.com".to_string()));
//! let client = TpuClient::new(
//!     rpc_client,
//!     Some("wss://api.mainnet-beta.solana.com"),
//!     TpuClientConfig::default(),
//! )
//! .await?;
//!
//! let signature = client.send_raw_transaction(&wire_transaction).await?;
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]

mod client;
mod errors;
pub mod tracker;

// Re-export main types
pub use client::{SendableTransaction, TpuClient, TpuClientConfig};
pub use errors::{Result, TpuSenderError};
pub use tracker::{LeaderTpuCache, LeaderTpuService, SlotEstimator};
