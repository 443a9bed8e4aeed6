//! TpuClient - direct UDP submission of signed transactions to leaders.
//!
//! Resolves the upcoming leaders' TPU sockets through the refresh service
//! and fans a single serialized transaction out to each of them. Sends are
//! fire-and-forget datagrams; confirmation is the caller's business against
//! the RPC interface.

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::future::join_all;
use log::debug;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::signature::Signature;
use solana_sdk::signers::Signers;
use solana_sdk::transaction::{uses_durable_nonce, Transaction, VersionedTransaction};
use tokio::net::UdpSocket;

use crate::errors::{Result, TpuSenderError};
use crate::tracker::{LeaderTpuService, Slot, DEFAULT_FANOUT_SLOTS, MAX_FANOUT_SLOTS};

/// Configuration for the fanout sender.
#[derive(Debug, Clone)]
pub struct TpuClientConfig {
    /// Number of upcoming slots whose leaders receive each transaction.
    /// Values outside `[1, MAX_FANOUT_SLOTS]` are clamped at construction.
    pub fanout_slots: u64,
}

impl Default for TpuClientConfig {
    fn default() -> Self {
        Self {
            fanout_slots: DEFAULT_FANOUT_SLOTS,
        }
    }
}

impl TpuClientConfig {
    fn clamped_fanout_slots(&self) -> u64 {
        self.fanout_slots.clamp(1, MAX_FANOUT_SLOTS)
    }
}

/// A transaction in either wire format, decided once at the send boundary.
#[derive(Debug, Clone)]
pub enum SendableTransaction {
    /// Legacy-format transaction; sent unsigned together with its signers.
    Legacy(Transaction),
    /// Versioned transaction; must arrive already signed.
    Versioned(VersionedTransaction),
}

impl From<Transaction> for SendableTransaction {
    fn from(transaction: Transaction) -> Self {
        Self::Legacy(transaction)
    }
}

impl From<VersionedTransaction> for SendableTransaction {
    fn from(transaction: VersionedTransaction) -> Self {
        Self::Versioned(transaction)
    }
}

/// Client that sends transactions directly to the TPU sockets of the
/// current and upcoming leaders over UDP.
///
/// Stateless between sends; the leader view lives behind the owned
/// [`LeaderTpuService`].
pub struct TpuClient {
    fanout_slots: u64,
    leader_tpu_service: LeaderTpuService,
    rpc_client: Arc<RpcClient>,
    socket: UdpSocket,
}

impl TpuClient {
    /// Creates a client, bootstrapping the leader view and binding one
    /// unconnected UDP socket shared by all sends.
    pub async fn new(
        rpc_client: Arc<RpcClient>,
        websocket_url: Option<&str>,
        config: TpuClientConfig,
    ) -> Result<Self> {
        let leader_tpu_service =
            LeaderTpuService::new(Arc::clone(&rpc_client), websocket_url).await?;
        let socket = UdpSocket::bind("0.0.0.0:0").await?;

        Ok(Self {
            fanout_slots: config.clamped_fanout_slots(),
            leader_tpu_service,
            rpc_client,
            socket,
        })
    }

    /// Signs (when needed), serializes and fans out a transaction.
    ///
    /// A legacy transaction must come with its signers: a recent blockhash
    /// is filled in unless the transaction carries a durable nonce, then it
    /// is signed. A versioned transaction must already be signed and the
    /// signers argument absent. Mismatched pairings are rejected before any
    /// network activity.
    pub async fn send_transaction(
        &self,
        transaction: impl Into<SendableTransaction>,
        signers: Option<&dyn Signers>,
    ) -> Result<Signature> {
        let wire_transaction = match transaction.into() {
            SendableTransaction::Legacy(mut transaction) => {
                let Some(signers) = signers else {
                    return Err(TpuSenderError::InvalidArguments(
                        "a legacy transaction requires a signer list".to_string(),
                    ));
                };
                let blockhash = if uses_durable_nonce(&transaction).is_some() {
                    transaction.message.recent_blockhash
                } else {
                    self.rpc_client.get_latest_blockhash().await?
                };
                transaction.try_sign(signers, blockhash)?;
                bincode::serialize(&transaction)
            }
            SendableTransaction::Versioned(transaction) => {
                if signers.is_some() {
                    return Err(TpuSenderError::InvalidArguments(
                        "a versioned transaction must be pre-signed; omit the signer list"
                            .to_string(),
                    ));
                }
                bincode::serialize(&transaction)
            }
        }
        .map_err(|err| {
            TpuSenderError::Custom(format!("failed to serialize transaction: {err}"))
        })?;

        self.send_raw_transaction(&wire_transaction).await
    }

    /// Sends already-serialized transaction bytes to the leaders of the
    /// next `fanout_slots` slots, one datagram per distinct leader,
    /// concurrently.
    ///
    /// The fanout is best-effort: the send succeeds, yielding the
    /// transaction's first signature, once at least one datagram was handed
    /// to the socket; only a fully failed fanout surfaces an error.
    pub async fn send_raw_transaction(&self, wire_transaction: &[u8]) -> Result<Signature> {
        let signature = wire_signature(wire_transaction)?;

        let leader_sockets = self
            .leader_tpu_service
            .leader_sockets(self.fanout_slots)
            .await;
        if leader_sockets.is_empty() {
            return Err(TpuSenderError::Custom(
                "no reachable leader sockets in the current fanout window".to_string(),
            ));
        }

        let sends = leader_sockets
            .iter()
            .map(|tpu_address| self.send_to_leader(wire_transaction, *tpu_address));
        let results = join_all(sends).await;

        let mut first_error = None;
        let mut some_success = false;
        for result in results {
            match result {
                Ok(()) => some_success = true,
                Err(err) => {
                    if first_error.is_none() {
                        first_error = Some(err);
                    }
                }
            }
        }

        if some_success {
            Ok(signature)
        } else {
            Err(match first_error {
                Some(err) => TpuSenderError::Io(err),
                None => TpuSenderError::Custom("no sends attempted".to_string()),
            })
        }
    }

    async fn send_to_leader(
        &self,
        wire_transaction: &[u8],
        tpu_address: SocketAddr,
    ) -> std::io::Result<()> {
        debug!("Sending transaction to leader TPU at {tpu_address}");
        self.socket
            .send_to(wire_transaction, tpu_address)
            .await
            .map(|_| ())
    }

    /// Current slot estimate from the leader view.
    pub async fn estimated_current_slot(&self) -> Result<Slot> {
        self.leader_tpu_service.estimated_current_slot().await
    }

    /// The RPC handle, for callers confirming signatures out of band.
    pub fn rpc_client(&self) -> &RpcClient {
        &self.rpc_client
    }

    /// Stops the background leader tracking.
    pub async fn shutdown(&mut self) {
        self.leader_tpu_service.shutdown().await;
    }
}

/// Extracts the first signature from serialized transaction bytes, parsed
/// as a legacy transaction first and as a versioned transaction on parse
/// failure.
fn wire_signature(wire_transaction: &[u8]) -> Result<Signature> {
    let signatures = match bincode::deserialize::<Transaction>(wire_transaction) {
        Ok(transaction) => transaction.signatures,
        Err(_) => {
            bincode::deserialize::<VersionedTransaction>(wire_transaction)
                .map_err(|err| TpuSenderError::InvalidWireTransaction(err.to_string()))?
                .signatures
        }
    };

    signatures
        .first()
        .copied()
        .ok_or_else(|| {
            TpuSenderError::InvalidWireTransaction("transaction carries no signature".to_string())
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use solana_sdk::hash::Hash;
    use solana_sdk::message::{v0, MessageHeader, VersionedMessage};
    use solana_sdk::pubkey::Pubkey;
    use solana_sdk::signature::{Keypair, Signer};

    #[test]
    fn test_fanout_slots_clamped_at_construction() {
        assert_eq!(TpuClientConfig::default().clamped_fanout_slots(), 12);
        let config = TpuClientConfig { fanout_slots: 0 };
        assert_eq!(config.clamped_fanout_slots(), 1);
        let config = TpuClientConfig { fanout_slots: 1_000 };
        assert_eq!(config.clamped_fanout_slots(), MAX_FANOUT_SLOTS);
    }

    #[test]
    fn test_wire_signature_legacy() {
        let payer = Keypair::new();
        let mut transaction = Transaction::new_with_payer(&[], Some(&payer.pubkey()));
        transaction
            .try_sign(&[&payer], Hash::new_unique())
            .unwrap();

        let wire_transaction = bincode::serialize(&transaction).unwrap();
        assert_eq!(
            wire_signature(&wire_transaction).unwrap(),
            transaction.signatures[0]
        );
    }

    #[test]
    fn test_wire_signature_versioned() {
        let message = v0::Message {
            header: MessageHeader {
                num_required_signatures: 1,
                num_readonly_signed_accounts: 0,
                num_readonly_unsigned_accounts: 0,
            },
            account_keys: vec![Pubkey::new_unique()],
            recent_blockhash: Hash::new_unique(),
            instructions: vec![],
            address_table_lookups: vec![],
        };
        let transaction = VersionedTransaction {
            signatures: vec![Signature::new_unique()],
            message: VersionedMessage::V0(message),
        };

        let wire_transaction = bincode::serialize(&transaction).unwrap();
        assert_eq!(
            wire_signature(&wire_transaction).unwrap(),
            transaction.signatures[0]
        );
    }

    #[test]
    fn test_wire_signature_rejects_garbage() {
        assert!(matches!(
            wire_signature(&[1, 2, 3]),
            Err(TpuSenderError::InvalidWireTransaction(_))
        ));
    }

    #[test]
    fn test_sendable_transaction_from_impls() {
        let payer = Keypair::new();
        let transaction = Transaction::new_with_payer(&[], Some(&payer.pubkey()));

        let sendable: SendableTransaction = transaction.clone().into();
        assert!(matches!(sendable, SendableTransaction::Legacy(_)));

        let versioned = VersionedTransaction::from(transaction);
        let sendable: SendableTransaction = versioned.into();
        assert!(matches!(sendable, SendableTransaction::Versioned(_)));
    }
}
