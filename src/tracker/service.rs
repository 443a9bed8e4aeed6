//! Background refresh of the leader and contact view.
//!
//! A single polling loop keeps the cache aligned with real time, and an
//! optional listener task feeds websocket slot notifications into the
//! estimator. Every fetch step is independently fallible: a failure logs a
//! warning, leaves prior state intact, and the next pass retries.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use log::{info, warn};
use solana_client::nonblocking::pubsub_client::PubsubClient;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_response::SlotUpdate;
use solana_commitment_config::CommitmentConfig;
use tokio::sync::{oneshot, RwLock};
use tokio::task::JoinHandle;
use tokio::time::sleep;

use super::{LeaderTpuCache, Slot, SlotEstimator, MAX_FANOUT_SLOTS};
use crate::errors::Result;

/// Delay between refresh passes. The same delay is used whether or not a
/// pass refreshed anything: this is time-driven polling, not backoff.
const REFRESH_LOOP_DELAY: Duration = Duration::from_secs(1);

/// How long a cluster contact snapshot stays fresh. Validators restart
/// with new port configurations and new validators come online.
const TPU_MAP_REFRESH_INTERVAL: Duration = Duration::from_secs(5 * 60);

/// Delay before reconnecting a dropped slot-update subscription.
const SLOT_LISTENER_RECONNECT_DELAY: Duration = Duration::from_secs(1);

/// Keeps an up-to-date mapping from upcoming slots to reachable leader
/// TPU sockets.
///
/// The service is the sole writer of the cache and the estimator; both are
/// created from a freshly queried starting slot and live until the service
/// is shut down or dropped.
pub struct LeaderTpuService {
    estimator: Arc<RwLock<SlotEstimator>>,
    cache: Arc<RwLock<LeaderTpuCache>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    refresh_task: Option<JoinHandle<()>>,
    slot_listener: Option<JoinHandle<()>>,
}

impl LeaderTpuService {
    /// Bootstraps the estimator and cache, then spawns the refresh loop
    /// and, when a websocket URL is given, the slot-update listener.
    pub async fn new(rpc_client: Arc<RpcClient>, websocket_url: Option<&str>) -> Result<Self> {
        let start_slot = rpc_client
            .get_slot_with_commitment(CommitmentConfig::processed())
            .await?;

        let estimator = Arc::new(RwLock::new(SlotEstimator::new(start_slot)));
        let cache = Arc::new(RwLock::new(
            LeaderTpuCache::load(&rpc_client, start_slot).await?,
        ));

        let slot_listener = websocket_url.map(|url| {
            let url = url.to_string();
            let estimator = Arc::clone(&estimator);
            tokio::spawn(run_slot_listener(url, estimator))
        });

        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let refresh_task = tokio::spawn(run_refresh_loop(
            rpc_client,
            Arc::clone(&estimator),
            Arc::clone(&cache),
            shutdown_rx,
        ));

        Ok(Self {
            estimator,
            cache,
            shutdown_tx: Some(shutdown_tx),
            refresh_task: Some(refresh_task),
            slot_listener,
        })
    }

    /// TPU sockets for the upcoming `fanout_slots` leaders. Pass-through
    /// to the cache.
    pub async fn leader_sockets(&self, fanout_slots: u64) -> Vec<SocketAddr> {
        self.cache.read().await.leader_sockets(fanout_slots)
    }

    /// Current slot estimate.
    pub async fn estimated_current_slot(&self) -> Result<Slot> {
        self.estimator.read().await.estimate()
    }

    /// Stops the refresh loop and the slot listener, waiting for the loop
    /// to wind down.
    pub async fn shutdown(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(slot_listener) = self.slot_listener.take() {
            slot_listener.abort();
        }
        if let Some(refresh_task) = self.refresh_task.take() {
            let _ = refresh_task.await;
        }
    }
}

impl Drop for LeaderTpuService {
    fn drop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }
        if let Some(slot_listener) = self.slot_listener.take() {
            slot_listener.abort();
        }
    }
}

/// One refresh pass per [`REFRESH_LOOP_DELAY`]: contact map when stale,
/// then the estimate-driven epoch info and schedule refetches.
async fn run_refresh_loop(
    rpc_client: Arc<RpcClient>,
    estimator: Arc<RwLock<SlotEstimator>>,
    cache: Arc<RwLock<LeaderTpuCache>>,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut last_tpu_map_refresh = Instant::now();

    loop {
        if last_tpu_map_refresh.elapsed() > TPU_MAP_REFRESH_INTERVAL {
            match LeaderTpuCache::fetch_tpu_map(&rpc_client).await {
                Ok(tpu_map) => {
                    cache.write().await.set_tpu_map(tpu_map);
                    last_tpu_map_refresh = Instant::now();
                }
                Err(err) => warn!("Failed to refresh cluster TPU map: {err}"),
            }
        }

        match estimator.read().await.estimate() {
            Ok(estimated_current_slot) => {
                refresh_from_estimate(&rpc_client, &cache, estimated_current_slot).await;
            }
            // Unreachable once seeded at bootstrap.
            Err(err) => warn!("Skipping refresh pass: {err}"),
        }

        tokio::select! {
            _ = &mut shutdown_rx => break,
            _ = sleep(REFRESH_LOOP_DELAY) => {}
        }
    }
}

async fn refresh_from_estimate(
    rpc_client: &RpcClient,
    cache: &RwLock<LeaderTpuCache>,
    estimated_current_slot: Slot,
) {
    let (last_slot, last_epoch_info_slot, mut slots_in_epoch) = cache.read().await.slot_info();

    // Approaching the reference point where epoch info was last taken:
    // refetch it and move the reference to the current estimate.
    if estimated_current_slot >= last_epoch_info_slot.saturating_sub(slots_in_epoch) {
        match rpc_client.get_epoch_info().await {
            Ok(epoch_info) => {
                slots_in_epoch = epoch_info.slots_in_epoch;
                cache
                    .write()
                    .await
                    .set_epoch_info(slots_in_epoch, estimated_current_slot);
            }
            Err(err) => warn!("Failed to refresh epoch info: {err}"),
        }
    }

    // Running out of cached schedule: refetch it starting at the estimate.
    if estimated_current_slot >= last_slot.saturating_sub(MAX_FANOUT_SLOTS) {
        match LeaderTpuCache::fetch_slot_leaders(rpc_client, estimated_current_slot, slots_in_epoch)
            .await
        {
            Ok(leaders) => cache
                .write()
                .await
                .set_leaders(estimated_current_slot, leaders),
            Err(err) => warn!(
                "Failed to refresh slot leaders starting at {estimated_current_slot}: {err}"
            ),
        }
    }
}

/// Consumes slot updates into the estimator, reconnecting if the
/// subscription drops.
async fn run_slot_listener(websocket_url: String, estimator: Arc<RwLock<SlotEstimator>>) {
    loop {
        match listen_for_slot_updates(&websocket_url, &estimator).await {
            Ok(()) => warn!("Slot update stream ended, reconnecting..."),
            Err(err) => warn!("Slot subscription error: {err}, reconnecting..."),
        }
        sleep(SLOT_LISTENER_RECONNECT_DELAY).await;
    }
}

async fn listen_for_slot_updates(
    websocket_url: &str,
    estimator: &RwLock<SlotEstimator>,
) -> Result<()> {
    let pubsub_client = PubsubClient::new(websocket_url).await?;
    let (mut notifications, _unsubscribe) = pubsub_client.slot_updates_subscribe().await?;

    info!("Listening for slot updates");

    while let Some(update) = notifications.next().await {
        let current_slot = match update {
            // A completed slot means the cluster has moved on to the
            // following one.
            SlotUpdate::Completed { slot, .. } => slot.saturating_add(1),
            // The leader for this slot is probably still accepting
            // transactions.
            SlotUpdate::FirstShredReceived { slot, .. } => slot,
            _ => continue,
        };
        estimator.write().await.record(current_slot);
    }

    Ok(())
}
