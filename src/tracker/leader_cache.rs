//! Leader schedule and TPU contact cache.
//!
//! Holds the ordered leader schedule for a window of upcoming slots plus
//! the identity-to-socket map needed to reach each leader's transaction
//! port. The refresh service is the sole writer; senders read through it.

use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::str::FromStr;

use log::{debug, warn};
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_client::rpc_response::RpcContactInfo;
use solana_sdk::pubkey::Pubkey;

use super::{Slot, MAX_FANOUT_SLOTS};
use crate::errors::{Result, TpuSenderError};

/// Cached leader schedule starting at `first_slot`, with contact info.
///
/// Peers that publish no TPU endpoint are kept in the map as `None` so a
/// lookup can tell "known but unreachable" apart from "not in the cluster
/// snapshot"; both are skipped during fanout resolution.
#[derive(Debug)]
pub struct LeaderTpuCache {
    first_slot: Slot,
    leaders: Vec<Pubkey>,
    leader_tpu_map: HashMap<Pubkey, Option<SocketAddr>>,
    slots_in_epoch: Slot,
    last_epoch_info_slot: Slot,
}

impl LeaderTpuCache {
    /// Bootstraps the cache: one epoch-info query, then the initial
    /// schedule and contact map. Errors propagate to the caller; retry is
    /// the refresh service's job.
    pub async fn load(rpc_client: &RpcClient, first_slot: Slot) -> Result<Self> {
        let slots_in_epoch = rpc_client.get_epoch_info().await?.slots_in_epoch;
        let leaders = Self::fetch_slot_leaders(rpc_client, first_slot, slots_in_epoch).await?;
        let leader_tpu_map = Self::fetch_tpu_map(rpc_client).await?;

        Ok(Self {
            first_slot,
            leaders,
            leader_tpu_map,
            slots_in_epoch,
            last_epoch_info_slot: first_slot,
        })
    }

    /// Number of leader slots fetched per schedule refresh.
    pub fn fanout(slots_in_epoch: Slot) -> Slot {
        (2 * MAX_FANOUT_SLOTS).min(slots_in_epoch)
    }

    /// Fetches the leader schedule covering the refresh window starting at
    /// `start_slot`.
    pub async fn fetch_slot_leaders(
        rpc_client: &RpcClient,
        start_slot: Slot,
        slots_in_epoch: Slot,
    ) -> Result<Vec<Pubkey>> {
        let limit = Self::fanout(slots_in_epoch);
        let leaders = rpc_client.get_slot_leaders(start_slot, limit).await?;
        if leaders.is_empty() {
            return Err(TpuSenderError::Custom(format!(
                "empty leader schedule starting at slot {start_slot}"
            )));
        }
        Ok(leaders)
    }

    /// Rebuilds the full identity-to-TPU-socket map from a cluster node
    /// query.
    pub async fn fetch_tpu_map(
        rpc_client: &RpcClient,
    ) -> Result<HashMap<Pubkey, Option<SocketAddr>>> {
        let cluster_nodes = rpc_client.get_cluster_nodes().await?;
        Ok(Self::extract_tpu_map(cluster_nodes))
    }

    fn extract_tpu_map(
        cluster_nodes: Vec<RpcContactInfo>,
    ) -> HashMap<Pubkey, Option<SocketAddr>> {
        cluster_nodes
            .into_iter()
            .filter_map(|node| {
                let identity = Pubkey::from_str(&node.pubkey).ok()?;
                // Peers without a TPU endpoint map to None, not omitted.
                Some((identity, node.tpu))
            })
            .collect()
    }

    /// First slot covered by the cached schedule.
    pub fn first_slot(&self) -> Slot {
        self.first_slot
    }

    /// Last slot that has a cached leader.
    pub fn last_slot(&self) -> Slot {
        self.first_slot + self.leaders.len().saturating_sub(1) as u64
    }

    /// Snapshot of `(last_slot, last_epoch_info_slot, slots_in_epoch)` for
    /// the refresh service's cadence checks.
    pub fn slot_info(&self) -> (Slot, Slot, Slot) {
        (
            self.last_slot(),
            self.last_epoch_info_slot,
            self.slots_in_epoch,
        )
    }

    /// Leader identity scheduled for `slot`, or `None` if the slot falls
    /// outside the cached window (the schedule does not extend backward).
    pub fn slot_leader(&self, slot: Slot) -> Option<&Pubkey> {
        if slot < self.first_slot {
            return None;
        }
        let index = slot - self.first_slot;
        self.leaders.get(index as usize)
    }

    /// TPU sockets for the first `fanout_slots` scheduled leaders,
    /// deduplicated by leader identity in first-seen order. Leaders with no
    /// reachable socket are skipped.
    pub fn leader_sockets(&self, fanout_slots: u64) -> Vec<SocketAddr> {
        let mut leader_set = HashSet::new();
        let mut leader_sockets = Vec::new();

        for leader_slot in self.first_slot..self.first_slot + fanout_slots {
            let Some(leader) = self.slot_leader(leader_slot) else {
                // Overran the cached schedule.
                warn!(
                    "Leader not known for slot {}; cache holds slots [{},{}]",
                    leader_slot,
                    self.first_slot,
                    self.last_slot()
                );
                continue;
            };

            if !leader_set.insert(*leader) {
                continue;
            }

            match self.leader_tpu_map.get(leader) {
                Some(Some(socket)) => leader_sockets.push(*socket),
                Some(None) => {
                    debug!("Leader {leader} publishes no TPU address, skipping")
                }
                None => {
                    // The leader is probably delinquent.
                    debug!("Leader {leader} missing from cluster contact map, skipping")
                }
            }
        }

        leader_sockets
    }

    /// Replaces the contact map wholesale.
    pub fn set_tpu_map(&mut self, leader_tpu_map: HashMap<Pubkey, Option<SocketAddr>>) {
        self.leader_tpu_map = leader_tpu_map;
    }

    /// Records fresh epoch info, with the slot estimate that triggered the
    /// fetch as the new reference point.
    pub fn set_epoch_info(&mut self, slots_in_epoch: Slot, estimated_current_slot: Slot) {
        self.slots_in_epoch = slots_in_epoch;
        self.last_epoch_info_slot = estimated_current_slot;
    }

    /// Replaces the schedule window.
    pub fn set_leaders(&mut self, first_slot: Slot, leaders: Vec<Pubkey>) {
        self.first_slot = first_slot;
        self.leaders = leaders;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cache_with(
        first_slot: Slot,
        leaders: Vec<Pubkey>,
        leader_tpu_map: HashMap<Pubkey, Option<SocketAddr>>,
    ) -> LeaderTpuCache {
        LeaderTpuCache {
            first_slot,
            leaders,
            leader_tpu_map,
            slots_in_epoch: 432_000,
            last_epoch_info_slot: first_slot,
        }
    }

    fn socket(s: &str) -> SocketAddr {
        s.parse().unwrap()
    }

    #[test]
    fn test_last_slot() {
        let cache = cache_with(
            1000,
            vec![Pubkey::new_unique(), Pubkey::new_unique(), Pubkey::new_unique()],
            HashMap::new(),
        );
        assert_eq!(cache.last_slot(), 1002);
    }

    #[test]
    fn test_slot_leader_bounds() {
        let leader = Pubkey::new_unique();
        let cache = cache_with(1000, vec![leader], HashMap::new());

        assert_eq!(cache.slot_leader(1000), Some(&leader));
        // The schedule does not extend backward.
        assert_eq!(cache.slot_leader(999), None);
        assert_eq!(cache.slot_leader(1001), None);
    }

    #[test]
    fn test_leader_sockets_dedup_by_identity() {
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let map = HashMap::from([
            (a, Some(socket("1.1.1.1:100"))),
            (b, Some(socket("2.2.2.2:200"))),
        ]);
        let cache = cache_with(0, vec![a, a, b], map);

        assert_eq!(
            cache.leader_sockets(3),
            vec![socket("1.1.1.1:100"), socket("2.2.2.2:200")]
        );
    }

    #[test]
    fn test_leader_sockets_respects_fanout_width() {
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let map = HashMap::from([
            (a, Some(socket("1.1.1.1:100"))),
            (b, Some(socket("2.2.2.2:200"))),
        ]);
        let cache = cache_with(0, vec![a, b], map);

        assert_eq!(cache.leader_sockets(1), vec![socket("1.1.1.1:100")]);
    }

    #[test]
    fn test_leader_sockets_skips_unreachable_leaders() {
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let c = Pubkey::new_unique();
        // `a` publishes no TPU endpoint, `c` is absent from the snapshot.
        let map = HashMap::from([(a, None), (b, Some(socket("2.2.2.2:200")))]);
        let cache = cache_with(0, vec![a, b, c], map);

        assert_eq!(cache.leader_sockets(3), vec![socket("2.2.2.2:200")]);
    }

    #[test]
    fn test_fanout_width_is_epoch_bounded() {
        assert_eq!(LeaderTpuCache::fanout(432_000), 2 * MAX_FANOUT_SLOTS);
        assert_eq!(LeaderTpuCache::fanout(32), 32);
    }

    #[test]
    fn test_refresh_replaces_state_wholesale() {
        let a = Pubkey::new_unique();
        let b = Pubkey::new_unique();
        let mut cache = cache_with(1000, vec![a], HashMap::from([(a, None)]));

        cache.set_leaders(2000, vec![b, b]);
        assert_eq!(cache.first_slot(), 2000);
        assert_eq!(cache.last_slot(), 2001);
        assert_eq!(cache.slot_leader(1000), None);

        cache.set_epoch_info(8192, 2005);
        assert_eq!(cache.slot_info(), (2001, 2005, 8192));

        cache.set_tpu_map(HashMap::from([(b, Some(socket("3.3.3.3:300")))]));
        assert_eq!(cache.leader_sockets(2), vec![socket("3.3.3.3:300")]);
    }
}
