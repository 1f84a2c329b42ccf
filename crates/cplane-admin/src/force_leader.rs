use std::sync::Arc;

use cplane_store::{ClusterStateStore, TermStore};
use cplane_types::{CplaneError, ReplicaState};

use crate::config::ForceLeaderConfig;

/// Compare-and-set attempts on a contended term table before giving up.
const MAX_TERM_CAS_ATTEMPTS: u32 = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ForceLeaderOutcome {
    Elected { leader: String },
    /// The poll budget ran out without an ACTIVE leader. Not an error: the
    /// terms were adjusted and an election may still complete later.
    NotConverged { attempts: u32 },
}

/// Recovers a shard that lost every active replica by making its live
/// replicas eligible for election, then waiting for one to take over.
pub struct LeaderForcer<S> {
    store: Arc<S>,
    config: ForceLeaderConfig,
}

impl<S: ClusterStateStore + TermStore> LeaderForcer<S> {
    pub fn new(store: Arc<S>, config: ForceLeaderConfig) -> Self {
        LeaderForcer { store, config }
    }

    pub async fn force_leader(
        &self,
        collection: &str,
        shard: &str,
    ) -> Result<ForceLeaderOutcome, CplaneError> {
        let state = self.store.snapshot();
        tracing::info!(collection, shard, version = state.version, "force leader invoked");

        let coll = state
            .collection(collection)
            .ok_or_else(|| CplaneError::NotFound(format!("collection {collection} does not exist")))?;
        let slice = coll.slice(shard).ok_or_else(|| {
            CplaneError::NotFound(format!(
                "No shard with name {shard} exists for collection {collection}"
            ))
        })?;
        if slice.has_active_leader() {
            return Err(CplaneError::NoActionNeeded(format!(
                "The shard {collection}/{shard} already has an active leader. Force leader is not applicable."
            )));
        }

        {
            let _lease = self.store.lease_shard_terms(collection, shard).await?;
            // Liveness as of the lease, not as of the entry checks.
            let state = self.store.snapshot();
            let live: Vec<String> = state
                .slice(collection, shard)
                .map(|slice| {
                    slice
                        .replicas
                        .iter()
                        .filter(|r| state.is_live(&r.node_name))
                        .map(|r| r.name.clone())
                        .collect()
                })
                .unwrap_or_default();
            self.raise_terms(collection, shard, &live).await?;
        }

        Ok(self.await_leader(collection, shard).await)
    }

    /// Raise every live registered replica to the max term, all in one
    /// compare-and-set, unless one of them is already eligible. Returns
    /// whether the table was changed.
    async fn raise_terms(
        &self,
        collection: &str,
        shard: &str,
        live: &[String],
    ) -> Result<bool, CplaneError> {
        for _ in 0..MAX_TERM_CAS_ATTEMPTS {
            let mut terms = self.store.shard_terms(collection, shard).await?;
            if live.iter().any(|r| terms.registered(r) && terms.can_become_leader(r)) {
                tracing::debug!(collection, shard, "a live replica is already eligible; terms unchanged");
                return Ok(false);
            }

            let mut changed = false;
            for replica in live {
                if terms.registered(replica) {
                    changed |= terms.set_term_equals_to_leader(replica);
                }
            }
            if !changed {
                tracing::warn!(collection, shard, "no live registered replica to raise");
                return Ok(false);
            }

            if self.store.compare_and_set_terms(collection, shard, &terms).await? {
                tracing::info!(collection, shard, max_term = terms.max_term(), "raised live replica terms");
                return Ok(true);
            }
            tracing::debug!(collection, shard, "term table changed concurrently, retrying");
        }
        tracing::warn!(collection, shard, attempts = MAX_TERM_CAS_ATTEMPTS, "term table stayed contended");
        Err(CplaneError::Store(format!(
            "could not update terms of {collection}/{shard} after {MAX_TERM_CAS_ATTEMPTS} attempts"
        )))
    }

    async fn await_leader(&self, collection: &str, shard: &str) -> ForceLeaderOutcome {
        let attempts = self.config.max_attempts;
        for attempt in 1..=attempts {
            tokio::time::sleep(self.config.poll_interval()).await;
            let state = self.store.snapshot();
            match state.slice(collection, shard) {
                Some(slice) => {
                    if let Some(leader) = slice.leader().filter(|r| r.state == ReplicaState::Active) {
                        tracing::info!(collection, shard, leader = %leader.name, "force leader succeeded");
                        return ForceLeaderOutcome::Elected { leader: leader.name.clone() };
                    }
                    tracing::warn!(
                        collection,
                        shard,
                        attempt,
                        wait_ms = self.config.poll_interval_ms,
                        "waiting for an active leader"
                    );
                }
                None => {
                    tracing::warn!(collection, shard, attempt, "shard missing from cluster state");
                }
            }
        }
        tracing::info!(collection, shard, attempts, "could not force leader");
        ForceLeaderOutcome::NotConverged { attempts }
    }
}
