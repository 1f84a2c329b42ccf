use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ReplicaState {
    Active,
    Down,
    Recovering,
    RecoveryFailed,
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Replica {
    pub name: String,
    pub node_name: String,
    pub state: ReplicaState,
}

impl Replica {
    pub fn new(name: impl Into<String>, node_name: impl Into<String>, state: ReplicaState) -> Self {
        Replica { name: name.into(), node_name: node_name.into(), state }
    }
}

/// A shard of a collection. `leader` names one of `replicas`; a replica is
/// the leader iff its name matches.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Slice {
    pub replicas: Vec<Replica>,
    pub leader: Option<String>,
}

impl Slice {
    pub fn leader(&self) -> Option<&Replica> {
        let name = self.leader.as_deref()?;
        self.replicas.iter().find(|r| r.name == name)
    }

    pub fn has_active_leader(&self) -> bool {
        self.leader().map(|r| r.state == ReplicaState::Active).unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct Collection {
    pub slices: BTreeMap<String, Slice>,
}

impl Collection {
    pub fn slice(&self, name: &str) -> Option<&Slice> {
        self.slices.get(name)
    }
}

/// Immutable, versioned view of the cluster. Owned by the coordination store;
/// everyone else re-fetches instead of mutating a cached copy.
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
pub struct ClusterState {
    pub version: u64,
    pub live_nodes: BTreeSet<String>,
    pub collections: BTreeMap<String, Collection>,
}

impl ClusterState {
    pub fn collection(&self, name: &str) -> Option<&Collection> {
        self.collections.get(name)
    }

    pub fn slice(&self, collection: &str, shard: &str) -> Option<&Slice> {
        self.collection(collection)?.slice(shard)
    }

    pub fn is_live(&self, node_name: &str) -> bool {
        self.live_nodes.contains(node_name)
    }

    pub fn with_live_node(mut self, node_name: impl Into<String>) -> Self {
        self.live_nodes.insert(node_name.into());
        self
    }

    pub fn with_collection(mut self, name: impl Into<String>, collection: Collection) -> Self {
        self.collections.insert(name.into(), collection);
        self
    }
}
