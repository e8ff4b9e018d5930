//! Buckets and partition maps.

use super::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::hash::Hasher;
use twox_hash::XxHash64;

/// Default number of vbuckets per bucket.
pub const DEFAULT_NUM_VBUCKETS: u16 = 64;

/// Capabilities advertised in bucket configs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketCapability {
    Cbhello,
    Cccp,
    Collections,
    Couchapi,
    DurableWrite,
    NodesExt,
    Touch,
    Xattr,
    XdcrCheckpointing,
}

impl BucketCapability {
    /// Name used in generated configs.
    pub fn config_name(self) -> &'static str {
        match self {
            BucketCapability::Cbhello => "cbhello",
            BucketCapability::Cccp => "cccp",
            BucketCapability::Collections => "collections",
            BucketCapability::Couchapi => "couchapi",
            BucketCapability::DurableWrite => "durableWrite",
            BucketCapability::NodesExt => "nodesExt",
            BucketCapability::Touch => "touch",
            BucketCapability::Xattr => "xattr",
            BucketCapability::XdcrCheckpointing => "xdcrCheckpointing",
        }
    }

    /// Capabilities enabled when none are configured.
    pub fn defaults() -> BTreeSet<BucketCapability> {
        [
            BucketCapability::Cbhello,
            BucketCapability::Cccp,
            BucketCapability::Collections,
            BucketCapability::Couchapi,
            BucketCapability::DurableWrite,
            BucketCapability::NodesExt,
            BucketCapability::Touch,
            BucketCapability::Xattr,
            BucketCapability::XdcrCheckpointing,
        ]
        .into_iter()
        .collect()
    }
}

/// A bucket and its vbucket-to-node assignment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bucket {
    pub name: String,
    pub uuid: String,
    pub num_replicas: u32,
    pub capabilities: BTreeSet<BucketCapability>,
    /// `vbucket_map[vb]` is the active node followed by `num_replicas`
    /// replica slots; `None` marks a replica with no node assigned.
    pub vbucket_map: Vec<Vec<Option<NodeId>>>,
}

impl Bucket {
    /// Create a bucket and lay out its partitions across `kv_nodes`.
    pub fn new(
        name: impl Into<String>,
        num_replicas: u32,
        num_vbuckets: u16,
        kv_nodes: &[NodeId],
    ) -> Self {
        let name = name.into();
        let mut bucket = Self {
            uuid: bucket_uuid(&name),
            name,
            num_replicas,
            capabilities: BucketCapability::defaults(),
            vbucket_map: vec![Vec::new(); num_vbuckets as usize],
        };
        bucket.rebalance(kv_nodes);
        bucket
    }

    /// Number of vbuckets.
    pub fn num_vbuckets(&self) -> usize {
        self.vbucket_map.len()
    }

    /// Reassign every vbucket round-robin over `kv_nodes`.
    ///
    /// Replica `r` of vbucket `vb` lands on the node `r + 1` places after the
    /// active one; a replica that would wrap onto the active node stays
    /// unassigned.
    pub fn rebalance(&mut self, kv_nodes: &[NodeId]) {
        let n = kv_nodes.len();
        let slots = 1 + self.num_replicas as usize;
        for (vb, chain) in self.vbucket_map.iter_mut().enumerate() {
            chain.clear();
            for slot in 0..slots {
                let assigned = if n > 0 && slot < n {
                    Some(kv_nodes[(vb + slot) % n])
                } else {
                    None
                };
                chain.push(assigned);
            }
        }
    }

    /// Active node for a vbucket.
    pub fn active_node(&self, vbucket: u16) -> Option<NodeId> {
        self.vbucket_map
            .get(vbucket as usize)
            .and_then(|chain| chain.first().copied().flatten())
    }
}

/// Stable 32 hex digit uuid derived from the bucket name.
fn bucket_uuid(name: &str) -> String {
    let mut hi = XxHash64::with_seed(0);
    hi.write(name.as_bytes());
    let mut lo = XxHash64::with_seed(1);
    lo.write(name.as_bytes());
    format!("{:016x}{:016x}", hi.finish(), lo.finish())
}
