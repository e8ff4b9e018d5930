//! In-memory cluster topology and the config documents derived from it.
//!
//! - [`node`] - nodes, services, network addresses
//! - [`bucket`] - buckets and vbucket maps
//! - [`cluster`] - the revisioned cluster snapshot and its handle
//! - [`configgen`] - cluster and terse bucket config JSON

pub mod bucket;
pub mod cluster;
pub mod configgen;
pub mod node;

pub use bucket::{Bucket, BucketCapability};
pub use cluster::{BucketSpec, ClusterHandle, ClusterState};
pub use configgen::{cluster_config, terse_bucket_config};
pub use node::{Network, NetworkAddress, Node, NodeId, ServiceType};
