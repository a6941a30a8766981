//! IPAM datastore client boundary.
//!
//! The lifecycle manager treats the datastore as atomic at single-address
//! granularity: `assign` and `release` behave like compare-and-swap on one
//! address key. That atomicity is the correctness boundary between the
//! manager and whatever backs this trait; the manager adds no locking of
//! its own on top of it.

use std::collections::HashSet;
use std::net::IpAddr;

use async_trait::async_trait;
use thiserror::Error;

use crate::types::{Endpoint, IpPool, NextHops, WorkloadIdentity};

pub mod memory;
pub use memory::MemoryIpam;

#[derive(Debug, Error)]
pub enum IpamError {
    #[error("datastore unavailable: {0}")]
    Unavailable(String),
    #[error("record for {key} is malformed: {reason}")]
    MalformedRecord { key: String, reason: String },
    #[error("write to {key} rejected: {reason}")]
    WriteRejected { key: String, reason: String },
}

/// Atomic operations over the shared IPAM datastore.
#[async_trait]
pub trait IpamClient: Send + Sync {
    /// Find the configured pool containing `ip`, if any.
    async fn find_pool(&self, ip: IpAddr) -> Result<Option<IpPool>, IpamError>;

    /// Assign `ip` from `pool`, or any free address in `pool` when `ip` is
    /// `None`. Returns the assigned addresses; empty means the requested
    /// address was already taken (or the pool is exhausted).
    async fn assign(&self, pool: &IpPool, ip: Option<IpAddr>) -> Result<Vec<IpAddr>, IpamError>;

    /// Release `ips` back to their pools. Returns how many were actually
    /// released; addresses that were not assigned do not count.
    async fn release(&self, ips: &HashSet<IpAddr>) -> Result<usize, IpamError>;

    /// Fetch the endpoint persisted for `identity`, if any.
    async fn endpoint(&self, identity: &WorkloadIdentity) -> Result<Option<Endpoint>, IpamError>;

    /// Persist a freshly created endpoint record.
    async fn create_endpoint(&self, endpoint: &Endpoint) -> Result<(), IpamError>;

    /// Overwrite an existing endpoint record.
    async fn update_endpoint(&self, endpoint: &Endpoint) -> Result<(), IpamError>;

    /// Delete the endpoint and workload records for `identity`.
    async fn remove_workload(&self, identity: &WorkloadIdentity) -> Result<(), IpamError>;

    /// Default routing next hops registered for `hostname`.
    async fn next_hops(&self, hostname: &str) -> Result<NextHops, IpamError>;
}
