//! In-memory IPAM datastore client.
//!
//! Backs single-host deployments and the test suite. Endpoint records are
//! stored as JSON documents under datastore-style key paths, the same shape
//! a shared key-value datastore would hold, so the serialisation round-trip
//! is exercised even in memory. All state lives behind one `RwLock`, which
//! makes assign/release atomic at single-address granularity as the
//! [`IpamClient`](super::IpamClient) contract requires.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;

use async_trait::async_trait;
use log::debug;
use tokio::sync::RwLock;

use super::{IpamClient, IpamError};
use crate::types::{Endpoint, IpPool, NextHops, WorkloadIdentity};

#[derive(Default)]
struct Inner {
    pools: Vec<IpPool>,
    assigned: HashSet<IpAddr>,
    /// Workload key path -> JSON-encoded endpoint record.
    endpoints: HashMap<String, String>,
    next_hops: HashMap<String, NextHops>,
}

#[derive(Default)]
pub struct MemoryIpam {
    inner: RwLock<Inner>,
}

fn workload_key(identity: &WorkloadIdentity) -> String {
    format!(
        "/tether/v1/host/{}/workload/{}/{}",
        identity.hostname, identity.orchestrator_id, identity.workload_id
    )
}

impl MemoryIpam {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a pool. Pool lifecycle is managed out-of-band, so this is
    /// a seeding operation rather than part of [`IpamClient`].
    pub async fn add_pool(&self, pool: IpPool) {
        self.inner.write().await.pools.push(pool);
    }

    /// Deregister a pool. Addresses already assigned from it stay marked
    /// assigned; only releases start failing to find the pool.
    pub async fn remove_pool(&self, cidr: &ipnetwork::IpNetwork) {
        self.inner.write().await.pools.retain(|p| p.cidr != *cidr);
    }

    /// Register the routing next hops for a host.
    pub async fn set_next_hops(&self, hostname: &str, hops: NextHops) {
        self.inner
            .write()
            .await
            .next_hops
            .insert(hostname.to_string(), hops);
    }

    /// Whether `ip` is currently marked assigned.
    pub async fn is_assigned(&self, ip: IpAddr) -> bool {
        self.inner.read().await.assigned.contains(&ip)
    }

    /// Number of addresses currently marked assigned across all pools.
    pub async fn assigned_count(&self) -> usize {
        self.inner.read().await.assigned.len()
    }
}

#[async_trait]
impl IpamClient for MemoryIpam {
    async fn find_pool(&self, ip: IpAddr) -> Result<Option<IpPool>, IpamError> {
        let inner = self.inner.read().await;
        Ok(inner.pools.iter().find(|p| p.contains(ip)).cloned())
    }

    async fn assign(&self, pool: &IpPool, ip: Option<IpAddr>) -> Result<Vec<IpAddr>, IpamError> {
        let mut inner = self.inner.write().await;
        match ip {
            Some(ip) => {
                if !pool.contains(ip) || !inner.assigned.insert(ip) {
                    return Ok(Vec::new());
                }
                Ok(vec![ip])
            }
            None => {
                let free = first_free(pool, &inner.assigned);
                match free {
                    Some(ip) => {
                        inner.assigned.insert(ip);
                        Ok(vec![ip])
                    }
                    None => Ok(Vec::new()),
                }
            }
        }
    }

    async fn release(&self, ips: &HashSet<IpAddr>) -> Result<usize, IpamError> {
        let mut inner = self.inner.write().await;
        let mut released = 0;
        for ip in ips {
            if inner.assigned.remove(ip) {
                released += 1;
            } else {
                debug!("release of {ip}: not assigned, nothing to do");
            }
        }
        Ok(released)
    }

    async fn endpoint(&self, identity: &WorkloadIdentity) -> Result<Option<Endpoint>, IpamError> {
        let key = workload_key(identity);
        let inner = self.inner.read().await;
        match inner.endpoints.get(&key) {
            Some(doc) => {
                let ep = serde_json::from_str(doc).map_err(|e| IpamError::MalformedRecord {
                    key,
                    reason: e.to_string(),
                })?;
                Ok(Some(ep))
            }
            None => Ok(None),
        }
    }

    async fn create_endpoint(&self, endpoint: &Endpoint) -> Result<(), IpamError> {
        let key = workload_key(&endpoint.identity);
        let doc = serde_json::to_string(endpoint).map_err(|e| IpamError::MalformedRecord {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        let mut inner = self.inner.write().await;
        if inner.endpoints.contains_key(&key) {
            return Err(IpamError::WriteRejected {
                key,
                reason: "endpoint record already exists".into(),
            });
        }
        inner.endpoints.insert(key, doc);
        Ok(())
    }

    async fn update_endpoint(&self, endpoint: &Endpoint) -> Result<(), IpamError> {
        let key = workload_key(&endpoint.identity);
        let doc = serde_json::to_string(endpoint).map_err(|e| IpamError::MalformedRecord {
            key: key.clone(),
            reason: e.to_string(),
        })?;
        let mut inner = self.inner.write().await;
        if !inner.endpoints.contains_key(&key) {
            return Err(IpamError::WriteRejected {
                key,
                reason: "no endpoint record to update".into(),
            });
        }
        inner.endpoints.insert(key, doc);
        Ok(())
    }

    async fn remove_workload(&self, identity: &WorkloadIdentity) -> Result<(), IpamError> {
        let key = workload_key(identity);
        self.inner.write().await.endpoints.remove(&key);
        Ok(())
    }

    async fn next_hops(&self, hostname: &str) -> Result<NextHops, IpamError> {
        let inner = self.inner.read().await;
        Ok(inner.next_hops.get(hostname).cloned().unwrap_or_default())
    }
}

/// First address in `pool` not yet assigned, skipping the network and
/// broadcast addresses for IPv4.
fn first_free(pool: &IpPool, assigned: &HashSet<IpAddr>) -> Option<IpAddr> {
    match pool.cidr {
        ipnetwork::IpNetwork::V4(net) => net
            .iter()
            .filter(|a| *a != net.network() && *a != net.broadcast())
            .map(IpAddr::V4)
            .find(|a| !assigned.contains(a)),
        ipnetwork::IpNetwork::V6(net) => net
            .iter()
            .skip(1) // anycast subnet-router address
            .map(IpAddr::V6)
            .find(|a| !assigned.contains(a)),
    }
}
