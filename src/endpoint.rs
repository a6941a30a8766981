//! The endpoint lifecycle manager.
//!
//! Orchestrates the container runtime, the IPAM datastore and the kernel
//! namespace wiring to attach and detach container network endpoints. This
//! is the only place the three subsystems are kept consistent: every
//! operation validates its preconditions first, then acquires resources in
//! a fixed order, recording a compensating action for each acquisition on
//! an undo log. On failure the log unwinds in reverse, releasing what was
//! acquired; compensations that themselves fail are appended to the error
//! rather than swallowed, so a leaked address is always reported.
//!
//! Nothing here is retried and there are no timeouts: each operation is a
//! single synchronous attempt, and the only atomicity relied upon is the
//! IPAM client's single-address assign/release.

use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::Arc;

use log::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::ipam::IpamClient;
use crate::runtime::ContainerRuntime;
use crate::types::{ContainerInfo, Endpoint, IpFamily, WorkloadIdentity};
use crate::wiring::NamespaceWiring;

/// Compensating action recorded after a successful acquisition.
enum Undo {
    /// Return an assigned address to its pool.
    Release(IpAddr),
    /// Re-persist an endpoint record as it was before this operation.
    Restore(Endpoint),
    /// Make sure the kernel no longer holds an address before any later
    /// `Release` of it runs. If this fails, the release is skipped: the
    /// address stays assigned rather than risk freeing one still live on
    /// the wire.
    Detach {
        pid: u32,
        ip: IpAddr,
        interface: String,
    },
}

pub struct EndpointManager {
    hostname: String,
    orchestrator_id: String,
    proc_root: String,
    runtime: Arc<dyn ContainerRuntime>,
    ipam: Arc<dyn IpamClient>,
    wiring: Arc<dyn NamespaceWiring>,
}

impl EndpointManager {
    pub fn new(
        config: &Config,
        runtime: Arc<dyn ContainerRuntime>,
        ipam: Arc<dyn IpamClient>,
        wiring: Arc<dyn NamespaceWiring>,
    ) -> Self {
        Self {
            hostname: config.hostname.clone(),
            orchestrator_id: config.orchestrator_id.clone(),
            proc_root: config.proc_root.clone(),
            runtime,
            ipam,
            wiring,
        }
    }

    /// Attach a new endpoint to a running container: assign `ip`, wire a
    /// veth pair into the container's namespace as `interface` with a
    /// default route, and persist the resulting [`Endpoint`].
    ///
    /// Not idempotent: a second call for an attached container fails with
    /// [`Error::EndpointAlreadyExists`].
    pub async fn endpoint_add(
        &self,
        container: &str,
        ip: IpAddr,
        interface: &str,
    ) -> Result<Endpoint> {
        let info = self.runtime.container_info(container).await?;
        let pid = require_running(container, &info)?;
        let identity = self.identity_for(&info);

        if self.ipam.endpoint(&identity).await?.is_some() {
            return Err(Error::EndpointAlreadyExists(identity));
        }

        let pool = self
            .ipam
            .find_pool(ip)
            .await?
            .ok_or(Error::NoMatchingPool(ip))?;
        debug!("{ip} belongs to pool {}", pool.cidr);

        let family = IpFamily::of(ip);
        let next_hops = self.ipam.next_hops(&self.hostname).await?;
        if next_hops.for_family(family).is_empty() {
            return Err(Error::NoRoutingNextHop(family));
        }

        if self.ipam.assign(&pool, Some(ip)).await?.is_empty() {
            return Err(Error::AddressAlreadyAssigned(ip));
        }
        let undo = vec![Undo::Release(ip)];

        let mut endpoint = Endpoint::new(
            Uuid::new_v4().simple().to_string(),
            identity,
            interface,
        );
        endpoint.add_address(ip);

        let host_interface = endpoint.host_interface_name();
        let mac = match self
            .wiring
            .create_interface(pid, ip, interface, &host_interface, &next_hops, &self.proc_root)
            .await
        {
            Ok(mac) => mac,
            Err(e) => return Err(self.unwind(Error::Wiring(e), undo).await),
        };
        endpoint.mac_address = Some(mac);

        if let Err(e) = self.ipam.create_endpoint(&endpoint).await {
            // Only the address goes back to the pool; the veth pair stays
            // behind as an orphan for the operator to clean up.
            warn!("endpoint record for {container} not persisted; interface {host_interface} is orphaned");
            return Err(self.unwind(Error::DatastoreWriteFailed(e), undo).await);
        }

        info!(
            "attached {container}: endpoint {} with {ip} on {interface}",
            endpoint.endpoint_id
        );
        Ok(endpoint)
    }

    /// Detach a container's endpoint: release all its addresses, remove
    /// the host-side interface and delete the persisted records.
    ///
    /// The container does not need to be running; only its identity
    /// mapping is required. Release and interface-removal failures are
    /// logged and do not stop the record deletion, so a half-broken
    /// teardown never blocks a later `endpoint_add`.
    pub async fn endpoint_remove(&self, container: &str) -> Result<()> {
        let info = self.runtime.container_info(container).await?;
        let identity = self.identity_for(&info);

        let endpoint = self
            .ipam
            .endpoint(&identity)
            .await?
            .ok_or_else(|| Error::EndpointNotFound(identity.clone()))?;

        for ip in endpoint.addresses() {
            match self.ipam.find_pool(ip).await {
                Ok(Some(_)) => {
                    let mut ips = HashSet::new();
                    ips.insert(ip);
                    match self.ipam.release(&ips).await {
                        Ok(n) => debug!("released {ip} ({n} address)"),
                        Err(e) => error!("could not release {ip}: {e}"),
                    }
                }
                Ok(None) => {
                    debug!("{ip} matches no configured pool; treating as already released")
                }
                Err(e) => error!("pool lookup for {ip} failed: {e}"),
            }
        }

        let host_interface = endpoint.host_interface_name();
        if let Err(e) = self.wiring.remove_interface(&host_interface).await {
            error!("could not remove interface {host_interface}: {e}");
        }

        self.ipam
            .remove_workload(&identity)
            .await
            .map_err(Error::DatastoreWriteFailed)?;

        info!("detached {container}: endpoint {} removed", endpoint.endpoint_id);
        Ok(())
    }

    /// Add a secondary address to a container's existing endpoint.
    pub async fn ip_add(&self, container: &str, ip: IpAddr, interface: &str) -> Result<()> {
        let info = self.runtime.container_info(container).await?;
        let pid = require_running(container, &info)?;

        let pool = self
            .ipam
            .find_pool(ip)
            .await?
            .ok_or(Error::NoMatchingPool(ip))?;

        let identity = self.identity_for(&info);
        let Some(mut endpoint) = self.ipam.endpoint(&identity).await? else {
            return Err(Error::ContainerNotNetworked(container.to_string()));
        };

        if self.ipam.assign(&pool, Some(ip)).await?.is_empty() {
            return Err(Error::AddressAlreadyAssigned(ip));
        }
        let mut undo = vec![Undo::Release(ip)];

        let prior = endpoint.clone();
        endpoint.add_address(ip);
        if let Err(e) = self.ipam.update_endpoint(&endpoint).await {
            return Err(self.unwind(Error::DatastoreWriteFailed(e), undo).await);
        }
        // Unwinds record-first, then the detach guard, then the release.
        undo.push(Undo::Detach {
            pid,
            ip,
            interface: interface.to_string(),
        });
        undo.push(Undo::Restore(prior));

        if let Err(e) = self
            .wiring
            .add_address(pid, ip, interface, &self.proc_root)
            .await
        {
            return Err(self.unwind(Error::Wiring(e), undo).await);
        }

        info!("added {ip} to {container} on {interface}");
        Ok(())
    }

    /// Remove an address from a container's endpoint.
    ///
    /// The record is updated first, then the kernel, then the IPAM
    /// release. A wiring failure leaves the address assigned in IPAM:
    /// an address that may still be live on the wire is never freed.
    pub async fn ip_remove(&self, container: &str, ip: IpAddr, interface: &str) -> Result<()> {
        self.ipam
            .find_pool(ip)
            .await?
            .ok_or(Error::NoMatchingPool(ip))?;

        let info = self.runtime.container_info(container).await?;
        let pid = require_running(container, &info)?;

        let identity = self.identity_for(&info);
        let Some(mut endpoint) = self.ipam.endpoint(&identity).await? else {
            return Err(Error::ContainerNotNetworked(container.to_string()));
        };

        if !endpoint.contains_address(ip) {
            return Err(Error::AddressNotAssignedToContainer(ip));
        }

        endpoint.remove_address(ip);
        self.ipam
            .update_endpoint(&endpoint)
            .await
            .map_err(Error::DatastoreWriteFailed)?;

        self.wiring
            .remove_address(pid, ip, interface, &self.proc_root)
            .await?;

        let mut ips = HashSet::new();
        ips.insert(ip);
        self.ipam
            .release(&ips)
            .await
            .map_err(Error::DatastoreWriteFailed)?;

        info!("removed {ip} from {container} on {interface}");
        Ok(())
    }

    fn identity_for(&self, info: &ContainerInfo) -> WorkloadIdentity {
        WorkloadIdentity::new(&self.hostname, &self.orchestrator_id, &info.id)
    }

    /// Execute the undo log in reverse. Returns `cause` unchanged when
    /// every compensation succeeds, otherwise wraps it with notes on what
    /// could not be undone.
    async fn unwind(&self, cause: Error, mut undo: Vec<Undo>) -> Error {
        let mut notes = Vec::new();
        let mut held: HashSet<IpAddr> = HashSet::new();

        while let Some(action) = undo.pop() {
            match action {
                Undo::Restore(endpoint) => {
                    if let Err(e) = self.ipam.update_endpoint(&endpoint).await {
                        notes.push(format!(
                            "endpoint record for {} not restored: {e}",
                            endpoint.identity
                        ));
                    } else {
                        debug!("rollback restored endpoint record for {}", endpoint.identity);
                    }
                }
                Undo::Detach { pid, ip, interface } => {
                    if let Err(e) = self
                        .wiring
                        .remove_address(pid, ip, &interface, &self.proc_root)
                        .await
                    {
                        held.insert(ip);
                        notes.push(format!(
                            "{ip} may still be attached to {interface} (detach failed: {e}); \
                             leaving it assigned"
                        ));
                    }
                }
                Undo::Release(ip) => {
                    if held.contains(&ip) {
                        continue;
                    }
                    let mut ips = HashSet::new();
                    ips.insert(ip);
                    match self.ipam.release(&ips).await {
                        Ok(_) => debug!("rollback released {ip}"),
                        Err(e) => notes.push(format!("{ip} not released: {e}")),
                    }
                }
            }
        }

        if notes.is_empty() {
            cause
        } else {
            error!("rollback incomplete: {}", notes.join("; "));
            Error::CompensationFailed {
                source: Box::new(cause),
                notes,
            }
        }
    }
}

/// A running container with a known PID, or [`Error::ContainerNotRunning`].
fn require_running(container: &str, info: &ContainerInfo) -> Result<u32> {
    if !info.running {
        return Err(Error::ContainerNotRunning(container.to_string()));
    }
    info.pid
        .ok_or_else(|| Error::ContainerNotRunning(container.to_string()))
}
