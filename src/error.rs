//! Failure taxonomy for the endpoint lifecycle operations.
//!
//! Every failure an operation can surface maps to one variant here, with a
//! message naming the precondition or step that failed. Compensation
//! failures are appended to the original failure via
//! [`Error::CompensationFailed`] rather than replacing or swallowing it.

use std::net::IpAddr;

use thiserror::Error;

use crate::ipam::IpamError;
use crate::runtime::RuntimeError;
use crate::types::{IpFamily, WorkloadIdentity};
use crate::wiring::WiringError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The operation requires a running container.
    #[error("container {0} is not running")]
    ContainerNotRunning(String),

    /// The container runtime could not resolve the container at all.
    #[error("container lookup failed: {0}")]
    ContainerLookupFailed(#[from] RuntimeError),

    /// `endpoint_add` on a workload that is already attached. Re-invocation
    /// is a caller error, not an idempotent no-op.
    #[error("endpoint already exists for workload {0}")]
    EndpointAlreadyExists(WorkloadIdentity),

    /// `endpoint_remove` on a workload that has no endpoint.
    #[error("no endpoint found for workload {0}")]
    EndpointNotFound(WorkloadIdentity),

    /// An address-level operation on a container that was never attached.
    #[error("container {0} has no network endpoint; attach it first with endpoint add")]
    ContainerNotNetworked(String),

    /// The requested address is not covered by any configured pool.
    #[error("no configured pool contains address {0}")]
    NoMatchingPool(IpAddr),

    /// The host has no routing next hop for the address family, meaning it
    /// is not configured for that family at all.
    #[error("host has no {0} routing next hop; is this host configured for {0}?")]
    NoRoutingNextHop(IpFamily),

    /// The datastore reported the address as taken (or the pool exhausted).
    #[error("address {0} is already assigned in its pool")]
    AddressAlreadyAssigned(IpAddr),

    /// `ip_remove` for an address the endpoint does not hold.
    #[error("address {0} is not assigned to this container")]
    AddressNotAssignedToContainer(IpAddr),

    /// A read against the IPAM datastore failed.
    #[error("datastore read failed: {0}")]
    Datastore(IpamError),

    /// Persisting an endpoint or workload record failed.
    #[error("datastore write failed: {0}")]
    DatastoreWriteFailed(IpamError),

    /// A kernel-level namespace operation failed.
    #[error("namespace wiring failed: {0}")]
    Wiring(#[from] WiringError),

    /// A later step failed and one or more compensating actions failed as
    /// well. The original failure is preserved; `notes` records what could
    /// not be undone so an operator can reconcile by hand.
    #[error("{source}; compensation incomplete: {}", notes.join("; "))]
    CompensationFailed {
        source: Box<Error>,
        notes: Vec<String>,
    },
}

impl From<IpamError> for Error {
    fn from(err: IpamError) -> Self {
        Error::Datastore(err)
    }
}
