//! Data structures shared across the endpoint lifecycle manager and its
//! collaborators.
//!
//! These types are serialised using [`serde`](https://serde.rs/): the
//! [`Endpoint`] record is what gets written to the shared datastore, and
//! the rest are validated, typed views of data that crosses a collaborator
//! boundary (container runtime, IPAM datastore, namespace wiring).

use std::collections::HashSet;
use std::fmt;
use std::net::IpAddr;

use ipnetwork::{IpNetwork, Ipv4Network, Ipv6Network};
use macaddr::MacAddr6;
use serde::{Deserialize, Serialize};

/// Prefix for the host-side end of an endpoint's veth pair.
pub const IF_PREFIX: &str = "teth";

/// Number of characters of the endpoint id used in interface names.
/// Keeps the full name within the kernel's 15-character IFNAMSIZ limit.
const IF_SUFFIX_LEN: usize = 11;

/// The triple that uniquely locates at most one [`Endpoint`] in the
/// datastore: which host the container runs on, which orchestrator manages
/// it, and the orchestrator's own identifier for the workload.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkloadIdentity {
    pub hostname: String,
    pub orchestrator_id: String,
    pub workload_id: String,
}

impl WorkloadIdentity {
    pub fn new(
        hostname: impl Into<String>,
        orchestrator_id: impl Into<String>,
        workload_id: impl Into<String>,
    ) -> Self {
        Self {
            hostname: hostname.into(),
            orchestrator_id: orchestrator_id.into(),
            workload_id: workload_id.into(),
        }
    }
}

impl fmt::Display for WorkloadIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}",
            self.hostname, self.orchestrator_id, self.workload_id
        )
    }
}

/// The persisted record of a container's network attachment.
///
/// An `Endpoint` exists for a workload iff the container has been
/// successfully attached and not yet detached. Every address in
/// `ipv4_nets`/`ipv6_nets` is host-sized (`/32` or `/128`) and is also
/// marked assigned in the IPAM datastore; the lifecycle manager keeps the
/// two in step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    /// Opaque identifier for the interface itself, assigned at creation.
    pub endpoint_id: String,
    pub identity: WorkloadIdentity,
    /// MAC of the in-container interface, read back from the kernel during
    /// wiring. Absent only if wiring has not completed.
    pub mac_address: Option<MacAddr6>,
    pub ipv4_nets: HashSet<Ipv4Network>,
    pub ipv6_nets: HashSet<Ipv6Network>,
    /// Name of the interface inside the container, conventionally `eth0`
    /// for the primary attachment.
    pub interface_name: String,
}

impl Endpoint {
    pub fn new(endpoint_id: String, identity: WorkloadIdentity, interface_name: &str) -> Self {
        Self {
            endpoint_id,
            identity,
            mac_address: None,
            ipv4_nets: HashSet::new(),
            ipv6_nets: HashSet::new(),
            interface_name: interface_name.to_string(),
        }
    }

    /// Add `ip` to the address set of its family, as a host-sized network.
    pub fn add_address(&mut self, ip: IpAddr) {
        match ip {
            IpAddr::V4(v4) => {
                // Prefix 32 on a v4 address cannot fail.
                if let Ok(net) = Ipv4Network::new(v4, 32) {
                    self.ipv4_nets.insert(net);
                }
            }
            IpAddr::V6(v6) => {
                if let Ok(net) = Ipv6Network::new(v6, 128) {
                    self.ipv6_nets.insert(net);
                }
            }
        }
    }

    /// Remove `ip` from the address set of its family. Returns whether the
    /// address was present.
    pub fn remove_address(&mut self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => match Ipv4Network::new(v4, 32) {
                Ok(net) => self.ipv4_nets.remove(&net),
                Err(_) => false,
            },
            IpAddr::V6(v6) => match Ipv6Network::new(v6, 128) {
                Ok(net) => self.ipv6_nets.remove(&net),
                Err(_) => false,
            },
        }
    }

    pub fn contains_address(&self, ip: IpAddr) -> bool {
        match ip {
            IpAddr::V4(v4) => self.ipv4_nets.iter().any(|n| n.ip() == v4),
            IpAddr::V6(v6) => self.ipv6_nets.iter().any(|n| n.ip() == v6),
        }
    }

    /// All addresses on the endpoint, both families.
    pub fn addresses(&self) -> Vec<IpAddr> {
        self.ipv4_nets
            .iter()
            .map(|n| IpAddr::V4(n.ip()))
            .chain(self.ipv6_nets.iter().map(|n| IpAddr::V6(n.ip())))
            .collect()
    }

    /// Name of the host-side end of the veth pair for this endpoint.
    pub fn host_interface_name(&self) -> String {
        let suffix: String = self.endpoint_id.chars().take(IF_SUFFIX_LEN).collect();
        format!("{IF_PREFIX}{suffix}")
    }
}

/// A configured address pool. Read-only from the lifecycle manager's
/// perspective; pool management is a separate concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IpPool {
    pub cidr: IpNetwork,
    /// IP-in-IP encapsulation enabled for this pool.
    pub ipip: bool,
    /// Outgoing NAT enabled for this pool.
    pub nat_outgoing: bool,
}

impl IpPool {
    pub fn new(cidr: IpNetwork) -> Self {
        Self {
            cidr,
            ipip: false,
            nat_outgoing: false,
        }
    }

    pub fn contains(&self, ip: IpAddr) -> bool {
        self.cidr.contains(ip)
    }
}

/// Default routing next hops available on a host, per address family.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NextHops {
    pub ipv4: Vec<IpAddr>,
    pub ipv6: Vec<IpAddr>,
}

impl NextHops {
    pub fn for_family(&self, family: IpFamily) -> &[IpAddr] {
        match family {
            IpFamily::V4 => &self.ipv4,
            IpFamily::V6 => &self.ipv6,
        }
    }
}

/// Address family of an IP address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IpFamily {
    V4,
    V6,
}

impl IpFamily {
    pub fn of(ip: IpAddr) -> Self {
        match ip {
            IpAddr::V4(_) => IpFamily::V4,
            IpAddr::V6(_) => IpFamily::V6,
        }
    }
}

impl fmt::Display for IpFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpFamily::V4 => write!(f, "IPv4"),
            IpFamily::V6 => write!(f, "IPv6"),
        }
    }
}

/// What the container runtime reports about a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    /// The runtime's internal identifier, used as the workload id.
    pub id: String,
    pub running: bool,
    /// Kernel PID of the container's init process. Absent when the
    /// container is not running.
    pub pid: Option<u32>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_addresses_are_host_sized() {
        let identity = WorkloadIdentity::new("host1", "docker", "abc");
        let mut ep = Endpoint::new("0123456789abcdef".into(), identity, "eth0");

        ep.add_address("10.0.1.5".parse().unwrap());
        ep.add_address("fd80::5".parse().unwrap());

        assert!(ep.ipv4_nets.contains(&"10.0.1.5/32".parse().unwrap()));
        assert!(ep.ipv6_nets.contains(&"fd80::5/128".parse().unwrap()));
        assert!(ep.contains_address("10.0.1.5".parse().unwrap()));
        assert!(!ep.contains_address("10.0.1.6".parse().unwrap()));
        assert_eq!(ep.addresses().len(), 2);
    }

    #[test]
    fn endpoint_remove_address_reports_membership() {
        let identity = WorkloadIdentity::new("host1", "docker", "abc");
        let mut ep = Endpoint::new("0123456789abcdef".into(), identity, "eth0");
        ep.add_address("10.0.1.5".parse().unwrap());

        assert!(ep.remove_address("10.0.1.5".parse().unwrap()));
        assert!(!ep.remove_address("10.0.1.5".parse().unwrap()));
        assert!(ep.ipv4_nets.is_empty());
    }

    #[test]
    fn host_interface_name_fits_ifnamsiz() {
        let identity = WorkloadIdentity::new("host1", "docker", "abc");
        let ep = Endpoint::new("aabbccddeeff00112233".into(), identity, "eth0");
        let name = ep.host_interface_name();
        assert_eq!(name, "tethaabbccddeef");
        assert!(name.len() <= 15);
    }

    #[test]
    fn pool_contains() {
        let pool = IpPool::new("10.0.1.0/24".parse().unwrap());
        assert!(pool.contains("10.0.1.200".parse().unwrap()));
        assert!(!pool.contains("10.0.2.1".parse().unwrap()));
        assert!(!pool.contains("fd80::1".parse().unwrap()));
    }
}
