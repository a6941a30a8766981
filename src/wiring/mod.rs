//! Kernel-level namespace wiring boundary.
//!
//! Everything that touches virtual interfaces, namespace moves, addresses
//! and routes goes through [`NamespaceWiring`]. The operations are
//! synchronous, fallible system interactions; each failure carries the
//! underlying command line and exit status so an operator can see exactly
//! what the kernel rejected.

use std::net::IpAddr;

use async_trait::async_trait;
use macaddr::MacAddr6;
use thiserror::Error;

use crate::types::NextHops;

pub mod ip_cmd;
pub use ip_cmd::IpCmdWiring;

#[derive(Debug, Error)]
pub enum WiringError {
    #[error("command `{command}` exited with status {status}: {stderr}")]
    Command {
        command: String,
        status: i32,
        stderr: String,
    },
    #[error("failed to run `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },
    #[error("namespace setup failed ({context}): {source}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },
    #[error("could not read MAC of {interface}: {reason}")]
    BadMac { interface: String, reason: String },
}

/// Operations inside (and against) a container's network namespace. The
/// namespace is identified by the container's PID, reached through
/// `proc_root` (a path alias for `/proc`, configurable for when the
/// manager itself runs in a container).
#[async_trait]
pub trait NamespaceWiring: Send + Sync {
    /// Create the veth pair for a new endpoint: host side named
    /// `host_interface`, container side moved into the namespace as
    /// `interface`, with `ip` assigned and a default route programmed via
    /// the first next hop of the matching family. Returns the MAC the
    /// kernel gave the container-side interface.
    async fn create_interface(
        &self,
        pid: u32,
        ip: IpAddr,
        interface: &str,
        host_interface: &str,
        next_hops: &NextHops,
        proc_root: &str,
    ) -> Result<MacAddr6, WiringError>;

    /// Assign an additional address to an existing in-container interface.
    async fn add_address(
        &self,
        pid: u32,
        ip: IpAddr,
        interface: &str,
        proc_root: &str,
    ) -> Result<(), WiringError>;

    /// Remove an address from an in-container interface. Removing an
    /// address the interface does not hold is not an error; a failure
    /// means the kernel may still hold the address.
    async fn remove_address(
        &self,
        pid: u32,
        ip: IpAddr,
        interface: &str,
        proc_root: &str,
    ) -> Result<(), WiringError>;

    /// Delete the host-side end of an endpoint's veth pair (which takes
    /// the container side with it).
    async fn remove_interface(&self, host_interface: &str) -> Result<(), WiringError>;
}
