//! tether — binds running containers to managed network endpoints.
//!
//! The crate provisions and tears down per-container network identity on a
//! host: it attaches a running container to an endpoint (a veth pair with
//! one or more addresses drawn from managed pools), and reverses that
//! binding cleanly, including under partial failure.
//!
//! The [`EndpointManager`] is the core. It coordinates three injected
//! collaborators, each behind a narrow trait:
//!
//! * [`runtime::ContainerRuntime`] — is the container running, what are
//!   its id and PID (Docker impl: [`runtime::DockerRuntime`]);
//! * [`ipam::IpamClient`] — the shared address-management datastore
//!   (in-memory impl: [`ipam::MemoryIpam`]);
//! * [`wiring::NamespaceWiring`] — kernel namespace operations (iproute2
//!   impl: [`wiring::IpCmdWiring`]).
//!
//! Callers (a CLI layer or an orchestrator plugin) invoke the four public
//! operations: `endpoint_add`, `endpoint_remove`, `ip_add`, `ip_remove`.

pub mod config;
pub mod endpoint;
pub mod error;
pub mod ipam;
pub mod runtime;
pub mod types;
pub mod wiring;

pub use config::Config;
pub use endpoint::EndpointManager;
pub use error::{Error, Result};
pub use types::{Endpoint, IpFamily, IpPool, NextHops, WorkloadIdentity};
