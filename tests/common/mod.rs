//! Fakes and instrumentation shared by the lifecycle tests.

use std::collections::{HashMap, HashSet};
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use macaddr::MacAddr6;

use tether::config::Config;
use tether::endpoint::EndpointManager;
use tether::ipam::{IpamClient, IpamError, MemoryIpam};
use tether::runtime::{ContainerRuntime, RuntimeError};
use tether::types::{ContainerInfo, Endpoint, IpPool, NextHops, WorkloadIdentity};
use tether::wiring::{NamespaceWiring, WiringError};

pub const HOSTNAME: &str = "host1";
pub const ORCHESTRATOR: &str = "docker";

/// Container runtime fake over a name -> info map.
#[derive(Default)]
pub struct FakeRuntime {
    containers: Mutex<HashMap<String, ContainerInfo>>,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_running(&self, name: &str, id: &str, pid: u32) {
        self.containers.lock().unwrap().insert(
            name.to_string(),
            ContainerInfo {
                id: id.to_string(),
                running: true,
                pid: Some(pid),
            },
        );
    }

    pub fn add_stopped(&self, name: &str, id: &str) {
        self.containers.lock().unwrap().insert(
            name.to_string(),
            ContainerInfo {
                id: id.to_string(),
                running: false,
                pid: None,
            },
        );
    }

    pub fn stop(&self, name: &str) {
        let mut containers = self.containers.lock().unwrap();
        if let Some(info) = containers.get_mut(name) {
            info.running = false;
            info.pid = None;
        }
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn container_info(&self, container: &str) -> Result<ContainerInfo, RuntimeError> {
        self.containers
            .lock()
            .unwrap()
            .get(container)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(container.to_string()))
    }
}

fn injected(op: &str) -> WiringError {
    WiringError::Command {
        command: format!("ip {op}"),
        status: 2,
        stderr: "injected failure".to_string(),
    }
}

/// Namespace wiring fake: records every call, fails on demand.
#[derive(Default)]
pub struct FakeWiring {
    calls: Mutex<Vec<String>>,
    pub fail_create: AtomicBool,
    pub fail_add_address: AtomicBool,
    pub fail_remove_address: AtomicBool,
    pub fail_remove_interface: AtomicBool,
}

impl FakeWiring {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl NamespaceWiring for FakeWiring {
    async fn create_interface(
        &self,
        pid: u32,
        ip: IpAddr,
        interface: &str,
        host_interface: &str,
        _next_hops: &NextHops,
        _proc_root: &str,
    ) -> Result<MacAddr6, WiringError> {
        self.record(format!("create_interface {pid} {ip} {interface} {host_interface}"));
        if self.fail_create.load(Ordering::SeqCst) {
            return Err(injected("link add"));
        }
        Ok("ee:ee:ee:ee:ee:01".parse().unwrap())
    }

    async fn add_address(
        &self,
        pid: u32,
        ip: IpAddr,
        interface: &str,
        _proc_root: &str,
    ) -> Result<(), WiringError> {
        self.record(format!("add_address {pid} {ip} {interface}"));
        if self.fail_add_address.load(Ordering::SeqCst) {
            return Err(injected("addr add"));
        }
        Ok(())
    }

    async fn remove_address(
        &self,
        pid: u32,
        ip: IpAddr,
        interface: &str,
        _proc_root: &str,
    ) -> Result<(), WiringError> {
        self.record(format!("remove_address {pid} {ip} {interface}"));
        if self.fail_remove_address.load(Ordering::SeqCst) {
            return Err(injected("addr del"));
        }
        Ok(())
    }

    async fn remove_interface(&self, host_interface: &str) -> Result<(), WiringError> {
        self.record(format!("remove_interface {host_interface}"));
        if self.fail_remove_interface.load(Ordering::SeqCst) {
            return Err(injected("link del"));
        }
        Ok(())
    }
}

/// [`MemoryIpam`] wrapper that counts calls and injects write failures.
pub struct TestIpam {
    pub inner: MemoryIpam,
    pub assign_calls: AtomicUsize,
    pub release_calls: AtomicUsize,
    pub fail_create_endpoint: AtomicBool,
    update_calls: AtomicUsize,
    fail_update_on: Mutex<HashSet<usize>>,
}

impl TestIpam {
    pub fn new() -> Self {
        Self {
            inner: MemoryIpam::new(),
            assign_calls: AtomicUsize::new(0),
            release_calls: AtomicUsize::new(0),
            fail_create_endpoint: AtomicBool::new(false),
            update_calls: AtomicUsize::new(0),
            fail_update_on: Mutex::new(HashSet::new()),
        }
    }

    /// Make the `n`th `update_endpoint` call fail (1-based).
    pub fn fail_update_on_call(&self, n: usize) {
        self.fail_update_on.lock().unwrap().insert(n);
    }
}

#[async_trait]
impl IpamClient for TestIpam {
    async fn find_pool(&self, ip: IpAddr) -> Result<Option<IpPool>, IpamError> {
        self.inner.find_pool(ip).await
    }

    async fn assign(&self, pool: &IpPool, ip: Option<IpAddr>) -> Result<Vec<IpAddr>, IpamError> {
        self.assign_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.assign(pool, ip).await
    }

    async fn release(&self, ips: &HashSet<IpAddr>) -> Result<usize, IpamError> {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
        self.inner.release(ips).await
    }

    async fn endpoint(&self, identity: &WorkloadIdentity) -> Result<Option<Endpoint>, IpamError> {
        self.inner.endpoint(identity).await
    }

    async fn create_endpoint(&self, endpoint: &Endpoint) -> Result<(), IpamError> {
        if self.fail_create_endpoint.load(Ordering::SeqCst) {
            return Err(IpamError::Unavailable("injected write failure".into()));
        }
        self.inner.create_endpoint(endpoint).await
    }

    async fn update_endpoint(&self, endpoint: &Endpoint) -> Result<(), IpamError> {
        let call = self.update_calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.fail_update_on.lock().unwrap().contains(&call) {
            return Err(IpamError::Unavailable("injected write failure".into()));
        }
        self.inner.update_endpoint(endpoint).await
    }

    async fn remove_workload(&self, identity: &WorkloadIdentity) -> Result<(), IpamError> {
        self.inner.remove_workload(identity).await
    }

    async fn next_hops(&self, hostname: &str) -> Result<NextHops, IpamError> {
        self.inner.next_hops(hostname).await
    }
}

pub struct Harness {
    pub manager: EndpointManager,
    pub runtime: Arc<FakeRuntime>,
    pub ipam: Arc<TestIpam>,
    pub wiring: Arc<FakeWiring>,
}

impl Harness {
    pub fn identity(&self, workload_id: &str) -> WorkloadIdentity {
        WorkloadIdentity::new(HOSTNAME, ORCHESTRATOR, workload_id)
    }
}

/// A manager over fakes, seeded with the standard scenario: container `c1`
/// running (id `c1id`, pid 4321), pools `10.0.1.0/24` and `fd80::/64`,
/// IPv4 next hop `192.168.1.1`, no IPv6 next hop.
pub async fn harness() -> Harness {
    let _ = env_logger::builder().is_test(true).try_init();

    let runtime = Arc::new(FakeRuntime::new());
    runtime.add_running("c1", "c1id", 4321);

    let ipam = Arc::new(TestIpam::new());
    ipam.inner.add_pool(IpPool::new("10.0.1.0/24".parse().unwrap())).await;
    ipam.inner.add_pool(IpPool::new("fd80::/64".parse().unwrap())).await;
    ipam.inner
        .set_next_hops(
            HOSTNAME,
            NextHops {
                ipv4: vec!["192.168.1.1".parse().unwrap()],
                ipv6: Vec::new(),
            },
        )
        .await;

    let wiring = Arc::new(FakeWiring::new());

    let config = Config {
        hostname: HOSTNAME.into(),
        orchestrator_id: ORCHESTRATOR.into(),
        proc_root: "/proc".into(),
    };
    let manager = EndpointManager::new(
        &config,
        runtime.clone(),
        ipam.clone(),
        wiring.clone(),
    );

    Harness {
        manager,
        runtime,
        ipam,
        wiring,
    }
}
