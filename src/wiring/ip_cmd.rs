//! Namespace wiring through the iproute2 tools.
//!
//! `ip netns` only operates on named namespaces, so each operation first
//! symlinks `{proc_root}/{pid}/ns/net` under `/var/run/netns/{pid}`, runs
//! the commands it needs, and removes the link again.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, warn};
use macaddr::MacAddr6;
use tokio::process::Command;

use super::{NamespaceWiring, WiringError};
use crate::types::{IpFamily, NextHops, IF_PREFIX};

const NETNS_RUN_DIR: &str = "/var/run/netns";

#[derive(Default)]
pub struct IpCmdWiring;

impl IpCmdWiring {
    pub fn new() -> Self {
        Self
    }
}

/// Host-sized CIDR notation for an address, `/32` or `/128`.
fn host_cidr(ip: IpAddr) -> String {
    match ip {
        IpAddr::V4(v4) => format!("{v4}/32"),
        IpAddr::V6(v6) => format!("{v6}/128"),
    }
}

/// Arguments for an `ip` invocation inside the namespace of `pid`.
fn netns_args(pid: u32, tail: &[&str]) -> Vec<String> {
    let mut args = vec!["netns".into(), "exec".into(), pid.to_string(), "ip".into()];
    args.extend(tail.iter().map(|s| s.to_string()));
    args
}

/// Temporary container-side name used while the veth pair still lives in
/// the host namespace. Shares the endpoint suffix with the host side so
/// concurrent attaches of different endpoints cannot collide.
fn temp_peer_name(host_interface: &str) -> String {
    format!("tmp{}", host_interface.trim_start_matches(IF_PREFIX))
}

async fn run(program: &str, args: &[String]) -> Result<String, WiringError> {
    let rendered = format!("{program} {}", args.join(" "));
    debug!("running: {rendered}");
    let output = Command::new(program)
        .args(args)
        .output()
        .await
        .map_err(|source| WiringError::Spawn {
            command: rendered.clone(),
            source,
        })?;
    if !output.status.success() {
        return Err(WiringError::Command {
            command: rendered,
            status: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

async fn ip(args: Vec<String>) -> Result<String, WiringError> {
    run("ip", &args).await
}

/// Make the namespace of `pid` visible to `ip netns`. Returns the link to
/// remove when done.
async fn link_netns(pid: u32, proc_root: &str) -> Result<PathBuf, WiringError> {
    let run_dir = Path::new(NETNS_RUN_DIR);
    tokio::fs::create_dir_all(run_dir)
        .await
        .map_err(|source| WiringError::Io {
            context: format!("creating {NETNS_RUN_DIR}"),
            source,
        })?;
    let link = run_dir.join(pid.to_string());
    let target = Path::new(proc_root).join(pid.to_string()).join("ns/net");
    match tokio::fs::symlink(&target, &link).await {
        Ok(()) => {}
        // A stale link from a previous run with the same pid is fine.
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {}
        Err(source) => {
            return Err(WiringError::Io {
                context: format!("linking {} -> {}", link.display(), target.display()),
                source,
            })
        }
    }
    Ok(link)
}

async fn unlink_netns(link: PathBuf) {
    if let Err(e) = tokio::fs::remove_file(&link).await {
        // Leaking the symlink is harmless; the namespace itself is pinned
        // by the container process, not by this link.
        warn!("could not remove netns link {}: {e}", link.display());
    }
}

#[async_trait]
impl NamespaceWiring for IpCmdWiring {
    async fn create_interface(
        &self,
        pid: u32,
        ip_addr: IpAddr,
        interface: &str,
        host_interface: &str,
        next_hops: &NextHops,
        proc_root: &str,
    ) -> Result<MacAddr6, WiringError> {
        let netns = link_netns(pid, proc_root).await?;
        let result = async {
            let tmp = temp_peer_name(host_interface);

            // Pair is created host-side, then the peer moves into the
            // container and takes its final name there.
            ip(to_args(&[
                "link", "add", host_interface, "type", "veth", "peer", "name", &tmp,
            ]))
            .await?;
            ip(to_args(&["link", "set", host_interface, "up"])).await?;
            ip(to_args(&["link", "set", &tmp, "netns", &pid.to_string()])).await?;
            ip(netns_args(pid, &["link", "set", "dev", &tmp, "name", interface])).await?;
            ip(netns_args(pid, &["link", "set", interface, "up"])).await?;

            let cidr = host_cidr(ip_addr);
            ip(netns_args(pid, &["addr", "add", &cidr, "dev", interface])).await?;

            let family = IpFamily::of(ip_addr);
            // Caller has already verified a next hop exists for the family.
            if let Some(hop) = next_hops.for_family(family).first() {
                let hop = hop.to_string();
                let mut route: Vec<&str> = vec!["route", "add", "default", "via", &hop];
                if family == IpFamily::V6 {
                    route.insert(0, "-6");
                }
                ip(netns_args(pid, &route)).await?;
            }

            read_mac(pid, interface).await
        }
        .await;
        unlink_netns(netns).await;
        result
    }

    async fn add_address(
        &self,
        pid: u32,
        ip_addr: IpAddr,
        interface: &str,
        proc_root: &str,
    ) -> Result<(), WiringError> {
        let netns = link_netns(pid, proc_root).await?;
        let cidr = host_cidr(ip_addr);
        let result = ip(netns_args(pid, &["addr", "add", &cidr, "dev", interface])).await;
        unlink_netns(netns).await;
        result.map(|_| ())
    }

    async fn remove_address(
        &self,
        pid: u32,
        ip_addr: IpAddr,
        interface: &str,
        proc_root: &str,
    ) -> Result<(), WiringError> {
        let netns = link_netns(pid, proc_root).await?;
        let cidr = host_cidr(ip_addr);
        let result = ip(netns_args(pid, &["addr", "del", &cidr, "dev", interface])).await;
        unlink_netns(netns).await;
        match result {
            Ok(_) => Ok(()),
            // The kernel's way of saying the address was not there.
            Err(WiringError::Command { ref stderr, .. })
                if stderr.contains("Cannot assign requested address") =>
            {
                debug!("{cidr} was not present on {interface}");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    async fn remove_interface(&self, host_interface: &str) -> Result<(), WiringError> {
        ip(to_args(&["link", "del", host_interface])).await.map(|_| ())
    }
}

fn to_args(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
}

/// Read the MAC the kernel assigned to the container-side interface.
async fn read_mac(pid: u32, interface: &str) -> Result<MacAddr6, WiringError> {
    let path = format!("/sys/class/net/{interface}/address");
    let stdout = run("ip", &netns_args_cat(pid, &path)).await?;
    stdout
        .trim()
        .parse::<MacAddr6>()
        .map_err(|e| WiringError::BadMac {
            interface: interface.to_string(),
            reason: e.to_string(),
        })
}

/// `ip netns exec {pid} cat {path}` — reading sysfs must happen inside the
/// namespace, the host's /sys shows the host's interfaces.
fn netns_args_cat(pid: u32, path: &str) -> Vec<String> {
    vec![
        "netns".into(),
        "exec".into(),
        pid.to_string(),
        "cat".into(),
        path.into(),
    ]
}
