//! Lab layouts for end-to-end controller tests.
//!
//! [`FailoverLab`] models a primary and a standby router serving one
//! distribution switch. [`CongestionLab`] models a chokepoint router with a
//! handful of hosts hanging off it.

use std::path::PathBuf;
use std::process::Command;

use anyhow::{Context, Result};

use crate::test_util::{check_privileges, iface_name, unique_ns_name, unique_tag};
use crate::topology::Namespace;

// ---------------------------------------------------------------------------
// Dependency checking
// ---------------------------------------------------------------------------

/// Check if a binary exists in PATH.
pub fn check_binary(name: &str) -> Option<PathBuf> {
    Command::new("sh")
        .args(["-c", &format!("command -v {name}")])
        .output()
        .ok()
        .filter(|o| o.status.success())
        .map(|o| PathBuf::from(String::from_utf8_lossy(&o.stdout).trim().to_string()))
}

/// Reason why lab tests must be skipped.
#[derive(Debug)]
pub enum SkipReason {
    NotRoot,
    MissingTool(String),
    NoTbf,
}

impl std::fmt::Display for SkipReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SkipReason::NotRoot => write!(f, "requires root / passwordless sudo"),
            SkipReason::MissingTool(t) => write!(f, "system tool '{t}' not found"),
            SkipReason::NoTbf => write!(
                f,
                "sch_tbf kernel module not available (try: sudo modprobe sch_tbf)"
            ),
        }
    }
}

/// Check everything the lab tests need.
pub fn check_lab_deps() -> std::result::Result<(), SkipReason> {
    if !check_privileges() {
        return Err(SkipReason::NotRoot);
    }

    for tool in &["ip", "tc", "ping", "cat", "sysctl"] {
        if check_binary(tool).is_none() {
            return Err(SkipReason::MissingTool(tool.to_string()));
        }
    }

    Ok(())
}

/// Lab deps plus the token-bucket qdisc.
pub fn check_shaping_deps() -> std::result::Result<(), SkipReason> {
    check_lab_deps()?;

    let modprobe_ok = Command::new("sudo")
        .args(["-n", "modprobe", "sch_tbf"])
        .output()
        .is_ok_and(|o| o.status.success());

    if !modprobe_ok {
        return Err(SkipReason::NoTbf);
    }

    Ok(())
}

// ---------------------------------------------------------------------------
// FailoverLab
// ---------------------------------------------------------------------------

/// Primary `r1` and backup `r2` both attached to distribution switch `d1`.
///
/// ```text
///   isp ── r1 ── d1 ── r2 ── lan
/// ```
///
/// `d1` starts with its default route through `r1`. The virtual gateway
/// address for the lan side is not configured anywhere; the backup takes it
/// over on failover.
pub struct FailoverLab {
    pub isp: Namespace,
    pub primary: Namespace,
    pub backup: Namespace,
    pub peer: Namespace,
    pub lan: Namespace,
    /// Primary's uplink, watched for liveness.
    pub uplink: String,
    /// Backup's lan-side interface that receives the virtual address.
    pub backup_lan: String,
    pub primary_gateway: String,
    pub backup_gateway: String,
    pub virtual_address: String,
}

impl FailoverLab {
    pub fn new(test_name: &str) -> Result<Self> {
        let isp = Namespace::new(&unique_ns_name(&format!("{test_name}_i")))?;
        let primary = Namespace::new(&unique_ns_name(&format!("{test_name}_p")))?;
        let backup = Namespace::new(&unique_ns_name(&format!("{test_name}_b")))?;
        let peer = Namespace::new(&unique_ns_name(&format!("{test_name}_d")))?;
        let lan = Namespace::new(&unique_ns_name(&format!("{test_name}_l")))?;

        let tag = unique_tag();
        let uplink = iface_name("pu", &tag);
        let backup_lan = iface_name("bl", &tag);

        primary.add_veth_link(
            &isp,
            &uplink,
            &iface_name("iu", &tag),
            "10.99.0.1/30",
            "10.99.0.2/30",
        )?;
        primary.add_veth_link(
            &peer,
            &iface_name("pd", &tag),
            &iface_name("dp", &tag),
            "10.0.1.1/24",
            "10.0.1.10/24",
        )?;
        backup.add_veth_link(
            &peer,
            &iface_name("bd", &tag),
            &iface_name("db", &tag),
            "10.0.2.2/24",
            "10.0.2.10/24",
        )?;
        backup.add_veth_link(
            &lan,
            &backup_lan,
            &iface_name("lb", &tag),
            "192.168.10.2/24",
            "192.168.10.20/24",
        )?;

        primary.enable_forwarding()?;
        backup.enable_forwarding()?;
        peer.exec_checked("ip", &["route", "add", "default", "via", "10.0.1.1"])
            .context("default route on d1")?;

        Ok(Self {
            isp,
            primary,
            backup,
            peer,
            lan,
            uplink,
            backup_lan,
            primary_gateway: "10.0.1.1".into(),
            backup_gateway: "10.0.2.2".into(),
            virtual_address: "192.168.10.254/24".into(),
        })
    }

    /// Drop or restore the primary's only uplink.
    pub fn set_uplink(&self, up: bool) -> Result<()> {
        self.primary.set_link(&self.uplink, up)
    }

    pub fn peer_default_route(&self) -> Result<String> {
        self.peer.route("default")
    }

    pub fn backup_holds_virtual_address(&self) -> Result<bool> {
        let addr = self
            .virtual_address
            .split('/')
            .next()
            .unwrap_or(&self.virtual_address);
        Ok(self.backup.addresses(&self.backup_lan)?.contains(addr))
    }
}

// ---------------------------------------------------------------------------
// CongestionLab
// ---------------------------------------------------------------------------

/// One host attached to the chokepoint router.
pub struct LabHost {
    pub ns: Namespace,
    /// Host-side interface, the one that gets shaped.
    pub iface: String,
    /// Router-side address of the host's link.
    pub gateway: String,
}

/// Router `r1` with `n` hosts, each on its own /24.
pub struct CongestionLab {
    pub router: Namespace,
    pub hosts: Vec<LabHost>,
    /// Router-side interface names, one per host.
    pub router_ifaces: Vec<String>,
}

impl CongestionLab {
    pub fn new(test_name: &str, num_hosts: usize) -> Result<Self> {
        assert!(num_hosts > 0, "need at least one host");

        let router = Namespace::new(&unique_ns_name(&format!("{test_name}_r")))?;
        let tag = unique_tag();
        let mut hosts = Vec::with_capacity(num_hosts);
        let mut router_ifaces = Vec::with_capacity(num_hosts);

        for i in 0..num_hosts {
            let subnet = i + 1;
            let ns = Namespace::new(&unique_ns_name(&format!("{test_name}_h{i}")))?;
            let iface = iface_name(&format!("h{i}"), &tag);
            let router_iface = iface_name(&format!("r{i}"), &tag);
            let gateway = format!("10.30.{subnet}.1");

            router.add_veth_link(
                &ns,
                &router_iface,
                &iface,
                &format!("{gateway}/24"),
                &format!("10.30.{subnet}.10/24"),
            )?;

            hosts.push(LabHost { ns, iface, gateway });
            router_ifaces.push(router_iface);
        }

        Ok(Self {
            router,
            hosts,
            router_ifaces,
        })
    }

    /// Whether `host` currently has a token-bucket root qdisc.
    pub fn is_shaped(&self, host: usize) -> Result<bool> {
        let h = self
            .hosts
            .get(host)
            .with_context(|| format!("host index {host} out of range"))?;
        Ok(h.ns.qdiscs(&h.iface)?.contains("tbf"))
    }

    /// Push some traffic from `host` through its link.
    pub fn send_traffic(&self, host: usize, pings: u32) -> Result<bool> {
        let h = self
            .hosts
            .get(host)
            .with_context(|| format!("host index {host} out of range"))?;
        h.ns.ping(&h.gateway, pings)
    }
}
