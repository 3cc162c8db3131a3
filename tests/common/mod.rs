//! Shared utilities for integration tests.
#![allow(dead_code)]

use std::time::Duration;

use netguard::config::Config;
use netns_lab::harness::check_shaping_deps;
use netns_lab::{CongestionLab, FailoverLab, check_lab_deps};

/// Check all lab test dependencies. Returns `true` if tests should be
/// skipped (prints the reason to stderr). Use at the top of every test.
pub fn skip_without_deps() -> bool {
    match check_lab_deps() {
        Ok(()) => false,
        Err(reason) => {
            eprintln!("Skipping: {reason}");
            true
        }
    }
}

/// Like `skip_without_deps` but also requires the tbf qdisc.
pub fn skip_without_shaping_deps() -> bool {
    match check_shaping_deps() {
        Ok(()) => false,
        Err(reason) => {
            eprintln!("Skipping: {reason}");
            true
        }
    }
}

pub const LINK_SETTLE: Duration = Duration::from_secs(3);

/// Controller configuration for a [`FailoverLab`].
pub fn failover_config(lab: &FailoverLab) -> Config {
    let raw = format!(
        r#"
sudo: true
nodes:
  r1: {{ namespace: {primary}, capabilities: [probe] }}
  r2: {{ namespace: {backup}, capabilities: [address] }}
  d1: {{ namespace: {peer}, capabilities: [route] }}
failover:
  poll_interval_ms: 200
  primary: r1
  backup: r2
  uplinks: [{uplink}]
  bindings:
    - {{ address: {vip}, subnet: lan, interface: {backup_lan} }}
  routes:
    - peer: d1
      destination: default
      via_primary: {{ gateway: {via_primary} }}
      via_backup: {{ gateway: {via_backup} }}
"#,
        primary = lab.primary.name,
        backup = lab.backup.name,
        peer = lab.peer.name,
        uplink = lab.uplink,
        vip = lab.virtual_address,
        backup_lan = lab.backup_lan,
        via_primary = lab.primary_gateway,
        via_backup = lab.backup_gateway,
    );
    let config = Config::from_yaml(&raw, "failover-lab.yaml").expect("parse lab config");
    config.validate().expect("valid lab config");
    config
}

/// Controller configuration for a [`CongestionLab`] of at least three
/// hosts: the first two form the cohort, the rest are left alone.
pub fn congestion_config(lab: &CongestionLab) -> Config {
    let mut nodes = format!(
        "  r1: {{ namespace: {}, capabilities: [probe] }}\n",
        lab.router.name
    );
    for (i, host) in lab.hosts.iter().enumerate() {
        nodes.push_str(&format!(
            "  host{i}: {{ namespace: {}, capabilities: [shaping] }}\n",
            host.ns.name
        ));
    }
    let raw = format!(
        r#"
sudo: true
nodes:
{nodes}congestion:
  chokepoint: {{ node: r1, interface: {chokepoint} }}
  capacity_mbit: 100
  cohort:
    - {{ node: host0, interface: {h0} }}
    - {{ node: host1, interface: {h1} }}
  limit: {{ rate_kbit: 256, burst_kbit: 16, latency_ms: 50 }}
"#,
        chokepoint = lab.router_ifaces[0],
        h0 = lab.hosts[0].iface,
        h1 = lab.hosts[1].iface,
    );
    let config = Config::from_yaml(&raw, "congestion-lab.yaml").expect("parse lab config");
    config.validate().expect("valid lab config");
    config
}
