use std::process::{Command, Output};
use std::time::{Duration, Instant};

use anyhow::{Context, Result, bail};
use tracing::debug;

/// A Linux network namespace with RAII cleanup.
///
/// Creates the namespace on construction, brings up loopback, and deletes
/// it on drop. All commands inside the namespace run via `sudo ip netns exec`.
pub struct Namespace {
    pub name: String,
}

impl Namespace {
    pub fn new(name: &str) -> Result<Self> {
        // Clean up stale namespace with same name (idempotent)
        let _ = sudo(&["ip", "netns", "del", name]);

        sudo_checked(&["ip", "netns", "add", name])
            .with_context(|| format!("create netns '{name}'"))?;

        debug!(ns = name, "created network namespace");

        let _ = sudo(&["ip", "netns", "exec", name, "ip", "link", "set", "lo", "up"]);

        Ok(Self {
            name: name.to_string(),
        })
    }

    /// Run a command inside this namespace, returning raw output.
    pub fn exec(&self, cmd: &str, args: &[&str]) -> Result<Output> {
        let mut full_args = vec!["ip", "netns", "exec", &self.name, cmd];
        full_args.extend_from_slice(args);
        sudo(&full_args).with_context(|| format!("exec '{cmd}' in ns '{}'", self.name))
    }

    /// Run a command inside this namespace, failing if it exits non-zero.
    pub fn exec_checked(&self, cmd: &str, args: &[&str]) -> Result<Output> {
        let mut full_args = vec!["ip", "netns", "exec", &self.name, cmd];
        full_args.extend_from_slice(args);
        sudo_checked(&full_args).with_context(|| format!("exec '{cmd}' in ns '{}'", self.name))
    }

    /// Stdout of a checked command, lossily decoded.
    pub fn stdout(&self, cmd: &str, args: &[&str]) -> Result<String> {
        let out = self.exec_checked(cmd, args)?;
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }

    /// Create a veth pair connecting this namespace to `peer`.
    ///
    /// Each end gets an IP address assigned and is brought up.
    /// Interface names must be <= 15 chars (Linux limit).
    pub fn add_veth_link(
        &self,
        peer: &Namespace,
        local_iface: &str,
        peer_iface: &str,
        local_ip: &str,
        peer_ip: &str,
    ) -> Result<()> {
        let _ = sudo(&["ip", "link", "del", local_iface]);

        sudo_checked(&[
            "ip",
            "link",
            "add",
            local_iface,
            "type",
            "veth",
            "peer",
            "name",
            peer_iface,
        ])
        .context("create veth pair")?;

        debug!(local = local_iface, peer = peer_iface, "created veth pair");

        sudo_checked(&["ip", "link", "set", local_iface, "netns", &self.name])
            .context("move local veth")?;
        sudo_checked(&["ip", "link", "set", peer_iface, "netns", &peer.name])
            .context("move peer veth")?;

        self.exec_checked("ip", &["addr", "add", local_ip, "dev", local_iface])
            .context("set local IP")?;
        self.set_link(local_iface, true)?;

        peer.exec_checked("ip", &["addr", "add", peer_ip, "dev", peer_iface])
            .context("set peer IP")?;
        peer.set_link(peer_iface, true)?;

        debug!(
            ns_local = self.name,
            ns_peer = peer.name,
            local_ip,
            peer_ip,
            "veth link configured"
        );

        Ok(())
    }

    /// Administratively raise or drop an interface.
    pub fn set_link(&self, iface: &str, up: bool) -> Result<()> {
        let state = if up { "up" } else { "down" };
        self.exec_checked("ip", &["link", "set", iface, state])
            .with_context(|| format!("set {iface} {state} in ns '{}'", self.name))?;
        Ok(())
    }

    pub fn enable_forwarding(&self) -> Result<()> {
        self.exec_checked("sysctl", &["-qw", "net.ipv4.ip_forward=1"])
            .context("enable ip_forward")?;
        Ok(())
    }

    /// Send `count` pings to `addr`; `true` if any reply came back.
    pub fn ping(&self, addr: &str, count: u32) -> Result<bool> {
        let count = count.to_string();
        let out = self.exec("ping", &["-q", "-c", &count, "-i", "0.2", "-W", "1", addr])?;
        Ok(out.status.success())
    }

    pub fn operstate(&self, iface: &str) -> Result<String> {
        let path = format!("/sys/class/net/{iface}/operstate");
        Ok(self.stdout("cat", &[&path])?.trim().to_string())
    }

    /// Poll `operstate` until it reads `expected`, up to `timeout`.
    pub fn wait_operstate(&self, iface: &str, expected: &str, timeout: Duration) -> Result<()> {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.operstate(iface)?;
            if state == expected {
                return Ok(());
            }
            if Instant::now() >= deadline {
                bail!("{iface} in ns '{}' stuck at {state}, wanted {expected}", self.name);
            }
            std::thread::sleep(Duration::from_millis(50));
        }
    }

    /// `ip -4 addr show dev <iface>` output.
    pub fn addresses(&self, iface: &str) -> Result<String> {
        self.stdout("ip", &["-4", "addr", "show", "dev", iface])
    }

    /// `ip route show <destination>` output.
    pub fn route(&self, destination: &str) -> Result<String> {
        self.stdout("ip", &["route", "show", destination])
    }

    /// `tc qdisc show dev <iface>` output.
    pub fn qdiscs(&self, iface: &str) -> Result<String> {
        self.stdout("tc", &["qdisc", "show", "dev", iface])
    }
}

impl Drop for Namespace {
    fn drop(&mut self) {
        debug!(ns = self.name, "deleting network namespace");
        let _ = sudo(&["ip", "netns", "del", &self.name]);
    }
}

// -- helpers --

/// Run `sudo <args>`, returning raw output.
fn sudo(args: &[&str]) -> Result<Output> {
    Command::new("sudo")
        .args(args)
        .output()
        .with_context(|| format!("sudo {}", args.join(" ")))
}

/// Run `sudo <args>`, returning output on success or bailing with stderr.
fn sudo_checked(args: &[&str]) -> Result<Output> {
    let output = sudo(args)?;
    if !output.status.success() {
        bail!(
            "command failed: sudo {}\n{}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_util::{check_privileges, iface_name, unique_ns_name, unique_tag};

    #[test]
    fn test_link_state_toggles() {
        if !check_privileges() {
            eprintln!("Skipping: insufficient privileges");
            return;
        }

        let ns1 = Namespace::new(&unique_ns_name("nst_a")).expect("create ns1");
        let ns2 = Namespace::new(&unique_ns_name("nst_b")).expect("create ns2");
        let tag = unique_tag();
        let v_a = iface_name("va", &tag);
        let v_b = iface_name("vb", &tag);

        ns1.add_veth_link(&ns2, &v_a, &v_b, "10.200.1.1/24", "10.200.1.2/24")
            .expect("add veth link");

        ns1.wait_operstate(&v_a, "up", Duration::from_secs(2))
            .expect("link up");

        ns1.set_link(&v_a, false).expect("link down");
        assert_eq!(ns1.operstate(&v_a).expect("operstate"), "down");

        let out = ns1
            .exec("ping", &["-c", "1", "-W", "1", "10.200.1.2"])
            .expect("ping");
        assert!(!out.status.success(), "ping succeeded over a downed link");
    }
}
