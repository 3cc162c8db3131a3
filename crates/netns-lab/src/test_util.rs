use std::process::Command;
use std::sync::atomic::{AtomicU32, Ordering};

static NS_COUNTER: AtomicU32 = AtomicU32::new(0);

/// Linux netdev and netns name limit.
const NAME_MAX: usize = 15;

/// Returns `true` if the environment supports namespace-based tests
/// (requires `ip` tool and passwordless `sudo`).
pub fn check_privileges() -> bool {
    let has_ip = Command::new("ip")
        .arg("netns")
        .output()
        .is_ok_and(|o| o.status.success());

    has_ip
        && Command::new("sudo")
            .args(["-n", "ip", "netns", "list"])
            .output()
            .is_ok_and(|o| o.status.success())
}

/// Short tag unique to this process and call, for naming lab objects.
pub fn unique_tag() -> String {
    let seq = NS_COUNTER.fetch_add(1, Ordering::Relaxed);
    let pid = std::process::id() % 0xffff;
    format!("{pid:x}{seq}")
}

/// Generate a unique namespace name safe for parallel tests.
pub fn unique_ns_name(prefix: &str) -> String {
    truncate(format!("{prefix}_{}", unique_tag()))
}

/// Interface name built from a role and a lab tag, within the netdev limit.
pub fn iface_name(role: &str, tag: &str) -> String {
    truncate(format!("{role}{tag}"))
}

fn truncate(name: String) -> String {
    if name.len() > NAME_MAX {
        name[..NAME_MAX].to_string()
    } else {
        name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_fit_netdev_limit() {
        let ns = unique_ns_name("a_rather_long_prefix");
        assert!(ns.len() <= NAME_MAX);
        assert!(iface_name("r1up", &unique_tag()).len() <= NAME_MAX);
        assert_ne!(unique_ns_name("x"), unique_ns_name("x"));
    }
}
