//! Failover against a real namespace topology.
//!
//! Drops the primary's uplink, checks that the backup takes over the
//! virtual address and the switch reroutes, then restores the uplink.

mod common;

use std::sync::Arc;

use netguard::endpoint::{Destination, NextHop};
use netguard::enforcement::{Enforcement, execute_batch};
use netguard::failover;
use netguard::hysteresis::{ControllerState, Transition};
use netguard::probe::{LinkStateProbe, MetricSource};
use netguard::sink::{ActionSink, IpCommandSink};
use netguard::MetricReadError;
use netns_lab::FailoverLab;

#[tokio::test]
async fn test_uplink_loss_promotes_backup() {
    if common::skip_without_deps() {
        return;
    }

    let lab = FailoverLab::new("fo").expect("create lab");
    let config = common::failover_config(&lab);
    let fo = config.failover.as_ref().expect("failover section");
    let registry = Arc::new(config.registry());
    let sink: Arc<dyn ActionSink> = Arc::new(IpCommandSink::new(registry.clone(), config.sudo));
    let probe = LinkStateProbe::new(registry.clone(), config.sudo, "r1", fo.uplinks.clone());
    let mut controller = failover::build(fo, &registry, probe, sink).expect("build controller");

    lab.primary
        .wait_operstate(&lab.uplink, "up", common::LINK_SETTLE)
        .expect("uplink up");
    let outcome = controller.poll().await;
    assert!(outcome.transition().is_none(), "unexpected {outcome:?}");
    assert!(!lab.backup_holds_virtual_address().unwrap());

    lab.set_uplink(false).expect("drop uplink");
    let outcome = controller.poll().await;
    assert_eq!(outcome.transition(), Some(Transition::Degrade));
    assert!(outcome.failures().is_empty(), "{:?}", outcome.failures());
    assert!(lab.backup_holds_virtual_address().unwrap());
    let route = lab.peer_default_route().unwrap();
    assert!(route.contains(&format!("via {}", lab.backup_gateway)), "{route}");

    // Still down: no second promotion.
    let outcome = controller.poll().await;
    assert!(outcome.transition().is_none());
    assert_eq!(controller.state(), ControllerState::Degraded);

    lab.set_uplink(true).expect("restore uplink");
    lab.primary
        .wait_operstate(&lab.uplink, "up", common::LINK_SETTLE)
        .expect("uplink up again");
    let outcome = controller.poll().await;
    assert_eq!(outcome.transition(), Some(Transition::Recover));
    assert!(outcome.failures().is_empty(), "{:?}", outcome.failures());
    assert!(!lab.backup_holds_virtual_address().unwrap());
    let route = lab.peer_default_route().unwrap();
    assert!(route.contains(&format!("via {}", lab.primary_gateway)), "{route}");
}

#[tokio::test]
async fn test_promote_and_demote_are_idempotent() {
    if common::skip_without_deps() {
        return;
    }

    let lab = FailoverLab::new("fi").expect("create lab");
    let config = common::failover_config(&lab);
    let fo = config.failover.as_ref().expect("failover section");
    let registry = Arc::new(config.registry());
    let sink = IpCommandSink::new(registry.clone(), config.sudo);
    let plan = failover::plan_from_config(fo, &registry).expect("plan");

    for _ in 0..2 {
        let failures = execute_batch(&sink, &plan.apply_steps(), 1).await;
        assert!(failures.is_empty(), "{failures:?}");
    }
    assert!(lab.backup_holds_virtual_address().unwrap());

    for _ in 0..2 {
        let failures = execute_batch(&sink, &plan.remove_steps(), 1).await;
        assert!(failures.is_empty(), "{failures:?}");
    }
    assert!(!lab.backup_holds_virtual_address().unwrap());
    let route = lab.peer_default_route().unwrap();
    assert!(route.contains(&format!("via {}", lab.primary_gateway)), "{route}");
}

#[tokio::test]
async fn test_unreadable_uplink_is_inconclusive() {
    if common::skip_without_deps() {
        return;
    }

    let lab = FailoverLab::new("fu").expect("create lab");
    let config = common::failover_config(&lab);
    let registry = Arc::new(config.registry());
    let mut probe = LinkStateProbe::new(registry, config.sudo, "r1", vec!["nosuch0".into()]);

    let err = probe.sample().await.unwrap_err();
    assert!(matches!(err, MetricReadError::NoUplinkState { .. }), "{err}");
}

#[tokio::test]
async fn test_clear_route_tolerates_missing_route() {
    if common::skip_without_deps() {
        return;
    }

    let lab = FailoverLab::new("fr").expect("create lab");
    let config = common::failover_config(&lab);
    let registry = Arc::new(config.registry());
    let sink = IpCommandSink::new(registry, config.sudo);

    let destination: Destination = "198.51.100.0/24".parse().unwrap();
    let next_hop = NextHop {
        gateway: lab.backup_gateway.parse().unwrap(),
        interface: None,
    };

    sink.set_route("d1", &destination, &next_hop)
        .await
        .expect("install route");
    let route = lab.peer.route("198.51.100.0/24").unwrap();
    assert!(route.contains(&format!("via {}", lab.backup_gateway)), "{route}");

    sink.clear_route("d1", &destination).await.expect("delete route");
    assert!(lab.peer.route("198.51.100.0/24").unwrap().trim().is_empty());

    // The kernel answers "No such process" for a route that is already gone.
    sink.clear_route("d1", &destination)
        .await
        .expect("delete missing route");
}
