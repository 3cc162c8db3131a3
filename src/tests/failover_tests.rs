#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use crate::config::{BindingConfig, FailoverConfig, RouteConfig};
    use crate::controller::TickOutcome;
    use crate::endpoint::{Destination, Endpoint};
    use crate::enforcement::{Enforcement, Step};
    use crate::error::{ConfigError, MetricReadError};
    use crate::failover::{self, FailoverPlan, Role, VirtualBinding};
    use crate::hysteresis::{ControllerState, Transition};
    use crate::test_helpers::{
        RecordingSink, ScriptedSource, campus_failover_plan, campus_registry, cidr, hop,
        primary_routes,
    };

    fn campus_failover_config() -> FailoverConfig {
        FailoverConfig {
            poll_interval_ms: 2000,
            primary: "r1".into(),
            backup: "r2".into(),
            uplinks: vec!["r1-eth0".into()],
            bindings: vec![BindingConfig {
                address: cidr("192.168.10.254/24"),
                subnet: "admin".into(),
                interface: "r2-eth1".into(),
            }],
            routes: vec![RouteConfig {
                peer: "d1".into(),
                destination: Destination::Default,
                via_primary: hop("10.0.0.1"),
                via_backup: hop("10.0.0.2"),
            }],
            down_confirmations: 1,
            up_confirmations: 1,
            enforcement_concurrency: 1,
        }
    }

    #[test]
    fn test_promote_steps_follow_table_order() {
        let plan = campus_failover_plan();
        let steps = plan.apply_steps();

        assert_eq!(steps.len(), 6);
        assert_eq!(
            steps[0],
            Step::AddAddress {
                endpoint: Endpoint::new("r2", "r2-eth1"),
                address: cidr("192.168.10.254/24"),
            }
        );
        assert_eq!(
            steps[5],
            Step::SetRoute {
                peer: "d3".into(),
                destination: Destination::Default,
                next_hop: hop("10.0.0.2"),
            }
        );
    }

    #[test]
    fn test_demote_steps_point_peers_at_primary() {
        let plan = campus_failover_plan();
        let steps = plan.remove_steps();

        assert!(
            steps[..3]
                .iter()
                .all(|s| matches!(s, Step::RemoveAddress { endpoint, .. } if endpoint.node == "r2"))
        );
        assert!(steps[3..].iter().all(|s| matches!(
            s,
            Step::SetRoute { next_hop, .. } if *next_hop == hop("10.0.0.1")
        )));
    }

    #[test]
    fn test_binding_owner_follows_state() {
        let plan = campus_failover_plan();
        let binding = &plan.bindings()[0];
        assert_eq!(binding.owner(ControllerState::Normal), Role::Primary);
        assert_eq!(binding.owner(ControllerState::Degraded), Role::Backup);
    }

    #[test]
    fn test_plan_dedups_and_rejects_empty() {
        let binding = VirtualBinding {
            address: cidr("192.168.10.254/24"),
            subnet: "admin".into(),
            backup: Endpoint::new("r2", "r2-eth1"),
        };
        let plan = FailoverPlan::new("r1", "r2", vec![binding.clone(), binding], vec![]).unwrap();
        assert_eq!(plan.bindings().len(), 1);
        assert_eq!(plan.apply_steps().len(), 1);

        let err = FailoverPlan::new("r1", "r2", vec![], vec![]).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyCohort(_)));
    }

    #[test]
    fn test_describe_names_both_routers() {
        let plan = campus_failover_plan();
        let promote = plan.describe(Transition::Degrade);
        assert!(promote.contains("r1 down"));
        assert!(promote.contains("promoting r2"));
        assert!(plan.describe(Transition::Recover).contains("demoting r2"));
    }

    #[test]
    fn test_plan_from_config_checks_nodes() {
        let registry = campus_registry(0);
        let plan = failover::plan_from_config(&campus_failover_config(), &registry).unwrap();
        assert_eq!(plan.bindings()[0].backup, Endpoint::new("r2", "r2-eth1"));
        assert_eq!(plan.routes()[0].peer, "d1");

        let mut config = campus_failover_config();
        config.routes[0].peer = "d9".into();
        assert!(matches!(
            failover::plan_from_config(&config, &registry),
            Err(ConfigError::UnknownNode(node)) if node == "d9"
        ));

        // Distribution switches only accept routes.
        let mut config = campus_failover_config();
        config.backup = "d2".into();
        assert!(matches!(
            failover::plan_from_config(&config, &registry),
            Err(ConfigError::MissingCapability { .. })
        ));

        let mut config = campus_failover_config();
        config.uplinks.clear();
        assert!(matches!(
            failover::plan_from_config(&config, &registry),
            Err(ConfigError::EmptyCohort(_))
        ));
    }

    #[tokio::test]
    async fn test_debounced_failover() {
        let mut config = campus_failover_config();
        config.down_confirmations = 2;
        config.up_confirmations = 2;
        let sink = Arc::new(RecordingSink::with_state(primary_routes()));
        let source = ScriptedSource::new([false, true, false, false, true, false, true, true]);
        let mut controller =
            failover::build(&config, &campus_registry(0), source, sink.clone()).unwrap();

        let mut states = Vec::new();
        for _ in 0..8 {
            controller.poll().await;
            states.push(controller.state());
        }

        use ControllerState::*;
        assert_eq!(
            states,
            vec![
                Normal, Normal, Normal, Degraded, Degraded, Degraded, Degraded, Normal
            ]
        );
        // One promote (address + route) and one demote (address + route).
        assert_eq!(sink.calls().len(), 4);
    }

    #[tokio::test]
    async fn test_inconclusive_liveness_keeps_state() {
        let sink = Arc::new(RecordingSink::with_state(primary_routes()));
        let source = ScriptedSource::from_results([
            Ok(false),
            Err(MetricReadError::NoUplinkState { node: "r1".into() }),
            Ok(false),
        ]);
        let mut controller =
            failover::build(&campus_failover_config(), &campus_registry(0), source, sink.clone())
                .unwrap();

        let first = controller.poll().await;
        assert_eq!(first.transition(), Some(Transition::Degrade));

        let second = controller.poll().await;
        assert!(matches!(
            second,
            TickOutcome::Skipped {
                error: MetricReadError::NoUplinkState { .. },
                ..
            }
        ));
        assert_eq!(controller.state(), ControllerState::Degraded);

        let third = controller.poll().await;
        assert!(third.transition().is_none());
        assert_eq!(sink.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_promote_continues_past_unreachable_peer() {
        let sink = Arc::new(RecordingSink::with_state(primary_routes()));
        sink.fail_on("d2");
        let mut controller = crate::controller::Controller::new(
            "failover",
            ScriptedSource::new([false]),
            crate::hysteresis::Liveness::immediate(),
            campus_failover_plan(),
            sink.clone(),
            1,
        );

        let outcome = controller.poll().await;

        assert_eq!(outcome.failures().len(), 1);
        assert!(outcome.failures()[0].to_string().contains("on d2"));
        let routes = sink.snapshot().routes;
        assert_eq!(routes[&("d1".to_string(), Destination::Default)], hop("10.0.0.2"));
        assert_eq!(routes[&("d2".to_string(), Destination::Default)], hop("10.0.0.1"));
        assert_eq!(routes[&("d3".to_string(), Destination::Default)], hop("10.0.0.2"));
    }

    #[test]
    fn test_build_rejects_unusable_loop_parameters() {
        let sink = Arc::new(RecordingSink::new());

        let mut config = campus_failover_config();
        config.poll_interval_ms = 0;
        let built = failover::build(
            &config,
            &campus_registry(0),
            ScriptedSource::new([true]),
            sink.clone(),
        );
        assert!(matches!(
            built,
            Err(ConfigError::InvalidValue { field: "failover.poll_interval_ms", .. })
        ));

        let mut config = campus_failover_config();
        config.enforcement_concurrency = 0;
        let built =
            failover::build(&config, &campus_registry(0), ScriptedSource::new([true]), sink);
        assert!(matches!(
            built,
            Err(ConfigError::InvalidValue { field: "failover.enforcement_concurrency", .. })
        ));
    }
}
