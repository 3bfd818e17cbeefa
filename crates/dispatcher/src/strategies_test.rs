#[cfg(test)]
mod strategies_tests {
    use crate::strategies::*;
    use coordinator_core::*;

    fn create_test_node(id: &str, active: u32, capacity: u32, latency_ms: f64) -> Node {
        let mut node = Node::new(id, "127.0.0.1", 7070).with_capacity(capacity);
        node.metrics.active_operations = active;
        node.metrics.average_latency_ms = latency_ms;
        node
    }

    fn ids(nodes: &[Node]) -> Vec<&str> {
        nodes.iter().map(|n| n.id.as_str()).collect()
    }

    #[test]
    fn test_least_loaded_strategy() {
        let strategy = LeastLoadedStrategy::new();
        let requirements = NodeRequirements::default();

        let nodes = vec![
            create_test_node("node-1", 3, 4, 10.0), // 75% 负载
            create_test_node("node-2", 1, 4, 10.0), // 25% 负载
            create_test_node("node-3", 2, 4, 10.0), // 50% 负载
        ];

        let selected = strategy
            .select_node(OperationType::Pull, &requirements, &nodes)
            .unwrap();
        assert_eq!(selected.id, "node-2");

        let ranked = strategy
            .select_nodes(OperationType::Pull, &requirements, &nodes, 3)
            .unwrap();
        assert_eq!(ids(&ranked), vec!["node-2", "node-3", "node-1"]);
    }

    #[test]
    fn test_least_loaded_tie_breaks_by_latency_then_id() {
        let strategy = LeastLoadedStrategy::new();
        let requirements = NodeRequirements::default();

        let nodes = vec![
            create_test_node("node-c", 1, 4, 20.0),
            create_test_node("node-b", 1, 4, 5.0),
            create_test_node("node-a", 1, 4, 20.0),
        ];

        let ranked = strategy
            .select_nodes(OperationType::Push, &requirements, &nodes, 3)
            .unwrap();
        assert_eq!(ids(&ranked), vec!["node-b", "node-a", "node-c"]);
    }

    #[test]
    fn test_least_loaded_prefers_region_on_equal_load_and_latency() {
        let strategy = LeastLoadedStrategy::new();
        let requirements = NodeRequirements {
            preferred_region: Some("eu-west".to_string()),
            ..Default::default()
        };

        let nodes = vec![
            create_test_node("node-a", 0, 4, 10.0),
            create_test_node("node-b", 0, 4, 10.0).with_location("eu-west", "eu-west-1a"),
            create_test_node("node-c", 0, 4, 1.0),
        ];

        // 延迟优先于区域偏好
        let ranked = strategy
            .select_nodes(OperationType::Pull, &requirements, &nodes, 3)
            .unwrap();
        assert_eq!(ids(&ranked), vec!["node-c", "node-b", "node-a"]);
    }

    #[test]
    fn test_full_nodes_are_not_selected() {
        let strategy = LeastLoadedStrategy::new();
        let nodes = vec![
            create_test_node("node-1", 4, 4, 0.0), // 100% 负载
            create_test_node("node-2", 2, 2, 0.0), // 100% 负载
        ];

        let selected = strategy
            .select_nodes(OperationType::Pull, &NodeRequirements::default(), &nodes, 1)
            .unwrap();
        assert!(selected.is_empty());

        let err = strategy
            .select_node(OperationType::Pull, &NodeRequirements::default(), &nodes)
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::NoEligibleNodes { .. }));
    }

    #[test]
    fn test_requirements_filter_candidates() {
        let strategy = LeastLoadedStrategy::new();
        let requirements = NodeRequirements {
            required_capabilities: vec!["registry-cache".to_string()],
            ..Default::default()
        };

        let nodes = vec![
            create_test_node("node-1", 0, 4, 0.0),
            create_test_node("node-2", 3, 4, 0.0).with_capability("registry-cache"),
        ];

        let selected = strategy
            .select_node(OperationType::Tag, &requirements, &nodes)
            .unwrap();
        assert_eq!(selected.id, "node-2");
    }

    #[test]
    fn test_round_robin_strategy() {
        let strategy = RoundRobinStrategy::new();
        let requirements = NodeRequirements::default();

        let nodes = vec![
            create_test_node("node-1", 0, 4, 0.0),
            create_test_node("node-2", 3, 4, 0.0),
            create_test_node("node-3", 1, 4, 0.0),
        ];

        let first = strategy.select_node(OperationType::Pull, &requirements, &nodes).unwrap();
        let second = strategy.select_node(OperationType::Pull, &requirements, &nodes).unwrap();
        let third = strategy.select_node(OperationType::Pull, &requirements, &nodes).unwrap();
        let fourth = strategy.select_node(OperationType::Pull, &requirements, &nodes).unwrap();

        assert_eq!(first.id, "node-1");
        assert_eq!(second.id, "node-2");
        assert_eq!(third.id, "node-3");
        // 第四次选择回到第一个节点
        assert_eq!(first.id, fourth.id);

        let pair = strategy
            .select_nodes(OperationType::Pull, &requirements, &nodes, 2)
            .unwrap();
        assert_eq!(ids(&pair), vec!["node-2", "node-3"]);
    }

    #[test]
    fn test_round_robin_strategy_no_nodes() {
        let strategy = RoundRobinStrategy::new();
        let selected = strategy
            .select_nodes(OperationType::Pull, &NodeRequirements::default(), &[], 2)
            .unwrap();
        assert!(selected.is_empty());
    }

    #[test]
    fn test_report_load_tracks_updates() {
        let strategy = LeastLoadedStrategy::new();
        let nodes = vec![create_test_node("node-1", 1, 4, 0.0)];
        strategy
            .select_nodes(OperationType::Pull, &NodeRequirements::default(), &nodes, 1)
            .unwrap();
        assert!((strategy.report_load("node-1") - 0.25).abs() < f64::EPSILON);

        strategy.update_metrics(&create_test_node("node-1", 2, 4, 0.0));
        assert!((strategy.report_load("node-1") - 0.5).abs() < f64::EPSILON);
        assert_eq!(strategy.report_load("unknown"), 0.0);

        // 未被选择过的节点也会被记录
        strategy.update_metrics(&create_test_node("node-2", 1, 1, 0.0));
        assert!((strategy.report_load("node-2") - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_strategy_names() {
        assert_eq!(LeastLoadedStrategy::new().name(), "LeastLoaded");
        assert_eq!(RoundRobinStrategy::new().name(), "RoundRobin");
        assert_eq!(load_balancer_from_name("round_robin").name(), "RoundRobin");
        assert_eq!(load_balancer_from_name("least_loaded").name(), "LeastLoaded");
    }
}
