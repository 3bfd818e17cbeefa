use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use coordinator_core::{
    models::{
        Node, NodeRequirements, OperationArgs, OperationType, RoutingDecision, RoutingStrategy,
    },
    traits::{LoadBalancer, RoutingPolicy},
    CoordinatorError, CoordinatorResult,
};

/// 路由策略使用的保留参数
pub const RESERVED_ARGS: [&str; 4] = ["strategy", "local_only", "requirements", "quorum"];

/// 默认路由策略
///
/// - 未指定策略时：没有满足要求的节点或 `local_only=true` 走 `local`，否则 `distributed`
/// - `distributed`/`replicated` 默认扇出到全部满足要求的节点，`max_nodes` 由负载均衡器收窄
/// - 显式指定 `distributed`/`replicated` 但没有可用节点时返回 `NoEligibleNodes`
pub struct DefaultRoutingPolicy {
    local_node_id: String,
    default_quorum: Option<usize>,
    balancer: Arc<dyn LoadBalancer>,
}

impl DefaultRoutingPolicy {
    pub fn new(
        local_node_id: impl Into<String>,
        default_quorum: Option<usize>,
        balancer: Arc<dyn LoadBalancer>,
    ) -> Self {
        Self {
            local_node_id: local_node_id.into(),
            default_quorum,
            balancer,
        }
    }

    fn requested_strategy(args: &OperationArgs) -> CoordinatorResult<Option<RoutingStrategy>> {
        match args.get("strategy") {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(name)) => name.parse().map(Some),
            Some(_) => Err(CoordinatorError::validation("argument 'strategy' must be a string")),
        }
    }

    fn local_only(args: &OperationArgs) -> CoordinatorResult<bool> {
        match args.get("local_only") {
            None | Some(Value::Null) => Ok(false),
            Some(Value::Bool(flag)) => Ok(*flag),
            Some(_) => Err(CoordinatorError::validation("argument 'local_only' must be a boolean")),
        }
    }

    fn requirements(args: &OperationArgs) -> CoordinatorResult<NodeRequirements> {
        let requirements: NodeRequirements = match args.get("requirements") {
            None | Some(Value::Null) => NodeRequirements::default(),
            Some(value) => serde_json::from_value(value.clone()).map_err(|e| {
                CoordinatorError::validation(format!("invalid node requirements: {e}"))
            })?,
        };
        if requirements.max_nodes == Some(0) {
            return Err(CoordinatorError::validation("requirements.max_nodes must be at least 1"));
        }
        Ok(requirements)
    }

    fn quorum(&self, args: &OperationArgs, targets: usize) -> CoordinatorResult<usize> {
        let requested = match args.get("quorum") {
            None | Some(Value::Null) => self.default_quorum,
            Some(value) => Some(value.as_u64().map(|q| q as usize).ok_or_else(|| {
                CoordinatorError::validation("argument 'quorum' must be a non-negative integer")
            })?),
        };
        match requested {
            Some(0) => Err(CoordinatorError::validation("quorum must be at least 1")),
            Some(quorum) => Ok(quorum.min(targets)),
            None => Ok(targets),
        }
    }

    fn fan_out_targets(
        &self,
        operation_type: OperationType,
        requirements: &NodeRequirements,
        matching: Vec<Node>,
    ) -> CoordinatorResult<Vec<String>> {
        match requirements.max_nodes {
            Some(limit) if limit < matching.len() => {
                let selected =
                    self.balancer
                        .select_nodes(operation_type, requirements, &matching, limit)?;
                Ok(selected.into_iter().map(|node| node.id).collect())
            }
            _ => {
                let mut ordered = matching;
                ordered.sort_by(|a, b| {
                    Reverse(a.locality_score(requirements))
                        .cmp(&Reverse(b.locality_score(requirements)))
                        .then_with(|| a.id.cmp(&b.id))
                });
                Ok(ordered.into_iter().map(|node| node.id).collect())
            }
        }
    }
}

impl RoutingPolicy for DefaultRoutingPolicy {
    fn route(
        &self,
        operation_type: OperationType,
        args: &OperationArgs,
        eligible: &[Node],
    ) -> CoordinatorResult<RoutingDecision> {
        let requested = Self::requested_strategy(args)?;
        let local_only = Self::local_only(args)?;
        let requirements = Self::requirements(args)?;

        let matching: Vec<Node> = eligible
            .iter()
            .filter(|node| node.is_eligible() && node.satisfies(&requirements))
            .cloned()
            .collect();

        let strategy = match requested {
            Some(strategy) if local_only && strategy != RoutingStrategy::Local => {
                return Err(CoordinatorError::validation(format!(
                    "local_only operations cannot use the {strategy} strategy"
                )));
            }
            Some(strategy) => strategy,
            None if local_only || matching.is_empty() => RoutingStrategy::Local,
            None => RoutingStrategy::Distributed,
        };

        if strategy == RoutingStrategy::Local {
            debug!(operation_type = %operation_type, "路由到本地节点 {}", self.local_node_id);
            return Ok(RoutingDecision::local(self.local_node_id.clone(), requirements));
        }

        if matching.is_empty() {
            return Err(CoordinatorError::no_eligible_nodes(operation_type.as_str()));
        }

        let target_nodes = self.fan_out_targets(operation_type, &requirements, matching)?;
        if target_nodes.is_empty() {
            return Err(CoordinatorError::no_eligible_nodes(operation_type.as_str()));
        }

        let mut metadata = HashMap::new();
        let quorum = if strategy == RoutingStrategy::Replicated {
            metadata.insert("replication".to_string(), Value::Bool(true));
            self.quorum(args, target_nodes.len())?
        } else {
            target_nodes.len()
        };

        debug!(
            operation_type = %operation_type,
            strategy = %strategy,
            quorum,
            "路由决策目标节点: {:?}",
            target_nodes
        );

        Ok(RoutingDecision {
            strategy,
            target_nodes,
            requirements,
            quorum,
            metadata,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategies::LeastLoadedStrategy;
    use crate::test_utils::mocks::test_node;
    use serde_json::json;

    fn policy(default_quorum: Option<usize>) -> DefaultRoutingPolicy {
        DefaultRoutingPolicy::new("coordinator", default_quorum, Arc::new(LeastLoadedStrategy::new()))
    }

    fn args(value: Value) -> OperationArgs {
        match value {
            Value::Object(map) => map,
            _ => OperationArgs::new(),
        }
    }

    fn nodes() -> Vec<Node> {
        vec![test_node("node-a"), test_node("node-b"), test_node("node-c")]
    }

    #[test]
    fn test_defaults_to_distributed_over_all_eligible() {
        let decision = policy(None)
            .route(OperationType::Pull, &args(json!({"image_ref": "nginx"})), &nodes())
            .unwrap();
        assert_eq!(decision.strategy, RoutingStrategy::Distributed);
        assert_eq!(decision.target_nodes, vec!["node-a", "node-b", "node-c"]);
        assert_eq!(decision.quorum, 3);
        assert!(!decision.is_replicated());
    }

    #[test]
    fn test_falls_back_to_local_without_nodes() {
        let decision = policy(None)
            .route(OperationType::Pull, &OperationArgs::new(), &[])
            .unwrap();
        assert_eq!(decision.strategy, RoutingStrategy::Local);
        assert_eq!(decision.target_nodes, vec!["coordinator"]);

        let decision = policy(None)
            .route(OperationType::Pull, &args(json!({"local_only": true})), &nodes())
            .unwrap();
        assert_eq!(decision.strategy, RoutingStrategy::Local);
    }

    #[test]
    fn test_explicit_distributed_without_nodes_fails_fast() {
        let err = policy(None)
            .route(OperationType::Push, &args(json!({"strategy": "distributed"})), &[])
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::NoEligibleNodes { .. }));

        let err = policy(None)
            .route(OperationType::Push, &args(json!({"strategy": "replicated"})), &[])
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::NoEligibleNodes { .. }));
    }

    #[test]
    fn test_unknown_strategy_is_validation_error() {
        let err = policy(None)
            .route(OperationType::Pull, &args(json!({"strategy": "broadcast"})), &nodes())
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));

        let err = policy(None)
            .route(
                OperationType::Pull,
                &args(json!({"strategy": "distributed", "local_only": true})),
                &nodes(),
            )
            .unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));
    }

    #[test]
    fn test_replicated_quorum_resolution() {
        let replicated = args(json!({"strategy": "replicated"}));
        let decision = policy(None).route(OperationType::Pull, &replicated, &nodes()).unwrap();
        assert!(decision.is_replicated());
        assert_eq!(decision.quorum, 3);

        let decision = policy(Some(2)).route(OperationType::Pull, &replicated, &nodes()).unwrap();
        assert_eq!(decision.quorum, 2);

        let explicit = args(json!({"strategy": "replicated", "quorum": 1}));
        let decision = policy(Some(2)).route(OperationType::Pull, &explicit, &nodes()).unwrap();
        assert_eq!(decision.quorum, 1);

        let oversized = args(json!({"strategy": "replicated", "quorum": 10}));
        let decision = policy(None).route(OperationType::Pull, &oversized, &nodes()).unwrap();
        assert_eq!(decision.quorum, 3);

        let zero = args(json!({"strategy": "replicated", "quorum": 0}));
        let err = policy(None).route(OperationType::Pull, &zero, &nodes()).unwrap_err();
        assert!(matches!(err, CoordinatorError::Validation(_)));
    }

    #[test]
    fn test_requirements_subset_and_cap() {
        let mut busy = test_node("node-b");
        busy.metrics.active_operations = 3;
        let candidates = vec![test_node("node-a"), busy, test_node("node-c")];

        let capped = args(json!({"requirements": {"max_nodes": 2}}));
        let decision = policy(None).route(OperationType::Pull, &capped, &candidates).unwrap();
        assert_eq!(decision.target_nodes, vec!["node-a", "node-c"]);

        let subset = args(json!({"requirements": {"node_ids": ["node-c"]}}));
        let decision = policy(None).route(OperationType::Pull, &subset, &candidates).unwrap();
        assert_eq!(decision.target_nodes, vec!["node-c"]);

        let missing = args(json!({"requirements": {"required_capabilities": ["gpu"]}}));
        let decision = policy(None).route(OperationType::Pull, &missing, &candidates).unwrap();
        assert_eq!(decision.strategy, RoutingStrategy::Local);

        let invalid = args(json!({"requirements": {"max_nodes": "two"}}));
        assert!(policy(None).route(OperationType::Pull, &invalid, &candidates).is_err());
    }
}
