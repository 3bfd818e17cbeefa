use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use coordinator_core::{
    config::CoordinatorConfig,
    models::{
        DistributedOperation, Fault, LifecycleEvent, Node, NodeMetrics, NodeRequirements,
        NodeStatus, OperationArgs, OperationStatus, OperationType, Outcome, RoutingStrategy,
        SubOperation, SubOperationStatus,
    },
    operations,
    traits::{LoadBalancer, RemoteAgent, RoutingPolicy, TelemetrySink},
    CoordinatorError, CoordinatorResult, ErrorKind,
};

use crate::drain::DrainController;
use crate::executor::{ExecutionContext, RetryPolicy, SubOperationExecutor, DEADLINE_EXCEEDED};
use crate::node_registry::NodeRegistry;
use crate::operation_store::OperationStore;
use crate::routing::{DefaultRoutingPolicy, RESERVED_ARGS};
use crate::strategies::load_balancer_from_name;

const CANCELLED_BY_CALLER: &str = "cancelled by caller";

/// 操作协调器
///
/// `submit` 同步驱动一个操作直到终态：路由、按目标节点并发执行子操作、
/// 可选的一次故障转移，最后在操作表的写锁内聚合结果。
/// 预分发阶段的错误（参数校验、无可用节点）直接返回给调用方，
/// 之后的失败都编码在返回的操作快照中。
pub struct OperationCoordinator {
    config: CoordinatorConfig,
    registry: Arc<NodeRegistry>,
    operations: Arc<OperationStore>,
    routing: Arc<dyn RoutingPolicy>,
    balancer: Arc<dyn LoadBalancer>,
    executor: Arc<SubOperationExecutor>,
    drain: DrainController,
    telemetry: Arc<dyn TelemetrySink>,
}

impl OperationCoordinator {
    pub fn new(
        config: CoordinatorConfig,
        registry: Arc<NodeRegistry>,
        operations: Arc<OperationStore>,
        agent: Arc<dyn RemoteAgent>,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let balancer = load_balancer_from_name(&config.load_balancing_strategy);
        let routing = Arc::new(DefaultRoutingPolicy::new(
            config.node_id.clone(),
            config.default_replication_quorum,
            balancer.clone(),
        ));
        let executor = Arc::new(SubOperationExecutor::new(
            config.node_id.clone(),
            agent,
            RetryPolicy::from_config(&config),
            config.rpc_timeout(),
            telemetry.clone(),
        ));
        let drain = DrainController::new(
            registry.clone(),
            operations.clone(),
            config.drain_poll_initial(),
            config.drain_poll_max(),
        );

        info!(
            node_id = %config.node_id,
            load_balancer = balancer.name(),
            failover = config.enable_failover,
            "操作协调器初始化完成"
        );

        Self {
            config,
            registry,
            operations,
            routing,
            balancer,
            executor,
            drain,
            telemetry,
        }
    }

    /// 替换负载均衡器，路由策略随之重建
    pub fn with_load_balancer(mut self, balancer: Arc<dyn LoadBalancer>) -> Self {
        self.routing = Arc::new(DefaultRoutingPolicy::new(
            self.config.node_id.clone(),
            self.config.default_replication_quorum,
            balancer.clone(),
        ));
        self.balancer = balancer;
        self
    }

    pub fn with_routing_policy(mut self, routing: Arc<dyn RoutingPolicy>) -> Self {
        self.routing = routing;
        self
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<NodeRegistry> {
        &self.registry
    }

    pub fn operations(&self) -> &Arc<OperationStore> {
        &self.operations
    }

    // ---------------------------------------------------------------------
    // 操作
    // ---------------------------------------------------------------------

    /// 提交操作并等待其进入终态
    #[instrument(skip(self, args), fields(session_id = %session_id))]
    pub async fn submit(
        &self,
        session_id: &str,
        operation_type: &str,
        args: OperationArgs,
    ) -> CoordinatorResult<DistributedOperation> {
        let operation_type: OperationType = operation_type.parse()?;
        operations::validate_args(operation_type, &args)?;

        let eligible = self.registry.list_eligible().await;
        let decision = self.routing.route(operation_type, &args, &eligible)?;

        let sub_args: OperationArgs = args
            .into_iter()
            .filter(|(key, _)| !RESERVED_ARGS.contains(&key.as_str()))
            .collect();

        let nodes: HashMap<String, Node> = eligible
            .into_iter()
            .map(|node| (node.id.clone(), node))
            .collect();

        // 进入 executing 之前先占用目标节点容量；期间被排空或移除的节点不再分发
        let mut operation =
            DistributedOperation::new(session_id, operation_type, &self.config.node_id, &decision);
        let mut claims: HashMap<String, Node> = HashMap::new();
        let mut rejected: HashMap<String, Fault> = HashMap::new();
        for node_id in &decision.target_nodes {
            let sub = SubOperation::new(node_id.clone(), operation_type, sub_args.clone());
            if let Some(node) = nodes.get(node_id) {
                match self.registry.begin_operation(node_id).await {
                    Ok(claimed) => {
                        self.balancer.update_metrics(&claimed);
                        claims.insert(sub.id.clone(), node.clone());
                    }
                    Err(e) => {
                        warn!(node_id = %node_id, "目标节点在分发前已不可用: {}", e);
                        rejected.insert(sub.id.clone(), Fault::from(&e));
                    }
                }
            }
            operation.sub_operations.insert(sub.id.clone(), sub);
        }
        let operation_id = operation.id.clone();
        let cancel_rx = self.operations.insert(operation).await;

        let dispatched = self
            .operations
            .update(&operation_id, |op| -> CoordinatorResult<Option<Vec<SubOperation>>> {
                if op.is_terminal() {
                    return Ok(None);
                }
                op.transition_to(OperationStatus::Executing)?;
                let mut dispatch = Vec::new();
                for sub in op.sub_operations.values_mut() {
                    sub.start();
                    match rejected.remove(&sub.id) {
                        Some(fault) => {
                            sub.finish(Outcome::Err(fault), 0);
                        }
                        None => dispatch.push(sub.clone()),
                    }
                }
                Ok(Some(dispatch))
            })
            .await
            .and_then(|result| result);

        let subs = match dispatched {
            Ok(Some(subs)) => subs,
            other => {
                self.release_claims(claims.values()).await;
                other?;
                return self.operations.get(&operation_id).await;
            }
        };

        info!(
            operation_id = %operation_id,
            operation_type = %operation_type,
            strategy = %decision.strategy,
            quorum = decision.quorum,
            "开始执行操作，目标节点: {:?}",
            decision.target_nodes
        );
        self.telemetry.emit(LifecycleEvent::OperationCreated {
            operation_id: operation_id.clone(),
            session_id: session_id.to_string(),
            operation_type,
            strategy: decision.strategy,
            participants: decision.target_nodes.len(),
        });

        let ctx = ExecutionContext::new(
            operation_id.clone(),
            Instant::now() + self.config.operation_timeout(),
            cancel_rx,
        );
        let wave: Vec<(SubOperation, Option<Node>)> = subs
            .into_iter()
            .map(|sub| {
                let node = claims.remove(&sub.id);
                (sub, node)
            })
            .collect();
        self.run_wave(&ctx, wave).await;

        if decision.strategy != RoutingStrategy::Local {
            let snapshot = self.operations.get(&operation_id).await?;
            if self.should_failover(&ctx, &snapshot) {
                let replacements = self.plan_failover(&snapshot, &decision.requirements).await;
                if !replacements.is_empty() {
                    let accepted = self
                        .operations
                        .update(&operation_id, |op| {
                            if op.is_terminal() {
                                return false;
                            }
                            for (sub, _) in &replacements {
                                op.participant_nodes.push(sub.node_id.clone());
                                op.sub_operations.insert(sub.id.clone(), sub.clone());
                            }
                            true
                        })
                        .await
                        .unwrap_or(false);

                    if accepted {
                        let wave = replacements
                            .into_iter()
                            .map(|(sub, node)| (sub, Some(node)))
                            .collect();
                        self.run_wave(&ctx, wave).await;
                    } else {
                        self.release_claims(replacements.iter().map(|(_, node)| node))
                            .await;
                    }
                }
            }
        }

        self.conclude(&operation_id).await
    }

    async fn release_claims<'a>(&self, nodes: impl Iterator<Item = &'a Node>) {
        for node in nodes {
            if let Some(released) = self.registry.release_operation(&node.id).await {
                self.balancer.update_metrics(&released);
            }
        }
    }

    /// 并发执行一批子操作，所有任务结束后返回
    ///
    /// 带节点的子操作已在注册表中占用了容量，结束时由 `complete_operation` 归还；
    /// 不带节点的在本地执行。
    async fn run_wave(&self, ctx: &ExecutionContext, wave: Vec<(SubOperation, Option<Node>)>) {
        let mut tasks = JoinSet::new();

        for (sub, node) in wave {
            let ctx = ctx.clone();
            let executor = self.executor.clone();
            let registry = self.registry.clone();
            let operations = self.operations.clone();
            let balancer = self.balancer.clone();

            tasks.spawn(async move {
                let started = std::time::Instant::now();
                let tracked = node.is_some();

                let report = executor.execute(&ctx, &sub, node.as_ref()).await;
                let success = report.outcome.is_ok();

                let recorded = operations
                    .update(&ctx.operation_id, |op| {
                        op.sub_operations
                            .get_mut(&sub.id)
                            .map(|record| record.finish(report.outcome, report.attempts))
                    })
                    .await;

                match recorded {
                    Ok(Some(_)) => {}
                    Ok(None) => {
                        error!(
                            operation_id = %ctx.operation_id,
                            sub_operation_id = %sub.id,
                            "子操作不属于所在的操作记录"
                        );
                        debug_assert!(false, "sub-operation {} missing from its operation", sub.id);
                    }
                    Err(_) if ctx.is_cancelled() => {
                        debug!(operation_id = %ctx.operation_id, "操作已取消并被清理，丢弃子操作结果");
                    }
                    Err(e) => {
                        error!(
                            operation_id = %ctx.operation_id,
                            sub_operation_id = %sub.id,
                            "执行中的操作从操作表中消失: {}",
                            e
                        );
                        debug_assert!(false, "operation {} vanished while executing", ctx.operation_id);
                    }
                }

                if tracked {
                    let latency_ms = started.elapsed().as_secs_f64() * 1000.0;
                    if let Some(updated) = registry
                        .complete_operation(&sub.node_id, success, latency_ms)
                        .await
                    {
                        balancer.update_metrics(&updated);
                    }
                }
            });
        }

        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                error!(operation_id = %ctx.operation_id, "子操作任务异常退出: {}", e);
            }
        }
    }

    fn should_failover(&self, ctx: &ExecutionContext, operation: &DistributedOperation) -> bool {
        if !self.config.enable_failover
            || operation.is_terminal()
            || ctx.is_cancelled()
            || ctx.deadline_passed()
        {
            return false;
        }
        successful_slots(operation) < operation.quorum()
    }

    /// 为每个失败的原始子操作挑选一个不同的备用节点
    async fn plan_failover(
        &self,
        operation: &DistributedOperation,
        requirements: &NodeRequirements,
    ) -> Vec<(SubOperation, Node)> {
        let failed: Vec<&SubOperation> = operation
            .sub_operations
            .values()
            .filter(|sub| sub.status == SubOperationStatus::Failed && sub.failover_of.is_none())
            .collect();
        if failed.is_empty() {
            return Vec::new();
        }

        let candidates: Vec<Node> = self
            .registry
            .list_eligible()
            .await
            .into_iter()
            .filter(|node| {
                !operation.participant_nodes.contains(&node.id) && node.satisfies(requirements)
            })
            .collect();
        if candidates.is_empty() {
            info!(operation_id = %operation.id, "没有可用于故障转移的备用节点");
            return Vec::new();
        }

        let picks = match self.balancer.select_nodes(
            operation.operation_type,
            requirements,
            &candidates,
            failed.len(),
        ) {
            Ok(picks) => picks,
            Err(e) => {
                warn!(operation_id = %operation.id, "选择故障转移节点失败: {}", e);
                return Vec::new();
            }
        };

        let mut replacements = Vec::new();
        for (original, node) in failed.into_iter().zip(picks) {
            match self.registry.begin_operation(&node.id).await {
                Ok(claimed) => self.balancer.update_metrics(&claimed),
                Err(e) => {
                    warn!(operation_id = %operation.id, node_id = %node.id, "备用节点不可用: {}", e);
                    continue;
                }
            }
            info!(
                operation_id = %operation.id,
                from = %original.node_id,
                to = %node.id,
                "故障转移子操作"
            );
            let mut replacement =
                SubOperation::new(node.id.clone(), original.operation_type, original.args.clone());
            replacement.failover_of = Some(original.id.clone());
            replacement.start();
            replacements.push((replacement, node));
        }
        replacements
    }

    /// 聚合子操作结果并写入终态；已被取消的操作保持原样
    async fn conclude(&self, operation_id: &str) -> CoordinatorResult<DistributedOperation> {
        let (snapshot, concluded) = self
            .operations
            .update(operation_id, |op| -> CoordinatorResult<(DistributedOperation, bool)> {
                if op.is_terminal() {
                    return Ok((op.clone(), false));
                }
                aggregate(op)?;
                Ok((op.clone(), true))
            })
            .await??;

        if concluded {
            self.emit_terminal(&snapshot);
        }
        Ok(snapshot)
    }

    fn emit_terminal(&self, operation: &DistributedOperation) {
        let duration_ms = duration_ms(operation);
        let event = match operation.status {
            OperationStatus::Completed => {
                info!(
                    operation_id = %operation.id,
                    duration_ms,
                    "操作执行成功"
                );
                LifecycleEvent::OperationCompleted {
                    operation_id: operation.id.clone(),
                    operation_type: operation.operation_type,
                    duration_ms,
                }
            }
            OperationStatus::Cancelled => {
                let reason = operation
                    .error()
                    .map(|fault| fault.message.clone())
                    .unwrap_or_default();
                warn!(operation_id = %operation.id, "操作被取消: {}", reason);
                LifecycleEvent::OperationCancelled {
                    operation_id: operation.id.clone(),
                    operation_type: operation.operation_type,
                    duration_ms,
                    reason,
                }
            }
            _ => {
                let error = operation
                    .error()
                    .map(|fault| fault.message.clone())
                    .unwrap_or_default();
                warn!(operation_id = %operation.id, "操作执行失败: {}", error);
                LifecycleEvent::OperationFailed {
                    operation_id: operation.id.clone(),
                    operation_type: operation.operation_type,
                    duration_ms,
                    error,
                }
            }
        };
        self.telemetry.emit(event);
    }

    pub async fn status(&self, operation_id: &str) -> CoordinatorResult<DistributedOperation> {
        self.operations.get(operation_id).await
    }

    pub async fn list_operations(&self) -> Vec<DistributedOperation> {
        self.operations.list().await
    }

    /// 取消非终态操作
    pub async fn cancel(&self, operation_id: &str) -> CoordinatorResult<DistributedOperation> {
        let snapshot = self.operations.cancel(operation_id, CANCELLED_BY_CALLER).await?;
        self.telemetry.emit(LifecycleEvent::OperationCancelled {
            operation_id: snapshot.id.clone(),
            operation_type: snapshot.operation_type,
            duration_ms: duration_ms(&snapshot),
            reason: CANCELLED_BY_CALLER.to_string(),
        });
        Ok(snapshot)
    }

    // ---------------------------------------------------------------------
    // 节点
    // ---------------------------------------------------------------------

    pub async fn register_node(&self, node: Node) -> CoordinatorResult<Node> {
        let node = self.registry.register(node).await?;
        self.balancer.update_metrics(&node);
        Ok(node)
    }

    pub async fn heartbeat(
        &self,
        node_id: &str,
        metrics: Option<NodeMetrics>,
    ) -> CoordinatorResult<Node> {
        let node = self.registry.heartbeat(node_id, metrics.as_ref()).await?;
        self.balancer.update_metrics(&node);
        Ok(node)
    }

    /// 排空并移除节点；`timeout` 为空时使用配置的默认排空超时
    pub async fn unregister_node(
        &self,
        node_id: &str,
        timeout: Option<Duration>,
    ) -> CoordinatorResult<Node> {
        let timeout = timeout.unwrap_or_else(|| self.config.default_drain_timeout());
        self.drain.drain(node_id, timeout).await
    }

    /// 无视进行中的子操作直接移除节点
    pub async fn force_remove_node(&self, node_id: &str) -> CoordinatorResult<Node> {
        self.registry.remove(node_id, true).await
    }

    pub async fn node_status(&self) -> Vec<Node> {
        self.registry.list().await
    }

    pub async fn get_node(&self, node_id: &str) -> CoordinatorResult<Node> {
        self.registry.get(node_id).await
    }

    pub async fn set_maintenance(&self, node_id: &str) -> CoordinatorResult<Node> {
        self.registry.set_status(node_id, NodeStatus::Maintenance).await?;
        self.registry.get(node_id).await
    }

    /// 运维操作：把节点恢复为 active；draining 中的节点不能直接恢复
    pub async fn activate(&self, node_id: &str) -> CoordinatorResult<Node> {
        let node = self.registry.get(node_id).await?;
        if node.status == NodeStatus::Draining {
            return Err(CoordinatorError::invalid_state(format!(
                "node {node_id} is draining and cannot be activated"
            )));
        }
        self.registry.set_status(node_id, NodeStatus::Active).await?;
        self.registry.get(node_id).await
    }

    pub fn node_load(&self, node_id: &str) -> f64 {
        self.balancer.report_load(node_id)
    }
}

/// 原始子操作中成功的数量；故障转移成功也计入被替代的那一份
fn successful_slots(operation: &DistributedOperation) -> usize {
    operation
        .sub_operations
        .values()
        .filter(|sub| sub.failover_of.is_none())
        .filter(|original| slot_succeeded(operation, original))
        .count()
}

fn slot_succeeded(operation: &DistributedOperation, original: &SubOperation) -> bool {
    original.status == SubOperationStatus::Completed
        || operation.sub_operations.values().any(|sub| {
            sub.failover_of.as_deref() == Some(original.id.as_str())
                && sub.status == SubOperationStatus::Completed
        })
}

fn aggregate(op: &mut DistributedOperation) -> CoordinatorResult<()> {
    let leftovers = op.cancel_in_flight(DEADLINE_EXCEEDED);
    if leftovers > 0 {
        warn!(operation_id = %op.id, leftovers, "聚合时仍有未结束的子操作，已标记为取消");
    }

    if op.strategy == RoutingStrategy::Local {
        let outcome = op
            .sub_operations
            .values()
            .next()
            .and_then(|sub| sub.outcome.clone())
            .unwrap_or_else(|| {
                Outcome::Err(Fault {
                    kind: ErrorKind::Internal,
                    message: "local sub-operation produced no outcome".to_string(),
                })
            });
        let status = match &outcome {
            Outcome::Ok(_) => OperationStatus::Completed,
            Outcome::Err(fault) if fault.kind == ErrorKind::Cancelled => OperationStatus::Cancelled,
            Outcome::Err(_) => OperationStatus::Failed,
        };
        let outcome = match outcome {
            Outcome::Err(fault) if status == OperationStatus::Cancelled => {
                Outcome::Err(timeout_fault(fault.message))
            }
            other => other,
        };
        return op.finalize(status, outcome);
    }

    let total = op
        .sub_operations
        .values()
        .filter(|sub| sub.failover_of.is_none())
        .count();
    let succeeded = successful_slots(op);
    let quorum = op.quorum().min(total);

    if total > 0 && succeeded >= quorum {
        let results: serde_json::Map<String, Value> = op
            .sub_operations
            .values()
            .filter_map(|sub| match &sub.outcome {
                Some(Outcome::Ok(value)) => Some((sub.node_id.clone(), value.clone())),
                _ => None,
            })
            .collect();
        return op.finalize(OperationStatus::Completed, Outcome::Ok(Value::Object(results)));
    }

    let timed_out = op
        .sub_operations
        .values()
        .any(|sub| sub.status == SubOperationStatus::Cancelled);
    if timed_out {
        let message = format!(
            "operation deadline exceeded with {succeeded} of {quorum} required successes"
        );
        return op.finalize(OperationStatus::Cancelled, Outcome::Err(timeout_fault(message)));
    }

    let causes: Vec<String> = op
        .sub_operations
        .values()
        .filter(|sub| sub.status == SubOperationStatus::Failed)
        .map(|sub| {
            let cause = sub
                .outcome
                .as_ref()
                .and_then(Outcome::fault)
                .map(|fault| fault.message.clone())
                .unwrap_or_else(|| "unknown error".to_string());
            format!("{}: {}", sub.node_id, cause)
        })
        .collect();
    let failure = CoordinatorError::AggregateFailure {
        failed: total - succeeded,
        total,
        causes: causes.join("; "),
    };
    op.finalize(OperationStatus::Failed, Outcome::Err(Fault::from(&failure)))
}

fn timeout_fault(message: impl Into<String>) -> Fault {
    Fault::from(&CoordinatorError::timeout(message))
}

fn duration_ms(operation: &DistributedOperation) -> u64 {
    operation
        .end_time
        .map(|end| (end - operation.start_time).num_milliseconds().max(0) as u64)
        .unwrap_or(0)
}
