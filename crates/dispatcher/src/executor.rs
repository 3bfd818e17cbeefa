use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, warn};

use coordinator_core::{
    config::CoordinatorConfig,
    models::{AgentRequest, LifecycleEvent, Node, Outcome, SubOperation},
    operations,
    traits::{RemoteAgent, TelemetrySink},
    CoordinatorError, CoordinatorResult,
};

pub(crate) const DEADLINE_EXCEEDED: &str = "deadline exceeded";

/// 重试策略配置
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// 指数退避倍数
    pub backoff_multiplier: f64,
    /// 重试间隔的随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&CoordinatorConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &CoordinatorConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: config.retry_base_delay(),
            max_delay: config.retry_max_delay(),
            backoff_multiplier: config.retry_backoff_multiplier,
            jitter_factor: config.retry_jitter_factor,
        }
    }

    /// 第 `retry` 次重试（从0开始）前的等待时间
    pub fn backoff(&self, retry: u32) -> Duration {
        let base = self.base_delay.as_secs_f64();
        let exponential = base * self.backoff_multiplier.powi(retry as i32);
        let capped = exponential.min(self.max_delay.as_secs_f64());

        // 添加随机抖动以避免雷群效应
        let jitter = capped * self.jitter_factor * (rand::random::<f64>() - 0.5) * 2.0;
        let delay = (capped + jitter).clamp(0.0, self.max_delay.as_secs_f64());
        Duration::from_secs_f64(delay)
    }
}

/// 一个操作内所有子操作共享的执行上下文
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub operation_id: String,
    pub deadline: Instant,
    cancel: watch::Receiver<bool>,
}

impl ExecutionContext {
    pub fn new(operation_id: impl Into<String>, deadline: Instant, cancel: watch::Receiver<bool>) -> Self {
        Self {
            operation_id: operation_id.into(),
            deadline,
            cancel,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn deadline_passed(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    /// 操作被取消时完成；发送端已释放时永不完成
    pub async fn cancelled(&self) {
        let mut cancel = self.cancel.clone();
        let closed = cancel.wait_for(|cancelled| *cancelled).await.is_err();
        if closed {
            std::future::pending::<()>().await;
        }
    }
}

/// 单个子操作的执行结果
#[derive(Debug, Clone)]
pub struct ExecutionReport {
    pub outcome: Outcome,
    pub attempts: u32,
}

impl ExecutionReport {
    fn new(result: CoordinatorResult<serde_json::Value>, attempts: u32) -> Self {
        Self {
            outcome: result.into(),
            attempts,
        }
    }
}

/// 子操作执行器
///
/// 目标为协调器自身节点时在进程内执行，否则通过 [`RemoteAgent`] 调用节点代理。
/// 网络和超时错误按指数退避重试，等待时间受操作剩余时间限制；
/// 截止时间到达或操作被取消时以 `Cancelled` 结束。
pub struct SubOperationExecutor {
    local_node_id: String,
    agent: Arc<dyn RemoteAgent>,
    retry: RetryPolicy,
    rpc_timeout: Duration,
    telemetry: Arc<dyn TelemetrySink>,
}

impl SubOperationExecutor {
    pub fn new(
        local_node_id: impl Into<String>,
        agent: Arc<dyn RemoteAgent>,
        retry: RetryPolicy,
        rpc_timeout: Duration,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        Self {
            local_node_id: local_node_id.into(),
            agent,
            retry,
            rpc_timeout,
            telemetry,
        }
    }

    pub fn local_node_id(&self) -> &str {
        &self.local_node_id
    }

    pub async fn execute(
        &self,
        ctx: &ExecutionContext,
        sub: &SubOperation,
        node: Option<&Node>,
    ) -> ExecutionReport {
        if ctx.is_cancelled() {
            return ExecutionReport::new(Err(CoordinatorError::cancelled("operation cancelled")), 0);
        }
        if ctx.deadline_passed() {
            return ExecutionReport::new(Err(CoordinatorError::cancelled(DEADLINE_EXCEEDED)), 0);
        }

        if sub.node_id == self.local_node_id {
            debug!(
                operation_id = %ctx.operation_id,
                sub_operation_id = %sub.id,
                "在本地执行子操作"
            );
            let result = operations::execute(sub.operation_type, &sub.args, &self.local_node_id);
            return ExecutionReport::new(result, 1);
        }

        match node {
            Some(node) => self.execute_remote(ctx, sub, node).await,
            None => ExecutionReport::new(Err(CoordinatorError::node_not_found(&sub.node_id)), 0),
        }
    }

    async fn execute_remote(
        &self,
        ctx: &ExecutionContext,
        sub: &SubOperation,
        node: &Node,
    ) -> ExecutionReport {
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let remaining = ctx.remaining();
            let rpc_budget = self.rpc_timeout.min(remaining);
            let request = AgentRequest {
                operation_id: ctx.operation_id.clone(),
                sub_operation_id: sub.id.clone(),
                operation_type: sub.operation_type,
                args: sub.args.clone(),
                deadline: Utc::now()
                    + chrono::Duration::from_std(remaining).unwrap_or(chrono::Duration::zero()),
            };

            let result = tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    return ExecutionReport::new(Err(CoordinatorError::cancelled("operation cancelled")), attempts);
                }
                rpc = tokio::time::timeout(rpc_budget, self.agent.execute(node, &request)) => match rpc {
                    Ok(response) => response,
                    Err(_) => Err(CoordinatorError::timeout(format!(
                        "rpc to node {} timed out after {:?}",
                        node.id, rpc_budget
                    ))),
                },
            };

            let err = match result {
                Ok(response) if response.success => {
                    return ExecutionReport::new(
                        Ok(response.result.unwrap_or(serde_json::Value::Null)),
                        attempts,
                    );
                }
                Ok(response) => CoordinatorError::remote(
                    response
                        .error
                        .unwrap_or_else(|| "agent reported failure".to_string()),
                ),
                Err(err) => err,
            };

            if ctx.deadline_passed() {
                debug!(
                    operation_id = %ctx.operation_id,
                    node_id = %node.id,
                    "子操作在截止时间前未完成: {}",
                    err
                );
                return ExecutionReport::new(Err(CoordinatorError::cancelled(DEADLINE_EXCEEDED)), attempts);
            }

            if !err.is_retryable() || attempts > self.retry.max_retries {
                warn!(
                    operation_id = %ctx.operation_id,
                    sub_operation_id = %sub.id,
                    node_id = %node.id,
                    attempts,
                    "子操作执行失败: {}",
                    err
                );
                return ExecutionReport::new(Err(err), attempts);
            }

            let delay = self.retry.backoff(attempts - 1).min(ctx.remaining());
            warn!(
                operation_id = %ctx.operation_id,
                node_id = %node.id,
                attempt = attempts,
                "子操作失败，{:?} 后重试: {}",
                delay,
                err
            );
            self.telemetry.emit(LifecycleEvent::SubOperationRetried {
                operation_id: ctx.operation_id.clone(),
                sub_operation_id: sub.id.clone(),
                node_id: node.id.clone(),
                attempt: attempts,
                error: err.to_string(),
            });

            tokio::select! {
                biased;
                _ = ctx.cancelled() => {
                    return ExecutionReport::new(Err(CoordinatorError::cancelled("operation cancelled")), attempts);
                }
                _ = tokio::time::sleep(delay) => {}
            }

            if ctx.deadline_passed() {
                return ExecutionReport::new(Err(CoordinatorError::cancelled(DEADLINE_EXCEEDED)), attempts);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::mocks::{test_node, AgentBehavior, RecordingTelemetry, ScriptedAgent};
    use coordinator_core::models::{OperationArgs, OperationType, SubOperationStatus};
    use coordinator_core::ErrorKind;
    use serde_json::json;

    fn fast_retry(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
        }
    }

    fn pull_sub(node_id: &str) -> SubOperation {
        let mut args = OperationArgs::new();
        args.insert("image_ref".to_string(), json!("nginx:1.25"));
        SubOperation::new(node_id, OperationType::Pull, args)
    }

    fn context(timeout: Duration) -> (ExecutionContext, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        (ExecutionContext::new("distop-test", Instant::now() + timeout, rx), tx)
    }

    fn executor(agent: Arc<ScriptedAgent>, retry: RetryPolicy, telemetry: Arc<RecordingTelemetry>) -> SubOperationExecutor {
        SubOperationExecutor::new("coordinator", agent, retry, Duration::from_secs(5), telemetry)
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = fast_retry(5);
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(1), Duration::from_millis(200));
        assert_eq!(policy.backoff(10), Duration::from_secs(1));

        let jittered = RetryPolicy {
            jitter_factor: 0.1,
            ..fast_retry(5)
        };
        let delay = jittered.backoff(0);
        assert!(delay >= Duration::from_millis(90) && delay <= Duration::from_millis(110));
    }

    #[tokio::test]
    async fn test_local_execution() {
        let agent = Arc::new(ScriptedAgent::new());
        let executor = executor(agent.clone(), fast_retry(3), Arc::new(RecordingTelemetry::default()));
        let (ctx, _tx) = context(Duration::from_secs(5));

        let report = executor.execute(&ctx, &pull_sub("coordinator"), None).await;
        assert!(report.outcome.is_ok());
        assert_eq!(report.attempts, 1);
        assert_eq!(report.outcome.value().unwrap()["node_id"], "coordinator");
        assert_eq!(agent.calls("coordinator"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_transient_failures() {
        let agent = Arc::new(ScriptedAgent::new());
        agent.set_behavior("node-1", AgentBehavior::FailTimes(2));
        let telemetry = Arc::new(RecordingTelemetry::default());
        let executor = executor(agent.clone(), fast_retry(3), telemetry.clone());
        let (ctx, _tx) = context(Duration::from_secs(60));

        let node = test_node("node-1");
        let report = executor.execute(&ctx, &pull_sub("node-1"), Some(&node)).await;

        assert!(report.outcome.is_ok());
        assert_eq!(report.attempts, 3);
        assert_eq!(agent.calls("node-1"), 3);
        assert_eq!(
            telemetry.count(|e| matches!(e, LifecycleEvent::SubOperationRetried { .. })),
            2
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_keep_last_error() {
        let agent = Arc::new(ScriptedAgent::new());
        agent.set_behavior("node-1", AgentBehavior::NetworkError);
        let executor = executor(agent.clone(), fast_retry(2), Arc::new(RecordingTelemetry::default()));
        let (ctx, _tx) = context(Duration::from_secs(60));

        let node = test_node("node-1");
        let report = executor.execute(&ctx, &pull_sub("node-1"), Some(&node)).await;

        assert_eq!(report.attempts, 3);
        assert_eq!(report.outcome.fault().unwrap().kind, ErrorKind::Network);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remote_failures_are_not_retried() {
        let agent = Arc::new(ScriptedAgent::new());
        agent.set_behavior("node-1", AgentBehavior::Fail("manifest unknown".to_string()));
        let executor = executor(agent.clone(), fast_retry(3), Arc::new(RecordingTelemetry::default()));
        let (ctx, _tx) = context(Duration::from_secs(60));

        let node = test_node("node-1");
        let report = executor.execute(&ctx, &pull_sub("node-1"), Some(&node)).await;

        assert_eq!(report.attempts, 1);
        let fault = report.outcome.fault().unwrap();
        assert_eq!(fault.kind, ErrorKind::Remote);
        assert!(fault.message.contains("manifest unknown"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_agent_is_bounded_by_deadline() {
        let agent = Arc::new(ScriptedAgent::new());
        agent.set_behavior("node-1", AgentBehavior::Hang);
        let executor = executor(agent, fast_retry(3), Arc::new(RecordingTelemetry::default()));
        let (ctx, _tx) = context(Duration::from_secs(2));

        let node = test_node("node-1");
        let report = executor.execute(&ctx, &pull_sub("node-1"), Some(&node)).await;

        let fault = report.outcome.fault().unwrap();
        assert_eq!(fault.kind, ErrorKind::Cancelled);
        assert_eq!(fault.message, format!("操作已取消: {DEADLINE_EXCEEDED}"));

        let mut sub = pull_sub("node-1");
        sub.start();
        sub.finish(report.outcome, report.attempts);
        assert_eq!(sub.status, SubOperationStatus::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_stops_retrying() {
        let agent = Arc::new(ScriptedAgent::new());
        agent.set_behavior("node-1", AgentBehavior::Hang);
        let executor = executor(agent, fast_retry(3), Arc::new(RecordingTelemetry::default()));
        let (ctx, tx) = context(Duration::from_secs(60));

        let node = test_node("node-1");
        let sub = pull_sub("node-1");
        let handle = {
            let ctx = ctx.clone();
            async move { executor.execute(&ctx, &sub, Some(&node)).await }
        };
        let canceller = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tx.send_replace(true);
        };
        let (report, _) = tokio::join!(handle, canceller);

        assert_eq!(report.attempts, 1);
        assert_eq!(report.outcome.fault().unwrap().kind, ErrorKind::Cancelled);
    }
}
