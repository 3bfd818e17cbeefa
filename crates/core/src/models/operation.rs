use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::routing::{RoutingDecision, RoutingStrategy};
use crate::errors::{CoordinatorError, CoordinatorResult, ErrorKind};

/// 操作参数
pub type OperationArgs = serde_json::Map<String, serde_json::Value>;

/// 容器镜像操作类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Pull,
    Push,
    Tag,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Pull => "pull",
            OperationType::Push => "push",
            OperationType::Tag => "tag",
        }
    }
}

impl FromStr for OperationType {
    type Err = CoordinatorError;

    fn from_str(s: &str) -> CoordinatorResult<Self> {
        match s {
            "pull" => Ok(OperationType::Pull),
            "push" => Ok(OperationType::Push),
            "tag" => Ok(OperationType::Tag),
            other => Err(CoordinatorError::validation(format!(
                "unknown operation type: {other}"
            ))),
        }
    }
}

impl std::fmt::Display for OperationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 分布式操作状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum OperationStatus {
    Planning,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl OperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OperationStatus::Completed | OperationStatus::Failed | OperationStatus::Cancelled
        )
    }

    /// 状态只能单向前进：planning → executing → 终态
    pub fn can_transition_to(&self, next: OperationStatus) -> bool {
        use OperationStatus::*;
        matches!(
            (self, next),
            (Planning, Executing)
                | (Planning, Failed)
                | (Planning, Cancelled)
                | (Executing, Completed)
                | (Executing, Failed)
                | (Executing, Cancelled)
        )
    }
}

impl std::fmt::Display for OperationStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            OperationStatus::Planning => "planning",
            OperationStatus::Executing => "executing",
            OperationStatus::Completed => "completed",
            OperationStatus::Failed => "failed",
            OperationStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// 子操作状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum SubOperationStatus {
    Queued,
    Executing,
    Completed,
    Failed,
    Cancelled,
}

impl SubOperationStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SubOperationStatus::Completed
                | SubOperationStatus::Failed
                | SubOperationStatus::Cancelled
        )
    }
}

/// 失败信息
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fault {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&CoordinatorError> for Fault {
    fn from(err: &CoordinatorError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

/// 带标签的执行结果：`Ok(value) | Err(kind, message)`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Ok(serde_json::Value),
    Err(Fault),
}

impl Outcome {
    pub fn is_ok(&self) -> bool {
        matches!(self, Outcome::Ok(_))
    }

    pub fn value(&self) -> Option<&serde_json::Value> {
        match self {
            Outcome::Ok(value) => Some(value),
            Outcome::Err(_) => None,
        }
    }

    pub fn fault(&self) -> Option<&Fault> {
        match self {
            Outcome::Ok(_) => None,
            Outcome::Err(fault) => Some(fault),
        }
    }
}

impl From<CoordinatorResult<serde_json::Value>> for Outcome {
    fn from(result: CoordinatorResult<serde_json::Value>) -> Self {
        match result {
            Ok(value) => Outcome::Ok(value),
            Err(err) => Outcome::Err(Fault::from(&err)),
        }
    }
}

/// 单个节点上的一个工作单元
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubOperation {
    pub id: String,
    pub node_id: String,
    pub operation_type: OperationType,
    pub status: SubOperationStatus,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub outcome: Option<Outcome>,
    pub attempts: u32,
    pub args: OperationArgs,
    /// 故障转移时指向被替代的子操作
    pub failover_of: Option<String>,
}

impl SubOperation {
    pub fn new(node_id: impl Into<String>, operation_type: OperationType, args: OperationArgs) -> Self {
        Self {
            id: format!("subop-{}", Uuid::new_v4()),
            node_id: node_id.into(),
            operation_type,
            status: SubOperationStatus::Queued,
            start_time: None,
            end_time: None,
            outcome: None,
            attempts: 0,
            args,
            failover_of: None,
        }
    }

    pub fn start(&mut self) {
        if self.status == SubOperationStatus::Queued {
            self.status = SubOperationStatus::Executing;
            self.start_time = Some(Utc::now());
        }
    }

    /// 写入执行结果；已处于终态的子操作不会被修改
    pub fn finish(&mut self, outcome: Outcome, attempts: u32) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = match &outcome {
            Outcome::Ok(_) => SubOperationStatus::Completed,
            Outcome::Err(fault) if fault.kind == ErrorKind::Cancelled => {
                SubOperationStatus::Cancelled
            }
            Outcome::Err(_) => SubOperationStatus::Failed,
        };
        self.attempts = self.attempts.max(attempts);
        self.outcome = Some(outcome);
        self.end_time = Some(Utc::now());
        true
    }

    pub fn cancel(&mut self, reason: &str) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = SubOperationStatus::Cancelled;
        self.outcome = Some(Outcome::Err(Fault {
            kind: ErrorKind::Cancelled,
            message: reason.to_string(),
        }));
        self.end_time = Some(Utc::now());
        true
    }
}

/// 跨越一个或多个节点的逻辑操作
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DistributedOperation {
    pub id: String,
    pub session_id: String,
    pub operation_type: OperationType,
    pub strategy: RoutingStrategy,
    pub status: OperationStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub coordinator_node: String,
    pub participant_nodes: Vec<String>,
    pub sub_operations: BTreeMap<String, SubOperation>,
    pub outcome: Option<Outcome>,
    pub metadata: HashMap<String, serde_json::Value>,
}

impl DistributedOperation {
    pub fn new(
        session_id: impl Into<String>,
        operation_type: OperationType,
        coordinator_node: impl Into<String>,
        decision: &RoutingDecision,
    ) -> Self {
        let mut metadata = decision.metadata.clone();
        metadata.insert("quorum".to_string(), serde_json::json!(decision.quorum));
        Self {
            id: format!("distop-{}", Uuid::new_v4()),
            session_id: session_id.into(),
            operation_type,
            strategy: decision.strategy,
            status: OperationStatus::Planning,
            start_time: Utc::now(),
            end_time: None,
            coordinator_node: coordinator_node.into(),
            participant_nodes: decision.target_nodes.clone(),
            sub_operations: BTreeMap::new(),
            outcome: None,
            metadata,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    pub fn transition_to(&mut self, next: OperationStatus) -> CoordinatorResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(CoordinatorError::invalid_state(format!(
                "operation {} cannot move from {} to {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        if next.is_terminal() {
            self.end_time = Some(Utc::now());
        }
        Ok(())
    }

    /// 标记终态并写入聚合结果
    pub fn finalize(&mut self, next: OperationStatus, outcome: Outcome) -> CoordinatorResult<()> {
        self.transition_to(next)?;
        self.outcome = Some(outcome);
        Ok(())
    }

    /// 取消所有尚未结束的子操作，返回被取消的数量
    pub fn cancel_in_flight(&mut self, reason: &str) -> usize {
        self.sub_operations
            .values_mut()
            .filter(|sub| !sub.status.is_terminal())
            .map(|sub| sub.cancel(reason))
            .filter(|cancelled| *cancelled)
            .count()
    }

    /// 指定节点上处于executing状态的子操作数量
    pub fn executing_on(&self, node_id: &str) -> usize {
        self.sub_operations
            .values()
            .filter(|sub| sub.node_id == node_id && sub.status == SubOperationStatus::Executing)
            .count()
    }

    pub fn result(&self) -> Option<&serde_json::Value> {
        self.outcome.as_ref().and_then(Outcome::value)
    }

    pub fn error(&self) -> Option<&Fault> {
        self.outcome.as_ref().and_then(Outcome::fault)
    }

    pub fn quorum(&self) -> usize {
        self.metadata
            .get("quorum")
            .and_then(|v| v.as_u64())
            .map(|q| q as usize)
            .unwrap_or(self.participant_nodes.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::routing::NodeRequirements;

    fn sample_operation() -> DistributedOperation {
        let decision = RoutingDecision::local("coord", NodeRequirements::default());
        DistributedOperation::new("session-1", OperationType::Pull, "coord", &decision)
    }

    #[test]
    fn test_parse_operation_type() {
        assert_eq!("tag".parse::<OperationType>().unwrap(), OperationType::Tag);
        assert!(matches!(
            "build".parse::<OperationType>(),
            Err(CoordinatorError::Validation(_))
        ));
    }

    #[test]
    fn test_status_transitions_are_monotonic() {
        let mut op = sample_operation();
        assert_eq!(op.status, OperationStatus::Planning);
        op.transition_to(OperationStatus::Executing).unwrap();
        op.transition_to(OperationStatus::Completed).unwrap();
        assert!(op.end_time.is_some());

        let err = op.transition_to(OperationStatus::Cancelled).unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidState(_)));
        assert_eq!(op.status, OperationStatus::Completed);

        let mut op = sample_operation();
        op.transition_to(OperationStatus::Executing).unwrap();
        assert!(op.transition_to(OperationStatus::Planning).is_err());
    }

    #[test]
    fn test_terminal_sub_operation_is_not_overwritten() {
        let mut sub = SubOperation::new("node-1", OperationType::Push, OperationArgs::new());
        sub.start();
        assert_eq!(sub.status, SubOperationStatus::Executing);
        assert!(sub.cancel("deadline exceeded"));

        let written = sub.finish(Outcome::Ok(serde_json::json!({"success": true})), 1);
        assert!(!written);
        assert_eq!(sub.status, SubOperationStatus::Cancelled);
    }

    #[test]
    fn test_finish_maps_outcome_to_status() {
        let mut sub = SubOperation::new("node-1", OperationType::Pull, OperationArgs::new());
        sub.start();
        let err = CoordinatorError::network("connection reset");
        sub.finish(Outcome::from(Err(err)), 4);
        assert_eq!(sub.status, SubOperationStatus::Failed);
        assert_eq!(sub.attempts, 4);
        assert_eq!(sub.outcome.as_ref().unwrap().fault().unwrap().kind, ErrorKind::Network);
    }

    #[test]
    fn test_cancel_in_flight_and_executing_count() {
        let mut op = sample_operation();
        for node in ["node-a", "node-a", "node-b"] {
            let mut sub = SubOperation::new(node, OperationType::Pull, OperationArgs::new());
            sub.start();
            op.sub_operations.insert(sub.id.clone(), sub);
        }
        assert_eq!(op.executing_on("node-a"), 2);
        assert_eq!(op.cancel_in_flight("cancelled by caller"), 3);
        assert_eq!(op.executing_on("node-a"), 0);
    }

    #[test]
    fn test_outcome_serialization_is_tagged() {
        let ok = serde_json::to_value(Outcome::Ok(serde_json::json!(1))).unwrap();
        assert_eq!(ok, serde_json::json!({"ok": 1}));

        let err = Outcome::Err(Fault {
            kind: ErrorKind::Timeout,
            message: "late".to_string(),
        });
        let value = serde_json::to_value(&err).unwrap();
        assert_eq!(value["err"]["kind"], "timeout");
    }
}
