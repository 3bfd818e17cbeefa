use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tokio::sync::{watch, RwLock};
use tracing::{debug, info};

use coordinator_core::{
    models::{DistributedOperation, Fault, OperationStatus, Outcome, SubOperationStatus},
    CoordinatorError, CoordinatorResult, ErrorKind,
};

struct OperationEntry {
    operation: DistributedOperation,
    cancel_tx: watch::Sender<bool>,
}

/// 操作表
///
/// 每个操作附带一个取消信号，`cancel` 在同一次加锁内完成状态变更并通知执行中的子任务。
#[derive(Default)]
pub struct OperationStore {
    operations: RwLock<HashMap<String, OperationEntry>>,
}

impl OperationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记新操作，返回该操作的取消信号接收端
    pub async fn insert(&self, operation: DistributedOperation) -> watch::Receiver<bool> {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let id = operation.id.clone();
        self.operations
            .write()
            .await
            .insert(id, OperationEntry { operation, cancel_tx });
        cancel_rx
    }

    pub async fn get(&self, operation_id: &str) -> CoordinatorResult<DistributedOperation> {
        self.operations
            .read()
            .await
            .get(operation_id)
            .map(|entry| entry.operation.clone())
            .ok_or_else(|| CoordinatorError::operation_not_found(operation_id))
    }

    /// 按开始时间排序的全部操作快照
    pub async fn list(&self) -> Vec<DistributedOperation> {
        let operations = self.operations.read().await;
        let mut snapshot: Vec<DistributedOperation> = operations
            .values()
            .map(|entry| entry.operation.clone())
            .collect();
        snapshot.sort_by(|a, b| a.start_time.cmp(&b.start_time).then_with(|| a.id.cmp(&b.id)));
        snapshot
    }

    pub async fn len(&self) -> usize {
        self.operations.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// 在写锁内修改操作记录
    pub async fn update<F, R>(&self, operation_id: &str, f: F) -> CoordinatorResult<R>
    where
        F: FnOnce(&mut DistributedOperation) -> R,
    {
        let mut operations = self.operations.write().await;
        let entry = operations
            .get_mut(operation_id)
            .ok_or_else(|| CoordinatorError::operation_not_found(operation_id))?;
        Ok(f(&mut entry.operation))
    }

    /// 取消非终态操作；对终态操作返回 `InvalidState` 且不修改状态
    pub async fn cancel(
        &self,
        operation_id: &str,
        reason: &str,
    ) -> CoordinatorResult<DistributedOperation> {
        let mut operations = self.operations.write().await;
        let entry = operations
            .get_mut(operation_id)
            .ok_or_else(|| CoordinatorError::operation_not_found(operation_id))?;

        if entry.operation.is_terminal() {
            return Err(CoordinatorError::invalid_state(format!(
                "operation {} is already {}",
                operation_id, entry.operation.status
            )));
        }

        let cancelled = entry.operation.cancel_in_flight(reason);
        entry.operation.finalize(
            OperationStatus::Cancelled,
            Outcome::Err(Fault {
                kind: ErrorKind::Cancelled,
                message: reason.to_string(),
            }),
        )?;
        entry.cancel_tx.send_replace(true);

        info!(
            operation_id = %operation_id,
            cancelled_sub_operations = cancelled,
            "操作已取消: {}",
            reason
        );
        Ok(entry.operation.clone())
    }

    /// 所有操作中引用该节点且仍在执行的子操作数量
    pub async fn executing_on(&self, node_id: &str) -> usize {
        self.operations
            .read()
            .await
            .values()
            .map(|entry| entry.operation.executing_on(node_id))
            .sum()
    }

    /// 删除结束时间早于 `cutoff` 的终态操作，返回被删除的ID
    pub async fn purge_terminal_before(&self, cutoff: DateTime<Utc>) -> Vec<String> {
        let mut operations = self.operations.write().await;
        let expired: Vec<String> = operations
            .iter()
            .filter(|(_, entry)| {
                entry.operation.is_terminal()
                    && entry.operation.end_time.is_some_and(|end| end < cutoff)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            operations.remove(id);
        }
        if !expired.is_empty() {
            debug!("清理了 {} 个过期操作记录", expired.len());
        }
        expired
    }

    /// 各状态的操作数量
    pub async fn status_counts(&self) -> HashMap<OperationStatus, usize> {
        let operations = self.operations.read().await;
        let mut counts = HashMap::new();
        for entry in operations.values() {
            *counts.entry(entry.operation.status).or_insert(0) += 1;
        }
        counts
    }

    /// 所有正在执行的子操作数量
    pub async fn executing_sub_operations(&self) -> usize {
        self.operations
            .read()
            .await
            .values()
            .flat_map(|entry| entry.operation.sub_operations.values())
            .filter(|sub| sub.status == SubOperationStatus::Executing)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use coordinator_core::models::{
        NodeRequirements, OperationArgs, OperationType, RoutingDecision, SubOperation,
    };

    fn executing_operation(node_ids: &[&str]) -> DistributedOperation {
        let decision = RoutingDecision::local("coordinator", NodeRequirements::default());
        let mut op = DistributedOperation::new("session", OperationType::Pull, "coordinator", &decision);
        for node_id in node_ids {
            let mut sub = SubOperation::new(*node_id, OperationType::Pull, OperationArgs::new());
            sub.start();
            op.sub_operations.insert(sub.id.clone(), sub);
        }
        op.transition_to(OperationStatus::Executing).unwrap();
        op
    }

    #[tokio::test]
    async fn test_cancel_signals_and_marks_sub_operations() {
        let store = OperationStore::new();
        let op = executing_operation(&["node-1", "node-2"]);
        let id = op.id.clone();
        let cancel_rx = store.insert(op).await;

        let cancelled = store.cancel(&id, "cancelled by caller").await.unwrap();
        assert_eq!(cancelled.status, OperationStatus::Cancelled);
        assert!(cancelled
            .sub_operations
            .values()
            .all(|sub| sub.status == SubOperationStatus::Cancelled));
        assert!(*cancel_rx.borrow());
        assert_eq!(store.executing_on("node-1").await, 0);
    }

    #[tokio::test]
    async fn test_cancel_terminal_operation_is_invalid_state() {
        let store = OperationStore::new();
        let op = executing_operation(&["node-1"]);
        let id = op.id.clone();
        store.insert(op).await;
        store.cancel(&id, "first").await.unwrap();

        let err = store.cancel(&id, "second").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::InvalidState(_)));
        assert_eq!(store.get(&id).await.unwrap().status, OperationStatus::Cancelled);

        let err = store.cancel("distop-missing", "x").await.unwrap_err();
        assert!(matches!(err, CoordinatorError::OperationNotFound { .. }));
    }

    #[tokio::test]
    async fn test_executing_on_counts_across_operations() {
        let store = OperationStore::new();
        store.insert(executing_operation(&["node-1", "node-2"])).await;
        store.insert(executing_operation(&["node-1"])).await;

        assert_eq!(store.executing_on("node-1").await, 2);
        assert_eq!(store.executing_on("node-3").await, 0);
        assert_eq!(store.executing_sub_operations().await, 3);
    }

    #[tokio::test]
    async fn test_purge_only_removes_expired_terminal_operations() {
        let store = OperationStore::new();

        let mut old_done = executing_operation(&[]);
        old_done
            .finalize(OperationStatus::Completed, Outcome::Ok(serde_json::json!({})))
            .unwrap();
        old_done.end_time = Some(Utc::now() - chrono::Duration::hours(48));
        let old_done_id = old_done.id.clone();

        let mut still_running = executing_operation(&["node-1"]);
        still_running.start_time = Utc::now() - chrono::Duration::days(30);
        let running_id = still_running.id.clone();

        let mut recent_done = executing_operation(&[]);
        recent_done
            .finalize(OperationStatus::Failed, Outcome::Ok(serde_json::Value::Null))
            .unwrap();
        let recent_id = recent_done.id.clone();

        store.insert(old_done).await;
        store.insert(still_running).await;
        store.insert(recent_done).await;

        let purged = store
            .purge_terminal_before(Utc::now() - chrono::Duration::hours(24))
            .await;
        assert_eq!(purged, vec![old_done_id.clone()]);
        assert!(store.get(&old_done_id).await.is_err());
        assert!(store.get(&running_id).await.is_ok());
        assert!(store.get(&recent_id).await.is_ok());
    }
}
