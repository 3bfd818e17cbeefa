use axum::{
    extract::{Path, Query, State},
    Json,
};
use coordinator_core::models::{DistributedOperation, OperationArgs, OperationStatus};
use serde::Deserialize;
use tracing::info;

use crate::{error::ApiResult, response::success, routes::AppState};

fn default_session_id() -> String {
    "default".to_string()
}

/// 提交操作请求
#[derive(Debug, Deserialize)]
pub struct SubmitOperationRequest {
    #[serde(default = "default_session_id")]
    pub session_id: String,
    pub operation_type: String,
    #[serde(default)]
    pub args: OperationArgs,
}

/// 操作查询参数
#[derive(Debug, Deserialize)]
pub struct OperationQueryParams {
    pub status: Option<OperationStatus>,
    pub session_id: Option<String>,
}

/// 提交操作并等待其结束
///
/// 操作执行失败时仍返回200，失败信息在返回的操作快照中。
pub async fn submit_operation(
    State(state): State<AppState>,
    Json(request): Json<SubmitOperationRequest>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let operation = state
        .coordinator
        .submit(&request.session_id, &request.operation_type, request.args)
        .await?;

    info!(
        operation_id = %operation.id,
        status = %operation.status,
        "操作处理完成"
    );
    Ok(success(operation))
}

/// 获取操作列表
pub async fn list_operations(
    State(state): State<AppState>,
    Query(params): Query<OperationQueryParams>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let operations: Vec<DistributedOperation> = state
        .coordinator
        .list_operations()
        .await
        .into_iter()
        .filter(|op| params.status.map_or(true, |status| op.status == status))
        .filter(|op| {
            params
                .session_id
                .as_deref()
                .map_or(true, |session| op.session_id == session)
        })
        .collect();
    Ok(success(operations))
}

/// 获取单个操作
pub async fn get_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let operation = state.coordinator.status(&id).await?;
    Ok(success(operation))
}

/// 取消操作
pub async fn cancel_operation(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<impl axum::response::IntoResponse> {
    let operation = state.coordinator.cancel(&id).await?;
    Ok(success(operation))
}
