#[cfg(test)]
pub mod mocks {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;

    use coordinator_core::{
        models::{AgentRequest, AgentResponse, LifecycleEvent, Node},
        operations,
        traits::{RemoteAgent, TelemetrySink},
        CoordinatorError, CoordinatorResult,
    };

    pub fn test_node(id: &str) -> Node {
        Node::new(id, "127.0.0.1", 7070)
    }

    /// 每个节点的模拟行为
    #[derive(Debug, Clone)]
    pub enum AgentBehavior {
        Succeed,
        /// 代理返回 success=false
        Fail(String),
        NetworkError,
        /// 前N次返回网络错误，之后成功
        FailTimes(u32),
        /// 等待指定时间后成功
        Delay(Duration),
        Hang,
    }

    #[derive(Default)]
    pub struct ScriptedAgent {
        behaviors: Mutex<HashMap<String, AgentBehavior>>,
        calls: Mutex<HashMap<String, u32>>,
    }

    impl ScriptedAgent {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn set_behavior(&self, node_id: &str, behavior: AgentBehavior) {
            self.behaviors
                .lock()
                .unwrap()
                .insert(node_id.to_string(), behavior);
        }

        pub fn calls(&self, node_id: &str) -> u32 {
            self.calls.lock().unwrap().get(node_id).copied().unwrap_or(0)
        }

        fn succeed(node: &Node, request: &AgentRequest) -> CoordinatorResult<AgentResponse> {
            match operations::execute(request.operation_type, &request.args, &node.id) {
                Ok(result) => Ok(AgentResponse::ok(result)),
                Err(err) => Ok(AgentResponse::failed(err.to_string())),
            }
        }
    }

    #[async_trait]
    impl RemoteAgent for ScriptedAgent {
        async fn execute(&self, node: &Node, request: &AgentRequest) -> CoordinatorResult<AgentResponse> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                let count = calls.entry(node.id.clone()).or_insert(0);
                *count += 1;
                *count
            };
            let behavior = self
                .behaviors
                .lock()
                .unwrap()
                .get(&node.id)
                .cloned()
                .unwrap_or(AgentBehavior::Succeed);

            match behavior {
                AgentBehavior::Succeed => Self::succeed(node, request),
                AgentBehavior::Fail(message) => Ok(AgentResponse::failed(message)),
                AgentBehavior::NetworkError => Err(CoordinatorError::network(format!(
                    "connection refused: {}",
                    node.endpoint()
                ))),
                AgentBehavior::FailTimes(times) if call <= times => Err(CoordinatorError::network(
                    format!("connection reset by {}", node.id),
                )),
                AgentBehavior::FailTimes(_) => Self::succeed(node, request),
                AgentBehavior::Delay(delay) => {
                    tokio::time::sleep(delay).await;
                    Self::succeed(node, request)
                }
                AgentBehavior::Hang => std::future::pending().await,
            }
        }
    }

    #[derive(Default)]
    pub struct RecordingTelemetry {
        events: Mutex<Vec<LifecycleEvent>>,
    }

    impl RecordingTelemetry {
        pub fn events(&self) -> Vec<LifecycleEvent> {
            self.events.lock().unwrap().clone()
        }

        pub fn count<F>(&self, predicate: F) -> usize
        where
            F: Fn(&LifecycleEvent) -> bool,
        {
            self.events.lock().unwrap().iter().filter(|e| predicate(e)).count()
        }
    }

    impl TelemetrySink for RecordingTelemetry {
        fn emit(&self, event: LifecycleEvent) {
            self.events.lock().unwrap().push(event);
        }
    }
}
