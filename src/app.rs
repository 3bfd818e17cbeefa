use std::sync::Arc;

use anyhow::{Context, Result};
use coordinator_api::{create_agent_app, create_app, AppState};
use coordinator_core::{config::AppConfig, traits::TelemetrySink};
use coordinator_dispatcher::{
    GarbageCollector, GarbageCollectorConfig, HealthMonitor, HealthMonitorConfig, NodeRegistry,
    OperationCoordinator, OperationStore,
};
use coordinator_infrastructure::{
    install_prometheus_recorder, telemetry_channel, MetricsCollector, MetricsExporter,
};
use coordinator_worker::{
    node_descriptor, AgentService, CoordinatorClient, HeartbeatManager, HttpAgentClient,
};
use tokio::{net::TcpListener, sync::broadcast, task::JoinHandle};
use tracing::{error, info, warn};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 协调器：操作协调、健康检查、垃圾回收和HTTP API
    Coordinator,
    /// 节点代理：执行接口和心跳
    Agent,
    /// 同一进程内运行两者
    All,
}

impl AppMode {
    pub fn parse(mode: &str) -> Result<Self> {
        match mode {
            "coordinator" => Ok(AppMode::Coordinator),
            "agent" => Ok(AppMode::Agent),
            "all" => Ok(AppMode::All),
            other => Err(anyhow::anyhow!("不支持的运行模式: {other}")),
        }
    }

    pub fn runs_coordinator(&self) -> bool {
        matches!(self, AppMode::Coordinator | AppMode::All)
    }

    pub fn runs_agent(&self) -> bool {
        matches!(self, AppMode::Agent | AppMode::All)
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    metrics_exporter: Option<MetricsExporter>,
}

impl Application {
    pub fn new(mut config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {:?}", mode);

        if mode == AppMode::Agent {
            config.agent.enabled = true;
        }
        if config.agent.enabled {
            config.agent.validate().context("Agent配置验证失败")?;
        }

        let metrics_exporter = if mode.runs_coordinator() && config.observability.metrics_enabled {
            Some(install_prometheus_recorder().context("安装Prometheus指标导出器失败")?)
        } else {
            None
        };

        Ok(Self {
            config,
            mode,
            metrics_exporter,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// 运行直到收到关闭信号
    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {:?}", self.mode);

        match self.mode {
            AppMode::Coordinator => self.run_coordinator(shutdown_rx).await,
            AppMode::Agent => self.run_agent(shutdown_rx).await,
            AppMode::All => {
                let agent_enabled = self.config.agent.enabled;
                let agent_rx = shutdown_rx.resubscribe();
                let (coordinator, agent) = tokio::join!(self.run_coordinator(shutdown_rx), async {
                    if agent_enabled {
                        self.run_agent(agent_rx).await
                    } else {
                        warn!("agent.enabled=false，跳过节点代理");
                        Ok(())
                    }
                });
                coordinator.and(agent)
            }
        }
    }

    async fn run_coordinator(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let config = &self.config.coordinator;
        info!(node_id = %config.node_id, "启动协调器服务");

        // 遥测事件由后台任务写入指标
        let collector = Arc::new(MetricsCollector::new());
        let (sink, consumer) = telemetry_channel(config.telemetry_buffer_size, collector);
        let consumer_handle = consumer.start(shutdown_rx.resubscribe());
        let telemetry: Arc<dyn TelemetrySink> = Arc::new(sink);

        let registry = Arc::new(NodeRegistry::new(telemetry.clone()));
        let operations = Arc::new(OperationStore::new());
        let agent_client =
            Arc::new(HttpAgentClient::new(config.rpc_timeout()).context("创建代理客户端失败")?);

        let coordinator = Arc::new(OperationCoordinator::new(
            config.clone(),
            registry.clone(),
            operations.clone(),
            agent_client,
            telemetry.clone(),
        ));

        let mut health_monitor = HealthMonitor::new(
            registry.clone(),
            HealthMonitorConfig {
                check_interval: config.health_check_interval(),
                staleness_threshold: config.staleness_threshold(),
            },
        );
        health_monitor.start();

        let mut garbage_collector = GarbageCollector::new(
            operations,
            telemetry,
            GarbageCollectorConfig {
                interval: config.gc_interval(),
                retention: config.operation_retention(),
            },
        )
        .with_registry(registry);
        garbage_collector.start();

        let server_handle = if self.config.api.enabled {
            let state = AppState {
                coordinator,
                metrics: self.metrics_exporter.clone(),
            };
            let app = create_app(state, &self.config.api, &self.config.observability);
            Some(serve(&self.config.api.bind_address, app, shutdown_rx.resubscribe(), "API服务器").await?)
        } else {
            warn!("api.enabled=false，协调器不对外提供HTTP接口");
            None
        };

        let _ = shutdown_rx.recv().await;
        info!("协调器收到关闭信号");

        health_monitor.stop().await;
        garbage_collector.stop().await;
        if let Some(handle) = server_handle {
            let _ = handle.await;
        }
        let _ = consumer_handle.await;

        info!("协调器服务已停止");
        Ok(())
    }

    async fn run_agent(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let config = &self.config.agent;
        info!(node_id = %config.node_id, "启动节点代理: {}", config.bind_address());

        let agent = Arc::new(AgentService::from_config(config));
        let server_handle = serve(
            &config.bind_address(),
            create_agent_app(agent.clone()),
            shutdown_rx.resubscribe(),
            "节点代理",
        )
        .await?;

        let client = Arc::new(CoordinatorClient::new(
            config.coordinator_url.clone(),
            config.node_id.clone(),
        ));
        let heartbeat_handle = HeartbeatManager::new(
            client,
            agent,
            node_descriptor(config),
            config.heartbeat_interval(),
        )
        .with_unregister_timeout(self.config.coordinator.default_drain_timeout_seconds)
        .start(shutdown_rx.resubscribe());

        let _ = shutdown_rx.recv().await;
        info!("节点代理收到关闭信号");

        // 先注销，再停止执行接口，排空期间仍能完成已分发的子操作
        let _ = heartbeat_handle.await;
        let _ = server_handle.await;

        info!("节点代理已停止");
        Ok(())
    }
}

/// 绑定地址并在后台运行HTTP服务，收到关闭信号后优雅退出
async fn serve(
    bind_address: &str,
    app: axum::Router,
    mut shutdown_rx: broadcast::Receiver<()>,
    name: &'static str,
) -> Result<JoinHandle<()>> {
    let listener = TcpListener::bind(bind_address)
        .await
        .with_context(|| format!("绑定地址失败: {bind_address}"))?;
    info!("{}启动在 http://{}", name, bind_address);

    Ok(tokio::spawn(async move {
        let shutdown = async move {
            let _ = shutdown_rx.recv().await;
        };
        if let Err(e) = axum::serve(listener, app)
            .with_graceful_shutdown(shutdown)
            .await
        {
            error!("{}运行失败: {}", name, e);
        }
        info!("{}已停止", name);
    }))
}
