//! Ditto → InfluxDB 遥测桥接进程。

mod ingest;

use bridge_config::AppConfig;
use bridge_ingest::{SseSource, SseSourceConfig};
use bridge_normalize::FeatureTransformer;
use bridge_storage::{InfluxConfig, InfluxPointSink, NoopPointSink, PointSink};
use bridge_telemetry::{init_tracing, metrics};
use ingest::{SinkBinding, spawn_bridge};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// InfluxDB 单次请求超时。
const INFLUX_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 加载本地 .env（如存在），便于直接 cargo run 启动
    dotenvy::dotenv().ok();
    // 从环境变量加载运行配置
    let config = AppConfig::from_env()?;
    // 初始化结构化日志
    init_tracing();

    let sink = build_sink(&config).await?;
    let source = Arc::new(SseSource::new(SseSourceConfig {
        host: config.ditto_addr.clone(),
        port: config.ditto_port,
        username: config.ditto_user.clone(),
        password: config.ditto_password.clone(),
        fields: config.ditto_fields.clone(),
    }));
    info!(
        "ingest source: ditto {}:{} sink={}",
        config.ditto_addr,
        config.ditto_port,
        sink.name()
    );

    let cancel = CancellationToken::new();
    let bridge = spawn_bridge(
        &config.batch,
        config.cache_capacity,
        source,
        vec![SinkBinding {
            name: sink.name().to_string(),
            sink,
            transformer: Arc::new(FeatureTransformer),
        }],
        cancel.clone(),
    )?;

    // Ctrl-C 或采集源失败都会触发取消
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("shutdown requested");
            cancel.cancel();
        }
        _ = cancel.cancelled() => {}
    }

    let report = bridge.wait().await;
    for (name, stats) in &report.sinks {
        info!(sink = %name, stats = ?stats, "sink_summary");
    }
    info!(metrics = ?metrics().snapshot(), "bridge_stopped");

    // 采集源断开：以非零状态退出，由外部进程管理决定是否重启
    if let Err(err) = report.source {
        error!(error = %err, "ingest source failed");
        return Err(err.into());
    }
    Ok(())
}

async fn build_sink(config: &AppConfig) -> Result<Arc<dyn PointSink>, Box<dyn std::error::Error>> {
    if config.dry_run {
        info!("dry run: points are discarded");
        return Ok(Arc::new(NoopPointSink));
    }
    let influx = InfluxPointSink::new(InfluxConfig {
        host: config.influx_addr.clone(),
        port: config.influx_port,
        database: config.influx_database.clone(),
        username: config.influx_user.clone(),
        password: config.influx_password.clone(),
        timeout: INFLUX_TIMEOUT,
    })?;
    // 建库失败不阻止启动：批次会按重试策略继续写入
    if let Err(err) = influx.ensure_database().await {
        warn!(error = %err, database = %config.influx_database, "influx database check failed");
    }
    Ok(Arc::new(influx))
}
