//! InfluxDB 1.x HTTP 写入端

mod line_protocol;

pub use line_protocol::{EncodedBatch, encode_point, encode_points};

use crate::error::StorageError;
use crate::traits::PointSink;
use domain::{Point, TimePrecision};
use std::time::Duration;
use tracing::{info, warn};

/// InfluxDB 连接配置。
#[derive(Debug, Clone)]
pub struct InfluxConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub password: String,
    pub timeout: Duration,
}

/// InfluxDB 写入端（`/write`，line protocol）。
pub struct InfluxPointSink {
    client: reqwest::Client,
    config: InfluxConfig,
    base_url: String,
}

impl InfluxPointSink {
    pub fn new(config: InfluxConfig) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|err| StorageError::Setup(err.to_string()))?;
        let base_url = format!("http://{}:{}", config.host, config.port);
        Ok(Self {
            client,
            config,
            base_url,
        })
    }

    pub fn write_url(&self) -> String {
        format!("{}/write", self.base_url)
    }

    /// 确保目标数据库存在（InfluxDB 1.x 中 CREATE DATABASE 幂等）。
    pub async fn ensure_database(&self) -> Result<(), StorageError> {
        let statement = format!(
            "CREATE DATABASE \"{}\"",
            self.config.database.replace('"', "\\\"")
        );
        let response = self
            .client
            .post(format!("{}/query", self.base_url))
            .basic_auth(&self.config.username, Some(&self.config.password))
            .query(&[("q", statement.as_str())])
            .send()
            .await?;
        check_status(response).await?;
        info!(target: "bridge.storage", database = %self.config.database, "influx_database_ready");
        Ok(())
    }
}

#[async_trait::async_trait]
impl PointSink for InfluxPointSink {
    async fn flush(&self, points: &[Point], precision: TimePrecision) -> Result<(), StorageError> {
        let encoded = encode_points(points, precision);
        if encoded.skipped > 0 {
            warn!(
                target: "bridge.storage",
                skipped = encoded.skipped,
                "points_with_unparsable_time_skipped"
            );
        }
        if encoded.lines == 0 {
            return Ok(());
        }
        let response = self
            .client
            .post(self.write_url())
            .basic_auth(&self.config.username, Some(&self.config.password))
            .query(&[
                ("db", self.config.database.as_str()),
                ("precision", precision.as_str()),
            ])
            .body(encoded.body)
            .send()
            .await?;
        check_status(response).await
    }

    fn name(&self) -> &str {
        "influxdb"
    }
}

async fn check_status(response: reqwest::Response) -> Result<(), StorageError> {
    let status = response.status();
    if status.is_success() {
        return Ok(());
    }
    let body = response.text().await.unwrap_or_default();
    Err(StorageError::Rejected {
        status: status.as_u16(),
        body,
    })
}
