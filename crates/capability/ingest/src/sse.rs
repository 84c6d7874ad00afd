use crate::{IngestError, RawEventHandler, Source, now_epoch_ms};
use async_trait::async_trait;
use domain::RawEvent;
use futures::StreamExt;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Ditto SSE 采集源配置。
#[derive(Debug, Clone)]
pub struct SseSourceConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    /// `fields` 查询参数，逗号分隔。
    pub fields: String,
}

impl SseSourceConfig {
    pub fn things_url(&self) -> String {
        format!(
            "http://{}:{}/api/2/things?fields={}",
            self.host, self.port, self.fields
        )
    }
}

/// Ditto things 变更流（text/event-stream）。
#[derive(Debug, Clone)]
pub struct SseSource {
    config: SseSourceConfig,
    client: reqwest::Client,
}

impl SseSource {
    pub fn new(config: SseSourceConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    pub fn config(&self) -> &SseSourceConfig {
        &self.config
    }
}

#[async_trait]
impl Source for SseSource {
    async fn run(
        &self,
        handler: Arc<dyn RawEventHandler>,
        cancel: CancellationToken,
    ) -> Result<(), IngestError> {
        let url = self.config.things_url();
        let request = self
            .client
            .get(&url)
            .basic_auth(&self.config.username, Some(&self.config.password))
            .header(reqwest::header::ACCEPT, "text/event-stream")
            .send();
        let response = tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            response = request => response.map_err(|err| IngestError::Source(err.to_string()))?,
        };
        if !response.status().is_success() {
            return Err(IngestError::Source(format!(
                "subscribe failed: status={}",
                response.status()
            )));
        }
        info!(target: "bridge.ingest", url = %url, "sse_subscribed");

        let mut stream = Box::pin(response.bytes_stream());
        let mut decoder = SseDecoder::default();
        loop {
            let chunk = tokio::select! {
                _ = cancel.cancelled() => return Ok(()),
                chunk = stream.next() => chunk,
            };
            let chunk = match chunk {
                Some(Ok(chunk)) => chunk,
                Some(Err(err)) => return Err(IngestError::Source(err.to_string())),
                None => return Err(IngestError::Disconnected),
            };
            for payload in decoder.push(&chunk) {
                let event = RawEvent {
                    payload,
                    received_at_ms: now_epoch_ms(),
                };
                if let Err(err) = handler.handle(event).await {
                    warn!(target: "bridge.ingest", error = %err, "raw_event_handler_failed");
                }
            }
        }
    }
}

/// 单行默认上限（字节）。
pub const DEFAULT_MAX_LINE_BYTES: usize = 1024 * 1024;

/// SSE 帧解码器。
///
/// 连续的 `data:` 行以换行拼接，遇到空行派发；注释行与其他字段忽略，空数据不派发。
/// 未结束的行超过 `max_line_bytes` 时整行丢弃，所属事件也一并丢弃。
#[derive(Debug)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    /// `buffer` 中已确认不含换行的前缀长度
    scanned: usize,
    max_line_bytes: usize,
    data: Vec<String>,
    /// 正在跳过超长行的剩余部分
    discarding_line: bool,
    /// 当前事件含超长行，等待空行后丢弃
    discarding_event: bool,
}

impl Default for SseDecoder {
    fn default() -> Self {
        Self::with_max_line_bytes(DEFAULT_MAX_LINE_BYTES)
    }
}

impl SseDecoder {
    pub fn with_max_line_bytes(max_line_bytes: usize) -> Self {
        Self {
            buffer: Vec::new(),
            scanned: 0,
            max_line_bytes: max_line_bytes.max(1),
            data: Vec::new(),
            discarding_line: false,
            discarding_event: false,
        }
    }

    /// 尚未成行的缓冲字节数。
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// 追加一段字节，返回其中已完整的事件数据。
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();
        loop {
            let Some(offset) = self.buffer[self.scanned..].iter().position(|b| *b == b'\n') else {
                if self.discarding_line {
                    self.buffer.clear();
                    self.scanned = 0;
                } else if self.buffer.len() > self.max_line_bytes {
                    self.abandon_event(self.buffer.len());
                    self.buffer.clear();
                    self.scanned = 0;
                    self.discarding_line = true;
                } else {
                    self.scanned = self.buffer.len();
                }
                break;
            };
            let end = self.scanned + offset;
            let raw: Vec<u8> = self.buffer.drain(..=end).collect();
            self.scanned = 0;
            if self.discarding_line {
                self.discarding_line = false;
                continue;
            }
            if raw.len() - 1 > self.max_line_bytes {
                self.abandon_event(raw.len() - 1);
                continue;
            }
            let line = String::from_utf8_lossy(&raw[..raw.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.accept_line(line) {
                events.push(event);
            }
        }
        events
    }

    fn abandon_event(&mut self, line_bytes: usize) {
        warn!(
            target: "bridge.ingest",
            line_bytes,
            limit = self.max_line_bytes,
            "sse_line_too_long"
        );
        self.data.clear();
        self.discarding_event = true;
    }

    fn accept_line(&mut self, line: &str) -> Option<String> {
        if line.is_empty() {
            let data = self.data.join("\n");
            self.data.clear();
            if std::mem::take(&mut self.discarding_event) {
                return None;
            }
            return (!data.is_empty()).then_some(data);
        }
        if self.discarding_event || line.starts_with(':') {
            return None;
        }
        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };
        if field == "data" {
            self.data.push(value.to_string());
        } else {
            debug!(target: "bridge.ingest", field = %field, "sse_field_ignored");
        }
        None
    }
}
