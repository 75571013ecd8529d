//! # Event Sinks
//!
//! 事件的外部投递目标。
//!
//! | Sink | 投递方式 |
//! |------|----------|
//! | `ConsoleSink` | tracing 日志，级别随事件严重级别变化 |
//! | `FileSink` | JSON lines 追加写入文件 |
//! | `WebhookSink` | HTTP POST JSON |
//! | `MailSink` | 渲染邮件后交给 `MailTransport` |
//! | `CustomSink` | 任意闭包 |

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::io::AsyncWriteExt;

use crate::error::{CacheError, Result};
use crate::events::{CacheEvent, EventSeverity};

/// 单个 sink 的投递结果
#[derive(Debug, Clone, Serialize)]
pub struct SinkOutcome {
    /// sink ID
    pub sink: String,
    /// 是否投递成功
    pub delivered: bool,
    /// 失败原因
    pub error: Option<String>,
}

impl SinkOutcome {
    pub fn delivered(sink: &str) -> Self {
        Self {
            sink: sink.to_string(),
            delivered: true,
            error: None,
        }
    }

    pub fn failed(sink: &str, error: impl Into<String>) -> Self {
        Self {
            sink: sink.to_string(),
            delivered: false,
            error: Some(error.into()),
        }
    }
}

/// 事件投递目标
///
/// 此 trait 是 dyn 兼容的，可以用于 `Arc<dyn EventSink>`。
#[async_trait]
pub trait EventSink: Send + Sync {
    /// sink 名称 (用于日志)
    fn name(&self) -> &str;

    /// 投递事件
    async fn deliver(&self, event: &CacheEvent) -> Result<()>;
}

/// 控制台 sink，通过 tracing 输出
#[derive(Debug, Default)]
pub struct ConsoleSink;

impl ConsoleSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl EventSink for ConsoleSink {
    fn name(&self) -> &str {
        "console"
    }

    async fn deliver(&self, event: &CacheEvent) -> Result<()> {
        let event_type = event.event_type();
        match event.severity {
            EventSeverity::Info => tracing::info!(
                event_type = %event_type,
                source = %event.source,
                "{}", event.message
            ),
            EventSeverity::Warning => tracing::warn!(
                event_type = %event_type,
                source = %event.source,
                "{}", event.message
            ),
            EventSeverity::Error | EventSeverity::Critical => tracing::error!(
                event_type = %event_type,
                source = %event.source,
                severity = %event.severity,
                "{}", event.message
            ),
        }
        Ok(())
    }
}

/// 文件 sink，每个事件写一行 JSON
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    // 串行化写入，保证行不交错
    write_lock: tokio::sync::Mutex<()>,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl EventSink for FileSink {
    fn name(&self) -> &str {
        "file"
    }

    async fn deliver(&self, event: &CacheEvent) -> Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let _guard = self.write_lock.lock().await;
        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Webhook sink，POST 事件 JSON 到指定 URL
#[derive(Debug, Clone)]
pub struct WebhookSink {
    url: String,
    client: reqwest::Client,
    headers: Vec<(String, String)>,
}

impl WebhookSink {
    /// 默认请求超时
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

    pub fn new(url: impl Into<String>) -> Result<Self> {
        Self::with_timeout(url, Self::DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            url: url.into(),
            client,
            headers: Vec::new(),
        })
    }

    /// 添加请求头 (例如 Authorization)
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

#[async_trait]
impl EventSink for WebhookSink {
    fn name(&self) -> &str {
        "webhook"
    }

    async fn deliver(&self, event: &CacheEvent) -> Result<()> {
        let mut request = self.client.post(&self.url).json(event);
        for (name, value) in &self.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let resp = request.send().await?;
        if !resp.status().is_success() {
            return Err(CacheError::sink(format!(
                "webhook {} responded with {}",
                self.url,
                resp.status()
            )));
        }
        Ok(())
    }
}

/// 渲染好的邮件
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailMessage {
    pub from: String,
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
}

/// 邮件发送通道 (SMTP 等由调用方实现)
#[async_trait]
pub trait MailTransport: Send + Sync {
    async fn send(&self, message: &MailMessage) -> Result<()>;
}

/// 邮件 sink
pub struct MailSink {
    transport: Arc<dyn MailTransport>,
    from: String,
    to: Vec<String>,
    subject_prefix: String,
}

impl MailSink {
    pub fn new(transport: Arc<dyn MailTransport>, from: impl Into<String>, to: Vec<String>) -> Self {
        Self {
            transport,
            from: from.into(),
            to,
            subject_prefix: "cachekeeper".to_string(),
        }
    }

    pub fn with_subject_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.subject_prefix = prefix.into();
        self
    }

    /// 渲染邮件内容
    pub fn render(&self, event: &CacheEvent) -> Result<MailMessage> {
        let payload = serde_json::to_string_pretty(&event.payload)?;
        let body = format!(
            "{}\n\nsource: {}\nseverity: {}\ntime: {}\nevent id: {}\n\n{}\n",
            event.message,
            event.source,
            event.severity,
            event.timestamp.to_rfc3339(),
            event.event_id,
            payload
        );

        Ok(MailMessage {
            from: self.from.clone(),
            to: self.to.clone(),
            subject: format!(
                "[{}] {} {}",
                self.subject_prefix,
                event.severity.as_str().to_uppercase(),
                event.event_type()
            ),
            body,
        })
    }
}

#[async_trait]
impl EventSink for MailSink {
    fn name(&self) -> &str {
        "mail"
    }

    async fn deliver(&self, event: &CacheEvent) -> Result<()> {
        if self.to.is_empty() {
            return Err(CacheError::sink("mail sink has no recipients"));
        }
        let message = self.render(event)?;
        self.transport.send(&message).await
    }
}

/// 自定义 sink 回调
pub type SinkFn = Arc<dyn Fn(&CacheEvent) -> Result<()> + Send + Sync>;

/// 闭包 sink
pub struct CustomSink {
    name: String,
    handler: SinkFn,
}

impl CustomSink {
    pub fn new<F>(name: impl Into<String>, handler: F) -> Self
    where
        F: Fn(&CacheEvent) -> Result<()> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            handler: Arc::new(handler),
        }
    }
}

#[async_trait]
impl EventSink for CustomSink {
    fn name(&self) -> &str {
        &self.name
    }

    async fn deliver(&self, event: &CacheEvent) -> Result<()> {
        (self.handler)(event)
    }
}
