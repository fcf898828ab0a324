//! 把快照写进频道
//!
//! 一次保存 = 编码 → 分片 → （可选）审计行 → 逐条发送。相邻两条消息之间固定间隔
//! `part_delay`。任何一条发送失败（包括限流）都会放弃整次保存，不排队重试；
//! 已经发出去的分片留在频道里成为不完整的一组，重建时会被跳过。

use crate::channel::{Channel, MessageId};
use crate::chunker;
use crate::codec::{self, Encoded};
use crate::error::{Result, TransportError};
use crate::model::ModerationState;
use chrono::Utc;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone)]
pub struct WriterOptions {
    /// 单条消息的字符上限（含信封）
    pub message_limit: usize,
    /// 同一次保存中相邻两条消息的间隔
    pub part_delay: Duration,
    /// 写入成功后删除上一次保存的消息
    pub prune_previous: bool,
    /// 先发一条人类可读的审计行
    pub announce: bool,
}

impl Default for WriterOptions {
    fn default() -> Self {
        Self {
            message_limit: 1900,
            part_delay: Duration::from_millis(500),
            prune_previous: false,
            announce: true,
        }
    }
}

/// 一次成功保存的结果
#[derive(Debug, Clone)]
pub struct SaveReport {
    pub save_id: String,
    pub fingerprint: String,
    /// 快照占用的消息数（不含审计行）
    pub parts: usize,
    /// 本次发送的所有消息（含审计行）
    pub message_ids: Vec<MessageId>,
}

pub struct ChannelWriter {
    channel: Arc<dyn Channel>,
    options: WriterOptions,
    /// 上一次成功保存写出的消息，用于 `prune_previous`
    previous: Mutex<Vec<MessageId>>,
}

impl ChannelWriter {
    pub fn new(channel: Arc<dyn Channel>, options: WriterOptions) -> Self {
        Self {
            channel,
            options,
            previous: Mutex::new(Vec::new()),
        }
    }

    pub async fn save(&self, state: &ModerationState) -> Result<SaveReport> {
        let save_id = new_save_id();
        let encoded = codec::encode(state, &save_id, Utc::now())?;
        let frames = chunker::frame(&encoded.document, self.options.message_limit, &save_id)?;
        let parts = frames.len();

        let mut messages = Vec::with_capacity(parts + 1);
        if self.options.announce {
            messages.push(audit_line(&encoded, parts));
        }
        messages.extend(frames);

        let message_ids = self.write(&messages).await?;
        info!(
            save_id = %save_id,
            hash = %encoded.fingerprint,
            parts,
            chars = encoded.document.chars().count(),
            "✅ 快照已保存"
        );

        if self.options.prune_previous {
            self.prune(message_ids.clone()).await;
        }

        Ok(SaveReport {
            save_id,
            fingerprint: encoded.fingerprint,
            parts,
            message_ids,
        })
    }

    /// 按顺序发送，相邻两条之间等待 `part_delay`；任何失败都放弃剩余部分
    pub async fn write(&self, messages: &[String]) -> Result<Vec<MessageId>> {
        let mut ids = Vec::with_capacity(messages.len());
        for (i, text) in messages.iter().enumerate() {
            if i > 0 && !self.options.part_delay.is_zero() {
                tokio::time::sleep(self.options.part_delay).await;
            }
            match self.channel.post(text).await {
                Ok(id) => ids.push(id),
                Err(e) => {
                    if e.is_rate_limited() {
                        warn!(sent = i, total = messages.len(), "🚦 频道限流，放弃本次保存: {e}");
                    } else {
                        error!(sent = i, total = messages.len(), "写入频道失败，放弃本次保存: {e}");
                    }
                    return Err(e.into());
                }
            }
        }
        Ok(ids)
    }

    async fn prune(&self, current: Vec<MessageId>) {
        let previous = std::mem::replace(
            &mut *self.previous.lock().unwrap_or_else(PoisonError::into_inner),
            current,
        );
        for id in previous {
            match self.channel.delete(id).await {
                Ok(()) | Err(TransportError::NotFound(_)) => {
                    debug!(message_id = id, "🗑️ 旧快照消息已删除");
                }
                Err(e) => warn!(message_id = id, "删除旧快照消息失败: {e}"),
            }
            if !self.options.part_delay.is_zero() {
                tokio::time::sleep(self.options.part_delay).await;
            }
        }
    }
}

// ── 私有工具函数 ──────────────────────────────────────────────────────────────

fn new_save_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(12);
    id
}

/// 人类可读的审计行（不是信封，重建时会被忽略）
fn audit_line(encoded: &Encoded, parts: usize) -> String {
    format!(
        "💾 **Custos Database Backup** · v{} · servers {} · parts {} · hash `{}` · {}",
        encoded.metadata.version,
        encoded.metadata.total_servers,
        parts,
        encoded.fingerprint,
        encoded.metadata.last_updated.format("%Y-%m-%d %H:%M:%S UTC"),
    )
}
