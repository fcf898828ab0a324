//! 存储介质：一个只能追加的消息频道
//!
//! 频道只提供三件事：发消息、按时间倒序读最近的消息、删消息。
//! 消息发出后不可修改，单条有长度上限，写入过快会被限流。
//!
//! | 实现 | 说明 |
//! |------|------|
//! | [`DiscordClient`] | Discord REST API |
//! | [`crate::testing::MockChannel`] | 进程内存，可注入故障，适合测试 |

pub mod discord;

pub use discord::DiscordClient;

use crate::error::TransportResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub type MessageId = u64;
pub type AuthorId = u64;

/// 从频道历史读到的一条消息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelMessage {
    pub id: MessageId,
    pub author_id: AuthorId,
    pub created_at: DateTime<Utc>,
    pub content: String,
}

/// 频道介质的统一接口
#[async_trait]
pub trait Channel: Send + Sync {
    /// 本进程在频道里的身份（只有它写的消息才会被当作快照）
    async fn identity(&self) -> TransportResult<AuthorId>;

    /// 发送一条消息，返回消息 ID
    async fn post(&self, text: &str) -> TransportResult<MessageId>;

    /// 最近的至多 `limit` 条消息；顺序由实现决定，调用方需自行排序
    async fn history(&self, limit: usize) -> TransportResult<Vec<ChannelMessage>>;

    /// 删除一条消息；不存在时返回 `TransportError::NotFound`
    async fn delete(&self, id: MessageId) -> TransportResult<()>;
}
