//! Mock 频道，用于在不连接 Discord 的情况下测试写入、扫描与重建。
//!
//! # 示例
//!
//! ```rust
//! use custos_vault::channel::Channel;
//! use custos_vault::testing::MockChannel;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let channel = MockChannel::new(1000);
//! channel.post("hello").await.unwrap();
//!
//! let history = channel.history(10).await.unwrap();
//! assert_eq!(history[0].content, "hello");
//! assert_eq!(channel.post_count(), 1);
//! # }
//! ```

use crate::channel::{AuthorId, Channel, ChannelMessage, MessageId};
use crate::error::{TransportError, TransportResult};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::sync::{Arc, Mutex};

/// 发送失败的注入规则：前 `after` 次尝试成功，之后全部返回 `error`
struct PostFailure {
    after: usize,
    error: TransportError,
}

#[derive(Default)]
struct MockState {
    messages: Vec<ChannelMessage>,
    next_id: MessageId,
    clock: Option<DateTime<Utc>>,
    attempts: usize,
    posted: Vec<String>,
    deleted: Vec<MessageId>,
}

/// 进程内存中的频道。
///
/// 自己发送的消息作者为 `identity`；其他作者的消息通过 [`MockChannel::seed`] 放入。
/// 每次发送把内部时钟推进一秒，后发的消息时间戳一定更新。
/// `history` 按最新在前返回。
pub struct MockChannel {
    identity: AuthorId,
    state: Arc<Mutex<MockState>>,
    post_failure: Arc<Mutex<Option<PostFailure>>>,
    history_error: Option<TransportError>,
}

impl MockChannel {
    pub fn new(identity: AuthorId) -> Self {
        Self {
            identity,
            state: Arc::new(Mutex::new(MockState {
                next_id: 1,
                ..MockState::default()
            })),
            post_failure: Arc::new(Mutex::new(None)),
            history_error: None,
        }
    }

    /// 前 `after` 次发送成功，之后的发送都返回 `error`
    pub fn fail_posts_after(self, after: usize, error: TransportError) -> Self {
        *self.post_failure.lock().unwrap() = Some(PostFailure { after, error });
        self
    }

    /// 读取历史总是失败（模拟频道不可达）
    pub fn with_history_error(mut self, error: TransportError) -> Self {
        self.history_error = Some(error);
        self
    }

    /// 取消发送故障注入
    pub fn clear_failures(&self) {
        *self.post_failure.lock().unwrap() = None;
    }

    /// 以任意作者、任意时间放入一条消息，返回消息 ID
    pub fn seed(
        &self,
        author: AuthorId,
        at: DateTime<Utc>,
        content: impl Into<String>,
    ) -> MessageId {
        let mut state = self.state.lock().unwrap();
        let id = state.next_id;
        state.next_id += 1;
        state.messages.push(ChannelMessage {
            id,
            author_id: author,
            created_at: at,
            content: content.into(),
        });
        if state.clock.is_none_or(|clock| clock < at) {
            state.clock = Some(at);
        }
        id
    }

    /// 直接移除一条消息（模拟被人手动删除）
    pub fn remove(&self, id: MessageId) {
        self.state.lock().unwrap().messages.retain(|m| m.id != id);
    }

    /// 成功发送的次数
    pub fn post_count(&self) -> usize {
        self.state.lock().unwrap().posted.len()
    }

    /// 发送尝试次数（含失败）
    pub fn attempt_count(&self) -> usize {
        self.state.lock().unwrap().attempts
    }

    /// 成功发送的内容，按发送顺序
    pub fn posts(&self) -> Vec<String> {
        self.state.lock().unwrap().posted.clone()
    }

    /// 通过 `delete` 删除的消息 ID，按删除顺序
    pub fn deleted(&self) -> Vec<MessageId> {
        self.state.lock().unwrap().deleted.clone()
    }

    /// 当前仍在频道中的消息，按写入顺序
    pub fn messages(&self) -> Vec<ChannelMessage> {
        self.state.lock().unwrap().messages.clone()
    }
}

#[async_trait]
impl Channel for MockChannel {
    async fn identity(&self) -> TransportResult<AuthorId> {
        Ok(self.identity)
    }

    async fn post(&self, text: &str) -> TransportResult<MessageId> {
        let mut state = self.state.lock().unwrap();
        state.attempts += 1;
        if let Some(failure) = self.post_failure.lock().unwrap().as_ref() {
            if state.attempts > failure.after {
                return Err(failure.error.clone());
            }
        }

        let at = match state.clock {
            Some(clock) => clock + Duration::seconds(1),
            None => Utc.timestamp_opt(1_750_000_000, 0).unwrap(),
        };
        state.clock = Some(at);
        let id = state.next_id;
        state.next_id += 1;
        state.messages.push(ChannelMessage {
            id,
            author_id: self.identity,
            created_at: at,
            content: text.to_string(),
        });
        state.posted.push(text.to_string());
        Ok(id)
    }

    async fn history(&self, limit: usize) -> TransportResult<Vec<ChannelMessage>> {
        if let Some(error) = &self.history_error {
            return Err(error.clone());
        }
        let state = self.state.lock().unwrap();
        let mut messages = state.messages.clone();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));
        messages.truncate(limit);
        Ok(messages)
    }

    async fn delete(&self, id: MessageId) -> TransportResult<()> {
        let mut state = self.state.lock().unwrap();
        let before = state.messages.len();
        state.messages.retain(|m| m.id != id);
        if state.messages.len() == before {
            return Err(TransportError::NotFound(format!("Unknown Message {id}")));
        }
        state.deleted.push(id);
        Ok(())
    }
}
