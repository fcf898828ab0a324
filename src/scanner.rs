//! 读取频道里本进程写过的最近消息

use crate::channel::{Channel, ChannelMessage};
use crate::error::TransportResult;
use tracing::{debug, error};

pub struct HistoryScanner<'a> {
    channel: &'a dyn Channel,
}

impl<'a> HistoryScanner<'a> {
    pub fn new(channel: &'a dyn Channel) -> Self {
        Self { channel }
    }

    /// 最近 `limit` 条消息中自己写的那些，最新在前。
    /// 频道不可达时记录错误并返回空列表。
    pub async fn scan(&self, limit: usize) -> Vec<ChannelMessage> {
        match self.try_scan(limit).await {
            Ok(messages) => messages,
            Err(e) => {
                error!(limit, "📭 读取频道历史失败: {e}");
                Vec::new()
            }
        }
    }

    pub async fn try_scan(&self, limit: usize) -> TransportResult<Vec<ChannelMessage>> {
        let me = self.channel.identity().await?;
        let history = self.channel.history(limit).await?;
        let fetched = history.len();

        let mut own: Vec<ChannelMessage> =
            history.into_iter().filter(|m| m.author_id == me).collect();
        sort_newest_first(&mut own);
        debug!(fetched, own = own.len(), "🔍 频道历史扫描完成");
        Ok(own)
    }
}

/// 按创建时间倒序；同一时间按消息 ID 倒序
pub fn sort_newest_first(messages: &mut [ChannelMessage]) {
    messages.sort_by(|a, b| {
        b.created_at
            .cmp(&a.created_at)
            .then_with(|| b.id.cmp(&a.id))
    });
}
