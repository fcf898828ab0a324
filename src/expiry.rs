//! 临时封禁到期自动解封

use crate::error::{TransportError, TransportResult};
use crate::model::{CommunityId, MemberId};
use crate::store::StateStore;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// 解除社区封禁的接口
#[async_trait]
pub trait Unbanner: Send + Sync {
    /// 成员本来就不在封禁列表里时返回 `TransportError::NotFound`
    async fn unban(&self, community: CommunityId, subject: MemberId) -> TransportResult<()>;
}

/// 一轮扫描的结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub resolved: usize,
    pub failed: usize,
}

pub struct ExpirySweeper {
    store: StateStore,
    unbanner: Arc<dyn Unbanner>,
}

impl ExpirySweeper {
    pub fn new(store: StateStore, unbanner: Arc<dyn Unbanner>) -> Self {
        Self { store, unbanner }
    }

    /// 解封所有已到期的封禁，成功的标记为已解除（经由 store，会触发保存）
    pub async fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let mut report = SweepReport::default();
        for ban in self.store.expired_bans(now) {
            match self.unbanner.unban(ban.community, ban.subject_id).await {
                Ok(()) | Err(TransportError::NotFound(_)) => {
                    if self.store.resolve_punishment(ban.community, ban.index, now) {
                        info!(
                            community = ban.community,
                            subject = ban.subject_id,
                            "🔓 临时封禁到期，已解封"
                        );
                        report.resolved += 1;
                    }
                }
                Err(TransportError::PermissionDenied(reason)) => {
                    warn!(
                        community = ban.community,
                        subject = ban.subject_id,
                        "没有解封权限，保留封禁记录: {reason}"
                    );
                    report.failed += 1;
                }
                Err(e) => {
                    error!(
                        community = ban.community,
                        subject = ban.subject_id,
                        "解封失败，下一轮再试: {e}"
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// 每隔 `interval` 扫描一次，直到被取消
    pub fn spawn(self: Arc<Self>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            debug!(interval_secs = interval.as_secs(), "⏰ 到期扫描已启动");
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        let report = self.sweep(Utc::now()).await;
                        if report != SweepReport::default() {
                            debug!(resolved = report.resolved, failed = report.failed, "到期扫描完成");
                        }
                    }
                }
            }
        })
    }
}
