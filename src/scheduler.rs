//! 保存调度（防抖 + 最小写入间隔）
//!
//! ```text
//! request_save ──► dirty = true
//!                  pending: false → true ? 唤醒后台 ──► 等 debounce
//!                                                    ──► 等到距上次写入 ≥ min_interval
//!                                                    ──► pending = false
//!                                                    ──► dirty ? 拍快照并写入
//! ```
//!
//! `pending` 只有一个调用方能从 `false` 翻到 `true`，同一窗口内的其他请求只置脏，
//! 不会重复排队。写入失败（包括限流）直接放弃，状态保持为脏，由下一次请求或
//! 关闭时的 flush 再次尝试。

use crate::store::StateStore;
use crate::writer::{ChannelWriter, SaveReport};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct SchedulerOptions {
    /// 合并窗口：第一次请求之后等待多久再写
    pub debounce: Duration,
    /// 两次完成的写入之间的最小间隔（频道限流）
    pub min_interval: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            debounce: Duration::from_secs(5),
            min_interval: Duration::from_secs(30),
        }
    }
}

// ── SaveSignal ────────────────────────────────────────────────────────────────

/// 保存请求信号，`Clone` 共享同一组标志
#[derive(Clone, Default)]
pub struct SaveSignal {
    inner: Arc<SignalInner>,
}

#[derive(Default)]
struct SignalInner {
    dirty: AtomicBool,
    pending: AtomicBool,
    notify: Notify,
}

impl SaveSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// 标记为脏；若当前没有排队中的保存，则安排一次
    pub fn request_save(&self) {
        self.inner.dirty.store(true, Ordering::SeqCst);
        if !self.inner.pending.swap(true, Ordering::AcqRel) {
            self.inner.notify.notify_one();
        }
    }

    /// 只置脏，不安排保存
    pub fn mark_dirty(&self) {
        self.inner.dirty.store(true, Ordering::SeqCst);
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }

    pub fn is_pending(&self) -> bool {
        self.inner.pending.load(Ordering::SeqCst)
    }

    /// 取走脏标记，返回取走前的值
    pub fn take_dirty(&self) -> bool {
        self.inner.dirty.swap(false, Ordering::SeqCst)
    }

    async fn wait(&self) {
        self.inner.notify.notified().await;
    }

    fn clear_pending(&self) {
        self.inner.pending.store(false, Ordering::Release);
    }
}

// ── SaveScheduler ─────────────────────────────────────────────────────────────

pub struct SaveScheduler {
    store: StateStore,
    writer: Arc<ChannelWriter>,
    options: SchedulerOptions,
    last_write: Mutex<Option<Instant>>,
}

impl SaveScheduler {
    pub fn new(store: StateStore, writer: Arc<ChannelWriter>, options: SchedulerOptions) -> Self {
        Self {
            store,
            writer,
            options,
            last_write: Mutex::new(None),
        }
    }

    /// 启动后台任务；取消后会把尚未写出的修改 flush 一次再退出
    pub fn spawn(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(cancel).await })
    }

    async fn run(&self, cancel: CancellationToken) {
        let signal = self.store.signal().clone();
        debug!(
            debounce_ms = self.options.debounce.as_millis() as u64,
            min_interval_ms = self.options.min_interval.as_millis() as u64,
            "⏱️ 保存调度已启动"
        );
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = signal.wait() => {}
            }
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.options.debounce) => {}
            }
            if let Some(wait) = self.until_next_slot() {
                debug!(wait_ms = wait.as_millis() as u64, "距上次写入过近，推迟保存");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = tokio::time::sleep(wait) => {}
                }
            }
            signal.clear_pending();
            self.save_if_dirty().await;
        }

        if self.store.signal().is_dirty() {
            info!("🛑 调度停止，写出剩余修改");
            self.flush().await;
        }
    }

    /// 立即保存（忽略防抖与间隔），用于关闭前和手动备份
    pub async fn flush(&self) -> Option<SaveReport> {
        self.save_if_dirty().await
    }

    async fn save_if_dirty(&self) -> Option<SaveReport> {
        let signal = self.store.signal();
        if !signal.take_dirty() {
            return None;
        }
        let state = self.store.snapshot();
        match self.writer.save(&state).await {
            Ok(report) => {
                *self.last_write.lock().unwrap_or_else(PoisonError::into_inner) =
                    Some(Instant::now());
                Some(report)
            }
            Err(e) => {
                warn!("💥 保存失败，等待下一次修改后重试: {e}");
                signal.mark_dirty();
                None
            }
        }
    }

    fn until_next_slot(&self) -> Option<Duration> {
        let last = (*self.last_write.lock().unwrap_or_else(PoisonError::into_inner))?;
        let next = last + self.options.min_interval;
        let now = Instant::now();
        (next > now).then(|| next - now)
    }
}
