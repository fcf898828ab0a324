//! 把各组件装配起来的运行时入口
//!
//! [`Vault::open`] 先完成启动加载（扫描 + 重建 + 写入 store），再启动保存调度和到期扫描，
//! 因此返回之后 store 里一定已经是频道中最新的可用状态。

use crate::channel::Channel;
use crate::config::VaultConfig;
use crate::expiry::{ExpirySweeper, Unbanner};
use crate::reconstructor::{self, LoadSource};
use crate::scheduler::{SaveScheduler, SaveSignal};
use crate::store::StateStore;
use crate::writer::{ChannelWriter, SaveReport};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct Vault {
    store: StateStore,
    scheduler: Arc<SaveScheduler>,
    source: LoadSource,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl Vault {
    /// 加载状态并启动后台任务。`unbanner` 为 `None` 时不启动到期扫描。
    pub async fn open(
        config: &VaultConfig,
        channel: Arc<dyn Channel>,
        unbanner: Option<Arc<dyn Unbanner>>,
    ) -> Self {
        let loaded = reconstructor::load(channel.as_ref(), config.history_limit).await;
        let store = StateStore::with_state(loaded.state, SaveSignal::new());

        let writer = Arc::new(ChannelWriter::new(channel, config.writer_options()));
        let scheduler = Arc::new(SaveScheduler::new(
            store.clone(),
            writer,
            config.scheduler_options(),
        ));

        let cancel = CancellationToken::new();
        let mut tasks = vec![scheduler.clone().spawn(cancel.child_token())];
        if let Some(unbanner) = unbanner {
            let sweeper = Arc::new(ExpirySweeper::new(store.clone(), unbanner));
            tasks.push(sweeper.spawn(config.expiry_interval(), cancel.child_token()));
        }

        info!(source = %loaded.source, summary = %store.summary(), "🚀 custos-vault 已就绪");
        Self {
            store,
            scheduler,
            source: loaded.source,
            cancel,
            tasks,
        }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    /// 启动时状态的来源
    pub fn source(&self) -> &LoadSource {
        &self.source
    }

    /// 不管有没有修改，立即写一份完整快照
    pub async fn save_now(&self) -> Option<SaveReport> {
        self.store.signal().mark_dirty();
        self.scheduler.flush().await
    }

    /// 停止后台任务；调度任务退出前会写出尚未保存的修改
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("后台任务异常退出: {e}");
            }
        }
        info!("👋 custos-vault 已停止");
    }
}
