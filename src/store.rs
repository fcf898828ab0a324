//! 进程内的审核状态
//!
//! [`StateStore`] 是唯一能修改状态的入口。命令处理和到期扫描都拿着同一个句柄
//! （`Clone` 只复制 `Arc`），每次修改在返回前完成内存更新，并各自调用一次
//! [`SaveSignal::request_save`]。读写锁不会跨越 `.await`，保存进行中也可以照常读写。

use crate::model::{
    CommunityId, LOG_CHANNEL_KEY, MemberId, ModerationState, PunishmentRecord, Settings,
    StateSummary, Warning,
};
use crate::scheduler::SaveSignal;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

/// 一条到期待解封的封禁
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExpiredBan {
    pub community: CommunityId,
    /// 在该社区处罚列表中的下标（列表只追加，下标稳定）
    pub index: usize,
    pub subject_id: MemberId,
}

#[derive(Clone)]
pub struct StateStore {
    state: Arc<RwLock<ModerationState>>,
    signal: SaveSignal,
}

impl StateStore {
    pub fn new(signal: SaveSignal) -> Self {
        Self::with_state(ModerationState::default(), signal)
    }

    pub fn with_state(state: ModerationState, signal: SaveSignal) -> Self {
        Self {
            state: Arc::new(RwLock::new(state)),
            signal,
        }
    }

    pub fn signal(&self) -> &SaveSignal {
        &self.signal
    }

    // ── 警告 ──────────────────────────────────────────────────────────────────

    /// 成员的警告列表；首次访问时建立空列表，未知 ID 不会报错
    pub fn warnings(&self, community: CommunityId, member: MemberId) -> Vec<Warning> {
        self.write()
            .warnings
            .entry(community)
            .or_default()
            .entry(member)
            .or_default()
            .clone()
    }

    /// 只读计数，不会建立空列表
    pub fn warning_count(&self, community: CommunityId, member: MemberId) -> usize {
        self.read()
            .warnings
            .get(&community)
            .and_then(|members| members.get(&member))
            .map_or(0, Vec::len)
    }

    /// 追加一条警告，返回追加后的条数
    pub fn add_warning(&self, community: CommunityId, member: MemberId, warning: Warning) -> usize {
        self.mutate(|state| {
            let list = state
                .warnings
                .entry(community)
                .or_default()
                .entry(member)
                .or_default();
            list.push(warning);
            list.len()
        })
    }

    /// 清空成员的警告（替换为空列表），返回清掉的条数
    pub fn clear_warnings(&self, community: CommunityId, member: MemberId) -> usize {
        self.mutate(|state| {
            let list = state
                .warnings
                .entry(community)
                .or_default()
                .entry(member)
                .or_default();
            std::mem::take(list).len()
        })
    }

    // ── 处罚 ──────────────────────────────────────────────────────────────────

    /// 追加一条处罚记录，返回它在社区列表中的下标
    pub fn add_punishment(&self, community: CommunityId, record: PunishmentRecord) -> usize {
        self.mutate(|state| {
            let list = state.punishments.entry(community).or_default();
            list.push(record);
            list.len() - 1
        })
    }

    pub fn punishments(&self, community: CommunityId) -> Vec<PunishmentRecord> {
        self.read()
            .punishments
            .get(&community)
            .cloned()
            .unwrap_or_default()
    }

    /// 标记处罚已解除。只有状态真正改变时才会请求保存。
    pub fn resolve_punishment(
        &self,
        community: CommunityId,
        index: usize,
        at: DateTime<Utc>,
    ) -> bool {
        let changed = self
            .write()
            .punishments
            .get_mut(&community)
            .and_then(|list| list.get_mut(index))
            .is_some_and(|record| record.resolve(at));
        if changed {
            self.signal.request_save();
        }
        changed
    }

    /// 所有未解除且已到期的临时封禁
    pub fn expired_bans(&self, now: DateTime<Utc>) -> Vec<ExpiredBan> {
        self.read()
            .punishments
            .iter()
            .flat_map(|(community, list)| {
                list.iter()
                    .enumerate()
                    .filter(|(_, record)| record.is_expired_ban(now))
                    .map(|(index, record)| ExpiredBan {
                        community: *community,
                        index,
                        subject_id: record.subject_id,
                    })
            })
            .collect()
    }

    // ── 设置 ──────────────────────────────────────────────────────────────────

    pub fn settings(&self, community: CommunityId) -> Settings {
        self.read()
            .settings
            .get(&community)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set_setting(
        &self,
        community: CommunityId,
        key: impl Into<String>,
        value: impl Into<Value>,
    ) {
        let (key, value) = (key.into(), value.into());
        self.mutate(|state| {
            state
                .settings
                .entry(community)
                .or_default()
                .insert(key, value);
        });
    }

    pub fn set_log_channel(&self, community: CommunityId, channel_id: u64) {
        self.set_setting(community, LOG_CHANNEL_KEY, channel_id);
    }

    pub fn log_channel(&self, community: CommunityId) -> Option<u64> {
        self.read()
            .settings
            .get(&community)
            .and_then(|settings| settings.get(LOG_CHANNEL_KEY))
            .and_then(Value::as_u64)
    }

    // ── 整体 ──────────────────────────────────────────────────────────────────

    /// 当前状态的完整拷贝，用于编码
    pub fn snapshot(&self) -> ModerationState {
        self.read().clone()
    }

    /// 用加载结果整体替换（启动时调用，不触发保存）
    pub fn replace(&self, state: ModerationState) {
        *self.write() = state;
    }

    pub fn summary(&self) -> StateSummary {
        self.read().summary()
    }

    // ── 私有工具函数 ──────────────────────────────────────────────────────────

    fn mutate<R>(&self, f: impl FnOnce(&mut ModerationState) -> R) -> R {
        let result = {
            let mut state = self.write();
            f(&mut state)
        };
        self.signal.request_save();
        result
    }

    fn read(&self) -> RwLockReadGuard<'_, ModerationState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, ModerationState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
