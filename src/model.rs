//! 持久化数据模型
//!
//! | 类型 | 说明 |
//! |------|------|
//! | [`Warning`] | 单条警告，创建后不可修改 |
//! | [`PunishmentRecord`] | 处罚记录，`resolved` 只能从 `false` 变为 `true` |
//! | [`ModerationState`] | 全部持久化内容（警告 / 处罚 / 社区设置） |
//! | [`Snapshot`] | 解码得到的状态 + 元数据 |
//!
//! 字段的线上名称沿用已有备份的 JSON 格式（`warned_by`、`user_id`、`unbanned` 等），
//! 旧快照可以直接读回。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// 社区（Discord guild）ID
pub type CommunityId = u64;
/// 成员 ID
pub type MemberId = u64;

/// 社区设置：任意键值
pub type Settings = BTreeMap<String, Value>;

pub type WarningMap = BTreeMap<CommunityId, BTreeMap<MemberId, Vec<Warning>>>;
pub type PunishmentMap = BTreeMap<CommunityId, Vec<PunishmentRecord>>;
pub type SettingsMap = BTreeMap<CommunityId, Settings>;

/// 日志频道设置项的键名
pub const LOG_CHANNEL_KEY: &str = "log_channel_id";

/// 写入快照时使用的格式版本
pub const SCHEMA_VERSION: &str = "2.1-custos-vault";

/// 解析 ID 键：必须是正整数，否则返回 `None`
pub fn parse_id(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|id| *id > 0)
}

// ── Warning ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Warning {
    pub reason: String,
    #[serde(rename = "warned_by")]
    pub issuer_id: u64,
    #[serde(
        rename = "warned_by_name",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub issuer_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub warning_id: Option<String>,
}

impl Warning {
    pub fn new(reason: impl Into<String>, issuer_id: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            reason: reason.into(),
            issuer_id,
            issuer_name: None,
            timestamp,
            severity: None,
            warning_id: None,
        }
    }

    pub fn issuer_name(mut self, name: impl Into<String>) -> Self {
        self.issuer_name = Some(name.into());
        self
    }

    pub fn severity(mut self, severity: impl Into<String>) -> Self {
        self.severity = Some(severity.into());
        self
    }

    pub fn warning_id(mut self, id: impl Into<String>) -> Self {
        self.warning_id = Some(id.into());
        self
    }
}

// ── PunishmentRecord ──────────────────────────────────────────────────────────

/// 处罚类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PunishmentKind {
    /// 警告次数达到上限触发的自动封禁
    WarnBan,
    Mute,
    Ban,
    Kick,
    Unban,
}

impl PunishmentKind {
    /// 是否属于会被到期扫描解封的封禁类处罚
    pub fn is_ban(self) -> bool {
        matches!(self, PunishmentKind::Ban | PunishmentKind::WarnBan)
    }
}

impl fmt::Display for PunishmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PunishmentKind::WarnBan => "warn_ban",
            PunishmentKind::Mute => "mute",
            PunishmentKind::Ban => "ban",
            PunishmentKind::Kick => "kick",
            PunishmentKind::Unban => "unban",
        };
        f.write_str(name)
    }
}

/// 单条处罚记录
///
/// `resolved` / `resolved_at` 只能通过 [`PunishmentRecord::resolve`] 设置，
/// 一旦为 `true` 不会再变回 `false`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PunishmentRecord {
    #[serde(rename = "type")]
    pub kind: PunishmentKind,
    #[serde(rename = "user_id")]
    pub subject_id: u64,
    #[serde(rename = "user_name", default, skip_serializing_if = "Option::is_none")]
    pub subject_name: Option<String>,
    pub reason: String,
    /// 人类可读的时长描述（如 `1d2h`、`permanent`）
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<String>,
    #[serde(rename = "punished_by")]
    pub issuer_id: u64,
    #[serde(
        rename = "punished_by_name",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub issuer_name: Option<String>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(rename = "unbanned", default, skip_serializing_if = "is_false")]
    resolved: bool,
    #[serde(rename = "unbanned_at", default, skip_serializing_if = "Option::is_none")]
    resolved_at: Option<DateTime<Utc>>,
}

impl PunishmentRecord {
    pub fn new(
        kind: PunishmentKind,
        subject_id: u64,
        issuer_id: u64,
        reason: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            kind,
            subject_id,
            subject_name: None,
            reason: reason.into(),
            duration: None,
            issuer_id,
            issuer_name: None,
            timestamp,
            expires_at: None,
            resolved: false,
            resolved_at: None,
        }
    }

    pub fn subject_name(mut self, name: impl Into<String>) -> Self {
        self.subject_name = Some(name.into());
        self
    }

    pub fn issuer_name(mut self, name: impl Into<String>) -> Self {
        self.issuer_name = Some(name.into());
        self
    }

    pub fn duration(mut self, duration: impl Into<String>) -> Self {
        self.duration = Some(duration.into());
        self
    }

    pub fn expires_at(mut self, at: DateTime<Utc>) -> Self {
        self.expires_at = Some(at);
        self
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved
    }

    pub fn resolved_at(&self) -> Option<DateTime<Utc>> {
        self.resolved_at
    }

    /// 标记为已解除。已解除的记录保持原解除时间不变，返回是否发生了变化。
    pub fn resolve(&mut self, at: DateTime<Utc>) -> bool {
        if self.resolved {
            return false;
        }
        self.resolved = true;
        self.resolved_at = Some(at);
        true
    }

    /// 未解除、带到期时间且已到期的封禁
    pub fn is_expired_ban(&self, now: DateTime<Utc>) -> bool {
        self.kind.is_ban()
            && !self.resolved
            && self.expires_at.is_some_and(|expires| expires <= now)
    }
}

fn is_false(v: &bool) -> bool {
    !*v
}

// ── ModerationState ───────────────────────────────────────────────────────────

/// 需要持久化的全部审核状态
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModerationState {
    pub warnings: WarningMap,
    pub punishments: PunishmentMap,
    pub settings: SettingsMap,
}

impl ModerationState {
    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty() && self.punishments.is_empty() && self.settings.is_empty()
    }

    pub fn summary(&self) -> StateSummary {
        StateSummary {
            warning_communities: self.warnings.len(),
            warnings: self
                .warnings
                .values()
                .flat_map(|members| members.values())
                .map(Vec::len)
                .sum(),
            punishment_communities: self.punishments.len(),
            punishments: self.punishments.values().map(Vec::len).sum(),
            settings_communities: self.settings.len(),
        }
    }
}

/// 状态计数，用于日志与 `inspect` 输出
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StateSummary {
    pub warning_communities: usize,
    pub warnings: usize,
    pub punishment_communities: usize,
    pub punishments: usize,
    pub settings_communities: usize,
}

impl fmt::Display for StateSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} warnings in {} servers, {} punishments in {} servers, settings for {} servers",
            self.warnings,
            self.warning_communities,
            self.punishments,
            self.punishment_communities,
            self.settings_communities
        )
    }
}

// ── Snapshot ──────────────────────────────────────────────────────────────────

/// 快照元数据
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMetadata {
    pub version: String,
    pub last_updated: DateTime<Utc>,
    /// 有警告记录的社区数
    #[serde(default)]
    pub total_servers: usize,
    /// 同一次保存的所有分片共享的标记
    #[serde(default)]
    pub save_id: String,
    /// 内容指纹（见 [`crate::codec::fingerprint`]）
    #[serde(default)]
    pub content_hash: String,
}

/// 从频道读回的一份完整快照
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub state: ModerationState,
    /// 旧格式或损坏的元数据为 `None`
    pub metadata: Option<SnapshotMetadata>,
}
