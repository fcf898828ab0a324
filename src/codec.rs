//! 快照编解码
//!
//! 编码输出紧凑 JSON（所有映射都是 `BTreeMap`，同样的状态总是得到同样的文本）：
//!
//! ```json
//! {
//!   "warnings":        { "<guild>": { "<member>": [ {Warning}, ... ] } },
//!   "punishments":     { "<guild>": [ {PunishmentRecord}, ... ] },
//!   "server_settings": { "<guild>": { "log_channel_id": 123 } },
//!   "metadata":        { "version": "...", "last_updated": "...", "save_id": "...", "content_hash": "..." }
//! }
//! ```
//!
//! 解码逐条容错：无法解析的 ID 或记录只记一条 warn 日志并跳过，不会中断整体加载。

use crate::error::{DecodeError, Result};
use crate::model::{
    ModerationState, PunishmentMap, PunishmentRecord, SCHEMA_VERSION, Settings, SettingsMap,
    Snapshot, SnapshotMetadata, Warning, WarningMap, parse_id,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// 一次编码的结果
#[derive(Debug, Clone)]
pub struct Encoded {
    pub document: String,
    pub fingerprint: String,
    pub metadata: SnapshotMetadata,
}

#[derive(Serialize)]
struct WireContent<'a> {
    warnings: &'a WarningMap,
    punishments: &'a PunishmentMap,
    server_settings: &'a SettingsMap,
}

#[derive(Serialize)]
struct WireDocument<'a> {
    #[serde(flatten)]
    content: WireContent<'a>,
    metadata: &'a SnapshotMetadata,
}

fn content(state: &ModerationState) -> WireContent<'_> {
    WireContent {
        warnings: &state.warnings,
        punishments: &state.punishments,
        server_settings: &state.settings,
    }
}

/// 内容指纹：三张映射的规范 JSON 的 SHA-256 前 8 位十六进制。
///
/// 不是整份文档字节的哈希：`metadata`（保存时间、保存标记、指纹本身）不参与计算，
/// 同一份状态无论何时保存，指纹都相同。只用于人工核对，不参与重建时的取舍。
pub fn fingerprint(state: &ModerationState) -> Result<String> {
    let bytes = serde_json::to_vec(&content(state))?;
    let digest = Sha256::digest(&bytes);
    Ok(hex::encode(&digest[..4]))
}

pub fn encode(state: &ModerationState, save_id: &str, now: DateTime<Utc>) -> Result<Encoded> {
    let fingerprint = fingerprint(state)?;
    let metadata = SnapshotMetadata {
        version: SCHEMA_VERSION.to_string(),
        last_updated: now,
        total_servers: state.warnings.len(),
        save_id: save_id.to_string(),
        content_hash: fingerprint.clone(),
    };
    let document = serde_json::to_string(&WireDocument {
        content: content(state),
        metadata: &metadata,
    })?;
    Ok(Encoded {
        document,
        fingerprint,
        metadata,
    })
}

pub fn decode(document: &str) -> std::result::Result<Snapshot, DecodeError> {
    let root: Value = serde_json::from_str(document.trim())?;
    let Value::Object(mut root) = root else {
        return Err(DecodeError::InvalidShape(format!(
            "top level must be an object, got {}",
            kind_of(&root)
        )));
    };

    let warnings = section(&mut root, "warnings")?
        .ok_or_else(|| DecodeError::InvalidShape("missing `warnings`".to_string()))?;
    let punishments = section(&mut root, "punishments")?.unwrap_or_default();
    let settings = section(&mut root, "server_settings")?.unwrap_or_default();

    let state = ModerationState {
        warnings: decode_warnings(warnings),
        punishments: decode_punishments(punishments),
        settings: decode_settings(settings),
    };

    let metadata = match root.remove("metadata") {
        Some(raw) => match serde_json::from_value::<SnapshotMetadata>(raw) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                debug!("快照元数据无法解析，忽略: {e}");
                None
            }
        },
        None => None,
    };

    if let Some(meta) = metadata.as_ref().filter(|m| !m.content_hash.is_empty()) {
        match fingerprint(&state) {
            Ok(actual) if actual != meta.content_hash => {
                warn!(expected = %meta.content_hash, actual = %actual, "⚠️ 快照指纹不一致（可能有记录被跳过）");
            }
            Ok(_) => {}
            Err(e) => debug!("重新计算指纹失败: {e}"),
        }
    }

    Ok(Snapshot { state, metadata })
}

// ── 私有工具函数 ──────────────────────────────────────────────────────────────

/// 取出顶层的一个对象段；缺失或为 null 时返回 `None`，类型不对时报 `InvalidShape`
fn section(
    root: &mut Map<String, Value>,
    key: &str,
) -> std::result::Result<Option<Map<String, Value>>, DecodeError> {
    match root.remove(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(other) => Err(DecodeError::InvalidShape(format!(
            "`{key}` must be an object, got {}",
            kind_of(&other)
        ))),
    }
}

fn decode_warnings(raw: Map<String, Value>) -> WarningMap {
    let mut warnings = WarningMap::new();
    for (community_key, members) in raw {
        let Some(community) = parse_id(&community_key) else {
            warn!(key = %community_key, "跳过无效的社区 ID（warnings）");
            continue;
        };
        let Value::Object(members) = members else {
            warn!(community, "跳过结构无效的成员警告表");
            continue;
        };
        let entry = warnings.entry(community).or_insert_with(BTreeMap::new);
        for (member_key, list) in members {
            let Some(member) = parse_id(&member_key) else {
                warn!(community, key = %member_key, "跳过无效的成员 ID");
                continue;
            };
            let Value::Array(items) = list else {
                warn!(community, member, "跳过结构无效的警告列表");
                continue;
            };
            let list = items
                .into_iter()
                .enumerate()
                .filter_map(|(i, item)| match serde_json::from_value::<Warning>(item) {
                    Ok(warning) => Some(warning),
                    Err(e) => {
                        warn!(community, member, index = i, "跳过无法解析的警告: {e}");
                        None
                    }
                })
                .collect();
            entry.insert(member, list);
        }
    }
    warnings
}

fn decode_punishments(raw: Map<String, Value>) -> PunishmentMap {
    let mut punishments = PunishmentMap::new();
    for (community_key, list) in raw {
        let Some(community) = parse_id(&community_key) else {
            warn!(key = %community_key, "跳过无效的社区 ID（punishments）");
            continue;
        };
        let Value::Array(items) = list else {
            warn!(community, "跳过结构无效的处罚列表");
            continue;
        };
        let records = items
            .into_iter()
            .enumerate()
            .filter_map(
                |(i, item)| match serde_json::from_value::<PunishmentRecord>(item) {
                    Ok(record) => Some(record),
                    Err(e) => {
                        warn!(community, index = i, "跳过无法解析的处罚记录: {e}");
                        None
                    }
                },
            )
            .collect();
        punishments.insert(community, records);
    }
    punishments
}

fn decode_settings(raw: Map<String, Value>) -> SettingsMap {
    let mut settings = SettingsMap::new();
    for (community_key, values) in raw {
        let Some(community) = parse_id(&community_key) else {
            warn!(key = %community_key, "跳过无效的社区 ID（server_settings）");
            continue;
        };
        let Value::Object(values) = values else {
            warn!(community, "跳过结构无效的社区设置");
            continue;
        };
        settings.insert(community, values.into_iter().collect::<Settings>());
    }
    settings
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{LOG_CHANNEL_KEY, PunishmentKind};
    use chrono::TimeZone;
    use serde_json::json;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn sample_state() -> ModerationState {
        let mut state = ModerationState::default();
        let members = state.warnings.entry(1).or_default();
        members.insert(
            42,
            vec![
                Warning::new("spam", 9, at(1_700_000_000)).issuer_name("mod#0001"),
                Warning::new("caps lock", 9, at(1_700_000_100)).severity("low"),
                Warning::new("slurs", 10, at(1_700_000_200)).warning_id("1_42_1700000200"),
            ],
        );
        members.insert(43, Vec::new());
        state.warnings.entry(2).or_default().insert(
            7,
            vec![Warning::new("advertising", 11, at(1_700_000_300))],
        );
        state.punishments.entry(1).or_default().extend([
            PunishmentRecord::new(PunishmentKind::WarnBan, 42, 99, "3 warnings", at(1_700_000_200)),
            PunishmentRecord::new(PunishmentKind::Ban, 8, 9, "raid", at(1_700_000_400))
                .duration("1d")
                .expires_at(at(1_700_086_800))
                .subject_name("raider"),
        ]);
        let mut resolved =
            PunishmentRecord::new(PunishmentKind::Ban, 5, 9, "old", at(1_600_000_000))
                .expires_at(at(1_600_000_600));
        resolved.resolve(at(1_600_000_900));
        state.punishments.entry(2).or_default().push(resolved);
        state
            .settings
            .entry(1)
            .or_default()
            .insert(LOG_CHANNEL_KEY.to_string(), json!(1234567890));
        state
    }

    #[test]
    fn test_round_trip() {
        let state = sample_state();
        let encoded = encode(&state, "abc123", at(1_700_001_000)).unwrap();
        let snapshot = decode(&encoded.document).unwrap();

        assert_eq!(snapshot.state, state);
        let meta = snapshot.metadata.expect("metadata should decode");
        assert_eq!(meta, encoded.metadata);
        assert_eq!(meta.save_id, "abc123");
        assert_eq!(meta.total_servers, 2);
        assert_eq!(meta.content_hash, encoded.fingerprint);
    }

    #[test]
    fn test_round_trip_empty_state() {
        let encoded = encode(&ModerationState::default(), "empty", at(0)).unwrap();
        let snapshot = decode(&encoded.document).unwrap();
        assert!(snapshot.state.is_empty());
    }

    #[test]
    fn test_fingerprint_is_stable_and_short() {
        let state = sample_state();
        let a = fingerprint(&state).unwrap();
        let b = fingerprint(&state.clone()).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 8);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));

        let mut changed = state;
        changed.settings.clear();
        assert_ne!(fingerprint(&changed).unwrap(), a);
    }

    #[test]
    fn test_fingerprint_ignores_save_time() {
        let state = sample_state();
        let first = encode(&state, "one", at(1)).unwrap();
        let second = encode(&state, "two", at(2)).unwrap();
        assert_eq!(first.fingerprint, second.fingerprint);
        assert_ne!(first.document, second.document);
    }

    #[test]
    fn test_malformed_document() {
        match decode("{\"warnings\": {") {
            Err(DecodeError::MalformedDocument(_)) => {}
            other => panic!("应该是 MalformedDocument，实际: {other:?}"),
        }
        assert!(matches!(decode(""), Err(DecodeError::MalformedDocument(_))));
    }

    #[test]
    fn test_invalid_shape() {
        assert!(matches!(decode("[1, 2, 3]"), Err(DecodeError::InvalidShape(_))));
        assert!(matches!(
            decode(r#"{"punishments": {}}"#),
            Err(DecodeError::InvalidShape(_))
        ));
        assert!(matches!(
            decode(r#"{"warnings": []}"#),
            Err(DecodeError::InvalidShape(_))
        ));
        assert!(matches!(
            decode(r#"{"warnings": {}, "punishments": "nope"}"#),
            Err(DecodeError::InvalidShape(_))
        ));
    }

    #[test]
    fn test_bad_entries_are_skipped() {
        let doc = json!({
            "warnings": {
                "1": {
                    "42": [
                        {"reason": "ok", "warned_by": 9, "timestamp": "2025-01-01T00:00:00+00:00"},
                        {"reason": "bad time", "warned_by": 9, "timestamp": "yesterday"},
                        {"warned_by": 9}
                    ],
                    "not-a-member": [],
                    "43": "oops"
                },
                "guild": {"1": []},
                "0": {"1": []},
                "2": 17
            },
            "punishments": {
                "1": [
                    {"type": "kick", "user_id": 5, "reason": "x", "punished_by": 9,
                     "timestamp": "2025-01-01T00:00:00Z"},
                    {"type": "explode", "user_id": 5, "reason": "x", "punished_by": 9,
                     "timestamp": "2025-01-01T00:00:00Z"}
                ],
                "x": []
            },
            "server_settings": {
                "1": {"log_channel_id": 55},
                "3": [1]
            }
        })
        .to_string();

        let snapshot = decode(&doc).unwrap();
        let state = snapshot.state;
        assert_eq!(state.warnings.len(), 1);
        let member = &state.warnings[&1][&42];
        assert_eq!(member.len(), 1);
        assert_eq!(member[0].reason, "ok");
        assert!(!state.warnings[&1].contains_key(&43));
        assert_eq!(state.punishments[&1].len(), 1);
        assert_eq!(state.punishments.len(), 1);
        assert_eq!(state.settings.len(), 1);
        assert_eq!(state.settings[&1][LOG_CHANNEL_KEY], json!(55));
        assert!(snapshot.metadata.is_none());
    }

    #[test]
    fn test_legacy_pretty_document() {
        let doc = r#"
        {
          "warnings": {
            "100": {
              "200": [
                {
                  "reason": "spam",
                  "warned_by": 300,
                  "warned_by_name": "mod",
                  "timestamp": "2025-08-14T10:00:00.123456+00:00",
                  "warning_id": "100_200_1755165600"
                }
              ]
            }
          },
          "punishments": {},
          "server_settings": {"100": {"log_channel_id": 400}},
          "metadata": {
            "version": "2.0-custos-professional",
            "last_updated": "2025-08-14T10:00:01.000000+00:00",
            "total_servers": 1,
            "save_timestamp": 1755165601.0
          }
        }"#;
        let snapshot = decode(doc).unwrap();
        assert_eq!(snapshot.state.warnings[&100][&200][0].issuer_id, 300);
        let meta = snapshot.metadata.unwrap();
        assert_eq!(meta.version, "2.0-custos-professional");
        assert!(meta.content_hash.is_empty());
    }
}
