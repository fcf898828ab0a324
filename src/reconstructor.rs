//! 从频道历史重建状态
//!
//! ```text
//! 扫描 ──► 找候选 ──┬─ 单条消息 ──┐
//!                   ├─ 完整分片组 ─┼─► 由新到旧逐个解码 ──► 第一个成功的胜出
//!                   └─ 没有候选 ───┘                   └─► 全部失败 → 空状态
//! ```
//!
//! 单条消息和分片组放在同一条时间线上比较，分片组的时间取其中最新一片，
//! 时间相同时单条消息优先。带保存标记的分片按标记分组；旧格式分片没有标记，
//! 按连续发送的一段划分（由新到旧序号严格递减、总数不变）。
//! 任何解码或拼接失败都只记录日志，继续尝试下一个候选，重建本身永远不会返回错误。

use crate::channel::{Channel, ChannelMessage, MessageId};
use crate::chunker::{self, Envelope, Part};
use crate::codec;
use crate::model::{ModerationState, SnapshotMetadata};
use crate::scanner::{HistoryScanner, sort_newest_first};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use tracing::{debug, info, warn};

/// 状态从哪里来
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadSource {
    SingleMessage { message_id: MessageId },
    /// 旧格式分片没有保存标记，`save_id` 为 `None`
    MultiPart { save_id: Option<String>, parts: usize },
    Empty,
}

impl fmt::Display for LoadSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LoadSource::SingleMessage { message_id } => write!(f, "single message {message_id}"),
            LoadSource::MultiPart { save_id, parts } => write!(
                f,
                "{parts} parts (save {})",
                save_id.as_deref().unwrap_or("legacy")
            ),
            LoadSource::Empty => write!(f, "empty"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Reconstruction {
    pub state: ModerationState,
    pub metadata: Option<SnapshotMetadata>,
    pub source: LoadSource,
}

impl Reconstruction {
    fn empty() -> Self {
        Self {
            state: ModerationState::default(),
            metadata: None,
            source: LoadSource::Empty,
        }
    }
}

/// 扫描频道并重建。频道不可达时得到空状态。
pub async fn load(channel: &dyn Channel, limit: usize) -> Reconstruction {
    let messages = HistoryScanner::new(channel).scan(limit).await;
    reconstruct(&messages)
}

/// 从一组（已按作者过滤的）消息中选出最新的可用快照
pub fn reconstruct(messages: &[ChannelMessage]) -> Reconstruction {
    let mut messages = messages.to_vec();
    sort_newest_first(&mut messages);

    let candidates = find_candidates(&messages);
    debug!(messages = messages.len(), candidates = candidates.len(), "🧩 候选快照");

    for candidate in candidates {
        match codec::decode(&candidate.document) {
            Ok(snapshot) => {
                let reconstruction = Reconstruction {
                    state: snapshot.state,
                    metadata: snapshot.metadata,
                    source: candidate.source,
                };
                info!(
                    source = %reconstruction.source,
                    at = %candidate.at,
                    summary = %reconstruction.state.summary(),
                    "📥 状态已从频道恢复"
                );
                return reconstruction;
            }
            Err(e) => warn!(source = %candidate.source, "快照无法解码，尝试更早的: {e}"),
        }
    }

    warn!("⚠️ 频道中没有可用的快照，从空状态开始");
    Reconstruction::empty()
}

// ── 候选 ──────────────────────────────────────────────────────────────────────

struct Candidate {
    at: DateTime<Utc>,
    /// 时间相同时的次序：单条消息在前
    rank: u8,
    document: String,
    source: LoadSource,
}

struct Group {
    newest: DateTime<Utc>,
    parts: Vec<Part>,
}

impl Group {
    fn starting_at(at: DateTime<Utc>) -> Self {
        Self {
            newest: at,
            parts: Vec::new(),
        }
    }

    fn total(&self) -> usize {
        self.parts.first().map_or(0, |p| p.total)
    }

    /// 旧格式分片按 1..n 顺序发出，由新到旧看到的序号应严格递减且总数一致
    fn continues_legacy_run(&self, part: &Part) -> bool {
        match self.parts.last() {
            Some(last) => part.total == last.total && part.index < last.index,
            None => true,
        }
    }
}

/// 输入需已按最新在前排序
fn find_candidates(messages: &[ChannelMessage]) -> Vec<Candidate> {
    let mut candidates = Vec::new();
    let mut marked: HashMap<String, Group> = HashMap::new();
    let mut legacy: Vec<Group> = Vec::new();

    for message in messages {
        match chunker::parse(&message.content) {
            Some(Envelope::Single(document)) => candidates.push(Candidate {
                at: message.created_at,
                rank: 0,
                document,
                source: LoadSource::SingleMessage {
                    message_id: message.id,
                },
            }),
            Some(Envelope::Part(part)) => match part.save_id.clone() {
                // 最新的一片最先出现，join 遇到重复序号保留先出现的
                Some(save_id) => marked
                    .entry(save_id)
                    .or_insert_with(|| Group::starting_at(message.created_at))
                    .parts
                    .push(part),
                // 没有保存标记：每次保存是一段连续的分片
                None => {
                    let continues = legacy
                        .last()
                        .is_some_and(|run| run.continues_legacy_run(&part));
                    if !continues {
                        legacy.push(Group::starting_at(message.created_at));
                    }
                    if let Some(run) = legacy.last_mut() {
                        run.parts.push(part);
                    }
                }
            },
            None => {}
        }
    }

    let groups = marked
        .into_iter()
        .map(|(save_id, group)| (Some(save_id), group))
        .chain(legacy.into_iter().map(|group| (None, group)));
    for (save_id, group) in groups {
        let total = group.total();
        match chunker::join(&group.parts) {
            Ok(document) => candidates.push(Candidate {
                at: group.newest,
                rank: 1,
                document,
                source: LoadSource::MultiPart {
                    save_id,
                    parts: total,
                },
            }),
            Err(e) if outgrows_window(total, messages.len()) => warn!(
                save_id = save_id.as_deref().unwrap_or("legacy"),
                total,
                scanned = messages.len(),
                "⚠️ 分片数超过扫描窗口，这份快照无法恢复（请调大 history_limit）: {e}"
            ),
            Err(e) => debug!(
                save_id = save_id.as_deref().unwrap_or("legacy"),
                "跳过不完整的分片组: {e}"
            ),
        }
    }

    candidates.sort_by(|a, b| b.at.cmp(&a.at).then(a.rank.cmp(&b.rank)));
    candidates
}

/// 一组分片比扫描到的消息还多，扫描窗口内不可能凑齐
fn outgrows_window(total: usize, scanned: usize) -> bool {
    total > scanned
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::model::{PunishmentKind, PunishmentRecord, Warning};
    use crate::testing::MockChannel;
    use chrono::TimeZone;

    const BOT: u64 = 1000;
    const LIMIT: usize = 1900;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_750_000_000 + secs, 0).unwrap()
    }

    fn state_with(reason: &str, warnings: usize) -> ModerationState {
        let mut state = ModerationState::default();
        let list = state.warnings.entry(1).or_default().entry(42).or_default();
        for i in 0..warnings {
            list.push(Warning::new(format!("{reason} #{i}"), 9, at(0)));
        }
        state
            .punishments
            .entry(1)
            .or_default()
            .push(PunishmentRecord::new(PunishmentKind::Kick, 42, 9, reason, at(0)));
        state
    }

    fn framed(state: &ModerationState, save_id: &str) -> Vec<String> {
        let encoded = codec::encode(state, save_id, at(0)).unwrap();
        chunker::frame(&encoded.document, LIMIT, save_id).unwrap()
    }

    fn msg(id: MessageId, secs: i64, content: impl Into<String>) -> ChannelMessage {
        ChannelMessage {
            id,
            author_id: BOT,
            created_at: at(secs),
            content: content.into(),
        }
    }

    #[test]
    fn test_empty_history() {
        let loaded = reconstruct(&[]);
        assert!(loaded.state.is_empty());
        assert_eq!(loaded.source, LoadSource::Empty);
    }

    #[test]
    fn test_single_message() {
        let state = state_with("spam", 2);
        let frames = framed(&state, "s1");
        assert_eq!(frames.len(), 1);

        let loaded = reconstruct(&[msg(7, 10, frames[0].clone())]);
        assert_eq!(loaded.state, state);
        assert_eq!(loaded.source, LoadSource::SingleMessage { message_id: 7 });
        assert_eq!(loaded.metadata.unwrap().save_id, "s1");
    }

    #[test]
    fn test_newest_decodable_single_wins() {
        let old = state_with("old", 1);
        let new = state_with("new", 1);
        let messages = [
            msg(1, 10, framed(&old, "a")[0].clone()),
            msg(2, 20, framed(&new, "b")[0].clone()),
            msg(3, 30, "💾 **Custos Database Backup** · not a snapshot"),
        ];
        assert_eq!(reconstruct(&messages).state, new);
    }

    #[test]
    fn test_partial_failure_tolerance() {
        let good = state_with("good", 1);
        let messages = [
            msg(1, 10, framed(&good, "a")[0].clone()),
            msg(2, 20, "```json\n{\"warnings\": {\"1\": \n```"),
            msg(3, 30, "```json\n[1, 2, 3]\n```"),
        ];
        let loaded = reconstruct(&messages);
        assert_eq!(loaded.state, good);
        assert_eq!(loaded.source, LoadSource::SingleMessage { message_id: 1 });
    }

    #[test]
    fn test_multi_part_out_of_order_beats_older_single() {
        let old = state_with("old", 1);
        let big = state_with("a rather long warning reason to fill up the document", 35);
        let parts = framed(&big, "big");
        assert_eq!(parts.len(), 3);

        // 分片 2、1、3 依次出现，中间夹着无关消息
        let messages = [
            msg(1, 0, framed(&old, "old")[0].clone()),
            msg(2, 10, parts[1].clone()),
            msg(3, 11, "hello"),
            msg(4, 12, parts[0].clone()),
            msg(5, 13, "💾 audit line"),
            msg(6, 14, parts[2].clone()),
        ];
        let loaded = reconstruct(&messages);
        assert_eq!(loaded.state, big);
        assert_eq!(
            loaded.source,
            LoadSource::MultiPart {
                save_id: Some("big".to_string()),
                parts: 3
            }
        );
    }

    #[test]
    fn test_incomplete_group_is_skipped() {
        let old = state_with("old", 1);
        let big = state_with("a rather long warning reason to fill up the document", 35);
        let parts = framed(&big, "killed");

        let messages = [
            msg(1, 0, framed(&old, "old")[0].clone()),
            msg(2, 10, parts[0].clone()),
            msg(3, 11, parts[1].clone()),
        ];
        let loaded = reconstruct(&messages);
        assert_eq!(loaded.state, old);
    }

    #[test]
    fn test_newer_single_beats_older_group() {
        let big = state_with("a rather long warning reason to fill up the document", 35);
        let small = state_with("small", 1);
        let parts = framed(&big, "big");

        let mut messages: Vec<ChannelMessage> = parts
            .iter()
            .enumerate()
            .map(|(i, p)| msg(i as u64 + 1, i as i64, p.clone()))
            .collect();
        messages.push(msg(10, 50, framed(&small, "small")[0].clone()));
        assert_eq!(reconstruct(&messages).state, small);
    }

    /// 旧版本写出的分片：没有保存标记，按 1..n 顺序发送
    fn legacy_parts(state: &ModerationState) -> Vec<String> {
        let encoded = codec::encode(state, "x", at(0)).unwrap();
        chunker::split(&encoded.document, LIMIT, "x")
            .unwrap()
            .into_iter()
            .map(|mut part| {
                part.save_id = None;
                part.render()
            })
            .collect()
    }

    fn posted_from(first_id: MessageId, first_secs: i64, texts: &[String]) -> Vec<ChannelMessage> {
        texts
            .iter()
            .enumerate()
            .map(|(i, text)| msg(first_id + i as u64, first_secs + i as i64, text.clone()))
            .collect()
    }

    #[test]
    fn test_legacy_part_headers() {
        let big = state_with("a rather long warning reason to fill up the document", 35);
        let messages = posted_from(1, 0, &legacy_parts(&big));
        assert!(messages[0].content.starts_with("**Part 1/3:**"));

        let loaded = reconstruct(&messages);
        assert_eq!(loaded.state, big);
        assert_eq!(
            loaded.source,
            LoadSource::MultiPart {
                save_id: None,
                parts: 3
            }
        );
    }

    #[test]
    fn test_two_legacy_saves_with_different_totals() {
        let older = state_with("a rather long warning reason to fill up the document", 35);
        let newer = state_with("a rather long warning reason to fill up the document", 50);
        let older_parts = legacy_parts(&older);
        let newer_parts = legacy_parts(&newer);
        assert_eq!(older_parts.len(), 3);
        assert_eq!(newer_parts.len(), 4);

        let mut messages = posted_from(1, 0, &older_parts);
        messages.extend(posted_from(10, 100, &newer_parts));

        let loaded = reconstruct(&messages);
        assert_eq!(loaded.state, newer);
        assert_eq!(
            loaded.source,
            LoadSource::MultiPart {
                save_id: None,
                parts: 4
            }
        );
    }

    #[test]
    fn test_killed_legacy_save_is_not_mixed_with_older_one() {
        let older = state_with("a rather long warning reason to fill up the document", 35);
        let killed = state_with("a rather long warning reason to fill up the document", 36);
        let older_parts = legacy_parts(&older);
        let killed_parts = legacy_parts(&killed);
        assert_eq!(older_parts.len(), killed_parts.len());

        // 较新的一次只发出了前两片
        let mut messages = posted_from(1, 0, &older_parts);
        messages.extend(posted_from(10, 100, &killed_parts[..2]));

        assert_eq!(reconstruct(&messages).state, older);
    }

    #[test]
    fn test_corrupted_single_falls_back_to_older_multi_part() {
        let big = state_with("a rather long warning reason to fill up the document", 35);
        let mut messages = posted_from(1, 0, &framed(&big, "m"));
        messages.push(msg(10, 50, "```json\n{\"warnings\": {\"1\": {\n```"));

        let loaded = reconstruct(&messages);
        assert_eq!(loaded.state, big);
        assert_eq!(
            loaded.source,
            LoadSource::MultiPart {
                save_id: Some("m".to_string()),
                parts: 3
            }
        );
    }

    #[test]
    fn test_group_larger_than_scan_window() {
        assert!(outgrows_window(60, 50));
        assert!(!outgrows_window(3, 50));

        // 只扫描到 5 片中的 2 片：跳过，不会误拼
        let big = state_with("a rather long warning reason to fill up the document", 70);
        let parts = framed(&big, "huge");
        assert!(parts.len() > 2);
        let loaded = reconstruct(&posted_from(1, 0, &parts[..2]));
        assert_eq!(loaded.source, LoadSource::Empty);
    }

    #[test]
    fn test_undecodable_group_falls_back() {
        let old = state_with("old", 1);
        let bogus = chunker::split(&"x".repeat(4000), LIMIT, "junk").unwrap();
        let mut messages = vec![msg(1, 0, framed(&old, "old")[0].clone())];
        for (i, part) in bogus.iter().enumerate() {
            messages.push(msg(i as u64 + 2, 10 + i as i64, part.render()));
        }
        assert_eq!(reconstruct(&messages).state, old);
    }

    #[tokio::test]
    async fn test_load_is_idempotent() {
        let channel = MockChannel::new(BOT);
        let state = state_with("a rather long warning reason to fill up the document", 35);
        for text in framed(&state, "s") {
            channel.seed(BOT, at(1), text);
        }
        channel.seed(2000, at(2), "someone else talking");

        let first = load(&channel, 50).await;
        let second = load(&channel, 50).await;
        assert_eq!(first.state, state);
        assert_eq!(first.state, second.state);
        assert_eq!(first.source, second.source);
    }

    #[tokio::test]
    async fn test_load_ignores_other_authors() {
        let channel = MockChannel::new(BOT);
        let forged = state_with("forged", 1);
        channel.seed(2000, at(1), framed(&forged, "f")[0].clone());
        assert!(load(&channel, 50).await.state.is_empty());
    }

    #[tokio::test]
    async fn test_unreachable_channel_loads_empty() {
        let channel = MockChannel::new(BOT)
            .with_history_error(TransportError::Unreachable("dns".into()));
        let loaded = load(&channel, 50).await;
        assert!(loaded.state.is_empty());
        assert_eq!(loaded.source, LoadSource::Empty);
    }
}
