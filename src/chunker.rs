//! 分片与传输信封
//!
//! 频道单条消息有长度上限，超长文档被切成若干分片，每片一条消息。
//! 每条消息都是一个显式的信封，由 [`parse`] 解析，而不是在正文里搜索子串：
//!
//! ```text
//! 单条快照:  ```json\n{document}\n```
//! 分片:      **Part {i}/{n}** · save {save_id}\n```json\n{body}\n```
//! 旧格式分片: **Part {i}/{n}:**\n```json\n{body}\n```
//! ```
//!
//! 所有长度都按字符数计算（频道按字符计数），信封本身的开销也计入上限。

use crate::error::ChunkError;
use std::collections::BTreeMap;
use std::collections::btree_map::Entry;

const FENCE_OPEN: &str = "```json\n";
const FENCE_CLOSE: &str = "\n```";
const PART_PREFIX: &str = "**Part ";
const SAVE_MARKER: &str = " · save ";

/// 快照的一个分片
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Part {
    /// 从 1 开始的序号
    pub index: usize,
    pub total: usize,
    /// 同一次保存共享的标记；旧格式分片没有
    pub save_id: Option<String>,
    pub body: String,
}

impl Part {
    /// 未分片的文档按 `1/1` 处理
    pub fn solitary(document: impl Into<String>) -> Self {
        Self {
            index: 1,
            total: 1,
            save_id: None,
            body: document.into(),
        }
    }

    /// 渲染成一条消息的文本
    pub fn render(&self) -> String {
        let mut text = part_header(self.index, self.total, self.save_id.as_deref());
        text.push('\n');
        text.push_str(FENCE_OPEN);
        text.push_str(&self.body);
        text.push_str(FENCE_CLOSE);
        text
    }
}

/// 解析后的信封
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope {
    /// 自成一体的完整文档
    Single(String),
    Part(Part),
}

/// 把整份文档包成单条消息
pub fn render_single(document: &str) -> String {
    format!("{FENCE_OPEN}{document}{FENCE_CLOSE}")
}

/// 解析一条消息；不是快照信封（如审计行、人工消息）时返回 `None`
pub fn parse(text: &str) -> Option<Envelope> {
    if let Some(inner) = text.strip_prefix("```json") {
        let document = inner.strip_suffix("```")?.trim();
        if document.is_empty() {
            return None;
        }
        return Some(Envelope::Single(document.to_string()));
    }

    let (header, rest) = text.split_once('\n')?;
    let (index, total, save_id) = parse_part_header(header)?;
    let body = rest.strip_prefix(FENCE_OPEN)?.strip_suffix(FENCE_CLOSE)?;
    Some(Envelope::Part(Part {
        index,
        total,
        save_id,
        body: body.to_string(),
    }))
}

/// 切分文档，保证每个渲染后的分片不超过 `limit` 个字符
pub fn split(document: &str, limit: usize, save_id: &str) -> Result<Vec<Part>, ChunkError> {
    let char_count = document.chars().count();

    // 分片数的位数会影响信封长度，迭代到稳定为止
    let mut total = 1;
    let capacity = loop {
        let overhead = part_overhead(total, save_id);
        if overhead >= limit {
            return Err(ChunkError::LimitTooSmall { limit, overhead });
        }
        let capacity = limit - overhead;
        let needed = char_count.div_ceil(capacity).max(1);
        if needed <= total {
            total = needed;
            break capacity;
        }
        total = needed;
    };

    let mut parts = Vec::with_capacity(total);
    let mut body = String::new();
    let mut taken = 0;
    for c in document.chars() {
        if taken == capacity {
            parts.push(std::mem::take(&mut body));
            taken = 0;
        }
        body.push(c);
        taken += 1;
    }
    parts.push(body);

    let total = parts.len();
    Ok(parts
        .into_iter()
        .enumerate()
        .map(|(i, body)| Part {
            index: i + 1,
            total,
            save_id: Some(save_id.to_string()),
            body,
        })
        .collect())
}

/// 按序号拼接分片，与输入顺序无关。重复序号保留先出现的那一个。
pub fn join(parts: &[Part]) -> Result<String, ChunkError> {
    let Some(first) = parts.first() else {
        return Err(ChunkError::Incomplete {
            present: 0,
            total: 0,
        });
    };
    let total = first.total;

    let mut slots: BTreeMap<usize, &str> = BTreeMap::new();
    for part in parts {
        if part.total != total {
            return Err(ChunkError::InconsistentTotal {
                expected: total,
                found: part.total,
            });
        }
        if part.index == 0 || part.index > total {
            return Err(ChunkError::InconsistentTotal {
                expected: total,
                found: part.index,
            });
        }
        if let Entry::Vacant(slot) = slots.entry(part.index) {
            slot.insert(&part.body);
        }
    }

    if slots.len() < total {
        return Err(ChunkError::Incomplete {
            present: slots.len(),
            total,
        });
    }
    Ok(slots.into_values().collect())
}

/// 生成要发送的消息文本：放得下就是一条单文档消息，否则是分片序列
pub fn frame(document: &str, limit: usize, save_id: &str) -> Result<Vec<String>, ChunkError> {
    let single = render_single(document);
    if single.chars().count() <= limit {
        return Ok(vec![single]);
    }
    Ok(split(document, limit, save_id)?
        .iter()
        .map(Part::render)
        .collect())
}

// ── 私有工具函数 ──────────────────────────────────────────────────────────────

fn part_header(index: usize, total: usize, save_id: Option<&str>) -> String {
    match save_id {
        Some(save_id) => format!("{PART_PREFIX}{index}/{total}**{SAVE_MARKER}{save_id}"),
        None => format!("{PART_PREFIX}{index}/{total}:**"),
    }
}

/// 最坏情况（序号位数与总数相同）下的信封字符数
fn part_overhead(total: usize, save_id: &str) -> usize {
    part_header(total, total, Some(save_id)).chars().count()
        + 1
        + FENCE_OPEN.chars().count()
        + FENCE_CLOSE.chars().count()
}

fn parse_part_header(line: &str) -> Option<(usize, usize, Option<String>)> {
    let rest = line.strip_prefix(PART_PREFIX)?;
    let (marker, tail) = rest.split_once("**")?;

    let (marker, legacy) = match marker.strip_suffix(':') {
        Some(marker) => (marker, true),
        None => (marker, false),
    };
    let (index, total) = marker.split_once('/')?;
    let index: usize = index.parse().ok()?;
    let total: usize = total.parse().ok()?;
    if index == 0 || total == 0 || index > total {
        return None;
    }

    let save_id = if legacy {
        if !tail.trim().is_empty() {
            return None;
        }
        None
    } else {
        let save_id = tail.strip_prefix(SAVE_MARKER)?.trim();
        if save_id.is_empty() {
            return None;
        }
        Some(save_id.to_string())
    };
    Some((index, total, save_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn document_of(len: usize) -> String {
        let mut doc = String::from("{\"warnings\":{},\"pad\":\"");
        while doc.chars().count() < len - 2 {
            doc.push('x');
        }
        doc.push_str("\"}");
        doc
    }

    #[test]
    fn test_split_4500_into_three_parts() {
        let doc = document_of(4500);
        assert_eq!(doc.chars().count(), 4500);

        let parts = split(&doc, 1900, "a1b2c3d4").unwrap();
        assert_eq!(parts.len(), 3);
        for (i, part) in parts.iter().enumerate() {
            assert_eq!(part.index, i + 1);
            assert_eq!(part.total, 3);
            assert!(part.render().chars().count() <= 1900);
        }
        assert_eq!(join(&parts).unwrap(), doc);
    }

    #[test]
    fn test_join_reverse_order() {
        let doc = document_of(5000);
        let mut parts = split(&doc, 700, "save").unwrap();
        assert!(parts.len() > 5);
        parts.reverse();
        assert_eq!(join(&parts).unwrap(), doc);
    }

    #[test]
    fn test_split_many_limits() {
        let doc = document_of(3000);
        for limit in [60, 100, 333, 1000, 2999] {
            let parts = split(&doc, limit, "s").unwrap();
            assert!(
                parts.iter().all(|p| p.render().chars().count() <= limit),
                "limit {limit} 超出"
            );
            assert_eq!(join(&parts).unwrap(), doc);
        }
    }

    #[test]
    fn test_split_counts_chars_not_bytes() {
        let doc: String = "警告记录".repeat(500);
        let parts = split(&doc, 300, "zh").unwrap();
        for part in &parts {
            assert!(part.render().chars().count() <= 300);
        }
        assert_eq!(join(&parts).unwrap(), doc);
    }

    #[test]
    fn test_limit_too_small() {
        match split("{}", 10, "save") {
            Err(ChunkError::LimitTooSmall { limit: 10, .. }) => {}
            other => panic!("应该是 LimitTooSmall，实际: {other:?}"),
        }
    }

    #[test]
    fn test_join_incomplete() {
        let doc = document_of(4500);
        let mut parts = split(&doc, 1900, "s").unwrap();
        parts.remove(1);
        assert_eq!(
            join(&parts),
            Err(ChunkError::Incomplete {
                present: 2,
                total: 3
            })
        );
        assert_eq!(
            join(&[]),
            Err(ChunkError::Incomplete {
                present: 0,
                total: 0
            })
        );
    }

    #[test]
    fn test_join_inconsistent_total() {
        let mut parts = split(&document_of(4500), 1900, "s").unwrap();
        parts[2].total = 4;
        assert_eq!(
            join(&parts),
            Err(ChunkError::InconsistentTotal {
                expected: 3,
                found: 4
            })
        );
    }

    #[test]
    fn test_join_solitary() {
        let part = Part::solitary("{\"warnings\":{}}");
        assert_eq!(join(&[part]).unwrap(), "{\"warnings\":{}}");
    }

    #[test]
    fn test_join_duplicate_index_keeps_first() {
        let mut parts = split(&document_of(4500), 1900, "s").unwrap();
        let mut dup = parts[0].clone();
        dup.body = "garbage".to_string();
        parts.push(dup);
        assert_eq!(join(&parts).unwrap(), document_of(4500));
    }

    #[test]
    fn test_frame_small_document_is_single() {
        let frames = frame("{\"warnings\":{}}", 1900, "s").unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(
            parse(&frames[0]),
            Some(Envelope::Single("{\"warnings\":{}}".to_string()))
        );
    }

    #[test]
    fn test_frame_and_parse_parts() {
        let doc = document_of(4500);
        let frames = frame(&doc, 1900, "deadbeef").unwrap();
        assert_eq!(frames.len(), 3);

        let parts: Vec<Part> = frames
            .iter()
            .map(|text| match parse(text) {
                Some(Envelope::Part(part)) => part,
                other => panic!("应该解析为分片，实际: {other:?}"),
            })
            .collect();
        assert!(parts.iter().all(|p| p.save_id.as_deref() == Some("deadbeef")));
        assert_eq!(join(&parts).unwrap(), doc);
    }

    #[test]
    fn test_parse_body_with_fences_inside() {
        let part = Part {
            index: 1,
            total: 2,
            save_id: Some("s".to_string()),
            body: "{\"reason\":\"```json\\n```\"".to_string(),
        };
        assert_eq!(parse(&part.render()), Some(Envelope::Part(part)));
    }

    #[test]
    fn test_parse_legacy_part() {
        let text = "**Part 2/3:**\n```json\n  \"reason\": \"spam\",\n```";
        match parse(text) {
            Some(Envelope::Part(part)) => {
                assert_eq!((part.index, part.total), (2, 3));
                assert_eq!(part.save_id, None);
                assert_eq!(part.body, "  \"reason\": \"spam\",");
            }
            other => panic!("应该解析为旧格式分片，实际: {other:?}"),
        }
    }

    #[test]
    fn test_parse_legacy_pretty_single() {
        let text = "```json\n{\n  \"warnings\": {}\n}\n```";
        assert_eq!(
            parse(text),
            Some(Envelope::Single("{\n  \"warnings\": {}\n}".to_string()))
        );
    }

    #[test]
    fn test_parse_rejects_other_messages() {
        assert_eq!(parse("💾 Backup · hash 1234abcd"), None);
        assert_eq!(parse("```json\n\n```"), None);
        assert_eq!(parse("**Part 0/3** · save s\n```json\nx\n```"), None);
        assert_eq!(parse("**Part 4/3** · save s\n```json\nx\n```"), None);
        assert_eq!(parse("**Part 1/3** · save \n```json\nx\n```"), None);
        assert_eq!(parse("**Part 1/3**\n```json\nx\n```"), None);
        assert_eq!(parse("**Part 1/3** · save s\nno fence"), None);
        assert_eq!(parse("Part 1/3 of something"), None);
    }
}
