//! Mock 解封接口，用于测试到期扫描。

use crate::error::{TransportError, TransportResult};
use crate::expiry::Unbanner;
use crate::model::{CommunityId, MemberId};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

/// 可脚本化的解封接口。
///
/// 默认每次调用都成功；通过 [`MockUnbanner::with_outcome`] 为指定成员预设错误。
#[derive(Default)]
pub struct MockUnbanner {
    outcomes: HashMap<MemberId, TransportError>,
    calls: Arc<Mutex<Vec<(CommunityId, MemberId)>>>,
}

impl MockUnbanner {
    pub fn new() -> Self {
        Self::default()
    }

    /// 对该成员的解封总是返回 `error`
    pub fn with_outcome(mut self, subject: MemberId, error: TransportError) -> Self {
        self.outcomes.insert(subject, error);
        self
    }

    /// 收到的调用，按顺序记录
    pub fn calls(&self) -> Vec<(CommunityId, MemberId)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Unbanner for MockUnbanner {
    async fn unban(&self, community: CommunityId, subject: MemberId) -> TransportResult<()> {
        self.calls.lock().unwrap().push((community, subject));
        match self.outcomes.get(&subject) {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }
}
