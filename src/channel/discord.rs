use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::HeaderMap;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::sync::OnceCell;
use tracing::debug;

use super::{AuthorId, Channel, ChannelMessage, MessageId};
use crate::config::VaultConfig;
use crate::error::{Result, TransportError, TransportResult, VaultError};
use crate::expiry::Unbanner;
use crate::model::{CommunityId, MemberId};

/// 单次 `GET /messages` 的最大条数
const PAGE_SIZE: usize = 100;

/// Discord REST 客户端，既是快照频道，也负责到期解封。
///
/// # 用到的接口
///
/// | 操作 | 接口 |
/// |------|------|
/// | 身份 | `GET /users/@me` |
/// | 发送 | `POST /channels/{channel}/messages` |
/// | 历史 | `GET /channels/{channel}/messages?limit=&before=` |
/// | 删除 | `DELETE /channels/{channel}/messages/{message}` |
/// | 解封 | `DELETE /guilds/{guild}/bans/{user}` |
pub struct DiscordClient {
    http: Arc<Client>,
    api_base: String,
    token: String,
    channel_id: u64,
    identity: OnceCell<AuthorId>,
}

impl DiscordClient {
    pub fn new(http: Arc<Client>, token: impl Into<String>, channel_id: u64) -> Self {
        Self {
            http,
            api_base: "https://discord.com/api/v10".to_string(),
            token: token.into(),
            channel_id,
            identity: OnceCell::new(),
        }
    }

    pub fn from_config(config: &VaultConfig) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.http_timeout())
            .build()
            .map_err(VaultError::from)?;
        Ok(Self::new(
            Arc::new(http),
            config.discord_token.clone(),
            config.database_channel_id,
        )
        .with_api_base(config.api_base.clone()))
    }

    /// 自定义 API 地址（测试或代理）
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    fn headers(&self) -> TransportResult<HeaderMap> {
        let mut header_map = HeaderMap::new();
        header_map.insert(
            "Authorization",
            format!("Bot {}", self.token).parse().map_err(|e| {
                TransportError::PermissionDenied(format!("Invalid Authorization header: {}", e))
            })?,
        );
        Ok(header_map)
    }

    fn messages_url(&self) -> String {
        format!("{}/channels/{}/messages", self.api_base, self.channel_id)
    }

    async fn send(&self, request: RequestBuilder) -> TransportResult<Response> {
        let response = request.headers(self.headers()?).send().await?;
        if response.status().is_success() {
            Ok(response)
        } else {
            Err(error_for_status(response).await)
        }
    }

    async fn history_page(
        &self,
        limit: usize,
        before: Option<MessageId>,
    ) -> TransportResult<Vec<ChannelMessage>> {
        let mut query = vec![("limit", limit.to_string())];
        if let Some(before) = before {
            query.push(("before", before.to_string()));
        }
        let response = self
            .send(self.http.get(self.messages_url()).query(&query))
            .await?;
        let page: Vec<WireMessage> = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        page.into_iter().map(WireMessage::into_message).collect()
    }
}

#[async_trait]
impl Channel for DiscordClient {
    async fn identity(&self) -> TransportResult<AuthorId> {
        self.identity
            .get_or_try_init(|| async {
                let response = self
                    .send(self.http.get(format!("{}/users/@me", self.api_base)))
                    .await?;
                let user: WireUser = response
                    .json()
                    .await
                    .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
                parse_snowflake(&user.id)
            })
            .await
            .copied()
    }

    async fn post(&self, text: &str) -> TransportResult<MessageId> {
        let response = self
            .send(
                self.http
                    .post(self.messages_url())
                    .json(&CreateMessage { content: text }),
            )
            .await?;
        let message: WireMessage = response
            .json()
            .await
            .map_err(|e| TransportError::InvalidResponse(e.to_string()))?;
        debug!(message_id = %message.id, chars = text.chars().count(), "📨 消息已发送");
        parse_snowflake(&message.id)
    }

    async fn history(&self, limit: usize) -> TransportResult<Vec<ChannelMessage>> {
        let mut messages: Vec<ChannelMessage> = Vec::with_capacity(limit);
        let mut before = None;
        while messages.len() < limit {
            let want = (limit - messages.len()).min(PAGE_SIZE);
            let page = self.history_page(want, before).await?;
            let exhausted = page.len() < want;
            before = page.iter().map(|m| m.id).min();
            messages.extend(page);
            if exhausted || before.is_none() {
                break;
            }
        }
        Ok(messages)
    }

    async fn delete(&self, id: MessageId) -> TransportResult<()> {
        self.send(self.http.delete(format!("{}/{}", self.messages_url(), id)))
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Unbanner for DiscordClient {
    async fn unban(&self, community: CommunityId, subject: MemberId) -> TransportResult<()> {
        self.send(
            self.http
                .delete(format!(
                    "{}/guilds/{}/bans/{}",
                    self.api_base, community, subject
                ))
                .header("X-Audit-Log-Reason", "Temporary ban expired"),
        )
        .await?;
        Ok(())
    }
}

// ── 线上格式 ──────────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct CreateMessage<'a> {
    content: &'a str,
}

#[derive(Deserialize)]
struct WireUser {
    id: String,
}

#[derive(Deserialize)]
struct WireMessage {
    id: String,
    author: WireUser,
    timestamp: DateTime<Utc>,
    #[serde(default)]
    content: String,
}

impl WireMessage {
    fn into_message(self) -> TransportResult<ChannelMessage> {
        Ok(ChannelMessage {
            id: parse_snowflake(&self.id)?,
            author_id: parse_snowflake(&self.author.id)?,
            created_at: self.timestamp,
            content: self.content,
        })
    }
}

#[derive(Deserialize)]
struct RateLimitBody {
    retry_after: f64,
}

fn parse_snowflake(raw: &str) -> TransportResult<u64> {
    raw.parse()
        .map_err(|_| TransportError::InvalidResponse(format!("invalid snowflake `{raw}`")))
}

async fn error_for_status(response: Response) -> TransportError {
    let status = response.status();
    let retry_header = response
        .headers()
        .get("retry-after")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<f64>().ok());
    let body = response
        .text()
        .await
        .unwrap_or_else(|_| "Unknown error".to_string());
    map_status(status, &body, retry_header)
}

fn map_status(status: StatusCode, body: &str, retry_header: Option<f64>) -> TransportError {
    match status {
        StatusCode::TOO_MANY_REQUESTS => {
            let retry_after = serde_json::from_str::<RateLimitBody>(body)
                .map(|b| b.retry_after)
                .ok()
                .or(retry_header)
                .unwrap_or(1.0);
            TransportError::RateLimited {
                retry_after_ms: (retry_after * 1000.0).ceil() as u64,
            }
        }
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            TransportError::PermissionDenied(body.to_string())
        }
        StatusCode::NOT_FOUND => TransportError::NotFound(body.to_string()),
        other => TransportError::Api {
            status: other.as_u16(),
            message: body.to_string(),
        },
    }
}
