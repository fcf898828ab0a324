//! 运行配置
//!
//! 加载顺序（后者覆盖前者）：
//!
//! 1. 内置默认值
//! 2. 可选的 YAML 文件（`--config custos.yaml`）
//! 3. `CUSTOS_` 前缀的环境变量（会先读取 `.env`）
//!
//! ```text
//! CUSTOS_DISCORD_TOKEN=...
//! CUSTOS_DATABASE_CHANNEL_ID=1405783830555529389
//! CUSTOS_DEBOUNCE_SECS=5
//! ```

use crate::error::{ConfigError, Result};
use crate::scheduler::SchedulerOptions;
use crate::writer::WriterOptions;
use dotenv::dotenv;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

const ENV_PREFIX: &str = "CUSTOS_";

/// Discord 单条消息上限
pub const DISCORD_MESSAGE_MAX: usize = 2000;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VaultConfig {
    pub discord_token: String,
    /// 作为数据库使用的频道
    pub database_channel_id: u64,
    pub api_base: String,
    /// 单条消息的字符预算（含信封）
    pub message_limit: usize,
    /// 启动时扫描的最近消息条数
    pub history_limit: usize,
    /// 保存请求的合并窗口
    pub debounce_secs: u64,
    /// 两次完成的写入之间的最小间隔
    pub min_interval_secs: u64,
    /// 同一次保存中相邻两条消息的间隔
    pub part_delay_ms: u64,
    /// 写入成功后删除上一次保存的消息
    pub prune_previous: bool,
    /// 每次保存前先发一条人类可读的审计行
    pub announce: bool,
    /// 临时封禁到期扫描周期
    pub expiry_interval_secs: u64,
    pub http_timeout_secs: u64,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            discord_token: String::new(),
            database_channel_id: 0,
            api_base: "https://discord.com/api/v10".to_string(),
            message_limit: 1900,
            history_limit: 50,
            debounce_secs: 5,
            min_interval_secs: 30,
            part_delay_ms: 500,
            prune_previous: false,
            announce: true,
            expiry_interval_secs: 300,
            http_timeout_secs: 15,
        }
    }
}

impl VaultConfig {
    /// 按 默认值 → YAML 文件 → 环境变量 的顺序加载并校验
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv().ok();
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let file = std::fs::File::open(path)
            .map_err(|_| ConfigError::FileNotFound(path.display().to_string()))?;
        let config: VaultConfig = serde_yaml::from_reader(file)?;
        Ok(config)
    }

    /// 用 `CUSTOS_*` 变量覆盖当前值；不认识的变量只告警
    pub fn apply_env<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            let Some(field) = key.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let field = field.to_lowercase();
            match field.as_str() {
                "discord_token" => self.discord_token = value,
                "database_channel_id" => self.database_channel_id = parse_env(&field, &value)?,
                "api_base" => self.api_base = value,
                "message_limit" => self.message_limit = parse_env(&field, &value)?,
                "history_limit" => self.history_limit = parse_env(&field, &value)?,
                "debounce_secs" => self.debounce_secs = parse_env(&field, &value)?,
                "min_interval_secs" => self.min_interval_secs = parse_env(&field, &value)?,
                "part_delay_ms" => self.part_delay_ms = parse_env(&field, &value)?,
                "prune_previous" => self.prune_previous = parse_env(&field, &value)?,
                "announce" => self.announce = parse_env(&field, &value)?,
                "expiry_interval_secs" => self.expiry_interval_secs = parse_env(&field, &value)?,
                "http_timeout_secs" => self.http_timeout_secs = parse_env(&field, &value)?,
                // --config 由 clap 处理
                "config" => {}
                _ => warn!(key = %key, "忽略未知的配置环境变量"),
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.discord_token.trim().is_empty() {
            return Err(ConfigError::MissingField("discord_token".to_string()).into());
        }
        if self.database_channel_id == 0 {
            return Err(ConfigError::MissingField("database_channel_id".to_string()).into());
        }
        if !(200..=DISCORD_MESSAGE_MAX).contains(&self.message_limit) {
            return Err(invalid(
                "message_limit",
                format!("must be within 200..={DISCORD_MESSAGE_MAX}"),
            ));
        }
        if self.history_limit == 0 {
            return Err(invalid("history_limit", "must be positive"));
        }
        if self.expiry_interval_secs == 0 {
            return Err(invalid("expiry_interval_secs", "must be positive"));
        }
        Ok(())
    }

    pub fn writer_options(&self) -> WriterOptions {
        WriterOptions {
            message_limit: self.message_limit,
            part_delay: Duration::from_millis(self.part_delay_ms),
            prune_previous: self.prune_previous,
            announce: self.announce,
        }
    }

    pub fn scheduler_options(&self) -> SchedulerOptions {
        SchedulerOptions {
            debounce: Duration::from_secs(self.debounce_secs),
            min_interval: Duration::from_secs(self.min_interval_secs),
        }
    }

    pub fn expiry_interval(&self) -> Duration {
        Duration::from_secs(self.expiry_interval_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}

fn parse_env<T: std::str::FromStr>(field: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(field, format!("cannot parse `{value}`")))
}

fn invalid(field: &str, message: impl Into<String>) -> crate::error::VaultError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
    .into()
}
