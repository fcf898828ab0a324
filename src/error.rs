use thiserror::Error;

/// custos-vault 的统一错误类型
#[derive(Debug, Error)]
pub enum VaultError {
    /// 频道传输错误
    #[error("Transport Error: {0}")]
    Transport(#[from] TransportError),
    /// 快照解码错误
    #[error("Decode Error: {0}")]
    Decode(#[from] DecodeError),
    /// 分片拼装错误
    #[error("Chunk Error: {0}")]
    Chunk(#[from] ChunkError),
    /// 配置错误
    #[error("Config Error: {0}")]
    Config(#[from] ConfigError),
    /// IO 错误
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
}

/// 频道（Discord REST）相关错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// 网络不可达 / 连接失败 / 频道不存在
    #[error("Channel unreachable: {0}")]
    Unreachable(String),
    /// 触发限流（HTTP 429）
    #[error("Rate limited, retry after {retry_after_ms} ms")]
    RateLimited { retry_after_ms: u64 },
    /// 权限不足（HTTP 401 / 403）
    #[error("Permission denied: {0}")]
    PermissionDenied(String),
    /// 目标不存在（HTTP 404）
    #[error("Not found: {0}")]
    NotFound(String),
    /// 其他非成功状态码
    #[error("API error (status {status}): {message}")]
    Api { status: u16, message: String },
    /// 响应格式无效
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// 快照文档解码错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// 不是合法 JSON
    #[error("Malformed document: {0}")]
    MalformedDocument(String),
    /// 是 JSON，但顶层结构不符合快照格式
    #[error("Invalid shape: {0}")]
    InvalidShape(String),
}

/// 分片切分 / 拼装错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChunkError {
    /// 缺少部分分片
    #[error("Incomplete snapshot: {present} of {total} parts present")]
    Incomplete { present: usize, total: usize },
    /// 分片之间声明的总数不一致（或序号越界）
    #[error("Inconsistent part total: expected {expected}, found {found}")]
    InconsistentTotal { expected: usize, found: usize },
    /// 单条消息上限连信封都放不下
    #[error("Message limit {limit} cannot hold envelope overhead {overhead}")]
    LimitTooSmall { limit: usize, overhead: usize },
}

/// 配置错误
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// 配置文件未找到
    #[error("Config file not found: {0}")]
    FileNotFound(String),
    /// 配置解析失败
    #[error("Failed to parse config: {0}")]
    ParseFailed(String),
    /// 缺少必需的配置项
    #[error("Missing config field: {0}")]
    MissingField(String),
    /// 配置值无效
    #[error("Invalid config value for '{field}': {message}")]
    InvalidValue { field: String, message: String },
}

impl TransportError {
    /// 限流错误：本次保存放弃，等下一轮
    pub fn is_rate_limited(&self) -> bool {
        matches!(self, TransportError::RateLimited { .. })
    }
}

// From 转换实现

impl From<reqwest::Error> for TransportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            TransportError::Unreachable("Request timeout".to_string())
        } else if err.is_connect() {
            TransportError::Unreachable(format!("Connection failed: {}", err))
        } else if err.is_decode() {
            TransportError::InvalidResponse(err.to_string())
        } else {
            TransportError::Unreachable(err.to_string())
        }
    }
}

impl From<reqwest::Error> for VaultError {
    fn from(err: reqwest::Error) -> Self {
        VaultError::Transport(err.into())
    }
}

impl From<serde_json::Error> for DecodeError {
    fn from(err: serde_json::Error) -> Self {
        DecodeError::MalformedDocument(err.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        VaultError::Decode(err.into())
    }
}

impl From<serde_yaml::Error> for VaultError {
    fn from(err: serde_yaml::Error) -> Self {
        VaultError::Config(ConfigError::ParseFailed(err.to_string()))
    }
}

// 便捷的 Result 类型别名
pub type Result<T> = std::result::Result<T, VaultError>;

/// 频道操作的 Result
pub type TransportResult<T> = std::result::Result<T, TransportError>;
