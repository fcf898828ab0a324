//! 测试基础设施
//!
//! 提供在不连接 Discord 的情况下测试 custos-vault 各组件的工具集。
//!
//! | 类型 | 用途 |
//! |------|------|
//! | [`MockChannel`] | 替代真实频道，用于测试写入、扫描、重建与调度 |
//! | [`MockUnbanner`] | 替代 Discord 解封接口，用于测试到期扫描 |
//!
//! # 设计原则
//!
//! - **零网络请求**：所有 Mock 都完全在内存中运行
//! - **可注入故障**：`fail_posts_after()` / `with_history_error()` / `with_outcome()`
//! - **可观测**：通过 `post_count()` / `posts()` / `calls()` 等方法检查调用情况
//!
//! # 使用示例
//!
//! ```rust
//! use custos_vault::reconstructor;
//! use custos_vault::testing::MockChannel;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let channel = MockChannel::new(1000);
//! let loaded = reconstructor::load(&channel, 50).await;
//! assert!(loaded.state.is_empty());
//! # }
//! ```

mod mock_channel;
mod mock_unbanner;

pub use mock_channel::MockChannel;
pub use mock_unbanner::MockUnbanner;
