/// HTTP over SSH 库入口
///
/// 将核心模块导出为库，方便测试和复用
pub mod cli;
pub mod config;
pub mod credentials;
pub mod error;
pub mod server;
pub mod stats;
pub mod tunnel;

// 重新导出常用类型
pub use config::RelayConfig;
pub use error::{RelayError, Result};
pub use server::{Relay, Router};
pub use stats::{MetricsSnapshot, TunnelMetrics};
pub use tunnel::{TunnelConnection, TunnelIdentity, TunnelRegistry};
