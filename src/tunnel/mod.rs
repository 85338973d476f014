// SSH 隧道管理模块

mod connection;
mod identity;
mod registry;
mod ssh;

pub use connection::TunnelConnection;
pub use identity::{
    join_host_port, parse_destination, split_host_port, TunnelIdentity, DEFAULT_HTTP_PORT,
};
pub use registry::TunnelRegistry;
pub use ssh::RusshConnector;

pub(crate) use ssh::apply_keepalive;

use crate::credentials::{AuthMethod, HostKeyCheck};
use crate::error::Result;
use async_trait::async_trait;
use std::fmt;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};

/// 通过隧道打开的字节流
///
/// 统一封装 SSH direct-tcpip 通道以及测试中使用的替身连接
pub trait TunnelStream: AsyncRead + AsyncWrite + Send + 'static {}

// 为所有满足条件的类型自动实现 TunnelStream
impl<T> TunnelStream for T where T: AsyncRead + AsyncWrite + Send + 'static {}

pub type BoxedStream = Pin<Box<dyn TunnelStream>>;

/// 已建立的 SSH 会话
#[async_trait]
pub trait SshTransport: Send + Sync {
    /// 请求跳板机连接 `host:port` 并返回转发流
    async fn open_stream(&self, host: &str, port: u16) -> Result<BoxedStream>;

    /// 发送 keepalive 请求探测会话是否可用
    async fn is_alive(&self) -> bool;

    /// 关闭会话
    async fn close(&self);
}

/// SSH 会话的建立方式
#[async_trait]
pub trait SshConnector: Send + Sync {
    /// 按配置连接并认证到跳板机
    async fn connect(
        &self,
        identity: &TunnelIdentity,
        config: &TunnelConfig,
    ) -> Result<Arc<dyn SshTransport>>;
}

/// 隧道连接参数，启动时构建一次，之后只读
#[derive(Clone)]
pub struct TunnelConfig {
    /// 建立 SSH 连接（含握手与认证）的超时
    pub dial_timeout: Duration,
    /// 按顺序尝试的认证方式
    pub auth_methods: Vec<AuthMethod>,
    /// 跳板机主机密钥校验策略
    pub host_key_check: HostKeyCheck,
}

impl TunnelConfig {
    pub fn new(dial_timeout: Duration, auth_methods: Vec<AuthMethod>, host_key_check: HostKeyCheck) -> Self {
        Self {
            dial_timeout,
            auth_methods,
            host_key_check,
        }
    }
}

impl fmt::Debug for TunnelConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TunnelConfig")
            .field("dial_timeout", &self.dial_timeout)
            .field("auth_methods", &self.auth_methods.len())
            .field("host_key_check", &self.host_key_check)
            .finish()
    }
}
