/// 自定义错误类型
///
/// 使用 thiserror 定义精确的错误类型，路由层根据错误种类映射 HTTP 状态码，
/// 隧道层根据错误种类判断是否需要重建 SSH 连接
use http::StatusCode;
use std::io;
use thiserror::Error;

/// HTTP over SSH 的主要错误类型
#[derive(Error, Debug)]
pub enum RelayError {
    /// 无法连接到跳板机
    #[error("Failed to connect to {addr}: {source}")]
    ConnectionFailed {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// 认证失败
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// 跳板机主机密钥校验失败
    #[error("Host key verification failed for {0}")]
    HostKeyRejected(String),

    /// SSH 会话已断开（EOF / 会话关闭）
    #[error("SSH transport closed: {0}")]
    TransportClosed(String),

    /// 跳板机拒绝或无法打开到目标地址的转发通道
    #[error("Forwarding to {address} failed: {reason}")]
    ForwardFailed { address: String, reason: String },

    /// 请求路径格式错误
    #[error("Malformed request path: {0}")]
    MalformedPath(String),

    /// 目标地址格式错误
    #[error("Malformed destination: {0}")]
    MalformedDestination(String),

    /// 超时错误
    #[error("Operation timeout after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// SSH 协议错误
    #[error("SSH error: {0}")]
    Ssh(#[from] russh::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, RelayError>;

impl RelayError {
    /// 创建连接失败错误
    pub fn connection_failed(addr: impl Into<String>, source: io::Error) -> Self {
        Self::ConnectionFailed {
            addr: addr.into(),
            source,
        }
    }

    /// 创建认证失败错误
    pub fn auth_failed(msg: impl Into<String>) -> Self {
        Self::AuthenticationFailed(msg.into())
    }

    /// 创建会话关闭错误
    pub fn transport_closed(msg: impl Into<String>) -> Self {
        Self::TransportClosed(msg.into())
    }

    /// 创建转发失败错误
    pub fn forward_failed(address: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::ForwardFailed {
            address: address.into(),
            reason: reason.into(),
        }
    }

    /// 创建超时错误
    pub fn timeout(duration: std::time::Duration) -> Self {
        Self::Timeout { duration }
    }

    /// 检查错误是否表明 SSH 会话已经失效
    ///
    /// 对应 EOF、会话断开以及底层 I/O 管道断裂的情况
    pub fn is_transport_closed(&self) -> bool {
        match self {
            Self::TransportClosed(_) => true,
            Self::Ssh(err) => ssh_error_is_closed(err),
            _ => false,
        }
    }

    /// 映射到路由层返回给调用方的 HTTP 状态码
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MalformedPath(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Self::MalformedDestination(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::BAD_GATEWAY,
        }
    }
}

fn ssh_error_is_closed(err: &russh::Error) -> bool {
    match err {
        russh::Error::Disconnect | russh::Error::SendError => true,
        russh::Error::IO(io_err) => io_error_is_closed(io_err),
        _ => false,
    }
}

fn io_error_is_closed(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::UnexpectedEof
            | io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_error_creation() {
        let err = RelayError::auth_failed("no key accepted");
        assert!(matches!(err, RelayError::AuthenticationFailed(_)));
        assert_eq!(err.to_string(), "Authentication failed: no key accepted");
    }

    #[test]
    fn test_timeout_error() {
        let err = RelayError::timeout(Duration::from_secs(10));
        assert!(err.to_string().contains("timeout"));
        assert!(!err.is_transport_closed());
    }

    #[test]
    fn test_connection_failed() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        let err = RelayError::connection_failed("jump.example:22", io_err);
        assert!(err.to_string().contains("Failed to connect"));
        assert!(err.to_string().contains("jump.example:22"));
        // 连接被拒绝不代表已有会话失效
        assert!(!err.is_transport_closed());
    }

    #[test]
    fn test_transport_closed_detection() {
        assert!(RelayError::transport_closed("eof").is_transport_closed());
        assert!(RelayError::Ssh(russh::Error::Disconnect).is_transport_closed());
        assert!(
            RelayError::Ssh(russh::Error::IO(io::Error::from(io::ErrorKind::UnexpectedEof)))
                .is_transport_closed()
        );
        assert!(!RelayError::forward_failed("db:5432", "connect refused").is_transport_closed());
        assert!(
            !RelayError::Ssh(russh::Error::IO(io::Error::from(io::ErrorKind::ConnectionRefused)))
                .is_transport_closed()
        );
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            RelayError::MalformedPath("/x".into()).status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            RelayError::MalformedDestination("bad".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            RelayError::forward_failed("db:5432", "refused").status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            RelayError::timeout(Duration::from_secs(1)).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }
}
