use crate::error::{RelayError, Result};
use std::fmt;

/// 跳板机身份（主机、端口、用户名）
///
/// 作为连接注册表的键，结构相等的身份总是共用同一条 SSH 隧道
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TunnelIdentity {
    host: String,
    port: u16,
    username: String,
}

impl TunnelIdentity {
    pub fn new(host: impl Into<String>, port: u16, username: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            port,
            username: username.into(),
        }
    }

    /// 解析 `[user@]host[:port]` 形式的跳板机描述
    ///
    /// 缺省的用户名和端口分别使用 `default_user` 与 `default_port`，
    /// IPv6 地址需要使用方括号，例如 `admin@[fe80::1]:2222`
    pub fn parse(spec: &str, default_user: &str, default_port: u16) -> Result<Self> {
        let invalid = |reason: &str| {
            RelayError::MalformedPath(format!("invalid jump host '{}': {}", spec, reason))
        };

        let (username, host_port) = match spec.rsplit_once('@') {
            Some((user, rest)) => {
                if user.is_empty() {
                    return Err(invalid("empty username"));
                }
                (user, rest)
            }
            None => (default_user, spec),
        };

        let (host, port) = split_host_port(host_port).ok_or_else(|| invalid("bad host"))?;
        if host.is_empty() {
            return Err(invalid("empty host"));
        }

        let port = match port {
            Some(p) => p
                .parse::<u16>()
                .ok()
                .filter(|p| *p != 0)
                .ok_or_else(|| invalid("bad port"))?,
            None => default_port,
        };

        Ok(Self::new(host, port, username))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// 返回 `host:port`，IPv6 主机带方括号
    pub fn host_port(&self) -> String {
        join_host_port(&self.host, self.port)
    }
}

impl fmt::Display for TunnelIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.username.is_empty() {
            write!(f, "{}", self.host_port())
        } else {
            write!(f, "{}@{}", self.username, self.host_port())
        }
    }
}

/// 拼接主机和端口
pub fn join_host_port(host: &str, port: u16) -> String {
    if host.contains(':') {
        format!("[{}]:{}", host, port)
    } else {
        format!("{}:{}", host, port)
    }
}

/// 拆分 `host[:port]`，端口部分原样返回
///
/// 不带方括号且含多个冒号的输入视为裸 IPv6 地址（无端口）
pub fn split_host_port(input: &str) -> Option<(&str, Option<&str>)> {
    if let Some(rest) = input.strip_prefix('[') {
        let (host, tail) = rest.split_once(']')?;
        return match tail {
            "" => Some((host, None)),
            _ => tail.strip_prefix(':').map(|port| (host, Some(port))),
        };
    }

    match input.matches(':').count() {
        0 => Some((input, None)),
        1 => input
            .split_once(':')
            .map(|(host, port)| (host, Some(port))),
        _ => Some((input, None)),
    }
}

/// 目标地址省略端口时使用的 HTTP 端口
pub const DEFAULT_HTTP_PORT: u16 = 80;

/// 解析转发目标 `host[:port]`，省略端口时为 80
pub fn parse_destination(address: &str) -> Result<(String, u16)> {
    let invalid = || RelayError::MalformedDestination(format!("invalid address '{}'", address));

    match split_host_port(address) {
        Some((host, port)) if !host.is_empty() => {
            let port = match port {
                Some(port) => port.parse::<u16>().map_err(|_| invalid())?,
                None => DEFAULT_HTTP_PORT,
            };
            Ok((host.to_string(), port))
        }
        _ => Err(invalid()),
    }
}
