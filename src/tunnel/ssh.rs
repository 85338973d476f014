//! 基于 russh 的跳板机会话实现

use super::{BoxedStream, SshConnector, SshTransport, TunnelConfig, TunnelIdentity};
use crate::credentials::{AuthMethod, HostKeyCheck};
use crate::error::{RelayError, Result};
use async_trait::async_trait;
use russh::client::{Config, Handle, Handler};
use russh::keys::PrivateKeyWithHashAlg;
use socket2::{SockRef, TcpKeepalive};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, warn};

/// TCP keepalive 首次探测时间
const TCP_KEEPALIVE_TIME: Duration = Duration::from_secs(30);

/// TCP keepalive 探测间隔
const TCP_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// 存活探测等待服务端应答的上限
const PING_TIMEOUT: Duration = Duration::from_secs(5);

/// 通过 TCP + russh 建立到跳板机的会话
pub struct RusshConnector {
    ssh_config: Arc<Config>,
}

impl RusshConnector {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        Self {
            ssh_config: Arc::new(config),
        }
    }

    async fn establish(
        &self,
        identity: &TunnelIdentity,
        config: &TunnelConfig,
    ) -> Result<Arc<dyn SshTransport>> {
        let addr = identity.host_port();
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| RelayError::connection_failed(&addr, e))?;
        apply_keepalive(&stream);

        let handler = TunnelHandler {
            identity: identity.clone(),
            host_key_check: config.host_key_check.clone(),
        };

        let mut handle =
            russh::client::connect_stream(Arc::clone(&self.ssh_config), stream, handler).await?;

        authenticate(&mut handle, identity.username(), &config.auth_methods).await?;

        Ok(Arc::new(RusshTransport { handle }))
    }
}

impl Default for RusshConnector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SshConnector for RusshConnector {
    async fn connect(
        &self,
        identity: &TunnelIdentity,
        config: &TunnelConfig,
    ) -> Result<Arc<dyn SshTransport>> {
        tokio::time::timeout(config.dial_timeout, self.establish(identity, config))
            .await
            .map_err(|_| RelayError::timeout(config.dial_timeout))?
    }
}

/// 依次尝试配置的认证方式，任意一种成功即可
async fn authenticate(
    handle: &mut Handle<TunnelHandler>,
    username: &str,
    methods: &[AuthMethod],
) -> Result<()> {
    for method in methods {
        match method {
            AuthMethod::PrivateKey { path, key } => {
                let hash_alg = handle.best_supported_rsa_hash().await?.flatten();
                let result = handle
                    .authenticate_publickey(
                        username,
                        PrivateKeyWithHashAlg::new(Arc::clone(key), hash_alg),
                    )
                    .await?;

                if result.success() {
                    debug!("Authenticated as {} with {}", username, path.display());
                    return Ok(());
                }
                debug!("Key {} rejected for {}", path.display(), username);
            }
        }
    }

    Err(RelayError::auth_failed(format!(
        "no accepted key for user '{}'",
        username
    )))
}

/// russh 客户端回调，负责主机密钥校验
struct TunnelHandler {
    identity: TunnelIdentity,
    host_key_check: HostKeyCheck,
}

impl Handler for TunnelHandler {
    type Error = RelayError;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        match &self.host_key_check {
            HostKeyCheck::AcceptAny => Ok(true),
            HostKeyCheck::KnownHostsFile(path) => {
                let known = russh::keys::check_known_hosts_path(
                    self.identity.host(),
                    self.identity.port(),
                    server_public_key,
                    path,
                )
                .map_err(|e| {
                    warn!("Host key check for {} failed: {}", self.identity, e);
                    RelayError::HostKeyRejected(self.identity.host_port())
                })?;

                if known {
                    Ok(true)
                } else {
                    Err(RelayError::HostKeyRejected(self.identity.host_port()))
                }
            }
        }
    }
}

/// 已认证的 russh 会话
struct RusshTransport {
    handle: Handle<TunnelHandler>,
}

#[async_trait]
impl SshTransport for RusshTransport {
    async fn open_stream(&self, host: &str, port: u16) -> Result<BoxedStream> {
        if self.handle.is_closed() {
            return Err(RelayError::transport_closed("session closed"));
        }

        match self
            .handle
            .channel_open_direct_tcpip(host, u32::from(port), "127.0.0.1", 0)
            .await
        {
            Ok(channel) => Ok(Box::pin(channel.into_stream())),
            Err(russh::Error::ChannelOpenFailure(reason)) => Err(RelayError::forward_failed(
                super::join_host_port(host, port),
                format!("{:?}", reason),
            )),
            Err(e) => Err(e.into()),
        }
    }

    async fn is_alive(&self) -> bool {
        if self.handle.is_closed() {
            return false;
        }
        // send_ping 等待服务端应答；应答通道被丢弃时也返回 Ok，所以再查一次 is_closed
        probe_replied(self.handle.send_ping(), PING_TIMEOUT).await && !self.handle.is_closed()
    }

    async fn close(&self) {
        if let Err(e) = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "English")
            .await
        {
            debug!("Error while closing SSH session: {}", e);
        }
    }
}

/// 在 `limit` 内收到应答才算存活
async fn probe_replied<F, E>(probe: F, limit: Duration) -> bool
where
    F: std::future::Future<Output = std::result::Result<(), E>>,
    E: std::fmt::Display,
{
    match tokio::time::timeout(limit, probe).await {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            debug!("Liveness probe failed: {}", e);
            false
        }
        Err(_) => {
            debug!("Liveness probe got no reply within {:?}", limit);
            false
        }
    }
}

/// 为 TCP 连接开启 keepalive 探测
pub(crate) fn apply_keepalive(stream: &TcpStream) {
    let keepalive = TcpKeepalive::new()
        .with_time(TCP_KEEPALIVE_TIME)
        .with_interval(TCP_KEEPALIVE_INTERVAL);

    let sock_ref = SockRef::from(stream);
    if let Err(e) = sock_ref.set_tcp_keepalive(&keepalive) {
        warn!("Failed to set TCP keepalive: {}", e);
    }
}
