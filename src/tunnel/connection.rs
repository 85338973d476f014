use super::identity::parse_destination;
use super::{BoxedStream, SshConnector, SshTransport, TunnelConfig, TunnelIdentity};
use crate::error::Result;
use crate::stats::TunnelMetrics;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// 到单个跳板机身份的持久 SSH 隧道
///
/// 会话在首次 `dial` 时建立；发现会话失效后，同一次 `dial` 内最多重建一次。
/// 互斥锁覆盖整个 `dial` 过程，同一身份上的转发请求严格串行。
pub struct TunnelConnection {
    identity: TunnelIdentity,
    config: Arc<TunnelConfig>,
    connector: Arc<dyn SshConnector>,
    metrics: Arc<TunnelMetrics>,
    transport: Mutex<Option<Arc<dyn SshTransport>>>,
}

impl TunnelConnection {
    pub fn new(
        identity: TunnelIdentity,
        config: Arc<TunnelConfig>,
        connector: Arc<dyn SshConnector>,
        metrics: Arc<TunnelMetrics>,
    ) -> Self {
        Self {
            identity,
            config,
            connector,
            metrics,
            transport: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> &TunnelIdentity {
        &self.identity
    }

    /// 当前是否持有 SSH 会话
    pub async fn is_connected(&self) -> bool {
        self.transport.lock().await.is_some()
    }

    /// 通过隧道连接到 `address`（`host:port`）
    pub async fn dial(&self, address: &str) -> Result<BoxedStream> {
        let result = match parse_destination(address) {
            Ok((host, port)) => {
                let mut slot = self.transport.lock().await;
                self.dial_locked(&mut slot, &host, port).await
            }
            Err(e) => Err(e),
        };

        self.metrics.record_forwarding(result.is_ok());
        result
    }

    /// 持锁执行：至多两轮（首次尝试 + 一次重连）
    async fn dial_locked(
        &self,
        slot: &mut Option<Arc<dyn SshTransport>>,
        host: &str,
        port: u16,
    ) -> Result<BoxedStream> {
        let mut retried = false;

        loop {
            let (transport, fresh) = match slot.as_ref() {
                Some(transport) => (Arc::clone(transport), false),
                None => {
                    let transport = self.connect().await?;
                    *slot = Some(Arc::clone(&transport));
                    (transport, true)
                }
            };

            debug!("Forwarding via {} to {}:{}", self.identity, host, port);

            let err = match transport.open_stream(host, port).await {
                Ok(stream) => return Ok(stream),
                Err(e) => e,
            };

            let dead = err.is_transport_closed() || !transport.is_alive().await;
            if dead {
                warn!(
                    "SSH connection to {} is broken ({}), discarding it",
                    self.identity, err
                );
                transport.close().await;
                *slot = None;

                // 刚建立的会话失败不重试，避免对不可达的跳板机反复重连
                if !retried && !fresh {
                    retried = true;
                    continue;
                }
            }

            return Err(err);
        }
    }

    async fn connect(&self) -> Result<Arc<dyn SshTransport>> {
        info!("Establishing SSH connection to {}", self.identity);

        match self.connector.connect(&self.identity, &self.config).await {
            Ok(transport) => {
                self.metrics.record_connection(true);
                info!("SSH connection to {} established", self.identity);
                Ok(transport)
            }
            Err(e) => {
                self.metrics.record_connection(false);
                warn!("SSH connection to {} failed: {}", self.identity, e);
                Err(e)
            }
        }
    }
}
