use super::{SshConnector, TunnelConfig, TunnelConnection, TunnelIdentity};
use crate::stats::TunnelMetrics;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

/// 隧道连接注册表
///
/// 维护 TunnelIdentity -> TunnelConnection 的映射，每个身份只插入一次，
/// 条目在进程生命周期内不会被移除
pub struct TunnelRegistry {
    tunnels: RwLock<HashMap<TunnelIdentity, Arc<TunnelConnection>>>,
    config: Arc<TunnelConfig>,
    connector: Arc<dyn SshConnector>,
    metrics: Arc<TunnelMetrics>,
}

impl TunnelRegistry {
    /// 创建新的注册表
    pub fn new(
        config: TunnelConfig,
        connector: Arc<dyn SshConnector>,
        metrics: Arc<TunnelMetrics>,
    ) -> Self {
        Self {
            tunnels: RwLock::new(HashMap::new()),
            config: Arc::new(config),
            connector,
            metrics,
        }
    }

    /// 获取或创建指定身份的隧道连接
    ///
    /// 只创建空的连接对象，SSH 会话在首次 dial 时才建立
    pub fn get_or_create(&self, identity: &TunnelIdentity) -> Arc<TunnelConnection> {
        if let Some(conn) = self.tunnels.read().get(identity) {
            return Arc::clone(conn);
        }

        let mut tunnels = self.tunnels.write();
        let conn = tunnels.entry(identity.clone()).or_insert_with(|| {
            debug!("Registering tunnel for {}", identity);
            Arc::new(TunnelConnection::new(
                identity.clone(),
                Arc::clone(&self.config),
                Arc::clone(&self.connector),
                Arc::clone(&self.metrics),
            ))
        });
        let conn = Arc::clone(conn);
        self.metrics.set_tunnels(tunnels.len());
        conn
    }

    /// 已注册的隧道数量
    pub fn len(&self) -> usize {
        self.tunnels.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tunnels.read().is_empty()
    }

    /// 已注册的全部身份
    pub fn identities(&self) -> Vec<TunnelIdentity> {
        self.tunnels.read().keys().cloned().collect()
    }

    pub fn metrics(&self) -> &Arc<TunnelMetrics> {
        &self.metrics
    }
}
