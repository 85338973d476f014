/// SSH 凭据加载
///
/// 启动时从密钥目录读取私钥并确定跳板机主机密钥的校验策略，
/// 结果组装为只读的 TunnelConfig 交给隧道层使用
use crate::config::RelayConfig;
use crate::tunnel::TunnelConfig;
use anyhow::{bail, Result};
use russh::keys::PrivateKey;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

/// 认证方式
#[derive(Clone)]
pub enum AuthMethod {
    /// 已解码的私钥
    PrivateKey { path: PathBuf, key: Arc<PrivateKey> },
}

impl AuthMethod {
    pub fn with_key(path: impl Into<PathBuf>, key: PrivateKey) -> Self {
        Self::PrivateKey {
            path: path.into(),
            key: Arc::new(key),
        }
    }
}

impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PrivateKey { path, .. } => f.debug_tuple("PrivateKey").field(path).finish(),
        }
    }
}

/// 跳板机主机密钥校验策略
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostKeyCheck {
    /// 使用 known_hosts 文件校验，未知主机一律拒绝
    KnownHostsFile(PathBuf),
    /// 接受任意主机密钥（仅用于测试）
    AcceptAny,
}

/// 加载全部可读的私钥，不存在或无法解析的文件会被跳过
pub fn load_private_keys(paths: &[PathBuf]) -> Vec<AuthMethod> {
    let mut methods = Vec::new();

    for path in paths {
        if !path.exists() {
            continue;
        }

        match russh::keys::load_secret_key(path, None) {
            Ok(key) => {
                info!("Loaded SSH key {}", path.display());
                methods.push(AuthMethod::with_key(path, key));
            }
            Err(e) => {
                warn!("Failed to load SSH key {}: {}", path.display(), e);
            }
        }
    }

    methods
}

/// 根据应用配置构建隧道参数
pub fn build_tunnel_config(config: &RelayConfig) -> Result<TunnelConfig> {
    let key_files = config.key_file_paths();
    let auth_methods = load_private_keys(&key_files);
    if auth_methods.is_empty() {
        bail!(
            "No SSH keys found (tried: {})",
            key_files
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        );
    }

    let known_hosts = config.known_hosts_path();
    ensure_readable(&known_hosts)?;

    Ok(TunnelConfig::new(
        config.dial_timeout(),
        auth_methods,
        HostKeyCheck::KnownHostsFile(known_hosts),
    ))
}

fn ensure_readable(path: &Path) -> Result<()> {
    if let Err(e) = std::fs::metadata(path) {
        bail!("Cannot read known_hosts file {}: {}", path.display(), e);
    }
    Ok(())
}
