use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// 默认 SSH 端口
pub const DEFAULT_SSH_PORT: u16 = 22;

fn default_listen() -> String {
    "[::1]:8080".to_string()
}

fn default_user() -> String {
    "root".to_string()
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_timeout() -> Duration {
    Duration::from_secs(10)
}

fn default_key_dir() -> String {
    "~/.ssh".to_string()
}

fn default_key_files() -> Vec<String> {
    vec!["id_rsa".to_string(), "id_ed25519".to_string()]
}

fn default_metrics() -> bool {
    true
}

/// 中继服务配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayConfig {
    /// HTTP 监听地址
    #[serde(default = "default_listen")]
    pub listen: String,
    /// 请求路径未指定用户名时使用的 SSH 用户
    #[serde(default = "default_user")]
    pub default_user: String,
    /// 请求路径未指定端口时使用的 SSH 端口
    #[serde(default = "default_port")]
    pub default_port: u16,
    /// SSH 连接超时，写法如 "10s"、"1m30s"
    #[serde(default = "default_timeout", with = "humantime_serde")]
    pub timeout: Duration,
    /// 私钥与 known_hosts 所在目录（支持 ~ 展开）
    #[serde(default = "default_key_dir")]
    pub key_dir: String,
    /// 私钥文件名（相对 key_dir），按顺序尝试
    #[serde(default = "default_key_files")]
    pub key_files: Vec<String>,
    /// known_hosts 文件路径（默认 key_dir/known_hosts）
    #[serde(default)]
    pub known_hosts: Option<String>,
    /// 是否提供 /metrics 与 /stats
    #[serde(default = "default_metrics")]
    pub metrics: bool,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            default_user: default_user(),
            default_port: default_port(),
            timeout: default_timeout(),
            key_dir: default_key_dir(),
            key_files: default_key_files(),
            known_hosts: None,
            metrics: default_metrics(),
        }
    }
}

impl RelayConfig {
    /// 从 TOML 文件加载配置
    pub fn load(path: &str) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration file {}", path))?;
        let config = Self::from_toml(&content)?;
        Ok(config)
    }

    /// 从 TOML 文本解析配置
    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let config: RelayConfig =
            toml::from_str(content).context("Failed to parse relay configuration")?;
        config
            .validate()
            .context("Configuration validation failed")?;
        Ok(config)
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.listen.trim().is_empty() {
            bail!("listen address cannot be empty");
        }
        if self.listen.parse::<std::net::SocketAddr>().is_err() {
            bail!("listen address '{}' is not a valid socket address", self.listen);
        }
        if self.default_user.trim().is_empty() {
            bail!("default_user cannot be empty");
        }
        if self.default_port == 0 {
            bail!("default_port cannot be 0");
        }
        if self.timeout.is_zero() {
            bail!("timeout cannot be 0");
        }
        if self.key_files.is_empty() {
            bail!("key_files cannot be empty");
        }
        Ok(())
    }

    pub fn dial_timeout(&self) -> Duration {
        self.timeout
    }

    /// 展开后的密钥目录
    pub fn key_dir_path(&self) -> PathBuf {
        expand_path(&self.key_dir)
    }

    /// 展开后的私钥路径列表
    pub fn key_file_paths(&self) -> Vec<PathBuf> {
        let dir = self.key_dir_path();
        self.key_files
            .iter()
            .map(|name| dir.join(expand_path(name)))
            .collect()
    }

    /// 展开后的 known_hosts 路径
    pub fn known_hosts_path(&self) -> PathBuf {
        match &self.known_hosts {
            Some(path) => expand_path(path),
            None => self.key_dir_path().join("known_hosts"),
        }
    }
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).into_owned())
}
