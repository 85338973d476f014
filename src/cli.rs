use crate::config::RelayConfig;
use clap::builder::BoolishValueParser;
use clap::{Args, Parser, Subcommand};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "http-over-ssh")]
#[command(author, version, about = "HTTP relay through persistent SSH tunnels", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// 日志级别 (trace, debug, info, warn, error)，RUST_LOG 优先
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// 运行中继服务
    Serve(ServeArgs),
    /// 检查配置文件格式是否正确
    Check {
        /// 配置文件路径
        #[arg(short, long)]
        config: String,
    },
}

/// 运行参数，命令行与环境变量覆盖配置文件
#[derive(Args, Debug, Default)]
pub struct ServeArgs {
    /// 配置文件路径（可选）
    #[arg(short, long)]
    pub config: Option<String>,

    /// HTTP 监听地址
    #[arg(long, env = "HOS_LISTEN")]
    pub listen: Option<String>,

    /// 默认 SSH 用户名
    #[arg(long, env = "HOS_USER")]
    pub user: Option<String>,

    /// SSH 连接超时，如 "10s"、"1m30s"；不带单位时按秒计
    #[arg(long, env = "HOS_TIMEOUT", value_parser = parse_timeout)]
    pub timeout: Option<Duration>,

    /// 私钥与 known_hosts 所在目录
    #[arg(long, env = "HOS_KEY_DIR")]
    pub key_dir: Option<String>,

    /// 是否启用 /metrics 与 /stats（接受 true/false、1/0、yes/no、on/off）
    #[arg(long, env = "HOS_METRICS", value_parser = BoolishValueParser::new())]
    pub metrics: Option<bool>,
}

impl ServeArgs {
    /// 加载配置文件（如有）并应用覆盖项
    pub fn resolve(&self) -> anyhow::Result<RelayConfig> {
        let mut config = match &self.config {
            Some(path) => RelayConfig::load(path)?,
            None => RelayConfig::default(),
        };
        self.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    fn apply(&self, config: &mut RelayConfig) {
        if let Some(listen) = &self.listen {
            config.listen = listen.clone();
        }
        if let Some(user) = &self.user {
            config.default_user = user.clone();
        }
        if let Some(timeout) = self.timeout {
            config.timeout = timeout;
        }
        if let Some(key_dir) = &self.key_dir {
            config.key_dir = key_dir.clone();
        }
        if let Some(metrics) = self.metrics {
            config.metrics = metrics;
        }
    }
}

fn parse_timeout(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if let Ok(secs) = value.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(value).map_err(|e| format!("invalid duration '{}': {}", value, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_serve_flags() {
        let cli = Cli::parse_from([
            "http-over-ssh",
            "serve",
            "--listen",
            "127.0.0.1:9090",
            "--user",
            "deploy",
            "--timeout",
            "3s",
            "--metrics",
            "false",
        ]);

        let Commands::Serve(args) = cli.command else {
            panic!("expected serve command");
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.listen, "127.0.0.1:9090");
        assert_eq!(config.default_user, "deploy");
        assert_eq!(config.timeout, Duration::from_secs(3));
        assert!(!config.metrics);
    }

    #[test]
    fn test_overrides_are_validated() {
        let args = ServeArgs {
            timeout: Some(Duration::ZERO),
            ..ServeArgs::default()
        };
        assert!(args.resolve().is_err());
    }

    #[test]
    fn test_metrics_flag_accepts_numeric_switch() {
        for (value, expected) in [("0", false), ("1", true), ("off", false), ("true", true)] {
            let cli = Cli::try_parse_from(["http-over-ssh", "serve", "--metrics", value]).unwrap();
            let Commands::Serve(args) = cli.command else {
                panic!("expected serve command");
            };
            assert_eq!(args.metrics, Some(expected), "value {}", value);
        }
    }

    #[test]
    fn test_timeout_formats() {
        assert_eq!(parse_timeout("10").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_timeout("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_timeout("1m30s").unwrap(), Duration::from_secs(90));
        assert_eq!(parse_timeout("500ms").unwrap(), Duration::from_millis(500));
        assert!(parse_timeout("soon").is_err());

        let cli = Cli::try_parse_from(["http-over-ssh", "serve", "--timeout", "2m"]).unwrap();
        let Commands::Serve(args) = cli.command else {
            panic!("expected serve command");
        };
        assert_eq!(args.timeout, Some(Duration::from_secs(120)));
    }

    #[test]
    fn test_check_requires_config() {
        assert!(Cli::try_parse_from(["http-over-ssh", "check"]).is_err());
    }
}
