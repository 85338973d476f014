mod router;
mod stats;

pub use router::{Route, Router};
pub use stats::StatsReport;

use crate::config::RelayConfig;
use crate::tunnel::{apply_keepalive, TunnelRegistry};
use anyhow::{Context, Result};
use bytes::Bytes;
use http::{Method, Request, Response};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Body;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{debug, error, info};

/// 中继返回给调用方的响应体
pub type ResponseBody = UnsyncBoxBody<Bytes, hyper::Error>;

/// 用固定内容构造响应体
pub fn full_body(data: impl Into<Bytes>) -> ResponseBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed_unsync()
}

/// HTTP 入口：统计端点 + 请求路由
pub struct Relay {
    router: Router,
    metrics_enabled: bool,
}

impl Relay {
    pub fn new(router: Router, metrics_enabled: bool) -> Self {
        Self {
            router,
            metrics_enabled,
        }
    }

    /// 按配置构造
    pub fn from_config(config: &RelayConfig, registry: Arc<TunnelRegistry>) -> Self {
        let router = Router::new(registry, config.default_user.clone(), config.default_port);
        Self::new(router, config.metrics)
    }

    pub fn registry(&self) -> &Arc<TunnelRegistry> {
        self.router.registry()
    }

    /// 处理单个请求
    pub async fn serve<B>(&self, req: Request<B>) -> Response<ResponseBody>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        if self.metrics_enabled && *req.method() == Method::GET {
            match req.uri().path() {
                "/metrics" => return stats::metrics_response(self.registry()),
                "/stats" => return stats::stats_response(self.registry()),
                _ => {}
            }
        }

        self.router.handle(req).await
    }
}

/// 运行 HTTP 服务器，直到 `shutdown` 完成
pub async fn run_server<F>(listener: TcpListener, relay: Arc<Relay>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let local_addr = listener
        .local_addr()
        .context("Failed to get listener address")?;
    info!("Listening on http://{}", local_addr);

    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let relay = Arc::clone(&relay);
                    tokio::spawn(async move {
                        serve_connection(stream, addr, relay).await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            },
            _ = &mut shutdown => {
                info!("Shutting down listener on {}", local_addr);
                break;
            }
        }
    }

    Ok(())
}

/// 绑定配置中的监听地址并运行服务器
pub async fn bind_and_serve<F>(config: &RelayConfig, relay: Arc<Relay>, shutdown: F) -> Result<()>
where
    F: Future<Output = ()>,
{
    let listener = TcpListener::bind(&config.listen)
        .await
        .with_context(|| format!("Failed to bind {}", config.listen))?;
    run_server(listener, relay, shutdown).await
}

async fn serve_connection(stream: tokio::net::TcpStream, addr: SocketAddr, relay: Arc<Relay>) {
    if let Err(e) = stream.set_nodelay(true) {
        debug!("Failed to set TCP_NODELAY for {}: {}", addr, e);
    }
    apply_keepalive(&stream);

    let service = service_fn(move |req| {
        let relay = Arc::clone(&relay);
        async move { Ok::<_, Infallible>(relay.serve(req).await) }
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .await
    {
        debug!("Connection from {} ended with error: {}", addr, e);
    }
}
