use super::{full_body, ResponseBody};
use crate::error::{RelayError, Result};
use crate::tunnel::{parse_destination, TunnelIdentity, TunnelRegistry};
use bytes::Bytes;
use http::header::{self, HeaderMap, HeaderName, HeaderValue};
use http::uri::{Authority, PathAndQuery};
use http::{Request, Response, Uri};
use http_body_util::BodyExt;
use hyper::body::Body;
use hyper_util::rt::TokioIo;
use std::sync::Arc;
use tracing::{debug, warn};

/// 逐跳头部，不转发给目标
const HOP_BY_HOP_HEADERS: &[HeaderName] = &[
    header::CONNECTION,
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::TRANSFER_ENCODING,
    header::UPGRADE,
];

/// 从请求路径解析出的转发路由
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    /// 跳板机身份
    pub identity: TunnelIdentity,
    /// 目标 `host:port`
    pub destination: String,
    /// 转发给目标的路径与查询串（路由用的前两段已去除）
    pub path_and_query: PathAndQuery,
}

impl Route {
    /// 解析 `/<jump-host-spec>/<destination-host-port>[/rest][?query]`
    pub fn parse(uri: &Uri, default_user: &str, default_port: u16) -> Result<Self> {
        let path = uri.path();
        let trimmed = path.strip_prefix('/').unwrap_or(path);

        let mut parts = trimmed.splitn(3, '/');
        let jump = parts.next().unwrap_or_default();
        let destination = parts.next().unwrap_or_default();
        let rest = parts.next();

        if jump.is_empty() || destination.is_empty() {
            return Err(RelayError::MalformedPath(format!(
                "expected /<jump-host>/<destination>, got '{}'",
                path
            )));
        }

        let identity = TunnelIdentity::parse(jump, default_user, default_port)?;

        destination
            .parse::<Authority>()
            .map_err(|e| RelayError::MalformedDestination(format!("'{}': {}", destination, e)))?;
        parse_destination(destination)?;

        let mut forwarded = format!("/{}", rest.unwrap_or_default());
        if let Some(query) = uri.query() {
            forwarded.push('?');
            forwarded.push_str(query);
        }
        let path_and_query = forwarded
            .parse::<PathAndQuery>()
            .map_err(|e| RelayError::MalformedDestination(e.to_string()))?;

        Ok(Self {
            identity,
            destination: destination.to_string(),
            path_and_query,
        })
    }

    /// 完整的目标 URL
    pub fn target(&self) -> String {
        format!("http://{}{}", self.destination, self.path_and_query)
    }
}

/// 请求路由器
///
/// 将入站请求经由注册表中的隧道转发到目标，并原样回传响应
pub struct Router {
    registry: Arc<TunnelRegistry>,
    default_user: String,
    default_port: u16,
}

impl Router {
    pub fn new(registry: Arc<TunnelRegistry>, default_user: impl Into<String>, default_port: u16) -> Self {
        Self {
            registry,
            default_user: default_user.into(),
            default_port,
        }
    }

    pub fn registry(&self) -> &Arc<TunnelRegistry> {
        &self.registry
    }

    /// 处理单个入站请求，任何错误都转换为对应状态码的响应
    pub async fn handle<B>(&self, req: Request<B>) -> Response<ResponseBody>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let method = req.method().clone();
        let uri = req.uri().clone();

        match self.forward(req).await {
            Ok(response) => {
                debug!("{} {} -> {}", method, uri, response.status());
                response
            }
            Err(e) => {
                warn!("{} {} failed: {}", method, uri, e);
                error_response(&e)
            }
        }
    }

    async fn forward<B>(&self, req: Request<B>) -> Result<Response<ResponseBody>>
    where
        B: Body + Send + 'static,
        B::Data: Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let route = Route::parse(req.uri(), &self.default_user, self.default_port)?;
        let outbound = build_outbound(&route, req)?;

        let tunnel = self.registry.get_or_create(&route.identity);
        debug!("Forwarding {} via {}", route.target(), route.identity);

        let stream = tunnel.dial(&route.destination).await?;

        let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(stream))
            .await
            .map_err(|e| RelayError::forward_failed(&route.destination, e.to_string()))?;

        let destination = route.destination.clone();
        tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!("Connection to {} closed with error: {}", destination, e);
            }
        });

        let response = sender
            .send_request(outbound)
            .await
            .map_err(|e| RelayError::forward_failed(&route.destination, e.to_string()))?;

        let (parts, body) = response.into_parts();
        Ok(Response::from_parts(parts, body.boxed_unsync()))
    }
}

/// 构造发往目标的请求：沿用方法、头部与请求体，Host 指向目标地址
fn build_outbound<B>(route: &Route, req: Request<B>) -> Result<Request<B>> {
    let (parts, body) = req.into_parts();

    let host = HeaderValue::from_str(&route.destination)
        .map_err(|e| RelayError::MalformedDestination(e.to_string()))?;

    let mut headers = HeaderMap::with_capacity(parts.headers.len());
    for (name, value) in parts.headers.iter() {
        if *name == header::HOST || HOP_BY_HOP_HEADERS.contains(name) || name.as_str() == "keep-alive" {
            continue;
        }
        headers.append(name.clone(), value.clone());
    }
    headers.insert(header::HOST, host);

    let mut outbound = Request::new(body);
    *outbound.method_mut() = parts.method;
    *outbound.uri_mut() = Uri::from(route.path_and_query.clone());
    *outbound.headers_mut() = headers;
    Ok(outbound)
}

fn error_response(err: &RelayError) -> Response<ResponseBody> {
    let mut response = Response::new(full_body(Bytes::from(format!("{}\n", err))));
    *response.status_mut() = err.status_code();
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}
