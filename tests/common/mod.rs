/// Common utilities for integration tests
use async_trait::async_trait;
use bytes::Bytes;
use http_body_util::{BodyExt, Full, StreamBody};
use http_over_ssh::credentials::HostKeyCheck;
use http_over_ssh::error::{RelayError, Result};
use http_over_ssh::server::{run_server, Relay, Router};
use http_over_ssh::stats::TunnelMetrics;
use http_over_ssh::tunnel::{
    join_host_port, BoxedStream, SshConnector, SshTransport, TunnelConfig, TunnelIdentity,
    TunnelRegistry,
};
use hyper::body::{Frame, Incoming};
use hyper::service::service_fn;
use hyper::{Request, Response};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener as TokioTcpListener, TcpStream};
use tokio::sync::{oneshot, Notify};

/// Find an available port
pub fn get_available_port() -> u16 {
    TcpListener::bind("127.0.0.1:0")
        .expect("Failed to bind to random port")
        .local_addr()
        .expect("Failed to get local addr")
        .port()
}

/// Stand-in for an SSH session: forwards by dialing local TCP directly
pub struct LocalTransport {
    killed: AtomicBool,
}

impl LocalTransport {
    /// Simulate the jump host silently dropping the session
    pub fn kill(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SshTransport for LocalTransport {
    async fn open_stream(&self, host: &str, port: u16) -> Result<BoxedStream> {
        if self.killed.load(Ordering::SeqCst) {
            return Err(RelayError::transport_closed("EOF"));
        }

        let stream = TcpStream::connect((host, port))
            .await
            .map_err(|e| RelayError::forward_failed(join_host_port(host, port), e.to_string()))?;
        Ok(Box::pin(stream))
    }

    async fn is_alive(&self) -> bool {
        !self.killed.load(Ordering::SeqCst)
    }

    async fn close(&self) {
        self.killed.store(true, Ordering::SeqCst);
    }
}

/// Connector handing out `LocalTransport`s and recording every attempt
#[derive(Default)]
pub struct LocalConnector {
    pub connects: AtomicUsize,
    pub refuse: AtomicBool,
    transports: parking_lot::Mutex<Vec<Arc<LocalTransport>>>,
}

impl LocalConnector {
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Most recently established transport
    pub fn last_transport(&self) -> Option<Arc<LocalTransport>> {
        self.transports.lock().last().cloned()
    }
}

#[async_trait]
impl SshConnector for LocalConnector {
    async fn connect(
        &self,
        identity: &TunnelIdentity,
        _config: &TunnelConfig,
    ) -> Result<Arc<dyn SshTransport>> {
        self.connects.fetch_add(1, Ordering::SeqCst);

        // Widen the window for racing dials
        tokio::time::sleep(Duration::from_millis(20)).await;

        if self.refuse.load(Ordering::SeqCst) {
            return Err(RelayError::connection_failed(
                identity.host_port(),
                std::io::Error::from(std::io::ErrorKind::ConnectionRefused),
            ));
        }

        let transport = Arc::new(LocalTransport {
            killed: AtomicBool::new(false),
        });
        self.transports.lock().push(transport.clone());
        Ok(transport)
    }
}

/// A relay running on a random local port
pub struct TestRelay {
    pub addr: SocketAddr,
    pub registry: Arc<TunnelRegistry>,
    pub connector: Arc<LocalConnector>,
    pub metrics: Arc<TunnelMetrics>,
    shutdown: Option<oneshot::Sender<()>>,
}

impl TestRelay {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }
}

impl Drop for TestRelay {
    fn drop(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

/// Start a relay backed by a `LocalConnector`
pub async fn start_relay() -> TestRelay {
    let connector = Arc::new(LocalConnector::default());
    let metrics = Arc::new(TunnelMetrics::new().expect("Failed to create metrics"));
    let registry = Arc::new(TunnelRegistry::new(
        TunnelConfig::new(Duration::from_secs(5), Vec::new(), HostKeyCheck::AcceptAny),
        connector.clone(),
        metrics.clone(),
    ));

    let relay = Arc::new(Relay::new(Router::new(registry.clone(), "root", 22), true));
    let listener = TokioTcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind relay");
    let addr = listener.local_addr().expect("Failed to get relay addr");

    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(async move {
        run_server(listener, relay, async {
            let _ = rx.await;
        })
        .await
        .ok();
    });

    TestRelay {
        addr,
        registry,
        connector,
        metrics,
        shutdown: Some(tx),
    }
}

/// Origin server: answers 203 with repeated headers and echoes the request
///
/// Body format: `<METHOD> <path?query> host=<host>\n<request body>`
pub async fn start_origin_server() -> SocketAddr {
    let listener = TokioTcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind origin server");
    let addr = listener.local_addr().expect("Failed to get origin addr");

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let service = service_fn(origin_handler);
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    addr
}

async fn origin_handler(req: Request<Incoming>) -> std::result::Result<Response<Full<Bytes>>, Infallible> {
    let method = req.method().clone();
    let target = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_default();
    let host = req
        .headers()
        .get(hyper::header::HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let body = req
        .into_body()
        .collect()
        .await
        .map(|c| c.to_bytes())
        .unwrap_or_default();

    let mut payload = format!("{} {} host={}\n", method, target, host).into_bytes();
    payload.extend_from_slice(&body);

    let response = Response::builder()
        .status(203)
        .header("x-origin", "test")
        .header("set-cookie", "a=1")
        .header("set-cookie", "b=2")
        .body(Full::new(Bytes::from(payload)))
        .expect("valid response");
    Ok(response)
}

/// Origin server streaming a chunked body in two parts
///
/// Sends `first\n`, then holds the response open until `gate` is notified before
/// sending `second\n`. A relay that buffers the body never delivers the first part.
pub async fn start_streaming_origin() -> (SocketAddr, Arc<Notify>) {
    let listener = TokioTcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind streaming origin");
    let addr = listener.local_addr().expect("Failed to get origin addr");
    let gate = Arc::new(Notify::new());

    let server_gate = gate.clone();
    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let gate = server_gate.clone();
            tokio::spawn(async move {
                let service = service_fn(move |_req: Request<Incoming>| {
                    let gate = gate.clone();
                    async move {
                        let chunks = futures::stream::unfold(0u8, move |step| {
                            let gate = gate.clone();
                            async move {
                                let data: &'static [u8] = match step {
                                    0 => b"first\n",
                                    1 => {
                                        gate.notified().await;
                                        b"second\n"
                                    }
                                    _ => return None,
                                };
                                Some((Ok::<_, Infallible>(Frame::data(Bytes::from_static(data))), step + 1))
                            }
                        });
                        let response = Response::builder()
                            .status(200)
                            .body(StreamBody::new(chunks))
                            .expect("valid response");
                        Ok::<_, Infallible>(response)
                    }
                });
                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(TokioIo::new(stream), service)
                    .await;
            });
        }
    });

    (addr, gate)
}

/// HTTP client that never goes through a system proxy
pub fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .no_proxy()
        .timeout(Duration::from_secs(10))
        .build()
        .expect("Failed to build HTTP client")
}
