use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use bytes::Bytes;
use http::header::{CONNECTION, CONTENT_TYPE, SEC_WEBSOCKET_ACCEPT, SEC_WEBSOCKET_KEY, UPGRADE};
use http_body_util::{BodyExt, Full};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::WebSocketStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::assets;
use crate::channel::Channel;
use crate::config::RelayConfig;
use crate::error::HandshakeError;
use crate::registry::{Registry, TunnelConnection};
use crate::router::Router;
use crate::tunnel::{normalize_domain, parse_registration, RelayMessage, TUNNEL_PATH};

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

/// Run the relay until Ctrl+C.
pub async fn run_server(config: RelayConfig) -> Result<()> {
    let bind = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = TcpListener::bind(bind)
        .await
        .with_context(|| format!("Failed to bind relay on {}", bind))?;
    let server = RelayServer::new(listener, config.public_url(), config.request_timeout());
    let shutdown = CancellationToken::new();

    info!("listening on :{}", config.port);
    info!("Public URL: {}", config.public_url());

    if let Some(admin_bind) = &config.admin_bind {
        let admin_bind: SocketAddr = admin_bind
            .parse()
            .with_context(|| format!("Invalid admin bind address: {}", admin_bind))?;
        let admin_listener = TcpListener::bind(admin_bind).await?;
        info!("Admin API listening on http://{}", admin_bind);
        tokio::spawn(run_admin(admin_listener, server.registry(), shutdown.clone()));
    }

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down relay...");
        }
        signal.cancel();
    });

    server.run(shutdown).await
}

/// Public HTTP front of the relay, including the tunnel endpoint.
pub struct RelayServer {
    listener: TcpListener,
    state: Arc<RelayState>,
}

struct RelayState {
    registry: Arc<Registry>,
    router: Router,
    public_url: String,
}

impl RelayServer {
    pub fn new(
        listener: TcpListener,
        public_url: String,
        request_timeout: Option<Duration>,
    ) -> Self {
        let registry = Arc::new(Registry::new());
        let router = Router::new(registry.clone(), public_url.clone(), request_timeout);
        Self {
            listener,
            state: Arc::new(RelayState {
                registry,
                router,
                public_url,
            }),
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.state.registry.clone()
    }

    /// Accept connections until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        loop {
            tokio::select! {
                accept_result = self.listener.accept() => {
                    match accept_result {
                        Ok((stream, remote)) => {
                            tokio::spawn(serve_connection(self.state.clone(), stream, remote));
                        }
                        Err(e) => error!("Failed to accept connection: {}", e),
                    }
                }

                _ = shutdown.cancelled() => break,
            }
        }
        Ok(())
    }
}

async fn serve_connection(state: Arc<RelayState>, stream: TcpStream, remote: SocketAddr) {
    let service = service_fn(move |req| {
        let state = state.clone();
        async move { Ok::<_, Infallible>(handle_request(state, req, remote).await) }
    });

    if let Err(e) = http1::Builder::new()
        .serve_connection(TokioIo::new(stream), service)
        .with_upgrades()
        .await
    {
        debug!("connection from {} ended: {}", remote, e);
    }
}

async fn handle_request(
    state: Arc<RelayState>,
    req: Request<hyper::body::Incoming>,
    remote: SocketAddr,
) -> Response<BoxBody> {
    let started = Instant::now();
    let method = req.method().clone();
    let path = req.uri().path().to_string();

    let response = match path.as_str() {
        "/robots.txt" => text_response(StatusCode::OK, "text/plain", assets::ROBOTS_TXT),
        TUNNEL_PATH => upgrade_tunnel(state.registry.clone(), req),
        "/favicon.ico" => {
            text_response(StatusCode::NOT_IMPLEMENTED, "text/plain", "not implemented")
        }
        "/" => text_response(
            StatusCode::OK,
            "text/html",
            assets::render_landing(&state.public_url),
        ),
        p if p.starts_with("/static") => match assets::static_asset(&p[1..]) {
            Some(data) => text_response(StatusCode::OK, assets::asset_content_type(p), data),
            None => text_response(
                StatusCode::NOT_FOUND,
                "text/plain",
                format!("resource '{}' not found", &p[1..]),
            ),
        },
        _ => {
            let (parts, _body) = req.into_parts();
            state.router.handle(&parts, Some(remote)).await
        }
    };

    info!("{} {} {} {:?}", remote, method, path, started.elapsed());
    response
}

/// Switch `/ws` to a websocket and run the registration handshake on it.
fn upgrade_tunnel(
    registry: Arc<Registry>,
    mut req: Request<hyper::body::Incoming>,
) -> Response<BoxBody> {
    let is_upgrade = req
        .headers()
        .get(UPGRADE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));
    let accept = match req.headers().get(SEC_WEBSOCKET_KEY) {
        Some(key) if is_upgrade => derive_accept_key(key.as_bytes()),
        _ => {
            return text_response(
                StatusCode::BAD_REQUEST,
                "text/plain",
                "expected websocket upgrade",
            )
        }
    };

    tokio::spawn(async move {
        match hyper::upgrade::on(&mut req).await {
            Ok(upgraded) => {
                let ws =
                    WebSocketStream::from_raw_socket(TokioIo::new(upgraded), Role::Server, None)
                        .await;
                if let Err(e) = accept_tunnel(&registry, Arc::new(Channel::new(ws))).await {
                    debug!("tunnel rejected: {}", e);
                }
            }
            Err(e) => error!("websocket upgrade failed: {}", e),
        }
    });

    let mut response = Response::new(full_body(""));
    *response.status_mut() = StatusCode::SWITCHING_PROTOCOLS;
    let headers = response.headers_mut();
    headers.insert(UPGRADE, http::HeaderValue::from_static("websocket"));
    headers.insert(CONNECTION, http::HeaderValue::from_static("Upgrade"));
    if let Ok(value) = http::HeaderValue::from_str(&accept) {
        headers.insert(SEC_WEBSOCKET_ACCEPT, value);
    }
    response
}

/// Read the registration frame and file the connection under its domain.
///
/// A bad first frame closes the channel without touching the registry.
pub async fn accept_tunnel(
    registry: &Registry,
    channel: Arc<Channel>,
) -> Result<Arc<TunnelConnection>, HandshakeError> {
    let frame = match channel.receive().await {
        Ok(frame) => frame,
        Err(e) => {
            let _ = channel.close().await;
            return Err(e.into());
        }
    };
    debug!("recv: {:?}", frame);

    let (domain, key) = match parse_registration(frame) {
        Ok(registration) => registration,
        Err(e) => {
            let _ = channel.close().await;
            return Err(e.into());
        }
    };

    let domain = normalize_domain(&domain);
    let connection = registry.register(&domain, &key, channel.clone()).await;

    if let Err(e) = channel
        .send(RelayMessage::Registered {
            domain: domain.clone(),
        })
        .await
    {
        warn!("failed to confirm {}/{}: {}", domain, connection.id, e);
        if let Err(e) = registry.remove(&domain, connection.id).await {
            debug!("{}", e);
        }
        let _ = channel.close().await;
        return Err(e.into());
    }
    Ok(connection)
}

async fn run_admin(listener: TcpListener, registry: Arc<Registry>, shutdown: CancellationToken) {
    loop {
        tokio::select! {
            accept_result = listener.accept() => {
                match accept_result {
                    Ok((stream, _)) => {
                        let registry = registry.clone();
                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                handle_admin_request(registry.clone(), req)
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(TokioIo::new(stream), service)
                                .await
                            {
                                error!("Admin API error: {}", e);
                            }
                        });
                    }
                    Err(e) => error!("Failed to accept admin connection: {}", e),
                }
            }

            _ = shutdown.cancelled() => break,
        }
    }
}

async fn handle_admin_request<B>(
    registry: Arc<Registry>,
    req: Request<B>,
) -> Result<Response<BoxBody>> {
    let response = match (req.method(), req.uri().path()) {
        (&Method::GET, "/health") => text_response(StatusCode::OK, "text/plain", "OK"),

        (&Method::GET, "/tunnels") => {
            let json = serde_json::to_string(&registry.summary().await)?;
            text_response(StatusCode::OK, "application/json", json)
        }

        _ => text_response(StatusCode::NOT_FOUND, "text/plain", "Not Found"),
    };

    Ok(response)
}

fn text_response(
    status: StatusCode,
    content_type: &'static str,
    body: impl Into<Bytes>,
) -> Response<BoxBody> {
    let mut response = Response::new(full_body(body));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, http::HeaderValue::from_static(content_type));
    response
}

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}
