//! Public request routing: path to domain, fallbacks, and failover across
//! the hosts registered for a domain.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use http::header::{CONTENT_TYPE, LOCATION, ORIGIN, REFERER};
use http::request::Parts;
use http::{HeaderMap, Response, StatusCode};
use percent_encoding::{percent_decode_str, utf8_percent_encode, AsciiSet, CONTROLS};
use rand::seq::SliceRandom;
use tracing::{debug, error, trace};

use crate::codec::{self, OCTET_STREAM};
use crate::error::RouteError;
use crate::registry::Registry;
use crate::server::{full_body, BoxBody};
use crate::tunnel::{normalize_domain, HostMessage, RelayMessage};

/// How far a logged payload is shown before it is cut.
const PAYLOAD_LOG_LIMIT: usize = 64;

/// Bytes escaped when a decoded path goes back out in a `Location` header.
const LOCATION_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'#')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'?')
    .add(b'`')
    .add(b'{')
    .add(b'}');

/// What to do with a public path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    /// Send the browser to the canonical location.
    Redirect(String),

    /// Ask a host of `domain` for `path`.
    Fetch { domain: String, path: String },
}

/// A file served through the tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Served {
    pub content_type: String,
    pub body: Vec<u8>,
}

pub struct Router {
    registry: Arc<Registry>,
    public_url: String,
    request_timeout: Option<Duration>,
}

impl Router {
    pub fn new(
        registry: Arc<Registry>,
        public_url: String,
        request_timeout: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            public_url,
            request_timeout,
        }
    }

    /// Answer a public request for a domain-rooted path.
    pub async fn handle(&self, req: &Parts, remote: Option<SocketAddr>) -> Response<BoxBody> {
        let ip_address = client_ip(&req.headers, remote).unwrap_or_else(|| {
            debug!("could not determine ip");
            String::new()
        });

        let path = percent_decode_str(req.uri.path()).decode_utf8_lossy();
        let referer = req.headers.get(REFERER).and_then(|v| v.to_str().ok());
        debug!("URL: {}, Referer: {:?}", path, referer);

        match self.resolve(&path, referer).await {
            Resolution::Redirect(location) => Response::builder()
                .status(StatusCode::FOUND)
                .header(LOCATION, utf8_percent_encode(&location, LOCATION_SET).to_string())
                .body(full_body(""))
                .unwrap_or_else(|_| internal_error("failed to build redirect")),
            Resolution::Fetch { domain, path } => {
                match self.serve(&domain, &path, &ip_address).await {
                    Ok(served) => Response::builder()
                        .status(StatusCode::OK)
                        .header(CONTENT_TYPE, served.content_type)
                        .body(full_body(served.body))
                        .unwrap_or_else(|_| internal_error("failed to build response")),
                    Err(e) => {
                        debug!("problem getting: {}", e);
                        internal_error(e.to_string())
                    }
                }
            }
        }
    }

    /// Map a decoded request path to a redirect or a fetch.
    pub async fn resolve(&self, path: &str, referer: Option<&str>) -> Resolution {
        let raw = path.strip_prefix('/').unwrap_or(path);
        let mut domain = normalize_domain(raw.split('/').next().unwrap_or_default());

        if !self.registry.is_live(&domain).await {
            if let Some(from_referer) = referer.and_then(|r| self.referer_domain(r)) {
                debug!("using domain {} from referer", from_referer);
                domain = from_referer;
            }
        }

        let rooted = raw == domain || raw.starts_with(&format!("{domain}/"));
        if !rooted {
            let mut location = format!("/{domain}/{raw}");
            if codec::extension(&location).is_none() && !location.ends_with('/') {
                location.push('/');
            }
            return Resolution::Redirect(location);
        }

        if codec::extension(raw).is_none() && !path.ends_with('/') {
            return Resolution::Redirect(format!("{path}/"));
        }

        let rest = &raw[domain.len()..];
        let file = match rest.strip_prefix('/') {
            Some(file) if !file.is_empty() => file.to_string(),
            _ if rest.is_empty() || rest == "/" => "index.html".to_string(),
            _ => rest.to_string(),
        };
        trace!("path to file: {}", file);

        Resolution::Fetch { domain, path: file }
    }

    /// Domain taken from a referer that points back at this relay.
    fn referer_domain(&self, referer: &str) -> Option<String> {
        let pieces: Vec<&str> = referer.split('/').collect();
        if pieces.len() > 4 && referer.starts_with(&self.public_url) {
            Some(normalize_domain(pieces[3]))
        } else {
            None
        }
    }

    /// Fetch through the fallback chain and pick a content type.
    pub async fn serve(
        &self,
        domain: &str,
        path: &str,
        ip_address: &str,
    ) -> Result<Served, RouteError> {
        let (path, payload) = self.fetch(domain, path, ip_address).await?;

        let data_url = codec::decode(&payload).map_err(|e| {
            error!("problem decoding '{}': {}", truncate(&payload, PAYLOAD_LOG_LIMIT), e);
            e
        })?;

        let content_type = content_type(&path, &data_url.media_type);
        debug!("{}/{} ({})", domain, path, content_type);
        Ok(Served {
            content_type,
            body: data_url.data,
        })
    }

    /// Try `path`, then `path/index.html`, then the directory name itself.
    ///
    /// Returns the path that succeeded with its encoded payload.
    pub async fn fetch(
        &self,
        domain: &str,
        path: &str,
        ip_address: &str,
    ) -> Result<(String, String), RouteError> {
        let mut path = path.to_string();
        let mut result = self.get(domain, &path, ip_address).await;

        if result.is_err() && codec::extension(&path).is_none() {
            if !path.ends_with('/') {
                path.push('/');
            }
            path.push_str("index.html");
            debug!("trying 2nd try to get: {}", path);
            result = self.get(domain, &path, ip_address).await;
        }

        if result.is_err() {
            if let Some(stripped) = path.strip_suffix("/index.html") {
                path = stripped.to_string();
                debug!("trying 3rd try to get: {}", path);
                result = self.get(domain, &path, ip_address).await;
            }
        }

        result.map(|payload| (path, payload))
    }

    /// One pass over the domain's connections in random order.
    ///
    /// Dead connections are pruned as they are found. A reply only counts
    /// when it is a `get` carrying the key of the domain's first connection.
    pub async fn get(
        &self,
        domain: &str,
        path: &str,
        ip_address: &str,
    ) -> Result<String, RouteError> {
        let connections = self.registry.lookup(domain).await;
        let Some(first) = connections.first() else {
            debug!("no connections available for domain {}", domain);
            return Err(RouteError::NoConnections(domain.to_string()));
        };
        let key = first.key.clone();
        debug!(
            "requesting {}/{} from {} connections",
            domain,
            path,
            connections.len()
        );

        let mut order: Vec<usize> = (0..connections.len()).collect();
        order.shuffle(&mut rand::thread_rng());

        for i in order {
            let conn = &connections[i];
            let request = RelayMessage::Get {
                path: path.to_string(),
                ip_address: ip_address.to_string(),
            };

            let frame = match conn.channel.round_trip(request, self.request_timeout).await {
                Ok(frame) => frame,
                Err(e) => {
                    debug!("{}/{}: {}", domain, conn.id, e);
                    if let Err(e) = self.registry.remove(domain, conn.id).await {
                        debug!("{}", e);
                    }
                    continue;
                }
            };

            match HostMessage::from(frame) {
                HostMessage::Reply {
                    success,
                    payload,
                    key: reply_key,
                } if reply_key == key => {
                    if success {
                        return Ok(payload);
                    }
                    return Err(RouteError::HostReported(payload));
                }
                other => debug!("no good data from {}/{}: {:?}", domain, conn.id, other),
            }
        }

        Err(RouteError::InvalidResponse)
    }
}

/// Pick a content type: well-known extensions first, then the type the host
/// declared, then a guess from the extension.
pub fn content_type(path: &str, declared: &str) -> String {
    match codec::extension(path) {
        Some("css") => return "text/css".to_string(),
        Some("js") => return "text/javascript".to_string(),
        Some("html") => return "text/html".to_string(),
        _ => {}
    }
    if !declared.is_empty() && declared != OCTET_STREAM {
        return declared.to_string();
    }
    match codec::mime_for_path(path) {
        "" => OCTET_STREAM.to_string(),
        guessed => guessed.to_string(),
    }
}

/// Best-effort client address: proxy headers, then the socket, then the
/// `Origin` host.
pub fn client_ip(headers: &HeaderMap, remote: Option<SocketAddr>) -> Option<String> {
    for name in ["x-client-ip", "x-forwarded-for", "x-real-ip"] {
        let first = headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(ip) = first {
            return Some(ip.to_string());
        }
    }

    if let Some(addr) = remote {
        return Some(addr.ip().to_string());
    }

    headers
        .get(ORIGIN)
        .and_then(|v| v.to_str().ok())
        .and_then(|origin| url::Url::parse(origin).ok())
        .and_then(|url| url.host_str().map(str::to_string))
}

fn internal_error(message: impl Into<String>) -> Response<BoxBody> {
    let mut response = Response::new(full_body(message.into()));
    *response.status_mut() = StatusCode::INTERNAL_SERVER_ERROR;
    response
}

fn truncate(s: &str, limit: usize) -> &str {
    match s.char_indices().nth(limit) {
        Some((end, _)) => &s[..end],
        None => s,
    }
}
