use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::channel::Channel;
use crate::codec;
use crate::config::HostConfig;
use crate::index::{self, FileIndex};
use crate::names::{random_domain, random_key};
use crate::tunnel::{normalize_domain, HostMessage, RelayMessage, NO_SUCH_FILE, TUNNEL_PATH};

/// Resolved settings for one host process.
#[derive(Debug, Clone)]
pub struct HostSettings {
    pub relay_url: String,
    pub domain: String,
    pub key: String,
    pub folder: PathBuf,
    pub reconnect_interval: Duration,
}

impl HostSettings {
    /// Fill in a random domain and key where the config has none.
    pub fn from_config(config: &HostConfig) -> Result<Self> {
        let folder = config
            .folder
            .canonicalize()
            .with_context(|| format!("Failed to open folder {:?}", config.folder))?;
        Ok(Self {
            relay_url: config.url.trim_end_matches('/').to_string(),
            domain: config
                .domain
                .clone()
                .filter(|d| !d.trim().is_empty())
                .unwrap_or_else(random_domain),
            key: config
                .key
                .clone()
                .filter(|k| !k.is_empty())
                .unwrap_or_else(random_key),
            folder,
            reconnect_interval: config.reconnect_interval(),
        })
    }

    /// Where the folder shows up on the relay.
    pub fn site_url(&self) -> String {
        format!("{}/{}/", self.relay_url, normalize_domain(&self.domain))
    }
}

/// Serve the configured folder until Ctrl+C.
pub async fn run_host(config: HostConfig) -> Result<()> {
    let settings = HostSettings::from_config(&config)?;
    let shutdown = CancellationToken::new();

    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Shutting down host...");
        }
        signal.cancel();
    });

    Host::new(settings).run(shutdown).await
}

pub struct Host {
    settings: HostSettings,
    index: FileIndex,
}

impl Host {
    pub fn new(settings: HostSettings) -> Self {
        let index = FileIndex::new(settings.folder.clone());
        Self { settings, index }
    }

    pub fn index(&self) -> &FileIndex {
        &self.index
    }

    /// Watch the folder and keep a tunnel session up, redialing after each
    /// failure, until `shutdown` fires.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<()> {
        let watcher = index::watch(self.index.clone(), shutdown.clone()).await?;
        let ws_url = websocket_url(&self.settings.relay_url)?;
        info!(
            "serving {:?} ({} files) as {}",
            self.settings.folder,
            self.index.len().await,
            self.settings.domain
        );

        while !shutdown.is_cancelled() {
            info!("serving forever");
            if let Err(e) = self.run_session(&ws_url, &shutdown).await {
                debug!("session ended: {:#}", e);
            }
            if shutdown.is_cancelled() {
                break;
            }

            info!(
                "server disconnected, retrying in {} seconds",
                self.settings.reconnect_interval.as_secs()
            );
            tokio::select! {
                _ = tokio::time::sleep(self.settings.reconnect_interval) => {}
                _ = shutdown.cancelled() => break,
            }
        }

        if let Err(e) = watcher.await {
            warn!("watcher task failed: {}", e);
        }
        Ok(())
    }

    async fn run_session(&self, ws_url: &Url, shutdown: &CancellationToken) -> Result<()> {
        let channel = connect(ws_url, &self.settings.domain, &self.settings.key).await?;
        let responder = Responder::new(self.index.clone(), self.settings.key.clone());

        tokio::select! {
            result = responder.serve(&channel, &self.settings.relay_url) => result,
            _ = shutdown.cancelled() => {
                let _ = channel.close().await;
                Ok(())
            }
        }
    }
}

/// Tunnel endpoint for a relay URL: `http` becomes `ws`, `https` becomes
/// `wss`, and `/ws` is appended.
pub fn websocket_url(relay_url: &str) -> Result<Url> {
    let mut url =
        Url::parse(relay_url).with_context(|| format!("Invalid relay URL: {}", relay_url))?;
    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => anyhow::bail!("Unsupported relay URL scheme: {}", other),
    };
    url.set_scheme(scheme)
        .map_err(|_| anyhow::anyhow!("Cannot use {} with scheme {}", relay_url, scheme))?;

    let path = format!("{}{}", url.path().trim_end_matches('/'), TUNNEL_PATH);
    url.set_path(&path);
    Ok(url)
}

/// Dial the relay and ask for `domain`.
pub async fn connect(ws_url: &Url, domain: &str, key: &str) -> Result<Channel> {
    debug!("dialing {}", ws_url);
    let (ws, _) = tokio_tungstenite::connect_async(ws_url.as_str())
        .await
        .with_context(|| format!("Failed to connect to {}", ws_url))?;
    let channel = Channel::new(ws);

    channel
        .send(HostMessage::Register {
            domain: domain.to_string(),
            key: key.to_string(),
        })
        .await
        .context("Failed to register domain")?;
    Ok(channel)
}

/// Answers the relay's requests from the file index and disk.
pub struct Responder {
    index: FileIndex,
    key: String,
}

impl Responder {
    pub fn new(index: FileIndex, key: String) -> Self {
        Self { index, key }
    }

    /// Build the reply for one requested path.
    ///
    /// Paths not in the index are reported missing; a read failure of an
    /// indexed file is an error.
    pub async fn answer(&self, path: &str) -> Result<HostMessage> {
        if !self.index.contains(path).await {
            return Ok(HostMessage::Reply {
                success: false,
                payload: NO_SUCH_FILE.to_string(),
                key: self.key.clone(),
            });
        }

        let file = self.index.root().join(path);
        let data = tokio::fs::read(&file)
            .await
            .with_context(|| format!("Failed to read {:?}", file))?;
        Ok(HostMessage::Reply {
            success: true,
            payload: codec::encode(codec::mime_for_path(path), &data),
            key: self.key.clone(),
        })
    }

    /// Handle requests until the connection fails.
    pub async fn serve(&self, channel: &Channel, relay_url: &str) -> Result<()> {
        loop {
            let frame = channel.receive().await.context("Lost connection to relay")?;

            match RelayMessage::from(frame) {
                RelayMessage::Get { path, ip_address } => {
                    debug!("{} requested {}", ip_address, path);
                    let reply = self.answer(&path).await?;
                    channel.send(reply).await.context("Failed to send reply")?;
                }
                RelayMessage::Registered { domain } => {
                    info!("✓ Serving at {}/{}/", relay_url, domain);
                }
                RelayMessage::Notice(text) => {
                    debug!("relay says: {}", text);
                }
            }
        }
    }
}
