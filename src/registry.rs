use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::channel::Channel;
use crate::error::RegistryError;

/// A live tunnel from one host process.
#[derive(Debug)]
pub struct TunnelConnection {
    /// Unique within its domain and never reused.
    pub id: u64,
    pub domain: String,
    pub key: String,
    pub joined_at: SystemTime,
    pub channel: Arc<Channel>,
}

#[derive(Debug, Default)]
struct Bucket {
    next_id: u64,
    connections: Vec<Arc<TunnelConnection>>,
}

/// Snapshot of one domain for the admin API.
#[derive(Debug, Clone, Serialize)]
pub struct DomainSummary {
    pub domain: String,
    pub connections: Vec<ConnectionSummary>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectionSummary {
    pub id: u64,
    pub joined_at: SystemTime,
}

/// Live tunnel connections grouped by domain.
///
/// One lock guards the whole table; nothing awaits I/O while holding it.
#[derive(Debug, Default)]
pub struct Registry {
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a connection to `domain`, creating the bucket on first use.
    pub async fn register(
        &self,
        domain: &str,
        key: &str,
        channel: Arc<Channel>,
    ) -> Arc<TunnelConnection> {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets.entry(domain.to_string()).or_default();

        let connection = Arc::new(TunnelConnection {
            id: bucket.next_id,
            domain: domain.to_string(),
            key: key.to_string(),
            joined_at: SystemTime::now(),
            channel,
        });
        bucket.next_id += 1;
        bucket.connections.push(connection.clone());

        info!(
            "registered {}/{} ({} connections)",
            domain,
            connection.id,
            bucket.connections.len()
        );
        connection
    }

    /// Connections for `domain` in join order; empty when none or unknown.
    pub async fn lookup(&self, domain: &str) -> Vec<Arc<TunnelConnection>> {
        let buckets = self.buckets.lock().await;
        buckets
            .get(domain)
            .map(|bucket| bucket.connections.clone())
            .unwrap_or_default()
    }

    /// Whether `domain` currently has at least one connection.
    pub async fn is_live(&self, domain: &str) -> bool {
        let buckets = self.buckets.lock().await;
        buckets
            .get(domain)
            .is_some_and(|bucket| !bucket.connections.is_empty())
    }

    /// Drop connection `id` from `domain`, keeping the others in order.
    pub async fn remove(
        &self,
        domain: &str,
        id: u64,
    ) -> Result<Arc<TunnelConnection>, RegistryError> {
        let mut buckets = self.buckets.lock().await;
        let bucket = buckets
            .get_mut(domain)
            .ok_or_else(|| RegistryError::DomainNotFound(domain.to_string()))?;

        let position = bucket
            .connections
            .iter()
            .position(|conn| conn.id == id)
            .ok_or_else(|| RegistryError::ConnectionNotFound {
                domain: domain.to_string(),
                id,
            })?;

        debug!("dumping connection {}/{}", domain, id);
        Ok(bucket.connections.remove(position))
    }

    pub async fn summary(&self) -> Vec<DomainSummary> {
        let buckets = self.buckets.lock().await;
        let mut domains: Vec<DomainSummary> = buckets
            .iter()
            .map(|(domain, bucket)| DomainSummary {
                domain: domain.clone(),
                connections: bucket
                    .connections
                    .iter()
                    .map(|conn| ConnectionSummary {
                        id: conn.id,
                        joined_at: conn.joined_at,
                    })
                    .collect(),
            })
            .collect();
        domains.sort_by(|a, b| a.domain.cmp(&b.domain));
        domains
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::channel::testing::pipe;

    fn channel() -> Arc<Channel> {
        let (end, _) = pipe();
        Arc::new(Channel::new(end))
    }

    fn ids(conns: &[Arc<TunnelConnection>]) -> Vec<u64> {
        conns.iter().map(|c| c.id).collect()
    }

    #[tokio::test]
    async fn test_register_and_lookup_in_join_order() {
        let registry = Registry::new();
        registry.register("swift-otter", "ab12cd", channel()).await;
        registry.register("swift-otter", "ab12cd", channel()).await;
        registry.register("calm-heron", "zz99yy", channel()).await;

        let conns = registry.lookup("swift-otter").await;
        assert_eq!(ids(&conns), vec![0, 1]);
        assert!(conns.iter().all(|c| c.domain == "swift-otter"));
        assert_eq!(registry.lookup("calm-heron").await.len(), 1);
        assert!(registry.lookup("unknown").await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_preserves_order_and_never_reuses_ids() {
        let registry = Registry::new();
        for _ in 0..3 {
            registry.register("swift-otter", "ab12cd", channel()).await;
        }

        let removed = registry.remove("swift-otter", 1).await.unwrap();
        assert_eq!(removed.id, 1);
        assert_eq!(ids(&registry.lookup("swift-otter").await), vec![0, 2]);

        let joined = registry.register("swift-otter", "ab12cd", channel()).await;
        assert_eq!(joined.id, 3);

        // A stale removal of the old id must not hit the newcomer.
        assert_eq!(
            registry.remove("swift-otter", 1).await.unwrap_err(),
            RegistryError::ConnectionNotFound {
                domain: "swift-otter".to_string(),
                id: 1,
            }
        );
        assert_eq!(ids(&registry.lookup("swift-otter").await), vec![0, 2, 3]);
    }

    #[tokio::test]
    async fn test_remove_unknown_domain() {
        let registry = Registry::new();
        assert_eq!(
            registry.remove("nowhere", 0).await.unwrap_err(),
            RegistryError::DomainNotFound("nowhere".to_string())
        );
    }

    #[tokio::test]
    async fn test_empty_bucket_is_not_live() {
        let registry = Registry::new();
        assert!(!registry.is_live("swift-otter").await);

        let conn = registry.register("swift-otter", "ab12cd", channel()).await;
        assert!(registry.is_live("swift-otter").await);

        registry.remove("swift-otter", conn.id).await.unwrap();
        assert!(!registry.is_live("swift-otter").await);
        assert!(registry.lookup("swift-otter").await.is_empty());
        assert_eq!(registry.summary().await.len(), 1);
    }

    #[tokio::test]
    async fn test_ids_unique_under_interleaved_register_remove() {
        let registry = Arc::new(Registry::new());
        let mut removed = HashSet::new();

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                registry.register("busy", "k", channel()).await.id
            }));
        }
        let mut all = Vec::new();
        for task in tasks {
            all.push(task.await.unwrap());
        }

        for id in all.iter().copied().filter(|id| id % 3 == 0) {
            registry.remove("busy", id).await.unwrap();
            removed.insert(id);
        }
        for _ in 0..4 {
            registry.register("busy", "k", channel()).await;
        }

        let live = ids(&registry.lookup("busy").await);
        let unique: HashSet<u64> = live.iter().copied().collect();
        assert_eq!(unique.len(), live.len(), "ids must not repeat");
        assert!(live.iter().all(|id| !removed.contains(id)));
        assert_eq!(live.len(), 16 - removed.len() + 4);
    }
}
