//! Store Gateway: a process-wide connection pool and prepared-statement
//! cache for the datastore cluster.
//!
//! There is exactly one [`StoreGateway`] per process, constructed once at
//! startup and shared by `Arc` into [`crate::bootstrap`], [`crate::migrate`]
//! and [`crate::authdb`] — an explicit dependency rather than the
//! process-global singleton the original Python `CassandraCluster` class
//! used.

use std::collections::HashMap;
use std::sync::Arc;

use scylla::prepared_statement::PreparedStatement;
use scylla::{Session, SessionBuilder};
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// A single connection pool plus a cache of prepared statements keyed by
/// `(keyspace, statement text)`.
///
/// Safe for concurrent use: the prepared-statement cache is guarded by a
/// mutex, and the underlying driver session is itself safe to share across
/// tasks.
pub struct StoreGateway {
    session: Arc<Session>,
    prepared: Mutex<HashMap<(String, String), PreparedStatement>>,
}

impl StoreGateway {
    /// Connect to the cluster at `nodes`, dialing `port` for any entry that
    /// does not already carry an explicit `:port` suffix. Returns
    /// [`Error::StoreUnavailable`] if no node can be reached.
    pub async fn connect(nodes: &[String], port: &str) -> Result<Self> {
        let addrs = resolve_node_addrs(nodes, port);
        let session = SessionBuilder::new()
            .known_nodes(&addrs)
            .build()
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        Ok(Self {
            session: Arc::new(session),
            prepared: Mutex::new(HashMap::new()),
        })
    }

    /// Return a session handle bound to `keyspace`. Passing `None` returns a
    /// keyspace-less handle, used for `CREATE KEYSPACE` and other
    /// keyspace-qualified DDL that must run before any keyspace is bound.
    pub async fn session(&self, keyspace: Option<&str>) -> Result<Arc<Session>> {
        if let Some(ks) = keyspace {
            self.session
                .use_keyspace(ks, false)
                .await
                .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        }
        Ok(self.session.clone())
    }

    /// Return a prepared statement for `stmt` scoped to `keyspace`, reusing
    /// a cached one if the exact statement text was prepared before.
    /// Callers MUST reuse statement text strings for the cache to help.
    pub async fn prepare(&self, stmt: &str, keyspace: &str) -> Result<PreparedStatement> {
        let key = (keyspace.to_string(), stmt.to_string());

        {
            let cache = self.prepared.lock().await;
            if let Some(prepared) = cache.get(&key) {
                return Ok(prepared.clone());
            }
        }

        let session = self.session(Some(keyspace)).await?;
        let prepared = session
            .prepare(stmt)
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        let mut cache = self.prepared.lock().await;
        let entry = cache.entry(key).or_insert(prepared);
        Ok(entry.clone())
    }

    /// Number of distinct statements currently cached, for tests and
    /// diagnostics.
    pub async fn cached_statement_count(&self) -> usize {
        self.prepared.lock().await.len()
    }
}

/// Apply `port` to every node entry that doesn't already specify one, so
/// `cassandra.port` (`spec.md` §6) actually reaches the driver instead of
/// every node silently dialing the default 9042.
fn resolve_node_addrs(nodes: &[String], port: &str) -> Vec<String> {
    nodes
        .iter()
        .map(|n| if n.contains(':') { n.clone() } else { format!("{n}:{port}") })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    // StoreGateway::connect requires a reachable cluster, so its behavior
    // (cache correctness, keyspace binding) is exercised indirectly through
    // the in-memory `FakeMigrationStore` in `crate::migrate::test_support`,
    // which implements the same cache-by-statement-text contract without a
    // live cluster.

    #[test]
    fn applies_configured_port_to_bare_hosts() {
        let nodes = vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()];
        let addrs = resolve_node_addrs(&nodes, "9142");
        assert_eq!(addrs, vec!["10.0.0.1:9142", "10.0.0.2:9142"]);
    }

    #[test]
    fn leaves_explicit_port_untouched() {
        let nodes = vec!["10.0.0.1:19042".to_string()];
        let addrs = resolve_node_addrs(&nodes, "9142");
        assert_eq!(addrs, vec!["10.0.0.1:19042"]);
    }
}
