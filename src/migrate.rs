//! Migration Coordinator: the election, execution, and wait-for-completion
//! state machine that brings a keyspace from any prior schema state to the
//! catalog's target state, tolerating any number of nodes calling
//! `request_migration` concurrently.
//!
//! Directly descended from `original_source/database/db.py`'s
//! `DB.requestMigration` / `DB.doMigration` / `DB.waitForMigrationCompletion`,
//! restructured so the implicit `session` decorator argument of the
//! original becomes an explicit `Arc<dyn MigrationStore>` dependency.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::schema::Catalog;

pub mod model {
    use time::OffsetDateTime;
    use uuid::Uuid;

    /// A row of `schema_migration_requests`.
    #[derive(Debug, Clone, PartialEq)]
    pub struct MigrationRequestRow {
        pub reqid: Uuid,
        pub reqtime: OffsetDateTime,
        pub inprogress: bool,
        pub failed: bool,
        pub lastupdate: OffsetDateTime,
    }

    /// A row of `schema_migrations`, keyed by `(scriptname, time)`.
    #[derive(Debug, Clone, PartialEq)]
    pub struct SchemaMigrationRow {
        pub scriptname: String,
        pub time: OffsetDateTime,
        pub run: bool,
        pub failed: bool,
        pub error: String,
        pub content: String,
    }

    impl SchemaMigrationRow {
        /// A script is applied iff its latest row has `run && !failed`.
        pub fn is_applied(&self) -> bool {
            self.run && !self.failed
        }
    }
}

use model::{MigrationRequestRow, SchemaMigrationRow};

/// The minimal datastore surface the Coordinator depends on. Implemented
/// against a live cluster by [`ScyllaMigrationStore`] and, for tests, by an
/// in-memory fake in [`test_support`] — the "tests inject a fake gateway"
/// design note of the original spec.
#[async_trait]
pub trait MigrationStore: Send + Sync {
    async fn list_migration_requests(&self) -> Result<Vec<MigrationRequestRow>>;
    async fn insert_migration_request(&self, row: &MigrationRequestRow) -> Result<()>;
    async fn delete_migration_request(&self, reqid: Uuid) -> Result<()>;
    async fn mark_migration_request_inprogress(
        &self,
        reqid: Uuid,
        lastupdate: OffsetDateTime,
    ) -> Result<()>;
    async fn touch_migration_request(&self, reqid: Uuid, lastupdate: OffsetDateTime) -> Result<()>;
    async fn fail_migration_request(&self, reqid: Uuid, lastupdate: OffsetDateTime) -> Result<()>;

    async fn table_exists(&self, table: &str) -> Result<bool>;
    async fn execute_ddl(&self, cql: &str) -> Result<()>;

    async fn latest_migration_history(
        &self,
        scriptname: &str,
    ) -> Result<Option<SchemaMigrationRow>>;
    async fn insert_migration_provisional(
        &self,
        scriptname: &str,
        time: OffsetDateTime,
        content: &str,
    ) -> Result<()>;
    async fn mark_migration_success(&self, scriptname: &str, time: OffsetDateTime) -> Result<()>;
    async fn mark_migration_failure(
        &self,
        scriptname: &str,
        time: OffsetDateTime,
        error: &str,
    ) -> Result<()>;
}

/// Tunables governing the election's timing invariants. Defaults match
/// `spec.md` §4.3.1/§4.3.3.
#[derive(Debug, Clone)]
pub struct CoordinatorTiming {
    /// Window after nominating ourselves before we re-read and decide a
    /// winner. Must comfortably exceed inter-node replication lag.
    pub settle: Duration,
    /// Poll interval while waiting for another node's migration to finish.
    pub poll_interval: Duration,
    /// Age after which a non-in-progress request, or a stale in-progress
    /// request's last update, is considered abandoned.
    pub stale_after: Duration,
}

impl Default for CoordinatorTiming {
    fn default() -> Self {
        Self {
            settle: Duration::from_secs(2),
            poll_interval: Duration::from_millis(500),
            stale_after: Duration::from_secs(60),
        }
    }
}

/// Drives one keyspace's schema to the catalog's target state.
pub struct Coordinator<S: MigrationStore> {
    store: Arc<S>,
    catalog: Catalog,
    timing: CoordinatorTiming,
}

impl<S: MigrationStore> Coordinator<S> {
    pub fn new(store: Arc<S>, catalog: Catalog) -> Self {
        Self {
            store,
            catalog,
            timing: CoordinatorTiming::default(),
        }
    }

    pub fn with_timing(mut self, timing: CoordinatorTiming) -> Self {
        self.timing = timing;
        self
    }

    /// Entry point: bring the keyspace's schema current, electing ourselves
    /// as migrator if no other node is mid-migration.
    pub async fn request_migration(&self, cancel: &CancellationToken) -> Result<()> {
        let now = OffsetDateTime::now_utc();
        let live = self.reap_and_collect_live(now).await?;

        if !live.is_empty() {
            info!("not selected for migration (in progress)");
            return self.wait_for_completion(cancel).await;
        }

        let reqid = Uuid::new_v4();
        let t = OffsetDateTime::now_utc();
        info!(%reqid, "no outstanding migration requests, nominating self");

        self.store
            .insert_migration_request(&MigrationRequestRow {
                reqid,
                reqtime: t,
                inprogress: false,
                failed: false,
                lastupdate: t,
            })
            .await?;

        tokio::time::sleep(self.timing.settle).await;

        let mut requests = self.store.list_migration_requests().await?;
        requests.sort_by(|a, b| {
            a.reqtime
                .cmp(&b.reqtime)
                .then_with(|| a.reqid.as_bytes().cmp(b.reqid.as_bytes()))
        });

        let winner = requests
            .first()
            .expect("we just inserted a request, the list cannot be empty");

        if winner.reqid == reqid {
            self.run_migration(reqid).await
        } else {
            info!(%reqid, winner = %winner.reqid, "not selected for migration (lost election)");
            self.store.delete_migration_request(reqid).await?;
            self.wait_for_completion(cancel).await
        }
    }

    /// Reap requests presumed dead and return the live (non-stale) set.
    /// Reaping failures are swallowed: another racer may already have
    /// deleted the row.
    async fn reap_and_collect_live(&self, now: OffsetDateTime) -> Result<Vec<MigrationRequestRow>> {
        debug!("checking schema migration requests table");
        let requests = self.store.list_migration_requests().await?;
        let stale_before = now - self.timing.stale_after;

        let mut live = Vec::new();
        for req in requests {
            let stale = req.failed
                || (!req.inprogress && req.reqtime < stale_before)
                || (req.inprogress && req.lastupdate < stale_before);

            if stale {
                info!(reqid = %req.reqid, "found stale request, deleting");
                if let Err(e) = self.store.delete_migration_request(req.reqid).await {
                    warn!(reqid = %req.reqid, error = %e, "failed to delete stale request, ignoring");
                }
            } else {
                live.push(req);
            }
        }
        Ok(live)
    }

    /// Winner path: run baseline and migration scripts to completion, then
    /// delete our request row. On any failure, mark our request failed and
    /// propagate the error.
    async fn run_migration(&self, reqid: Uuid) -> Result<()> {
        info!(%reqid, "selected for migration");

        let t = OffsetDateTime::now_utc();
        self.store
            .mark_migration_request_inprogress(reqid, t)
            .await?;

        let result = async {
            self.run_baselines(reqid).await?;
            self.run_migrations(reqid).await
        }
        .await;

        match result {
            Ok(()) => {
                self.store.delete_migration_request(reqid).await?;
                info!("migration completed successfully");
                Ok(())
            }
            Err(e) => {
                warn!(error = %e, "migration failed");
                let t = OffsetDateTime::now_utc();
                self.store.fail_migration_request(reqid, t).await?;
                Err(e)
            }
        }
    }

    async fn run_baselines(&self, reqid: Uuid) -> Result<()> {
        for entry in &self.catalog.baseline {
            let table = entry.table_name();
            debug!(table, "checking baseline table");

            if self.store.table_exists(table).await? {
                debug!(table, "table already exists (skipping)");
                continue;
            }

            info!(table, "running baseline script");
            let content = std::fs::read_to_string(&entry.path)?;

            if let Err(e) = self.store.execute_ddl(&content).await {
                if self.store.table_exists(table).await? {
                    warn!(table, "table exists despite error, treating as concurrent success");
                } else {
                    return Err(Error::MigrationFailed(format!(
                        "baseline {} failed: {e}",
                        entry.filename
                    )));
                }
            }

            let t = OffsetDateTime::now_utc();
            self.store.touch_migration_request(reqid, t).await?;
        }
        Ok(())
    }

    async fn run_migrations(&self, reqid: Uuid) -> Result<()> {
        for entry in &self.catalog.migrations {
            let filename = entry.filename.as_str();
            debug!(filename, "checking migration script");

            let history = self.store.latest_migration_history(filename).await?;
            if history.as_ref().map(|h| h.is_applied()).unwrap_or(false) {
                debug!(filename, "script already applied, skipping");
                let t = OffsetDateTime::now_utc();
                self.store.touch_migration_request(reqid, t).await?;
                continue;
            }

            info!(filename, "running migration script");
            let content = std::fs::read_to_string(&entry.path)?;
            let exec_time = OffsetDateTime::now_utc();

            self.store
                .insert_migration_provisional(filename, exec_time, &content)
                .await?;

            match self.store.execute_ddl(&content).await {
                Ok(()) => {
                    self.store.mark_migration_success(filename, exec_time).await?;
                    info!(filename, "successfully ran migration script");
                }
                Err(e) => {
                    self.store
                        .mark_migration_failure(filename, exec_time, &e.to_string())
                        .await?;
                    return Err(Error::MigrationFailed(format!(
                        "migration {filename} failed: {e}"
                    )));
                }
            }

            let t = OffsetDateTime::now_utc();
            self.store.touch_migration_request(reqid, t).await?;
        }
        Ok(())
    }

    /// Poll until the other node's migration request disappears (success)
    /// or we observe it as failed/stalled, in which case we re-enter the
    /// election ourselves. Cancellable for graceful shutdown.
    async fn wait_for_completion(&self, cancel: &CancellationToken) -> Result<()> {
        info!("waiting for migrations to complete");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("wait for migration completion cancelled");
                    return Ok(());
                }
                _ = tokio::time::sleep(self.timing.poll_interval) => {}
            }

            let requests = self.store.list_migration_requests().await?;
            if requests.is_empty() {
                info!("finished waiting for migration");
                return Ok(());
            }

            let stale_before = OffsetDateTime::now_utc() - self.timing.stale_after;
            let needs_repair = requests
                .iter()
                .any(|r| r.failed || (r.inprogress && r.lastupdate < stale_before));

            if needs_repair {
                warn!("detected failed or stalled migration, re-requesting migration");
                return Box::pin(self.request_migration(cancel)).await;
            }
        }
    }
}

/// A [`MigrationStore`] backed by a live datastore session through the
/// Store Gateway. One instance is scoped to a single keyspace.
pub struct ScyllaMigrationStore {
    gateway: Arc<crate::store::StoreGateway>,
    keyspace: String,
}

impl ScyllaMigrationStore {
    pub fn new(gateway: Arc<crate::store::StoreGateway>, keyspace: impl Into<String>) -> Self {
        Self {
            gateway,
            keyspace: keyspace.into(),
        }
    }
}

#[async_trait]
impl MigrationStore for ScyllaMigrationStore {
    async fn list_migration_requests(&self) -> Result<Vec<MigrationRequestRow>> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let prepared = self
            .gateway
            .prepare(
                "SELECT reqid, reqtime, inprogress, failed, lastupdate \
                 FROM schema_migration_requests",
                &self.keyspace,
            )
            .await?;

        let rows = session
            .execute_unpaged(&prepared, &[])
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?
            .into_rows_result()
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        let mut out = Vec::new();
        for row in rows
            .rows::<(Uuid, OffsetDateTime, bool, bool, OffsetDateTime)>()
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?
        {
            let (reqid, reqtime, inprogress, failed, lastupdate) =
                row.map_err(|e| Error::StoreUnavailable(e.to_string()))?;
            out.push(MigrationRequestRow {
                reqid,
                reqtime,
                inprogress,
                failed,
                lastupdate,
            });
        }
        Ok(out)
    }

    async fn insert_migration_request(&self, row: &MigrationRequestRow) -> Result<()> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let prepared = self
            .gateway
            .prepare(
                "INSERT INTO schema_migration_requests \
                 (reqid, reqtime, inprogress, failed, lastupdate) VALUES (?, ?, ?, ?, ?)",
                &self.keyspace,
            )
            .await?;
        session
            .execute_unpaged(
                &prepared,
                (row.reqid, row.reqtime, row.inprogress, row.failed, row.lastupdate),
            )
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn delete_migration_request(&self, reqid: Uuid) -> Result<()> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let prepared = self
            .gateway
            .prepare(
                "DELETE FROM schema_migration_requests WHERE reqid = ?",
                &self.keyspace,
            )
            .await?;
        session
            .execute_unpaged(&prepared, (reqid,))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn mark_migration_request_inprogress(
        &self,
        reqid: Uuid,
        lastupdate: OffsetDateTime,
    ) -> Result<()> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let prepared = self
            .gateway
            .prepare(
                "UPDATE schema_migration_requests SET inprogress = true, lastupdate = ? \
                 WHERE reqid = ?",
                &self.keyspace,
            )
            .await?;
        session
            .execute_unpaged(&prepared, (lastupdate, reqid))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn touch_migration_request(&self, reqid: Uuid, lastupdate: OffsetDateTime) -> Result<()> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let prepared = self
            .gateway
            .prepare(
                "UPDATE schema_migration_requests SET lastupdate = ? WHERE reqid = ?",
                &self.keyspace,
            )
            .await?;
        session
            .execute_unpaged(&prepared, (lastupdate, reqid))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn fail_migration_request(&self, reqid: Uuid, lastupdate: OffsetDateTime) -> Result<()> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let prepared = self
            .gateway
            .prepare(
                "UPDATE schema_migration_requests \
                 SET lastupdate = ?, failed = true, inprogress = false WHERE reqid = ?",
                &self.keyspace,
            )
            .await?;
        session
            .execute_unpaged(&prepared, (lastupdate, reqid))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn table_exists(&self, table: &str) -> Result<bool> {
        let session = self.gateway.session(None).await?;
        let prepared = self
            .gateway
            .prepare(
                "SELECT table_name FROM system_schema.tables \
                 WHERE keyspace_name = ? AND table_name = ?",
                "system_schema",
            )
            .await?;
        let rows = session
            .execute_unpaged(&prepared, (&self.keyspace, table))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?
            .into_rows_result()
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(rows.rows_num() > 0)
    }

    async fn execute_ddl(&self, cql: &str) -> Result<()> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        for statement in cql.split(';').map(|s| s.trim()).filter(|s| !s.is_empty()) {
            session
                .query_unpaged(statement, &[])
                .await
                .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        }
        Ok(())
    }

    async fn latest_migration_history(
        &self,
        scriptname: &str,
    ) -> Result<Option<SchemaMigrationRow>> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let prepared = self
            .gateway
            .prepare(
                "SELECT scriptname, time, run, failed, error, content \
                 FROM schema_migrations WHERE scriptname = ?",
                &self.keyspace,
            )
            .await?;
        let rows = session
            .execute_unpaged(&prepared, (scriptname,))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?
            .into_rows_result()
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        let mut latest: Option<SchemaMigrationRow> = None;
        for row in rows
            .rows::<(String, OffsetDateTime, bool, bool, String, String)>()
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?
        {
            let (scriptname, time, run, failed, error, content) =
                row.map_err(|e| Error::StoreUnavailable(e.to_string()))?;
            if latest.as_ref().map(|l| time > l.time).unwrap_or(true) {
                latest = Some(SchemaMigrationRow {
                    scriptname,
                    time,
                    run,
                    failed,
                    error,
                    content,
                });
            }
        }
        Ok(latest)
    }

    async fn insert_migration_provisional(
        &self,
        scriptname: &str,
        time: OffsetDateTime,
        content: &str,
    ) -> Result<()> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let prepared = self
            .gateway
            .prepare(
                "INSERT INTO schema_migrations (scriptname, time, run, failed, error, content) \
                 VALUES (?, ?, false, false, '', ?)",
                &self.keyspace,
            )
            .await?;
        session
            .execute_unpaged(&prepared, (scriptname, time, content))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn mark_migration_success(&self, scriptname: &str, time: OffsetDateTime) -> Result<()> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let prepared = self
            .gateway
            .prepare(
                "UPDATE schema_migrations SET run = true, failed = false \
                 WHERE scriptname = ? AND time = ?",
                &self.keyspace,
            )
            .await?;
        session
            .execute_unpaged(&prepared, (scriptname, time))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn mark_migration_failure(
        &self,
        scriptname: &str,
        time: OffsetDateTime,
        error: &str,
    ) -> Result<()> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let prepared = self
            .gateway
            .prepare(
                "UPDATE schema_migrations SET run = false, failed = true, error = ? \
                 WHERE scriptname = ? AND time = ?",
                &self.keyspace,
            )
            .await?;
        session
            .execute_unpaged(&prepared, (error, scriptname, time))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(())
    }
}

/// In-memory fakes for exercising the election/execution/wait state machine
/// without a live cluster.
pub mod test_support {
    use super::*;
    use std::collections::HashMap;
    use tokio::sync::Mutex;

    /// An in-memory [`MigrationStore`]. Counts baseline/migration
    /// executions so concurrent-election tests can assert exactly-once
    /// execution.
    #[derive(Default)]
    pub struct FakeMigrationStore {
        pub requests: Mutex<Vec<MigrationRequestRow>>,
        pub history: Mutex<HashMap<String, Vec<SchemaMigrationRow>>>,
        pub tables: Mutex<std::collections::HashSet<String>>,
        pub ddl_exec_count: Mutex<usize>,
    }

    impl FakeMigrationStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub async fn request_count(&self) -> usize {
            self.requests.lock().await.len()
        }
    }

    #[async_trait]
    impl MigrationStore for FakeMigrationStore {
        async fn list_migration_requests(&self) -> Result<Vec<MigrationRequestRow>> {
            Ok(self.requests.lock().await.clone())
        }

        async fn insert_migration_request(&self, row: &MigrationRequestRow) -> Result<()> {
            self.requests.lock().await.push(row.clone());
            Ok(())
        }

        async fn delete_migration_request(&self, reqid: Uuid) -> Result<()> {
            self.requests.lock().await.retain(|r| r.reqid != reqid);
            Ok(())
        }

        async fn mark_migration_request_inprogress(
            &self,
            reqid: Uuid,
            lastupdate: OffsetDateTime,
        ) -> Result<()> {
            let mut requests = self.requests.lock().await;
            if let Some(r) = requests.iter_mut().find(|r| r.reqid == reqid) {
                r.inprogress = true;
                r.lastupdate = lastupdate;
            }
            Ok(())
        }

        async fn touch_migration_request(
            &self,
            reqid: Uuid,
            lastupdate: OffsetDateTime,
        ) -> Result<()> {
            let mut requests = self.requests.lock().await;
            if let Some(r) = requests.iter_mut().find(|r| r.reqid == reqid) {
                r.lastupdate = lastupdate;
            }
            Ok(())
        }

        async fn fail_migration_request(
            &self,
            reqid: Uuid,
            lastupdate: OffsetDateTime,
        ) -> Result<()> {
            let mut requests = self.requests.lock().await;
            if let Some(r) = requests.iter_mut().find(|r| r.reqid == reqid) {
                r.failed = true;
                r.inprogress = false;
                r.lastupdate = lastupdate;
            }
            Ok(())
        }

        async fn table_exists(&self, table: &str) -> Result<bool> {
            Ok(self.tables.lock().await.contains(table))
        }

        async fn execute_ddl(&self, _cql: &str) -> Result<()> {
            *self.ddl_exec_count.lock().await += 1;
            Ok(())
        }

        async fn latest_migration_history(
            &self,
            scriptname: &str,
        ) -> Result<Option<SchemaMigrationRow>> {
            Ok(self
                .history
                .lock()
                .await
                .get(scriptname)
                .and_then(|rows| rows.iter().max_by_key(|r| r.time).cloned()))
        }

        async fn insert_migration_provisional(
            &self,
            scriptname: &str,
            time: OffsetDateTime,
            content: &str,
        ) -> Result<()> {
            self.history
                .lock()
                .await
                .entry(scriptname.to_string())
                .or_default()
                .push(SchemaMigrationRow {
                    scriptname: scriptname.to_string(),
                    time,
                    run: false,
                    failed: false,
                    error: String::new(),
                    content: content.to_string(),
                });
            Ok(())
        }

        async fn mark_migration_success(&self, scriptname: &str, time: OffsetDateTime) -> Result<()> {
            let mut history = self.history.lock().await;
            if let Some(rows) = history.get_mut(scriptname) {
                if let Some(row) = rows.iter_mut().find(|r| r.time == time) {
                    row.run = true;
                    row.failed = false;
                }
            }
            Ok(())
        }

        async fn mark_migration_failure(
            &self,
            scriptname: &str,
            time: OffsetDateTime,
            error: &str,
        ) -> Result<()> {
            let mut history = self.history.lock().await;
            if let Some(rows) = history.get_mut(scriptname) {
                if let Some(row) = rows.iter_mut().find(|r| r.time == time) {
                    row.run = false;
                    row.failed = true;
                    row.error = error.to_string();
                }
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::FakeMigrationStore;
    use super::*;
    use crate::schema::{CatalogEntry, Catalog};

    fn empty_catalog() -> Catalog {
        Catalog::default()
    }

    fn fast_timing() -> CoordinatorTiming {
        CoordinatorTiming {
            settle: Duration::from_millis(5),
            poll_interval: Duration::from_millis(5),
            stale_after: Duration::from_secs(60),
        }
    }

    #[tokio::test]
    async fn solo_node_elects_itself_and_completes() {
        let store = Arc::new(FakeMigrationStore::new());
        let coordinator =
            Coordinator::new(store.clone(), empty_catalog()).with_timing(fast_timing());

        coordinator
            .request_migration(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(store.request_count().await, 0);
    }

    #[tokio::test]
    async fn baseline_skipped_when_table_exists() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("users.cql");
        std::fs::write(&file, "CREATE TABLE users (...)").unwrap();

        let store = Arc::new(FakeMigrationStore::new());
        store.tables.lock().await.insert("users".to_string());

        let catalog = Catalog {
            baseline: vec![CatalogEntry {
                path: file,
                filename: "users.cql".to_string(),
            }],
            migrations: Vec::new(),
        };

        let coordinator = Coordinator::new(store.clone(), catalog).with_timing(fast_timing());
        coordinator
            .request_migration(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(*store.ddl_exec_count.lock().await, 0);
    }

    #[tokio::test]
    async fn baseline_runs_once_when_table_absent() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("orgs.cql");
        std::fs::write(&file, "CREATE TABLE orgs (...)").unwrap();

        let store = Arc::new(FakeMigrationStore::new());
        let catalog = Catalog {
            baseline: vec![CatalogEntry {
                path: file,
                filename: "orgs.cql".to_string(),
            }],
            migrations: Vec::new(),
        };

        let coordinator = Coordinator::new(store.clone(), catalog).with_timing(fast_timing());
        coordinator
            .request_migration(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(*store.ddl_exec_count.lock().await, 1);
    }

    #[tokio::test]
    async fn migration_script_applied_once_and_then_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("001_add_sessions.cql");
        std::fs::write(&file, "CREATE TABLE sessions (...)").unwrap();

        let store = Arc::new(FakeMigrationStore::new());
        let catalog = Catalog {
            baseline: Vec::new(),
            migrations: vec![CatalogEntry {
                path: file,
                filename: "001_add_sessions.cql".to_string(),
            }],
        };

        let coordinator = Coordinator::new(store.clone(), catalog).with_timing(fast_timing());
        coordinator
            .request_migration(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*store.ddl_exec_count.lock().await, 1);

        // Second invocation: the script is already applied, skip it.
        coordinator
            .request_migration(&CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(*store.ddl_exec_count.lock().await, 1);
    }

    #[tokio::test]
    async fn stale_failed_request_is_reaped_and_reelected() {
        let store = Arc::new(FakeMigrationStore::new());
        let stale = MigrationRequestRow {
            reqid: Uuid::new_v4(),
            reqtime: OffsetDateTime::now_utc() - Duration::from_secs(3600),
            inprogress: true,
            failed: true,
            lastupdate: OffsetDateTime::now_utc() - Duration::from_secs(3600),
        };
        store.insert_migration_request(&stale).await.unwrap();

        let coordinator =
            Coordinator::new(store.clone(), empty_catalog()).with_timing(fast_timing());
        coordinator
            .request_migration(&CancellationToken::new())
            .await
            .unwrap();

        // The stale row was reaped, we nominated and completed, request table
        // is empty again.
        assert_eq!(store.request_count().await, 0);
    }

    #[tokio::test]
    async fn live_request_causes_wait_then_repair_on_cancel() {
        let store = Arc::new(FakeMigrationStore::new());
        let live = MigrationRequestRow {
            reqid: Uuid::new_v4(),
            reqtime: OffsetDateTime::now_utc(),
            inprogress: true,
            failed: false,
            lastupdate: OffsetDateTime::now_utc(),
        };
        store.insert_migration_request(&live).await.unwrap();

        let coordinator =
            Coordinator::new(store.clone(), empty_catalog()).with_timing(fast_timing());

        let cancel = CancellationToken::new();
        cancel.cancel();

        // Cancelled before the first poll tick fires; returns immediately
        // without mutating the (still live) request.
        coordinator.request_migration(&cancel).await.unwrap();
        assert_eq!(store.request_count().await, 1);
    }

    #[tokio::test]
    async fn winner_tie_break_is_deterministic_by_reqid() {
        let store = Arc::new(FakeMigrationStore::new());
        let t = OffsetDateTime::now_utc();
        let low = Uuid::from_bytes([0u8; 16]);
        let high = Uuid::from_bytes([0xffu8; 16]);

        store
            .insert_migration_request(&MigrationRequestRow {
                reqid: high,
                reqtime: t,
                inprogress: false,
                failed: false,
                lastupdate: t,
            })
            .await
            .unwrap();
        store
            .insert_migration_request(&MigrationRequestRow {
                reqid: low,
                reqtime: t,
                inprogress: false,
                failed: false,
                lastupdate: t,
            })
            .await
            .unwrap();

        let mut requests = store.list_migration_requests().await.unwrap();
        requests.sort_by(|a, b| {
            a.reqtime
                .cmp(&b.reqtime)
                .then_with(|| a.reqid.as_bytes().cmp(b.reqid.as_bytes()))
        });
        assert_eq!(requests[0].reqid, low);
    }
}
