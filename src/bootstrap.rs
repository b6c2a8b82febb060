//! Bootstrap Orchestrator: first-run setup of a keyspace (keyspace itself,
//! coordination tables, then migration) and idempotent seeding of the
//! default org and its admin user.
//!
//! Grounded on `original_source/database/db.py::DB.setupDB` for keyspace/
//! coordination-table creation, and `database/authdb.py::AuthDB.createDefaultOrg`
//! for the default-org seeding sequence.

use std::sync::Arc;

use tokio::time::{sleep, Duration};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::authdb::{AuthDb, WriteOptions};
use crate::config::Config;
use crate::error::Result;
use crate::migrate::{Coordinator, ScyllaMigrationStore};
use crate::schema::{self, Catalog};
use crate::store::StoreGateway;

/// Setting name under `globalsettings` naming the canonical default org
/// (`spec.md` §3).
const DEFAULTORG_SETTING: &str = "defaultorg";
/// Setting name under `orgsettings` naming that org's admin (`user@org`).
const ADMINS_SETTING: &str = "admins";

/// Replication settings the original hard-codes for its keyspace creation:
/// `SimpleStrategy` with replication factor 1. A production deployment
/// overrides this via its own baseline keyspace DDL if it needs
/// `NetworkTopologyStrategy`; this orchestrator only guarantees the
/// keyspace *exists* before handing off to the Migration Coordinator.
const KEYSPACE_DDL: &str = "CREATE KEYSPACE IF NOT EXISTS {keyspace} \
    WITH replication = {{'class': 'SimpleStrategy', 'replication_factor': 1}}";

const MIGRATION_REQUESTS_TABLE_DDL: &str = "CREATE TABLE IF NOT EXISTS \
    schema_migration_requests (\
        reqid uuid PRIMARY KEY, \
        reqtime timestamp, \
        inprogress boolean, \
        failed boolean, \
        lastupdate timestamp\
    )";

const MIGRATIONS_TABLE_DDL: &str = "CREATE TABLE IF NOT EXISTS schema_migrations (\
        scriptname text, \
        time timestamp, \
        run boolean, \
        failed boolean, \
        error text, \
        content text, \
        PRIMARY KEY (scriptname, time)\
    ) WITH CLUSTERING ORDER BY (time DESC)";

/// Idle period after creating the coordination tables before any node
/// attempts election, giving schema changes time to propagate across the
/// cluster. Matches the original's `time.sleep(1)` in `DB.setupDB`.
const POST_CREATE_SETTLE: Duration = Duration::from_secs(1);

/// Bring a fresh or partially-provisioned cluster up to the catalog's
/// target schema state for `keyspace`, then return a [`Coordinator`] ready
/// for ongoing use (e.g. re-running on every process start).
pub async fn setup_db(
    gateway: Arc<StoreGateway>,
    keyspace: &str,
    schema_root: &std::path::Path,
    cancel: &CancellationToken,
) -> Result<Coordinator<ScyllaMigrationStore>> {
    info!(keyspace, "creating keyspace if absent");
    let bare = gateway.session(None).await?;
    let ddl = KEYSPACE_DDL.replace("{keyspace}", keyspace);
    bare.query_unpaged(ddl, &[])
        .await
        .map_err(|e| crate::error::Error::StoreUnavailable(e.to_string()))?;

    info!(keyspace, "creating coordination tables if absent");
    let session = gateway.session(Some(keyspace)).await?;
    session
        .query_unpaged(MIGRATION_REQUESTS_TABLE_DDL, &[])
        .await
        .map_err(|e| crate::error::Error::StoreUnavailable(e.to_string()))?;
    session
        .query_unpaged(MIGRATIONS_TABLE_DDL, &[])
        .await
        .map_err(|e| crate::error::Error::StoreUnavailable(e.to_string()))?;

    sleep(POST_CREATE_SETTLE).await;

    let catalog: Catalog = schema::load_catalog(schema_root, keyspace);
    let store = Arc::new(ScyllaMigrationStore::new(gateway, keyspace));
    let coordinator = Coordinator::new(store, catalog);

    coordinator.request_migration(cancel).await?;
    Ok(coordinator)
}

/// Idempotently seed the default org and its admin user. Ports
/// `original_source/database/authdb.py::AuthDB.createDefaultOrg`'s
/// three-step check one for one: resolve (and if absent, define) the
/// `defaultorg` global setting, create that org if it doesn't exist, then
/// define its `admins` setting and create the admin user if the org has no
/// admin yet. Safe to call on every process start.
pub async fn create_default_org(authdb: &AuthDb, config: &Config) -> Result<()> {
    let mut default_org = authdb.get_global_setting(DEFAULTORG_SETTING).await?;

    if default_org.is_none() {
        info!(
            org = %config.defaultorg.name,
            "no default org defined, defining as configured name"
        );
        authdb
            .set_global_setting(DEFAULTORG_SETTING, &config.defaultorg.name, WriteOptions::QUORUM)
            .await?;
        default_org = authdb.get_global_setting(DEFAULTORG_SETTING).await?;
    }
    let org_name = default_org.expect("just set the setting above if it was absent");

    let mut org = authdb.get_org(&org_name).await?;
    if org.is_none() {
        info!(org = %org_name, "default org does not exist, creating");
        authdb.create_org(&org_name, None, WriteOptions::QUORUM).await?;
        org = authdb.get_org(&org_name).await?;
    }
    let org = org.expect("just created the org above if it was absent");

    let admins = authdb.get_org_setting(&org.org, ADMINS_SETTING).await?;
    if admins.is_none() {
        let admin_user = &config.defaultorg.defaultadminuser;
        let admin_email = &config.defaultorg.defaultadminemail;

        info!(org = %org.org, admin_user, "default org has no admin defined, adding one");
        authdb
            .set_org_setting(
                &org.org,
                ADMINS_SETTING,
                &format!("{admin_user}@{}", org.org),
                WriteOptions::default(),
            )
            .await?;

        if !authdb.user_exists(&org.org, admin_user).await? {
            info!(org = %org.org, admin_user, "creating default admin account");
            authdb
                .create_user(&org.org, admin_user, admin_email, None, WriteOptions::QUORUM)
                .await?;
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authdb::AuthDb;
    use crate::config::Config;

    // setup_db requires a reachable cluster (keyspace/table DDL); its
    // sequencing is covered indirectly by crate::migrate's Coordinator
    // tests against FakeMigrationStore. create_default_org only depends on
    // AuthDb, which in turn only depends on StoreGateway, so it is equally
    // untestable without a live cluster here. The three-step idempotency
    // checks (global setting / org row / org admins setting) are simple
    // enough to review by inspection; a future addition of an AuthDbStore
    // trait mirroring MigrationStore would let this be covered the same
    // way.

    #[test]
    fn default_org_config_fields_are_nonempty() {
        let config = Config::default();
        assert!(!config.defaultorg.name.is_empty());
        assert!(!config.defaultorg.defaultadminuser.is_empty());
    }

    #[allow(dead_code)]
    fn type_check_signatures(authdb: &AuthDb, config: &Config) {
        let _ = create_default_org(authdb, config);
    }
}
