//! Auth Data Layer: typed operations on users, orgs, org settings, global
//! settings, sessions, session keys, password hashes, and password resets.
//!
//! Grounded 1:1 on `original_source/database/authdb.py`'s `AuthDB` class.
//! Where the original wraps each method in a `@DB.sessionQuery(keyspace)`
//! decorator that injects a session handle, this takes the Store Gateway
//! and keyspace as explicit constructor fields instead, per `spec.md` §9.

use scylla::statement::Consistency;
use time::{Duration, OffsetDateTime};
use tracing::{error, info};
use uuid::Uuid;

use crate::credentials;
use crate::error::{Error, Result};
use crate::store::StoreGateway;
use std::sync::Arc;

pub mod model {
    use time::OffsetDateTime;
    use uuid::Uuid;

    #[derive(Debug, Clone, PartialEq)]
    pub struct User {
        pub username: String,
        pub org: String,
        pub parentuser: Option<String>,
        pub createdate: OffsetDateTime,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct Org {
        pub org: String,
        pub parentorg: Option<String>,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct PasswordReset {
        pub org: String,
        pub username: String,
        pub requestdate: OffsetDateTime,
        pub resetid: Uuid,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct SessionRecord {
        pub org: String,
        pub username: String,
        pub sessionid: Uuid,
        pub startdate: OffsetDateTime,
        pub lastupdate: OffsetDateTime,
    }

    #[derive(Debug, Clone, PartialEq)]
    pub struct SessionKeyRecord {
        pub key: String,
        pub org: String,
        pub username: String,
        pub sessionid: Uuid,
        pub expiry: OffsetDateTime,
    }
}

use model::{Org, PasswordReset, SessionKeyRecord, SessionRecord, User};

/// Cassandra consistency level plus whatever else a write call site needs
/// to document, replacing the original's dynamic `consistency=` keyword
/// argument with a concrete record.
#[derive(Debug, Clone, Copy)]
pub struct WriteOptions {
    pub consistency: Consistency,
}

impl WriteOptions {
    pub const QUORUM: WriteOptions = WriteOptions {
        consistency: Consistency::Quorum,
    };
    pub const LOCAL_QUORUM: WriteOptions = WriteOptions {
        consistency: Consistency::LocalQuorum,
    };
}

impl Default for WriteOptions {
    /// Data-path writes default to `LOCAL_QUORUM`; coordination, password,
    /// and org-creation call sites pass [`WriteOptions::QUORUM`] explicitly.
    fn default() -> Self {
        Self::LOCAL_QUORUM
    }
}

/// How long a password reset stays valid after `requestdate`.
const PASSWORD_RESET_VALIDITY: Duration = Duration::days(7);

/// How long an issued session key stays valid.
const SESSION_KEY_VALIDITY: Duration = Duration::hours(24);

/// Typed access to every non-coordination table in the keyspace.
pub struct AuthDb {
    gateway: Arc<StoreGateway>,
    keyspace: String,
}

impl AuthDb {
    pub fn new(gateway: Arc<StoreGateway>, keyspace: impl Into<String>) -> Self {
        Self {
            gateway,
            keyspace: keyspace.into(),
        }
    }

    pub fn keyspace(&self) -> &str {
        &self.keyspace
    }

    // ---- orgs ----------------------------------------------------------

    pub async fn create_org(
        &self,
        org: &str,
        parentorg: Option<&str>,
        opts: WriteOptions,
    ) -> Result<()> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let mut prepared = self
            .gateway
            .prepare(
                "INSERT INTO orgs (org, parentorg) VALUES (?, ?)",
                &self.keyspace,
            )
            .await?;
        prepared.set_consistency(opts.consistency);
        session
            .execute_unpaged(&prepared, (org, parentorg))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    pub async fn get_org(&self, org: &str) -> Result<Option<Org>> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let prepared = self
            .gateway
            .prepare("SELECT org, parentorg FROM orgs WHERE org = ?", &self.keyspace)
            .await?;
        let rows = session
            .execute_unpaged(&prepared, (org,))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?
            .into_rows_result()
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        for row in rows
            .rows::<(String, Option<String>)>()
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?
        {
            let (org, parentorg) = row.map_err(|e| Error::StoreUnavailable(e.to_string()))?;
            return Ok(Some(Org { org, parentorg }));
        }
        Ok(None)
    }

    pub async fn org_exists(&self, org: &str) -> Result<bool> {
        Ok(self.get_org(org).await?.is_some())
    }

    // ---- org/global settings --------------------------------------------

    pub async fn get_org_setting(&self, org: &str, setting: &str) -> Result<Option<String>> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let prepared = self
            .gateway
            .prepare(
                "SELECT value FROM orgsettings WHERE org = ? AND setting = ?",
                &self.keyspace,
            )
            .await?;
        let rows = session
            .execute_unpaged(&prepared, (org, setting))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?
            .into_rows_result()
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        for row in rows
            .rows::<(String,)>()
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?
        {
            let (value,) = row.map_err(|e| Error::StoreUnavailable(e.to_string()))?;
            return Ok(Some(value));
        }
        Ok(None)
    }

    pub async fn set_org_setting(
        &self,
        org: &str,
        setting: &str,
        value: &str,
        opts: WriteOptions,
    ) -> Result<()> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let mut prepared = self
            .gateway
            .prepare(
                "INSERT INTO orgsettings (org, setting, value) VALUES (?, ?, ?)",
                &self.keyspace,
            )
            .await?;
        prepared.set_consistency(opts.consistency);
        session
            .execute_unpaged(&prepared, (org, setting, value))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    pub async fn get_global_setting(&self, setting: &str) -> Result<Option<String>> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let prepared = self
            .gateway
            .prepare(
                "SELECT value FROM globalsettings WHERE setting = ?",
                &self.keyspace,
            )
            .await?;
        let rows = session
            .execute_unpaged(&prepared, (setting,))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?
            .into_rows_result()
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        for row in rows
            .rows::<(String,)>()
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?
        {
            let (value,) = row.map_err(|e| Error::StoreUnavailable(e.to_string()))?;
            return Ok(Some(value));
        }
        Ok(None)
    }

    pub async fn set_global_setting(
        &self,
        setting: &str,
        value: &str,
        opts: WriteOptions,
    ) -> Result<()> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let mut prepared = self
            .gateway
            .prepare(
                "INSERT INTO globalsettings (setting, value) VALUES (?, ?)",
                &self.keyspace,
            )
            .await?;
        prepared.set_consistency(opts.consistency);
        session
            .execute_unpaged(&prepared, (setting, value))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    /// `registrationOpen` is stored as text but read as a boolean gate:
    /// `"0"` and `""` (or an absent setting) mean closed, anything else
    /// means open.
    pub fn is_registration_open(setting_value: Option<&str>) -> bool {
        !matches!(setting_value, None | Some("0") | Some(""))
    }

    // ---- users -----------------------------------------------------------

    pub async fn create_user(
        &self,
        org: &str,
        username: &str,
        email: &str,
        parentuser: Option<&str>,
        opts: WriteOptions,
    ) -> Result<()> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let mut prepared = self
            .gateway
            .prepare(
                "INSERT INTO users (org, username, email, parentuser, createdate) \
                 VALUES (?, ?, ?, ?, ?)",
                &self.keyspace,
            )
            .await?;
        prepared.set_consistency(opts.consistency);
        session
            .execute_unpaged(
                &prepared,
                (org, username, email, parentuser, OffsetDateTime::now_utc()),
            )
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    pub async fn get_user(&self, org: &str, username: &str) -> Result<Option<User>> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let prepared = self
            .gateway
            .prepare(
                "SELECT username, org, parentuser, createdate FROM users \
                 WHERE org = ? AND username = ?",
                &self.keyspace,
            )
            .await?;
        let rows = session
            .execute_unpaged(&prepared, (org, username))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?
            .into_rows_result()
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        for row in rows
            .rows::<(String, String, Option<String>, OffsetDateTime)>()
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?
        {
            let (username, org, parentuser, createdate) =
                row.map_err(|e| Error::StoreUnavailable(e.to_string()))?;
            return Ok(Some(User {
                username,
                org,
                parentuser,
                createdate,
            }));
        }
        Ok(None)
    }

    pub async fn user_exists(&self, org: &str, username: &str) -> Result<bool> {
        Ok(self.get_user(org, username).await?.is_some())
    }

    pub async fn get_user_hash(&self, org: &str, username: &str) -> Result<Option<String>> {
        self.get_user_text_field(org, username, "hash").await
    }

    pub async fn get_user_salt(&self, org: &str, username: &str) -> Result<Option<String>> {
        self.get_user_text_field(org, username, "salt").await
    }

    async fn get_user_text_field(
        &self,
        org: &str,
        username: &str,
        field: &'static str,
    ) -> Result<Option<String>> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        // `field` is one of a fixed set of internal constants, never user
        // input, so interpolating it into the statement text does not
        // introduce injection risk.
        let stmt = format!("SELECT {field} FROM users WHERE org = ? AND username = ?");
        let prepared = self.gateway.prepare(&stmt, &self.keyspace).await?;
        let rows = session
            .execute_unpaged(&prepared, (org, username))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?
            .into_rows_result()
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        for row in rows
            .rows::<(Option<String>,)>()
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?
        {
            let (value,) = row.map_err(|e| Error::StoreUnavailable(e.to_string()))?;
            return Ok(value);
        }
        Ok(None)
    }

    pub async fn set_password(
        &self,
        org: &str,
        username: &str,
        hash: &str,
        salt: &str,
        opts: WriteOptions,
    ) -> Result<()> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let mut prepared = self
            .gateway
            .prepare(
                "UPDATE users SET hash = ?, salt = ? WHERE org = ? AND username = ?",
                &self.keyspace,
            )
            .await?;
        prepared.set_consistency(opts.consistency);
        session
            .execute_unpaged(&prepared, (hash, salt, org, username))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    /// Recompute the Argon2 hash of `password` (the client's PBKDF2
    /// password-equivalent) with the user's stored salt and compare it,
    /// timing-safe, against the stored hash.
    pub async fn validate_password(&self, org: &str, username: &str, password: &str) -> Result<bool> {
        let salt = match self.get_user_salt(org, username).await? {
            Some(s) => s,
            None => return Ok(false),
        };
        let stored_hash = match self.get_user_hash(org, username).await? {
            Some(h) => h,
            None => return Ok(false),
        };
        let computed = credentials::hash_password(password, &salt, credentials::Algorithm::Argon2)?;
        Ok(credentials::verify_hash(&computed, &stored_hash))
    }

    // ---- password resets ---------------------------------------------------

    pub async fn create_password_reset(&self, org: &str, username: &str) -> Result<Uuid> {
        let resetid = Uuid::new_v4();
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let mut prepared = self
            .gateway
            .prepare(
                "INSERT INTO userpasswordresets (org, username, requestdate, resetid) \
                 VALUES (?, ?, ?, ?)",
                &self.keyspace,
            )
            .await?;
        prepared.set_consistency(WriteOptions::LOCAL_QUORUM.consistency);

        session
            .execute_unpaged(&prepared, (org, username, OffsetDateTime::now_utc(), resetid))
            .await
            .map_err(|e| {
                error!(org, username, error = %e, "failed to create password reset");
                Error::StoreUnavailable(e.to_string())
            })?;
        Ok(resetid)
    }

    pub async fn get_password_reset(&self, org: &str, username: &str) -> Result<Option<PasswordReset>> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let prepared = self
            .gateway
            .prepare(
                "SELECT username, org, requestdate, resetid FROM userpasswordresets \
                 WHERE org = ? AND username = ?",
                &self.keyspace,
            )
            .await?;
        let rows = session
            .execute_unpaged(&prepared, (org, username))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?
            .into_rows_result()
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        for row in rows
            .rows::<(String, String, OffsetDateTime, Uuid)>()
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?
        {
            let (username, org, requestdate, resetid) =
                row.map_err(|e| Error::StoreUnavailable(e.to_string()))?;
            return Ok(Some(PasswordReset {
                org,
                username,
                requestdate,
                resetid,
            }));
        }
        Ok(None)
    }

    /// True iff a reset record exists, `requestdate + 7d > now`, and
    /// `resetid` matches the stored UUID's string form.
    pub async fn validate_password_reset(&self, org: &str, username: &str, resetid: &str) -> Result<bool> {
        let record = match self.get_password_reset(org, username).await? {
            Some(r) => r,
            None => return Ok(false),
        };
        let still_valid = record.requestdate + PASSWORD_RESET_VALIDITY > OffsetDateTime::now_utc();
        Ok(still_valid && record.resetid.to_string() == resetid)
    }

    pub async fn delete_password_reset(&self, org: &str, username: &str) -> Result<()> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let mut prepared = self
            .gateway
            .prepare(
                "DELETE FROM userpasswordresets WHERE org = ? AND username = ?",
                &self.keyspace,
            )
            .await?;
        prepared.set_consistency(WriteOptions::LOCAL_QUORUM.consistency);
        session
            .execute_unpaged(&prepared, (org, username))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(())
    }

    // ---- sessions ----------------------------------------------------------

    pub async fn create_user_session(&self, org: &str, username: &str) -> Result<Uuid> {
        let sessionid = Uuid::new_v4();
        let now = OffsetDateTime::now_utc();
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let mut prepared = self
            .gateway
            .prepare(
                "INSERT INTO sessions (org, username, sessionid, startdate, lastupdate) \
                 VALUES (?, ?, ?, ?, ?)",
                &self.keyspace,
            )
            .await?;
        prepared.set_consistency(WriteOptions::LOCAL_QUORUM.consistency);
        session
            .execute_unpaged(&prepared, (org, username, sessionid, now, now))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        info!(org, username, %sessionid, "session created");
        Ok(sessionid)
    }

    pub async fn create_user_session_key(
        &self,
        org: &str,
        username: &str,
        sessionid: Uuid,
    ) -> Result<String> {
        let key = credentials::generate_session_key();
        let expiry = OffsetDateTime::now_utc() + SESSION_KEY_VALIDITY;
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let mut prepared = self
            .gateway
            .prepare(
                "INSERT INTO sessionkeys (key, org, username, sessionid, expiry) \
                 VALUES (?, ?, ?, ?, ?)",
                &self.keyspace,
            )
            .await?;
        prepared.set_consistency(WriteOptions::LOCAL_QUORUM.consistency);
        session
            .execute_unpaged(&prepared, (&key, org, username, sessionid, expiry))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(key)
    }

    pub async fn get_user_sessions(&self, org: &str, username: &str) -> Result<Vec<SessionRecord>> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let prepared = self
            .gateway
            .prepare(
                "SELECT org, username, sessionid, startdate, lastupdate FROM sessions \
                 WHERE org = ? AND username = ?",
                &self.keyspace,
            )
            .await?;
        let rows = session
            .execute_unpaged(&prepared, (org, username))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?
            .into_rows_result()
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        let mut out = Vec::new();
        for row in rows
            .rows::<(String, String, Uuid, OffsetDateTime, OffsetDateTime)>()
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?
        {
            let (org, username, sessionid, startdate, lastupdate) =
                row.map_err(|e| Error::StoreUnavailable(e.to_string()))?;
            out.push(SessionRecord {
                org,
                username,
                sessionid,
                startdate,
                lastupdate,
            });
        }
        Ok(out)
    }

    pub async fn get_user_session(
        &self,
        org: &str,
        username: &str,
        sessionid: Uuid,
    ) -> Result<Option<SessionRecord>> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let prepared = self
            .gateway
            .prepare(
                "SELECT org, username, sessionid, startdate, lastupdate FROM sessions \
                 WHERE org = ? AND username = ? AND sessionid = ?",
                &self.keyspace,
            )
            .await?;
        let rows = session
            .execute_unpaged(&prepared, (org, username, sessionid))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?
            .into_rows_result()
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        for row in rows
            .rows::<(String, String, Uuid, OffsetDateTime, OffsetDateTime)>()
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?
        {
            let (org, username, sessionid, startdate, lastupdate) =
                row.map_err(|e| Error::StoreUnavailable(e.to_string()))?;
            return Ok(Some(SessionRecord {
                org,
                username,
                sessionid,
                startdate,
                lastupdate,
            }));
        }
        Ok(None)
    }

    async fn get_session_key(&self, key: &str) -> Result<Option<SessionKeyRecord>> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let prepared = self
            .gateway
            .prepare(
                "SELECT key, org, username, sessionid, expiry FROM sessionkeys WHERE key = ?",
                &self.keyspace,
            )
            .await?;
        let rows = session
            .execute_unpaged(&prepared, (key,))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?
            .into_rows_result()
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;

        for row in rows
            .rows::<(String, String, String, Uuid, OffsetDateTime)>()
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?
        {
            let (key, org, username, sessionid, expiry) =
                row.map_err(|e| Error::StoreUnavailable(e.to_string()))?;
            return Ok(Some(SessionKeyRecord {
                key,
                org,
                username,
                sessionid,
                expiry,
            }));
        }
        Ok(None)
    }

    pub async fn get_user_session_by_key(&self, key: &str) -> Result<Option<SessionRecord>> {
        let key_record = match self.get_session_key(key).await? {
            Some(k) => k,
            None => return Ok(None),
        };
        self.get_user_session(&key_record.org, &key_record.username, key_record.sessionid)
            .await
    }

    /// Validate an opaque session key. Unknown or expired keys are
    /// indistinguishable from each other to the caller: both report
    /// `(false, "", "")`.
    pub async fn validate_session_key(&self, key: &str) -> Result<(bool, String, String)> {
        match self.get_session_key(key).await? {
            Some(record) if record.expiry > OffsetDateTime::now_utc() => {
                Ok((true, record.username, record.org))
            }
            _ => Ok((false, String::new(), String::new())),
        }
    }

    pub async fn revoke_session_key(&self, key: &str) -> Result<()> {
        let session = self.gateway.session(Some(&self.keyspace)).await?;
        let mut prepared = self
            .gateway
            .prepare("DELETE FROM sessionkeys WHERE key = ?", &self.keyspace)
            .await?;
        prepared.set_consistency(WriteOptions::LOCAL_QUORUM.consistency);
        session
            .execute_unpaged(&prepared, (key,))
            .await
            .map_err(|e| Error::StoreUnavailable(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registration_open_treats_zero_and_empty_as_closed() {
        assert!(!AuthDb::is_registration_open(None));
        assert!(!AuthDb::is_registration_open(Some("0")));
        assert!(!AuthDb::is_registration_open(Some("")));
    }

    #[test]
    fn registration_open_treats_other_values_as_open() {
        assert!(AuthDb::is_registration_open(Some("1")));
        assert!(AuthDb::is_registration_open(Some("true")));
        assert!(AuthDb::is_registration_open(Some("yes")));
    }

    #[test]
    fn write_options_default_is_local_quorum() {
        let opts = WriteOptions::default();
        assert!(matches!(opts.consistency, Consistency::LocalQuorum));
    }
}
