use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::ApiError;

const ACCESS_KIND: &str = "access";
const REFRESH_KIND: &str = "refresh";

/// Cookie-style lifetimes: access 1 day, refresh 7 days.
const ACCESS_TTL_HOURS: i64 = 24;
const REFRESH_TTL_HOURS: i64 = 24 * 7;

/// Durable store for the two credential values the client is allowed to
/// persist. An expired row reads back as `None`; nothing else is kept on
/// the client side.
pub struct CredentialStore {
    conn: Mutex<Connection>,
}

impl CredentialStore {
    pub fn open(path: &str) -> Result<Self, ApiError> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    /// In-memory store, used by tests and throwaway sessions.
    pub fn in_memory() -> Result<Self, ApiError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init()?;
        Ok(store)
    }

    fn init(&self) -> Result<(), ApiError> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS credentials (
              kind TEXT PRIMARY KEY,
              token TEXT NOT NULL,
              expires_at TEXT NOT NULL,
              stored_at TEXT NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    /// Overwrite both credentials, stamping their fixed expirations.
    pub fn store(&self, access: &str, refresh: &str) -> Result<(), ApiError> {
        let now = Utc::now();
        self.put(ACCESS_KIND, access, now + Duration::hours(ACCESS_TTL_HOURS), now)?;
        self.put(REFRESH_KIND, refresh, now + Duration::hours(REFRESH_TTL_HOURS), now)?;
        Ok(())
    }

    fn put(
        &self,
        kind: &str,
        token: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), ApiError> {
        self.conn.lock().execute(
            "INSERT INTO credentials (kind, token, expires_at, stored_at) VALUES (?, ?, ?, ?)
             ON CONFLICT(kind) DO UPDATE SET token = excluded.token,
               expires_at = excluded.expires_at, stored_at = excluded.stored_at",
            params![kind, token, expires_at.to_rfc3339(), now.to_rfc3339()],
        )?;
        Ok(())
    }

    pub fn access_token(&self) -> Result<Option<String>, ApiError> {
        self.unexpired(ACCESS_KIND)
    }

    pub fn refresh_token(&self) -> Result<Option<String>, ApiError> {
        self.unexpired(REFRESH_KIND)
    }

    fn unexpired(&self, kind: &str) -> Result<Option<String>, ApiError> {
        let conn = self.conn.lock();
        let row = conn
            .query_row(
                "SELECT token, expires_at FROM credentials WHERE kind = ?",
                params![kind],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()?;

        let Some((token, expires_at)) = row else {
            return Ok(None);
        };
        let still_valid = DateTime::parse_from_rfc3339(&expires_at)
            .map(|exp| exp > Utc::now())
            .unwrap_or(false);
        Ok(still_valid.then_some(token))
    }

    /// Drop both credentials. Called after a failed refresh so the next
    /// request starts from a logged-out state.
    pub fn clear(&self) -> Result<(), ApiError> {
        self.conn.lock().execute("DELETE FROM credentials", [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_and_clears() {
        let store = CredentialStore::in_memory().unwrap();
        assert_eq!(store.access_token().unwrap(), None);

        store.store("acc-1", "ref-1").unwrap();
        assert_eq!(store.access_token().unwrap().as_deref(), Some("acc-1"));
        assert_eq!(store.refresh_token().unwrap().as_deref(), Some("ref-1"));

        store.store("acc-2", "ref-2").unwrap();
        assert_eq!(store.access_token().unwrap().as_deref(), Some("acc-2"));

        store.clear().unwrap();
        assert_eq!(store.access_token().unwrap(), None);
        assert_eq!(store.refresh_token().unwrap(), None);
    }

    #[test]
    fn expired_token_reads_back_as_none() {
        let store = CredentialStore::in_memory().unwrap();
        let past = Utc::now() - Duration::hours(1);
        store.put(ACCESS_KIND, "stale", past, Utc::now()).unwrap();
        assert_eq!(store.access_token().unwrap(), None);
    }

    #[test]
    fn persists_across_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("creds.db");
        let path = path.to_str().unwrap();

        {
            let store = CredentialStore::open(path).unwrap();
            store.store("acc", "ref").unwrap();
        }
        let store = CredentialStore::open(path).unwrap();
        assert_eq!(store.access_token().unwrap().as_deref(), Some("acc"));
    }
}
