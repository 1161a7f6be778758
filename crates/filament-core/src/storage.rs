//! Cluster-visible sessions and the account location directory.
//!
//! Two logical keyspaces share a TTL: `session(channel_id)` holds the full
//! [`Session`] record, `location(account[, device])` the compact
//! [`Location`] used for addressing. Both are written by `add` and both
//! deleted by `delete`, so they never disagree for longer than one call.
//!
//! The production backend (a redis-style TTL store with pipelined
//! multi-get) plugs in behind [`SessionStorage`]; [`MemoryStorage`] is the
//! in-process realization for tests and single-node deployments.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;
use filament_proto::{Location, Session};

use crate::{Error, Result};

/// Default session/location lifetime.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(48 * 60 * 60);

/// The session store contract.
///
/// *Not found* is always [`Error::SessionNil`], distinct from transport
/// errors, so handlers can treat it as "offline".
#[async_trait]
pub trait SessionStorage: Send + Sync {
    /// Write both the session record and its location projection.
    async fn add(&self, session: &Session) -> Result<()>;

    /// Delete both entries.
    async fn delete(&self, account: &str, channel_id: &str) -> Result<()>;

    /// The session behind a channel id.
    async fn get(&self, channel_id: &str) -> Result<Session>;

    /// The location of an account (empty device means the default one).
    async fn get_location(&self, account: &str, device: &str) -> Result<Location>;

    /// Multi-get of locations. Absent accounts are silently skipped; an
    /// empty result is [`Error::SessionNil`]. Backends that support it
    /// issue this as one pipeline.
    async fn get_locations(&self, accounts: &[&str]) -> Result<Vec<Location>>;
}

fn location_key(account: &str, device: &str) -> String {
    if device.is_empty() {
        return account.to_owned();
    }

    format!("{account}:{device}")
}

struct Expiring<T> {
    value: T,
    expires_at: Instant,
}

impl<T: Clone> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self { value, expires_at: Instant::now() + ttl }
    }

    fn live(&self) -> Option<T> {
        (Instant::now() < self.expires_at).then(|| self.value.clone())
    }
}

/// In-process session store with lazy TTL expiry.
pub struct MemoryStorage {
    sessions: DashMap<String, Expiring<Session>>,
    locations: DashMap<String, Expiring<Location>>,
    ttl: Duration,
}

impl MemoryStorage {
    /// A store with the default 48 h TTL.
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_SESSION_TTL)
    }

    /// A store with a custom TTL.
    pub fn with_ttl(ttl: Duration) -> Self {
        Self { sessions: DashMap::new(), locations: DashMap::new(), ttl }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SessionStorage for MemoryStorage {
    async fn add(&self, session: &Session) -> Result<()> {
        let location = session.location();

        self.locations.insert(
            location_key(&session.account, &session.device),
            Expiring::new(location, self.ttl),
        );
        self.sessions
            .insert(session.channel_id.clone(), Expiring::new(session.clone(), self.ttl));

        Ok(())
    }

    async fn delete(&self, account: &str, channel_id: &str) -> Result<()> {
        self.locations.remove(&location_key(account, ""));
        self.sessions.remove(channel_id);

        Ok(())
    }

    async fn get(&self, channel_id: &str) -> Result<Session> {
        self.sessions
            .get(channel_id)
            .and_then(|entry| entry.value().live())
            .ok_or(Error::SessionNil)
    }

    async fn get_location(&self, account: &str, device: &str) -> Result<Location> {
        self.locations
            .get(&location_key(account, device))
            .and_then(|entry| entry.value().live())
            .ok_or(Error::SessionNil)
    }

    async fn get_locations(&self, accounts: &[&str]) -> Result<Vec<Location>> {
        let found: Vec<Location> = accounts
            .iter()
            .filter_map(|account| {
                self.locations
                    .get(&location_key(account, ""))
                    .and_then(|entry| entry.value().live())
            })
            .collect();

        if found.is_empty() {
            return Err(Error::SessionNil);
        }

        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn session(account: &str, channel_id: &str) -> Session {
        Session {
            channel_id: channel_id.into(),
            gate_id: "g1".into(),
            account: account.into(),
            app: "demo".into(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn add_writes_both_keyspaces() {
        let storage = MemoryStorage::new();
        storage.add(&session("u1", "g1_u1_1")).await.unwrap();

        let stored = storage.get("g1_u1_1").await.unwrap();
        assert_eq!(stored.account, "u1");

        let location = storage.get_location("u1", "").await.unwrap();
        assert_eq!(location.channel_id, "g1_u1_1");
        assert_eq!(location.gate_id, "g1");
    }

    #[tokio::test]
    async fn delete_removes_both_keyspaces() {
        let storage = MemoryStorage::new();
        storage.add(&session("u1", "g1_u1_1")).await.unwrap();
        storage.delete("u1", "g1_u1_1").await.unwrap();

        assert!(matches!(storage.get("g1_u1_1").await, Err(Error::SessionNil)));
        assert!(matches!(storage.get_location("u1", "").await, Err(Error::SessionNil)));
    }

    #[tokio::test]
    async fn multi_get_skips_absent_and_errors_when_empty() {
        let storage = MemoryStorage::new();
        storage.add(&session("u1", "g1_u1_1")).await.unwrap();
        storage.add(&session("u3", "g1_u3_2")).await.unwrap();

        let locations = storage.get_locations(&["u1", "u2", "u3"]).await.unwrap();
        assert_eq!(locations.len(), 2);

        let none = storage.get_locations(&["u4", "u5"]).await;
        assert!(matches!(none, Err(Error::SessionNil)));
    }

    #[tokio::test]
    async fn entries_expire() {
        let storage = MemoryStorage::with_ttl(Duration::from_millis(10));
        storage.add(&session("u1", "g1_u1_1")).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;

        assert!(matches!(storage.get("g1_u1_1").await, Err(Error::SessionNil)));
        assert!(matches!(storage.get_location("u1", "").await, Err(Error::SessionNil)));
    }
}
