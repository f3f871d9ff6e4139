//! Shared admin auth state: per-connection state machine entries plus the
//! failure waitlist that backs the brute-force lockout policy.
//!
//! The registry is owned by the WebSocket server state and keyed by
//! connection id; entries never outlive their socket. One async mutex guards
//! the whole table — contention is per-key in practice and the critical
//! sections are a few map operations.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::challenge::CHALLENGE_BYTES;

const DEFAULT_FAIL_WAIT_SECONDS: i64 = 60;
const DEFAULT_FAIL_TIMEOUT_SECONDS: i64 = 60;
const DEFAULT_MAX_FAIL_ATTEMPTS: usize = 5;
const DEFAULT_FAIL_LOCK_SECONDS: i64 = 3600;
const DEFAULT_ADMIN_AUTH_TIMEOUT_SECONDS: i64 = 1800;
const DEFAULT_CHALLENGE_TIMEOUT_SECONDS: u64 = 30;

/// Tunables for the admin challenge flow and its lockout policy.
#[derive(Clone, Copy, Debug)]
pub struct AuthConfig {
    fail_wait_time: i64,
    fail_timeout: i64,
    max_fail_attempts: usize,
    fail_lock_time: i64,
    admin_auth_timeout: i64,
    challenge_timeout: u64,
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self {
            fail_wait_time: DEFAULT_FAIL_WAIT_SECONDS,
            fail_timeout: DEFAULT_FAIL_TIMEOUT_SECONDS,
            max_fail_attempts: DEFAULT_MAX_FAIL_ATTEMPTS,
            fail_lock_time: DEFAULT_FAIL_LOCK_SECONDS,
            admin_auth_timeout: DEFAULT_ADMIN_AUTH_TIMEOUT_SECONDS,
            challenge_timeout: DEFAULT_CHALLENGE_TIMEOUT_SECONDS,
        }
    }

    /// Accepted for configuration compatibility; the observed flow is
    /// governed by `fail_timeout`.
    #[must_use]
    pub fn with_fail_wait_time_seconds(mut self, seconds: i64) -> Self {
        self.fail_wait_time = seconds;
        self
    }

    #[must_use]
    pub fn with_fail_timeout_seconds(mut self, seconds: i64) -> Self {
        self.fail_timeout = seconds;
        self
    }

    #[must_use]
    pub fn with_max_fail_attempts(mut self, attempts: usize) -> Self {
        self.max_fail_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_fail_lock_time_seconds(mut self, seconds: i64) -> Self {
        self.fail_lock_time = seconds;
        self
    }

    #[must_use]
    pub fn with_admin_auth_timeout_seconds(mut self, seconds: i64) -> Self {
        self.admin_auth_timeout = seconds;
        self
    }

    #[must_use]
    pub fn with_challenge_timeout_seconds(mut self, seconds: u64) -> Self {
        self.challenge_timeout = seconds;
        self
    }

    #[must_use]
    pub fn fail_wait_time(&self) -> Duration {
        Duration::seconds(self.fail_wait_time)
    }

    #[must_use]
    pub fn admin_auth_timeout(&self) -> Duration {
        Duration::seconds(self.admin_auth_timeout)
    }

    /// Bound on the wait for the client's challenge response.
    #[must_use]
    pub fn challenge_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.challenge_timeout)
    }

    fn fail_timeout(&self) -> Duration {
        Duration::seconds(self.fail_timeout)
    }

    fn fail_lock_time(&self) -> Duration {
        Duration::seconds(self.fail_lock_time)
    }
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Auth progress for one connection.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AdminAuthState {
    Unauthenticated,
    ChallengeIssued { challenge: [u8; CHALLENGE_BYTES] },
    Authenticated { expires_at: DateTime<Utc> },
}

#[derive(Debug)]
struct ConnEntry {
    auth: AdminAuthState,
    failures: Vec<DateTime<Utc>>,
}

impl ConnEntry {
    fn new() -> Self {
        Self {
            auth: AdminAuthState::Unauthenticated,
            failures: Vec::new(),
        }
    }
}

/// When the next attempt is permitted after a failure, given how many
/// failures were already recorded.
fn next_retry_at(
    prior_failures: usize,
    now: DateTime<Utc>,
    config: &AuthConfig,
) -> DateTime<Utc> {
    if prior_failures >= config.max_fail_attempts {
        now + config.fail_lock_time()
    } else {
        now + config.fail_timeout()
    }
}

/// Keyed store for admin auth state and the failure waitlist.
#[derive(Debug, Default)]
pub struct AdminRegistry {
    entries: Mutex<HashMap<Uuid, ConnEntry>>,
}

impl AdminRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// True while the most recent retry-not-before stamp is in the future.
    pub async fn retry_blocked(&self, id: Uuid, now: DateTime<Utc>) -> bool {
        let entries = self.entries.lock().await;
        entries
            .get(&id)
            .and_then(|entry| entry.failures.last())
            .is_some_and(|not_before| now < *not_before)
    }

    /// Record an issued challenge for this connection.
    pub async fn set_challenge(&self, id: Uuid, challenge: [u8; CHALLENGE_BYTES]) {
        let mut entries = self.entries.lock().await;
        entries.entry(id).or_insert_with(ConnEntry::new).auth =
            AdminAuthState::ChallengeIssued { challenge };
    }

    /// Abort an in-flight challenge, returning the connection to
    /// `Unauthenticated` without touching the waitlist.
    pub async fn clear_challenge(&self, id: Uuid) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(&id) {
            if matches!(entry.auth, AdminAuthState::ChallengeIssued { .. }) {
                entry.auth = AdminAuthState::Unauthenticated;
            }
        }
    }

    /// Record a failed verification: back to `Unauthenticated` plus one more
    /// waitlist stamp, escalating to the lock time once the attempt budget is
    /// spent.
    pub async fn record_failure(&self, id: Uuid, now: DateTime<Utc>, config: &AuthConfig) {
        let mut entries = self.entries.lock().await;
        let entry = entries.entry(id).or_insert_with(ConnEntry::new);
        entry.auth = AdminAuthState::Unauthenticated;
        let stamp = next_retry_at(entry.failures.len(), now, config);
        entry.failures.push(stamp);
    }

    /// Record a successful verification.
    pub async fn set_authenticated(&self, id: Uuid, expires_at: DateTime<Utc>) {
        let mut entries = self.entries.lock().await;
        entries.entry(id).or_insert_with(ConnEntry::new).auth =
            AdminAuthState::Authenticated { expires_at };
    }

    /// Live authentication check with lazy expiry: an `Authenticated` entry
    /// past its deadline is demoted on read.
    pub async fn is_authenticated(&self, id: Uuid, now: DateTime<Utc>) -> bool {
        let mut entries = self.entries.lock().await;
        let Some(entry) = entries.get_mut(&id) else {
            return false;
        };
        match entry.auth {
            AdminAuthState::Authenticated { expires_at } if now < expires_at => true,
            AdminAuthState::Authenticated { .. } => {
                entry.auth = AdminAuthState::Unauthenticated;
                false
            }
            _ => false,
        }
    }

    /// Explicit logoff: clears both the auth state and the failure record.
    /// Returns false when the connection is not currently authenticated.
    pub async fn logoff(&self, id: Uuid, now: DateTime<Utc>) -> bool {
        let mut entries = self.entries.lock().await;
        let authenticated = entries.get(&id).is_some_and(|entry| {
            matches!(entry.auth, AdminAuthState::Authenticated { expires_at } if now < expires_at)
        });
        if authenticated {
            entries.remove(&id);
        }
        authenticated
    }

    /// Drop all state for a closed connection.
    pub async fn remove(&self, id: Uuid) {
        let mut entries = self.entries.lock().await;
        entries.remove(&id);
    }

    #[cfg(test)]
    pub(crate) async fn auth_state(&self, id: Uuid) -> Option<AdminAuthState> {
        let entries = self.entries.lock().await;
        entries.get(&id).map(|entry| entry.auth.clone())
    }

    #[cfg(test)]
    pub(crate) async fn failures(&self, id: Uuid) -> Vec<DateTime<Utc>> {
        let entries = self.entries.lock().await;
        entries
            .get(&id)
            .map(|entry| entry.failures.clone())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> AuthConfig {
        AuthConfig::new()
            .with_fail_timeout_seconds(60)
            .with_max_fail_attempts(3)
            .with_fail_lock_time_seconds(3600)
    }

    #[test]
    fn auth_config_defaults_and_overrides() {
        let config = AuthConfig::new();
        assert_eq!(config.fail_timeout(), Duration::seconds(60));
        assert_eq!(config.max_fail_attempts, DEFAULT_MAX_FAIL_ATTEMPTS);
        assert_eq!(config.fail_lock_time(), Duration::seconds(3600));
        assert_eq!(config.admin_auth_timeout(), Duration::seconds(1800));
        assert_eq!(
            config.challenge_timeout(),
            std::time::Duration::from_secs(30)
        );

        let config = config
            .with_fail_wait_time_seconds(10)
            .with_fail_timeout_seconds(120)
            .with_max_fail_attempts(2)
            .with_fail_lock_time_seconds(7200)
            .with_admin_auth_timeout_seconds(600)
            .with_challenge_timeout_seconds(5);

        assert_eq!(config.fail_wait_time(), Duration::seconds(10));
        assert_eq!(config.fail_timeout(), Duration::seconds(120));
        assert_eq!(config.max_fail_attempts, 2);
        assert_eq!(config.fail_lock_time(), Duration::seconds(7200));
        assert_eq!(config.admin_auth_timeout(), Duration::seconds(600));
        assert_eq!(
            config.challenge_timeout(),
            std::time::Duration::from_secs(5)
        );
    }

    #[tokio::test]
    async fn failures_escalate_to_lock_time_after_max_attempts() {
        let registry = AdminRegistry::new();
        let id = Uuid::new_v4();
        let now = Utc::now();
        let config = config();

        for _ in 0..3 {
            registry.record_failure(id, now, &config).await;
        }
        let failures = registry.failures(id).await;
        assert_eq!(failures.len(), 3);
        assert!(failures
            .iter()
            .all(|stamp| *stamp == now + Duration::seconds(60)));

        // Budget spent: the next stamp escalates.
        registry.record_failure(id, now, &config).await;
        let failures = registry.failures(id).await;
        assert_eq!(failures.last(), Some(&(now + Duration::seconds(3600))));
    }

    #[tokio::test]
    async fn retry_gate_reads_the_last_stamp() {
        let registry = AdminRegistry::new();
        let id = Uuid::new_v4();
        let config = config();
        let start = Utc::now();

        registry.record_failure(id, start, &config).await;
        // Second failure recorded later; its stamp is further out.
        let later = start + Duration::seconds(30);
        registry.record_failure(id, later, &config).await;

        // Past the first stamp but not the second: still blocked.
        let probe = start + Duration::seconds(75);
        assert!(registry.retry_blocked(id, probe).await);
        // Past the second stamp: clear.
        let probe = later + Duration::seconds(61);
        assert!(!registry.retry_blocked(id, probe).await);
    }

    #[tokio::test]
    async fn fresh_connections_are_not_blocked() {
        let registry = AdminRegistry::new();
        assert!(!registry.retry_blocked(Uuid::new_v4(), Utc::now()).await);
    }

    #[tokio::test]
    async fn authentication_expires_lazily() {
        let registry = AdminRegistry::new();
        let id = Uuid::new_v4();
        let now = Utc::now();

        registry
            .set_authenticated(id, now + Duration::seconds(10))
            .await;
        assert!(registry.is_authenticated(id, now).await);

        // Past expiry: demoted on read, and the demotion sticks.
        let later = now + Duration::seconds(11);
        assert!(!registry.is_authenticated(id, later).await);
        assert_eq!(
            registry.auth_state(id).await,
            Some(AdminAuthState::Unauthenticated)
        );
    }

    #[tokio::test]
    async fn logoff_requires_live_authentication_and_clears_failures() {
        let registry = AdminRegistry::new();
        let id = Uuid::new_v4();
        let now = Utc::now();
        let config = config();

        assert!(!registry.logoff(id, now).await);

        registry.record_failure(id, now, &config).await;
        registry
            .set_authenticated(id, now + Duration::seconds(600))
            .await;
        assert!(registry.logoff(id, now).await);

        // Both the auth state and the waitlist are gone.
        assert!(registry.auth_state(id).await.is_none());
        assert!(registry.failures(id).await.is_empty());
    }

    #[tokio::test]
    async fn expired_authentication_cannot_log_off() {
        let registry = AdminRegistry::new();
        let id = Uuid::new_v4();
        let now = Utc::now();

        registry
            .set_authenticated(id, now - Duration::seconds(1))
            .await;
        assert!(!registry.logoff(id, now).await);
    }

    #[tokio::test]
    async fn remove_drops_challenge_state_for_reused_identities() {
        let registry = AdminRegistry::new();
        let id = Uuid::new_v4();

        registry.set_challenge(id, [7u8; CHALLENGE_BYTES]).await;
        registry.remove(id).await;

        // A reconnect under the same id starts from a clean slate.
        assert!(registry.auth_state(id).await.is_none());
        assert!(!registry.retry_blocked(id, Utc::now()).await);
    }

    #[tokio::test]
    async fn clear_challenge_leaves_waitlist_untouched() {
        let registry = AdminRegistry::new();
        let id = Uuid::new_v4();
        let now = Utc::now();
        let config = config();

        registry.record_failure(id, now, &config).await;
        registry.set_challenge(id, [1u8; CHALLENGE_BYTES]).await;
        registry.clear_challenge(id).await;

        assert_eq!(
            registry.auth_state(id).await,
            Some(AdminAuthState::Unauthenticated)
        );
        assert_eq!(registry.failures(id).await.len(), 1);
    }
}
