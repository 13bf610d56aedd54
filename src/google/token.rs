//! Valid-token resolution with single-flight refresh per user.
//!
//! The stored credential is the only mutable shared resource in this
//! engine. Two concurrent refreshes for the same user can invalidate
//! each other's token at the provider, silently breaking the
//! integration, so refresh is serialized per user: the second caller
//! waits on the first and reuses its result. This is a correctness
//! requirement, not an optimization.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{Duration, Utc};
use dashmap::DashMap;

use super::{send_with_retry, OAuthCredential, RetryPolicy, TokenResponse};
use crate::config::GoogleClientConfig;
use crate::db::TrackerDb;
use crate::error::EngineError;

/// Credential persistence, one row per user.
pub trait CredentialStore: Send + Sync {
    fn load(&self, user_id: &str) -> Result<Option<OAuthCredential>, EngineError>;
    fn upsert(&self, credential: &OAuthCredential) -> Result<(), EngineError>;
    fn delete(&self, user_id: &str) -> Result<(), EngineError>;
}

/// SQLite-backed credential store.
pub struct SqliteCredentialStore {
    db: Arc<Mutex<TrackerDb>>,
}

impl SqliteCredentialStore {
    pub fn new(db: Arc<Mutex<TrackerDb>>) -> Self {
        Self { db }
    }

    fn db(&self) -> std::sync::MutexGuard<'_, TrackerDb> {
        // A poisoned lock means another thread panicked mid-write; the
        // connection itself is still usable.
        self.db.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl CredentialStore for SqliteCredentialStore {
    fn load(&self, user_id: &str) -> Result<Option<OAuthCredential>, EngineError> {
        Ok(self.db().load_credential(user_id)?)
    }

    fn upsert(&self, credential: &OAuthCredential) -> Result<(), EngineError> {
        Ok(self.db().upsert_credential(credential)?)
    }

    fn delete(&self, user_id: &str) -> Result<(), EngineError> {
        Ok(self.db().delete_credential(user_id)?)
    }
}

/// Result of one refresh grant.
#[derive(Debug, Clone)]
pub struct RefreshedToken {
    pub access_token: String,
    pub expires_at: String,
}

/// The refresh-grant transport, behind a trait so the single-flight
/// property is testable without a live token endpoint.
#[async_trait]
pub trait TokenRefresher: Send + Sync {
    async fn refresh(&self, credential: &OAuthCredential) -> Result<RefreshedToken, EngineError>;
}

/// Production refresher: POST grant_type=refresh_token to the stored
/// token endpoint.
pub struct HttpTokenRefresher {
    client: reqwest::Client,
    google: GoogleClientConfig,
}

impl HttpTokenRefresher {
    pub fn new(google: GoogleClientConfig) -> Result<Self, EngineError> {
        Ok(Self {
            client: super::http_client()?,
            google,
        })
    }
}

#[async_trait]
impl TokenRefresher for HttpTokenRefresher {
    async fn refresh(&self, credential: &OAuthCredential) -> Result<RefreshedToken, EngineError> {
        let resp = send_with_retry(
            self.client.post(&credential.token_uri).form(&[
                ("client_id", self.google.client_id.as_str()),
                ("client_secret", self.google.client_secret.as_str()),
                ("refresh_token", credential.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ]),
            &RetryPolicy::default(),
        )
        .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let lowered = body.to_lowercase();
            if (status.as_u16() == 400 || status.as_u16() == 401)
                && lowered.contains("invalid_grant")
            {
                return Err(EngineError::Disconnected);
            }
            return Err(EngineError::RefreshFailed(format!(
                "HTTP {}: {}",
                status.as_u16(),
                body
            )));
        }

        let token: TokenResponse = resp.json().await?;
        let expires_at = Utc::now() + Duration::seconds(token.expires_in as i64);
        Ok(RefreshedToken {
            access_token: token.access_token,
            expires_at: expires_at.to_rfc3339(),
        })
    }
}

/// Hands out a currently-valid access token for a user, refreshing
/// through the provider when the stored one has expired.
pub struct TokenLifecycleManager {
    store: Arc<dyn CredentialStore>,
    refresher: Arc<dyn TokenRefresher>,
    /// One refresh lock per user id.
    refresh_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
}

impl TokenLifecycleManager {
    pub fn new(store: Arc<dyn CredentialStore>, refresher: Arc<dyn TokenRefresher>) -> Self {
        Self {
            store,
            refresher,
            refresh_locks: DashMap::new(),
        }
    }

    fn user_lock(&self, user_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        self.refresh_locks
            .entry(user_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    /// Resolve a valid access token for `user_id`.
    ///
    /// Returns `EngineError::Disconnected` when no credential is stored
    /// or the provider rejects the refresh; callers must treat that as
    /// "integration needs re-authorization" and never retry in a loop.
    pub async fn get_valid_token(&self, user_id: &str) -> Result<String, EngineError> {
        let credential = self
            .store
            .load(user_id)?
            .ok_or(EngineError::Disconnected)?;

        if !credential.is_expired() {
            return Ok(credential.access_token);
        }

        let lock = self.user_lock(user_id);
        let _guard = lock.lock().await;

        // Another caller may have finished the refresh while we waited.
        let credential = self
            .store
            .load(user_id)?
            .ok_or(EngineError::Disconnected)?;
        if !credential.is_expired() {
            return Ok(credential.access_token);
        }

        let refreshed = match self.refresher.refresh(&credential).await {
            Ok(refreshed) => refreshed,
            Err(err) => {
                log::warn!("Token refresh failed for {}: {}", user_id, err);
                return Err(EngineError::Disconnected);
            }
        };

        let mut updated = credential;
        updated.access_token = refreshed.access_token;
        updated.expires_at = refreshed.expires_at;
        // Refresh token is reused; the provider does not rotate it here.
        self.store.upsert(&updated)?;

        Ok(updated.access_token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<HashMap<String, OAuthCredential>>,
    }

    impl CredentialStore for MemoryStore {
        fn load(&self, user_id: &str) -> Result<Option<OAuthCredential>, EngineError> {
            Ok(self.rows.lock().unwrap().get(user_id).cloned())
        }

        fn upsert(&self, credential: &OAuthCredential) -> Result<(), EngineError> {
            self.rows
                .lock()
                .unwrap()
                .insert(credential.user_id.clone(), credential.clone());
            Ok(())
        }

        fn delete(&self, user_id: &str) -> Result<(), EngineError> {
            self.rows.lock().unwrap().remove(user_id);
            Ok(())
        }
    }

    struct CountingRefresher {
        calls: AtomicUsize,
        fail: bool,
    }

    impl CountingRefresher {
        fn new(fail: bool) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail,
            }
        }
    }

    #[async_trait]
    impl TokenRefresher for CountingRefresher {
        async fn refresh(
            &self,
            _credential: &OAuthCredential,
        ) -> Result<RefreshedToken, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            // Yield so a racing caller reaches the user lock.
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            if self.fail {
                return Err(EngineError::RefreshFailed("rejected".into()));
            }
            Ok(RefreshedToken {
                access_token: "ya29.refreshed".to_string(),
                expires_at: (Utc::now() + Duration::hours(1)).to_rfc3339(),
            })
        }
    }

    fn seeded_store(expired: bool) -> Arc<MemoryStore> {
        let store = Arc::new(MemoryStore::default());
        let expires_at = if expired {
            Utc::now() - Duration::hours(1)
        } else {
            Utc::now() + Duration::hours(1)
        };
        store
            .upsert(&OAuthCredential {
                user_id: "u1".to_string(),
                access_token: "ya29.stored".to_string(),
                refresh_token: "1//refresh".to_string(),
                token_uri: super::super::DEFAULT_TOKEN_URI.to_string(),
                expires_at: expires_at.to_rfc3339(),
            })
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_missing_credential_is_disconnected() {
        let manager = TokenLifecycleManager::new(
            Arc::new(MemoryStore::default()),
            Arc::new(CountingRefresher::new(false)),
        );
        let err = manager.get_valid_token("nobody").await.unwrap_err();
        assert!(matches!(err, EngineError::Disconnected));
    }

    #[tokio::test]
    async fn test_valid_token_skips_refresh() {
        let refresher = Arc::new(CountingRefresher::new(false));
        let manager = TokenLifecycleManager::new(seeded_store(false), refresher.clone());

        let token = manager.get_valid_token("u1").await.unwrap();
        assert_eq!(token, "ya29.stored");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_expired_token_refreshes_and_persists() {
        let store = seeded_store(true);
        let refresher = Arc::new(CountingRefresher::new(false));
        let manager = TokenLifecycleManager::new(store.clone(), refresher.clone());

        let token = manager.get_valid_token("u1").await.unwrap();
        assert_eq!(token, "ya29.refreshed");
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);

        // The refreshed credential was persisted: refresh token intact,
        // expiry in the future.
        let stored = store.load("u1").unwrap().unwrap();
        assert_eq!(stored.access_token, "ya29.refreshed");
        assert_eq!(stored.refresh_token, "1//refresh");
        assert!(!stored.is_expired());
    }

    #[tokio::test]
    async fn test_refresh_failure_is_disconnected() {
        let manager = TokenLifecycleManager::new(
            seeded_store(true),
            Arc::new(CountingRefresher::new(true)),
        );
        let err = manager.get_valid_token("u1").await.unwrap_err();
        assert!(matches!(err, EngineError::Disconnected));
    }

    #[tokio::test]
    async fn test_concurrent_refresh_is_single_flight() {
        let refresher = Arc::new(CountingRefresher::new(false));
        let manager = Arc::new(TokenLifecycleManager::new(
            seeded_store(true),
            refresher.clone(),
        ));

        let a = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get_valid_token("u1").await })
        };
        let b = {
            let manager = manager.clone();
            tokio::spawn(async move { manager.get_valid_token("u1").await })
        };

        let token_a = a.await.unwrap().unwrap();
        let token_b = b.await.unwrap().unwrap();
        assert_eq!(token_a, "ya29.refreshed");
        assert_eq!(token_b, "ya29.refreshed");
        // Exactly one refresh call; the loser of the race reused the result.
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_refresh_locks_are_per_user() {
        let store = Arc::new(MemoryStore::default());
        for user in ["u1", "u2"] {
            store
                .upsert(&OAuthCredential {
                    user_id: user.to_string(),
                    access_token: "ya29.stored".to_string(),
                    refresh_token: "1//refresh".to_string(),
                    token_uri: super::super::DEFAULT_TOKEN_URI.to_string(),
                    expires_at: (Utc::now() - Duration::hours(1)).to_rfc3339(),
                })
                .unwrap();
        }
        let refresher = Arc::new(CountingRefresher::new(false));
        let manager = Arc::new(TokenLifecycleManager::new(store, refresher.clone()));

        let (a, b) = tokio::join!(
            manager.get_valid_token("u1"),
            manager.get_valid_token("u2")
        );
        a.unwrap();
        b.unwrap();
        // Different users do not share a flight.
        assert_eq!(refresher.calls.load(Ordering::SeqCst), 2);
    }
}
