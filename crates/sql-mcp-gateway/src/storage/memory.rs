//! In-memory storage adapter.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use moka::future::Cache;
use tokio::sync::RwLock;

use super::{
    AuthorizationCode, Client, CodeRedemption, PurgeStats, SearchResultEntry, Storage, Token,
};
use crate::config::Config;
use crate::error::{StorageError, StorageResult};

/// Process-local storage.
///
/// OAuth state lives in `RwLock`-guarded maps; search results live in a
/// bounded moka cache whose TTL matches the entry TTL. Entry expiry is still
/// checked against the caller's clock on every read.
#[derive(Clone)]
pub struct MemoryStorage {
    clients: Arc<RwLock<HashMap<String, Client>>>,
    auth_codes: Arc<RwLock<HashMap<String, AuthorizationCode>>>,
    tokens: Arc<RwLock<HashMap<String, Token>>>,
    search_entries: Cache<String, SearchResultEntry>,
}

impl MemoryStorage {
    /// Create storage sized from the configuration.
    #[must_use]
    pub fn new(config: &Config) -> Self {
        Self::with_search_cache(config.search_cache_max_entries, config.search_result_ttl)
    }

    /// Create storage with an explicit search cache size and TTL.
    #[must_use]
    pub fn with_search_cache(max_entries: u64, ttl: Duration) -> Self {
        let search_entries = Cache::builder().max_capacity(max_entries).time_to_live(ttl).build();

        Self {
            clients: Arc::new(RwLock::new(HashMap::new())),
            auth_codes: Arc::new(RwLock::new(HashMap::new())),
            tokens: Arc::new(RwLock::new(HashMap::new())),
            search_entries,
        }
    }
}

impl std::fmt::Debug for MemoryStorage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStorage").finish_non_exhaustive()
    }
}

#[async_trait::async_trait]
impl Storage for MemoryStorage {
    async fn insert_client(&self, client: Client) -> StorageResult<()> {
        let mut clients = self.clients.write().await;
        if clients.contains_key(&client.client_id) {
            return Err(StorageError::Conflict { kind: "client", key: client.client_id });
        }
        clients.insert(client.client_id.clone(), client);
        Ok(())
    }

    async fn client(&self, client_id: &str) -> StorageResult<Option<Client>> {
        Ok(self.clients.read().await.get(client_id).cloned())
    }

    async fn insert_auth_code(&self, code: AuthorizationCode) -> StorageResult<()> {
        let mut codes = self.auth_codes.write().await;
        if codes.contains_key(&code.code) {
            // Keys are secrets; do not echo them.
            return Err(StorageError::Conflict { kind: "code", key: String::new() });
        }
        codes.insert(code.code.clone(), code);
        Ok(())
    }

    async fn consume_auth_code(
        &self,
        code: &str,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<CodeRedemption> {
        // Check and flip under one write guard.
        let mut codes = self.auth_codes.write().await;
        let Some(record) = codes.get_mut(code) else {
            return Ok(CodeRedemption::Unknown);
        };

        if record.client_id != client_id {
            return Ok(CodeRedemption::ClientMismatch);
        }
        if record.consumed {
            return Ok(CodeRedemption::AlreadyConsumed);
        }
        if record.is_expired_at(now) {
            return Ok(CodeRedemption::Expired);
        }

        record.consumed = true;
        Ok(CodeRedemption::Redeemed(record.clone()))
    }

    async fn insert_token(&self, token: Token) -> StorageResult<()> {
        let mut tokens = self.tokens.write().await;
        if tokens.contains_key(&token.access_token) {
            return Err(StorageError::Conflict { kind: "token", key: String::new() });
        }
        tokens.insert(token.access_token.clone(), token);
        Ok(())
    }

    async fn token(&self, access_token: &str) -> StorageResult<Option<Token>> {
        Ok(self.tokens.read().await.get(access_token).cloned())
    }

    async fn insert_search_entry(&self, entry: SearchResultEntry) -> StorageResult<()> {
        self.search_entries.insert(entry.id.clone(), entry).await;
        Ok(())
    }

    async fn search_entry(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<SearchResultEntry>> {
        match self.search_entries.get(id).await {
            Some(entry) if entry.is_expired_at(now) => {
                self.search_entries.invalidate(id).await;
                Ok(None)
            }
            other => Ok(other),
        }
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> StorageResult<PurgeStats> {
        let mut stats = PurgeStats::default();

        // Consumed codes stay until they expire so a replay reports "already used".
        {
            let mut codes = self.auth_codes.write().await;
            let before = codes.len();
            codes.retain(|_, code| !code.is_expired_at(now));
            stats.auth_codes = before - codes.len();
        }

        {
            let mut tokens = self.tokens.write().await;
            let before = tokens.len();
            tokens.retain(|_, token| token.is_valid_at(now));
            stats.tokens = before - tokens.len();
        }

        let expired: Vec<Arc<String>> = self
            .search_entries
            .iter()
            .filter(|(_, entry)| entry.is_expired_at(now))
            .map(|(id, _)| id)
            .collect();
        for id in &expired {
            self.search_entries.invalidate(id.as_str()).await;
        }
        stats.search_entries = expired.len();
        self.search_entries.run_pending_tasks().await;

        Ok(stats)
    }
}
