//! Storage port for OAuth state and cached search results.
//!
//! Protocol logic only talks to [`Storage`]; [`MemoryStorage`] is the default
//! adapter. A persistent adapter must keep [`Storage::consume_auth_code`]
//! atomic (a transaction or compare-and-swap on the `consumed` flag).

mod memory;
mod types;

pub use memory::MemoryStorage;
pub use types::{
    AuthorizationCode, Client, CodeRedemption, PurgeStats, SearchResultEntry, Token,
};

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::StorageResult;

/// Key-value persistence for clients, codes, tokens and search entries.
#[async_trait::async_trait]
pub trait Storage: Send + Sync {
    /// Persist a newly registered client. Fails with `Conflict` on a duplicate id.
    async fn insert_client(&self, client: Client) -> StorageResult<()>;

    /// Look up a client by id.
    async fn client(&self, client_id: &str) -> StorageResult<Option<Client>>;

    /// Persist a freshly issued authorization code.
    async fn insert_auth_code(&self, code: AuthorizationCode) -> StorageResult<()>;

    /// Atomically redeem a code for `client_id`.
    ///
    /// Only a code that exists, belongs to `client_id`, is unexpired at `now`
    /// and has not been consumed is flipped to consumed. Every other outcome
    /// leaves the record untouched.
    async fn consume_auth_code(
        &self,
        code: &str,
        client_id: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<CodeRedemption>;

    /// Persist an issued access token.
    async fn insert_token(&self, token: Token) -> StorageResult<()>;

    /// Look up a token. Expiry is judged by the caller.
    async fn token(&self, access_token: &str) -> StorageResult<Option<Token>>;

    /// Cache a search result.
    async fn insert_search_entry(&self, entry: SearchResultEntry) -> StorageResult<()>;

    /// Resolve a search result id; expired entries are dropped and reported absent.
    async fn search_entry(
        &self,
        id: &str,
        now: DateTime<Utc>,
    ) -> StorageResult<Option<SearchResultEntry>>;

    /// Remove everything that expired before `now`.
    async fn purge_expired(&self, now: DateTime<Utc>) -> StorageResult<PurgeStats>;
}

/// Shared storage handle.
pub type SharedStorage = Arc<dyn Storage>;
