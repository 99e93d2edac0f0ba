use crate::domain::{AccountId, AccountIdentity};
use crate::metrics;
use async_trait::async_trait;
use std::collections::HashSet;
use thiserror::Error;
use tracing::{debug, info};

/// Everything the remote graph knows about one handle.
#[derive(Debug, Clone)]
pub struct RemoteProfile {
    pub identity: AccountIdentity,
    /// Accounts the handle follows.
    pub friend_ids: HashSet<AccountId>,
    /// Accounts following the handle.
    pub follower_ids: HashSet<AccountId>,
}

#[derive(Error, Debug)]
pub enum GraphClientError {
    #[error("Account not found: {0}")]
    NotFound(String),
    #[error("Rate limited by the remote API")]
    RateLimited,
    #[error("Transient remote error: {0}")]
    Transient(String),
    #[error("Authentication rejected: {0}")]
    Auth(String),
    #[error("Unexpected response: {0}")]
    Decode(String),
    #[error("Invalid client configuration: {0}")]
    Config(String),
}

impl GraphClientError {
    /// Whether the request may succeed if tried again later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            GraphClientError::RateLimited | GraphClientError::Transient(_)
        )
    }
}

/// Read access to the remote social graph.
#[async_trait]
pub trait GraphClient: Send + Sync {
    async fn resolve_identity_and_edges(
        &self,
        handle: &str,
    ) -> Result<RemoteProfile, GraphClientError>;

    /// Resolves a single batch of ids. Ids the remote graph does not know are
    /// left out of the result.
    async fn lookup_accounts(
        &self,
        ids: &[AccountId],
    ) -> Result<Vec<AccountIdentity>, GraphClientError>;
}

/// Resolves `ids` with one `lookup_accounts` call per chunk of `chunk_size`
/// ids and concatenates the results.
pub async fn lookup_accounts_in_chunks<T: GraphClient>(
    client: &T,
    ids: &[AccountId],
    chunk_size: usize,
) -> Result<Vec<AccountIdentity>, GraphClientError> {
    let mut identities = Vec::with_capacity(ids.len());

    for chunk in ids.chunks(chunk_size.max(1)) {
        debug!("Looking up {} accounts", chunk.len());
        metrics::remote_lookup_requests().increment(1);
        identities.extend(client.lookup_accounts(chunk).await?);
    }

    info!("Retrieved {} new users", identities.len());
    Ok(identities)
}
