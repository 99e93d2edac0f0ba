use crate::domain::{normalize_handle, Account, AccountId, Follow};
use crate::graph_client::{
    lookup_accounts_in_chunks, GraphClient, GraphClientError, RemoteProfile,
};
use crate::metrics;
use crate::repo::{RepoError, RepoTrait};
use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum RefreshError {
    #[error("Invalid handle: {0:?}")]
    InvalidHandle(String),
    #[error("Handle @{0} does not exist")]
    NotFound(String),
    #[error("Cache conflict for @{handle}: {reason}")]
    DataConflict { handle: String, reason: String },
    #[error(transparent)]
    Remote(GraphClientError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl From<GraphClientError> for RefreshError {
    fn from(error: GraphClientError) -> Self {
        match error {
            GraphClientError::NotFound(handle) => RefreshError::NotFound(handle),
            other => RefreshError::Remote(other),
        }
    }
}

/// How a handle was served.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshOutcome {
    CacheHit,
    Fetched {
        new_accounts: usize,
        new_follows: usize,
    },
}

/// Keeps the local cache of accounts and follows in sync with the remote
/// graph, one handle at a time.
pub struct CacheRefresher<T, U>
where
    T: RepoTrait,
    U: GraphClient,
{
    repo: Arc<T>,
    graph_client: Arc<U>,
    lookup_chunk_size: usize,
}

impl<T, U> CacheRefresher<T, U>
where
    T: RepoTrait,
    U: GraphClient,
{
    pub fn new(repo: Arc<T>, graph_client: Arc<U>, lookup_chunk_size: usize) -> Self {
        Self {
            repo,
            graph_client,
            lookup_chunk_size,
        }
    }

    /// Refreshes every handle in order and returns their stored accounts.
    /// Stops at the first failing handle; handles before it stay cached.
    pub async fn refresh_all(&self, handles: &[String]) -> Result<Vec<Account>, RefreshError> {
        let mut accounts = Vec::with_capacity(handles.len());

        for handle in handles {
            let (account, _) = self.refresh(handle).await?;
            accounts.push(account);
        }

        Ok(accounts)
    }

    /// Makes sure the relationships of `handle` are cached, fetching them
    /// from the remote graph only when they never were.
    pub async fn refresh(&self, handle: &str) -> Result<(Account, RefreshOutcome), RefreshError> {
        let requested = handle;
        let handle = normalize_handle(requested);
        if handle.is_empty() {
            return Err(RefreshError::InvalidHandle(requested.to_string()));
        }

        let maybe_stored = self.repo.find_account_by_handle(handle).await?;
        if let Some(account) = maybe_stored.as_ref().filter(|a| a.is_refreshed()) {
            debug!("Cache hit for @{} ({})", handle, account.id);
            metrics::cache_hits().increment(1);
            return Ok((account.clone(), RefreshOutcome::CacheHit));
        }

        info!("Updating user {}", handle);
        metrics::remote_profile_fetches().increment(1);
        let profile = self.graph_client.resolve_identity_and_edges(handle).await?;
        info!(
            "@{} friend count {}, follower count {}",
            handle,
            profile.friend_ids.len(),
            profile.follower_ids.len()
        );

        self.check_conflicts(handle, &profile).await?;

        // A handle held by a never refreshed account is stale metadata
        if let Some(stale) = maybe_stored.filter(|a| a.id != profile.identity.id) {
            info!(
                "Handle @{} moved from account {} to {}",
                handle, stale.id, profile.identity.id
            );
            self.repo.release_stale_handle(stale.id).await?;
        }

        let outcome = self.store_profile(&profile).await?;

        let account = self
            .repo
            .find_account_by_id(profile.identity.id)
            .await?
            .ok_or(RepoError::AccountNotFound(profile.identity.id))?;

        Ok((account, outcome))
    }

    /// The remote id must not already be refreshed under another handle.
    async fn check_conflicts(
        &self,
        handle: &str,
        profile: &RemoteProfile,
    ) -> Result<(), RefreshError> {
        let remote_id = profile.identity.id;

        if let Some(stored) = self.repo.find_account_by_id(remote_id).await? {
            if stored.is_refreshed() {
                return Err(RefreshError::DataConflict {
                    handle: handle.to_string(),
                    reason: format!(
                        "account {} is already cached as @{}",
                        remote_id, stored.handle
                    ),
                });
            }
        }

        Ok(())
    }

    async fn store_profile(&self, profile: &RemoteProfile) -> Result<RefreshOutcome, RefreshError> {
        let RemoteProfile {
            identity,
            friend_ids,
            follower_ids,
        } = profile;

        let mut new_accounts = self
            .repo
            .insert_new_accounts(std::slice::from_ref(identity))
            .await?;

        let observed_ids: HashSet<AccountId> = friend_ids.union(follower_ids).copied().collect();
        let known_ids = self.repo.known_account_ids(&observed_ids).await?;
        let mut unknown_ids: Vec<AccountId> =
            observed_ids.difference(&known_ids).copied().collect();
        unknown_ids.sort();

        if !unknown_ids.is_empty() {
            let identities = lookup_accounts_in_chunks(
                self.graph_client.as_ref(),
                &unknown_ids,
                self.lookup_chunk_size,
            )
            .await?;
            new_accounts += self.repo.insert_new_accounts(&identities).await?;
        }

        let follows: Vec<Follow> = friend_ids
            .iter()
            .map(|friend| Follow::new(identity.id, *friend))
            .chain(
                follower_ids
                    .iter()
                    .map(|follower| Follow::new(*follower, identity.id)),
            )
            .collect();
        let new_follows = self.repo.add_follows_if_absent(&follows).await?;

        // Last, so an interrupted refresh is retried on the next run.
        self.repo.mark_refreshed(identity, &Utc::now()).await?;

        metrics::accounts_discovered().increment(new_accounts as u64);
        metrics::follows_inserted().increment(new_follows as u64);

        Ok(RefreshOutcome::Fetched {
            new_accounts,
            new_follows,
        })
    }
}
