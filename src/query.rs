use crate::cache_refresher::{CacheRefresher, RefreshError};
use crate::domain::{common_connections, Account, QueryMode};
use crate::graph_client::GraphClient;
use crate::relationships::RelationshipReader;
use crate::repo::{RepoError, RepoTrait};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

#[derive(Error, Debug)]
pub enum QueryError {
    #[error("The '{0}' query mode is reserved and not available yet")]
    UnsupportedMode(QueryMode),
    #[error("At least one handle is required")]
    NoHandles,
    #[error(transparent)]
    Refresh(#[from] RefreshError),
    #[error(transparent)]
    Repo(#[from] RepoError),
}

impl QueryError {
    /// Process exit code reported for this failure.
    pub fn exit_code(&self) -> u8 {
        match self {
            QueryError::Refresh(RefreshError::DataConflict { .. }) => 2,
            QueryError::UnsupportedMode(_) => 3,
            QueryError::Refresh(RefreshError::NotFound(_)) => 4,
            _ => 1,
        }
    }
}

/// Rejects the reserved query modes.
pub fn ensure_supported(mode: QueryMode) -> Result<(), QueryError> {
    if mode.is_supported() {
        Ok(())
    } else {
        Err(QueryError::UnsupportedMode(mode))
    }
}

/// Accounts shared by every requested handle.
#[derive(Debug, Clone)]
pub struct CommonConnections {
    pub accounts: Vec<Account>,
}

impl CommonConnections {
    fn new(mut accounts: Vec<Account>) -> Self {
        accounts.sort_by(|a, b| {
            a.handle
                .to_lowercase()
                .cmp(&b.handle.to_lowercase())
                .then(a.id.cmp(&b.id))
        });
        Self { accounts }
    }
}

impl fmt::Display for CommonConnections {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Found {} friends in common", self.accounts.len())?;
        for account in &self.accounts {
            writeln!(f, "Handle: @{} -- {}", account.handle, account.display_name)?;
        }
        Ok(())
    }
}

pub struct QueryRunner<T, U>
where
    T: RepoTrait,
    U: GraphClient,
{
    refresher: CacheRefresher<T, U>,
    reader: RelationshipReader<T>,
}

impl<T, U> QueryRunner<T, U>
where
    T: RepoTrait,
    U: GraphClient,
{
    pub fn new(repo: Arc<T>, graph_client: Arc<U>, lookup_chunk_size: usize) -> Self {
        Self {
            refresher: CacheRefresher::new(repo.clone(), graph_client, lookup_chunk_size),
            reader: RelationshipReader::new(repo),
        }
    }

    pub async fn run(
        &self,
        mode: QueryMode,
        handles: &[String],
        loose: bool,
    ) -> Result<CommonConnections, QueryError> {
        ensure_supported(mode)?;

        if handles.is_empty() {
            return Err(QueryError::NoHandles);
        }

        info!("Handles: {}", handles.join(", "));
        let accounts = self.refresher.refresh_all(handles).await?;
        let sets = self.reader.relationship_sets(&accounts).await?;

        info!(
            "Finding all common {} between {}",
            if loose { "friends" } else { "real friends" },
            accounts
                .iter()
                .map(|a| a.handle.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        let common = common_connections(&sets, loose);
        Ok(CommonConnections::new(common.into_iter().collect()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::AccountIdentity;
    use crate::repo::Repo;
    use crate::test_support::MockGraphClient;
    use pretty_assertions::assert_eq;

    async fn runner(
        client: MockGraphClient,
    ) -> (QueryRunner<Repo, MockGraphClient>, Arc<Repo>, Arc<MockGraphClient>) {
        let repo = Arc::new(Repo::open("sqlite::memory:").await.unwrap());
        let client = Arc::new(client);
        (
            QueryRunner::new(repo.clone(), client.clone(), 100),
            repo,
            client,
        )
    }

    fn handles(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn result_handles(result: &CommonConnections) -> Vec<String> {
        result.accounts.iter().map(|a| a.handle.clone()).collect()
    }

    #[tokio::test]
    async fn test_common_real_friends_of_alice_and_bob() {
        let (runner, _repo, _client) = runner(MockGraphClient::with_three_friends()).await;

        let result = runner
            .run(QueryMode::Common, &handles(&["alice", "bob"]), false)
            .await
            .unwrap();

        assert_eq!(result_handles(&result), vec!["carol".to_string()]);
        assert_eq!(
            result.to_string(),
            "Found 1 friends in common\nHandle: @carol -- Carol\n"
        );
    }

    #[tokio::test]
    async fn test_common_is_commutative() {
        let (runner, _repo, _client) = runner(MockGraphClient::with_three_friends()).await;

        let ab = runner
            .run(QueryMode::Common, &handles(&["alice", "bob"]), true)
            .await
            .unwrap();
        let ba = runner
            .run(QueryMode::Common, &handles(&["bob", "alice"]), true)
            .await
            .unwrap();

        assert_eq!(result_handles(&ab), result_handles(&ba));
    }

    #[tokio::test]
    async fn test_single_handle_loose_returns_its_friends() {
        let client = MockGraphClient::with_three_friends();
        client.add_account(AccountIdentity::new(4, "dave", "Dave"));
        client.add_follow(1, 4);
        let (runner, _repo, _client) = runner(client).await;

        let loose = runner
            .run(QueryMode::Common, &handles(&["alice"]), true)
            .await
            .unwrap();
        let strict = runner
            .run(QueryMode::Common, &handles(&["alice"]), false)
            .await
            .unwrap();

        assert_eq!(
            result_handles(&loose),
            handles(&["bob", "carol", "dave"])
        );
        assert_eq!(result_handles(&strict), handles(&["bob", "carol"]));
    }

    #[tokio::test]
    async fn test_loose_is_superset_of_strict() {
        let client = MockGraphClient::with_three_friends();
        client.add_account(AccountIdentity::new(4, "dave", "Dave"));
        client.add_account(AccountIdentity::new(5, "erin", "Erin"));
        client.add_follow(1, 4);
        client.add_follow(2, 4);
        client.add_mutual(1, 5);
        client.add_mutual(2, 5);
        let (runner, _repo, _client) = runner(client).await;

        let batch = handles(&["alice", "bob"]);
        let loose = runner.run(QueryMode::Common, &batch, true).await.unwrap();
        let strict = runner.run(QueryMode::Common, &batch, false).await.unwrap();

        assert_eq!(result_handles(&loose), handles(&["carol", "dave", "erin"]));
        assert_eq!(result_handles(&strict), handles(&["carol", "erin"]));
        assert!(strict.accounts.iter().all(|a| loose.accounts.contains(a)));
    }

    #[test]
    fn test_ensure_supported() {
        assert!(ensure_supported(QueryMode::Common).is_ok());
        assert_eq!(
            ensure_supported(QueryMode::Mutuals).unwrap_err().exit_code(),
            3
        );
        assert!(matches!(
            ensure_supported(QueryMode::Clique),
            Err(QueryError::UnsupportedMode(QueryMode::Clique))
        ));
    }

    #[tokio::test]
    async fn test_reserved_modes_fail_before_any_remote_call() {
        let (runner, repo, client) = runner(MockGraphClient::with_three_friends()).await;

        for mode in [QueryMode::Mutuals, QueryMode::Clique] {
            let result = runner.run(mode, &handles(&["alice", "bob"]), false).await;

            let error = result.unwrap_err();
            assert!(matches!(error, QueryError::UnsupportedMode(m) if m == mode));
            assert_eq!(error.exit_code(), 3);
        }

        assert_eq!(client.remote_calls(), 0);
        assert_eq!(repo.count_accounts().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unknown_handle_aborts_the_run() {
        let (runner, repo, _client) = runner(MockGraphClient::with_three_friends()).await;

        let error = runner
            .run(QueryMode::Common, &handles(&["nobody"]), false)
            .await
            .unwrap_err();

        assert!(matches!(
            error,
            QueryError::Refresh(RefreshError::NotFound(_))
        ));
        assert_eq!(error.exit_code(), 4);
        assert_eq!(repo.count_accounts().await.unwrap(), 0);
        assert_eq!(repo.count_follows().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_conflict_has_its_own_exit_code() {
        let (runner, _repo, client) = runner(MockGraphClient::with_three_friends()).await;
        runner
            .run(QueryMode::Common, &handles(&["alice"]), false)
            .await
            .unwrap();

        client.add_account(AccountIdentity::new(1, "alice_renamed", "Alice"));
        let error = runner
            .run(QueryMode::Common, &handles(&["alice_renamed", "bob"]), false)
            .await
            .unwrap_err();

        assert_eq!(error.exit_code(), 2);
    }

    #[tokio::test]
    async fn test_empty_batch_is_rejected() {
        let (runner, _repo, _client) = runner(MockGraphClient::default()).await;

        let error = runner.run(QueryMode::Common, &[], false).await.unwrap_err();

        assert!(matches!(error, QueryError::NoHandles));
    }

    #[tokio::test]
    async fn test_second_run_is_served_from_cache() {
        let (runner, repo, client) = runner(MockGraphClient::with_three_friends()).await;
        let batch = handles(&["alice", "bob", "carol"]);

        let first = runner.run(QueryMode::Common, &batch, true).await.unwrap();
        let calls = client.remote_calls();
        let follows = repo.count_follows().await.unwrap();

        let second = runner.run(QueryMode::Common, &batch, true).await.unwrap();

        assert_eq!(result_handles(&first), result_handles(&second));
        assert!(second.accounts.is_empty());
        assert_eq!(client.remote_calls(), calls);
        assert_eq!(repo.count_follows().await.unwrap(), follows);
    }
}
