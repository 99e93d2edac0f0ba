use crate::domain::{Account, RelationshipSet};
use crate::repo::{RepoError, RepoTrait};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::info;

/// Builds relationship sets from the follows stored in the cache.
pub struct RelationshipReader<T>
where
    T: RepoTrait,
{
    repo: Arc<T>,
}

impl<T> RelationshipReader<T>
where
    T: RepoTrait,
{
    pub fn new(repo: Arc<T>) -> Self {
        Self { repo }
    }

    pub async fn relationship_set(&self, account: &Account) -> Result<RelationshipSet, RepoError> {
        info!("Getting db info for {}", account.id);

        let friend_ids = self.repo.get_followee_ids(account.id).await?;
        let friends: HashSet<Account> = self.repo.get_accounts(&friend_ids).await?.into_iter().collect();
        info!("Found {} friends for {}", friends.len(), account.id);

        let follower_ids = self.repo.get_follower_ids(account.id).await?;
        let followers: HashSet<Account> = self
            .repo
            .get_accounts(&follower_ids)
            .await?
            .into_iter()
            .collect();
        info!("Found {} followers for {}", followers.len(), account.id);

        Ok(RelationshipSet::new(account.clone(), friends, followers))
    }

    pub async fn relationship_sets(
        &self,
        accounts: &[Account],
    ) -> Result<Vec<RelationshipSet>, RepoError> {
        let mut sets = Vec::with_capacity(accounts.len());
        for account in accounts {
            sets.push(self.relationship_set(account).await?);
        }
        Ok(sets)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AccountId, AccountIdentity, Follow};
    use crate::repo::Repo;
    use pretty_assertions::assert_eq;

    fn sorted_ids(accounts: &HashSet<Account>) -> Vec<i64> {
        let mut ids: Vec<i64> = accounts.iter().map(|a| a.id.0).collect();
        ids.sort();
        ids
    }

    #[tokio::test]
    async fn test_relationship_set_from_stored_follows() {
        let repo = Arc::new(Repo::open("sqlite::memory:").await.unwrap());
        repo.insert_new_accounts(&[
            AccountIdentity::new(1, "alice", "Alice"),
            AccountIdentity::new(2, "bob", "Bob"),
            AccountIdentity::new(3, "carol", "Carol"),
            AccountIdentity::new(4, "dave", "Dave"),
        ])
        .await
        .unwrap();

        let follows = [(1, 2), (1, 3), (2, 1), (4, 1), (1, 99)]
            .iter()
            .map(|(a, b)| Follow::new(AccountId(*a), AccountId(*b)))
            .collect::<Vec<_>>();
        repo.add_follows_if_absent(&follows).await.unwrap();

        let alice = repo.find_account_by_handle("alice").await.unwrap().unwrap();
        let reader = RelationshipReader::new(repo.clone());
        let set = reader.relationship_set(&alice).await.unwrap();

        // 99 was never hydrated, so it cannot be reported
        assert_eq!(sorted_ids(&set.friends), vec![2, 3]);
        assert_eq!(sorted_ids(&set.followers), vec![2, 4]);
        assert_eq!(sorted_ids(&set.real_friends), vec![2]);
    }
}
