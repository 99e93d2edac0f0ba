use crate::domain::{AccountId, AccountIdentity};
use crate::graph_client::{GraphClient, GraphClientError, RemoteProfile};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

#[derive(Default)]
struct MockGraph {
    accounts: HashMap<AccountId, AccountIdentity>,
    follows: HashSet<(AccountId, AccountId)>,
    profile_fetches: Vec<String>,
    lookup_batches: Vec<usize>,
}

/// In-memory remote graph that records every call made to it.
#[derive(Default)]
pub struct MockGraphClient {
    graph: Mutex<MockGraph>,
}

impl MockGraphClient {
    pub fn add_account(&self, identity: AccountIdentity) {
        let mut graph = self.graph.lock().unwrap();
        graph.accounts.insert(identity.id, identity);
    }

    pub fn remove_account(&self, id: i64) {
        let mut graph = self.graph.lock().unwrap();
        graph.accounts.remove(&AccountId(id));
    }

    pub fn add_follow(&self, follower: i64, followee: i64) {
        let mut graph = self.graph.lock().unwrap();
        graph
            .follows
            .insert((AccountId(follower), AccountId(followee)));
    }

    pub fn add_mutual(&self, a: i64, b: i64) {
        self.add_follow(a, b);
        self.add_follow(b, a);
    }

    pub fn profile_fetches(&self) -> Vec<String> {
        self.graph.lock().unwrap().profile_fetches.clone()
    }

    pub fn lookup_batches(&self) -> Vec<usize> {
        self.graph.lock().unwrap().lookup_batches.clone()
    }

    pub fn remote_calls(&self) -> usize {
        let graph = self.graph.lock().unwrap();
        graph.profile_fetches.len() + graph.lookup_batches.len()
    }

    /// alice(1), bob(2) and carol(3) all follow each other.
    pub fn with_three_friends() -> Self {
        let client = Self::default();
        client.add_account(AccountIdentity::new(1, "alice", "Alice"));
        client.add_account(AccountIdentity::new(2, "bob", "Bob"));
        client.add_account(AccountIdentity::new(3, "carol", "Carol"));
        client.add_mutual(1, 2);
        client.add_mutual(1, 3);
        client.add_mutual(2, 3);
        client
    }
}

#[async_trait]
impl GraphClient for MockGraphClient {
    async fn resolve_identity_and_edges(
        &self,
        handle: &str,
    ) -> Result<RemoteProfile, GraphClientError> {
        let mut graph = self.graph.lock().unwrap();
        graph.profile_fetches.push(handle.to_string());

        let identity = graph
            .accounts
            .values()
            .find(|identity| identity.handle.eq_ignore_ascii_case(handle))
            .cloned()
            .ok_or_else(|| GraphClientError::NotFound(handle.to_string()))?;

        let friend_ids = graph
            .follows
            .iter()
            .filter(|(follower, _)| *follower == identity.id)
            .map(|(_, followee)| *followee)
            .collect();
        let follower_ids = graph
            .follows
            .iter()
            .filter(|(_, followee)| *followee == identity.id)
            .map(|(follower, _)| *follower)
            .collect();

        Ok(RemoteProfile {
            identity,
            friend_ids,
            follower_ids,
        })
    }

    async fn lookup_accounts(
        &self,
        ids: &[AccountId],
    ) -> Result<Vec<AccountIdentity>, GraphClientError> {
        let mut graph = self.graph.lock().unwrap();
        graph.lookup_batches.push(ids.len());

        Ok(ids
            .iter()
            .filter_map(|id| graph.accounts.get(id).cloned())
            .collect())
    }
}
