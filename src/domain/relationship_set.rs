use super::Account;
use std::collections::HashSet;

/// Friends, followers and mutual connections of a single account.
#[derive(Debug, Clone)]
pub struct RelationshipSet {
    pub account: Account,
    pub friends: HashSet<Account>,
    pub followers: HashSet<Account>,
    pub real_friends: HashSet<Account>,
}

impl RelationshipSet {
    pub fn new(account: Account, friends: HashSet<Account>, followers: HashSet<Account>) -> Self {
        let real_friends = friends.intersection(&followers).cloned().collect();

        Self {
            account,
            friends,
            followers,
            real_friends,
        }
    }

    /// The set used when looking for common connections.
    pub fn connections(&self, loose: bool) -> &HashSet<Account> {
        if loose {
            &self.friends
        } else {
            &self.real_friends
        }
    }
}

/// Intersects the connections of every relationship set, left to right,
/// seeded with the first one.
pub fn common_connections(sets: &[RelationshipSet], loose: bool) -> HashSet<Account> {
    let Some((first, rest)) = sets.split_first() else {
        return HashSet::new();
    };

    let mut common = first.connections(loose).clone();
    for set in rest {
        if common.is_empty() {
            break;
        }
        common.retain(|account| set.connections(loose).contains(account));
    }

    common
}
