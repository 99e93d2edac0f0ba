use super::AccountId;

/// A directed "follows" edge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Follow {
    pub follower: AccountId,
    pub followee: AccountId,
}

impl Follow {
    pub fn new(follower: AccountId, followee: AccountId) -> Self {
        Self { follower, followee }
    }
}
