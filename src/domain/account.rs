use chrono::{DateTime, Utc};
use std::fmt;
use std::hash::{Hash, Hasher};

/// Platform assigned account id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AccountId(pub i64);

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for AccountId {
    fn from(id: i64) -> Self {
        AccountId(id)
    }
}

/// Identity of an account as reported by the remote graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountIdentity {
    pub id: AccountId,
    pub handle: String,
    pub display_name: String,
}

impl AccountIdentity {
    pub fn new(id: impl Into<AccountId>, handle: &str, display_name: &str) -> Self {
        Self {
            id: id.into(),
            handle: handle.to_string(),
            display_name: display_name.to_string(),
        }
    }
}

/// A stored account. Equality and hashing only look at the id, so the same
/// account loaded twice compares equal even if its metadata changed between
/// loads.
#[derive(Debug, Clone)]
pub struct Account {
    pub id: AccountId,
    pub handle: String,
    pub display_name: String,
    /// `None` until the relationships of this account were fetched directly.
    pub last_refreshed: Option<DateTime<Utc>>,
    pub discovered_at: DateTime<Utc>,
}

impl Account {
    pub fn is_refreshed(&self) -> bool {
        self.last_refreshed.is_some()
    }
}

impl PartialEq for Account {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Account {}

impl Hash for Account {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{} ({})", self.handle, self.id)
    }
}

/// Normalizes a user supplied handle: trims whitespace and a leading `@`.
pub fn normalize_handle(handle: &str) -> &str {
    let trimmed = handle.trim();
    trimmed.strip_prefix('@').unwrap_or(trimmed).trim()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn account(id: i64, handle: &str) -> Account {
        Account {
            id: AccountId(id),
            handle: handle.to_string(),
            display_name: handle.to_uppercase(),
            last_refreshed: None,
            discovered_at: Utc::now(),
        }
    }

    #[test]
    fn test_accounts_are_equal_by_id() {
        let mut renamed = account(1, "alice");
        renamed.handle = "alice_renamed".to_string();
        renamed.last_refreshed = Some(Utc::now());

        assert_eq!(account(1, "alice"), renamed);
        assert_ne!(account(1, "alice"), account(2, "alice"));

        let set: HashSet<Account> = [account(1, "alice"), renamed].into_iter().collect();
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_normalize_handle() {
        assert_eq!(normalize_handle("alice"), "alice");
        assert_eq!(normalize_handle("@alice"), "alice");
        assert_eq!(normalize_handle("  @alice \n"), "alice");
        assert_eq!(normalize_handle("@"), "");
    }
}
