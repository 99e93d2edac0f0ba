pub mod account;
pub use account::{normalize_handle, Account, AccountId, AccountIdentity};

pub mod follow;
pub use follow::Follow;

pub mod relationship_set;
pub use relationship_set::{common_connections, RelationshipSet};

pub mod query_mode;
pub use query_mode::QueryMode;
