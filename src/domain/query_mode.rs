use clap::ValueEnum;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum QueryMode {
    /// Accounts every handle has as a (real) friend
    Common,
    /// Reserved, not available yet
    Clique,
    /// Reserved, not available yet
    Mutuals,
}

impl QueryMode {
    pub fn is_supported(&self) -> bool {
        matches!(self, QueryMode::Common)
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryMode::Common => write!(f, "common"),
            QueryMode::Clique => write!(f, "clique"),
            QueryMode::Mutuals => write!(f, "mutuals"),
        }
    }
}
