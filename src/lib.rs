pub mod cache_refresher;
pub mod config;
pub mod domain;
pub mod graph_client;
pub mod metrics;
pub mod migrations;
pub mod oauth1;
pub mod query;
pub mod relationships;
pub mod repo;
pub mod twitter_client;

#[cfg(test)]
mod test_support;
