use metrics::{describe_counter, Counter};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub fn cache_hits() -> Counter {
    metrics::counter!("cache_hits")
}

pub fn remote_profile_fetches() -> Counter {
    metrics::counter!("remote_profile_fetches")
}

pub fn remote_lookup_requests() -> Counter {
    metrics::counter!("remote_lookup_requests")
}

pub fn remote_retries() -> Counter {
    metrics::counter!("remote_retries")
}

pub fn accounts_discovered() -> Counter {
    metrics::counter!("accounts_discovered")
}

pub fn follows_inserted() -> Counter {
    metrics::counter!("follows_inserted")
}

pub fn setup_metrics() -> Result<PrometheusHandle, anyhow::Error> {
    describe_counter!(
        "cache_hits",
        "Number of handles answered from the local cache"
    );
    describe_counter!(
        "remote_profile_fetches",
        "Number of handles whose identity and relationships were fetched remotely"
    );
    describe_counter!(
        "remote_lookup_requests",
        "Number of batched account lookups sent to the remote API"
    );
    describe_counter!(
        "remote_retries",
        "Number of remote requests retried after a rate limit or transient failure"
    );
    describe_counter!(
        "accounts_discovered",
        "Number of accounts added to the local cache"
    );
    describe_counter!(
        "follows_inserted",
        "Number of follow relationships added to the local cache"
    );

    let prometheus_builder = PrometheusBuilder::new();
    let prometheus_handle = prometheus_builder.install_recorder()?;
    Ok(prometheus_handle)
}
