use anyhow::{Context, Result};
use clap::{ArgAction, Parser};
use real_friends::{
    config::{Config, Credentials, Settings},
    domain::QueryMode,
    metrics::setup_metrics,
    query::{ensure_supported, QueryError, QueryRunner},
    repo::Repo,
    twitter_client::TwitterClient,
};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Finds the accounts every given handle has in common.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    /// Compare everyone the handles follow instead of mutual follows only
    #[arg(long)]
    loose: bool,

    /// Directory holding settings.yml and its overrides
    #[arg(long, default_value = "config")]
    config_dir: String,

    #[arg(value_enum)]
    mode: QueryMode,

    #[arg(required = true, num_args = 1..)]
    handles: Vec<String>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let args = Args::parse();

    let default_level = match args.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();

    let code = run(&args).await?;
    Ok(ExitCode::from(code))
}

/// Runs one query and returns the process exit code.
async fn run(args: &Args) -> Result<u8> {
    // Reserved modes never touch the cache or the network
    if let Err(e) = ensure_supported(args.mode) {
        return Ok(report_failure(&e));
    }

    let config = Config::new(&args.config_dir).context("Loading configuration failed")?;
    let settings = config
        .get::<Settings>()
        .context("Retrieving settings from configuration failed")?;
    let prometheus_handle = setup_metrics().context("Installing metrics recorder failed")?;

    info!("Opening cache at {}", settings.database_url);
    let repo = Repo::open(&settings.database_url)
        .await
        .context("Failed to open the local cache")?;
    let repo = Arc::new(repo);

    let twitter_client = TwitterClient::new(&settings, Credentials::from_env())
        .context("Failed to build the API client")?;

    let runner = QueryRunner::new(
        repo.clone(),
        Arc::new(twitter_client),
        settings.lookup_chunk_size.get(),
    );

    let result = runner.run(args.mode, &args.handles, args.loose).await;
    debug!("Metrics:\n{}", prometheus_handle.render());

    drop(runner);
    if let Some(repo) = Arc::into_inner(repo) {
        repo.close().await;
    }

    match result {
        Ok(report) => {
            print!("{}", report);
            Ok(0)
        }
        Err(e) => Ok(report_failure(&e)),
    }
}

fn report_failure(e: &QueryError) -> u8 {
    error!("Query failed: {}", e);
    eprintln!("Error: {}", e);
    e.exit_code()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[tokio::test]
    async fn test_reserved_mode_exits_before_creating_the_cache() {
        let dir = std::env::temp_dir().join(format!("real_friends_reserved_{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        let database = dir.join("cache.db");
        fs::write(
            dir.join("settings.yml"),
            format!(
                "real_friends:\n  database_url: \"sqlite://{}\"\n",
                database.display()
            ),
        )
        .unwrap();

        for mode in ["mutuals", "clique"] {
            let args = Args::parse_from([
                "real_friends",
                "--config-dir",
                dir.to_str().unwrap(),
                mode,
                "alice",
            ]);

            assert_eq!(run(&args).await.unwrap(), 3);
        }

        assert!(!database.exists());
        fs::remove_dir_all(&dir).unwrap();
    }
}
