use crate::config::{Credentials, Settings};
use crate::domain::{AccountId, AccountIdentity};
use crate::graph_client::{GraphClient, GraphClientError, RemoteProfile};
use crate::metrics;
use crate::oauth1::authorization_header;
use async_trait::async_trait;
use chrono::Utc;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::{HeaderMap, AUTHORIZATION};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::HashSet;
use std::time::Duration;
use tokio_retry::strategy::{jitter, ExponentialBackoff};
use tokio_retry::RetryIf;
use tracing::{debug, warn};
use url::Url;

/// Longest we are willing to sleep waiting for a rate limit window to reset.
const MAX_RATE_LIMIT_WAIT: Duration = Duration::from_secs(15 * 60);

/// API error codes meaning the account cannot be served at all.
const USER_NOT_FOUND: i64 = 50;
const USER_SUSPENDED: i64 = 63;

#[derive(Debug, Deserialize)]
struct UserObject {
    id: i64,
    screen_name: String,
    name: String,
}

impl From<UserObject> for AccountIdentity {
    fn from(user: UserObject) -> Self {
        AccountIdentity {
            id: AccountId(user.id),
            handle: user.screen_name,
            display_name: user.name,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    #[serde(default)]
    errors: Vec<ApiErrorEntry>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorEntry {
    code: i64,
}

impl ApiErrorBody {
    fn codes(&self) -> Vec<i64> {
        self.errors.iter().map(|e| e.code).collect()
    }
}

#[derive(Debug, Deserialize)]
struct IdsPage {
    ids: Vec<i64>,
    #[serde(default)]
    next_cursor: i64,
}

/// Remote graph backed by the Twitter v1.1 REST API.
pub struct TwitterClient {
    http: reqwest::Client,
    base_url: Url,
    credentials: Credentials,
    rate_limiter: DefaultDirectRateLimiter,
    ids_page_size: usize,
    max_retries: usize,
}

impl TwitterClient {
    pub fn new(settings: &Settings, credentials: Credentials) -> Result<Self, GraphClientError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(settings.request_timeout_secs))
            .build()
            .map_err(|e| GraphClientError::Transient(e.to_string()))?;

        // Trailing slash so relative endpoints are appended, not substituted
        let base_url = Url::parse(&format!("{}/", settings.api_base_url.trim_end_matches('/')))
            .map_err(|e| GraphClientError::Config(format!("invalid api_base_url: {}", e)))?;

        Ok(Self {
            http,
            base_url,
            credentials,
            rate_limiter: RateLimiter::direct(Quota::per_minute(settings.max_requests_per_minute)),
            ids_page_size: settings.ids_page_size.get(),
            max_retries: settings.max_retries,
        })
    }

    fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<Url, GraphClientError> {
        let mut url = self
            .base_url
            .join(path)
            .map_err(|e| GraphClientError::Config(format!("invalid endpoint {}: {}", path, e)))?;
        url.query_pairs_mut().extend_pairs(params.iter());
        Ok(url)
    }

    async fn get_json<R: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<R, GraphClientError> {
        let url = self.endpoint(path, params)?;

        let retry_strategy = ExponentialBackoff::from_millis(2)
            .factor(500)
            .max_delay(Duration::from_secs(60))
            .map(jitter)
            .take(self.max_retries);

        RetryIf::spawn(
            retry_strategy,
            || self.get_json_once(&url),
            |e: &GraphClientError| {
                if e.is_retryable() {
                    warn!("Retrying {}: {}", url.path(), e);
                    metrics::remote_retries().increment(1);
                    true
                } else {
                    false
                }
            },
        )
        .await
    }

    async fn get_json_once<R: DeserializeOwned>(&self, url: &Url) -> Result<R, GraphClientError> {
        self.rate_limiter.until_ready().await;

        let header = authorization_header("GET", url, &self.credentials)?;
        debug!("GET {}", url.path());

        let response = self
            .http
            .get(url.clone())
            .header(AUTHORIZATION, header)
            .send()
            .await
            .map_err(|e| GraphClientError::Transient(e.to_string()))?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            if let Some(wait) = rate_limit_wait(response.headers()) {
                warn!("Rate limited, sleeping {} seconds", wait.as_secs());
                tokio::time::sleep(wait).await;
            }
        }

        if !status.is_success() {
            let body = response.json::<ApiErrorBody>().await.unwrap_or_default();
            return Err(classify_failure(status, &body.codes(), url));
        }

        response
            .json::<R>()
            .await
            .map_err(|e| GraphClientError::Decode(e.to_string()))
    }

    async fn ids(&self, path: &str, handle: &str) -> Result<HashSet<AccountId>, GraphClientError> {
        let mut ids = HashSet::new();
        let mut cursor: i64 = -1;

        while cursor != 0 {
            let page: IdsPage = self
                .get_json(
                    path,
                    &[
                        ("screen_name", handle.to_string()),
                        ("cursor", cursor.to_string()),
                        ("count", self.ids_page_size.to_string()),
                    ],
                )
                .await?;

            ids.extend(page.ids.into_iter().map(AccountId));
            cursor = page.next_cursor;
        }

        Ok(ids)
    }
}

#[async_trait]
impl GraphClient for TwitterClient {
    async fn resolve_identity_and_edges(
        &self,
        handle: &str,
    ) -> Result<RemoteProfile, GraphClientError> {
        let not_found = |e: GraphClientError| match e {
            GraphClientError::NotFound(_) => GraphClientError::NotFound(handle.to_string()),
            other => other,
        };

        let user: UserObject = self
            .get_json("users/show.json", &[("screen_name", handle.to_string())])
            .await
            .map_err(not_found)?;
        let friend_ids = self.ids("friends/ids.json", handle).await.map_err(not_found)?;
        let follower_ids = self
            .ids("followers/ids.json", handle)
            .await
            .map_err(not_found)?;

        Ok(RemoteProfile {
            identity: user.into(),
            friend_ids,
            follower_ids,
        })
    }

    async fn lookup_accounts(
        &self,
        ids: &[AccountId],
    ) -> Result<Vec<AccountIdentity>, GraphClientError> {
        if ids.is_empty() {
            return Ok(vec![]);
        }

        let user_ids = ids
            .iter()
            .map(|id| id.to_string())
            .collect::<Vec<_>>()
            .join(",");

        let result: Result<Vec<UserObject>, GraphClientError> = self
            .get_json(
                "users/lookup.json",
                &[
                    ("user_id", user_ids),
                    ("include_entities", "false".to_string()),
                ],
            )
            .await;

        match result {
            Ok(users) => Ok(users.into_iter().map(AccountIdentity::from).collect()),
            // None of the ids could be resolved (suspended or deleted accounts)
            Err(GraphClientError::NotFound(_)) => Ok(vec![]),
            Err(e) => Err(e),
        }
    }
}

/// Maps a failed response to an error. Suspended and unknown accounts are
/// reported as not found whatever the status code.
fn classify_failure(status: StatusCode, codes: &[i64], url: &Url) -> GraphClientError {
    if codes
        .iter()
        .any(|code| *code == USER_NOT_FOUND || *code == USER_SUSPENDED)
    {
        return GraphClientError::NotFound(url.path().to_string());
    }

    match status {
        StatusCode::NOT_FOUND => GraphClientError::NotFound(url.path().to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            GraphClientError::Auth(format!("{} returned {}", url.path(), status))
        }
        StatusCode::TOO_MANY_REQUESTS => GraphClientError::RateLimited,
        s if s.is_server_error() => {
            GraphClientError::Transient(format!("{} returned {}", url.path(), status))
        }
        s => GraphClientError::Decode(format!("{} returned {}", url.path(), s)),
    }
}

/// Time left until the rate limit window resets, from the
/// `x-rate-limit-reset` header (epoch seconds).
fn rate_limit_wait(headers: &HeaderMap) -> Option<Duration> {
    let reset_at = headers
        .get("x-rate-limit-reset")?
        .to_str()
        .ok()?
        .trim()
        .parse::<i64>()
        .ok()?;

    let seconds = (reset_at - Utc::now().timestamp()).max(0) as u64;
    Some(Duration::from_secs(seconds + 1).min(MAX_RATE_LIMIT_WAIT))
}
