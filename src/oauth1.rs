//! OAuth 1.0a request signing (HMAC-SHA1) with pre-issued user tokens.

use crate::config::Credentials;
use crate::graph_client::GraphClientError;
use base64::Engine;
use hmac::{Hmac, Mac};
use rand::distributions::Alphanumeric;
use rand::Rng;
use sha1::Sha1;
use url::Url;

type HmacSha1 = Hmac<Sha1>;

/// Builds the `Authorization` header value for a request to `url`. Query
/// parameters of the url are part of the signature.
pub fn authorization_header(
    method: &str,
    url: &Url,
    credentials: &Credentials,
) -> Result<String, GraphClientError> {
    let nonce: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect();
    let timestamp = chrono::Utc::now().timestamp().to_string();

    signed_header(method, url, credentials, &nonce, &timestamp)
}

fn signed_header(
    method: &str,
    url: &Url,
    credentials: &Credentials,
    nonce: &str,
    timestamp: &str,
) -> Result<String, GraphClientError> {
    let signature = signature(method, url, credentials, nonce, timestamp)?;

    Ok(format!(
        "OAuth oauth_consumer_key=\"{}\", oauth_nonce=\"{}\", oauth_signature=\"{}\", oauth_signature_method=\"HMAC-SHA1\", oauth_timestamp=\"{}\", oauth_token=\"{}\", oauth_version=\"1.0\"",
        percent_encode(&credentials.consumer_key),
        percent_encode(nonce),
        percent_encode(&signature),
        percent_encode(timestamp),
        percent_encode(&credentials.access_key),
    ))
}

fn signature(
    method: &str,
    url: &Url,
    credentials: &Credentials,
    nonce: &str,
    timestamp: &str,
) -> Result<String, GraphClientError> {
    let mut params: Vec<(String, String)> = vec![
        ("oauth_consumer_key".into(), credentials.consumer_key.clone()),
        ("oauth_nonce".into(), nonce.into()),
        ("oauth_signature_method".into(), "HMAC-SHA1".into()),
        ("oauth_timestamp".into(), timestamp.into()),
        ("oauth_token".into(), credentials.access_key.clone()),
        ("oauth_version".into(), "1.0".into()),
    ];
    params.extend(
        url.query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned())),
    );

    // Sorted by encoded key, then encoded value
    let mut encoded: Vec<(String, String)> = params
        .iter()
        .map(|(k, v)| (percent_encode(k), percent_encode(v)))
        .collect();
    encoded.sort();

    let param_string = encoded
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    let mut base_url = url.clone();
    base_url.set_query(None);
    base_url.set_fragment(None);

    let base_string = format!(
        "{}&{}&{}",
        method.to_uppercase(),
        percent_encode(base_url.as_str()),
        percent_encode(&param_string)
    );

    let signing_key = format!(
        "{}&{}",
        percent_encode(&credentials.consumer_secret),
        percent_encode(&credentials.access_secret)
    );

    let mut mac = HmacSha1::new_from_slice(signing_key.as_bytes())
        .map_err(|e| GraphClientError::Auth(format!("HMAC key error: {}", e)))?;
    mac.update(base_string.as_bytes());

    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

/// RFC 3986 percent encoding, leaving only unreserved characters as is.
pub fn percent_encode(s: &str) -> String {
    let mut result = String::with_capacity(s.len() * 2);
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                result.push(byte as char);
            }
            _ => {
                result.push_str(&format!("%{:02X}", byte));
            }
        }
    }
    result
}
