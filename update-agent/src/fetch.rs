use std::time::Duration;

use reqwest::{blocking::Client, StatusCode};
use tracing::{debug, info};
use url::Url;

use crate::retry::{Exhausted, RetryPolicy, Sleep};

/// Why a single request for release info failed.
#[derive(Debug, thiserror::Error)]
pub enum AttemptError {
    #[error("request failed: {0}")]
    Send(reqwest::Error),
    #[error("server responded with status code `{0}`, expected range 200-299")]
    Status(StatusCode),
    #[error("failed reading response body: {0}")]
    Body(reqwest::Error),
    #[error("response body is empty")]
    EmptyBody,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed fetching release info from `{url}` after {attempts} attempt(s)")]
    FetchFailed {
        url: Url,
        attempts: u32,
        #[source]
        last: AttemptError,
    },
}

/// The model info endpoint for `model`.
pub fn api_url(base: &Url, model: &str) -> Url {
    let mut url = base.clone();
    url.query_pairs_mut().append_pair("model", model);
    url
}

/// Fetches the raw release document from `url`, retrying according to `policy`.
///
/// Every attempt is bounded by `timeout`. Only a 2xx response with a non-blank body counts as a
/// success.
pub fn fetch(
    client: &Client,
    url: &Url,
    policy: RetryPolicy,
    timeout: Duration,
    sleep: &dyn Sleep,
) -> Result<String, Error> {
    info!("fetching release info from `{url}`");
    policy
        .run(sleep, "fetching release info", |attempt| {
            debug!("fetching release info, attempt {attempt}");
            fetch_once(client, url, timeout)
        })
        .map_err(|Exhausted { attempts, last }| Error::FetchFailed {
            url: url.clone(),
            attempts,
            last,
        })
}

fn fetch_once(client: &Client, url: &Url, timeout: Duration) -> Result<String, AttemptError> {
    let response = client
        .get(url.clone())
        .timeout(timeout)
        .send()
        .map_err(AttemptError::Send)?;
    let status = response.status();
    if !status.is_success() {
        return Err(AttemptError::Status(status));
    }
    let body = response.text().map_err(AttemptError::Body)?;
    if body.trim().is_empty() {
        return Err(AttemptError::EmptyBody);
    }
    Ok(body)
}
