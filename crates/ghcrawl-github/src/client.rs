//! Authenticated GitHub REST client, one per credential

use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use ghcrawl_core::{Credential, FetchError, Page, RemoteApi, Workflow};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use serde_json::Value;

use crate::headers::{next_page, quota_from_headers};

pub const DEFAULT_BASE_URL: &str = "https://api.github.com";
pub const DEFAULT_USER_AGENT: &str = concat!("ghcrawl/", env!("CARGO_PKG_VERSION"));

/// Connect timeout
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Membership page size (the API maximum)
const MEMBERS_PER_PAGE: u32 = 100;

#[derive(Clone, Debug)]
pub struct ClientOptions {
    pub base_url: String,
    pub user_agent: String,
    pub request_timeout: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            request_timeout: Duration::from_secs(20),
        }
    }
}

pub struct GitHubClient {
    http: reqwest::Client,
    base_url: String,
    account: String,
}

impl std::fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GitHubClient")
            .field("account", &self.account)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl GitHubClient {
    pub fn new(credential: &Credential, options: &ClientOptions) -> Result<Self> {
        let mut auth = HeaderValue::from_str(&format!("token {}", credential.token))
            .with_context(|| format!("Token for {} is not a valid header", credential.account))?;
        auth.set_sensitive(true);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, auth);
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));

        let http = reqwest::Client::builder()
            .default_headers(headers)
            .user_agent(&options.user_agent)
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(options.request_timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url: options.base_url.trim_end_matches('/').to_string(),
            account: credential.account.clone(),
        })
    }

    /// Endpoint for one lookup; rejects keys that cannot name a resource
    pub fn url_for(
        &self,
        workflow: Workflow,
        lookup_key: &str,
        page: Option<u32>,
    ) -> Result<String, FetchError> {
        let invalid = || FetchError::InvalidKey {
            key: lookup_key.to_string(),
        };
        if lookup_key.is_empty() || lookup_key.contains(char::is_whitespace) {
            return Err(invalid());
        }
        let base = &self.base_url;
        match workflow {
            Workflow::Repos => {
                let parts: Vec<&str> = lookup_key.split('/').collect();
                match parts.as_slice() {
                    [owner, name] if !owner.is_empty() && !name.is_empty() => {
                        Ok(format!("{base}/repos/{owner}/{name}"))
                    }
                    _ => Err(invalid()),
                }
            }
            Workflow::Users if !lookup_key.contains('/') => Ok(format!("{base}/users/{lookup_key}")),
            Workflow::Members if !lookup_key.contains('/') => Ok(format!(
                "{base}/orgs/{lookup_key}/public_members?per_page={MEMBERS_PER_PAGE}&page={}",
                page.unwrap_or(1)
            )),
            Workflow::Users | Workflow::Members => Err(invalid()),
        }
    }

    async fn get(&self, url: String) -> Result<Page, FetchError> {
        log::debug!("[{}] GET {url}", self.account);
        let response = self.http.get(&url).send().await.map_err(from_reqwest)?;

        let status = response.status();
        let quota = quota_from_headers(response.headers());
        let next_page = next_page(response.headers());
        if !status.is_success() {
            return Ok(Page {
                status: status.as_u16(),
                quota,
                entity: None,
                next_page: None,
            });
        }

        let body = response.bytes().await.map_err(from_reqwest)?;
        let entity: Value = serde_json::from_slice(&body).map_err(|e| FetchError::Malformed {
            status: status.as_u16(),
            message: e.to_string(),
        })?;
        Ok(Page {
            status: status.as_u16(),
            quota,
            entity: Some(entity),
            next_page,
        })
    }
}

fn from_reqwest(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::no_response(e.to_string())
    }
}

impl RemoteApi for GitHubClient {
    fn label(&self) -> &str {
        &self.account
    }

    fn fetch(
        &self,
        workflow: Workflow,
        lookup_key: &str,
        page: Option<u32>,
    ) -> impl Future<Output = Result<Page, FetchError>> + Send {
        let url = self.url_for(workflow, lookup_key, page);
        async move { self.get(url?).await }
    }
}
