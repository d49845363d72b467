//! Link resolution for indirect share links
//!
//! Share links from "locker" style hosts cannot be fetched directly. The resolver
//! posts each link to a third-party endpoint and reads back time-limited direct
//! URLs. Every link is resolved independently: a failing link becomes `None` in the
//! output and never aborts its siblings. There is exactly one attempt per link.

use crate::config::ResolverConfig;
use crate::error::{Error, ResolveError, Result};
use crate::types::ResolvedLink;
use futures::stream::{self, StreamExt};
use serde::Deserialize;
use tracing::{debug, info, warn};

/// Top-level resolver response
#[derive(Debug, Deserialize)]
struct ResolverResponse {
    #[serde(default)]
    response: Option<Vec<ResolverEntry>>,
}

#[derive(Debug, Deserialize)]
struct ResolverEntry {
    #[serde(default)]
    resolutions: Resolutions,
    #[serde(default)]
    thumbnail: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Resolutions {
    #[serde(rename = "Fast Download", default)]
    fast_download: Option<String>,
    #[serde(rename = "HD Video", default)]
    hd_video: Option<String>,
}

/// Resolves share links through the configured endpoint
#[derive(Debug, Clone)]
pub struct LinkResolver {
    client: reqwest::Client,
    endpoint: String,
    max_connections: usize,
}

impl LinkResolver {
    /// Create a resolver with its own HTTP client
    pub fn new(config: &ResolverConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(config.user_agent.as_str())
            .pool_max_idle_per_host(config.max_connections)
            .build()
            .map_err(|e| {
                Error::Io(std::io::Error::other(format!(
                    "Failed to create HTTP client: {}",
                    e
                )))
            })?;

        Ok(Self::with_client(client, config))
    }

    /// Create a resolver that shares an existing client
    pub fn with_client(client: reqwest::Client, config: &ResolverConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint.clone(),
            max_connections: config.max_connections.max(1),
        }
    }

    /// Resolve every link concurrently
    ///
    /// The output has one entry per input, in input order; unresolvable links are `None`.
    pub async fn resolve<I, S>(&self, urls: I) -> Vec<Option<ResolvedLink>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let urls: Vec<String> = urls
            .into_iter()
            .map(|u| u.as_ref().trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();

        let links: Vec<Option<ResolvedLink>> = stream::iter(urls)
            .map(|url| async move { self.resolve_one(&url).await })
            .buffered(self.max_connections)
            .collect()
            .await;

        info!(
            requested = links.len(),
            resolved = links.iter().filter(|l| l.is_some()).count(),
            "resolved share links"
        );
        links
    }

    /// Resolve a single link, logging and swallowing any failure
    pub async fn resolve_one(&self, url: &str) -> Option<ResolvedLink> {
        match self.fetch_link(url).await {
            Ok(link) => {
                debug!(url, fast_link = %link.fast_link, "resolved share link");
                Some(link)
            }
            Err(e) => {
                warn!(url, error = %e, "unable to resolve share link");
                None
            }
        }
    }

    async fn fetch_link(&self, url: &str) -> Result<ResolvedLink> {
        let response = self
            .client
            .post(&self.endpoint)
            .form(&[("url", url)])
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(ResolveError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        let body = response.text().await?;
        parse_response(url, &body)
    }

    /// Fast links of the resolved entries, skipping absent ones
    pub fn fast_links(links: &[Option<ResolvedLink>]) -> Vec<String> {
        links
            .iter()
            .flatten()
            .map(|link| link.fast_link.clone())
            .collect()
    }
}

/// Interpret a resolver response body
fn parse_response(url: &str, body: &str) -> Result<ResolvedLink> {
    let parsed: ResolverResponse =
        serde_json::from_str(body).map_err(|e| ResolveError::Malformed {
            url: url.to_string(),
            reason: e.to_string(),
        })?;

    let entry = parsed
        .response
        .and_then(|entries| entries.into_iter().next())
        .ok_or_else(|| ResolveError::Empty {
            url: url.to_string(),
        })?;

    let fast_link = entry
        .resolutions
        .fast_download
        .filter(|l| !l.is_empty())
        .ok_or_else(|| ResolveError::Empty {
            url: url.to_string(),
        })?;

    Ok(ResolvedLink {
        thumbnail: entry.thumbnail.unwrap_or_default(),
        title: entry.title.unwrap_or_default(),
        fast_link,
        slow_link: entry.resolutions.hd_video.unwrap_or_default(),
    })
}
