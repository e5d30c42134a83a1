//! Latest OS release lookup.

use std::time::Duration;

use noderoll_core::strip_version_prefix;
use reqwest::StatusCode;
use serde::Deserialize;
use tracing::debug;

use crate::client::USER_AGENT;
use crate::error::{FactoryError, FactoryResult};

#[derive(Debug, Deserialize)]
struct Release {
    #[serde(default)]
    tag_name: String,
}

/// Fetch the latest release tag from a GitHub-style releases endpoint and
/// return it without the leading `v`.
pub async fn latest_release_version(url: &str) -> FactoryResult<String> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(10))
        .user_agent(USER_AGENT)
        .build()
        .map_err(|source| FactoryError::Http {
            url: url.to_string(),
            source,
        })?;

    let resp = http.get(url).send().await.map_err(|source| FactoryError::Http {
        url: url.to_string(),
        source,
    })?;
    if resp.status() != StatusCode::OK {
        return Err(FactoryError::Status {
            url: url.to_string(),
            status: resp.status().as_u16(),
        });
    }

    let release: Release = resp.json().await.map_err(|source| FactoryError::Decode {
        url: url.to_string(),
        source,
    })?;
    let version = strip_version_prefix(&release.tag_name);
    if version.is_empty() {
        return Err(FactoryError::EmptyVersion(url.to_string()));
    }
    debug!(version, "latest release");
    Ok(version.to_string())
}
