//! Mirror credentials
//!
//! The mirror is either configured directly (`base_uri` + `password`) or
//! described by a small public JSON document:
//!
//! ```json
//! { "baseUri": "https://mirror.example.org/", "password": "aHVudGVyMg==" }
//! ```
//!
//! The document is cached next to the metadata and fetched again once it is
//! older than the configured maximum age.

use anyhow::{bail, Context, Result};
use base64::Engine;
use chrono::Utc;
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::MirrorConfig;
use crate::freshness::{is_stale, max_age, modified_at};

/// Cached credentials document name
pub const CREDENTIALS_FILE: &str = "credentials.json";

/// Resolved mirror location and archive password
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub base_uri: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
struct CredentialsDocument {
    #[serde(rename = "baseUri")]
    base_uri: String,
    /// Base64 encoded
    password: String,
}

/// Parse a credentials document
pub fn parse_credentials(json: &str) -> Result<Credentials> {
    let doc: CredentialsDocument =
        serde_json::from_str(json).context("Invalid credentials document")?;

    let decoded = base64::engine::general_purpose::STANDARD
        .decode(doc.password.trim())
        .context("Credentials password is not valid base64")?;
    let password = String::from_utf8(decoded).context("Credentials password is not UTF-8")?;

    Ok(Credentials {
        base_uri: doc.base_uri,
        password,
    })
}

/// Resolve credentials from configuration, the cache, or the network
pub async fn resolve_credentials(config: &MirrorConfig, cache_dir: &Path) -> Result<Credentials> {
    if let Some(base_uri) = &config.base_uri {
        debug!(base_uri = %base_uri, "Using configured mirror");
        return Ok(Credentials {
            base_uri: base_uri.clone(),
            password: config.password.clone(),
        });
    }

    let Some(url) = &config.credentials_url else {
        bail!("No mirror configured: set mirror.base_uri or mirror.credentials_url");
    };

    let cached = cache_dir.join(CREDENTIALS_FILE);
    let limit = max_age(config.metadata_max_age_hours);
    let fresh = modified_at(&cached)
        .map(|modified| !is_stale(modified, Utc::now(), limit))
        .unwrap_or(false);

    if fresh {
        match read_cached(&cached) {
            Ok(credentials) => return Ok(credentials),
            Err(e) => warn!(path = %cached.display(), error = %e, "Ignoring cached credentials"),
        }
    }

    match fetch_credentials(url, &cached).await {
        Ok(credentials) => Ok(credentials),
        Err(e) if cached.exists() => {
            // Offline: an old document is better than none
            warn!(url = %url, error = %e, "Credentials fetch failed, using cached copy");
            read_cached(&cached)
        }
        Err(e) => Err(e),
    }
}

fn read_cached(path: &Path) -> Result<Credentials> {
    let json = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    parse_credentials(&json)
}

async fn fetch_credentials(url: &str, cache_path: &Path) -> Result<Credentials> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(30))
        .build()
        .context("Failed to create HTTP client")?;

    info!(url = %url, "Fetching mirror credentials");
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to fetch {}", url))?;

    if !response.status().is_success() {
        bail!("Credentials fetch from {} returned {}", url, response.status());
    }

    let body = response
        .text()
        .await
        .context("Failed to read credentials response body")?;
    let credentials = parse_credentials(&body)?;

    if let Err(e) = std::fs::write(cache_path, &body) {
        warn!(path = %cache_path.display(), error = %e, "Failed to cache credentials");
    }

    Ok(credentials)
}
