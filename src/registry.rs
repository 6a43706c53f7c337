//! Minimal Distribution-API client used by the staleness resolver.
//!
//! The only operation vigil needs from a registry directly is resolving the
//! digest of a manifest with a HEAD request, so a stale check can often be
//! answered without pulling the image. Everything else (pulls, auth against
//! the daemon's credential store) goes through the Docker daemon.

use serde::Deserialize;

pub type Result<T> = std::result::Result<T, RegistryError>;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("invalid image reference '{0}'")]
    InvalidReference(String),
    #[error("digest '{0}' is not a sha256 digest")]
    InvalidDigest(String),
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("registry denied access to {0}")]
    Unauthorized(String),
    #[error("registry returned no digest header for {0}")]
    MissingDigestHeader(String),
}

const DEFAULT_HOST: &str = "docker.io";
const DEFAULT_HOST_API: &str = "registry-1.docker.io";
const DEFAULT_TAG: &str = "latest";

const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
     application/vnd.docker.distribution.manifest.list.v2+json, \
     application/vnd.oci.image.manifest.v1+json, \
     application/vnd.oci.image.index.v1+json";

/// A normalized image reference: registry host, repository and tag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    host: String,
    repository: String,
    tag: String,
}

impl ImageRef {
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() || reference.contains(char::is_whitespace) {
            return Err(RegistryError::InvalidReference(reference.to_string()));
        }

        // A reference pinned to a digest carries no tag to re-resolve.
        let reference = reference.split('@').next().unwrap_or(reference);

        let (host, remainder) = match reference.split_once('/') {
            // The first component is a registry host only if it looks like
            // one; "library/nginx" is a Hub repository, "ghcr.io/x" is not.
            Some((first, rest)) if first.contains('.') || first.contains(':') || first == "localhost" => {
                (first.to_string(), rest.to_string())
            }
            _ => (DEFAULT_HOST.to_string(), reference.to_string()),
        };

        let (repository, tag) = match remainder.rsplit_once(':') {
            // "repo:5000/x" never reaches here since ports only occur in the
            // host part, which was split off above.
            Some((repo, tag)) => (repo.to_string(), tag.to_string()),
            None => (remainder.clone(), DEFAULT_TAG.to_string()),
        };

        if repository.is_empty() {
            return Err(RegistryError::InvalidReference(reference.to_string()));
        }

        // Hub's official images live under the implicit "library" namespace.
        let repository = if host == DEFAULT_HOST && !repository.contains('/') {
            format!("library/{repository}")
        } else {
            repository
        };

        Ok(Self {
            host,
            repository,
            tag,
        })
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Host to use for Distribution API requests. Docker Hub's API host
    /// differs from its reference name.
    fn api_host(&self) -> &str {
        if self.host == DEFAULT_HOST {
            DEFAULT_HOST_API
        } else {
            &self.host
        }
    }

    /// Whether this registry is known to answer manifest HEAD requests.
    /// Used by the `auto` warning strategy.
    pub fn known_to_support_head(&self) -> bool {
        self.host == DEFAULT_HOST
    }
}

impl std::fmt::Display for ImageRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}:{}", self.host, self.repository, self.tag)
    }
}

/// A validated `sha256:<hex>` content digest. Two equal digests mean the
/// image has not changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Digest(Box<str>);

impl Digest {
    pub fn parse(value: &str) -> Result<Self> {
        let hex = value
            .strip_prefix("sha256:")
            .ok_or_else(|| RegistryError::InvalidDigest(value.to_string()))?;
        if hex.len() != 64 || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(RegistryError::InvalidDigest(value.to_string()));
        }
        Ok(Self(value.into()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: String,
    #[serde(default)]
    access_token: String,
}

pub struct RegistryClient {
    http: reqwest::Client,
}

impl RegistryClient {
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Resolve the digest of the manifest currently published under
    /// `image`'s tag, without downloading it.
    pub async fn head_digest(&self, image: &ImageRef) -> Result<Digest> {
        let url = format!(
            "https://{}/v2/{}/manifests/{}",
            image.api_host(),
            image.repository(),
            image.tag()
        );

        let response = self
            .http
            .head(&url)
            .header(reqwest::header::ACCEPT, MANIFEST_ACCEPT)
            .send()
            .await?;

        let response = if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            let challenge = response
                .headers()
                .get(reqwest::header::WWW_AUTHENTICATE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| RegistryError::Unauthorized(image.to_string()))?;
            let token = self.anonymous_token(&challenge, image).await?;
            self.http
                .head(&url)
                .header(reqwest::header::ACCEPT, MANIFEST_ACCEPT)
                .bearer_auth(token)
                .send()
                .await?
        } else {
            response
        };

        if !response.status().is_success() {
            return Err(RegistryError::Unauthorized(image.to_string()));
        }

        let digest = response
            .headers()
            .get("docker-content-digest")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| RegistryError::MissingDigestHeader(image.to_string()))?;

        Digest::parse(digest)
    }

    /// Follow a `Bearer realm=...` challenge and fetch an anonymous pull
    /// token for the image's repository.
    async fn anonymous_token(&self, challenge: &str, image: &ImageRef) -> Result<String> {
        let fields = parse_challenge(challenge);
        let realm = fields
            .get("realm")
            .ok_or_else(|| RegistryError::Unauthorized(image.to_string()))?;

        let mut request = self.http.get(realm.as_str());
        if let Some(service) = fields.get("service") {
            request = request.query(&[("service", service.as_str())]);
        }
        request = request.query(&[("scope", format!("repository:{}:pull", image.repository()))]);

        let token: TokenResponse = request.send().await?.json().await?;
        if !token.token.is_empty() {
            Ok(token.token)
        } else if !token.access_token.is_empty() {
            Ok(token.access_token)
        } else {
            Err(RegistryError::Unauthorized(image.to_string()))
        }
    }
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse the comma-separated key="value" fields of a Bearer challenge.
fn parse_challenge(header: &str) -> std::collections::HashMap<String, String> {
    let fields = header.trim_start_matches("Bearer").trim();
    fields
        .split(',')
        .filter_map(|pair| {
            let (key, value) = pair.split_once('=')?;
            Some((
                key.trim().to_string(),
                value.trim().trim_matches('"').to_string(),
            ))
        })
        .collect()
}
