//! [`ContentStore`] over the GitHub repository contents API.
//!
//! ```text
//! GET /repos/{owner}/{repo}/contents/{path}?ref={branch}  -> base64 content + blob sha
//! PUT /repos/{owner}/{repo}/contents/{path}               <- {message, content, branch, sha?}
//! ```
//!
//! The blob `sha` is the version token. GitHub refuses a PUT whose `sha`
//! is stale with 409, and one that omits `sha` for an existing file with
//! 422; both surface as [`StoreError::VersionConflict`].

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use issuevault_engine::store::{ContentStore, StoreError, StoredFile, Version};
use reqwest::StatusCode;
use reqwest::Url;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::{Deserialize, Serialize};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";
const JSON_MEDIA_TYPE: &str = "application/vnd.github+json";
const RAW_MEDIA_TYPE: &str = "application/vnd.github.raw+json";

#[derive(Debug, thiserror::Error)]
pub enum GithubStoreError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid API base URL {0}")]
    BadBaseUrl(String),

    #[error("invalid token: {0}")]
    BadToken(String),

    #[error("unexpected response for {path}: {reason}")]
    Decode { path: String, reason: String },

    #[error("{status} for {path}: {message}")]
    Status {
        path: String,
        status: StatusCode,
        message: String,
    },
}

impl From<GithubStoreError> for StoreError {
    fn from(err: GithubStoreError) -> Self {
        match err {
            GithubStoreError::Status {
                path,
                status,
                message,
            } if status.is_client_error() => StoreError::Rejected {
                path,
                reason: format!("{status}: {message}"),
            },
            other => StoreError::Transport(other.to_string()),
        }
    }
}

/// Where the collection lives on GitHub.
#[derive(Debug, Clone)]
pub struct GithubLocation {
    pub owner: String,
    pub repo: String,
    pub branch: String,
}

pub struct GithubStore {
    client: reqwest::Client,
    api_base: Url,
    location: GithubLocation,
}

impl GithubStore {
    pub fn new(
        location: GithubLocation,
        api_base: &str,
        token: Option<&str>,
    ) -> Result<Self, GithubStoreError> {
        let api_base =
            Url::parse(api_base).map_err(|_| GithubStoreError::BadBaseUrl(api_base.to_string()))?;
        if api_base.cannot_be_a_base() {
            return Err(GithubStoreError::BadBaseUrl(api_base.to_string()));
        }

        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("issuevault"));
        headers.insert("x-github-api-version", HeaderValue::from_static(API_VERSION));
        if let Some(token) = token.filter(|t| !t.is_empty()) {
            let mut value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| GithubStoreError::BadToken(e.to_string()))?;
            value.set_sensitive(true);
            headers.insert(AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .build()?;
        Ok(Self {
            client,
            api_base,
            location,
        })
    }

    pub fn location(&self) -> &GithubLocation {
        &self.location
    }

    fn contents_url(&self, path: &str) -> Result<Url, GithubStoreError> {
        let mut url = self.api_base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| GithubStoreError::BadBaseUrl(self.api_base.to_string()))?;
            segments
                .pop_if_empty()
                .extend([
                    "repos",
                    self.location.owner.as_str(),
                    self.location.repo.as_str(),
                    "contents",
                ])
                .extend(path.split('/').filter(|s| !s.is_empty()));
        }
        Ok(url)
    }

    async fn fetch(&self, path: &str) -> Result<Option<StoredFile>, GithubStoreError> {
        let mut url = self.contents_url(path)?;
        url.query_pairs_mut()
            .append_pair("ref", &self.location.branch);

        let response = self
            .client
            .get(url.clone())
            .header(ACCEPT, JSON_MEDIA_TYPE)
            .send()
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let response = check_status(path, response).await?;
        let body: ContentsResponse = response.json().await?;

        let bytes = match body.inline_bytes(path)? {
            Some(bytes) => bytes,
            None => {
                tracing::debug!(path, size = body.size, "content not inlined; fetching raw");
                let raw = self
                    .client
                    .get(url)
                    .header(ACCEPT, RAW_MEDIA_TYPE)
                    .send()
                    .await?;
                check_status(path, raw).await?.bytes().await?.to_vec()
            }
        };

        Ok(Some(StoredFile {
            bytes,
            version: Version::new(body.sha),
        }))
    }

    async fn put(
        &self,
        path: &str,
        bytes: &[u8],
        expected: Option<&Version>,
        message: &str,
    ) -> Result<std::result::Result<Version, StoreError>, GithubStoreError> {
        let request = PutRequest {
            message,
            content: STANDARD.encode(bytes),
            branch: &self.location.branch,
            sha: expected.map(Version::as_str),
        };
        let response = self
            .client
            .put(self.contents_url(path)?)
            .header(ACCEPT, JSON_MEDIA_TYPE)
            .json(&request)
            .send()
            .await?;

        if matches!(
            response.status(),
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY
        ) {
            tracing::debug!(path, status = %response.status(), "lost write race");
            return Ok(Err(StoreError::VersionConflict {
                path: path.to_string(),
            }));
        }
        let response = check_status(path, response).await?;
        let body: PutResponse = response.json().await?;
        Ok(Ok(Version::new(body.content.sha)))
    }
}

#[async_trait]
impl ContentStore for GithubStore {
    async fn read(&self, path: &str) -> issuevault_engine::store::Result<Option<StoredFile>> {
        Ok(self.fetch(path).await?)
    }

    async fn write_if_version(
        &self,
        path: &str,
        bytes: Vec<u8>,
        expected: Option<&Version>,
        message: &str,
    ) -> issuevault_engine::store::Result<Version> {
        self.put(path, &bytes, expected, message).await?
    }
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    sha: String,
    #[serde(default)]
    size: u64,
    #[serde(default)]
    encoding: Option<String>,
    #[serde(default)]
    content: Option<String>,
}

impl ContentsResponse {
    /// Decoded inline content, or `None` when the API left it out.
    fn inline_bytes(&self, path: &str) -> Result<Option<Vec<u8>>, GithubStoreError> {
        let content = self.content.as_deref().unwrap_or_default();
        if self.encoding.as_deref() != Some("base64") || (content.is_empty() && self.size > 0) {
            return Ok(None);
        }
        let compact: String = content.chars().filter(|c| !c.is_whitespace()).collect();
        STANDARD
            .decode(compact)
            .map(Some)
            .map_err(|e| GithubStoreError::Decode {
                path: path.to_string(),
                reason: e.to_string(),
            })
    }
}

#[derive(Debug, Serialize)]
struct PutRequest<'a> {
    message: &'a str,
    content: String,
    branch: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct PutResponse {
    content: PutContent,
}

#[derive(Debug, Deserialize)]
struct PutContent {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
}

async fn check_status(
    path: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, GithubStoreError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|b| b.message)
        .unwrap_or(text);
    Err(GithubStoreError::Status {
        path: path.to_string(),
        status,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store() -> GithubStore {
        GithubStore::new(
            GithubLocation {
                owner: "acme".to_string(),
                repo: "tracker".to_string(),
                branch: "main".to_string(),
            },
            "https://ghe.example.com/api/v3/",
            Some("t0k3n"),
        )
        .unwrap()
    }

    #[test]
    fn contents_url_encodes_segments() {
        let url = store().contents_url(".beads/issues/bd 1.md").unwrap();
        assert_eq!(
            url.as_str(),
            "https://ghe.example.com/api/v3/repos/acme/tracker/contents/.beads/issues/bd%201.md"
        );
    }

    #[test]
    fn client_errors_fold_into_rejected() {
        let err: StoreError = GithubStoreError::Status {
            path: "a".to_string(),
            status: StatusCode::FORBIDDEN,
            message: "Resource not accessible".to_string(),
        }
        .into();
        assert!(matches!(err, StoreError::Rejected { .. }));

        let err: StoreError = GithubStoreError::Status {
            path: "a".to_string(),
            status: StatusCode::BAD_GATEWAY,
            message: String::new(),
        }
        .into();
        assert!(matches!(err, StoreError::Transport(_)));
    }

    #[test]
    fn inline_content_tolerates_line_breaks() {
        let body = ContentsResponse {
            sha: "abc".to_string(),
            size: 6,
            encoding: Some("base64".to_string()),
            content: Some("aGVs\nbG8K\n".to_string()),
        };
        assert_eq!(body.inline_bytes("a").unwrap(), Some(b"hello\n".to_vec()));

        let large = ContentsResponse {
            sha: "abc".to_string(),
            size: 2_000_000,
            encoding: Some("none".to_string()),
            content: Some(String::new()),
        };
        assert_eq!(large.inline_bytes("a").unwrap(), None);
    }
}
