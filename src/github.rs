//! GitHub REST API client used by the publisher and hosting stages.
//!
//! Everything the pipeline needs from the repository host sits behind the
//! [`RepoHost`] trait so the orchestrator can run against an in-memory fake.

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reqwest::{Method, StatusCode};
use serde::{Deserialize, Serialize};

use crate::errors::PublishError;
use crate::util::preview;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
const USER_AGENT: &str = "pagesmith";
const API_VERSION: &str = "2022-11-28";
const MAX_ERROR_BODY: usize = 500;

/// Known GitHub token prefixes.
/// See: https://github.blog/2021-04-05-behind-githubs-new-authentication-token-formats/
const GITHUB_TOKEN_PREFIXES: &[&str] = &[
    "ghp_",        // Personal access tokens (classic)
    "github_pat_", // Fine-grained personal access tokens
    "gho_",        // OAuth access tokens
    "ghu_",        // GitHub App user-to-server tokens
    "ghs_",        // GitHub App server-to-server tokens
    "ghr_",        // GitHub App refresh tokens
];

/// Format check only; does not verify the token is active or scoped.
pub fn is_valid_github_token(token: &str) -> bool {
    if token.is_empty() {
        return false;
    }
    GITHUB_TOKEN_PREFIXES
        .iter()
        .any(|prefix| token.starts_with(prefix))
}

/// A GitHub repository (subset of fields we care about).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RepoInfo {
    pub name: String,
    pub full_name: String,
    pub html_url: String,
    #[serde(default = "default_branch")]
    pub default_branch: String,
    pub description: Option<String>,
}

fn default_branch() -> String {
    "main".to_string()
}

/// A file read through the contents API, already base64-decoded.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteFile {
    pub path: String,
    pub sha: String,
    pub content: String,
}

/// Result of a create/update through the contents API.
#[derive(Debug, Clone, PartialEq)]
pub struct FileWrite {
    pub blob_sha: String,
    pub commit_sha: String,
}

/// Raw outcome of a hosting toggle; the hosting stage judges the status.
#[derive(Debug, Clone, PartialEq)]
pub struct PagesResponse {
    pub status: u16,
    pub body: String,
}

/// Operations the pipeline performs against the repository host.
#[async_trait]
pub trait RepoHost: Send + Sync {
    /// Account that owns every repository this host creates.
    fn owner(&self) -> &str;

    async fn get_repo(&self, name: &str) -> Result<Option<RepoInfo>, PublishError>;

    async fn create_repo(&self, name: &str, description: &str) -> Result<RepoInfo, PublishError>;

    async fn delete_repo(&self, name: &str) -> Result<(), PublishError>;

    async fn get_file(&self, repo: &str, path: &str) -> Result<Option<RemoteFile>, PublishError>;

    /// Create (`sha == None`) or update a file. An update whose `sha` is not
    /// the file's current blob sha fails with [`PublishError::Conflict`].
    async fn put_file(
        &self,
        repo: &str,
        path: &str,
        content: &str,
        message: &str,
        sha: Option<&str>,
    ) -> Result<FileWrite, PublishError>;

    async fn enable_pages(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
    ) -> Result<PagesResponse, PublishError>;

    /// Body text of a license template, e.g. `mit`.
    async fn license_text(&self, key: &str) -> Result<String, PublishError>;
}

#[derive(Debug, Deserialize)]
struct ContentsResponse {
    path: String,
    sha: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Deserialize)]
struct PutContentsResponse {
    content: ShaOnly,
    commit: ShaOnly,
}

#[derive(Debug, Deserialize)]
struct ShaOnly {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct LicenseResponse {
    body: String,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    login: String,
}

#[derive(Debug, Serialize)]
struct PutContentsRequest<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
}

/// Decode the contents API's base64 payload, which GitHub wraps at 60 columns.
pub fn decode_contents(encoded: &str) -> Result<String, PublishError> {
    let compact: String = encoded.chars().filter(|c| !c.is_whitespace()).collect();
    let bytes = STANDARD
        .decode(compact)
        .map_err(|e| PublishError::Other(anyhow::anyhow!("invalid base64 in file contents: {e}")))?;
    String::from_utf8(bytes)
        .map_err(|e| PublishError::Other(anyhow::anyhow!("file contents are not UTF-8: {e}")))
}

/// Production [`RepoHost`] backed by the GitHub REST API.
pub struct GitHubClient {
    api_url: String,
    token: String,
    owner: String,
    http: reqwest::Client,
}

impl GitHubClient {
    pub fn new(api_url: &str, token: String, owner: String) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            token,
            owner,
            http: reqwest::Client::new(),
        }
    }

    /// Look up the login the token belongs to.
    pub async fn resolve_owner(api_url: &str, token: &str) -> Result<String, PublishError> {
        let client = Self::new(api_url, token.to_string(), String::new());
        let resp = client.send(Method::GET, "/user", "get user", None).await?;
        let resp = expect_success(resp, "get user").await?;
        let user: UserResponse = resp.json().await.map_err(|e| transport("get user", e))?;
        Ok(user.login)
    }

    fn repo_path(&self, repo: &str) -> String {
        format!("/repos/{}/{}", self.owner, repo)
    }

    async fn send(
        &self,
        method: Method,
        path: &str,
        action: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, PublishError> {
        let mut req = self
            .http
            .request(method, format!("{}{}", self.api_url, path))
            .bearer_auth(&self.token)
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION);
        if let Some(body) = body {
            req = req.json(&body);
        }
        req.send().await.map_err(|e| transport(action, e))
    }
}

fn transport(action: &str, source: reqwest::Error) -> PublishError {
    PublishError::Transport {
        action: action.to_string(),
        source,
    }
}

async fn expect_success(
    resp: reqwest::Response,
    action: &str,
) -> Result<reqwest::Response, PublishError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    Err(PublishError::Api {
        action: action.to_string(),
        status: status.as_u16(),
        body: preview(&body, MAX_ERROR_BODY).to_string(),
    })
}

/// Contents-API statuses that have a specific meaning for a write. A 409 or
/// 422 only means a stale hash when the write carried one; for a create the
/// generic API error is reported instead.
fn put_rejection(
    status: StatusCode,
    repo: &str,
    path: &str,
    sha: Option<&str>,
) -> Option<PublishError> {
    if status == StatusCode::NOT_FOUND {
        return Some(PublishError::not_found(format!("repository {repo}")));
    }
    let stale = status == StatusCode::CONFLICT || status == StatusCode::UNPROCESSABLE_ENTITY;
    match sha {
        Some(sha) if stale => Some(PublishError::Conflict {
            path: path.to_string(),
            sha: sha.to_string(),
        }),
        _ => None,
    }
}

#[async_trait]
impl RepoHost for GitHubClient {
    fn owner(&self) -> &str {
        &self.owner
    }

    async fn get_repo(&self, name: &str) -> Result<Option<RepoInfo>, PublishError> {
        let action = format!("get repository {name}");
        let resp = self
            .send(Method::GET, &self.repo_path(name), &action, None)
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = expect_success(resp, &action).await?;
        let repo = resp.json().await.map_err(|e| transport(&action, e))?;
        Ok(Some(repo))
    }

    async fn create_repo(&self, name: &str, description: &str) -> Result<RepoInfo, PublishError> {
        let action = format!("create repository {name}");
        let body = serde_json::json!({
            "name": name,
            "description": description,
            "private": false,
            "auto_init": false,
        });
        let resp = self
            .send(Method::POST, "/user/repos", &action, Some(body))
            .await?;
        let resp = expect_success(resp, &action).await?;
        resp.json().await.map_err(|e| transport(&action, e))
    }

    async fn delete_repo(&self, name: &str) -> Result<(), PublishError> {
        let action = format!("delete repository {name}");
        let resp = self
            .send(Method::DELETE, &self.repo_path(name), &action, None)
            .await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(PublishError::not_found(format!("repository {name}")));
        }
        expect_success(resp, &action).await?;
        Ok(())
    }

    async fn get_file(&self, repo: &str, path: &str) -> Result<Option<RemoteFile>, PublishError> {
        let action = format!("read {repo}/{path}");
        let url = format!("{}/contents/{}", self.repo_path(repo), path);
        let resp = self.send(Method::GET, &url, &action, None).await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let resp = expect_success(resp, &action).await?;
        let file: ContentsResponse = resp.json().await.map_err(|e| transport(&action, e))?;
        Ok(Some(RemoteFile {
            content: decode_contents(&file.content)?,
            path: file.path,
            sha: file.sha,
        }))
    }

    async fn put_file(
        &self,
        repo: &str,
        path: &str,
        content: &str,
        message: &str,
        sha: Option<&str>,
    ) -> Result<FileWrite, PublishError> {
        let action = format!("write {repo}/{path}");
        let url = format!("{}/contents/{}", self.repo_path(repo), path);
        let body = serde_json::to_value(PutContentsRequest {
            message,
            content: STANDARD.encode(content),
            sha,
        })
        .map_err(|e| PublishError::Other(e.into()))?;

        let resp = self.send(Method::PUT, &url, &action, Some(body)).await?;
        if let Some(err) = put_rejection(resp.status(), repo, path, sha) {
            return Err(err);
        }
        let resp = expect_success(resp, &action).await?;
        let written: PutContentsResponse =
            resp.json().await.map_err(|e| transport(&action, e))?;
        Ok(FileWrite {
            blob_sha: written.content.sha,
            commit_sha: written.commit.sha,
        })
    }

    async fn enable_pages(
        &self,
        repo: &str,
        branch: &str,
        path: &str,
    ) -> Result<PagesResponse, PublishError> {
        let action = format!("enable pages for {repo}");
        let body = serde_json::json!({ "source": { "branch": branch, "path": path } });
        let url = format!("{}/pages", self.repo_path(repo));
        let resp = self.send(Method::POST, &url, &action, Some(body)).await?;
        let status = resp.status().as_u16();
        let body = resp.text().await.unwrap_or_default();
        Ok(PagesResponse { status, body })
    }

    async fn license_text(&self, key: &str) -> Result<String, PublishError> {
        let action = format!("fetch license {key}");
        let resp = self
            .send(Method::GET, &format!("/licenses/{key}"), &action, None)
            .await?;
        let resp = expect_success(resp, &action).await?;
        let license: LicenseResponse = resp.json().await.map_err(|e| transport(&action, e))?;
        Ok(license.body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ── is_valid_github_token ────────────────────────────────────────

    #[test]
    fn test_valid_token_prefixes() {
        assert!(is_valid_github_token("ghp_abc123def456"));
        assert!(is_valid_github_token("github_pat_abc123def456"));
        assert!(is_valid_github_token("ghs_xyz789"));
    }

    #[test]
    fn test_invalid_tokens() {
        assert!(!is_valid_github_token(""));
        assert!(!is_valid_github_token("not-a-token"));
        assert!(!is_valid_github_token("GHP_abc123"));
        assert!(!is_valid_github_token(" ghp_abc123"));
    }

    // ── Contents API payloads ────────────────────────────────────────

    #[test]
    fn test_decode_contents_ignores_line_wraps() {
        let encoded = "PCFET0NUWVBF\nIGh0bWw+\n";
        assert_eq!(decode_contents(encoded).unwrap(), "<!DOCTYPE html>");
    }

    #[test]
    fn test_decode_contents_rejects_garbage() {
        assert!(decode_contents("***").is_err());
    }

    #[test]
    fn test_put_request_omits_missing_sha() {
        let req = PutContentsRequest {
            message: "Add index.html",
            content: STANDARD.encode("hi"),
            sha: None,
        };
        let value = serde_json::to_value(&req).unwrap();
        assert!(value.get("sha").is_none());
        assert_eq!(value["content"], "aGk=");
    }

    #[test]
    fn test_put_request_includes_sha_precondition() {
        let req = PutContentsRequest {
            message: "Update index.html",
            content: String::new(),
            sha: Some("abc"),
        };
        assert_eq!(serde_json::to_value(&req).unwrap()["sha"], "abc");
    }

    #[test]
    fn test_put_response_deserialize() {
        let json = r#"{"content":{"sha":"blob1","path":"index.html"},"commit":{"sha":"commit1","message":"m"}}"#;
        let resp: PutContentsResponse = serde_json::from_str(json).unwrap();
        assert_eq!(resp.content.sha, "blob1");
        assert_eq!(resp.commit.sha, "commit1");
    }

    // ── RepoInfo deserialization ─────────────────────────────────────

    #[test]
    fn test_repo_info_deserialize() {
        let json = r#"{
            "full_name": "octo/demo-site",
            "name": "demo-site",
            "private": false,
            "html_url": "https://github.com/octo/demo-site",
            "description": "pagesmith:demo-site",
            "default_branch": "main"
        }"#;
        let repo: RepoInfo = serde_json::from_str(json).unwrap();
        assert_eq!(repo.full_name, "octo/demo-site");
        assert_eq!(repo.description.as_deref(), Some("pagesmith:demo-site"));
    }

    #[test]
    fn test_repo_info_missing_branch_defaults_to_main() {
        let json = r#"{"full_name":"o/r","name":"r","html_url":"https://github.com/o/r","description":null}"#;
        let repo: RepoInfo = serde_json::from_str(json).unwrap();
        assert_eq!(repo.default_branch, "main");
        assert!(repo.description.is_none());
    }

    #[test]
    fn test_stale_update_maps_to_conflict() {
        for status in [StatusCode::CONFLICT, StatusCode::UNPROCESSABLE_ENTITY] {
            let err = put_rejection(status, "demo-site", "index.html", Some("abc")).unwrap();
            assert!(matches!(err, PublishError::Conflict { ref sha, .. } if sha == "abc"));
        }
    }

    #[test]
    fn test_rejected_create_is_not_a_conflict() {
        assert!(
            put_rejection(StatusCode::UNPROCESSABLE_ENTITY, "demo-site", "index.html", None)
                .is_none()
        );
        assert!(put_rejection(StatusCode::CONFLICT, "demo-site", "index.html", None).is_none());
    }

    #[test]
    fn test_put_to_missing_repo_is_not_found() {
        let err = put_rejection(StatusCode::NOT_FOUND, "ghost", "index.html", None).unwrap();
        assert!(err.is_not_found());
        assert!(put_rejection(StatusCode::CREATED, "demo-site", "index.html", None).is_none());
    }

    #[test]
    fn test_client_trims_api_url() {
        let client = GitHubClient::new("https://api.github.com/", "t".into(), "octo".into());
        assert_eq!(client.owner(), "octo");
        assert_eq!(client.repo_path("demo"), "/repos/octo/demo");
    }
}
