//! Repository host access.
//!
//! [`RepoHost`] is the seam between the sync engine and the remote code
//! host: resolve the latest revision of a branch, list the file tree at a
//! revision, and fetch file content by its opaque content ref. The concrete
//! [`GitHubHost`] talks to the GitHub REST API; everything else in the
//! engine only sees the trait, which is what lets the integration tests run
//! against an in-memory host.

use async_trait::async_trait;
use reqwest::{
   Client, Response, StatusCode,
   header::{HeaderMap, HeaderValue},
};
use serde::Deserialize;

use crate::{error::HostError, types::TreeEntry};

const API_BASE: &str = "https://api.github.com";
const USER_AGENT: &str = concat!("semsync/", env!("CARGO_PKG_VERSION"));

/// Read-only access to a repository at a given revision
#[async_trait]
pub trait RepoHost: Send + Sync {
   /// Canonical repository identifier (used for symbol keys and store ids).
   fn repo(&self) -> &str;

   /// Resolves a branch name to its current immutable revision id.
   async fn latest_revision(&self, branch: &str) -> Result<String, HostError>;

   /// Lists every file in the tree at `revision`.
   async fn list_files(&self, revision: &str) -> Result<Vec<TreeEntry>, HostError>;

   /// Fetches the raw content behind a tree entry.
   async fn fetch(&self, entry: &TreeEntry) -> Result<Vec<u8>, HostError>;
}

/// GitHub REST implementation of [`RepoHost`]
pub struct GitHubHost {
   repo:   String,
   owner:  String,
   name:   String,
   client: Client,
}

#[derive(Deserialize)]
struct CommitResponse {
   sha: String,
}

#[derive(Deserialize)]
struct TreeResponse {
   tree:      Vec<TreeItem>,
   #[serde(default)]
   truncated: bool,
}

#[derive(Deserialize)]
struct TreeItem {
   path:  String,
   sha:   String,
   #[serde(rename = "type")]
   kind:  String,
   #[serde(default)]
   size:  Option<u64>,
}

impl GitHubHost {
   /// Creates a host for `repo` (an `owner/name` pair or a github.com URL),
   /// optionally authenticated with a token.
   pub fn new(repo: &str, token: Option<&str>) -> Result<Self, HostError> {
      let (owner, name) = parse_repo(repo)
         .ok_or_else(|| HostError::NotFound(format!("unrecognized repository '{repo}'")))?;

      let mut headers = HeaderMap::new();
      headers.insert("User-Agent", HeaderValue::from_static(USER_AGENT));
      headers.insert(
         "Accept",
         HeaderValue::from_static("application/vnd.github+json"),
      );
      if let Some(token) = token {
         let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| HostError::Auth("token contains invalid header characters".into()))?;
         headers.insert("Authorization", value);
      }

      let client = Client::builder().default_headers(headers).build()?;

      Ok(Self { repo: repo.to_string(), owner, name, client })
   }

   async fn get(&self, url: &str, accept: Option<&'static str>) -> Result<Response, HostError> {
      let mut request = self.client.get(url);
      if let Some(accept) = accept {
         request = request.header("Accept", accept);
      }
      let response = request.send().await?;
      check_status(&response)?;
      Ok(response)
   }
}

#[async_trait]
impl RepoHost for GitHubHost {
   fn repo(&self) -> &str {
      &self.repo
   }

   async fn latest_revision(&self, branch: &str) -> Result<String, HostError> {
      let url = format!(
         "{API_BASE}/repos/{}/{}/commits/{branch}",
         self.owner, self.name
      );
      let commit: CommitResponse = self.get(&url, None).await?.json().await?;
      Ok(commit.sha)
   }

   async fn list_files(&self, revision: &str) -> Result<Vec<TreeEntry>, HostError> {
      let url = format!(
         "{API_BASE}/repos/{}/{}/git/trees/{revision}?recursive=1",
         self.owner, self.name
      );
      let tree: TreeResponse = self.get(&url, None).await?.json().await?;

      if tree.truncated {
         tracing::warn!(
            repo = %self.repo,
            revision,
            "tree listing truncated by host; sync will only cover listed files"
         );
      }

      Ok(
         tree
            .tree
            .into_iter()
            .filter(|item| item.kind == "blob")
            .map(|item| TreeEntry {
               path:        item.path,
               content_ref: item.sha,
               size:        item.size,
            })
            .collect(),
      )
   }

   async fn fetch(&self, entry: &TreeEntry) -> Result<Vec<u8>, HostError> {
      let url = format!(
         "{API_BASE}/repos/{}/{}/git/blobs/{}",
         self.owner, self.name, entry.content_ref
      );
      // The raw media type returns blob bytes directly, skipping the
      // base64-wrapped JSON envelope.
      let response = self.get(&url, Some("application/vnd.github.raw+json")).await?;
      Ok(response.bytes().await?.to_vec())
   }
}

/// Extracts `(owner, name)` from an `owner/name` pair or a github.com URL.
fn parse_repo(repo: &str) -> Option<(String, String)> {
   let trimmed = repo
      .trim()
      .trim_end_matches('/')
      .trim_end_matches(".git");
   let path = trimmed
      .strip_prefix("https://github.com/")
      .or_else(|| trimmed.strip_prefix("http://github.com/"))
      .or_else(|| trimmed.strip_prefix("git@github.com:"))
      .or_else(|| trimmed.strip_prefix("github.com/"))
      .unwrap_or(trimmed);

   let mut parts = path.split('/');
   match (parts.next(), parts.next(), parts.next()) {
      (Some(owner), Some(name), None) if !owner.is_empty() && !name.is_empty() => {
         Some((owner.to_string(), name.to_string()))
      },
      _ => None,
   }
}

fn check_status(response: &Response) -> Result<(), HostError> {
   let status = response.status();
   if status.is_success() {
      return Ok(());
   }

   let retry_after = header_u64(response, "Retry-After").or_else(|| {
      // X-RateLimit-Reset is an absolute epoch; convert to a relative wait.
      header_u64(response, "X-RateLimit-Reset").map(|reset| {
         let now = chrono::Utc::now().timestamp().max(0) as u64;
         reset.saturating_sub(now)
      })
   });
   let remaining_zero = response
      .headers()
      .get("X-RateLimit-Remaining")
      .and_then(|v| v.to_str().ok())
      .is_some_and(|v| v.trim() == "0");

   Err(classify_status(status, retry_after, remaining_zero))
}

/// Maps an HTTP failure status to a [`HostError`] variant.
///
/// GitHub signals primary rate limiting as 403 with `X-RateLimit-Remaining:
/// 0`, and secondary limits as 403/429 with `Retry-After`; a 403 without
/// either is a permission failure.
fn classify_status(
   status: StatusCode,
   retry_after: Option<u64>,
   remaining_zero: bool,
) -> HostError {
   match status {
      StatusCode::UNAUTHORIZED => HostError::Auth("credentials rejected (401)".into()),
      StatusCode::TOO_MANY_REQUESTS => HostError::RateLimited { retry_after_secs: retry_after },
      StatusCode::FORBIDDEN if remaining_zero || retry_after.is_some() => {
         HostError::RateLimited { retry_after_secs: retry_after }
      },
      StatusCode::FORBIDDEN => HostError::Auth("access forbidden (403)".into()),
      StatusCode::NOT_FOUND => HostError::NotFound("object not found (404)".into()),
      status if status.is_server_error() => {
         HostError::Transient(format!("server error ({})", status.as_u16()))
      },
      status => HostError::Transient(format!("unexpected status ({})", status.as_u16())),
   }
}

fn header_u64(response: &Response, name: &str) -> Option<u64> {
   response
      .headers()
      .get(name)
      .and_then(|v| v.to_str().ok())
      .and_then(|v| v.trim().parse().ok())
}
