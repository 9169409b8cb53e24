use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;
use warden_core::{ChangeStatus, ReviewComment, WardenError};
use warden_difflens::diff::FilePatch;

const API_BASE: &str = "https://api.github.com";
const PER_PAGE: u32 = 100;

/// A pull request address: `owner/repo#number`.
///
/// # Examples
///
/// ```
/// use warden_review::github::PullRequestRef;
///
/// let pr: PullRequestRef = "octocat/hello-world#42".parse().unwrap();
/// assert_eq!(pr.owner, "octocat");
/// assert_eq!(pr.repo, "hello-world");
/// assert_eq!(pr.number, 42);
/// assert_eq!(pr.to_string(), "octocat/hello-world#42");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestRef {
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Pull request number.
    pub number: u64,
}

impl fmt::Display for PullRequestRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}#{}", self.owner, self.repo, self.number)
    }
}

impl FromStr for PullRequestRef {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_pr_reference(s)
    }
}

/// Parse a PR reference string (`owner/repo#number`).
///
/// # Errors
///
/// Returns [`WardenError::Config`] if the format is invalid.
///
/// # Examples
///
/// ```
/// use warden_review::github::parse_pr_reference;
///
/// let pr = parse_pr_reference("rust-lang/rust#12345").unwrap();
/// assert_eq!(pr.number, 12345);
/// assert!(parse_pr_reference("rust-lang/rust").is_err());
/// ```
pub fn parse_pr_reference(pr_ref: &str) -> Result<PullRequestRef, WardenError> {
    let invalid = || {
        WardenError::Config(format!(
            "invalid PR reference '{pr_ref}', expected owner/repo#number"
        ))
    };
    let (owner_repo, number_str) = pr_ref.split_once('#').ok_or_else(invalid)?;
    let (owner, repo) = owner_repo.split_once('/').ok_or_else(invalid)?;
    if owner.is_empty() || repo.is_empty() {
        return Err(invalid());
    }
    let number: u64 = number_str
        .parse()
        .map_err(|_| WardenError::Config(format!("invalid PR number: {number_str}")))?;
    Ok(PullRequestRef {
        owner: owner.to_string(),
        repo: repo.to_string(),
        number,
    })
}

/// Pull request metadata needed by the review stages.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestInfo {
    /// Repository owner.
    pub owner: String,
    /// Repository name.
    pub repo: String,
    /// Pull request number.
    pub number: u64,
    /// Title.
    pub title: String,
    /// Description; empty when the author left none.
    pub body: String,
    /// Commit the review comments are anchored to.
    pub head_sha: String,
    /// Commit the base versions of files are read from.
    pub base_sha: String,
}

impl PullRequestInfo {
    /// The `owner/repo#number` address of this pull request.
    pub fn reference(&self) -> PullRequestRef {
        PullRequestRef {
            owner: self.owner.clone(),
            repo: self.repo.clone(),
            number: self.number,
        }
    }
}

/// Side of the diff a line comment is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    /// The base version (removed lines).
    Left,
    /// The head version (added and context lines).
    Right,
}

impl From<ChangeStatus> for Side {
    fn from(status: ChangeStatus) -> Self {
        match status {
            ChangeStatus::Removed => Side::Left,
            ChangeStatus::Added | ChangeStatus::Unspecified => Side::Right,
        }
    }
}

/// Everything the review workflow needs from a code host.
#[async_trait]
pub trait PullRequestHost: Send + Sync {
    /// Fetch pull request metadata.
    async fn pull_request(&self, pr: &PullRequestRef) -> Result<PullRequestInfo, WardenError>;

    /// List changed files with their patches.
    async fn files(&self, pr: &PullRequestRef) -> Result<Vec<FilePatch>, WardenError>;

    /// Read a file at `git_ref`; `Ok(None)` if it does not exist there.
    async fn contents(
        &self,
        pr: &PullRequestRef,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>, WardenError>;

    /// PR-level comments already posted.
    async fn issue_comments(&self, pr: &PullRequestRef) -> Result<Vec<ReviewComment>, WardenError>;

    /// Line comments already posted.
    async fn review_comments(&self, pr: &PullRequestRef)
        -> Result<Vec<ReviewComment>, WardenError>;

    /// Post a comment on one line of the diff.
    async fn create_review_comment(
        &self,
        pr: &PullRequestRef,
        commit: &str,
        path: &str,
        line: u32,
        side: Side,
        body: &str,
    ) -> Result<(), WardenError>;

    /// Post a PR-level comment.
    async fn create_issue_comment(&self, pr: &PullRequestRef, body: &str)
        -> Result<(), WardenError>;
}

/// GitHub REST client.
///
/// JSON routes go through octocrab; raw file contents are fetched with
/// reqwest so they do not need base64 decoding.
pub struct GitHubClient {
    octocrab: octocrab::Octocrab,
    http: reqwest::Client,
    token: String,
}

impl GitHubClient {
    /// Create a client from an explicit token or the `GITHUB_TOKEN` environment variable.
    ///
    /// # Errors
    ///
    /// Returns [`WardenError::Config`] if no token is available, or
    /// [`WardenError::GitHub`] if the client cannot be built.
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use warden_review::github::GitHubClient;
    ///
    /// let client = GitHubClient::new(Some("ghp_xxxx")).unwrap();
    /// ```
    pub fn new(token: Option<&str>) -> Result<Self, WardenError> {
        let token = match token {
            Some(t) => t.to_string(),
            None => std::env::var("GITHUB_TOKEN").map_err(|_| {
                WardenError::Config(
                    "GITHUB_TOKEN not set. Pass --github-token or set GITHUB_TOKEN env var".into(),
                )
            })?,
        };

        let octocrab = octocrab::Octocrab::builder()
            .personal_token(token.clone())
            .build()
            .map_err(|e| WardenError::GitHub(format!("failed to create GitHub client: {e}")))?;

        Ok(Self {
            octocrab,
            http: reqwest::Client::new(),
            token,
        })
    }

    /// The token used for API calls, also used to authenticate clones.
    pub fn token(&self) -> &str {
        &self.token
    }

    async fn get_paged<T>(&self, route: &str) -> Result<Vec<T>, WardenError>
    where
        T: serde::de::DeserializeOwned,
    {
        let mut items = Vec::new();
        for page in 1.. {
            let params = Page {
                per_page: PER_PAGE,
                page,
            };
            let batch: Vec<T> = self
                .octocrab
                .get(route, Some(&params))
                .await
                .map_err(|e| WardenError::GitHub(format!("GET {route} failed: {e}")))?;
            let done = batch.len() < PER_PAGE as usize;
            items.extend(batch);
            if done {
                break;
            }
        }
        Ok(items)
    }
}

#[derive(Serialize)]
struct Page {
    per_page: u32,
    page: u32,
}

#[derive(Deserialize)]
struct GhPull {
    number: u64,
    title: String,
    body: Option<String>,
    head: GhCommitRef,
    base: GhCommitRef,
}

#[derive(Deserialize)]
struct GhCommitRef {
    sha: String,
}

#[derive(Deserialize)]
struct GhIssueComment {
    #[serde(default)]
    body: Option<String>,
}

#[derive(Deserialize)]
struct GhReviewComment {
    path: String,
    line: Option<u32>,
    original_line: Option<u32>,
    side: Option<Side>,
    body: String,
}

impl From<GhReviewComment> for ReviewComment {
    fn from(c: GhReviewComment) -> Self {
        let status = match c.side {
            Some(Side::Left) => ChangeStatus::Removed,
            _ => ChangeStatus::Added,
        };
        ReviewComment {
            filename: c.path,
            line_number: c.line.or(c.original_line).unwrap_or(0),
            comment: c.body,
            status,
        }
    }
}

/// Contents API URL for `path` at `git_ref`, with every path segment
/// percent-encoded.
fn contents_url(pr: &PullRequestRef, path: &str, git_ref: &str) -> Result<Url, WardenError> {
    let mut url = Url::parse(API_BASE)
        .map_err(|e| WardenError::GitHub(format!("invalid API base: {e}")))?;
    url.path_segments_mut()
        .map_err(|()| WardenError::GitHub(format!("cannot build a URL for {path}")))?
        .pop_if_empty()
        .extend(["repos", pr.owner.as_str(), pr.repo.as_str(), "contents"])
        .extend(path.split('/'));
    url.query_pairs_mut().append_pair("ref", git_ref);
    Ok(url)
}

#[async_trait]
impl PullRequestHost for GitHubClient {
    async fn pull_request(&self, pr: &PullRequestRef) -> Result<PullRequestInfo, WardenError> {
        let route = format!("/repos/{}/{}/pulls/{}", pr.owner, pr.repo, pr.number);
        let pull: GhPull = self
            .octocrab
            .get(&route, None::<&()>)
            .await
            .map_err(|e| WardenError::GitHub(format!("failed to fetch {pr}: {e}")))?;
        Ok(PullRequestInfo {
            owner: pr.owner.clone(),
            repo: pr.repo.clone(),
            number: pull.number,
            title: pull.title,
            body: pull.body.unwrap_or_default(),
            head_sha: pull.head.sha,
            base_sha: pull.base.sha,
        })
    }

    async fn files(&self, pr: &PullRequestRef) -> Result<Vec<FilePatch>, WardenError> {
        let route = format!("/repos/{}/{}/pulls/{}/files", pr.owner, pr.repo, pr.number);
        self.get_paged(&route).await
    }

    async fn contents(
        &self,
        pr: &PullRequestRef,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<String>, WardenError> {
        let url = contents_url(pr, path, git_ref)?;
        let response = self
            .http
            .get(url)
            .header("Accept", "application/vnd.github.raw")
            .header("Authorization", format!("Bearer {}", self.token))
            .header("User-Agent", "warden")
            .send()
            .await
            .map_err(|e| WardenError::GitHub(format!("failed to fetch {path}: {e}")))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            debug!(path, git_ref, "file not found on ref");
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(WardenError::GitHub(format!(
                "GitHub API error {status} for {path}: {body}"
            )));
        }

        response
            .text()
            .await
            .map(Some)
            .map_err(|e| WardenError::GitHub(format!("failed to read {path}: {e}")))
    }

    async fn issue_comments(&self, pr: &PullRequestRef) -> Result<Vec<ReviewComment>, WardenError> {
        let route = format!("/repos/{}/{}/issues/{}/comments", pr.owner, pr.repo, pr.number);
        let comments: Vec<GhIssueComment> = self.get_paged(&route).await?;
        Ok(comments
            .into_iter()
            .filter_map(|c| c.body)
            .map(ReviewComment::pr_level)
            .collect())
    }

    async fn review_comments(
        &self,
        pr: &PullRequestRef,
    ) -> Result<Vec<ReviewComment>, WardenError> {
        let route = format!("/repos/{}/{}/pulls/{}/comments", pr.owner, pr.repo, pr.number);
        let comments: Vec<GhReviewComment> = self.get_paged(&route).await?;
        Ok(comments.into_iter().map(ReviewComment::from).collect())
    }

    async fn create_review_comment(
        &self,
        pr: &PullRequestRef,
        commit: &str,
        path: &str,
        line: u32,
        side: Side,
        body: &str,
    ) -> Result<(), WardenError> {
        let route = format!("/repos/{}/{}/pulls/{}/comments", pr.owner, pr.repo, pr.number);
        let payload = serde_json::json!({
            "body": body,
            "commit_id": commit,
            "path": path,
            "line": line,
            "side": side,
        });
        let _response: serde_json::Value = self
            .octocrab
            .post(route, Some(&payload))
            .await
            .map_err(|e| WardenError::GitHub(format!("failed to comment on {path}:{line}: {e}")))?;
        Ok(())
    }

    async fn create_issue_comment(
        &self,
        pr: &PullRequestRef,
        body: &str,
    ) -> Result<(), WardenError> {
        let route = format!("/repos/{}/{}/issues/{}/comments", pr.owner, pr.repo, pr.number);
        let payload = serde_json::json!({ "body": body });
        let _response: serde_json::Value = self
            .octocrab
            .post(route, Some(&payload))
            .await
            .map_err(|e| WardenError::GitHub(format!("failed to post comment on {pr}: {e}")))?;
        Ok(())
    }
}
