//! GitHub REST collaborator.
//!
//! The [`IssueTracker`] trait decouples the run loop and sequencer from the
//! actual API. Tests use scripted trackers that record calls without any
//! network traffic.

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Utc};
use reqwest::blocking::{Client, Response};
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue, USER_AGENT};
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::issue::{Issue, RepoRef};

pub const DEFAULT_API_BASE: &str = "https://api.github.com";

/// Abstraction over the issue host.
pub trait IssueTracker {
    /// Repositories owned by the authenticated account.
    fn list_repositories(&self) -> Result<Vec<RepoRef>>;
    fn list_open_issues(&self, repo: &RepoRef) -> Result<Vec<Issue>>;
    /// Fetch one issue; used during resume to detect state drift.
    fn get_issue(&self, owner: &str, repo: &str, number: u64) -> Result<Issue>;
    fn post_comment(&self, issue: &Issue, body: &str) -> Result<()>;
    fn close_issue(&self, issue: &Issue) -> Result<()>;
    fn lock_issue(&self, issue: &Issue) -> Result<()>;
}

/// REST v3 client backed by a blocking HTTP client. The migrator is
/// strictly sequential, so no async runtime is involved.
pub struct GithubClient {
    http: Client,
    api_base: String,
}

impl GithubClient {
    pub fn new(token: &str) -> Result<Self> {
        Self::with_api_base(token, DEFAULT_API_BASE)
    }

    pub fn with_api_base(token: &str, api_base: &str) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(USER_AGENT, HeaderValue::from_static("issue-migrator"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/vnd.github+json"),
        );
        let mut auth = HeaderValue::from_str(&format!("Bearer {token}"))
            .context("github token is not a valid header value")?;
        auth.set_sensitive(true);
        headers.insert(AUTHORIZATION, auth);

        let http = Client::builder()
            .default_headers(headers)
            .build()
            .context("build github http client")?;
        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
        })
    }

    fn issue_api_url(&self, owner: &str, repo: &str, number: u64) -> String {
        format!("{}/repos/{owner}/{repo}/issues/{number}", self.api_base)
    }
}

#[derive(Debug, Deserialize)]
struct ApiUser {
    login: String,
}

#[derive(Debug, Deserialize)]
struct ApiRepo {
    name: String,
    owner: ApiUser,
}

#[derive(Debug, Deserialize)]
struct ApiIssue {
    html_url: String,
    number: u64,
    title: String,
    #[serde(default)]
    body: Option<String>,
    updated_at: DateTime<Utc>,
    user: ApiUser,
    /// Present (as an object) exactly when the issue is a pull request.
    #[serde(default)]
    pull_request: Option<serde_json::Value>,
}

fn issue_from_api(api: ApiIssue, owner: &str, repo: &str) -> Issue {
    Issue {
        url: api.html_url,
        owner: owner.to_string(),
        repo: repo.to_string(),
        number: api.number,
        author: api.user.login,
        updated_at: api.updated_at,
        title: api.title,
        body: api.body.unwrap_or_default(),
        is_pull_request: api.pull_request.is_some(),
    }
}

/// Fail on non-2xx responses, carrying the response body in the error.
fn checked(resp: Response, what: &str) -> Result<Response> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().unwrap_or_default();
        bail!("{what}: api error {status}: {body}");
    }
    Ok(resp)
}

impl IssueTracker for GithubClient {
    fn list_repositories(&self) -> Result<Vec<RepoRef>> {
        let url = format!("{}/user/repos?affiliation=owner&per_page=100", self.api_base);
        debug!(url = %url, "listing own repositories");
        let resp = self
            .http
            .get(&url)
            .send()
            .context("list repositories: send request")?;
        let repos: Vec<ApiRepo> = checked(resp, "list repositories")?
            .json()
            .context("list repositories: decode response")?;
        Ok(repos
            .into_iter()
            .map(|r| RepoRef {
                owner: r.owner.login,
                name: r.name,
            })
            .collect())
    }

    fn list_open_issues(&self, repo: &RepoRef) -> Result<Vec<Issue>> {
        let url = format!(
            "{}/repos/{}/{}/issues?state=open&per_page=100",
            self.api_base, repo.owner, repo.name
        );
        debug!(repo = %repo.slug(), "listing open issues");
        let resp = self
            .http
            .get(&url)
            .send()
            .with_context(|| format!("list issues for {}: send request", repo.slug()))?;
        let issues: Vec<ApiIssue> = checked(resp, "list issues")?
            .json()
            .with_context(|| format!("list issues for {}: decode response", repo.slug()))?;
        Ok(issues
            .into_iter()
            .map(|api| issue_from_api(api, &repo.owner, &repo.name))
            .collect())
    }

    fn get_issue(&self, owner: &str, repo: &str, number: u64) -> Result<Issue> {
        let url = self.issue_api_url(owner, repo, number);
        let resp = self
            .http
            .get(&url)
            .send()
            .with_context(|| format!("get issue {owner}/{repo}#{number}: send request"))?;
        let api: ApiIssue = checked(resp, "get issue")?
            .json()
            .with_context(|| format!("get issue {owner}/{repo}#{number}: decode response"))?;
        Ok(issue_from_api(api, owner, repo))
    }

    fn post_comment(&self, issue: &Issue, body: &str) -> Result<()> {
        let url = format!(
            "{}/comments",
            self.issue_api_url(&issue.owner, &issue.repo, issue.number)
        );
        let resp = self
            .http
            .post(&url)
            .json(&json!({ "body": body }))
            .send()
            .with_context(|| format!("comment on {}: send request", issue.url))?;
        checked(resp, "post comment")?;
        Ok(())
    }

    fn close_issue(&self, issue: &Issue) -> Result<()> {
        let url = self.issue_api_url(&issue.owner, &issue.repo, issue.number);
        let resp = self
            .http
            .patch(&url)
            .json(&json!({ "state": "closed" }))
            .send()
            .with_context(|| format!("close {}: send request", issue.url))?;
        checked(resp, "close issue")?;
        Ok(())
    }

    fn lock_issue(&self, issue: &Issue) -> Result<()> {
        let url = format!(
            "{}/lock",
            self.issue_api_url(&issue.owner, &issue.repo, issue.number)
        );
        let resp = self
            .http
            .put(&url)
            .body("")
            .send()
            .with_context(|| format!("lock {}: send request", issue.url))?;
        checked(resp, "lock issue")?;
        Ok(())
    }
}
