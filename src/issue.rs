//! Issue data model and the stale/active/pull-request classifier.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Months, Utc};

/// A repository reference (`owner/name`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Parse an `owner/name` slug.
    pub fn parse(raw: &str) -> Result<Self> {
        let (owner, name) = raw
            .trim()
            .split_once('/')
            .ok_or_else(|| anyhow!("invalid repository '{raw}', expected owner/name"))?;
        if owner.is_empty() || name.is_empty() || name.contains('/') {
            return Err(anyhow!("invalid repository '{raw}', expected owner/name"));
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    /// Derive a repository reference from a git source URL such as
    /// `https://github.com/owner/name.git`.
    pub fn from_source_url(url: &str) -> Result<Self> {
        let trimmed = url.trim_end_matches('/');
        let mut fragments = trimmed.rsplit('/');
        let name = fragments
            .next()
            .filter(|s| !s.is_empty())
            .with_context(|| format!("source url '{url}' has no repository name"))?
            .trim_end_matches(".git");
        let owner = fragments
            .next()
            .filter(|s| !s.is_empty())
            .with_context(|| format!("source url '{url}' has no owner"))?;
        if name.is_empty() {
            return Err(anyhow!("source url '{url}' has no repository name"));
        }
        Ok(Self {
            owner: owner.to_string(),
            name: name.to_string(),
        })
    }

    pub fn slug(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }
}

/// A GitHub issue as seen by the migrator. Read-only to the core; the
/// collaborators in [`crate::github`] produce these.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    /// Canonical `html_url` of the issue; also the checkpoint log key.
    pub url: String,
    pub owner: String,
    pub repo: String,
    pub number: u64,
    /// Login of the issue author, used in comment templates.
    pub author: String,
    pub updated_at: DateTime<Utc>,
    pub title: String,
    pub body: String,
    pub is_pull_request: bool,
}

/// How the run treats an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    /// Skipped entirely, counted separately.
    PullRequest,
    /// Updated within the staleness window; gets a Discourse topic.
    Active,
    /// No update for three months; closed with a notice only.
    Stale,
}

/// An issue is stale when it has not been updated for three months.
///
/// `now` is injected so classification stays a pure function of its inputs.
pub fn is_stale(issue: &Issue, now: DateTime<Utc>) -> bool {
    match now.checked_sub_months(Months::new(3)) {
        Some(cutoff) => issue.updated_at < cutoff,
        None => false,
    }
}

/// Classify an issue for a run. Dry and live runs share this so their
/// stats agree exactly on identical input.
pub fn classify(issue: &Issue, now: DateTime<Utc>) -> Classification {
    if issue.is_pull_request {
        Classification::PullRequest
    } else if is_stale(issue, now) {
        Classification::Stale
    } else {
        Classification::Active
    }
}
