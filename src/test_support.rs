//! Test-only helpers: deterministic issue builders and scripted collaborators.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use anyhow::{Result, anyhow};
use chrono::{DateTime, TimeZone, Utc};

use crate::discourse::Forum;
use crate::github::IssueTracker;
use crate::issue::{Issue, RepoRef};
use crate::sequencer::SequencerSettings;

/// Fixed wall clock for classification tests.
pub fn test_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2018, 6, 1, 12, 0, 0).single().expect("valid timestamp")
}

/// Create a deterministic issue in `bitrise-io/steps-xcode-test`.
pub fn test_issue(number: u64, updated_at: DateTime<Utc>, is_pull_request: bool) -> Issue {
    let kind = if is_pull_request { "pull" } else { "issues" };
    Issue {
        url: format!("https://github.com/bitrise-io/steps-xcode-test/{kind}/{number}"),
        owner: "bitrise-io".to_string(),
        repo: "steps-xcode-test".to_string(),
        number,
        author: "octocat".to_string(),
        updated_at,
        title: format!("issue {number} title"),
        body: format!("issue {number} body"),
        is_pull_request,
    }
}

/// Sequencer settings with a deterministic forum category.
pub fn test_settings() -> SequencerSettings {
    SequencerSettings {
        run_id: None,
        category: 11,
        category_url: "https://discuss.example/c/issues".to_string(),
    }
}

/// Read checkpoint log lines; an absent file reads as empty.
pub fn read_log_lines(path: &Path) -> Vec<String> {
    fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Issue tracker that records every mutation instead of performing it.
#[derive(Default)]
pub struct RecordingTracker {
    /// Issues served by `get_issue`, keyed by `html_url`.
    pub issues: RefCell<BTreeMap<String, Issue>>,
    /// `(issue url, comment body)` pairs in call order.
    pub comments: RefCell<Vec<(String, String)>>,
    pub closed: RefCell<Vec<String>>,
    pub locked: RefCell<Vec<String>>,
    /// When set, `post_comment` fails; used for partial-failure scenarios.
    pub fail_comments: bool,
}

impl RecordingTracker {
    pub fn add_issue(&self, issue: Issue) {
        self.issues.borrow_mut().insert(issue.url.clone(), issue);
    }
}

impl IssueTracker for RecordingTracker {
    fn list_repositories(&self) -> Result<Vec<RepoRef>> {
        Ok(vec![RepoRef {
            owner: "bitrise-io".to_string(),
            name: "steps-xcode-test".to_string(),
        }])
    }

    fn list_open_issues(&self, _repo: &RepoRef) -> Result<Vec<Issue>> {
        Ok(self.issues.borrow().values().cloned().collect())
    }

    fn get_issue(&self, owner: &str, repo: &str, number: u64) -> Result<Issue> {
        let url = format!("https://github.com/{owner}/{repo}/issues/{number}");
        self.issues
            .borrow()
            .get(&url)
            .cloned()
            .ok_or_else(|| anyhow!("get issue {url}: not found"))
    }

    fn post_comment(&self, issue: &Issue, body: &str) -> Result<()> {
        if self.fail_comments {
            return Err(anyhow!("comment on {}: api error 502", issue.url));
        }
        self.comments
            .borrow_mut()
            .push((issue.url.clone(), body.to_string()));
        Ok(())
    }

    fn close_issue(&self, issue: &Issue) -> Result<()> {
        self.closed.borrow_mut().push(issue.url.clone());
        Ok(())
    }

    fn lock_issue(&self, issue: &Issue) -> Result<()> {
        self.locked.borrow_mut().push(issue.url.clone());
        Ok(())
    }
}

/// Forum that returns a scripted topic URL and records created topics.
pub struct RecordingForum {
    /// `(title, body)` pairs in call order.
    pub topics: RefCell<Vec<(String, String)>>,
    pub topic_url: String,
    pub fail: bool,
}

impl Default for RecordingForum {
    fn default() -> Self {
        Self {
            topics: RefCell::new(Vec::new()),
            topic_url: "https://discuss.example/t/migrated/1".to_string(),
            fail: false,
        }
    }
}

impl RecordingForum {
    pub fn with_topic_url(url: &str) -> Self {
        Self {
            topic_url: url.to_string(),
            ..Self::default()
        }
    }
}

impl Forum for RecordingForum {
    fn create_topic(&self, title: &str, body: &str, _category: u64) -> Result<String> {
        if self.fail {
            return Err(anyhow!("create discourse topic: api error 502"));
        }
        self.topics
            .borrow_mut()
            .push((title.to_string(), body.to_string()));
        Ok(self.topic_url.clone())
    }
}
