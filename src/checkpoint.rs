//! Append-only checkpoint log recording the furthest completed step per issue.
//!
//! One record per line, space-separated: `<issueURL> <stepNumber> <extra>`.
//! `extra` is empty except for [`Step::DiscourseDone`], where it carries the
//! created topic URL. The file is created if absent and never truncated;
//! duplicate or out-of-order lines are expected after crash/restart and are
//! resolved by [`fold_restored`] keeping the maximum step per issue.

use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing::debug;

/// Furthest completed action for one issue, in strict order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Step {
    /// Discourse topic created (active issues only).
    DiscourseDone = 1,
    /// Migration comment posted on the issue.
    CommentDone = 2,
    /// Issue closed.
    CloseDone = 3,
    /// Issue locked; terminal.
    LockDone = 4,
}

impl Step {
    /// Wire form used in checkpoint log lines.
    pub fn number(self) -> u8 {
        self as u8
    }

    pub fn from_number(n: u8) -> Option<Self> {
        match n {
            1 => Some(Self::DiscourseDone),
            2 => Some(Self::CommentDone),
            3 => Some(Self::CloseDone),
            4 => Some(Self::LockDone),
            _ => None,
        }
    }
}

/// One durable checkpoint: an issue URL, the step just completed, and the
/// Discourse topic URL when the step is [`Step::DiscourseDone`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CheckpointRecord {
    pub url: String,
    pub step: Step,
    pub extra: String,
}

impl CheckpointRecord {
    /// Render the log line, including the trailing newline.
    pub fn to_line(&self) -> String {
        format!("{} {} {}\n", self.url, self.step.number(), self.extra)
    }
}

/// Parse one checkpoint log line.
///
/// Lines with a wrong field count, a non-numeric or unknown step, or an
/// issue URL that does not yield owner/repo/number are errors; the resume
/// pass reports and skips them instead of aborting.
pub fn parse_line(line: &str) -> Result<CheckpointRecord> {
    let fields: Vec<&str> = line.split(' ').collect();
    if !(2..=3).contains(&fields.len()) {
        return Err(anyhow!(
            "expected 2 or 3 fields, got {}: '{line}'",
            fields.len()
        ));
    }

    let url = fields[0].to_string();
    issue_coords(&url)?;

    let number: u8 = fields[1]
        .parse()
        .with_context(|| format!("non-numeric step '{}'", fields[1]))?;
    let step =
        Step::from_number(number).ok_or_else(|| anyhow!("unknown step number {number}"))?;

    // Only the DiscourseDone record carries a payload; anything else in the
    // third field is a leftover separator.
    let extra = if step == Step::DiscourseDone {
        fields.get(2).copied().unwrap_or_default().to_string()
    } else {
        String::new()
    };

    Ok(CheckpointRecord { url, step, extra })
}

/// Extract `(owner, repo, number)` from an issue `html_url` such as
/// `https://github.com/owner/repo/issues/42`.
pub fn issue_coords(url: &str) -> Result<(String, String, u64)> {
    let fragments: Vec<&str> = url.split('/').collect();
    if fragments.len() < 7 || fragments[3].is_empty() || fragments[4].is_empty() {
        return Err(anyhow!("issue url '{url}' does not name owner/repo/number"));
    }
    let number: u64 = fragments[6]
        .parse()
        .with_context(|| format!("non-numeric issue number in url '{url}'"))?;
    Ok((fragments[3].to_string(), fragments[4].to_string(), number))
}

/// An in-flight issue reconstructed from the checkpoint log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoredIssue {
    pub owner: String,
    pub repo: String,
    pub number: u64,
    pub url: String,
    /// Maximum step seen across all records for this URL.
    pub done: Step,
    /// Discourse topic URL, when a DiscourseDone record was present.
    pub extra: String,
}

impl TryFrom<CheckpointRecord> for RestoredIssue {
    type Error = anyhow::Error;

    fn try_from(record: CheckpointRecord) -> Result<Self> {
        let (owner, repo, number) = issue_coords(&record.url)?;
        Ok(Self {
            owner,
            repo,
            number,
            url: record.url,
            done: record.step,
            extra: record.extra,
        })
    }
}

impl RestoredIssue {
    /// Absorb a later record for the same issue. The stored step never
    /// regresses, and a topic URL is retained once seen.
    fn merge(&mut self, other: RestoredIssue) {
        if other.done > self.done {
            self.done = other.done;
        }
        if self.extra.is_empty() && !other.extra.is_empty() {
            self.extra = other.extra;
        }
    }
}

/// Fold restored records into a per-URL map keeping the maximum step.
pub fn fold_restored<I>(records: I) -> BTreeMap<String, RestoredIssue>
where
    I: IntoIterator<Item = RestoredIssue>,
{
    let mut issues = BTreeMap::new();
    for record in records {
        match issues.entry(record.url.clone()) {
            Entry::Vacant(slot) => {
                slot.insert(record);
            }
            Entry::Occupied(mut slot) => slot.get_mut().merge(record),
        }
    }
    issues
}

/// Open handle to the checkpoint log for the lifetime of a live run.
///
/// Every write is synced before returning so a crash cannot lose a
/// just-completed step. The handle closes on drop, success or error.
pub struct CheckpointLog {
    file: File,
    path: PathBuf,
}

impl CheckpointLog {
    /// Open (or create) the log in append mode. Existing content is never
    /// truncated.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .with_context(|| format!("open checkpoint log {}", path.display()))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Append one record and sync it to disk.
    pub fn record(&mut self, record: &CheckpointRecord) -> Result<()> {
        self.file
            .write_all(record.to_line().as_bytes())
            .with_context(|| format!("write checkpoint log {}", self.path.display()))?;
        self.file
            .sync_data()
            .with_context(|| format!("sync checkpoint log {}", self.path.display()))?;
        debug!(url = %record.url, step = ?record.step, "checkpoint recorded");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
