//! Step sequencer: drives one issue through the ordered migration steps.
//!
//! `DiscourseDone -> CommentDone -> CloseDone -> LockDone`, strictly forward.
//! Every external call must succeed before its checkpoint is written, and a
//! checkpoint already on disk means the step is never re-executed: resume
//! passes the restored step as `start_after` and the sequencer skips
//! everything at or below it, so the sequence is idempotent under repeated
//! resume attempts.

use anyhow::{Context, Result};
use tracing::info;

use crate::checkpoint::{CheckpointLog, CheckpointRecord, Step};
use crate::discourse::Forum;
use crate::github::IssueTracker;
use crate::issue::Issue;

/// Per-run settings shared by every sequenced issue.
#[derive(Debug, Clone)]
pub struct SequencerSettings {
    /// When set, created topic titles get a `[test][<run-id>]` prefix so
    /// test runs are easy to identify and clean up on the forum.
    pub run_id: Option<String>,
    /// Discourse category that receives migrated topics.
    pub category: u64,
    /// Category URL quoted in both comment templates.
    pub category_url: String,
}

/// One issue to drive through the state machine.
#[derive(Debug)]
pub struct IssueJob<'a> {
    pub issue: &'a Issue,
    /// Stale issues skip topic creation and start at the comment step.
    pub stale: bool,
    /// Furthest step already checkpointed; `None` for a fresh issue.
    pub start_after: Option<Step>,
    /// Topic URL restored from the checkpoint log, for the comment step.
    pub topic_url: Option<String>,
}

impl<'a> IssueJob<'a> {
    pub fn fresh(issue: &'a Issue, stale: bool) -> Self {
        Self {
            issue,
            stale,
            start_after: None,
            topic_url: None,
        }
    }
}

pub struct Sequencer<'a, T: IssueTracker, F: Forum> {
    tracker: &'a T,
    forum: &'a F,
    log: CheckpointLog,
    settings: SequencerSettings,
}

impl<'a, T: IssueTracker, F: Forum> Sequencer<'a, T, F> {
    pub fn new(tracker: &'a T, forum: &'a F, log: CheckpointLog, settings: SequencerSettings) -> Self {
        Self {
            tracker,
            forum,
            log,
            settings,
        }
    }

    /// Drive `job` through its remaining steps.
    ///
    /// Stops on the first failing external call, leaving the last written
    /// checkpoint as the resume point. No rollback is attempted.
    pub fn process(&mut self, job: &IssueJob<'_>) -> Result<()> {
        let issue = job.issue;
        let mut topic_url = job.topic_url.clone();

        if !job.stale && runs(Step::DiscourseDone, job.start_after) {
            let title = match &self.settings.run_id {
                Some(run_id) => format!("[test][{run_id}] {}", issue.title),
                None => issue.title.clone(),
            };
            let url = self
                .forum
                .create_topic(&title, &issue.body, self.settings.category)?;
            self.checkpoint(issue, Step::DiscourseDone, &url)?;
            info!(url = %issue.url, topic = %url, "migrated to discourse");
            topic_url = Some(url);
        }

        if runs(Step::CommentDone, job.start_after) {
            let body = if job.stale {
                stale_comment(&issue.author, &self.settings.category_url)
            } else {
                active_comment(
                    &issue.author,
                    &self.settings.category_url,
                    topic_url.as_deref().unwrap_or_default(),
                )
            };
            self.tracker.post_comment(issue, &body)?;
            self.checkpoint(issue, Step::CommentDone, "")?;
            info!(url = %issue.url, "commented on issue");
        }

        if runs(Step::CloseDone, job.start_after) {
            self.tracker.close_issue(issue)?;
            self.checkpoint(issue, Step::CloseDone, "")?;
            info!(url = %issue.url, "closed issue");
        }

        if runs(Step::LockDone, job.start_after) {
            self.tracker.lock_issue(issue)?;
            self.checkpoint(issue, Step::LockDone, "")?;
            info!(url = %issue.url, "locked issue");
        }

        Ok(())
    }

    /// Checkpoint-write failures are always fatal to the run.
    fn checkpoint(&mut self, issue: &Issue, step: Step, extra: &str) -> Result<()> {
        self.log
            .record(&CheckpointRecord {
                url: issue.url.clone(),
                step,
                extra: extra.to_string(),
            })
            .context("process: save checkpoint")
    }
}

/// Whether `step` still has to run given the furthest checkpointed step.
fn runs(step: Step, start_after: Option<Step>) -> bool {
    start_after.is_none_or(|done| step > done)
}

/// Comment posted on active issues, pointing at the created topic.
pub fn active_comment(author: &str, category_url: &str, topic_url: &str) -> String {
    format!(
        "Hi {author}! We are migrating our GitHub issues to Discourse ({category_url}). \
         From now on, you can track this issue at: {topic_url}"
    )
}

/// Comment posted on stale issues; no topic is created for them.
pub fn stale_comment(author: &str, category_url: &str) -> String {
    format!(
        "Hi {author}! We are migrating our GitHub issues to Discourse ({category_url}). \
         Because this issue has been inactive for more than three months, we will be \
         closing it. If you feel it is still relevant, please open a ticket on Discourse!"
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        read_log_lines, test_issue, test_now, test_settings, RecordingForum, RecordingTracker,
    };
    use chrono::Duration;
    use tempfile::TempDir;

    fn open_log(temp: &TempDir) -> CheckpointLog {
        CheckpointLog::open(&temp.path().join("data.txt")).expect("open log")
    }

    #[test]
    fn stale_issue_skips_discourse_and_runs_comment_close_lock() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tracker = RecordingTracker::default();
        let forum = RecordingForum::default();
        let issue = test_issue(42, test_now() - Duration::days(4 * 30 + 2), false);

        let mut sequencer = Sequencer::new(&tracker, &forum, open_log(&temp), test_settings());
        sequencer
            .process(&IssueJob::fresh(&issue, true))
            .expect("process");

        assert!(forum.topics.borrow().is_empty());
        let comments = tracker.comments.borrow();
        assert_eq!(comments.len(), 1);
        assert_eq!(
            comments[0].1,
            stale_comment("octocat", "https://discuss.example/c/issues")
        );
        assert_eq!(tracker.closed.borrow().as_slice(), [issue.url.clone()]);
        assert_eq!(tracker.locked.borrow().as_slice(), [issue.url.clone()]);

        let lines = read_log_lines(&temp.path().join("data.txt"));
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], format!("{} 2 ", issue.url));
        assert_eq!(lines[1], format!("{} 3 ", issue.url));
        assert_eq!(lines[2], format!("{} 4 ", issue.url));
    }

    #[test]
    fn active_issue_creates_topic_and_checkpoints_its_url() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tracker = RecordingTracker::default();
        let forum = RecordingForum::with_topic_url("https://discuss.example/t/42");
        let issue = test_issue(42, test_now() - Duration::days(1), false);

        let mut sequencer = Sequencer::new(&tracker, &forum, open_log(&temp), test_settings());
        sequencer
            .process(&IssueJob::fresh(&issue, false))
            .expect("process");

        assert_eq!(forum.topics.borrow().len(), 1);
        let comments = tracker.comments.borrow();
        assert_eq!(
            comments[0].1,
            active_comment(
                "octocat",
                "https://discuss.example/c/issues",
                "https://discuss.example/t/42"
            )
        );

        let lines = read_log_lines(&temp.path().join("data.txt"));
        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            format!("{} 1 https://discuss.example/t/42", issue.url)
        );
    }

    #[test]
    fn run_id_prefixes_the_topic_title() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tracker = RecordingTracker::default();
        let forum = RecordingForum::default();
        let issue = test_issue(42, test_now() - Duration::days(1), false);

        let settings = SequencerSettings {
            run_id: Some("batch-7".to_string()),
            ..test_settings()
        };
        let mut sequencer = Sequencer::new(&tracker, &forum, open_log(&temp), settings);
        sequencer
            .process(&IssueJob::fresh(&issue, false))
            .expect("process");

        let topics = forum.topics.borrow();
        assert_eq!(topics[0].0, format!("[test][batch-7] {}", issue.title));
    }

    #[test]
    fn comment_failure_after_discourse_leaves_single_checkpoint() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tracker = RecordingTracker {
            fail_comments: true,
            ..RecordingTracker::default()
        };
        let forum = RecordingForum::default();
        let issue = test_issue(42, test_now() - Duration::days(1), false);

        let mut sequencer = Sequencer::new(&tracker, &forum, open_log(&temp), test_settings());
        let err = sequencer
            .process(&IssueJob::fresh(&issue, false))
            .unwrap_err();
        assert!(err.to_string().contains("comment"));

        let lines = read_log_lines(&temp.path().join("data.txt"));
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with(&format!("{} 1 ", issue.url)));
        assert!(tracker.closed.borrow().is_empty());
        assert!(tracker.locked.borrow().is_empty());
    }

    #[test]
    fn discourse_failure_leaves_no_checkpoint() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tracker = RecordingTracker::default();
        let forum = RecordingForum {
            fail: true,
            ..RecordingForum::default()
        };
        let issue = test_issue(42, test_now() - Duration::days(1), false);

        let mut sequencer = Sequencer::new(&tracker, &forum, open_log(&temp), test_settings());
        let err = sequencer
            .process(&IssueJob::fresh(&issue, false))
            .unwrap_err();
        assert!(err.to_string().contains("discourse"));

        assert!(read_log_lines(&temp.path().join("data.txt")).is_empty());
        assert!(tracker.comments.borrow().is_empty());
        assert!(tracker.closed.borrow().is_empty());
        assert!(tracker.locked.borrow().is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn checkpoint_write_failure_aborts_before_further_calls() {
        let tracker = RecordingTracker::default();
        let forum = RecordingForum::default();
        let issue = test_issue(42, test_now() - Duration::days(1), false);

        // /dev/full accepts the open but fails every write with ENOSPC.
        let log = CheckpointLog::open(std::path::Path::new("/dev/full")).expect("open log");
        let mut sequencer = Sequencer::new(&tracker, &forum, log, test_settings());
        let err = sequencer
            .process(&IssueJob::fresh(&issue, false))
            .unwrap_err();
        assert!(format!("{err:#}").contains("process: save checkpoint"));

        // The topic call preceded the failing checkpoint; nothing after it ran.
        assert_eq!(forum.topics.borrow().len(), 1);
        assert!(tracker.comments.borrow().is_empty());
        assert!(tracker.closed.borrow().is_empty());
        assert!(tracker.locked.borrow().is_empty());
    }

    #[test]
    fn resume_after_comment_never_recreates_topic_or_comment() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tracker = RecordingTracker::default();
        let forum = RecordingForum::default();
        let issue = test_issue(42, test_now() - Duration::days(1), false);

        let mut sequencer = Sequencer::new(&tracker, &forum, open_log(&temp), test_settings());
        sequencer
            .process(&IssueJob {
                issue: &issue,
                stale: false,
                start_after: Some(Step::CommentDone),
                topic_url: None,
            })
            .expect("process");

        assert!(forum.topics.borrow().is_empty());
        assert!(tracker.comments.borrow().is_empty());
        assert_eq!(tracker.closed.borrow().len(), 1);
        assert_eq!(tracker.locked.borrow().len(), 1);

        let lines = read_log_lines(&temp.path().join("data.txt"));
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0], format!("{} 3 ", issue.url));
        assert_eq!(lines[1], format!("{} 4 ", issue.url));
    }

    #[test]
    fn resume_at_lock_done_makes_no_external_call() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tracker = RecordingTracker::default();
        let forum = RecordingForum::default();
        let issue = test_issue(42, test_now() - Duration::days(1), false);

        let mut sequencer = Sequencer::new(&tracker, &forum, open_log(&temp), test_settings());
        sequencer
            .process(&IssueJob {
                issue: &issue,
                stale: false,
                start_after: Some(Step::LockDone),
                topic_url: None,
            })
            .expect("process");

        assert!(forum.topics.borrow().is_empty());
        assert!(tracker.comments.borrow().is_empty());
        assert!(tracker.closed.borrow().is_empty());
        assert!(tracker.locked.borrow().is_empty());
        assert!(read_log_lines(&temp.path().join("data.txt")).is_empty());
    }

    #[test]
    fn resume_after_discourse_uses_restored_topic_url() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tracker = RecordingTracker::default();
        let forum = RecordingForum::default();
        let issue = test_issue(42, test_now() - Duration::days(1), false);

        let mut sequencer = Sequencer::new(&tracker, &forum, open_log(&temp), test_settings());
        sequencer
            .process(&IssueJob {
                issue: &issue,
                stale: false,
                start_after: Some(Step::DiscourseDone),
                topic_url: Some("https://discuss.example/t/restored/9".to_string()),
            })
            .expect("process");

        assert!(forum.topics.borrow().is_empty());
        let comments = tracker.comments.borrow();
        assert_eq!(
            comments[0].1,
            active_comment(
                "octocat",
                "https://discuss.example/c/issues",
                "https://discuss.example/t/restored/9"
            )
        );
    }
}
