//! Run modes: dry (classify and count) and live (execute and checkpoint).
//!
//! Both modes walk an issue list with the same skip/limit/classification
//! rules, so a dry run previews exactly what a live run would do. Only the
//! live run performs side effects and writes checkpoints.

use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use tracing::info;

use crate::checkpoint::CheckpointLog;
use crate::discourse::Forum;
use crate::github::IssueTracker;
use crate::issue::{Classification, Issue, classify};
use crate::sequencer::{IssueJob, Sequencer, SequencerSettings};

/// Per-run counters. Not persisted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunStats {
    /// Issues fully driven through the lock step (live) or classified (dry).
    pub processed: u32,
    pub stale: u32,
    pub active: u32,
    pub pull_request: u32,
}

/// Loop behavior shared by both modes.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Stop processing a repository's remaining issues once `processed`
    /// reaches this. Pull-request skips happen before the check and never
    /// count against it.
    pub limit: Option<u32>,
    /// Delay between consecutive issues, for upstream rate limits.
    pub delay: Duration,
    /// Injected wall clock for stale classification.
    pub now: DateTime<Utc>,
}

impl RunOptions {
    fn reached_limit(&self, stats: &RunStats) -> bool {
        self.limit.is_some_and(|limit| stats.processed >= limit)
    }
}

/// A driver for one batch of issues. Exactly two implementations exist;
/// this is a closed set, not an extension point.
pub trait RunMode {
    /// Process `issues` in order. On error the run halts immediately;
    /// partial counters stay available through [`RunMode::stats`].
    fn run(&mut self, issues: &[Issue]) -> Result<()>;

    fn stats(&self) -> RunStats;
}

/// Simulation: classifies and counts, performs no side effects.
pub struct DryRun {
    opts: RunOptions,
    stats: RunStats,
}

impl DryRun {
    pub fn new(opts: RunOptions) -> Self {
        Self {
            opts,
            stats: RunStats::default(),
        }
    }
}

impl RunMode for DryRun {
    fn run(&mut self, issues: &[Issue]) -> Result<()> {
        for issue in issues {
            // Unconditional, also across repository boundaries.
            thread::sleep(self.opts.delay);
            info!(url = %issue.url, "processing issue");

            let class = classify(issue, self.opts.now);
            if class == Classification::PullRequest {
                self.stats.pull_request += 1;
                info!(url = %issue.url, "skipping pull request");
                continue;
            }
            if self.opts.reached_limit(&self.stats) {
                info!(limit = self.opts.limit, "processed-count limit reached");
                break;
            }

            if class == Classification::Stale {
                self.stats.stale += 1;
                info!(url = %issue.url, "issue is stale");
            } else {
                self.stats.active += 1;
                info!(url = %issue.url, "issue is active");
            }
            self.stats.processed += 1;
        }
        Ok(())
    }

    fn stats(&self) -> RunStats {
        self.stats
    }
}

/// Executing run: owns the open checkpoint log (through the sequencer) for
/// its whole lifetime and halts on the first failing issue.
pub struct LiveRun<'a, T: IssueTracker, F: Forum> {
    sequencer: Sequencer<'a, T, F>,
    opts: RunOptions,
    stats: RunStats,
}

impl<'a, T: IssueTracker, F: Forum> LiveRun<'a, T, F> {
    pub fn new(
        tracker: &'a T,
        forum: &'a F,
        log: CheckpointLog,
        settings: SequencerSettings,
        opts: RunOptions,
    ) -> Self {
        Self {
            sequencer: Sequencer::new(tracker, forum, log, settings),
            opts,
            stats: RunStats::default(),
        }
    }
}

impl<T: IssueTracker, F: Forum> RunMode for LiveRun<'_, T, F> {
    fn run(&mut self, issues: &[Issue]) -> Result<()> {
        for issue in issues {
            // Unconditional, also across repository boundaries.
            thread::sleep(self.opts.delay);
            info!(url = %issue.url, "processing issue");

            let class = classify(issue, self.opts.now);
            if class == Classification::PullRequest {
                self.stats.pull_request += 1;
                info!(url = %issue.url, "skipping pull request");
                continue;
            }
            if self.opts.reached_limit(&self.stats) {
                info!(limit = self.opts.limit, "processed-count limit reached");
                break;
            }

            let stale = class == Classification::Stale;
            if stale {
                self.stats.stale += 1;
                info!(url = %issue.url, "issue is stale");
            } else {
                self.stats.active += 1;
                info!(url = %issue.url, "issue is active");
            }

            self.sequencer
                .process(&IssueJob::fresh(issue, stale))
                .with_context(|| format!("process issue {}", issue.url))?;
            self.stats.processed += 1;
        }
        Ok(())
    }

    fn stats(&self) -> RunStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        read_log_lines, test_issue, test_now, test_settings, RecordingForum, RecordingTracker,
    };
    use chrono::Duration as ChronoDuration;

    fn opts(limit: Option<u32>) -> RunOptions {
        RunOptions {
            limit,
            delay: Duration::ZERO,
            now: test_now(),
        }
    }

    fn live<'a>(
        tracker: &'a RecordingTracker,
        forum: &'a RecordingForum,
        path: &std::path::Path,
        limit: Option<u32>,
    ) -> LiveRun<'a, RecordingTracker, RecordingForum> {
        let log = CheckpointLog::open(path).expect("open log");
        LiveRun::new(tracker, forum, log, test_settings(), opts(limit))
    }

    #[test]
    fn pull_requests_are_skipped_without_any_call() {
        let temp = tempfile::tempdir().expect("tempdir");
        let tracker = RecordingTracker::default();
        let forum = RecordingForum::default();
        let issues = vec![test_issue(7, test_now(), true)];

        let mut run = live(&tracker, &forum, &temp.path().join("data.txt"), None);
        run.run(&issues).expect("run");

        let stats = run.stats();
        assert_eq!(stats.pull_request, 1);
        assert_eq!(stats.processed, 0);
        assert_eq!(stats.active + stats.stale, 0);
        assert!(forum.topics.borrow().is_empty());
        assert!(tracker.comments.borrow().is_empty());
        assert!(read_log_lines(&temp.path().join("data.txt")).is_empty());
    }

    #[test]
    fn dry_and_live_classify_identically() {
        let temp = tempfile::tempdir().expect("tempdir");
        let now = test_now();
        let issues = vec![
            test_issue(1, now - ChronoDuration::days(1), false),
            test_issue(2, now - ChronoDuration::days(200), false),
            test_issue(3, now, true),
            test_issue(4, now - ChronoDuration::days(150), false),
        ];

        let mut dry = DryRun::new(opts(None));
        dry.run(&issues).expect("dry run");

        let tracker = RecordingTracker::default();
        let forum = RecordingForum::default();
        let mut live = live(&tracker, &forum, &temp.path().join("data.txt"), None);
        live.run(&issues).expect("live run");

        let (d, l) = (dry.stats(), live.stats());
        assert_eq!(d.active, l.active);
        assert_eq!(d.stale, l.stale);
        assert_eq!(d.pull_request, l.pull_request);
        assert_eq!(d.active, 1);
        assert_eq!(d.stale, 2);
        assert_eq!(d.pull_request, 1);
    }

    #[test]
    fn limit_halts_issues_but_not_pull_request_skips() {
        let now = test_now();
        // PR first, then two real issues; limit 1 lets the PR through the
        // skip path and stops after one processed issue.
        let issues = vec![
            test_issue(1, now, true),
            test_issue(2, now - ChronoDuration::days(1), false),
            test_issue(3, now - ChronoDuration::days(1), false),
        ];

        let mut dry = DryRun::new(opts(Some(1)));
        dry.run(&issues).expect("dry run");

        let stats = dry.stats();
        assert_eq!(stats.pull_request, 1);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.active, 1);
    }

    #[test]
    fn live_halts_on_first_error_with_partial_stats() {
        let temp = tempfile::tempdir().expect("tempdir");
        let now = test_now();
        let tracker = RecordingTracker {
            fail_comments: true,
            ..RecordingTracker::default()
        };
        let forum = RecordingForum::default();
        let issues = vec![
            test_issue(1, now - ChronoDuration::days(1), false),
            test_issue(2, now - ChronoDuration::days(1), false),
        ];

        let mut run = live(&tracker, &forum, &temp.path().join("data.txt"), None);
        let err = run.run(&issues).unwrap_err();
        assert!(format!("{err:#}").contains(&issues[0].url));

        let stats = run.stats();
        assert_eq!(stats.processed, 0);
        assert_eq!(stats.active, 1);
        // Only the first issue was touched; the run never reached the second.
        assert_eq!(forum.topics.borrow().len(), 1);
        let lines = read_log_lines(&temp.path().join("data.txt"));
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with(&format!("{} 1 ", issues[0].url)));
    }

    #[test]
    fn delay_separates_consecutive_issues_across_repositories() {
        let now = test_now();
        let first = vec![test_issue(1, now, false), test_issue(2, now, false)];
        let second = vec![test_issue(3, now, false)];

        let mut dry = DryRun::new(RunOptions {
            limit: None,
            delay: Duration::from_millis(20),
            now,
        });
        let start = std::time::Instant::now();
        dry.run(&first).expect("first repo");
        dry.run(&second).expect("second repo");

        // One sleep per issue, including the repository boundary.
        assert!(start.elapsed() >= Duration::from_millis(60));
        assert_eq!(dry.stats().processed, 3);
    }

    #[test]
    fn stats_accumulate_across_repositories() {
        let now = test_now();
        let first = vec![test_issue(1, now - ChronoDuration::days(1), false)];
        let second = vec![test_issue(2, now - ChronoDuration::days(200), false)];

        let mut dry = DryRun::new(opts(None));
        dry.run(&first).expect("first repo");
        dry.run(&second).expect("second repo");

        let stats = dry.stats();
        assert_eq!(stats.processed, 2);
        assert_eq!(stats.active, 1);
        assert_eq!(stats.stale, 1);
    }
}
