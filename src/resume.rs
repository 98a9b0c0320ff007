//! Resume controller: reconstructs in-flight issues from the checkpoint log
//! and re-enters the sequencer at the step after the restored one.

use std::collections::BTreeMap;
use std::thread;

use anyhow::{Context, Result};
use tracing::{info, warn};

use crate::checkpoint::{CheckpointLog, RestoredIssue, fold_restored, parse_line};
use crate::discourse::Forum;
use crate::github::IssueTracker;
use crate::issue::is_stale;
use crate::run::{RunOptions, RunStats};
use crate::sequencer::{IssueJob, Sequencer, SequencerSettings};

/// Parse the whole checkpoint log into a per-issue restore map.
///
/// Malformed lines are reported and skipped; a corrupt line must not abort
/// the resume pass. Out-of-order and duplicate lines are resolved by
/// keeping the maximum step per issue.
pub fn restore_log(contents: &str) -> BTreeMap<String, RestoredIssue> {
    let restored = contents.lines().filter(|l| !l.is_empty()).filter_map(|line| {
        let result = parse_line(line).and_then(RestoredIssue::try_from);
        match result {
            Ok(issue) => Some(issue),
            Err(err) => {
                warn!(line = %line, error = %format!("{err:#}"), "skipping malformed checkpoint line");
                None
            }
        }
    });
    fold_restored(restored)
}

/// Finishes issues left in flight by an interrupted live run.
pub struct ResumeController<'a, T: IssueTracker, F: Forum> {
    tracker: &'a T,
    sequencer: Sequencer<'a, T, F>,
    opts: RunOptions,
    stats: RunStats,
}

impl<'a, T: IssueTracker, F: Forum> ResumeController<'a, T, F> {
    pub fn new(
        tracker: &'a T,
        forum: &'a F,
        log: CheckpointLog,
        settings: SequencerSettings,
        opts: RunOptions,
    ) -> Self {
        Self {
            tracker,
            sequencer: Sequencer::new(tracker, forum, log, settings),
            opts,
            stats: RunStats::default(),
        }
    }

    /// Drive every restored issue through its remaining steps.
    ///
    /// Completed steps are never re-issued: the restored step enters the
    /// sequencer as `start_after`, and the restored topic URL feeds the
    /// comment step. Issues that cannot be re-fetched (closed meanwhile,
    /// deleted, API failure) are reported and skipped.
    pub fn resume(&mut self, restored: &BTreeMap<String, RestoredIssue>) -> Result<()> {
        for issue_state in restored.values() {
            if let Some(limit) = self.opts.limit
                && self.stats.processed >= limit
            {
                info!(limit, "processed-count limit reached");
                break;
            }
            thread::sleep(self.opts.delay);

            let issue = match self.tracker.get_issue(
                &issue_state.owner,
                &issue_state.repo,
                issue_state.number,
            ) {
                Ok(issue) => issue,
                Err(err) => {
                    warn!(url = %issue_state.url, error = %format!("{err:#}"), "skipping issue: fetch failed");
                    continue;
                }
            };

            info!(url = %issue.url, done = ?issue_state.done, "resuming issue");
            let job = IssueJob {
                issue: &issue,
                stale: is_stale(&issue, self.opts.now),
                start_after: Some(issue_state.done),
                topic_url: (!issue_state.extra.is_empty()).then(|| issue_state.extra.clone()),
            };
            self.sequencer
                .process(&job)
                .with_context(|| format!("resume issue {}", issue.url))?;
            self.stats.processed += 1;
        }
        Ok(())
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }
}
