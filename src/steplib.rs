//! Repository list derived from a step-library spec file.
//!
//! The spec file maps steps to versions; each version names its source
//! repository. The latest version of every step is filtered against an
//! organization allow-list to produce the migration's repository set.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::issue::RepoRef;

#[derive(Debug, serde::Deserialize)]
struct StepCollection {
    #[serde(default)]
    steps: BTreeMap<String, StepEntry>,
}

#[derive(Debug, serde::Deserialize)]
struct StepEntry {
    latest_version_number: String,
    #[serde(default)]
    versions: BTreeMap<String, StepVersion>,
}

#[derive(Debug, serde::Deserialize)]
struct StepVersion {
    #[serde(default)]
    source_code_url: Option<String>,
}

/// Fetch the spec file and derive the repository list.
pub fn load_repos(steplib_url: &str, orgs: &[String]) -> Result<Vec<RepoRef>> {
    debug!(url = %steplib_url, "fetching steplib spec");
    let resp = reqwest::blocking::get(steplib_url).context("fetch steplib spec")?;
    let status = resp.status();
    if !status.is_success() {
        return Err(anyhow::anyhow!("fetch steplib spec: api error {status}"));
    }
    let raw = resp.text().context("read steplib spec")?;
    repos_from_spec(&raw, orgs)
}

/// Parse a spec document and keep the latest-version repositories owned by
/// one of `orgs`, deduplicated.
pub fn repos_from_spec(raw: &str, orgs: &[String]) -> Result<Vec<RepoRef>> {
    let spec: StepCollection = serde_json::from_str(raw).context("parse steplib spec")?;

    let mut repos = BTreeSet::new();
    for (step_id, step) in &spec.steps {
        let Some(version) = step.versions.get(&step.latest_version_number) else {
            warn!(step = %step_id, version = %step.latest_version_number, "step has no latest version entry");
            continue;
        };
        let Some(url) = version.source_code_url.as_deref() else {
            continue;
        };
        let repo = match RepoRef::from_source_url(url) {
            Ok(repo) => repo,
            Err(err) => {
                warn!(step = %step_id, error = %format!("{err:#}"), "skipping step with bad source url");
                continue;
            }
        };
        if orgs.iter().any(|org| *org == repo.owner) {
            repos.insert(repo);
        }
    }

    debug!(count = repos.len(), "steplib repositories resolved");
    Ok(repos.into_iter().collect())
}
