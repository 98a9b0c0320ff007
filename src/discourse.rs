//! Discourse collaborator: topic creation behind the [`Forum`] trait.

use anyhow::{Context, Result, bail};
use reqwest::blocking::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::debug;

use crate::config::DiscourseConfig;

/// Abstraction over the forum that receives migrated issues.
pub trait Forum {
    /// Create a topic and return its public URL.
    fn create_topic(&self, title: &str, body: &str, category: u64) -> Result<String>;
}

/// Credentials for the Discourse API, read from the environment.
#[derive(Debug, Clone)]
pub struct DiscourseCredentials {
    pub api_key: String,
    pub api_username: String,
}

pub struct DiscourseClient {
    http: Client,
    base_url: String,
    credentials: DiscourseCredentials,
}

#[derive(Debug, Deserialize)]
struct PostResponse {
    topic_id: u64,
    topic_slug: String,
}

impl DiscourseClient {
    pub fn new(config: &DiscourseConfig, credentials: DiscourseCredentials) -> Result<Self> {
        let http = Client::builder()
            .build()
            .context("build discourse http client")?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }
}

impl Forum for DiscourseClient {
    fn create_topic(&self, title: &str, body: &str, category: u64) -> Result<String> {
        let url = format!("{}/posts.json", self.base_url);
        let resp = self
            .http
            .post(&url)
            .header("Api-Key", &self.credentials.api_key)
            .header("Api-Username", &self.credentials.api_username)
            .json(&json!({
                "title": title,
                "raw": body,
                "category": category,
            }))
            .send()
            .context("create discourse topic: send request")?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().unwrap_or_default();
            bail!("create discourse topic: api error {status}: {body}");
        }
        let post: PostResponse = resp
            .json()
            .context("create discourse topic: decode response")?;

        let topic_url = topic_url(&self.base_url, &post.topic_slug, post.topic_id);
        debug!(topic_url = %topic_url, "discourse topic created");
        Ok(topic_url)
    }
}

fn topic_url(base_url: &str, slug: &str, id: u64) -> String {
    format!("{base_url}/t/{slug}/{id}")
}
