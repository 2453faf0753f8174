//! Merge (pull) requests on the hosting side.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestState {
    Open,
    Merged,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRequest {
    pub number: u64,
    pub url: String,
    /// Source branch
    pub head: String,
    pub state: RequestState,
}

#[async_trait]
pub trait MergeRequests: Send + Sync {
    /// Requests of any state whose head branch starts with `head_prefix`.
    async fn list(&self, head_prefix: &str) -> Result<Vec<MergeRequest>>;

    /// Publish `head` and open a request to merge it into `base`.
    async fn create(&self, head: &str, base: &str, title: &str, body: &str)
    -> Result<MergeRequest>;
}

/// Shape of one entry of `gh pr list --json number,url,headRefName,state`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GhPullRequest {
    number: u64,
    url: String,
    head_ref_name: String,
    state: String,
}

impl GhPullRequest {
    fn into_request(self) -> MergeRequest {
        let state = match self.state.to_uppercase().as_str() {
            "MERGED" => RequestState::Merged,
            "CLOSED" => RequestState::Closed,
            _ => RequestState::Open,
        };
        MergeRequest {
            number: self.number,
            url: self.url,
            head: self.head_ref_name,
            state,
        }
    }
}

/// Parse `gh pr list --json` output, keeping heads under `head_prefix`.
pub fn parse_gh_list(json: &str, head_prefix: &str) -> Result<Vec<MergeRequest>> {
    let entries: Vec<GhPullRequest> =
        serde_json::from_str(json).context("Failed to parse gh pr list output")?;
    Ok(entries
        .into_iter()
        .filter(|pr| pr.head_ref_name.starts_with(head_prefix))
        .map(GhPullRequest::into_request)
        .collect())
}

/// Request number from a pull request URL (`.../pull/42`).
fn number_from_url(url: &str) -> u64 {
    url.trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|n| n.parse().ok())
        .unwrap_or(0)
}

/// `MergeRequests` through `git push` and the GitHub CLI.
#[derive(Debug, Clone)]
pub struct GhCli {
    project_dir: PathBuf,
    remote: String,
}

impl GhCli {
    pub fn new(project_dir: impl Into<PathBuf>, remote: impl Into<String>) -> Self {
        Self {
            project_dir: project_dir.into(),
            remote: remote.into(),
        }
    }
}

#[async_trait]
impl MergeRequests for GhCli {
    async fn list(&self, head_prefix: &str) -> Result<Vec<MergeRequest>> {
        let output = Command::new("gh")
            .args([
                "pr",
                "list",
                "--state",
                "all",
                "--limit",
                "500",
                "--json",
                "number,url,headRefName,state",
            ])
            .current_dir(&self.project_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to run gh pr list")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Failed to list pull requests: {}", stderr.trim());
        }

        let stdout = String::from_utf8(output.stdout).context("Invalid UTF-8 in gh output")?;
        parse_gh_list(&stdout, head_prefix)
    }

    async fn create(
        &self,
        head: &str,
        base: &str,
        title: &str,
        body: &str,
    ) -> Result<MergeRequest> {
        let push = Command::new("git")
            .args(["push", "-u", &self.remote, head])
            .current_dir(&self.project_dir)
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to push branch")?;

        if !push.status.success() {
            let stderr = String::from_utf8_lossy(&push.stderr);
            anyhow::bail!("Failed to push branch {}: {}", head, stderr.trim());
        }

        let output = Command::new("gh")
            .args([
                "pr", "create", "--head", head, "--base", base, "--title", title, "--body", body,
            ])
            .current_dir(&self.project_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to run gh pr create")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Failed to create PR: {}", stderr.trim());
        }

        let url = String::from_utf8(output.stdout)
            .context("Invalid UTF-8 in gh output")?
            .trim()
            .to_string();
        info!(head, base, url = %url, "pull request created");

        Ok(MergeRequest {
            number: number_from_url(&url),
            url,
            head: head.to_string(),
            state: RequestState::Open,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_gh_list_filters_and_maps_state() {
        let json = r#"[
            {"number": 7, "url": "https://github.com/o/r/pull/7", "headRefName": "shop/unit-01-a", "state": "MERGED"},
            {"number": 8, "url": "https://github.com/o/r/pull/8", "headRefName": "shop/unit-02-b", "state": "OPEN"},
            {"number": 9, "url": "https://github.com/o/r/pull/9", "headRefName": "other", "state": "CLOSED"}
        ]"#;
        let requests = parse_gh_list(json, "shop/").unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[0].state, RequestState::Merged);
        assert_eq!(requests[0].head, "shop/unit-01-a");
        assert_eq!(requests[1].state, RequestState::Open);
    }

    #[test]
    fn test_parse_gh_list_rejects_garbage() {
        assert!(parse_gh_list("not json", "").is_err());
    }

    #[test]
    fn test_number_from_url() {
        assert_eq!(number_from_url("https://github.com/o/r/pull/42"), 42);
        assert_eq!(number_from_url("https://github.com/o/r/pull/42/"), 42);
        assert_eq!(number_from_url("weird"), 0);
    }
}
