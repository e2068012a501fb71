//! In-process HTTP client runner.
//!
//! Talks to an agent server's JSON API. Error responses are decoded into
//! [`RunnerError`] with the server's payload attached so the classifier can
//! see nested `message`/`data`/`error` shapes.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use super::trait_def::Runner;
use super::types::{Message, RunnerError, SessionStatus, Todo};

/// Runner backed by an agent server reachable over HTTP.
#[derive(Debug, Clone)]
pub struct HttpRunner {
    base_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SessionCreated {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StatusResponse {
    status: String,
}

impl HttpRunner {
    /// Create a runner against `base_url` (e.g. `http://127.0.0.1:4096`).
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_default();
        Self {
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            client,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Turn a non-2xx response into a [`RunnerError`] carrying the server's
    /// JSON body when it has one.
    async fn check(resp: reqwest::Response) -> Result<reqwest::Response> {
        if resp.status().is_success() {
            return Ok(resp);
        }
        let status = resp.status();
        match resp.json::<serde_json::Value>().await {
            Ok(body) => {
                let message = crate::classify::normalize_error_value(&body);
                Err(RunnerError::with_payload(
                    format!("agent server returned {status}: {message}"),
                    body,
                )
                .into())
            }
            Err(_) => Err(RunnerError::new(format!("agent server returned {status}")).into()),
        }
    }
}

#[async_trait]
impl Runner for HttpRunner {
    fn name(&self) -> &str {
        "http"
    }

    async fn create_session(&self, work_dir: &Path, title: &str) -> Result<String> {
        let resp = self
            .client
            .post(self.url("/session"))
            .json(&json!({
                "title": title,
                "directory": work_dir.to_string_lossy(),
            }))
            .send()
            .await
            .context("failed to reach agent server")?;

        let created: SessionCreated = Self::check(resp)
            .await?
            .json()
            .await
            .context("malformed session create response")?;

        Ok(created.id)
    }

    async fn send_prompt(
        &self,
        session_id: &str,
        work_dir: &Path,
        agent: &str,
        text: &str,
    ) -> Result<()> {
        let resp = self
            .client
            .post(self.url(&format!("/session/{session_id}/prompt")))
            .json(&json!({
                "agent": agent,
                "directory": work_dir.to_string_lossy(),
                "parts": [{"type": "text", "text": text}],
            }))
            .send()
            .await
            .context("failed to send prompt to agent server")?;

        Self::check(resp).await?;
        Ok(())
    }

    async fn get_status(&self, session_id: &str, _work_dir: &Path) -> Result<SessionStatus> {
        let resp = self
            .client
            .get(self.url(&format!("/session/{session_id}/status")))
            .send()
            .await
            .context("failed to query session status")?;

        let status: StatusResponse = Self::check(resp)
            .await?
            .json()
            .await
            .context("malformed session status response")?;

        // Anything the server does not explicitly call idle counts as busy.
        Ok(if status.status == "idle" {
            SessionStatus::Idle
        } else {
            SessionStatus::Busy
        })
    }

    async fn get_messages(&self, session_id: &str, _work_dir: &Path) -> Result<Vec<Message>> {
        let resp = self
            .client
            .get(self.url(&format!("/session/{session_id}/message")))
            .send()
            .await
            .context("failed to fetch session messages")?;

        let messages: Vec<Message> = Self::check(resp)
            .await?
            .json()
            .await
            .context("malformed session messages response")?;

        Ok(messages)
    }

    async fn get_todos(&self, session_id: &str) -> Result<Vec<Todo>> {
        let resp = self
            .client
            .get(self.url(&format!("/session/{session_id}/todo")))
            .send()
            .await
            .context("failed to fetch session todos")?;

        let todos: Vec<Todo> = Self::check(resp)
            .await?
            .json()
            .await
            .context("malformed session todos response")?;

        Ok(todos)
    }

    async fn inject_tool_results(
        &self,
        session_id: &str,
        _work_dir: &Path,
        pending_tool_ids: &[String],
    ) -> Result<()> {
        let resp = self
            .client
            .post(self.url(&format!("/session/{session_id}/tool-result")))
            .json(&json!({ "tool_use_ids": pending_tool_ids }))
            .send()
            .await
            .context("failed to inject tool results")?;

        Self::check(resp).await?;
        Ok(())
    }
}
