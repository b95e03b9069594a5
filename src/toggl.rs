use std::collections::HashMap;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
#[cfg(test)]
use mockall::automock;
use reqwest::{header::CONTENT_TYPE, Client, Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::json;

use crate::error::{Error, Result};
use crate::time_entry::{ActivityRef, EntryFilter, ProjectRef, TimeEntry, User};

/// export済みのtime entryに付けるタグ。
pub const EXPORTED_TAG: &str = "exported";

const DEFAULT_API_URL: &str = "https://api.track.toggl.com/api/v9";

/// time trackingサービスとのやり取り。
#[cfg_attr(test, automock)]
#[async_trait]
pub trait TimeTracking: Send + Sync {
    /// APIトークンの持ち主を取得する。
    async fn current_user(&self) -> Result<User>;

    async fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<TimeEntry>>;

    async fn get_entry(&self, id: i64) -> Result<TimeEntry>;

    /// 計測中のtime entryを停止する。
    async fn stop(&self, id: i64) -> Result<TimeEntry>;

    async fn set_description(&self, id: i64, text: &str) -> Result<TimeEntry>;

    /// time entryをexport済みにする。
    async fn export(&self, id: i64) -> Result<TimeEntry>;
}

/// Toggl APIのレスポンスをデシリアライズするための構造体。
#[derive(Debug, Deserialize)]
struct TogglTimeEntry {
    id: i64,
    workspace_id: i64,
    user_id: i64,
    description: Option<String>,
    project_id: Option<i64>,
    start: DateTime<Utc>,
    stop: Option<DateTime<Utc>>,
    #[serde(default)]
    tags: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct TogglProject {
    id: i64,
    name: String,
}

#[derive(Debug, Deserialize)]
struct TogglMe {
    id: i64,
    fullname: String,
    default_workspace_id: i64,
}

/// Toggl APIと通信するためのクライアント。
///
/// # Examples
///
/// ```
/// let client = TogglClient::new("api-token");
/// let entries = client.list_entries(&EntryFilter::between(start_at, end_at)).await?;
/// ```
pub struct TogglClient {
    client: Client,
    api_url: String,
    api_token: String,
}

impl TogglClient {
    pub fn new(api_token: &str) -> Self {
        Self::with_api_url(api_token, DEFAULT_API_URL)
    }

    /// 接続先を指定して`TogglClient`を返す。
    pub fn with_api_url(api_token: &str, api_url: &str) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            api_token: api_token.to_string(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.api_url, path))
            .basic_auth(&self.api_token, Some("api_token"))
            .header(CONTENT_TYPE, "application/json")
    }

    async fn send(&self, request: RequestBuilder, entry_id: Option<i64>) -> Result<Response> {
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to send request to Toggl API at {}", self.api_url))?;
        if let (StatusCode::NOT_FOUND, Some(id)) = (response.status(), entry_id) {
            return Err(Error::NotFound(format!("time entry {}", id)));
        }

        Ok(response
            .error_for_status()
            .context("Request returned an error status")?)
    }

    async fn read_projects(&self) -> Result<HashMap<i64, String>> {
        let projects = self
            .send(self.request(Method::GET, "/me/projects"), None)
            .await?
            .json::<Option<Vec<TogglProject>>>()
            .await
            .context("Failed to deserialize response")?
            .unwrap_or_default();

        Ok(projects
            .into_iter()
            .map(|project| (project.id, project.name))
            .collect())
    }

    async fn read_entry(&self, id: i64) -> Result<TogglTimeEntry> {
        let entry = self
            .send(
                self.request(Method::GET, &format!("/me/time_entries/{}", id)),
                Some(id),
            )
            .await?
            .json::<TogglTimeEntry>()
            .await
            .context("Failed to deserialize response")?;

        Ok(entry)
    }

    /// 更新系のリクエストを送り、更新後のtime entryを返す。
    async fn write_entry(&self, request: RequestBuilder, id: i64) -> Result<TimeEntry> {
        let entry = self
            .send(request, Some(id))
            .await?
            .json::<TogglTimeEntry>()
            .await
            .context("Failed to deserialize response")?;
        let projects = self.read_projects().await?;

        Ok(into_time_entry(entry, &projects))
    }
}

/// Togglのtime entryを変換する。activityには`exported`以外の最初のタグを用いる。
fn into_time_entry(entry: TogglTimeEntry, projects: &HashMap<i64, String>) -> TimeEntry {
    let project = match entry.project_id {
        Some(id) => ProjectRef {
            id,
            name: projects.get(&id).cloned().unwrap_or_default(),
        },
        None => ProjectRef {
            id: 0,
            name: "(no project)".to_string(),
        },
    };
    let activity = entry
        .tags
        .iter()
        .find(|tag| tag.as_str() != EXPORTED_TAG)
        .map(|tag| ActivityRef {
            id: tag.clone(),
            name: tag.clone(),
        })
        .unwrap_or_else(|| ActivityRef {
            id: String::new(),
            name: "(no activity)".to_string(),
        });

    TimeEntry {
        id: entry.id,
        user_id: entry.user_id,
        project,
        activity,
        begin: entry.start,
        end: entry.stop,
        description: entry.description.unwrap_or_default(),
        exported: entry.tags.iter().any(|tag| tag == EXPORTED_TAG),
        is_overlapping: false,
        linked_task: None,
    }
}

#[async_trait]
impl TimeTracking for TogglClient {
    async fn current_user(&self) -> Result<User> {
        let me = self
            .send(self.request(Method::GET, "/me"), None)
            .await?
            .json::<TogglMe>()
            .await
            .context("Failed to deserialize response")?;

        Ok(User {
            id: me.id,
            name: me.fullname,
            workspace_id: me.default_workspace_id,
        })
    }

    async fn list_entries(&self, filter: &EntryFilter) -> Result<Vec<TimeEntry>> {
        let mut query = Vec::new();
        if let Some(begin) = filter.begin {
            query.push(("start_date", begin.to_rfc3339()));
        }
        if let Some(end) = filter.end {
            query.push(("end_date", end.to_rfc3339()));
        }

        let toggl_time_entries = self
            .send(
                self.request(Method::GET, "/me/time_entries").query(&query),
                None,
            )
            .await?
            .json::<Vec<TogglTimeEntry>>()
            .await
            .context("Failed to deserialize response")?;
        info!("length of time entries: {}", toggl_time_entries.len());
        let projects = self
            .read_projects()
            .await
            .map_err(|err| Error::UpstreamFailure(format!("Failed to get project list: {}", err)))?;

        let time_entries = toggl_time_entries
            .into_iter()
            .map(|entry| into_time_entry(entry, &projects))
            .collect();

        Ok(filter.apply(time_entries))
    }

    async fn get_entry(&self, id: i64) -> Result<TimeEntry> {
        let entry = self.read_entry(id).await?;
        let projects = self.read_projects().await?;

        Ok(into_time_entry(entry, &projects))
    }

    async fn stop(&self, id: i64) -> Result<TimeEntry> {
        let entry = self.read_entry(id).await?;
        let path = format!(
            "/workspaces/{}/time_entries/{}/stop",
            entry.workspace_id, id
        );
        info!("Stopping time entry {}", id);

        self.write_entry(self.request(Method::PATCH, &path), id).await
    }

    async fn set_description(&self, id: i64, text: &str) -> Result<TimeEntry> {
        let entry = self.read_entry(id).await?;
        let path = format!("/workspaces/{}/time_entries/{}", entry.workspace_id, id);

        self.write_entry(
            self.request(Method::PUT, &path)
                .json(&json!({ "description": text })),
            id,
        )
        .await
    }

    async fn export(&self, id: i64) -> Result<TimeEntry> {
        let entry = self.read_entry(id).await?;
        let path = format!("/workspaces/{}/time_entries/{}", entry.workspace_id, id);
        info!("Marking time entry {} as exported", id);

        self.write_entry(
            self.request(Method::PUT, &path)
                .json(&json!({ "tags": [EXPORTED_TAG], "tag_action": "add" })),
            id,
        )
        .await
    }
}
