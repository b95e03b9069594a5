use anyhow::Context;
use async_trait::async_trait;
use log::info;
#[cfg(test)]
use mockall::automock;
use reqwest::{header::CONTENT_TYPE, Client, Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::error::{Error, Result};
use crate::work_item::{fields, FieldOp, Iteration, IterationItem, PatchRequest, WorkItem};

const DEFAULT_API_URL: &str = "https://dev.azure.com";
const API_VERSION: &str = "7.1";
/// 1回の一括取得で指定できるwork itemの上限。
const MAX_BATCH_SIZE: usize = 200;

/// issue trackerとのやり取り。
#[cfg_attr(test, automock)]
#[async_trait]
pub trait IssueTracker: Send + Sync {
    /// 指定したwork itemを取得する。存在しないものは結果に含まれない。
    async fn get_work_items(&self, ids: &[u32]) -> Result<Vec<WorkItem>>;

    /// revisionが`expected_revision`のままであれば更新し、更新後のwork itemを返す。
    ///
    /// revisionが変わっていれば`ConcurrencyConflict`を返す。
    async fn patch_work_item(&self, request: &PatchRequest) -> Result<WorkItem>;

    async fn get_iteration_work_items(&self, iteration: &Iteration) -> Result<Vec<IterationItem>>;
}

#[derive(Debug, Deserialize)]
struct DevOpsWorkItem {
    id: u32,
    rev: u32,
    #[serde(default)]
    fields: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct DevOpsList<T> {
    value: Vec<Option<T>>,
}

#[derive(Debug, Deserialize)]
struct DevOpsReference {
    id: u32,
}

#[derive(Debug, Deserialize)]
struct DevOpsRelation {
    source: Option<DevOpsReference>,
    target: DevOpsReference,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DevOpsIterationWorkItems {
    #[serde(default)]
    work_item_relations: Vec<DevOpsRelation>,
}

fn text_field(fields: &Map<String, Value>, name: &str) -> String {
    fields
        .get(name)
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string()
}

fn number_field(fields: &Map<String, Value>, name: &str) -> Option<f64> {
    fields.get(name).and_then(Value::as_f64)
}

impl From<DevOpsWorkItem> for WorkItem {
    fn from(item: DevOpsWorkItem) -> Self {
        let values = &item.fields;
        WorkItem {
            id: item.id,
            rev: item.rev,
            title: text_field(values, fields::TITLE),
            work_item_type: text_field(values, fields::WORK_ITEM_TYPE),
            state: text_field(values, fields::STATE),
            parent_id: values
                .get(fields::PARENT)
                .and_then(Value::as_u64)
                .and_then(|id| u32::try_from(id).ok()),
            completed_work: number_field(values, fields::COMPLETED_WORK),
            remaining_work: number_field(values, fields::REMAINING_WORK),
            original_estimate: number_field(values, fields::ORIGINAL_ESTIMATE),
            backlog_priority: number_field(values, fields::BACKLOG_PRIORITY),
        }
    }
}

/// Azure DevOps REST APIと通信するためのクライアント。
pub struct DevOpsClient {
    client: Client,
    api_url: String,
    organization: String,
    project: String,
    token: String,
}

impl DevOpsClient {
    pub fn new(organization: &str, project: &str, token: &str) -> Self {
        Self::with_api_url(organization, project, token, DEFAULT_API_URL)
    }

    pub fn with_api_url(organization: &str, project: &str, token: &str, api_url: &str) -> Self {
        Self {
            client: Client::new(),
            api_url: api_url.trim_end_matches('/').to_string(),
            organization: organization.to_string(),
            project: project.to_string(),
            token: token.to_string(),
        }
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(
                method,
                format!(
                    "{}/{}/{}{}",
                    self.api_url, self.organization, self.project, path
                ),
            )
            .basic_auth("", Some(&self.token))
            .query(&[("api-version", API_VERSION)])
    }
}

#[async_trait]
impl IssueTracker for DevOpsClient {
    async fn get_work_items(&self, ids: &[u32]) -> Result<Vec<WorkItem>> {
        let mut items = Vec::with_capacity(ids.len());
        for batch in ids.chunks(MAX_BATCH_SIZE) {
            let ids_param = batch
                .iter()
                .map(u32::to_string)
                .collect::<Vec<_>>()
                .join(",");

            let list = self
                .request(Method::GET, "/_apis/wit/workitems")
                .query(&[("ids", ids_param.as_str()), ("errorPolicy", "omit")])
                .send()
                .await
                .with_context(|| format!("Failed to send request to Azure DevOps at {}", self.api_url))?
                .error_for_status()
                .context("Request returned an error status")?
                .json::<DevOpsList<DevOpsWorkItem>>()
                .await
                .context("Failed to deserialize response")?;
            info!("Fetched {} of {} work items", list.value.len(), batch.len());

            items.extend(list.value.into_iter().flatten().map(WorkItem::from));
        }

        Ok(items)
    }

    async fn patch_work_item(&self, request: &PatchRequest) -> Result<WorkItem> {
        let mut ops = vec![FieldOp::revision_test(request.expected_revision)];
        ops.extend(request.ops.iter().cloned());
        info!(
            "Patching work item {} at revision {}",
            request.id, request.expected_revision
        );

        let response = self
            .request(
                Method::PATCH,
                &format!("/_apis/wit/workitems/{}", request.id),
            )
            .header(CONTENT_TYPE, "application/json-patch+json")
            .json(&ops)
            .send()
            .await
            .with_context(|| format!("Failed to send request to Azure DevOps at {}", self.api_url))?;

        match response.status() {
            StatusCode::NOT_FOUND => Err(Error::NotFound(format!("work item {}", request.id))),
            StatusCode::CONFLICT | StatusCode::PRECONDITION_FAILED => {
                Err(Error::ConcurrencyConflict {
                    id: request.id,
                    expected_revision: request.expected_revision,
                })
            }
            _ => {
                let item = response
                    .error_for_status()
                    .context("Request returned an error status")?
                    .json::<DevOpsWorkItem>()
                    .await
                    .context("Failed to deserialize response")?;
                Ok(item.into())
            }
        }
    }

    async fn get_iteration_work_items(&self, iteration: &Iteration) -> Result<Vec<IterationItem>> {
        let relations = self
            .request(
                Method::GET,
                &format!(
                    "/{}/_apis/work/teamsettings/iterations/{}/workitems",
                    iteration.team, iteration.id
                ),
            )
            .send()
            .await
            .with_context(|| format!("Failed to send request to Azure DevOps at {}", self.api_url))?
            .error_for_status()
            .with_context(|| format!("Failed to read iteration {}", iteration.id))?
            .json::<DevOpsIterationWorkItems>()
            .await
            .context("Failed to deserialize response")?;

        Ok(relations
            .work_item_relations
            .into_iter()
            .map(|relation| IterationItem {
                id: relation.target.id,
                parent_id: relation.source.map(|source| source.id),
            })
            .collect())
    }
}
