//! Notion adapter: the task database behind the `TaskStore` port.
//!
//! Each session owns its own [`NotionClient`] (built by [`NotionClientFactory`]), so
//! connection pools are never shared across users.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::{Method, StatusCode};
use serde_json::{json, Map, Value};

use ntb_core::{
    config::Config,
    domain::{TaskId, UserId},
    tasks::{
        ClientFactory, NewTask, StoreError, StoreResult, TaskFilter, TaskPatch, TaskQuery,
        TaskRecord, TaskStatus, TaskStore,
    },
};

pub mod schema {
    //! Property names in the task database.
    pub const TITLE: &str = "Name";
    pub const STATUS: &str = "Status";
    pub const ASSIGNEE: &str = "Assignee";
    pub const PRIORITY: &str = "Priority";
    pub const DUE: &str = "Due";
    pub const TAGS: &str = "Tags";
}

#[derive(Clone, Debug)]
pub struct NotionConfig {
    pub api_url: String,
    pub token: String,
    pub database_id: String,
    pub version: String,
    pub timeout: Duration,
}

impl NotionConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            api_url: cfg.notion_api_url.clone(),
            token: cfg.notion_token.clone(),
            database_id: cfg.database_id.clone(),
            version: cfg.notion_version.clone(),
            timeout: cfg.notion_timeout,
        }
    }
}

#[derive(Clone, Debug)]
pub struct NotionClient {
    cfg: NotionConfig,
    http: reqwest::Client,
}

impl NotionClient {
    pub fn new(cfg: NotionConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(cfg.timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "notion http client build failed; using defaults");
                reqwest::Client::new()
            });
        Self { cfg, http }
    }

    async fn call(&self, method: Method, path: &str, body: Value) -> StoreResult<Value> {
        let url = format!("{}/{}", self.cfg.api_url, path.trim_start_matches('/'));
        let resp = self
            .http
            .request(method, &url)
            .bearer_auth(&self.cfg.token)
            .header("Notion-Version", &self.cfg.version)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(map_status_error(status, &body));
        }

        resp.json::<Value>()
            .await
            .map_err(|e| StoreError::Permanent(format!("notion json error: {e}")))
    }
}

#[async_trait]
impl TaskStore for NotionClient {
    async fn query(&self, query: &TaskQuery) -> StoreResult<Vec<TaskRecord>> {
        let path = format!("databases/{}/query", self.cfg.database_id);
        let v = self.call(Method::POST, &path, query_body(query)).await?;

        let results = v
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        Ok(results.iter().filter_map(parse_page).collect())
    }

    async fn create(&self, task: &NewTask) -> StoreResult<TaskRecord> {
        let body = create_body(&self.cfg.database_id, task);
        let v = self.call(Method::POST, "pages", body).await?;
        parse_page(&v).ok_or_else(|| StoreError::Permanent("notion returned no page".to_string()))
    }

    async fn update(&self, id: &TaskId, patch: &TaskPatch) -> StoreResult<TaskRecord> {
        let path = format!("pages/{}", id.0);
        let v = self.call(Method::PATCH, &path, update_body(patch)).await?;
        parse_page(&v).ok_or_else(|| StoreError::Permanent("notion returned no page".to_string()))
    }
}

/// Builds one independent [`NotionClient`] per session.
#[derive(Clone, Debug)]
pub struct NotionClientFactory {
    cfg: NotionConfig,
}

impl NotionClientFactory {
    pub fn new(cfg: NotionConfig) -> Self {
        Self { cfg }
    }
}

impl ClientFactory for NotionClientFactory {
    fn connect(&self, user_id: UserId) -> Arc<dyn TaskStore> {
        tracing::debug!(user_id = user_id.0, "opening notion client");
        Arc::new(NotionClient::new(self.cfg.clone()))
    }
}

// ============== Errors ==============

fn map_transport_error(e: reqwest::Error) -> StoreError {
    if e.is_timeout() || e.is_connect() || e.is_request() {
        StoreError::Transient(format!("notion request error: {e}"))
    } else {
        StoreError::Permanent(format!("notion request error: {e}"))
    }
}

fn map_status_error(status: StatusCode, body: &str) -> StoreError {
    let code = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v.get("code").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| "unknown".to_string());
    let detail = format!(
        "notion {status} ({code}): {}",
        body.chars().take(200).collect::<String>()
    );

    if status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::CONFLICT
        || status.is_server_error()
    {
        StoreError::Transient(detail)
    } else {
        StoreError::Permanent(detail)
    }
}

// ============== Request bodies ==============

fn query_body(query: &TaskQuery) -> Value {
    let mut body = json!({
        "page_size": query.page_limit,
        "sorts": [{ "timestamp": "created_time", "direction": "descending" }],
    });
    if let Some(filter) = filter_json(&query.filter) {
        body["filter"] = filter;
    }
    body
}

fn filter_json(filter: &TaskFilter) -> Option<Value> {
    let mut clauses = Vec::new();
    if let Some(status) = &filter.status {
        clauses.push(json!({
            "property": schema::STATUS,
            "status": { "equals": status.notion_name() },
        }));
    }
    if let Some(assignee) = &filter.assignee_id {
        clauses.push(json!({
            "property": schema::ASSIGNEE,
            "people": { "contains": assignee },
        }));
    }

    match clauses.len() {
        0 => None,
        1 => clauses.pop(),
        _ => Some(json!({ "and": clauses })),
    }
}

fn create_body(database_id: &str, task: &NewTask) -> Value {
    let mut props = Map::new();
    props.insert(schema::TITLE.to_string(), title_prop(&task.title));
    if let Some(assignee) = &task.assignee_id {
        props.insert(
            schema::ASSIGNEE.to_string(),
            json!({ "people": [{ "id": assignee }] }),
        );
    }
    if let Some(status) = &task.status {
        props.insert(schema::STATUS.to_string(), status_prop(status));
    }
    if let Some(priority) = &task.priority {
        props.insert(schema::PRIORITY.to_string(), select_prop(priority));
    }
    if let Some(due) = task.due {
        props.insert(schema::DUE.to_string(), date_prop(due));
    }
    if !task.tags.is_empty() {
        let tags: Vec<Value> = task.tags.iter().map(|t| json!({ "name": t })).collect();
        props.insert(schema::TAGS.to_string(), json!({ "multi_select": tags }));
    }

    json!({
        "parent": { "database_id": database_id },
        "properties": props,
    })
}

fn update_body(patch: &TaskPatch) -> Value {
    let mut props = Map::new();
    if let Some(title) = &patch.title {
        props.insert(schema::TITLE.to_string(), title_prop(title));
    }
    if let Some(status) = &patch.status {
        props.insert(schema::STATUS.to_string(), status_prop(status));
    }
    if let Some(priority) = &patch.priority {
        props.insert(schema::PRIORITY.to_string(), select_prop(priority));
    }
    if let Some(due) = patch.due {
        props.insert(schema::DUE.to_string(), date_prop(due));
    }
    json!({ "properties": props })
}

fn title_prop(text: &str) -> Value {
    json!({ "title": [{ "text": { "content": text } }] })
}

fn status_prop(status: &TaskStatus) -> Value {
    json!({ "status": { "name": status.notion_name() } })
}

fn select_prop(name: &str) -> Value {
    json!({ "select": { "name": name } })
}

fn date_prop(date: NaiveDate) -> Value {
    json!({ "date": { "start": date.format("%Y-%m-%d").to_string() } })
}

// ============== Response parsing ==============

/// Map a Notion page object to a task. Pages without an id are skipped.
fn parse_page(page: &Value) -> Option<TaskRecord> {
    let id = page.get("id").and_then(Value::as_str)?.to_string();
    let props = page.get("properties").and_then(Value::as_object);

    // The title property may be renamed in the database; it is the only one of type `title`.
    let title = props
        .and_then(|p| {
            p.values()
                .find(|v| v.get("type").and_then(Value::as_str) == Some("title"))
        })
        .and_then(|v| v.get("title"))
        .map(rich_text_plain)
        .unwrap_or_default();

    let prop = |name: &str| props.and_then(|p| p.get(name));

    let status = prop(schema::STATUS)
        .and_then(|v| v.get("status").or_else(|| v.get("select")))
        .and_then(|s| s.get("name"))
        .and_then(Value::as_str)
        .map(TaskStatus::from_notion_name);

    let priority = prop(schema::PRIORITY)
        .and_then(|v| v.get("select"))
        .and_then(|s| s.get("name"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let assignees = prop(schema::ASSIGNEE)
        .and_then(|v| v.get("people"))
        .and_then(Value::as_array)
        .map(|people| {
            people
                .iter()
                .filter_map(|p| {
                    p.get("name")
                        .and_then(Value::as_str)
                        .or_else(|| p.get("id").and_then(Value::as_str))
                        .map(str::to_string)
                })
                .collect()
        })
        .unwrap_or_default();

    let due = prop(schema::DUE)
        .and_then(|v| v.get("date"))
        .and_then(|d| d.get("start"))
        .and_then(Value::as_str)
        .and_then(|s| NaiveDate::parse_from_str(s.get(..10)?, "%Y-%m-%d").ok());

    let tags = prop(schema::TAGS)
        .and_then(|v| v.get("multi_select"))
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|t| t.get("name").and_then(Value::as_str).map(str::to_string))
                .collect()
        })
        .unwrap_or_default();

    let url = page.get("url").and_then(Value::as_str).map(str::to_string);

    Some(TaskRecord {
        id: TaskId(id),
        title,
        status,
        priority,
        assignees,
        due,
        tags,
        url,
    })
}

fn rich_text_plain(v: &Value) -> String {
    v.as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| {
                    p.get("plain_text")
                        .or_else(|| p.get("text").and_then(|t| t.get("content")))
                        .and_then(Value::as_str)
                })
                .collect::<String>()
        })
        .unwrap_or_default()
}
