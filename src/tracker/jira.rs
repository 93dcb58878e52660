//! Jira Cloud client.
//!
//! Work items and sprints live in Jira Software (platform REST v3 plus the
//! agile API); ideas and roadmap columns live in a Jira Product Discovery
//! project whose column field is a single-select custom field.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};

use sprintline_common::{
    Bucket, BucketDraft, BucketId, BucketState, Field, Idea, ItemKey, ItemKind, ItemStatus,
    LinkType, NewItem, Priority, Swimlane, WorkItem,
};

use super::{ItemFilter, Tracker};
use crate::config::{FieldIds, SprintlineConfig};
use crate::errors::TrackerError;

const SEARCH_PATH: &str = "/rest/api/3/search/jql";

pub struct JiraTracker {
    client: reqwest::Client,
    base_url: String,
    board_id: u64,
    project_key: String,
    idea_project_key: String,
    page_size: u32,
    fields: FieldIds,
    email: String,
    token: String,
}

/// One page of an agile API list.
#[derive(Debug, Deserialize)]
struct AgilePage {
    #[serde(default)]
    values: Vec<Value>,
    #[serde(default = "default_is_last", rename = "isLast")]
    is_last: bool,
}

fn default_is_last() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct SearchPage {
    #[serde(default)]
    issues: Vec<Value>,
    #[serde(default, rename = "nextPageToken")]
    next_page_token: Option<String>,
    #[serde(default = "default_is_last", rename = "isLast")]
    is_last: bool,
}

impl JiraTracker {
    /// Build a client from resolved configuration. Fails when credentials are missing.
    pub fn from_config(config: &SprintlineConfig) -> anyhow::Result<Self> {
        let email = config
            .credentials
            .jira_email
            .clone()
            .context("JIRA_EMAIL is not set")?;
        let token = config
            .credentials
            .jira_api_token
            .clone()
            .context("JIRA_API_TOKEN is not set")?;
        let client = reqwest::Client::builder()
            .timeout(config.tracker_timeout())
            .build()
            .context("Failed to build HTTP client")?;
        let tracker = &config.toml.tracker;
        Ok(Self {
            client,
            base_url: tracker.base_url.trim_end_matches('/').to_string(),
            board_id: tracker.board_id,
            project_key: tracker.project_key.clone(),
            idea_project_key: tracker.idea_project_key.clone(),
            page_size: tracker.page_size.max(1),
            fields: tracker.fields.clone(),
            email,
            token,
        })
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .basic_auth(&self.email, Some(&self.token))
            .header("Accept", "application/json")
    }

    /// Send and classify the response. Empty bodies come back as `Value::Null`.
    async fn send(&self, request: RequestBuilder) -> Result<Value, TrackerError> {
        let response = request.send().await.map_err(classify_transport)?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = retry_after(&response);
            let body = response.text().await.unwrap_or_default();
            return Err(TrackerError::from_status(status.as_u16(), &body, retry_after));
        }
        if status == StatusCode::NO_CONTENT {
            return Ok(Value::Null);
        }
        let text = response.text().await.map_err(classify_transport)?;
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text).map_err(|e| TrackerError::Malformed(e.to_string()))
    }

    async fn get(&self, path: &str, query: &[(&str, String)]) -> Result<Value, TrackerError> {
        self.send(self.request(Method::GET, path).query(query)).await
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Value, TrackerError> {
        self.send(self.request(Method::POST, path).json(body)).await
    }

    async fn put(&self, path: &str, body: &Value) -> Result<Value, TrackerError> {
        self.send(self.request(Method::PUT, path).json(body)).await
    }

    /// Run a JQL search to exhaustion using `nextPageToken` paging.
    async fn search(&self, jql: &str, fields: &str) -> Result<Vec<Value>, TrackerError> {
        let mut issues = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let mut query = vec![
                ("jql", jql.to_string()),
                ("fields", fields.to_string()),
                ("maxResults", self.page_size.to_string()),
            ];
            if let Some(t) = &token {
                query.push(("nextPageToken", t.clone()));
            }
            let page: SearchPage = decode(self.get(SEARCH_PATH, &query).await?)?;
            let got = page.issues.len();
            issues.extend(page.issues);
            match page.next_page_token {
                Some(next) if !page.is_last && got > 0 => token = Some(next),
                _ => break,
            }
        }
        tracing::debug!(jql, count = issues.len(), "Search complete");
        Ok(issues)
    }

    /// Walk an agile API list with `startAt` paging.
    async fn agile_list(
        &self,
        path: &str,
        extra: &[(&str, String)],
    ) -> Result<Vec<Value>, TrackerError> {
        let mut values = Vec::new();
        loop {
            let mut query: Vec<(&str, String)> = extra.to_vec();
            query.push(("startAt", values.len().to_string()));
            query.push(("maxResults", self.page_size.to_string()));
            let page: AgilePage = decode(self.get(path, &query).await?)?;
            let got = page.values.len();
            values.extend(page.values);
            if page.is_last || got == 0 {
                break;
            }
        }
        Ok(values)
    }

    fn item_fields(&self) -> String {
        format!(
            "summary,status,issuetype,priority,parent,assignee,created,updated,{},{}",
            self.fields.story_points, self.fields.sprint
        )
    }

    fn idea_fields(&self) -> String {
        format!(
            "summary,status,updated,issuelinks,{},{},{},{}",
            self.fields.idea_score,
            self.fields.roadmap_column,
            self.fields.classification,
            self.fields.swimlane
        )
    }

    fn options_path(&self) -> String {
        format!(
            "/rest/api/3/field/{}/context/{}/option",
            self.fields.roadmap_column, self.fields.roadmap_column_context
        )
    }

    async fn column_options(&self) -> Result<Vec<(String, String)>, TrackerError> {
        let options = self.agile_list(&self.options_path(), &[]).await?;
        Ok(options
            .iter()
            .filter(|o| !o["disabled"].as_bool().unwrap_or(false))
            .filter_map(|o| {
                let id = value_str(&o["id"])?;
                let label = o["value"].as_str()?;
                Some((id, label.to_string()))
            })
            .collect())
    }
}

fn classify_transport(err: reqwest::Error) -> TrackerError {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        TrackerError::Transient(err.to_string())
    } else {
        TrackerError::Malformed(err.to_string())
    }
}

fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

fn decode<T: serde::de::DeserializeOwned>(value: Value) -> Result<T, TrackerError> {
    serde_json::from_value(value).map_err(|e| TrackerError::Malformed(e.to_string()))
}

/// Ids come back as either strings or numbers depending on the endpoint.
fn value_str(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// JQL for an item filter. `None` when the filter cannot match anything.
pub fn build_jql(filter: &ItemFilter, project_key: &str) -> Option<String> {
    let clause = match filter {
        ItemFilter::InBucket(id) => format!("project = {} AND sprint = {}", project_key, id),
        ItemFilter::Unscheduled { statuses, assignee } => {
            let mut jql = format!(
                "project = {} AND (sprint is EMPTY OR sprint not in (openSprints(), futureSprints()))",
                project_key
            );
            if !statuses.is_empty() {
                let names: Vec<String> = statuses.iter().map(|s| quote(s.name())).collect();
                jql.push_str(&format!(" AND status in ({})", names.join(", ")));
            }
            if let Some(account) = assignee {
                jql.push_str(&format!(" AND assignee = {}", quote(account)));
            }
            jql
        }
        ItemFilter::ChildrenOf(epics) => {
            if epics.is_empty() {
                return None;
            }
            let keys: Vec<&str> = epics.iter().map(|k| k.as_str()).collect();
            format!("parent in ({})", keys.join(", "))
        }
        ItemFilter::Keys(keys) => {
            if keys.is_empty() {
                return None;
            }
            let keys: Vec<&str> = keys.iter().map(|k| k.as_str()).collect();
            format!("key in ({})", keys.join(", "))
        }
    };
    Some(format!("{} ORDER BY rank ASC", clause))
}

/// Jira timestamps look like `2026-01-05T10:00:00.000+1100`.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f%z")
        .or_else(|_| DateTime::parse_from_rfc3339(raw))
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn parse_date(raw: &Value) -> Option<NaiveDate> {
    let s = raw.as_str()?;
    NaiveDate::parse_from_str(s.get(..10)?, "%Y-%m-%d").ok()
}

fn parse_bucket_state(raw: &str) -> BucketState {
    match raw {
        "active" => BucketState::Active,
        "closed" => BucketState::Closed,
        _ => BucketState::Future,
    }
}

pub fn parse_sprint(value: &Value) -> Result<Bucket, TrackerError> {
    let id = value["id"]
        .as_u64()
        .ok_or_else(|| TrackerError::Malformed("sprint without id".into()))?;
    Ok(Bucket {
        id: BucketId(id),
        name: value["name"].as_str().unwrap_or_default().to_string(),
        start: parse_date(&value["startDate"]),
        end: parse_date(&value["endDate"]),
        state: parse_bucket_state(value["state"].as_str().unwrap_or("future")),
    })
}

/// Open sprint the issue sits in, else the last sprint it was in.
fn sprint_of(field: &Value) -> Option<BucketId> {
    let sprints = field.as_array()?;
    let open = sprints
        .iter()
        .find(|s| matches!(s["state"].as_str(), Some("active") | Some("future")));
    open.or_else(|| sprints.last())
        .and_then(|s| s["id"].as_u64())
        .map(BucketId)
}

/// Option fields arrive as `{"value": ..}`; plain strings are accepted too.
fn option_value(field: &Value) -> Option<String> {
    field["value"]
        .as_str()
        .or_else(|| field.as_str())
        .map(str::to_string)
}

pub fn parse_work_item(issue: &Value, fields: &FieldIds) -> Result<WorkItem, TrackerError> {
    let key = issue["key"]
        .as_str()
        .ok_or_else(|| TrackerError::Malformed("issue without key".into()))?;
    let f = &issue["fields"];
    let created = f["created"]
        .as_str()
        .and_then(parse_timestamp)
        .ok_or_else(|| TrackerError::Malformed(format!("{}: missing created timestamp", key)))?;
    Ok(WorkItem {
        key: ItemKey::new(key),
        summary: f["summary"].as_str().unwrap_or_default().to_string(),
        kind: ItemKind::from(f["issuetype"]["name"].as_str().unwrap_or("Task").to_string()),
        status: ItemStatus::from_name(f["status"]["name"].as_str().unwrap_or("Backlog")),
        size: f[fields.story_points.as_str()].as_f64(),
        priority: f["priority"]["name"]
            .as_str()
            .and_then(|p| p.parse::<Priority>().ok()),
        parent: f["parent"]["key"].as_str().map(ItemKey::from),
        bucket: sprint_of(&f[fields.sprint.as_str()]),
        assignee: f["assignee"]["accountId"].as_str().map(str::to_string),
        created,
        updated: f["updated"].as_str().and_then(parse_timestamp),
    })
}

pub fn parse_idea(
    issue: &Value,
    fields: &FieldIds,
    idea_project_key: &str,
) -> Result<Idea, TrackerError> {
    let key = issue["key"]
        .as_str()
        .ok_or_else(|| TrackerError::Malformed("idea without key".into()))?;
    let f = &issue["fields"];
    let swimlane = match option_value(&f[fields.swimlane.as_str()]) {
        Some(v) if v == fields.secondary_swimlane_value => Swimlane::Secondary,
        _ => Swimlane::Primary,
    };

    let idea_prefix = format!("{}-", idea_project_key);
    let mut delivery_epic = None;
    let mut aligned_to = None;
    for link in f["issuelinks"].as_array().into_iter().flatten() {
        let kind = link["type"]["name"].as_str().unwrap_or_default();
        let other = link["outwardIssue"]["key"]
            .as_str()
            .or_else(|| link["inwardIssue"]["key"].as_str());
        let Some(other) = other else { continue };
        let is_idea = other.starts_with(&idea_prefix);
        if kind == fields.delivery_link_type && !is_idea && delivery_epic.is_none() {
            delivery_epic = Some(ItemKey::from(other));
        } else if kind == fields.alignment_link_type
            && is_idea
            && swimlane == Swimlane::Secondary
            && aligned_to.is_none()
        {
            aligned_to = Some(ItemKey::from(other));
        }
    }

    Ok(Idea {
        key: ItemKey::new(key),
        summary: f["summary"].as_str().unwrap_or_default().to_string(),
        score: f[fields.idea_score.as_str()]
            .as_f64()
            .map(|s| (s.round() as i32).clamp(0, 5)),
        swimlane,
        classification: option_value(&f[fields.classification.as_str()]),
        column: option_value(&f[fields.roadmap_column.as_str()]),
        delivery_epic,
        aligned_to,
        status: f["status"]["name"].as_str().map(str::to_string),
        updated: f["updated"].as_str().and_then(parse_timestamp),
    })
}

/// Issue edit payload for one field.
fn field_payload(fields: &FieldIds, field: Field, value: Value) -> Value {
    let (id, value) = match field {
        Field::RoadmapColumn => (fields.roadmap_column.as_str(), wrap_option(value)),
        Field::Classification => (fields.classification.as_str(), wrap_option(value)),
        Field::StoryPoints => (fields.story_points.as_str(), value),
        Field::Summary => ("summary", value),
    };
    let mut edited = serde_json::Map::new();
    edited.insert(id.to_string(), value);
    json!({ "fields": edited })
}

/// Body for the option move endpoint: after `anchor`, or first.
fn move_option_body(id: &str, anchor: Option<&str>) -> Value {
    match anchor {
        Some(anchor) => json!({ "customFieldOptionIds": [id], "after": anchor }),
        None => json!({ "customFieldOptionIds": [id], "position": "First" }),
    }
}

fn wrap_option(value: Value) -> Value {
    match value {
        Value::String(s) => json!({ "value": s }),
        other => other,
    }
}

/// The rank endpoint answers 207 with per-issue errors instead of failing.
fn rank_errors(body: &Value) -> Option<String> {
    let errors: Vec<String> = body["entries"]
        .as_array()?
        .iter()
        .filter(|e| e["status"].as_u64().is_some_and(|s| s >= 400))
        .flat_map(|e| e["errors"].as_array().cloned().unwrap_or_default())
        .filter_map(|e| e.as_str().map(str::to_string))
        .collect();
    (!errors.is_empty()).then(|| errors.join("; "))
}

#[async_trait]
impl Tracker for JiraTracker {
    async fn query_items(&self, filter: &ItemFilter) -> Result<Vec<WorkItem>, TrackerError> {
        let Some(jql) = build_jql(filter, &self.project_key) else {
            return Ok(Vec::new());
        };
        let issues = self.search(&jql, &self.item_fields()).await?;
        let mut items = Vec::with_capacity(issues.len());
        for issue in &issues {
            match parse_work_item(issue, &self.fields) {
                Ok(item) => items.push(item),
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable issue"),
            }
        }
        Ok(items)
    }

    async fn query_ideas(&self) -> Result<Vec<Idea>, TrackerError> {
        let jql = format!("project = {} ORDER BY rank ASC", self.idea_project_key);
        let issues = self.search(&jql, &self.idea_fields()).await?;
        let mut ideas = Vec::with_capacity(issues.len());
        for issue in &issues {
            match parse_idea(issue, &self.fields, &self.idea_project_key) {
                Ok(idea) => ideas.push(idea),
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable idea"),
            }
        }
        Ok(ideas)
    }

    async fn buckets(&self, state: BucketState) -> Result<Vec<Bucket>, TrackerError> {
        let path = format!("/rest/agile/1.0/board/{}/sprint", self.board_id);
        let values = self
            .agile_list(&path, &[("state", state.as_str().to_string())])
            .await?;
        let mut buckets = Vec::with_capacity(values.len());
        for value in &values {
            match parse_sprint(value) {
                Ok(bucket) => buckets.push(bucket),
                Err(e) => tracing::warn!(error = %e, "Skipping unreadable sprint"),
            }
        }
        buckets.sort_by(|a, b| {
            (a.start.is_none(), a.start, a.id).cmp(&(b.start.is_none(), b.start, b.id))
        });
        Ok(buckets)
    }

    async fn create_bucket(&self, draft: &BucketDraft) -> Result<Bucket, TrackerError> {
        let body = json!({
            "name": draft.name,
            "startDate": format!("{}T00:00:00.000Z", draft.start.format("%Y-%m-%d")),
            "endDate": format!("{}T00:00:00.000Z", draft.end.format("%Y-%m-%d")),
            "originBoardId": self.board_id,
        });
        let created = self.post("/rest/agile/1.0/sprint", &body).await?;
        parse_sprint(&created)
    }

    async fn set_bucket_state(&self, id: BucketId, state: BucketState) -> Result<(), TrackerError> {
        let path = format!("/rest/agile/1.0/sprint/{}", id);
        let body = match state {
            // Starting a sprint requires its dates in the same request.
            BucketState::Active => {
                let current = self.get(&path, &[]).await?;
                json!({
                    "state": "active",
                    "startDate": current["startDate"],
                    "endDate": current["endDate"],
                })
            }
            other => json!({ "state": other.as_str() }),
        };
        self.post(&path, &body).await?;
        Ok(())
    }

    async fn move_to_bucket(&self, key: &ItemKey, bucket: BucketId) -> Result<(), TrackerError> {
        let path = format!("/rest/agile/1.0/sprint/{}/issue", bucket);
        self.post(&path, &json!({ "issues": [key.as_str()] })).await?;
        Ok(())
    }

    async fn rank_before(&self, key: &ItemKey, before: &ItemKey) -> Result<(), TrackerError> {
        let body = json!({ "issues": [key.as_str()], "rankBeforeIssue": before.as_str() });
        let response = self.put("/rest/agile/1.0/issue/rank", &body).await?;
        match rank_errors(&response) {
            Some(message) => Err(TrackerError::Rejected {
                status: 207,
                message,
            }),
            None => Ok(()),
        }
    }

    async fn set_field(&self, key: &ItemKey, field: Field, value: Value) -> Result<(), TrackerError> {
        let path = format!("/rest/api/3/issue/{}", key);
        self.put(&path, &field_payload(&self.fields, field, value))
            .await?;
        Ok(())
    }

    async fn transition(&self, key: &ItemKey, status: &str) -> Result<(), TrackerError> {
        let path = format!("/rest/api/3/issue/{}/transitions", key);
        let available = self.get(&path, &[]).await?;
        let wanted = status.to_lowercase();
        let id = available["transitions"]
            .as_array()
            .into_iter()
            .flatten()
            .find(|t| {
                let to = t["to"]["name"].as_str().unwrap_or_default().to_lowercase();
                let name = t["name"].as_str().unwrap_or_default().to_lowercase();
                to == wanted || name == wanted
            })
            .and_then(|t| value_str(&t["id"]))
            .ok_or_else(|| TrackerError::Rejected {
                status: 400,
                message: format!("{} has no transition to '{}'", key, status),
            })?;
        self.post(&path, &json!({ "transition": { "id": id } }))
            .await?;
        Ok(())
    }

    async fn create_item(&self, item: &NewItem) -> Result<ItemKey, TrackerError> {
        let mut fields = json!({
            "project": { "key": self.project_key },
            "summary": item.summary,
            "issuetype": { "name": item.kind.name() },
        });
        if let Some(parent) = &item.parent {
            fields["parent"] = json!({ "key": parent.as_str() });
        }
        if let Some(priority) = item.priority {
            fields["priority"] = json!({ "name": priority.as_str() });
        }
        let created = self
            .post("/rest/api/3/issue", &json!({ "fields": fields }))
            .await?;
        created["key"]
            .as_str()
            .map(ItemKey::from)
            .ok_or_else(|| TrackerError::Malformed("created issue without key".into()))
    }

    async fn create_link(&self, from: &ItemKey, to: &ItemKey, link: LinkType) -> Result<(), TrackerError> {
        let name = match link {
            LinkType::Delivery => &self.fields.delivery_link_type,
            LinkType::Alignment => &self.fields.alignment_link_type,
        };
        let body = json!({
            "type": { "name": name },
            "inwardIssue": { "key": from.as_str() },
            "outwardIssue": { "key": to.as_str() },
        });
        self.post("/rest/api/3/issueLink", &body).await?;
        Ok(())
    }

    async fn roadmap_columns(&self) -> Result<Vec<String>, TrackerError> {
        Ok(self
            .column_options()
            .await?
            .into_iter()
            .map(|(_, label)| label)
            .collect())
    }

    async fn add_roadmap_column(&self, label: &str, after: Option<&str>) -> Result<(), TrackerError> {
        let existing = self.column_options().await?;
        let anchor = match after {
            Some(anchor) => Some(
                existing
                    .iter()
                    .find(|(_, l)| l == anchor)
                    .map(|(id, _)| id.clone())
                    .ok_or_else(|| TrackerError::NotFound {
                        what: format!("Roadmap column '{}'", anchor),
                    })?,
            ),
            None => None,
        };

        let body = json!({ "options": [{ "value": label, "disabled": false }] });
        let created = self.post(&self.options_path(), &body).await?;
        let id = value_str(&created["options"][0]["id"])
            .ok_or_else(|| TrackerError::Malformed("option create returned no id".into()))?;

        // New options land at the tail, which is already right after the last one.
        let is_tail = match (&anchor, existing.last()) {
            (Some(anchor), Some((last, _))) => anchor == last,
            (None, None) => true,
            _ => false,
        };
        if !is_tail {
            let path = format!("{}/move", self.options_path());
            self.put(&path, &move_option_body(&id, anchor.as_deref())).await?;
        }
        Ok(())
    }

    async fn retire_roadmap_column(&self, label: &str) -> Result<(), TrackerError> {
        let options = self.column_options().await?;
        let Some((id, _)) = options.iter().find(|(_, l)| l == label) else {
            return Err(TrackerError::NotFound {
                what: format!("Roadmap column '{}'", label),
            });
        };
        let path = format!("{}/{}", self.options_path(), id);
        self.send(self.request(Method::DELETE, &path)).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields() -> FieldIds {
        crate::config::TrackerSection::default().fields
    }

    #[test]
    fn unscheduled_jql_excludes_open_and_future_sprints() {
        let jql = build_jql(
            &ItemFilter::Unscheduled {
                statuses: vec![ItemStatus::Ready],
                assignee: Some("abc123".into()),
            },
            "AX",
        )
        .unwrap();
        assert_eq!(
            jql,
            "project = AX AND (sprint is EMPTY OR sprint not in (openSprints(), futureSprints())) \
             AND status in (\"Ready\") AND assignee = \"abc123\" ORDER BY rank ASC"
        );
    }

    #[test]
    fn bucket_and_children_jql() {
        assert_eq!(
            build_jql(&ItemFilter::InBucket(BucketId(42)), "AX").unwrap(),
            "project = AX AND sprint = 42 ORDER BY rank ASC"
        );
        assert_eq!(
            build_jql(
                &ItemFilter::ChildrenOf(vec![ItemKey::from("AX-1"), ItemKey::from("AX-2")]),
                "AX"
            )
            .unwrap(),
            "parent in (AX-1, AX-2) ORDER BY rank ASC"
        );
        assert!(build_jql(&ItemFilter::ChildrenOf(vec![]), "AX").is_none());
    }

    #[test]
    fn parses_jira_timestamps() {
        let ts = parse_timestamp("2026-01-05T10:00:00.000+1100").unwrap();
        assert_eq!(ts.to_rfc3339(), "2026-01-04T23:00:00+00:00");
        assert!(parse_timestamp("2026-01-05T10:00:00Z").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn work_item_prefers_open_sprint() {
        let issue = json!({
            "key": "AX-12",
            "fields": {
                "summary": "Checkout retries",
                "issuetype": { "name": "Task" },
                "status": { "name": "Ready" },
                "priority": { "name": "High" },
                "parent": { "key": "AX-3" },
                "created": "2026-01-05T10:00:00.000+0000",
                "customfield_10016": 5.0,
                "customfield_10020": [
                    { "id": 7, "state": "closed" },
                    { "id": 9, "state": "future" }
                ]
            }
        });
        let item = parse_work_item(&issue, &fields()).unwrap();
        assert_eq!(item.bucket, Some(BucketId(9)));
        assert_eq!(item.size, Some(5.0));
        assert_eq!(item.priority, Some(Priority::High));
        assert_eq!(item.parent, Some(ItemKey::from("AX-3")));
        assert_eq!(item.status, ItemStatus::Ready);
    }

    #[test]
    fn work_item_without_created_is_malformed() {
        let issue = json!({ "key": "AX-1", "fields": { "summary": "x" } });
        assert!(matches!(
            parse_work_item(&issue, &fields()),
            Err(TrackerError::Malformed(_))
        ));
    }

    #[test]
    fn idea_reads_swimlane_column_and_links() {
        let issue = json!({
            "key": "RM-4",
            "fields": {
                "summary": "Faster checkout please",
                "status": { "name": "Parking lot" },
                "customfield_10150": 4.0,
                "customfield_10151": { "value": "27 Oct 2026" },
                "customfield_10152": { "value": "Growth" },
                "customfield_10153": { "value": "Feedback" },
                "issuelinks": [
                    { "type": { "name": "Relates" }, "outwardIssue": { "key": "RM-1" } },
                    { "type": { "name": "Polaris work item link" }, "outwardIssue": { "key": "AX-3" } }
                ]
            }
        });
        let idea = parse_idea(&issue, &fields(), "RM").unwrap();
        assert_eq!(idea.swimlane, Swimlane::Secondary);
        assert_eq!(idea.score, Some(4));
        assert_eq!(idea.column.as_deref(), Some("27 Oct 2026"));
        assert_eq!(idea.classification.as_deref(), Some("Growth"));
        assert_eq!(idea.aligned_to, Some(ItemKey::from("RM-1")));
        assert_eq!(idea.delivery_epic, Some(ItemKey::from("AX-3")));
    }

    #[test]
    fn idea_score_is_clamped_to_rating_scale() {
        let score_of = |raw: Value| {
            let issue = json!({ "key": "RM-5", "fields": { "customfield_10150": raw } });
            parse_idea(&issue, &fields(), "RM").unwrap().score
        };
        assert_eq!(score_of(json!(7.0)), Some(5));
        assert_eq!(score_of(json!(-2.0)), Some(0));
        assert_eq!(score_of(json!(3.4)), Some(3));
        assert_eq!(score_of(Value::Null), None);
    }

    #[test]
    fn move_body_anchors_after_predecessor_or_first() {
        assert_eq!(
            move_option_body("10071", Some("10070")),
            json!({ "customFieldOptionIds": ["10071"], "after": "10070" })
        );
        assert_eq!(
            move_option_body("10071", None),
            json!({ "customFieldOptionIds": ["10071"], "position": "First" })
        );
    }

    #[test]
    fn sprint_dates_parse_from_agile_payload() {
        let sprint = parse_sprint(&json!({
            "id": 31,
            "name": "20/10/2026 - 02/11/2026",
            "state": "future",
            "startDate": "2026-10-20T00:00:00.000Z",
            "endDate": "2026-11-02T00:00:00.000Z"
        }))
        .unwrap();
        assert_eq!(sprint.id, BucketId(31));
        assert_eq!(sprint.start, NaiveDate::from_ymd_opt(2026, 10, 20));
        assert_eq!(sprint.state, BucketState::Future);
    }

    #[test]
    fn column_payload_wraps_option_and_clears_with_null() {
        let set = field_payload(&fields(), Field::RoadmapColumn, Value::from("27 Oct 2026"));
        assert_eq!(set["fields"]["customfield_10151"]["value"], "27 Oct 2026");
        let clear = field_payload(&fields(), Field::RoadmapColumn, Value::Null);
        assert!(clear["fields"]["customfield_10151"].is_null());
    }

    #[test]
    fn rank_multi_status_errors_are_reported() {
        let body = json!({ "entries": [
            { "issueId": 1, "status": 200 },
            { "issueId": 2, "status": 400, "errors": ["Cannot rank"] }
        ]});
        assert_eq!(rank_errors(&body).as_deref(), Some("Cannot rank"));
        assert!(rank_errors(&Value::Null).is_none());
    }
}
