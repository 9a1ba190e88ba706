use std::time::Duration;

use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::types::{Checklist, ChecklistId, Credential, Item, ItemId, ItemStatus};

use super::{ChecklistRemote, ItemUpdate, RemoteError};

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:5000";
const MAX_ERROR_BODY_CHARS: usize = 200;

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    pub base_url: String,
    pub request_timeout: Duration,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            request_timeout: Duration::from_secs(5),
        }
    }
}

/// JSON-over-HTTP client for the checklist service.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemote {
    pub fn new(config: RemoteConfig) -> Result<Self, RemoteError> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|err| RemoteError::Unavailable(format!("failed to build HTTP client: {err}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn request(&self, method: Method, path: &str, credential: &Credential) -> RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(credential.token())
    }

    async fn send(&self, builder: RequestBuilder) -> Result<Response, RemoteError> {
        let response = builder.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
            return Err(RemoteError::Unauthorized);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(RemoteError::Http {
                status: status.as_u16(),
                message: truncate_body(&body),
            });
        }
        Ok(response)
    }

    async fn send_json(&self, builder: RequestBuilder) -> Result<Value, RemoteError> {
        let response = self.send(builder).await?;
        let body = response.text().await.map_err(map_transport_error)?;
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body).map_err(|err| RemoteError::Decode(err.to_string()))
    }
}

impl ChecklistRemote for HttpRemote {
    async fn fetch_checklists(&self, credential: &Credential) -> Result<Vec<Checklist>, RemoteError> {
        let body = self
            .send_json(self.request(Method::GET, "/checklists", credential))
            .await?;
        let checklists = parse_checklists(body)?;
        debug!(count = checklists.len(), "fetched checklists");
        Ok(checklists)
    }

    async fn create_checklist(
        &self,
        credential: &Credential,
        name: &str,
    ) -> Result<ChecklistId, RemoteError> {
        let body = self
            .send_json(
                self.request(Method::POST, "/checklists", credential)
                    .json(&json!({ "checklist_name": name })),
            )
            .await?;
        created_id(&body, "checklist_id").map(ChecklistId::from)
    }

    async fn rename_checklist(
        &self,
        credential: &Credential,
        id: &ChecklistId,
        name: &str,
    ) -> Result<(), RemoteError> {
        self.send(
            self.request(Method::PUT, "/checklists", credential)
                .json(&json!({ "checklist_id": wire_id(id.as_str()), "checklist_name": name })),
        )
        .await
        .map(|_| ())
    }

    async fn delete_checklist(
        &self,
        credential: &Credential,
        id: &ChecklistId,
    ) -> Result<(), RemoteError> {
        self.send(
            self.request(Method::DELETE, "/checklists", credential)
                .json(&json!({ "checklist_id": wire_id(id.as_str()) })),
        )
        .await
        .map(|_| ())
    }

    async fn create_item(
        &self,
        credential: &Credential,
        name: &str,
        status: ItemStatus,
        checklist_id: &ChecklistId,
    ) -> Result<ItemId, RemoteError> {
        let body = self
            .send_json(self.request(Method::POST, "/items", credential).json(&json!({
                "item_name": name,
                "item_status": status.as_str(),
                "checklist_id": wire_id(checklist_id.as_str()),
            })))
            .await?;
        created_id(&body, "item_id").map(ItemId::from)
    }

    async fn update_item(
        &self,
        credential: &Credential,
        item_id: &ItemId,
        update: &ItemUpdate,
    ) -> Result<(), RemoteError> {
        self.send(self.request(Method::PUT, "/items", credential).json(&json!({
            "item_id": wire_id(item_id.as_str()),
            "item_name": update.name,
            "item_status": update.status.as_str(),
        })))
        .await
        .map(|_| ())
    }

    async fn delete_item(&self, credential: &Credential, item_id: &ItemId) -> Result<(), RemoteError> {
        self.send(
            self.request(Method::DELETE, "/items", credential)
                .json(&json!({ "item_id": wire_id(item_id.as_str()) })),
        )
        .await
        .map(|_| ())
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WireId {
    Int(i64),
    Text(String),
}

impl WireId {
    fn into_string(self) -> String {
        match self {
            WireId::Int(value) => value.to_string(),
            WireId::Text(value) => value,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WireChecklist {
    #[serde(default)]
    id: Option<WireId>,
    #[serde(default)]
    checklist_id: Option<WireId>,
    #[serde(default)]
    checklist_name: String,
    #[serde(default)]
    list_items: Vec<WireItem>,
}

#[derive(Debug, Deserialize)]
struct WireItem {
    #[serde(default)]
    id: Option<WireId>,
    #[serde(default)]
    item_id: Option<WireId>,
    #[serde(default)]
    item_name: String,
    #[serde(default)]
    item_status: Option<String>,
}

fn parse_checklists(body: Value) -> Result<Vec<Checklist>, RemoteError> {
    if body.is_null() {
        return Ok(Vec::new());
    }
    let wire: Vec<WireChecklist> =
        serde_json::from_value(body).map_err(|err| RemoteError::Decode(err.to_string()))?;

    wire.into_iter()
        .map(|checklist| {
            let id = checklist
                .id
                .or(checklist.checklist_id)
                .ok_or_else(|| RemoteError::Decode("checklist without an id".to_string()))?;
            let items = checklist
                .list_items
                .into_iter()
                .map(parse_item)
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Checklist::new(id.into_string(), checklist.checklist_name).with_items(items))
        })
        .collect()
}

fn parse_item(item: WireItem) -> Result<Item, RemoteError> {
    let id = item
        .id
        .or(item.item_id)
        .ok_or_else(|| RemoteError::Decode("item without an id".to_string()))?
        .into_string();
    let status = match item.item_status.as_deref() {
        None => ItemStatus::NotReady,
        Some(raw) => raw.parse().unwrap_or_else(|()| {
            warn!(item_id = %id, status = raw, "unknown item status; treating as not ready");
            ItemStatus::NotReady
        }),
    };
    Ok(Item::new(id, item.item_name).with_status(status))
}

/// Reads the id of a freshly created record, preferring `id` over the
/// record-specific key.
fn created_id(body: &Value, specific_key: &str) -> Result<String, RemoteError> {
    [body.get("id"), body.get(specific_key)]
        .into_iter()
        .flatten()
        .find_map(|value| match value {
            Value::String(raw) if !raw.trim().is_empty() => Some(raw.clone()),
            Value::Number(number) => Some(number.to_string()),
            _ => None,
        })
        .ok_or_else(|| RemoteError::Decode(format!("response is missing `id`/`{specific_key}`")))
}

/// Integral ids go back on the wire as numbers, anything else as a string.
fn wire_id(raw: &str) -> Value {
    raw.parse::<i64>()
        .map(Value::from)
        .unwrap_or_else(|_| Value::from(raw))
}

fn map_transport_error(err: reqwest::Error) -> RemoteError {
    if err.is_decode() {
        RemoteError::Decode(err.to_string())
    } else {
        RemoteError::Unavailable(err.to_string())
    }
}

fn truncate_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.chars().count() <= MAX_ERROR_BODY_CHARS {
        return trimmed.to_string();
    }
    let mut truncated: String = trimmed.chars().take(MAX_ERROR_BODY_CHARS).collect();
    truncated.push('…');
    truncated
}
