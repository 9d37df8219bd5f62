use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use reqwest::StatusCode;
use reqwest::blocking::{Client, RequestBuilder, multipart};
use serde::Deserialize;
use serde_json::{Value, json};

use crate::config::MigrationConfig;
use crate::error::MigrationError;

const SPACE_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Space {
    pub id: String,
    pub key: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteContent {
    pub id: String,
    pub title: String,
    pub body: String,
}

pub trait ContentApi {
    fn find_space(&mut self, name: &str) -> Result<Option<Space>>;
    fn get_content(&mut self, id: &str) -> Result<RemoteContent>;
    fn get_version(&mut self, id: &str) -> Result<u64>;
    fn create_page(
        &mut self,
        space_key: &str,
        title: &str,
        body: &str,
        parent_id: Option<&str>,
    ) -> Result<String>;
    fn update_page(
        &mut self,
        space_key: &str,
        id: &str,
        title: &str,
        body: &str,
        version: u64,
    ) -> Result<()>;
    fn create_attachment(&mut self, page_id: &str, file: &Path) -> Result<String>;
    fn request_count(&self) -> usize;
}

#[derive(Debug, Clone)]
pub struct ConfluenceClientConfig {
    pub api_url: String,
    pub email: String,
    pub password: String,
    pub user_agent: String,
    pub timeout_ms: u64,
}

impl ConfluenceClientConfig {
    pub fn from_config(config: &MigrationConfig) -> Result<Self> {
        let destination = config.destination_settings();
        let Some(api_url) = destination.api_url else {
            bail!("destination API url is not configured (set CONFLUENCE_API or [destination].api_url)");
        };
        Ok(Self {
            api_url,
            email: env_value("CONFLUENCE_EMAIL"),
            password: env_value("CONFLUENCE_PASSWORD"),
            user_agent: destination.user_agent,
            timeout_ms: destination.timeout_ms,
        })
    }
}

pub struct ConfluenceClient {
    client: Client,
    config: ConfluenceClientConfig,
    request_count: usize,
}

impl ConfluenceClient {
    pub fn from_config(config: &MigrationConfig) -> Result<Self> {
        Self::new(ConfluenceClientConfig::from_config(config)?)
    }

    pub fn new(config: ConfluenceClientConfig) -> Result<Self> {
        if config.email.is_empty() || config.password.is_empty() {
            bail!("CONFLUENCE_EMAIL and CONFLUENCE_PASSWORD must be set");
        }
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .context("failed to build Confluence HTTP client")?;
        Ok(Self {
            client,
            config,
            request_count: 0,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.api_url, path.trim_start_matches('/'))
    }

    fn send(&mut self, operation: &str, request: RequestBuilder) -> Result<Value> {
        self.request_count += 1;
        let response = request
            .basic_auth(&self.config.email, Some(&self.config.password))
            .header("Accept", "application/json")
            .header("User-Agent", self.config.user_agent.clone())
            .send()
            .with_context(|| format!("failed to call Confluence API ({operation})"))?;

        let status = response.status();
        let text = response
            .text()
            .with_context(|| format!("failed to read Confluence response ({operation})"))?;
        if !status.is_success() {
            return Err(remote_call_error(operation, status, &text).into());
        }
        if text.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&text)
            .with_context(|| format!("failed to decode Confluence JSON response ({operation})"))
    }
}

impl ContentApi for ConfluenceClient {
    fn find_space(&mut self, name: &str) -> Result<Option<Space>> {
        let mut start = 0usize;
        loop {
            let request = self.client.get(self.url("space")).query(&[
                ("start", start.to_string()),
                ("limit", SPACE_PAGE_SIZE.to_string()),
            ]);
            let payload = self.send("get spaces", request)?;
            let parsed: SpaceListResponse =
                serde_json::from_value(payload).context("failed to decode space list")?;
            let fetched = parsed.results.len();
            if let Some(space) = parsed
                .results
                .into_iter()
                .find(|space| space.name == name || space.key == name)
            {
                return Ok(Some(Space {
                    id: id_string(&space.id),
                    key: space.key,
                    name: space.name,
                }));
            }
            if fetched < SPACE_PAGE_SIZE {
                return Ok(None);
            }
            start += fetched;
        }
    }

    fn get_content(&mut self, id: &str) -> Result<RemoteContent> {
        let request = self
            .client
            .get(self.url(&format!("content/{id}")))
            .query(&[("expand", "body.storage")]);
        let payload = self.send("get content", request)?;
        let parsed: ContentResponse =
            serde_json::from_value(payload).context("failed to decode content response")?;
        Ok(RemoteContent {
            id: id_string(&parsed.id),
            title: parsed.title,
            body: parsed
                .body
                .and_then(|body| body.storage)
                .map(|storage| storage.value)
                .unwrap_or_default(),
        })
    }

    fn get_version(&mut self, id: &str) -> Result<u64> {
        let request = self
            .client
            .get(self.url(&format!("content/{id}")))
            .query(&[("expand", "version")]);
        let payload = self.send("get version", request)?;
        let parsed: ContentResponse =
            serde_json::from_value(payload).context("failed to decode version response")?;
        parsed
            .version
            .map(|version| version.number)
            .ok_or_else(|| anyhow::anyhow!("content {id} has no version"))
    }

    fn create_page(
        &mut self,
        space_key: &str,
        title: &str,
        body: &str,
        parent_id: Option<&str>,
    ) -> Result<String> {
        let mut payload = json!({
            "type": "page",
            "title": title,
            "space": { "key": space_key },
            "body": { "storage": { "value": body, "representation": "storage" } },
        });
        if let Some(parent_id) = parent_id {
            payload["ancestors"] = json!([{ "id": parent_id }]);
        }
        let request = self.client.post(self.url("content")).json(&payload);
        let response = self.send("create page", request)?;
        let parsed: ContentResponse =
            serde_json::from_value(response).context("failed to decode create page response")?;
        Ok(id_string(&parsed.id))
    }

    fn update_page(
        &mut self,
        space_key: &str,
        id: &str,
        title: &str,
        body: &str,
        version: u64,
    ) -> Result<()> {
        let payload = json!({
            "id": id,
            "type": "page",
            "title": title,
            "space": { "key": space_key },
            "body": { "storage": { "value": body, "representation": "storage" } },
            "version": { "number": version },
        });
        let request = self
            .client
            .put(self.url(&format!("content/{id}")))
            .json(&payload);
        self.send("update page", request)?;
        Ok(())
    }

    fn create_attachment(&mut self, page_id: &str, file: &Path) -> Result<String> {
        let form = multipart::Form::new()
            .file("file", file)
            .with_context(|| format!("failed to read {}", file.display()))?;
        let request = self
            .client
            .post(self.url(&format!("content/{page_id}/child/attachment")))
            .header("X-Atlassian-Token", "nocheck")
            .multipart(form);
        let response = self.send("create attachment", request)?;
        let parsed: AttachmentResponse = serde_json::from_value(response)
            .context("failed to decode create attachment response")?;
        parsed
            .results
            .first()
            .map(|attachment| id_string(&attachment.id))
            .ok_or_else(|| anyhow::anyhow!("attachment response for page {page_id} is empty"))
    }

    fn request_count(&self) -> usize {
        self.request_count
    }
}

pub fn remote_call_error(operation: &str, status: StatusCode, body: &str) -> MigrationError {
    let parsed = serde_json::from_str::<ErrorResponse>(body).ok();
    let message = match parsed {
        Some(ErrorResponse {
            status_code,
            message: Some(message),
        }) => format!("HTTP {}: {message}", status_code.unwrap_or(status.as_u16())),
        _ => format!("HTTP {status}"),
    };
    MigrationError::RemoteCall {
        operation: operation.to_string(),
        message,
    }
}

fn env_value(key: &str) -> String {
    env::var(key).unwrap_or_default()
}

fn id_string(value: &Value) -> String {
    match value {
        Value::String(id) => id.clone(),
        Value::Number(id) => id.to_string(),
        _ => String::new(),
    }
}

#[derive(Debug, Deserialize)]
struct SpaceListResponse {
    #[serde(default)]
    results: Vec<SpacePayload>,
}

#[derive(Debug, Deserialize)]
struct SpacePayload {
    #[serde(default)]
    id: Value,
    key: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct ContentResponse {
    #[serde(default)]
    id: Value,
    #[serde(default)]
    title: String,
    body: Option<BodyPayload>,
    version: Option<VersionPayload>,
}

#[derive(Debug, Deserialize)]
struct BodyPayload {
    storage: Option<StoragePayload>,
}

#[derive(Debug, Deserialize)]
struct StoragePayload {
    value: String,
}

#[derive(Debug, Deserialize)]
struct VersionPayload {
    number: u64,
}

#[derive(Debug, Deserialize)]
struct AttachmentResponse {
    #[serde(default)]
    results: Vec<AttachmentPayload>,
}

#[derive(Debug, Deserialize)]
struct AttachmentPayload {
    #[serde(default)]
    id: Value,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ErrorResponse {
    status_code: Option<u16>,
    message: Option<String>,
}
