use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, HeaderMap, RETRY_AFTER};
use reqwest::{Client as ReqwestClient, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::batch::{ApiSink, BatchUploader, UploadApi};
use crate::error::{Error, ValidationError};
use crate::models::event::{Event, IngestionOptions};
use crate::models::group::GroupIdentification;
use crate::models::identify::Identification;
use crate::models::response::{
    InvalidRequestResponse, PayloadTooLargeResponse, ThrottledResponse, UploadResponse,
};
use crate::retry::RetryPolicy;

pub const US_SERVER_URL: &str = "https://api2.amplitude.com";
pub const EU_SERVER_URL: &str = "https://api.eu.amplitude.com";

/// Amplitude's own minimum for user and device ids, unless overridden.
pub const DEFAULT_MIN_ID_LENGTH: u32 = 5;

const IDENTIFY_PATH: &str = "/identify";
const GROUP_IDENTIFY_PATH: &str = "/groupidentify";
const HTTP_V1_PATH: &str = "/httpapi";
const HTTP_V2_PATH: &str = "/2/httpapi";
const BATCH_PATH: &str = "/batch";

/// The data center a project lives in.
/// Deserializes through [FromStr], so config files and environment
/// variables accept the same spellings.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(try_from = "String")]
pub enum ServerZone {
    #[default]
    #[serde(rename = "US")]
    Us,
    #[serde(rename = "EU")]
    Eu,
}

impl ServerZone {
    pub fn server_url(self) -> &'static str {
        match self {
            ServerZone::Us => US_SERVER_URL,
            ServerZone::Eu => EU_SERVER_URL,
        }
    }
}

impl fmt::Display for ServerZone {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServerZone::Us => write!(f, "US"),
            ServerZone::Eu => write!(f, "EU"),
        }
    }
}

#[derive(Debug, Error)]
#[error("unknown server zone {0:?}, expected US or EU")]
pub struct UnknownServerZone(pub String);

impl FromStr for ServerZone {
    type Err = UnknownServerZone;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "US" => Ok(ServerZone::Us),
            "EU" => Ok(ServerZone::Eu),
            _ => Err(UnknownServerZone(s.to_string())),
        }
    }
}

impl TryFrom<String> for ServerZone {
    type Error = UnknownServerZone;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Clone, Debug)]
pub struct ClientOptions {
    pub server_zone: ServerZone,
    /// Overrides the URL derived from `server_zone`, e.g. for a proxy.
    pub server_url: Option<String>,
    pub timeout: Duration,
    pub retry: RetryPolicy,
    /// Sent as `options.min_id_length` to the V2 and batch APIs.
    pub min_id_length: Option<u32>,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            server_zone: ServerZone::default(),
            server_url: None,
            timeout: Duration::from_secs(10),
            retry: RetryPolicy::default(),
            min_id_length: None,
        }
    }
}

pub struct Client {
    client: ReqwestClient,
    api_key: String,
    server_url: String,
    retry: RetryPolicy,
    min_id_length: Option<u32>,
}

/// A request body, kept around so it can be resent on retries.
enum Body {
    Json(Vec<u8>),
    Form(Vec<(&'static str, String)>),
}

#[derive(Serialize)]
struct UploadRequest<'a> {
    api_key: &'a str,
    events: &'a [Event],
    #[serde(skip_serializing_if = "Option::is_none")]
    options: Option<IngestionOptions>,
}

impl Client {
    /// A client with [ClientOptions::default].
    pub fn new(api_key: impl Into<String>) -> Result<Self, Error> {
        Self::with_options(api_key, ClientOptions::default())
    }

    pub fn with_options(api_key: impl Into<String>, options: ClientOptions) -> Result<Self, Error> {
        let client = ReqwestClient::builder().timeout(options.timeout).build()?;
        let server_url = options
            .server_url
            .unwrap_or_else(|| options.server_zone.server_url().to_string());

        Ok(Self {
            client,
            api_key: api_key.into(),
            server_url: server_url.trim_end_matches('/').to_string(),
            retry: options.retry,
            min_id_length: options.min_id_length,
        })
    }

    pub fn server_url(&self) -> &str {
        &self.server_url
    }

    /// The minimum id length payloads are validated against.
    pub fn min_id_length(&self) -> u32 {
        self.min_id_length.unwrap_or(DEFAULT_MIN_ID_LENGTH)
    }

    pub fn sink(&self, api: UploadApi) -> ApiSink<'_> {
        ApiSink::new(self, api)
    }

    /// Returns an uploader that splits large event lists into requests the
    /// given API accepts.
    pub fn uploader(&self, api: UploadApi) -> BatchUploader<ApiSink<'_>> {
        BatchUploader::new(self.sink(api), api.limits(), self.min_id_length())
    }
}

impl Client {
    /// Updates user properties through the V1 Identify API.
    pub async fn identify(&self, identifications: &[Identification]) -> Result<(), Error> {
        if identifications.is_empty() {
            return Err(ValidationError::EmptyPayload.into());
        }
        let min_id_length = Some(self.min_id_length());
        for (index, identification) in identifications.iter().enumerate() {
            identification
                .validate(min_id_length)
                .map_err(|err| err.at(index))?;
        }

        let payloads = identifications
            .iter()
            .map(Identification::payload)
            .collect::<Result<Vec<_>, _>>()?;
        let body = Body::Form(vec![
            ("api_key", self.api_key.clone()),
            ("identification", serde_json::to_string(&payloads)?),
        ]);

        self.send("identify", IDENTIFY_PATH, &body, identifications.len())
            .await?;
        Ok(())
    }

    /// Updates group properties through the V1 Group Identify API.
    pub async fn group_identify(&self, groups: &[GroupIdentification]) -> Result<(), Error> {
        if groups.is_empty() {
            return Err(ValidationError::EmptyPayload.into());
        }
        for (index, group) in groups.iter().enumerate() {
            group.validate().map_err(|err| err.at(index))?;
        }

        let payloads = groups
            .iter()
            .map(GroupIdentification::payload)
            .collect::<Result<Vec<_>, _>>()?;
        let body = Body::Form(vec![
            ("api_key", self.api_key.clone()),
            ("identification", serde_json::to_string(&payloads)?),
        ]);

        self.send("group_identify", GROUP_IDENTIFY_PATH, &body, groups.len())
            .await?;
        Ok(())
    }

    /// Sends events through the deprecated V1 HTTP API.
    pub async fn track_v1(&self, events: &[Event]) -> Result<(), Error> {
        self.validate_events(events)?;

        let body = Body::Form(vec![
            ("api_key", self.api_key.clone()),
            ("event", serde_json::to_string(events)?),
        ]);

        self.send("track_v1", HTTP_V1_PATH, &body, events.len())
            .await?;
        Ok(())
    }

    /// Sends events through the V2 HTTP API.
    pub async fn track(&self, events: &[Event]) -> Result<UploadResponse, Error> {
        self.upload("track", HTTP_V2_PATH, events).await
    }

    /// Sends events through the Batch Event Upload API, which accepts larger
    /// payloads than the V2 HTTP API.
    pub async fn upload_batch(&self, events: &[Event]) -> Result<UploadResponse, Error> {
        self.upload("upload_batch", BATCH_PATH, events).await
    }

    fn validate_events(&self, events: &[Event]) -> Result<(), ValidationError> {
        if events.is_empty() {
            return Err(ValidationError::EmptyPayload);
        }
        let min_id_length = Some(self.min_id_length());
        for (index, event) in events.iter().enumerate() {
            event.validate(min_id_length).map_err(|err| err.at(index))?;
        }
        Ok(())
    }

    async fn upload(
        &self,
        what: &'static str,
        path: &str,
        events: &[Event],
    ) -> Result<UploadResponse, Error> {
        self.validate_events(events)?;

        let request = UploadRequest {
            api_key: &self.api_key,
            events,
            options: self.min_id_length.map(|min_id_length| IngestionOptions {
                min_id_length: Some(min_id_length),
            }),
        };
        let body = Body::Json(serde_json::to_vec(&request)?);

        let text = self.send(what, path, &body, events.len()).await?;
        serde_json::from_str(&text).map_err(|source| Error::Decode { source, body: text })
    }

    async fn send(
        &self,
        what: &'static str,
        path: &str,
        body: &Body,
        items: usize,
    ) -> Result<String, Error> {
        let url = format!("{}{}", self.server_url, path);
        tracing::debug!(request = what, %url, items, "sending request");

        self.retry.run(what, || self.post_once(&url, body)).await
    }

    async fn post_once(&self, url: &str, body: &Body) -> Result<String, Error> {
        let request_builder = self.client.post(url);
        let request_builder = match body {
            Body::Json(bytes) => request_builder
                .header(CONTENT_TYPE, "application/json")
                .body(bytes.clone()),
            Body::Form(fields) => request_builder.form(fields),
        };

        let response = request_builder.send().await?;

        let status = response.status();
        let retry_after = parse_retry_after(response.headers());
        let text = response.text().await?;

        check_status(status, text, retry_after)
    }
}

fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Maps a response to its body, or to the error its status code stands for.
fn check_status(
    status: StatusCode,
    text: String,
    retry_after: Option<Duration>,
) -> Result<String, Error> {
    match status {
        status if status.is_success() => Ok(text),
        StatusCode::BAD_REQUEST => {
            let response = serde_json::from_str::<InvalidRequestResponse>(&text)
                .unwrap_or_else(|_| InvalidRequestResponse::from_text(status.as_u16(), &text));
            Err(Error::InvalidRequest(Box::new(response)))
        }
        StatusCode::PAYLOAD_TOO_LARGE => {
            let message = match serde_json::from_str::<PayloadTooLargeResponse>(&text) {
                Ok(response) if !response.error.is_empty() => response.error,
                _ => text,
            };
            Err(Error::PayloadTooLarge(message))
        }
        StatusCode::TOO_MANY_REQUESTS => {
            let response = serde_json::from_str::<ThrottledResponse>(&text).unwrap_or_else(|_| {
                ThrottledResponse {
                    code: status.as_u16(),
                    error: text.trim().to_string(),
                    ..Default::default()
                }
            });
            Err(Error::Throttled {
                response: Box::new(response),
                retry_after,
            })
        }
        status if status.is_server_error() => Err(Error::Server {
            status: status.as_u16(),
            body: text,
        }),
        status => Err(Error::UnexpectedStatus {
            status: status.as_u16(),
            body: text,
        }),
    }
}
