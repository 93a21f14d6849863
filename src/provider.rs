//! Client for the external content-moderation provider.
//!
//! The provider runs one job per live stream. It samples frames from the
//! stream's play URL, saves them into our bucket and posts anything it flags
//! back to our callback URL.

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;
use tracing::{debug, error};
use url::Url;
use uuid::Uuid;

use crate::{
    Client,
    config::ProviderConfig,
    error::CensorError,
    models::{LiveStream, ModerationConfig},
};

const CREATE_PATH: &str = "v3/live/censor/create";
const CLOSE_PATH: &str = "v3/live/censor/close";
const LIST_PATH: &str = "v3/live/censor/list";
const QUERY_PATH: &str = "v3/live/censor/query";

/// Request id header understood by the provider.
const REQUEST_ID_HEADER: &str = "X-Reqid";

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("failed to reach moderation provider: {0}")]
    Transport(#[from] reqwest_middleware::Error),
    #[error("failed to decode provider response: {0}")]
    Decode(#[from] reqwest::Error),
    #[error("invalid provider url: {0}")]
    Url(#[from] url::ParseError),
    #[error("provider responded with {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("provider rejected request (code {code}): {message}")]
    Rejected { code: i64, message: String },
    #[error("provider response is missing its data payload")]
    MissingData,
    #[error("refusing to send invalid request: {0}")]
    InvalidRequest(String),
}

/// The provider's job identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    #[serde(rename = "job")]
    pub job_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobData {
    pub id: String,
    pub uri: String,
    pub info: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSaver {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<i64>,
    pub bucket: String,
    pub prefix: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageParams {
    pub is_on: bool,
    pub scenes: Vec<String>,
    pub interval_msecs: i64,
    pub saver: ImageSaver,
    pub hook_rule: i32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobParams {
    pub image: ImageParams,
    pub hook_url: String,
    pub hook_auth: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobCreateRequest {
    pub data: JobData,
    pub params: JobParams,
}

/// Common response envelope. `code == 0` denotes success.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    request_id: String,
    code: i64,
    #[serde(default)]
    message: String,
    data: Option<T>,
}

impl<T> Envelope<T> {
    fn check(self) -> Result<Option<T>, ProviderError> {
        if self.code != 0 {
            return Err(ProviderError::Rejected {
                code: self.code,
                message: self.message,
            });
        }
        if !self.request_id.is_empty() {
            debug!("provider request {} succeeded", self.request_id);
        }
        Ok(self.data)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobListRequest {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub id: String,
    pub data: JobData,
    pub params: JobParams,
    #[serde(default)]
    pub message: String,
    pub status: String,
    pub created_at: i64,
    pub updated_at: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobList {
    #[serde(default)]
    pub marker: String,
    #[serde(default)]
    pub items: Vec<JobSummary>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobQueryRequest {
    pub job: String,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub start: i64,
    #[serde(default)]
    pub end: i64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneDetail {
    #[serde(default)]
    pub suggestion: String,
    #[serde(default)]
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default)]
    pub score: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SceneVerdict {
    pub suggestion: String,
    #[serde(default)]
    pub details: Vec<SceneDetail>,
}

/// The provider's verdict on one sample, keyed by scene (`pulp`, `antispam`, ...).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemVerdict {
    pub suggestion: String,
    #[serde(default)]
    pub scenes: HashMap<String, SceneVerdict>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ImageResult {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub job: String,
    #[serde(default)]
    pub timestamp: i64,
    pub url: String,
    #[serde(default)]
    pub result: ItemVerdict,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AudioResult {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub job: String,
    #[serde(default)]
    pub start: i64,
    #[serde(default)]
    pub end: i64,
    pub url: String,
    #[serde(default)]
    pub audio_text: String,
    #[serde(default)]
    pub result: ItemVerdict,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobItems {
    #[serde(default)]
    pub image: Vec<ImageResult>,
    #[serde(default)]
    pub audio: Vec<AudioResult>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobQueryResult {
    #[serde(default)]
    pub marker: String,
    #[serde(default)]
    pub items: JobItems,
}

/// Operations the moderation provider exposes to us.
#[async_trait]
pub trait ModerationProvider: Send + Sync {
    /// Register a moderation job for a stream under the given policy.
    async fn create_job(
        &self,
        stream: &LiveStream,
        config: &ModerationConfig,
    ) -> Result<JobHandle, ProviderError>;

    async fn close_job(&self, job: &JobHandle) -> Result<(), ProviderError>;

    async fn list_jobs(&self, req: &JobListRequest) -> Result<JobList, ProviderError>;

    async fn query_job(&self, req: &JobQueryRequest) -> Result<JobQueryResult, ProviderError>;
}

/// [`ModerationProvider`] backed by the provider's HTTP API.
#[derive(Clone)]
pub struct HttpProvider {
    client: Client,
    endpoint: Url,
    token: String,
    callback: String,
    bucket: String,
    prefix: String,
}

impl HttpProvider {
    pub fn new(client: Client, config: &ProviderConfig) -> Self {
        Self {
            client,
            endpoint: config.endpoint.clone(),
            token: config.token.clone(),
            callback: config.callback.clone(),
            bucket: config.bucket.clone(),
            prefix: config.prefix.clone(),
        }
    }

    /// Build the job-create request for a stream.
    pub fn job_request(
        &self,
        stream: &LiveStream,
        config: &ModerationConfig,
    ) -> Result<JobCreateRequest, CensorError> {
        Ok(JobCreateRequest {
            data: JobData {
                id: stream.stream_id.clone(),
                uri: stream.rtmp_play_url.clone(),
                info: stream.title.clone(),
            },
            params: JobParams {
                image: ImageParams {
                    is_on: true,
                    scenes: config.scenes.names().into_iter().map(str::to_owned).collect(),
                    interval_msecs: config.interval_msecs()?,
                    saver: ImageSaver {
                        uid: None,
                        bucket: self.bucket.clone(),
                        prefix: self.prefix.clone(),
                    },
                    hook_rule: 0,
                },
                hook_url: self.callback.clone(),
                hook_auth: true,
            },
        })
    }

    async fn read<T: DeserializeOwned>(
        &self,
        res: reqwest::Response,
    ) -> Result<Option<T>, ProviderError> {
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            error!("provider responded with {status}: {body}");
            return Err(ProviderError::Status { status, body });
        }

        res.json::<Envelope<T>>().await?.check()
    }

    async fn post<B: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Option<T>, ProviderError> {
        let reqid = Uuid::new_v4().to_string();
        debug!("POST {path} ({reqid})");

        let res = self
            .client
            .post(self.endpoint.join(path)?)
            .bearer_auth(&self.token)
            .header(REQUEST_ID_HEADER, reqid)
            .json(body)
            .send()
            .await?;
        self.read(res).await
    }

    async fn get<Q: Serialize + Sync, T: DeserializeOwned>(
        &self,
        path: &str,
        query: &Q,
    ) -> Result<Option<T>, ProviderError> {
        let reqid = Uuid::new_v4().to_string();
        debug!("GET {path} ({reqid})");

        let res = self
            .client
            .get(self.endpoint.join(path)?)
            .bearer_auth(&self.token)
            .header(REQUEST_ID_HEADER, reqid)
            .query(query)
            .send()
            .await?;
        self.read(res).await
    }
}

#[async_trait]
impl ModerationProvider for HttpProvider {
    async fn create_job(
        &self,
        stream: &LiveStream,
        config: &ModerationConfig,
    ) -> Result<JobHandle, ProviderError> {
        let req = self
            .job_request(stream, config)
            .map_err(|e| ProviderError::InvalidRequest(e.to_string()))?;
        self.post::<_, JobHandle>(CREATE_PATH, &req)
            .await?
            .ok_or(ProviderError::MissingData)
    }

    async fn close_job(&self, job: &JobHandle) -> Result<(), ProviderError> {
        self.post::<_, serde_json::Value>(CLOSE_PATH, job)
            .await
            .map(drop)
    }

    async fn list_jobs(&self, req: &JobListRequest) -> Result<JobList, ProviderError> {
        Ok(self.get(LIST_PATH, req).await?.unwrap_or_default())
    }

    async fn query_job(&self, req: &JobQueryRequest) -> Result<JobQueryResult, ProviderError> {
        Ok(self.post(QUERY_PATH, req).await?.unwrap_or_default())
    }
}

/// Rewrite a locator of the form `<...>bucket/<path>` into `<public_addr>/<path>`.
///
/// Everything up to and including the first occurrence of the bucket name is
/// replaced by the public address.
pub fn public_url(bucket: &str, public_addr: &str, locator: &str) -> Result<String, CensorError> {
    if bucket.is_empty() {
        return Err(CensorError::precondition("no bucket configured"));
    }

    let (_, path) = locator.split_once(bucket).ok_or_else(|| {
        CensorError::precondition(format!("locator {locator:?} is not inside bucket {bucket:?}"))
    })?;

    Ok(format!("{public_addr}{path}"))
}

impl ProviderConfig {
    /// See [`public_url`].
    pub fn public_url(&self, locator: &str) -> Result<String, CensorError> {
        public_url(&self.bucket, &self.public_addr, locator)
    }
}
