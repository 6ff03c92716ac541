use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::de::DeserializeOwned;
use tracing::debug;

use super::error::{ApiError, Result};
use super::types::{ConnectionInfo, RunStarted, RunStatus, StartRunRequest};
use super::ControlPlane;
use crate::config::ApiConfig;

pub struct HttpControlPlane {
    client: reqwest::Client,
    base: Url,
    access_token: Option<String>,
}

impl HttpControlPlane {
    pub fn new(config: &ApiConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("sandcastle/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let base = Url::parse(config.host.trim_end_matches('/'))
            .map_err(|e| ApiError::InvalidHost(format!("{}: {}", config.host, e)))?;
        if base.cannot_be_a_base() {
            return Err(ApiError::InvalidHost(config.host.clone()));
        }

        Ok(Self {
            client,
            base,
            access_token: config.access_token.clone(),
        })
    }

    /// Appends `segments` to the service URL. Each segment is percent-encoded,
    /// so a `/` inside one cannot change the path.
    fn url(&self, segments: &[&str]) -> Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }

    fn run_url(&self, run_id: &str, rest: &[&str]) -> Result<Url> {
        if matches!(run_id, "" | "." | "..") {
            return Err(ApiError::InvalidRunId(run_id.to_string()));
        }
        let mut segments = vec!["api", "runs", run_id];
        segments.extend_from_slice(rest);
        Ok(self.url(&segments))
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.access_token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn decode<T: DeserializeOwned>(
        response: reqwest::Response,
        run_id: Option<&str>,
    ) -> Result<T> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }

        match (status, run_id) {
            (StatusCode::NOT_FOUND, Some(id)) => Err(ApiError::RunNotFound(id.to_string())),
            (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, _) => Err(ApiError::Unauthorized),
            _ => {
                let body = response.text().await.unwrap_or_default();
                Err(ApiError::Status {
                    status: status.as_u16(),
                    body: body.trim().to_string(),
                })
            }
        }
    }
}

#[async_trait]
impl ControlPlane for HttpControlPlane {
    async fn connection_info(&self, run_id: &str) -> Result<ConnectionInfo> {
        let url = self.run_url(run_id, &["sandbox", "connection"])?;
        debug!("GET {}", url);
        let response = self.authorize(self.client.get(url)).send().await?;
        Self::decode(response, Some(run_id)).await
    }

    async fn run_status(&self, run_id: &str) -> Result<RunStatus> {
        let url = self.run_url(run_id, &[])?;
        debug!("GET {}", url);
        let response = self.authorize(self.client.get(url)).send().await?;
        Self::decode(response, Some(run_id)).await
    }

    async fn start_run(&self, request: &StartRunRequest) -> Result<RunStarted> {
        let url = self.url(&["api", "runs"]);
        debug!("POST {} ({})", url, request.config_file);
        let response = self
            .authorize(self.client.post(url).json(request))
            .send()
            .await?;
        Self::decode(response, None).await
    }
}
