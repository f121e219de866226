// src/remote.rs
//
// HTTP clients for the model-serving process that hosts the embedding
// models and runs fine-tuning jobs.

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use log::debug;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use url::Url;

use crate::config::ModelServiceConfig;
use crate::embedding::{EMBEDDING_SERVICE, EmbeddingModel};
use crate::errors::ExternalError;
use crate::scheduler::fine_tune::{FINE_TUNE_SERVICE, FineTuneOutcome, FineTuner, TrainingExample};

#[derive(Serialize)]
struct EmbedRequest<'a> {
    model: &'a str,
    texts: &'a [String],
}

#[derive(Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

#[derive(Serialize)]
struct FineTuneRequest<'a> {
    base_model: &'a str,
    output_path: String,
    train: &'a [TrainingExample],
    eval: &'a [TrainingExample],
}

#[derive(Deserialize)]
struct FineTuneResponse {
    model_id: String,
    eval_score: f64,
}

fn parse_base_url(raw: &str) -> Result<Url> {
    Url::parse(raw).map_err(|e| anyhow!("Invalid model service URL {}: {}", raw, e))
}

/// `timeout` is the client's own request timeout, if it sets one.
fn request_error(service: &'static str, timeout: Option<Duration>, e: reqwest::Error) -> ExternalError {
    if let (true, Some(timeout)) = (e.is_timeout(), timeout) {
        ExternalError::Timeout { service, timeout }
    } else if e.is_timeout() {
        ExternalError::failed(service, format!("request timed out: {}", e))
    } else if e.is_connect() {
        ExternalError::unavailable(service, e)
    } else {
        ExternalError::failed(service, e)
    }
}

/// An embedding model served over HTTP, addressed by model id.
pub struct HttpEmbeddingModel {
    http_client: Client,
    base_url: Url,
    model_id: String,
    request_timeout: Duration,
}

impl HttpEmbeddingModel {
    pub fn new(config: &ModelServiceConfig, model_id: impl Into<String>) -> Result<Self> {
        let http_client = Client::builder().timeout(config.request_timeout).build()?;
        Ok(Self {
            http_client,
            base_url: parse_base_url(&config.base_url)?,
            model_id: model_id.into(),
            request_timeout: config.request_timeout,
        })
    }
}

#[async_trait]
impl EmbeddingModel for HttpEmbeddingModel {
    fn model_id(&self) -> &str {
        &self.model_id
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ExternalError> {
        let url = self
            .base_url
            .join("/embed")
            .map_err(|e| ExternalError::failed(EMBEDDING_SERVICE, e))?;
        let response = self
            .http_client
            .post(url)
            .json(&EmbedRequest {
                model: &self.model_id,
                texts,
            })
            .send()
            .await
            .map_err(|e| request_error(EMBEDDING_SERVICE, Some(self.request_timeout), e))?;

        if !response.status().is_success() {
            return Err(ExternalError::failed(
                EMBEDDING_SERVICE,
                format!("HTTP {}", response.status()),
            ));
        }
        let body: EmbedResponse = response
            .json()
            .await
            .map_err(|e| ExternalError::malformed(EMBEDDING_SERVICE, e))?;
        if body.embeddings.len() != texts.len() {
            return Err(ExternalError::malformed(
                EMBEDDING_SERVICE,
                format!("expected {} vectors, got {}", texts.len(), body.embeddings.len()),
            ));
        }
        Ok(body.embeddings)
    }
}

/// Submits fine-tuning jobs to the model service. The scheduler bounds each
/// job with its own timeout, so the client itself sets none.
pub struct HttpFineTuner {
    http_client: Client,
    base_url: Url,
    config: ModelServiceConfig,
}

impl HttpFineTuner {
    pub fn new(config: &ModelServiceConfig) -> Result<Self> {
        Ok(Self {
            http_client: Client::builder().build()?,
            base_url: parse_base_url(&config.base_url)?,
            config: config.clone(),
        })
    }
}

#[async_trait]
impl FineTuner for HttpFineTuner {
    async fn fine_tune(
        &self,
        base: Arc<dyn EmbeddingModel>,
        train: &[TrainingExample],
        eval: &[TrainingExample],
        output_path: &Path,
    ) -> Result<FineTuneOutcome, ExternalError> {
        let url = self
            .base_url
            .join("/fine-tune")
            .map_err(|e| ExternalError::failed(FINE_TUNE_SERVICE, e))?;
        debug!(
            "Submitting fine-tuning job on {} ({} train, {} eval)",
            base.model_id(),
            train.len(),
            eval.len()
        );

        let response = self
            .http_client
            .post(url)
            .json(&FineTuneRequest {
                base_model: base.model_id(),
                output_path: output_path.display().to_string(),
                train,
                eval,
            })
            .send()
            .await
            .map_err(|e| request_error(FINE_TUNE_SERVICE, None, e))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(ExternalError::failed(
                FINE_TUNE_SERVICE,
                format!("HTTP {}: {}", status, detail),
            ));
        }
        let body: FineTuneResponse = response
            .json()
            .await
            .map_err(|e| ExternalError::malformed(FINE_TUNE_SERVICE, e))?;

        let model = HttpEmbeddingModel::new(&self.config, body.model_id)
            .map_err(|e| ExternalError::failed(FINE_TUNE_SERVICE, e))?;
        Ok(FineTuneOutcome {
            model: Arc::new(model),
            eval_score: body.eval_score,
        })
    }
}
