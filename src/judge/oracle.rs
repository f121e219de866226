// src/judge/oracle.rs

use async_trait::async_trait;
use log::{info, warn};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use url::Url;

use crate::config::OracleConfig;
use crate::errors::ExternalError;

pub const ORACLE_SERVICE: &str = "scoring oracle";

const CONNECTION_CHECK_TIMEOUT_SECS: u64 = 5;

/// Backend that turns a judge prompt into raw text. The judge owns prompt
/// construction and parsing and never trusts the returned text to be well formed.
#[async_trait]
pub trait ScoringOracle: Send + Sync {
    /// Identifier recorded with every evaluation.
    fn model_name(&self) -> &str;

    async fn score(&self, prompt: &str, timeout: Duration) -> Result<String, ExternalError>;
}

#[derive(Serialize)]
struct GenerateOptions {
    temperature: f32,
    top_p: f32,
    num_predict: u32,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
    options: GenerateOptions,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: String,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    models: Vec<TagEntry>,
}

#[derive(Deserialize)]
struct TagEntry {
    name: String,
}

/// Ollama `/api/generate` client.
#[derive(Clone)]
pub struct OllamaOracle {
    http_client: Client,
    base_url: Url,
    model: String,
}

impl OllamaOracle {
    pub fn new(config: &OracleConfig) -> anyhow::Result<Self> {
        let base_url = Url::parse(&config.base_url)
            .map_err(|e| anyhow::anyhow!("Invalid oracle URL {}: {}", config.base_url, e))?;
        let http_client = Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http_client,
            base_url,
            model: config.model.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ExternalError> {
        self.base_url
            .join(path)
            .map_err(|e| ExternalError::failed(ORACLE_SERVICE, e))
    }

    /// Checks that Ollama answers and has the configured model pulled.
    /// Only logs; the judge falls back to heuristics if the oracle is down.
    pub async fn check_connection(&self) -> bool {
        let url = match self.endpoint("/api/tags") {
            Ok(url) => url,
            Err(e) => {
                warn!("{}", e);
                return false;
            }
        };
        let request = self
            .http_client
            .get(url)
            .timeout(Duration::from_secs(CONNECTION_CHECK_TIMEOUT_SECS));

        match request.send().await {
            Ok(response) if response.status().is_success() => {
                match response.json::<TagsResponse>().await {
                    Ok(tags) => {
                        let available: Vec<String> = tags.models.into_iter().map(|m| m.name).collect();
                        if available.iter().any(|name| name == &self.model) {
                            info!("Quality judge ready with {}", self.model);
                            true
                        } else {
                            warn!(
                                "Model {} not found on oracle. Available models: {:?}",
                                self.model, available
                            );
                            false
                        }
                    }
                    Err(e) => {
                        warn!("Could not read oracle model list: {}", e);
                        false
                    }
                }
            }
            Ok(response) => {
                warn!("Oracle not responding normally: HTTP {}", response.status());
                false
            }
            Err(e) => {
                warn!("Cannot connect to oracle at {}: {}", self.base_url, e);
                false
            }
        }
    }
}

#[async_trait]
impl ScoringOracle for OllamaOracle {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn score(&self, prompt: &str, timeout: Duration) -> Result<String, ExternalError> {
        let url = self.endpoint("/api/generate")?;
        let request = GenerateRequest {
            model: &self.model,
            prompt,
            stream: false,
            options: GenerateOptions {
                temperature: 0.1,
                top_p: 0.9,
                num_predict: 50,
            },
        };

        let response = self
            .http_client
            .post(url)
            .timeout(timeout)
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ExternalError::Timeout {
                        service: ORACLE_SERVICE,
                        timeout,
                    }
                } else {
                    ExternalError::unavailable(ORACLE_SERVICE, e)
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            if status == reqwest::StatusCode::NOT_FOUND {
                warn!("Model '{}' not found on oracle, pull it first", self.model);
            }
            return Err(ExternalError::failed(
                ORACLE_SERVICE,
                format!("HTTP {}", status),
            ));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| ExternalError::malformed(ORACLE_SERVICE, e))?;
        let text = body.response.trim().to_string();
        if text.is_empty() {
            return Err(ExternalError::malformed(ORACLE_SERVICE, "empty response"));
        }
        Ok(text)
    }
}
