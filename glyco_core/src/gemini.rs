//! Gemini `generateContent` client.
//!
//! Implements [`TextGenerator`] over the Gemini REST API. Non-success
//! statuses and replies without any candidate text are errors, so the
//! classifier's retry loop treats them like transport failures.

use crate::classifier::{MealClassifier, TextGenerator};
use crate::config::ClassifierConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

const API_KEY_HEADER: &str = "x-goog-api-key";

#[derive(Serialize)]
struct GenerateRequest<'a> {
    contents: Vec<RequestContent<'a>>,
}

#[derive(Serialize)]
struct RequestContent<'a> {
    role: &'static str,
    parts: Vec<RequestPart<'a>>,
}

#[derive(Serialize)]
struct RequestPart<'a> {
    text: &'a str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Deserialize)]
struct Candidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

/// HTTP client for one Gemini model
pub struct GeminiClient {
    http: reqwest::Client,
    endpoint: String,
    model: String,
    api_key: String,
}

impl GeminiClient {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        endpoint: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            model: model.into(),
            api_key: api_key.into(),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    fn url(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.endpoint.trim_end_matches('/'),
            self.model
        )
    }
}

impl TextGenerator for GeminiClient {
    async fn generate(&self, system_prompt: &str, user_prompt: &str) -> Result<String> {
        let body = GenerateRequest {
            contents: vec![RequestContent {
                role: "user",
                parts: vec![
                    RequestPart {
                        text: system_prompt,
                    },
                    RequestPart { text: user_prompt },
                ],
            }],
        };

        let resp = self
            .http
            .post(self.url())
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await?;
        let resp = check_response(resp).await?;

        let data: GenerateResponse = resp.json().await?;
        extract_text(data)
    }
}

impl MealClassifier<GeminiClient> {
    /// Online classifier when a credential is configured, offline otherwise
    pub fn from_config(config: &ClassifierConfig) -> Result<Self> {
        match config.credential() {
            Some(key) => {
                let client = GeminiClient::new(
                    key,
                    config.model.clone(),
                    config.endpoint.clone(),
                    Duration::from_secs(config.timeout_secs),
                )?;
                tracing::debug!("Using Gemini model {}", client.model());
                Ok(MealClassifier::new(client))
            }
            None => Ok(MealClassifier::offline()),
        }
    }
}

/// Map non-success statuses to an error carrying the response body
async fn check_response(resp: reqwest::Response) -> Result<reqwest::Response> {
    if !resp.status().is_success() {
        let status = resp.status().as_u16();
        let message = resp.text().await.unwrap_or_default();
        return Err(Error::Classification(format!(
            "service returned {}: {}",
            status, message
        )));
    }
    Ok(resp)
}

/// Text of the first candidate, parts concatenated
fn extract_text(data: GenerateResponse) -> Result<String> {
    let text: String = data
        .candidates
        .into_iter()
        .next()
        .and_then(|c| c.content)
        .map(|content| content.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(Error::Classification("service returned no text".into()));
    }
    Ok(text)
}
