//! Meal classification with retry and an offline fallback.
//!
//! A [`MealClassifier`] turns a free-text meal description into a
//! [`NutritionEstimate`] by asking an external text-generation service.
//! Without a configured service it returns a fixed local estimate.
//!
//! Failed attempts are retried in a bounded loop; after attempt `n`
//! fails the classifier sleeps `base_delay * 2^n` before the next one.

use crate::{Confidence, Error, NutritionEstimate, Result};
use std::future::Future;
use std::time::Duration;

/// Instruction sent ahead of every meal description
pub const SYSTEM_PROMPT: &str = r#"
You are a nutritionist AI. Analyze the user's meal description and estimate the nutrition facts.
Return ONLY a valid JSON object with the following structure, no markdown formatting:
{
  "name": "Short concise name of the meal",
  "calories": 0,
  "carbs": 0,
  "protein": 0,
  "fat": 0,
  "confidence": "high" | "medium" | "low"
}
If the input is not a meal or cannot be estimated, return confidence "low" and 0 values.
"#;

/// Longest name kept from the description in the offline estimate
const OFFLINE_NAME_CHARS: usize = 20;

/// External text-generation service
pub trait TextGenerator: Send + Sync {
    /// Send the system instruction and user prompt; return the raw reply text
    fn generate(
        &self,
        system_prompt: &str,
        user_prompt: &str,
    ) -> impl Future<Output = Result<String>> + Send;
}

/// Bounded exponential backoff schedule
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts (including the initial one)
    pub max_attempts: u32,
    /// Multiplied by `2^attempt` to get the wait after a failed attempt
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt `attempt` (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor)
    }
}

/// Client turning meal descriptions into nutrition estimates
pub struct MealClassifier<G> {
    generator: Option<G>,
    retry: RetryPolicy,
}

impl<G: TextGenerator> MealClassifier<G> {
    /// Classifier backed by an external service
    pub fn new(generator: G) -> Self {
        Self {
            generator: Some(generator),
            retry: RetryPolicy::default(),
        }
    }

    /// Classifier with no service configured; always uses the local estimate
    pub fn offline() -> Self {
        Self {
            generator: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry
    }

    pub fn generator(&self) -> Option<&G> {
        self.generator.as_ref()
    }

    /// Estimate nutrition for a meal description.
    ///
    /// Transport errors, error replies, and undecodable bodies all count as
    /// a failed attempt. After the last attempt fails the error is returned
    /// as [`Error::Classification`].
    pub async fn analyze(&self, description: &str) -> Result<NutritionEstimate> {
        let Some(generator) = &self.generator else {
            tracing::warn!("No classifier API key configured, using offline estimate");
            return Ok(offline_estimate(description));
        };

        let prompt = format!("Meal: {}", description);
        let mut attempt = 1;
        loop {
            let outcome = match generator.generate(SYSTEM_PROMPT, &prompt).await {
                Ok(text) => decode_estimate(&text),
                Err(e) => Err(e),
            };

            match outcome {
                Ok(estimate) => {
                    tracing::debug!("Classified meal on attempt {}", attempt);
                    return Ok(estimate);
                }
                Err(e) if attempt < self.retry.max_attempts => {
                    let delay = self.retry.delay_after(attempt);
                    tracing::warn!(
                        "Classifier error (attempt {}), retrying in {:?}: {}",
                        attempt,
                        delay,
                        e
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => {
                    tracing::error!("Classifier error (attempt {}): {}", attempt, e);
                    return Err(Error::Classification(format!(
                        "Failed to analyze meal after {} attempts: {}",
                        attempt, e
                    )));
                }
            }
        }
    }
}

/// Decode a service reply, stripping markdown code fences first
pub fn decode_estimate(text: &str) -> Result<NutritionEstimate> {
    let cleaned = text.replace("```json", "").replace("```", "");
    Ok(serde_json::from_str(cleaned.trim())?)
}

/// Deterministic estimate used when no service is configured
pub fn offline_estimate(description: &str) -> NutritionEstimate {
    let mut name: String = description.chars().take(OFFLINE_NAME_CHARS).collect();
    if description.chars().count() > OFFLINE_NAME_CHARS {
        name.push_str("...");
    }

    NutritionEstimate {
        name,
        calories: 500.0,
        carbs: 50.0,
        protein: 20.0,
        fat: 15.0,
        confidence: Some(Confidence::Medium),
    }
}
