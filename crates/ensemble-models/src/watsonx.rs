//! IBM watsonx.ai model implementation.
//!
//! This module provides an implementation of the `Model` trait for the
//! watsonx.ai text generation API. Chat completions are rendered into a
//! single prompt with the [`ChatTemplate`] matching the model.

use crate::iam::IamAuthenticator;
use crate::template::ChatTemplate;
use async_trait::async_trait;
use ensemble_abstraction::{
    ChatMessage, Model, ModelError, ModelParameters, ModelResponse, ModelUsage,
};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error};

/// Environment variable holding the IBM Cloud API key.
pub const WATSONX_API_KEY_ENV: &str = "WATSONX_APIKEY";

/// API version date sent with every generation request.
pub const DEFAULT_API_VERSION: &str = "2023-05-29";

/// watsonx.ai model implementation.
#[derive(Debug, Clone)]
pub struct WatsonxModel {
    /// The model ID (e.g., "meta-llama/llama-3-70b-instruct").
    model_id: String,
    /// Regional endpoint (e.g., "https://us-south.ml.cloud.ibm.com").
    base_url: String,
    /// watsonx project the inference is billed to.
    project_id: String,
    /// API version query parameter.
    api_version: String,
    /// Defaults applied to every request.
    parameters: ModelParameters,
    /// Prompt format for chat completions.
    template: ChatTemplate,
    /// Per-request timeout.
    timeout: Duration,
    /// Token source, shared between clones.
    auth: Arc<IamAuthenticator>,
    /// HTTP client for making requests.
    client: Client,
}

impl WatsonxModel {
    /// Creates a new `WatsonxModel`, reading the API key from `WATSONX_APIKEY`.
    ///
    /// # Errors
    /// Returns a `ModelError` if the API key is not found in environment variables.
    pub fn new(model_id: String, base_url: String, project_id: String) -> Result<Self, ModelError> {
        let api_key = env::var(WATSONX_API_KEY_ENV).map_err(|_| {
            ModelError::UnsupportedModelProvider(format!(
                "{} environment variable not set",
                WATSONX_API_KEY_ENV
            ))
        })?;
        Ok(Self::with_api_key(model_id, base_url, project_id, api_key))
    }

    /// Creates a new `WatsonxModel` with an explicit API key.
    #[must_use]
    pub fn with_api_key(
        model_id: String,
        base_url: String,
        project_id: String,
        api_key: String,
    ) -> Self {
        let client = Client::new();
        let template = ChatTemplate::for_model(&model_id);
        Self {
            model_id,
            base_url: base_url.trim_end_matches('/').to_string(),
            project_id,
            api_version: DEFAULT_API_VERSION.to_string(),
            parameters: ModelParameters::default(),
            template,
            timeout: Duration::from_secs(120),
            auth: Arc::new(IamAuthenticator::new(api_key, client.clone())),
            client,
        }
    }

    /// Sets the default generation parameters.
    #[must_use]
    pub fn with_parameters(mut self, parameters: ModelParameters) -> Self {
        self.parameters = parameters;
        self
    }

    /// Overrides the IAM endpoint used for token exchange.
    #[must_use]
    pub fn with_iam_url(mut self, iam_url: impl Into<String>) -> Self {
        self.auth = Arc::new(self.auth.relocated(iam_url));
        self
    }

    /// Sets the per-request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Overrides the chat template picked from the model ID.
    #[must_use]
    pub fn with_template(mut self, template: ChatTemplate) -> Self {
        self.template = template;
        self
    }

    /// Returns the regional endpoint.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the project ID.
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    /// Returns the default generation parameters.
    pub fn parameters(&self) -> &ModelParameters {
        &self.parameters
    }

    /// Returns the chat template in use.
    pub fn template(&self) -> ChatTemplate {
        self.template
    }
}

// watsonx.ai API request/response structures

#[derive(Debug, Serialize)]
struct GenerationRequest<'a> {
    model_id: &'a str,
    input: &'a str,
    project_id: &'a str,
    parameters: &'a ModelParameters,
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    model_id: Option<String>,
    #[serde(default)]
    results: Vec<GenerationResult>,
}

#[derive(Debug, Deserialize)]
struct GenerationResult {
    generated_text: String,
    #[serde(default)]
    generated_token_count: Option<u32>,
    #[serde(default)]
    input_token_count: Option<u32>,
    #[serde(default)]
    stop_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WatsonxErrorBody {
    #[serde(default)]
    errors: Vec<WatsonxErrorItem>,
}

#[derive(Debug, Deserialize)]
struct WatsonxErrorItem {
    #[serde(default)]
    code: Option<String>,
    message: String,
}

impl WatsonxModel {
    /// Extracts a readable message from a watsonx error body.
    fn error_message(error_text: &str) -> String {
        serde_json::from_str::<WatsonxErrorBody>(error_text)
            .ok()
            .and_then(|body| {
                body.errors.into_iter().next().map(|item| match item.code {
                    Some(code) => format!("{}: {}", code, item.message),
                    None => item.message,
                })
            })
            .unwrap_or_else(|| error_text.to_string())
    }

    async fn generate(
        &self,
        input: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        let parameters = match parameters {
            Some(overrides) => self.parameters.merged_with(&overrides),
            None => self.parameters.clone(),
        };

        let token = self.auth.token().await?;
        let url = format!("{}/ml/v1/text/generation", self.base_url);
        let request_body = GenerationRequest {
            model_id: &self.model_id,
            input,
            project_id: &self.project_id,
            parameters: &parameters,
        };

        let response = self
            .client
            .post(&url)
            .query(&[("version", self.api_version.as_str())])
            .timeout(self.timeout)
            .bearer_auth(&token)
            .header("Accept", "application/json")
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, base_url = %self.base_url, "Failed to send request to watsonx");
                ModelError::RequestError(format!("Network error: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
            error!(
                status = %status,
                error = %error_text,
                model_id = %self.model_id,
                "watsonx API returned error status"
            );
            let message = Self::error_message(&error_text);

            return Err(match status.as_u16() {
                401 | 403 => {
                    self.auth.invalidate().await;
                    ModelError::AuthenticationError(format!(
                        "watsonx rejected the request ({}): {}",
                        status, message
                    ))
                }
                429 => ModelError::QuotaExceeded {
                    provider: "watsonx".to_string(),
                    message: Some(message),
                },
                _ => ModelError::ModelResponseError(format!("API error ({}): {}", status, message)),
            });
        }

        let body: GenerationResponse = response.json().await.map_err(|e| {
            error!(error = %e, "Failed to parse watsonx API response");
            ModelError::SerializationError(format!("Failed to parse response: {}", e))
        })?;

        let result = body.results.into_iter().next().ok_or_else(|| {
            error!(model_id = %self.model_id, "No results in watsonx API response");
            ModelError::ModelResponseError("No results in API response".to_string())
        })?;

        let usage = match (result.input_token_count, result.generated_token_count) {
            (None, None) => None,
            (prompt, completion) => {
                Some(ModelUsage::new(prompt.unwrap_or(0), completion.unwrap_or(0)))
            }
        };

        debug!(
            model_id = %self.model_id,
            response_len = result.generated_text.len(),
            stop_reason = ?result.stop_reason,
            "watsonx generation completed"
        );

        Ok(ModelResponse {
            content: result.generated_text,
            model_id: Some(body.model_id.unwrap_or_else(|| self.model_id.clone())),
            usage,
            stop_reason: result.stop_reason,
        })
    }
}

#[async_trait]
impl Model for WatsonxModel {
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        debug!(
            model_id = %self.model_id,
            prompt_len = prompt.len(),
            parameters = ?parameters,
            "WatsonxModel generating text"
        );

        self.generate(prompt, parameters).await
    }

    async fn generate_chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        debug!(
            model_id = %self.model_id,
            message_count = messages.len(),
            template = ?self.template,
            parameters = ?parameters,
            "WatsonxModel generating chat completion"
        );

        let prompt = self.template.render(messages);
        self.generate(&prompt, parameters).await
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watsonx_model_creation_with_api_key() {
        let model = WatsonxModel::with_api_key(
            "ibm/granite-13b-instruct-v2".to_string(),
            "https://us-south.ml.cloud.ibm.com/".to_string(),
            "project-1".to_string(),
            "test-key".to_string(),
        )
        .with_parameters(ModelParameters::greedy(500));

        assert_eq!(model.model_id(), "ibm/granite-13b-instruct-v2");
        assert_eq!(model.base_url(), "https://us-south.ml.cloud.ibm.com");
        assert_eq!(model.project_id(), "project-1");
        assert_eq!(model.parameters().max_new_tokens, Some(500));
        assert_eq!(model.template(), ChatTemplate::Plain);
    }

    #[test]
    fn test_error_message_extraction() {
        let body = r#"{"errors": [{"code": "model_not_supported", "message": "Model 'x' is not supported"}], "trace": "abc"}"#;
        assert_eq!(
            WatsonxModel::error_message(body),
            "model_not_supported: Model 'x' is not supported"
        );
        assert_eq!(WatsonxModel::error_message("plain failure"), "plain failure");
    }

    #[test]
    fn test_debug_does_not_leak_api_key() {
        let model = WatsonxModel::with_api_key(
            "m".to_string(),
            "https://example.test".to_string(),
            "p".to_string(),
            "very-secret-key".to_string(),
        );
        assert!(!format!("{:?}", model).contains("very-secret-key"));
    }
}
