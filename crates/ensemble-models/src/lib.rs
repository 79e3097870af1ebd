//! Model implementations for Ensemble.
//!
//! This crate provides concrete implementations of the `Model` trait.
//!
//! # Supported Providers
//!
//! - **Mock**: Testing, dry runs and development
//! - **watsonx**: IBM watsonx.ai hosted models (IBM Cloud API key required)

pub mod factory;
pub mod iam;
pub mod template;
pub mod watsonx;

use async_trait::async_trait;
use ensemble_abstraction::{
    ChatMessage, Model, ModelError, ModelParameters, ModelResponse, ModelUsage,
};
use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};
use tracing::debug;

pub use factory::{ModelConfig, ModelFactory, ModelType};
pub use iam::IamAuthenticator;
pub use template::ChatTemplate;
pub use watsonx::WatsonxModel;

/// A mock implementation of the `Model` trait for testing and demonstration.
///
/// Scripted responses are returned in order. Once they run out the model
/// answers with a well-formed final answer that echoes the prompt's first
/// line, so a crew backed by mocks always runs to completion.
#[derive(Debug, Default)]
pub struct MockModel {
    id: String,
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl MockModel {
    /// Creates a new `MockModel` with the given ID.
    #[must_use]
    pub fn new(id: String) -> Self {
        Self { id, ..Self::default() }
    }

    /// Creates a `MockModel` that replies with `responses` in order.
    #[must_use]
    pub fn with_responses<I, S>(id: String, responses: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id,
            responses: Mutex::new(responses.into_iter().map(Into::into).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Returns every prompt this model has received, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Returns how many generations have been requested.
    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn respond(&self, prompt: String, echo: &str) -> ModelResponse {
        let scripted = self.responses.lock().unwrap_or_else(PoisonError::into_inner).pop_front();
        let content = scripted.unwrap_or_else(|| {
            format!(
                "Thought: I now can give a great answer\nFinal Answer: Mock response from {}: {}",
                self.id, echo
            )
        });

        let prompt_tokens = count_tokens(&prompt);
        let completion_tokens = count_tokens(&content);
        self.prompts.lock().unwrap_or_else(PoisonError::into_inner).push(prompt);

        ModelResponse {
            content,
            model_id: Some(self.id.clone()),
            usage: Some(ModelUsage::new(prompt_tokens, completion_tokens)),
            stop_reason: Some("eos_token".to_string()),
        }
    }
}

#[async_trait]
impl Model for MockModel {
    async fn generate_text(
        &self,
        prompt: &str,
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        debug!(
            model_id = %self.id,
            prompt_len = prompt.len(),
            parameters = ?parameters,
            "MockModel generating text"
        );

        let echo = first_line(prompt);
        Ok(self.respond(prompt.to_string(), &echo))
    }

    async fn generate_chat_completion(
        &self,
        messages: &[ChatMessage],
        parameters: Option<ModelParameters>,
    ) -> Result<ModelResponse, ModelError> {
        debug!(
            model_id = %self.id,
            message_count = messages.len(),
            parameters = ?parameters,
            "MockModel generating chat completion"
        );

        let echo = messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| first_line(&m.content))
            .unwrap_or_default();
        let prompt = ChatTemplate::Plain.render(messages);
        Ok(self.respond(prompt, &echo))
    }

    fn model_id(&self) -> &str {
        &self.id
    }
}

/// First non-empty line of `text`, capped at 200 characters.
fn first_line(text: &str) -> String {
    text.lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| line.chars().take(200).collect())
        .unwrap_or_default()
}

/// Count tokens in a string (simplified: word count).
#[allow(clippy::cast_possible_truncation)]
fn count_tokens(text: &str) -> u32 {
    text.split_whitespace().count() as u32
}
